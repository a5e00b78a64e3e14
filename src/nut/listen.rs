// Licensed under the Open Software License version 3.0
//! Event-driven (`LISTEN`/`DATACHANGED`) mode. `rups` only speaks the polling
//! subset of the protocol, so this talks to the raw TCP stream directly for
//! the one command sequence it doesn't cover.
use super::config::NutServerConfig;
use crate::error::CoreError;
use std::cmp::min;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::sleep;

const MAX_RELISTEN_ATTEMPTS: u32 = 5;

async fn write_line(stream: &mut TcpStream, line: &str) -> std::io::Result<()> {
    stream.write_all(line.as_bytes()).await?;
    stream.write_all(b"\n").await
}

async fn read_line(reader: &mut BufReader<tokio::net::tcp::ReadHalf<'_>>) -> std::io::Result<String> {
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    Ok(line.trim_end().to_string())
}

/// Connects, authenticates, and issues `LISTEN <ups>`. Returns `Ok(stream)`
/// on `OK`, or an error if the server refuses or doesn't support it.
async fn connect_and_listen(
    config: &NutServerConfig,
    username: Option<&str>,
    password: Option<&str>,
    ups_name: &str,
) -> Result<TcpStream, CoreError> {
    let mut stream = TcpStream::connect((config.host(), config.port()))
        .await
        .map_err(|e| CoreError::TransientIo(e.to_string()))?;

    if let (Some(user), Some(pass)) = (username, password) {
        write_line(&mut stream, &format!("USERNAME {user}"))
            .await
            .map_err(|e| CoreError::TransientIo(e.to_string()))?;
        let (read_half, _) = stream.split();
        let mut reader = BufReader::new(read_half);
        let response = read_line(&mut reader)
            .await
            .map_err(|e| CoreError::TransientIo(e.to_string()))?;
        if !response.starts_with("OK") {
            return Err(CoreError::Protocol(format!("USERNAME rejected: {response}")));
        }
        write_line(&mut stream, &format!("PASSWORD {pass}"))
            .await
            .map_err(|e| CoreError::TransientIo(e.to_string()))?;
        let (read_half, _) = stream.split();
        let mut reader = BufReader::new(read_half);
        let response = read_line(&mut reader)
            .await
            .map_err(|e| CoreError::TransientIo(e.to_string()))?;
        if !response.starts_with("OK") {
            return Err(CoreError::Protocol(format!("PASSWORD rejected: {response}")));
        }
    }

    write_line(&mut stream, &format!("LISTEN {ups_name}"))
        .await
        .map_err(|e| CoreError::TransientIo(e.to_string()))?;
    let (read_half, _) = stream.split();
    let mut reader = BufReader::new(read_half);
    let response = read_line(&mut reader)
        .await
        .map_err(|e| CoreError::TransientIo(e.to_string()))?;
    if !response.starts_with("OK") {
        return Err(CoreError::Protocol(format!(
            "server does not support LISTEN: {response}"
        )));
    }

    Ok(stream)
}

/// Runs the event-driven reader + heartbeat loop until `shutdown_rx` fires or
/// the reconnect budget (`min(2^attempt, 30)s`, max 5 attempts) is exhausted.
/// Emits on `data_changed_tx` for every `DATACHANGED` line observed.
pub async fn run_event_driven_listener(
    server_config: NutServerConfig,
    username: Option<String>,
    password: Option<String>,
    ups_name: String,
    heartbeat_interval: Duration,
    data_changed_tx: mpsc::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), CoreError> {
    let mut attempt = 0u32;
    loop {
        let stream = match connect_and_listen(
            &server_config,
            username.as_deref(),
            password.as_deref(),
            &ups_name,
        )
        .await
        {
            Ok(stream) => {
                attempt = 0;
                stream
            }
            Err(error) => {
                attempt += 1;
                if attempt >= MAX_RELISTEN_ATTEMPTS {
                    return Err(error);
                }
                let delay_secs = min(2u64.saturating_pow(attempt), 30);
                tracing::warn!(
                    "Event-driven relisten attempt {}/{} failed: {}; retrying in {}s",
                    attempt,
                    MAX_RELISTEN_ATTEMPTS,
                    error,
                    delay_secs
                );
                tokio::select! {
                    _ = sleep(Duration::from_secs(delay_secs)) => continue,
                    _ = shutdown_rx.recv() => return Ok(()),
                }
            }
        };

        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);
        let mut line = String::new();

        loop {
            tokio::select! {
                result = reader.read_line(&mut line) => {
                    match result {
                        Ok(0) => {
                            tracing::debug!("Event-driven connection closed by peer, relistening");
                            break;
                        }
                        Ok(_) => {
                            let trimmed = line.trim_end();
                            if trimmed.starts_with("DATACHANGED") {
                                let _ = data_changed_tx.send(()).await;
                            }
                            line.clear();
                        }
                        Err(error) => {
                            tracing::warn!("Event-driven read error: {}", error);
                            break;
                        }
                    }
                }
                _ = sleep(heartbeat_interval) => {
                    if write_half.write_all(b"VER\n").await.is_err() {
                        tracing::warn!("Failed to send heartbeat, relistening");
                        break;
                    }
                }
                _ = shutdown_rx.recv() => {
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_series_matches_cap() {
        let delays: Vec<u64> = (1..MAX_RELISTEN_ATTEMPTS)
            .map(|attempt| min(2u64.saturating_pow(attempt), 30))
            .collect();
        assert_eq!(delays, vec![2, 4, 8]);
    }
}
