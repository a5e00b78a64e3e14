// Licensed under the Open Software License version 3.0
//! The collaborator boundary that actually powers the host off (§6). Real
//! implementations call into the OS (`shutdown -h now`, systemd, etc); this
//! crate only defines the contract and a mock used for `testMode == dryRun`.
use crate::error::CoreError;
use std::future::Future;
use std::pin::Pin;

type ShutdownFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CoreError>> + Send + 'a>>;

pub trait HostShutdown: Send + Sync {
    fn shutdown(&self) -> ShutdownFuture<'_>;
    fn reboot(&self) -> ShutdownFuture<'_>;
}

/// Records calls instead of touching the host; used when `testMode == dryRun`
/// and in tests that exercise the shutdown manager end-to-end.
#[derive(Default)]
pub struct MockHostShutdown {
    calls: std::sync::Mutex<Vec<&'static str>>,
}

impl MockHostShutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }
}

impl HostShutdown for MockHostShutdown {
    fn shutdown(&self) -> ShutdownFuture<'_> {
        Box::pin(async move {
            self.calls.lock().unwrap().push("shutdown");
            Ok(())
        })
    }

    fn reboot(&self) -> ShutdownFuture<'_> {
        Box::pin(async move {
            self.calls.lock().unwrap().push("reboot");
            Ok(())
        })
    }
}

/// Powers the real host off via the system `shutdown` command.
pub struct SystemHostShutdown;

impl HostShutdown for SystemHostShutdown {
    fn shutdown(&self) -> ShutdownFuture<'_> {
        Box::pin(async move {
            let status = tokio::process::Command::new("shutdown")
                .args(["-h", "now"])
                .status()
                .await
                .map_err(|e| CoreError::Fatal(e.to_string()))?;
            if status.success() {
                Ok(())
            } else {
                Err(CoreError::Fatal(format!("shutdown command exited with {status}")))
            }
        })
    }

    fn reboot(&self) -> ShutdownFuture<'_> {
        Box::pin(async move {
            let status = tokio::process::Command::new("shutdown")
                .args(["-r", "now"])
                .status()
                .await
                .map_err(|e| CoreError::Fatal(e.to_string()))?;
            if status.success() {
                Ok(())
            } else {
                Err(CoreError::Fatal(format!("shutdown command exited with {status}")))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_records_shutdown_calls() {
        let host = MockHostShutdown::new();
        host.shutdown().await.unwrap();
        assert_eq!(host.calls(), vec!["shutdown"]);
    }
}
