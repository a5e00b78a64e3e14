// Licensed under the Open Software License version 3.0
use config::file::read_config_or_create_default;
use context::AppContext;
use monitor::service::MonitorService;
use shutdown_notifier::start_shutdown_notifier;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

mod config;
mod context;
mod error;
mod events;
mod hooks;
mod hostshutdown;
mod monitor;
mod notifier;
mod nut;
mod shutdown;
mod shutdown_notifier;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive("ups_guard=info".parse().unwrap())
                .from_env_lossy(),
        )
        .init();

    let config = read_config_or_create_default();
    let context = AppContext::new(config);

    let (shutdown_tx, shutdown_rx) = broadcast::channel::<()>(1);

    let shutdown_notifier_handle = tokio::spawn(async move {
        start_shutdown_notifier(shutdown_tx).await;
    });

    let shutdown_manager = Arc::new(context.build_shutdown_manager());
    let dispatcher = Arc::new(context.build_notifier_dispatcher());

    let dispatcher_handle = {
        let mut domain_events = context.events.domain_event.subscribe();
        let dispatcher = dispatcher.clone();
        let mut shutdown_rx = shutdown_rx.resubscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = domain_events.recv() => {
                        match event {
                            Ok(event) => dispatcher.dispatch(&event).await,
                            Err(broadcast::error::RecvError::Lagged(_)) => continue,
                            Err(broadcast::error::RecvError::Closed) => break,
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        })
    };

    let monitor_handle = {
        let server_config = context
            .config
            .nut
            .server()
            .cloned()
            .expect("a NUT server must be configured");
        let monitoring = context.config.nut.clone();
        let events = context.events.clone();
        let shutdown_manager = shutdown_manager.clone();
        let latest_snapshot = context.latest_snapshot.clone();
        let shutdown_rx = shutdown_rx.resubscribe();
        tokio::spawn(async move {
            let monitor = MonitorService::new(
                &server_config,
                monitoring,
                vec![],
                events,
                shutdown_manager,
                latest_snapshot,
            );
            monitor.run(shutdown_rx).await;
        })
    };

    let _ = tokio::try_join!(
        shutdown_notifier_handle,
        dispatcher_handle,
        monitor_handle
    );

    tracing::debug!("Successfully shut down");
}
