// Licensed under the Open Software License version 3.0
//! The single shared application value (§9): every component is constructed
//! from an `AppContext` instead of reaching for a module-level singleton.
use crate::config::types::{Config, TestMode};
use crate::events::EventBus;
use crate::hooks::types::HookRegistry;
use crate::hostshutdown::{HostShutdown, MockHostShutdown, SystemHostShutdown};
use crate::notifier::dispatcher::NotifierDispatcher;
use crate::notifier::types::NotifierRegistry;
use crate::nut::protocol::UpsSnapshot;
use crate::shutdown::manager::{ShutdownManager, ShutdownManagerConfig};
use std::sync::Arc;
use tokio::sync::RwLock;

pub struct AppContext {
    pub config: Config,
    pub events: Arc<EventBus>,
    pub hook_registry: Arc<HookRegistry>,
    pub notifier_registry: Arc<NotifierRegistry>,
    pub host_shutdown: Arc<dyn HostShutdown>,
    pub latest_snapshot: Arc<RwLock<Option<UpsSnapshot>>>,
}

impl AppContext {
    /// Builds the shared context from a loaded config. Device- and
    /// channel-specific plugins are registered by the caller via
    /// `hook_registry`/`notifier_registry` before the shutdown manager or
    /// dispatcher are constructed -- this crate only supplies the registry
    /// and the mock fallback.
    pub fn new(config: Config) -> Self {
        let mock_mode = config.test_mode == TestMode::Mock;

        let mut hook_registry = HookRegistry::new();
        hook_registry.set_mock_mode(mock_mode);

        let notifier_registry = NotifierRegistry::new();

        let host_shutdown: Arc<dyn HostShutdown> = match config.test_mode {
            TestMode::Mock | TestMode::DryRun => Arc::new(MockHostShutdown::new()),
            TestMode::Live => Arc::new(SystemHostShutdown),
        };

        Self {
            config,
            events: Arc::new(EventBus::new()),
            hook_registry: Arc::new(hook_registry),
            notifier_registry: Arc::new(notifier_registry),
            host_shutdown,
            latest_snapshot: Arc::new(RwLock::new(None)),
        }
    }

    pub fn build_shutdown_manager(&self) -> ShutdownManager {
        ShutdownManager::new(
            ShutdownManagerConfig {
                wait_minutes: self.config.shutdown.wait_minutes(),
                final_wait_seconds: self.config.shutdown.final_wait_seconds(),
                battery_runtime_threshold_minutes: self.config.shutdown.estimated_runtime_threshold_minutes(),
                dry_run: matches!(self.config.test_mode, TestMode::DryRun | TestMode::Mock),
            },
            self.events.clone(),
            self.latest_snapshot.clone(),
            self.config.pre_shutdown_hooks.clone(),
            self.hook_registry.clone(),
            self.host_shutdown.clone(),
        )
    }

    pub fn build_notifier_dispatcher(&self) -> NotifierDispatcher {
        NotifierDispatcher::new(self.notifier_registry.clone(), self.config.notifier_channels.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::Example;

    #[test]
    fn mock_test_mode_uses_mock_host_shutdown() {
        let mut config = Config::example();
        config.test_mode = TestMode::Mock;
        let context = AppContext::new(config);
        assert!(context.hook_registry.create_instance("anything", &Default::default()).is_ok());
    }
}
