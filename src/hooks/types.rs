// Licensed under the Open Software License version 3.0
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OnFailure {
    Continue,
    Abort,
}

/// A pre-shutdown action targeting one managed device. `id`, `priority`, and
/// `onFailure` drive the executor's grouping and abort policy (§4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookSpec {
    pub id: String,
    pub display_name: String,
    pub priority: i32,
    pub enabled: bool,
    pub on_failure: OnFailure,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_seconds: u64,
    pub plugin_id: String,
    pub config: HashMap<String, String>,
}

impl HookSpec {
    pub fn new(id: impl Into<String>, priority: i32, plugin_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            priority,
            enabled: true,
            on_failure: OnFailure::Continue,
            timeout_seconds: 120,
            max_retries: 0,
            retry_delay_seconds: 5,
            plugin_id: plugin_id.into(),
            config: HashMap::new(),
        }
    }
}

/// The result of running one hook to completion (or to cancellation/timeout).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HookOutcome {
    pub hook_id: String,
    pub hook_name: String,
    pub priority: i32,
    pub success: bool,
    pub error: Option<String>,
    pub duration_seconds: f64,
    pub attempts: u32,
    pub cancelled: bool,
    pub skipped: bool,
}

impl HookOutcome {
    pub fn status_label(&self) -> &'static str {
        if self.cancelled {
            "cancelled"
        } else if self.skipped {
            "skipped"
        } else if self.success {
            "success"
        } else {
            "failed"
        }
    }
}

type HookFuture<'a> = Pin<Box<dyn Future<Output = Result<bool, CoreError>> + Send + 'a>>;

/// The capability set every managed-device hook must expose. Concrete
/// transports (SSH, HTTP, vendor APIs) live outside this crate; this trait is
/// the collaborator boundary named in §6.
///
/// Methods return a boxed future rather than being declared `async fn` so
/// that `Box<dyn Hook>` stays object-safe for the registry below.
pub trait Hook: Send + Sync {
    fn execute(&self) -> HookFuture<'_>;

    fn test_connection(&self) -> HookFuture<'_> {
        self.execute()
    }
}

impl fmt::Debug for dyn Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<dyn Hook>")
    }
}

/// `hookId -> factory(config)`, the explicit registration table that replaces
/// the duck-typed plugin discovery the originating system used (§9).
pub struct HookRegistry {
    factories: HashMap<
        String,
        Box<dyn Fn(&HashMap<String, String>) -> Result<Box<dyn Hook>, CoreError> + Send + Sync>,
    >,
    mock_mode: bool,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
            mock_mode: false,
        }
    }

    pub fn set_mock_mode(&mut self, enabled: bool) {
        self.mock_mode = enabled;
    }

    pub fn register<F>(&mut self, plugin_id: impl Into<String>, factory: F)
    where
        F: Fn(&HashMap<String, String>) -> Result<Box<dyn Hook>, CoreError> + Send + Sync + 'static,
    {
        self.factories.insert(plugin_id.into(), Box::new(factory));
    }

    pub fn create_instance(
        &self,
        plugin_id: &str,
        config: &HashMap<String, String>,
    ) -> Result<Box<dyn Hook>, CoreError> {
        if self.mock_mode {
            return Ok(Box::new(MockHook));
        }
        let factory = self
            .factories
            .get(plugin_id)
            .ok_or_else(|| CoreError::ConfigInvalid(format!("hook not found: {plugin_id}")))?;
        factory(config)
    }
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A hook that performs no real operation, used for `testMode == mock` and in
/// tests that exercise the executor's scheduling without real devices.
pub struct MockHook;

impl Hook for MockHook {
    fn execute(&self) -> HookFuture<'_> {
        Box::pin(async { Ok(true) })
    }
}

#[cfg(test)]
pub struct FailingHook;

#[cfg(test)]
impl Hook for FailingHook {
    fn execute(&self) -> HookFuture<'_> {
        Box::pin(async { Err(CoreError::Fatal(String::from("simulated failure"))) })
    }
}

#[cfg(test)]
pub struct SlowHook {
    pub sleep_seconds: u64,
}

#[cfg(test)]
impl Hook for SlowHook {
    fn execute(&self) -> HookFuture<'_> {
        Box::pin(async move {
            tokio::time::sleep(std::time::Duration::from_secs(self.sleep_seconds)).await;
            Ok(true)
        })
    }
}
