//! Toolkit configuration
//!
//! Settings that influence how a decorator stack is built and how user code
//! is run. Usually left at their defaults; can be loaded from a JSON file.

use crate::error::{ToolkitError, ToolkitResult};
use crate::traits::{Persistable, Validatable};
use serde::{Deserialize, Serialize};

/// Configuration of a decorator stack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolkitConfig {
    /// Timezone used when the caller does not provide one
    pub default_timezone: String,

    /// Install the outermost projection optimizer
    pub enable_perf_optimizer: bool,

    /// Run synchronous user functions on the blocking thread pool
    pub run_sync_handlers_blocking: bool,

    /// Check the schema graph when the stack is finalized
    pub validate_on_build: bool,
}

impl Default for ToolkitConfig {
    fn default() -> Self {
        Self {
            default_timezone: "UTC".to_string(),
            enable_perf_optimizer: true,
            run_sync_handlers_blocking: true,
            validate_on_build: true,
        }
    }
}

impl ToolkitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.default_timezone = timezone.into();
        self
    }

    pub fn with_perf_optimizer(mut self, enabled: bool) -> Self {
        self.enable_perf_optimizer = enabled;
        self
    }

    pub fn with_blocking_handlers(mut self, enabled: bool) -> Self {
        self.run_sync_handlers_blocking = enabled;
        self
    }

    pub fn with_validation(mut self, enabled: bool) -> Self {
        self.validate_on_build = enabled;
        self
    }
}

impl Validatable for ToolkitConfig {
    fn validate(&self) -> ToolkitResult<()> {
        if self.default_timezone.is_empty() {
            return Err(ToolkitError::InvalidConfig(
                "default_timezone cannot be empty".to_string(),
            ));
        }
        if self.default_timezone.chars().any(char::is_whitespace) {
            return Err(ToolkitError::InvalidConfig(format!(
                "'{}' is not a valid timezone",
                self.default_timezone
            )));
        }
        Ok(())
    }
}

impl Persistable for ToolkitConfig {}

// ============================================================================
// Tests
// ============================================================================
