//! Validation and JSON loading
//!
//! Settings handed to a stack are checked with [`Validatable`] before use and
//! may be read from a JSON document through [`Persistable`].

use crate::error::{ResultExt, ToolkitResult};
use serde::{Serialize, de::DeserializeOwned};
use std::path::Path;

/// A value whose consistency can be checked on its own
pub trait Validatable {
    fn validate(&self) -> ToolkitResult<()>;

    fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }

    /// Messages of the failed checks; empty when valid
    fn validation_errors(&self) -> Vec<String> {
        match self.validate() {
            Ok(()) => vec![],
            Err(e) => vec![e.to_string()],
        }
    }
}

/// A value stored as a JSON document
pub trait Persistable: Serialize + DeserializeOwned + Sized {
    fn to_json(&self) -> ToolkitResult<String> {
        serde_json::to_string_pretty(self).map_err(Into::into)
    }

    fn from_json(json: &str) -> ToolkitResult<Self> {
        serde_json::from_str(json).map_err(Into::into)
    }

    fn load_from_file(path: &Path) -> ToolkitResult<Self> {
        let json = std::fs::read_to_string(path).with_context(format!("Reading {}", path.display()))?;
        Self::from_json(&json).with_context(format!("Parsing {}", path.display()))
    }
}

// ============================================================================
// Tests
// ============================================================================
