//! Error types for Trellis
//!
//! This module provides unified error handling across the toolkit: structural
//! errors raised while building or customizing a decorator stack, query errors
//! raised while rewriting projections and condition trees, and the business
//! error family that is meant to cross the process boundary to the frontend.

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Business Errors
// ============================================================================

/// Kind of a business error, used by adapters to pick a response code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusinessErrorKind {
    Validation,
    Forbidden,
    Unprocessable,
    Conflict,
}

impl BusinessErrorKind {
    /// Tag sent to the frontend
    pub fn name(&self) -> &'static str {
        match self {
            BusinessErrorKind::Validation => "ValidationError",
            BusinessErrorKind::Forbidden => "ForbiddenError",
            BusinessErrorKind::Unprocessable => "UnprocessableError",
            BusinessErrorKind::Conflict => "ConflictError",
        }
    }
}

/// An error raised by customer code or by a decorator on behalf of the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusinessError {
    pub kind: BusinessErrorKind,
    pub message: String,
    /// Optional structured payload forwarded as-is to the frontend
    pub data: Option<serde_json::Value>,
}

impl BusinessError {
    pub fn new(kind: BusinessErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

impl std::fmt::Display for BusinessError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name(), self.message)
    }
}

// ============================================================================
// ToolkitError
// ============================================================================

/// The main error type for Trellis
#[derive(Debug, Error)]
pub enum ToolkitError {
    // ========================================================================
    // Not Found Errors
    // ========================================================================
    /// Collection not found in a datasource
    #[error("Collection '{name}' not found. Available collections are: {available}")]
    CollectionNotFound { name: String, available: String },

    /// Collection is known under another name since a rename
    #[error("Collection '{old}' has been renamed to '{new}'")]
    CollectionRenamed { old: String, new: String },

    /// Collection was removed from the published datasource
    #[error("Collection '{0}' was removed")]
    CollectionRemoved(String),

    /// Field not found in a collection
    #[error("No such field '{field}' in the collection '{collection}'")]
    FieldNotFound { collection: String, field: String },

    /// Action not found in a collection
    #[error("Action '{action}' is not defined in the collection '{collection}'")]
    ActionNotFound { collection: String, action: String },

    /// Chart not found
    #[error("Chart '{0}' is not defined")]
    ChartNotFound(String),

    // ========================================================================
    // Duplicate Errors
    // ========================================================================
    /// Duplicate collection name
    #[error("Collection '{0}' already exists")]
    DuplicateCollection(String),

    /// Duplicate field name
    #[error("Field '{field}' already exists in the collection '{collection}'")]
    DuplicateField { collection: String, field: String },

    /// Duplicate chart name
    #[error("Chart '{0}' already exists")]
    DuplicateChart(String),

    // ========================================================================
    // Customization Errors
    // ========================================================================
    /// Invalid rename of a field or collection
    #[error("Invalid rename: {0}")]
    InvalidRename(String),

    /// Invalid visibility change
    #[error("Invalid publication: {0}")]
    Publication(String),

    /// Invalid computed field registration or evaluation
    #[error("Computed field error: {0}")]
    Computed(String),

    /// Invalid write customization or patch
    #[error("Write error: {0}")]
    Write(String),

    /// Relation graph contains a cycle
    #[error("Cycle detected in the schema: {0}")]
    SchemaCycle(String),

    /// Schema is inconsistent (dangling relation, missing field)
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    // ========================================================================
    // Query Errors
    // ========================================================================
    /// Projection manipulation failed
    #[error("Projection error: {0}")]
    Projection(String),

    /// Condition tree manipulation failed
    #[error("Condition tree error: {0}")]
    ConditionTree(String),

    /// Filter manipulation failed
    #[error("Filter error: {0}")]
    Filter(String),

    /// Sort manipulation failed
    #[error("Sort error: {0}")]
    Sort(String),

    /// Aggregation failed
    #[error("Aggregation error: {0}")]
    Aggregation(String),

    /// Record is missing required values
    #[error("Record error: {0}")]
    Record(String),

    /// Operation not supported by the collection
    #[error("Operation '{operation}' is not supported by '{collection}'")]
    Unsupported {
        collection: String,
        operation: String,
    },

    // ========================================================================
    // Business and User Errors
    // ========================================================================
    /// Business error intended for the frontend
    #[error("{0}")]
    Business(BusinessError),

    /// User-provided function failed outside of the business error family
    #[error("User code failed: {0}")]
    UserCode(String),

    // ========================================================================
    // Configuration and Serialization Errors
    // ========================================================================
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization error
    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    /// File IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// Internal error (should not happen)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Generic error with context
    #[error("{context}: {message}")]
    WithContext { context: String, message: String },
}

impl ToolkitError {
    /// Create a collection-not-found error listing the known collections
    pub fn collection_not_found<I, S>(name: impl Into<String>, available: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = available
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        names.sort();
        ToolkitError::CollectionNotFound {
            name: name.into(),
            available: names.join(", "),
        }
    }

    /// Create a field-not-found error
    pub fn field_not_found(collection: impl Into<String>, field: impl Into<String>) -> Self {
        ToolkitError::FieldNotFound {
            collection: collection.into(),
            field: field.into(),
        }
    }

    /// Create a validation business error
    pub fn validation(msg: impl Into<String>) -> Self {
        ToolkitError::Business(BusinessError::new(BusinessErrorKind::Validation, msg))
    }

    /// Create a forbidden business error
    pub fn forbidden(msg: impl Into<String>) -> Self {
        ToolkitError::Business(BusinessError::new(BusinessErrorKind::Forbidden, msg))
    }

    /// Create an unprocessable business error
    pub fn unprocessable(msg: impl Into<String>) -> Self {
        ToolkitError::Business(BusinessError::new(BusinessErrorKind::Unprocessable, msg))
    }

    /// Create a conflict business error
    pub fn conflict(msg: impl Into<String>) -> Self {
        ToolkitError::Business(BusinessError::new(BusinessErrorKind::Conflict, msg))
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        ToolkitError::Internal(msg.into())
    }

    /// Create an error with context
    pub fn with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        ToolkitError::WithContext {
            context: context.into(),
            message: msg.into(),
        }
    }

    /// Business error payload, if any
    pub fn business(&self) -> Option<&BusinessError> {
        match self {
            ToolkitError::Business(err) => Some(err),
            _ => None,
        }
    }

    /// Check if this error belongs to the business family
    pub fn is_business(&self) -> bool {
        matches!(self, ToolkitError::Business(_))
    }

    /// Check if this error is a not-found error
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ToolkitError::CollectionNotFound { .. }
                | ToolkitError::CollectionRenamed { .. }
                | ToolkitError::CollectionRemoved(_)
                | ToolkitError::FieldNotFound { .. }
                | ToolkitError::ActionNotFound { .. }
                | ToolkitError::ChartNotFound(_)
        )
    }

    /// Check if this error comes from a bad customization or schema.
    ///
    /// Those are expected to fail fast while the stack is being built.
    pub fn is_structural(&self) -> bool {
        self.is_not_found()
            || matches!(
                self,
                ToolkitError::DuplicateCollection(_)
                    | ToolkitError::DuplicateField { .. }
                    | ToolkitError::DuplicateChart(_)
                    | ToolkitError::InvalidRename(_)
                    | ToolkitError::Publication(_)
                    | ToolkitError::SchemaCycle(_)
                    | ToolkitError::InvalidSchema(_)
            )
    }
}

/// Result type alias using ToolkitError
pub type ToolkitResult<T> = Result<T, ToolkitError>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn with_context<C: Into<String>>(self, context: C) -> ToolkitResult<T>;
}

impl<T, E: Into<ToolkitError>> ResultExt<T> for Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> ToolkitResult<T> {
        self.map_err(|e| {
            let err: ToolkitError = e.into();
            ToolkitError::WithContext {
                context: context.into(),
                message: err.to_string(),
            }
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
