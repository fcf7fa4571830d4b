//! # Trellis Core
//!
//! Core types, traits, and error handling for Trellis.
//!
//! This crate provides the foundational building blocks shared by the query
//! primitives and the decorator toolkit, including:
//!
//! - **Types**: Column types, operators, records and the caller context
//! - **Schema**: Field, collection and datasource schemas
//! - **Traits**: Validation and JSON persistence (`Validatable`, `Persistable`)
//! - **Errors**: Unified error handling with `ToolkitError` and `ToolkitResult`
//!

pub mod config;
pub mod error;
pub mod records;
pub mod schema;
pub mod traits;
pub mod types;

// Re-export commonly used items at crate root
pub use config::ToolkitConfig;
pub use error::{BusinessError, BusinessErrorKind, ResultExt, ToolkitError, ToolkitResult};
pub use records::{CompositeId, get_field_value, get_primary_key, set_field_value};
pub use schema::{
    ActionSchema, ActionScope, CollectionSchema, ColumnSchema, ColumnValidation, DatasourceSchema,
    FieldSchema, ManyToManySchema, ManyToOneSchema, OneToManySchema, OneToOneSchema,
    PolymorphicManyToOneSchema, PolymorphicOneToSchema, SchemaLookup,
};
pub use traits::{Persistable, Validatable};
pub use types::{Caller, ColumnType, Operator, PATH_SEPARATOR, PrimitiveType, Record, Value};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
