//! # Trellis Toolkit
//!
//! The decorator engine and everything built on it:
//!
//! - **Interfaces**: the `Collection` and `Datasource` contracts, action and chart payloads
//! - **Storage**: an in-memory datasource and a composite merging several datasources
//! - **Decorators**: one generic collection/datasource decorator and the layers
//!   plugged into it (renames, publication, computed fields, segments, actions,
//!   charts, write interception, projection shortcuts)
//! - **Stack**: the fixed composition order and schema validation
//! - **Customizer**: the registration surface routing to the right layer
//!

pub mod composite;
pub mod context;
pub mod customizer;
pub mod decorators;
pub mod handler;
pub mod interfaces;
pub mod memory;
pub mod stack;
pub mod validation;

#[cfg(test)]
mod test_support;

pub use composite::CompositeDatasource;
pub use context::{ChartContext, CollectionContext, DatasourceContext};
pub use customizer::{CollectionCustomizer, DatasourceCustomizer};
pub use decorators::{
    ActionContext, ActionDefinition, CollectionDecorator, CollectionLayer, ComputedDefinition,
    DatasourceDecorator, DatasourceLayer, WriteAction, WriteCustomizationContext,
};
pub use handler::UserFn;
pub use interfaces::{
    ActionField, ActionFieldType, ActionResult, Chart, ChartResultBuilder, Collection,
    CollectionAddedListener, Datasource, SchemaListener,
};
pub use memory::{MemoryCollection, MemoryDatasource};
pub use stack::DecoratorStack;
pub use validation::{SchemaGraph, ValidationResult, Validator};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
