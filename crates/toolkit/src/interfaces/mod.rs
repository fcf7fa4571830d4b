//! Collection and datasource contracts
//!
//! Every storage adapter and every decorator implements [`Collection`]; a
//! [`Datasource`] is a named set of collections plus datasource-level charts.
//! Schema changes travel upward through [`SchemaListener`] and new collections
//! through [`CollectionAddedListener`], both held as weak references so that
//! a child never keeps its parents alive.

pub mod action;
pub mod chart;

pub use action::{ActionField, ActionFieldType, ActionResult};
pub use chart::{Chart, ChartResultBuilder, DistributionEntry, TimeBasedEntry};

use async_trait::async_trait;
use std::sync::{Arc, Weak};
use trellis_core::records::CompositeId;
use trellis_core::schema::{CollectionSchema, DatasourceSchema, SchemaLookup};
use trellis_core::types::{Caller, Record};
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::{AggregateResult, Aggregation, Filter, PaginatedFilter, Projection};

// ============================================================================
// Listeners
// ============================================================================

/// Notified when the schema of a collection it wraps became stale
pub trait SchemaListener: Send + Sync {
    fn on_schema_dirty(&self);
}

/// Notified when a collection is added to a datasource it wraps
pub trait CollectionAddedListener: Send + Sync {
    fn on_collection_added(&self, collection: Arc<dyn Collection>);
}

// ============================================================================
// Collection
// ============================================================================

/// A named set of records with a schema and CRUD primitives
#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> String;

    fn schema(&self) -> ToolkitResult<Arc<CollectionSchema>>;

    async fn list(
        &self,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> ToolkitResult<Vec<Record>>;

    async fn create(&self, caller: &Caller, data: Vec<Record>) -> ToolkitResult<Vec<Record>>;

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &Record) -> ToolkitResult<()>;

    async fn delete(&self, caller: &Caller, filter: &Filter) -> ToolkitResult<()>;

    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> ToolkitResult<Vec<AggregateResult>>;

    async fn execute(
        &self,
        _caller: &Caller,
        name: &str,
        _data: &Record,
        _filter: Option<&Filter>,
    ) -> ToolkitResult<ActionResult> {
        Err(ToolkitError::ActionNotFound {
            collection: self.name(),
            action: name.to_string(),
        })
    }

    async fn get_form(
        &self,
        _caller: &Caller,
        name: &str,
        _data: Option<&Record>,
        _filter: Option<&Filter>,
    ) -> ToolkitResult<Vec<ActionField>> {
        Err(ToolkitError::ActionNotFound {
            collection: self.name(),
            action: name.to_string(),
        })
    }

    async fn render_chart(
        &self,
        _caller: &Caller,
        name: &str,
        _record_id: &CompositeId,
    ) -> ToolkitResult<Chart> {
        Err(ToolkitError::ChartNotFound(name.to_string()))
    }

    /// Invalidate any cached schema. No-op for collections whose schema never changes.
    fn mark_schema_as_dirty(&self) {}

    /// Register a parent to be told when this schema becomes stale
    fn subscribe_schema_changes(&self, _listener: Weak<dyn SchemaListener>) {}
}

// ============================================================================
// Datasource
// ============================================================================

#[async_trait]
pub trait Datasource: Send + Sync {
    fn collections(&self) -> Vec<Arc<dyn Collection>>;

    fn get_collection(&self, name: &str) -> ToolkitResult<Arc<dyn Collection>> {
        let collections = self.collections();
        collections
            .iter()
            .find(|c| c.name() == name)
            .cloned()
            .ok_or_else(|| {
                ToolkitError::collection_not_found(name, collections.iter().map(|c| c.name()))
            })
    }

    fn schema(&self) -> ToolkitResult<DatasourceSchema> {
        Ok(DatasourceSchema::default())
    }

    async fn render_chart(&self, _caller: &Caller, name: &str) -> ToolkitResult<Chart> {
        Err(ToolkitError::ChartNotFound(name.to_string()))
    }

    fn subscribe_on_collection_added(&self, _listener: Weak<dyn CollectionAddedListener>) {}
}

/// Schema lookup over the collections of a datasource
pub struct DatasourceSchemas<'a>(pub &'a dyn Datasource);

impl SchemaLookup for DatasourceSchemas<'_> {
    fn collection_schema(&self, name: &str) -> ToolkitResult<Arc<CollectionSchema>> {
        self.0.get_collection(name)?.schema()
    }
}

/// Two handles designate the same collection instance
pub fn same_collection(left: &Arc<dyn Collection>, right: &Arc<dyn Collection>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(left), Arc::as_ptr(right))
}

/// Upgrade live listeners and drop the ones whose owner is gone
pub(crate) fn live_listeners<T: ?Sized>(listeners: &mut Vec<Weak<T>>) -> Vec<Arc<T>> {
    let mut live = Vec::with_capacity(listeners.len());
    listeners.retain(|weak| match weak.upgrade() {
        Some(listener) => {
            live.push(listener);
            true
        }
        None => false,
    });
    live
}
