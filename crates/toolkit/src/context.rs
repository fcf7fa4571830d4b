//! Contexts handed to user functions

use crate::interfaces::{Collection, Datasource};
use std::sync::Arc;
use trellis_core::records::CompositeId;
use trellis_core::types::{Caller, Record};
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::{ConditionTreeFactory, PaginatedFilter, Projection};

/// The collection being customized and the caller of the current request
#[derive(Clone)]
pub struct CollectionContext {
    pub collection: Arc<dyn Collection>,
    pub caller: Caller,
}

impl CollectionContext {
    pub fn new(collection: Arc<dyn Collection>, caller: Caller) -> Self {
        Self { collection, caller }
    }

    pub fn collection_name(&self) -> String {
        self.collection.name()
    }
}

impl std::fmt::Debug for CollectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionContext")
            .field("collection", &self.collection.name())
            .field("caller", &self.caller.email)
            .finish()
    }
}

/// Context of a datasource-level chart
#[derive(Clone)]
pub struct DatasourceContext {
    pub datasource: Arc<dyn Datasource>,
    pub caller: Caller,
}

impl DatasourceContext {
    pub fn new(datasource: Arc<dyn Datasource>, caller: Caller) -> Self {
        Self { datasource, caller }
    }
}

/// Context of a collection chart rendered for one record
#[derive(Clone, Debug)]
pub struct ChartContext {
    pub context: CollectionContext,
    pub record_id: CompositeId,
}

impl ChartContext {
    /// The id of the record, for collections with a single primary key
    pub fn record_id(&self) -> ToolkitResult<&trellis_core::Value> {
        match self.record_id.as_slice() {
            [id] => Ok(id),
            _ => Err(ToolkitError::Record(
                "Collection is using a composite pk: use `record_id` directly".to_string(),
            )),
        }
    }

    pub async fn get_record(&self, projection: &Projection) -> ToolkitResult<Record> {
        let collection = &self.context.collection;
        let schema = collection.schema()?;
        let tree = ConditionTreeFactory::match_ids(&schema, std::slice::from_ref(&self.record_id))?;
        let filter = PaginatedFilter::new().with_condition_tree(tree);
        collection
            .list(&self.context.caller, &filter, projection)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                ToolkitError::Record(format!(
                    "No record with id {:?} in '{}'",
                    self.record_id,
                    collection.name()
                ))
            })
    }
}
