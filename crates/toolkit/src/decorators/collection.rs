//! Generic collection decorator
//!
//! A [`CollectionDecorator`] wraps one child collection and delegates every
//! call to its [`CollectionLayer`]. Layer hooks default to "refine the filter,
//! then forward to the child", so a layer only overrides what it changes.
//!
//! The refined schema is cached together with the version it was computed at.
//! Marking the schema dirty bumps the version and notifies the decorators
//! stacked on top of this one; the child is never touched.

use super::datasource::{DatasourceDecorator, DatasourceLayer};
use crate::context::CollectionContext;
use crate::interfaces::{
    ActionField, ActionResult, Chart, Collection, SchemaListener, live_listeners,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use trellis_core::records::CompositeId;
use trellis_core::schema::{CollectionSchema, FieldSchema};
use trellis_core::types::{Caller, Record};
use trellis_core::{ToolkitConfig, ToolkitError, ToolkitResult};
use trellis_query::{AggregateResult, Aggregation, Filter, PaginatedFilter, Projection, Sort};

// ============================================================================
// CollectionLayer
// ============================================================================

/// One cross-cutting concern applied to every collection of a datasource
#[async_trait]
pub trait CollectionLayer: Default + Send + Sync + Sized + 'static {
    /// Datasource-wide state shared by the collections of this layer
    type Datasource: DatasourceLayer;

    fn collection_name(&self, this: &CollectionDecorator<Self>) -> String {
        this.child().name()
    }

    fn refine_schema(
        &self,
        _this: &CollectionDecorator<Self>,
        schema: CollectionSchema,
    ) -> ToolkitResult<CollectionSchema> {
        Ok(schema)
    }

    async fn refine_filter(
        &self,
        _this: &CollectionDecorator<Self>,
        _caller: &Caller,
        filter: Filter,
    ) -> ToolkitResult<Filter> {
        Ok(filter)
    }

    async fn refine_sort(&self, _this: &CollectionDecorator<Self>, sort: Sort) -> ToolkitResult<Sort> {
        Ok(sort)
    }

    async fn list(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> ToolkitResult<Vec<Record>> {
        this.forward_list(caller, filter, projection).await
    }

    async fn create(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        data: Vec<Record>,
    ) -> ToolkitResult<Vec<Record>> {
        this.child().create(caller, data).await
    }

    async fn update(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &Filter,
        patch: &Record,
    ) -> ToolkitResult<()> {
        this.forward_update(caller, filter, patch).await
    }

    async fn delete(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &Filter,
    ) -> ToolkitResult<()> {
        this.forward_delete(caller, filter).await
    }

    async fn aggregate(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> ToolkitResult<Vec<AggregateResult>> {
        this.forward_aggregate(caller, filter, aggregation, limit).await
    }

    async fn execute(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        name: &str,
        data: &Record,
        filter: Option<&Filter>,
    ) -> ToolkitResult<ActionResult> {
        let filter = this.refine_optional_filter(caller, filter).await?;
        this.child().execute(caller, name, data, filter.as_ref()).await
    }

    async fn get_form(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        name: &str,
        data: Option<&Record>,
        filter: Option<&Filter>,
    ) -> ToolkitResult<Vec<ActionField>> {
        let filter = this.refine_optional_filter(caller, filter).await?;
        this.child().get_form(caller, name, data, filter.as_ref()).await
    }

    async fn render_chart(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        name: &str,
        record_id: &CompositeId,
    ) -> ToolkitResult<Chart> {
        this.child().render_chart(caller, name, record_id).await
    }
}

// ============================================================================
// CollectionDecorator
// ============================================================================

pub struct CollectionDecorator<L: CollectionLayer> {
    me: Weak<CollectionDecorator<L>>,
    child: Arc<dyn Collection>,
    datasource: Weak<DatasourceDecorator<L>>,
    layer: L,
    config: Arc<ToolkitConfig>,
    version: AtomicU64,
    cache: RwLock<Option<(u64, Arc<CollectionSchema>)>>,
    parents: RwLock<Vec<Weak<dyn SchemaListener>>>,
}

impl<L: CollectionLayer> CollectionDecorator<L> {
    /// Wrap `child` and subscribe to its schema changes
    pub(crate) fn new(
        child: Arc<dyn Collection>,
        datasource: Weak<DatasourceDecorator<L>>,
        config: Arc<ToolkitConfig>,
    ) -> Arc<Self> {
        let decorator = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            child,
            datasource,
            layer: L::default(),
            config,
            version: AtomicU64::new(0),
            cache: RwLock::new(None),
            parents: RwLock::new(Vec::new()),
        });
        let listener: Weak<dyn SchemaListener> = Arc::downgrade(&decorator) as Weak<dyn SchemaListener>;
        decorator.child.subscribe_schema_changes(listener);
        decorator
    }

    pub fn child(&self) -> &Arc<dyn Collection> {
        &self.child
    }

    pub fn layer(&self) -> &L {
        &self.layer
    }

    pub fn config(&self) -> &ToolkitConfig {
        &self.config
    }

    pub fn datasource(&self) -> ToolkitResult<Arc<DatasourceDecorator<L>>> {
        self.datasource
            .upgrade()
            .ok_or_else(|| ToolkitError::internal("the datasource of this collection was dropped"))
    }

    /// Owning handle on this decorator
    pub fn handle(&self) -> ToolkitResult<Arc<Self>> {
        self.me
            .upgrade()
            .ok_or_else(|| ToolkitError::internal("collection decorator is being dropped"))
    }

    /// Another collection of the same layer
    pub fn sibling(&self, name: &str) -> ToolkitResult<Arc<Self>> {
        self.datasource()?.get_decorator(name)
    }

    pub fn context(&self, caller: &Caller) -> ToolkitResult<CollectionContext> {
        let collection: Arc<dyn Collection> = self.handle()?;
        Ok(CollectionContext::new(collection, caller.clone()))
    }

    /// A field of the refined schema
    pub fn field(&self, name: &str) -> ToolkitResult<FieldSchema> {
        let schema = Collection::schema(self)?;
        schema.field(&self.name(), name).cloned()
    }

    /// Current schema version; bumped by every invalidation
    pub fn schema_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Drop the cached schema and notify the decorators stacked on top
    pub fn invalidate_schema(&self) {
        self.version.fetch_add(1, Ordering::AcqRel);
        *self.cache.write().unwrap_or_else(PoisonError::into_inner) = None;

        let parents = live_listeners(&mut self.parents.write().unwrap_or_else(PoisonError::into_inner));
        for parent in parents {
            parent.on_schema_dirty();
        }
    }

    // ------------------------------------------------------------------------
    // Forwarding helpers used by layer defaults
    // ------------------------------------------------------------------------

    pub async fn refine_paginated_filter(
        &self,
        caller: &Caller,
        filter: &PaginatedFilter,
    ) -> ToolkitResult<PaginatedFilter> {
        let base = self.layer.refine_filter(self, caller, filter.to_base_filter()).await?;
        let sort = match &filter.sort {
            Some(sort) => Some(self.layer.refine_sort(self, sort.clone()).await?),
            None => None,
        };
        Ok(PaginatedFilter {
            filter: base,
            sort,
            page: filter.page,
        })
    }

    pub async fn refine_optional_filter(
        &self,
        caller: &Caller,
        filter: Option<&Filter>,
    ) -> ToolkitResult<Option<Filter>> {
        match filter {
            Some(filter) => Ok(Some(self.layer.refine_filter(self, caller, filter.clone()).await?)),
            None => Ok(None),
        }
    }

    pub async fn forward_list(
        &self,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> ToolkitResult<Vec<Record>> {
        let filter = self.refine_paginated_filter(caller, filter).await?;
        self.child.list(caller, &filter, projection).await
    }

    pub async fn forward_update(
        &self,
        caller: &Caller,
        filter: &Filter,
        patch: &Record,
    ) -> ToolkitResult<()> {
        let filter = self.layer.refine_filter(self, caller, filter.clone()).await?;
        self.child.update(caller, &filter, patch).await
    }

    pub async fn forward_delete(&self, caller: &Caller, filter: &Filter) -> ToolkitResult<()> {
        let filter = self.layer.refine_filter(self, caller, filter.clone()).await?;
        self.child.delete(caller, &filter).await
    }

    pub async fn forward_aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> ToolkitResult<Vec<AggregateResult>> {
        let filter = self.layer.refine_filter(self, caller, filter.clone()).await?;
        self.child.aggregate(caller, &filter, aggregation, limit).await
    }
}

impl<L: CollectionLayer> SchemaListener for CollectionDecorator<L> {
    fn on_schema_dirty(&self) {
        self.invalidate_schema();
    }
}

#[async_trait]
impl<L: CollectionLayer> Collection for CollectionDecorator<L> {
    fn name(&self) -> String {
        self.layer.collection_name(self)
    }

    fn schema(&self) -> ToolkitResult<Arc<CollectionSchema>> {
        let version = self.schema_version();
        if let Some((cached_version, schema)) =
            self.cache.read().unwrap_or_else(PoisonError::into_inner).as_ref()
        {
            if *cached_version == version {
                return Ok(Arc::clone(schema));
            }
        }

        let child_schema = self.child.schema()?;
        let refined = Arc::new(self.layer.refine_schema(self, (*child_schema).clone())?);
        tracing::debug!("Recomputed schema of '{}' at version {}", self.name(), version);

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        if self.schema_version() == version {
            *cache = Some((version, Arc::clone(&refined)));
        }
        Ok(refined)
    }

    async fn list(
        &self,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> ToolkitResult<Vec<Record>> {
        self.layer.list(self, caller, filter, projection).await
    }

    async fn create(&self, caller: &Caller, data: Vec<Record>) -> ToolkitResult<Vec<Record>> {
        self.layer.create(self, caller, data).await
    }

    async fn update(&self, caller: &Caller, filter: &Filter, patch: &Record) -> ToolkitResult<()> {
        self.layer.update(self, caller, filter, patch).await
    }

    async fn delete(&self, caller: &Caller, filter: &Filter) -> ToolkitResult<()> {
        self.layer.delete(self, caller, filter).await
    }

    async fn aggregate(
        &self,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> ToolkitResult<Vec<AggregateResult>> {
        self.layer.aggregate(self, caller, filter, aggregation, limit).await
    }

    async fn execute(
        &self,
        caller: &Caller,
        name: &str,
        data: &Record,
        filter: Option<&Filter>,
    ) -> ToolkitResult<ActionResult> {
        self.layer.execute(self, caller, name, data, filter).await
    }

    async fn get_form(
        &self,
        caller: &Caller,
        name: &str,
        data: Option<&Record>,
        filter: Option<&Filter>,
    ) -> ToolkitResult<Vec<ActionField>> {
        self.layer.get_form(self, caller, name, data, filter).await
    }

    async fn render_chart(
        &self,
        caller: &Caller,
        name: &str,
        record_id: &CompositeId,
    ) -> ToolkitResult<Chart> {
        self.layer.render_chart(self, caller, name, record_id).await
    }

    fn mark_schema_as_dirty(&self) {
        self.invalidate_schema();
    }

    fn subscribe_schema_changes(&self, listener: Weak<dyn SchemaListener>) {
        self.parents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::library;
    use crate::interfaces::Datasource;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use trellis_core::Operator;
    use trellis_query::ConditionTree;

    /// Counts schema refinements and restricts every filter to `id > 1`
    #[derive(Default)]
    struct Counting {
        refinements: AtomicUsize,
    }

    #[async_trait]
    impl CollectionLayer for Counting {
        type Datasource = ();

        fn refine_schema(
            &self,
            _this: &CollectionDecorator<Self>,
            mut schema: CollectionSchema,
        ) -> ToolkitResult<CollectionSchema> {
            self.refinements.fetch_add(1, Ordering::SeqCst);
            schema.segments.push("Recent".to_string());
            Ok(schema)
        }

        async fn refine_filter(
            &self,
            _this: &CollectionDecorator<Self>,
            _caller: &Caller,
            filter: Filter,
        ) -> ToolkitResult<Filter> {
            let restriction = ConditionTree::leaf("id", Operator::GreaterThan, json!(1));
            let tree = match filter.condition_tree {
                Some(tree) => ConditionTree::and(vec![tree, restriction]),
                None => restriction,
            };
            Ok(Filter { condition_tree: Some(tree), ..filter })
        }
    }

    fn decorated() -> Arc<DatasourceDecorator<Counting>> {
        DatasourceDecorator::new(library(), Arc::new(ToolkitConfig::default()))
    }

    #[test]
    fn test_schema_is_cached_until_dirty() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();

        let first = books.schema().unwrap();
        let second = books.schema().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(books.layer().refinements.load(Ordering::SeqCst), 1);
        assert_eq!(first.segments, vec!["Recent".to_string()]);

        books.mark_schema_as_dirty();
        let third = books.schema().unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert_eq!(*first, *third);
        assert_eq!(books.layer().refinements.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dirty_propagates_upward_only() {
        let lower = decorated();
        let upper: Arc<DatasourceDecorator<Counting>> =
            DatasourceDecorator::new(lower.clone(), Arc::new(ToolkitConfig::default()));

        let lower_books = lower.get_decorator("Book").unwrap();
        let upper_books = upper.get_decorator("Book").unwrap();
        let lower_before = lower_books.schema().unwrap();
        let upper_before = upper_books.schema().unwrap();
        assert_eq!(upper_before.segments.len(), 2);

        upper_books.mark_schema_as_dirty();
        assert!(Arc::ptr_eq(&lower_before, &lower_books.schema().unwrap()));

        lower_books.mark_schema_as_dirty();
        assert!(!Arc::ptr_eq(&upper_before, &upper_books.schema().unwrap()));
    }

    #[tokio::test]
    async fn test_default_hooks_refine_then_forward() {
        let datasource = decorated();
        let books = datasource.get_collection("Book").unwrap();
        let caller = Caller::default();

        let ids = books
            .list(&caller, &PaginatedFilter::new(), &Projection::from(["id"]))
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);

        books.delete(&caller, &Filter::new()).await.unwrap();
        let remaining = datasource
            .child()
            .get_collection("Book")
            .unwrap()
            .list(&caller, &PaginatedFilter::new(), &Projection::from(["id"]))
            .await
            .unwrap();
        assert_eq!(remaining, vec![json!({ "id": 1 }).as_object().cloned().unwrap()]);
    }
}
