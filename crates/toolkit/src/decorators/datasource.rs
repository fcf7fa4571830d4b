//! Generic datasource decorator
//!
//! Mirrors every collection of the child datasource through a
//! [`CollectionDecorator`] of the same layer, including collections added
//! after construction: the decorator subscribes to the child's
//! collection-added notifications and re-publishes them to its own
//! subscribers once wrapped.

use super::collection::{CollectionDecorator, CollectionLayer};
use crate::interfaces::{
    Chart, Collection, CollectionAddedListener, Datasource, live_listeners, same_collection,
};
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use trellis_core::schema::DatasourceSchema;
use trellis_core::types::Caller;
use trellis_core::{ToolkitConfig, ToolkitError, ToolkitResult};

// ============================================================================
// DatasourceLayer
// ============================================================================

/// Datasource-wide hooks of a layer
#[async_trait]
pub trait DatasourceLayer: Default + Send + Sync + 'static {
    /// Collections hidden by this layer disappear from `collections`
    fn is_collection_visible(&self, _name: &str) -> bool {
        true
    }

    /// Explain why `name` cannot be found, when the layer knows better
    fn missing_collection(&self, _name: &str) -> Option<ToolkitError> {
        None
    }

    fn refine_schema(&self, schema: DatasourceSchema) -> ToolkitResult<DatasourceSchema> {
        Ok(schema)
    }

    async fn render_chart(
        &self,
        _datasource: Arc<dyn Datasource>,
        child: &dyn Datasource,
        caller: &Caller,
        name: &str,
    ) -> ToolkitResult<Chart> {
        child.render_chart(caller, name).await
    }
}

impl DatasourceLayer for () {}

// ============================================================================
// DatasourceDecorator
// ============================================================================

pub struct DatasourceDecorator<L: CollectionLayer> {
    me: Weak<DatasourceDecorator<L>>,
    child: Arc<dyn Datasource>,
    layer: L::Datasource,
    config: Arc<ToolkitConfig>,
    decorators: RwLock<Vec<Arc<CollectionDecorator<L>>>>,
    listeners: RwLock<Vec<Weak<dyn CollectionAddedListener>>>,
}

impl<L: CollectionLayer> DatasourceDecorator<L> {
    pub fn new(child: Arc<dyn Datasource>, config: Arc<ToolkitConfig>) -> Arc<Self> {
        let decorator = Arc::new_cyclic(|me: &Weak<Self>| {
            let decorators = child
                .collections()
                .into_iter()
                .map(|collection| CollectionDecorator::new(collection, me.clone(), Arc::clone(&config)))
                .collect();
            Self {
                me: me.clone(),
                child,
                layer: L::Datasource::default(),
                config,
                decorators: RwLock::new(decorators),
                listeners: RwLock::new(Vec::new()),
            }
        });
        let listener: Weak<dyn CollectionAddedListener> =
            Arc::downgrade(&decorator) as Weak<dyn CollectionAddedListener>;
        decorator.child.subscribe_on_collection_added(listener);
        decorator
    }

    pub fn child(&self) -> &Arc<dyn Datasource> {
        &self.child
    }

    pub fn layer(&self) -> &L::Datasource {
        &self.layer
    }

    pub fn config(&self) -> &ToolkitConfig {
        &self.config
    }

    pub fn handle(&self) -> ToolkitResult<Arc<Self>> {
        self.me
            .upgrade()
            .ok_or_else(|| ToolkitError::internal("datasource decorator is being dropped"))
    }

    /// The decorator wrapping `collection`, created on first sight
    fn wrap(&self, collection: Arc<dyn Collection>) -> Arc<CollectionDecorator<L>> {
        if let Some(existing) = self.find_wrapper(&collection) {
            return existing;
        }

        let mut decorators = self.decorators.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = decorators
            .iter()
            .find(|d| same_collection(d.child(), &collection))
        {
            return Arc::clone(existing);
        }
        let decorator = CollectionDecorator::new(collection, self.me.clone(), Arc::clone(&self.config));
        decorators.push(Arc::clone(&decorator));
        decorator
    }

    fn find_wrapper(&self, collection: &Arc<dyn Collection>) -> Option<Arc<CollectionDecorator<L>>> {
        self.decorators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|d| same_collection(d.child(), collection))
            .cloned()
    }

    /// Typed decorators of the visible collections, in child order
    pub fn decorators(&self) -> Vec<Arc<CollectionDecorator<L>>> {
        self.child
            .collections()
            .into_iter()
            .map(|collection| self.wrap(collection))
            .filter(|decorator| self.layer.is_collection_visible(&decorator.name()))
            .collect()
    }

    /// Typed access to one collection of this layer
    pub fn get_decorator(&self, name: &str) -> ToolkitResult<Arc<CollectionDecorator<L>>> {
        let decorators = self.decorators();
        if let Some(decorator) = decorators.iter().find(|d| d.name() == name) {
            return Ok(Arc::clone(decorator));
        }
        if let Some(error) = self.layer.missing_collection(name) {
            return Err(error);
        }
        Err(ToolkitError::collection_not_found(
            name,
            decorators.iter().map(|d| d.name()),
        ))
    }

    /// Invalidate the schema of every collection, hidden ones included
    pub fn mark_all_schemas_dirty(&self) {
        let decorators = self
            .decorators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for decorator in decorators {
            decorator.invalidate_schema();
        }
    }
}

impl<L: CollectionLayer> CollectionAddedListener for DatasourceDecorator<L> {
    fn on_collection_added(&self, collection: Arc<dyn Collection>) {
        let decorator = self.wrap(collection);
        let name = decorator.name();
        if !self.layer.is_collection_visible(&name) {
            return;
        }

        let listeners = live_listeners(&mut self.listeners.write().unwrap_or_else(PoisonError::into_inner));
        for listener in listeners {
            listener.on_collection_added(Arc::clone(&decorator) as Arc<dyn Collection>);
        }
    }
}

#[async_trait]
impl<L: CollectionLayer> Datasource for DatasourceDecorator<L> {
    fn collections(&self) -> Vec<Arc<dyn Collection>> {
        self.decorators()
            .into_iter()
            .map(|d| d as Arc<dyn Collection>)
            .collect()
    }

    fn get_collection(&self, name: &str) -> ToolkitResult<Arc<dyn Collection>> {
        let decorator: Arc<dyn Collection> = self.get_decorator(name)?;
        Ok(decorator)
    }

    fn schema(&self) -> ToolkitResult<DatasourceSchema> {
        self.layer.refine_schema(self.child.schema()?)
    }

    async fn render_chart(&self, caller: &Caller, name: &str) -> ToolkitResult<Chart> {
        let datasource: Arc<dyn Datasource> = self.handle()?;
        self.layer
            .render_chart(datasource, self.child.as_ref(), caller, name)
            .await
    }

    fn subscribe_on_collection_added(&self, listener: Weak<dyn CollectionAddedListener>) {
        self.listeners
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
    use std::sync::Mutex;
    use trellis_core::schema::{CollectionSchema, ColumnSchema};
    use trellis_core::types::PrimitiveType;

    #[derive(Default)]
    struct Passthrough;

    impl CollectionLayer for Passthrough {
        type Datasource = ();
    }

    #[derive(Default)]
    struct Recorder {
        names: Mutex<Vec<String>>,
    }

    impl CollectionAddedListener for Recorder {
        fn on_collection_added(&self, collection: Arc<dyn Collection>) {
            self.names.lock().unwrap().push(collection.name());
        }
    }

    fn config() -> Arc<ToolkitConfig> {
        Arc::new(ToolkitConfig::default())
    }

    #[test]
    fn test_mirrors_child_collections() {
        let decorated: Arc<DatasourceDecorator<Passthrough>> = DatasourceDecorator::new(library(), config());
        let names: Vec<String> = decorated.collections().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Author", "Book"]);

        let first = decorated.get_decorator("Book").unwrap();
        let second = decorated.get_decorator("Book").unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let err = decorated.get_decorator("Nope").err().unwrap();
        assert!(err.to_string().contains("Author, Book"));
    }

    #[test]
    fn test_late_collections_are_wrapped_and_forwarded() {
        let memory = library();
        let lower: Arc<DatasourceDecorator<Passthrough>> = DatasourceDecorator::new(memory.clone(), config());
        let upper: Arc<DatasourceDecorator<Passthrough>> = DatasourceDecorator::new(lower.clone(), config());

        let recorder = Arc::new(Recorder::default());
        upper.subscribe_on_collection_added(Arc::downgrade(&recorder) as Weak<dyn CollectionAddedListener>);

        memory
            .add_collection(
                "Review",
                CollectionSchema::new().with_field("id", ColumnSchema::primary_key(PrimitiveType::Number)),
            )
            .unwrap();

        assert_eq!(*recorder.names.lock().unwrap(), vec!["Review".to_string()]);
        let review = upper.get_decorator("Review").unwrap();
        let lower_review = lower.get_decorator("Review").unwrap();
        let wrapped: Arc<dyn Collection> = lower_review;
        assert!(same_collection(review.child(), &wrapped));
    }

    #[test]
    fn test_dropped_listeners_are_pruned() {
        let decorated: Arc<DatasourceDecorator<Passthrough>> = DatasourceDecorator::new(library(), config());
        {
            let recorder = Arc::new(Recorder::default());
            decorated.subscribe_on_collection_added(Arc::downgrade(&recorder) as Weak<dyn CollectionAddedListener>);
        }
        decorated.on_collection_added(library().get_collection("Book").unwrap());
        assert!(decorated.listeners.read().unwrap().is_empty());
    }
}
