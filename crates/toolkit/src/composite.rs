//! Composite datasource
//!
//! Merges several datasources into one namespace. Collection and chart names
//! must be unique across the merged datasources.

use crate::interfaces::{
    Chart, Collection, CollectionAddedListener, Datasource, live_listeners,
};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use trellis_core::schema::DatasourceSchema;
use trellis_core::types::Caller;
use trellis_core::{ToolkitError, ToolkitResult};

pub struct CompositeDatasource {
    me: Weak<CompositeDatasource>,
    datasources: RwLock<Vec<Arc<dyn Datasource>>>,
    listeners: RwLock<Vec<Weak<dyn CollectionAddedListener>>>,
}

impl CompositeDatasource {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            datasources: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Merge a datasource, rejecting collection and chart name clashes
    pub fn add_datasource(&self, datasource: Arc<dyn Datasource>) -> ToolkitResult<()> {
        let existing_collections: BTreeSet<String> =
            self.collections().iter().map(|c| c.name()).collect();
        for collection in datasource.collections() {
            let name = collection.name();
            if existing_collections.contains(&name) {
                tracing::warn!("Refusing datasource: collection '{}' is already defined", name);
                return Err(ToolkitError::DuplicateCollection(name));
            }
        }

        let existing_charts: BTreeSet<String> = self.schema()?.charts.into_iter().collect();
        for chart in datasource.schema()?.charts {
            if existing_charts.contains(&chart) {
                tracing::warn!("Refusing datasource: chart '{}' is already defined", chart);
                return Err(ToolkitError::DuplicateChart(chart));
            }
        }

        let listener: Weak<dyn CollectionAddedListener> = self.me.clone();
        datasource.subscribe_on_collection_added(listener);
        let added = datasource.collections();
        self.datasources
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(datasource);

        for collection in added {
            self.on_collection_added(collection);
        }
        Ok(())
    }

    fn datasources(&self) -> Vec<Arc<dyn Datasource>> {
        self.datasources
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CollectionAddedListener for CompositeDatasource {
    fn on_collection_added(&self, collection: Arc<dyn Collection>) {
        let listeners =
            live_listeners(&mut self.listeners.write().unwrap_or_else(PoisonError::into_inner));
        for listener in listeners {
            listener.on_collection_added(Arc::clone(&collection));
        }
    }
}

#[async_trait]
impl Datasource for CompositeDatasource {
    fn collections(&self) -> Vec<Arc<dyn Collection>> {
        self.datasources()
            .iter()
            .flat_map(|d| d.collections())
            .collect()
    }

    fn schema(&self) -> ToolkitResult<DatasourceSchema> {
        let mut schema = DatasourceSchema::default();
        for datasource in self.datasources() {
            let child = datasource.schema()?;
            schema.charts.extend(child.charts);
            schema
                .native_query_connections
                .extend(child.native_query_connections);
        }
        Ok(schema)
    }

    async fn render_chart(&self, caller: &Caller, name: &str) -> ToolkitResult<Chart> {
        for datasource in self.datasources() {
            if datasource.schema()?.charts.iter().any(|c| c == name) {
                return datasource.render_chart(caller, name).await;
            }
        }
        Err(ToolkitError::ChartNotFound(name.to_string()))
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
    use crate::memory::MemoryDatasource;
    use crate::test_support::library;
    use std::sync::Mutex;
    use trellis_core::schema::{CollectionSchema, ColumnSchema};
    use trellis_core::types::PrimitiveType;

    #[derive(Default)]
    struct Recorder {
        names: Mutex<Vec<String>>,
    }

    impl CollectionAddedListener for Recorder {
        fn on_collection_added(&self, collection: Arc<dyn Collection>) {
            self.names.lock().unwrap().push(collection.name());
        }
    }

    fn simple_schema() -> CollectionSchema {
        CollectionSchema::new().with_field("id", ColumnSchema::primary_key(PrimitiveType::Number))
    }

    #[test]
    fn test_merges_collections() {
        let composite = CompositeDatasource::new();
        composite.add_datasource(library()).unwrap();

        let other = MemoryDatasource::new();
        other.add_collection("Review", simple_schema()).unwrap();
        composite.add_datasource(other).unwrap();

        let mut names: Vec<String> = composite.collections().iter().map(|c| c.name()).collect();
        names.sort();
        assert_eq!(names, vec!["Author", "Book", "Review"]);
        assert!(composite.get_collection("Review").is_ok());
        assert!(composite.get_collection("Missing").err().unwrap().is_not_found());
    }

    #[test]
    fn test_rejects_duplicate_collections() {
        let composite = CompositeDatasource::new();
        composite.add_datasource(library()).unwrap();
        let err = composite.add_datasource(library()).unwrap_err();
        assert!(matches!(err, ToolkitError::DuplicateCollection(_)));
        assert_eq!(composite.collections().len(), 2);
    }

    #[test]
    fn test_forwards_late_collections() {
        let composite = CompositeDatasource::new();
        let memory = MemoryDatasource::new();
        composite.add_datasource(memory.clone()).unwrap();

        let recorder = Arc::new(Recorder::default());
        let listener: Weak<dyn CollectionAddedListener> = Arc::downgrade(&recorder) as _;
        composite.subscribe_on_collection_added(listener);

        memory.add_collection("Late", simple_schema()).unwrap();
        assert_eq!(*recorder.names.lock().unwrap(), vec!["Late".to_string()]);
        assert!(composite.get_collection("Late").is_ok());
    }

    #[tokio::test]
    async fn test_unknown_chart() {
        let composite = CompositeDatasource::new();
        let err = composite
            .render_chart(&Caller::default(), "sales")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolkitError::ChartNotFound(_)));
    }
}
