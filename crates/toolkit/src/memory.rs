//! In-memory datasource
//!
//! Rows live in a `Vec<Record>` per collection. Filters, sorts, pages,
//! projections and aggregations are evaluated in memory, and many-to-one /
//! one-to-one relations are joined on demand by looking up the foreign
//! collection in the owning [`MemoryDatasource`].

use crate::interfaces::{Collection, CollectionAddedListener, Datasource, live_listeners};
use async_trait::async_trait;
use std::sync::{Arc, PoisonError, RwLock, Weak};
use trellis_core::records::{get_field_value, set_field_value};
use trellis_core::schema::{CollectionSchema, FieldSchema};
use trellis_core::types::{Caller, ColumnType, PrimitiveType, Record, Value};
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::sort::compare_values;
use trellis_query::{AggregateResult, Aggregation, Filter, PaginatedFilter, Projection};

// ============================================================================
// MemoryCollection
// ============================================================================

pub struct MemoryCollection {
    name: String,
    schema: Arc<CollectionSchema>,
    rows: RwLock<Vec<Record>>,
    datasource: Weak<MemoryDatasource>,
}

impl MemoryCollection {
    /// A standalone collection; relations cannot be joined without a datasource
    pub fn new(name: impl Into<String>, schema: CollectionSchema) -> Self {
        Self {
            name: name.into(),
            schema: Arc::new(schema),
            rows: RwLock::new(Vec::new()),
            datasource: Weak::new(),
        }
    }

    /// Insert rows as-is, bypassing primary key generation
    pub fn seed(&self, rows: impl IntoIterator<Item = Record>) {
        self.rows
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(rows);
    }

    /// Snapshot of the stored rows
    pub fn rows(&self) -> Vec<Record> {
        self.rows.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn foreign(&self, name: &str) -> ToolkitResult<Arc<MemoryCollection>> {
        let datasource = self.datasource.upgrade().ok_or_else(|| {
            ToolkitError::Unsupported {
                collection: self.name.clone(),
                operation: format!("join on '{name}' outside of a datasource"),
            }
        })?;
        datasource.memory_collection(name)
    }

    /// Rows matching the filter, with the relations needed by `paths` joined
    fn select(&self, filter: &Filter, paths: &Projection) -> ToolkitResult<Vec<Record>> {
        let mut needed = paths.clone();
        if let Some(tree) = &filter.condition_tree {
            needed = needed.union(&tree.projection());
        }

        let rows = self.rows();
        let mut selected = Vec::with_capacity(rows.len());
        for row in rows {
            let hydrated = self.hydrate(row, &needed)?;
            let kept = match &filter.condition_tree {
                Some(tree) => tree.matches(&hydrated)?,
                None => true,
            };
            if kept && self.matches_search(&hydrated, filter) {
                selected.push(hydrated);
            }
        }
        Ok(selected)
    }

    fn hydrate(&self, mut row: Record, paths: &Projection) -> ToolkitResult<Record> {
        for (relation, sub_paths) in paths.relations() {
            let value = match self.schema.fields.get(&relation) {
                Some(FieldSchema::ManyToOne(m2o)) => {
                    let foreign = self.foreign(&m2o.foreign_collection)?;
                    let key = row.get(&m2o.foreign_key).cloned().unwrap_or(Value::Null);
                    foreign.find_by(&m2o.foreign_key_target, &key, &sub_paths)?
                }
                Some(FieldSchema::OneToOne(o2o)) => {
                    let foreign = self.foreign(&o2o.foreign_collection)?;
                    let key = row.get(&o2o.origin_key_target).cloned().unwrap_or(Value::Null);
                    foreign.find_by(&o2o.origin_key, &key, &sub_paths)?
                }
                Some(_) => Value::Null,
                None => return Err(ToolkitError::field_not_found(&self.name, relation)),
            };
            row.insert(relation, value);
        }
        Ok(row)
    }

    fn find_by(&self, field: &str, key: &Value, paths: &Projection) -> ToolkitResult<Value> {
        if key.is_null() {
            return Ok(Value::Null);
        }
        let row = self
            .rows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|row| row.get(field).is_some_and(|v| compare_values(v, key).is_eq()))
            .cloned();
        match row {
            Some(row) => Ok(Value::Object(self.hydrate(row, paths)?)),
            None => Ok(Value::Null),
        }
    }

    fn matches_search(&self, record: &Record, filter: &Filter) -> bool {
        let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) else {
            return true;
        };
        let needle = search.to_lowercase();
        self.schema.fields.iter().any(|(name, field)| {
            let textual = field
                .as_column()
                .and_then(|c| c.column_type.primitive())
                .is_some_and(|p| p.is_textual());
            textual
                && record
                    .get(name)
                    .and_then(Value::as_str)
                    .is_some_and(|text| text.to_lowercase().contains(&needle))
        })
    }

    fn with_defaults(&self, mut record: Record, rows: &[Record]) -> ToolkitResult<Record> {
        for (name, field) in &self.schema.fields {
            let Some(column) = field.as_column() else {
                continue;
            };
            if record.get(name).is_some_and(|v| !v.is_null()) {
                continue;
            }
            let value = if column.is_primary_key {
                generate_key(&column.column_type, name, rows, &self.name)?
            } else {
                column.default_value.clone().unwrap_or(Value::Null)
            };
            record.insert(name.clone(), value);
        }
        Ok(record)
    }

    fn check_columns(&self, record: &Record) -> ToolkitResult<()> {
        for key in record.keys() {
            if !self.schema.fields.get(key).is_some_and(FieldSchema::is_column) {
                return Err(ToolkitError::field_not_found(&self.name, key));
            }
        }
        Ok(())
    }
}

fn generate_key(
    column_type: &ColumnType,
    name: &str,
    rows: &[Record],
    collection: &str,
) -> ToolkitResult<Value> {
    match column_type.primitive() {
        Some(PrimitiveType::Number) => {
            let max = rows
                .iter()
                .filter_map(|row| row.get(name).and_then(Value::as_i64))
                .max()
                .unwrap_or(0);
            Ok(Value::from(max + 1))
        }
        Some(PrimitiveType::Uuid) | Some(PrimitiveType::String) => {
            Ok(Value::String(uuid::Uuid::new_v4().to_string()))
        }
        _ => Err(ToolkitError::Record(format!(
            "Cannot generate a value for the primary key '{collection}.{name}'"
        ))),
    }
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn schema(&self) -> ToolkitResult<Arc<CollectionSchema>> {
        Ok(Arc::clone(&self.schema))
    }

    async fn list(
        &self,
        _caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> ToolkitResult<Vec<Record>> {
        let mut needed = projection.clone();
        if let Some(sort) = &filter.sort {
            needed = needed.union(&sort.projection());
        }

        let mut records = self.select(&filter.filter, &needed)?;
        if let Some(sort) = &filter.sort {
            records = sort.apply(records);
        }
        if let Some(page) = &filter.page {
            records = page.apply(records);
        }
        projection.apply(&records)
    }

    async fn create(&self, _caller: &Caller, data: Vec<Record>) -> ToolkitResult<Vec<Record>> {
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        let mut created = Vec::with_capacity(data.len());
        for record in data {
            self.check_columns(&record)?;
            let record = self.with_defaults(record, &rows)?;
            rows.push(record.clone());
            created.push(record);
        }
        Ok(created)
    }

    async fn update(&self, _caller: &Caller, filter: &Filter, patch: &Record) -> ToolkitResult<()> {
        self.check_columns(patch)?;
        let matching = self.select(filter, &Projection::new())?;
        let pks = self.schema.primary_keys();
        let same_row = |row: &Record, other: &Record| {
            pks.iter().all(|pk| row.get(pk) == other.get(pk))
        };

        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        for row in rows.iter_mut() {
            if matching.iter().any(|m| same_row(row, m)) {
                for (key, value) in patch {
                    set_field_value(row, key, value.clone());
                }
            }
        }
        Ok(())
    }

    async fn delete(&self, _caller: &Caller, filter: &Filter) -> ToolkitResult<()> {
        let matching = self.select(filter, &Projection::new())?;
        let pks = self.schema.primary_keys();
        let mut rows = self.rows.write().unwrap_or_else(PoisonError::into_inner);
        rows.retain(|row| {
            !matching
                .iter()
                .any(|m| pks.iter().all(|pk| get_field_value(row, pk) == m.get(pk)))
        });
        Ok(())
    }

    async fn aggregate(
        &self,
        _caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> ToolkitResult<Vec<AggregateResult>> {
        let records = self.select(filter, &aggregation.projection())?;
        aggregation.apply(&records, limit)
    }
}

// ============================================================================
// MemoryDatasource
// ============================================================================

pub struct MemoryDatasource {
    me: Weak<MemoryDatasource>,
    collections: RwLock<Vec<Arc<MemoryCollection>>>,
    listeners: RwLock<Vec<Weak<dyn CollectionAddedListener>>>,
}

impl MemoryDatasource {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            collections: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Add a collection and notify every subscribed decorator
    pub fn add_collection(
        &self,
        name: impl Into<String>,
        schema: CollectionSchema,
    ) -> ToolkitResult<Arc<MemoryCollection>> {
        let name = name.into();
        let collection = {
            let mut collections = self.collections.write().unwrap_or_else(PoisonError::into_inner);
            if collections.iter().any(|c| c.name == name) {
                return Err(ToolkitError::DuplicateCollection(name));
            }
            let collection = Arc::new(MemoryCollection {
                name: name.clone(),
                schema: Arc::new(schema),
                rows: RwLock::new(Vec::new()),
                datasource: self.me.clone(),
            });
            collections.push(Arc::clone(&collection));
            collection
        };

        tracing::debug!("Added in-memory collection '{}'", name);
        let listeners =
            live_listeners(&mut self.listeners.write().unwrap_or_else(PoisonError::into_inner));
        for listener in listeners {
            listener.on_collection_added(Arc::clone(&collection) as Arc<dyn Collection>);
        }
        Ok(collection)
    }

    /// Typed access to a collection of this datasource
    pub fn memory_collection(&self, name: &str) -> ToolkitResult<Arc<MemoryCollection>> {
        let collections = self.collections.read().unwrap_or_else(PoisonError::into_inner);
        collections
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| {
                ToolkitError::collection_not_found(name, collections.iter().map(|c| c.name.clone()))
            })
    }
}

#[async_trait]
impl Datasource for MemoryDatasource {
    fn collections(&self) -> Vec<Arc<dyn Collection>> {
        self.collections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|c| Arc::clone(c) as Arc<dyn Collection>)
            .collect()
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
    use crate::test_support::{library, records};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use trellis_core::Operator;
    use trellis_query::{
        AggregateOperation, AggregationGroup, ConditionTree, Page, Sort, SortClause,
    };

    #[tokio::test]
    async fn test_list_joins_many_to_one() {
        let datasource = library();
        let books = datasource.get_collection("Book").unwrap();
        let filter = PaginatedFilter::new()
            .with_condition_tree(ConditionTree::leaf(
                "author:last_name",
                Operator::Equal,
                json!("Tolkien"),
            ))
            .with_sort(Sort::new(vec![SortClause::desc("id")]));

        let result = books
            .list(&Caller::default(), &filter, &Projection::from(["title", "author:first_name"]))
            .await
            .unwrap();

        assert_eq!(
            result,
            records(json!([
                { "title": "The Two Towers", "author": { "first_name": "John" } },
                { "title": "The Hobbit", "author": { "first_name": "John" } },
            ]))
        );
    }

    #[tokio::test]
    async fn test_list_pages_and_searches() {
        let datasource = library();
        let books = datasource.get_collection("Book").unwrap();
        let filter = PaginatedFilter::from(Filter::new().with_search("the", false))
            .with_sort(Sort::new(vec![SortClause::asc("id")]))
            .with_page(Page::new(1, Some(1)));

        let result = books
            .list(&Caller::default(), &filter, &Projection::from(["id"]))
            .await
            .unwrap();
        assert_eq!(result, records(json!([{ "id": 2 }])));
    }

    #[tokio::test]
    async fn test_create_generates_keys_and_defaults() {
        let datasource = library();
        let books = datasource.get_collection("Book").unwrap();
        let created = books
            .create(&Caller::default(), records(json!([{ "title": "Silmarillion" }])))
            .await
            .unwrap();

        assert_eq!(created[0]["id"], json!(4));
        assert_eq!(created[0]["author_id"], Value::Null);

        let err = books
            .create(&Caller::default(), records(json!([{ "unknown": 1 }])))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let datasource = library();
        let books = datasource.get_collection("Book").unwrap();
        let caller = Caller::default();
        let hobbit = Filter::new().with_condition_tree(ConditionTree::leaf("id", Operator::Equal, json!(1)));

        let patch = records(json!([{ "title": "There and Back Again" }])).remove(0);
        books.update(&caller, &hobbit, &patch).await.unwrap();
        books.delete(&caller, &Filter::new().with_condition_tree(
            ConditionTree::leaf("id", Operator::Equal, json!(3)),
        )).await.unwrap();

        let titles = books
            .list(&caller, &PaginatedFilter::new(), &Projection::from(["title"]))
            .await
            .unwrap();
        assert_eq!(
            titles,
            records(json!([{ "title": "There and Back Again" }, { "title": "The Two Towers" }]))
        );
    }

    #[tokio::test]
    async fn test_aggregate_grouped_by_relation() {
        let datasource = library();
        let books = datasource.get_collection("Book").unwrap();
        let aggregation = Aggregation::new(AggregateOperation::Count, None)
            .with_group(AggregationGroup::new("author:last_name"));

        let result = books
            .aggregate(&Caller::default(), &Filter::new(), &aggregation, None)
            .await
            .unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result[1].value, json!(2));
        assert_eq!(result[1].group["author:last_name"], json!("Tolkien"));
    }

    #[tokio::test]
    async fn test_add_collection_rejects_duplicates() {
        let datasource = library();
        let err = datasource
            .add_collection("Book", CollectionSchema::new())
            .err()
            .unwrap();
        assert!(matches!(err, ToolkitError::DuplicateCollection(_)));
    }
}
