//! Computed fields
//!
//! A computed field is a read-only column whose values are produced from
//! other fields of the record at read time. Listing a projection containing
//! computed fields fetches their real dependencies from the child, then
//! evaluates every computed path after its own dependencies, one batch per
//! field with identical inputs deduplicated.
//!
//! Aggregations touching a computed field are answered by listing the
//! needed paths through this layer and aggregating in memory.

pub mod dedupe;
pub mod flattener;
mod helpers;

use super::collection::{CollectionDecorator, CollectionLayer};
use crate::context::CollectionContext;
use crate::handler::UserFn;
use crate::interfaces::Collection;
use async_trait::async_trait;
use helpers::{compute_from_records, rewrite_field};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use trellis_core::schema::{CollectionSchema, ColumnSchema, FieldSchema};
use trellis_core::types::{Caller, ColumnType, Record, Value, split_path};
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::{AggregateResult, Aggregation, Filter, PaginatedFilter, Projection};

/// Produces one value per partial record, in order
pub type ComputedHandler = UserFn<(Vec<Record>, CollectionContext), Vec<Value>>;

#[derive(Clone, Debug)]
pub struct ComputedDefinition {
    pub column_type: ColumnType,
    pub dependencies: Projection,
    pub values: ComputedHandler,
    pub default_value: Option<Value>,
    pub enum_values: Option<Vec<String>>,
}

impl ComputedDefinition {
    pub fn new(
        column_type: impl Into<ColumnType>,
        dependencies: impl Into<Projection>,
        values: ComputedHandler,
    ) -> Self {
        Self {
            column_type: column_type.into(),
            dependencies: dependencies.into(),
            values,
            default_value: None,
            enum_values: None,
        }
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_enum_values(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    fn to_column(&self) -> ColumnSchema {
        let mut column = ColumnSchema::new(self.column_type.clone()).read_only();
        column.default_value = self.default_value.clone();
        column.enum_values = self.enum_values.clone();
        column
    }
}

#[derive(Default)]
pub struct ComputedLayer {
    computeds: RwLock<BTreeMap<String, ComputedDefinition>>,
}

pub type ComputedCollection = CollectionDecorator<ComputedLayer>;

impl CollectionDecorator<ComputedLayer> {
    pub fn add_computed(&self, name: &str, computed: ComputedDefinition) -> ToolkitResult<()> {
        let schema = Collection::schema(self)?;
        if schema.fields.contains_key(name) {
            return Err(ToolkitError::DuplicateField {
                collection: self.name(),
                field: name.to_string(),
            });
        }
        if computed.dependencies.is_empty() {
            return Err(ToolkitError::Computed(format!(
                "The computed field {name} of the collection {} must have at least one dependency",
                self.name()
            )));
        }
        for dependency in computed.dependencies.iter() {
            self.validate_path(dependency).map_err(|_| {
                ToolkitError::Computed(format!(
                    "The dependency {dependency} of the computed field {name} is unknown in the collection {}",
                    self.name()
                ))
            })?;
        }

        tracing::info!("Adding computed field '{}.{}'", self.name(), name);
        self.layer()
            .computeds
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), computed);
        self.invalidate_schema();
        Ok(())
    }

    /// Computed field defined on this collection
    pub fn computed(&self, name: &str) -> Option<ComputedDefinition> {
        self.layer()
            .computeds
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Computed field designated by a path, with the collection owning it
    pub fn get_computed(&self, path: &str) -> ToolkitResult<Option<(ComputedDefinition, Arc<Self>)>> {
        if let Some((prefix, rest)) = split_path(path) {
            return match self.field(prefix)? {
                FieldSchema::Column(_) | FieldSchema::PolymorphicManyToOne(_) => Ok(None),
                field => self
                    .sibling(field.foreign_collection().unwrap_or_default())?
                    .get_computed(rest),
            };
        }
        match self.computed(path) {
            Some(computed) => Ok(Some((computed, self.handle()?))),
            None => Ok(None),
        }
    }

    /// A path designates a column reachable from this collection
    fn validate_path(&self, path: &str) -> ToolkitResult<()> {
        match split_path(path) {
            None => match self.field(path)? {
                FieldSchema::Column(_) => Ok(()),
                _ => Err(ToolkitError::Computed(format!("'{path}' is not a column"))),
            },
            Some((prefix, rest)) => match self.field(prefix)? {
                FieldSchema::Column(_) => Err(ToolkitError::Computed(format!("'{prefix}' is not a relation"))),
                FieldSchema::PolymorphicManyToOne(_) => Ok(()),
                field => self
                    .sibling(field.foreign_collection().unwrap_or_default())?
                    .validate_path(rest),
            },
        }
    }

    fn has_computed_path(&self, projection: &Projection) -> ToolkitResult<bool> {
        for path in projection.iter() {
            if self.get_computed(path)?.is_some() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[async_trait]
impl CollectionLayer for ComputedLayer {
    type Datasource = ();

    fn refine_schema(
        &self,
        _this: &CollectionDecorator<Self>,
        mut schema: CollectionSchema,
    ) -> ToolkitResult<CollectionSchema> {
        let computeds = self.computeds.read().unwrap_or_else(PoisonError::into_inner);
        for (name, computed) in computeds.iter() {
            schema.fields.insert(name.clone(), FieldSchema::Column(computed.to_column()));
        }
        Ok(schema)
    }

    async fn list(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> ToolkitResult<Vec<Record>> {
        let fetched = projection.try_replace(|path| {
            rewrite_field(this, path).map(|p| p.iter().map(str::to_string).collect::<Vec<_>>())
        })?;
        let records = this.forward_list(caller, filter, &fetched).await?;
        if fetched == *projection {
            return Ok(records);
        }
        compute_from_records(this, caller, &fetched, projection, records).await
    }

    async fn aggregate(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> ToolkitResult<Vec<AggregateResult>> {
        let projection = aggregation.projection();
        if !this.has_computed_path(&projection)? {
            return this.forward_aggregate(caller, filter, aggregation, limit).await;
        }

        let records = Collection::list(this, caller, &PaginatedFilter::from(filter.clone()), &projection).await?;
        aggregation.apply(&records, limit)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorators::DatasourceDecorator;
    use crate::memory::MemoryDatasource;
    use crate::test_support::{library, records};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use trellis_core::types::PrimitiveType;
    use trellis_core::{Operator, ToolkitConfig};
    use trellis_query::{AggregateOperation, AggregationGroup, ConditionTree};

    fn decorate(memory: Arc<MemoryDatasource>) -> Arc<DatasourceDecorator<ComputedLayer>> {
        DatasourceDecorator::new(memory, Arc::new(ToolkitConfig::default()))
    }

    fn upper(field: &'static str) -> ComputedHandler {
        UserFn::from_sync(move |(partials, _): (Vec<Record>, CollectionContext)| {
            Ok(partials
                .iter()
                .map(|p| json!(p[field].as_str().unwrap_or_default().to_uppercase()))
                .collect())
        })
    }

    #[tokio::test]
    async fn test_identical_inputs_are_computed_once() {
        let memory = MemoryDatasource::new();
        let books = memory
            .add_collection(
                "Book",
                CollectionSchema::new()
                    .with_field("id", ColumnSchema::primary_key(PrimitiveType::Number))
                    .with_field("title", ColumnSchema::new(PrimitiveType::String)),
            )
            .unwrap();
        books.seed(records(json!([{ "id": 1, "title": "abc" }, { "id": 2, "title": "abc" }])));

        let calls = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&calls);
        let datasource = decorate(memory);
        let decorated = datasource.get_decorator("Book").unwrap();
        decorated
            .add_computed(
                "full_title",
                ComputedDefinition::new(
                    PrimitiveType::String,
                    ["title"],
                    UserFn::from_async(move |(partials, _): (Vec<Record>, CollectionContext)| {
                        let seen = Arc::clone(&seen);
                        async move {
                            let titles: Vec<Value> = partials.iter().map(|p| p["title"].clone()).collect();
                            seen.lock().unwrap().push(titles.clone());
                            Ok(titles
                                .iter()
                                .map(|t| json!(t.as_str().unwrap().to_uppercase()))
                                .collect())
                        }
                    }),
                ),
            )
            .unwrap();

        let result = decorated
            .list(&Caller::default(), &PaginatedFilter::new(), &Projection::from(["id", "full_title"]))
            .await
            .unwrap();

        assert_eq!(
            result,
            records(json!([{ "id": 1, "full_title": "ABC" }, { "id": 2, "full_title": "ABC" }]))
        );
        assert_eq!(*calls.lock().unwrap(), vec![vec![json!("abc")]]);
    }

    #[test]
    fn test_rewrite_resolves_chained_and_nested_computeds() {
        let datasource = decorate(library());
        let authors = datasource.get_decorator("Author").unwrap();
        let books = datasource.get_decorator("Book").unwrap();
        authors
            .add_computed(
                "full_name",
                ComputedDefinition::new(PrimitiveType::String, ["first_name", "last_name"], upper("first_name")),
            )
            .unwrap();
        authors
            .add_computed("shout", ComputedDefinition::new(PrimitiveType::String, ["full_name"], upper("full_name")))
            .unwrap();

        assert_eq!(
            rewrite_field(&authors, "shout").unwrap(),
            Projection::from(["first_name", "last_name"])
        );
        assert_eq!(
            rewrite_field(&books, "author:shout").unwrap(),
            Projection::from(["author:first_name", "author:last_name"])
        );
        assert_eq!(rewrite_field(&books, "title").unwrap(), Projection::from(["title"]));
    }

    #[tokio::test]
    async fn test_computes_through_relations() {
        let datasource = decorate(library());
        let authors = datasource.get_decorator("Author").unwrap();
        let books = datasource.get_decorator("Book").unwrap();
        authors
            .add_computed("loud_name", ComputedDefinition::new(PrimitiveType::String, ["last_name"], upper("last_name")))
            .unwrap();

        let filter = PaginatedFilter::new().with_condition_tree(ConditionTree::leaf("id", Operator::Equal, json!(3)));
        let result = books
            .list(&Caller::default(), &filter, &Projection::from(["title", "author:loud_name"]))
            .await
            .unwrap();
        assert_eq!(result, records(json!([{ "title": "Dune", "author": { "loud_name": "HERBERT" } }])));
    }

    #[tokio::test]
    async fn test_null_relations_skip_the_handler() {
        let memory = library();
        memory
            .memory_collection("Book")
            .unwrap()
            .seed(records(json!([{ "id": 4, "title": "Anonymous", "author_id": null }])));
        let datasource = decorate(memory);
        let books = datasource.get_decorator("Book").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        books
            .add_computed(
                "author_initial",
                ComputedDefinition::new(
                    PrimitiveType::String,
                    ["author:last_name"],
                    UserFn::from_sync(move |(partials, _): (Vec<Record>, CollectionContext)| {
                        counter.fetch_add(partials.len(), Ordering::SeqCst);
                        Ok(partials
                            .iter()
                            .map(|p| json!(p["author"]["last_name"].as_str().unwrap()[..1]))
                            .collect())
                    }),
                ),
            )
            .unwrap();

        let result = books
            .list(&Caller::default(), &PaginatedFilter::new(), &Projection::from(["id", "author_initial"]))
            .await
            .unwrap();
        let initials: Vec<Value> = result.iter().map(|r| r["author_initial"].clone()).collect();
        assert_eq!(initials, vec![json!("T"), json!("T"), json!("H"), json!(null)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_schema_and_registration_errors() {
        let datasource = decorate(library());
        let books = datasource.get_decorator("Book").unwrap();
        books
            .add_computed("shout", ComputedDefinition::new(PrimitiveType::String, ["title"], upper("title")))
            .unwrap();

        let column = books.field("shout").unwrap();
        let column = column.as_column().unwrap();
        assert!(column.is_read_only);
        assert!(column.filter_operators.is_empty());

        let err = books
            .add_computed("broken", ComputedDefinition::new(PrimitiveType::String, ["nope"], upper("nope")))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Computed field error: The dependency nope of the computed field broken is unknown in the collection Book"
        );
        assert!(matches!(
            books.add_computed("title", ComputedDefinition::new(PrimitiveType::String, ["id"], upper("id"))),
            Err(ToolkitError::DuplicateField { .. })
        ));
    }

    #[tokio::test]
    async fn test_aggregates_over_computed_fields() {
        let datasource = decorate(library());
        let books = datasource.get_decorator("Book").unwrap();
        books
            .add_computed(
                "saga",
                ComputedDefinition::new(
                    PrimitiveType::String,
                    ["author_id"],
                    UserFn::from_sync(|(partials, _): (Vec<Record>, CollectionContext)| {
                        Ok(partials
                            .iter()
                            .map(|p| json!(if p["author_id"] == json!(1) { "Middle-earth" } else { "Dune" }))
                            .collect())
                    }),
                ),
            )
            .unwrap();

        let aggregation = Aggregation::new(AggregateOperation::Count, None).with_group(AggregationGroup::new("saga"));
        let rows = books
            .aggregate(&Caller::default(), &Filter::new(), &aggregation, None)
            .await
            .unwrap();
        let groups: Vec<(Value, Value)> = rows.iter().map(|r| (r.group["saga"].clone(), r.value.clone())).collect();
        assert_eq!(groups, vec![(json!("Dune"), json!(1)), (json!("Middle-earth"), json!(2))]);
    }
}
