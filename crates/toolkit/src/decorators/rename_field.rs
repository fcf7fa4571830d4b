//! Field renaming
//!
//! Each collection keeps a two-way map between its public field names and
//! the names known by the child. Every path crossing this layer is translated:
//! filters, sorts, projections and aggregations on the way down, records and
//! aggregate groups on the way up. Paths through relations are translated by
//! the foreign collection of the same layer.

use super::collection::{CollectionDecorator, CollectionLayer};
use crate::interfaces::Collection;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use trellis_core::schema::{CollectionSchema, FieldSchema};
use trellis_core::types::{Caller, PATH_SEPARATOR, Record, Value};
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::{AggregateResult, Aggregation, Filter, PaginatedFilter, Projection, Sort, SortClause};

#[derive(Default)]
struct FieldNames {
    /// public name -> child name
    to_child: BTreeMap<String, String>,
    /// child name -> public name
    from_child: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct RenameFieldLayer {
    names: RwLock<FieldNames>,
}

pub type RenameFieldCollection = CollectionDecorator<RenameFieldLayer>;

impl RenameFieldLayer {
    fn child_name(&self, public_name: &str) -> String {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_child
            .get(public_name)
            .cloned()
            .unwrap_or_else(|| public_name.to_string())
    }

    fn public_name(&self, child_name: &str) -> String {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .from_child
            .get(child_name)
            .cloned()
            .unwrap_or_else(|| child_name.to_string())
    }
}

impl CollectionDecorator<RenameFieldLayer> {
    pub fn rename_field(&self, current_name: &str, new_name: &str) -> ToolkitResult<()> {
        let schema = Collection::schema(self)?;
        if !schema.fields.contains_key(current_name) {
            let choices: Vec<&str> = schema.fields.keys().map(String::as_str).collect();
            return Err(ToolkitError::InvalidRename(format!(
                "No such field '{}.{current_name}', choices are {}",
                self.name(),
                choices.join(", ")
            )));
        }
        if current_name == new_name {
            return Ok(());
        }
        if new_name.is_empty() || new_name.contains(' ') || new_name.contains(PATH_SEPARATOR) {
            return Err(ToolkitError::InvalidRename(format!(
                "The name of field '{new_name}' you configured on '{}' must not be empty nor contain spaces or '{PATH_SEPARATOR}'",
                self.name()
            )));
        }
        if schema.fields.contains_key(new_name) {
            return Err(ToolkitError::InvalidRename(format!(
                "The field '{new_name}' is already defined in the collection '{}'",
                self.name()
            )));
        }

        let child_name = self.layer().child_name(current_name);
        let child_schema = self.child().schema()?;
        for (field_name, field) in &child_schema.fields {
            if let FieldSchema::PolymorphicManyToOne(relation) = field {
                if relation.foreign_key == child_name || relation.foreign_key_type_field == child_name {
                    return Err(ToolkitError::InvalidRename(format!(
                        "Cannot rename '{}.{current_name}', because it's implied in a polymorphic relation '{}.{field_name}'",
                        self.name(),
                        self.name()
                    )));
                }
            }
        }

        tracing::info!("Renaming field '{}.{}' to '{}'", self.name(), current_name, new_name);
        {
            let mut names = self.layer().names.write().unwrap_or_else(PoisonError::into_inner);
            names.to_child.remove(current_name);
            names.from_child.remove(&child_name);
            // Renaming back to the child name leaves no mapping behind
            if child_name != new_name {
                names.to_child.insert(new_name.to_string(), child_name.clone());
                names.from_child.insert(child_name, new_name.to_string());
            }
        }
        // Relations of other collections may point to the renamed field
        self.datasource()?.mark_all_schemas_dirty();
        Ok(())
    }

    /// Translate a public path into the path known by the child
    pub fn path_to_child(&self, path: &str) -> ToolkitResult<String> {
        let Some((relation, rest)) = path.split_once(PATH_SEPARATOR) else {
            return Ok(self.layer().child_name(path));
        };

        let child_relation = self.layer().child_name(relation);
        match self.field(relation)? {
            FieldSchema::Column(_) => Err(ToolkitError::Projection(format!(
                "'{relation}' is a column of '{}', not a relation",
                self.name()
            ))),
            FieldSchema::PolymorphicManyToOne(_) => Ok(format!("{child_relation}{PATH_SEPARATOR}{rest}")),
            field => {
                let foreign = field.foreign_collection().unwrap_or_default();
                let nested = self.sibling(foreign)?.path_to_child(rest)?;
                Ok(format!("{child_relation}{PATH_SEPARATOR}{nested}"))
            }
        }
    }

    /// Translate a path of the child into the public path
    pub fn path_from_child(&self, child_path: &str) -> ToolkitResult<String> {
        let Some((child_relation, rest)) = child_path.split_once(PATH_SEPARATOR) else {
            return Ok(self.layer().public_name(child_path));
        };

        let relation = self.layer().public_name(child_relation);
        match self.field(&relation)? {
            FieldSchema::Column(_) => Err(ToolkitError::Projection(format!(
                "'{relation}' is a column of '{}', not a relation",
                self.name()
            ))),
            FieldSchema::PolymorphicManyToOne(_) => Ok(format!("{relation}{PATH_SEPARATOR}{rest}")),
            field => {
                let foreign = field.foreign_collection().unwrap_or_default();
                let nested = self.sibling(foreign)?.path_from_child(rest)?;
                Ok(format!("{relation}{PATH_SEPARATOR}{nested}"))
            }
        }
    }

    /// Rename the keys of a record written by the caller
    pub fn record_to_child(&self, record: &Record) -> ToolkitResult<Record> {
        let schema = Collection::schema(self)?;
        let mut result = Record::new();
        for (key, value) in record {
            let value = match (schema.fields.get(key), value) {
                (Some(field @ (FieldSchema::ManyToOne(_) | FieldSchema::OneToOne(_))), Value::Object(nested)) => {
                    let foreign = self.sibling(field.foreign_collection().unwrap_or_default())?;
                    Value::Object(foreign.record_to_child(nested)?)
                }
                _ => value.clone(),
            };
            result.insert(self.layer().child_name(key), value);
        }
        Ok(result)
    }

    /// Rename the keys of a record returned by the child
    pub fn record_from_child(&self, record: &Record) -> ToolkitResult<Record> {
        let schema = Collection::schema(self)?;
        let mut result = Record::new();
        for (child_key, value) in record {
            let key = self.layer().public_name(child_key);
            let value = match (schema.fields.get(&key), value) {
                (Some(FieldSchema::Column(_) | FieldSchema::PolymorphicManyToOne(_)), _) | (None, _) => value.clone(),
                (Some(field), Value::Object(nested)) => {
                    let foreign = self.sibling(field.foreign_collection().unwrap_or_default())?;
                    Value::Object(foreign.record_from_child(nested)?)
                }
                (Some(field), Value::Array(items)) => {
                    let foreign = self.sibling(field.foreign_collection().unwrap_or_default())?;
                    let items = items
                        .iter()
                        .map(|item| match item {
                            Value::Object(nested) => foreign.record_from_child(nested).map(Value::Object),
                            other => Ok(other.clone()),
                        })
                        .collect::<ToolkitResult<Vec<_>>>()?;
                    Value::Array(items)
                }
                (Some(_), other) => other.clone(),
            };
            result.insert(key, value);
        }
        Ok(result)
    }
}

#[async_trait]
impl CollectionLayer for RenameFieldLayer {
    type Datasource = ();

    fn refine_schema(
        &self,
        this: &CollectionDecorator<Self>,
        schema: CollectionSchema,
    ) -> ToolkitResult<CollectionSchema> {
        let foreign_name = |collection: &str, child_key: &str| -> String {
            match this.sibling(collection) {
                Ok(foreign) => foreign.layer().public_name(child_key),
                Err(_) => child_key.to_string(),
            }
        };

        let mut fields = BTreeMap::new();
        for (child_name, mut field) in schema.fields {
            match &mut field {
                FieldSchema::ManyToOne(relation) => {
                    relation.foreign_key = self.public_name(&relation.foreign_key);
                    relation.foreign_key_target = foreign_name(&relation.foreign_collection, &relation.foreign_key_target);
                }
                FieldSchema::OneToOne(relation) => {
                    relation.origin_key = foreign_name(&relation.foreign_collection, &relation.origin_key);
                    relation.origin_key_target = self.public_name(&relation.origin_key_target);
                }
                FieldSchema::OneToMany(relation) => {
                    relation.origin_key = foreign_name(&relation.foreign_collection, &relation.origin_key);
                    relation.origin_key_target = self.public_name(&relation.origin_key_target);
                }
                FieldSchema::ManyToMany(relation) => {
                    relation.foreign_key = foreign_name(&relation.through_collection, &relation.foreign_key);
                    relation.origin_key = foreign_name(&relation.through_collection, &relation.origin_key);
                    relation.foreign_key_target = foreign_name(&relation.foreign_collection, &relation.foreign_key_target);
                    relation.origin_key_target = self.public_name(&relation.origin_key_target);
                }
                FieldSchema::PolymorphicOneToOne(relation) | FieldSchema::PolymorphicOneToMany(relation) => {
                    relation.origin_key = foreign_name(&relation.foreign_collection, &relation.origin_key);
                    relation.origin_type_field = foreign_name(&relation.foreign_collection, &relation.origin_type_field);
                    relation.origin_key_target = self.public_name(&relation.origin_key_target);
                }
                FieldSchema::Column(_) | FieldSchema::PolymorphicManyToOne(_) => {}
            }
            fields.insert(self.public_name(&child_name), field);
        }
        Ok(CollectionSchema { fields, ..schema })
    }

    async fn refine_filter(
        &self,
        this: &CollectionDecorator<Self>,
        _caller: &Caller,
        mut filter: Filter,
    ) -> ToolkitResult<Filter> {
        if let Some(tree) = &filter.condition_tree {
            filter.condition_tree = Some(tree.replace_fields(|path| this.path_to_child(path))?);
        }
        Ok(filter)
    }

    async fn refine_sort(&self, this: &CollectionDecorator<Self>, sort: Sort) -> ToolkitResult<Sort> {
        sort.replace_clauses(|clause| {
            Ok(vec![SortClause {
                field: this.path_to_child(&clause.field)?,
                ascending: clause.ascending,
            }])
        })
    }

    async fn list(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> ToolkitResult<Vec<Record>> {
        let child_projection = projection.try_replace(|path| this.path_to_child(path).map(|p| [p]))?;
        let records = this.forward_list(caller, filter, &child_projection).await?;
        records.iter().map(|record| this.record_from_child(record)).collect()
    }

    async fn create(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        data: Vec<Record>,
    ) -> ToolkitResult<Vec<Record>> {
        let data = data
            .iter()
            .map(|record| this.record_to_child(record))
            .collect::<ToolkitResult<Vec<_>>>()?;
        let created = this.child().create(caller, data).await?;
        created.iter().map(|record| this.record_from_child(record)).collect()
    }

    async fn update(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &Filter,
        patch: &Record,
    ) -> ToolkitResult<()> {
        let patch = this.record_to_child(patch)?;
        this.forward_update(caller, filter, &patch).await
    }

    async fn aggregate(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &Filter,
        aggregation: &Aggregation,
        limit: Option<usize>,
    ) -> ToolkitResult<Vec<AggregateResult>> {
        let child_aggregation = aggregation.replace_fields(|path| this.path_to_child(path))?;
        let rows = this.forward_aggregate(caller, filter, &child_aggregation, limit).await?;
        rows.into_iter()
            .map(|row| {
                let mut group = Record::new();
                for (path, value) in row.group {
                    group.insert(this.path_from_child(&path)?, value);
                }
                Ok(AggregateResult { value: row.value, group })
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorators::DatasourceDecorator;
    use crate::test_support::{library, records};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use trellis_core::{Operator, ToolkitConfig};
    use trellis_query::{AggregationGroup, ConditionTree};

    fn decorated() -> Arc<DatasourceDecorator<RenameFieldLayer>> {
        DatasourceDecorator::new(library(), Arc::new(ToolkitConfig::default()))
    }

    #[test]
    fn test_schema_uses_new_names_in_relations() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();
        let authors = datasource.get_decorator("Author").unwrap();

        books.rename_field("author_id", "writer_id").unwrap();
        authors.rename_field("id", "author_pk").unwrap();

        let book_schema = books.schema().unwrap();
        assert!(book_schema.fields.contains_key("writer_id"));
        assert!(!book_schema.fields.contains_key("author_id"));
        match &book_schema.fields["author"] {
            FieldSchema::ManyToOne(relation) => {
                assert_eq!(relation.foreign_key, "writer_id");
                assert_eq!(relation.foreign_key_target, "author_pk");
            }
            other => panic!("unexpected field {other:?}"),
        }

        match &authors.schema().unwrap().fields["books"] {
            FieldSchema::OneToMany(relation) => {
                assert_eq!(relation.origin_key, "writer_id");
                assert_eq!(relation.origin_key_target, "author_pk");
            }
            other => panic!("unexpected field {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_translates_paths_both_ways() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();
        let authors = datasource.get_decorator("Author").unwrap();
        books.rename_field("title", "name").unwrap();
        authors.rename_field("last_name", "surname").unwrap();

        let filter = PaginatedFilter::new()
            .with_condition_tree(ConditionTree::leaf("author:surname", Operator::Equal, json!("Herbert")));
        let result = books
            .list(&Caller::default(), &filter, &Projection::from(["name", "author:surname"]))
            .await
            .unwrap();

        assert_eq!(result, records(json!([{ "name": "Dune", "author": { "surname": "Herbert" } }])));
    }

    #[tokio::test]
    async fn test_writes_and_aggregates_use_child_names() {
        let memory = library();
        let datasource: Arc<DatasourceDecorator<RenameFieldLayer>> =
            DatasourceDecorator::new(memory.clone(), Arc::new(ToolkitConfig::default()));
        let books = datasource.get_decorator("Book").unwrap();
        books.rename_field("title", "name").unwrap();
        let caller = Caller::default();

        let created = books
            .create(&caller, records(json!([{ "name": "Silmarillion", "author_id": 1 }])))
            .await
            .unwrap();
        assert_eq!(created[0]["name"], json!("Silmarillion"));
        assert_eq!(memory.memory_collection("Book").unwrap().rows()[3]["title"], json!("Silmarillion"));

        let filter = Filter::new().with_condition_tree(ConditionTree::leaf("name", Operator::Equal, json!("Dune")));
        let patch = records(json!([{ "name": "Dune Messiah" }])).remove(0);
        books.update(&caller, &filter, &patch).await.unwrap();
        assert_eq!(memory.memory_collection("Book").unwrap().rows()[2]["title"], json!("Dune Messiah"));

        let aggregation = Aggregation::count().with_group(AggregationGroup::new("name"));
        let rows = books.aggregate(&caller, &Filter::new(), &aggregation, Some(1)).await.unwrap();
        assert!(rows[0].group.contains_key("name"));
    }

    #[test]
    fn test_renaming_back_restores_the_child_name() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();
        books.rename_field("title", "name").unwrap();
        books.rename_field("name", "label").unwrap();
        books.rename_field("label", "title").unwrap();

        assert!(books.layer().names.read().unwrap().to_child.is_empty());
        assert!(books.schema().unwrap().fields.contains_key("title"));
    }

    #[test]
    fn test_rejects_unknown_and_taken_names() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();

        let err = books.rename_field("missing", "other").unwrap_err();
        assert!(err.to_string().contains("No such field 'Book.missing'"));

        let err = books.rename_field("title", "author_id").unwrap_err();
        assert!(matches!(err, ToolkitError::InvalidRename(_)));
        assert!(books.schema().unwrap().fields.contains_key("title"));
    }
}
