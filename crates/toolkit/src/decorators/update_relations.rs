//! Nested updates through single relations
//!
//! Column values of the patch are written as-is. For every relation value,
//! the matching records are listed to find out which related records already
//! exist: those are updated, the missing ones are created and linked.

use super::collection::{CollectionDecorator, CollectionLayer};
use crate::interfaces::Collection;
use async_trait::async_trait;
use trellis_core::schema::FieldSchema;
use trellis_core::types::{Caller, Record, Value};
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::{ConditionTreeFactory, Filter, PaginatedFilter, Projection};

#[derive(Default)]
pub struct UpdateRelationsLayer;

pub type UpdateRelationsCollection = CollectionDecorator<UpdateRelationsLayer>;

impl CollectionDecorator<UpdateRelationsLayer> {
    /// Enough fields to target the records and their existing related records
    fn relation_projection(&self, relations: &[(String, FieldSchema)]) -> ToolkitResult<Projection> {
        let schema = Collection::schema(self)?;
        let mut projection: Projection = schema.primary_keys().into_iter().collect();

        for (name, field) in relations {
            let foreign = field.foreign_collection().ok_or_else(|| {
                ToolkitError::Write(format!("Cannot update the relation '{name}' in place"))
            })?;
            let foreign_schema = self.sibling(foreign)?.schema()?;
            let nested: Projection = foreign_schema.primary_keys().into_iter().collect();
            projection = projection.union(&nested.nest(name));

            match field {
                FieldSchema::ManyToOne(relation) => {
                    projection = projection.union(&Projection::from([relation.foreign_key_target.clone()]).nest(name));
                }
                FieldSchema::OneToOne(relation) => projection.push(relation.origin_key_target.clone()),
                _ => {}
            }
        }
        Ok(projection)
    }

    async fn create_or_update_relation(
        &self,
        caller: &Caller,
        records: &[Record],
        name: &str,
        field: &FieldSchema,
        patch: &Record,
    ) -> ToolkitResult<()> {
        let foreign_name = field.foreign_collection().unwrap_or_default();
        let foreign = self.sibling(foreign_name)?;
        let (updates, creates): (Vec<&Record>, Vec<&Record>) = records
            .iter()
            .partition(|record| record.get(name).is_some_and(|v| !v.is_null()));

        if !creates.is_empty() {
            match field {
                FieldSchema::ManyToOne(relation) => {
                    let created = foreign.create(caller, vec![patch.clone()]).await?;
                    let key = created
                        .first()
                        .and_then(|r| r.get(&relation.foreign_key_target))
                        .cloned()
                        .unwrap_or(Value::Null);

                    let schema = Collection::schema(self)?;
                    let parents: Vec<Record> = creates.into_iter().cloned().collect();
                    let tree = ConditionTreeFactory::match_records(&schema, &parents)?;
                    let mut parent_patch = Record::new();
                    parent_patch.insert(relation.foreign_key.clone(), key);
                    self.child()
                        .update(caller, &Filter::new().with_condition_tree(tree), &parent_patch)
                        .await?;
                }
                FieldSchema::OneToOne(relation) => {
                    let nested = creates
                        .into_iter()
                        .map(|parent| {
                            let mut record = patch.clone();
                            let origin = parent
                                .get(&relation.origin_key_target)
                                .cloned()
                                .unwrap_or(Value::Null);
                            record.insert(relation.origin_key.clone(), origin);
                            record
                        })
                        .collect();
                    foreign.create(caller, nested).await?;
                }
                other => {
                    return Err(ToolkitError::Write(format!(
                        "Cannot create records through the {} relation '{name}'",
                        other.type_name()
                    )));
                }
            }
        }

        if !updates.is_empty() {
            let related: Vec<Record> = updates
                .into_iter()
                .filter_map(|record| record.get(name).and_then(Value::as_object).cloned())
                .collect();
            let foreign_schema = foreign.schema()?;
            let tree = ConditionTreeFactory::match_records(&foreign_schema, &related)?;
            foreign
                .update(caller, &Filter::new().with_condition_tree(tree), patch)
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CollectionLayer for UpdateRelationsLayer {
    type Datasource = ();

    async fn update(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &Filter,
        patch: &Record,
    ) -> ToolkitResult<()> {
        let schema = Collection::schema(this)?;
        let mut columns = Record::new();
        let mut relations: Vec<(String, FieldSchema, Record)> = Vec::new();

        for (key, value) in patch {
            match schema.fields.get(key) {
                Some(FieldSchema::Column(_)) => {
                    columns.insert(key.clone(), value.clone());
                }
                Some(field) => match value {
                    Value::Object(nested) => relations.push((key.clone(), field.clone(), nested.clone())),
                    other => {
                        return Err(ToolkitError::Write(format!(
                            "The relation '{key}' expects an object, got {other}"
                        )));
                    }
                },
                None => return Err(ToolkitError::field_not_found(this.name(), key)),
            }
        }

        if !columns.is_empty() {
            this.child().update(caller, filter, &columns).await?;
        }
        if relations.is_empty() {
            return Ok(());
        }

        let fields: Vec<(String, FieldSchema)> = relations
            .iter()
            .map(|(name, field, _)| (name.clone(), field.clone()))
            .collect();
        let projection = this.relation_projection(&fields)?;
        let records = this
            .child()
            .list(caller, &PaginatedFilter::from(filter.clone()), &projection)
            .await?;

        for (name, field, nested) in &relations {
            this.create_or_update_relation(caller, &records, name, field, nested).await?;
        }
        Ok(())
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
    use trellis_query::ConditionTree;

    fn by_id(id: i64) -> Filter {
        Filter::new().with_condition_tree(ConditionTree::leaf("id", Operator::Equal, json!(id)))
    }

    #[tokio::test]
    async fn test_updates_existing_related_record() {
        let memory = library();
        let datasource: Arc<DatasourceDecorator<UpdateRelationsLayer>> =
            DatasourceDecorator::new(memory.clone(), Arc::new(ToolkitConfig::default()));
        let books = datasource.get_decorator("Book").unwrap();

        let patch = records(json!([{ "title": "Dune Messiah", "author": { "first_name": "Franklin" } }])).remove(0);
        books.update(&Caller::default(), &by_id(3), &patch).await.unwrap();

        let book = &memory.memory_collection("Book").unwrap().rows()[2];
        assert_eq!(book["title"], json!("Dune Messiah"));
        let authors = memory.memory_collection("Author").unwrap().rows();
        assert_eq!(authors[1]["first_name"], json!("Franklin"));
        assert_eq!(authors[0]["first_name"], json!("John"));
    }

    #[tokio::test]
    async fn test_creates_and_links_missing_related_record() {
        let memory = library();
        memory
            .memory_collection("Book")
            .unwrap()
            .seed(records(json!([{ "id": 4, "title": "Anonymous", "author_id": null }])));
        let datasource: Arc<DatasourceDecorator<UpdateRelationsLayer>> =
            DatasourceDecorator::new(memory.clone(), Arc::new(ToolkitConfig::default()));
        let books = datasource.get_decorator("Book").unwrap();

        let patch = records(json!([{ "author": { "first_name": "Unknown" } }])).remove(0);
        books.update(&Caller::default(), &by_id(4), &patch).await.unwrap();

        let authors = memory.memory_collection("Author").unwrap().rows();
        assert_eq!(authors.len(), 3);
        let book = &memory.memory_collection("Book").unwrap().rows()[3];
        assert_eq!(book["author_id"], authors[2]["id"]);
    }
}
