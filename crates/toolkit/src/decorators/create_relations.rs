//! Nested creation through single relations
//!
//! A record created with a many-to-one or one-to-one value gets its related
//! record created (or updated, when the foreign key is already set) in the
//! foreign collection. Many-to-one records are written first so that their
//! keys can be copied into the parents; one-to-one records are written last
//! because they need the key of their freshly created parent.

use super::collection::{CollectionDecorator, CollectionLayer};
use crate::interfaces::Collection;
use async_trait::async_trait;
use std::collections::BTreeMap;
use trellis_core::schema::{FieldSchema, ManyToOneSchema, OneToOneSchema};
use trellis_core::types::{Caller, Operator, Record, Value};
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::{ConditionTree, Filter};

#[derive(Default)]
pub struct CreateRelationsLayer;

pub type CreateRelationsCollection = CollectionDecorator<CreateRelationsLayer>;

/// A nested record and the position of the record it was taken from
struct NestedRecord {
    index: usize,
    record: Record,
}

impl CollectionDecorator<CreateRelationsLayer> {
    /// Remove relation values from `records`, grouped by relation name
    fn extract_relations(
        &self,
        records: &mut [Record],
    ) -> ToolkitResult<BTreeMap<String, Vec<NestedRecord>>> {
        let schema = Collection::schema(self)?;
        let mut by_relation: BTreeMap<String, Vec<NestedRecord>> = BTreeMap::new();

        for (index, record) in records.iter_mut().enumerate() {
            let relations: Vec<String> = record
                .keys()
                .filter(|key| schema.fields.get(*key).is_some_and(FieldSchema::is_relation))
                .cloned()
                .collect();

            for relation in relations {
                match record.remove(&relation) {
                    Some(Value::Object(nested)) => {
                        by_relation.entry(relation).or_default().push(NestedRecord {
                            index,
                            record: nested,
                        });
                    }
                    Some(Value::Null) | None => {}
                    Some(other) => {
                        return Err(ToolkitError::Write(format!(
                            "The relation '{relation}' expects an object, got {other}"
                        )));
                    }
                }
            }
        }
        Ok(by_relation)
    }

    async fn create_many_to_one(
        &self,
        caller: &Caller,
        records: &mut [Record],
        relation: &ManyToOneSchema,
        entries: Vec<NestedRecord>,
    ) -> ToolkitResult<()> {
        let foreign = self.sibling(&relation.foreign_collection)?;
        let (updates, creations): (Vec<NestedRecord>, Vec<NestedRecord>) =
            entries.into_iter().partition(|entry| {
                records[entry.index]
                    .get(&relation.foreign_key)
                    .is_some_and(|v| !v.is_null())
            });

        if !creations.is_empty() {
            let indexes: Vec<usize> = creations.iter().map(|c| c.index).collect();
            let created = foreign
                .create(caller, creations.into_iter().map(|c| c.record).collect())
                .await?;

            for (index, related) in indexes.into_iter().zip(created) {
                let key = related
                    .get(&relation.foreign_key_target)
                    .cloned()
                    .unwrap_or(Value::Null);
                records[index].insert(relation.foreign_key.clone(), key);
            }
        }

        for update in updates {
            let key = records[update.index]
                .get(&relation.foreign_key)
                .cloned()
                .unwrap_or(Value::Null);
            let filter = Filter::new().with_condition_tree(ConditionTree::leaf(
                relation.foreign_key_target.clone(),
                Operator::Equal,
                key,
            ));
            foreign.update(caller, &filter, &update.record).await?;
        }
        Ok(())
    }

    async fn create_one_to_one(
        &self,
        caller: &Caller,
        created: &[Record],
        relation: &OneToOneSchema,
        entries: Vec<NestedRecord>,
    ) -> ToolkitResult<()> {
        let foreign = self.sibling(&relation.foreign_collection)?;
        let nested = entries
            .into_iter()
            .map(|entry| {
                let mut record = entry.record;
                let origin = created
                    .get(entry.index)
                    .and_then(|parent| parent.get(&relation.origin_key_target))
                    .cloned()
                    .unwrap_or(Value::Null);
                record.insert(relation.origin_key.clone(), origin);
                record
            })
            .collect();
        foreign.create(caller, nested).await?;
        Ok(())
    }
}

#[async_trait]
impl CollectionLayer for CreateRelationsLayer {
    type Datasource = ();

    async fn create(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        mut data: Vec<Record>,
    ) -> ToolkitResult<Vec<Record>> {
        let by_relation = this.extract_relations(&mut data)?;
        if by_relation.is_empty() {
            return this.child().create(caller, data).await;
        }

        let schema = Collection::schema(this)?;
        let mut one_to_one = Vec::new();
        for (name, entries) in by_relation {
            match schema.fields.get(&name) {
                Some(FieldSchema::ManyToOne(relation)) => {
                    this.create_many_to_one(caller, &mut data, relation, entries).await?;
                }
                Some(FieldSchema::OneToOne(relation)) => one_to_one.push((relation.clone(), entries)),
                Some(other) => {
                    return Err(ToolkitError::Write(format!(
                        "Cannot create records through the {} relation '{name}'",
                        other.type_name()
                    )));
                }
                None => return Err(ToolkitError::field_not_found(this.name(), name)),
            }
        }

        let created = this.child().create(caller, data).await?;
        for (relation, entries) in one_to_one {
            this.create_one_to_one(caller, &created, &relation, entries).await?;
        }
        Ok(created)
    }
}

// ============================================================================
// Tests
// ============================================================================
