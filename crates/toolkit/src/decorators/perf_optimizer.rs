//! Skips joins that only read the target of a foreign key
//!
//! Asking for `author:id` on a book is answered from `author_id`: the
//! relation is dropped from the projection sent below and rebuilt on the
//! returned records.

use super::collection::{CollectionDecorator, CollectionLayer};
use crate::interfaces::Collection;
use async_trait::async_trait;
use trellis_core::schema::FieldSchema;
use trellis_core::types::{Caller, PATH_SEPARATOR, Record, Value};
use trellis_core::ToolkitResult;
use trellis_query::{PaginatedFilter, Projection};

/// A many-to-one relation answered from its foreign key
#[derive(Debug, Clone, PartialEq)]
struct Shortcut {
    relation: String,
    foreign_key: String,
    target: String,
}

#[derive(Default)]
pub struct PerfOptimizerLayer;

pub type PerfOptimizerCollection = CollectionDecorator<PerfOptimizerLayer>;

impl CollectionDecorator<PerfOptimizerLayer> {
    fn shortcuts(&self, projection: &Projection) -> ToolkitResult<Vec<Shortcut>> {
        let schema = Collection::schema(self)?;
        let mut shortcuts = Vec::new();
        for (relation, sub_projection) in projection.relations() {
            let Some(FieldSchema::ManyToOne(many_to_one)) = schema.fields.get(&relation) else {
                continue;
            };
            if sub_projection.len() == 1 && sub_projection.contains(&many_to_one.foreign_key_target) {
                shortcuts.push(Shortcut {
                    relation,
                    foreign_key: many_to_one.foreign_key.clone(),
                    target: many_to_one.foreign_key_target.clone(),
                });
            }
        }
        Ok(shortcuts)
    }
}

fn simplify(projection: &Projection, shortcuts: &[Shortcut]) -> Projection {
    let mut simplified = projection.replace(|path| {
        let skipped = shortcuts
            .iter()
            .any(|s| path == format!("{}{PATH_SEPARATOR}{}", s.relation, s.target));
        if skipped { vec![] } else { vec![path.to_string()] }
    });
    for shortcut in shortcuts {
        simplified.push(shortcut.foreign_key.clone());
    }
    simplified
}

fn rebuild(record: &mut Record, shortcut: &Shortcut, keep_foreign_key: bool) {
    let foreign_key = if keep_foreign_key {
        record.get(&shortcut.foreign_key).cloned()
    } else {
        record.remove(&shortcut.foreign_key)
    };
    let relation = match foreign_key {
        None | Some(Value::Null) => Value::Null,
        Some(value) => {
            let mut related = Record::new();
            related.insert(shortcut.target.clone(), value);
            Value::Object(related)
        }
    };
    record.insert(shortcut.relation.clone(), relation);
}

#[async_trait]
impl CollectionLayer for PerfOptimizerLayer {
    type Datasource = ();

    async fn list(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &PaginatedFilter,
        projection: &Projection,
    ) -> ToolkitResult<Vec<Record>> {
        let shortcuts = this.shortcuts(projection)?;
        if shortcuts.is_empty() {
            return this.forward_list(caller, filter, projection).await;
        }

        let simplified = simplify(projection, &shortcuts);
        tracing::debug!(
            "Answering {} relation(s) of '{}' from foreign keys",
            shortcuts.len(),
            this.name()
        );

        let mut records = this.forward_list(caller, filter, &simplified).await?;
        for record in &mut records {
            for shortcut in &shortcuts {
                rebuild(record, shortcut, projection.contains(&shortcut.foreign_key));
            }
        }
        Ok(records)
    }
}

// ============================================================================
// Tests
// ============================================================================
