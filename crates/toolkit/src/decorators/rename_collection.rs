//! Collection renaming
//!
//! Names are translated at the datasource level: every collection of the layer
//! asks the shared state for its public name, and relations pointing to a
//! renamed collection are rewritten in every schema of the datasource.

use super::collection::{CollectionDecorator, CollectionLayer};
use super::datasource::{DatasourceDecorator, DatasourceLayer};
use crate::interfaces::Collection;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use trellis_core::schema::{CollectionSchema, FieldSchema};
use trellis_core::{ToolkitError, ToolkitResult};

#[derive(Default)]
struct Names {
    from_child: BTreeMap<String, String>,
    to_child: BTreeMap<String, String>,
}

/// Datasource-wide rename table
#[derive(Default)]
pub struct CollectionRenames {
    names: RwLock<Names>,
}

impl CollectionRenames {
    /// Public name of a collection known by the child as `child_name`
    pub fn public_name(&self, child_name: &str) -> String {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .from_child
            .get(child_name)
            .cloned()
            .unwrap_or_else(|| child_name.to_string())
    }

    /// Name the child knows a renamed collection by
    pub fn child_name(&self, public_name: &str) -> Option<String> {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .to_child
            .get(public_name)
            .cloned()
    }
}

impl DatasourceLayer for CollectionRenames {
    fn missing_collection(&self, name: &str) -> Option<ToolkitError> {
        let names = self.names.read().unwrap_or_else(PoisonError::into_inner);
        names
            .from_child
            .get(name)
            .map(|new| ToolkitError::CollectionRenamed {
                old: name.to_string(),
                new: new.clone(),
            })
    }
}

#[derive(Default)]
pub struct RenameCollectionLayer;

pub type RenameCollectionCollection = CollectionDecorator<RenameCollectionLayer>;

impl DatasourceDecorator<RenameCollectionLayer> {
    pub fn rename_collection(&self, current_name: &str, new_name: &str) -> ToolkitResult<()> {
        let collection = self.get_decorator(current_name)?;
        if current_name == new_name {
            return Ok(());
        }

        if self.decorators().iter().any(|c| c.name() == new_name) {
            return Err(ToolkitError::InvalidRename(format!(
                "The given new collection name {new_name} is already defined in the dataSource"
            )));
        }
        if let Some(original) = self.layer().child_name(current_name) {
            return Err(ToolkitError::InvalidRename(format!(
                "Cannot rename a collection twice: {original}->{current_name}->{new_name}"
            )));
        }

        let schema = collection.schema()?;
        for (field_name, field) in &schema.fields {
            if let FieldSchema::PolymorphicOneToOne(relation) | FieldSchema::PolymorphicOneToMany(relation) = field {
                return Err(ToolkitError::InvalidRename(format!(
                    "Cannot rename collection {current_name} because it's a target of a polymorphic relation '{}.{}' (through '{field_name}')",
                    relation.foreign_collection, relation.origin_key
                )));
            }
        }

        tracing::info!("Renaming collection '{}' to '{}'", current_name, new_name);
        {
            let mut names = self.layer().names.write().unwrap_or_else(PoisonError::into_inner);
            let child_name = collection.child().name();
            names.from_child.insert(child_name.clone(), new_name.to_string());
            names.to_child.insert(new_name.to_string(), child_name);
        }
        self.mark_all_schemas_dirty();
        Ok(())
    }

    pub fn rename_collections<I, K, V>(&self, renames: I) -> ToolkitResult<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (current, new) in renames {
            self.rename_collection(current.as_ref(), new.as_ref())?;
        }
        Ok(())
    }
}

#[async_trait]
impl CollectionLayer for RenameCollectionLayer {
    type Datasource = CollectionRenames;

    fn collection_name(&self, this: &CollectionDecorator<Self>) -> String {
        let child_name = this.child().name();
        match this.datasource() {
            Ok(datasource) => datasource.layer().public_name(&child_name),
            Err(_) => child_name,
        }
    }

    fn refine_schema(
        &self,
        this: &CollectionDecorator<Self>,
        mut schema: CollectionSchema,
    ) -> ToolkitResult<CollectionSchema> {
        let datasource = this.datasource()?;
        let renames = datasource.layer();
        for field in schema.fields.values_mut() {
            match field {
                FieldSchema::ManyToOne(relation) => {
                    relation.foreign_collection = renames.public_name(&relation.foreign_collection);
                }
                FieldSchema::OneToOne(relation) => {
                    relation.foreign_collection = renames.public_name(&relation.foreign_collection);
                }
                FieldSchema::OneToMany(relation) => {
                    relation.foreign_collection = renames.public_name(&relation.foreign_collection);
                }
                FieldSchema::ManyToMany(relation) => {
                    relation.foreign_collection = renames.public_name(&relation.foreign_collection);
                    relation.through_collection = renames.public_name(&relation.through_collection);
                }
                FieldSchema::PolymorphicOneToOne(relation) | FieldSchema::PolymorphicOneToMany(relation) => {
                    relation.foreign_collection = renames.public_name(&relation.foreign_collection);
                }
                FieldSchema::Column(_) | FieldSchema::PolymorphicManyToOne(_) => {}
            }
        }
        Ok(schema)
    }
}

// ============================================================================
// Tests
// ============================================================================
