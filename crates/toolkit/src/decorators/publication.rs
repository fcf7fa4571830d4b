//! Field and collection visibility
//!
//! A field is published when it was not hidden and, for relations, when the
//! keys it relies on are published too (possibly on another collection).
//! Removed collections disappear from the datasource and every relation
//! pointing to them is unpublished.

use super::collection::{CollectionDecorator, CollectionLayer};
use super::datasource::{DatasourceDecorator, DatasourceLayer};
use crate::interfaces::Collection;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};
use trellis_core::schema::{CollectionSchema, FieldSchema};
use trellis_core::types::{Caller, Record, split_path};
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::{PaginatedFilter, Projection};

// ============================================================================
// Datasource state
// ============================================================================

/// Collections removed from the datasource
#[derive(Default)]
pub struct PublishedCollections {
    removed: RwLock<BTreeSet<String>>,
}

impl PublishedCollections {
    pub fn is_published(&self, name: &str) -> bool {
        !self
            .removed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

impl DatasourceLayer for PublishedCollections {
    fn is_collection_visible(&self, name: &str) -> bool {
        self.is_published(name)
    }

    fn missing_collection(&self, name: &str) -> Option<ToolkitError> {
        (!self.is_published(name)).then(|| ToolkitError::CollectionRemoved(name.to_string()))
    }
}

impl DatasourceDecorator<PublicationLayer> {
    /// Hide a collection; relations of the other collections targeting it are unpublished
    pub fn remove_collection(&self, name: &str) -> ToolkitResult<()> {
        let collection = self.get_decorator(name)?;
        let schema = collection.schema()?;
        for (field_name, field) in &schema.fields {
            if let FieldSchema::PolymorphicOneToOne(relation) | FieldSchema::PolymorphicOneToMany(relation) = field {
                return Err(ToolkitError::Publication(format!(
                    "Cannot remove collection {name} because it's a potential target of polymorphic relation {}.{} (through '{field_name}')",
                    relation.foreign_collection, relation.origin_key
                )));
            }
        }

        tracing::info!("Removing collection '{}'", name);
        self.layer()
            .removed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string());

        for other in self.decorators() {
            other.invalidate_schema();
        }
        Ok(())
    }

    /// Remove every collection not in `include` (when not empty) or in `exclude`
    pub fn keep_collections_matching(&self, include: &[&str], exclude: &[&str]) -> ToolkitResult<()> {
        for name in include.iter().chain(exclude) {
            self.get_decorator(name)?;
        }

        for collection in self.decorators() {
            let name = collection.name();
            let kept = include.is_empty() || include.contains(&name.as_str());
            if !kept || exclude.contains(&name.as_str()) {
                self.remove_collection(&name)?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Collection layer
// ============================================================================

#[derive(Default)]
pub struct PublicationLayer {
    unpublished: RwLock<BTreeSet<String>>,
}

pub type PublicationCollection = CollectionDecorator<PublicationLayer>;

impl CollectionDecorator<PublicationLayer> {
    pub fn change_field_visibility(&self, name: &str, visible: bool) -> ToolkitResult<()> {
        let hidden = self
            .layer()
            .unpublished
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name);

        if hidden && visible {
            self.layer()
                .unpublished
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(name);
        } else {
            let child_schema = self.child().schema()?;
            let field = child_schema.field(&self.name(), name)?;
            if field.as_column().is_some_and(|c| c.is_primary_key) {
                return Err(ToolkitError::Publication("Cannot hide primary key".to_string()));
            }
            if !visible {
                self.layer()
                    .unpublished
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(name.to_string());
            }
        }

        tracing::info!(
            "Field '{}.{}' is now {}",
            self.name(),
            name,
            if visible { "published" } else { "hidden" }
        );
        // Relations of the other collections may rely on this field
        self.datasource()?.mark_all_schemas_dirty();
        Ok(())
    }

    /// Whether `name` is exposed by this collection
    pub fn is_published(&self, name: &str) -> ToolkitResult<bool> {
        self.is_published_from(name, &mut Vec::new())
    }

    fn is_published_from(&self, name: &str, visiting: &mut Vec<String>) -> ToolkitResult<bool> {
        let key = format!("{}.{name}", self.name());
        if visiting.contains(&key) {
            visiting.push(key);
            return Err(ToolkitError::SchemaCycle(visiting.join(" -> ")));
        }

        let hidden = self
            .layer()
            .unpublished
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name);
        if hidden {
            return Ok(false);
        }

        let child_schema = self.child().schema()?;
        let Some(field) = child_schema.fields.get(name) else {
            return Ok(false);
        };

        visiting.push(key);
        let published = match field {
            FieldSchema::Column(_) => true,
            FieldSchema::ManyToOne(relation) => {
                self.sibling(&relation.foreign_collection).is_ok()
                    && self.is_published_from(&relation.foreign_key, visiting)?
            }
            FieldSchema::OneToOne(relation) => {
                self.foreign_publishes(&relation.foreign_collection, &[&relation.origin_key], visiting)?
            }
            FieldSchema::OneToMany(relation) => {
                self.foreign_publishes(&relation.foreign_collection, &[&relation.origin_key], visiting)?
            }
            FieldSchema::ManyToMany(relation) => {
                self.sibling(&relation.foreign_collection).is_ok()
                    && self.foreign_publishes(
                        &relation.through_collection,
                        &[&relation.foreign_key, &relation.origin_key],
                        visiting,
                    )?
            }
            FieldSchema::PolymorphicManyToOne(relation) => {
                self.is_published_from(&relation.foreign_key, visiting)?
                    && self.is_published_from(&relation.foreign_key_type_field, visiting)?
            }
            FieldSchema::PolymorphicOneToOne(relation) | FieldSchema::PolymorphicOneToMany(relation) => {
                self.foreign_publishes(
                    &relation.foreign_collection,
                    &[&relation.origin_key, &relation.origin_type_field],
                    visiting,
                )?
            }
        };
        visiting.pop();
        Ok(published)
    }

    /// The foreign collection exists and publishes all of `keys`
    fn foreign_publishes(&self, collection: &str, keys: &[&str], visiting: &mut Vec<String>) -> ToolkitResult<bool> {
        let Ok(foreign) = self.sibling(collection) else {
            return Ok(false);
        };
        for key in keys {
            if !foreign.is_published_from(key, visiting)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Fail unless every field along `path` is published, across relations
    fn check_published_path(&self, path: &str) -> ToolkitResult<()> {
        let (root, rest) = split_path(path).map_or((path, None), |(root, rest)| (root, Some(rest)));
        let schema = Collection::schema(self)?;
        let Some(field) = schema.fields.get(root) else {
            return Err(ToolkitError::field_not_found(self.name(), root));
        };
        match (rest, field.foreign_collection()) {
            (Some(rest), Some(foreign)) => self.sibling(foreign)?.check_published_path(rest),
            _ => Ok(()),
        }
    }

    fn strip_unpublished(&self, records: Vec<Record>) -> ToolkitResult<Vec<Record>> {
        let schema = Collection::schema(self)?;
        Ok(records
            .into_iter()
            .map(|record| {
                record
                    .into_iter()
                    .filter(|(key, _)| schema.fields.contains_key(key))
                    .collect()
            })
            .collect())
    }
}

#[async_trait]
impl CollectionLayer for PublicationLayer {
    type Datasource = PublishedCollections;

    fn refine_schema(
        &self,
        this: &CollectionDecorator<Self>,
        mut schema: CollectionSchema,
    ) -> ToolkitResult<CollectionSchema> {
        let names: Vec<String> = schema.fields.keys().cloned().collect();
        for name in names {
            if !this.is_published(&name)? {
                schema.fields.remove(&name);
            }
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
        for path in projection.iter() {
            this.check_published_path(path)?;
        }
        this.forward_list(caller, filter, projection).await
    }

    async fn create(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        data: Vec<Record>,
    ) -> ToolkitResult<Vec<Record>> {
        let created = this.child().create(caller, data).await?;
        this.strip_unpublished(created)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::Datasource;
    use crate::memory::MemoryDatasource;
    use crate::test_support::{library, records};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use trellis_core::ToolkitConfig;
    use trellis_core::schema::{ColumnSchema, ManyToOneSchema};
    use trellis_core::types::PrimitiveType;

    fn decorated() -> Arc<DatasourceDecorator<PublicationLayer>> {
        DatasourceDecorator::new(library(), Arc::new(ToolkitConfig::default()))
    }

    #[test]
    fn test_hiding_then_unhiding_restores_the_schema() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();
        let before = books.schema().unwrap();

        books.change_field_visibility("title", false).unwrap();
        assert!(!books.schema().unwrap().fields.contains_key("title"));

        books.change_field_visibility("title", true).unwrap();
        assert_eq!(*books.schema().unwrap(), *before);
    }

    #[test]
    fn test_hiding_a_primary_key_fails_without_side_effect() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();
        let before = books.schema().unwrap();

        let err = books.change_field_visibility("id", false).unwrap_err();
        assert_eq!(err.to_string(), "Invalid publication: Cannot hide primary key");
        assert!(Arc::ptr_eq(&before, &books.schema().unwrap()));
    }

    #[test]
    fn test_relations_follow_their_keys() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();
        let authors = datasource.get_decorator("Author").unwrap();
        assert!(authors.schema().unwrap().fields.contains_key("books"));

        books.change_field_visibility("author_id", false).unwrap();
        assert!(!books.schema().unwrap().fields.contains_key("author"));
        assert!(!authors.schema().unwrap().fields.contains_key("books"));
    }

    #[test]
    fn test_removing_a_collection_dirties_the_others() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();
        let before = books.schema().unwrap();
        assert!(before.fields.contains_key("author"));

        datasource.remove_collection("Author").unwrap();

        let after = books.schema().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(!after.fields.contains_key("author"));
        let names: Vec<String> = datasource.collections().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Book"]);
        assert_eq!(
            datasource.get_collection("Author").err().unwrap().to_string(),
            "Collection 'Author' was removed"
        );
    }

    #[test]
    fn test_relations_keyed_on_each_other_raise_a_cycle() {
        let base = MemoryDatasource::new();
        let relation = |foreign_key: &str| {
            FieldSchema::ManyToOne(ManyToOneSchema {
                foreign_collection: "Node".to_string(),
                foreign_key: foreign_key.to_string(),
                foreign_key_target: "id".to_string(),
            })
        };
        base.add_collection(
            "Node",
            CollectionSchema::new()
                .with_field("id", ColumnSchema::primary_key(PrimitiveType::Number))
                .with_field("parent", relation("child"))
                .with_field("child", relation("parent")),
        )
        .unwrap();

        let datasource = DatasourceDecorator::<PublicationLayer>::new(base, Arc::new(ToolkitConfig::default()));
        let nodes = datasource.get_decorator("Node").unwrap();
        let err = nodes.schema().unwrap_err();
        assert!(matches!(err, ToolkitError::SchemaCycle(_)));
        assert!(matches!(nodes.is_published("parent"), Err(ToolkitError::SchemaCycle(_))));
        assert!(nodes.is_published("id").unwrap());
    }

    #[test]
    fn test_keep_collections_matching() {
        let datasource = decorated();
        datasource.keep_collections_matching(&["Book"], &[]).unwrap();
        let names: Vec<String> = datasource.collections().iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["Book"]);

        let datasource = decorated();
        assert!(datasource.keep_collections_matching(&[], &["Nope"]).is_err());
    }

    #[tokio::test]
    async fn test_hidden_foreign_fields_are_not_reachable_through_relations() {
        let datasource = decorated();
        let authors = datasource.get_decorator("Author").unwrap();
        let books = datasource.get_decorator("Book").unwrap();
        authors.change_field_visibility("last_name", false).unwrap();
        let caller = Caller::default();

        let err = books
            .list(&caller, &PaginatedFilter::new(), &Projection::from(["id", "author:last_name"]))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        let result = books
            .list(&caller, &PaginatedFilter::new(), &Projection::from(["id", "author:id"]))
            .await
            .unwrap();
        assert_eq!(result[0], records(json!([{ "id": 1, "author": { "id": 1 } }])).remove(0));
    }

    #[tokio::test]
    async fn test_hidden_fields_never_leave_the_layer() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();
        books.change_field_visibility("title", false).unwrap();
        let caller = Caller::default();

        let created = books
            .create(&caller, records(json!([{ "title": "Secret", "author_id": 1 }])))
            .await
            .unwrap();
        assert_eq!(created, records(json!([{ "id": 4, "author_id": 1 }])));

        let err = books
            .list(&caller, &PaginatedFilter::new(), &Projection::from(["id", "title"]))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
