//! Projections
//!
//! A projection is the ordered list of field paths a caller wants back.
//! Paths crossing a relation use the `relation:field` syntax.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use trellis_core::schema::{CollectionSchema, FieldSchema, SchemaLookup};
use trellis_core::types::{PATH_SEPARATOR, Record, Value, split_path};
use trellis_core::{ToolkitError, ToolkitResult};

/// Ordered, duplicate-free list of field paths
///
/// Equality ignores order: two projections are equal when they request the
/// same set of paths.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Projection {
    paths: Vec<String>,
}

impl PartialEq for Projection {
    fn eq(&self, other: &Self) -> bool {
        let left: HashSet<&str> = self.iter().collect();
        let right: HashSet<&str> = other.iter().collect();
        left == right
    }
}

impl Eq for Projection {}

impl Projection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.paths.iter().any(|p| p == path)
    }

    /// Append a path unless already present
    pub fn push(&mut self, path: impl Into<String>) {
        let path = path.into();
        if !self.contains(&path) {
            self.paths.push(path);
        }
    }

    /// Paths designating columns of the current collection
    pub fn columns(&self) -> Vec<&str> {
        self.iter().filter(|p| !p.contains(PATH_SEPARATOR)).collect()
    }

    /// Sub-projections grouped by the relation they cross
    pub fn relations(&self) -> BTreeMap<String, Projection> {
        let mut relations: BTreeMap<String, Projection> = BTreeMap::new();
        for path in self.iter() {
            if let Some((relation, rest)) = split_path(path) {
                relations.entry(relation.to_string()).or_default().push(rest);
            }
        }
        relations
    }

    /// Rewrite each path into zero or more paths
    pub fn replace<F, I>(&self, mut handler: F) -> Projection
    where
        F: FnMut(&str) -> I,
        I: IntoIterator<Item = String>,
    {
        let mut result = Projection::new();
        for path in self.iter() {
            for replacement in handler(path) {
                result.push(replacement);
            }
        }
        result
    }

    /// Fallible variant of [`Projection::replace`]
    pub fn try_replace<F, I>(&self, mut handler: F) -> ToolkitResult<Projection>
    where
        F: FnMut(&str) -> ToolkitResult<I>,
        I: IntoIterator<Item = String>,
    {
        let mut result = Projection::new();
        for path in self.iter() {
            for replacement in handler(path)? {
                result.push(replacement);
            }
        }
        Ok(result)
    }

    /// Union of this projection with another, keeping first-seen order
    pub fn union(&self, other: &Projection) -> Projection {
        let mut result = self.clone();
        for path in other.iter() {
            result.push(path);
        }
        result
    }

    /// Prefix every path with `relation:`
    pub fn nest(&self, prefix: &str) -> Projection {
        if prefix.is_empty() {
            return self.clone();
        }
        self.replace(|path| [format!("{prefix}{PATH_SEPARATOR}{path}")])
    }

    /// Strip the common relation prefix of every path
    pub fn unnest(&self) -> ToolkitResult<Projection> {
        let first = self
            .paths
            .first()
            .ok_or_else(|| ToolkitError::Projection("Cannot unnest an empty projection".to_string()))?;
        let prefix = match split_path(first) {
            Some((prefix, _)) => prefix,
            None => {
                return Err(ToolkitError::Projection(
                    "Cannot unnest projection.".to_string(),
                ));
            }
        };

        self.try_replace(|path| match split_path(path) {
            Some((p, rest)) if p == prefix => Ok([rest.to_string()]),
            _ => Err(ToolkitError::Projection(
                "Cannot unnest projection.".to_string(),
            )),
        })
    }

    /// Add the primary keys of this collection and of every related collection
    pub fn with_pks(
        &self,
        schema: &CollectionSchema,
        lookup: &dyn SchemaLookup,
    ) -> ToolkitResult<Projection> {
        let mut result = self.clone();
        for pk in schema.primary_keys() {
            result.push(pk);
        }

        for (relation, projection) in self.relations() {
            let foreign = match schema.fields.get(&relation) {
                Some(FieldSchema::PolymorphicManyToOne(_)) => continue,
                Some(field) => field.foreign_collection().ok_or_else(|| {
                    ToolkitError::Projection(format!("'{relation}' is not a relation"))
                })?,
                None => return Err(ToolkitError::field_not_found("", relation)),
            };
            let foreign_schema = lookup.collection_schema(foreign)?;
            for path in projection.with_pks(&foreign_schema, lookup)?.nest(&relation).iter() {
                result.push(path);
            }
        }
        Ok(result)
    }

    /// Every column, plus the columns of directly related single records
    pub fn all(schema: &CollectionSchema, lookup: &dyn SchemaLookup) -> ToolkitResult<Projection> {
        let mut result = Projection::new();
        for (name, field) in &schema.fields {
            match field {
                FieldSchema::Column(_) => result.push(name.clone()),
                FieldSchema::ManyToOne(_)
                | FieldSchema::OneToOne(_)
                | FieldSchema::PolymorphicOneToOne(_) => {
                    let foreign = field.foreign_collection().unwrap_or_default();
                    let foreign_schema = lookup.collection_schema(foreign)?;
                    for path in Projection::columns_of(&foreign_schema).nest(name).iter() {
                        result.push(path);
                    }
                }
                FieldSchema::PolymorphicManyToOne(_) => result.push(format!("{name}:*")),
                _ => {}
            }
        }
        Ok(result)
    }

    /// Every column of a collection, without relations
    pub fn columns_of(schema: &CollectionSchema) -> Projection {
        schema
            .fields
            .iter()
            .filter(|(_, f)| f.is_column())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Reproject records, keeping only the requested paths
    pub fn apply(&self, records: &[Record]) -> ToolkitResult<Vec<Record>> {
        records.iter().map(|record| self.reproject(record)).collect()
    }

    fn reproject(&self, record: &Record) -> ToolkitResult<Record> {
        let mut result = Record::new();
        for column in self.columns() {
            let value = record.get(column).ok_or_else(|| {
                ToolkitError::Projection(format!("The column '{column}' is missing in your record"))
            })?;
            result.insert(column.to_string(), value.clone());
        }

        for (relation, projection) in self.relations() {
            let value = match record.get(&relation) {
                Some(Value::Object(sub)) => Value::Object(projection.reproject(sub)?),
                _ => Value::Null,
            };
            result.insert(relation, value);
        }
        Ok(result)
    }
}

impl<S: Into<String>> FromIterator<S> for Projection {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        let mut projection = Projection::new();
        for path in iter {
            projection.push(path);
        }
        projection
    }
}

impl<S: Into<String>, const N: usize> From<[S; N]> for Projection {
    fn from(value: [S; N]) -> Self {
        value.into_iter().collect()
    }
}

impl From<Vec<String>> for Projection {
    fn from(value: Vec<String>) -> Self {
        value.into_iter().collect()
    }
}

impl std::fmt::Display for Projection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.paths.join(", "))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use trellis_core::schema::{ColumnSchema, ManyToOneSchema};
    use trellis_core::types::PrimitiveType;

    fn lookup() -> BTreeMap<String, Arc<CollectionSchema>> {
        let books = CollectionSchema::new()
            .with_field("id", ColumnSchema::primary_key(PrimitiveType::Number))
            .with_field("title", ColumnSchema::new(PrimitiveType::String))
            .with_field("author_id", ColumnSchema::new(PrimitiveType::Number))
            .with_field(
                "author",
                FieldSchema::ManyToOne(ManyToOneSchema {
                    foreign_collection: "authors".to_string(),
                    foreign_key: "author_id".to_string(),
                    foreign_key_target: "key".to_string(),
                }),
            );
        let authors = CollectionSchema::new()
            .with_field("key", ColumnSchema::primary_key(PrimitiveType::Number))
            .with_field("name", ColumnSchema::new(PrimitiveType::String));

        BTreeMap::from([
            ("books".to_string(), Arc::new(books)),
            ("authors".to_string(), Arc::new(authors)),
        ])
    }

    #[test]
    fn test_columns_and_relations() {
        let projection = Projection::from(["id", "author:name", "author:country:code", "title"]);
        assert_eq!(projection.columns(), vec!["id", "title"]);

        let relations = projection.relations();
        assert_eq!(relations.len(), 1);
        assert_eq!(
            relations["author"],
            Projection::from(["name", "country:code"])
        );
    }

    #[test]
    fn test_equality_ignores_order() {
        assert_eq!(Projection::from(["a", "b"]), Projection::from(["b", "a"]));
        assert_ne!(Projection::from(["a"]), Projection::from(["a", "b"]));
    }

    #[test]
    fn test_replace_and_union_dedupe() {
        let projection = Projection::from(["a", "b"]);
        let replaced = projection.replace(|p| {
            if p == "a" {
                vec!["x".to_string(), "y".to_string()]
            } else {
                vec!["x".to_string()]
            }
        });
        assert_eq!(replaced.iter().collect::<Vec<_>>(), vec!["x", "y"]);

        let union = replaced.union(&Projection::from(["y", "z"]));
        assert_eq!(union.iter().collect::<Vec<_>>(), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_nest_and_unnest() {
        let projection = Projection::from(["name", "country:code"]);
        let nested = projection.nest("author");
        assert_eq!(nested, Projection::from(["author:name", "author:country:code"]));
        assert_eq!(nested.unnest().unwrap(), projection);
        assert_eq!(projection.nest(""), projection);
    }

    #[test]
    fn test_unnest_rejects_mixed_prefixes() {
        assert!(Projection::from(["author:name", "title"]).unnest().is_err());
        assert!(Projection::from(["author:name", "editor:name"]).unnest().is_err());
        assert!(Projection::new().unnest().is_err());
    }

    #[test]
    fn test_with_pks() {
        let schemas = lookup();
        let projection = Projection::from(["title", "author:name"]);
        let with_pks = projection.with_pks(&schemas["books"], &schemas).unwrap();
        assert_eq!(
            with_pks,
            Projection::from(["title", "author:name", "id", "author:key"])
        );
    }

    #[test]
    fn test_all() {
        let schemas = lookup();
        let all = Projection::all(&schemas["books"], &schemas).unwrap();
        assert_eq!(
            all,
            Projection::from(["id", "title", "author_id", "author:key", "author:name"])
        );
    }

    #[test]
    fn test_apply_reprojects_records() {
        let records = vec![
            json!({ "id": 1, "title": "A", "author": { "key": 1, "name": "Ada" } }),
            json!({ "id": 2, "title": "B", "author": null }),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect::<Vec<_>>();

        let result = Projection::from(["title", "author:name"]).apply(&records).unwrap();
        assert_eq!(
            result.into_iter().map(Value::Object).collect::<Vec<_>>(),
            vec![
                json!({ "title": "A", "author": { "name": "Ada" } }),
                json!({ "title": "B", "author": null }),
            ]
        );
    }

    #[test]
    fn test_apply_missing_column_fails() {
        let record = json!({ "id": 1 }).as_object().cloned().unwrap();
        let err = Projection::from(["title"]).apply(&[record]).unwrap_err();
        assert!(matches!(err, ToolkitError::Projection(_)));
    }
}
