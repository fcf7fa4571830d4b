//! Schema model
//!
//! Describes what a collection exposes: its fields (columns and relations),
//! actions, segments and charts. Schemas are plain values; decorators build a
//! refined copy of their child's schema and share it behind an `Arc`.

use crate::error::{ToolkitError, ToolkitResult};
use crate::types::{ColumnType, Operator, PrimitiveType, Value, split_path};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

// ============================================================================
// Columns
// ============================================================================

/// A validation rule attached to a column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnValidation {
    pub operator: Operator,
    pub value: Option<Value>,
}

/// Schema of a stored (or computed) column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub column_type: ColumnType,
    pub filter_operators: BTreeSet<Operator>,
    pub default_value: Option<Value>,
    pub enum_values: Option<Vec<String>>,
    pub is_primary_key: bool,
    pub is_read_only: bool,
    pub is_sortable: bool,
    pub validations: Vec<ColumnValidation>,
}

impl ColumnSchema {
    /// Create a column with no operators and no constraint
    pub fn new(column_type: impl Into<ColumnType>) -> Self {
        Self {
            column_type: column_type.into(),
            filter_operators: BTreeSet::new(),
            default_value: None,
            enum_values: None,
            is_primary_key: false,
            is_read_only: false,
            is_sortable: false,
            validations: Vec::new(),
        }
    }

    /// Create a primary key column filterable by equality
    pub fn primary_key(ty: PrimitiveType) -> Self {
        Self::new(ty)
            .with_primary_key()
            .with_operators([Operator::Equal, Operator::In])
            .sortable()
    }

    pub fn with_primary_key(mut self) -> Self {
        self.is_primary_key = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.is_read_only = true;
        self
    }

    pub fn sortable(mut self) -> Self {
        self.is_sortable = true;
        self
    }

    pub fn with_operators(mut self, operators: impl IntoIterator<Item = Operator>) -> Self {
        self.filter_operators.extend(operators);
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_enum_values(mut self, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.enum_values = Some(values.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_validation(mut self, operator: Operator, value: Option<Value>) -> Self {
        self.validations.push(ColumnValidation { operator, value });
        self
    }
}

// ============================================================================
// Relations
// ============================================================================

/// Many records of this collection point to one record of the foreign collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManyToOneSchema {
    pub foreign_collection: String,
    pub foreign_key: String,
    pub foreign_key_target: String,
}

/// One record of the foreign collection points to this record through `origin_key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneToOneSchema {
    pub foreign_collection: String,
    pub origin_key: String,
    pub origin_key_target: String,
}

/// Many records of the foreign collection point to this record through `origin_key`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneToManySchema {
    pub foreign_collection: String,
    pub origin_key: String,
    pub origin_key_target: String,
}

/// Join through an intermediary collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManyToManySchema {
    pub foreign_collection: String,
    pub through_collection: String,
    pub foreign_key: String,
    pub foreign_key_target: String,
    pub origin_key: String,
    pub origin_key_target: String,
    pub foreign_relation: Option<String>,
}

/// Many-to-one whose target collection is stored per record in `foreign_key_type_field`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolymorphicManyToOneSchema {
    pub foreign_collections: Vec<String>,
    pub foreign_key: String,
    pub foreign_key_type_field: String,
    /// Target key on each candidate collection
    pub foreign_key_targets: BTreeMap<String, String>,
}

/// Inverse side of a polymorphic many-to-one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolymorphicOneToSchema {
    pub foreign_collection: String,
    pub origin_key: String,
    pub origin_key_target: String,
    pub origin_type_field: String,
    pub origin_type_value: String,
}

// ============================================================================
// Fields
// ============================================================================

/// A field of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FieldSchema {
    Column(ColumnSchema),
    ManyToOne(ManyToOneSchema),
    OneToOne(OneToOneSchema),
    OneToMany(OneToManySchema),
    ManyToMany(ManyToManySchema),
    PolymorphicManyToOne(PolymorphicManyToOneSchema),
    PolymorphicOneToOne(PolymorphicOneToSchema),
    PolymorphicOneToMany(PolymorphicOneToSchema),
}

impl FieldSchema {
    pub fn as_column(&self) -> Option<&ColumnSchema> {
        match self {
            FieldSchema::Column(column) => Some(column),
            _ => None,
        }
    }

    pub fn as_column_mut(&mut self) -> Option<&mut ColumnSchema> {
        match self {
            FieldSchema::Column(column) => Some(column),
            _ => None,
        }
    }

    pub fn is_column(&self) -> bool {
        matches!(self, FieldSchema::Column(_))
    }

    pub fn is_relation(&self) -> bool {
        !self.is_column()
    }

    /// Relations pointing to at most one record (can be traversed by a path)
    pub fn is_single_relation(&self) -> bool {
        matches!(
            self,
            FieldSchema::ManyToOne(_)
                | FieldSchema::OneToOne(_)
                | FieldSchema::PolymorphicManyToOne(_)
                | FieldSchema::PolymorphicOneToOne(_)
        )
    }

    pub fn is_polymorphic(&self) -> bool {
        matches!(
            self,
            FieldSchema::PolymorphicManyToOne(_)
                | FieldSchema::PolymorphicOneToOne(_)
                | FieldSchema::PolymorphicOneToMany(_)
        )
    }

    /// Target collection of a non polymorphic-many-to-one relation
    pub fn foreign_collection(&self) -> Option<&str> {
        match self {
            FieldSchema::ManyToOne(r) => Some(&r.foreign_collection),
            FieldSchema::OneToOne(r) => Some(&r.foreign_collection),
            FieldSchema::OneToMany(r) => Some(&r.foreign_collection),
            FieldSchema::ManyToMany(r) => Some(&r.foreign_collection),
            FieldSchema::PolymorphicOneToOne(r) | FieldSchema::PolymorphicOneToMany(r) => {
                Some(&r.foreign_collection)
            }
            FieldSchema::Column(_) | FieldSchema::PolymorphicManyToOne(_) => None,
        }
    }

    /// Every collection this field refers to
    pub fn referenced_collections(&self) -> Vec<&str> {
        match self {
            FieldSchema::Column(_) => vec![],
            FieldSchema::ManyToMany(r) => {
                vec![r.foreign_collection.as_str(), r.through_collection.as_str()]
            }
            FieldSchema::PolymorphicManyToOne(r) => {
                r.foreign_collections.iter().map(String::as_str).collect()
            }
            other => other.foreign_collection().into_iter().collect(),
        }
    }

    /// Short type tag, as displayed in errors
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldSchema::Column(_) => "Column",
            FieldSchema::ManyToOne(_) => "ManyToOne",
            FieldSchema::OneToOne(_) => "OneToOne",
            FieldSchema::OneToMany(_) => "OneToMany",
            FieldSchema::ManyToMany(_) => "ManyToMany",
            FieldSchema::PolymorphicManyToOne(_) => "PolymorphicManyToOne",
            FieldSchema::PolymorphicOneToOne(_) => "PolymorphicOneToOne",
            FieldSchema::PolymorphicOneToMany(_) => "PolymorphicOneToMany",
        }
    }
}

impl From<ColumnSchema> for FieldSchema {
    fn from(value: ColumnSchema) -> Self {
        FieldSchema::Column(value)
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Number of records an action applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionScope {
    Single,
    Bulk,
    Global,
}

/// Schema of an action as exposed to the frontend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSchema {
    pub scope: ActionScope,
    pub generate_file: bool,
    /// The form does not depend on the records or on the data entered so far
    pub static_form: bool,
}

// ============================================================================
// Collection and Datasource Schemas
// ============================================================================

/// Schema of a collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub fields: BTreeMap<String, FieldSchema>,
    pub actions: BTreeMap<String, ActionSchema>,
    pub segments: Vec<String>,
    pub charts: Vec<String>,
    pub searchable: bool,
    pub countable: bool,
}

impl Default for CollectionSchema {
    fn default() -> Self {
        Self {
            fields: BTreeMap::new(),
            actions: BTreeMap::new(),
            segments: Vec::new(),
            charts: Vec::new(),
            searchable: false,
            countable: true,
        }
    }
}

impl CollectionSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add a field
    pub fn with_field(mut self, name: impl Into<String>, field: impl Into<FieldSchema>) -> Self {
        self.fields.insert(name.into(), field.into());
        self
    }

    pub fn searchable(mut self) -> Self {
        self.searchable = true;
        self
    }

    /// Names of the primary key columns, in field order
    pub fn primary_keys(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(_, f)| f.as_column().is_some_and(|c| c.is_primary_key))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Get a field, failing with a not-found error naming `collection`
    pub fn field(&self, collection: &str, name: &str) -> ToolkitResult<&FieldSchema> {
        self.fields
            .get(name)
            .ok_or_else(|| ToolkitError::field_not_found(collection, name))
    }

    /// Get a column, failing if the field is missing or is a relation
    pub fn column(&self, collection: &str, name: &str) -> ToolkitResult<&ColumnSchema> {
        match self.field(collection, name)? {
            FieldSchema::Column(column) => Ok(column),
            other => Err(ToolkitError::InvalidSchema(format!(
                "'{collection}.{name}' is a {} and not a column",
                other.type_name()
            ))),
        }
    }

    /// Check that the first segment of `path` names a field of this schema
    pub fn has_path_root(&self, path: &str) -> bool {
        let root = split_path(path).map(|(prefix, _)| prefix).unwrap_or(path);
        self.fields.contains_key(root)
    }
}

/// Schema of a datasource
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasourceSchema {
    pub charts: Vec<String>,
    pub native_query_connections: Vec<String>,
}

/// Resolves the schema of a sibling collection by name
///
/// Query primitives that walk relations (primary key completion, projection
/// expansion) use this to reach the foreign collections.
pub trait SchemaLookup {
    fn collection_schema(&self, name: &str) -> ToolkitResult<Arc<CollectionSchema>>;
}

impl SchemaLookup for BTreeMap<String, Arc<CollectionSchema>> {
    fn collection_schema(&self, name: &str) -> ToolkitResult<Arc<CollectionSchema>> {
        self.get(name)
            .cloned()
            .ok_or_else(|| ToolkitError::collection_not_found(name, self.keys()))
    }
}

// ============================================================================
// Tests
// ============================================================================
