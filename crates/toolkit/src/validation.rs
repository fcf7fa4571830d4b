//! Schema graph validation
//!
//! Checks the outermost schema of a stack once every customization is
//! registered, so a relation pointing nowhere or a duplicated segment is
//! reported at startup rather than on the first request that touches it.

use crate::interfaces::Datasource;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use trellis_core::schema::{CollectionSchema, DatasourceSchema, FieldSchema};
use trellis_core::{ResultExt, ToolkitError, ToolkitResult};

// ============================================================================
// SchemaGraph
// ============================================================================

/// Snapshot of every collection schema of a datasource
#[derive(Debug, Clone, Default)]
pub struct SchemaGraph {
    pub collections: BTreeMap<String, Arc<CollectionSchema>>,
    pub datasource: DatasourceSchema,
}

impl SchemaGraph {
    pub fn snapshot(datasource: &dyn Datasource) -> ToolkitResult<Self> {
        let mut collections = BTreeMap::new();
        for collection in datasource.collections() {
            let name = collection.name();
            let schema = collection
                .schema()
                .with_context(format!("Reading the schema of '{name}'"))?;
            collections.insert(name, schema);
        }
        Ok(Self {
            collections,
            datasource: datasource.schema()?,
        })
    }

    fn has_field(&self, collection: &str, field: &str) -> bool {
        self.collections
            .get(collection)
            .is_some_and(|schema| schema.fields.contains_key(field))
    }
}

// ============================================================================
// ValidationResult
// ============================================================================

/// Result of a validation operation
#[derive(Debug, Clone)]
pub struct ValidationResult {
    /// Whether the validation passed
    pub valid: bool,

    /// List of errors (empty if valid)
    pub errors: Vec<ValidationError>,

    /// List of warnings (non-fatal issues)
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Merge another validation result into this one
    pub fn merge(&mut self, other: ValidationResult) {
        if !other.valid {
            self.valid = false;
        }
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    /// Fails with every error message joined
    pub fn to_result(self) -> ToolkitResult<()> {
        if self.valid {
            Ok(())
        } else {
            let msg = self
                .errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Err(ToolkitError::InvalidSchema(msg))
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::ok()
    }
}

// ============================================================================
// ValidationError / ValidationWarning
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorCode {
    MissingCollection,
    MissingField,
    DuplicateSegment,
    DuplicateChart,
    EmptyName,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub code: ValidationErrorCode,
    pub message: String,
    /// Location of the problem, e.g. `Book.author`
    pub path: Option<String>,
}

impl ValidationError {
    pub fn new(code: ValidationErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "[{}] {}", path, self.message)
        } else {
            write!(f, "{}", self.message)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationWarningCode {
    NoPrimaryKey,
    NoFields,
}

#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub code: ValidationWarningCode,
    pub message: String,
    pub path: Option<String>,
}

impl ValidationWarning {
    pub fn new(code: ValidationWarningCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(path) = &self.path {
            write!(f, "[{}] Warning: {}", path, self.message)
        } else {
            write!(f, "Warning: {}", self.message)
        }
    }
}

// ============================================================================
// ValidationRule / Validator
// ============================================================================

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, graph: &SchemaGraph) -> ValidationResult;
}

#[derive(Default)]
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_default_rules() -> Self {
        let mut validator = Self::new();
        validator.add_rule(Box::new(PrimaryKeysRule));
        validator.add_rule(Box::new(RelationsRule));
        validator.add_rule(Box::new(NamesRule));
        validator
    }

    pub fn add_rule(&mut self, rule: Box<dyn ValidationRule>) {
        self.rules.push(rule);
    }

    pub fn validate(&self, graph: &SchemaGraph) -> ValidationResult {
        let mut result = ValidationResult::ok();
        for rule in &self.rules {
            let rule_result = rule.validate(graph);
            if rule_result.has_errors() {
                tracing::debug!("Rule '{}' found {} error(s)", rule.name(), rule_result.errors.len());
            }
            result.merge(rule_result);
        }
        result
    }
}

// ============================================================================
// Built-in rules
// ============================================================================

/// Collections without fields or primary key cannot be browsed record by record
pub struct PrimaryKeysRule;

impl ValidationRule for PrimaryKeysRule {
    fn name(&self) -> &'static str {
        "primary_keys"
    }

    fn validate(&self, graph: &SchemaGraph) -> ValidationResult {
        let mut result = ValidationResult::ok();
        for (name, schema) in &graph.collections {
            if schema.fields.is_empty() {
                result.add_warning(
                    ValidationWarning::new(ValidationWarningCode::NoFields, format!("'{name}' has no field"))
                        .with_path(name),
                );
            } else if schema.primary_keys().is_empty() {
                result.add_warning(
                    ValidationWarning::new(
                        ValidationWarningCode::NoPrimaryKey,
                        format!("'{name}' has no primary key"),
                    )
                    .with_path(name),
                );
            }
        }
        result
    }
}

/// Relations must point to existing collections and keys
pub struct RelationsRule;

impl RelationsRule {
    fn expect_collection(graph: &SchemaGraph, path: &str, collection: &str, result: &mut ValidationResult) -> bool {
        if graph.collections.contains_key(collection) {
            return true;
        }
        result.add_error(
            ValidationError::new(
                ValidationErrorCode::MissingCollection,
                format!("targets the unknown collection '{collection}'"),
            )
            .with_path(path),
        );
        false
    }

    fn expect_field(graph: &SchemaGraph, path: &str, collection: &str, field: &str, result: &mut ValidationResult) {
        if !graph.has_field(collection, field) {
            result.add_error(
                ValidationError::new(
                    ValidationErrorCode::MissingField,
                    format!("uses '{collection}.{field}' which does not exist"),
                )
                .with_path(path),
            );
        }
    }
}

impl ValidationRule for RelationsRule {
    fn name(&self) -> &'static str {
        "relations"
    }

    fn validate(&self, graph: &SchemaGraph) -> ValidationResult {
        let mut result = ValidationResult::ok();
        for (name, schema) in &graph.collections {
            for (field_name, field) in &schema.fields {
                let path = format!("{name}.{field_name}");
                match field {
                    FieldSchema::Column(_) => {}
                    FieldSchema::ManyToOne(relation) => {
                        Self::expect_field(graph, &path, name, &relation.foreign_key, &mut result);
                        if Self::expect_collection(graph, &path, &relation.foreign_collection, &mut result) {
                            let foreign = relation.foreign_collection.as_str();
                            Self::expect_field(graph, &path, foreign, &relation.foreign_key_target, &mut result);
                        }
                    }
                    FieldSchema::OneToOne(_) | FieldSchema::OneToMany(_) => {
                        let (foreign, origin_key, origin_key_target) = match field {
                            FieldSchema::OneToOne(r) => (&r.foreign_collection, &r.origin_key, &r.origin_key_target),
                            FieldSchema::OneToMany(r) => (&r.foreign_collection, &r.origin_key, &r.origin_key_target),
                            _ => continue,
                        };
                        Self::expect_field(graph, &path, name, origin_key_target, &mut result);
                        if Self::expect_collection(graph, &path, foreign, &mut result) {
                            Self::expect_field(graph, &path, foreign, origin_key, &mut result);
                        }
                    }
                    FieldSchema::ManyToMany(relation) => {
                        Self::expect_field(graph, &path, name, &relation.origin_key_target, &mut result);
                        if Self::expect_collection(graph, &path, &relation.foreign_collection, &mut result) {
                            let foreign = relation.foreign_collection.as_str();
                            Self::expect_field(graph, &path, foreign, &relation.foreign_key_target, &mut result);
                        }
                        if Self::expect_collection(graph, &path, &relation.through_collection, &mut result) {
                            let through = relation.through_collection.as_str();
                            Self::expect_field(graph, &path, through, &relation.foreign_key, &mut result);
                            Self::expect_field(graph, &path, through, &relation.origin_key, &mut result);
                        }
                    }
                    FieldSchema::PolymorphicManyToOne(relation) => {
                        Self::expect_field(graph, &path, name, &relation.foreign_key, &mut result);
                        Self::expect_field(graph, &path, name, &relation.foreign_key_type_field, &mut result);
                        for foreign in &relation.foreign_collections {
                            Self::expect_collection(graph, &path, foreign, &mut result);
                        }
                    }
                    FieldSchema::PolymorphicOneToOne(relation) | FieldSchema::PolymorphicOneToMany(relation) => {
                        Self::expect_field(graph, &path, name, &relation.origin_key_target, &mut result);
                        if Self::expect_collection(graph, &path, &relation.foreign_collection, &mut result) {
                            let foreign = relation.foreign_collection.as_str();
                            Self::expect_field(graph, &path, foreign, &relation.origin_key, &mut result);
                            Self::expect_field(graph, &path, foreign, &relation.origin_type_field, &mut result);
                        }
                    }
                }
            }
        }
        result
    }
}

/// Segment, action and chart names must be non-empty and unique
pub struct NamesRule;

impl NamesRule {
    fn check_unique(
        names: &[String],
        kind: &str,
        code: ValidationErrorCode,
        path: &str,
        result: &mut ValidationResult,
    ) {
        let mut seen = HashSet::new();
        for name in names {
            if name.is_empty() {
                result.add_error(
                    ValidationError::new(ValidationErrorCode::EmptyName, format!("a {kind} has an empty name"))
                        .with_path(path),
                );
            } else if !seen.insert(name) {
                result.add_error(
                    ValidationError::new(code, format!("the {kind} '{name}' is defined twice")).with_path(path),
                );
            }
        }
    }
}

impl ValidationRule for NamesRule {
    fn name(&self) -> &'static str {
        "names"
    }

    fn validate(&self, graph: &SchemaGraph) -> ValidationResult {
        let mut result = ValidationResult::ok();
        for (name, schema) in &graph.collections {
            Self::check_unique(&schema.segments, "segment", ValidationErrorCode::DuplicateSegment, name, &mut result);
            Self::check_unique(&schema.charts, "chart", ValidationErrorCode::DuplicateChart, name, &mut result);
            if schema.actions.contains_key("") {
                result.add_error(
                    ValidationError::new(ValidationErrorCode::EmptyName, "an action has an empty name").with_path(name),
                );
            }
        }
        Self::check_unique(
            &graph.datasource.charts,
            "chart",
            ValidationErrorCode::DuplicateChart,
            "datasource",
            &mut result,
        );
        result
    }
}

// ============================================================================
// Tests
// ============================================================================
