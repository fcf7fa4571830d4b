//! Record helpers
//!
//! Records are JSON maps; relation values are nested maps (or `null` when
//! there is no related record). These helpers read and write values along
//! `relation:field` paths.

use crate::error::{ToolkitError, ToolkitResult};
use crate::schema::CollectionSchema;
use crate::types::{Record, Value, split_path};

/// Composite identifier of a record, one value per primary key
pub type CompositeId = Vec<Value>;

/// Read a value along a path, returning `None` when any segment is missing
pub fn get_field_value<'a>(record: &'a Record, path: &str) -> Option<&'a Value> {
    match split_path(path) {
        None => record.get(path),
        Some((relation, rest)) => match record.get(relation)? {
            Value::Object(sub) => get_field_value(sub, rest),
            _ => None,
        },
    }
}

/// Write a value along a path, creating intermediate records as needed
pub fn set_field_value(record: &mut Record, path: &str, value: Value) {
    match split_path(path) {
        None => {
            record.insert(path.to_string(), value);
        }
        Some((relation, rest)) => {
            let entry = record
                .entry(relation.to_string())
                .or_insert_with(|| Value::Object(Record::new()));
            if !entry.is_object() {
                *entry = Value::Object(Record::new());
            }
            if let Value::Object(sub) = entry {
                set_field_value(sub, rest, value);
            }
        }
    }
}

/// Extract the primary key values of a record
pub fn get_primary_key(schema: &CollectionSchema, record: &Record) -> ToolkitResult<CompositeId> {
    let pks = schema.primary_keys();
    if pks.is_empty() {
        return Err(ToolkitError::Record(
            "Collection has no primary key".to_string(),
        ));
    }

    pks.iter()
        .map(|pk| match record.get(pk) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(ToolkitError::Record(format!(
                "Missing value for primary key '{pk}'"
            ))),
        })
        .collect()
}

/// Build a record from a JSON value, failing if it is not an object
pub fn as_record(value: Value) -> ToolkitResult<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ToolkitError::Record(format!(
            "Expected an object, got {other}"
        ))),
    }
}

// ============================================================================
// Tests
// ============================================================================
