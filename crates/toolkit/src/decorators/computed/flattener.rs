//! Row-major / column-major conversion of records
//!
//! Computed values are produced one field at a time, so records are turned
//! into one column of values per path, and back.

use trellis_core::records::get_field_value;
use trellis_core::types::{PATH_SEPARATOR, Record, Value};
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::Projection;

/// One column of values per path, all of the same length
pub type FlatColumns = Vec<Vec<Value>>;

/// Read every path of every record; missing values become `null`
pub fn flatten<'a>(records: &[Record], paths: impl IntoIterator<Item = &'a str>) -> FlatColumns {
    paths
        .into_iter()
        .map(|path| {
            records
                .iter()
                .map(|record| get_field_value(record, path).cloned().unwrap_or(Value::Null))
                .collect()
        })
        .collect()
}

/// Rebuild records from columns laid out in the order of `projection`
///
/// Nested records whose values are all `null` collapse to `null`; top-level
/// records are always kept.
pub fn unflatten(columns: &[Vec<Value>], projection: &Projection) -> ToolkitResult<Vec<Record>> {
    let paths: Vec<&str> = projection.iter().collect();
    if columns.len() != paths.len() {
        return Err(ToolkitError::Computed(format!(
            "Expected {} columns to rebuild records, got {}",
            paths.len(),
            columns.len()
        )));
    }
    let count = columns.first().map_or(0, Vec::len);
    if columns.iter().any(|column| column.len() != count) {
        return Err(ToolkitError::Computed("Flattened columns have different lengths".to_string()));
    }

    let mut records = vec![Record::new(); count];
    for column in projection.columns() {
        let index = position(&paths, column)?;
        for (record, value) in records.iter_mut().zip(&columns[index]) {
            record.insert(column.to_string(), value.clone());
        }
    }

    for (relation, sub_projection) in projection.relations() {
        let sub_columns = sub_projection
            .iter()
            .map(|path| {
                let index = position(&paths, &format!("{relation}{PATH_SEPARATOR}{path}"))?;
                Ok(columns[index].clone())
            })
            .collect::<ToolkitResult<FlatColumns>>()?;

        for (record, nested) in records.iter_mut().zip(unflatten_optional(&sub_columns, &sub_projection)?) {
            record.insert(relation.clone(), nested.map_or(Value::Null, Value::Object));
        }
    }
    Ok(records)
}

/// Like [`unflatten`], with all-null records collapsed to `None`
pub fn unflatten_optional(columns: &[Vec<Value>], projection: &Projection) -> ToolkitResult<Vec<Option<Record>>> {
    Ok(unflatten(columns, projection)?
        .into_iter()
        .map(|record| (!record.values().all(Value::is_null)).then_some(record))
        .collect())
}

fn position(paths: &[&str], path: &str) -> ToolkitResult<usize> {
    paths
        .iter()
        .position(|p| *p == path)
        .ok_or_else(|| ToolkitError::Computed(format!("No flattened column for '{path}'")))
}
