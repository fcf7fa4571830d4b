//! Sort clauses

use crate::projection::Projection;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use trellis_core::records::get_field_value;
use trellis_core::types::{PATH_SEPARATOR, Record, Value, split_path};
use trellis_core::{ToolkitError, ToolkitResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortClause {
    pub field: String,
    pub ascending: bool,
}

impl SortClause {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: true,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ascending: false,
        }
    }
}

/// Ordered list of sort clauses, the first one being the most significant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Sort {
    pub clauses: Vec<SortClause>,
}

impl Sort {
    pub fn new(clauses: Vec<SortClause>) -> Self {
        Self { clauses }
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Fields read by the sort
    pub fn projection(&self) -> Projection {
        self.clauses.iter().map(|c| c.field.clone()).collect()
    }

    /// Rewrite each clause into zero or more clauses
    pub fn replace_clauses<F>(&self, mut handler: F) -> ToolkitResult<Sort>
    where
        F: FnMut(&SortClause) -> ToolkitResult<Vec<SortClause>>,
    {
        let mut clauses = Vec::with_capacity(self.clauses.len());
        for clause in &self.clauses {
            clauses.extend(handler(clause)?);
        }
        Ok(Sort::new(clauses))
    }

    pub fn nest(&self, prefix: &str) -> Sort {
        if prefix.is_empty() {
            return self.clone();
        }
        Sort::new(
            self.clauses
                .iter()
                .map(|c| SortClause {
                    field: format!("{prefix}{PATH_SEPARATOR}{}", c.field),
                    ascending: c.ascending,
                })
                .collect(),
        )
    }

    pub fn unnest(&self) -> ToolkitResult<Sort> {
        let prefix = self
            .clauses
            .first()
            .and_then(|c| split_path(&c.field))
            .map(|(prefix, _)| prefix.to_string())
            .ok_or_else(|| ToolkitError::Sort("Cannot unnest sort".to_string()))?;

        self.replace_clauses(|clause| match split_path(&clause.field) {
            Some((p, rest)) if p == prefix => Ok(vec![SortClause {
                field: rest.to_string(),
                ascending: clause.ascending,
            }]),
            _ => Err(ToolkitError::Sort("Cannot unnest sort".to_string())),
        })
    }

    pub fn inverse(&self) -> Sort {
        Sort::new(
            self.clauses
                .iter()
                .map(|c| SortClause {
                    field: c.field.clone(),
                    ascending: !c.ascending,
                })
                .collect(),
        )
    }

    /// Sort records in memory
    pub fn apply(&self, mut records: Vec<Record>) -> Vec<Record> {
        records.sort_by(|a, b| {
            for clause in &self.clauses {
                let left = get_field_value(a, &clause.field).unwrap_or(&Value::Null);
                let right = get_field_value(b, &clause.field).unwrap_or(&Value::Null);
                let ordering = compare_values(left, right);
                let ordering = if clause.ascending {
                    ordering
                } else {
                    ordering.reverse()
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
        records
    }
}

impl From<Vec<SortClause>> for Sort {
    fn from(value: Vec<SortClause>) -> Self {
        Sort::new(value)
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// Total order over JSON values; nulls first, then by type
pub fn compare_values(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Number(a), Value::Number(b)) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(a), Value::String(b)) => a.cmp(b),
        _ => type_rank(left).cmp(&type_rank(right)),
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

    fn records() -> Vec<Record> {
        vec![
            json!({ "id": 1, "name": "b", "author": { "age": 30 } }),
            json!({ "id": 2, "name": "a", "author": { "age": 30 } }),
            json!({ "id": 3, "name": "c", "author": null }),
        ]
        .into_iter()
        .map(|v| v.as_object().cloned().unwrap())
        .collect()
    }

    fn ids(records: &[Record]) -> Vec<i64> {
        records.iter().map(|r| r["id"].as_i64().unwrap()).collect()
    }

    #[test]
    fn test_apply_multiple_clauses() {
        let sort = Sort::new(vec![SortClause::desc("author:age"), SortClause::asc("name")]);
        assert_eq!(ids(&sort.apply(records())), vec![2, 1, 3]);
        assert_eq!(ids(&sort.inverse().apply(records())), vec![3, 1, 2]);
    }

    #[test]
    fn test_nest_and_unnest() {
        let sort = Sort::new(vec![SortClause::asc("age"), SortClause::desc("name")]);
        let nested = sort.nest("author");
        assert_eq!(nested.projection(), Projection::from(["author:age", "author:name"]));
        assert_eq!(nested.unnest().unwrap(), sort);
        assert!(sort.unnest().is_err());
    }

    #[test]
    fn test_replace_clauses() {
        let sort = Sort::new(vec![SortClause::asc("full_name")]);
        let replaced = sort
            .replace_clauses(|c| {
                Ok(vec![
                    SortClause { field: "first_name".to_string(), ascending: c.ascending },
                    SortClause { field: "last_name".to_string(), ascending: c.ascending },
                ])
            })
            .unwrap();
        assert_eq!(replaced.projection(), Projection::from(["first_name", "last_name"]));
    }

    #[test]
    fn test_compare_values_puts_nulls_first() {
        assert_eq!(compare_values(&Value::Null, &json!(1)), Ordering::Less);
        assert_eq!(compare_values(&json!(2), &json!(1.5)), Ordering::Greater);
        assert_eq!(compare_values(&json!("a"), &json!("a")), Ordering::Equal);
    }
}
