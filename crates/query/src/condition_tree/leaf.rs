//! Condition tree leaves: `field operator value`

use super::ConditionTree;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::RegexBuilder;
use serde_json::json;
use std::cmp::Ordering;
use trellis_core::records::get_field_value;
use trellis_core::types::{Operator, PATH_SEPARATOR, Record, Value, split_path};
use trellis_core::{ToolkitError, ToolkitResult};

/// A single comparison against a field
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionTreeLeaf {
    pub field: String,
    pub operator: Operator,
    /// `Value::Null` for unary operators
    pub value: Value,
}

impl ConditionTreeLeaf {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// A leaf for operators taking no value
    pub fn unary(field: impl Into<String>, operator: Operator) -> Self {
        Self::new(field, operator, Value::Null)
    }

    pub fn with_field(&self, field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            ..self.clone()
        }
    }

    pub fn with_operator(&self, operator: Operator) -> Self {
        Self {
            operator,
            ..self.clone()
        }
    }

    pub fn inverse(&self) -> ToolkitResult<ConditionTreeLeaf> {
        self.operator
            .negation()
            .map(|op| self.with_operator(op))
            .ok_or_else(|| {
                ToolkitError::ConditionTree(format!(
                    "Operator '{}' cannot be inverted.",
                    self.operator
                ))
            })
    }

    pub fn nest(&self, prefix: &str) -> ConditionTreeLeaf {
        if prefix.is_empty() {
            return self.clone();
        }
        self.with_field(format!("{prefix}{PATH_SEPARATOR}{}", self.field))
    }

    /// Strip the relation prefix of the field
    pub fn unnest(&self) -> ToolkitResult<ConditionTreeLeaf> {
        match split_path(&self.field) {
            Some((_, rest)) => Ok(self.with_field(rest)),
            None => Err(ToolkitError::ConditionTree(format!(
                "Cannot unnest condition tree: '{}' is not nested",
                self.field
            ))),
        }
    }

    /// Evaluate the leaf against an in-memory record
    pub fn matches(&self, record: &Record) -> ToolkitResult<bool> {
        let field_value = get_field_value(record, &self.field).unwrap_or(&Value::Null);
        let target = &self.value;

        let result = match self.operator {
            Operator::Present => !is_blank(field_value),
            Operator::Blank => is_blank(field_value),
            Operator::Missing => field_value.is_null(),
            Operator::Equal => loose_eq(field_value, target),
            Operator::NotEqual => !loose_eq(field_value, target),
            Operator::LessThan => compare(field_value, target) == Some(Ordering::Less),
            Operator::GreaterThan => compare(field_value, target) == Some(Ordering::Greater),
            Operator::Before => compare_dates(field_value, target) == Some(Ordering::Less),
            Operator::After => compare_dates(field_value, target) == Some(Ordering::Greater),
            Operator::In => as_list(target).iter().any(|v| loose_eq(field_value, v)),
            Operator::NotIn => !as_list(target).iter().any(|v| loose_eq(field_value, v)),
            Operator::Like => self.like(field_value, true)?,
            Operator::ILike => self.like(field_value, false)?,
            Operator::StartsWith => text_check(field_value, target, |f, t| f.starts_with(t)),
            Operator::EndsWith => text_check(field_value, target, |f, t| f.ends_with(t)),
            Operator::Contains => contains(field_value, target, true),
            Operator::NotContains => !contains(field_value, target, true),
            Operator::IContains => contains(field_value, target, false),
            Operator::LongerThan => length(field_value)
                .zip(target.as_u64())
                .is_some_and(|(len, limit)| len as u64 > limit),
            Operator::ShorterThan => length(field_value)
                .zip(target.as_u64())
                .is_some_and(|(len, limit)| (len as u64) < limit),
            Operator::IncludesAll => match field_value {
                Value::Array(values) => as_list(target)
                    .iter()
                    .all(|expected| values.iter().any(|v| loose_eq(v, expected))),
                _ => false,
            },
            op => {
                return Err(ToolkitError::ConditionTree(format!(
                    "Operator '{op}' cannot be evaluated in memory"
                )));
            }
        };
        Ok(result)
    }

    fn like(&self, field_value: &Value, case_sensitive: bool) -> ToolkitResult<bool> {
        let (Some(value), Some(pattern)) = (field_value.as_str(), self.value.as_str()) else {
            return Ok(false);
        };

        let mut expr = String::from("^");
        for c in pattern.chars() {
            match c {
                '%' => expr.push_str(".*"),
                '_' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        let re = RegexBuilder::new(&expr)
            .case_insensitive(!case_sensitive)
            .dot_matches_new_line(true)
            .build()
            .map_err(|e| ToolkitError::ConditionTree(format!("Invalid like pattern: {e}")))?;
        Ok(re.is_match(value))
    }

    pub fn to_plain_object(&self) -> Value {
        json!({
            "field": self.field,
            "operator": self.operator.as_str(),
            "value": self.value,
        })
    }
}

impl From<ConditionTreeLeaf> for ConditionTree {
    fn from(value: ConditionTreeLeaf) -> Self {
        ConditionTree::Leaf(value)
    }
}

impl std::fmt::Display for ConditionTreeLeaf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.value.is_null() {
            write!(f, "{} {}", self.field, self.operator)
        } else {
            write!(f, "{} {} {}", self.field, self.operator, self.value)
        }
    }
}

// ============================================================================
// Value comparison helpers
// ============================================================================

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn as_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values.clone(),
        Value::Null => vec![],
        other => vec![other.clone()],
    }
}

/// Equality where `1` and `1.0` are the same number
fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.naive_utc())
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d").map(|d| d.and_time(Default::default())))
        .ok()
}

fn compare_dates(left: &Value, right: &Value) -> Option<Ordering> {
    match (left.as_str().and_then(parse_timestamp), right.as_str().and_then(parse_timestamp)) {
        (Some(a), Some(b)) => Some(a.cmp(&b)),
        _ => compare(left, right),
    }
}

fn text_check(value: &Value, target: &Value, check: impl Fn(&str, &str) -> bool) -> bool {
    match (value.as_str(), target.as_str()) {
        (Some(v), Some(t)) => check(v, t),
        _ => false,
    }
}

fn contains(value: &Value, target: &Value, case_sensitive: bool) -> bool {
    match value {
        Value::Array(values) => values.iter().any(|v| loose_eq(v, target)),
        Value::String(v) => match target.as_str() {
            Some(t) if case_sensitive => v.contains(t),
            Some(t) => v.to_lowercase().contains(&t.to_lowercase()),
            None => false,
        },
        _ => false,
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(values) => Some(values.len()),
        _ => None,
    }
}

// ============================================================================
// Tests
// ============================================================================
