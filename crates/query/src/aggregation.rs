//! Aggregations
//!
//! `Count`, `Sum`, `Avg`, `Max` and `Min` over an optional field, grouped by
//! zero or more fields. Date groups are truncated to the year, month, ISO week
//! or day before grouping.

use crate::projection::Projection;
use crate::sort::compare_values;
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use trellis_core::records::get_field_value;
use trellis_core::types::{PATH_SEPARATOR, Record, Value};
use trellis_core::{ToolkitError, ToolkitResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregateOperation {
    Count,
    Sum,
    Avg,
    Max,
    Min,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DateOperation {
    Year,
    Month,
    Week,
    Day,
}

impl DateOperation {
    /// Truncate an ISO date or datetime to the start of its period
    pub fn truncate(&self, value: &str) -> ToolkitResult<String> {
        let date_part = value.get(..10).unwrap_or(value);
        let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").map_err(|e| {
            ToolkitError::Aggregation(format!("Cannot group '{value}' by date: {e}"))
        })?;

        let truncated = match self {
            DateOperation::Year => date.with_day(1).and_then(|d| d.with_month(1)),
            DateOperation::Month => date.with_day(1),
            DateOperation::Week => {
                Some(date - Duration::days(date.weekday().num_days_from_monday() as i64))
            }
            DateOperation::Day => Some(date),
        };
        truncated
            .map(|d| d.format("%Y-%m-%d").to_string())
            .ok_or_else(|| ToolkitError::Aggregation(format!("Cannot group '{value}' by date")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationGroup {
    pub field: String,
    pub operation: Option<DateOperation>,
}

impl AggregationGroup {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operation: None,
        }
    }

    pub fn by_date(field: impl Into<String>, operation: DateOperation) -> Self {
        Self {
            field: field.into(),
            operation: Some(operation),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    pub operation: AggregateOperation,
    pub field: Option<String>,
    pub groups: Vec<AggregationGroup>,
}

/// One row of an aggregation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    pub value: Value,
    pub group: Record,
}

#[derive(Default)]
struct Summary {
    group: Record,
    start_count: u64,
    count: u64,
    sum: f64,
    min: Option<Value>,
    max: Option<Value>,
}

impl Aggregation {
    pub fn new(operation: AggregateOperation, field: Option<String>) -> Self {
        Self {
            operation,
            field,
            groups: Vec::new(),
        }
    }

    /// `Count` of all records
    pub fn count() -> Self {
        Self::new(AggregateOperation::Count, None)
    }

    pub fn with_group(mut self, group: AggregationGroup) -> Self {
        self.groups.push(group);
        self
    }

    /// Fields read by the aggregation
    pub fn projection(&self) -> Projection {
        self.field
            .iter()
            .cloned()
            .chain(self.groups.iter().map(|g| g.field.clone()))
            .collect()
    }

    /// Rename the aggregated field and every group field
    pub fn replace_fields<F>(&self, mut handler: F) -> ToolkitResult<Aggregation>
    where
        F: FnMut(&str) -> ToolkitResult<String>,
    {
        let field = self.field.as_deref().map(&mut handler).transpose()?;
        let groups = self
            .groups
            .iter()
            .map(|g| {
                Ok(AggregationGroup {
                    field: handler(&g.field)?,
                    operation: g.operation,
                })
            })
            .collect::<ToolkitResult<Vec<_>>>()?;
        Ok(Aggregation {
            operation: self.operation,
            field,
            groups,
        })
    }

    pub fn nest(&self, prefix: &str) -> Aggregation {
        if prefix.is_empty() {
            return self.clone();
        }
        Aggregation {
            operation: self.operation,
            field: self.field.as_ref().map(|f| format!("{prefix}{PATH_SEPARATOR}{f}")),
            groups: self
                .groups
                .iter()
                .map(|g| AggregationGroup {
                    field: format!("{prefix}{PATH_SEPARATOR}{}", g.field),
                    operation: g.operation,
                })
                .collect(),
        }
    }

    /// Aggregate records in memory, sorted by value
    pub fn apply(&self, records: &[Record], limit: Option<usize>) -> ToolkitResult<Vec<AggregateResult>> {
        let mut order: Vec<String> = Vec::new();
        let mut summaries: HashMap<String, Summary> = HashMap::new();

        for record in records {
            let group = self.create_group(record)?;
            let key = serde_json::to_string(&group)?;
            let summary = summaries.entry(key.clone()).or_insert_with(|| {
                order.push(key);
                Summary {
                    group,
                    ..Default::default()
                }
            });
            self.update_summary(summary, record);
        }

        let mut rows: Vec<AggregateResult> = order
            .into_iter()
            .filter_map(|key| summaries.remove(&key))
            .filter_map(|summary| self.format_summary(summary))
            .collect();
        rows.sort_by(|a, b| compare_values(&a.value, &b.value));
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn create_group(&self, record: &Record) -> ToolkitResult<Record> {
        let mut group = Record::new();
        for g in &self.groups {
            let value = get_field_value(record, &g.field).cloned().unwrap_or(Value::Null);
            let value = match (g.operation, value.as_str()) {
                (Some(operation), Some(text)) => Value::String(operation.truncate(text)?),
                _ => value,
            };
            group.insert(g.field.clone(), value);
        }
        Ok(group)
    }

    fn update_summary(&self, summary: &mut Summary, record: &Record) {
        summary.start_count += 1;
        let Some(field) = &self.field else {
            return;
        };
        let Some(value) = get_field_value(record, field).filter(|v| !v.is_null()) else {
            return;
        };

        summary.count += 1;
        if let Some(number) = value.as_f64() {
            summary.sum += number;
        }
        if summary.min.as_ref().is_none_or(|min| compare_values(value, min).is_lt()) {
            summary.min = Some(value.clone());
        }
        if summary.max.as_ref().is_none_or(|max| compare_values(value, max).is_gt()) {
            summary.max = Some(value.clone());
        }
    }

    fn format_summary(&self, summary: Summary) -> Option<AggregateResult> {
        let value = match self.operation {
            AggregateOperation::Count if self.field.is_none() => Value::from(summary.start_count),
            AggregateOperation::Count => Value::from(summary.count),
            AggregateOperation::Sum => number(summary.sum),
            AggregateOperation::Avg if summary.count == 0 => return None,
            AggregateOperation::Avg => number(summary.sum / summary.count as f64),
            AggregateOperation::Max => summary.max.unwrap_or(Value::Null),
            AggregateOperation::Min => summary.min.unwrap_or(Value::Null),
        };
        Some(AggregateResult {
            value,
            group: summary.group,
        })
    }
}

/// Keep integral sums as integers
fn number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

// ============================================================================
// Tests
// ============================================================================
