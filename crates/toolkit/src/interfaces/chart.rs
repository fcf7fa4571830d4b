//! Chart payloads and the builder used by chart handlers

use chrono::{Duration, Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use trellis_core::types::Value;
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::DateOperation;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionEntry {
    pub key: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBasedEntry {
    pub label: String,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeBasedLine {
    pub key: String,
    pub values: Vec<f64>,
}

/// Rendered chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Chart {
    Value {
        count_current: f64,
        count_previous: Option<f64>,
    },
    Distribution(Vec<DistributionEntry>),
    TimeBased(Vec<TimeBasedEntry>),
    MultipleTimeBased {
        labels: Vec<String>,
        values: Vec<TimeBasedLine>,
    },
    Percentage(f64),
    Objective {
        value: f64,
        objective: f64,
    },
    Leaderboard(Vec<DistributionEntry>),
    Smart(Value),
}

/// Helpers building each chart kind
pub struct ChartResultBuilder;

impl ChartResultBuilder {
    pub fn value(current: f64, previous: Option<f64>) -> Chart {
        Chart::Value {
            count_current: current,
            count_previous: previous,
        }
    }

    pub fn distribution<I, K>(values: I) -> Chart
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        Chart::Distribution(entries(values))
    }

    pub fn percentage(value: f64) -> Chart {
        Chart::Percentage(value)
    }

    pub fn objective(value: f64, objective: f64) -> Chart {
        Chart::Objective { value, objective }
    }

    /// Entries sorted by increasing value
    pub fn leaderboard<I, K>(values: I) -> Chart
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        let mut entries = entries(values);
        entries.sort_by(|a, b| a.value.total_cmp(&b.value));
        Chart::Leaderboard(entries)
    }

    pub fn smart(data: Value) -> Chart {
        Chart::Smart(data)
    }

    /// Sum values per period and fill the gaps between the first and last
    /// period with zeros
    pub fn time_based<I, K>(operation: DateOperation, values: I) -> ToolkitResult<Chart>
    where
        I: IntoIterator<Item = (K, Option<f64>)>,
        K: AsRef<str>,
    {
        let points = values
            .into_iter()
            .map(|(date, value)| Ok((period_start(operation, date.as_ref())?, value)))
            .collect::<ToolkitResult<Vec<_>>>()?;
        Ok(Chart::TimeBased(build_time_based(operation, &points)))
    }

    /// Several lines sharing the same dates
    pub fn multiple_time_based<K: AsRef<str>>(
        operation: DateOperation,
        dates: &[K],
        lines: Vec<(String, Vec<Option<f64>>)>,
    ) -> ToolkitResult<Chart> {
        let starts = dates
            .iter()
            .map(|date| period_start(operation, date.as_ref()))
            .collect::<ToolkitResult<Vec<_>>>()?;

        let mut labels = Vec::new();
        let mut values = Vec::with_capacity(lines.len());
        for (key, line) in lines {
            let points: Vec<(NaiveDate, Option<f64>)> = starts
                .iter()
                .copied()
                .zip(line.into_iter().chain(std::iter::repeat(None)))
                .collect();
            let entries = build_time_based(operation, &points);
            if labels.is_empty() {
                labels = entries.iter().map(|e| e.label.clone()).collect();
            }
            values.push(TimeBasedLine {
                key,
                values: entries.into_iter().map(|e| e.value).collect(),
            });
        }
        Ok(Chart::MultipleTimeBased { labels, values })
    }
}

fn entries<I, K>(values: I) -> Vec<DistributionEntry>
where
    I: IntoIterator<Item = (K, f64)>,
    K: Into<String>,
{
    values
        .into_iter()
        .map(|(key, value)| DistributionEntry {
            key: key.into(),
            value,
        })
        .collect()
}

fn period_start(operation: DateOperation, date: &str) -> ToolkitResult<NaiveDate> {
    let truncated = operation.truncate(date)?;
    NaiveDate::parse_from_str(&truncated, "%Y-%m-%d")
        .map_err(|e| ToolkitError::Aggregation(format!("Invalid date '{date}': {e}")))
}

fn label(operation: DateOperation, date: NaiveDate) -> String {
    let format = match operation {
        DateOperation::Year => "%Y",
        DateOperation::Month => "%b %y",
        DateOperation::Week => "W%V-%G",
        DateOperation::Day => "%d/%m/%Y",
    };
    date.format(format).to_string()
}

fn next_period(operation: DateOperation, date: NaiveDate) -> Option<NaiveDate> {
    match operation {
        DateOperation::Year => date.checked_add_months(Months::new(12)),
        DateOperation::Month => date.checked_add_months(Months::new(1)),
        DateOperation::Week => date.checked_add_signed(Duration::days(7)),
        DateOperation::Day => date.checked_add_signed(Duration::days(1)),
    }
}

fn build_time_based(operation: DateOperation, points: &[(NaiveDate, Option<f64>)]) -> Vec<TimeBasedEntry> {
    let (Some(first), Some(last)) = (
        points.iter().map(|(d, _)| *d).min(),
        points.iter().map(|(d, _)| *d).max(),
    ) else {
        return Vec::new();
    };

    let mut sums: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (date, value) in points {
        if let Some(value) = value {
            *sums.entry(*date).or_default() += value;
        }
    }

    let mut result = Vec::new();
    let mut current = Some(first);
    while let Some(date) = current.filter(|d| *d <= last) {
        result.push(TimeBasedEntry {
            label: label(operation, date),
            value: sums.get(&date).copied().unwrap_or(0.0),
        });
        current = next_period(operation, date);
    }
    result
}

// ============================================================================
// Tests
// ============================================================================
