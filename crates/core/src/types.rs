//! Core types used throughout Trellis
//!
//! This module contains the primitive vocabulary shared by the schema model,
//! the query primitives and the decorators: column types, filter operators,
//! records and the caller context.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// Records
// ============================================================================

/// A JSON value as stored in a record
pub type Value = serde_json::Value;

/// A single row, keyed by field name. Relations are nested records.
pub type Record = serde_json::Map<String, Value>;

/// Separator between a relation name and the path inside the related collection
pub const PATH_SEPARATOR: char = ':';

/// Split a field path on its first relation separator
///
/// Returns the relation prefix and the remaining path, or `None` when the
/// path designates a column of the current collection.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    path.split_once(PATH_SEPARATOR)
}

// ============================================================================
// Column Types
// ============================================================================

/// Primitive type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveType {
    Boolean,
    Date,
    Dateonly,
    Enum,
    Json,
    Number,
    Point,
    String,
    Timeonly,
    Uuid,
    Binary,
}

impl PrimitiveType {
    /// Get all primitive types
    pub fn all() -> &'static [PrimitiveType] {
        &[
            PrimitiveType::Boolean,
            PrimitiveType::Date,
            PrimitiveType::Dateonly,
            PrimitiveType::Enum,
            PrimitiveType::Json,
            PrimitiveType::Number,
            PrimitiveType::Point,
            PrimitiveType::String,
            PrimitiveType::Timeonly,
            PrimitiveType::Uuid,
            PrimitiveType::Binary,
        ]
    }

    /// Check if values of this type are compared as text
    pub fn is_textual(&self) -> bool {
        matches!(
            self,
            PrimitiveType::String | PrimitiveType::Enum | PrimitiveType::Uuid
        )
    }
}

impl std::fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Type of a column: a primitive, a nested object, or an array
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColumnType {
    Primitive(PrimitiveType),
    Object(BTreeMap<String, ColumnType>),
    Array(Box<ColumnType>),
}

impl ColumnType {
    /// Get the primitive type, if this is a primitive column
    pub fn primitive(&self) -> Option<PrimitiveType> {
        match self {
            ColumnType::Primitive(p) => Some(*p),
            _ => None,
        }
    }
}

impl From<PrimitiveType> for ColumnType {
    fn from(value: PrimitiveType) -> Self {
        ColumnType::Primitive(value)
    }
}

// ============================================================================
// Operators
// ============================================================================

/// Filtering operator of a condition tree leaf
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Present,
    Blank,
    Missing,
    Equal,
    NotEqual,
    LessThan,
    GreaterThan,
    In,
    NotIn,
    Like,
    ILike,
    StartsWith,
    EndsWith,
    Contains,
    NotContains,
    IContains,
    LongerThan,
    ShorterThan,
    IncludesAll,
    Before,
    After,
    Today,
    Yesterday,
    Past,
    Future,
    PreviousWeek,
    PreviousMonth,
    PreviousQuarter,
    PreviousYear,
    PreviousXDays,
    BeforeXHoursAgo,
    AfterXHoursAgo,
}

impl Operator {
    /// Snake-case name of the operator
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Present => "present",
            Operator::Blank => "blank",
            Operator::Missing => "missing",
            Operator::Equal => "equal",
            Operator::NotEqual => "not_equal",
            Operator::LessThan => "less_than",
            Operator::GreaterThan => "greater_than",
            Operator::In => "in",
            Operator::NotIn => "not_in",
            Operator::Like => "like",
            Operator::ILike => "i_like",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::Contains => "contains",
            Operator::NotContains => "not_contains",
            Operator::IContains => "i_contains",
            Operator::LongerThan => "longer_than",
            Operator::ShorterThan => "shorter_than",
            Operator::IncludesAll => "includes_all",
            Operator::Before => "before",
            Operator::After => "after",
            Operator::Today => "today",
            Operator::Yesterday => "yesterday",
            Operator::Past => "past",
            Operator::Future => "future",
            Operator::PreviousWeek => "previous_week",
            Operator::PreviousMonth => "previous_month",
            Operator::PreviousQuarter => "previous_quarter",
            Operator::PreviousYear => "previous_year",
            Operator::PreviousXDays => "previous_x_days",
            Operator::BeforeXHoursAgo => "before_x_hours_ago",
            Operator::AfterXHoursAgo => "after_x_hours_ago",
        }
    }

    /// Parse an operator from its snake-case name
    pub fn parse(name: &str) -> Option<Operator> {
        Self::all().iter().copied().find(|op| op.as_str() == name)
    }

    /// Get all operators
    pub fn all() -> &'static [Operator] {
        &[
            Operator::Present,
            Operator::Blank,
            Operator::Missing,
            Operator::Equal,
            Operator::NotEqual,
            Operator::LessThan,
            Operator::GreaterThan,
            Operator::In,
            Operator::NotIn,
            Operator::Like,
            Operator::ILike,
            Operator::StartsWith,
            Operator::EndsWith,
            Operator::Contains,
            Operator::NotContains,
            Operator::IContains,
            Operator::LongerThan,
            Operator::ShorterThan,
            Operator::IncludesAll,
            Operator::Before,
            Operator::After,
            Operator::Today,
            Operator::Yesterday,
            Operator::Past,
            Operator::Future,
            Operator::PreviousWeek,
            Operator::PreviousMonth,
            Operator::PreviousQuarter,
            Operator::PreviousYear,
            Operator::PreviousXDays,
            Operator::BeforeXHoursAgo,
            Operator::AfterXHoursAgo,
        ]
    }

    /// Operators that take no value
    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            Operator::Present
                | Operator::Blank
                | Operator::Missing
                | Operator::Today
                | Operator::Yesterday
                | Operator::Past
                | Operator::Future
                | Operator::PreviousWeek
                | Operator::PreviousMonth
                | Operator::PreviousQuarter
                | Operator::PreviousYear
        )
    }

    /// Relative date operators depend on the current time and the caller timezone
    pub fn is_relative_date(&self) -> bool {
        matches!(
            self,
            Operator::Today
                | Operator::Yesterday
                | Operator::Past
                | Operator::Future
                | Operator::PreviousWeek
                | Operator::PreviousMonth
                | Operator::PreviousQuarter
                | Operator::PreviousYear
                | Operator::PreviousXDays
                | Operator::BeforeXHoursAgo
                | Operator::AfterXHoursAgo
        )
    }

    /// The operator matching exactly the records this one rejects, if any
    pub fn negation(&self) -> Option<Operator> {
        match self {
            Operator::Equal => Some(Operator::NotEqual),
            Operator::NotEqual => Some(Operator::Equal),
            Operator::In => Some(Operator::NotIn),
            Operator::NotIn => Some(Operator::In),
            Operator::Contains => Some(Operator::NotContains),
            Operator::NotContains => Some(Operator::Contains),
            Operator::Present => Some(Operator::Blank),
            Operator::Blank => Some(Operator::Present),
            _ => None,
        }
    }
}

impl std::fmt::Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Caller
// ============================================================================

/// The user on whose behalf an operation runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Caller {
    pub id: i64,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub team: String,
    pub role: String,
    pub tags: BTreeMap<String, String>,
    pub timezone: String,
}

impl Caller {
    /// Create a caller with the given id and email
    pub fn new(id: i64, email: impl Into<String>) -> Self {
        Self {
            id,
            email: email.into(),
            first_name: String::new(),
            last_name: String::new(),
            team: String::new(),
            role: String::new(),
            tags: BTreeMap::new(),
            timezone: "UTC".to_string(),
        }
    }

    pub fn with_team(mut self, team: impl Into<String>) -> Self {
        self.team = team.into();
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

impl Default for Caller {
    fn default() -> Self {
        Self::new(0, "system@trellis.local")
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("author:name"), Some(("author", "name")));
        assert_eq!(split_path("author:country:code"), Some(("author", "country:code")));
        assert_eq!(split_path("title"), None);
    }

    #[test]
    fn test_operator_names_round_trip_through_parse() {
        for op in Operator::all() {
            assert_eq!(Operator::parse(op.as_str()), Some(*op));
        }
        assert_eq!(Operator::parse("unknown"), None);
    }

    #[test]
    fn test_operator_serde_uses_snake_case() {
        let json = serde_json::to_string(&Operator::NotContains).unwrap();
        assert_eq!(json, "\"not_contains\"");
        let op: Operator = serde_json::from_str("\"i_like\"").unwrap();
        assert_eq!(op, Operator::ILike);
    }

    #[test]
    fn test_operator_negation_is_symmetric() {
        for op in Operator::all() {
            if let Some(neg) = op.negation() {
                assert_eq!(neg.negation(), Some(*op));
            }
        }
        assert_eq!(Operator::LessThan.negation(), None);
    }

    #[test]
    fn test_operator_classification() {
        assert!(Operator::Present.is_unary());
        assert!(!Operator::Equal.is_unary());
        assert!(Operator::PreviousXDays.is_relative_date());
        assert!(!Operator::Before.is_relative_date());
    }

    #[test]
    fn test_caller_builder() {
        let caller = Caller::new(42, "jane@example.com")
            .with_team("Ops")
            .with_timezone("Europe/Paris")
            .with_tag("region", "eu");
        assert_eq!(caller.team, "Ops");
        assert_eq!(caller.timezone, "Europe/Paris");
        assert_eq!(caller.tags.get("region"), Some(&"eu".to_string()));
    }

    #[test]
    fn test_column_type_primitive() {
        let ty: ColumnType = PrimitiveType::Number.into();
        assert_eq!(ty.primitive(), Some(PrimitiveType::Number));
        assert_eq!(ColumnType::Array(Box::new(ty)).primitive(), None);
        assert!(PrimitiveType::Uuid.is_textual());
    }
}
