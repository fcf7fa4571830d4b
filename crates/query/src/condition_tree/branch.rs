//! Condition tree branches: AND / OR over sub-trees

use super::ConditionTree;
use serde::{Deserialize, Serialize};
use serde_json::json;
use trellis_core::types::Value;

/// How the conditions of a branch are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregator {
    And,
    Or,
}

impl Aggregator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregator::And => "and",
            Aggregator::Or => "or",
        }
    }

    pub fn parse(value: &str) -> Option<Aggregator> {
        match value.to_ascii_lowercase().as_str() {
            "and" => Some(Aggregator::And),
            "or" => Some(Aggregator::Or),
            _ => None,
        }
    }

    /// De Morgan counterpart
    pub fn flip(&self) -> Aggregator {
        match self {
            Aggregator::And => Aggregator::Or,
            Aggregator::Or => Aggregator::And,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionTreeBranch {
    pub aggregator: Aggregator,
    pub conditions: Vec<ConditionTree>,
}

impl ConditionTreeBranch {
    pub fn new(aggregator: Aggregator, conditions: Vec<ConditionTree>) -> Self {
        Self {
            aggregator,
            conditions,
        }
    }

    pub fn to_plain_object(&self) -> Value {
        json!({
            "aggregator": self.aggregator.as_str(),
            "conditions": self
                .conditions
                .iter()
                .map(ConditionTree::to_plain_object)
                .collect::<Vec<_>>(),
        })
    }
}

impl From<ConditionTreeBranch> for ConditionTree {
    fn from(value: ConditionTreeBranch) -> Self {
        ConditionTree::Branch(value)
    }
}
