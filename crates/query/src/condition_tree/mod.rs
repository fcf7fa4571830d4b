//! Condition trees
//!
//! Boolean predicates over records, built from leaves (`field operator
//! value`) combined by AND/OR branches. Decorators rewrite them (rename
//! fields, nest them under a relation, swap computed fields for real ones)
//! before forwarding a filter to the child collection.

mod branch;
mod factory;
mod leaf;

pub use branch::{Aggregator, ConditionTreeBranch};
pub use factory::ConditionTreeFactory;
pub use leaf::ConditionTreeLeaf;

use crate::projection::Projection;
use std::collections::BTreeSet;
use trellis_core::types::{Record, Value, split_path};
use trellis_core::{ToolkitError, ToolkitResult};

#[derive(Debug, Clone, PartialEq)]
pub enum ConditionTree {
    Leaf(ConditionTreeLeaf),
    Branch(ConditionTreeBranch),
}

impl ConditionTree {
    pub fn leaf(field: impl Into<String>, operator: trellis_core::Operator, value: Value) -> Self {
        ConditionTree::Leaf(ConditionTreeLeaf::new(field, operator, value))
    }

    pub fn and(conditions: Vec<ConditionTree>) -> Self {
        ConditionTree::Branch(ConditionTreeBranch::new(Aggregator::And, conditions))
    }

    pub fn or(conditions: Vec<ConditionTree>) -> Self {
        ConditionTree::Branch(ConditionTreeBranch::new(Aggregator::Or, conditions))
    }

    /// Every field path read by the tree
    pub fn projection(&self) -> Projection {
        let mut projection = Projection::new();
        self.for_each_leaf(&mut |leaf| projection.push(leaf.field.clone()));
        projection
    }

    /// Negate the tree (De Morgan on branches)
    pub fn inverse(&self) -> ToolkitResult<ConditionTree> {
        match self {
            ConditionTree::Leaf(leaf) => Ok(ConditionTree::Leaf(leaf.inverse()?)),
            ConditionTree::Branch(branch) => {
                let conditions = branch
                    .conditions
                    .iter()
                    .map(ConditionTree::inverse)
                    .collect::<ToolkitResult<Vec<_>>>()?;
                Ok(ConditionTree::Branch(ConditionTreeBranch::new(
                    branch.aggregator.flip(),
                    conditions,
                )))
            }
        }
    }

    /// Evaluate the tree against an in-memory record
    pub fn matches(&self, record: &Record) -> ToolkitResult<bool> {
        match self {
            ConditionTree::Leaf(leaf) => leaf.matches(record),
            ConditionTree::Branch(branch) => {
                for condition in &branch.conditions {
                    let matched = condition.matches(record)?;
                    match branch.aggregator {
                        Aggregator::And if !matched => return Ok(false),
                        Aggregator::Or if matched => return Ok(true),
                        _ => {}
                    }
                }
                Ok(branch.aggregator == Aggregator::And)
            }
        }
    }

    /// Keep the records matching the tree
    pub fn filter(&self, records: Vec<Record>) -> ToolkitResult<Vec<Record>> {
        let mut result = Vec::with_capacity(records.len());
        for record in records {
            if self.matches(&record)? {
                result.push(record);
            }
        }
        Ok(result)
    }

    pub fn some_leaf(&self, handler: &dyn Fn(&ConditionTreeLeaf) -> bool) -> bool {
        match self {
            ConditionTree::Leaf(leaf) => handler(leaf),
            ConditionTree::Branch(branch) => branch.conditions.iter().any(|c| c.some_leaf(handler)),
        }
    }

    pub fn for_each_leaf(&self, handler: &mut dyn FnMut(&ConditionTreeLeaf)) {
        match self {
            ConditionTree::Leaf(leaf) => handler(leaf),
            ConditionTree::Branch(branch) => {
                for condition in &branch.conditions {
                    condition.for_each_leaf(handler);
                }
            }
        }
    }

    /// Rewrite every leaf into a new sub-tree
    pub fn replace<F>(&self, handler: &mut F) -> ToolkitResult<ConditionTree>
    where
        F: FnMut(&ConditionTreeLeaf) -> ToolkitResult<ConditionTree>,
    {
        match self {
            ConditionTree::Leaf(leaf) => handler(leaf),
            ConditionTree::Branch(branch) => {
                let mut conditions = Vec::with_capacity(branch.conditions.len());
                for condition in &branch.conditions {
                    conditions.push(condition.replace(handler)?);
                }
                Ok(ConditionTree::Branch(ConditionTreeBranch::new(
                    branch.aggregator,
                    conditions,
                )))
            }
        }
    }

    /// Rename every leaf field
    pub fn replace_fields<F>(&self, mut handler: F) -> ToolkitResult<ConditionTree>
    where
        F: FnMut(&str) -> ToolkitResult<String>,
    {
        self.replace(&mut |leaf| Ok(ConditionTree::Leaf(leaf.with_field(handler(&leaf.field)?))))
    }

    /// Prefix every leaf field with a relation name
    pub fn nest(&self, prefix: &str) -> ConditionTree {
        match self {
            ConditionTree::Leaf(leaf) => ConditionTree::Leaf(leaf.nest(prefix)),
            ConditionTree::Branch(branch) => ConditionTree::Branch(ConditionTreeBranch::new(
                branch.aggregator,
                branch.conditions.iter().map(|c| c.nest(prefix)).collect(),
            )),
        }
    }

    /// Strip the relation prefix shared by every leaf
    pub fn unnest(&self) -> ToolkitResult<ConditionTree> {
        let mut prefixes = BTreeSet::new();
        let mut unprefixed = false;
        self.for_each_leaf(&mut |leaf| match split_path(&leaf.field) {
            Some((prefix, _)) => {
                prefixes.insert(prefix.to_string());
            }
            None => unprefixed = true,
        });

        if prefixes.len() != 1 || unprefixed {
            return Err(ToolkitError::ConditionTree(
                "Cannot unnest condition tree".to_string(),
            ));
        }
        self.replace(&mut |leaf| Ok(ConditionTree::Leaf(leaf.unnest()?)))
    }

    pub fn to_plain_object(&self) -> Value {
        match self {
            ConditionTree::Leaf(leaf) => leaf.to_plain_object(),
            ConditionTree::Branch(branch) => branch.to_plain_object(),
        }
    }

    pub fn from_plain_object(value: &Value) -> ToolkitResult<ConditionTree> {
        ConditionTreeFactory::from_plain_object(value)
    }
}

impl std::fmt::Display for ConditionTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionTree::Leaf(leaf) => write!(f, "{leaf}"),
            ConditionTree::Branch(branch) => {
                let parts: Vec<String> = branch.conditions.iter().map(|c| c.to_string()).collect();
                write!(f, "{}[{}]", branch.aggregator.as_str().to_uppercase(), parts.join(", "))
            }
        }
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
    use trellis_core::Operator;

    fn tree() -> ConditionTree {
        ConditionTree::and(vec![
            ConditionTree::leaf("author:country", Operator::Equal, json!("FR")),
            ConditionTree::or(vec![
                ConditionTree::leaf("author:age", Operator::GreaterThan, json!(18)),
                ConditionTree::leaf("author:name", Operator::Present, Value::Null),
            ]),
        ])
    }

    #[test]
    fn test_projection_collects_leaf_fields() {
        assert_eq!(
            tree().projection(),
            Projection::from(["author:country", "author:age", "author:name"])
        );
    }

    #[test]
    fn test_inverse_fails_on_non_invertible_leaf() {
        let err = tree().inverse().unwrap_err();
        assert!(err.to_string().contains("greater_than"));
    }

    #[test]
    fn test_inverse_of_invertible_tree() {
        let tree = ConditionTree::and(vec![
            ConditionTree::leaf("a", Operator::Equal, json!(1)),
            ConditionTree::leaf("b", Operator::In, json!([1, 2])),
        ]);
        assert_eq!(
            tree.inverse().unwrap(),
            ConditionTree::or(vec![
                ConditionTree::leaf("a", Operator::NotEqual, json!(1)),
                ConditionTree::leaf("b", Operator::NotIn, json!([1, 2])),
            ])
        );
        assert_eq!(tree.inverse().unwrap().inverse().unwrap(), tree);
    }

    #[test]
    fn test_matches() {
        let record = json!({ "author": { "country": "FR", "age": 12, "name": "Zola" } })
            .as_object()
            .cloned()
            .unwrap();
        assert!(tree().matches(&record).unwrap());

        let record = json!({ "author": { "country": "US", "age": 40, "name": "Poe" } })
            .as_object()
            .cloned()
            .unwrap();
        assert!(!tree().matches(&record).unwrap());
    }

    #[test]
    fn test_empty_branches() {
        let record = Record::new();
        assert!(ConditionTree::and(vec![]).matches(&record).unwrap());
        assert!(!ConditionTree::or(vec![]).matches(&record).unwrap());
    }

    #[test]
    fn test_nest_and_unnest() {
        let unnested = tree().unnest().unwrap();
        assert_eq!(
            unnested.projection(),
            Projection::from(["country", "age", "name"])
        );
        assert_eq!(unnested.nest("author"), tree());
    }

    #[test]
    fn test_unnest_requires_single_prefix() {
        let mixed = ConditionTree::and(vec![
            ConditionTree::leaf("author:name", Operator::Present, Value::Null),
            ConditionTree::leaf("title", Operator::Present, Value::Null),
        ]);
        assert!(mixed.unnest().is_err());
    }

    #[test]
    fn test_replace_fields() {
        let renamed = tree()
            .replace_fields(|f| Ok(f.replace("author:", "writer:")))
            .unwrap();
        assert!(renamed.some_leaf(&|leaf| leaf.field == "writer:age"));
        assert!(!renamed.some_leaf(&|leaf| leaf.field.starts_with("author")));
    }

    #[test]
    fn test_plain_object_round_trip() {
        let plain = tree().to_plain_object();
        assert_eq!(plain["aggregator"], json!("and"));
        assert_eq!(plain["conditions"][0]["operator"], json!("equal"));
        assert_eq!(ConditionTree::from_plain_object(&plain).unwrap(), tree());
    }

    #[test]
    fn test_display() {
        let tree = ConditionTree::and(vec![
            ConditionTree::leaf("a", Operator::Equal, json!(1)),
            ConditionTree::leaf("b", Operator::Present, Value::Null),
        ]);
        assert_eq!(tree.to_string(), "AND[a equal 1, b present]");
    }
}
