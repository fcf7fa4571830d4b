//! Constructors for common condition trees

use super::{Aggregator, ConditionTree, ConditionTreeBranch, ConditionTreeLeaf};
use trellis_core::records::{CompositeId, get_primary_key};
use trellis_core::schema::CollectionSchema;
use trellis_core::types::{Operator, Record, Value};
use trellis_core::{ToolkitError, ToolkitResult};

pub struct ConditionTreeFactory;

impl ConditionTreeFactory {
    /// A tree no record satisfies
    pub fn match_none() -> ConditionTree {
        ConditionTree::Branch(ConditionTreeBranch::new(Aggregator::Or, vec![]))
    }

    /// OR the trees together, flattening nested ORs
    pub fn union(trees: Vec<ConditionTree>) -> ConditionTree {
        Self::group(Aggregator::Or, trees)
    }

    /// AND the trees together, flattening nested ANDs
    ///
    /// Returns `None` (match everything) when there is nothing to intersect.
    pub fn intersect(trees: Vec<Option<ConditionTree>>) -> Option<ConditionTree> {
        let result = Self::group(Aggregator::And, trees.into_iter().flatten().collect());
        match &result {
            ConditionTree::Branch(branch) if branch.conditions.is_empty() => None,
            _ => Some(result),
        }
    }

    /// A tree matching the given records by primary key
    pub fn match_records(schema: &CollectionSchema, records: &[Record]) -> ToolkitResult<ConditionTree> {
        let ids = records
            .iter()
            .map(|record| get_primary_key(schema, record))
            .collect::<ToolkitResult<Vec<_>>>()?;
        Self::match_ids(schema, &ids)
    }

    /// A tree matching the given composite identifiers
    pub fn match_ids(schema: &CollectionSchema, ids: &[CompositeId]) -> ToolkitResult<ConditionTree> {
        let primary_keys = schema.primary_keys();
        if primary_keys.is_empty() {
            return Err(ToolkitError::ConditionTree(
                "Collection must have at least one primary key".to_string(),
            ));
        }

        for name in &primary_keys {
            let supported = schema
                .fields
                .get(name)
                .and_then(|f| f.as_column())
                .is_some_and(|c| {
                    c.filter_operators.contains(&Operator::Equal)
                        || c.filter_operators.contains(&Operator::In)
                });
            if !supported {
                return Err(ToolkitError::ConditionTree(format!(
                    "Field '{name}' must support operators: [equal, in]"
                )));
            }
        }

        Ok(Self::match_fields(&primary_keys, ids))
    }

    fn match_fields(fields: &[String], values: &[CompositeId]) -> ConditionTree {
        let Some((first_field, other_fields)) = fields.split_first() else {
            return Self::match_none();
        };
        if values.is_empty() {
            return Self::match_none();
        }

        if other_fields.is_empty() {
            let field_values: Vec<Value> = values.iter().filter_map(|v| v.first().cloned()).collect();
            return match field_values.as_slice() {
                [] => Self::match_none(),
                [single] => ConditionTree::leaf(first_field.clone(), Operator::Equal, single.clone()),
                _ => ConditionTree::leaf(first_field.clone(), Operator::In, Value::Array(field_values)),
            };
        }

        // Group by the first key, preserving the order ids were given in
        let mut groups: Vec<(Value, Vec<CompositeId>)> = Vec::new();
        for id in values {
            let Some((first, rest)) = id.split_first() else {
                continue;
            };
            match groups.iter_mut().find(|(value, _)| value == first) {
                Some((_, rests)) => rests.push(rest.to_vec()),
                None => groups.push((first.clone(), vec![rest.to_vec()])),
            }
        }

        let trees = groups
            .into_iter()
            .filter_map(|(first, rests)| {
                let leaf = ConditionTree::leaf(first_field.clone(), Operator::Equal, first);
                let sub = Self::match_fields(other_fields, &rests);
                Self::intersect(vec![Some(leaf), Some(sub)])
            })
            .collect();
        Self::union(trees)
    }

    /// Parse the `{aggregator, conditions}` / `{field, operator, value}` format
    pub fn from_plain_object(value: &Value) -> ToolkitResult<ConditionTree> {
        let Some(object) = value.as_object() else {
            return Err(ToolkitError::ConditionTree(
                "Failed to instantiate condition tree from json".to_string(),
            ));
        };

        if let (Some(field), Some(operator)) = (object.get("field"), object.get("operator")) {
            let field = field.as_str().ok_or_else(|| {
                ToolkitError::ConditionTree("Leaf field must be a string".to_string())
            })?;
            let operator = operator
                .as_str()
                .and_then(Operator::parse)
                .ok_or_else(|| {
                    ToolkitError::ConditionTree(format!("Unknown operator {operator}"))
                })?;
            let value = object.get("value").cloned().unwrap_or(Value::Null);
            return Ok(ConditionTree::Leaf(ConditionTreeLeaf::new(field, operator, value)));
        }

        if let (Some(aggregator), Some(Value::Array(conditions))) =
            (object.get("aggregator"), object.get("conditions"))
        {
            let aggregator = aggregator
                .as_str()
                .and_then(Aggregator::parse)
                .ok_or_else(|| {
                    ToolkitError::ConditionTree(format!("Unknown aggregator {aggregator}"))
                })?;
            let mut trees = conditions
                .iter()
                .map(Self::from_plain_object)
                .collect::<ToolkitResult<Vec<_>>>()?;
            if trees.len() == 1 {
                return Ok(trees.remove(0));
            }
            return Ok(ConditionTree::Branch(ConditionTreeBranch::new(aggregator, trees)));
        }

        Err(ToolkitError::ConditionTree(
            "Failed to instantiate condition tree from json".to_string(),
        ))
    }

    fn group(aggregator: Aggregator, trees: Vec<ConditionTree>) -> ConditionTree {
        let mut conditions = Vec::new();
        for tree in trees {
            match tree {
                ConditionTree::Branch(branch) if branch.aggregator == aggregator => {
                    conditions.extend(branch.conditions);
                }
                other => conditions.push(other),
            }
        }

        if conditions.len() == 1 {
            return conditions.remove(0);
        }
        ConditionTree::Branch(ConditionTreeBranch::new(aggregator, conditions))
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
    use trellis_core::schema::ColumnSchema;
    use trellis_core::types::PrimitiveType;

    fn leaf(field: &str, value: Value) -> ConditionTree {
        ConditionTree::leaf(field, Operator::Equal, value)
    }

    #[test]
    fn test_intersect() {
        assert_eq!(ConditionTreeFactory::intersect(vec![]), None);
        assert_eq!(ConditionTreeFactory::intersect(vec![None, None]), None);
        assert_eq!(
            ConditionTreeFactory::intersect(vec![Some(leaf("a", json!(1))), None]),
            Some(leaf("a", json!(1)))
        );

        let nested = ConditionTree::and(vec![leaf("a", json!(1)), leaf("b", json!(2))]);
        assert_eq!(
            ConditionTreeFactory::intersect(vec![Some(nested), Some(leaf("c", json!(3)))]),
            Some(ConditionTree::and(vec![
                leaf("a", json!(1)),
                leaf("b", json!(2)),
                leaf("c", json!(3)),
            ]))
        );
    }

    #[test]
    fn test_union_keeps_foreign_aggregators() {
        let nested = ConditionTree::and(vec![leaf("a", json!(1)), leaf("b", json!(2))]);
        assert_eq!(
            ConditionTreeFactory::union(vec![nested.clone(), leaf("c", json!(3))]),
            ConditionTree::or(vec![nested, leaf("c", json!(3))])
        );
        assert_eq!(ConditionTreeFactory::union(vec![]), ConditionTreeFactory::match_none());
    }

    #[test]
    fn test_match_ids_single_key() {
        let schema = CollectionSchema::new()
            .with_field("id", ColumnSchema::primary_key(PrimitiveType::Number));

        assert_eq!(
            ConditionTreeFactory::match_ids(&schema, &[vec![json!(1)]]).unwrap(),
            leaf("id", json!(1))
        );
        assert_eq!(
            ConditionTreeFactory::match_ids(&schema, &[vec![json!(1)], vec![json!(2)]]).unwrap(),
            ConditionTree::leaf("id", Operator::In, json!([1, 2]))
        );
        assert_eq!(
            ConditionTreeFactory::match_ids(&schema, &[]).unwrap(),
            ConditionTreeFactory::match_none()
        );
    }

    #[test]
    fn test_match_ids_composite_key() {
        let schema = CollectionSchema::new()
            .with_field("a", ColumnSchema::primary_key(PrimitiveType::Number))
            .with_field("b", ColumnSchema::primary_key(PrimitiveType::Number));

        let tree = ConditionTreeFactory::match_ids(
            &schema,
            &[vec![json!(1), json!(1)], vec![json!(1), json!(2)], vec![json!(2), json!(1)]],
        )
        .unwrap();

        assert_eq!(
            tree,
            ConditionTree::or(vec![
                ConditionTree::and(vec![
                    leaf("a", json!(1)),
                    ConditionTree::leaf("b", Operator::In, json!([1, 2])),
                ]),
                ConditionTree::and(vec![leaf("a", json!(2)), leaf("b", json!(1))]),
            ])
        );
    }

    #[test]
    fn test_match_ids_requires_supported_operators() {
        let schema = CollectionSchema::new().with_field(
            "id",
            ColumnSchema::new(PrimitiveType::Number).with_primary_key(),
        );
        assert!(ConditionTreeFactory::match_ids(&schema, &[vec![json!(1)]]).is_err());
        assert!(ConditionTreeFactory::match_ids(&CollectionSchema::new(), &[]).is_err());
    }

    #[test]
    fn test_match_records() {
        let schema = CollectionSchema::new()
            .with_field("id", ColumnSchema::primary_key(PrimitiveType::Number));
        let records: Vec<Record> = vec![
            json!({ "id": 4, "title": "x" }).as_object().cloned().unwrap(),
        ];
        assert_eq!(
            ConditionTreeFactory::match_records(&schema, &records).unwrap(),
            leaf("id", json!(4))
        );
    }

    #[test]
    fn test_from_plain_object() {
        let single = json!({
            "aggregator": "and",
            "conditions": [{ "field": "a", "operator": "equal", "value": 1 }]
        });
        assert_eq!(
            ConditionTreeFactory::from_plain_object(&single).unwrap(),
            leaf("a", json!(1))
        );

        let unary = json!({ "field": "a", "operator": "present" });
        assert_eq!(
            ConditionTreeFactory::from_plain_object(&unary).unwrap(),
            ConditionTree::leaf("a", Operator::Present, Value::Null)
        );

        assert!(ConditionTreeFactory::from_plain_object(&json!({ "foo": 1 })).is_err());
        assert!(
            ConditionTreeFactory::from_plain_object(&json!({ "field": "a", "operator": "nope" }))
                .is_err()
        );
    }
}
