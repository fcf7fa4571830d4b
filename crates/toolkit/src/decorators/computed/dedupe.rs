//! Batch deduplication of computed-field inputs
//!
//! Inputs are bucketed by their canonical JSON form (object keys sorted), so
//! only deeply equal inputs share an output. `null` inputs are never handed
//! to the callback and always yield `null`.

use std::collections::HashMap;
use std::future::Future;
use trellis_core::types::{Record, Value};
use trellis_core::{ToolkitError, ToolkitResult};

/// Serialize with object keys in sorted order at every depth
pub fn canonical_json(value: &Value) -> String {
    fn sorted(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                Value::Object(entries.into_iter().map(|(k, v)| (k.clone(), sorted(v))).collect::<Record>())
            }
            Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
            other => other.clone(),
        }
    }
    sorted(value).to_string()
}

/// Call `callback` once with the distinct non-null inputs and spread its outputs back
pub async fn transform_unique_values<F, Fut>(inputs: Vec<Value>, callback: F) -> ToolkitResult<Vec<Value>>
where
    F: FnOnce(Vec<Value>) -> Fut,
    Fut: Future<Output = ToolkitResult<Vec<Value>>>,
{
    let mut buckets: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<Value> = Vec::new();
    let mut mapping: Vec<Option<usize>> = Vec::with_capacity(inputs.len());

    for input in inputs {
        if input.is_null() {
            mapping.push(None);
            continue;
        }
        let index = *buckets.entry(canonical_json(&input)).or_insert_with(|| {
            unique.push(input);
            unique.len() - 1
        });
        mapping.push(Some(index));
    }

    if unique.is_empty() {
        return Ok(vec![Value::Null; mapping.len()]);
    }

    let expected = unique.len();
    let outputs = callback(unique).await?;
    if outputs.len() != expected {
        return Err(ToolkitError::Computed(format!(
            "Expected {expected} computed values, got {}",
            outputs.len()
        )));
    }

    Ok(mapping
        .into_iter()
        .map(|index| index.map_or(Value::Null, |i| outputs[i].clone()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    #[test]
    fn test_canonical_json_ignores_key_order() {
        let left = json!({ "b": 1, "a": { "d": [1, 2], "c": null } });
        let right = json!({ "a": { "c": null, "d": [1, 2] }, "b": 1 });
        assert_eq!(canonical_json(&left), canonical_json(&right));
        assert_ne!(canonical_json(&json!({ "a": 1 })), canonical_json(&json!({ "a": "1" })));
    }

    #[tokio::test]
    async fn test_callback_sees_each_distinct_value_once() {
        let seen = Mutex::new(Vec::new());
        let inputs = vec![
            json!({ "title": "abc" }),
            json!(null),
            json!({ "title": "xyz" }),
            json!({ "title": "abc" }),
        ];

        let outputs = transform_unique_values(inputs, |unique| {
            seen.lock().unwrap().push(unique.clone());
            async move {
                Ok(unique
                    .iter()
                    .map(|v| json!(v["title"].as_str().unwrap().to_uppercase()))
                    .collect())
            }
        })
        .await
        .unwrap();

        assert_eq!(outputs, vec![json!("ABC"), json!(null), json!("XYZ"), json!("ABC")]);
        assert_eq!(
            *seen.lock().unwrap(),
            vec![vec![json!({ "title": "abc" }), json!({ "title": "xyz" })]]
        );
    }

    #[tokio::test]
    async fn test_all_null_inputs_skip_the_callback() {
        let outputs = transform_unique_values(vec![json!(null), json!(null)], |_| async {
            Err(ToolkitError::internal("should not be called"))
        })
        .await
        .unwrap();
        assert_eq!(outputs, vec![json!(null), json!(null)]);
    }

    #[tokio::test]
    async fn test_wrong_output_count_is_an_error() {
        let err = transform_unique_values(vec![json!(1), json!(2)], |_| async { Ok(vec![json!(1)]) })
            .await
            .unwrap_err();
        assert!(matches!(err, ToolkitError::Computed(_)));
    }
}
