//! Write replacement
//!
//! `replace_field_writing` swaps the way a column is written: the handler
//! receives the value and returns a patch that may target other columns or
//! relations. Patches are rewritten recursively until every handler ran once;
//! a handler reached twice along the same chain is a cycle.

use super::collection::{CollectionDecorator, CollectionLayer};
use crate::context::CollectionContext;
use crate::handler::UserFn;
use crate::interfaces::Collection;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use trellis_core::schema::{CollectionSchema, ColumnSchema, FieldSchema};
use trellis_core::types::{Caller, PrimitiveType, Record, Value};
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteAction {
    Create,
    Update,
}

/// What a write handler knows about the write in progress
#[derive(Debug, Clone)]
pub struct WriteCustomizationContext {
    pub context: CollectionContext,
    pub action: WriteAction,
    /// The whole patch (or record) the handled value was taken from
    pub record: Record,
    /// Only set for updates
    pub filter: Option<Filter>,
}

/// Receives the written value; returns the patch to write instead
pub type WriteHandler = UserFn<(Value, WriteCustomizationContext), Option<Record>>;

#[derive(Default)]
pub struct WriteReplaceLayer {
    /// `None` makes the field read-only
    handlers: RwLock<BTreeMap<String, Option<WriteHandler>>>,
}

pub type WriteReplaceCollection = CollectionDecorator<WriteReplaceLayer>;

impl CollectionDecorator<WriteReplaceLayer> {
    pub fn replace_field_writing(&self, name: &str, handler: Option<WriteHandler>) -> ToolkitResult<()> {
        let schema = Collection::schema(self)?;
        schema.column(&self.name(), name)?;

        tracing::info!("Replacing the writing of '{}.{}'", self.name(), name);
        self.layer()
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), handler);
        self.invalidate_schema();
        Ok(())
    }

    /// `Some(None)` when the field was made read-only
    fn handler(&self, name: &str) -> Option<Option<WriteHandler>> {
        self.layer()
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Apply every handler to a patch, recursively
    pub fn rewrite_patch<'a>(
        &'a self,
        caller: &'a Caller,
        action: WriteAction,
        patch: Record,
        used: Vec<String>,
        filter: Option<&'a Filter>,
    ) -> BoxFuture<'a, ToolkitResult<Record>> {
        async move {
            let context = WriteCustomizationContext {
                context: self.context(caller)?,
                action,
                record: patch.clone(),
                filter: filter.cloned(),
            };

            let mut patches = Vec::with_capacity(patch.len());
            for key in patch.keys() {
                patches.push(self.rewrite_key(&context, key, &used).await?);
            }
            let merged = deep_merge(patches)?;

            let schema = Collection::schema(self)?;
            for (key, value) in &merged {
                if let FieldSchema::Column(column) = schema.field(&self.name(), key)? {
                    check_value(key, column, value)?;
                }
            }
            Ok(merged)
        }
        .boxed()
    }

    async fn rewrite_key(
        &self,
        context: &WriteCustomizationContext,
        key: &str,
        used: &[String],
    ) -> ToolkitResult<Record> {
        if used.iter().any(|u| u == key) {
            return Err(ToolkitError::Write(format!(
                "Cycle detected: {}.",
                used.join(" -> ")
            )));
        }

        let schema = Collection::schema(self)?;
        let value = context.record.get(key).cloned().unwrap_or(Value::Null);
        match schema.fields.get(key) {
            Some(FieldSchema::Column(_)) => {
                let mut field_patch = match self.handler(key) {
                    Some(None) => {
                        return Err(ToolkitError::Write(format!(
                            "The field '{}.{key}' is read-only",
                            self.name()
                        )));
                    }
                    Some(Some(handler)) => handler
                        .call(
                            (value, context.clone()),
                            self.config().run_sync_handlers_blocking,
                        )
                        .await?
                        .unwrap_or_default(),
                    None => Record::from_iter([(key.to_string(), value)]),
                };

                // Our own value is kept; the rest goes through the other handlers
                let own = field_patch.remove(key);
                let mut chain = used.to_vec();
                chain.push(key.to_string());
                let rewritten = self
                    .rewrite_patch(&context.context.caller, context.action, field_patch, chain, None)
                    .await?;

                match own {
                    Some(own) => deep_merge(vec![Record::from_iter([(key.to_string(), own)]), rewritten]),
                    None => Ok(rewritten),
                }
            }
            Some(FieldSchema::ManyToOne(_)) | Some(FieldSchema::OneToOne(_)) => {
                let nested = match value {
                    Value::Object(nested) => nested,
                    Value::Null => return Ok(Record::from_iter([(key.to_string(), Value::Null)])),
                    other => {
                        return Err(ToolkitError::Write(format!(
                            "The relation '{key}' expects an object, got {other}"
                        )));
                    }
                };
                let foreign_name = schema
                    .fields
                    .get(key)
                    .and_then(FieldSchema::foreign_collection)
                    .unwrap_or_default();
                let foreign = self.sibling(foreign_name)?;
                let rewritten = foreign
                    .rewrite_patch(&context.context.caller, context.action, nested, Vec::new(), None)
                    .await?;
                Ok(Record::from_iter([(key.to_string(), Value::Object(rewritten))]))
            }
            _ => Err(ToolkitError::Write(format!("Unknown field: {key}"))),
        }
    }
}

/// Check a written value against the type of its column
fn check_value(key: &str, column: &ColumnSchema, value: &Value) -> ToolkitResult<()> {
    let Some(primitive) = column.column_type.primitive() else {
        return Ok(());
    };
    if value.is_null() {
        return Ok(());
    }

    let text = value.as_str();
    let valid = match primitive {
        PrimitiveType::Boolean => value.is_boolean(),
        PrimitiveType::Number => value.is_number(),
        PrimitiveType::String | PrimitiveType::Binary => text.is_some(),
        PrimitiveType::Enum => text.is_some_and(|text| {
            column
                .enum_values
                .as_ref()
                .is_some_and(|allowed| allowed.iter().any(|v| v == text))
        }),
        PrimitiveType::Uuid => text.is_some_and(|text| uuid::Uuid::parse_str(text).is_ok()),
        PrimitiveType::Date => text.is_some_and(|text| {
            DateTime::parse_from_rfc3339(text).is_ok()
                || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
                || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        }),
        PrimitiveType::Dateonly => text.is_some_and(|text| NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()),
        PrimitiveType::Timeonly => text.is_some_and(|text| NaiveTime::parse_from_str(text, "%H:%M:%S%.f").is_ok()),
        PrimitiveType::Point => match value {
            Value::Array(items) => items.len() == 2 && items.iter().all(Value::is_number),
            Value::String(text) => {
                let parts: Vec<&str> = text.split(',').collect();
                parts.len() == 2 && parts.iter().all(|p| p.trim().parse::<f64>().is_ok())
            }
            _ => false,
        },
        PrimitiveType::Json => true,
    };

    if valid {
        Ok(())
    } else {
        Err(ToolkitError::Write(format!("Wrong type for '{key}': {value}. Expects {primitive:?}")))
    }
}

/// Merge patches, failing when two of them write the same non-object value
fn deep_merge(patches: Vec<Record>) -> ToolkitResult<Record> {
    let mut merged = Record::new();
    for patch in patches {
        for (key, value) in patch {
            let Some(existing) = merged.get_mut(&key).filter(|v| !v.is_null()) else {
                merged.insert(key, value);
                continue;
            };
            match (existing, value) {
                (Value::Object(existing), Value::Object(value)) => {
                    let combined = deep_merge(vec![std::mem::take(existing), value])?;
                    *existing = combined;
                }
                _ => {
                    return Err(ToolkitError::Write(format!(
                        "Conflict value on the field {key}. It received several values."
                    )));
                }
            }
        }
    }
    Ok(merged)
}

#[async_trait]
impl CollectionLayer for WriteReplaceLayer {
    type Datasource = ();

    fn refine_schema(
        &self,
        _this: &CollectionDecorator<Self>,
        mut schema: CollectionSchema,
    ) -> ToolkitResult<CollectionSchema> {
        let handlers = self.handlers.read().unwrap_or_else(PoisonError::into_inner);
        for (name, handler) in handlers.iter() {
            if let Some(column) = schema.fields.get_mut(name).and_then(FieldSchema::as_column_mut) {
                column.is_read_only = handler.is_none();
            }
        }
        Ok(schema)
    }

    async fn create(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        data: Vec<Record>,
    ) -> ToolkitResult<Vec<Record>> {
        let mut rewritten = Vec::with_capacity(data.len());
        for record in data {
            rewritten.push(
                this.rewrite_patch(caller, WriteAction::Create, record, Vec::new(), None)
                    .await?,
            );
        }
        this.child().create(caller, rewritten).await
    }

    async fn update(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        filter: &Filter,
        patch: &Record,
    ) -> ToolkitResult<()> {
        let rewritten = this
            .rewrite_patch(caller, WriteAction::Update, patch.clone(), Vec::new(), Some(filter))
            .await?;
        this.child().update(caller, filter, &rewritten).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorators::DatasourceDecorator;
    use crate::test_support::{library, records};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use trellis_core::ToolkitConfig;

    fn decorated() -> Arc<DatasourceDecorator<WriteReplaceLayer>> {
        DatasourceDecorator::new(library(), Arc::new(ToolkitConfig::default()))
    }

    fn split_name() -> WriteHandler {
        UserFn::from_sync(|(value, _ctx): (Value, WriteCustomizationContext)| {
            let full = value.as_str().unwrap_or_default().to_string();
            let (first, last) = full.split_once(' ').unwrap_or((&full, ""));
            Ok(Some(records(json!([{ "first_name": first, "last_name": last }])).remove(0)))
        })
    }

    #[test]
    fn test_deep_merge() {
        let merged = deep_merge(records(json!([
            { "a": 1, "author": { "first_name": "A" } },
            { "b": 2, "author": { "last_name": "B" } },
        ])))
        .unwrap();
        assert_eq!(
            Value::Object(merged),
            json!({ "a": 1, "b": 2, "author": { "first_name": "A", "last_name": "B" } })
        );

        let err = deep_merge(records(json!([{ "a": 1 }, { "a": 2 }]))).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Write error: Conflict value on the field a. It received several values."
        );
    }

    #[tokio::test]
    async fn test_handler_rewrites_into_other_columns() {
        let datasource = decorated();
        let authors = datasource.get_decorator("Author").unwrap();
        authors.replace_field_writing("last_name", Some(split_name())).unwrap();

        let patch = records(json!([{ "last_name": "Mary Shelley" }])).remove(0);
        let rewritten = authors
            .rewrite_patch(&Caller::default(), WriteAction::Create, patch, Vec::new(), None)
            .await
            .unwrap();
        assert_eq!(
            Value::Object(rewritten),
            json!({ "first_name": "Mary", "last_name": "Shelley" })
        );
    }

    #[tokio::test]
    async fn test_nested_relations_use_the_foreign_handlers() {
        let datasource = decorated();
        datasource
            .get_decorator("Author")
            .unwrap()
            .replace_field_writing("last_name", Some(split_name()))
            .unwrap();
        let books = datasource.get_decorator("Book").unwrap();

        let patch = records(json!([{ "title": "Frankenstein", "author": { "last_name": "Mary Shelley" } }])).remove(0);
        let rewritten = books
            .rewrite_patch(&Caller::default(), WriteAction::Create, patch, Vec::new(), None)
            .await
            .unwrap();
        assert_eq!(
            Value::Object(rewritten),
            json!({ "title": "Frankenstein", "author": { "first_name": "Mary", "last_name": "Shelley" } })
        );
    }

    #[tokio::test]
    async fn test_cycles_are_detected() {
        let datasource = decorated();
        let authors = datasource.get_decorator("Author").unwrap();
        authors
            .replace_field_writing(
                "first_name",
                Some(UserFn::from_sync(|(value, _): (Value, WriteCustomizationContext)| {
                    Ok(Some(Record::from_iter([("last_name".to_string(), value)])))
                })),
            )
            .unwrap();
        authors
            .replace_field_writing(
                "last_name",
                Some(UserFn::from_sync(|(value, _): (Value, WriteCustomizationContext)| {
                    Ok(Some(Record::from_iter([("first_name".to_string(), value)])))
                })),
            )
            .unwrap();

        let err = authors
            .create(&Caller::default(), records(json!([{ "first_name": "Loop" }])))
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Write error: Cycle detected: first_name -> last_name."
        );
    }

    #[tokio::test]
    async fn test_read_only_fields_reject_writes() {
        let memory = library();
        let datasource: Arc<DatasourceDecorator<WriteReplaceLayer>> =
            DatasourceDecorator::new(memory.clone(), Arc::new(ToolkitConfig::default()));
        let books = datasource.get_decorator("Book").unwrap();
        books.replace_field_writing("title", None).unwrap();
        assert!(books.schema().unwrap().column("Book", "title").unwrap().is_read_only);
        assert!(books.replace_field_writing("author", None).is_err());

        let err = books
            .create(&Caller::default(), records(json!([{ "title": "Forbidden", "author_id": 1 }])))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Write error: The field 'Book.title' is read-only");
        assert_eq!(memory.memory_collection("Book").unwrap().rows().len(), 3);

        let created = books
            .create(&Caller::default(), records(json!([{ "author_id": 1 }])))
            .await
            .unwrap();
        assert_eq!(created[0]["author_id"], json!(1));
    }

    #[tokio::test]
    async fn test_values_must_match_their_column_type() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();
        let caller = Caller::default();

        let err = books
            .create(&caller, records(json!([{ "title": "Dune Messiah", "author_id": "two" }])))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Write error: Wrong type for 'author_id': \"two\". Expects Number");

        let err = books
            .create(&caller, records(json!([{ "title": 42 }])))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Wrong type for 'title'"));

        let created = books
            .create(&caller, records(json!([{ "title": "Dune Messiah", "author_id": null }])))
            .await
            .unwrap();
        assert_eq!(created[0]["title"], json!("Dune Messiah"));
    }

    #[test]
    fn test_check_value_by_primitive_type() {
        let ok = |primitive: PrimitiveType, value: Value| {
            check_value("f", &ColumnSchema::new(primitive), &value).is_ok()
        };

        assert!(ok(PrimitiveType::Boolean, json!(true)));
        assert!(!ok(PrimitiveType::Boolean, json!("true")));
        assert!(ok(PrimitiveType::Dateonly, json!("2024-02-29")));
        assert!(!ok(PrimitiveType::Dateonly, json!("2023-02-29")));
        assert!(ok(PrimitiveType::Date, json!("2024-01-01T10:00:00Z")));
        assert!(ok(PrimitiveType::Timeonly, json!("10:30:00")));
        assert!(ok(PrimitiveType::Uuid, json!("67e55044-10b1-426f-9247-bb680e5fe0c8")));
        assert!(!ok(PrimitiveType::Uuid, json!("not-a-uuid")));
        assert!(ok(PrimitiveType::Point, json!([1.5, 2])));
        assert!(ok(PrimitiveType::Point, json!("1.5,2")));
        assert!(ok(PrimitiveType::Json, json!({ "any": ["thing"] })));

        let genre = ColumnSchema::new(PrimitiveType::Enum).with_enum_values(["Fantasy", "SciFi"]);
        assert!(check_value("genre", &genre, &json!("SciFi")).is_ok());
        assert!(check_value("genre", &genre, &json!("Romance")).is_err());
    }

    #[tokio::test]
    async fn test_update_writes_rewritten_patch() {
        let memory = library();
        let datasource: Arc<DatasourceDecorator<WriteReplaceLayer>> =
            DatasourceDecorator::new(memory.clone(), Arc::new(ToolkitConfig::default()));
        let authors = datasource.get_decorator("Author").unwrap();
        authors.replace_field_writing("last_name", Some(split_name())).unwrap();

        let filter = Filter::new().with_condition_tree(trellis_query::ConditionTree::leaf(
            "id",
            trellis_core::Operator::Equal,
            json!(2),
        ));
        let patch = records(json!([{ "last_name": "Brian Herbert" }])).remove(0);
        authors.update(&Caller::default(), &filter, &patch).await.unwrap();

        let rows = memory.memory_collection("Author").unwrap().rows();
        assert_eq!(rows[1]["first_name"], json!("Brian"));
        assert_eq!(rows[1]["last_name"], json!("Herbert"));
    }
}
