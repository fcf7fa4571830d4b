//! Actions
//!
//! Custom operations triggered on one record, a selection or the whole
//! collection. Forms are static: their fields are declared with the action
//! and only receive the values already entered.

use super::collection::{CollectionDecorator, CollectionLayer};
use crate::context::CollectionContext;
use crate::handler::UserFn;
use crate::interfaces::{ActionField, ActionResult, Collection};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use trellis_core::schema::{ActionSchema, ActionScope, CollectionSchema};
use trellis_core::types::{Caller, Record, Value};
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::{Filter, PaginatedFilter, Projection};

/// What an action handler gets to work with
#[derive(Clone, Debug)]
pub struct ActionContext {
    pub context: CollectionContext,
    pub scope: ActionScope,
    pub form_values: Record,
    pub filter: Filter,
}

impl ActionContext {
    /// The records the action was triggered on
    pub async fn get_records(&self, projection: &Projection) -> ToolkitResult<Vec<Record>> {
        let collection = &self.context.collection;
        let schema = collection.schema()?;
        for path in projection.iter() {
            if !schema.has_path_root(path) {
                return Err(ToolkitError::field_not_found(collection.name(), path));
            }
        }
        collection
            .list(&self.context.caller, &PaginatedFilter::from(self.filter.clone()), projection)
            .await
    }

    /// The single record of a `Single` action
    pub async fn get_record(&self, projection: &Projection) -> ToolkitResult<Record> {
        if self.scope != ActionScope::Single {
            return Err(ToolkitError::Unsupported {
                collection: self.context.collection_name(),
                operation: "get_record on an action which is not single".to_string(),
            });
        }
        self.get_records(projection).await?.into_iter().next().ok_or_else(|| {
            ToolkitError::Record(format!(
                "The action of '{}' was triggered on no record",
                self.context.collection_name()
            ))
        })
    }

    pub fn form_value(&self, label: &str) -> Option<&Value> {
        self.form_values.get(label)
    }
}

pub type ActionHandler = UserFn<ActionContext, ActionResult>;

#[derive(Clone, Debug)]
pub struct ActionDefinition {
    pub scope: ActionScope,
    pub generate_file: bool,
    pub form: Vec<ActionField>,
    pub execute: ActionHandler,
}

impl ActionDefinition {
    pub fn new(scope: ActionScope, execute: ActionHandler) -> Self {
        Self {
            scope,
            generate_file: false,
            form: Vec::new(),
            execute,
        }
    }

    pub fn with_form(mut self, fields: impl IntoIterator<Item = ActionField>) -> Self {
        self.form.extend(fields);
        self
    }

    pub fn generating_file(mut self) -> Self {
        self.generate_file = true;
        self
    }
}

#[derive(Default)]
pub struct ActionLayer {
    actions: RwLock<BTreeMap<String, ActionDefinition>>,
}

pub type ActionCollection = CollectionDecorator<ActionLayer>;

impl CollectionDecorator<ActionLayer> {
    pub fn add_action(&self, name: &str, action: ActionDefinition) -> ToolkitResult<()> {
        let mut labels: Vec<&str> = action.form.iter().map(|f| f.label.as_str()).collect();
        labels.sort_unstable();
        if let Some(pair) = labels.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(ToolkitError::InvalidSchema(format!(
                "The form of the action '{name}' declares the field '{}' twice",
                pair[0]
            )));
        }

        tracing::info!("Adding action '{}' to '{}'", name, self.name());
        self.layer()
            .actions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), action);
        self.invalidate_schema();
        Ok(())
    }

    fn action(&self, name: &str) -> Option<ActionDefinition> {
        self.layer()
            .actions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }
}

#[async_trait]
impl CollectionLayer for ActionLayer {
    type Datasource = ();

    fn refine_schema(
        &self,
        _this: &CollectionDecorator<Self>,
        mut schema: CollectionSchema,
    ) -> ToolkitResult<CollectionSchema> {
        let actions = self.actions.read().unwrap_or_else(PoisonError::into_inner);
        for (name, action) in actions.iter() {
            schema.actions.insert(
                name.clone(),
                ActionSchema {
                    scope: action.scope,
                    generate_file: action.generate_file,
                    static_form: true,
                },
            );
        }
        Ok(schema)
    }

    async fn execute(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        name: &str,
        data: &Record,
        filter: Option<&Filter>,
    ) -> ToolkitResult<ActionResult> {
        let Some(action) = this.action(name) else {
            return this.child().execute(caller, name, data, filter).await;
        };

        tracing::debug!("Executing action '{}' of '{}'", name, this.name());
        let context = ActionContext {
            context: this.context(caller)?,
            scope: action.scope,
            form_values: data.clone(),
            filter: filter.cloned().unwrap_or_default(),
        };
        action
            .execute
            .call(context, this.config().run_sync_handlers_blocking)
            .await
    }

    async fn get_form(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        name: &str,
        data: Option<&Record>,
        filter: Option<&Filter>,
    ) -> ToolkitResult<Vec<ActionField>> {
        let Some(action) = this.action(name) else {
            return this.child().get_form(caller, name, data, filter).await;
        };

        Ok(action
            .form
            .into_iter()
            .map(|mut field| {
                if let Some(value) = data.and_then(|d| d.get(&field.label)) {
                    field.value = Some(value.clone());
                }
                field.watch_changes = false;
                field
            })
            .collect())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorators::DatasourceDecorator;
    use crate::interfaces::ActionFieldType;
    use crate::test_support::{library, records};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use trellis_core::{Operator, ToolkitConfig};
    use trellis_query::ConditionTree;

    fn decorated() -> Arc<DatasourceDecorator<ActionLayer>> {
        DatasourceDecorator::new(library(), Arc::new(ToolkitConfig::default()))
    }

    fn field(label: &str, value: Option<Value>) -> ActionField {
        ActionField {
            label: label.to_string(),
            field_type: ActionFieldType::String,
            description: None,
            is_required: true,
            is_read_only: false,
            value,
            enum_values: None,
            collection_name: None,
            watch_changes: false,
        }
    }

    fn rename_action() -> ActionDefinition {
        ActionDefinition::new(
            ActionScope::Single,
            UserFn::from_async(|context: ActionContext| async move {
                let record = context.get_record(&Projection::from(["title"])).await?;
                let title = context.form_value("title").cloned().unwrap_or(Value::Null);
                let mut patch = Record::new();
                patch.insert("title".to_string(), title.clone());
                context
                    .context
                    .collection
                    .update(&context.context.caller, &context.filter, &patch)
                    .await?;
                Ok(ActionResult::success(format!("{} is now {}", record["title"], title)).invalidating(["Book"]))
            }),
        )
        .with_form([field("title", Some(json!("Untitled")))])
    }

    #[tokio::test]
    async fn test_execute_runs_the_handler_on_the_selection() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();
        books.add_action("Rename", rename_action()).unwrap();

        let filter = Filter::new().with_condition_tree(ConditionTree::leaf("id", Operator::Equal, json!(3)));
        let data = records(json!([{ "title": "Dune Messiah" }])).remove(0);
        let result = books
            .execute(&Caller::default(), "Rename", &data, Some(&filter))
            .await
            .unwrap();

        assert_eq!(
            result,
            ActionResult::success("\"Dune\" is now \"Dune Messiah\"").invalidating(["Book"])
        );
        let titles = books
            .list(&Caller::default(), &PaginatedFilter::from(filter), &Projection::from(["title"]))
            .await
            .unwrap();
        assert_eq!(titles, records(json!([{ "title": "Dune Messiah" }])));
    }

    #[tokio::test]
    async fn test_schema_and_static_form() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();
        books.add_action("Rename", rename_action().generating_file()).unwrap();

        let schema = books.schema().unwrap();
        assert_eq!(
            schema.actions["Rename"],
            ActionSchema {
                scope: ActionScope::Single,
                generate_file: true,
                static_form: true
            }
        );

        let form = books.get_form(&Caller::default(), "Rename", None, None).await.unwrap();
        assert_eq!(form, vec![field("title", Some(json!("Untitled")))]);

        let data = records(json!([{ "title": "Typed" }])).remove(0);
        let form = books.get_form(&Caller::default(), "Rename", Some(&data), None).await.unwrap();
        assert_eq!(form[0].value, Some(json!("Typed")));
    }

    #[tokio::test]
    async fn test_unknown_actions_reach_the_child() {
        let datasource = decorated();
        let books = datasource.get_decorator("Book").unwrap();
        let err = books
            .execute(&Caller::default(), "Nope", &Record::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolkitError::ActionNotFound { .. }));

        let duplicated = rename_action().with_form([field("title", None)]);
        assert!(books.add_action("Twice", duplicated).is_err());
    }
}
