//! Customization surface
//!
//! [`DatasourceCustomizer`] owns a [`DecoratorStack`] and routes every
//! registration to the layer in charge of it, so callers never deal with
//! the depth of the chain. Layers below the renames know collections and
//! fields by their original names; the translation happens here.

use crate::decorators::{
    ActionDefinition, ChartHandler, ComputedDefinition, CreateOverrideContext, CreateOverrideHandler,
    DatasourceChartHandler, DeleteOverrideContext, DeleteOverrideHandler, RenameFieldCollection,
    SegmentHandler, UpdateOverrideContext, UpdateOverrideHandler, WriteCustomizationContext,
    WriteHandler,
};
use crate::interfaces::Datasource;
use crate::stack::DecoratorStack;
use std::sync::Arc;
use trellis_core::schema::CollectionSchema;
use trellis_core::types::{Record, Value};
use trellis_core::{ToolkitConfig, ToolkitResult};
use trellis_query::Filter;

// ============================================================================
// DatasourceCustomizer
// ============================================================================

pub struct DatasourceCustomizer {
    stack: Arc<DecoratorStack>,
}

impl DatasourceCustomizer {
    pub fn new(datasource: Arc<dyn Datasource>, config: ToolkitConfig) -> ToolkitResult<Self> {
        Ok(Self {
            stack: Arc::new(DecoratorStack::new(datasource, config)?),
        })
    }

    pub fn stack(&self) -> &DecoratorStack {
        &self.stack
    }

    /// Customize one collection, by its current public name
    pub fn customize_collection(&self, name: &str) -> ToolkitResult<CollectionCustomizer> {
        self.stack.datasource().get_collection(name)?;
        Ok(CollectionCustomizer {
            stack: Arc::clone(&self.stack),
            name: name.to_string(),
        })
    }

    /// Public names of the collections
    pub fn collection_names(&self) -> Vec<String> {
        self.stack
            .datasource()
            .collections()
            .iter()
            .map(|collection| collection.name())
            .collect()
    }

    pub fn rename_collection(&self, current_name: &str, new_name: &str) -> ToolkitResult<&Self> {
        self.stack.rename_collection.rename_collection(current_name, new_name)?;
        Ok(self)
    }

    pub fn rename_collections<I, K, V>(&self, renames: I) -> ToolkitResult<&Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        self.stack.rename_collection.rename_collections(renames)?;
        Ok(self)
    }

    pub fn remove_collection(&self, name: &str) -> ToolkitResult<&Self> {
        self.stack.publication.remove_collection(name)?;
        Ok(self)
    }

    pub fn keep_collections_matching(&self, include: &[&str], exclude: &[&str]) -> ToolkitResult<&Self> {
        self.stack.publication.keep_collections_matching(include, exclude)?;
        Ok(self)
    }

    pub fn add_chart(&self, name: &str, definition: DatasourceChartHandler) -> ToolkitResult<&Self> {
        self.stack.chart.add_chart(name, definition)?;
        Ok(self)
    }

    /// Validate the customized schema and hand out the datasource to serve
    pub fn finalize(&self) -> ToolkitResult<Arc<dyn Datasource>> {
        self.stack.finalize()
    }
}

// ============================================================================
// CollectionCustomizer
// ============================================================================

#[derive(Clone)]
pub struct CollectionCustomizer {
    stack: Arc<DecoratorStack>,
    name: String,
}

impl CollectionCustomizer {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Schema as exposed by the outermost layer
    pub fn schema(&self) -> ToolkitResult<Arc<CollectionSchema>> {
        self.stack.datasource().get_collection(&self.name)?.schema()
    }

    /// Name of this collection for the layers below the collection renames
    fn child_name(&self) -> String {
        self.stack
            .rename_collection
            .layer()
            .child_name(&self.name)
            .unwrap_or_else(|| self.name.clone())
    }

    pub fn add_field(&self, name: &str, definition: ComputedDefinition) -> ToolkitResult<&Self> {
        self.stack.computed.get_decorator(&self.name)?.add_computed(name, definition)?;
        Ok(self)
    }

    pub fn add_action(&self, name: &str, definition: ActionDefinition) -> ToolkitResult<&Self> {
        self.stack.action.get_decorator(&self.name)?.add_action(name, definition)?;
        Ok(self)
    }

    pub fn add_segment(&self, name: &str, definition: SegmentHandler) -> ToolkitResult<&Self> {
        self.stack.segment.get_decorator(&self.name)?.add_segment(name, definition)?;
        Ok(self)
    }

    pub fn add_chart(&self, name: &str, definition: ChartHandler) -> ToolkitResult<&Self> {
        self.stack.chart.get_decorator(&self.name)?.add_chart(name, definition)?;
        Ok(self)
    }

    pub fn change_field_visibility(&self, name: &str, visible: bool) -> ToolkitResult<&Self> {
        self.stack
            .publication
            .get_decorator(&self.name)?
            .change_field_visibility(name, visible)?;
        Ok(self)
    }

    pub fn remove_field<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> ToolkitResult<&Self> {
        for name in names {
            self.change_field_visibility(name, false)?;
        }
        Ok(self)
    }

    pub fn rename_field(&self, current_name: &str, new_name: &str) -> ToolkitResult<&Self> {
        self.stack
            .rename_field
            .get_decorator(&self.name)?
            .rename_field(current_name, new_name)?;
        Ok(self)
    }

    /// `None` makes the field read-only
    pub fn replace_field_writing(&self, name: &str, definition: Option<WriteHandler>) -> ToolkitResult<&Self> {
        let renames = self.stack.rename_field.get_decorator(&self.name)?;
        let child_field = renames.path_to_child(name)?;
        let definition = definition.map(|handler| -> WriteHandler {
            let before = Arc::clone(&renames);
            let after = Arc::clone(&renames);
            handler.adapt(
                self.blocking(),
                move |(value, context): (Value, WriteCustomizationContext)| {
                    let context = WriteCustomizationContext {
                        context: before.context(&context.context.caller)?,
                        action: context.action,
                        record: before.record_from_child(&context.record)?,
                        filter: context.filter.map(|f| filter_from_child(&before, f)).transpose()?,
                    };
                    Ok((value, context))
                },
                move |patch: Option<Record>| patch.map(|p| after.record_to_child(&p)).transpose(),
            )
        });
        self.stack
            .write_replace
            .get_decorator(&self.child_name())?
            .replace_field_writing(&child_field, definition)?;
        Ok(self)
    }

    /// The handler sees public names; `context.collection` is the storage collection
    pub fn override_create(&self, handler: CreateOverrideHandler) -> ToolkitResult<&Self> {
        let before = self.stack.rename_field.get_decorator(&self.name)?;
        let after = Arc::clone(&before);
        let handler: CreateOverrideHandler = handler.adapt(
            self.blocking(),
            move |context: CreateOverrideContext| {
                Ok(CreateOverrideContext {
                    data: context
                        .data
                        .iter()
                        .map(|record| before.record_from_child(record))
                        .collect::<ToolkitResult<Vec<_>>>()?,
                    ..context
                })
            },
            move |created: Vec<Record>| {
                created.iter().map(|record| after.record_to_child(record)).collect()
            },
        );
        self.stack.overrides.get_decorator(&self.child_name())?.override_create(handler);
        Ok(self)
    }

    /// The handler sees public names; `context.collection` is the storage collection
    pub fn override_update(&self, handler: UpdateOverrideHandler) -> ToolkitResult<&Self> {
        let renames = self.stack.rename_field.get_decorator(&self.name)?;
        let handler: UpdateOverrideHandler = handler.adapt(
            self.blocking(),
            move |context: UpdateOverrideContext| {
                Ok(UpdateOverrideContext {
                    filter: filter_from_child(&renames, context.filter)?,
                    patch: renames.record_from_child(&context.patch)?,
                    ..context
                })
            },
            Ok,
        );
        self.stack.overrides.get_decorator(&self.child_name())?.override_update(handler);
        Ok(self)
    }

    /// The handler sees public names; `context.collection` is the storage collection
    pub fn override_delete(&self, handler: DeleteOverrideHandler) -> ToolkitResult<&Self> {
        let renames = self.stack.rename_field.get_decorator(&self.name)?;
        let handler: DeleteOverrideHandler = handler.adapt(
            self.blocking(),
            move |context: DeleteOverrideContext| {
                Ok(DeleteOverrideContext {
                    filter: filter_from_child(&renames, context.filter)?,
                    ..context
                })
            },
            Ok,
        );
        self.stack.overrides.get_decorator(&self.child_name())?.override_delete(handler);
        Ok(self)
    }

    fn blocking(&self) -> bool {
        self.stack.config().run_sync_handlers_blocking
    }
}

/// Express a filter of the layers below the renames with public field names
fn filter_from_child(renames: &RenameFieldCollection, mut filter: Filter) -> ToolkitResult<Filter> {
    if let Some(tree) = &filter.condition_tree {
        filter.condition_tree = Some(tree.replace_fields(|path| renames.path_from_child(path))?);
    }
    Ok(filter)
}

// ============================================================================
// Tests
// ============================================================================
