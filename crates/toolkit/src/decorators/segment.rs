//! Segments: named filter presets
//!
//! A filter carrying the name of a segment defined here is rewritten into the
//! intersection of the segment's condition tree and the caller's one. The
//! segment name is cleared so the layers below never see it.

use super::collection::{CollectionDecorator, CollectionLayer};
use crate::context::CollectionContext;
use crate::handler::UserFn;
use crate::interfaces::Collection;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};
use trellis_core::schema::CollectionSchema;
use trellis_core::types::Caller;
use trellis_core::{ToolkitError, ToolkitResult};
use trellis_query::{ConditionTree, ConditionTreeFactory, Filter};

pub type SegmentHandler = UserFn<CollectionContext, ConditionTree>;

#[derive(Default)]
pub struct SegmentLayer {
    segments: RwLock<BTreeMap<String, SegmentHandler>>,
}

pub type SegmentCollection = CollectionDecorator<SegmentLayer>;

impl CollectionDecorator<SegmentLayer> {
    pub fn add_segment(&self, name: &str, definition: SegmentHandler) -> ToolkitResult<()> {
        let replaced = self
            .layer()
            .segments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), definition)
            .is_some();
        if replaced {
            tracing::warn!("Segment '{}' of '{}' was defined twice, keeping the last one", name, self.name());
        } else {
            tracing::info!("Adding segment '{}' to '{}'", name, self.name());
        }
        self.invalidate_schema();
        Ok(())
    }

    fn segment(&self, name: &str) -> Option<SegmentHandler> {
        self.layer()
            .segments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    /// Every leaf of a segment must target a field of this collection
    fn check_tree(&self, segment: &str, tree: &ConditionTree) -> ToolkitResult<()> {
        let schema = Collection::schema(self)?;
        let mut unknown = None;
        tree.for_each_leaf(&mut |leaf| {
            if unknown.is_none() && !schema.has_path_root(&leaf.field) {
                unknown = Some(leaf.field.clone());
            }
        });
        match unknown {
            Some(field) => Err(ToolkitError::ConditionTree(format!(
                "Segment '{segment}' of '{}' filters on the unknown field '{field}'",
                self.name()
            ))),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CollectionLayer for SegmentLayer {
    type Datasource = ();

    fn refine_schema(
        &self,
        _this: &CollectionDecorator<Self>,
        mut schema: CollectionSchema,
    ) -> ToolkitResult<CollectionSchema> {
        let segments = self.segments.read().unwrap_or_else(PoisonError::into_inner);
        for name in segments.keys() {
            if !schema.segments.contains(name) {
                schema.segments.push(name.clone());
            }
        }
        Ok(schema)
    }

    async fn refine_filter(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        mut filter: Filter,
    ) -> ToolkitResult<Filter> {
        let Some(definition) = filter.segment.as_deref().and_then(|name| this.segment(name)) else {
            return Ok(filter);
        };
        let name = filter.segment.take().unwrap_or_default();

        let tree = definition
            .call(this.context(caller)?, this.config().run_sync_handlers_blocking)
            .await?;
        this.check_tree(&name, &tree)?;
        tracing::debug!("Resolved segment '{}' of '{}'", name, this.name());

        filter.condition_tree = ConditionTreeFactory::intersect(vec![Some(tree), filter.condition_tree.take()]);
        Ok(filter)
    }
}

// ============================================================================
// Tests
// ============================================================================
