//! The decorator stack
//!
//! Builds every layer around a base datasource, nearest to the storage
//! first. A layer only relies on the layers below it: computed fields see
//! renamed and published names, writes are intercepted before renames.

use crate::decorators::{
    ActionLayer, ChartLayer, ComputedLayer, CreateRelationsLayer, DatasourceDecorator, OverrideLayer,
    PerfOptimizerLayer, PublicationLayer, RenameCollectionLayer, RenameFieldLayer, SegmentLayer,
    UpdateRelationsLayer, WriteReplaceLayer,
};
use crate::interfaces::Datasource;
use crate::validation::{SchemaGraph, ValidationResult, Validator};
use std::sync::Arc;
use trellis_core::{ToolkitConfig, ToolkitResult, Validatable};

pub struct DecoratorStack {
    config: Arc<ToolkitConfig>,
    base: Arc<dyn Datasource>,

    pub overrides: Arc<DatasourceDecorator<OverrideLayer>>,
    pub create_relations: Arc<DatasourceDecorator<CreateRelationsLayer>>,
    pub update_relations: Arc<DatasourceDecorator<UpdateRelationsLayer>>,
    pub write_replace: Arc<DatasourceDecorator<WriteReplaceLayer>>,
    pub rename_collection: Arc<DatasourceDecorator<RenameCollectionLayer>>,
    pub rename_field: Arc<DatasourceDecorator<RenameFieldLayer>>,
    pub publication: Arc<DatasourceDecorator<PublicationLayer>>,
    pub computed: Arc<DatasourceDecorator<ComputedLayer>>,
    pub segment: Arc<DatasourceDecorator<SegmentLayer>>,
    pub action: Arc<DatasourceDecorator<ActionLayer>>,
    pub chart: Arc<DatasourceDecorator<ChartLayer>>,
    pub perf_optimizer: Option<Arc<DatasourceDecorator<PerfOptimizerLayer>>>,
}

impl DecoratorStack {
    pub fn new(datasource: Arc<dyn Datasource>, config: ToolkitConfig) -> ToolkitResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let overrides = DatasourceDecorator::<OverrideLayer>::new(Arc::clone(&datasource), Arc::clone(&config));
        let create_relations = DatasourceDecorator::<CreateRelationsLayer>::new(overrides.clone(), Arc::clone(&config));
        let update_relations = DatasourceDecorator::<UpdateRelationsLayer>::new(create_relations.clone(), Arc::clone(&config));
        let write_replace = DatasourceDecorator::<WriteReplaceLayer>::new(update_relations.clone(), Arc::clone(&config));

        let rename_collection = DatasourceDecorator::<RenameCollectionLayer>::new(write_replace.clone(), Arc::clone(&config));
        let rename_field = DatasourceDecorator::<RenameFieldLayer>::new(rename_collection.clone(), Arc::clone(&config));
        let publication = DatasourceDecorator::<PublicationLayer>::new(rename_field.clone(), Arc::clone(&config));

        let computed = DatasourceDecorator::<ComputedLayer>::new(publication.clone(), Arc::clone(&config));
        let segment = DatasourceDecorator::<SegmentLayer>::new(computed.clone(), Arc::clone(&config));
        let action = DatasourceDecorator::<ActionLayer>::new(segment.clone(), Arc::clone(&config));
        let chart = DatasourceDecorator::<ChartLayer>::new(action.clone(), Arc::clone(&config));

        let perf_optimizer = config
            .enable_perf_optimizer
            .then(|| DatasourceDecorator::<PerfOptimizerLayer>::new(chart.clone(), Arc::clone(&config)));

        tracing::info!(
            "Built decorator stack over {} collection(s), perf optimizer {}",
            datasource.collections().len(),
            if perf_optimizer.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            config,
            base: datasource,
            overrides,
            create_relations,
            update_relations,
            write_replace,
            rename_collection,
            rename_field,
            publication,
            computed,
            segment,
            action,
            chart,
            perf_optimizer,
        })
    }

    pub fn config(&self) -> &ToolkitConfig {
        &self.config
    }

    /// The datasource the stack was built on
    pub fn base(&self) -> &Arc<dyn Datasource> {
        &self.base
    }

    /// The outermost layer, the one requests go through
    pub fn datasource(&self) -> Arc<dyn Datasource> {
        match &self.perf_optimizer {
            Some(optimizer) => optimizer.clone() as Arc<dyn Datasource>,
            None => self.chart.clone() as Arc<dyn Datasource>,
        }
    }

    /// Check the outermost schema graph
    pub fn validate(&self) -> ToolkitResult<ValidationResult> {
        let graph = SchemaGraph::snapshot(self.datasource().as_ref())?;
        let result = Validator::with_default_rules().validate(&graph);
        for warning in &result.warnings {
            tracing::warn!("{}", warning);
        }
        Ok(result)
    }

    /// Validate, if enabled, then hand out the outermost datasource
    pub fn finalize(&self) -> ToolkitResult<Arc<dyn Datasource>> {
        if self.config.validate_on_build {
            self.validate()?.to_result()?;
        }
        Ok(self.datasource())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{library, records};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use trellis_core::types::Caller;
    use trellis_query::{PaginatedFilter, Projection};

    #[tokio::test]
    async fn test_outermost_layer_serves_requests() {
        let stack = DecoratorStack::new(library(), ToolkitConfig::default()).unwrap();
        assert!(stack.perf_optimizer.is_some());

        let datasource = stack.finalize().unwrap();
        let books = datasource.get_collection("Book").unwrap();
        let result = books
            .list(
                &Caller::default(),
                &PaginatedFilter::new(),
                &Projection::from(["title", "author:id"]),
            )
            .await
            .unwrap();
        assert_eq!(result[2], records(json!([{ "title": "Dune", "author": { "id": 2 } }])).remove(0));
    }

    #[test]
    fn test_perf_optimizer_can_be_disabled() {
        let config = ToolkitConfig::default().with_perf_optimizer(false);
        let stack = DecoratorStack::new(library(), config).unwrap();
        assert!(stack.perf_optimizer.is_none());
        assert_eq!(stack.datasource().collections().len(), 2);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = ToolkitConfig::default().with_timezone("Europe / Paris");
        assert!(DecoratorStack::new(library(), config).is_err());
    }

    #[test]
    fn test_customizations_below_are_visible_on_top() {
        let stack = DecoratorStack::new(library(), ToolkitConfig::default()).unwrap();
        stack.rename_collection.rename_collection("Book", "Novel").unwrap();
        stack
            .publication
            .get_decorator("Novel")
            .unwrap()
            .change_field_visibility("title", false)
            .unwrap();

        let datasource = stack.datasource();
        let novel = datasource.get_collection("Novel").unwrap();
        assert!(!novel.schema().unwrap().fields.contains_key("title"));
        assert!(stack.validate().unwrap().valid);
    }
}
