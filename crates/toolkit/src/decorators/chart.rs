//! Charts
//!
//! Collection charts are rendered for one record; datasource charts are
//! global. Names must be unique at their level, including the charts the
//! layers below already define.

use super::collection::{CollectionDecorator, CollectionLayer};
use super::datasource::{DatasourceDecorator, DatasourceLayer};
use crate::context::{ChartContext, DatasourceContext};
use crate::handler::UserFn;
use crate::interfaces::{Chart, Collection, Datasource};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};
use trellis_core::records::CompositeId;
use trellis_core::schema::{CollectionSchema, DatasourceSchema};
use trellis_core::types::Caller;
use trellis_core::{ToolkitError, ToolkitResult};

pub type ChartHandler = UserFn<ChartContext, Chart>;
pub type DatasourceChartHandler = UserFn<DatasourceContext, Chart>;

// ============================================================================
// Datasource charts
// ============================================================================

struct DatasourceChart {
    handler: DatasourceChartHandler,
    blocking: bool,
}

#[derive(Default)]
pub struct DatasourceCharts {
    charts: RwLock<BTreeMap<String, DatasourceChart>>,
}

impl DatasourceCharts {
    fn get(&self, name: &str) -> Option<(DatasourceChartHandler, bool)> {
        self.charts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|chart| (chart.handler.clone(), chart.blocking))
    }
}

#[async_trait]
impl DatasourceLayer for DatasourceCharts {
    fn refine_schema(&self, mut schema: DatasourceSchema) -> ToolkitResult<DatasourceSchema> {
        let charts = self.charts.read().unwrap_or_else(PoisonError::into_inner);
        for name in charts.keys() {
            if schema.charts.contains(name) {
                tracing::warn!("Chart '{}' is defined twice in the datasource", name);
                return Err(ToolkitError::DuplicateChart(name.clone()));
            }
            schema.charts.push(name.clone());
        }
        Ok(schema)
    }

    async fn render_chart(
        &self,
        datasource: Arc<dyn Datasource>,
        child: &dyn Datasource,
        caller: &Caller,
        name: &str,
    ) -> ToolkitResult<Chart> {
        let Some((handler, blocking)) = self.get(name) else {
            return child.render_chart(caller, name).await;
        };
        tracing::debug!("Rendering datasource chart '{}'", name);
        handler
            .call(DatasourceContext::new(datasource, caller.clone()), blocking)
            .await
    }
}

impl DatasourceDecorator<ChartLayer> {
    pub fn add_chart(&self, name: &str, definition: DatasourceChartHandler) -> ToolkitResult<()> {
        if Datasource::schema(self)?.charts.iter().any(|chart| chart == name) {
            return Err(ToolkitError::DuplicateChart(name.to_string()));
        }

        tracing::info!("Adding datasource chart '{}'", name);
        self.layer()
            .charts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                name.to_string(),
                DatasourceChart {
                    handler: definition,
                    blocking: self.config().run_sync_handlers_blocking,
                },
            );
        Ok(())
    }
}

// ============================================================================
// Collection charts
// ============================================================================

#[derive(Default)]
pub struct ChartLayer {
    charts: RwLock<BTreeMap<String, ChartHandler>>,
}

pub type ChartCollection = CollectionDecorator<ChartLayer>;

impl CollectionDecorator<ChartLayer> {
    pub fn add_chart(&self, name: &str, definition: ChartHandler) -> ToolkitResult<()> {
        if Collection::schema(self)?.charts.iter().any(|chart| chart == name) {
            return Err(ToolkitError::DuplicateChart(name.to_string()));
        }

        tracing::info!("Adding chart '{}' to '{}'", name, self.name());
        self.layer()
            .charts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), definition);
        self.invalidate_schema();
        Ok(())
    }
}

#[async_trait]
impl CollectionLayer for ChartLayer {
    type Datasource = DatasourceCharts;

    fn refine_schema(
        &self,
        _this: &CollectionDecorator<Self>,
        mut schema: CollectionSchema,
    ) -> ToolkitResult<CollectionSchema> {
        let charts = self.charts.read().unwrap_or_else(PoisonError::into_inner);
        schema.charts.extend(charts.keys().cloned());
        Ok(schema)
    }

    async fn render_chart(
        &self,
        this: &CollectionDecorator<Self>,
        caller: &Caller,
        name: &str,
        record_id: &CompositeId,
    ) -> ToolkitResult<Chart> {
        let handler = self
            .charts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned();
        let Some(handler) = handler else {
            return this.child().render_chart(caller, name, record_id).await;
        };

        let context = ChartContext {
            context: this.context(caller)?,
            record_id: record_id.clone(),
        };
        handler.call(context, this.config().run_sync_handlers_blocking).await
    }
}

// ============================================================================
// Tests
// ============================================================================
