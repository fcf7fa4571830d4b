//! Decorator layers
//!
//! Every module here provides one [`CollectionLayer`], applied to a whole
//! datasource through [`DatasourceDecorator`]. The layers are listed in the
//! order the stack applies them, nearest to the storage first.

pub mod collection;
pub mod datasource;

pub mod overrides;
pub mod create_relations;
pub mod update_relations;
pub mod write_replace;
pub mod rename_collection;
pub mod rename_field;
pub mod publication;
pub mod computed;
pub mod segment;
pub mod action;
pub mod chart;
pub mod perf_optimizer;

pub use collection::{CollectionDecorator, CollectionLayer};
pub use datasource::{DatasourceDecorator, DatasourceLayer};

pub use action::{ActionCollection, ActionContext, ActionDefinition, ActionHandler, ActionLayer};
pub use chart::{ChartCollection, ChartHandler, ChartLayer, DatasourceChartHandler, DatasourceCharts};
pub use computed::{ComputedCollection, ComputedDefinition, ComputedHandler, ComputedLayer};
pub use create_relations::{CreateRelationsCollection, CreateRelationsLayer};
pub use overrides::{
    CreateOverrideContext, CreateOverrideHandler, DeleteOverrideContext, DeleteOverrideHandler,
    OverrideCollection, OverrideLayer, UpdateOverrideContext, UpdateOverrideHandler,
};
pub use perf_optimizer::{PerfOptimizerCollection, PerfOptimizerLayer};
pub use publication::{PublicationCollection, PublicationLayer, PublishedCollections};
pub use rename_collection::{CollectionRenames, RenameCollectionCollection, RenameCollectionLayer};
pub use rename_field::{RenameFieldCollection, RenameFieldLayer};
pub use segment::{SegmentCollection, SegmentHandler, SegmentLayer};
pub use update_relations::{UpdateRelationsCollection, UpdateRelationsLayer};
pub use write_replace::{
    WriteAction, WriteCustomizationContext, WriteHandler, WriteReplaceCollection, WriteReplaceLayer,
};
