//! # Trellis Query
//!
//! Query primitives consumed by every collection and decorator:
//!
//! - **Projection**: the field paths a caller wants back
//! - **ConditionTree**: boolean predicates over records, with a factory
//! - **Filter / PaginatedFilter**: condition tree, search, segment, sort, page
//! - **Sort / Page**: ordering and windowing, with in-memory application
//! - **Aggregation**: grouped Count/Sum/Avg/Max/Min
//!

pub mod aggregation;
pub mod condition_tree;
pub mod filter;
pub mod page;
pub mod projection;
pub mod sort;

pub use aggregation::{
    AggregateOperation, AggregateResult, Aggregation, AggregationGroup, DateOperation,
};
pub use condition_tree::{
    Aggregator, ConditionTree, ConditionTreeBranch, ConditionTreeFactory, ConditionTreeLeaf,
};
pub use filter::{Filter, PaginatedFilter};
pub use page::Page;
pub use projection::Projection;
pub use sort::{Sort, SortClause};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
