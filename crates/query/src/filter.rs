//! Filters
//!
//! `Filter` selects records (condition tree, full-text search, segment);
//! `PaginatedFilter` adds ordering and a page window, and is what `list`
//! receives.

use crate::condition_tree::ConditionTree;
use crate::page::Page;
use crate::sort::Sort;
use trellis_core::{ToolkitError, ToolkitResult};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub condition_tree: Option<ConditionTree>,
    pub search: Option<String>,
    pub search_extended: bool,
    pub segment: Option<String>,
    pub timezone: Option<String>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition_tree(mut self, tree: ConditionTree) -> Self {
        self.condition_tree = Some(tree);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>, extended: bool) -> Self {
        self.search = Some(search.into());
        self.search_extended = extended;
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = Some(timezone.into());
        self
    }

    /// A filter can be moved under a relation only when it is a plain tree
    pub fn is_nestable(&self) -> bool {
        self.search.as_deref().is_none_or(str::is_empty) && self.segment.is_none()
    }

    pub fn nest(&self, prefix: &str) -> ToolkitResult<Filter> {
        if !self.is_nestable() {
            return Err(ToolkitError::Filter("Filter can't be nested".to_string()));
        }
        Ok(Filter {
            condition_tree: self.condition_tree.as_ref().map(|t| t.nest(prefix)),
            ..self.clone()
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaginatedFilter {
    pub filter: Filter,
    pub sort: Option<Sort>,
    pub page: Option<Page>,
}

impl PaginatedFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_condition_tree(mut self, tree: ConditionTree) -> Self {
        self.filter.condition_tree = Some(tree);
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.filter.segment = Some(segment.into());
        self
    }

    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn with_page(mut self, page: Page) -> Self {
        self.page = Some(page);
        self
    }

    pub fn condition_tree(&self) -> Option<&ConditionTree> {
        self.filter.condition_tree.as_ref()
    }

    pub fn to_base_filter(&self) -> Filter {
        self.filter.clone()
    }

    pub fn is_nestable(&self) -> bool {
        self.filter.is_nestable()
    }

    pub fn nest(&self, prefix: &str) -> ToolkitResult<PaginatedFilter> {
        Ok(PaginatedFilter {
            filter: self.filter.nest(prefix)?,
            sort: self.sort.as_ref().map(|s| s.nest(prefix)),
            page: self.page,
        })
    }
}

impl From<Filter> for PaginatedFilter {
    fn from(filter: Filter) -> Self {
        PaginatedFilter {
            filter,
            sort: None,
            page: None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
