//! Pagination

use serde::{Deserialize, Serialize};
use trellis_core::types::Record;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    pub skip: usize,
    /// `None` means no limit
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(skip: usize, limit: Option<usize>) -> Self {
        Self { skip, limit }
    }

    pub fn apply(&self, records: Vec<Record>) -> Vec<Record> {
        let rest = records.into_iter().skip(self.skip);
        match self.limit {
            Some(limit) => rest.take(limit).collect(),
            None => rest.collect(),
        }
    }
}
