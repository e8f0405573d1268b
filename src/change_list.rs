//! The change-list propagated between driver iterations (spec §5): a map
//! from table name to the set of key tuples that changed, accumulated
//! across a wave of steps and consumed by the next wave.
//!
//! Grounded on `datapipe.compute.run_steps_changelist`
//! (`examples/original_source/datapipe/compute.py`), which threads a
//! `ChangeList` through repeated calls to each step's `get_changed_idx`
//! until a pass produces no further changes.

use std::collections::HashMap;

use crate::dataframe::IndexFrame;

/// Per-table accumulated change sets.
#[derive(Debug, Clone, Default)]
pub struct ChangeList {
    tables: HashMap<String, IndexFrame>,
}

impl ChangeList {
    pub fn new() -> Self {
        ChangeList::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(|idx| idx.is_empty())
    }

    pub fn get(&self, table: &str) -> Option<&IndexFrame> {
        self.tables.get(table)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }

    /// Union `idx` into `table`'s entry (set semantics — spec §5 requires
    /// the merge to be commutative and associative).
    pub fn append(&mut self, table: impl Into<String>, idx: IndexFrame) {
        if idx.is_empty() {
            return;
        }
        let table = table.into();
        self.tables
            .entry(table)
            .and_modify(|existing| *existing = existing.union(&idx))
            .or_insert(idx);
    }

    /// Merge another change-list into this one, table by table.
    pub fn extend(&mut self, other: ChangeList) {
        for (table, idx) in other.tables {
            self.append(table, idx);
        }
    }
}
