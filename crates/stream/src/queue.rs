use std::collections::HashSet;

use paging_common::{StoreId, StructureKey};

use crate::cell::CellId;

/// A structure waiting to be constructed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueEntry {
    pub cell: CellId,
    pub key: StructureKey,
    /// Ranking distance; lower is built sooner.
    pub priority_distance: f32,
}

/// Pending construction requests, kept with the nearest entry at the tail so
/// the load phase pops in O(1).
///
/// A key is present at most once; the membership set makes that check cheap.
#[derive(Debug, Default)]
pub struct LoadQueue {
    entries: Vec<QueueEntry>,
    keys: HashSet<StructureKey>,
}

impl LoadQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: StructureKey) -> bool {
        self.keys.contains(&key)
    }

    /// Entries in order, farthest first.
    pub fn entries(&self) -> &[QueueEntry] {
        &self.entries
    }

    pub fn pending_for_cell(&self, cell: CellId) -> usize {
        self.entries.iter().filter(|e| e.cell == cell).count()
    }

    /// Insert keeping the current order. Returns false if the key is already
    /// queued.
    pub fn push(&mut self, entry: QueueEntry) -> bool {
        if !self.keys.insert(entry.key) {
            return false;
        }
        let at = self
            .entries
            .partition_point(|e| e.priority_distance >= entry.priority_distance);
        self.entries.insert(at, entry);
        true
    }

    /// Pop the nearest entry.
    pub fn pop_nearest(&mut self) -> Option<QueueEntry> {
        let entry = self.entries.pop()?;
        self.keys.remove(&entry.key);
        Some(entry)
    }

    /// Recompute every priority and re-sort, nearest last. The sort is stable
    /// so ties keep their arrival order.
    pub fn reprioritize(&mut self, mut priority: impl FnMut(&QueueEntry) -> f32) {
        for entry in &mut self.entries {
            let p = priority(entry);
            entry.priority_distance = p;
        }
        self.entries
            .sort_by(|a, b| b.priority_distance.total_cmp(&a.priority_distance));
    }

    pub fn remove_key(&mut self, key: StructureKey) -> bool {
        if !self.keys.remove(&key) {
            return false;
        }
        self.entries.retain(|e| e.key != key);
        true
    }

    /// Drop every entry owned by `cell`. Returns how many were removed.
    pub fn remove_cell(&mut self, cell: CellId) -> usize {
        self.remove_where(|e| e.cell == cell)
    }

    /// Drop every entry belonging to `store`. Returns how many were removed.
    pub fn remove_store(&mut self, store: StoreId) -> usize {
        self.remove_where(|e| e.key.store == store)
    }

    pub fn remove_where(&mut self, mut pred: impl FnMut(&QueueEntry) -> bool) -> usize {
        let before = self.entries.len();
        let keys = &mut self.keys;
        self.entries.retain(|e| {
            if pred(e) {
                keys.remove(&e.key);
                false
            } else {
                true
            }
        });
        before - self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.keys.clear();
    }
}
