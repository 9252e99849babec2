//! Cross-checks between the grid's bookkeeping and the stores it pages for.
//!
//! Nothing here mutates. Tooling and tests call [`Grid::check_invariants`]
//! after any sequence of operations; an empty result means the grid is sound.

use std::collections::HashSet;

use paging_common::StructureKey;

use crate::cell::CellId;
use crate::grid::Grid;
use crate::store::StoreRegistry;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("cell {cell:?} has {constructed} built but only {members} members")]
    ConstructedExceedsMembers {
        cell: CellId,
        constructed: usize,
        members: usize,
    },
    #[error("cell {cell:?} has a handle for non-member {key}")]
    AttachedNonMember { cell: CellId, key: StructureKey },
    #[error("{0} is queued more than once")]
    DuplicateQueueEntry(StructureKey),
    #[error("{0} is queued but already built")]
    QueuedWhileConstructed(StructureKey),
    #[error("{0} is queued but its store is suspended")]
    QueuedWhileSuspended(StructureKey),
    #[error("{key} is queued for {queued:?} but placed in {placed:?}")]
    QueueEntryWrongCell {
        key: StructureKey,
        queued: CellId,
        placed: Option<CellId>,
    },
    #[error("{key} is indexed to {indexed:?} but not a member there")]
    IndexMismatch { key: StructureKey, indexed: CellId },
    #[error("page-out {page_out} is closer than range {range} + margin {margin}")]
    PageOutTooClose {
        range: f32,
        page_out: f32,
        margin: f32,
    },
    #[error("running total {recorded} disagrees with cell sum {actual}")]
    TotalMismatch { recorded: usize, actual: usize },
}

impl Grid {
    /// Every broken invariant, in no particular order.
    pub fn check_invariants(&self, stores: &StoreRegistry) -> Vec<InvariantViolation> {
        let mut found = Vec::new();

        let margin = self.config.page_out_margin;
        if self.page_out_distance < self.visibility_range + margin {
            found.push(InvariantViolation::PageOutTooClose {
                range: self.visibility_range,
                page_out: self.page_out_distance,
                margin,
            });
        }

        let mut actual = 0;
        for (id, cell) in self.cells() {
            let constructed = cell.constructed_count();
            actual += constructed;
            if constructed > cell.members().len() {
                found.push(InvariantViolation::ConstructedExceedsMembers {
                    cell: id,
                    constructed,
                    members: cell.members().len(),
                });
            }
            for (key, _) in cell.anchor().handles() {
                if !cell.contains(key) {
                    found.push(InvariantViolation::AttachedNonMember { cell: id, key });
                }
            }
        }
        if actual != self.constructed_total {
            found.push(InvariantViolation::TotalMismatch {
                recorded: self.constructed_total,
                actual,
            });
        }

        for (&key, &indexed) in &self.index {
            if !self.cell(indexed).is_some_and(|c| c.contains(key)) {
                found.push(InvariantViolation::IndexMismatch { key, indexed });
            }
        }

        let mut seen = HashSet::new();
        for entry in self.queue.entries() {
            if !seen.insert(entry.key) {
                found.push(InvariantViolation::DuplicateQueueEntry(entry.key));
            }
            if stores.is_constructed(entry.key) {
                found.push(InvariantViolation::QueuedWhileConstructed(entry.key));
            }
            if self.is_store_suspended(entry.key.store) {
                found.push(InvariantViolation::QueuedWhileSuspended(entry.key));
            }
            let placed = self.cell_of(entry.key);
            if placed != Some(entry.cell) {
                found.push(InvariantViolation::QueueEntryWrongCell {
                    key: entry.key,
                    queued: entry.cell,
                    placed,
                });
            }
        }

        found
    }
}
