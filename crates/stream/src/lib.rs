//! Structure paging: a sparse cell grid that streams heavy renderables in and
//! out around a moving camera under a per-tick time budget.
//!
//! # Invariants
//! - A cell never counts more built structures than it has members.
//! - A structure is queued at most once, and never while it is built.
//! - Page-out distance stays at least visibility range + margin, so the
//!   load and unload boundaries cannot thrash.
//! - Cell slots, once populated, live as long as the grid.
//!
//! # Flow
//! Structures are [`Grid::append`]ed into cells. A render traversal
//! ([`Grid::cull`] or [`Grid::test_visible`]) hands unbuilt members of
//! in-range cells to the load queue. [`Grid::do_paging`], called once per
//! frame, runs one time-gated phase: re-sort, evict/cancel, or construct.

mod cell;
mod config;
mod consistency;
mod error;
mod grid;
mod queue;
mod scheduler;
mod stats;
mod store;

#[cfg(test)]
mod test_support;

pub use cell::{Cell, CellCoord, CellId, SceneAnchor};
pub use config::PagingConfig;
pub use consistency::InvariantViolation;
pub use error::{ConfigError, ConstructError, PlaceError, SetupError};
pub use grid::{CellInfo, Grid};
pub use queue::{LoadQueue, QueueEntry};
pub use scheduler::{CleanupOutcome, LoadOutcome, PagingReport, Phase};
pub use stats::{LatencyWindow, PagingStats};
pub use store::{CameraProvider, FlatHeight, HeightSource, StoreRegistry, StructureStore};

pub fn crate_info() -> &'static str {
    "paging-stream v0.1.0"
}
