//! Time-gated paging driver.
//!
//! Each call to [`Grid::do_paging`] runs at most one phase, picked in priority
//! order: re-sort the queue, then evict/cancel, then construct. Gates compare
//! the caller's `now` with the last run of each phase, so behaviour depends
//! only on the timestamps passed in.

use std::time::{Duration, Instant};

use glam::Vec3;
use paging_common::planar;

use crate::cell::CellId;
use crate::grid::Grid;
use crate::store::{CameraProvider, StoreRegistry};

/// The phase a paging call ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reprioritize,
    Cleanup,
    Load,
}

/// What one paging call did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PagingReport {
    /// `None` when no gate was open.
    pub phase: Option<Phase>,
    /// Camera had not moved since the previous call.
    pub idle: bool,
    pub constructed: usize,
    pub failed: usize,
    pub evicted: usize,
    pub dequeued: usize,
    pub queue_len: usize,
    pub total_constructed: usize,
    pub elapsed: Duration,
}

/// Last-run timestamps for each phase and the previous camera position.
#[derive(Debug, Clone, Default)]
pub(crate) struct PagingClock {
    pub(crate) last_reprioritize: Option<Duration>,
    pub(crate) last_cleanup: Option<Duration>,
    pub(crate) last_load: Option<Duration>,
    pub(crate) last_camera: Option<Vec3>,
}

impl PagingClock {
    fn due(last: Option<Duration>, now: Duration, every: Duration) -> bool {
        last.is_none_or(|t| now.saturating_sub(t) >= every)
    }

    /// Record `position` and report whether it is bit-for-bit the previous one.
    fn observe_camera(&mut self, position: Vec3) -> bool {
        let bits = |v: Vec3| v.to_array().map(f32::to_bits);
        let idle = self.last_camera.is_some_and(|p| bits(p) == bits(position));
        self.last_camera = Some(position);
        idle
    }
}

/// Result of one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub evicted: usize,
    pub dequeued: usize,
}

/// Result of one load burst.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub constructed: usize,
    pub failed: usize,
}

impl Grid {
    /// Advance paging by one tick.
    ///
    /// `page_out_distance` is applied through [`Grid::set_page_out_distance`]
    /// first, so it is clamped like any other update. `max_constructed` is a
    /// soft budget: only cells beyond the page-out distance are evicted to
    /// meet it.
    pub fn do_paging<C: CameraProvider + ?Sized>(
        &mut self,
        stores: &mut StoreRegistry,
        camera: &C,
        max_constructed: usize,
        page_out_distance: f32,
        now: Duration,
    ) -> PagingReport {
        let _span = tracing::info_span!("do_paging").entered();
        let started = Instant::now();

        let position = camera.position();
        let forward = camera.forward();
        self.set_page_out_distance(page_out_distance);
        let idle = self.clock.observe_camera(position);

        let phase = self.next_phase(now);
        let mut report = PagingReport {
            phase,
            idle,
            ..PagingReport::default()
        };
        match phase {
            Some(Phase::Reprioritize) => {
                self.clock.last_reprioritize = Some(now);
                self.reprioritize(stores, position, forward);
            }
            Some(Phase::Cleanup) => {
                self.clock.last_cleanup = Some(now);
                let out = self.cleanup(stores, position, max_constructed);
                report.evicted = out.evicted;
                report.dequeued = out.dequeued;
            }
            Some(Phase::Load) => {
                self.clock.last_load = Some(now);
                let burst = if idle {
                    self.config.burst_idle
                } else {
                    self.config.burst_moving
                };
                let out = self.load(stores, burst);
                report.constructed = out.constructed;
                report.failed = out.failed;
            }
            None => {}
        }

        report.queue_len = self.queue.len();
        report.total_constructed = self.constructed_total;
        report.elapsed = started.elapsed();
        self.latency.record(report.elapsed);
        self.stats.absorb(&report);

        tracing::trace!(
            phase = ?report.phase,
            constructed = report.constructed,
            evicted = report.evicted,
            dequeued = report.dequeued,
            queue = report.queue_len,
            total = report.total_constructed,
            "paging tick complete"
        );
        report
    }

    fn next_phase(&self, now: Duration) -> Option<Phase> {
        let clock = &self.clock;
        if PagingClock::due(clock.last_reprioritize, now, self.config.reprioritize_every()) {
            Some(Phase::Reprioritize)
        } else if PagingClock::due(clock.last_cleanup, now, self.config.cleanup_every()) {
            Some(Phase::Cleanup)
        } else if self.loading_enabled
            && !self.queue.is_empty()
            && PagingClock::due(clock.last_load, now, self.config.load_every())
        {
            Some(Phase::Load)
        } else {
            None
        }
    }

    /// Re-rank every queued entry by ground-plane distance from the camera to
    /// the structure's representative point. Entries behind the camera get
    /// the configured penalty so they sort after everything in front.
    pub fn reprioritize(&mut self, stores: &StoreRegistry, position: Vec3, forward: Vec3) {
        let eye = planar(position);
        let penalty = self.config.behind_penalty;
        self.queue.reprioritize(|entry| {
            let Some(point) = stores.representative_point(entry.key) else {
                return f32::INFINITY;
            };
            let distance = planar(point).distance(eye);
            if (point - position).dot(forward) < 0.0 {
                distance + penalty
            } else {
                distance
            }
        });
        tracing::debug!(entries = self.queue.len(), "queue reprioritized");
    }

    /// Evict built cells beyond the page-out distance while the grid is over
    /// budget, and cancel pending work for cells that left the visibility
    /// range.
    pub fn cleanup(
        &mut self,
        stores: &mut StoreRegistry,
        position: Vec3,
        max_constructed: usize,
    ) -> CleanupOutcome {
        let mut out = CleanupOutcome::default();
        let range = self.visibility_range;
        let page_out = self.page_out_distance;

        for slot in 0..self.cells.len() {
            let id = CellId(slot);
            let Some(cell) = self.cell(id) else {
                continue;
            };
            let distance = cell.distance_to(position);
            let constructed = cell.constructed_count();

            if constructed > 0 && self.constructed_total > max_constructed && distance > page_out {
                let evicted = self.deconstruct(id, stores);
                tracing::debug!(?id, distance, evicted, "cell paged out");
                out.evicted += evicted;
            }

            if distance > range {
                let dequeued = self.queue.remove_cell(id);
                if let Some(cell) = self.cell_mut(id) {
                    cell.set_queued(false);
                }
                if dequeued > 0 {
                    tracing::debug!(?id, distance, dequeued, "pending work cancelled");
                }
                out.dequeued += dequeued;
            }
        }
        out
    }

    /// Construct up to `burst` of the nearest queued structures. Failures are
    /// logged and dropped; the structure stays placed but unbuilt until it is
    /// appended again.
    pub fn load(&mut self, stores: &mut StoreRegistry, burst: usize) -> LoadOutcome {
        let mut out = LoadOutcome::default();
        if !self.loading_enabled {
            return out;
        }
        for _ in 0..burst {
            let Some(entry) = self.queue.pop_nearest() else {
                break;
            };
            let key = entry.key;
            let Some(cell) = self
                .cells
                .get_mut(entry.cell.0)
                .and_then(|s| s.as_deref_mut())
            else {
                continue;
            };
            if self.suspended.contains(&key.store)
                || !cell.contains(key)
                || cell.is_attached(key)
                || stores.is_constructed(key)
            {
                tracing::debug!(%key, "skipping stale queue entry");
                continue;
            }
            match stores.construct(key) {
                Ok(handle) => {
                    if cell.attach(key, handle) {
                        self.constructed_total += 1;
                        self.load_events += 1;
                        out.constructed += 1;
                    }
                }
                Err(err) => {
                    tracing::warn!(%key, %err, "construction failed, entry dropped");
                    out.failed += 1;
                }
            }
        }
        out
    }
}
