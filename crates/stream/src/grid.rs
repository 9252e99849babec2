use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use glam::{Vec2, Vec3};
use paging_common::{StoreId, StructureKey};

use crate::cell::{Cell, CellCoord, CellId};
use crate::config::PagingConfig;
use crate::error::{PlaceError, SetupError};
use crate::queue::{LoadQueue, QueueEntry};
use crate::scheduler::PagingClock;
use crate::stats::{LatencyWindow, PagingStats};
use crate::store::{HeightSource, StoreRegistry};

/// Sparse D×D grid of cells over a world rectangle, plus the global load
/// queue and paging policy.
///
/// Cells are created the first time a structure lands in their slot and are
/// never freed; only their contents come and go. Everything that touches a
/// structure store takes the [`StoreRegistry`] explicitly.
pub struct Grid {
    pub(crate) origin: Vec2,
    pub(crate) extents: Vec2,
    pub(crate) dimension: u32,
    pub(crate) step: Vec2,
    pub(crate) visibility_range: f32,
    pub(crate) page_out_distance: f32,
    pub(crate) loading_enabled: bool,
    pub(crate) suspended: HashSet<StoreId>,
    pub(crate) cells: Vec<Option<Box<Cell>>>,
    pub(crate) queue: LoadQueue,
    pub(crate) index: HashMap<StructureKey, CellId>,
    pub(crate) constructed_total: usize,
    pub(crate) load_events: u64,
    pub(crate) height: Box<dyn HeightSource>,
    pub(crate) config: PagingConfig,
    pub(crate) clock: PagingClock,
    pub(crate) stats: PagingStats,
    pub(crate) latency: LatencyWindow,
}

impl Grid {
    /// Create a grid of `dimension`×`dimension` cells covering
    /// `[origin, origin + extents)` on the ground plane.
    pub fn setup(
        origin: Vec2,
        extents: Vec2,
        dimension: u32,
        visibility_range: f32,
        height: impl HeightSource + 'static,
        config: PagingConfig,
    ) -> Result<Self, SetupError> {
        if dimension == 0 {
            return Err(SetupError::ZeroDimension);
        }
        if !(extents.is_finite() && extents.x > 0.0 && extents.y > 0.0 && origin.is_finite()) {
            return Err(SetupError::InvalidExtents(extents));
        }
        if !(visibility_range.is_finite() && visibility_range >= 0.0) {
            return Err(SetupError::InvalidRange(visibility_range));
        }
        config.validate()?;

        let slots = dimension as usize * dimension as usize;
        let latency = LatencyWindow::new(config.latency_window);
        tracing::debug!(dimension, ?origin, ?extents, visibility_range, "grid setup");
        Ok(Self {
            origin,
            extents,
            dimension,
            step: extents / dimension as f32,
            visibility_range,
            page_out_distance: visibility_range + config.page_out_margin,
            loading_enabled: true,
            suspended: HashSet::new(),
            cells: std::iter::repeat_with(|| None).take(slots).collect(),
            queue: LoadQueue::new(),
            index: HashMap::new(),
            constructed_total: 0,
            load_events: 0,
            height: Box::new(height),
            config,
            clock: PagingClock::default(),
            stats: PagingStats::default(),
            latency,
        })
    }

    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    pub fn extents(&self) -> Vec2 {
        self.extents
    }

    pub fn dimension(&self) -> u32 {
        self.dimension
    }

    /// World size of one cell.
    pub fn cell_step(&self) -> Vec2 {
        self.step
    }

    pub fn config(&self) -> &PagingConfig {
        &self.config
    }

    pub fn visibility_range(&self) -> f32 {
        self.visibility_range
    }

    pub fn page_out_distance(&self) -> f32 {
        self.page_out_distance
    }

    pub fn loading_enabled(&self) -> bool {
        self.loading_enabled
    }

    /// True between `clear_all_pending_for(store)` and the matching
    /// `refresh_all_for(store)`.
    pub fn is_store_suspended(&self, store: StoreId) -> bool {
        self.suspended.contains(&store)
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn queue(&self) -> &LoadQueue {
        &self.queue
    }

    /// Structures currently attached across all cells.
    pub fn total_constructed(&self) -> usize {
        self.constructed_total
    }

    /// Successful constructions since setup.
    pub fn load_events(&self) -> u64 {
        self.load_events
    }

    pub fn stats(&self) -> &PagingStats {
        &self.stats
    }

    pub fn latency(&self) -> &LatencyWindow {
        &self.latency
    }

    /// Number of placed structures.
    pub fn placed_count(&self) -> usize {
        self.index.len()
    }

    /// The cell a structure is placed in, if any.
    pub fn cell_of(&self, key: StructureKey) -> Option<CellId> {
        self.index.get(&key).copied()
    }

    /// Ground-plane point → cell coordinate, or `None` outside the grid.
    pub fn map_to_cell(&self, point: Vec2) -> Option<CellCoord> {
        let rel = (point - self.origin) / self.step;
        if !rel.is_finite() {
            return None;
        }
        let (col, row) = (rel.x.floor(), rel.y.floor());
        let d = self.dimension as f32;
        if col < 0.0 || row < 0.0 || col >= d || row >= d {
            return None;
        }
        Some(CellCoord::new(col as u32, row as u32))
    }

    pub fn cell_id(&self, coord: CellCoord) -> CellId {
        CellId(coord.row as usize * self.dimension as usize + coord.col as usize)
    }

    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(id.0).and_then(|slot| slot.as_deref())
    }

    pub(crate) fn cell_mut(&mut self, id: CellId) -> Option<&mut Cell> {
        self.cells.get_mut(id.0).and_then(|slot| slot.as_deref_mut())
    }

    /// Populated cells in slot order.
    pub fn cells(&self) -> impl Iterator<Item = (CellId, &Cell)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_deref().map(|c| (CellId(i), c)))
    }

    pub fn populated_cells(&self) -> usize {
        self.cells.iter().filter(|slot| slot.is_some()).count()
    }

    fn cell_or_create(&mut self, coord: CellCoord) -> CellId {
        let id = self.cell_id(coord);
        if self.cells[id.0].is_none() {
            let center = self.origin
                + Vec2::new(coord.col as f32 + 0.5, coord.row as f32 + 0.5) * self.step;
            let h = self.height.sample_height(center);
            let anchor = Vec3::new(center.x, h, center.y);
            tracing::debug!(?coord, ?anchor, "cell created");
            self.cells[id.0] = Some(Box::new(Cell::new(coord, anchor, self.visibility_range)));
        }
        id
    }

    /// Place a structure into the cell containing its footprint centroid.
    ///
    /// Does not trigger a batch; loading starts when a traversal finds the
    /// cell in range. If the cell already handed its members to the queue,
    /// only the newcomer is queued so the other members are left alone.
    /// Appending an already placed key drops the old placement first, which
    /// also re-arms a structure whose construction failed.
    pub fn append(
        &mut self,
        key: StructureKey,
        stores: &mut StoreRegistry,
    ) -> Result<CellId, PlaceError> {
        if self.index.contains_key(&key) {
            self.remove(key, stores);
        }

        let extent = stores.planar_extent(key).inspect_err(|err| {
            tracing::warn!(%key, %err, "structure not placed");
        })?;
        let point = extent.centroid();
        let Some(coord) = self.map_to_cell(point) else {
            tracing::warn!(%key, ?point, "structure outside grid");
            return Err(PlaceError::OutOfBounds { key, point });
        };

        let id = self.cell_or_create(coord);
        self.index.insert(key, id);
        let Some(cell) = self.cells.get_mut(id.0).and_then(|s| s.as_deref_mut()) else {
            return Ok(id);
        };
        cell.add_member(key);
        if cell.is_queued()
            && !self.suspended.contains(&key.store)
            && !stores.is_constructed(key)
        {
            self.queue.push(QueueEntry {
                cell: id,
                key,
                priority_distance: f32::INFINITY,
            });
        }
        Ok(id)
    }

    /// Take a structure out of paging: membership, pending work and, if built,
    /// its renderable. Returns false if the key was not placed.
    pub fn remove(&mut self, key: StructureKey, stores: &mut StoreRegistry) -> bool {
        let Some(id) = self.index.remove(&key) else {
            return false;
        };
        self.queue.remove_key(key);

        let attached = self
            .cell_mut(id)
            .and_then(|cell| cell.remove_member(key))
            .is_some();
        if attached {
            self.constructed_total -= 1;
        }
        if attached || stores.is_constructed(key) {
            stores.destroy(key);
        }
        tracing::debug!(%key, destroyed = attached, "structure removed");
        true
    }

    /// Set the load range on the grid and every cell, raising the page-out
    /// distance if the margin would be violated.
    pub fn set_visibility_range(&mut self, range: f32) {
        let range = if range.is_finite() { range.max(0.0) } else { self.visibility_range };
        self.visibility_range = range;
        for cell in self.cells.iter_mut().flatten() {
            cell.set_range(range);
        }
        self.page_out_distance = self
            .page_out_distance
            .max(range + self.config.page_out_margin);
    }

    /// Set the eviction distance, clamped to at least range + margin.
    pub fn set_page_out_distance(&mut self, distance: f32) {
        // f32::max ignores NaN, so a NaN request lands on the floor.
        self.page_out_distance = distance.max(self.visibility_range + self.config.page_out_margin);
    }

    /// Global switch for traversal-triggered enqueues and the load phase.
    pub fn enable_loading(&mut self, enabled: bool) {
        self.loading_enabled = enabled;
    }

    /// Is `cell` within range at `distance`? When it is and `allow_load` is
    /// set, an unqueued cell with unbuilt members hands them to the queue.
    ///
    /// Only render traversal should pass `allow_load = true`; picking and
    /// other queries use it as a pure test.
    pub fn test_visible(
        &mut self,
        id: CellId,
        distance: f32,
        allow_load: bool,
        stores: &StoreRegistry,
    ) -> bool {
        let Some(cell) = self.cell(id) else {
            return false;
        };
        let visible = cell.is_visible(distance);
        if allow_load && self.loading_enabled && cell.wants_load(distance) {
            self.enqueue_cell(id, stores, distance);
        }
        visible
    }

    /// Queue every member of `id` that is neither built nor already queued,
    /// and mark the cell queued. Members of suspended stores are skipped.
    /// Returns how many entries were added.
    pub fn enqueue_all(&mut self, id: CellId, stores: &StoreRegistry) -> usize {
        self.enqueue_cell(id, stores, f32::INFINITY)
    }

    /// New entries are slotted by `hint` until the next reprioritize pass.
    fn enqueue_cell(&mut self, id: CellId, stores: &StoreRegistry, hint: f32) -> usize {
        let Some(cell) = self.cells.get_mut(id.0).and_then(|s| s.as_deref_mut()) else {
            return 0;
        };
        let mut added = 0;
        for &key in cell.members() {
            if self.suspended.contains(&key.store)
                || cell.is_attached(key)
                || stores.is_constructed(key)
            {
                continue;
            }
            let entry = QueueEntry {
                cell: id,
                key,
                priority_distance: hint,
            };
            if self.queue.push(entry) {
                added += 1;
            }
        }
        cell.set_queued(true);
        tracing::debug!(cell = ?cell.coord(), added, "cell enqueued");
        added
    }

    /// Destroy every built member of `id`, detach all handles and clear the
    /// queued flag. Returns how many structures were destroyed.
    pub fn deconstruct(&mut self, id: CellId, stores: &mut StoreRegistry) -> usize {
        let Some(cell) = self.cells.get_mut(id.0).and_then(|s| s.as_deref_mut()) else {
            return 0;
        };
        let mut destroyed = 0;
        for &key in cell.members() {
            if cell.is_attached(key) || stores.is_constructed(key) {
                stores.destroy(key);
                destroyed += 1;
            }
        }
        self.constructed_total -= cell.clear_attachments();
        destroyed
    }

    /// Render-traversal pass: test every populated cell against the camera
    /// and return the visible ones. Triggers loading while loading is enabled.
    pub fn cull(&mut self, camera: Vec3, stores: &StoreRegistry) -> Vec<CellId> {
        let _span = tracing::debug_span!("cull").entered();
        let targets: Vec<(CellId, f32)> = self
            .cells()
            .map(|(id, cell)| (id, cell.distance_to(camera)))
            .collect();
        targets
            .into_iter()
            .filter(|&(id, distance)| self.test_visible(id, distance, true, stores))
            .map(|(id, _)| id)
            .collect()
    }

    fn cells_holding(&self, store: StoreId) -> BTreeSet<CellId> {
        self.index
            .iter()
            .filter(|(key, _)| key.store == store)
            .map(|(_, id)| *id)
            .collect()
    }

    /// Cancel every pending entry for `store` (e.g. the layer was hidden) and
    /// suspend it: traversals and appends stop queueing its structures until
    /// `refresh_all_for(store)`. Built structures stay attached. Returns how
    /// many entries were dropped.
    pub fn clear_all_pending_for(&mut self, store: StoreId) -> usize {
        let removed = self.queue.remove_store(store);
        self.suspended.insert(store);
        tracing::debug!(%store, removed, "pending entries cleared, store suspended");
        removed
    }

    /// Bring cells holding `store`'s structures back in line with the store
    /// (e.g. the layer was shown again or rebuilt externally): lift any
    /// suspension, detach handles the store no longer reports built, drop
    /// entries it now reports built, and re-arm the cells. Returns how many
    /// cells were touched.
    pub fn refresh_all_for(&mut self, store: StoreId, stores: &StoreRegistry) -> usize {
        self.suspended.remove(&store);
        let affected = self.cells_holding(store);
        self.queue
            .remove_where(|e| e.key.store == store && stores.is_constructed(e.key));

        let mut detached = 0;
        for &id in &affected {
            let Some(cell) = self.cells.get_mut(id.0).and_then(|s| s.as_deref_mut()) else {
                continue;
            };
            let stale: Vec<StructureKey> = cell
                .anchor()
                .handles()
                .map(|(key, _)| key)
                .filter(|key| key.store == store && !stores.is_constructed(*key))
                .collect();
            for key in stale {
                if cell.detach(key).is_some() {
                    detached += 1;
                }
            }
            cell.set_queued(false);
        }
        self.constructed_total -= detached;
        tracing::debug!(%store, cells = affected.len(), detached, "store refreshed");
        affected.len()
    }

    /// Deconstruct every populated cell and drop all pending work. Cells stay
    /// allocated.
    pub fn teardown(&mut self, stores: &mut StoreRegistry) {
        let ids: Vec<CellId> = self.cells().map(|(id, _)| id).collect();
        let destroyed: usize = ids.into_iter().map(|id| self.deconstruct(id, stores)).sum();
        self.queue.clear();
        tracing::debug!(destroyed, "grid torn down");
    }

    /// Diagnostic snapshot of one cell.
    pub fn cell_info(&self, id: CellId) -> Option<CellInfo> {
        self.cell(id).map(|cell| CellInfo {
            id,
            coord: cell.coord(),
            anchor: cell.anchor().position(),
            members: cell.members().len(),
            constructed: cell.constructed_count(),
            pending: self.queue.pending_for_cell(id),
            queued: cell.is_queued(),
        })
    }

    /// Time since the load phase last ran, for UI throttling displays.
    pub fn since_last_load(&self, now: Duration) -> Option<Duration> {
        self.clock.last_load.map(|t| now.saturating_sub(t))
    }
}

/// Read-only summary of a cell for tooling.
#[derive(Debug, Clone, PartialEq)]
pub struct CellInfo {
    pub id: CellId,
    pub coord: CellCoord,
    pub anchor: Vec3,
    pub members: usize,
    pub constructed: usize,
    pub pending: usize,
    pub queued: bool,
}

impl std::fmt::Display for CellInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Cell ({}, {}) anchor=({:.1}, {:.1}, {:.1}) members={} built={} pending={}{}",
            self.coord.col,
            self.coord.row,
            self.anchor.x,
            self.anchor.y,
            self.anchor.z,
            self.members,
            self.constructed,
            self.pending,
            if self.queued { " queued" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FlatHeight;
    use crate::test_support::{MockStore, STORE, grid, key, registry};
    use paging_common::Rect;

    #[test]
    fn map_to_cell_basic() {
        let g = grid(4, 100.0, 20.0);
        assert_eq!(g.map_to_cell(Vec2::new(50.0, 50.0)), Some(CellCoord::new(0, 0)));
        assert_eq!(g.map_to_cell(Vec2::new(250.0, 120.0)), Some(CellCoord::new(2, 1)));
        assert_eq!(g.map_to_cell(Vec2::new(399.9, 0.0)), Some(CellCoord::new(3, 0)));
    }

    #[test]
    fn map_to_cell_rejects_outside() {
        let g = grid(4, 100.0, 20.0);
        assert_eq!(g.map_to_cell(Vec2::new(-0.5, 10.0)), None);
        assert_eq!(g.map_to_cell(Vec2::new(400.0, 10.0)), None);
        assert_eq!(g.map_to_cell(Vec2::new(10.0, 1.0e9)), None);
        assert_eq!(g.map_to_cell(Vec2::new(f32::NAN, 10.0)), None);
    }

    #[test]
    fn map_to_cell_honours_origin() {
        let g = Grid::setup(
            Vec2::new(-200.0, -200.0),
            Vec2::new(400.0, 400.0),
            4,
            50.0,
            FlatHeight(0.0),
            PagingConfig::default(),
        )
        .unwrap();
        assert_eq!(g.map_to_cell(Vec2::new(-150.0, -150.0)), Some(CellCoord::new(0, 0)));
        assert_eq!(g.map_to_cell(Vec2::ZERO), Some(CellCoord::new(2, 2)));
    }

    #[test]
    fn setup_rejects_bad_geometry() {
        let bad = |dim, extents, range| {
            Grid::setup(Vec2::ZERO, extents, dim, range, FlatHeight(0.0), PagingConfig::default())
                .err()
        };
        assert!(matches!(bad(0, Vec2::splat(10.0), 1.0), Some(SetupError::ZeroDimension)));
        assert!(matches!(
            bad(2, Vec2::new(0.0, 10.0), 1.0),
            Some(SetupError::InvalidExtents(_))
        ));
        assert!(matches!(
            bad(2, Vec2::splat(10.0), -1.0),
            Some(SetupError::InvalidRange(_))
        ));

        let config = PagingConfig {
            burst_idle: 0,
            ..PagingConfig::default()
        };
        let err = Grid::setup(Vec2::ZERO, Vec2::splat(10.0), 2, 1.0, FlatHeight(0.0), config);
        assert!(matches!(err, Err(SetupError::Config(_))));
    }

    #[test]
    fn setup_starts_with_page_out_margin() {
        let g = grid(4, 100.0, 20.0);
        assert_eq!(g.page_out_distance(), 20.0 + g.config().page_out_margin);
        assert_eq!(g.populated_cells(), 0);
        assert_eq!(g.cell_step(), Vec2::splat(100.0));
    }

    #[test]
    fn append_places_without_enqueueing() {
        let mut store = MockStore::new();
        let i = store.add_at(50.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);

        let id = g.append(key(i), &mut stores).unwrap();
        assert_eq!(g.cell(id).unwrap().coord(), CellCoord::new(0, 0));
        assert_eq!(g.cell(id).unwrap().members(), &[key(i)]);
        assert_eq!(g.queue_len(), 0);
        assert_eq!(g.cell_of(key(i)), Some(id));
    }

    #[test]
    fn cell_anchor_samples_height_once_at_creation() {
        let mut store = MockStore::new();
        let a = store.add_at(150.0, 50.0);
        let b = store.add_at(160.0, 60.0);
        let mut stores = registry(store);
        let mut g = Grid::setup(
            Vec2::ZERO,
            Vec2::splat(400.0),
            4,
            20.0,
            |p: Vec2| p.x / 10.0,
            PagingConfig::default(),
        )
        .unwrap();

        let id = g.append(key(a), &mut stores).unwrap();
        assert_eq!(g.append(key(b), &mut stores).unwrap(), id);
        assert_eq!(g.cell(id).unwrap().anchor().position(), Vec3::new(150.0, 15.0, 50.0));
    }

    #[test]
    fn append_out_of_bounds_fails() {
        let mut store = MockStore::new();
        let i = store.add_at(900.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);

        let err = g.append(key(i), &mut stores).unwrap_err();
        assert!(matches!(err, PlaceError::OutOfBounds { .. }));
        assert_eq!(g.populated_cells(), 0);
        assert_eq!(g.placed_count(), 0);
    }

    #[test]
    fn append_without_extent_is_skipped() {
        let mut store = MockStore::new();
        let i = store.add_without_extent(Vec3::new(50.0, 0.0, 50.0));
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);

        assert_eq!(
            g.append(key(i), &mut stores),
            Err(PlaceError::ExtentUnavailable(key(i)))
        );
        assert_eq!(g.placed_count(), 0);
    }

    #[test]
    fn append_from_unknown_store_fails() {
        let mut stores = registry(MockStore::new());
        let mut g = grid(4, 100.0, 20.0);
        let stray = StructureKey::new(StoreId(77), 0);
        assert_eq!(
            g.append(stray, &mut stores),
            Err(PlaceError::UnknownStore(StoreId(77)))
        );
    }

    #[test]
    fn degenerate_extent_is_placed_at_its_point() {
        let mut store = MockStore::new();
        let i = store.add_with_extent(Rect::point(Vec2::new(310.0, 120.0)), Vec3::ZERO);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);

        let id = g.append(key(i), &mut stores).unwrap();
        assert_eq!(g.cell(id).unwrap().coord(), CellCoord::new(3, 1));
    }

    #[test]
    fn scenario_a_visible_cell_enqueues() {
        let mut store = MockStore::new();
        let i = store.add_at(50.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);

        let id = g.append(key(i), &mut stores).unwrap();
        assert!(g.test_visible(id, 10.0, true, &stores));
        assert_eq!(g.queue_len(), 1);
        assert!(g.cell(id).unwrap().is_queued());
    }

    #[test]
    fn test_visible_without_load_is_pure() {
        let mut store = MockStore::new();
        let i = store.add_at(50.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);

        let id = g.append(key(i), &mut stores).unwrap();
        assert!(g.test_visible(id, 10.0, false, &stores));
        assert!(!g.test_visible(id, 25.0, true, &stores));
        assert_eq!(g.queue_len(), 0);
        assert!(!g.cell(id).unwrap().is_queued());
    }

    #[test]
    fn test_visible_twice_enqueues_once() {
        let mut store = MockStore::new();
        let a = store.add_at(40.0, 40.0);
        let b = store.add_at(60.0, 60.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);

        let id = g.append(key(a), &mut stores).unwrap();
        g.append(key(b), &mut stores).unwrap();
        assert!(g.test_visible(id, 10.0, true, &stores));
        assert!(g.test_visible(id, 10.0, true, &stores));
        assert_eq!(g.queue_len(), 2);

        // Even a forced batch cannot duplicate entries.
        assert_eq!(g.enqueue_all(id, &stores), 0);
        assert_eq!(g.queue_len(), 2);
    }

    #[test]
    fn scenario_b_enqueue_skips_constructed() {
        let mut store = MockStore::new();
        let a = store.add_at(40.0, 40.0);
        let b = store.add_at(60.0, 60.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);

        let id = g.append(key(a), &mut stores).unwrap();
        g.append(key(b), &mut stores).unwrap();
        stores.construct(key(a)).unwrap();

        assert_eq!(g.enqueue_all(id, &stores), 1);
        assert_eq!(g.queue_len(), 1);
        assert!(g.queue().contains(key(b)));
        assert!(!g.queue().contains(key(a)));
    }

    #[test]
    fn loading_disabled_blocks_enqueue() {
        let mut store = MockStore::new();
        let i = store.add_at(50.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);
        let id = g.append(key(i), &mut stores).unwrap();

        g.enable_loading(false);
        assert!(g.test_visible(id, 10.0, true, &stores));
        assert_eq!(g.queue_len(), 0);

        g.enable_loading(true);
        assert!(g.test_visible(id, 10.0, true, &stores));
        assert_eq!(g.queue_len(), 1);
    }

    #[test]
    fn page_out_never_closer_than_range_plus_margin() {
        let mut g = grid(4, 100.0, 20.0);
        let margin = g.config().page_out_margin;
        let ops: [(bool, f32); 8] = [
            (true, 500.0),
            (false, 10.0),
            (true, 5.0),
            (false, 1000.0),
            (true, 2000.0),
            (false, f32::NAN),
            (true, -3.0),
            (false, 0.0),
        ];
        for (is_range, value) in ops {
            if is_range {
                g.set_visibility_range(value);
            } else {
                g.set_page_out_distance(value);
            }
            assert!(
                g.page_out_distance() >= g.visibility_range() + margin,
                "page_out {} < range {} + {margin}",
                g.page_out_distance(),
                g.visibility_range()
            );
        }
    }

    #[test]
    fn set_visibility_range_reaches_existing_cells() {
        let mut store = MockStore::new();
        let i = store.add_at(50.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);
        let id = g.append(key(i), &mut stores).unwrap();

        g.set_visibility_range(75.0);
        assert_eq!(g.cell(id).unwrap().range(), 75.0);
        assert!(g.test_visible(id, 60.0, false, &stores));
    }

    #[test]
    fn remove_drops_pending_entry() {
        let mut store = MockStore::new();
        let i = store.add_at(50.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);
        let id = g.append(key(i), &mut stores).unwrap();
        g.test_visible(id, 10.0, true, &stores);

        assert!(g.remove(key(i), &mut stores));
        assert_eq!(g.queue_len(), 0);
        assert!(g.cell(id).unwrap().members().is_empty());
        assert!(!g.remove(key(i), &mut stores));
    }

    #[test]
    fn remove_destroys_constructed() {
        let mut store = MockStore::new();
        let i = store.add_at(50.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);
        let id = g.append(key(i), &mut stores).unwrap();
        g.test_visible(id, 10.0, true, &stores);
        g.load(&mut stores, 1);
        assert_eq!(g.total_constructed(), 1);

        assert!(g.remove(key(i), &mut stores));
        assert!(!stores.is_constructed(key(i)));
        assert_eq!(g.total_constructed(), 0);
        assert_eq!(g.cell(id).unwrap().constructed_count(), 0);
    }

    #[test]
    fn append_then_remove_round_trips() {
        let mut store = MockStore::new();
        let a = store.add_at(50.0, 50.0);
        let b = store.add_at(60.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);
        let camera = Vec3::new(50.0, 0.0, 50.0);
        let id = g.append(key(a), &mut stores).unwrap();
        g.cull(camera, &stores);
        g.load(&mut stores, 1);

        let before = g.cell_info(id).unwrap();
        let built = g.total_constructed();
        g.append(key(b), &mut stores).unwrap();
        g.remove(key(b), &mut stores);
        assert_eq!(g.cell_info(id).unwrap(), before);
        assert_eq!(g.total_constructed(), built);

        // The next traversal sees the same cell it saw before.
        g.cull(camera, &stores);
        assert_eq!(g.queue_len(), 0);
        assert_eq!(g.cell_info(id).unwrap(), before);
        assert!(before.queued);
    }

    #[test]
    fn failed_sibling_stays_out_across_unrelated_append_and_remove() {
        let mut store = MockStore::new();
        let bad = store.add_failing_at(50.0, 50.0);
        let other = store.add_at(60.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);
        let camera = Vec3::new(50.0, 0.0, 50.0);
        let id = g.append(key(bad), &mut stores).unwrap();
        g.cull(camera, &stores);
        assert_eq!(g.load(&mut stores, 5).failed, 1);
        g.cull(camera, &stores);
        assert_eq!(g.queue_len(), 0);

        // A newcomer in a queued cell is queued on its own.
        assert_eq!(g.append(key(other), &mut stores), Ok(id));
        assert_eq!(g.queue_len(), 1);
        assert!(g.queue().contains(key(other)));
        assert!(!g.queue().contains(key(bad)));

        g.remove(key(other), &mut stores);
        g.cull(camera, &stores);
        assert_eq!(g.queue_len(), 0);
        assert!(g.cell(id).unwrap().is_queued());
    }

    #[test]
    fn append_into_unqueued_cell_waits_for_traversal() {
        let mut store = MockStore::new();
        let a = store.add_at(50.0, 50.0);
        let b = store.add_at(60.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);
        let id = g.append(key(a), &mut stores).unwrap();
        g.append(key(b), &mut stores).unwrap();
        assert_eq!(g.queue_len(), 0);

        g.cull(Vec3::new(50.0, 0.0, 50.0), &stores);
        assert_eq!(g.cell_info(id).unwrap().pending, 2);
    }

    #[test]
    fn cells_are_never_freed() {
        let mut store = MockStore::new();
        let i = store.add_at(50.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);
        let id = g.append(key(i), &mut stores).unwrap();

        g.remove(key(i), &mut stores);
        g.teardown(&mut stores);
        assert!(g.cell(id).is_some());
        assert_eq!(g.populated_cells(), 1);
    }

    #[test]
    fn reappend_queues_the_key_in_a_queued_cell() {
        let mut store = MockStore::new();
        let i = store.add_at(50.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);
        let id = g.append(key(i), &mut stores).unwrap();
        g.test_visible(id, 10.0, true, &stores);
        g.queue.clear();

        // Cell still believes its work is queued.
        assert!(g.test_visible(id, 10.0, true, &stores));
        assert_eq!(g.queue_len(), 0);

        assert_eq!(g.append(key(i), &mut stores), Ok(id));
        assert_eq!(g.queue_len(), 1);
        assert!(g.test_visible(id, 10.0, true, &stores));
        assert_eq!(g.queue_len(), 1);
        assert_eq!(g.cell(id).unwrap().members().len(), 1);
    }

    #[test]
    fn deconstruct_frees_everything_in_cell() {
        let mut store = MockStore::new();
        let a = store.add_at(40.0, 40.0);
        let b = store.add_at(60.0, 60.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);
        let id = g.append(key(a), &mut stores).unwrap();
        g.append(key(b), &mut stores).unwrap();
        g.test_visible(id, 10.0, true, &stores);
        g.load(&mut stores, 2);
        assert_eq!(g.cell(id).unwrap().constructed_count(), 2);

        assert_eq!(g.deconstruct(id, &mut stores), 2);
        assert_eq!(g.cell(id).unwrap().constructed_count(), 0);
        assert!(!g.cell(id).unwrap().is_queued());
        assert!(!stores.is_constructed(key(a)));
        assert_eq!(g.total_constructed(), 0);
    }

    #[test]
    fn cull_returns_visible_cells_and_enqueues() {
        let mut store = MockStore::new();
        let near = store.add_at(50.0, 50.0);
        let far = store.add_at(350.0, 350.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 100.0);
        let near_cell = g.append(key(near), &mut stores).unwrap();
        g.append(key(far), &mut stores).unwrap();

        let visible = g.cull(Vec3::new(50.0, 0.0, 60.0), &stores);
        assert_eq!(visible, vec![near_cell]);
        assert_eq!(g.queue_len(), 1);
        assert!(g.queue().contains(key(near)));
    }

    #[test]
    fn clear_all_pending_for_one_store() {
        let mut first = MockStore::new();
        let a = first.add_at(50.0, 50.0);
        let c = first.add_at(55.0, 55.0);
        let mut second = MockStore::new();
        let b = second.add_at(60.0, 60.0);
        let mut stores = registry(first);
        stores.register(StoreId(2), Box::new(second));
        let kb = StructureKey::new(StoreId(2), b);

        let mut g = grid(4, 100.0, 100.0);
        let id = g.append(key(a), &mut stores).unwrap();
        g.append(kb, &mut stores).unwrap();
        g.cull(Vec3::new(50.0, 0.0, 50.0), &stores);
        assert_eq!(g.queue_len(), 2);

        assert_eq!(g.clear_all_pending_for(STORE), 1);
        assert_eq!(g.queue_len(), 1);
        assert!(g.queue().contains(kb));
        assert!(g.is_store_suspended(STORE));
        assert!(!g.is_store_suspended(StoreId(2)));

        // Hidden stays hidden: neither traversal nor append brings it back.
        g.cull(Vec3::new(50.0, 0.0, 50.0), &stores);
        g.append(key(c), &mut stores).unwrap();
        assert_eq!(g.queue_len(), 1);
        assert!(!g.queue().contains(key(a)));
        assert!(!g.queue().contains(key(c)));
        assert!(g.check_invariants(&stores).is_empty());

        // Only a refresh re-arms the store.
        assert_eq!(g.refresh_all_for(STORE, &stores), 1);
        assert!(!g.is_store_suspended(STORE));
        g.cull(Vec3::new(50.0, 0.0, 50.0), &stores);
        assert_eq!(g.queue_len(), 3);
        assert!(g.queue().contains(key(a)));
        assert!(g.queue().contains(key(c)));
        assert_eq!(g.cell_of(key(a)), Some(id));
    }

    #[test]
    fn suspended_store_is_not_loaded() {
        let mut store = MockStore::new();
        let a = store.add_at(50.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 100.0);
        g.append(key(a), &mut stores).unwrap();
        g.cull(Vec3::new(50.0, 0.0, 50.0), &stores);
        g.clear_all_pending_for(STORE);

        // A stray entry for a suspended store is skipped, not built.
        let id = g.cell_of(key(a)).unwrap();
        g.queue.push(QueueEntry {
            cell: id,
            key: key(a),
            priority_distance: 0.0,
        });
        assert_eq!(g.load(&mut stores, 1).constructed, 0);
        assert!(!stores.is_constructed(key(a)));
    }

    #[test]
    fn refresh_all_for_resyncs_with_store() {
        let mut store = MockStore::new();
        let a = store.add_at(40.0, 40.0);
        let b = store.add_at(60.0, 60.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 100.0);
        let id = g.append(key(a), &mut stores).unwrap();
        g.append(key(b), &mut stores).unwrap();
        g.cull(Vec3::new(50.0, 0.0, 50.0), &stores);
        g.load(&mut stores, 2);
        assert_eq!(g.total_constructed(), 2);

        // The layer dropped its geometry behind the grid's back.
        stores.get_mut(STORE).unwrap().destroy(a);
        assert_eq!(g.refresh_all_for(STORE, &stores), 1);
        assert_eq!(g.cell(id).unwrap().constructed_count(), 1);
        assert_eq!(g.total_constructed(), 1);
        assert!(!g.cell(id).unwrap().is_queued());

        g.cull(Vec3::new(50.0, 0.0, 50.0), &stores);
        assert_eq!(g.queue_len(), 1);
        assert!(g.queue().contains(key(a)));
    }

    #[test]
    fn teardown_destroys_all_and_clears_queue() {
        let mut store = MockStore::new();
        let a = store.add_at(50.0, 50.0);
        let b = store.add_at(150.0, 50.0);
        let c = store.add_at(250.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 1000.0);
        for i in [a, b, c] {
            g.append(key(i), &mut stores).unwrap();
        }
        g.cull(Vec3::ZERO, &stores);
        g.load(&mut stores, 2);
        assert_eq!(g.queue_len(), 1);

        g.teardown(&mut stores);
        assert_eq!(g.queue_len(), 0);
        assert_eq!(g.total_constructed(), 0);
        for i in [a, b, c] {
            assert!(!stores.is_constructed(key(i)));
        }
    }

    #[test]
    fn cell_info_reports_state() {
        let mut store = MockStore::new();
        let a = store.add_at(50.0, 50.0);
        let mut stores = registry(store);
        let mut g = grid(4, 100.0, 20.0);
        let id = g.append(key(a), &mut stores).unwrap();
        g.test_visible(id, 1.0, true, &stores);

        let info = g.cell_info(id).unwrap();
        assert_eq!(info.members, 1);
        assert_eq!(info.pending, 1);
        assert!(info.queued);
        assert!(info.to_string().contains("queued"));
        assert!(g.cell_info(CellId(15)).is_none());
    }
}
