use std::collections::BTreeMap;

use glam::Vec3;
use paging_common::{RenderHandle, StructureKey};

/// Column/row address of a cell inside the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellCoord {
    pub col: u32,
    pub row: u32,
}

impl CellCoord {
    pub fn new(col: u32, row: u32) -> Self {
        Self { col, row }
    }
}

/// Stable handle to a cell slot: `row * dimension + col`.
///
/// Slots are never freed, so a handle stays valid for the grid's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(pub usize);

/// Scene container a cell hangs its constructed renderables on.
///
/// Holds attachments only; the renderable data stays with the store.
#[derive(Debug, Clone)]
pub struct SceneAnchor {
    position: Vec3,
    attached: BTreeMap<StructureKey, RenderHandle>,
}

impl SceneAnchor {
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            attached: BTreeMap::new(),
        }
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn handle(&self, key: StructureKey) -> Option<RenderHandle> {
        self.attached.get(&key).copied()
    }

    pub fn handles(&self) -> impl Iterator<Item = (StructureKey, RenderHandle)> + '_ {
        self.attached.iter().map(|(k, h)| (*k, *h))
    }

    pub fn len(&self) -> usize {
        self.attached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.is_empty()
    }

    /// Returns false if `key` already had a handle (the old one is replaced).
    fn attach(&mut self, key: StructureKey, handle: RenderHandle) -> bool {
        self.attached.insert(key, handle).is_none()
    }

    fn detach(&mut self, key: StructureKey) -> Option<RenderHandle> {
        self.attached.remove(&key)
    }

    fn clear(&mut self) -> usize {
        let n = self.attached.len();
        self.attached.clear();
        n
    }
}

/// One fixed region of the grid and the structures whose centroid falls in it.
///
/// A cell answers "is this region in range" cheaply and remembers whether its
/// contents have already been handed to the load queue. The constructed count
/// is the number of handles attached to its anchor, and attachments are only
/// ever made for members.
#[derive(Debug, Clone)]
pub struct Cell {
    coord: CellCoord,
    anchor: SceneAnchor,
    members: Vec<StructureKey>,
    range: f32,
    queued: bool,
}

impl Cell {
    pub(crate) fn new(coord: CellCoord, anchor: Vec3, range: f32) -> Self {
        Self {
            coord,
            anchor: SceneAnchor::new(anchor),
            members: Vec::new(),
            range,
            queued: false,
        }
    }

    pub fn coord(&self) -> CellCoord {
        self.coord
    }

    pub fn anchor(&self) -> &SceneAnchor {
        &self.anchor
    }

    pub fn members(&self) -> &[StructureKey] {
        &self.members
    }

    pub fn contains(&self, key: StructureKey) -> bool {
        self.members.contains(&key)
    }

    pub fn constructed_count(&self) -> usize {
        self.anchor.len()
    }

    pub fn is_attached(&self, key: StructureKey) -> bool {
        self.anchor.handle(key).is_some()
    }

    pub fn is_queued(&self) -> bool {
        self.queued
    }

    pub fn range(&self) -> f32 {
        self.range
    }

    /// Distance from `point` to the cell's anchor.
    pub fn distance_to(&self, point: Vec3) -> f32 {
        self.anchor.position.distance(point)
    }

    /// Pure visibility query. Safe for picking and intersection passes.
    pub fn is_visible(&self, distance: f32) -> bool {
        distance < self.range
    }

    /// True when the cell is visible at `distance`, has unbuilt members and
    /// has not already handed them to the queue.
    pub fn wants_load(&self, distance: f32) -> bool {
        self.is_visible(distance) && !self.queued && self.constructed_count() < self.members.len()
    }

    pub(crate) fn set_range(&mut self, range: f32) {
        self.range = range;
    }

    pub(crate) fn set_queued(&mut self, queued: bool) {
        self.queued = queued;
    }

    /// Leaves `queued` alone: siblings that already went through the queue
    /// must not be handed to it again.
    pub(crate) fn add_member(&mut self, key: StructureKey) {
        if !self.members.contains(&key) {
            self.members.push(key);
        }
    }

    /// Drops `key` from membership and returns its handle if it was attached.
    pub(crate) fn remove_member(&mut self, key: StructureKey) -> Option<RenderHandle> {
        self.members.retain(|k| *k != key);
        self.anchor.detach(key)
    }

    /// Attach a freshly constructed member. Non-members are refused.
    pub(crate) fn attach(&mut self, key: StructureKey, handle: RenderHandle) -> bool {
        self.contains(key) && self.anchor.attach(key, handle)
    }

    pub(crate) fn detach(&mut self, key: StructureKey) -> Option<RenderHandle> {
        self.anchor.detach(key)
    }

    /// Detach every handle and clear the queued flag. Returns how many were
    /// attached.
    pub(crate) fn clear_attachments(&mut self) -> usize {
        self.queued = false;
        self.anchor.clear()
    }
}
