use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

/// Identifies one structure store (layer) registered with a paging grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoreId(pub u32);

impl std::fmt::Display for StoreId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Addresses a single structure: the store that owns it and its index there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StructureKey {
    pub store: StoreId,
    pub index: u32,
}

impl StructureKey {
    pub fn new(store: StoreId, index: u32) -> Self {
        Self { store, index }
    }
}

impl std::fmt::Display for StructureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.store, self.index)
    }
}

/// Handle to a constructed renderable. The store owns the renderable's data;
/// the handle is only what gets attached to a cell's scene anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RenderHandle(pub u64);

/// Axis-aligned rectangle on the ground plane (world X/Z).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    /// A zero-area rect sitting on a single point.
    pub fn point(p: Vec2) -> Self {
        Self { min: p, max: p }
    }

    pub fn centroid(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    pub fn size(&self) -> Vec2 {
        self.max - self.min
    }

    pub fn area(&self) -> f32 {
        let s = self.size();
        s.x * s.y
    }
}

/// Camera position and view direction, sampled once per paging tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    pub position: Vec3,
    pub forward: Vec3,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: Vec3::Z,
        }
    }
}

/// Drop the height axis: world (x, y, z) → ground plane (x, z).
pub fn planar(p: Vec3) -> Vec2 {
    Vec2::new(p.x, p.z)
}

/// Splitmix64 step. Deterministic placement for synthetic worlds and benches.
pub fn splitmix64(mut state: u64) -> u64 {
    state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
