//! In-memory collaborators for unit tests.

use std::time::Duration;

use glam::{Vec2, Vec3};
use paging_common::{Rect, RenderHandle, StoreId, StructureKey};

use crate::config::PagingConfig;
use crate::error::ConstructError;
use crate::grid::Grid;
use crate::store::{FlatHeight, StoreRegistry, StructureStore};

pub(crate) const STORE: StoreId = StoreId(1);

pub(crate) fn key(index: u32) -> StructureKey {
    StructureKey::new(STORE, index)
}

pub(crate) fn secs(s: f64) -> Duration {
    Duration::from_secs_f64(s)
}

/// Grid at the origin with `dimension` square cells of `step` units and flat
/// terrain.
pub(crate) fn grid(dimension: u32, step: f32, range: f32) -> Grid {
    Grid::setup(
        Vec2::ZERO,
        Vec2::splat(step * dimension as f32),
        dimension,
        range,
        FlatHeight(0.0),
        PagingConfig::default(),
    )
    .unwrap()
}

pub(crate) fn registry(store: MockStore) -> StoreRegistry {
    let mut stores = StoreRegistry::new();
    stores.register(STORE, Box::new(store));
    stores
}

struct MockItem {
    extent: Option<Rect>,
    point: Vec3,
    built: Option<RenderHandle>,
    fails: bool,
}

#[derive(Default)]
pub(crate) struct MockStore {
    items: Vec<MockItem>,
    next_handle: u64,
}

impl MockStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.items.len()
    }

    fn push(&mut self, extent: Option<Rect>, point: Vec3, fails: bool) -> u32 {
        self.items.push(MockItem {
            extent,
            point,
            built: None,
            fails,
        });
        (self.items.len() - 1) as u32
    }

    /// A 10×10 footprint centred on (x, z).
    pub(crate) fn add_at(&mut self, x: f32, z: f32) -> u32 {
        let c = Vec2::new(x, z);
        self.push(
            Some(Rect::new(c - 5.0, c + 5.0)),
            Vec3::new(x, 0.0, z),
            false,
        )
    }

    pub(crate) fn add_failing_at(&mut self, x: f32, z: f32) -> u32 {
        let c = Vec2::new(x, z);
        self.push(Some(Rect::new(c - 5.0, c + 5.0)), Vec3::new(x, 0.0, z), true)
    }

    pub(crate) fn add_with_extent(&mut self, extent: Rect, point: Vec3) -> u32 {
        self.push(Some(extent), point, false)
    }

    pub(crate) fn add_without_extent(&mut self, point: Vec3) -> u32 {
        self.push(None, point, false)
    }
}

impl StructureStore for MockStore {
    fn planar_extent(&self, index: u32) -> Option<Rect> {
        self.items.get(index as usize).and_then(|i| i.extent)
    }

    fn representative_point(&self, index: u32) -> Vec3 {
        self.items
            .get(index as usize)
            .map_or(Vec3::ZERO, |i| i.point)
    }

    fn is_constructed(&self, index: u32) -> bool {
        self.items
            .get(index as usize)
            .is_some_and(|i| i.built.is_some())
    }

    fn construct(&mut self, index: u32) -> Result<RenderHandle, ConstructError> {
        let item = self
            .items
            .get_mut(index as usize)
            .ok_or_else(|| ConstructError::Failed(format!("no structure {index}")))?;
        if item.fails {
            return Err(ConstructError::MissingAsset(format!("texture for {index}")));
        }
        self.next_handle += 1;
        let handle = RenderHandle(self.next_handle);
        item.built = Some(handle);
        Ok(handle)
    }

    fn destroy(&mut self, index: u32) {
        if let Some(item) = self.items.get_mut(index as usize) {
            item.built = None;
        }
    }
}
