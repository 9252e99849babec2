//! Interfaces the paging grid consumes from the outside world.

use std::collections::BTreeMap;

use glam::{Vec2, Vec3};
use paging_common::{CameraPose, Rect, RenderHandle, StoreId, StructureKey};

use crate::error::{ConstructError, PlaceError};

/// A collection of structures that can be built and destroyed on demand.
///
/// Indices are the store's own; the grid pairs them with a [`StoreId`] to form
/// a [`StructureKey`]. Construction is synchronous from the grid's point of
/// view, so any disk I/O a store does lands inside `construct`.
pub trait StructureStore {
    /// Ground-plane footprint of a structure, or `None` if it cannot be
    /// determined.
    fn planar_extent(&self, index: u32) -> Option<Rect>;

    /// Point used to rank the structure by distance to the camera.
    fn representative_point(&self, index: u32) -> Vec3;

    fn is_constructed(&self, index: u32) -> bool;

    /// Build the renderable and return a handle to attach to the scene.
    fn construct(&mut self, index: u32) -> Result<RenderHandle, ConstructError>;

    /// Free the renderable. Must be a no-op for structures that are not built.
    fn destroy(&mut self, index: u32);
}

/// Terrain height lookup, sampled once per cell when the cell is created.
pub trait HeightSource {
    fn sample_height(&self, point: Vec2) -> f32;
}

impl<F> HeightSource for F
where
    F: Fn(Vec2) -> f32,
{
    fn sample_height(&self, point: Vec2) -> f32 {
        self(point)
    }
}

/// Constant-height terrain.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatHeight(pub f32);

impl HeightSource for FlatHeight {
    fn sample_height(&self, _point: Vec2) -> f32 {
        self.0
    }
}

/// Supplies the viewpoint the scheduler ranks against.
pub trait CameraProvider {
    fn position(&self) -> Vec3;
    fn forward(&self) -> Vec3;
}

impl CameraProvider for CameraPose {
    fn position(&self) -> Vec3 {
        self.position
    }

    fn forward(&self) -> Vec3 {
        self.forward
    }
}

/// The stores a grid pages for, keyed by [`StoreId`].
///
/// Key-level helpers treat an unregistered store as "nothing there": not
/// constructed, no extent, construction fails.
#[derive(Default)]
pub struct StoreRegistry {
    stores: BTreeMap<StoreId, Box<dyn StructureStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store. Returns the store previously registered under `id`.
    pub fn register(
        &mut self,
        id: StoreId,
        store: Box<dyn StructureStore>,
    ) -> Option<Box<dyn StructureStore>> {
        self.stores.insert(id, store)
    }

    pub fn unregister(&mut self, id: StoreId) -> Option<Box<dyn StructureStore>> {
        self.stores.remove(&id)
    }

    pub fn contains(&self, id: StoreId) -> bool {
        self.stores.contains_key(&id)
    }

    pub fn get(&self, id: StoreId) -> Option<&(dyn StructureStore + 'static)> {
        self.stores.get(&id).map(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, id: StoreId) -> Option<&mut (dyn StructureStore + 'static)> {
        self.stores.get_mut(&id).map(|s| s.as_mut())
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn planar_extent(&self, key: StructureKey) -> Result<Rect, PlaceError> {
        let store = self
            .get(key.store)
            .ok_or(PlaceError::UnknownStore(key.store))?;
        store
            .planar_extent(key.index)
            .ok_or(PlaceError::ExtentUnavailable(key))
    }

    pub fn representative_point(&self, key: StructureKey) -> Option<Vec3> {
        self.get(key.store)
            .map(|s| s.representative_point(key.index))
    }

    pub fn is_constructed(&self, key: StructureKey) -> bool {
        self.get(key.store)
            .is_some_and(|s| s.is_constructed(key.index))
    }

    pub fn construct(&mut self, key: StructureKey) -> Result<RenderHandle, ConstructError> {
        self.get_mut(key.store)
            .ok_or(ConstructError::UnknownStore(key.store))?
            .construct(key.index)
    }

    /// Returns false if the store is not registered.
    pub fn destroy(&mut self, key: StructureKey) -> bool {
        match self.get_mut(key.store) {
            Some(store) => {
                store.destroy(key.index);
                true
            }
            None => false,
        }
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.stores.keys().collect::<Vec<_>>())
            .finish()
    }
}
