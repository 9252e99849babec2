use glam::{Vec2, Vec3};
use paging_common::{Rect, RenderHandle, splitmix64};
use paging_stream::{ConstructError, StructureStore};

/// One synthetic building footprint.
#[derive(Debug, Clone)]
struct Building {
    footprint: Rect,
    height: f32,
    mesh: Option<RenderHandle>,
}

/// Deterministic city of box buildings laid out on a jittered street grid.
///
/// Every `fail_every`-th building reports a missing asset when built, which
/// exercises the scheduler's drop-on-failure path.
#[derive(Debug, Clone)]
pub struct CityStore {
    buildings: Vec<Building>,
    fail_every: Option<u32>,
    next_handle: u64,
}

impl CityStore {
    pub fn generate(count: usize, world: f32, seed: u64, fail_every: Option<u32>) -> Self {
        let mut state = seed;
        let mut unit = || {
            state = splitmix64(state);
            (state >> 40) as f32 / (1u64 << 24) as f32
        };

        let lots = (count as f32).sqrt().ceil().max(1.0) as usize;
        let lot = world / lots as f32;
        let buildings = (0..count)
            .map(|i| {
                let base = Vec2::new((i % lots) as f32, (i / lots) as f32) * lot;
                let size = Vec2::new(0.3 + unit() * 0.4, 0.3 + unit() * 0.4) * lot;
                let offset = Vec2::new(unit(), unit()) * (lot - size);
                let min = base + offset;
                Building {
                    footprint: Rect::new(min, min + size),
                    height: 6.0 + unit() * 60.0,
                    mesh: None,
                }
            })
            .collect();

        Self {
            buildings,
            fail_every: fail_every.filter(|n| *n > 0),
            next_handle: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buildings.len()
    }
}

impl StructureStore for CityStore {
    fn planar_extent(&self, index: u32) -> Option<Rect> {
        self.buildings.get(index as usize).map(|b| b.footprint)
    }

    fn representative_point(&self, index: u32) -> Vec3 {
        self.buildings
            .get(index as usize)
            .map_or(Vec3::ZERO, |b| {
                let c = b.footprint.centroid();
                Vec3::new(c.x, b.height * 0.5, c.y)
            })
    }

    fn is_constructed(&self, index: u32) -> bool {
        self.buildings
            .get(index as usize)
            .is_some_and(|b| b.mesh.is_some())
    }

    fn construct(&mut self, index: u32) -> Result<RenderHandle, ConstructError> {
        if self.fail_every.is_some_and(|n| index % n == n - 1) {
            return Err(ConstructError::MissingAsset(format!(
                "facade texture for building {index}"
            )));
        }
        let building = self
            .buildings
            .get_mut(index as usize)
            .ok_or_else(|| ConstructError::Failed(format!("no building {index}")))?;
        if let Some(handle) = building.mesh {
            return Ok(handle);
        }
        self.next_handle += 1;
        let handle = RenderHandle(self.next_handle);
        building.mesh = Some(handle);
        Ok(handle)
    }

    fn destroy(&mut self, index: u32) {
        if let Some(b) = self.buildings.get_mut(index as usize) {
            b.mesh = None;
        }
    }
}
