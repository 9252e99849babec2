use glam::Vec2;
use paging_common::{StoreId, StructureKey};

/// Why a structure could not be placed into the grid.
///
/// None of these are fatal: the structure is simply absent from paging.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaceError {
    #[error("structure {key} centroid {point} lies outside the grid")]
    OutOfBounds { key: StructureKey, point: Vec2 },
    #[error("structure {0} has no planar extent")]
    ExtentUnavailable(StructureKey),
    #[error("store {0} is not registered")]
    UnknownStore(StoreId),
}

/// Reported by a structure store when it fails to build a renderable.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConstructError {
    #[error("missing dependent asset: {0}")]
    MissingAsset(String),
    #[error("construction failed: {0}")]
    Failed(String),
    #[error("store {0} is not registered")]
    UnknownStore(StoreId),
}

/// Rejected grid geometry or policy at setup time.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("grid dimension must be at least 1")]
    ZeroDimension,
    #[error("grid extents must be positive and finite, got {0}")]
    InvalidExtents(Vec2),
    #[error("visibility range must be non-negative and finite, got {0}")]
    InvalidRange(f32),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors from loading or validating a paging configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
