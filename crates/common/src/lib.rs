//! Shared value types for the paging workspace: structure keys, render
//! handles, ground-plane rects and camera poses.

mod types;

pub use types::{CameraPose, Rect, RenderHandle, StoreId, StructureKey, planar, splitmix64};
