//! Core types and math for the Lumen renderer.
//!
//! This crate provides the foundational types shared by every other crate:
//! - Engine-wide error type
//! - Alignment helpers for GPU sub-allocation
//! - Object transforms
//! - Vertex records as authored and as laid out for the GPU

pub mod error;
pub mod math;
pub mod transform;
pub mod vertex;

pub use error::{Error, Result};
pub use math::align_up;
pub use transform::Transform;
pub use vertex::{GpuVertex, Vertex};

/// Engine-wide constants
pub mod constants {
    /// Number of presentable images requested from the surface (triple buffering)
    pub const SWAPCHAIN_IMAGE_COUNT: u32 = 3;
    /// Initial capacity of the global vertex buffer in bytes
    pub const GLOBAL_VERTEX_BUFFER_SIZE: u64 = 10_000_000;
    /// Initial capacity of the global index buffer in bytes
    pub const GLOBAL_INDEX_BUFFER_SIZE: u64 = 10_000_000;
    /// Initial capacity of each per-object uniform buffer in bytes
    pub const OBJECT_UNIFORM_BUFFER_SIZE: u64 = 1_000_000;
    /// Size of the combined image sampler array bound at binding 5
    pub const MAX_TEXTURES: u32 = 16;
}
