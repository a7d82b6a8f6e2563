//! Render error types.

use ash::vk;
use lumen_gpu::GpuError;
use thiserror::Error;

/// Errors from the scene and frame loop.
#[derive(Error, Debug)]
pub enum RenderError {
    /// GPU-level failure.
    #[error(transparent)]
    Gpu(#[from] GpuError),

    /// Registry or data error.
    #[error(transparent)]
    Core(#[from] lumen_core::Error),
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        Self::Gpu(GpuError::Vulkan(result))
    }
}

impl RenderError {
    /// Whether the frame loop can carry on after this error.
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::Gpu(e) => e.is_recoverable(),
            Self::Core(_) => false,
        }
    }
}

/// Result type for render operations.
pub type Result<T> = std::result::Result<T, RenderError>;
