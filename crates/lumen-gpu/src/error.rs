//! GPU error types.

use ash::vk;
use thiserror::Error;

/// GPU-related errors.
///
/// Every variant except [`GpuError::SwapchainOutOfDate`] is fatal: the
/// renderer cannot continue once one is returned.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No suitable GPU found.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// Required device feature missing.
    #[error("Required device feature missing: {0}")]
    MissingFeature(String),

    /// Required extension not supported.
    #[error("Required extension not supported: {0}")]
    ExtensionNotSupported(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader bytecode rejected.
    #[error("Invalid shader: {0}")]
    InvalidShader(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Buffer write outside the buffer's capacity.
    #[error("Write of {length} bytes at offset {offset} exceeds capacity {capacity}")]
    OutOfBounds {
        offset: u64,
        length: u64,
        capacity: u64,
    },

    /// Image layout transition with no barrier mapping.
    #[error("Unsupported layout transition: {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        from: vk::ImageLayout,
        to: vk::ImageLayout,
    },

    /// A device context already exists in this process.
    #[error("A device context already exists")]
    ContextAlreadyExists,

    /// Surface no longer matches the swapchain.
    #[error("Swapchain out of date")]
    SwapchainOutOfDate,

    /// Resource not found.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl GpuError {
    /// Whether the error is handled by recreating the swapchain.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SwapchainOutOfDate
                | Self::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR)
        )
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;
