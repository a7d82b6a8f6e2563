//! Vulkan abstraction layer for the Lumen renderer.
//!
//! This crate provides:
//! - The process-wide device context and its LIFO deletion queue
//! - GPU capability detection and validation logging
//! - Memory allocation via gpu-allocator
//! - Command pools, batched transfers and growable device buffers
//! - Swapchain, render pass and frame synchronization
//! - Descriptor sets and graphics pipelines

pub mod capabilities;
pub mod command;
pub mod context;
pub mod debug;
pub mod deletion;
pub mod descriptors;
pub mod dynamic_buffer;
pub mod error;
pub mod image;
pub mod instance;
pub mod memory;
pub mod pipeline;
pub mod render_pass;
pub mod surface;
pub mod swapchain;
pub mod sync;
pub mod transfer;

pub use capabilities::{GpuCapabilities, GpuVendor};
pub use context::{DeviceContext, DeviceContextBuilder};
pub use deletion::{DeletionQueue, Destroy, DeviceIdle, OwnedResource, ResourceHandle};
pub use descriptors::{DescriptorSetLayoutBuilder, DescriptorWrites};
pub use dynamic_buffer::{BufferStorage, DeviceStorage, DynamicBuffer};
pub use error::{GpuError, Result};
pub use image::{transition_image_layout, DepthTarget};
pub use memory::{GpuAllocator, GpuBuffer, GpuImage};
pub use pipeline::{GraphicsPipeline, GraphicsPipelineConfig};
pub use surface::{Surface, SurfaceCapabilities};
pub use swapchain::{Swapchain, SwapchainConfig, SwapchainState};
pub use sync::{AcquireOutcome, FenceDevice, FrameSync, FrameSyncSet, PresentOutcome};
pub use transfer::TransferBatch;
