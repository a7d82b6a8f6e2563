//! Ordered teardown of GPU resources.
//!
//! Every long-lived Vulkan object is registered here as a typed record when
//! it is created. At shutdown, once the device is confirmed idle, the records
//! are destroyed in strict reverse registration order, so dependents always
//! go before the objects they depend on.
//!
//! A record keeps its position for the life of the queue. Buffers that grow
//! swap the live record in place with [`DeletionQueue::replace`] and destroy
//! the outgoing allocation themselves.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::memory::{GpuBuffer, GpuImage};
use ash::vk;

/// Something that can be destroyed given a context.
pub trait Destroy<C: ?Sized> {
    /// Release the resource.
    fn destroy(self, ctx: &C) -> Result<()>;
}

/// Position of a record in a [`DeletionQueue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle(usize);

/// Proof that the device has finished all submitted work.
///
/// Only [`DeviceContext::wait_idle`] hands these out, and flushing the queue
/// consumes one, so teardown cannot be reached without a completed idle wait.
#[derive(Debug)]
pub struct DeviceIdle {
    _private: (),
}

impl DeviceIdle {
    pub(crate) const fn confirmed() -> Self {
        Self { _private: () }
    }
}

/// LIFO list of owned resources.
pub struct DeletionQueue<R> {
    entries: Vec<Option<R>>,
}

impl<R> Default for DeletionQueue<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> DeletionQueue<R> {
    /// Create an empty queue.
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a resource. It will be destroyed before everything pushed earlier.
    pub fn push(&mut self, resource: R) -> ResourceHandle {
        self.entries.push(Some(resource));
        ResourceHandle(self.entries.len() - 1)
    }

    /// Borrow a registered resource.
    pub fn get(&self, handle: ResourceHandle) -> Option<&R> {
        self.entries.get(handle.0).and_then(Option::as_ref)
    }

    /// Mutably borrow a registered resource.
    pub fn get_mut(&mut self, handle: ResourceHandle) -> Option<&mut R> {
        self.entries.get_mut(handle.0).and_then(Option::as_mut)
    }

    /// Swap the record at `handle` for `resource`, returning the previous one.
    ///
    /// The caller owns the returned resource and must destroy it.
    pub fn replace(&mut self, handle: ResourceHandle, resource: R) -> Result<R> {
        self.entries
            .get_mut(handle.0)
            .and_then(|slot| slot.replace(resource))
            .ok_or_else(|| GpuError::ResourceNotFound(format!("deletion record {}", handle.0)))
    }

    /// Destroy one record ahead of shutdown, leaving its position empty.
    pub fn release<C: ?Sized>(&mut self, handle: ResourceHandle, ctx: &C, _idle: &DeviceIdle) -> Result<()>
    where
        R: Destroy<C>,
    {
        self.entries
            .get_mut(handle.0)
            .and_then(Option::take)
            .ok_or_else(|| GpuError::ResourceNotFound(format!("deletion record {}", handle.0)))?
            .destroy(ctx)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.is_some()).count()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroy every record, newest first, leaving the queue empty.
    ///
    /// All records are attempted even if one fails; the first error is returned.
    pub fn flush<C: ?Sized>(&mut self, ctx: &C, _idle: DeviceIdle) -> Result<()>
    where
        R: Destroy<C>,
    {
        let mut first_error = None;

        while let Some(entry) = self.entries.pop() {
            if let Some(resource) = entry {
                if let Err(e) = resource.destroy(ctx) {
                    first_error.get_or_insert(e);
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}

/// A Vulkan object owned by the device context.
pub enum OwnedResource {
    Buffer(GpuBuffer),
    Image(GpuImage),
    ImageView(vk::ImageView),
    Sampler(vk::Sampler),
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
    Pipeline(vk::Pipeline),
    PipelineLayout(vk::PipelineLayout),
    DescriptorSetLayout(vk::DescriptorSetLayout),
    DescriptorPool(vk::DescriptorPool),
    Surface {
        loader: ash::khr::surface::Instance,
        surface: vk::SurfaceKHR,
    },
}

impl OwnedResource {
    /// Short name of the resource kind, for logs.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Buffer(_) => "buffer",
            Self::Image(_) => "image",
            Self::ImageView(_) => "image view",
            Self::Sampler(_) => "sampler",
            Self::Fence(_) => "fence",
            Self::Semaphore(_) => "semaphore",
            Self::Pipeline(_) => "pipeline",
            Self::PipelineLayout(_) => "pipeline layout",
            Self::DescriptorSetLayout(_) => "descriptor set layout",
            Self::DescriptorPool(_) => "descriptor pool",
            Self::Surface { .. } => "surface",
        }
    }

    /// The buffer held by this record, if it is one.
    pub const fn as_buffer(&self) -> Option<&GpuBuffer> {
        match self {
            Self::Buffer(buffer) => Some(buffer),
            _ => None,
        }
    }
}

impl Destroy<DeviceContext> for OwnedResource {
    fn destroy(self, ctx: &DeviceContext) -> Result<()> {
        let device = ctx.device();
        tracing::trace!("Destroying {}", self.kind());

        // SAFETY: Records are only destroyed after a confirmed device-idle wait
        unsafe {
            match self {
                Self::Buffer(mut buffer) => ctx.allocator().lock().free_buffer(&mut buffer)?,
                Self::Image(mut image) => ctx.allocator().lock().free_image(&mut image)?,
                Self::ImageView(view) => device.destroy_image_view(view, None),
                Self::Sampler(sampler) => device.destroy_sampler(sampler, None),
                Self::Fence(fence) => device.destroy_fence(fence, None),
                Self::Semaphore(semaphore) => device.destroy_semaphore(semaphore, None),
                Self::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
                Self::PipelineLayout(layout) => device.destroy_pipeline_layout(layout, None),
                Self::DescriptorSetLayout(layout) => {
                    device.destroy_descriptor_set_layout(layout, None);
                }
                Self::DescriptorPool(pool) => device.destroy_descriptor_pool(pool, None),
                Self::Surface { loader, surface } => loader.destroy_surface(surface, None),
            }
        }

        Ok(())
    }
}
