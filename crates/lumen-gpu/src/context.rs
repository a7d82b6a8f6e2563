//! Device context: the process-wide owner of Vulkan handles.

use crate::capabilities::{GpuCapabilities, REQUIRED_DEVICE_EXTENSIONS};
use crate::command::{execute_single_time_commands, CommandPool};
use crate::debug::DebugMessenger;
use crate::deletion::{DeletionQueue, DeviceIdle, OwnedResource, ResourceHandle};
use crate::error::{GpuError, Result};
use crate::instance::{create_instance, select_physical_device};
use crate::memory::GpuAllocator;
use crate::transfer::TransferBatch;
use ash::vk;
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

static CONTEXT_ALIVE: AtomicBool = AtomicBool::new(false);

/// Marks the single live context in this process. Released on drop.
struct ContextClaim {
    _private: (),
}

impl ContextClaim {
    fn acquire() -> Result<Self> {
        CONTEXT_ALIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self { _private: () })
            .map_err(|_| GpuError::ContextAlreadyExists)
    }
}

impl Drop for ContextClaim {
    fn drop(&mut self) {
        CONTEXT_ALIVE.store(false, Ordering::Release);
    }
}

/// Instance, device, queue and the resources every other part of the
/// renderer allocates from.
///
/// Only one may exist at a time. Long-lived objects are registered in the
/// deletion queue and destroyed, newest first, when the context drops.
/// Command recording through the context is single-threaded.
pub struct DeviceContext {
    entry: ash::Entry,
    instance: ash::Instance,
    debug_messenger: Option<DebugMessenger>,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: Mutex<GpuAllocator>,
    graphics_queue_family: u32,
    graphics_queue: vk::Queue,
    command_pool: CommandPool,
    transfer: Mutex<TransferBatch>,
    deletion_queue: Mutex<DeletionQueue<OwnedResource>>,
    _claim: ContextClaim,
}

impl DeviceContext {
    /// Get the Vulkan entry point.
    pub const fn entry(&self) -> &ash::Entry {
        &self.entry
    }

    /// Get the Vulkan instance handle.
    pub const fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Get the physical device handle.
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub const fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get access to the GPU allocator.
    pub const fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// Get the graphics queue. It is also used for transfers and presentation.
    pub const fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    /// Get the graphics queue family index.
    pub const fn graphics_queue_family(&self) -> u32 {
        self.graphics_queue_family
    }

    /// Get the shared command pool. Buffers allocated from it may be reset individually.
    pub const fn command_pool(&self) -> &CommandPool {
        &self.command_pool
    }

    /// Lock the deletion queue.
    pub fn deletion_queue(&self) -> MutexGuard<'_, DeletionQueue<OwnedResource>> {
        self.deletion_queue.lock()
    }

    /// Register a resource for teardown when the context drops.
    pub fn push_resource(&self, resource: OwnedResource) -> ResourceHandle {
        self.deletion_queue.lock().push(resource)
    }

    /// Destroy a registered resource now instead of at shutdown.
    pub fn release_resource(&self, handle: ResourceHandle, idle: &DeviceIdle) -> Result<()> {
        self.deletion_queue.lock().release(handle, self, idle)
    }

    /// Queue a staging-to-device copy on the transfer batch.
    ///
    /// Both buffers must stay alive until the next [`Self::flush_transfers`].
    pub fn record_copy(&self, src: vk::Buffer, dst: vk::Buffer, region: vk::BufferCopy) -> Result<()> {
        // SAFETY: Buffers handed out by this context outlive the batch flush
        unsafe {
            self.transfer
                .lock()
                .record_copy(&self.device, src, dst, region)
        }
    }

    /// Submit queued copies and wait for them. Returns how many copies ran.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn flush_transfers(&self) -> Result<u32> {
        // SAFETY: The batch was allocated from this device's pool
        unsafe { self.transfer.lock().flush(&self.device, self.graphics_queue) }
    }

    /// Record and run a one-off command buffer, blocking until it completes.
    ///
    /// An error from `f` abandons the submission and is returned as is.
    pub fn execute_single_time<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer) -> Result<()>,
    {
        let device = &*self.device;
        // SAFETY: Pool and queue belong to this device
        unsafe {
            execute_single_time_commands(device, &self.command_pool, self.graphics_queue, |cmd| {
                f(device, cmd)
            })
        }
    }

    /// Wait for the device to finish all submitted work.
    ///
    /// The returned token is what allows the deletion queue to be flushed.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<DeviceIdle> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(DeviceIdle::confirmed())
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        let idle = match self.wait_idle() {
            Ok(idle) => idle,
            Err(e) => {
                // Destroying objects the GPU may still use is undefined; leak them instead
                tracing::error!("Device wait failed during teardown, leaking resources: {e}");
                return;
            }
        };

        let mut queue = std::mem::take(&mut *self.deletion_queue.lock());
        tracing::info!("Destroying {} GPU resources", queue.len());
        if let Err(e) = queue.flush(&*self, idle) {
            tracing::error!("GPU resource teardown failed: {e}");
        }

        unsafe {
            self.command_pool.destroy(&self.device);

            // Allocator must release its memory blocks before the device goes
            self.allocator.lock().shutdown();

            self.device.destroy_device(None);
            if let Some(messenger) = self.debug_messenger.take() {
                messenger.destroy();
            }
            self.instance.destroy_instance(None);
        }

        tracing::info!("Device context destroyed");
    }
}

/// Builder for creating a device context.
pub struct DeviceContextBuilder {
    app_name: String,
    enable_validation: bool,
}

impl Default for DeviceContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Lumen".to_string(),
            enable_validation: cfg!(debug_assertions),
        }
    }
}

impl DeviceContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Build the device context.
    ///
    /// Fails with [`GpuError::ContextAlreadyExists`] while another context is alive.
    pub fn build(self) -> Result<DeviceContext> {
        let claim = ContextClaim::acquire()?;

        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let instance = unsafe { create_instance(&entry, &self.app_name, self.enable_validation) }?;

        let debug_messenger = if self.enable_validation {
            Some(unsafe { DebugMessenger::new(&entry, &instance) }?)
        } else {
            None
        };

        let physical_device = unsafe { select_physical_device(&instance) }?;
        let capabilities = unsafe { GpuCapabilities::query(&instance, physical_device) };

        let missing = capabilities.missing_features();
        if !missing.is_empty() {
            return Err(GpuError::MissingFeature(missing.join(", ")));
        }
        let missing = capabilities.missing_extensions();
        if !missing.is_empty() {
            return Err(GpuError::ExtensionNotSupported(missing.join(", ")));
        }

        tracing::info!("Selected GPU: {}", capabilities.summary());

        let graphics_queue_family = unsafe { find_graphics_queue_family(&instance, physical_device) }?;
        let device = unsafe { create_device(&instance, physical_device, graphics_queue_family) }?;
        let graphics_queue = unsafe { device.get_device_queue(graphics_queue_family, 0) };
        let device = Arc::new(device);

        let allocator = unsafe { GpuAllocator::new(&instance, device.clone(), physical_device) }?;

        let command_pool = unsafe { CommandPool::new(&device, graphics_queue_family) }?;
        let transfer = unsafe { TransferBatch::new(&device, &command_pool) }?;

        let mut deletion_queue = DeletionQueue::new();
        deletion_queue.push(OwnedResource::Fence(transfer.fence()));

        Ok(DeviceContext {
            entry,
            instance,
            debug_messenger,
            physical_device,
            device,
            capabilities,
            allocator: Mutex::new(allocator),
            graphics_queue_family,
            graphics_queue,
            command_pool,
            transfer: Mutex::new(transfer),
            deletion_queue: Mutex::new(deletion_queue),
            _claim: claim,
        })
    }
}

/// Find the first queue family with graphics support.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn find_graphics_queue_family(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> Result<u32> {
    instance
        .get_physical_device_queue_family_properties(physical_device)
        .iter()
        .position(|family| family.queue_flags.contains(vk::QueueFlags::GRAPHICS))
        .map(|index| index as u32)
        .ok_or(GpuError::NoSuitableDevice)
}

/// Create the logical device with one graphics queue.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    graphics_queue_family: u32,
) -> Result<ash::Device> {
    let queue_priority = 1.0_f32;
    let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(graphics_queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority))];

    let extension_names: Vec<*const std::ffi::c_char> = REQUIRED_DEVICE_EXTENSIONS
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    // Texture array indexing
    let mut vulkan_1_2_features = vk::PhysicalDeviceVulkan12Features::default()
        .runtime_descriptor_array(true)
        .descriptor_binding_partially_bound(true)
        .shader_sampled_image_array_non_uniform_indexing(true);

    let features = vk::PhysicalDeviceFeatures::default()
        .geometry_shader(true)
        .sampler_anisotropy(true)
        .depth_clamp(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(features)
        .push_next(&mut vulkan_1_2_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = instance
        .create_device(physical_device, &device_create_info, None)
        .map_err(GpuError::from)?;

    Ok(device)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_is_rejected_until_first_drops() {
        let first = ContextClaim::acquire().unwrap();
        assert!(matches!(
            ContextClaim::acquire(),
            Err(GpuError::ContextAlreadyExists)
        ));

        drop(first);
        let again = ContextClaim::acquire();
        assert!(again.is_ok());
    }
}
