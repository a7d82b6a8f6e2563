//! Command pool and recording.
//!
//! The device context owns a single pool whose buffers can be reset one at a
//! time. The swapchain keeps one buffer per image and re-records them when
//! the scene changes, the transfer batch reuses one buffer across flushes,
//! and uploads borrow a buffer for a single blocking submission.

use crate::error::{GpuError, Result};
use ash::vk;

/// Pool whose command buffers can be reset individually.
pub struct CommandPool {
    pool: vk::CommandPool,
    queue_family: u32,
}

impl CommandPool {
    /// Create a pool for `queue_family`.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = device.create_command_pool(&create_info, None)?;

        Ok(Self { pool, queue_family })
    }

    pub const fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    pub const fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Allocate `count` primary command buffers, such as one per swapchain image.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(&self, device: &ash::Device, count: usize) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(buffer_count(count)?);

        Ok(device.allocate_command_buffers(&alloc_info)?)
    }

    /// Allocate a single primary command buffer.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_one(&self, device: &ash::Device) -> Result<vk::CommandBuffer> {
        self.allocate(device, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::AllocationFailed("Command pool returned no buffer".to_string()))
    }

    /// Return command buffers to the pool.
    ///
    /// # Safety
    /// The buffers must belong to this pool and not be pending execution.
    pub unsafe fn free(&self, device: &ash::Device, buffers: &[vk::CommandBuffer]) {
        if !buffers.is_empty() {
            device.free_command_buffers(self.pool, buffers);
        }
    }

    /// # Safety
    /// No buffer from the pool may be pending execution.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        device.destroy_command_pool(self.pool, None);
    }
}

fn buffer_count(count: usize) -> Result<u32> {
    match u32::try_from(count) {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(GpuError::InvalidState(format!(
            "Cannot allocate {count} command buffers"
        ))),
    }
}

/// Reset `cmd` and begin recording into it.
///
/// Resetting first makes the buffer reusable whatever state the last
/// recording or submission left it in.
///
/// # Safety
/// The buffer must come from a resettable pool and not be pending execution.
pub unsafe fn begin(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    usage: vk::CommandBufferUsageFlags,
) -> Result<()> {
    device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
    device.begin_command_buffer(cmd, &vk::CommandBufferBeginInfo::default().flags(usage))?;
    Ok(())
}

/// Re-record `cmd` from scratch with the commands `f` emits.
///
/// # Safety
/// Same as [`begin`].
pub unsafe fn record<F>(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    usage: vk::CommandBufferUsageFlags,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    begin(device, cmd, usage)?;
    f(cmd)?;
    device.end_command_buffer(cmd)?;
    Ok(())
}

/// One queue submission: a command buffer, the semaphores it waits on and
/// signals, and an optional fence.
#[derive(Clone, Debug)]
pub struct Submission {
    command_buffers: [vk::CommandBuffer; 1],
    wait_semaphores: Vec<vk::Semaphore>,
    wait_stages: Vec<vk::PipelineStageFlags>,
    signal_semaphores: Vec<vk::Semaphore>,
    fence: vk::Fence,
}

impl Submission {
    pub fn new(cmd: vk::CommandBuffer) -> Self {
        Self {
            command_buffers: [cmd],
            wait_semaphores: Vec::new(),
            wait_stages: Vec::new(),
            signal_semaphores: Vec::new(),
            fence: vk::Fence::null(),
        }
    }

    /// Hold `stage` of the commands until `semaphore` signals.
    #[must_use]
    pub fn wait(mut self, semaphore: vk::Semaphore, stage: vk::PipelineStageFlags) -> Self {
        self.wait_semaphores.push(semaphore);
        self.wait_stages.push(stage);
        self
    }

    /// Signal `semaphore` once the commands complete.
    #[must_use]
    pub fn signal(mut self, semaphore: vk::Semaphore) -> Self {
        self.signal_semaphores.push(semaphore);
        self
    }

    /// Signal `fence` once the commands complete.
    #[must_use]
    pub fn fence(mut self, fence: vk::Fence) -> Self {
        self.fence = fence;
        self
    }

    fn info(&self) -> vk::SubmitInfo<'_> {
        vk::SubmitInfo::default()
            .command_buffers(&self.command_buffers)
            .wait_semaphores(&self.wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .signal_semaphores(&self.signal_semaphores)
    }

    /// # Safety
    /// Every handle must be valid, the command buffer fully recorded, and
    /// the fence (if any) unsignalled.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn submit(&self, device: &ash::Device, queue: vk::Queue) -> Result<()> {
        device.queue_submit(queue, &[self.info()], self.fence)?;
        Ok(())
    }
}

/// Record, submit and wait for a one-off command buffer.
///
/// The buffer is returned to the pool whether or not recording succeeded.
///
/// # Safety
/// Pool and queue must belong to `device`.
pub unsafe fn execute_single_time_commands<F>(
    device: &ash::Device,
    pool: &CommandPool,
    queue: vk::Queue,
    f: F,
) -> Result<()>
where
    F: FnOnce(vk::CommandBuffer) -> Result<()>,
{
    let cmd = pool.allocate_one(device)?;

    let result = record(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, f)
        .and_then(|()| Submission::new(cmd).submit(device, queue))
        .and_then(|()| device.queue_wait_idle(queue).map_err(GpuError::from));

    pool.free(device, &[cmd]);
    result
}
