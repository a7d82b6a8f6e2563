//! Batched staging-to-device copies.
//!
//! Buffer updates made during a frame are recorded onto one reusable command
//! buffer and submitted together by [`TransferBatch::flush`], instead of one
//! submission per update.

use crate::command::{self, CommandPool, Submission};
use crate::error::Result;
use ash::vk;

/// Stages whose shader reads may touch buffers written by the batch.
const SHADER_STAGES: vk::PipelineStageFlags = vk::PipelineStageFlags::from_raw(
    vk::PipelineStageFlags::VERTEX_SHADER.as_raw() | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw(),
);
const SHADER_READS: vk::AccessFlags = vk::AccessFlags::from_raw(
    vk::AccessFlags::SHADER_READ.as_raw() | vk::AccessFlags::UNIFORM_READ.as_raw(),
);

/// One command buffer accumulating buffer copies until flushed.
pub struct TransferBatch {
    cmd: vk::CommandBuffer,
    fence: vk::Fence,
    recording: bool,
    pending_copies: u32,
}

impl TransferBatch {
    /// Allocate the batch command buffer and its completion fence.
    ///
    /// # Safety
    /// The device and pool must be valid.
    pub unsafe fn new(device: &ash::Device, pool: &CommandPool) -> Result<Self> {
        let cmd = pool.allocate_one(device)?;
        let fence = device.create_fence(&vk::FenceCreateInfo::default(), None)?;

        Ok(Self {
            cmd,
            fence,
            recording: false,
            pending_copies: 0,
        })
    }

    /// Fence signalled when a flushed batch completes.
    pub const fn fence(&self) -> vk::Fence {
        self.fence
    }

    /// Copies recorded since the last flush.
    pub const fn pending_copies(&self) -> u32 {
        self.pending_copies
    }

    /// Record a copy from `src` to `dst`.
    ///
    /// # Safety
    /// The device and both buffers must be valid until the next flush completes.
    pub unsafe fn record_copy(
        &mut self,
        device: &ash::Device,
        src: vk::Buffer,
        dst: vk::Buffer,
        region: vk::BufferCopy,
    ) -> Result<()> {
        if !self.recording {
            // Resets whatever the previous flush left behind
            command::begin(device, self.cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;

            // Earlier submissions may still be reading the destination ranges
            let barrier = vk::MemoryBarrier::default()
                .src_access_mask(SHADER_READS)
                .dst_access_mask(vk::AccessFlags::TRANSFER_WRITE);
            device.cmd_pipeline_barrier(
                self.cmd,
                SHADER_STAGES,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[barrier],
                &[],
                &[],
            );
            self.recording = true;
        }

        device.cmd_copy_buffer(self.cmd, src, dst, &[region]);
        self.pending_copies += 1;
        Ok(())
    }

    /// Submit recorded copies and block until they complete.
    ///
    /// Returns the number of copies submitted. A batch with nothing recorded
    /// submits nothing.
    ///
    /// # Safety
    /// The device and queue must be valid.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub unsafe fn flush(&mut self, device: &ash::Device, queue: vk::Queue) -> Result<u32> {
        if !self.recording {
            return Ok(0);
        }

        let barrier = vk::MemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(SHADER_READS);
        device.cmd_pipeline_barrier(
            self.cmd,
            vk::PipelineStageFlags::TRANSFER,
            SHADER_STAGES,
            vk::DependencyFlags::empty(),
            &[barrier],
            &[],
            &[],
        );
        self.recording = false;
        let submitted = std::mem::take(&mut self.pending_copies);

        device.end_command_buffer(self.cmd)?;
        Submission::new(self.cmd).fence(self.fence).submit(device, queue)?;
        device.wait_for_fences(&[self.fence], true, u64::MAX)?;
        device.reset_fences(&[self.fence])?;
        Ok(submitted)
    }
}
