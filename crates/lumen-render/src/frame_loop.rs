//! Frame sequencing.
//!
//! [`FrameLoop`] decides when a frame is skipped, when the swapchain is
//! rebuilt and in which order a frame's steps run. The steps themselves go
//! through [`FrameTarget`], which the renderer implements over its device
//! objects.

use crate::error::Result;
use lumen_gpu::{AcquireOutcome, GpuError, PresentOutcome};

/// An acquired image, handed from `begin_frame` to `end_frame`.
#[derive(Debug)]
pub struct Frame {
    image_index: u32,
}

impl Frame {
    /// Swapchain image being rendered.
    pub const fn image_index(&self) -> u32 {
        self.image_index
    }
}

/// The device-side steps of a frame.
pub(crate) trait FrameTarget {
    /// Rewrite stale bindings and re-record commands if the scene changed
    /// since they were last recorded.
    fn refresh(&mut self) -> Result<()>;

    /// Wait for the current frame slot, then acquire an image.
    fn acquire(&mut self) -> Result<AcquireOutcome>;

    /// Take `image_index` for the current slot.
    fn claim(&mut self, image_index: u32) -> Result<()>;

    /// Upload per-frame data.
    fn update(&mut self) -> Result<()>;

    fn submit(&mut self, image_index: u32) -> Result<()>;

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome>;

    /// Move on to the next frame slot.
    fn advance(&mut self);

    /// Rebuild the swapchain for a `width` x `height` window.
    fn recreate(&mut self, width: u32, height: u32) -> Result<()>;
}

/// Window size, pending recreation and the frame currently in flight.
#[derive(Clone, Copy, Debug)]
pub(crate) struct FrameLoop {
    window_size: (u32, u32),
    recreate_pending: bool,
    acquired: Option<u32>,
}

impl FrameLoop {
    pub const fn new(width: u32, height: u32) -> Self {
        Self {
            window_size: (width, height),
            recreate_pending: false,
            acquired: None,
        }
    }

    /// Record a new window size. Nothing is rebuilt until the swapchain reports stale.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        self.window_size = (width, height);
    }

    const fn minimized(&self) -> bool {
        self.window_size.0 == 0 || self.window_size.1 == 0
    }

    /// Start a frame.
    ///
    /// Returns `None` when there is nothing to render this iteration: the
    /// window is minimised, or the swapchain was stale and has been rebuilt.
    /// A frame handed out must be passed to [`Self::end`] before the next begin.
    pub fn begin<T: FrameTarget + ?Sized>(&mut self, target: &mut T) -> Result<Option<Frame>> {
        if let Some(image_index) = self.acquired {
            return Err(GpuError::InvalidState(format!(
                "Frame for image {image_index} was never ended"
            ))
            .into());
        }
        if self.minimized() {
            return Ok(None);
        }
        if self.recreate_pending {
            self.recreate(target)?;
        }

        target.refresh()?;

        match target.acquire()? {
            AcquireOutcome::OutOfDate => {
                tracing::debug!("Swapchain out of date at acquire");
                self.recreate(target)?;
                Ok(None)
            }
            AcquireOutcome::Ready { image_index, .. } => {
                target.claim(image_index)?;
                self.acquired = Some(image_index);
                Ok(Some(Frame { image_index }))
            }
        }
    }

    /// Finish a frame: upload, submit, present, then rebuild if presentation
    /// reported the swapchain stale.
    ///
    /// Resources replaced since [`Self::begin`] are rebound and commands
    /// re-recorded before submission.
    pub fn end<T: FrameTarget + ?Sized>(&mut self, target: &mut T, frame: Frame) -> Result<()> {
        let image_index = frame.image_index;
        if self.acquired != Some(image_index) {
            return Err(GpuError::InvalidState(format!(
                "Frame for image {image_index} is not the one in flight"
            ))
            .into());
        }
        self.acquired = None;

        target.refresh()?;
        target.update()?;
        target.submit(image_index)?;
        let outcome = target.present(image_index)?;
        target.advance();

        if outcome == PresentOutcome::Stale {
            tracing::debug!("Swapchain stale at present");
            self.recreate(target)?;
        }
        Ok(())
    }

    fn recreate<T: FrameTarget + ?Sized>(&mut self, target: &mut T) -> Result<()> {
        if self.minimized() {
            self.recreate_pending = true;
            return Ok(());
        }
        let (width, height) = self.window_size;
        target.recreate(width, height)?;
        self.recreate_pending = false;
        Ok(())
    }
}
