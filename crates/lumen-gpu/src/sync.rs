//! Frame synchronization.
//!
//! One [`FrameSync`] per swapchain image bounds how far the CPU can run
//! ahead of the GPU: a frame slot is only reused after its in-flight fence
//! has signalled. Fence waits go through [`FenceDevice`] so the ordering can
//! be exercised without a GPU.

use crate::context::DeviceContext;
use crate::deletion::{DeviceIdle, OwnedResource, ResourceHandle};
use crate::error::{GpuError, Result};
use ash::prelude::VkResult;
use ash::vk;

/// Create a semaphore.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_semaphore(device: &ash::Device) -> Result<vk::Semaphore> {
    let create_info = vk::SemaphoreCreateInfo::default();
    let semaphore = device.create_semaphore(&create_info, None)?;
    Ok(semaphore)
}

/// Create a fence.
///
/// # Safety
/// The device must be valid.
pub unsafe fn create_fence(device: &ash::Device, signaled: bool) -> Result<vk::Fence> {
    let flags = if signaled {
        vk::FenceCreateFlags::SIGNALED
    } else {
        vk::FenceCreateFlags::empty()
    };

    let create_info = vk::FenceCreateInfo::default().flags(flags);
    let fence = device.create_fence(&create_info, None)?;
    Ok(fence)
}

/// Blocking fence operations.
pub trait FenceDevice {
    /// Block until `fence` is signalled.
    fn wait_fence(&self, fence: vk::Fence) -> Result<()>;

    /// Return `fence` to the unsignalled state.
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
}

impl FenceDevice for ash::Device {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn wait_fence(&self, fence: vk::Fence) -> Result<()> {
        // SAFETY: Fences reaching here were created by this device
        unsafe { self.wait_for_fences(&[fence], true, u64::MAX)? };
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        // SAFETY: Fences reaching here were created by this device
        unsafe { self.reset_fences(&[fence])? };
        Ok(())
    }
}

/// Synchronization objects for one frame slot.
#[derive(Clone, Copy, Debug)]
pub struct FrameSync {
    /// Signalled when the acquired image is ready to be rendered to
    pub image_available: vk::Semaphore,
    /// Signalled when rendering completes and the image may be presented
    pub render_finished: vk::Semaphore,
    /// Signalled when the slot's submission has finished on the GPU
    pub in_flight: vk::Fence,
    /// Deletion-queue records, when the context owns the objects
    records: Option<[ResourceHandle; 3]>,
}

impl FrameSync {
    /// Create the slot's semaphores and a pre-signalled fence, registering
    /// all three with the context for teardown.
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let device = ctx.device();
        let mut queue = ctx.deletion_queue();

        // Each object is registered as soon as it exists, so a failure part
        // way through leaves nothing unowned
        // SAFETY: The context's device is valid
        let image_available = unsafe { create_semaphore(device)? };
        let image_available_record = queue.push(OwnedResource::Semaphore(image_available));
        // SAFETY: As above
        let render_finished = unsafe { create_semaphore(device)? };
        let render_finished_record = queue.push(OwnedResource::Semaphore(render_finished));
        // SAFETY: As above
        let in_flight = unsafe { create_fence(device, true)? };
        let in_flight_record = queue.push(OwnedResource::Fence(in_flight));

        Ok(Self {
            image_available,
            render_finished,
            in_flight,
            records: Some([image_available_record, render_finished_record, in_flight_record]),
        })
    }

    /// Slot over objects the caller owns and destroys.
    pub const fn from_raw(
        image_available: vk::Semaphore,
        render_finished: vk::Semaphore,
        in_flight: vk::Fence,
    ) -> Self {
        Self {
            image_available,
            render_finished,
            in_flight,
            records: None,
        }
    }

    /// Destroy the slot's objects now rather than at shutdown.
    pub fn release(self, ctx: &DeviceContext, idle: &DeviceIdle) -> Result<()> {
        let Some(records) = self.records else {
            return Ok(());
        };
        let mut first_error = None;
        for record in records {
            if let Err(e) = ctx.release_resource(record, idle) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

/// Result of acquiring a swapchain image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Render to this image. A suboptimal swapchain is still usable.
    Ready { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface and must be recreated.
    OutOfDate,
}

/// Map the raw acquire result onto the frame loop's choices.
pub fn classify_acquire(result: VkResult<(u32, bool)>) -> Result<AcquireOutcome> {
    match result {
        Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Ready {
            image_index,
            suboptimal,
        }),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
        Err(e) => Err(GpuError::from(e)),
    }
}

/// Result of presenting a frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    /// Out of date or suboptimal; recreate before the next frame.
    Stale,
}

/// Map the raw present result onto the frame loop's choices.
pub fn classify_present(result: VkResult<bool>) -> Result<PresentOutcome> {
    match result {
        Ok(false) => Ok(PresentOutcome::Presented),
        Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR) => {
            Ok(PresentOutcome::Stale)
        }
        Err(e) => Err(GpuError::from(e)),
    }
}

/// Frame slots plus the record of which slot last submitted to each image.
pub struct FrameSyncSet {
    frames: Vec<FrameSync>,
    images_in_flight: Vec<Option<vk::Fence>>,
    current_image: u64,
}

impl FrameSyncSet {
    /// Create one frame slot per swapchain image.
    pub fn new(ctx: &DeviceContext, image_count: usize) -> Result<Self> {
        let frames = (0..image_count)
            .map(|_| FrameSync::new(ctx))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_frames(frames))
    }

    /// Build a set from existing slots, one per image.
    pub fn from_frames(frames: Vec<FrameSync>) -> Self {
        let image_count = frames.len();
        Self {
            frames,
            images_in_flight: vec![None; image_count],
            current_image: 0,
        }
    }

    /// Number of frame slots.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Whether the set has no slots.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames advanced so far.
    pub const fn current_image(&self) -> u64 {
        self.current_image
    }

    /// Slot used by the current frame.
    pub fn current_frame(&self) -> usize {
        (self.current_image % self.frames.len().max(1) as u64) as usize
    }

    /// Sync objects of the current slot.
    pub fn current(&self) -> Result<&FrameSync> {
        self.frames
            .get(self.current_frame())
            .ok_or_else(|| GpuError::InvalidState("Frame sync set is empty".to_string()))
    }

    /// Semaphore signalled when rendering to `image_index` completes.
    pub fn render_finished(&self, image_index: u32) -> Result<vk::Semaphore> {
        self.frames
            .get(image_index as usize)
            .map(|frame| frame.render_finished)
            .ok_or_else(|| GpuError::InvalidState(format!("No frame sync for image {image_index}")))
    }

    /// Wait until the current slot's previous submission has finished.
    ///
    /// The fence stays signalled; it is reset by [`Self::claim_image`] once an
    /// image is actually acquired, so an aborted frame never leaves it unsignalled.
    pub fn begin<D: FenceDevice + ?Sized>(&self, device: &D) -> Result<&FrameSync> {
        let frame = self.current()?;
        device.wait_fence(frame.in_flight)?;
        Ok(frame)
    }

    /// Take ownership of `image_index` for the current slot.
    ///
    /// Waits for whichever slot last rendered to that image, then resets the
    /// current slot's fence ready for submission.
    pub fn claim_image<D: FenceDevice + ?Sized>(&mut self, device: &D, image_index: u32) -> Result<()> {
        let fence = self.current()?.in_flight;
        let owner = self
            .images_in_flight
            .get_mut(image_index as usize)
            .ok_or_else(|| GpuError::InvalidState(format!("Image index {image_index} out of range")))?;

        if let Some(previous) = *owner {
            if previous != fence {
                device.wait_fence(previous)?;
            }
        }
        *owner = Some(fence);

        device.reset_fence(fence)
    }

    /// Move to the next frame slot.
    pub fn advance(&mut self) {
        self.current_image += 1;
    }

    /// Forget image ownership after the swapchain was rebuilt with `image_count` images.
    pub fn reset_images(&mut self, image_count: usize) {
        self.images_in_flight = vec![None; image_count];
    }

    /// Match a swapchain rebuilt with `image_count` images.
    ///
    /// Existing slots are kept, missing ones come from `create`, and surplus
    /// slots are handed back for the caller to destroy. All slots must be idle.
    pub fn resize_with<F>(&mut self, image_count: usize, mut create: F) -> Result<Vec<FrameSync>>
    where
        F: FnMut() -> Result<FrameSync>,
    {
        self.reset_images(image_count);
        while self.frames.len() < image_count {
            self.frames.push(create()?);
        }
        Ok(self.frames.split_off(image_count))
    }

    /// [`Self::resize_with`] on the context's device, destroying surplus slots.
    pub fn resize(&mut self, ctx: &DeviceContext, image_count: usize, idle: &DeviceIdle) -> Result<()> {
        let surplus = self.resize_with(image_count, || FrameSync::new(ctx))?;
        let mut first_error = None;
        for frame in surplus {
            if let Err(e) = frame.release(ctx, idle) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum FenceState {
        Signaled,
        Unsignaled,
        Submitted,
    }

    /// Fences that complete their submission as soon as someone waits on them.
    #[derive(Default)]
    struct MockFences {
        states: RefCell<HashMap<vk::Fence, FenceState>>,
        waits: RefCell<Vec<vk::Fence>>,
    }

    impl MockFences {
        fn state(&self, fence: vk::Fence) -> FenceState {
            self.states.borrow()[&fence]
        }

        fn submit(&self, fence: vk::Fence) {
            let mut states = self.states.borrow_mut();
            let state = states.get_mut(&fence).unwrap();
            assert_eq!(*state, FenceState::Unsignaled, "submitted with a signalled fence");
            *state = FenceState::Submitted;
        }
    }

    impl FenceDevice for MockFences {
        fn wait_fence(&self, fence: vk::Fence) -> Result<()> {
            self.waits.borrow_mut().push(fence);
            let mut states = self.states.borrow_mut();
            let state = states.get_mut(&fence).unwrap();
            assert_ne!(*state, FenceState::Unsignaled, "wait would never return");
            *state = FenceState::Signaled;
            Ok(())
        }

        fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
            let mut states = self.states.borrow_mut();
            let state = states.get_mut(&fence).unwrap();
            assert_eq!(*state, FenceState::Signaled, "reset a fence still in flight");
            *state = FenceState::Unsignaled;
            Ok(())
        }
    }

    fn frame_set(count: u64) -> (FrameSyncSet, MockFences) {
        let fences = MockFences::default();
        let frames = (0..count)
            .map(|i| {
                let in_flight = vk::Fence::from_raw(100 + i);
                fences
                    .states
                    .borrow_mut()
                    .insert(in_flight, FenceState::Signaled);
                FrameSync::from_raw(
                    vk::Semaphore::from_raw(200 + i),
                    vk::Semaphore::from_raw(300 + i),
                    in_flight,
                )
            })
            .collect();
        (FrameSyncSet::from_frames(frames), fences)
    }

    #[test]
    fn current_frame_cycles_modulo_count() {
        let (mut set, _) = frame_set(3);
        let slots: Vec<usize> = (0..7)
            .map(|_| {
                let slot = set.current_frame();
                set.advance();
                slot
            })
            .collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(set.current_image(), 7);
    }

    #[test]
    fn begin_waits_on_slot_fence_without_resetting() {
        let (set, fences) = frame_set(3);
        let frame = set.begin(&fences).unwrap();
        assert_eq!(frame.in_flight, vk::Fence::from_raw(100));
        assert_eq!(*fences.waits.borrow(), vec![vk::Fence::from_raw(100)]);
        assert_eq!(fences.state(frame.in_flight), FenceState::Signaled);
    }

    #[test]
    fn claim_waits_for_previous_owner_of_image() {
        let (mut set, fences) = frame_set(3);

        // Slot 0 renders to image 2
        set.begin(&fences).unwrap();
        set.claim_image(&fences, 2).unwrap();
        fences.submit(vk::Fence::from_raw(100));
        set.advance();

        // Slot 1 gets image 2 back before slot 0 finished
        set.begin(&fences).unwrap();
        fences.waits.borrow_mut().clear();
        set.claim_image(&fences, 2).unwrap();

        assert_eq!(*fences.waits.borrow(), vec![vk::Fence::from_raw(100)]);
        assert_eq!(fences.state(vk::Fence::from_raw(101)), FenceState::Unsignaled);
    }

    #[test]
    fn claim_rejects_unknown_image() {
        let (mut set, fences) = frame_set(3);
        assert!(set.claim_image(&fences, 3).is_err());
    }

    #[test]
    fn fences_are_never_reused_while_in_flight() {
        let (mut set, fences) = frame_set(3);
        let image_order = [0, 1, 2, 1, 0, 2, 2, 0, 1, 0];

        for &image_index in &image_order {
            let fence = set.begin(&fences).unwrap().in_flight;
            set.claim_image(&fences, image_index).unwrap();
            fences.submit(fence);
            set.advance();
        }
    }

    #[test]
    fn render_finished_is_indexed_by_image() {
        let (set, _) = frame_set(3);
        assert_eq!(set.render_finished(2).unwrap(), vk::Semaphore::from_raw(302));
        assert!(set.render_finished(3).is_err());
    }

    #[test]
    fn shrinking_hands_back_surplus_slots() {
        let (mut set, fences) = frame_set(3);
        set.begin(&fences).unwrap();
        set.claim_image(&fences, 2).unwrap();

        let surplus = set
            .resize_with(2, || panic!("no slots should be created"))
            .unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(surplus.len(), 1);
        assert_eq!(surplus[0].in_flight, vk::Fence::from_raw(102));
        assert!(set.claim_image(&fences, 2).is_err());
    }

    #[test]
    fn growing_reuses_existing_slots() {
        let (mut set, _) = frame_set(2);
        let mut created = 0;

        let surplus = set
            .resize_with(4, || {
                created += 1;
                Ok(FrameSync::from_raw(
                    vk::Semaphore::from_raw(900 + created),
                    vk::Semaphore::from_raw(950 + created),
                    vk::Fence::from_raw(990 + created),
                ))
            })
            .unwrap();

        assert!(surplus.is_empty());
        assert_eq!(created, 2);
        assert_eq!(set.len(), 4);
        assert_eq!(set.render_finished(0).unwrap(), vk::Semaphore::from_raw(300));
        assert_eq!(set.render_finished(3).unwrap(), vk::Semaphore::from_raw(952));
    }

    #[test]
    fn same_size_resize_only_forgets_ownership() {
        let (mut set, fences) = frame_set(3);
        set.begin(&fences).unwrap();
        set.claim_image(&fences, 1).unwrap();
        fences.submit(vk::Fence::from_raw(100));
        set.advance();

        let surplus = set.resize_with(3, || panic!("no slots should be created")).unwrap();
        assert!(surplus.is_empty());

        // Image 1 no longer waits on slot 0
        set.begin(&fences).unwrap();
        fences.waits.borrow_mut().clear();
        set.claim_image(&fences, 1).unwrap();
        assert!(fences.waits.borrow().is_empty());
    }

    #[test]
    fn acquire_classification() {
        assert_eq!(
            classify_acquire(Ok((1, false))).unwrap(),
            AcquireOutcome::Ready {
                image_index: 1,
                suboptimal: false
            }
        );
        assert_eq!(
            classify_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            AcquireOutcome::OutOfDate
        );
        assert!(classify_acquire(Err(vk::Result::ERROR_DEVICE_LOST)).is_err());
    }

    #[test]
    fn present_classification() {
        assert_eq!(classify_present(Ok(false)).unwrap(), PresentOutcome::Presented);
        assert_eq!(classify_present(Ok(true)).unwrap(), PresentOutcome::Stale);
        assert_eq!(
            classify_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)).unwrap(),
            PresentOutcome::Stale
        );
        assert!(classify_present(Err(vk::Result::ERROR_SURFACE_LOST_KHR)).is_err());
    }
}
