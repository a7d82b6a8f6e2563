//! Swapchain and everything sized to it.
//!
//! A [`Swapchain`] owns the presentable images and the per-image resources
//! built on top of them: views, depth targets, the render pass, framebuffers
//! and pre-recorded command buffers. Those are built in [`BUILD_ORDER`] and
//! torn down in [`TEARDOWN_ORDER`], both on recreation and at shutdown.

use crate::command;
use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::image::{create_image_view, find_depth_format, DepthTarget};
use crate::render_pass::{create_framebuffers, create_render_pass};
use crate::surface::{Surface, SurfaceCapabilities};
use crate::sync::{classify_acquire, classify_present, AcquireOutcome, PresentOutcome};
use ash::vk;
use lumen_core::constants::SWAPCHAIN_IMAGE_COUNT;

/// Lifecycle of a [`Swapchain`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainState {
    Uninitialized,
    Ready,
    Recreating,
    Destroyed,
}

impl SwapchainState {
    /// Enter `Recreating`. Only a `Ready` swapchain can be recreated; any
    /// other state is left unchanged and reported.
    pub fn begin_recreate(&mut self) -> Result<()> {
        if *self != Self::Ready {
            return Err(GpuError::InvalidState(format!(
                "Cannot recreate swapchain in state {self:?}"
            )));
        }
        *self = Self::Recreating;
        Ok(())
    }
}

/// Resources owned by a swapchain, in the granularity they are rebuilt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainPart {
    Swapchain,
    ImageViews,
    DepthTargets,
    RenderPass,
    Framebuffers,
    CommandBuffers,
}

/// Creation order. Command buffers come last since recording needs the
/// render pass and framebuffers.
pub const BUILD_ORDER: [SwapchainPart; 6] = [
    SwapchainPart::Swapchain,
    SwapchainPart::ImageViews,
    SwapchainPart::DepthTargets,
    SwapchainPart::RenderPass,
    SwapchainPart::Framebuffers,
    SwapchainPart::CommandBuffers,
];

/// Destruction order on recreate and shutdown.
pub const TEARDOWN_ORDER: [SwapchainPart; 6] = [
    SwapchainPart::ImageViews,
    SwapchainPart::Framebuffers,
    SwapchainPart::CommandBuffers,
    SwapchainPart::DepthTargets,
    SwapchainPart::RenderPass,
    SwapchainPart::Swapchain,
];

/// Select the best surface format.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Result<vk::SurfaceFormatKHR> {
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
        .ok_or_else(|| GpuError::SwapchainCreation("Surface reports no formats".to_string()))
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        // FIFO is always supported
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Swapchain extent for a window of `width` x `height` pixels.
///
/// Uses the surface's current extent when it defines one, and always clamps
/// to the surface's reported bounds.
pub fn clamp_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    let (width, height) = if capabilities.current_extent.width == u32::MAX {
        (width, height)
    } else {
        (
            capabilities.current_extent.width,
            capabilities.current_extent.height,
        )
    };

    let min = capabilities.min_image_extent;
    let max = capabilities.max_image_extent;
    vk::Extent2D {
        width: width.max(min.width).min(max.width),
        height: height.max(min.height).min(max.height),
    }
}

/// Clamp the requested image count to what the surface allows. A max of 0 means unbounded.
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR, requested: u32) -> u32 {
    let count = requested.max(capabilities.min_image_count);
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Swapchain creation options.
#[derive(Clone, Copy, Debug)]
pub struct SwapchainConfig {
    pub vsync: bool,
    pub image_count: u32,
}

impl Default for SwapchainConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            image_count: SWAPCHAIN_IMAGE_COUNT,
        }
    }
}

/// Presentable images plus the render targets and commands built on them.
pub struct Swapchain {
    state: SwapchainState,
    config: SwapchainConfig,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth_targets: Vec<DepthTarget>,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
    command_buffers: Vec<vk::CommandBuffer>,
    surface_format: vk::SurfaceFormatKHR,
    depth_format: vk::Format,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
}

impl Swapchain {
    /// Build a swapchain for a window of `width` x `height` pixels.
    ///
    /// The surface and depth formats chosen here are kept across recreation
    /// so pipelines built against the render pass stay compatible.
    pub fn new(
        ctx: &DeviceContext,
        surface: &Surface,
        width: u32,
        height: u32,
        config: SwapchainConfig,
    ) -> Result<Self> {
        let support = surface.capabilities(ctx)?;
        let surface_format = select_surface_format(&support.formats)?;
        let depth_format = find_depth_format(ctx)?;

        let mut swapchain = Self {
            state: SwapchainState::Uninitialized,
            config,
            loader: surface.swapchain_loader().clone(),
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            depth_targets: Vec::new(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
            command_buffers: Vec::new(),
            surface_format,
            depth_format,
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
        };

        if let Err(e) = swapchain.build(ctx, surface, &support, width, height) {
            swapchain.teardown(ctx);
            return Err(e);
        }
        swapchain.state = SwapchainState::Ready;

        tracing::info!(
            "Created swapchain: {}x{}, {} images, {:?}",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.images.len(),
            swapchain.present_mode
        );

        Ok(swapchain)
    }

    /// Tear everything down and rebuild it for the surface's current size.
    ///
    /// Waits for the device to go idle first.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn recreate(&mut self, ctx: &DeviceContext, surface: &Surface, width: u32, height: u32) -> Result<()> {
        self.state.begin_recreate()?;
        ctx.wait_idle()?;
        self.teardown(ctx);

        let support = surface.capabilities(ctx)?;
        self.build(ctx, surface, &support, width, height)?;
        self.state = SwapchainState::Ready;

        tracing::info!(
            "Recreated swapchain: {}x{}, {} images",
            self.extent.width,
            self.extent.height,
            self.images.len()
        );

        Ok(())
    }

    /// Destroy all owned resources. The device must be idle.
    pub fn destroy(&mut self, ctx: &DeviceContext) {
        if self.state == SwapchainState::Destroyed {
            return;
        }
        self.teardown(ctx);
        self.state = SwapchainState::Destroyed;
    }

    fn build(
        &mut self,
        ctx: &DeviceContext,
        surface: &Surface,
        support: &SurfaceCapabilities,
        width: u32,
        height: u32,
    ) -> Result<()> {
        self.extent = clamp_extent(&support.capabilities, width, height);
        self.present_mode = select_present_mode(&support.present_modes, self.config.vsync);

        for part in BUILD_ORDER {
            self.build_part(part, ctx, surface, support)?;
        }
        Ok(())
    }

    fn build_part(
        &mut self,
        part: SwapchainPart,
        ctx: &DeviceContext,
        surface: &Surface,
        support: &SurfaceCapabilities,
    ) -> Result<()> {
        let device = ctx.device();

        match part {
            SwapchainPart::Swapchain => {
                let caps = &support.capabilities;
                let queue_families = [ctx.graphics_queue_family()];
                let create_info = vk::SwapchainCreateInfoKHR::default()
                    .surface(surface.handle())
                    .min_image_count(choose_image_count(caps, self.config.image_count))
                    .image_format(self.surface_format.format)
                    .image_color_space(self.surface_format.color_space)
                    .image_extent(self.extent)
                    .image_array_layers(1)
                    .image_usage(
                        vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
                    )
                    .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .queue_family_indices(&queue_families)
                    .pre_transform(caps.current_transform)
                    .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                    .present_mode(self.present_mode)
                    .clipped(true);

                // SAFETY: The surface and device are valid and the old swapchain is gone
                unsafe {
                    self.swapchain = self
                        .loader
                        .create_swapchain(&create_info, None)
                        .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;
                    self.images = self.loader.get_swapchain_images(self.swapchain)?;
                }
            }
            SwapchainPart::ImageViews => {
                for &image in &self.images {
                    // SAFETY: Images belong to the live swapchain
                    let view = unsafe { create_image_view(device, image, self.surface_format.format)? };
                    self.image_views.push(view);
                }
            }
            SwapchainPart::DepthTargets => {
                for _ in &self.images {
                    let target = DepthTarget::new(ctx, self.extent, self.depth_format)?;
                    self.depth_targets.push(target);
                }
            }
            SwapchainPart::RenderPass => {
                // SAFETY: The device is valid
                self.render_pass = unsafe {
                    create_render_pass(device, self.surface_format.format, self.depth_format)?
                };
            }
            SwapchainPart::Framebuffers => {
                let depth_views: Vec<vk::ImageView> =
                    self.depth_targets.iter().map(|target| target.view).collect();
                // SAFETY: Render pass and views were built above
                self.framebuffers = unsafe {
                    create_framebuffers(
                        device,
                        self.render_pass,
                        &self.image_views,
                        &depth_views,
                        self.extent,
                    )?
                };
            }
            SwapchainPart::CommandBuffers => {
                // SAFETY: The pool belongs to this device
                self.command_buffers = unsafe { ctx.command_pool().allocate(device, self.images.len())? };
            }
        }

        Ok(())
    }

    fn teardown(&mut self, ctx: &DeviceContext) {
        for part in TEARDOWN_ORDER {
            self.destroy_part(part, ctx);
        }
    }

    fn destroy_part(&mut self, part: SwapchainPart, ctx: &DeviceContext) {
        let device = ctx.device();

        // SAFETY: Callers wait for the device to go idle before tearing down
        unsafe {
            match part {
                SwapchainPart::ImageViews => {
                    for view in self.image_views.drain(..) {
                        device.destroy_image_view(view, None);
                    }
                }
                SwapchainPart::Framebuffers => {
                    for framebuffer in self.framebuffers.drain(..) {
                        device.destroy_framebuffer(framebuffer, None);
                    }
                }
                SwapchainPart::CommandBuffers => {
                    ctx.command_pool().free(device, &self.command_buffers);
                    self.command_buffers.clear();
                }
                SwapchainPart::DepthTargets => {
                    for mut target in self.depth_targets.drain(..) {
                        if let Err(e) = target.destroy(ctx) {
                            tracing::error!("Failed to free depth target: {e}");
                        }
                    }
                }
                SwapchainPart::RenderPass => {
                    if self.render_pass != vk::RenderPass::null() {
                        device.destroy_render_pass(self.render_pass, None);
                        self.render_pass = vk::RenderPass::null();
                    }
                }
                SwapchainPart::Swapchain => {
                    if self.swapchain != vk::SwapchainKHR::null() {
                        self.loader.destroy_swapchain(self.swapchain, None);
                        self.swapchain = vk::SwapchainKHR::null();
                    }
                    self.images.clear();
                }
            }
        }
    }

    /// Acquire the next image, signalling `semaphore` when it is ready.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn acquire_next_image(&self, semaphore: vk::Semaphore) -> Result<AcquireOutcome> {
        // SAFETY: The swapchain is live while in the Ready state
        let result = unsafe {
            self.loader
                .acquire_next_image(self.swapchain, u64::MAX, semaphore, vk::Fence::null())
        };
        classify_acquire(result)
    }

    /// Present `image_index` once `wait_semaphore` signals.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<PresentOutcome> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        // SAFETY: The queue supports presentation to this surface
        let result = unsafe { self.loader.queue_present(queue, &present_info) };
        classify_present(result)
    }

    /// Re-record every per-image command buffer.
    ///
    /// Each buffer begins the render pass on its framebuffer, sets a
    /// full-extent viewport and scissor, then hands over to `draw`.
    pub fn record_commands<F>(&self, ctx: &DeviceContext, clear_color: [f32; 4], mut draw: F) -> Result<()>
    where
        F: FnMut(&ash::Device, vk::CommandBuffer) -> Result<()>,
    {
        let device = ctx.device();
        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let render_area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: self.extent,
        };
        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        for (&cmd, &framebuffer) in self.command_buffers.iter().zip(&self.framebuffers) {
            let begin_info = vk::RenderPassBeginInfo::default()
                .render_pass(self.render_pass)
                .framebuffer(framebuffer)
                .render_area(render_area)
                .clear_values(&clear_values);

            // SAFETY: Command buffers are idle when re-recorded; the caller waits first
            unsafe {
                command::record(device, cmd, vk::CommandBufferUsageFlags::empty(), |cmd| {
                    device.cmd_begin_render_pass(cmd, &begin_info, vk::SubpassContents::INLINE);
                    device.cmd_set_viewport(cmd, 0, &[viewport]);
                    device.cmd_set_scissor(cmd, 0, &[render_area]);
                    let drawn = draw(device, cmd);
                    device.cmd_end_render_pass(cmd);
                    drawn
                })?;
            }
        }

        Ok(())
    }

    /// Current lifecycle state.
    pub const fn state(&self) -> SwapchainState {
        self.state
    }

    /// Render pass shared by every framebuffer.
    pub const fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    /// Pre-recorded command buffer for `image_index`.
    pub fn command_buffer(&self, image_index: u32) -> Result<vk::CommandBuffer> {
        self.command_buffers
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| GpuError::InvalidState(format!("No command buffer for image {image_index}")))
    }

    /// Number of presentable images.
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Surface format of the presentable images.
    pub const fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    /// Format of the depth targets.
    pub const fn depth_format(&self) -> vk::Format {
        self.depth_format
    }

    /// Present mode in use.
    pub const fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Image size.
    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min: (u32, u32), max: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: min.0,
                height: min.1,
            },
            max_image_extent: vk::Extent2D {
                width: max.0,
                height: max.1,
            },
            min_image_count: 2,
            max_image_count: 8,
            ..Default::default()
        }
    }

    #[test]
    fn extent_uses_window_size_when_surface_is_undefined() {
        let caps = caps((u32::MAX, u32::MAX), (1, 1), (4096, 4096));
        assert_eq!(
            clamp_extent(&caps, 800, 600),
            vk::Extent2D {
                width: 800,
                height: 600
            }
        );
    }

    #[test]
    fn extent_is_always_within_surface_bounds() {
        let bounded = caps((u32::MAX, u32::MAX), (64, 64), (1024, 768));
        let defined = caps((2000, 10), (64, 64), (1024, 768));

        for (w, h) in [(0, 0), (1, 5000), (800, 600), (u32::MAX - 1, 3), (1024, 768)] {
            for caps in [&bounded, &defined] {
                let extent = clamp_extent(caps, w, h);
                assert!((64..=1024).contains(&extent.width), "{w}x{h} -> {extent:?}");
                assert!((64..=768).contains(&extent.height), "{w}x{h} -> {extent:?}");
            }
        }
    }

    #[test]
    fn extent_prefers_defined_surface_size() {
        let caps = caps((1280, 720), (1, 1), (4096, 4096));
        assert_eq!(
            clamp_extent(&caps, 10, 10),
            vk::Extent2D {
                width: 1280,
                height: 720
            }
        );
    }

    #[test]
    fn image_count_respects_surface_limits() {
        let mut c = caps((1, 1), (1, 1), (1, 1));
        assert_eq!(choose_image_count(&c, 3), 3);

        c.min_image_count = 4;
        assert_eq!(choose_image_count(&c, 3), 4);

        c.min_image_count = 1;
        c.max_image_count = 2;
        assert_eq!(choose_image_count(&c, 3), 2);

        c.max_image_count = 0;
        assert_eq!(choose_image_count(&c, 5), 5);
    }

    #[test]
    fn surface_format_prefers_srgb() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };

        assert_eq!(select_surface_format(&[unorm, srgb]).unwrap(), srgb);
        assert_eq!(select_surface_format(&[unorm]).unwrap(), unorm);
        assert!(select_surface_format(&[]).is_err());
    }

    #[test]
    fn present_mode_selection() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&all[..2], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(select_present_mode(&[], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn recreate_only_starts_from_ready() {
        let mut state = SwapchainState::Ready;
        state.begin_recreate().unwrap();
        assert_eq!(state, SwapchainState::Recreating);

        for mut state in [
            SwapchainState::Uninitialized,
            SwapchainState::Recreating,
            SwapchainState::Destroyed,
        ] {
            let before = state;
            assert!(state.begin_recreate().is_err());
            assert_eq!(state, before);
        }
    }

    #[test]
    fn teardown_reverses_dependencies() {
        let position = |order: &[SwapchainPart], part| {
            order.iter().position(|&p| p == part).unwrap()
        };

        // Everything is torn down before the swapchain that backs it
        assert_eq!(TEARDOWN_ORDER.last(), Some(&SwapchainPart::Swapchain));
        assert_eq!(BUILD_ORDER.first(), Some(&SwapchainPart::Swapchain));

        // Command buffers are rebuilt last
        assert_eq!(BUILD_ORDER.last(), Some(&SwapchainPart::CommandBuffers));

        for (first, then) in [
            (SwapchainPart::ImageViews, SwapchainPart::Framebuffers),
            (SwapchainPart::Framebuffers, SwapchainPart::CommandBuffers),
            (SwapchainPart::CommandBuffers, SwapchainPart::DepthTargets),
            (SwapchainPart::DepthTargets, SwapchainPart::RenderPass),
            (SwapchainPart::RenderPass, SwapchainPart::Swapchain),
        ] {
            assert!(position(&TEARDOWN_ORDER, first) < position(&TEARDOWN_ORDER, then));
        }

        // Framebuffers need the views, depth targets and render pass
        for dep in [
            SwapchainPart::ImageViews,
            SwapchainPart::DepthTargets,
            SwapchainPart::RenderPass,
        ] {
            assert!(position(&BUILD_ORDER, dep) < position(&BUILD_ORDER, SwapchainPart::Framebuffers));
        }
    }
}
