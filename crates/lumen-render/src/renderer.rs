//! The renderer.
//!
//! [`Renderer`] owns the device context, the swapchain and every registry,
//! and drives BeginFrame/EndFrame through the frame loop. Swapchain
//! recreation happens only when acquire or present reports the surface
//! stale; resize notifications just record the new window size for that
//! recreation to use.

use crate::camera::Camera;
use crate::descriptor_set::{BoundResources, SharedDescriptorSet};
use crate::error::Result;
use crate::frame_loop::{Frame, FrameLoop, FrameTarget};
use crate::material::{MaterialId, MaterialRegistry};
use crate::mesh::{MeshOffset, MeshRegistry};
use crate::object::{ObjectHandle, RenderObject};
use crate::pipelines::{PipelineId, PipelineRegistry};
use crate::texture::{TextureId, TextureRegistry};
use crate::uniforms::UniformAllocator;
use ash::vk;
use lumen_core::constants::SWAPCHAIN_IMAGE_COUNT;
use lumen_core::{Error, Vertex};
use lumen_gpu::command::Submission;
use lumen_gpu::{
    AcquireOutcome, DeviceContext, FrameSyncSet, GpuError, GraphicsPipeline,
    GraphicsPipelineConfig, PresentOutcome, Surface, Swapchain, SwapchainConfig,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// Renderer options.
#[derive(Clone, Copy, Debug)]
pub struct RendererConfig {
    pub vsync: bool,
    pub clear_color: [f32; 4],
    pub image_count: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            clear_color: [0.02, 0.02, 0.03, 1.0],
            image_count: SWAPCHAIN_IMAGE_COUNT,
        }
    }
}

impl RendererConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    #[must_use]
    pub const fn clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    #[must_use]
    pub const fn image_count(mut self, count: u32) -> Self {
        self.image_count = count;
        self
    }
}

/// Scene state plus everything needed to put it on screen.
pub struct Renderer {
    config: RendererConfig,
    frame_loop: FrameLoop,
    commands_dirty: bool,
    camera: Camera,
    objects: Vec<RenderObject>,
    meshes: MeshRegistry,
    textures: TextureRegistry,
    materials: MaterialRegistry,
    pipelines: PipelineRegistry,
    uniforms: UniformAllocator,
    descriptor_set: SharedDescriptorSet,
    frame_sync: FrameSyncSet,
    swapchain: Swapchain,
    surface: Surface,
    // Dropped last
    ctx: DeviceContext,
}

impl Renderer {
    /// Create a renderer drawing into `window`.
    ///
    /// # Safety
    /// The window must outlive the renderer.
    pub unsafe fn new<W>(
        ctx: DeviceContext,
        window: &W,
        width: u32,
        height: u32,
        config: RendererConfig,
    ) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        // SAFETY: The caller keeps the window alive for the renderer's lifetime
        let surface = unsafe { Surface::from_window(&ctx, window)? };
        let swapchain_config = SwapchainConfig {
            vsync: config.vsync,
            image_count: config.image_count,
        };
        let mut swapchain = Swapchain::new(&ctx, &surface, width, height, swapchain_config)?;

        let scene = SceneResources::new(&ctx, swapchain.image_count());
        let scene = match scene {
            Ok(scene) => scene,
            Err(e) => {
                if ctx.wait_idle().is_ok() {
                    swapchain.destroy(&ctx);
                }
                return Err(e);
            }
        };

        let mut camera = Camera::default();
        let extent = swapchain.extent();
        camera.set_viewport(extent.width, extent.height);

        Ok(Self {
            config,
            frame_loop: FrameLoop::new(width, height),
            commands_dirty: true,
            camera,
            objects: Vec::new(),
            meshes: scene.meshes,
            textures: scene.textures,
            materials: MaterialRegistry::new(),
            pipelines: PipelineRegistry::new(),
            uniforms: scene.uniforms,
            descriptor_set: scene.descriptor_set,
            frame_sync: scene.frame_sync,
            swapchain,
            surface,
            ctx,
        })
    }

    /// The device context.
    pub const fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    pub const fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub const fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Append a mesh to the global buffers.
    pub fn register_mesh(&mut self, name: &str, vertices: &[Vertex], indices: &[u32]) -> Result<MeshOffset> {
        self.meshes.register(&self.ctx, name, vertices, indices)
    }

    /// Upload an RGBA8 texture.
    pub fn register_texture(&mut self, name: &str, width: u32, height: u32, pixels: &[u8]) -> Result<TextureId> {
        self.textures.register(&self.ctx, name, width, height, pixels)
    }

    /// Register a material, optionally sampling a registered texture.
    pub fn register_material(&mut self, name: &str, albedo_texture: Option<&str>) -> Result<MaterialId> {
        let albedo = albedo_texture
            .map(|texture| self.textures.id_of(texture))
            .transpose()?;
        Ok(self.materials.register(name, albedo)?)
    }

    /// Build a pipeline from compiled shaders against the swapchain render pass.
    pub fn create_pipeline(&mut self, name: &str, vertex_spirv: &[u8], fragment_spirv: &[u8]) -> Result<PipelineId> {
        if self.pipelines.contains(name) {
            return Err(Error::AlreadyExists(format!("pipeline '{name}'")).into());
        }

        let config = GraphicsPipelineConfig {
            vertex_shader: vertex_spirv.to_vec(),
            fragment_shader: fragment_spirv.to_vec(),
            ..GraphicsPipelineConfig::default()
        };
        let pipeline = GraphicsPipeline::new(
            &self.ctx,
            &config,
            self.swapchain.render_pass(),
            &[self.descriptor_set.layout()],
        )?;

        tracing::debug!("Created pipeline '{}'", name);
        Ok(self.pipelines.register(name, pipeline)?)
    }

    /// Create an object drawing a registered mesh with a pipeline and material.
    ///
    /// The object receives its uniform slot here and keeps it for its lifetime.
    pub fn create_object(&mut self, mesh: &str, pipeline: &str, material: &str) -> Result<ObjectHandle> {
        let mesh = self.meshes.get(mesh)?;
        let pipeline = self.pipelines.id_of(pipeline)?;
        let material = self.materials.id_of(material)?;
        let slot = self.uniforms.allocate(&self.ctx)?;

        let handle = ObjectHandle(self.objects.len() as u32);
        self.objects.push(RenderObject::new(mesh, pipeline, material, slot));
        self.commands_dirty = true;
        Ok(handle)
    }

    pub fn object(&self, handle: ObjectHandle) -> Option<&RenderObject> {
        self.objects.get(handle.0 as usize)
    }

    /// Mutable access to an object, typically to move it.
    pub fn object_mut(&mut self, handle: ObjectHandle) -> Option<&mut RenderObject> {
        self.objects.get_mut(handle.0 as usize)
    }

    pub fn objects(&self) -> &[RenderObject] {
        &self.objects
    }

    /// Record a new window size. Nothing is rebuilt until the swapchain reports stale.
    pub fn notify_resize(&mut self, width: u32, height: u32) {
        self.frame_loop.notify_resize(width, height);
    }

    /// Wait for the frame slot, then acquire an image.
    ///
    /// Returns `None` when there is nothing to render this iteration: the
    /// window is minimised, or the swapchain was stale and has been rebuilt.
    /// The scene may still be changed before [`Self::end_frame`].
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn begin_frame(&mut self) -> Result<Option<Frame>> {
        self.with_frame_loop(|frame_loop, target| frame_loop.begin(target))
    }

    /// Update every object's uniforms, submit the image's commands and present.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn end_frame(&mut self, frame: Frame) -> Result<()> {
        self.with_frame_loop(|frame_loop, target| frame_loop.end(target, frame))
    }

    /// Run one full frame.
    pub fn render_frame(&mut self) -> Result<()> {
        if let Some(frame) = self.begin_frame()? {
            self.end_frame(frame)?;
        }
        Ok(())
    }

    fn with_frame_loop<R>(&mut self, f: impl FnOnce(&mut FrameLoop, &mut Self) -> R) -> R {
        let mut frame_loop = self.frame_loop;
        let result = f(&mut frame_loop, self);
        self.frame_loop = frame_loop;
        result
    }

    fn record_commands(&self) -> Result<()> {
        let objects = &self.objects;
        let pipelines = &self.pipelines;
        let descriptor_set = &self.descriptor_set;

        self.swapchain
            .record_commands(&self.ctx, self.config.clear_color, |device, cmd| {
                for object in objects {
                    let pipeline = pipelines
                        .get(object.pipeline())
                        .map_err(|e| GpuError::ResourceNotFound(e.to_string()))?;
                    // SAFETY: Recording inside the swapchain render pass the pipeline targets
                    unsafe { object.draw(device, cmd, pipeline, descriptor_set) };
                }
                Ok(())
            })?;

        tracing::debug!("Recorded draw commands for {} objects", objects.len());
        Ok(())
    }
}

impl FrameTarget for Renderer {
    /// Rewrite the shared set after any bound buffer was replaced, and
    /// re-record the per-image commands after the scene changed.
    fn refresh(&mut self) -> Result<()> {
        let current = BoundResources::of(&self.meshes, &self.uniforms, &self.textures);
        let stale = self.descriptor_set.is_stale(&current);
        if !stale && !self.commands_dirty {
            return Ok(());
        }

        // Recorded commands and the set may still be in use
        self.ctx.wait_idle()?;

        if stale {
            self.descriptor_set
                .write(&self.ctx, &self.meshes, &self.uniforms, &self.textures);
        }
        self.record_commands()?;
        self.commands_dirty = false;
        Ok(())
    }

    fn acquire(&mut self) -> Result<AcquireOutcome> {
        let image_available = self.frame_sync.begin(self.ctx.device())?.image_available;
        Ok(self.swapchain.acquire_next_image(image_available)?)
    }

    fn claim(&mut self, image_index: u32) -> Result<()> {
        Ok(self.frame_sync.claim_image(self.ctx.device(), image_index)?)
    }

    fn update(&mut self) -> Result<()> {
        let view = self.camera.view_matrix();
        let projection = self.camera.projection_matrix();
        for object in &self.objects {
            let material = self.materials.get(object.material())?.uniforms();
            self.uniforms.write(
                &self.ctx,
                object.slot(),
                &object.uniforms(view, projection),
                &material,
            )?;
        }
        self.ctx.flush_transfers()?;
        Ok(())
    }

    fn submit(&mut self, image_index: u32) -> Result<()> {
        let sync = *self.frame_sync.current()?;
        let render_finished = self.frame_sync.render_finished(image_index)?;
        let cmd = self.swapchain.command_buffer(image_index)?;

        // SAFETY: The command buffer was recorded for this image and its fence was reset on claim
        unsafe {
            Submission::new(cmd)
                .wait(sync.image_available, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .signal(render_finished)
                .fence(sync.in_flight)
                .submit(self.ctx.device(), self.ctx.graphics_queue())?;
        }
        Ok(())
    }

    fn present(&mut self, image_index: u32) -> Result<PresentOutcome> {
        let render_finished = self.frame_sync.render_finished(image_index)?;
        Ok(self
            .swapchain
            .present(self.ctx.graphics_queue(), image_index, render_finished)?)
    }

    fn advance(&mut self) {
        self.frame_sync.advance();
    }

    fn recreate(&mut self, width: u32, height: u32) -> Result<()> {
        self.swapchain
            .recreate(&self.ctx, &self.surface, width, height)?;

        let image_count = self.swapchain.image_count();
        if image_count == self.frame_sync.len() {
            self.frame_sync.reset_images(image_count);
        } else {
            tracing::warn!(
                "Swapchain image count changed from {} to {}",
                self.frame_sync.len(),
                image_count
            );
            // Recreation left the device idle; nothing uses the surplus slots
            let idle = self.ctx.wait_idle()?;
            self.frame_sync.resize(&self.ctx, image_count, &idle)?;
        }

        let extent = self.swapchain.extent();
        self.camera.set_viewport(extent.width, extent.height);
        self.commands_dirty = true;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            tracing::error!("Device wait failed during renderer teardown: {e}");
            return;
        }
        self.swapchain.destroy(&self.ctx);
        tracing::info!("Renderer destroyed");
    }
}

/// GPU-side scene state created after the swapchain.
struct SceneResources {
    meshes: MeshRegistry,
    textures: TextureRegistry,
    uniforms: UniformAllocator,
    descriptor_set: SharedDescriptorSet,
    frame_sync: FrameSyncSet,
}

impl SceneResources {
    fn new(ctx: &DeviceContext, image_count: usize) -> Result<Self> {
        Ok(Self {
            frame_sync: FrameSyncSet::new(ctx, image_count)?,
            meshes: MeshRegistry::new(ctx)?,
            textures: TextureRegistry::new(ctx)?,
            uniforms: UniformAllocator::new(ctx)?,
            descriptor_set: SharedDescriptorSet::new(ctx)?,
        })
    }
}
