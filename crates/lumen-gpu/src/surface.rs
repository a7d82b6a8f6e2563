//! Window surface.
//!
//! Hides the raw-window-handle plumbing from application code and owns the
//! extension loaders the swapchain needs.

use crate::context::DeviceContext;
use crate::deletion::OwnedResource;
use crate::error::{GpuError, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// A presentable surface for one window.
///
/// The surface itself is registered with the context's deletion queue and
/// destroyed with it.
pub struct Surface {
    surface: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
    swapchain_loader: ash::khr::swapchain::Device,
}

impl Surface {
    /// Create a surface for `window` and check the graphics queue can present to it.
    ///
    /// # Safety
    /// The window must outlive the surface.
    pub unsafe fn from_window<W>(ctx: &DeviceContext, window: &W) -> Result<Self>
    where
        W: HasDisplayHandle + HasWindowHandle,
    {
        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?;
        let window_handle = window
            .window_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get window handle: {e}")))?;

        let surface = ash_window::create_surface(
            ctx.entry(),
            ctx.instance(),
            display.as_raw(),
            window_handle.as_raw(),
            None,
        )
        .map_err(|e| GpuError::SurfaceCreation(e.to_string()))?;

        let loader = ash::khr::surface::Instance::new(ctx.entry(), ctx.instance());

        let supported = loader.get_physical_device_surface_support(
            ctx.physical_device(),
            ctx.graphics_queue_family(),
            surface,
        );
        if !matches!(supported, Ok(true)) {
            loader.destroy_surface(surface, None);
            return Err(GpuError::SurfaceCreation(
                "Graphics queue cannot present to this surface".to_string(),
            ));
        }

        ctx.push_resource(OwnedResource::Surface {
            loader: loader.clone(),
            surface,
        });

        let swapchain_loader = ash::khr::swapchain::Device::new(ctx.instance(), ctx.device());

        Ok(Self {
            surface,
            loader,
            swapchain_loader,
        })
    }

    /// The raw surface handle.
    pub const fn handle(&self) -> vk::SurfaceKHR {
        self.surface
    }

    /// Swapchain extension loader.
    pub const fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Query what the surface currently supports.
    pub fn capabilities(&self, ctx: &DeviceContext) -> Result<SurfaceCapabilities> {
        let physical_device = ctx.physical_device();
        // SAFETY: Surface and physical device belong to the same instance
        unsafe {
            Ok(SurfaceCapabilities {
                capabilities: self
                    .loader
                    .get_physical_device_surface_capabilities(physical_device, self.surface)?,
                formats: self
                    .loader
                    .get_physical_device_surface_formats(physical_device, self.surface)?,
                present_modes: self
                    .loader
                    .get_physical_device_surface_present_modes(physical_device, self.surface)?,
            })
        }
    }
}

/// Surface capabilities query result.
pub struct SurfaceCapabilities {
    /// Raw surface capabilities.
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}
