//! Image views, depth targets and layout transitions.

use crate::context::DeviceContext;
use crate::error::{GpuError, Result};
use crate::memory::GpuImage;
use ash::vk;
use gpu_allocator::MemoryLocation;

/// Depth formats in order of preference.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D32_SFLOAT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// Access masks and pipeline stages for one layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_access: vk::AccessFlags,
    pub dst_access: vk::AccessFlags,
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
}

/// Barrier masks for a supported `old -> new` layout transition.
pub fn barrier_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<BarrierMasks> {
    use vk::ImageLayout as L;

    let masks = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => BarrierMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::TRANSFER_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::TRANSFER,
        },
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => BarrierMasks {
            src_access: vk::AccessFlags::TRANSFER_WRITE,
            dst_access: vk::AccessFlags::SHADER_READ,
            src_stage: vk::PipelineStageFlags::TRANSFER,
            dst_stage: vk::PipelineStageFlags::FRAGMENT_SHADER,
        },
        (L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL) => BarrierMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS,
        },
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => BarrierMasks {
            src_access: vk::AccessFlags::empty(),
            dst_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            src_stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            dst_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        },
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => BarrierMasks {
            src_access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            dst_access: vk::AccessFlags::empty(),
            src_stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            dst_stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        },
        (from, to) => return Err(GpuError::UnsupportedLayoutTransition { from, to }),
    };

    Ok(masks)
}

/// Aspect flags for images of `format`.
pub fn aspect_for_format(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT | vk::Format::D16_UNORM => vk::ImageAspectFlags::DEPTH,
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D16_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::COLOR,
    }
}

/// Record a layout transition barrier covering the first mip and layer.
///
/// # Safety
/// The command buffer must be recording and the image must be valid.
pub unsafe fn transition_image_layout(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    format: vk::Format,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
) -> Result<()> {
    let masks = barrier_masks(old_layout, new_layout)?;
    record_barrier(device, cmd, image, format, (old_layout, new_layout), masks);
    Ok(())
}

/// Record a barrier whose masks were already resolved by [`barrier_masks`].
///
/// # Safety
/// The command buffer must be recording and the image must be valid.
pub(crate) unsafe fn record_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    format: vk::Format,
    (old_layout, new_layout): (vk::ImageLayout, vk::ImageLayout),
    masks: BarrierMasks,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range(aspect_for_format(format)))
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);

    device.cmd_pipeline_barrier(
        cmd,
        masks.src_stage,
        masks.dst_stage,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Create a 2D view over the first mip and layer of `image`.
///
/// # Safety
/// The device and image must be valid.
pub unsafe fn create_image_view(
    device: &ash::Device,
    image: vk::Image,
    format: vk::Format,
) -> Result<vk::ImageView> {
    let view_info = vk::ImageViewCreateInfo::default()
        .image(image)
        .view_type(vk::ImageViewType::TYPE_2D)
        .format(format)
        .components(vk::ComponentMapping::default())
        .subresource_range(subresource_range(aspect_for_format(format)));

    let view = device.create_image_view(&view_info, None)?;
    Ok(view)
}

/// Pick the first candidate the predicate accepts.
pub fn choose_depth_format<F>(mut supports_depth_attachment: F) -> Result<vk::Format>
where
    F: FnMut(vk::Format) -> bool,
{
    DEPTH_FORMAT_CANDIDATES
        .into_iter()
        .find(|&format| supports_depth_attachment(format))
        .ok_or_else(|| GpuError::MissingFeature("depth attachment format".to_string()))
}

/// Pick the best depth format the physical device supports for optimal tiling.
pub fn find_depth_format(ctx: &DeviceContext) -> Result<vk::Format> {
    choose_depth_format(|format| {
        // SAFETY: The context's instance and physical device are valid
        let props = unsafe {
            ctx.instance()
                .get_physical_device_format_properties(ctx.physical_device(), format)
        };
        props
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
    })
}

/// Depth image and view for one framebuffer.
pub struct DepthTarget {
    pub image: GpuImage,
    pub view: vk::ImageView,
}

impl DepthTarget {
    /// Allocate a depth image of `extent` and move it into the attachment layout.
    pub fn new(ctx: &DeviceContext, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let mut image = ctx
            .allocator()
            .lock()
            .create_image(&create_info, MemoryLocation::GpuOnly, "depth target")?;

        // SAFETY: The image was just created on this device
        let view = match unsafe { create_image_view(ctx.device(), image.image, format) } {
            Ok(view) => view,
            Err(e) => {
                ctx.allocator().lock().free_image(&mut image)?;
                return Err(e);
            }
        };

        let handle = image.image;
        let mut target = Self { image, view };
        let layouts = (
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        );
        let transitioned = barrier_masks(layouts.0, layouts.1).and_then(|masks| {
            ctx.execute_single_time(|device, cmd| {
                // SAFETY: The command buffer is recording and the image is live
                unsafe { record_barrier(device, cmd, handle, format, layouts, masks) };
                Ok(())
            })
        });

        if let Err(e) = transitioned {
            // SAFETY: The single-time submission finished or never started
            unsafe { target.destroy(ctx)? };
            return Err(e);
        }

        Ok(target)
    }

    /// Destroy the view and free the image.
    ///
    /// # Safety
    /// The target must not be in use by the GPU.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) -> Result<()> {
        ctx.device().destroy_image_view(self.view, None);
        self.view = vk::ImageView::null();
        ctx.allocator().lock().free_image(&mut self.image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_transitions_have_masks() {
        use vk::ImageLayout as L;

        let upload = barrier_masks(L::UNDEFINED, L::TRANSFER_DST_OPTIMAL).unwrap();
        assert_eq!(upload.dst_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(upload.dst_stage, vk::PipelineStageFlags::TRANSFER);

        let sample = barrier_masks(L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL).unwrap();
        assert_eq!(sample.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(sample.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);

        let depth = barrier_masks(L::UNDEFINED, L::DEPTH_STENCIL_ATTACHMENT_OPTIMAL).unwrap();
        assert_eq!(depth.dst_stage, vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS);

        assert!(barrier_masks(L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL).is_ok());
        assert!(barrier_masks(L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR).is_ok());
    }

    #[test]
    fn unsupported_transition_is_rejected() {
        let err = barrier_masks(
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            GpuError::UnsupportedLayoutTransition {
                from: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                to: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            }
        ));
    }

    #[test]
    fn depth_aspects_include_stencil_when_present() {
        assert_eq!(
            aspect_for_format(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            aspect_for_format(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(
            aspect_for_format(vk::Format::B8G8R8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
    }

    #[test]
    fn depth_format_prefers_earlier_candidates() {
        assert_eq!(
            choose_depth_format(|_| true).unwrap(),
            vk::Format::D32_SFLOAT_S8_UINT
        );
        assert_eq!(
            choose_depth_format(|f| f == vk::Format::D24_UNORM_S8_UINT).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );
        assert!(choose_depth_format(|_| false).is_err());
    }
}
