//! Texture registry.
//!
//! Uploads decoded RGBA8 pixels into sampled images. The registry fills the
//! fixed-size texture array at binding 5; elements without a texture point at
//! a 1x1 white fallback.

use crate::error::Result;
use ash::vk;
use gpu_allocator::MemoryLocation;
use hashbrown::HashMap;
use lumen_core::constants::MAX_TEXTURES;
use lumen_core::Error;
use lumen_gpu::image::create_image_view;
use lumen_gpu::{transition_image_layout, DeviceContext, GpuError, OwnedResource};

/// Index of a texture in the shader's texture array.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TextureId(pub u32);

/// A sampled texture. The image, view and sampler are owned by the deletion queue.
#[derive(Clone, Copy, Debug)]
pub struct Texture {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub sampler: vk::Sampler,
    pub width: u32,
    pub height: u32,
}

impl Texture {
    fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo::default()
            .sampler(self.sampler)
            .image_view(self.view)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
    }
}

/// Check that `pixels` holds exactly `width * height` RGBA8 texels.
pub fn validate_rgba8(width: u32, height: u32, pixels: &[u8]) -> lumen_core::Result<()> {
    if width == 0 || height == 0 {
        return Err(Error::InvalidData(format!("texture size {width}x{height}")));
    }
    let expected = u64::from(width) * u64::from(height) * 4;
    if pixels.len() as u64 != expected {
        return Err(Error::InvalidData(format!(
            "expected {expected} bytes of RGBA8 for {width}x{height}, got {}",
            pixels.len()
        )));
    }
    Ok(())
}

/// Named textures plus the fallback.
pub struct TextureRegistry {
    textures: Vec<Texture>,
    names: HashMap<String, TextureId>,
    fallback: Texture,
}

impl TextureRegistry {
    /// Create the registry and upload the fallback texture.
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let fallback = upload_rgba8(ctx, "fallback white", 1, 1, &[255; 4])?;
        Ok(Self {
            textures: Vec::new(),
            names: HashMap::new(),
            fallback,
        })
    }

    /// Upload a texture under `name`.
    ///
    /// Registering a name twice returns the existing texture without uploading.
    pub fn register(
        &mut self,
        ctx: &DeviceContext,
        name: &str,
        width: u32,
        height: u32,
        pixels: &[u8],
    ) -> Result<TextureId> {
        if let Some(&id) = self.names.get(name) {
            tracing::debug!("Texture '{}' already loaded", name);
            return Ok(id);
        }

        if self.textures.len() >= MAX_TEXTURES as usize {
            return Err(Error::OutOfBounds(format!(
                "texture '{name}': all {MAX_TEXTURES} texture slots are used"
            ))
            .into());
        }
        validate_rgba8(width, height, pixels)?;

        let texture = upload_rgba8(ctx, name, width, height, pixels)?;
        let id = TextureId(self.textures.len() as u32);
        self.textures.push(texture);
        self.names.insert(name.to_string(), id);

        tracing::debug!("Loaded texture '{}' ({}x{}) as {}", name, width, height, id.0);
        Ok(id)
    }

    /// Id of a registered texture.
    pub fn id_of(&self, name: &str) -> Result<TextureId> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("texture '{name}'")).into())
    }

    /// A registered texture.
    pub fn get(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.0 as usize)
    }

    /// Number of registered textures.
    pub fn len(&self) -> usize {
        self.textures.len()
    }

    /// Whether no textures are registered.
    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// One descriptor per array element, padded with the fallback.
    pub fn descriptor_infos(&self) -> Vec<vk::DescriptorImageInfo> {
        (0..MAX_TEXTURES as usize)
            .map(|i| self.textures.get(i).unwrap_or(&self.fallback).descriptor_info())
            .collect()
    }
}

fn upload_rgba8(
    ctx: &DeviceContext,
    name: &str,
    width: u32,
    height: u32,
    pixels: &[u8],
) -> Result<Texture> {
    let format = vk::Format::R8G8B8A8_SRGB;
    let device = ctx.device();

    let mut staging = ctx.allocator().lock().create_buffer(
        pixels.len() as u64,
        vk::BufferUsageFlags::TRANSFER_SRC,
        MemoryLocation::CpuToGpu,
        &format!("{name} upload"),
    )?;
    staging.write_bytes(0, pixels)?;

    let create_info = vk::ImageCreateInfo::default()
        .image_type(vk::ImageType::TYPE_2D)
        .format(format)
        .extent(vk::Extent3D {
            width,
            height,
            depth: 1,
        })
        .mip_levels(1)
        .array_layers(1)
        .samples(vk::SampleCountFlags::TYPE_1)
        .tiling(vk::ImageTiling::OPTIMAL)
        .usage(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
        .sharing_mode(vk::SharingMode::EXCLUSIVE)
        .initial_layout(vk::ImageLayout::UNDEFINED);

    let image = ctx
        .allocator()
        .lock()
        .create_image(&create_info, MemoryLocation::GpuOnly, name)?;
    let image_handle = image.image;
    ctx.push_resource(OwnedResource::Image(image));

    let submitted = ctx.execute_single_time(|device, cmd| {
        let region = vk::BufferImageCopy::default()
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });

        // SAFETY: The command buffer is recording and both resources are live
        unsafe {
            transition_image_layout(
                device,
                cmd,
                image_handle,
                format,
                vk::ImageLayout::UNDEFINED,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            device.cmd_copy_buffer_to_image(
                cmd,
                staging.buffer,
                image_handle,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
            transition_image_layout(
                device,
                cmd,
                image_handle,
                format,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )
        }
    });

    // The single-time submission has completed (or never ran)
    ctx.allocator().lock().free_buffer(&mut staging)?;
    submitted?;

    // SAFETY: The image was created on this device
    let view = unsafe { create_image_view(device, image_handle, format)? };
    ctx.push_resource(OwnedResource::ImageView(view));

    let capabilities = ctx.capabilities();
    let sampler_info = vk::SamplerCreateInfo::default()
        .mag_filter(vk::Filter::LINEAR)
        .min_filter(vk::Filter::LINEAR)
        .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
        .address_mode_u(vk::SamplerAddressMode::REPEAT)
        .address_mode_v(vk::SamplerAddressMode::REPEAT)
        .address_mode_w(vk::SamplerAddressMode::REPEAT)
        .anisotropy_enable(capabilities.supports_sampler_anisotropy)
        .max_anisotropy(capabilities.max_sampler_anisotropy)
        .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
        .compare_op(vk::CompareOp::ALWAYS);
    // SAFETY: The context's device is valid
    let sampler = unsafe {
        device
            .create_sampler(&sampler_info, None)
            .map_err(GpuError::from)?
    };
    ctx.push_resource(OwnedResource::Sampler(sampler));

    Ok(Texture {
        image: image_handle,
        view,
        sampler,
        width,
        height,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba8_size_must_match() {
        assert!(validate_rgba8(2, 2, &[0; 16]).is_ok());
        assert!(validate_rgba8(2, 2, &[0; 15]).is_err());
        assert!(validate_rgba8(0, 4, &[]).is_err());
    }
}
