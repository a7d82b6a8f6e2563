//! The one descriptor set every draw binds.
//!
//! | binding | contents                          | stage    |
//! |---------|-----------------------------------|----------|
//! | 0       | global vertex storage buffer      | vertex   |
//! | 1       | global index storage buffer       | vertex   |
//! | 3       | per-object uniforms (dynamic)     | vertex   |
//! | 5       | texture array                     | fragment |
//! | 6       | per-object material (dynamic)     | fragment |

use crate::mesh::MeshRegistry;
use crate::texture::TextureRegistry;
use crate::uniforms::{MaterialUniforms, ObjectUniforms, UniformAllocator, UniformSlot};
use ash::vk;
use lumen_core::constants::MAX_TEXTURES;
use lumen_gpu::descriptors::{allocate_descriptor_set, create_descriptor_pool};
use lumen_gpu::{DescriptorSetLayoutBuilder, DescriptorWrites, DeviceContext, Result};

pub const VERTEX_BUFFER_BINDING: u32 = 0;
pub const INDEX_BUFFER_BINDING: u32 = 1;
pub const OBJECT_UNIFORM_BINDING: u32 = 3;
pub const TEXTURE_ARRAY_BINDING: u32 = 5;
pub const MATERIAL_UNIFORM_BINDING: u32 = 6;

/// Layout of the shared set.
pub fn shared_layout<'a>() -> DescriptorSetLayoutBuilder<'a> {
    DescriptorSetLayoutBuilder::new()
        .storage_buffer(VERTEX_BUFFER_BINDING, vk::ShaderStageFlags::VERTEX)
        .storage_buffer(INDEX_BUFFER_BINDING, vk::ShaderStageFlags::VERTEX)
        .dynamic_uniform_buffer(OBJECT_UNIFORM_BINDING, vk::ShaderStageFlags::VERTEX)
        .sampled_image_array(
            TEXTURE_ARRAY_BINDING,
            MAX_TEXTURES,
            vk::ShaderStageFlags::FRAGMENT,
        )
        .dynamic_uniform_buffer(MATERIAL_UNIFORM_BINDING, vk::ShaderStageFlags::FRAGMENT)
}

/// What the set currently points at. A change means the set must be rewritten.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BoundResources {
    pub vertex_generation: u64,
    pub index_generation: u64,
    pub object_generation: u64,
    pub material_generation: u64,
    pub texture_count: usize,
}

impl BoundResources {
    /// Snapshot the registries' current buffers.
    pub fn of(meshes: &MeshRegistry, uniforms: &UniformAllocator, textures: &TextureRegistry) -> Self {
        Self {
            vertex_generation: meshes.vertex_buffer().generation(),
            index_generation: meshes.index_buffer().generation(),
            object_generation: uniforms.vertex_buffer().generation(),
            material_generation: uniforms.fragment_buffer().generation(),
            texture_count: textures.len(),
        }
    }
}

/// Layout, pool and the single set allocated from it.
pub struct SharedDescriptorSet {
    layout: vk::DescriptorSetLayout,
    set: vk::DescriptorSet,
    bound: Option<BoundResources>,
}

impl SharedDescriptorSet {
    /// Create the layout and allocate the set. Nothing is written yet.
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let builder = shared_layout();
        let layout = builder.build(ctx)?;
        let pool = create_descriptor_pool(ctx, 1, &builder.pool_sizes(1))?;
        // SAFETY: Pool and layout were just created on this device
        let set = unsafe { allocate_descriptor_set(ctx.device(), pool, layout)? };

        Ok(Self {
            layout,
            set,
            bound: None,
        })
    }

    /// The set layout, for pipeline layouts.
    pub const fn layout(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    /// The set handle.
    pub const fn handle(&self) -> vk::DescriptorSet {
        self.set
    }

    /// Whether the set points at anything other than `current`.
    pub fn is_stale(&self, current: &BoundResources) -> bool {
        self.bound.as_ref() != Some(current)
    }

    /// Point every binding at the registries' current buffers and textures.
    ///
    /// The set must not be in use by any pending submission.
    pub fn write(
        &mut self,
        ctx: &DeviceContext,
        meshes: &MeshRegistry,
        uniforms: &UniformAllocator,
        textures: &TextureRegistry,
    ) {
        let writes = DescriptorWrites::new(self.set)
            .buffer(
                VERTEX_BUFFER_BINDING,
                vk::DescriptorType::STORAGE_BUFFER,
                meshes.vertex_buffer().buffer(),
                0,
                vk::WHOLE_SIZE,
            )
            .buffer(
                INDEX_BUFFER_BINDING,
                vk::DescriptorType::STORAGE_BUFFER,
                meshes.index_buffer().buffer(),
                0,
                vk::WHOLE_SIZE,
            )
            .buffer(
                OBJECT_UNIFORM_BINDING,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                uniforms.vertex_buffer().buffer(),
                0,
                ObjectUniforms::SIZE,
            )
            .sampled_images(TEXTURE_ARRAY_BINDING, textures.descriptor_infos())
            .buffer(
                MATERIAL_UNIFORM_BINDING,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                uniforms.fragment_buffer().buffer(),
                0,
                MaterialUniforms::SIZE,
            );

        // SAFETY: Callers wait for the device to go idle before rewriting
        unsafe { writes.apply(ctx.device()) };
        self.bound = Some(BoundResources::of(meshes, uniforms, textures));
        tracing::debug!("Rewrote shared descriptor set");
    }

    /// Bind the set for an object's slot.
    ///
    /// # Safety
    /// The command buffer must be recording and `layout` compatible with the set.
    pub unsafe fn bind(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        slot: UniformSlot,
    ) {
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::GRAPHICS,
            layout,
            0,
            &[self.set],
            &slot.dynamic_offsets(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_needs_two_dynamic_uniforms() {
        let sizes = shared_layout().pool_sizes(1);
        let dynamic = sizes
            .iter()
            .find(|size| size.ty == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .map(|size| size.descriptor_count);
        assert_eq!(dynamic, Some(2));

        let samplers = sizes
            .iter()
            .find(|size| size.ty == vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .map(|size| size.descriptor_count);
        assert_eq!(samplers, Some(MAX_TEXTURES));
    }

    #[test]
    fn dynamic_bindings_are_ordered_vertex_then_fragment() {
        // Dynamic offsets are consumed in binding order
        assert!(OBJECT_UNIFORM_BINDING < MATERIAL_UNIFORM_BINDING);
        let slot = UniformSlot {
            vertex_offset: 512,
            fragment_offset: 64,
        };
        assert_eq!(slot.dynamic_offsets(), [512, 64]);
    }

    #[test]
    fn staleness_tracks_bound_resources() {
        let set = SharedDescriptorSet {
            layout: vk::DescriptorSetLayout::null(),
            set: vk::DescriptorSet::null(),
            bound: Some(BoundResources::default()),
        };
        assert!(!set.is_stale(&BoundResources::default()));
        assert!(set.is_stale(&BoundResources {
            vertex_generation: 1,
            ..BoundResources::default()
        }));
    }
}
