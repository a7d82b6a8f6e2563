//! Descriptor set layouts, pools and writes.

use crate::context::DeviceContext;
use crate::deletion::OwnedResource;
use crate::error::Result;
use ash::vk;

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
    flags: Vec<vk::DescriptorBindingFlags>,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub const fn new() -> Self {
        Self {
            bindings: Vec::new(),
            flags: Vec::new(),
        }
    }

    /// Add a binding.
    #[must_use]
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self.flags.push(vk::DescriptorBindingFlags::empty());
        self
    }

    /// Add a storage buffer binding.
    #[must_use]
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    /// Add a uniform buffer binding selected by a dynamic offset at bind time.
    #[must_use]
    pub fn dynamic_uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            1,
            stage_flags,
        )
    }

    /// Add an array of `count` combined image samplers. Elements may be left unwritten.
    #[must_use]
    pub fn sampled_image_array(mut self, binding: u32, count: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self = self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            count,
            stage_flags,
        );
        if let Some(flags) = self.flags.last_mut() {
            *flags = vk::DescriptorBindingFlags::PARTIALLY_BOUND;
        }
        self
    }

    /// Pool sizes covering `sets` allocations of this layout.
    pub fn pool_sizes(&self, sets: u32) -> Vec<vk::DescriptorPoolSize> {
        let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
        for binding in &self.bindings {
            let count = binding.descriptor_count * sets;
            match sizes.iter_mut().find(|size| size.ty == binding.descriptor_type) {
                Some(size) => size.descriptor_count += count,
                None => sizes.push(vk::DescriptorPoolSize {
                    ty: binding.descriptor_type,
                    descriptor_count: count,
                }),
            }
        }
        sizes
    }

    /// Build the descriptor set layout and register it for teardown.
    pub fn build(&self, ctx: &DeviceContext) -> Result<vk::DescriptorSetLayout> {
        let mut binding_flags =
            vk::DescriptorSetLayoutBindingFlagsCreateInfo::default().binding_flags(&self.flags);
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default()
            .bindings(&self.bindings)
            .push_next(&mut binding_flags);

        // SAFETY: The context's device is valid
        let layout = unsafe { ctx.device().create_descriptor_set_layout(&layout_info, None)? };
        ctx.push_resource(OwnedResource::DescriptorSetLayout(layout));
        Ok(layout)
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a descriptor pool and register it for teardown.
pub fn create_descriptor_pool(
    ctx: &DeviceContext,
    max_sets: u32,
    pool_sizes: &[vk::DescriptorPoolSize],
) -> Result<vk::DescriptorPool> {
    let create_info = vk::DescriptorPoolCreateInfo::default()
        .max_sets(max_sets)
        .pool_sizes(pool_sizes);

    // SAFETY: The context's device is valid
    let pool = unsafe { ctx.device().create_descriptor_pool(&create_info, None)? };
    ctx.push_resource(OwnedResource::DescriptorPool(pool));
    Ok(pool)
}

/// Allocate one descriptor set of `layout` from `pool`.
///
/// # Safety
/// The pool and layout must belong to the device.
pub unsafe fn allocate_descriptor_set(
    device: &ash::Device,
    pool: vk::DescriptorPool,
    layout: vk::DescriptorSetLayout,
) -> Result<vk::DescriptorSet> {
    let layouts = [layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::default()
        .descriptor_pool(pool)
        .set_layouts(&layouts);

    let sets = device.allocate_descriptor_sets(&alloc_info)?;
    Ok(sets[0])
}

/// Writes to one descriptor set, applied together by [`DescriptorWrites::apply`].
pub struct DescriptorWrites {
    set: vk::DescriptorSet,
    buffers: Vec<(u32, vk::DescriptorType, vk::DescriptorBufferInfo)>,
    images: Vec<(u32, Vec<vk::DescriptorImageInfo>)>,
}

impl DescriptorWrites {
    /// Start a batch of writes to `set`.
    pub const fn new(set: vk::DescriptorSet) -> Self {
        Self {
            set,
            buffers: Vec::new(),
            images: Vec::new(),
        }
    }

    /// Point a buffer binding at `range` bytes of `buffer` from `offset`.
    #[must_use]
    pub fn buffer(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        buffer: vk::Buffer,
        offset: u64,
        range: u64,
    ) -> Self {
        let info = vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(offset)
            .range(range);
        self.buffers.push((binding, descriptor_type, info));
        self
    }

    /// Fill a combined image sampler array binding from element 0.
    #[must_use]
    pub fn sampled_images(mut self, binding: u32, images: Vec<vk::DescriptorImageInfo>) -> Self {
        self.images.push((binding, images));
        self
    }

    /// Number of bindings this batch touches.
    pub fn len(&self) -> usize {
        self.buffers.len() + self.images.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Submit every write in one `vkUpdateDescriptorSets` call.
    ///
    /// # Safety
    /// The set must not be in use by pending command buffers, and every
    /// referenced buffer and view must be valid.
    pub unsafe fn apply(&self, device: &ash::Device) {
        let mut writes = Vec::with_capacity(self.len());

        for (binding, descriptor_type, info) in &self.buffers {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(*binding)
                    .descriptor_type(*descriptor_type)
                    .buffer_info(std::slice::from_ref(info)),
            );
        }

        for (binding, infos) in &self.images {
            if infos.is_empty() {
                continue;
            }
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(self.set)
                    .dst_binding(*binding)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(infos),
            );
        }

        device.update_descriptor_sets(&writes, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_merge_descriptor_types() {
        let builder = DescriptorSetLayoutBuilder::new()
            .storage_buffer(0, vk::ShaderStageFlags::VERTEX)
            .storage_buffer(1, vk::ShaderStageFlags::VERTEX)
            .dynamic_uniform_buffer(3, vk::ShaderStageFlags::VERTEX)
            .sampled_image_array(5, 16, vk::ShaderStageFlags::FRAGMENT)
            .dynamic_uniform_buffer(6, vk::ShaderStageFlags::FRAGMENT);

        let sizes = builder.pool_sizes(1);
        let count = |ty| {
            sizes
                .iter()
                .find(|size| size.ty == ty)
                .map(|size| size.descriptor_count)
        };

        assert_eq!(sizes.len(), 3);
        assert_eq!(count(vk::DescriptorType::STORAGE_BUFFER), Some(2));
        assert_eq!(count(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC), Some(2));
        assert_eq!(count(vk::DescriptorType::COMBINED_IMAGE_SAMPLER), Some(16));
    }

    #[test]
    fn only_image_arrays_are_partially_bound() {
        let builder = DescriptorSetLayoutBuilder::new()
            .storage_buffer(0, vk::ShaderStageFlags::VERTEX)
            .sampled_image_array(5, 4, vk::ShaderStageFlags::FRAGMENT);

        assert_eq!(builder.flags[0], vk::DescriptorBindingFlags::empty());
        assert_eq!(builder.flags[1], vk::DescriptorBindingFlags::PARTIALLY_BOUND);
    }

    #[test]
    fn writes_count_each_binding_once() {
        let writes = DescriptorWrites::new(vk::DescriptorSet::null())
            .buffer(
                0,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::Buffer::null(),
                0,
                vk::WHOLE_SIZE,
            )
            .sampled_images(5, vec![vk::DescriptorImageInfo::default(); 3]);
        assert_eq!(writes.len(), 2);
        assert!(DescriptorWrites::new(vk::DescriptorSet::null()).is_empty());
    }
}
