//! Per-object uniform data and slot allocation.
//!
//! Every object owns one fixed slot in each of two shared uniform buffers:
//! one read by the vertex stage, one by the fragment stage. Slots are sized
//! to the device's dynamic offset alignment so the shared descriptor set can
//! select any of them with a dynamic offset at draw time.

use crate::mesh::MeshOffset;
use crate::texture::TextureId;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use lumen_core::align_up;
use lumen_core::constants::OBJECT_UNIFORM_BUFFER_SIZE;
use lumen_gpu::{BufferStorage, DeviceContext, DeviceStorage, DynamicBuffer, GpuError, Result};

/// Vertex-stage data for one object.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct ObjectUniforms {
    pub model: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
    pub index_offset: u32,
    pub vertex_offset: u32,
    pub _pad: [u32; 2],
}

impl ObjectUniforms {
    /// Size of the structure in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(model: Mat4, view: Mat4, projection: Mat4, mesh: &MeshOffset) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            view: view.to_cols_array_2d(),
            projection: projection.to_cols_array_2d(),
            index_offset: mesh.index_offset,
            vertex_offset: mesh.vertex_offset,
            _pad: [0; 2],
        }
    }
}

/// Fragment-stage data for one object.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct MaterialUniforms {
    /// Index into the texture array, or -1 for none
    pub albedo_texture: i32,
    pub _pad: [i32; 3],
}

impl MaterialUniforms {
    /// Size of the structure in bytes.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    pub fn new(albedo_texture: Option<TextureId>) -> Self {
        Self {
            albedo_texture: albedo_texture.map_or(-1, |id| id.0 as i32),
            _pad: [0; 3],
        }
    }
}

/// Byte offsets of an object's slots, used as the two dynamic offsets at bind time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UniformSlot {
    pub vertex_offset: u32,
    pub fragment_offset: u32,
}

impl UniformSlot {
    /// Dynamic offsets in binding order (3, then 6).
    pub const fn dynamic_offsets(&self) -> [u32; 2] {
        [self.vertex_offset, self.fragment_offset]
    }
}

/// Hands out slots in the two per-object uniform buffers.
///
/// Offsets only ever move forward; slots are never freed or moved. When a
/// buffer fills up it grows and keeps the existing slots' contents.
pub struct UniformAllocator<S: BufferStorage = DeviceStorage> {
    vertex: DynamicBuffer<S>,
    fragment: DynamicBuffer<S>,
    vertex_stride: u64,
    fragment_stride: u64,
}

impl UniformAllocator<DeviceStorage> {
    /// Allocate both uniform buffers, aligned for this device.
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let usage = vk::BufferUsageFlags::UNIFORM_BUFFER;
        let vertex = DynamicBuffer::new(ctx, OBJECT_UNIFORM_BUFFER_SIZE, usage, "object uniforms")?;
        let fragment =
            DynamicBuffer::new(ctx, OBJECT_UNIFORM_BUFFER_SIZE, usage, "material uniforms")?;

        let alignment = ctx.capabilities().min_uniform_buffer_offset_alignment;
        Ok(Self::from_buffers(vertex, fragment, alignment))
    }
}

impl<S: BufferStorage> UniformAllocator<S> {
    /// Use existing buffers, with slots aligned to `min_alignment`.
    pub fn from_buffers(vertex: DynamicBuffer<S>, fragment: DynamicBuffer<S>, min_alignment: u64) -> Self {
        Self {
            vertex,
            fragment,
            vertex_stride: align_up(ObjectUniforms::SIZE, min_alignment),
            fragment_stride: align_up(MaterialUniforms::SIZE, min_alignment),
        }
    }

    /// Bytes between consecutive vertex-stage slots.
    pub const fn vertex_stride(&self) -> u64 {
        self.vertex_stride
    }

    /// Bytes between consecutive fragment-stage slots.
    pub const fn fragment_stride(&self) -> u64 {
        self.fragment_stride
    }

    /// Vertex-stage uniform buffer.
    pub const fn vertex_buffer(&self) -> &DynamicBuffer<S> {
        &self.vertex
    }

    /// Fragment-stage uniform buffer.
    pub const fn fragment_buffer(&self) -> &DynamicBuffer<S> {
        &self.fragment
    }

    /// Claim the next slot in both buffers.
    pub fn allocate(&mut self, ctx: &S::Context) -> Result<UniformSlot> {
        let vertex_offset = dynamic_offset(self.vertex.reserve(ctx, self.vertex_stride)?)?;
        let fragment_offset = dynamic_offset(self.fragment.reserve(ctx, self.fragment_stride)?)?;

        Ok(UniformSlot {
            vertex_offset,
            fragment_offset,
        })
    }

    /// Overwrite a slot's contents.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn write(
        &mut self,
        ctx: &S::Context,
        slot: UniformSlot,
        object: &ObjectUniforms,
        material: &MaterialUniforms,
    ) -> Result<()> {
        self.vertex
            .update_range(ctx, u64::from(slot.vertex_offset), bytemuck::bytes_of(object))?;
        self.fragment
            .update_range(ctx, u64::from(slot.fragment_offset), bytemuck::bytes_of(material))
    }
}

fn dynamic_offset(offset: u64) -> Result<u32> {
    u32::try_from(offset).map_err(|_| GpuError::OutOfBounds {
        offset,
        length: 0,
        capacity: u64::from(u32::MAX),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    /// Host-memory storage; copies land immediately.
    struct HostStorage {
        bytes: Vec<u8>,
    }

    impl BufferStorage for HostStorage {
        type Context = ();

        fn stage(&mut self, _ctx: &(), offset: u64, data: &[u8]) -> Result<()> {
            let start = offset as usize;
            self.bytes[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn grow(&mut self, _ctx: &(), new_capacity: u64, live_bytes: u64) -> Result<()> {
            let mut bytes = vec![0; new_capacity as usize];
            bytes[..live_bytes as usize].copy_from_slice(&self.bytes[..live_bytes as usize]);
            self.bytes = bytes;
            Ok(())
        }
    }

    fn host_buffer(capacity: u64) -> DynamicBuffer<HostStorage> {
        DynamicBuffer::with_storage(
            HostStorage {
                bytes: vec![0; capacity as usize],
            },
            capacity,
        )
    }

    fn allocator(capacity: u64, alignment: u64) -> UniformAllocator<HostStorage> {
        UniformAllocator::from_buffers(host_buffer(capacity), host_buffer(capacity), alignment)
    }

    #[test]
    fn uniform_layouts() {
        assert_eq!(ObjectUniforms::SIZE, 208);
        assert_eq!(MaterialUniforms::SIZE, 16);
    }

    #[test]
    fn strides_follow_device_alignment() {
        let alloc = allocator(1024, 256);
        assert_eq!(alloc.vertex_stride(), 256);
        assert_eq!(alloc.fragment_stride(), 256);

        let alloc = allocator(1024, 64);
        assert_eq!(alloc.vertex_stride(), 256);
        assert_eq!(alloc.fragment_stride(), 64);
    }

    #[test]
    fn slots_advance_and_stay_aligned() {
        let mut alloc = allocator(4096, 64);
        let slots: Vec<UniformSlot> = (0..5).map(|_| alloc.allocate(&()).unwrap()).collect();

        for (i, slot) in slots.iter().enumerate() {
            assert_eq!(u64::from(slot.vertex_offset), i as u64 * 256);
            assert_eq!(u64::from(slot.fragment_offset), i as u64 * 64);
            assert_eq!(slot.vertex_offset % 64, 0);
        }
        assert_eq!(slots[3].dynamic_offsets(), [768, 192]);
    }

    #[test]
    fn growth_keeps_existing_slot_contents() {
        let mut alloc = allocator(512, 256);
        let first = alloc.allocate(&()).unwrap();
        let object = ObjectUniforms::new(
            Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)),
            Mat4::IDENTITY,
            Mat4::IDENTITY,
            &MeshOffset {
                vertex_offset: 4,
                index_offset: 6,
                vertex_count: 10,
                index_count: 18,
            },
        );
        let material = MaterialUniforms::new(Some(TextureId(1)));
        alloc.write(&(), first, &object, &material).unwrap();

        // Third slot no longer fits in 512 bytes
        alloc.allocate(&()).unwrap();
        let third = alloc.allocate(&()).unwrap();
        assert_eq!(third.vertex_offset, 512);
        assert!(alloc.vertex_buffer().capacity() >= 768);
        assert_eq!(alloc.vertex_buffer().generation(), 1);

        let bytes = &alloc.vertex_buffer().storage().bytes;
        let start = first.vertex_offset as usize;
        assert_eq!(
            &bytes[start..start + ObjectUniforms::SIZE as usize],
            bytemuck::bytes_of(&object)
        );
    }

    #[test]
    fn material_texture_index() {
        assert_eq!(MaterialUniforms::new(None).albedo_texture, -1);
        assert_eq!(MaterialUniforms::new(Some(TextureId(5))).albedo_texture, 5);
    }
}
