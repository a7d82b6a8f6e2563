//! Mesh registry.
//!
//! Every mesh lives in one global vertex buffer and one global index buffer.
//! A mesh is identified by where its data starts in each, measured in
//! elements, and those offsets never change once assigned.

use crate::error::Result;
use ash::vk;
use hashbrown::HashMap;
use lumen_core::constants::{GLOBAL_INDEX_BUFFER_SIZE, GLOBAL_VERTEX_BUFFER_SIZE};
use lumen_core::{Error, GpuVertex, Vertex};
use lumen_gpu::{BufferStorage, DeviceContext, DeviceStorage, DynamicBuffer, GpuError};

/// Location of a mesh inside the global buffers, in elements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MeshOffset {
    pub vertex_offset: u32,
    pub index_offset: u32,
    pub vertex_count: u32,
    pub index_count: u32,
}

/// Append-only name to offset table.
///
/// Offsets are the running sum of the counts registered before, so meshes
/// never overlap and later meshes always start further in.
#[derive(Debug, Default)]
pub struct MeshTable {
    offsets: HashMap<String, MeshOffset>,
    next_vertex: u32,
    next_index: u32,
}

impl MeshTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Offsets the next mesh of the given size would receive.
    pub fn peek(&self, vertex_count: u32, index_count: u32) -> MeshOffset {
        MeshOffset {
            vertex_offset: self.next_vertex,
            index_offset: self.next_index,
            vertex_count,
            index_count,
        }
    }

    /// Record a mesh. Fails if the name is taken or the totals overflow.
    pub fn insert(&mut self, name: &str, vertex_count: u32, index_count: u32) -> lumen_core::Result<MeshOffset> {
        if self.offsets.contains_key(name) {
            return Err(Error::AlreadyExists(format!("mesh '{name}'")));
        }

        let offset = self.peek(vertex_count, index_count);
        let next_vertex = self.next_vertex.checked_add(vertex_count);
        let next_index = self.next_index.checked_add(index_count);
        let (Some(next_vertex), Some(next_index)) = (next_vertex, next_index) else {
            return Err(Error::OutOfBounds(format!("mesh '{name}' overflows the global buffers")));
        };

        self.next_vertex = next_vertex;
        self.next_index = next_index;
        self.offsets.insert(name.to_string(), offset);
        Ok(offset)
    }

    /// Whether a mesh is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.offsets.contains_key(name)
    }

    /// Offsets of a registered mesh.
    pub fn get(&self, name: &str) -> lumen_core::Result<MeshOffset> {
        self.offsets
            .get(name)
            .copied()
            .ok_or_else(|| Error::NotFound(format!("mesh '{name}'")))
    }

    /// Number of registered meshes.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Whether no meshes are registered.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Total vertices registered.
    pub const fn vertex_count(&self) -> u32 {
        self.next_vertex
    }

    /// Total indices registered.
    pub const fn index_count(&self) -> u32 {
        self.next_index
    }
}

/// Mesh table plus the global vertex and index buffers it indexes into.
pub struct MeshRegistry<S: BufferStorage = DeviceStorage> {
    table: MeshTable,
    vertices: DynamicBuffer<S>,
    indices: DynamicBuffer<S>,
}

impl MeshRegistry<DeviceStorage> {
    /// Allocate the global buffers.
    pub fn new(ctx: &DeviceContext) -> Result<Self> {
        let usage = vk::BufferUsageFlags::STORAGE_BUFFER;
        Ok(Self::from_buffers(
            DynamicBuffer::new(ctx, GLOBAL_VERTEX_BUFFER_SIZE, usage, "global vertices")?,
            DynamicBuffer::new(ctx, GLOBAL_INDEX_BUFFER_SIZE, usage, "global indices")?,
        ))
    }
}

impl<S: BufferStorage> MeshRegistry<S> {
    /// Registry over existing, empty buffers.
    pub fn from_buffers(vertices: DynamicBuffer<S>, indices: DynamicBuffer<S>) -> Self {
        Self {
            table: MeshTable::new(),
            vertices,
            indices,
        }
    }

    /// Append a mesh to the global buffers and record its offsets.
    ///
    /// On failure neither buffer keeps any of the mesh, so later meshes still
    /// line up with the table.
    pub fn register(
        &mut self,
        ctx: &S::Context,
        name: &str,
        vertices: &[Vertex],
        indices: &[u32],
    ) -> Result<MeshOffset> {
        if self.table.contains(name) {
            return Err(Error::AlreadyExists(format!("mesh '{name}'")).into());
        }

        let vertex_count = u32::try_from(vertices.len())
            .map_err(|_| Error::InvalidData(format!("mesh '{name}' has too many vertices")))?;
        let index_count = u32::try_from(indices.len())
            .map_err(|_| Error::InvalidData(format!("mesh '{name}' has too many indices")))?;
        if let Some(&bad) = indices.iter().find(|&&index| index >= vertex_count) {
            return Err(Error::InvalidData(format!(
                "mesh '{name}' index {bad} exceeds vertex count {vertex_count}"
            ))
            .into());
        }

        let vertex_mark = self.vertices.used_size();
        let index_mark = self.indices.used_size();
        let result = self.append(ctx, name, vertices, indices, vertex_count, index_count);
        if result.is_err() {
            self.vertices.truncate(vertex_mark);
            self.indices.truncate(index_mark);
        }
        let offset = result?;

        tracing::debug!(
            "Registered mesh '{}': {} vertices at {}, {} indices at {}",
            name,
            vertex_count,
            offset.vertex_offset,
            index_count,
            offset.index_offset
        );
        Ok(offset)
    }

    fn append(
        &mut self,
        ctx: &S::Context,
        name: &str,
        vertices: &[Vertex],
        indices: &[u32],
        vertex_count: u32,
        index_count: u32,
    ) -> Result<MeshOffset> {
        let expected = self.table.peek(vertex_count, index_count);
        let gpu_vertices: Vec<GpuVertex> = vertices.iter().map(GpuVertex::from).collect();

        let vertex_byte_offset = self
            .vertices
            .append_data(ctx, bytemuck::cast_slice(&gpu_vertices))?;
        let index_byte_offset = self.indices.append_data(ctx, bytemuck::cast_slice(indices))?;

        let vertex_stride = GpuVertex::SIZE as u64;
        let index_stride = std::mem::size_of::<u32>() as u64;
        if vertex_byte_offset != u64::from(expected.vertex_offset) * vertex_stride
            || index_byte_offset != u64::from(expected.index_offset) * index_stride
        {
            return Err(GpuError::InvalidState(format!(
                "mesh '{name}' landed at bytes {vertex_byte_offset}/{index_byte_offset}, out of step with the table"
            ))
            .into());
        }

        Ok(self.table.insert(name, vertex_count, index_count)?)
    }

    /// Offsets of a registered mesh.
    pub fn get(&self, name: &str) -> Result<MeshOffset> {
        Ok(self.table.get(name)?)
    }

    /// The name to offset table.
    pub const fn table(&self) -> &MeshTable {
        &self.table
    }

    /// Global vertex buffer.
    pub const fn vertex_buffer(&self) -> &DynamicBuffer<S> {
        &self.vertices
    }

    /// Global index buffer.
    pub const fn index_buffer(&self) -> &DynamicBuffer<S> {
        &self.indices
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};

    /// Host-memory storage that can be told to refuse growth.
    struct HostStorage {
        bytes: Vec<u8>,
        can_grow: bool,
    }

    impl BufferStorage for HostStorage {
        type Context = ();

        fn stage(&mut self, _ctx: &(), offset: u64, data: &[u8]) -> lumen_gpu::Result<()> {
            let start = offset as usize;
            self.bytes[start..start + data.len()].copy_from_slice(data);
            Ok(())
        }

        fn grow(&mut self, _ctx: &(), new_capacity: u64, live_bytes: u64) -> lumen_gpu::Result<()> {
            if !self.can_grow {
                return Err(GpuError::AllocationFailed("host buffer is full".into()));
            }
            let mut bytes = vec![0; new_capacity as usize];
            bytes[..live_bytes as usize].copy_from_slice(&self.bytes[..live_bytes as usize]);
            self.bytes = bytes;
            Ok(())
        }
    }

    fn host_buffer(capacity: u64, can_grow: bool) -> DynamicBuffer<HostStorage> {
        DynamicBuffer::with_storage(
            HostStorage {
                bytes: vec![0; capacity as usize],
                can_grow,
            },
            capacity,
        )
    }

    fn quad() -> (Vec<Vertex>, Vec<u32>) {
        let vertex = |x: f32, y: f32| Vertex {
            position: Vec3::new(x, y, 0.0),
            texcoord: Vec2::new(x, y),
            normal: Vec3::Z,
            tangent: Vec3::X,
            bitangent: Vec3::Y,
        };
        let vertices = vec![vertex(0.0, 0.0), vertex(1.0, 0.0), vertex(1.0, 1.0), vertex(0.0, 1.0)];
        (vertices, vec![0, 1, 2, 2, 3, 0])
    }

    #[test]
    fn registry_places_meshes_back_to_back() {
        let mut registry =
            MeshRegistry::from_buffers(host_buffer(4 * GpuVertex::SIZE as u64, true), host_buffer(24, true));
        let (vertices, indices) = quad();

        let first = registry.register(&(), "first", &vertices, &indices).unwrap();
        let second = registry.register(&(), "second", &vertices, &indices).unwrap();

        assert_eq!(first.vertex_offset, 0);
        assert_eq!(second.vertex_offset, 4);
        assert_eq!(second.index_offset, 6);
        assert_eq!(registry.vertex_buffer().used_size(), 8 * GpuVertex::SIZE as u64);
        assert_eq!(registry.index_buffer().used_size(), 48);
    }

    #[test]
    fn failed_index_upload_leaves_buffers_in_step() {
        // Room for one quad's indices, and no growth
        let mut registry = MeshRegistry::from_buffers(host_buffer(1024, true), host_buffer(24, false));
        let (vertices, indices) = quad();
        let doubled: Vec<u32> = indices.iter().chain(&indices).copied().collect();

        assert!(registry.register(&(), "too big", &vertices, &doubled).is_err());
        assert_eq!(registry.vertex_buffer().used_size(), 0);
        assert_eq!(registry.index_buffer().used_size(), 0);
        assert!(registry.get("too big").is_err());

        let offset = registry.register(&(), "quad", &vertices, &indices).unwrap();
        assert_eq!(offset.vertex_offset, 0);
        assert_eq!(offset.index_offset, 0);
    }

    #[test]
    fn out_of_range_index_is_rejected_before_upload() {
        let mut registry = MeshRegistry::from_buffers(host_buffer(1024, true), host_buffer(64, true));
        let (vertices, _) = quad();

        assert!(registry.register(&(), "bad", &vertices, &[0, 1, 4]).is_err());
        assert_eq!(registry.vertex_buffer().used_size(), 0);
    }

    #[test]
    fn offsets_are_running_sums() {
        let mut table = MeshTable::new();
        let duck = table.insert("duck", 4, 6).unwrap();
        let helmet = table.insert("helmet", 10, 18).unwrap();

        assert_eq!(
            duck,
            MeshOffset {
                vertex_offset: 0,
                index_offset: 0,
                vertex_count: 4,
                index_count: 6
            }
        );
        assert_eq!(
            helmet,
            MeshOffset {
                vertex_offset: 4,
                index_offset: 6,
                vertex_count: 10,
                index_count: 18
            }
        );
        assert_eq!(table.vertex_count(), 14);
        assert_eq!(table.index_count(), 24);
    }

    #[test]
    fn meshes_never_overlap() {
        let mut table = MeshTable::new();
        let sizes = [(3, 3), (0, 0), (8, 12), (1, 3), (24, 36)];
        let offsets: Vec<MeshOffset> = sizes
            .iter()
            .enumerate()
            .map(|(i, &(v, idx))| table.insert(&format!("mesh{i}"), v, idx).unwrap())
            .collect();

        for pair in offsets.windows(2) {
            assert_eq!(pair[1].vertex_offset, pair[0].vertex_offset + pair[0].vertex_count);
            assert_eq!(pair[1].index_offset, pair[0].index_offset + pair[0].index_count);
        }
    }

    #[test]
    fn duplicate_name_is_rejected_without_advancing() {
        let mut table = MeshTable::new();
        table.insert("duck", 4, 6).unwrap();

        assert!(matches!(
            table.insert("duck", 1, 1),
            Err(Error::AlreadyExists(_))
        ));
        assert_eq!(table.len(), 1);
        assert_eq!(table.peek(1, 1).vertex_offset, 4);
    }

    #[test]
    fn unknown_mesh_is_not_found() {
        let table = MeshTable::new();
        assert!(matches!(table.get("missing"), Err(Error::NotFound(_))));
    }

    #[test]
    fn overflowing_totals_fail() {
        let mut table = MeshTable::new();
        table.insert("big", u32::MAX, 0).unwrap();
        assert!(matches!(
            table.insert("more", 1, 0),
            Err(Error::OutOfBounds(_))
        ));
    }
}
