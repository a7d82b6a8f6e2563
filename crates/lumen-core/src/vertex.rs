//! Vertex records.
//!
//! [`Vertex`] is what the asset importer hands over. [`GpuVertex`] is the
//! layout stored in the global vertex storage buffer: every attribute padded
//! to a `vec4` so shaders can pull vertices with std430 indexing.

use bytemuck::{Pod, Zeroable};
use glam::{Vec2, Vec3};

/// Imported vertex attributes.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vertex {
    pub position: Vec3,
    pub texcoord: Vec2,
    pub normal: Vec3,
    pub tangent: Vec3,
    pub bitangent: Vec3,
}

/// Vertex as stored in the global vertex buffer (80 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuVertex {
    pub position: [f32; 4],
    pub texcoord: [f32; 4],
    pub normal: [f32; 4],
    pub tangent: [f32; 4],
    pub bitangent: [f32; 4],
}

impl GpuVertex {
    /// Size of the structure in bytes.
    pub const SIZE: usize = std::mem::size_of::<Self>();
}

impl From<&Vertex> for GpuVertex {
    fn from(v: &Vertex) -> Self {
        Self {
            position: v.position.extend(1.0).to_array(),
            texcoord: [v.texcoord.x, v.texcoord.y, 0.0, 0.0],
            normal: v.normal.extend(0.0).to_array(),
            tangent: v.tangent.extend(0.0).to_array(),
            bitangent: v.bitangent.extend(0.0).to_array(),
        }
    }
}
