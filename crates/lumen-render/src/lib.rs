//! Scene-level rendering for the Lumen renderer.
//!
//! This crate provides:
//! - Mesh, texture, material and pipeline registries
//! - The per-object uniform allocator
//! - The shared descriptor set every pipeline binds
//! - Camera and render objects
//! - The frame loop in [`Renderer`]

pub mod camera;
pub mod descriptor_set;
pub mod error;
mod frame_loop;
pub mod material;
pub mod mesh;
pub mod object;
pub mod pipelines;
pub mod renderer;
pub mod texture;
pub mod uniforms;

pub use camera::Camera;
pub use descriptor_set::{BoundResources, SharedDescriptorSet};
pub use error::{RenderError, Result};
pub use frame_loop::Frame;
pub use material::{Material, MaterialId, MaterialRegistry};
pub use mesh::{MeshOffset, MeshRegistry, MeshTable};
pub use object::{ObjectHandle, RenderObject};
pub use pipelines::{PipelineId, PipelineRegistry};
pub use renderer::{Renderer, RendererConfig};
pub use texture::{Texture, TextureId, TextureRegistry};
pub use uniforms::{MaterialUniforms, ObjectUniforms, UniformAllocator, UniformSlot};
