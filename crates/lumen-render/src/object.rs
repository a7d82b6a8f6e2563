//! Renderable objects.

use crate::descriptor_set::SharedDescriptorSet;
use crate::material::MaterialId;
use crate::mesh::MeshOffset;
use crate::pipelines::PipelineId;
use crate::uniforms::{ObjectUniforms, UniformSlot};
use ash::vk;
use glam::Mat4;
use lumen_core::Transform;
use lumen_gpu::GraphicsPipeline;

/// Handle to an object owned by the renderer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub u32);

/// A mesh drawn with a pipeline and material at a transform.
///
/// The object's vertices and indices live in the global buffers; it only
/// knows where. Its uniform slot is fixed for its whole life.
#[derive(Clone, Debug)]
pub struct RenderObject {
    pub transform: Transform,
    mesh: MeshOffset,
    pipeline: PipelineId,
    material: MaterialId,
    slot: UniformSlot,
}

impl RenderObject {
    pub const fn new(mesh: MeshOffset, pipeline: PipelineId, material: MaterialId, slot: UniformSlot) -> Self {
        Self {
            transform: Transform::IDENTITY,
            mesh,
            pipeline,
            material,
            slot,
        }
    }

    pub const fn mesh(&self) -> MeshOffset {
        self.mesh
    }

    pub const fn pipeline(&self) -> PipelineId {
        self.pipeline
    }

    pub const fn material(&self) -> MaterialId {
        self.material
    }

    pub const fn slot(&self) -> UniformSlot {
        self.slot
    }

    /// Vertex-stage uniforms for the current transform and camera.
    pub fn uniforms(&self, view: Mat4, projection: Mat4) -> ObjectUniforms {
        ObjectUniforms::new(self.transform.matrix(), view, projection, &self.mesh)
    }

    /// Record the draw: pipeline, shared set at this object's slot, then the
    /// object's index range.
    ///
    /// # Safety
    /// The command buffer must be recording inside the render pass the pipeline was built for.
    pub unsafe fn draw(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        pipeline: &GraphicsPipeline,
        descriptor_set: &SharedDescriptorSet,
    ) {
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline.pipeline);
        descriptor_set.bind(device, cmd, pipeline.layout, self.slot);
        // Vertices are pulled from the index buffer starting at index_offset
        device.cmd_draw(cmd, self.mesh.index_count, 1, self.mesh.index_offset, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec3;

    fn object() -> RenderObject {
        RenderObject::new(
            MeshOffset {
                vertex_offset: 4,
                index_offset: 6,
                vertex_count: 10,
                index_count: 18,
            },
            PipelineId(0),
            MaterialId(1),
            UniformSlot {
                vertex_offset: 256,
                fragment_offset: 64,
            },
        )
    }

    #[test]
    fn uniforms_carry_mesh_offsets() {
        let uniforms = object().uniforms(Mat4::IDENTITY, Mat4::IDENTITY);
        assert_eq!(uniforms.index_offset, 6);
        assert_eq!(uniforms.vertex_offset, 4);
    }

    #[test]
    fn uniforms_follow_transform() {
        let mut object = object();
        object.transform = Transform::from_position(Vec3::new(1.0, -2.0, 3.0));
        let view = Mat4::from_translation(Vec3::Z * -5.0);

        let uniforms = object.uniforms(view, Mat4::IDENTITY);
        let model = Mat4::from_cols_array_2d(&uniforms.model);
        assert_relative_eq!(model.w_axis.x, 1.0);
        assert_relative_eq!(model.w_axis.y, -2.0);
        assert_relative_eq!(model.w_axis.z, 3.0);
        assert_eq!(uniforms.view, view.to_cols_array_2d());
    }
}
