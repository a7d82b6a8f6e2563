//! Graphics pipeline creation.
//!
//! Pipelines are built once against the swapchain render pass and never
//! mutated. Per-object variation comes from dynamic uniform offsets, so one
//! pipeline serves every object that names it.

use crate::context::DeviceContext;
use crate::deletion::OwnedResource;
use crate::error::{GpuError, Result};
use ash::vk;
use std::io::Cursor;

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Decode SPIR-V bytecode into words.
pub fn load_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    let words = ash::util::read_spv(&mut Cursor::new(bytes))
        .map_err(|e| GpuError::InvalidShader(e.to_string()))?;

    match words.first() {
        Some(&SPIRV_MAGIC) => Ok(words),
        Some(word) => Err(GpuError::InvalidShader(format!(
            "Bad SPIR-V magic number {word:#010x}"
        ))),
        None => Err(GpuError::InvalidShader("Empty shader".to_string())),
    }
}

/// Graphics pipeline configuration.
#[derive(Clone)]
pub struct GraphicsPipelineConfig {
    /// Compiled vertex shader (SPIR-V bytes)
    pub vertex_shader: Vec<u8>,
    /// Compiled fragment shader (SPIR-V bytes)
    pub fragment_shader: Vec<u8>,
    pub topology: vk::PrimitiveTopology,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl Default for GraphicsPipelineConfig {
    fn default() -> Self {
        Self {
            vertex_shader: Vec::new(),
            fragment_shader: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            depth_test: true,
            depth_write: true,
        }
    }
}

/// Graphics pipeline wrapper.
#[derive(Clone, Copy, Debug)]
pub struct GraphicsPipeline {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl GraphicsPipeline {
    /// Create a pipeline for subpass 0 of `render_pass`.
    ///
    /// Vertices are pulled from storage buffers, so there is no vertex input
    /// state. Both objects are registered with the context for teardown.
    pub fn new(
        ctx: &DeviceContext,
        config: &GraphicsPipelineConfig,
        render_pass: vk::RenderPass,
        descriptor_set_layouts: &[vk::DescriptorSetLayout],
    ) -> Result<Self> {
        let device = ctx.device();
        let vertex_code = load_spirv(&config.vertex_shader)?;
        let fragment_code = load_spirv(&config.fragment_shader)?;

        let layout_info =
            vk::PipelineLayoutCreateInfo::default().set_layouts(descriptor_set_layouts);
        // SAFETY: The context's device is valid
        let layout = unsafe {
            device
                .create_pipeline_layout(&layout_info, None)
                .map_err(|e| GpuError::PipelineCreation(e.to_string()))?
        };
        ctx.push_resource(OwnedResource::PipelineLayout(layout));

        // SAFETY: The words were validated as SPIR-V above
        let vert_module = unsafe { create_shader_module(device, &vertex_code, "vertex")? };
        let frag_module = match unsafe { create_shader_module(device, &fragment_code, "fragment") } {
            Ok(module) => module,
            Err(e) => {
                unsafe { device.destroy_shader_module(vert_module, None) };
                return Err(e);
            }
        };

        let shader_stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vert_module)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(frag_module)
                .name(c"main"),
        ];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(config.topology)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(config.polygon_mode)
            .cull_mode(config.cull_mode)
            .front_face(config.front_face)
            .depth_bias_enable(false)
            .line_width(1.0);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .sample_shading_enable(false);

        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(config.depth_test)
            .depth_write_enable(config.depth_write)
            .depth_compare_op(vk::CompareOp::LESS)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false);

        let color_blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA)];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::default()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let pipeline_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0);

        // SAFETY: All referenced state lives until the call returns
        let created = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };

        // Modules are only needed during creation
        unsafe {
            device.destroy_shader_module(vert_module, None);
            device.destroy_shader_module(frag_module, None);
        }

        let pipeline = created
            .map_err(|(_pipelines, e)| GpuError::PipelineCreation(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| GpuError::PipelineCreation("No pipeline returned".to_string()))?;
        ctx.push_resource(OwnedResource::Pipeline(pipeline));

        Ok(Self { pipeline, layout })
    }
}

unsafe fn create_shader_module(device: &ash::Device, code: &[u32], stage: &str) -> Result<vk::ShaderModule> {
    let info = vk::ShaderModuleCreateInfo::default().code(code);
    device
        .create_shader_module(&info, None)
        .map_err(|e| GpuError::InvalidShader(format!("{stage}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words_to_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn spirv_with_magic_is_accepted() {
        let bytes = words_to_bytes(&[SPIRV_MAGIC, 0x0001_0000, 0, 1, 0]);
        assert_eq!(load_spirv(&bytes).unwrap().len(), 5);
    }

    #[test]
    fn spirv_rejects_bad_input() {
        assert!(load_spirv(&[]).is_err());
        assert!(load_spirv(&[0x03, 0x02, 0x23]).is_err());
        assert!(load_spirv(&words_to_bytes(&[0xdead_beef, 0])).is_err());
    }

    #[test]
    fn default_state_matches_renderer() {
        let config = GraphicsPipelineConfig::default();
        assert_eq!(config.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(config.cull_mode, vk::CullModeFlags::NONE);
        assert!(config.depth_test && config.depth_write);
    }
}
