// SPDX-License-Identifier: CEPL-1.0
//! Fullscreen-quad graphics pipelines: a fixed vertex stage, a fallback
//! fragment stage that always builds, and an optional user stage.

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::util::read_spv;
use ash::vk;
use fragview_render::PushConstants;
use std::io::Cursor;
use tracing::{debug, warn};

const QUAD_VERT_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/quad.vert.spv"));
const FALLBACK_FRAG_SPV: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/fallback.frag.spv"));

const ENTRY_POINT: &std::ffi::CStr = c"main";

/// Which of the two pipelines the next draw binds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ActivePipeline {
    #[default]
    Fallback,
    User,
}

impl ActivePipeline {
    /// Fallback is always drawn flipped; the user pipeline follows `flip_y`.
    pub fn is_flipped(self, flip_y: bool) -> bool {
        match self {
            ActivePipeline::Fallback => true,
            ActivePipeline::User => flip_y,
        }
    }
}

pub(crate) fn viewport(extent: vk::Extent2D, flipped: bool) -> vk::Viewport {
    let (w, h) = (extent.width as f32, extent.height as f32);
    if flipped {
        vk::Viewport {
            x: 0.0,
            y: h,
            width: w,
            height: -h,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    } else {
        vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: w,
            height: h,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Cursor in the same space as `uv * resolution`: bottom-left origin when
/// the viewport is flipped, top-left otherwise.
pub(crate) fn shader_mouse(cursor: [f32; 2], height: u32, flipped: bool) -> [f32; 2] {
    if flipped {
        [cursor[0], height as f32 - cursor[1]]
    } else {
        cursor
    }
}

pub(crate) fn embedded_fallback() -> Result<Vec<u32>> {
    read_spv(&mut Cursor::new(FALLBACK_FRAG_SPV)).context("embedded fallback SPIR-V")
}

/// Destroys the module on every exit path out of `build_pipeline`.
struct TransientShaderModule<'a> {
    device: &'a ash::Device,
    module: vk::ShaderModule,
}

impl<'a> TransientShaderModule<'a> {
    unsafe fn new(device: &'a ash::Device, code: &[u32]) -> VkResult<Self> {
        let module = create_shader_module(device, code)?;
        Ok(TransientShaderModule { device, module })
    }
}

impl Drop for TransientShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.module, None) };
    }
}

unsafe fn create_shader_module(device: &ash::Device, code: &[u32]) -> VkResult<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: std::mem::size_of_val(code),
        ..Default::default()
    };
    device.create_shader_module(&ci, None)
}

pub struct PipelineRegistry {
    device: ash::Device,
    layout: vk::PipelineLayout,
    vertex: vk::ShaderModule,
    color_format: vk::Format,
    fallback_spirv: Option<Vec<u32>>,
    fallback: vk::Pipeline,
    user: vk::Pipeline,
    current: ActivePipeline,
}

impl PipelineRegistry {
    /// `fallback_spirv` overrides the embedded fallback if it builds.
    pub unsafe fn new(
        device: &ash::Device,
        color_format: vk::Format,
        max_push_constants_size: u32,
        fallback_spirv: Option<Vec<u32>>,
    ) -> Result<Self> {
        let range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            offset: 0,
            size: max_push_constants_size.max(std::mem::size_of::<PushConstants>() as u32),
        };
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            push_constant_range_count: 1,
            p_push_constant_ranges: &range,
            ..Default::default()
        };
        let layout = device
            .create_pipeline_layout(&layout_info, None)
            .context("create_pipeline_layout")?;

        let mut registry = PipelineRegistry {
            device: device.clone(),
            layout,
            vertex: vk::ShaderModule::null(),
            color_format,
            fallback_spirv,
            fallback: vk::Pipeline::null(),
            user: vk::Pipeline::null(),
            current: ActivePipeline::Fallback,
        };

        let init = (|| -> Result<()> {
            let vs_code = read_spv(&mut Cursor::new(QUAD_VERT_SPV)).context("quad vertex SPIR-V")?;
            registry.vertex =
                create_shader_module(&registry.device, &vs_code).context("vertex shader module")?;
            registry.fallback = registry.build_fallback()?;
            Ok(())
        })();
        if let Err(e) = init {
            registry.destroy();
            return Err(e);
        }
        Ok(registry)
    }

    unsafe fn build_fallback(&self) -> Result<vk::Pipeline> {
        if let Some(code) = &self.fallback_spirv {
            match self.build_pipeline(code) {
                Ok(p) => return Ok(p),
                Err(e) => warn!("on-disk fallback shader failed to build ({e}); using embedded"),
            }
        }
        let code = embedded_fallback()?;
        self.build_pipeline(&code)
            .context("embedded fallback pipeline")
    }

    /// Builds a pipeline for `fragment` without touching the registry.
    pub unsafe fn build_pipeline(&self, fragment: &[u32]) -> VkResult<vk::Pipeline> {
        let fs = TransientShaderModule::new(&self.device, fragment)?;

        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: self.vertex,
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs.module,
                p_name: ENTRY_POINT.as_ptr(),
                ..Default::default()
            },
        ];

        // Geometry comes from gl_VertexIndex.
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };
        let rendering = vk::PipelineRenderingCreateInfo {
            s_type: vk::StructureType::PIPELINE_RENDERING_CREATE_INFO,
            color_attachment_count: 1,
            p_color_attachment_formats: &self.color_format,
            ..Default::default()
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            p_next: (&rendering as *const _) as *const _,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: self.layout,
            ..Default::default()
        };

        match self.device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        ) {
            Ok(p) => Ok(p[0]),
            Err((partial, err)) => {
                for p in partial.into_iter().filter(|p| *p != vk::Pipeline::null()) {
                    self.device.destroy_pipeline(p, None);
                }
                Err(err)
            }
        }
    }

    /// Replaces the user pipeline and makes it current. On error the
    /// incoming pipeline is destroyed and the registry is unchanged.
    pub unsafe fn install_user(&mut self, pipeline: vk::Pipeline) -> VkResult<()> {
        if let Err(e) = self.device.device_wait_idle() {
            self.device.destroy_pipeline(pipeline, None);
            return Err(e);
        }
        if self.user != vk::Pipeline::null() {
            self.device.destroy_pipeline(self.user, None);
        }
        self.user = pipeline;
        self.current = ActivePipeline::User;
        Ok(())
    }

    /// Selecting `User` before one was installed keeps the fallback.
    pub fn set_current(&mut self, active: ActivePipeline) {
        self.current = match active {
            ActivePipeline::User if self.user == vk::Pipeline::null() => ActivePipeline::Fallback,
            other => other,
        };
    }

    pub fn current(&self) -> ActivePipeline {
        self.current
    }

    pub fn current_pipeline(&self) -> vk::Pipeline {
        match self.current {
            ActivePipeline::Fallback => self.fallback,
            ActivePipeline::User => self.user,
        }
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    pub fn color_format(&self) -> vk::Format {
        self.color_format
    }

    /// Pipelines are tied to the attachment format. After a format change
    /// the fallback is rebuilt and the user pipeline dropped; the caller
    /// must force a user rebuild.
    pub unsafe fn rebuild_for_format(&mut self, color_format: vk::Format) -> Result<()> {
        if color_format == self.color_format {
            return Ok(());
        }
        debug!("color format {:?} -> {:?}", self.color_format, color_format);
        self.device.device_wait_idle()?;
        self.destroy_pipelines();
        self.color_format = color_format;
        self.fallback = self.build_fallback()?;
        Ok(())
    }

    unsafe fn destroy_pipelines(&mut self) {
        for p in [&mut self.user, &mut self.fallback] {
            if *p != vk::Pipeline::null() {
                self.device.destroy_pipeline(*p, None);
                *p = vk::Pipeline::null();
            }
        }
        self.current = ActivePipeline::Fallback;
    }

    /// Waits for idle, then pipelines, vertex module, layout.
    pub unsafe fn destroy(&mut self) {
        let _ = self.device.device_wait_idle();
        self.destroy_pipelines();
        if self.vertex != vk::ShaderModule::null() {
            self.device.destroy_shader_module(self.vertex, None);
            self.vertex = vk::ShaderModule::null();
        }
        if self.layout != vk::PipelineLayout::null() {
            self.device.destroy_pipeline_layout(self.layout, None);
            self.layout = vk::PipelineLayout::null();
        }
    }
}
