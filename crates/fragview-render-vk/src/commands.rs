// SPDX-License-Identifier: CEPL-1.0
use ash::prelude::VkResult;
use ash::vk;
use fragview_render::PushConstants;

use crate::pipeline::viewport;

/// What one recorded frame draws into and with.
pub struct DrawTarget {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent2D,
}

pub struct DrawState<'a> {
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub flipped: bool,
    pub push: &'a PushConstants,
}

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

unsafe fn image_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    src: (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout),
    dst: (vk::PipelineStageFlags2, vk::AccessFlags2, vk::ImageLayout),
) {
    let barrier = vk::ImageMemoryBarrier2 {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER_2,
        src_stage_mask: src.0,
        src_access_mask: src.1,
        old_layout: src.2,
        dst_stage_mask: dst.0,
        dst_access_mask: dst.1,
        new_layout: dst.2,
        image,
        subresource_range: COLOR_RANGE,
        ..Default::default()
    };
    let dep = vk::DependencyInfo {
        s_type: vk::StructureType::DEPENDENCY_INFO,
        image_memory_barrier_count: 1,
        p_image_memory_barriers: &barrier,
        ..Default::default()
    };
    device.cmd_pipeline_barrier2(cmd, &dep);
}

/// Records one fullscreen draw. The command buffer's pool must already be
/// reset.
pub unsafe fn record_frame(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    target: &DrawTarget,
    state: &DrawState<'_>,
) -> VkResult<()> {
    let begin = vk::CommandBufferBeginInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
        flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
        ..Default::default()
    };
    device.begin_command_buffer(cmd, &begin)?;

    // Contents are fully overwritten; the old layout does not matter.
    image_barrier(
        device,
        cmd,
        target.image,
        (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::NONE,
            vk::ImageLayout::UNDEFINED,
        ),
        (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ),
    );

    let render_area = vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent: target.extent,
    };
    let color_att = vk::RenderingAttachmentInfo {
        s_type: vk::StructureType::RENDERING_ATTACHMENT_INFO,
        image_view: target.view,
        image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        clear_value: vk::ClearValue {
            color: vk::ClearColorValue {
                float32: [0.0, 0.0, 0.0, 0.0],
            },
        },
        ..Default::default()
    };
    let rendering_info = vk::RenderingInfo {
        s_type: vk::StructureType::RENDERING_INFO,
        render_area,
        layer_count: 1,
        color_attachment_count: 1,
        p_color_attachments: &color_att,
        ..Default::default()
    };
    device.cmd_begin_rendering(cmd, &rendering_info);

    device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, state.pipeline);
    let vp = viewport(target.extent, state.flipped);
    device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
    device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&render_area));
    device.cmd_push_constants(
        cmd,
        state.layout,
        vk::ShaderStageFlags::FRAGMENT,
        0,
        bytemuck::bytes_of(state.push),
    );
    device.cmd_draw(cmd, 6, 1, 0, 0);

    device.cmd_end_rendering(cmd);

    image_barrier(
        device,
        cmd,
        target.image,
        (
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ),
        (
            vk::PipelineStageFlags2::BOTTOM_OF_PIPE,
            vk::AccessFlags2::NONE,
            vk::ImageLayout::PRESENT_SRC_KHR,
        ),
    );

    device.end_command_buffer(cmd)
}
