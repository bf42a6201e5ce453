// SPDX-License-Identifier: CEPL-1.0
//! Vulkan backend: swapchain, fullscreen-quad pipelines and shader hot reload.

pub mod commands;
pub mod compiler;
pub mod context;
pub mod pipeline;
pub mod reload;
pub mod scheduler;
pub mod swapchain;

use anyhow::{Context, Result};
use ash::vk;
use fragview_core::FrameClock;
use fragview_render::{
    FrameInput, FrameStatus, PresentMode, PushConstants, ReloadOutcome, RenderSettings,
    RenderSize, Renderer,
};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{info, warn};

use crate::commands::{record_frame, DrawState, DrawTarget};
use crate::compiler::{load_spirv, scratch_output_path, ExternalCompiler};
use crate::context::GpuContext;
use crate::pipeline::{shader_mouse, ActivePipeline, PipelineRegistry};
use crate::reload::{HotReloader, PipelineSlots, ShaderSource};
use crate::scheduler::{FrameScheduler, PresentTarget};
use crate::swapchain::{SurfaceConfig, Swapchain, SwapchainError, SwapchainStatus};

fn vk_present_mode(mode: PresentMode) -> vk::PresentModeKHR {
    match mode {
        PresentMode::Fifo => vk::PresentModeKHR::FIFO,
        PresentMode::FifoRelaxed => vk::PresentModeKHR::FIFO_RELAXED,
        PresentMode::Mailbox => vk::PresentModeKHR::MAILBOX,
        PresentMode::Immediate => vk::PresentModeKHR::IMMEDIATE,
    }
}

impl PipelineSlots for PipelineRegistry {
    type Handle = vk::Pipeline;

    fn build(&mut self, spirv: &[u32]) -> Result<vk::Pipeline> {
        unsafe { self.build_pipeline(spirv) }.context("create_graphics_pipelines")
    }

    fn install_user(&mut self, handle: vk::Pipeline) -> Result<()> {
        unsafe { PipelineRegistry::install_user(self, handle) }.context("device_wait_idle")
    }

    fn set_current(&mut self, active: ActivePipeline) {
        PipelineRegistry::set_current(self, active);
    }
}

pub struct VkRenderer {
    ctx: GpuContext,
    swapchain: Swapchain,
    pipelines: PipelineRegistry,
    reloader: HotReloader<ExternalCompiler>,
    scheduler: FrameScheduler,
    flip_y: bool,
}

/// The GPU side of one frame, borrowed out of a [`VkRenderer`].
struct VkFrameTarget<'a> {
    device: &'a ash::Device,
    queue: vk::Queue,
    swapchain: &'a mut Swapchain,
    pipelines: &'a mut PipelineRegistry,
    reloader: &'a mut HotReloader<ExternalCompiler>,
    flip_y: bool,
}

unsafe fn build_renderer(
    window: &dyn HasWindowHandle,
    display: &dyn HasDisplayHandle,
    size: RenderSize,
    settings: RenderSettings,
) -> Result<VkRenderer> {
    let mut ctx = GpuContext::new(window, display, settings.validation)?;

    let config = SurfaceConfig {
        present_mode: vk_present_mode(settings.present_mode),
        extent: vk::Extent2D {
            width: size.width,
            height: size.height,
        },
        frames_in_flight: settings.frames_in_flight.max(1),
        additional_images: settings.additional_images,
        transparent: settings.transparent,
        ..Default::default()
    };
    let mut swapchain = match Swapchain::create(&ctx, config) {
        Ok(sc) => sc,
        Err(e) => {
            ctx.destroy();
            return Err(e).context("create swapchain");
        }
    };

    let fallback = settings
        .fallback_shader
        .as_deref()
        .and_then(|path| match load_spirv(path) {
            Ok(code) => Some(code),
            Err(e) => {
                warn!("fallback shader {}: {e}; using embedded", path.display());
                None
            }
        });
    let pipelines = match PipelineRegistry::new(
        &ctx.device,
        swapchain.color_format(),
        ctx.max_push_constants_size,
        fallback,
    ) {
        Ok(p) => p,
        Err(e) => {
            let _ = ctx.device.device_wait_idle();
            swapchain.destroy();
            ctx.destroy();
            return Err(e);
        }
    };

    let source = ShaderSource::new(&settings.shader_path);
    if source.file_version == reload::MISSING {
        warn!("{} not found; showing fallback", settings.shader_path.display());
    }
    let reloader = HotReloader::new(source, ExternalCompiler::default(), scratch_output_path())
        .with_compile_options(settings.compile_options.clone())
        .with_update_on_save(settings.update_on_save);

    info!(
        "renderer ready: {}x{} {:?} {:?}, {} images, {} frames in flight",
        swapchain.extent().width,
        swapchain.extent().height,
        swapchain.color_format(),
        swapchain.present_mode(),
        swapchain.image_count(),
        swapchain.frames_in_flight(),
    );

    Ok(VkRenderer {
        ctx,
        swapchain,
        pipelines,
        reloader,
        scheduler: FrameScheduler::new(size),
        flip_y: settings.flip_y,
    })
}

impl PresentTarget for VkFrameTarget<'_> {
    fn recreate(&mut self, width: u32, height: u32) -> Result<(), SwapchainError> {
        unsafe { self.swapchain.recreate(width, height) }
    }

    fn color_format(&self) -> vk::Format {
        self.swapchain.color_format()
    }

    /// The user pipeline is dropped with the old format; force a rebuild.
    fn format_changed(&mut self, format: vk::Format) -> Result<()> {
        unsafe { self.pipelines.rebuild_for_format(format)? };
        self.reloader.invalidate_pipeline();
        Ok(())
    }

    fn acquire(&mut self) -> Result<SwapchainStatus> {
        let sc = &mut *self.swapchain;
        unsafe {
            sc.wait_current_fence().context("wait for frame fence")?;
            sc.reset_current_pool().context("reset command pool")?;
            let status = sc.acquire_next_image().context("acquire_next_image")?;
            if status != SwapchainStatus::OutOfDate {
                sc.reset_current_fence().context("reset frame fence")?;
            }
            Ok(status)
        }
    }

    fn draw(&mut self, input: &FrameInput, clock: &FrameClock) -> Result<SwapchainStatus> {
        let sc = &mut *self.swapchain;
        let extent = sc.extent();
        let flipped = self.pipelines.current().is_flipped(self.flip_y);
        let push = PushConstants::new(
            RenderSize {
                width: extent.width,
                height: extent.height,
            },
            shader_mouse(input.cursor, extent.height, flipped),
            clock,
        );
        let target = DrawTarget {
            image: sc.current_image(),
            view: sc.current_view(),
            extent,
        };
        let state = DrawState {
            pipeline: self.pipelines.current_pipeline(),
            layout: self.pipelines.layout(),
            flipped,
            push: &push,
        };
        unsafe {
            record_frame(self.device, sc.current_command_buffer(), &target, &state)
                .context("record frame")?;
            sc.submit_and_present(self.queue, self.queue)
                .context("submit/present")
        }
    }
}

impl VkRenderer {
    fn split(&mut self) -> (&mut FrameScheduler, VkFrameTarget<'_>) {
        let target = VkFrameTarget {
            device: &self.ctx.device,
            queue: self.ctx.queue,
            swapchain: &mut self.swapchain,
            pipelines: &mut self.pipelines,
            reloader: &mut self.reloader,
            flip_y: self.flip_y,
        };
        (&mut self.scheduler, target)
    }
}

impl Renderer for VkRenderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: RenderSettings,
    ) -> Result<Self> {
        unsafe { build_renderer(window, display, size, settings) }
    }

    fn resize(&mut self, size: RenderSize) -> Result<()> {
        let (scheduler, mut target) = self.split();
        scheduler.resize(&mut target, size)
    }

    fn update_shader(&mut self) -> Result<ReloadOutcome> {
        self.reloader.update(&mut self.pipelines)
    }

    fn request_reload(&mut self) {
        self.reloader.request_reload();
    }

    fn render(&mut self, input: &FrameInput, clock: &mut FrameClock) -> Result<FrameStatus> {
        let (scheduler, mut target) = self.split();
        scheduler.render(&mut target, input, clock)
    }

    fn set_flip_y(&mut self, on: bool) {
        self.flip_y = on;
    }

    fn last_shader_error(&self) -> Option<&str> {
        self.reloader.last_error()
    }
}

// Teardown: idle, pipelines, swapchain (slots, views, handle), then
// device, surface, instance.
impl Drop for VkRenderer {
    fn drop(&mut self) {
        unsafe {
            let _ = self.ctx.device.device_wait_idle();
            self.pipelines.destroy();
            self.swapchain.destroy();
            self.ctx.destroy();
        }
    }
}
