// SPDX-License-Identifier: CEPL-1.0
//! Presentation surface: the swapchain, its image views and the
//! per-frame-in-flight slots (command pool, fence, two semaphores).
//!
//! Per-frame order expected from the caller:
//! 1. `wait_current_fence`
//! 2. `reset_current_pool`
//! 3. `acquire_next_image`, bail on `OutOfDate`
//! 4. `reset_current_fence`, then record into `current_command_buffer`
//! 5. `submit_and_present`
//!
//! The fence is reset only after a usable image was acquired. Resetting it
//! earlier and then bailing would leave an unsignalled fence that nothing
//! will ever signal.

use crate::context::GpuContext;
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::vk;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SwapchainError {
    #[error("vulkan: {0}")]
    Vk(#[from] vk::Result),
    #[error("cannot build a swapchain for a {width}x{height} surface")]
    ZeroExtent { width: u32, height: u32 },
    #[error("surface reports no formats")]
    NoSurfaceFormats,
}

/// Folded result of acquire/present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwapchainStatus {
    Optimal,
    /// Usable this frame, rebuild before the next one.
    Suboptimal,
    /// Image index is invalid; nothing may be submitted or presented.
    OutOfDate,
}

impl SwapchainStatus {
    pub fn needs_recreate(self) -> bool {
        !matches!(self, SwapchainStatus::Optimal)
    }
}

/// `Ok(true)` from ash means suboptimal.
pub(crate) fn classify(result: VkResult<bool>) -> Result<SwapchainStatus, SwapchainError> {
    match result {
        Ok(false) => Ok(SwapchainStatus::Optimal),
        Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => Ok(SwapchainStatus::Suboptimal),
        Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapchainStatus::OutOfDate),
        Err(e) => Err(SwapchainError::Vk(e)),
    }
}

/// Requested surface properties; the device may not honour all of them.
#[derive(Clone, Copy, Debug)]
pub struct SurfaceConfig {
    pub format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    pub frames_in_flight: u32,
    pub additional_images: u32,
    pub transparent: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        SurfaceConfig {
            format: vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            frames_in_flight: 2,
            additional_images: 1,
            transparent: false,
        }
    }
}

/// Exact (format, colour space) match, else whatever the driver lists first.
pub(crate) fn choose_surface_format(
    available: &[vk::SurfaceFormatKHR],
    want: vk::SurfaceFormatKHR,
) -> Result<vk::SurfaceFormatKHR, SwapchainError> {
    available
        .iter()
        .copied()
        .find(|f| f.format == want.format && f.color_space == want.color_space)
        .or_else(|| available.first().copied())
        .ok_or(SwapchainError::NoSurfaceFormats)
}

/// FIFO is the only mode every surface must support.
pub(crate) fn choose_present_mode(
    available: &[vk::PresentModeKHR],
    want: vk::PresentModeKHR,
) -> vk::PresentModeKHR {
    if available.contains(&want) {
        want
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// A fixed `current_extent` wins; `u32::MAX` means the window decides and we
/// clamp the request into the reported range.
pub(crate) fn choose_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    want: vk::Extent2D,
) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// `max_image_count == 0` means no upper bound.
pub(crate) fn choose_image_count(
    caps: &vk::SurfaceCapabilitiesKHR,
    frames_in_flight: u32,
    additional_images: u32,
) -> u32 {
    let wanted = frames_in_flight
        .saturating_add(additional_images)
        .max(caps.min_image_count);
    if caps.max_image_count > 0 {
        wanted.min(caps.max_image_count)
    } else {
        wanted
    }
}

pub(crate) fn choose_composite_alpha(
    supported: vk::CompositeAlphaFlagsKHR,
    transparent: bool,
) -> vk::CompositeAlphaFlagsKHR {
    let order: &[vk::CompositeAlphaFlagsKHR] = if transparent {
        &[
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::INHERIT,
            vk::CompositeAlphaFlagsKHR::OPAQUE,
        ]
    } else {
        &[
            vk::CompositeAlphaFlagsKHR::OPAQUE,
            vk::CompositeAlphaFlagsKHR::INHERIT,
            vk::CompositeAlphaFlagsKHR::PRE_MULTIPLIED,
            vk::CompositeAlphaFlagsKHR::POST_MULTIPLIED,
        ]
    };
    order
        .iter()
        .copied()
        .find(|&m| supported.contains(m))
        .unwrap_or(vk::CompositeAlphaFlagsKHR::OPAQUE)
}

fn check_extent(extent: vk::Extent2D) -> Result<(), SwapchainError> {
    if extent.width == 0 || extent.height == 0 {
        Err(SwapchainError::ZeroExtent {
            width: extent.width,
            height: extent.height,
        })
    } else {
        Ok(())
    }
}

pub struct FrameSlot {
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    pub in_flight: vk::Fence,
    pub image_available: vk::Semaphore,
    pub render_finished: vk::Semaphore,
}

unsafe fn create_frame_slot(
    device: &ash::Device,
    queue_family: u32,
) -> Result<FrameSlot, SwapchainError> {
    let pool_info = vk::CommandPoolCreateInfo {
        s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
        queue_family_index: queue_family,
        flags: vk::CommandPoolCreateFlags::TRANSIENT,
        ..Default::default()
    };
    let command_pool = device.create_command_pool(&pool_info, None)?;
    let alloc_info = vk::CommandBufferAllocateInfo {
        s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
        command_pool,
        level: vk::CommandBufferLevel::PRIMARY,
        command_buffer_count: 1,
        ..Default::default()
    };
    let command_buffer = device.allocate_command_buffers(&alloc_info)?[0];

    let sem_ci = vk::SemaphoreCreateInfo::default();
    // Signalled so the first wait on a fresh slot returns immediately.
    let fence_ci = vk::FenceCreateInfo {
        s_type: vk::StructureType::FENCE_CREATE_INFO,
        flags: vk::FenceCreateFlags::SIGNALED,
        ..Default::default()
    };
    Ok(FrameSlot {
        command_pool,
        command_buffer,
        in_flight: device.create_fence(&fence_ci, None)?,
        image_available: device.create_semaphore(&sem_ci, None)?,
        render_finished: device.create_semaphore(&sem_ci, None)?,
    })
}

unsafe fn destroy_frame_slot(device: &ash::Device, slot: &FrameSlot) {
    device.destroy_semaphore(slot.render_finished, None);
    device.destroy_semaphore(slot.image_available, None);
    device.destroy_fence(slot.in_flight, None);
    // Frees the command buffer with it.
    device.destroy_command_pool(slot.command_pool, None);
}

pub struct Swapchain {
    device: ash::Device,
    loader: swapchain::Device,
    surface_loader: surface::Instance,
    phys: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    config: SurfaceConfig,

    handle: vk::SwapchainKHR,
    format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,

    frames: Vec<FrameSlot>,
    frame_index: usize,
    image_index: u32,
}

impl Swapchain {
    pub unsafe fn create(ctx: &GpuContext, config: SurfaceConfig) -> Result<Self, SwapchainError> {
        check_extent(config.extent)?;
        let mut sc = Swapchain {
            device: ctx.device.clone(),
            loader: swapchain::Device::new(&ctx.instance, &ctx.device),
            surface_loader: ctx.surface_loader.clone(),
            phys: ctx.phys,
            surface: ctx.surface,
            config,
            handle: vk::SwapchainKHR::null(),
            format: config.format,
            present_mode: config.present_mode,
            extent: config.extent,
            images: Vec::new(),
            views: Vec::new(),
            frames: Vec::new(),
            frame_index: 0,
            image_index: 0,
        };

        for _ in 0..config.frames_in_flight.max(1) {
            match create_frame_slot(&sc.device, ctx.queue_family) {
                Ok(slot) => sc.frames.push(slot),
                Err(e) => {
                    sc.destroy();
                    return Err(e);
                }
            }
        }
        if let Err(e) = sc.build(vk::SwapchainKHR::null()) {
            sc.destroy();
            return Err(e);
        }
        Ok(sc)
    }

    /// Resolves preferences against the surface and creates the swapchain
    /// plus one view per image. Any previous views must already be gone.
    unsafe fn build(&mut self, old_swapchain: vk::SwapchainKHR) -> Result<(), SwapchainError> {
        let caps = self
            .surface_loader
            .get_physical_device_surface_capabilities(self.phys, self.surface)?;
        let formats = self
            .surface_loader
            .get_physical_device_surface_formats(self.phys, self.surface)?;
        let modes = self
            .surface_loader
            .get_physical_device_surface_present_modes(self.phys, self.surface)?;

        let format = choose_surface_format(&formats, self.config.format)?;
        let present_mode = choose_present_mode(&modes, self.config.present_mode);
        let extent = choose_extent(&caps, self.config.extent);
        check_extent(extent)?;
        let min_image_count = choose_image_count(
            &caps,
            self.config.frames_in_flight,
            self.config.additional_images,
        );
        let composite_alpha =
            choose_composite_alpha(caps.supported_composite_alpha, self.config.transparent);
        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: self.surface,
            min_image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform,
            composite_alpha,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain,
            ..Default::default()
        };
        let handle = self.loader.create_swapchain(&info, None)?;
        let images = match self.loader.get_swapchain_images(handle) {
            Ok(images) => images,
            Err(e) => {
                self.loader.destroy_swapchain(handle, None);
                return Err(e.into());
            }
        };

        let mut views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_ci = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: format.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            match self.device.create_image_view(&view_ci, None) {
                Ok(v) => views.push(v),
                Err(e) => {
                    for v in views {
                        self.device.destroy_image_view(v, None);
                    }
                    self.loader.destroy_swapchain(handle, None);
                    return Err(e.into());
                }
            }
        }

        debug!(
            "swapchain {}x{} {:?}/{:?} {:?} images={} alpha={:?}",
            extent.width,
            extent.height,
            format.format,
            format.color_space,
            present_mode,
            images.len(),
            composite_alpha,
        );

        self.handle = handle;
        self.format = format;
        self.present_mode = present_mode;
        self.extent = extent;
        self.images = images;
        self.views = views;
        Ok(())
    }

    /// Rebuilds images and views for a new size. Frame slots survive.
    pub unsafe fn recreate(&mut self, width: u32, height: u32) -> Result<(), SwapchainError> {
        let extent = vk::Extent2D { width, height };
        check_extent(extent)?;

        let fences: Vec<_> = self.frames.iter().map(|f| f.in_flight).collect();
        if !fences.is_empty() {
            self.device.wait_for_fences(&fences, true, u64::MAX)?;
        }

        for view in self.views.drain(..) {
            self.device.destroy_image_view(view, None);
        }
        self.images.clear();

        self.config.extent = extent;
        let old = self.handle;
        let result = self.build(old);
        if old != vk::SwapchainKHR::null() {
            // Retired either way once passed as old_swapchain.
            self.loader.destroy_swapchain(old, None);
            if result.is_err() {
                self.handle = vk::SwapchainKHR::null();
            }
        }
        result
    }

    /// Waits on the current slot's fence. Does not reset it.
    pub unsafe fn wait_current_fence(&self) -> Result<(), SwapchainError> {
        let fence = self.frames[self.frame_index].in_flight;
        self.device.wait_for_fences(&[fence], true, u64::MAX)?;
        Ok(())
    }

    pub unsafe fn reset_current_fence(&self) -> Result<(), SwapchainError> {
        let fence = self.frames[self.frame_index].in_flight;
        self.device.reset_fences(&[fence])?;
        Ok(())
    }

    /// Only valid after `wait_current_fence`.
    pub unsafe fn reset_current_pool(&self) -> Result<(), SwapchainError> {
        let pool = self.frames[self.frame_index].command_pool;
        self.device
            .reset_command_pool(pool, vk::CommandPoolResetFlags::empty())?;
        Ok(())
    }

    pub unsafe fn acquire_next_image(&mut self) -> Result<SwapchainStatus, SwapchainError> {
        if self.handle == vk::SwapchainKHR::null() {
            return Ok(SwapchainStatus::OutOfDate);
        }
        let sem = self.frames[self.frame_index].image_available;
        let result = self
            .loader
            .acquire_next_image(self.handle, u64::MAX, sem, vk::Fence::null())
            .map(|(index, suboptimal)| {
                self.image_index = index;
                suboptimal
            });
        classify(result)
    }

    /// Submits the current slot's command buffer and presents the acquired
    /// image. The slot index advances once the submit went through.
    pub unsafe fn submit_and_present(
        &mut self,
        graphics_queue: vk::Queue,
        present_queue: vk::Queue,
    ) -> Result<SwapchainStatus, SwapchainError> {
        let slot = &self.frames[self.frame_index];

        let wait_info = vk::SemaphoreSubmitInfo {
            s_type: vk::StructureType::SEMAPHORE_SUBMIT_INFO,
            semaphore: slot.image_available,
            stage_mask: vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            ..Default::default()
        };
        let signal_info = vk::SemaphoreSubmitInfo {
            s_type: vk::StructureType::SEMAPHORE_SUBMIT_INFO,
            semaphore: slot.render_finished,
            stage_mask: vk::PipelineStageFlags2::ALL_COMMANDS,
            ..Default::default()
        };
        let cmd_info = vk::CommandBufferSubmitInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_SUBMIT_INFO,
            command_buffer: slot.command_buffer,
            ..Default::default()
        };
        let submit = vk::SubmitInfo2 {
            s_type: vk::StructureType::SUBMIT_INFO_2,
            wait_semaphore_info_count: 1,
            p_wait_semaphore_infos: &wait_info,
            command_buffer_info_count: 1,
            p_command_buffer_infos: &cmd_info,
            signal_semaphore_info_count: 1,
            p_signal_semaphore_infos: &signal_info,
            ..Default::default()
        };
        self.device
            .queue_submit2(graphics_queue, std::slice::from_ref(&submit), slot.in_flight)?;

        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &slot.render_finished,
            swapchain_count: 1,
            p_swapchains: &self.handle,
            p_image_indices: &self.image_index,
            ..Default::default()
        };
        let status = classify(self.loader.queue_present(present_queue, &present));

        self.frame_index = (self.frame_index + 1) % self.frames.len();
        status
    }

    /// Caller must have waited for device idle. Safe to call twice.
    pub unsafe fn destroy(&mut self) {
        for slot in self.frames.drain(..) {
            destroy_frame_slot(&self.device, &slot);
        }
        for view in self.views.drain(..) {
            self.device.destroy_image_view(view, None);
        }
        self.images.clear();
        if self.handle != vk::SwapchainKHR::null() {
            self.loader.destroy_swapchain(self.handle, None);
            self.handle = vk::SwapchainKHR::null();
        }
        self.frame_index = 0;
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn color_format(&self) -> vk::Format {
        self.format.format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn current_image(&self) -> vk::Image {
        self.images[self.image_index as usize]
    }

    pub fn current_view(&self) -> vk::ImageView {
        self.views[self.image_index as usize]
    }

    pub fn current_command_buffer(&self) -> vk::CommandBuffer {
        self.frames[self.frame_index].command_buffer
    }
}
