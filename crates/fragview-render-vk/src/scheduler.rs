// SPDX-License-Identifier: CEPL-1.0
//! When to recreate, when to skip, when to draw.
//!
//! [`FrameScheduler`] owns the requested size and the dirty flag and makes
//! every per-frame decision. The GPU work behind it sits in a
//! [`PresentTarget`].

use anyhow::{Context, Result};
use ash::vk;
use fragview_core::FrameClock;
use fragview_render::{FrameInput, FrameStatus, RenderSize};
use std::time::Instant;
use tracing::debug;

use crate::swapchain::{SwapchainError, SwapchainStatus};

/// Swapchain-side operations of one frame.
pub trait PresentTarget {
    fn recreate(&mut self, width: u32, height: u32) -> Result<(), SwapchainError>;
    fn color_format(&self) -> vk::Format;
    /// Rebuild whatever is tied to the attachment format.
    fn format_changed(&mut self, format: vk::Format) -> Result<()>;
    /// Waits for the slot, resets its pool and acquires an image. The slot
    /// fence is only reset once an image was acquired.
    fn acquire(&mut self) -> Result<SwapchainStatus>;
    /// Records, submits and presents into the acquired image.
    fn draw(&mut self, input: &FrameInput, clock: &FrameClock) -> Result<SwapchainStatus>;
}

#[derive(Debug, Clone)]
pub struct FrameScheduler {
    size: RenderSize,
    dirty: bool,
}

impl FrameScheduler {
    pub fn new(size: RenderSize) -> Self {
        FrameScheduler { size, dirty: false }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn resize<T: PresentTarget>(&mut self, target: &mut T, size: RenderSize) -> Result<()> {
        if size == self.size && !self.dirty {
            return Ok(());
        }
        self.size = size;
        if !size.is_drawable() {
            self.dirty = true;
            return Ok(());
        }
        self.recreate(target)
    }

    /// Rebuilds for the last requested size. A zero-sized surface leaves
    /// the swapchain dirty and is not an error.
    fn recreate<T: PresentTarget>(&mut self, target: &mut T) -> Result<()> {
        let old_format = target.color_format();
        match target.recreate(self.size.width, self.size.height) {
            Ok(()) => {}
            Err(SwapchainError::ZeroExtent { width, height }) => {
                debug!("surface is {width}x{height}; deferring recreate");
                self.dirty = true;
                return Ok(());
            }
            Err(e) => return Err(e).context("recreate swapchain"),
        }
        self.dirty = false;

        let format = target.color_format();
        if format != old_format {
            target.format_changed(format)?;
        }
        Ok(())
    }

    /// One present cycle. Out-of-date and suboptimal surfaces mark the
    /// swapchain dirty; every other failure is an error.
    pub fn render<T: PresentTarget>(
        &mut self,
        target: &mut T,
        input: &FrameInput,
        clock: &mut FrameClock,
    ) -> Result<FrameStatus> {
        if !self.size.is_drawable() {
            return Ok(FrameStatus::Skipped);
        }
        if self.dirty {
            self.recreate(target)?;
            if self.dirty {
                return Ok(FrameStatus::Skipped);
            }
        }

        match target.acquire()? {
            SwapchainStatus::OutOfDate => {
                self.dirty = true;
                return Ok(FrameStatus::Skipped);
            }
            SwapchainStatus::Suboptimal => self.dirty = true,
            SwapchainStatus::Optimal => {}
        }

        clock.tick(Instant::now());
        if target.draw(input, clock)?.needs_recreate() {
            self.dirty = true;
        }
        clock.advance_frame();
        Ok(FrameStatus::Presented)
    }
}
