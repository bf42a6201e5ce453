// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use bytemuck::{Pod, Zeroable};
use fragview_core::FrameClock;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::path::PathBuf;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    /// Minimised windows report a zero-sized drawable.
    pub fn is_drawable(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

/// Per-draw data visible to the fragment stage at offset 0.
///
/// This layout is the only contract user shaders see. GLSL side:
///
/// ```glsl
/// layout(push_constant) uniform PushConstants {
///     vec2  resolution;
///     vec2  mouse;
///     float time;
///     float time_delta;
///     int   frame;
/// } pc;
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PushConstants {
    pub resolution: [f32; 2],
    pub mouse: [f32; 2],
    pub time: f32,
    pub time_delta: f32,
    pub frame: i32,
}

impl PushConstants {
    pub fn new(size: RenderSize, mouse: [f32; 2], clock: &FrameClock) -> Self {
        PushConstants {
            resolution: [size.width as f32, size.height as f32],
            mouse,
            time: clock.elapsed_secs(),
            time_delta: clock.delta_secs(),
            frame: clock.frame() as i32,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PresentMode {
    #[default]
    Fifo,
    FifoRelaxed,
    Mailbox,
    Immediate,
}

/// Everything a backend needs to know at creation time.
#[derive(Clone, Debug)]
pub struct RenderSettings {
    pub shader_path: PathBuf,
    pub compile_options: String,
    pub fallback_shader: Option<PathBuf>,
    pub update_on_save: bool,
    pub flip_y: bool,
    pub validation: bool,
    pub transparent: bool,
    pub present_mode: PresentMode,
    pub frames_in_flight: u32,
    pub additional_images: u32,
}

impl RenderSettings {
    pub fn new(shader_path: impl Into<PathBuf>) -> Self {
        RenderSettings {
            shader_path: shader_path.into(),
            compile_options: String::new(),
            fallback_shader: None,
            update_on_save: true,
            flip_y: false,
            validation: false,
            transparent: false,
            present_mode: PresentMode::Fifo,
            frames_in_flight: 2,
            additional_images: 1,
        }
    }
}

/// Pointer position in window pixels, top-left origin.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameInput {
    pub cursor: [f32; 2],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Presented,
    /// Nothing was submitted (zero-sized or out-of-date surface).
    Skipped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadOutcome {
    /// No rebuild was needed or attempted.
    Unchanged,
    /// A new user pipeline is active.
    Rebuilt,
    /// A rebuild was attempted and failed; the fallback is active.
    Failed,
}

pub trait Renderer {
    fn new(
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        size: RenderSize,
        settings: RenderSettings,
    ) -> Result<Self>
    where
        Self: Sized;

    fn resize(&mut self, size: RenderSize) -> Result<()>;

    /// Checks the shader source and swaps pipelines if needed. Compile and
    /// build errors degrade to the fallback pipeline; only device-level
    /// failures are errors.
    fn update_shader(&mut self) -> Result<ReloadOutcome>;

    /// Re-attempt the current shader on the next `update_shader`.
    fn request_reload(&mut self);

    /// One present cycle. Only device-level failures are errors.
    fn render(&mut self, input: &FrameInput, clock: &mut FrameClock) -> Result<FrameStatus>;

    fn set_flip_y(&mut self, _on: bool) {}

    fn last_shader_error(&self) -> Option<&str> {
        None
    }
}
