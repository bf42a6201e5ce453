// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use fragview_core::{FrameClock, FramePacer, Pace};
use fragview_platform::{WindowMode, WindowState};
use fragview_render::{FrameInput, FrameStatus, ReloadOutcome, RenderSettings, RenderSize, Renderer};
use fragview_render_vk::VkRenderer;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use fragview_platform::winit::{
    application::ApplicationHandler,
    dpi::{PhysicalPosition, PhysicalSize},
    event::{ElementState, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow},
    keyboard::PhysicalKey,
    monitor::MonitorHandle,
    window::{Fullscreen, Window, WindowId, WindowLevel},
};

use crate::keymap::{Action, Keymap};

pub fn window_title(shader: &Path, failed: bool) -> String {
    let name = shader
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| shader.display().to_string());
    if failed {
        format!("{name} - fragview [error]")
    } else {
        format!("{name} - fragview")
    }
}

/// F11 flips between windowed and borderless. Leaving exclusive
/// fullscreen goes back to windowed.
pub fn next_mode(mode: WindowMode) -> WindowMode {
    match mode {
        WindowMode::Windowed => WindowMode::WindowedFullscreen,
        WindowMode::WindowedFullscreen | WindowMode::Fullscreen => WindowMode::Windowed,
    }
}

pub fn centered(
    monitor_pos: PhysicalPosition<i32>,
    monitor_size: PhysicalSize<u32>,
    width: i32,
    height: i32,
) -> PhysicalPosition<i32> {
    PhysicalPosition::new(
        monitor_pos.x + (monitor_size.width as i32 - width) / 2,
        monitor_pos.y + (monitor_size.height as i32 - height) / 2,
    )
}

fn level(floating: bool) -> WindowLevel {
    if floating {
        WindowLevel::AlwaysOnTop
    } else {
        WindowLevel::Normal
    }
}

fn fullscreen_for(mode: WindowMode, monitor: Option<MonitorHandle>) -> Option<Fullscreen> {
    match mode {
        WindowMode::Windowed => None,
        WindowMode::WindowedFullscreen => Some(Fullscreen::Borderless(monitor)),
        WindowMode::Fullscreen => {
            let video = monitor.as_ref().and_then(|m| m.video_modes().next());
            match video {
                Some(v) => Some(Fullscreen::Exclusive(v)),
                None => Some(Fullscreen::Borderless(monitor)),
            }
        }
    }
}

// Field order matters: the renderer owns a surface on the window and must
// drop first.
pub struct App {
    renderer: Option<VkRenderer>,
    window: Option<Window>,

    settings: RenderSettings,
    window_state: WindowState,
    state_path: PathBuf,
    keymap: Keymap,

    size: RenderSize,
    cursor: [f32; 2],
    clock: FrameClock,
    pacer: FramePacer,
    shader_failed: bool,

    exiting: bool,
    fatal: Option<anyhow::Error>,
    frames: u32,
    last_fps_instant: Instant,
}

impl App {
    pub fn new(
        settings: RenderSettings,
        mut window_state: WindowState,
        state_path: PathBuf,
        fps_limit: f32,
        start_paused: bool,
    ) -> Self {
        window_state.transparent = settings.transparent;
        let now = Instant::now();
        App {
            renderer: None,
            window: None,
            settings,
            window_state,
            state_path,
            keymap: Keymap::default(),
            size: RenderSize {
                width: 1,
                height: 1,
            },
            cursor: [0.0, 0.0],
            clock: FrameClock::new(now, start_paused),
            pacer: FramePacer::from_fps(fps_limit),
            shader_failed: false,
            exiting: false,
            fatal: None,
            frames: 0,
            last_fps_instant: now,
        }
    }

    /// The error that ended the event loop, if any.
    pub fn take_fatal(&mut self) -> Option<anyhow::Error> {
        self.fatal.take()
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let ws = &self.window_state;
        let attrs = Window::default_attributes()
            .with_title(window_title(&self.settings.shader_path, false))
            .with_inner_size(PhysicalSize::new(ws.width.max(1) as u32, ws.height.max(1) as u32))
            .with_position(PhysicalPosition::new(ws.x, ws.y))
            .with_decorations(ws.decorated)
            .with_transparent(self.settings.transparent)
            .with_window_level(level(ws.floating));
        let window = event_loop.create_window(attrs).context("create_window")?;
        if ws.mode.is_fullscreen() {
            window.set_fullscreen(fullscreen_for(ws.mode, window.current_monitor()));
        }

        let inner = window.inner_size();
        self.size = RenderSize {
            width: inner.width,
            height: inner.height,
        };
        let renderer = VkRenderer::new(&window, &window, self.size, self.settings.clone())
            .context("vulkan init")?;
        info!(
            "window {}x{} ({}), shader {}",
            self.size.width,
            self.size.height,
            self.window_state.mode,
            self.settings.shader_path.display()
        );

        self.window = Some(window);
        self.renderer = Some(renderer);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        if self.fatal.is_none() {
            self.fatal = Some(err);
        }
        self.shutdown(event_loop);
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        self.exiting = true;
        self.remember_windowed_rect();
        match self.window_state.save(&self.state_path) {
            Ok(()) => debug!("saved window state to {}", self.state_path.display()),
            Err(e) => warn!("{}: {e}", self.state_path.display()),
        }
        self.renderer = None;
        self.window = None;
        event_loop.exit();
    }

    /// Only a windowed, non-minimised rect is worth restoring.
    fn remember_windowed_rect(&mut self) {
        let Some(w) = &self.window else { return };
        if self.window_state.mode != WindowMode::Windowed {
            return;
        }
        if let Ok(pos) = w.outer_position() {
            self.window_state.x = pos.x;
            self.window_state.y = pos.y;
        }
        let size = w.inner_size();
        if size.width > 0 && size.height > 0 {
            self.window_state.width = size.width as i32;
            self.window_state.height = size.height as i32;
        }
    }

    fn refresh_title(&mut self) {
        let failed = self
            .renderer
            .as_ref()
            .is_some_and(|r| r.last_shader_error().is_some());
        if failed == self.shader_failed {
            return;
        }
        self.shader_failed = failed;
        if let Some(w) = &self.window {
            w.set_title(&window_title(&self.settings.shader_path, failed));
        }
    }

    fn reset_window(&mut self) {
        let Some(w) = &self.window else { return };
        let mut ws = WindowState {
            transparent: self.window_state.transparent,
            ..WindowState::default()
        };
        w.set_fullscreen(None);
        w.set_decorations(ws.decorated);
        w.set_window_level(level(ws.floating));
        let _ = w.request_inner_size(PhysicalSize::new(ws.width as u32, ws.height as u32));
        if let Some(m) = w.current_monitor() {
            let pos = centered(m.position(), m.size(), ws.width, ws.height);
            ws.x = pos.x;
            ws.y = pos.y;
            w.set_outer_position(pos);
        }
        self.window_state = ws;
        info!("window reset to {}x{}", ws.width, ws.height);
    }

    fn perform(&mut self, action: Action, event_loop: &ActiveEventLoop) {
        debug!("key action {action:?}");
        match action {
            Action::Close => self.shutdown(event_loop),
            Action::TogglePause => {
                let paused = self.clock.toggle_pause();
                info!("paused = {paused}");
            }
            Action::ToggleFlipY => {
                self.settings.flip_y = !self.settings.flip_y;
                if let Some(r) = &mut self.renderer {
                    r.set_flip_y(self.settings.flip_y);
                }
                info!("flip_y = {}", self.settings.flip_y);
            }
            Action::Reload => {
                if let Some(r) = &mut self.renderer {
                    r.request_reload();
                }
                info!("reload requested");
            }
            Action::ToggleFullscreen => {
                self.remember_windowed_rect();
                self.window_state.mode = next_mode(self.window_state.mode);
                if let Some(w) = &self.window {
                    w.set_fullscreen(fullscreen_for(self.window_state.mode, w.current_monitor()));
                }
                info!("window mode = {}", self.window_state.mode);
            }
            Action::ToggleDecorations => {
                self.window_state.decorated = !self.window_state.decorated;
                if let Some(w) = &self.window {
                    w.set_decorations(self.window_state.decorated);
                }
            }
            Action::ToggleFloating => {
                self.window_state.floating = !self.window_state.floating;
                if let Some(w) = &self.window {
                    w.set_window_level(level(self.window_state.floating));
                }
            }
            Action::ResetWindow => self.reset_window(),
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() || self.exiting {
            return;
        }
        if let Err(e) = self.init(event_loop) {
            self.fail(event_loop, e);
            return;
        }
        if let Some(w) = &self.window {
            w.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        window_id: WindowId,
        event: WindowEvent,
    ) {
        match &self.window {
            Some(window) if window.id() == window_id => {}
            _ => return,
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(new_size) => {
                self.size = RenderSize {
                    width: new_size.width,
                    height: new_size.height,
                };
                debug!("Resized → {}x{}", self.size.width, self.size.height);
                let res = match self.renderer.as_mut() {
                    Some(r) => r.resize(self.size),
                    None => Ok(()),
                };
                if let Err(e) = res {
                    self.fail(event_loop, e);
                }
            }

            WindowEvent::Moved(pos) => {
                if self.window_state.mode == WindowMode::Windowed {
                    self.window_state.x = pos.x;
                    self.window_state.y = pos.y;
                }
            }

            WindowEvent::CursorMoved { position, .. } => {
                self.cursor = [position.x as f32, position.y as f32];
            }

            WindowEvent::KeyboardInput { event, .. } => {
                if event.state != ElementState::Pressed || event.repeat {
                    return;
                }
                if let PhysicalKey::Code(code) = event.physical_key {
                    if let Some(action) = self.keymap.action(code) {
                        self.perform(action, event_loop);
                    }
                }
            }

            WindowEvent::RedrawRequested => {
                if self.exiting {
                    return;
                }
                let Some(renderer) = self.renderer.as_mut() else {
                    return;
                };
                let input = FrameInput {
                    cursor: self.cursor,
                };
                match renderer.render(&input, &mut self.clock) {
                    Ok(FrameStatus::Presented) => self.frames = self.frames.saturating_add(1),
                    Ok(FrameStatus::Skipped) => {}
                    Err(e) => self.fail(event_loop, e.context("render")),
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if self.exiting {
            return;
        }
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        match renderer.update_shader() {
            Ok(ReloadOutcome::Unchanged) => {}
            Ok(_) => self.refresh_title(),
            Err(e) => {
                self.fail(event_loop, e.context("shader reload"));
                return;
            }
        }

        // Minimised: sleep until the window comes back.
        if !self.size.is_drawable() {
            event_loop.set_control_flow(ControlFlow::Wait);
            self.pacer.reset();
            self.frames = 0;
            return;
        }

        let now = Instant::now();
        match self.pacer.poll(now) {
            Pace::WaitUntil(deadline) => {
                event_loop.set_control_flow(ControlFlow::WaitUntil(deadline));
            }
            Pace::Ready => {
                event_loop.set_control_flow(ControlFlow::Poll);
                if let Some(w) = &self.window {
                    w.request_redraw();
                }
            }
        }

        if now.duration_since(self.last_fps_instant).as_secs_f32() >= 1.0 {
            debug!("fps ~ {}", self.frames);
            self.frames = 0;
            self.last_fps_instant = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_names_the_shader_and_flags_errors() {
        let p = Path::new("shaders/plasma.frag");
        assert_eq!(window_title(p, false), "plasma.frag - fragview");
        assert_eq!(window_title(p, true), "plasma.frag - fragview [error]");
    }

    #[test]
    fn fullscreen_toggle_returns_to_windowed() {
        assert_eq!(next_mode(WindowMode::Windowed), WindowMode::WindowedFullscreen);
        assert_eq!(next_mode(WindowMode::WindowedFullscreen), WindowMode::Windowed);
        assert_eq!(next_mode(WindowMode::Fullscreen), WindowMode::Windowed);
    }

    #[test]
    fn reset_centres_on_monitor() {
        let pos = centered(
            PhysicalPosition::new(1920, 0),
            PhysicalSize::new(2560, 1440),
            800,
            600,
        );
        assert_eq!(pos, PhysicalPosition::new(1920 + 880, 420));
    }

    #[test]
    fn windowed_mode_has_no_fullscreen() {
        assert!(fullscreen_for(WindowMode::Windowed, None).is_none());
        assert!(matches!(
            fullscreen_for(WindowMode::WindowedFullscreen, None),
            Some(Fullscreen::Borderless(None))
        ));
        assert!(matches!(
            fullscreen_for(WindowMode::Fullscreen, None),
            Some(Fullscreen::Borderless(None))
        ));
    }
}
