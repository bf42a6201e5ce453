// SPDX-License-Identifier: CEPL-1.0
//! Optional `fragview.toml` in the working directory.

use fragview_render::{PresentMode, RenderSettings};
use serde::Deserialize;
use std::{fs, io, path::Path, path::PathBuf};
use tracing::warn;

pub const CONFIG_FILE: &str = "fragview.toml";

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PresentModeCfg {
    #[default]
    Fifo,
    FifoRelaxed,
    Mailbox,
    Immediate,
}

impl From<PresentModeCfg> for PresentMode {
    fn from(mode: PresentModeCfg) -> Self {
        match mode {
            PresentModeCfg::Fifo => PresentMode::Fifo,
            PresentModeCfg::FifoRelaxed => PresentMode::FifoRelaxed,
            PresentModeCfg::Mailbox => PresentMode::Mailbox,
            PresentModeCfg::Immediate => PresentMode::Immediate,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct RenderCfg {
    pub present_mode: PresentModeCfg,
    pub frames_in_flight: u32,
    pub additional_images: u32,
    /// Precompiled SPIR-V used instead of the built-in fallback.
    pub fallback_shader: Option<PathBuf>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            present_mode: PresentModeCfg::Fifo,
            frames_in_flight: 2,
            additional_images: 1,
            fallback_shader: None,
        }
    }
}

impl RenderCfg {
    pub fn apply(&self, settings: &mut RenderSettings) {
        settings.present_mode = self.present_mode.into();
        settings.frames_in_flight = self.frames_in_flight.max(1);
        settings.additional_images = self.additional_images;
        settings.fallback_shader = self.fallback_shader.clone();
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AppCfg {
    #[serde(default)]
    pub render: RenderCfg,
}

pub fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str(text)
}

/// Missing file means defaults. A malformed one also means defaults, with
/// a warning.
pub fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(text) => parse_cfg(&text).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => AppCfg::default(),
        Err(e) => {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }
    }
}
