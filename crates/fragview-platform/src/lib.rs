// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
pub mod window_state;

pub use window_state::{WindowMode, WindowState, WindowStateError};
pub use winit;

use std::path::PathBuf;

/// Per-user config directory (`~/.config/fragview` and friends), or the
/// working directory when the platform does not report one.
pub fn config_dir() -> PathBuf {
    directories::ProjectDirs::from("", "", "fragview")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn window_state_path() -> PathBuf {
    config_dir().join("window.ini")
}
