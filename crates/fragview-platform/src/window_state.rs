// SPDX-License-Identifier: CEPL-1.0
//! Window geometry persisted between runs.
//!
//! Stored as a small INI file:
//!
//! ```text
//! [WindowState]
//! x=30
//! y=30
//! width=800
//! height=600
//! mode=Windowed
//! decorated=true
//! transparent=false
//! floating=false
//! ```

use configparser::ini::Ini;
use std::{fmt, fs, io, path::Path, str::FromStr};
use thiserror::Error;
use tracing::warn;

const SECTION: &str = "WindowState";

#[derive(Debug, Error)]
pub enum WindowStateError {
    #[error("window state i/o: {0}")]
    Io(#[from] io::Error),
    #[error("window state parse: {0}")]
    Parse(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WindowMode {
    #[default]
    Windowed,
    WindowedFullscreen,
    Fullscreen,
}

impl WindowMode {
    pub fn as_str(self) -> &'static str {
        match self {
            WindowMode::Windowed => "Windowed",
            WindowMode::WindowedFullscreen => "WindowedFullscreen",
            WindowMode::Fullscreen => "Fullscreen",
        }
    }

    pub fn is_fullscreen(self) -> bool {
        !matches!(self, WindowMode::Windowed)
    }
}

impl fmt::Display for WindowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WindowMode {
    type Err = WindowStateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Longest name first: "Windowed" is a prefix of "WindowedFullscreen".
        let s = s.trim();
        if s.starts_with("WindowedFullscreen") {
            Ok(WindowMode::WindowedFullscreen)
        } else if s.starts_with("Windowed") {
            Ok(WindowMode::Windowed)
        } else if s.starts_with("Fullscreen") {
            Ok(WindowMode::Fullscreen)
        } else {
            Err(WindowStateError::Parse(format!("unknown window mode '{s}'")))
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowState {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub mode: WindowMode,
    pub decorated: bool,
    pub transparent: bool,
    pub floating: bool,
}

impl Default for WindowState {
    fn default() -> Self {
        WindowState {
            x: 30,
            y: 30,
            width: 800,
            height: 600,
            mode: WindowMode::Windowed,
            decorated: true,
            transparent: false,
            floating: false,
        }
    }
}

impl WindowState {
    /// `Ok(None)` when the text has no `[WindowState]` section. Individual
    /// keys that fail to parse keep their default and log a warning.
    pub fn parse(text: &str) -> Result<Option<Self>, WindowStateError> {
        let mut ini = Ini::new_cs();
        ini.read(text.to_owned()).map_err(WindowStateError::Parse)?;
        if !ini.sections().iter().any(|s| s == SECTION) {
            return Ok(None);
        }

        let mut state = WindowState::default();
        read_int(&ini, "x", &mut state.x);
        read_int(&ini, "y", &mut state.y);
        read_int(&ini, "width", &mut state.width);
        read_int(&ini, "height", &mut state.height);
        read_bool(&ini, "decorated", &mut state.decorated);
        read_bool(&ini, "transparent", &mut state.transparent);
        read_bool(&ini, "floating", &mut state.floating);
        if let Some(mode) = ini.get(SECTION, "mode") {
            match mode.parse() {
                Ok(m) => state.mode = m,
                Err(e) => warn!("{e}; keeping {}", state.mode),
            }
        }
        Ok(Some(state))
    }

    /// Missing file is `Ok(None)`, not an error.
    pub fn load(path: &Path) -> Result<Option<Self>, WindowStateError> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(Some(state)) => state,
            Ok(None) => WindowState::default(),
            Err(e) => {
                warn!("{}: {e}; using default window state", path.display());
                WindowState::default()
            }
        }
    }

    pub fn to_ini_string(&self) -> String {
        let mut ini = Ini::new_cs();
        let mut put = |key: &str, value: String| {
            ini.set(SECTION, key, Some(value));
        };
        put("x", self.x.to_string());
        put("y", self.y.to_string());
        put("width", self.width.to_string());
        put("height", self.height.to_string());
        put("mode", self.mode.to_string());
        put("decorated", self.decorated.to_string());
        put("transparent", self.transparent.to_string());
        put("floating", self.floating.to_string());
        ini.writes()
    }

    pub fn save(&self, path: &Path) -> Result<(), WindowStateError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, self.to_ini_string())?;
        Ok(())
    }
}

fn read_int(ini: &Ini, key: &str, out: &mut i32) {
    match ini.getint(SECTION, key) {
        Ok(Some(v)) => match i32::try_from(v) {
            Ok(v) => *out = v,
            Err(_) => warn!("window state '{key}' out of range: {v}"),
        },
        Ok(None) => {}
        Err(e) => warn!("window state '{key}': {e}"),
    }
}

fn read_bool(ini: &Ini, key: &str, out: &mut bool) {
    match ini.getboolcoerce(SECTION, key) {
        Ok(Some(v)) => *out = v,
        Ok(None) => {}
        Err(e) => warn!("window state '{key}': {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_section() {
        let text = "[WindowState]\nx=-1200\ny=40\nwidth=1920\nheight=1080\nmode=WindowedFullscreen\ndecorated=0\ntransparent=true\nfloating=1\n";
        let state = WindowState::parse(text).unwrap().unwrap();
        assert_eq!(
            state,
            WindowState {
                x: -1200,
                y: 40,
                width: 1920,
                height: 1080,
                mode: WindowMode::WindowedFullscreen,
                decorated: false,
                transparent: true,
                floating: true,
            }
        );
    }

    #[test]
    fn missing_section_is_none() {
        assert_eq!(WindowState::parse("[Other]\nx=1\n").unwrap(), None);
        assert_eq!(WindowState::parse("").unwrap(), None);
    }

    #[test]
    fn bad_values_keep_defaults() {
        let text = "[WindowState]\nwidth=wide\nmode=Sideways\nfloating=maybe\nheight=720\n";
        let state = WindowState::parse(text).unwrap().unwrap();
        let defaults = WindowState::default();
        assert_eq!(state.width, defaults.width);
        assert_eq!(state.mode, defaults.mode);
        assert_eq!(state.floating, defaults.floating);
        assert_eq!(state.height, 720);
    }

    #[test]
    fn mode_names_are_matched_longest_first() {
        assert_eq!("Windowed".parse::<WindowMode>().unwrap(), WindowMode::Windowed);
        assert_eq!(
            "WindowedFullscreen".parse::<WindowMode>().unwrap(),
            WindowMode::WindowedFullscreen
        );
        assert_eq!("Fullscreen".parse::<WindowMode>().unwrap(), WindowMode::Fullscreen);
        assert!("windowed".parse::<WindowMode>().is_err());
    }

    #[test]
    fn written_file_has_section_header_and_reads_back() {
        let path = std::env::temp_dir()
            .join(format!("fragview-ws-{}", std::process::id()))
            .join("window.ini");
        let state = WindowState {
            x: 10,
            y: 20,
            width: 640,
            height: 480,
            mode: WindowMode::Fullscreen,
            decorated: false,
            transparent: false,
            floating: true,
        };
        state.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("[WindowState]"));
        assert!(text.contains("mode=Fullscreen"));
        assert_eq!(WindowState::load(&path).unwrap(), Some(state));

        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_loads_as_none() {
        let path = std::env::temp_dir().join("fragview-does-not-exist/window.ini");
        assert!(WindowState::load(&path).unwrap().is_none());
        assert_eq!(WindowState::load_or_default(&path), WindowState::default());
    }
}
