// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod app;
mod config;
mod keymap;

use anyhow::Result;
use clap::{ArgAction, Parser};
use fragview_core::init_tracing;
use fragview_platform::{window_state_path, WindowState};
use fragview_render::RenderSettings;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};

use fragview_platform::winit::event_loop::EventLoop;

use crate::app::App;
use crate::config::{load_cfg, RenderCfg, CONFIG_FILE};

/// Live preview of a fragment shader; edits are picked up on save.
#[derive(Parser, Debug)]
#[command(name = "fragview", version)]
struct Args {
    /// Fragment shader source (.frag, .glsl, .hlsl or .slang)
    shader: PathBuf,

    /// Enable the Vulkan validation layer [default: on in debug builds]
    #[arg(long, value_name = "BOOL", require_equals = true, num_args = 0..=1,
          default_missing_value = "true", value_parser = parse_bool)]
    validation: Option<bool>,

    /// Debug-level logging
    #[arg(long, value_name = "BOOL", action = ArgAction::Set, require_equals = true,
          num_args = 0..=1, default_value = "false", default_missing_value = "true",
          value_parser = parse_bool)]
    verbose: bool,

    /// Rebuild when the shader file changes on disk
    #[arg(long, value_name = "BOOL", action = ArgAction::Set, require_equals = true,
          num_args = 0..=1, default_value = "true", default_missing_value = "true",
          value_parser = parse_bool)]
    update_on_save: bool,

    /// Bottom-left origin for the user shader
    #[arg(long, value_name = "BOOL", action = ArgAction::Set, require_equals = true,
          num_args = 0..=1, default_value = "false", default_missing_value = "true",
          value_parser = parse_bool)]
    flip_y: bool,

    /// Start with time frozen
    #[arg(long, value_name = "BOOL", action = ArgAction::Set, require_equals = true,
          num_args = 0..=1, default_value = "false", default_missing_value = "true",
          value_parser = parse_bool)]
    start_paused: bool,

    /// Transparent window [default: last saved value]
    #[arg(long, value_name = "BOOL", require_equals = true, num_args = 0..=1,
          default_missing_value = "true", value_parser = parse_bool)]
    transparent: Option<bool>,

    /// Frame-rate cap, 0 = unlimited
    #[arg(long, value_name = "FPS", default_value_t = 0.0)]
    fps_limit: f32,

    /// Extra options passed to the shader compiler
    #[arg(long = "compile_options", value_name = "OPTS", default_value = "",
          allow_hyphen_values = true)]
    compile_options: String,
}

fn parse_bool(s: &str) -> Result<bool, String> {
    match s {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(format!("expected true|false|1|0, got '{s}'")),
    }
}

fn render_settings(args: &Args, cfg: &RenderCfg, saved: &WindowState) -> RenderSettings {
    let mut settings = RenderSettings::new(&args.shader);
    cfg.apply(&mut settings);
    settings.compile_options = args.compile_options.clone();
    settings.update_on_save = args.update_on_save;
    settings.flip_y = args.flip_y;
    settings.validation = args.validation.unwrap_or(cfg!(debug_assertions));
    settings.transparent = args.transparent.unwrap_or(saved.transparent);
    settings
}

fn run(args: Args) -> Result<()> {
    let cfg = load_cfg(Path::new(CONFIG_FILE));
    let state_path = window_state_path();
    let saved = WindowState::load_or_default(&state_path);
    let settings = render_settings(&args, &cfg.render, &saved);
    info!(
        "fragview {}: {} (validation={}, fps_limit={})",
        env!("CARGO_PKG_VERSION"),
        settings.shader_path.display(),
        settings.validation,
        args.fps_limit
    );

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App::new(settings, saved, state_path, args.fps_limit, args.start_paused);
    event_loop.run_app(&mut app)?;

    match app.take_fatal() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(e) => {
            println!("{e}");
            return if e.use_stderr() {
                ExitCode::from(2)
            } else {
                ExitCode::SUCCESS
            };
        }
    };
    init_tracing(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::error::ErrorKind;
    use fragview_render::PresentMode;

    fn parse(argv: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("fragview").chain(argv.iter().copied()))
    }

    #[test]
    fn bool_parser_accepts_words_and_digits() {
        assert_eq!(parse_bool("true"), Ok(true));
        assert_eq!(parse_bool("1"), Ok(true));
        assert_eq!(parse_bool("false"), Ok(false));
        assert_eq!(parse_bool("0"), Ok(false));
        assert!(parse_bool("yes").is_err());
        assert!(parse_bool("").is_err());
    }

    #[test]
    fn defaults() {
        let args = parse(&["plasma.frag"]).unwrap();
        assert_eq!(args.shader, PathBuf::from("plasma.frag"));
        assert_eq!(args.validation, None);
        assert!(!args.verbose);
        assert!(args.update_on_save);
        assert!(!args.flip_y);
        assert!(!args.start_paused);
        assert_eq!(args.transparent, None);
        assert_eq!(args.fps_limit, 0.0);
        assert_eq!(args.compile_options, "");
    }

    #[test]
    fn bare_flags_mean_true() {
        let args = parse(&["--flip-y", "s.frag", "--start-paused", "--validation"]).unwrap();
        assert!(args.flip_y);
        assert!(args.start_paused);
        assert_eq!(args.validation, Some(true));
        assert_eq!(args.shader, PathBuf::from("s.frag"));
    }

    #[test]
    fn explicit_values() {
        let args = parse(&[
            "s.slang",
            "--update-on-save=0",
            "--verbose=1",
            "--transparent=false",
            "--fps-limit=59.94",
            "--compile_options=-O -DMODE=2",
        ])
        .unwrap();
        assert!(!args.update_on_save);
        assert!(args.verbose);
        assert_eq!(args.transparent, Some(false));
        assert!((args.fps_limit - 59.94).abs() < 1e-4);
        assert_eq!(args.compile_options, "-O -DMODE=2");
    }

    #[test]
    fn bad_input_is_a_usage_error() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["s.frag", "--flip-y=maybe"]).is_err());
        assert!(parse(&["s.frag", "--no-such-flag"]).is_err());
        let help = parse(&["--help"]).unwrap_err();
        assert_eq!(help.kind(), ErrorKind::DisplayHelp);
        assert!(!help.use_stderr());
    }

    #[test]
    fn settings_merge_cli_config_and_saved_state() {
        let args = parse(&["s.frag", "--flip-y", "--validation=0", "--compile_options=-g"]).unwrap();
        let cfg = RenderCfg {
            present_mode: config::PresentModeCfg::Immediate,
            frames_in_flight: 3,
            ..RenderCfg::default()
        };
        let saved = WindowState {
            transparent: true,
            ..WindowState::default()
        };
        let s = render_settings(&args, &cfg, &saved);
        assert_eq!(s.shader_path, PathBuf::from("s.frag"));
        assert!(s.flip_y);
        assert!(!s.validation);
        assert!(s.transparent);
        assert!(s.update_on_save);
        assert_eq!(s.compile_options, "-g");
        assert_eq!(s.present_mode, PresentMode::Immediate);
        assert_eq!(s.frames_in_flight, 3);
    }
}
