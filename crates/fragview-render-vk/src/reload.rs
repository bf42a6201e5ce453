// SPDX-License-Identifier: CEPL-1.0
//! Shader hot reload.
//!
//! A [`ShaderSource`] tracks two versions of one file: the modification
//! time last observed on disk and the one the live user pipeline was built
//! from. `pipeline_version <= file_version` always holds; the source is
//! dirty while they differ. Each distinct file version gets exactly one
//! rebuild attempt, so polling an unchanged broken file never re-runs the
//! compiler.

use crate::compiler::{load_spirv, ShaderCompiler};
use crate::pipeline::ActivePipeline;
use anyhow::{Context, Result};
use fragview_render::ReloadOutcome;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{error, info, warn};

/// Version of a file that does not exist or cannot be stat'ed.
pub const MISSING: i64 = -1;

/// Nanoseconds since the Unix epoch of the file's mtime, or [`MISSING`].
pub fn file_version(path: &Path) -> i64 {
    fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or(MISSING)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReloadState {
    Clean,
    /// Newer on disk, not yet attempted.
    DirtyPending,
    /// Newer on disk, attempted and failed for this exact version.
    DirtyAttempted,
}

#[derive(Clone, Debug)]
pub struct ShaderSource {
    pub path: PathBuf,
    pub file_version: i64,
    pub pipeline_version: i64,
    pub attempted_version: Option<i64>,
}

impl ShaderSource {
    /// Stats the file once; nothing is built yet.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_version = file_version(&path);
        ShaderSource {
            path,
            file_version,
            pipeline_version: MISSING,
            attempted_version: None,
        }
    }

    pub fn state(&self) -> ReloadState {
        if self.pipeline_version == self.file_version {
            ReloadState::Clean
        } else if self.attempted_version == Some(self.file_version) {
            ReloadState::DirtyAttempted
        } else {
            ReloadState::DirtyPending
        }
    }

    /// Re-stats the file. Returns true if it got newer.
    fn poll(&mut self) -> bool {
        let v = file_version(&self.path);
        if v > self.file_version {
            self.file_version = v;
            self.attempted_version = None;
            true
        } else {
            false
        }
    }
}

/// The registry operations the reload controller needs.
pub trait PipelineSlots {
    type Handle;

    /// Builds without installing. Must not change what is current.
    fn build(&mut self, spirv: &[u32]) -> Result<Self::Handle>;
    /// Replaces the user pipeline and makes it current. Takes ownership of
    /// `handle` either way; an error is a device failure, not a shader one.
    fn install_user(&mut self, handle: Self::Handle) -> Result<()>;
    fn set_current(&mut self, active: ActivePipeline);
}

pub struct HotReloader<C: ShaderCompiler> {
    source: ShaderSource,
    compiler: C,
    compile_options: String,
    output: PathBuf,
    update_on_save: bool,
    reload_requested: bool,
    last_error: Option<String>,
}

impl<C: ShaderCompiler> HotReloader<C> {
    pub fn new(source: ShaderSource, compiler: C, output: PathBuf) -> Self {
        HotReloader {
            source,
            compiler,
            compile_options: String::new(),
            output,
            update_on_save: true,
            reload_requested: false,
            last_error: None,
        }
    }

    pub fn with_compile_options(mut self, options: impl Into<String>) -> Self {
        self.compile_options = options.into();
        self
    }

    pub fn with_update_on_save(mut self, on: bool) -> Self {
        self.update_on_save = on;
        self
    }

    pub fn source(&self) -> &ShaderSource {
        &self.source
    }

    pub fn state(&self) -> ReloadState {
        self.source.state()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Re-stat and retry on the next `update`, even if the last attempt
    /// for this version failed or the pipeline is current.
    pub fn request_reload(&mut self) {
        self.reload_requested = true;
    }

    /// Makes the next `update` rebuild even though the source is clean,
    /// e.g. after the user pipeline was dropped for a format change.
    pub fn invalidate_pipeline(&mut self) {
        self.source.pipeline_version = MISSING;
        self.source.attempted_version = None;
    }

    /// One step of the state machine; called once per loop iteration.
    ///
    /// Compile and pipeline-build failures are memoized for the current
    /// file version and reported as [`ReloadOutcome::Failed`]. `Err` is
    /// reserved for device failures while installing, which are fatal.
    pub fn update<S: PipelineSlots>(&mut self, slots: &mut S) -> Result<ReloadOutcome> {
        let forced = std::mem::take(&mut self.reload_requested);
        if self.update_on_save || forced {
            self.source.poll();
        }
        if forced {
            self.source.attempted_version = None;
        }

        let attempt = match self.source.state() {
            ReloadState::DirtyPending => true,
            ReloadState::DirtyAttempted => false,
            ReloadState::Clean => forced && self.source.file_version != MISSING,
        };
        if !attempt {
            return Ok(ReloadOutcome::Unchanged);
        }

        // Never show a pipeline that may not match the file on disk.
        slots.set_current(ActivePipeline::Fallback);

        let version = self.source.file_version;
        let handle = match self.build_user(slots) {
            Ok(handle) => handle,
            Err(e) => {
                error!("{}: {e:#}", self.source.path.display());
                self.source.attempted_version = Some(version);
                self.last_error = Some(format!("{e:#}"));
                return Ok(ReloadOutcome::Failed);
            }
        };
        slots
            .install_user(handle)
            .context("install user pipeline")?;

        self.source.pipeline_version = version;
        self.source.attempted_version = None;
        self.last_error = None;
        info!("rebuilt {}", self.source.path.display());
        Ok(ReloadOutcome::Rebuilt)
    }

    fn build_user<S: PipelineSlots>(&mut self, slots: &mut S) -> Result<S::Handle> {
        // A stale file from an earlier run must not pass for fresh output.
        match fs::remove_file(&self.output) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => {
                warn!("{}: {e}", self.output.display());
            }
            _ => {}
        }
        self.compiler
            .compile(&self.source.path, &self.output, &self.compile_options)?;
        let code = load_spirv(&self.output)?;
        slots.build(&code)
    }
}

impl<C: ShaderCompiler> Drop for HotReloader<C> {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::CompileError;
    use std::collections::VecDeque;
    use std::fs::File;
    use std::time::Duration;

    const SPIRV_BYTES: [u8; 8] = [0x03, 0x02, 0x23, 0x07, 0x00, 0x00, 0x01, 0x00];

    enum Step {
        Ok,
        Fail(&'static str),
        EmptyOutput,
    }

    #[derive(Default)]
    struct ScriptedCompiler {
        script: VecDeque<Step>,
        calls: usize,
    }

    impl ScriptedCompiler {
        fn new(steps: impl IntoIterator<Item = Step>) -> Self {
            ScriptedCompiler {
                script: steps.into_iter().collect(),
                calls: 0,
            }
        }
    }

    impl ShaderCompiler for &mut ScriptedCompiler {
        fn compile(&mut self, _source: &Path, output: &Path, _extra: &str) -> Result<(), CompileError> {
            self.calls += 1;
            match self.script.pop_front().unwrap_or(Step::Ok) {
                Step::Ok => {
                    fs::write(output, SPIRV_BYTES).unwrap();
                    Ok(())
                }
                Step::EmptyOutput => {
                    fs::write(output, b"").unwrap();
                    Ok(())
                }
                Step::Fail(msg) => Err(CompileError::EmptyOutput(PathBuf::from(msg))),
            }
        }
    }

    #[derive(Default)]
    struct FakeSlots {
        current: ActivePipeline,
        next_handle: u32,
        user: Option<u32>,
        fail_build: bool,
        fail_install: bool,
        released: Vec<u32>,
        current_during_build: Vec<ActivePipeline>,
    }

    impl PipelineSlots for FakeSlots {
        type Handle = u32;

        fn build(&mut self, spirv: &[u32]) -> Result<u32> {
            assert!(!spirv.is_empty());
            self.current_during_build.push(self.current);
            if self.fail_build {
                anyhow::bail!("pipeline creation failed");
            }
            self.next_handle += 1;
            Ok(self.next_handle)
        }

        fn install_user(&mut self, handle: u32) -> Result<()> {
            if self.fail_install {
                self.released.push(handle);
                anyhow::bail!("device_wait_idle: ERROR_DEVICE_LOST");
            }
            self.user = Some(handle);
            self.current = ActivePipeline::User;
            Ok(())
        }

        fn set_current(&mut self, active: ActivePipeline) {
            self.current = active;
        }
    }

    struct Fixture {
        dir: PathBuf,
        shader: PathBuf,
    }

    impl Fixture {
        fn new(name: &str) -> Self {
            let dir = std::env::temp_dir().join(format!("fragview-reload-{}-{name}", std::process::id()));
            fs::create_dir_all(&dir).unwrap();
            let shader = dir.join("shader.frag");
            fs::write(&shader, "void main() {}").unwrap();
            let f = Fixture { dir, shader };
            f.set_mtime(1_000);
            f
        }

        fn set_mtime(&self, secs: u64) {
            File::options()
                .write(true)
                .open(&self.shader)
                .unwrap()
                .set_modified(UNIX_EPOCH + Duration::from_secs(secs))
                .unwrap();
        }

        fn reloader<'a>(&self, compiler: &'a mut ScriptedCompiler) -> HotReloader<&'a mut ScriptedCompiler> {
            HotReloader::new(
                ShaderSource::new(&self.shader),
                compiler,
                self.dir.join("out.spv"),
            )
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn secs(s: i64) -> i64 {
        s * 1_000_000_000
    }

    #[test]
    fn file_version_is_mtime_in_nanos_or_missing() {
        let f = Fixture::new("version");
        assert_eq!(file_version(&f.shader), secs(1_000));
        assert_eq!(file_version(&f.dir.join("nope.frag")), MISSING);
    }

    #[test]
    fn first_run_builds_user_pipeline() {
        let f = Fixture::new("first");
        let mut compiler = ScriptedCompiler::new([Step::Ok]);
        let mut slots = FakeSlots::default();
        let mut r = f.reloader(&mut compiler);

        assert_eq!(r.source().file_version, secs(1_000));
        assert_eq!(r.source().pipeline_version, MISSING);
        assert_eq!(r.state(), ReloadState::DirtyPending);

        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Rebuilt);
        assert_eq!(r.source().pipeline_version, secs(1_000));
        assert_eq!(r.state(), ReloadState::Clean);
        assert_eq!(slots.current, ActivePipeline::User);
        assert_eq!(slots.user, Some(1));
        assert!(r.last_error().is_none());
        drop(r);
        assert_eq!(compiler.calls, 1);
    }

    #[test]
    fn syntax_error_falls_back_and_is_not_retried() {
        let f = Fixture::new("syntax");
        let mut compiler = ScriptedCompiler::new([Step::Ok, Step::Fail("syntax error")]);
        let mut slots = FakeSlots::default();
        let mut r = f.reloader(&mut compiler);
        r.update(&mut slots).unwrap();
        assert_eq!(slots.current, ActivePipeline::User);

        f.set_mtime(2_000);
        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Failed);
        assert_eq!(r.source().file_version, secs(2_000));
        assert_eq!(r.source().pipeline_version, secs(1_000));
        assert_eq!(r.state(), ReloadState::DirtyAttempted);
        assert_eq!(slots.current, ActivePipeline::Fallback);
        assert!(r.last_error().unwrap().contains("syntax error"));

        for _ in 0..5 {
            assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Unchanged);
            assert_eq!(slots.current, ActivePipeline::Fallback);
        }
        drop(r);
        assert_eq!(compiler.calls, 2);
    }

    #[test]
    fn fallback_is_current_before_compiling() {
        let f = Fixture::new("order");
        let mut compiler = ScriptedCompiler::new([Step::Ok, Step::Ok]);
        let mut slots = FakeSlots::default();
        let mut r = f.reloader(&mut compiler);
        r.update(&mut slots).unwrap();

        f.set_mtime(2_000);
        r.update(&mut slots).unwrap();
        assert_eq!(
            slots.current_during_build,
            [ActivePipeline::Fallback, ActivePipeline::Fallback]
        );
        assert_eq!(slots.current, ActivePipeline::User);
        assert_eq!(slots.user, Some(2));
    }

    #[test]
    fn repeated_updates_without_changes_are_idempotent() {
        let f = Fixture::new("idem");
        let mut compiler = ScriptedCompiler::new([Step::Ok]);
        let mut slots = FakeSlots::default();
        let mut r = f.reloader(&mut compiler);
        r.update(&mut slots).unwrap();

        let before = r.source().pipeline_version;
        for _ in 0..10 {
            assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Unchanged);
            assert_eq!(r.source().pipeline_version, before);
        }
        drop(r);
        assert_eq!(compiler.calls, 1);
    }

    #[test]
    fn pipeline_version_never_exceeds_file_version() {
        let f = Fixture::new("invariant");
        let mut compiler = ScriptedCompiler::new([
            Step::Fail("a"),
            Step::Ok,
            Step::EmptyOutput,
            Step::Fail("b"),
            Step::Ok,
        ]);
        let mut slots = FakeSlots::default();
        let mut r = f.reloader(&mut compiler);

        fn check(r: &mut HotReloader<&mut ScriptedCompiler>, slots: &mut FakeSlots) {
            r.update(slots).unwrap();
            let s = r.source();
            assert!(s.pipeline_version <= s.file_version);
        }
        check(&mut r, &mut slots);
        for t in [2_000, 3_000, 4_000, 5_000] {
            f.set_mtime(t);
            check(&mut r, &mut slots);
            check(&mut r, &mut slots);
        }
        assert_eq!(r.state(), ReloadState::Clean);
        assert_eq!(r.source().pipeline_version, secs(5_000));
    }

    #[test]
    fn fixing_the_shader_produces_a_fresh_attempt() {
        let f = Fixture::new("fix");
        let mut compiler = ScriptedCompiler::new([Step::Fail("typo"), Step::Ok]);
        let mut slots = FakeSlots::default();
        let mut r = f.reloader(&mut compiler);

        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Failed);
        f.set_mtime(1_001);
        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Rebuilt);
        assert_eq!(slots.current, ActivePipeline::User);
        assert!(r.last_error().is_none());
    }

    #[test]
    fn empty_compiler_output_counts_as_failure() {
        let f = Fixture::new("empty");
        let mut compiler = ScriptedCompiler::new([Step::EmptyOutput]);
        let mut slots = FakeSlots::default();
        let mut r = f.reloader(&mut compiler);

        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Failed);
        assert_eq!(r.state(), ReloadState::DirtyAttempted);
        assert_eq!(slots.current, ActivePipeline::Fallback);
        assert!(slots.user.is_none());
    }

    #[test]
    fn pipeline_build_failure_keeps_fallback() {
        let f = Fixture::new("build");
        let mut compiler = ScriptedCompiler::new([Step::Ok]);
        let mut slots = FakeSlots {
            fail_build: true,
            ..Default::default()
        };
        let mut r = f.reloader(&mut compiler);

        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Failed);
        assert_eq!(r.state(), ReloadState::DirtyAttempted);
        assert_eq!(slots.current, ActivePipeline::Fallback);
        assert!(r.last_error().unwrap().contains("pipeline creation failed"));
    }

    #[test]
    fn missing_file_stays_on_fallback_without_compiling() {
        let f = Fixture::new("missing");
        let mut compiler = ScriptedCompiler::default();
        let mut slots = FakeSlots::default();
        let mut r = HotReloader::new(
            ShaderSource::new(f.dir.join("deleted.frag")),
            &mut compiler,
            f.dir.join("out.spv"),
        );

        for _ in 0..3 {
            assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Unchanged);
            assert_eq!(slots.current, ActivePipeline::Fallback);
        }
        r.request_reload();
        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Unchanged);
        drop(r);
        assert_eq!(compiler.calls, 0);
    }

    #[test]
    fn forced_reload_retries_the_same_version_once() {
        let f = Fixture::new("forced");
        let mut compiler = ScriptedCompiler::new([Step::Fail("missing include"), Step::Ok]);
        let mut slots = FakeSlots::default();
        let mut r = f.reloader(&mut compiler).with_update_on_save(false);

        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Failed);
        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Unchanged);

        r.request_reload();
        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Rebuilt);
        assert_eq!(r.source().pipeline_version, secs(1_000));
        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Unchanged);
        drop(r);
        assert_eq!(compiler.calls, 2);
    }

    #[test]
    fn forced_reload_of_clean_source_rebuilds() {
        let f = Fixture::new("forced-clean");
        let mut compiler = ScriptedCompiler::new([Step::Ok, Step::Ok]);
        let mut slots = FakeSlots::default();
        let mut r = f.reloader(&mut compiler);
        r.update(&mut slots).unwrap();

        r.request_reload();
        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Rebuilt);
        assert_eq!(slots.user, Some(2));
        assert_eq!(r.state(), ReloadState::Clean);
    }

    #[test]
    fn without_update_on_save_edits_need_a_manual_reload() {
        let f = Fixture::new("manual");
        let mut compiler = ScriptedCompiler::new([Step::Ok, Step::Ok]);
        let mut slots = FakeSlots::default();
        let mut r = f.reloader(&mut compiler).with_update_on_save(false);
        r.update(&mut slots).unwrap();

        f.set_mtime(2_000);
        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Unchanged);
        assert_eq!(r.source().file_version, secs(1_000));

        r.request_reload();
        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Rebuilt);
        assert_eq!(r.source().pipeline_version, secs(2_000));
    }

    #[test]
    fn invalidated_pipeline_is_rebuilt() {
        let f = Fixture::new("invalidate");
        let mut compiler = ScriptedCompiler::new([Step::Ok, Step::Ok]);
        let mut slots = FakeSlots::default();
        let mut r = f.reloader(&mut compiler);
        r.update(&mut slots).unwrap();

        r.invalidate_pipeline();
        assert_eq!(r.state(), ReloadState::DirtyPending);
        assert_eq!(r.update(&mut slots).unwrap(), ReloadOutcome::Rebuilt);
        assert_eq!(slots.user, Some(2));
    }

    #[test]
    fn device_failure_while_installing_is_fatal_and_not_memoized() {
        let f = Fixture::new("install");
        let mut compiler = ScriptedCompiler::new([Step::Ok]);
        let mut slots = FakeSlots {
            fail_install: true,
            ..Default::default()
        };
        let mut r = f.reloader(&mut compiler);

        let err = r.update(&mut slots).unwrap_err();
        assert!(format!("{err:#}").contains("ERROR_DEVICE_LOST"));
        assert_eq!(slots.released, [1]);
        assert!(slots.user.is_none());
        assert_eq!(slots.current, ActivePipeline::Fallback);
        assert_eq!(r.state(), ReloadState::DirtyPending);
        assert_eq!(r.source().pipeline_version, MISSING);
        assert!(r.last_error().is_none());
    }
}
