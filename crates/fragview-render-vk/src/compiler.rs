// SPDX-License-Identifier: CEPL-1.0
//! Out-of-process shader compilation to SPIR-V.

use ash::util::read_spv;
use std::ffi::OsString;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("unsupported shader extension '{0}' (expected .frag, .glsl, .hlsl or .slang)")]
    UnsupportedExtension(String),
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{program} failed ({status}):\n{stderr}")]
    Failed {
        program: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("compiler produced no output at {}", .0.display())]
    EmptyOutput(PathBuf),
    #[error("invalid SPIR-V: {0}")]
    InvalidSpirv(#[source] io::Error),
}

/// Turns a shader source file into a SPIR-V file at `output`.
pub trait ShaderCompiler {
    fn compile(&mut self, source: &Path, output: &Path, extra: &str) -> Result<(), CompileError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frontend {
    Glsl,
    Hlsl,
    Slang,
}

impl Frontend {
    pub fn from_path(path: &Path) -> Result<Self, CompileError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        match ext.as_str() {
            "frag" | "glsl" => Ok(Frontend::Glsl),
            "hlsl" => Ok(Frontend::Hlsl),
            "slang" => Ok(Frontend::Slang),
            _ => Err(CompileError::UnsupportedExtension(ext)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<OsString>,
}

/// Shells out to `glslc` or `slangc`, picked by file extension.
#[derive(Clone, Debug)]
pub struct ExternalCompiler {
    pub glslc: String,
    pub slangc: String,
}

impl Default for ExternalCompiler {
    fn default() -> Self {
        ExternalCompiler {
            glslc: "glslc".to_owned(),
            slangc: "slangc".to_owned(),
        }
    }
}

impl ExternalCompiler {
    pub fn invocation(
        &self,
        source: &Path,
        output: &Path,
        extra: &str,
    ) -> Result<Invocation, CompileError> {
        let mut args: Vec<OsString> = Vec::new();
        let program = match Frontend::from_path(source)? {
            Frontend::Glsl => {
                args.push("-fshader-stage=frag".into());
                args.push("-fentry-point=main".into());
                self.glslc.clone()
            }
            Frontend::Hlsl => {
                args.extend(["-x", "hlsl", "-fshader-stage=frag", "-fentry-point=main"].map(OsString::from));
                self.glslc.clone()
            }
            Frontend::Slang => {
                args.extend(["-target", "spirv", "-stage", "fragment", "-entry", "main"].map(OsString::from));
                self.slangc.clone()
            }
        };
        args.extend(extra.split_whitespace().map(OsString::from));
        args.push(source.into());
        args.push("-o".into());
        args.push(output.into());
        Ok(Invocation { program, args })
    }
}

impl ShaderCompiler for ExternalCompiler {
    fn compile(&mut self, source: &Path, output: &Path, extra: &str) -> Result<(), CompileError> {
        let inv = self.invocation(source, output, extra)?;
        debug!("compiling: {} {:?}", inv.program, inv.args);

        let out = Command::new(&inv.program)
            .args(&inv.args)
            .output()
            .map_err(|source| CompileError::Spawn {
                program: inv.program.clone(),
                source,
            })?;
        if !out.status.success() {
            let mut stderr = String::from_utf8_lossy(&out.stderr).trim_end().to_owned();
            if stderr.is_empty() {
                stderr = String::from_utf8_lossy(&out.stdout).trim_end().to_owned();
            }
            return Err(CompileError::Failed {
                program: inv.program,
                status: out.status,
                stderr,
            });
        }
        Ok(())
    }
}

/// Reads a compiled module back. Empty and malformed files are errors.
pub fn load_spirv(path: &Path) -> Result<Vec<u32>, CompileError> {
    let bytes = std::fs::read(path).map_err(|source| CompileError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if bytes.is_empty() {
        return Err(CompileError::EmptyOutput(path.to_path_buf()));
    }
    read_spv(&mut Cursor::new(&bytes)).map_err(CompileError::InvalidSpirv)
}

/// Per-process scratch file for compiler output.
pub fn scratch_output_path() -> PathBuf {
    std::env::temp_dir().join(format!("fragview-{}.spv", std::process::id()))
}
