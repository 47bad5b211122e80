//! External compilation toolchain
//!
//! A [`Toolchain`] turns one staged source file into one loadable artifact.
//! [`RustcToolchain`] drives `rustc` as a child process and builds a `cdylib`
//! per source unit.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::CompileError;
use super::classpath::Classpath;
use crate::config::ToolchainConfig;
use crate::stager::SourceSyntax;

/// Everything needed to compile one source unit
#[derive(Debug, Clone, Copy)]
pub struct CompileInvocation<'a> {
    /// Staged source file
    pub source: &'a Path,
    /// Root of the staging tree; part of the search path
    pub staging_root: &'a Path,
    /// Root of the output tree
    pub output_root: &'a Path,
    /// Exact path the artifact is expected at
    pub artifact: &'a Path,
    /// Library search path and extern crates
    pub classpath: &'a Classpath,
    /// Pinned language edition
    pub edition: &'a str,
    /// Extra arguments from configuration
    pub extra_args: &'a [String],
}

/// Result of one toolchain run
#[derive(Debug, Clone, Default)]
pub struct ToolchainOutput {
    /// Whether the process reported success
    pub success: bool,
    /// Exit code, if the process exited normally
    pub status: Option<i32>,
    /// Combined diagnostic output
    pub diagnostics: String,
}

/// A compiler the pool can drive
pub trait Toolchain: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    /// Check that the toolchain can run at all; returns its version string
    fn probe(&self) -> Result<String, CompileError>;

    /// Syntax of the source language
    fn syntax(&self) -> &SourceSyntax;

    /// Version [`probe`](Toolchain::probe) must report for the toolchain to be
    /// usable; `None` accepts any
    fn required_version(&self) -> Option<&str> {
        None
    }

    /// Extension of produced artifacts
    fn artifact_extension(&self) -> &str {
        std::env::consts::DLL_EXTENSION
    }

    /// Compile one source unit. An `Err` means the toolchain could not be
    /// invoked; a failed compilation is an `Ok` with `success == false`.
    fn compile(&self, invocation: &CompileInvocation<'_>) -> Result<ToolchainOutput, CompileError>;
}

/// `rustc` building one `cdylib` per source unit
#[derive(Debug, Clone)]
pub struct RustcToolchain {
    program: PathBuf,
    syntax: SourceSyntax,
    required_version: Option<String>,
}

impl RustcToolchain {
    /// Use an explicit compiler executable; it must be the host's compiler
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            syntax: SourceSyntax::rust(),
            required_version: Some(crate::HOST_RUSTC_VERSION.to_string()),
        }
    }

    /// Accept any compiler version
    pub fn any_version(mut self) -> Self {
        self.required_version = None;
        self
    }

    /// Use the configured program, or find `rustc` on `PATH`
    pub fn locate(config: &ToolchainConfig) -> Result<Self, CompileError> {
        let toolchain = match &config.program {
            Some(program) => Self::new(program),
            None => which::which("rustc").map(Self::new).map_err(|e| {
                CompileError::ToolchainUnavailable(format!("rustc not found: {}", e))
            })?,
        };
        Ok(if config.require_host_version {
            toolchain
        } else {
            toolchain.any_version()
        })
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    /// The deterministic argument list for one invocation
    pub fn arguments(&self, invocation: &CompileInvocation<'_>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--crate-type".into(),
            "cdylib".into(),
            "--edition".into(),
            invocation.edition.into(),
        ];

        for dir in invocation.classpath.dirs() {
            args.push("-L".into());
            args.push(dependency_arg(dir));
        }
        args.push("-L".into());
        args.push(dependency_arg(invocation.staging_root));

        for (crate_name, file) in invocation.classpath.externs() {
            let mut spec = OsString::from(crate_name);
            spec.push("=");
            spec.push(file);
            args.push("--extern".into());
            args.push(spec);
        }

        args.push("-o".into());
        args.push(invocation.artifact.into());
        args.extend(invocation.extra_args.iter().map(OsString::from));
        args.push(invocation.source.into());
        args
    }
}

fn dependency_arg(dir: &Path) -> OsString {
    let mut arg = OsString::from("dependency=");
    arg.push(dir);
    arg
}

impl Toolchain for RustcToolchain {
    fn name(&self) -> &str {
        "rustc"
    }

    fn probe(&self) -> Result<String, CompileError> {
        let output = Command::new(&self.program)
            .arg("--version")
            .output()
            .map_err(|e| {
                CompileError::ToolchainUnavailable(format!(
                    "failed to run {}: {}",
                    self.program.display(),
                    e
                ))
            })?;

        if !output.status.success() {
            return Err(CompileError::ToolchainUnavailable(format!(
                "{} --version exited with {}",
                self.program.display(),
                output.status
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn syntax(&self) -> &SourceSyntax {
        &self.syntax
    }

    fn required_version(&self) -> Option<&str> {
        self.required_version.as_deref()
    }

    fn compile(&self, invocation: &CompileInvocation<'_>) -> Result<ToolchainOutput, CompileError> {
        let args = self.arguments(invocation);
        debug!("{} {:?}", self.program.display(), args);

        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .map_err(|e| CompileError::Invocation {
                source_path: invocation.source.to_path_buf(),
                message: e.to_string(),
            })?;

        let mut diagnostics = String::from_utf8_lossy(&output.stderr).into_owned();
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            diagnostics.push_str(&stdout);
        }

        Ok(ToolchainOutput {
            success: output.status.success(),
            status: output.status.code(),
            diagnostics,
        })
    }
}
