//! Parallel compilation of a staged source tree
//!
//! [`CompilerPool::compile_all`] walks the staging tree, mirrors its
//! directories into a fresh output tree, copies non-source files verbatim and
//! compiles every source file into its own artifact. The first source is
//! compiled on the calling thread to warm the toolchain; the rest are handed
//! to a pool of named worker threads.

mod classpath;
mod toolchain;

pub use classpath::{Classpath, LibraryRequirement, WELL_KNOWN_LIBRARIES};
pub use toolchain::{CompileInvocation, RustcToolchain, Toolchain, ToolchainOutput};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::RecvTimeoutError;
use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::config::CommanderConfig;

/// Compilation errors
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error("Toolchain unavailable: {0}")]
    ToolchainUnavailable(String),

    #[error("Failed to invoke toolchain for {source_path:?}: {message}")]
    Invocation { source_path: PathBuf, message: String },

    #[error("Compilation of {relative:?} failed")]
    Failed { relative: PathBuf },

    #[error("Compiler produced no artifact at {relative:?}")]
    MissingArtifact { relative: PathBuf },

    #[error("Classpath error: {0}")]
    Classpath(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of compiling one staging tree
#[derive(Debug)]
pub struct CompileOutcome {
    output: TempDir,
    compiled: Vec<PathBuf>,
    failed: Vec<PathBuf>,
    timed_out: bool,
}

impl CompileOutcome {
    /// Root of the output tree
    pub fn root(&self) -> &Path {
        self.output.path()
    }

    /// Artifacts produced, relative to [`root`](Self::root)
    pub fn compiled(&self) -> &[PathBuf] {
        &self.compiled
    }

    /// Sources that failed, relative to the staging root
    pub fn failed(&self) -> &[PathBuf] {
        &self.failed
    }

    /// Whether workers were still running when the deadline passed
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Take ownership of the output directory; it is deleted when dropped
    pub fn into_root(self) -> TempDir {
        self.output
    }
}

/// Drives a [`Toolchain`] over a whole staging tree
pub struct CompilerPool {
    toolchain: Arc<dyn Toolchain>,
    workers: usize,
    timeout: Duration,
    edition: String,
    extra_args: Vec<String>,
}

impl CompilerPool {
    pub fn new(toolchain: Arc<dyn Toolchain>, settings: &CommanderConfig) -> Self {
        Self {
            toolchain,
            workers: settings.worker_count(),
            timeout: settings.compile_timeout(),
            edition: settings.toolchain.edition.clone(),
            extra_args: settings.toolchain.extra_args.clone(),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Compile every source under `staging_root` into a new output tree.
    ///
    /// With `ignore_errors` a failing unit is logged and skipped. Without it
    /// the first failure stops new work from starting and is returned once
    /// in-flight units have finished. Waiting is bounded by the configured
    /// timeout; units still running then are abandoned with a warning.
    pub fn compile_all(
        &self,
        staging_root: &Path,
        classpath: &Classpath,
        ignore_errors: bool,
    ) -> Result<CompileOutcome, CompileError> {
        let output = tempfile::Builder::new().prefix("hotcmd-out-").tempdir()?;
        let batch = Arc::new(Batch {
            toolchain: self.toolchain.clone(),
            staging_root: staging_root.to_path_buf(),
            output_root: output.path().to_path_buf(),
            classpath: classpath.clone(),
            edition: self.edition.clone(),
            extra_args: self.extra_args.clone(),
            ignore_errors,
            first_error: Mutex::new(None),
            results: Mutex::new(BatchResults::default()),
        });

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<PathBuf>();
        let (done_tx, done_rx) = crossbeam_channel::unbounded::<()>();

        let mut spawned = 0;
        for i in 0..self.workers {
            let batch = batch.clone();
            let jobs = job_rx.clone();
            let signal = DoneSignal(done_tx.clone());
            std::thread::Builder::new()
                .name(format!("hotcmd-compiler-{}", i))
                .spawn(move || {
                    let _signal = signal;
                    for source in jobs.iter() {
                        if batch.should_stop() {
                            continue;
                        }
                        batch.compile_unit(&source);
                    }
                })?;
            spawned += 1;
        }
        drop(job_rx);
        drop(done_tx);

        let mut first = true;
        for entry in WalkDir::new(staging_root).min_depth(1).sort_by_file_name() {
            if batch.should_stop() {
                break;
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Failed to walk staging tree: {}", e);
                    continue;
                }
            };
            let Ok(relative) = entry.path().strip_prefix(staging_root) else {
                continue;
            };
            let target = batch.output_root.join(relative);

            if entry.file_type().is_dir() {
                match std::fs::create_dir_all(&target) {
                    Ok(()) => debug!("Created directory {:?}", target),
                    Err(e) => warn!("Failed to create directory {:?}: {}", target, e),
                }
            } else if self.toolchain.syntax().is_source(entry.path()) {
                if first {
                    first = false;
                    batch.compile_unit(entry.path());
                } else if job_tx.send(entry.path().to_path_buf()).is_err() {
                    warn!("No compiler worker available for {:?}", relative);
                }
            } else {
                match std::fs::copy(entry.path(), &target) {
                    Ok(_) => debug!("Copied {:?}", relative),
                    Err(e) => warn!("Failed to copy {:?}: {}", relative, e),
                }
            }
        }
        drop(job_tx);

        let deadline = Instant::now() + self.timeout;
        let mut finished = 0;
        let mut timed_out = false;
        while finished < spawned {
            match done_rx.recv_deadline(deadline) {
                Ok(()) => finished += 1,
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Timed out compilation. Some files may be missing.");
                    timed_out = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        if let Some(e) = batch.first_error.lock().take() {
            return Err(e);
        }

        let (mut compiled, mut failed) = {
            let mut results = batch.results.lock();
            (
                std::mem::take(&mut results.compiled),
                std::mem::take(&mut results.failed),
            )
        };
        compiled.sort();
        failed.sort();
        info!(
            "Compiled {} unit(s), {} failed{}",
            compiled.len(),
            failed.len(),
            if timed_out { ", timed out" } else { "" }
        );

        Ok(CompileOutcome {
            output,
            compiled,
            failed,
            timed_out,
        })
    }
}

#[derive(Default)]
struct BatchResults {
    compiled: Vec<PathBuf>,
    failed: Vec<PathBuf>,
}

/// State shared by the calling thread and the workers of one `compile_all`
struct Batch {
    toolchain: Arc<dyn Toolchain>,
    staging_root: PathBuf,
    output_root: PathBuf,
    classpath: Classpath,
    edition: String,
    extra_args: Vec<String>,
    ignore_errors: bool,
    first_error: Mutex<Option<CompileError>>,
    results: Mutex<BatchResults>,
}

impl Batch {
    fn should_stop(&self) -> bool {
        !self.ignore_errors && self.first_error.lock().is_some()
    }

    fn compile_unit(&self, source: &Path) {
        let relative = source
            .strip_prefix(&self.staging_root)
            .unwrap_or(source)
            .to_path_buf();
        let artifact_relative = relative.with_extension(self.toolchain.artifact_extension());
        let artifact = self.output_root.join(&artifact_relative);

        debug!("Compiling: {}", relative.display());
        let invocation = CompileInvocation {
            source,
            staging_root: &self.staging_root,
            output_root: &self.output_root,
            artifact: &artifact,
            classpath: &self.classpath,
            edition: &self.edition,
            extra_args: &self.extra_args,
        };

        let output = match self.toolchain.compile(&invocation) {
            Ok(output) => output,
            Err(e) => return self.fail(relative, e),
        };

        let diagnostics = output.diagnostics.trim_end();
        if !diagnostics.is_empty() {
            warn!(
                target: "hotcmd::compiler",
                "Compiler output for {}:\n{}",
                relative.display(),
                diagnostics
            );
        }

        if !output.success {
            warn!(
                "Compiler (for file {}) exited with code: {:?}",
                relative.display(),
                output.status
            );
            let e = CompileError::Failed {
                relative: relative.clone(),
            };
            return self.fail(relative, e);
        }

        if !artifact.is_file() {
            let e = CompileError::MissingArtifact {
                relative: artifact_relative,
            };
            return self.fail(relative, e);
        }

        info!("Compiled {:?} -> {:?}", relative, artifact_relative);
        self.results.lock().compiled.push(artifact_relative);
    }

    fn fail(&self, relative: PathBuf, e: CompileError) {
        error!("Failed to compile: {} ({})", relative.display(), e);
        self.results.lock().failed.push(relative);
        if !self.ignore_errors {
            self.first_error.lock().get_or_insert(e);
        }
    }
}

/// Signals worker exit, including exit by panic
struct DoneSignal(crossbeam_channel::Sender<()>);

impl Drop for DoneSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}
