//! Runtime settings
//!
//! Settings that shape the reload pipeline itself: where sources and the
//! handler document live, how the toolchain is invoked, how long compilation
//! may take. Loaded from a file through the `config` crate, with
//! `HOTCMD__<FIELD>` environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

/// Configuration errors
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(String),

    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}

/// How the external compiler is invoked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Compiler executable; located on `PATH` when unset
    pub program: Option<PathBuf>,
    /// Language edition, pinned to the edition the host is built with
    pub edition: String,
    /// Extra arguments appended before the source path
    pub extra_args: Vec<String>,
    /// Refuse a compiler whose version differs from the one that built the host
    pub require_host_version: bool,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            program: None,
            edition: crate::HOST_EDITION.to_string(),
            extra_args: Vec::new(),
            require_host_version: true,
        }
    }
}

/// Settings of the reload runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommanderConfig {
    /// Directory holding the handler document and the source directory
    pub data_dir: PathBuf,
    /// Name of the source directory inside `data_dir`
    pub sources_dir_name: String,
    /// Name of the handler document inside `data_dir`
    pub handlers_file: String,
    /// Root segment of every generation namespace
    pub namespace_root: String,
    /// Reserved name of the management command; also the dispatcher namespace
    pub command_name: String,
    /// Upper bound on waiting for compiler workers, in seconds
    pub compile_timeout_secs: u64,
    /// Worker count override; defaults to `max(4, available parallelism)`
    pub compiler_threads: Option<usize>,
    /// Toolchain invocation
    pub toolchain: ToolchainConfig,
    /// Directories searched for library crates when building the classpath
    pub library_paths: Vec<PathBuf>,
    /// Reload automatically when the source directory changes
    pub auto_reload: bool,
    /// Quiet period before an automatic reload, in milliseconds
    pub watch_debounce_ms: u64,
}

impl Default for CommanderConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("hotcmd"),
            sources_dir_name: "sources".to_string(),
            handlers_file: "handlers.yml".to_string(),
            namespace_root: "hotcmd".to_string(),
            command_name: "hotcmd".to_string(),
            compile_timeout_secs: 300,
            compiler_threads: None,
            toolchain: ToolchainConfig::default(),
            library_paths: Vec::new(),
            auto_reload: false,
            watch_debounce_ms: 500,
        }
    }
}

impl CommanderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load settings from a file (format detected from its extension),
    /// applying `HOTCMD__*` environment overrides on top.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("config file not found: {}", path.display()),
            )));
        }

        let settings: Self = Config::builder()
            .add_source(File::from(path))
            .add_source(Environment::with_prefix("HOTCMD").separator("__"))
            .build()
            .map_err(|e| ConfigError::Parse(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError::Parse(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings the pipeline cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace_root.is_empty()
            || !self
                .namespace_root
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(ConfigError::InvalidValue(format!(
                "namespace_root must be a non-empty identifier, got {:?}",
                self.namespace_root
            )));
        }
        if self.command_name.is_empty() {
            return Err(ConfigError::InvalidValue(
                "command_name must not be empty".to_string(),
            ));
        }
        if self.compiler_threads == Some(0) {
            return Err(ConfigError::InvalidValue(
                "compiler_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_namespace_root(mut self, root: impl Into<String>) -> Self {
        self.namespace_root = root.into();
        self
    }

    pub fn with_command_name(mut self, name: impl Into<String>) -> Self {
        self.command_name = name.into();
        self
    }

    pub fn with_compile_timeout(mut self, timeout: Duration) -> Self {
        self.compile_timeout_secs = timeout.as_secs();
        self
    }

    pub fn with_compiler_threads(mut self, threads: usize) -> Self {
        self.compiler_threads = Some(threads);
        self
    }

    pub fn with_toolchain(mut self, toolchain: ToolchainConfig) -> Self {
        self.toolchain = toolchain;
        self
    }

    pub fn with_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.library_paths.push(path.into());
        self
    }

    pub fn with_auto_reload(mut self, enabled: bool) -> Self {
        self.auto_reload = enabled;
        self
    }

    /// Directory the handler sources are read from
    pub fn source_dir(&self) -> PathBuf {
        self.data_dir.join(&self.sources_dir_name)
    }

    /// Path of the declarative handler document
    pub fn handlers_path(&self) -> PathBuf {
        self.data_dir.join(&self.handlers_file)
    }

    pub fn compile_timeout(&self) -> Duration {
        Duration::from_secs(self.compile_timeout_secs)
    }

    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    /// Number of compiler workers
    pub fn worker_count(&self) -> usize {
        self.compiler_threads.unwrap_or_else(|| {
            let available = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
            available.max(4)
        })
    }
}
