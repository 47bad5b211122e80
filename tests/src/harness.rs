use std::path::PathBuf;
use std::sync::Arc;

use hotcmd_runtime::{
    CommanderConfig, NamespaceAllocator, ReloadError, Reloader, ReloaderParts, TokioContexts,
};
use tempfile::TempDir;

use crate::dispatcher::MockDispatcher;
use crate::host::{MockApplication, MockExtension};
use crate::toolchain::{MockLoader, MockToolchain};

/// Owner name the harness extension registers listeners under
pub const EXTENSION_NAME: &str = "hotcmd-test";

/// A data directory, a mock host and mock compilation, wired together
pub struct TestHost {
    pub dir: TempDir,
    pub config: CommanderConfig,
    pub dispatcher: Arc<MockDispatcher>,
    pub application: Arc<MockApplication>,
    pub toolchain: Arc<MockToolchain>,
    pub loader: Arc<MockLoader>,
}

impl TestHost {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let libs = dir.path().join("libs");
        std::fs::create_dir_all(&libs).expect("libs dir");
        std::fs::write(libs.join("libhotcmd_kernel-fixture.rlib"), b"").expect("kernel fixture");

        let data_dir = dir.path().join("data");
        let config = CommanderConfig::new()
            .with_data_dir(&data_dir)
            .with_library_path(libs)
            .with_compiler_threads(2);

        let dispatcher = MockDispatcher::new();
        let application = MockApplication::new(
            MockExtension::new(EXTENSION_NAME, data_dir),
            dispatcher.clone(),
        );

        Self {
            dir,
            config,
            dispatcher,
            application,
            toolchain: MockToolchain::new(),
            loader: MockLoader::new(),
        }
    }

    pub fn source_dir(&self) -> PathBuf {
        self.config.source_dir()
    }

    /// Write a handler source into the source directory
    pub fn write_source(&self, file_name: &str, content: &str) {
        let dir = self.source_dir();
        std::fs::create_dir_all(&dir).expect("source dir");
        std::fs::write(dir.join(file_name), content).expect("source file");
    }

    pub fn remove_source(&self, file_name: &str) {
        std::fs::remove_file(self.source_dir().join(file_name)).expect("remove source");
    }

    /// Replace the handler document
    pub fn write_document(&self, yaml: &str) {
        let path = self.config.handlers_path();
        std::fs::create_dir_all(path.parent().expect("document parent")).expect("data dir");
        std::fs::write(path, yaml).expect("handler document");
    }

    pub fn parts(&self) -> ReloaderParts {
        let contexts = Arc::new(TokioContexts::new().expect("tokio runtime"));
        ReloaderParts::new(self.config.clone(), self.application.clone(), contexts)
            .with_toolchain(self.toolchain.clone())
            .with_loader(self.loader.clone())
            .with_allocator(NamespaceAllocator::with_seed(
                self.config.namespace_root.clone(),
                1,
            ))
    }

    /// Build a reloader; must be called inside a tokio runtime
    pub fn reloader(&self) -> Result<Reloader, ReloadError> {
        Reloader::new(self.parts())
    }
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}
