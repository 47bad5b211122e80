//! Dynamic artifact loader
//!
//! Opens compiled handler libraries and pulls their exported [`HandlerType`]
//! out. A loaded library stays mapped for as long as any
//! [`Arc<dyn LoadedArtifact>`](LoadedArtifact) to it is alive.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use hotcmd_kernel::{API_VERSION, API_VERSION_SYMBOL, HANDLER_TYPE_SYMBOL, HandlerType};
use libloading::{Library, Symbol};
use tracing::{debug, info};

use crate::load_unit::LoadUnitError;

/// A loaded artifact exposing one handler type
pub trait LoadedArtifact: Send + Sync {
    /// Path the artifact was loaded from
    fn path(&self) -> &Path;

    /// The handler type the artifact exports
    fn handler_type(&self) -> Arc<dyn HandlerType>;
}

/// Turns artifact files into [`LoadedArtifact`]s
pub trait ArtifactLoader: Send + Sync {
    /// Extension of the files this loader understands
    fn artifact_extension(&self) -> &str {
        std::env::consts::DLL_EXTENSION
    }

    fn load(&self, path: &Path) -> Result<Arc<dyn LoadedArtifact>, LoadUnitError>;
}

/// A handler library opened with `libloading`
pub struct DylibArtifact {
    // Must drop before `library`: its vtable lives in the library.
    handler_type: Arc<dyn HandlerType>,
    path: PathBuf,
    loaded_at: Instant,
    library: Library,
}

impl DylibArtifact {
    pub fn loaded_at(&self) -> Instant {
        self.loaded_at
    }

    pub fn library(&self) -> &Library {
        &self.library
    }
}

impl LoadedArtifact for DylibArtifact {
    fn path(&self) -> &Path {
        &self.path
    }

    fn handler_type(&self) -> Arc<dyn HandlerType> {
        self.handler_type.clone()
    }
}

impl Drop for DylibArtifact {
    fn drop(&mut self) {
        debug!("Unloading handler library: {:?}", self.path);
    }
}

/// Loads `cdylib` artifacts exporting the symbols of `declare_handler!`
///
/// Artifacts must be built by the same compiler version as the host and
/// against the same `hotcmd_kernel`; the API version check catches the latter.
#[derive(Debug, Clone)]
pub struct DylibLoader {
    api_version: u32,
}

impl DylibLoader {
    pub fn new() -> Self {
        Self {
            api_version: API_VERSION,
        }
    }
}

impl Default for DylibLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ArtifactLoader for DylibLoader {
    fn load(&self, path: &Path) -> Result<Arc<dyn LoadedArtifact>, LoadUnitError> {
        info!("Loading handler library: {:?}", path);

        let library = unsafe { Library::new(path) }.map_err(|e| LoadUnitError::Open {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let api_version = unsafe {
            let version_fn: Symbol<unsafe extern "C" fn() -> u32> =
                library.get(API_VERSION_SYMBOL).map_err(|e| {
                    LoadUnitError::SymbolNotFound(format!("_hotcmd_api_version: {}", e))
                })?;
            version_fn()
        };
        if api_version != self.api_version {
            return Err(LoadUnitError::VersionMismatch {
                expected: self.api_version,
                actual: api_version,
            });
        }

        let handler_type: Arc<dyn HandlerType> = unsafe {
            let type_fn: Symbol<unsafe extern "C" fn() -> *mut dyn HandlerType> =
                library.get(HANDLER_TYPE_SYMBOL).map_err(|e| {
                    LoadUnitError::SymbolNotFound(format!("_hotcmd_handler_type: {}", e))
                })?;
            let raw = type_fn();
            if raw.is_null() {
                return Err(LoadUnitError::Open {
                    path: path.to_path_buf(),
                    message: "handler type export returned null".to_string(),
                });
            }
            Arc::from(Box::from_raw(raw))
        };

        debug!(
            "Loaded handler type {} from {:?}",
            handler_type.type_name(),
            path
        );
        Ok(Arc::new(DylibArtifact {
            handler_type,
            path: path.to_path_buf(),
            loaded_at: Instant::now(),
            library,
        }))
    }
}
