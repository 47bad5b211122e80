//! Generation-scoped load units
//!
//! A [`LoadUnit`] resolves qualified type names of exactly one generation. It
//! asks its parent scope first (types the host itself provides) and only then
//! loads the generation's own artifacts, lazily, on first request.
//!
//! Releasing a unit invalidates further resolution and deletes its output
//! tree. Types and handlers already resolved keep their artifact alive
//! through [`ResolvedType`] and the instances built from it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use hotcmd_kernel::HandlerType;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::loader::{ArtifactLoader, LoadedArtifact};
use crate::namespace::Generation;

/// Load unit errors
#[derive(Debug, thiserror::Error)]
pub enum LoadUnitError {
    #[error("Type not found: {0}")]
    NotFound(String),

    #[error("Load unit of {generation} has been released")]
    Released { generation: String },

    #[error("Failed to open {path:?}: {message}")]
    Open { path: PathBuf, message: String },

    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("API version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("Artifact for {expected} exports type {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A scope that may provide types before a load unit looks at its artifacts
pub trait TypeScope: Send + Sync {
    fn resolve_type(&self, qualified_name: &str) -> Option<Arc<dyn HandlerType>>;
}

/// Handler types compiled into the host itself
#[derive(Default)]
pub struct BuiltinTypes {
    types: RwLock<HashMap<String, Arc<dyn HandlerType>>>,
}

impl BuiltinTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type under its fully qualified name
    pub fn register(&self, qualified_name: impl Into<String>, handler_type: Arc<dyn HandlerType>) {
        self.types.write().insert(qualified_name.into(), handler_type);
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.read().is_empty()
    }
}

impl TypeScope for BuiltinTypes {
    fn resolve_type(&self, qualified_name: &str) -> Option<Arc<dyn HandlerType>> {
        self.types.read().get(qualified_name).cloned()
    }
}

/// A resolved handler type
pub struct ResolvedType {
    // Dropped before `origin`.
    handler_type: Arc<dyn HandlerType>,
    qualified_name: String,
    origin: Option<Arc<dyn LoadedArtifact>>,
}

impl ResolvedType {
    /// A type that does not come from a loaded artifact
    pub fn builtin(qualified_name: impl Into<String>, handler_type: Arc<dyn HandlerType>) -> Self {
        Self {
            handler_type,
            qualified_name: qualified_name.into(),
            origin: None,
        }
    }

    pub fn handler_type(&self) -> &Arc<dyn HandlerType> {
        &self.handler_type
    }

    pub fn qualified_name(&self) -> &str {
        &self.qualified_name
    }

    /// The artifact the type was loaded from; `None` for parent-scope types
    pub fn origin(&self) -> Option<&Arc<dyn LoadedArtifact>> {
        self.origin.as_ref()
    }

    pub(crate) fn into_parts(self) -> (Arc<dyn HandlerType>, Option<Arc<dyn LoadedArtifact>>) {
        (self.handler_type, self.origin)
    }
}

/// Loads the compiled types of one generation
pub struct LoadUnit {
    generation: Generation,
    root: PathBuf,
    loader: Arc<dyn ArtifactLoader>,
    parent: Option<Arc<dyn TypeScope>>,
    /// Simple type name -> artifact path; `None` once released
    index: RwLock<Option<HashMap<String, PathBuf>>>,
    loaded: Mutex<HashMap<String, Arc<dyn LoadedArtifact>>>,
}

impl LoadUnit {
    /// Open the output tree of `generation` rooted at `output_root`
    pub fn open(
        generation: Generation,
        output_root: &Path,
        loader: Arc<dyn ArtifactLoader>,
        parent: Option<Arc<dyn TypeScope>>,
    ) -> Result<Self, LoadUnitError> {
        if !output_root.is_dir() {
            return Err(LoadUnitError::Open {
                path: output_root.to_path_buf(),
                message: "output root is not a directory".to_string(),
            });
        }

        let mut index = HashMap::new();
        let artifact_dir = output_root.join(generation.relative_dir());
        match std::fs::read_dir(&artifact_dir) {
            Ok(entries) => {
                for path in entries.flatten().map(|e| e.path()) {
                    let extension = path.extension().and_then(|e| e.to_str());
                    if extension != Some(loader.artifact_extension()) {
                        continue;
                    }
                    if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                        index.insert(stem.to_string(), path.clone());
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No artifacts for {} in {:?}", generation, output_root);
            }
            Err(e) => return Err(e.into()),
        }

        info!("Opened load unit for {} with {} artifact(s)", generation, index.len());
        Ok(Self {
            generation,
            root: output_root.to_path_buf(),
            loader,
            parent,
            index: RwLock::new(Some(index)),
            loaded: Mutex::new(HashMap::new()),
        })
    }

    pub fn generation(&self) -> &Generation {
        &self.generation
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_released(&self) -> bool {
        self.index.read().is_none()
    }

    /// Simple names of the types this unit can load, sorted
    pub fn type_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .index
            .read()
            .as_ref()
            .map(|index| index.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    /// Resolve a qualified type name: parent scope first, then this
    /// generation's artifacts.
    pub fn resolve(&self, qualified_name: &str) -> Result<ResolvedType, LoadUnitError> {
        let path = {
            let index = self.index.read();
            let Some(index) = index.as_ref() else {
                return Err(LoadUnitError::Released {
                    generation: self.generation.to_string(),
                });
            };

            if let Some(handler_type) = self
                .parent
                .as_ref()
                .and_then(|parent| parent.resolve_type(qualified_name))
            {
                return Ok(ResolvedType::builtin(qualified_name, handler_type));
            }

            let simple = self
                .generation
                .simple_name(qualified_name)
                .ok_or_else(|| LoadUnitError::NotFound(qualified_name.to_string()))?;
            index
                .get(simple)
                .cloned()
                .ok_or_else(|| LoadUnitError::NotFound(qualified_name.to_string()))?
        };

        let simple = self
            .generation
            .simple_name(qualified_name)
            .unwrap_or(qualified_name);

        let artifact = {
            let mut loaded = self.loaded.lock();
            match loaded.get(simple) {
                Some(artifact) => artifact.clone(),
                None => {
                    let artifact = self.loader.load(&path)?;
                    loaded.insert(simple.to_string(), artifact.clone());
                    artifact
                }
            }
        };

        let handler_type = artifact.handler_type();
        if handler_type.type_name() != simple {
            return Err(LoadUnitError::TypeMismatch {
                expected: simple.to_string(),
                actual: handler_type.type_name().to_string(),
            });
        }

        Ok(ResolvedType {
            handler_type,
            qualified_name: qualified_name.to_string(),
            origin: Some(artifact),
        })
    }

    /// Stop resolving and delete the output tree. Calling it again is a no-op.
    pub fn release(&self) -> Result<(), LoadUnitError> {
        if self.index.write().take().is_none() {
            return Ok(());
        }
        let dropped = {
            let mut loaded = self.loaded.lock();
            let count = loaded.len();
            loaded.clear();
            count
        };

        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!("Failed to delete output tree {:?}: {}", self.root, e);
                return Err(e.into());
            }
        }

        info!(
            "Released load unit of {} ({} loaded artifact(s))",
            self.generation, dropped
        );
        Ok(())
    }
}

impl Drop for LoadUnit {
    fn drop(&mut self) {
        debug!("Dropping load unit of {}", self.generation);
    }
}
