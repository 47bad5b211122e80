//! Compilation classpath
//!
//! The set of library directories and extern crates every handler source is
//! compiled against. `hotcmd_kernel` is mandatory; a few common crates are
//! added when present; the handler document may import more.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::CompileError;

/// A library the classpath looks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryRequirement {
    pub crate_name: &'static str,
    pub required: bool,
}

impl LibraryRequirement {
    /// Setup fails without this library
    pub const fn required(crate_name: &'static str) -> Self {
        Self {
            crate_name,
            required: true,
        }
    }

    /// Bound when found, skipped otherwise
    pub const fn optional(crate_name: &'static str) -> Self {
        Self {
            crate_name,
            required: false,
        }
    }
}

/// Libraries probed on every classpath setup
pub const WELL_KNOWN_LIBRARIES: &[LibraryRequirement] = &[
    LibraryRequirement::required("hotcmd_kernel"),
    LibraryRequirement::optional("serde"),
    LibraryRequirement::optional("serde_json"),
    LibraryRequirement::optional("tracing"),
    LibraryRequirement::optional("parking_lot"),
];

/// Library search path plus extern crate bindings
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classpath {
    dirs: BTreeSet<PathBuf>,
    externs: BTreeMap<String, PathBuf>,
}

impl Classpath {
    /// Build the classpath for one reload.
    ///
    /// `search_paths` are scanned for well-known libraries. Each entry of
    /// `imports` is either a path (a directory joins the search path, an
    /// `.rlib` becomes an extern crate) or a crate name looked up in the
    /// search paths. Unresolvable optional entries are skipped with a warning.
    pub fn setup(search_paths: &[PathBuf], imports: &[String]) -> Result<Self, CompileError> {
        let mut classpath = Self::default();

        for library in WELL_KNOWN_LIBRARIES {
            match locate(library.crate_name, search_paths) {
                Some(file) => {
                    debug!("Classpath: {} -> {:?}", library.crate_name, file);
                    classpath.add_extern(library.crate_name, file);
                }
                None if library.required => {
                    return Err(CompileError::Classpath(format!(
                        "mandatory library {} not found in {:?}",
                        library.crate_name, search_paths
                    )));
                }
                None => debug!("Optional library {} not found", library.crate_name),
            }
        }

        for import in imports {
            let path = Path::new(import);
            if path.is_dir() {
                classpath.add_dir(path);
            } else if path.is_file() {
                match crate_name_of(path) {
                    Some(name) => classpath.add_extern(name, path),
                    None => warn!("Classpath import {:?} is not a library file", path),
                }
            } else {
                match locate(import, search_paths) {
                    Some(file) => classpath.add_extern(import.clone(), file),
                    None => warn!("Classpath import {} could not be resolved", import),
                }
            }
        }

        info!("Using classpath: {}", classpath.render());
        Ok(classpath)
    }

    /// The executable's directory and its `deps/` subdirectory
    pub fn default_search_paths() -> Vec<PathBuf> {
        let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        else {
            return Vec::new();
        };
        let deps = dir.join("deps");
        vec![dir, deps]
    }

    pub fn add_dir(&mut self, dir: impl Into<PathBuf>) {
        self.dirs.insert(dir.into());
    }

    /// Bind a crate name to a library file; its directory joins the search path
    pub fn add_extern(&mut self, crate_name: impl Into<String>, file: impl Into<PathBuf>) {
        let file = file.into();
        if let Some(parent) = file.parent() {
            if !parent.as_os_str().is_empty() {
                self.dirs.insert(parent.to_path_buf());
            }
        }
        self.externs.insert(crate_name.into(), file);
    }

    pub fn dirs(&self) -> impl Iterator<Item = &Path> {
        self.dirs.iter().map(PathBuf::as_path)
    }

    pub fn externs(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.externs.iter().map(|(k, v)| (k.as_str(), v.as_path()))
    }

    pub fn has_extern(&self, crate_name: &str) -> bool {
        self.externs.contains_key(crate_name)
    }

    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.externs.is_empty()
    }

    /// Single-line rendering for logs
    pub fn render(&self) -> String {
        let dirs = std::env::join_paths(&self.dirs)
            .map(|joined| joined.to_string_lossy().into_owned())
            .unwrap_or_default();
        let externs: Vec<String> = self
            .externs
            .iter()
            .map(|(name, file)| format!("{}={}", name, file.display()))
            .collect();
        format!("[{}] {}", dirs, externs.join(" "))
    }
}

/// Crate name of a library file: `libfoo_bar-1a2b.rlib` -> `foo_bar`
fn crate_name_of(file: &Path) -> Option<String> {
    if file.extension().and_then(|e| e.to_str()) != Some("rlib") {
        return None;
    }
    let stem = file.file_stem()?.to_str()?;
    let stem = stem.strip_prefix("lib").unwrap_or(stem);
    let name = stem.split('-').next().unwrap_or(stem);
    (!name.is_empty()).then(|| name.to_string())
}

/// Find `lib<crate>.rlib` or `lib<crate>-<hash>.rlib`; the newest file wins
fn locate(crate_name: &str, search_paths: &[PathBuf]) -> Option<PathBuf> {
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;

    for dir in search_paths {
        let Ok(entries) = std::fs::read_dir(dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if crate_name_of(&path).as_deref() != Some(crate_name) {
                continue;
            }
            let modified = entry
                .metadata()
                .and_then(|m| m.modified())
                .unwrap_or(std::time::UNIX_EPOCH);
            let newer = match &best {
                Some((time, current)) => modified > *time || (modified == *time && path > *current),
                None => true,
            };
            if newer {
                best = Some((modified, path));
            }
        }
    }

    best.map(|(_, path)| path)
}
