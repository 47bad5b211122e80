//! Source staging
//!
//! Copies every handler source into a generation-scoped staging tree and
//! rewrites its namespace declaration to the generation's namespace, keeping
//! line numbers intact for compiler diagnostics.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info};

use crate::namespace::Generation;

/// Staging errors
#[derive(Debug, thiserror::Error)]
pub enum StagingError {
    #[error("Failed to read source directory {path:?}: {source}")]
    SourceDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create staging directory {path:?}: {source}")]
    StagingDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to stage {from:?} -> {to:?}: {source}")]
    File {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

/// How a source language declares its namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSyntax {
    /// Extension of source files, without the dot
    pub extension: String,
    /// Text a namespace declaration starts with
    pub declaration_prefix: String,
    /// Character that ends a namespace declaration
    pub declaration_terminator: char,
    /// Declaration template; `{ident}` and `{namespace}` are substituted
    pub declaration_template: String,
}

impl SourceSyntax {
    /// Rust sources: the namespace is the crate-level `crate_name` attribute
    pub fn rust() -> Self {
        Self {
            extension: "rs".to_string(),
            declaration_prefix: "#![crate_name".to_string(),
            declaration_terminator: ']',
            declaration_template: "#![crate_name = \"{ident}\"]".to_string(),
        }
    }

    /// Render the declaration for a generation
    pub fn declaration(&self, generation: &Generation) -> String {
        self.declaration_template
            .replace("{ident}", &generation.ident())
            .replace("{namespace}", generation.namespace())
    }

    /// Is this path a source file?
    pub fn is_source(&self, path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()) == Some(self.extension.as_str())
    }
}

impl Default for SourceSyntax {
    fn default() -> Self {
        Self::rust()
    }
}

/// A handler source staged for one generation
#[derive(Debug, Clone)]
pub struct SourceUnit {
    /// Declared handler type name (the file stem)
    pub type_name: String,
    /// Original file in the source directory
    pub source_path: PathBuf,
    /// Rewritten copy in the staging tree
    pub staged_path: PathBuf,
    /// Rewritten source text
    pub source: String,
}

/// Replace a leading namespace declaration with `declaration`.
///
/// The old declaration is stripped up to and including its terminator, together
/// with the blank lines right after it. The new declaration is followed by the
/// same number of line breaks, so every remaining line keeps its number.
/// Sources without a declaration get one prepended on their first line.
pub fn rewrite_namespace(source: &str, syntax: &SourceSyntax, declaration: &str) -> String {
    let mut body = source;
    let mut stripped_lines = 0usize;

    if body.starts_with(syntax.declaration_prefix.as_str()) {
        if let Some(end) = body.find(syntax.declaration_terminator) {
            body = &body[end + syntax.declaration_terminator.len_utf8()..];
            loop {
                if let Some(rest) = body.strip_prefix("\r\n") {
                    body = rest;
                } else if let Some(rest) = body.strip_prefix('\n') {
                    body = rest;
                } else {
                    break;
                }
                stripped_lines += 1;
            }
        }
    }

    let mut rewritten = String::with_capacity(declaration.len() + stripped_lines + body.len());
    rewritten.push_str(declaration);
    for _ in 0..stripped_lines {
        rewritten.push('\n');
    }
    rewritten.push_str(body);
    rewritten
}

/// Stage every file of `source_dir` under `staging_root/<namespace path>`.
///
/// Source files are rewritten, other files are copied as-is. A file that
/// cannot be read or written is logged and skipped.
pub fn stage(
    generation: &Generation,
    source_dir: &Path,
    staging_root: &Path,
    syntax: &SourceSyntax,
) -> Result<Vec<SourceUnit>, StagingError> {
    let target_dir = staging_root.join(generation.relative_dir());
    fs::create_dir_all(&target_dir).map_err(|source| StagingError::StagingDir {
        path: target_dir.clone(),
        source,
    })?;

    let mut entries: Vec<PathBuf> = fs::read_dir(source_dir)
        .map_err(|source| StagingError::SourceDir {
            path: source_dir.to_path_buf(),
            source,
        })?
        .flatten()
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    let declaration = syntax.declaration(generation);
    let mut units = Vec::new();

    for source_path in entries {
        if !source_path.is_file() {
            debug!("Skipping non-file entry {:?}", source_path);
            continue;
        }
        let Some(file_name) = source_path.file_name() else {
            continue;
        };
        let target_path = target_dir.join(file_name);

        let staged = if syntax.is_source(&source_path) {
            stage_source(&source_path, &target_path, syntax, &declaration).map(Some)
        } else {
            fs::copy(&source_path, &target_path)
                .map(|_| None)
                .map_err(|source| StagingError::File {
                    from: source_path.clone(),
                    to: target_path.clone(),
                    source,
                })
        };

        match staged {
            Ok(Some(unit)) => {
                debug!("Staged {:?} -> {:?}", unit.source_path, unit.staged_path);
                units.push(unit);
            }
            Ok(None) => debug!("Copied {:?} -> {:?}", source_path, target_path),
            Err(e) => error!("{}", e),
        }
    }

    info!(
        "Staged {} source unit(s) for generation {}",
        units.len(),
        generation
    );
    Ok(units)
}

fn stage_source(
    source_path: &Path,
    target_path: &Path,
    syntax: &SourceSyntax,
    declaration: &str,
) -> Result<SourceUnit, StagingError> {
    let file_error = |source| StagingError::File {
        from: source_path.to_path_buf(),
        to: target_path.to_path_buf(),
        source,
    };

    let original = fs::read_to_string(source_path).map_err(file_error)?;
    let rewritten = rewrite_namespace(&original, syntax, declaration);
    fs::write(target_path, &rewritten).map_err(file_error)?;

    let type_name = source_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();

    Ok(SourceUnit {
        type_name,
        source_path: source_path.to_path_buf(),
        staged_path: target_path.to_path_buf(),
        source: rewritten,
    })
}
