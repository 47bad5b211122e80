//! The declarative handler document
//!
//! ```yaml
//! classpath-imports: []
//! listeners:
//!   - WelcomeListener
//! commands:
//!   ping:
//!     class: PingCommand
//!     permission: hotcmd.ping
//!     permissionMessage: You may not ping.
//!     description: Replies with pong
//!     usage: /ping [name]
//!     aliases: [p]
//! ```
//!
//! Command order follows the key order of the document.

use std::path::Path;

use hotcmd_kernel::CommandDescriptor;
use serde::Deserialize;
use tracing::{debug, warn};

/// Handler document errors
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Handler document parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Handler definitions read from the handler document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerDocument {
    /// Additional classpath entries (paths or crate names)
    pub classpath_imports: Vec<String>,
    /// Listener type names
    pub listeners: Vec<String>,
    /// Command definitions, in document order
    pub commands: Vec<CommandDescriptor>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawDocument {
    #[serde(rename = "classpath-imports")]
    classpath_imports: Option<Vec<String>>,
    listeners: Option<Vec<String>>,
    commands: Option<serde_yaml::Mapping>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RawCommand {
    class: Option<String>,
    permission: Option<String>,
    permission_message: Option<String>,
    description: Option<String>,
    usage: Option<String>,
    aliases: Option<Vec<String>>,
}

impl HandlerDocument {
    /// Parse a document. Missing optional fields default to empty; command
    /// entries that are not mappings or have no `class` are skipped.
    pub fn parse(content: &str) -> Result<Self, DocumentError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let raw: RawDocument = serde_yaml::from_str(content)?;

        let mut commands = Vec::new();
        for (key, value) in raw.commands.unwrap_or_default() {
            let Some(key) = key.as_str() else {
                warn!("Skipping command with non-string key: {:?}", key);
                continue;
            };
            if !value.is_mapping() {
                warn!("Skipping command {}: definition is not a mapping", key);
                continue;
            }
            let command: RawCommand = match serde_yaml::from_value(value) {
                Ok(command) => command,
                Err(e) => {
                    warn!("Skipping command {}: {}", key, e);
                    continue;
                }
            };
            let Some(class) = command.class.filter(|c| !c.is_empty()) else {
                warn!("Skipping command {}: no class declared", key);
                continue;
            };

            commands.push(CommandDescriptor {
                name: key.to_lowercase(),
                type_name: class,
                permission: command.permission.unwrap_or_default(),
                permission_message: command.permission_message.unwrap_or_default(),
                description: command.description.unwrap_or_default(),
                usage: command.usage.unwrap_or_default(),
                aliases: command.aliases.unwrap_or_default(),
            });
        }

        Ok(Self {
            classpath_imports: raw.classpath_imports.unwrap_or_default(),
            listeners: raw.listeners.unwrap_or_default(),
            commands,
        })
    }

    /// Read and parse a document from disk
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let content = std::fs::read_to_string(path)?;
        let document = Self::parse(&content)?;
        debug!(
            "Loaded handler document {:?}: {} listener(s), {} command(s)",
            path,
            document.listeners.len(),
            document.commands.len()
        );
        Ok(document)
    }

    /// Write `default_content` to `path` unless a document already exists.
    /// Returns whether a file was written.
    pub fn save_default(path: &Path, default_content: &str) -> Result<bool, DocumentError> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, default_content)?;
        Ok(true)
    }
}
