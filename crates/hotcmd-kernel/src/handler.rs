//! Handler capabilities
//!
//! A live handler is an object that exposes one or more capabilities: command
//! execution, tab completion, or event listening. The host only ever talks to a
//! handler through these traits.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Someone who can issue commands and receive replies.
pub trait CommandSender: Send + Sync {
    /// Display name of the sender
    fn name(&self) -> &str;

    /// Deliver a message to the sender
    fn send_message(&self, message: &str);

    /// Whether the sender holds the given permission node
    fn has_permission(&self, _permission: &str) -> bool {
        true
    }
}

/// Declarative metadata of a command, as read from the handler document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    /// Command name (lower-case)
    pub name: String,
    /// Handler type name, relative to the generation namespace
    pub type_name: String,
    /// Permission node required to run the command
    pub permission: String,
    /// Message shown when the permission check fails
    pub permission_message: String,
    /// Short description
    pub description: String,
    /// Usage text
    pub usage: String,
    /// Alternative labels
    pub aliases: Vec<String>,
}

impl CommandDescriptor {
    /// Create a descriptor with only a name and type name
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    /// Set the permission node
    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permission = permission.into();
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the usage text
    pub fn with_usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = usage.into();
        self
    }

    /// Add an alias
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

/// Executes a command.
pub trait CommandExecutor: Send + Sync {
    /// Run the command. Returning `false` tells the dispatcher to show the usage text.
    fn on_command(
        &self,
        sender: &dyn CommandSender,
        command: &CommandDescriptor,
        label: &str,
        args: &[String],
    ) -> bool;
}

/// Suggests completions for a partially typed command.
pub trait TabCompleter: Send + Sync {
    /// `None` falls back to the dispatcher's default suggestions
    fn on_tab_complete(
        &self,
        sender: &dyn CommandSender,
        command: &CommandDescriptor,
        alias: &str,
        args: &[String],
    ) -> Option<Vec<String>>;
}

/// An event published by the host.
#[derive(Clone)]
pub struct HostEvent {
    /// Event kind, e.g. `"join"`
    pub kind: String,
    /// The sender the event is about, if any
    pub subject: Option<Arc<dyn CommandSender>>,
    /// Free-form payload
    pub data: serde_json::Value,
}

impl HostEvent {
    /// Create an event without subject or payload
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            subject: None,
            data: serde_json::Value::Null,
        }
    }

    /// Attach the sender the event is about
    pub fn with_subject(mut self, subject: Arc<dyn CommandSender>) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Attach a payload
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

impl fmt::Debug for HostEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostEvent")
            .field("kind", &self.kind)
            .field("subject", &self.subject.as_ref().map(|s| s.name().to_string()))
            .field("data", &self.data)
            .finish()
    }
}

/// Receives host events.
pub trait Listener: Send + Sync {
    fn on_event(&self, event: &HostEvent);
}

/// A live handler object.
///
/// Every capability defaults to "not offered"; an implementation overrides the
/// accessors for the capabilities it has. A handler offering neither
/// [`CommandExecutor`] nor [`Listener`] is rejected when it is instantiated.
pub trait Handler: Send + Sync {
    fn as_command(&self) -> Option<&dyn CommandExecutor> {
        None
    }

    fn as_tab_completer(&self) -> Option<&dyn TabCompleter> {
        None
    }

    fn as_listener(&self) -> Option<&dyn Listener> {
        None
    }
}

/// Convenience: does this handler offer any capability the host can register?
pub fn has_capability(handler: &dyn Handler) -> bool {
    handler.as_command().is_some() || handler.as_listener().is_some()
}
