//! Dispatcher and execution contexts
//!
//! The host owns the live command table and the event bus. The reload runtime
//! only reaches them through [`Dispatcher`], and only from the serial context
//! offered by [`ExecutionContexts`].

use std::sync::Arc;

use crate::handler::{CommandDescriptor, CommandSender, Listener};

/// Errors reported by a dispatcher
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DispatchError {
    #[error("Command sync failed: {0}")]
    SyncFailed(String),

    #[error("Dispatcher unavailable: {0}")]
    Unavailable(String),
}

/// A command entry as the dispatcher sees it
pub trait DispatchCommand: Send + Sync {
    /// The declarative metadata of the command
    fn descriptor(&self) -> &CommandDescriptor;

    /// Execute the command. The sender handle may be kept for replies that
    /// arrive after `execute` returns.
    fn execute(&self, sender: &Arc<dyn CommandSender>, label: &str, args: &[String]) -> bool;

    /// Suggest completions; `None` means the dispatcher applies its own defaults
    fn tab_complete(
        &self,
        sender: &dyn CommandSender,
        alias: &str,
        args: &[String],
    ) -> Option<Vec<String>>;
}

/// The host's live command table and event bus
pub trait Dispatcher: Send + Sync {
    /// Every label currently in the command table with the command it maps to
    fn known_commands(&self) -> Vec<(String, Arc<dyn DispatchCommand>)>;

    /// Remove `label` only if it still maps to exactly `command`
    fn remove(&self, label: &str, command: &Arc<dyn DispatchCommand>) -> bool;

    /// Register a command under its name, `namespace:name` and its aliases
    fn register(&self, name: &str, namespace: &str, command: Arc<dyn DispatchCommand>) -> bool;

    /// Attach a listener on behalf of `owner`
    fn attach_listener(&self, owner: &str, listener: Arc<dyn Listener>);

    /// Detach every listener attached on behalf of `owner`
    fn detach_listeners(&self, owner: &str);

    /// Tell connected clients that the command table changed
    fn notify_commands_changed(&self) -> Result<(), DispatchError>;
}

/// Boxed unit of work for an execution context
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// The two execution contexts the host provides
pub trait ExecutionContexts: Send + Sync {
    /// Run on the host's single serial context, where the live tables may be mutated
    fn run_serial(&self, task: Task);

    /// Run on the unbounded background context
    fn run_background(&self, task: Task);
}

/// Identity comparison for command handles, ignoring vtable pointers.
pub fn same_command(a: &Arc<dyn DispatchCommand>, b: &Arc<dyn DispatchCommand>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
