//! Registry bridge
//!
//! Adapts handler instances to the host dispatcher and keeps track of what
//! the runtime registered, so a drain removes exactly that and nothing else.
//! Every method here must run on the serial context.

use std::sync::Arc;

use hotcmd_kernel::{
    CommandDescriptor, CommandSender, DispatchCommand, DispatchError, Dispatcher, HostEvent,
    Listener, same_command,
};
use tracing::{debug, info, warn};

use crate::factory::HandlerInstance;

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("{type_name} cannot be registered as a {role}")]
    MissingCapability {
        type_name: String,
        role: &'static str,
    },

    #[error("Failed to notify clients: {0}")]
    Notify(#[from] DispatchError),
}

const DEFAULT_PERMISSION_MESSAGE: &str = "You do not have permission to use this command.";

/// Dispatcher entry forwarding to a command handler
pub struct CommandAdapter {
    descriptor: CommandDescriptor,
    instance: HandlerInstance,
}

impl DispatchCommand for CommandAdapter {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn execute(&self, sender: &Arc<dyn CommandSender>, label: &str, args: &[String]) -> bool {
        let permission = &self.descriptor.permission;
        if !permission.is_empty() && !sender.has_permission(permission) {
            let message = if self.descriptor.permission_message.is_empty() {
                DEFAULT_PERMISSION_MESSAGE
            } else {
                self.descriptor.permission_message.as_str()
            };
            sender.send_message(message);
            return true;
        }

        match self.instance.handler().as_command() {
            Some(executor) => executor.on_command(sender.as_ref(), &self.descriptor, label, args),
            None => false,
        }
    }

    fn tab_complete(
        &self,
        sender: &dyn CommandSender,
        alias: &str,
        args: &[String],
    ) -> Option<Vec<String>> {
        self.instance
            .handler()
            .as_tab_completer()
            .and_then(|completer| completer.on_tab_complete(sender, &self.descriptor, alias, args))
    }
}

/// Event bus entry forwarding to a listener handler
pub struct ListenerAdapter {
    instance: HandlerInstance,
}

impl Listener for ListenerAdapter {
    fn on_event(&self, event: &HostEvent) {
        if let Some(listener) = self.instance.handler().as_listener() {
            listener.on_event(event);
        }
    }
}

/// A command the runtime registered
pub struct RegisteredCommand {
    pub descriptor: CommandDescriptor,
    pub adapter: Arc<dyn DispatchCommand>,
}

/// A listener the runtime attached
pub struct RegisteredListener {
    pub type_name: String,
    pub adapter: Arc<dyn Listener>,
}

/// Everything registered on behalf of the current generation
#[derive(Default)]
pub struct RegisteredHandlers {
    pub commands: Vec<RegisteredCommand>,
    pub listeners: Vec<RegisteredListener>,
}

impl RegisteredHandlers {
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty() && self.listeners.is_empty()
    }

    pub fn command_names(&self) -> Vec<String> {
        self.commands.iter().map(|c| c.descriptor.name.clone()).collect()
    }

    pub fn listener_names(&self) -> Vec<String> {
        self.listeners.iter().map(|l| l.type_name.clone()).collect()
    }

    fn owns(&self, command: &Arc<dyn DispatchCommand>) -> bool {
        self.commands.iter().any(|c| same_command(&c.adapter, command))
    }
}

/// Registers handlers with the host dispatcher
pub struct RegistryBridge {
    dispatcher: Arc<dyn Dispatcher>,
    namespace: String,
    owner: String,
}

impl RegistryBridge {
    /// `namespace` prefixes command labels; `owner` tags attached listeners
    pub fn new(
        dispatcher: Arc<dyn Dispatcher>,
        namespace: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            namespace: namespace.into(),
            owner: owner.into(),
        }
    }

    /// Remove every command label and listener the runtime registered.
    ///
    /// Labels are removed only where they still map to one of our adapters,
    /// so commands other owners registered under the same label survive.
    /// Returns the number of labels removed.
    pub fn unregister_all(&self, handlers: &mut RegisteredHandlers) -> usize {
        let mut removed = 0;

        for command in &handlers.commands {
            let name = &command.descriptor.name;
            let namespaced = format!("{}:{}", self.namespace, name);
            for label in [name.as_str(), namespaced.as_str()] {
                if self.dispatcher.remove(label, &command.adapter) {
                    removed += 1;
                }
            }
        }

        for (label, command) in self.dispatcher.known_commands() {
            if handlers.owns(&command) && self.dispatcher.remove(&label, &command) {
                removed += 1;
            }
        }

        self.dispatcher.detach_listeners(&self.owner);

        if !handlers.is_empty() {
            info!(
                "Unregistered {} command label(s) and {} listener(s)",
                removed,
                handlers.listeners.len()
            );
        }
        handlers.commands.clear();
        handlers.listeners.clear();
        removed
    }

    /// Register a command instance under its name, namespaced name and aliases
    pub fn register_command(
        &self,
        descriptor: CommandDescriptor,
        instance: HandlerInstance,
    ) -> Result<RegisteredCommand, RegistryError> {
        if !instance.is_command() {
            return Err(RegistryError::MissingCapability {
                type_name: instance.type_name().to_string(),
                role: "command",
            });
        }

        let adapter: Arc<dyn DispatchCommand> = Arc::new(CommandAdapter {
            descriptor: descriptor.clone(),
            instance,
        });
        if !self
            .dispatcher
            .register(&descriptor.name, &self.namespace, adapter.clone())
        {
            warn!(
                "Label {} is taken; command is reachable as {}:{}",
                descriptor.name, self.namespace, descriptor.name
            );
        }
        debug!("Registered command {} -> {}", descriptor.name, descriptor.type_name);

        Ok(RegisteredCommand {
            descriptor,
            adapter,
        })
    }

    /// Attach a listener instance to the host event bus
    pub fn register_listener(
        &self,
        instance: HandlerInstance,
    ) -> Result<RegisteredListener, RegistryError> {
        if !instance.is_listener() {
            return Err(RegistryError::MissingCapability {
                type_name: instance.type_name().to_string(),
                role: "listener",
            });
        }

        let type_name = instance.type_name().to_string();
        let adapter: Arc<dyn Listener> = Arc::new(ListenerAdapter { instance });
        self.dispatcher.attach_listener(&self.owner, adapter.clone());
        debug!("Attached listener {}", type_name);

        Ok(RegisteredListener { type_name, adapter })
    }

    /// Tell clients the command table changed. Failure is only logged.
    pub fn notify_changed(&self) -> bool {
        match self.dispatcher.notify_commands_changed() {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", RegistryError::Notify(e));
                false
            }
        }
    }
}
