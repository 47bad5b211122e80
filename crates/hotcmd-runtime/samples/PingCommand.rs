#![crate_name = "sample"]

//! Replies to `/ping` and completes online player names.

use std::sync::Arc;

use hotcmd_kernel::{
    Application, CommandDescriptor, CommandExecutor, CommandSender, Handler, HandlerTypeDef,
    TabCompleter,
};

pub struct PingCommand {
    application: Arc<dyn Application>,
}

impl CommandExecutor for PingCommand {
    fn on_command(
        &self,
        sender: &dyn CommandSender,
        _command: &CommandDescriptor,
        _label: &str,
        args: &[String],
    ) -> bool {
        match args.first() {
            Some(name) => match self.application.find_sender(name) {
                Some(target) => {
                    target.send_message(&format!("{} pinged you", sender.name()));
                    sender.send_message(&format!("Pinged {}", target.name()));
                }
                None => sender.send_message(&format!("{} is not online", name)),
            },
            None => sender.send_message("Pong!"),
        }
        true
    }
}

impl TabCompleter for PingCommand {
    fn on_tab_complete(
        &self,
        sender: &dyn CommandSender,
        _command: &CommandDescriptor,
        _alias: &str,
        args: &[String],
    ) -> Option<Vec<String>> {
        match args {
            [_] => Some(vec![sender.name().to_string()]),
            _ => Some(Vec::new()),
        }
    }
}

impl Handler for PingCommand {
    fn as_command(&self) -> Option<&dyn CommandExecutor> {
        Some(self)
    }

    fn as_tab_completer(&self) -> Option<&dyn TabCompleter> {
        Some(self)
    }
}

hotcmd_kernel::declare_handler!(
    HandlerTypeDef::new("PingCommand").with_application(|application| PingCommand { application })
);
