//! The management command
//!
//! Registered under the reserved command name. `/<name> reload` starts a
//! reload and reports its outcome to the sender once it settles.

use std::sync::Arc;

use hotcmd_kernel::{CommandDescriptor, CommandSender, DispatchCommand};
use tracing::info;

use crate::reloader::{ReloadError, WeakReloader};

const SUBCOMMANDS: &[&str] = &["reload", "status"];

pub struct ManagementCommand {
    descriptor: CommandDescriptor,
    reloader: WeakReloader,
}

impl ManagementCommand {
    pub fn new(reloader: WeakReloader, name: &str) -> Self {
        Self {
            descriptor: CommandDescriptor::new(name, "ManagementCommand")
                .with_description("Manage runtime-compiled handlers")
                .with_usage(format!("/{} <reload|status>", name)),
            reloader,
        }
    }

    fn reload(&self, sender: &Arc<dyn CommandSender>) {
        let Some(reloader) = self.reloader.upgrade() else {
            sender.send_message("The reloader is no longer running.");
            return;
        };

        info!("Reload requested by {}", sender.name());
        let handle = match reloader.reload() {
            Ok(handle) => handle,
            Err(ReloadError::ReloadInProgress) => {
                sender.send_message("A reload is already in progress.");
                return;
            }
            Err(e) => {
                sender.send_message(&format!("Reload failed: {}", e));
                return;
            }
        };
        sender.send_message("Reloading handlers...");

        let reply_to = sender.clone();
        reloader.when_complete(handle, move |result| match result {
            Ok(report) => reply_to.send_message(&format!(
                "Reloaded {} command(s) and {} listener(s) in {} ms.",
                report.commands.len(),
                report.listeners.len(),
                report.elapsed.as_millis()
            )),
            Err(e) => reply_to.send_message(&format!("Reload failed: {}", e)),
        });
    }

    fn status(&self, sender: &dyn CommandSender) {
        let Some(reloader) = self.reloader.upgrade() else {
            sender.send_message("The reloader is no longer running.");
            return;
        };
        let snapshot = reloader.snapshot();
        let generation = snapshot
            .generation
            .map(|g| g.to_string())
            .unwrap_or_else(|| "none".to_string());
        sender.send_message(&format!(
            "Phase: {:?}, generation: {}, commands: [{}], listeners: [{}]",
            snapshot.phase,
            generation,
            snapshot.commands.join(", "),
            snapshot.listeners.join(", ")
        ));
    }
}

impl DispatchCommand for ManagementCommand {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.descriptor
    }

    fn execute(&self, sender: &Arc<dyn CommandSender>, label: &str, args: &[String]) -> bool {
        match args.first().map(|a| a.to_lowercase()).as_deref() {
            Some("reload") => self.reload(sender),
            Some("status") => self.status(sender.as_ref()),
            _ => sender.send_message(&format!("/{} <{}>", label, SUBCOMMANDS.join("|"))),
        }
        true
    }

    fn tab_complete(
        &self,
        _sender: &dyn CommandSender,
        _alias: &str,
        args: &[String],
    ) -> Option<Vec<String>> {
        match args {
            [prefix] => {
                let prefix = prefix.to_lowercase();
                Some(
                    SUBCOMMANDS
                        .iter()
                        .filter(|s| s.starts_with(&prefix))
                        .map(|s| s.to_string())
                        .collect(),
                )
            }
            _ => Some(Vec::new()),
        }
    }
}
