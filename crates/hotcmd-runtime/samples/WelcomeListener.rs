#![crate_name = "sample"]

//! Greets everyone who joins.

use hotcmd_kernel::{Handler, HandlerTypeDef, HostEvent, Listener};

pub struct WelcomeListener;

impl Listener for WelcomeListener {
    fn on_event(&self, event: &HostEvent) {
        if event.kind != "join" {
            return;
        }
        if let Some(subject) = &event.subject {
            subject.send_message(&format!("Welcome, {}!", subject.name()));
        }
    }
}

impl Handler for WelcomeListener {
    fn as_listener(&self) -> Option<&dyn Listener> {
        Some(self)
    }
}

hotcmd_kernel::declare_handler!(
    HandlerTypeDef::new("WelcomeListener").with_no_args(|| WelcomeListener)
);
