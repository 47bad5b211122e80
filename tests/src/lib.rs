//! hotcmd testing utilities
//!
//! Lets the whole reload pipeline run without a real compiler or a real host:
//! [`MockToolchain`] "compiles" a source by writing its type name into the
//! artifact, [`MockLoader`] maps that name to a registered handler type, and
//! [`MockDispatcher`] keeps the command table in memory.

pub mod harness;

pub use dispatcher::MockDispatcher;
pub use harness::TestHost;
pub use host::{MockApplication, MockExtension, RecordingSender};
pub use toolchain::{MockLoader, MockToolchain};

/// Route `tracing` output through the test harness; safe to call repeatedly
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("hotcmd=debug,info")),
        )
        .with_test_writer()
        .try_init();
}

/// Assert that a label is (or is not) in a [`MockDispatcher`]'s command table
#[macro_export]
macro_rules! assert_registered {
    ($dispatcher:expr, !$label:expr) => {
        assert!(
            $dispatcher.command($label).is_none(),
            "unexpected label {:?} in {:?}",
            $label,
            $dispatcher.labels()
        );
    };
    ($dispatcher:expr, $label:expr) => {
        assert!(
            $dispatcher.command($label).is_some(),
            "expected label {:?} in {:?}",
            $label,
            $dispatcher.labels()
        );
    };
}
