//! Compiles the bundled samples with the real `rustc` and loads them as dylibs.
//!
//! Skipped when no compiler matching the host's is on `PATH`.

use std::sync::Arc;

use hotcmd_kernel::HostEvent;
use hotcmd_runtime::{
    CommanderConfig, ReloadError, Reloader, ReloaderParts, RustcToolchain, TokioContexts,
    ToolchainConfig,
};
use hotcmd_testing::{MockApplication, MockDispatcher, MockExtension, RecordingSender};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_samples_compile_with_rustc() {
    hotcmd_testing::init_tracing();
    if let Err(e) = RustcToolchain::locate(&ToolchainConfig::default()) {
        eprintln!("skipping: {}", e);
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("data");
    let config = CommanderConfig::new().with_data_dir(&data_dir);
    let dispatcher = MockDispatcher::new();
    let application = MockApplication::new(
        MockExtension::new("hotcmd-rustc", data_dir),
        dispatcher.clone(),
    );
    let contexts = Arc::new(TokioContexts::new().unwrap());

    let reloader = match Reloader::new(ReloaderParts::new(config, application, contexts)) {
        Ok(reloader) => reloader,
        Err(ReloadError::ToolchainUnavailable(message)) => {
            eprintln!("skipping: {}", message);
            return;
        }
        Err(e) => panic!("reloader failed: {}", e),
    };

    // The first reload writes the samples; the second replaces a loaded generation.
    let first = reloader.reload().unwrap().await.unwrap();
    assert_eq!(first.commands, vec!["ping".to_string()]);
    let report = reloader.reload().unwrap().await.unwrap();
    assert_eq!(report.commands, vec!["ping".to_string()]);
    assert_eq!(report.listeners, vec!["WelcomeListener".to_string()]);
    assert_ne!(report.generation, first.generation);

    let alice = RecordingSender::new("alice");
    assert_eq!(dispatcher.execute("ping", alice.clone(), &[]), Some(true));
    assert_eq!(alice.last_message().as_deref(), Some("Pong!"));

    let event = HostEvent::new("join").with_subject(alice.clone());
    assert_eq!(dispatcher.fire(&event), 1);
    assert_eq!(alice.last_message().as_deref(), Some("Welcome, alice!"));

    reloader.shutdown().await.unwrap();
    assert_eq!(dispatcher.listener_count(), 0);
}
