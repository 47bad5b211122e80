use std::sync::Arc;
use std::time::Duration;

use hotcmd_kernel::{
    CommandDescriptor, CommandExecutor, CommandSender, Commander, DispatchCommand, Handler,
    HandlerTypeDef, HostEvent, Listener, TabCompleter, same_command,
};
use hotcmd_runtime::{ReloadError, ReloadEvent, ReloadPhase, samples};
use hotcmd_testing::{RecordingSender, TestHost, assert_registered};

struct Reply(String);

impl CommandExecutor for Reply {
    fn on_command(
        &self,
        sender: &dyn CommandSender,
        _command: &CommandDescriptor,
        _label: &str,
        _args: &[String],
    ) -> bool {
        sender.send_message(&self.0);
        true
    }
}

impl Handler for Reply {
    fn as_command(&self) -> Option<&dyn CommandExecutor> {
        Some(self)
    }
}

struct Suggest;

impl CommandExecutor for Suggest {
    fn on_command(
        &self,
        _sender: &dyn CommandSender,
        _command: &CommandDescriptor,
        _label: &str,
        _args: &[String],
    ) -> bool {
        true
    }
}

impl TabCompleter for Suggest {
    fn on_tab_complete(
        &self,
        _sender: &dyn CommandSender,
        _command: &CommandDescriptor,
        _alias: &str,
        _args: &[String],
    ) -> Option<Vec<String>> {
        Some(vec!["alpha".to_string(), "beta".to_string()])
    }
}

impl Handler for Suggest {
    fn as_command(&self) -> Option<&dyn CommandExecutor> {
        Some(self)
    }

    fn as_tab_completer(&self) -> Option<&dyn TabCompleter> {
        Some(self)
    }
}

struct Welcome;

impl Listener for Welcome {
    fn on_event(&self, event: &HostEvent) {
        if let Some(subject) = &event.subject {
            subject.send_message(&format!("welcome {}", subject.name()));
        }
    }
}

impl Handler for Welcome {
    fn as_listener(&self) -> Option<&dyn Listener> {
        Some(self)
    }
}

struct Stamp(Arc<dyn Commander>);

impl CommandExecutor for Stamp {
    fn on_command(
        &self,
        sender: &dyn CommandSender,
        _command: &CommandDescriptor,
        _label: &str,
        _args: &[String],
    ) -> bool {
        sender.send_message(&format!("{:?}", self.0.generation()));
        true
    }
}

impl Handler for Stamp {
    fn as_command(&self) -> Option<&dyn CommandExecutor> {
        Some(self)
    }
}

struct Inert;

impl Handler for Inert {}

/// A command some other owner registered
struct Foreign(CommandDescriptor);

impl DispatchCommand for Foreign {
    fn descriptor(&self) -> &CommandDescriptor {
        &self.0
    }

    fn execute(&self, sender: &Arc<dyn CommandSender>, _label: &str, _args: &[String]) -> bool {
        sender.send_message("foreign");
        true
    }

    fn tab_complete(
        &self,
        _sender: &dyn CommandSender,
        _alias: &str,
        _args: &[String],
    ) -> Option<Vec<String>> {
        None
    }
}

fn reply(type_name: &str, message: &str) -> HandlerTypeDef {
    let message = message.to_string();
    HandlerTypeDef::new(type_name).with_no_args(move || Reply(message.clone()))
}

fn welcome() -> HandlerTypeDef {
    HandlerTypeDef::new("Welcome").with_no_args(|| Welcome)
}

async fn wait_for(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("condition not met in time");
}

const GREET_DOCUMENT: &str = "
listeners:
  - Welcome
commands:
  greet:
    class: Greet
    aliases: [hi]
";

fn greet_host(message: &str) -> TestHost {
    let host = TestHost::new();
    host.write_source("Greet.rs", "use hotcmd_kernel::*;\npub struct Greet;\n");
    host.write_source("Welcome.rs", "pub struct Welcome;\n");
    host.write_document(GREET_DOCUMENT);
    host.loader.provide(reply("Greet", message));
    host.loader.provide(welcome());
    host
}

#[tokio::test]
async fn test_reload_registers_document_handlers() {
    hotcmd_testing::init_tracing();
    let host = greet_host("hello");
    let reloader = host.reloader().unwrap();

    let report = reloader.reload().unwrap().await.unwrap();

    assert_eq!(report.commands, vec!["greet".to_string()]);
    assert_eq!(report.listeners, vec!["Welcome".to_string()]);
    assert_registered!(host.dispatcher, "greet");
    assert_registered!(host.dispatcher, "hotcmd:greet");
    assert_registered!(host.dispatcher, "hi");
    assert_eq!(host.dispatcher.notifications(), 1);

    let alice = RecordingSender::new("alice");
    assert_eq!(host.dispatcher.execute("greet", alice.clone(), &[]), Some(true));
    assert_eq!(alice.last_message().as_deref(), Some("hello"));

    let event = HostEvent::new("join").with_subject(alice.clone());
    assert_eq!(host.dispatcher.fire(&event), 1);
    assert_eq!(alice.last_message().as_deref(), Some("welcome alice"));

    let snapshot = reloader.snapshot();
    assert_eq!(snapshot.phase, ReloadPhase::Idle);
    assert_eq!(snapshot.generation, Some(report.generation.clone()));
    assert_eq!(snapshot.commands, vec!["greet".to_string()]);
}

#[tokio::test]
async fn test_sources_are_staged_into_the_generation_namespace() {
    let host = greet_host("hello");
    let reloader = host.reloader().unwrap();
    let report = reloader.reload().unwrap().await.unwrap();

    let declaration = format!("#![crate_name = \"{}\"]", report.generation.ident());
    let staged = host.toolchain.compiled_sources();
    assert_eq!(staged.len(), 2);
    for (type_name, source) in &staged {
        assert!(
            source.starts_with(&declaration),
            "{} staged without namespace: {}",
            type_name,
            source
        );
    }
    let greet = staged.iter().find(|(name, _)| name == "Greet").unwrap();
    assert_eq!(greet.1.lines().nth(1), Some("pub struct Greet;"));
}

#[tokio::test]
async fn test_reload_swaps_generations() {
    let host = greet_host("v1");
    let reloader = host.reloader().unwrap();
    let first = reloader.reload().unwrap().await.unwrap();
    let old = host.dispatcher.command("greet").unwrap();

    host.loader.provide(reply("Greet", "v2"));
    let second = reloader.reload().unwrap().await.unwrap();
    assert_ne!(first.generation, second.generation);
    assert_ne!(first.generation.namespace(), second.generation.namespace());

    let bob = RecordingSender::new("bob");
    host.dispatcher.execute("greet", bob.clone(), &[]);
    assert_eq!(bob.last_message().as_deref(), Some("v2"));

    let current = host.dispatcher.command("greet").unwrap();
    assert!(!same_command(&old, &current));

    // A handle taken before the swap still runs the old code.
    let sender: Arc<dyn CommandSender> = bob.clone();
    assert!(old.execute(&sender, "greet", &[]));
    assert_eq!(bob.last_message().as_deref(), Some("v1"));

    // Its output tree is already gone; only the loaded artifact remains.
    let old_dir = first.generation.relative_dir();
    let from_first = |p: &std::path::PathBuf| p.parent().is_some_and(|d| d.ends_with(&old_dir));
    let live = host.loader.live_artifacts();
    let old_artifact = live.iter().find(|p| from_first(p)).cloned().unwrap();
    assert!(!old_artifact.exists());

    drop(old);
    assert!(!host.loader.live_artifacts().iter().any(from_first));
}

#[tokio::test]
async fn test_broken_source_does_not_block_others() {
    let host = TestHost::new();
    host.write_source("Good.rs", "pub struct Good;\n");
    host.write_source("Broken.rs", "pub struct Broken;\ncompile_error!(\"nope\");\n");
    host.write_document("commands:\n  good:\n    class: Good\n  broken:\n    class: Broken\n");
    host.loader.provide(reply("Good", "good"));
    host.loader.provide(reply("Broken", "broken"));

    let reloader = host.reloader().unwrap();
    let report = reloader.reload().unwrap().await.unwrap();

    assert_eq!(report.commands, vec!["good".to_string()]);
    assert_registered!(host.dispatcher, "good");
    assert_registered!(host.dispatcher, !"broken");
    assert_registered!(host.dispatcher, !"hotcmd:broken");
    assert_eq!(host.toolchain.invocations(), 2);
}

#[tokio::test]
async fn test_reserved_name_is_skipped() {
    let host = greet_host("hello");
    host.write_document("commands:\n  hotcmd:\n    class: Greet\n  greet:\n    class: Greet\n");

    let reloader = host.reloader().unwrap();
    reloader.install_management_command().await.unwrap();
    let report = reloader.reload().unwrap().await.unwrap();

    assert_eq!(report.commands, vec!["greet".to_string()]);
    let management = host.dispatcher.command("hotcmd").unwrap();
    assert_eq!(management.descriptor().type_name, "ManagementCommand");
}

#[tokio::test]
async fn test_reserved_name_matches_any_case() {
    let mut host = greet_host("hello");
    host.config = host.config.clone().with_command_name("HotCmd");
    host.write_document("commands:\n  HOTCMD:\n    class: Greet\n  greet:\n    class: Greet\n");

    let reloader = host.reloader().unwrap();
    reloader.install_management_command().await.unwrap();
    let report = reloader.reload().unwrap().await.unwrap();

    assert_eq!(report.commands, vec!["greet".to_string()]);
    let management = host.dispatcher.command("hotcmd").unwrap();
    assert_eq!(management.descriptor().type_name, "ManagementCommand");
    assert_registered!(host.dispatcher, "hotcmd:greet");
}

#[tokio::test]
async fn test_second_reload_is_rejected_while_running() {
    let host = greet_host("hello");
    let reloader = host.reloader().unwrap();

    let gate = host.toolchain.hold();
    let first = reloader.reload().unwrap();
    wait_for(|| reloader.phase() == ReloadPhase::Compiling).await;

    assert!(matches!(reloader.reload(), Err(ReloadError::ReloadInProgress)));
    assert_eq!(reloader.snapshot().phase, ReloadPhase::Compiling);

    drop(gate);
    first.await.unwrap();
    assert_eq!(reloader.phase(), ReloadPhase::Idle);
    reloader.reload().unwrap().await.unwrap();
}

#[tokio::test]
async fn test_phase_events() {
    let host = greet_host("hello");
    let reloader = host.reloader().unwrap();
    let mut events = reloader.subscribe();

    reloader.reload().unwrap().await.unwrap();

    let mut phases = Vec::new();
    let mut completed = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ReloadEvent::PhaseChanged { phase } => phases.push(phase),
            ReloadEvent::Completed { commands, listeners, .. } => {
                assert_eq!((commands, listeners), (1, 1));
                completed += 1;
            }
            ReloadEvent::Failed { error, .. } => panic!("reload failed: {}", error),
        }
    }
    assert_eq!(
        phases,
        vec![
            ReloadPhase::Draining,
            ReloadPhase::Compiling,
            ReloadPhase::Activating,
            ReloadPhase::Idle,
        ]
    );
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn test_failed_compile_phase_leaves_nothing_registered() {
    let host = greet_host("hello");
    let reloader = host.reloader().unwrap();
    reloader.reload().unwrap().await.unwrap();
    assert_registered!(host.dispatcher, "greet");

    std::fs::remove_dir_all(host.source_dir()).unwrap();
    std::fs::write(host.source_dir(), "not a directory").unwrap();
    let mut events = reloader.subscribe();

    let result = reloader.reload().unwrap().await;
    assert!(matches!(result, Err(ReloadError::Staging(_))));

    assert_registered!(host.dispatcher, !"greet");
    assert_registered!(host.dispatcher, !"hotcmd:greet");
    assert_registered!(host.dispatcher, !"hi");
    assert_eq!(host.dispatcher.listener_count(), 0);

    let snapshot = reloader.snapshot();
    assert_eq!(snapshot.phase, ReloadPhase::Idle);
    assert_eq!(snapshot.generation, None);
    assert!(snapshot.commands.is_empty());

    let mut failed = false;
    while let Ok(event) = events.try_recv() {
        if let ReloadEvent::Failed { .. } = event {
            failed = true;
        }
    }
    assert!(failed);
}

#[tokio::test]
async fn test_foreign_labels_survive_drain() {
    let host = greet_host("hello");
    let foreign: Arc<dyn DispatchCommand> =
        Arc::new(Foreign(CommandDescriptor::new("greet", "Foreign")));
    host.dispatcher.insert("greet", foreign.clone());

    let reloader = host.reloader().unwrap();
    reloader.reload().unwrap().await.unwrap();
    assert!(same_command(&host.dispatcher.command("greet").unwrap(), &foreign));
    assert_registered!(host.dispatcher, "hotcmd:greet");

    host.write_document("listeners: []\ncommands: {}\n");
    let report = reloader.reload().unwrap().await.unwrap();
    assert!(report.commands.is_empty());
    assert_registered!(host.dispatcher, !"hotcmd:greet");
    assert_registered!(host.dispatcher, !"hi");
    assert!(same_command(&host.dispatcher.command("greet").unwrap(), &foreign));
    assert_eq!(host.dispatcher.listener_count(), 0);
}

#[tokio::test]
async fn test_first_start_writes_samples_and_default_document() {
    let host = TestHost::new();
    host.loader
        .provide(HandlerTypeDef::new("PingCommand").with_no_args(|| Reply("pong".to_string())));
    host.loader
        .provide(HandlerTypeDef::new("WelcomeListener").with_no_args(|| Welcome));

    let reloader = host.reloader().unwrap();
    let report = reloader.reload().unwrap().await.unwrap();

    assert!(host.source_dir().join("PingCommand.rs").is_file());
    assert!(host.config.handlers_path().is_file());
    assert_eq!(report.commands, vec!["ping".to_string()]);
    assert_eq!(report.listeners, vec!["WelcomeListener".to_string()]);
    assert_registered!(host.dispatcher, "p");

    let staged = host.toolchain.compiled_sources();
    let (_, ping) = staged.iter().find(|(name, _)| name == "PingCommand").unwrap();
    let (_, original) = samples::SAMPLE_SOURCES
        .iter()
        .find(|(file, _)| *file == "PingCommand.rs")
        .unwrap();
    assert_eq!(ping.lines().count(), original.lines().count());
    assert!(ping.starts_with(&format!("#![crate_name = \"{}\"]\n\n", report.generation.ident())));
}

#[tokio::test]
async fn test_commander_reports_active_generation() {
    let host = TestHost::new();
    host.write_source("Stamp.rs", "pub struct Stamp;\n");
    host.write_document("commands:\n  stamp:\n    class: Stamp\n");
    host.loader
        .provide(HandlerTypeDef::new("Stamp").with_commander(Stamp));

    let reloader = host.reloader().unwrap();
    let report = reloader.reload().unwrap().await.unwrap();

    let carol = RecordingSender::new("carol");
    host.dispatcher.execute("stamp", carol.clone(), &[]);
    assert_eq!(
        carol.last_message(),
        Some(format!("{:?}", Some(report.generation.id())))
    );
    assert_eq!(reloader.commander().source_dir(), host.source_dir());
}

#[tokio::test]
async fn test_management_command_reloads() {
    let host = greet_host("hello");
    let reloader = host.reloader().unwrap();
    reloader.install_management_command().await.unwrap();

    let admin = RecordingSender::new("admin");
    assert_eq!(
        host.dispatcher.complete("hotcmd", admin.as_ref(), &["re"]),
        Some(vec!["reload".to_string()])
    );

    assert_eq!(host.dispatcher.execute("hotcmd", admin.clone(), &["reload"]), Some(true));
    wait_for(|| {
        admin
            .messages()
            .iter()
            .any(|m| m.starts_with("Reloaded 1 command(s) and 1 listener(s)"))
    })
    .await;
    assert_eq!(admin.messages()[0], "Reloading handlers...");
    assert_registered!(host.dispatcher, "greet");

    host.dispatcher.execute("hotcmd", admin.clone(), &["status"]);
    assert!(admin.last_message().unwrap().contains("commands: [greet]"));
}

#[tokio::test]
async fn test_management_reload_reports_running_reload() {
    let host = greet_host("hello");
    let reloader = host.reloader().unwrap();
    reloader.install_management_command().await.unwrap();

    let gate = host.toolchain.hold();
    let running = reloader.reload().unwrap();
    wait_for(|| reloader.phase() == ReloadPhase::Compiling).await;

    let admin = RecordingSender::new("admin");
    host.dispatcher.execute("hotcmd", admin.clone(), &["reload"]);
    assert_eq!(admin.messages(), vec!["A reload is already in progress.".to_string()]);

    drop(gate);
    running.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_management_notice_precedes_outcome() {
    let host = greet_host("hello");
    let reloader = host.reloader().unwrap();
    reloader.install_management_command().await.unwrap();

    let admin = RecordingSender::new("admin");
    host.dispatcher.execute("hotcmd", admin.clone(), &["reload"]);
    wait_for(|| admin.messages().len() == 2).await;

    let messages = admin.messages();
    assert_eq!(messages[0], "Reloading handlers...");
    assert!(messages[1].starts_with("Reloaded 1 command(s)"));
}

#[tokio::test]
async fn test_permission_is_checked_before_execution() {
    let host = TestHost::new();
    host.write_source("Greet.rs", "pub struct Greet;\n");
    host.write_document(
        "commands:\n  greet:\n    class: Greet\n    permission: hotcmd.greet\n    permissionMessage: nope\n",
    );
    host.loader.provide(reply("Greet", "hello"));
    let reloader = host.reloader().unwrap();
    reloader.reload().unwrap().await.unwrap();

    let guest = RecordingSender::with_permissions("guest", &[]);
    host.dispatcher.execute("greet", guest.clone(), &[]);
    assert_eq!(guest.last_message().as_deref(), Some("nope"));

    let member = RecordingSender::with_permissions("member", &["hotcmd.greet"]);
    host.dispatcher.execute("greet", member.clone(), &[]);
    assert_eq!(member.last_message().as_deref(), Some("hello"));
}

#[tokio::test]
async fn test_tab_completion_falls_back_to_dispatcher_default() {
    let host = TestHost::new();
    host.write_source("Greet.rs", "pub struct Greet;\n");
    host.write_source("Suggest.rs", "pub struct Suggest;\n");
    host.write_document("commands:\n  greet:\n    class: Greet\n  suggest:\n    class: Suggest\n");
    host.loader.provide(reply("Greet", "hello"));
    host.loader
        .provide(HandlerTypeDef::new("Suggest").with_no_args(|| Suggest));
    let reloader = host.reloader().unwrap();
    reloader.reload().unwrap().await.unwrap();

    let dave = RecordingSender::new("dave");
    assert_eq!(
        host.dispatcher.complete("suggest", dave.as_ref(), &[""]),
        Some(vec!["alpha".to_string(), "beta".to_string()])
    );
    assert_eq!(
        host.dispatcher.complete("greet", dave.as_ref(), &[""]),
        Some(vec!["dave".to_string()])
    );
}

#[tokio::test]
async fn test_unusable_handlers_are_skipped() {
    let host = greet_host("hello");
    host.write_source("Inert.rs", "pub struct Inert;\n");
    host.write_document(
        "listeners:\n  - Welcome\n  - Greet\n  - Missing\ncommands:\n  inert:\n    class: Inert\n  welcome:\n    class: Welcome\n  greet:\n    class: Greet\n",
    );
    host.loader.provide(HandlerTypeDef::new("Inert").with_no_args(|| Inert));

    let reloader = host.reloader().unwrap();
    let report = reloader.reload().unwrap().await.unwrap();

    assert_eq!(report.commands, vec!["greet".to_string()]);
    assert_eq!(report.listeners, vec!["Welcome".to_string()]);
    assert_registered!(host.dispatcher, !"inert");
    assert_registered!(host.dispatcher, !"welcome");
}

#[tokio::test]
async fn test_panicking_constructor_skips_only_its_handler() {
    let host = TestHost::new();
    host.write_source("Boom.rs", "pub struct Boom;\n");
    host.write_source("Good.rs", "pub struct Good;\n");
    host.write_document("commands:\n  boom:\n    class: Boom\n  good:\n    class: Good\n");
    host.loader.provide(
        HandlerTypeDef::new("Boom").with_no_args(|| -> Reply { panic!("constructor failed") }),
    );
    host.loader.provide(reply("Good", "good"));

    let reloader = host.reloader().unwrap();
    let report = reloader.reload().unwrap().await.unwrap();

    assert_eq!(report.commands, vec!["good".to_string()]);
    assert_registered!(host.dispatcher, "good");
    assert_registered!(host.dispatcher, !"boom");
    assert_eq!(reloader.snapshot().generation, Some(report.generation));
}

#[tokio::test]
async fn test_notify_failure_is_not_fatal() {
    let host = greet_host("hello");
    host.dispatcher.set_fail_notify(true);
    let reloader = host.reloader().unwrap();

    let report = reloader.reload().unwrap().await.unwrap();
    assert_eq!(report.commands, vec!["greet".to_string()]);
    assert_eq!(host.dispatcher.notifications(), 1);
}

#[tokio::test]
async fn test_shutdown_unregisters_and_rejects_reloads() {
    let host = greet_host("hello");
    let reloader = host.reloader().unwrap();
    reloader.reload().unwrap().await.unwrap();
    assert!(!host.loader.live_artifacts().is_empty());

    reloader.shutdown().await.unwrap();

    assert_registered!(host.dispatcher, !"greet");
    assert_registered!(host.dispatcher, !"hotcmd:greet");
    assert_eq!(host.dispatcher.listener_count(), 0);
    assert!(host.loader.live_artifacts().is_empty());
    assert_eq!(reloader.snapshot().generation, None);
    assert!(matches!(reloader.reload(), Err(ReloadError::ShutDown)));
}

#[tokio::test]
async fn test_watcher_only_starts_when_enabled() {
    let host = greet_host("hello");
    let reloader = host.reloader().unwrap();
    assert!(reloader.watch_sources().unwrap().is_none());
}

#[tokio::test]
async fn test_watcher_writes_defaults_before_watching() {
    let mut host = TestHost::new();
    host.config = host.config.clone().with_auto_reload(true);
    let reloader = host.reloader().unwrap();

    let mut watcher = reloader.watch_sources().unwrap().expect("watcher enabled");
    assert!(watcher.is_running());
    assert!(host.config.handlers_path().is_file());
    assert!(host.source_dir().join("PingCommand.rs").is_file());
    assert_eq!(reloader.phase(), ReloadPhase::Idle);

    watcher.stop().await;
    assert!(!watcher.is_running());
}

#[tokio::test]
async fn test_staged_sources_are_deleted_after_compiling() {
    let host = greet_host("hello");
    let reloader = host.reloader().unwrap();

    reloader.reload().unwrap().await.unwrap();
    reloader.reload().unwrap().await.unwrap();

    let roots = host.toolchain.staging_roots();
    assert_eq!(roots.len(), 2);
    for root in &roots {
        assert!(!root.exists(), "{:?} outlived its compile", root);
    }
    assert!(!host.loader.live_artifacts().is_empty());
}
