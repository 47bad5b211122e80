//! Reload orchestration
//!
//! A reload walks `Idle -> Draining -> Compiling -> Activating -> Idle`:
//!
//! - **Draining** (serial context): unregister everything the previous
//!   generation registered, release its load unit, materialize defaults and
//!   read the handler document.
//! - **Compiling** (background context): build the classpath, allocate a
//!   generation, stage and compile the sources, open a load unit.
//! - **Activating** (serial context): instantiate and register listeners,
//!   then commands, then tell clients the command table changed.
//!
//! Any failure goes to `Failed` and straight back to `Idle`. A failed compile
//! leaves no handlers registered, since draining already happened.
//!
//! Only one reload runs at a time. The reload lock guards the orchestrator
//! state and is held by the pipeline for its whole run; it moves into the
//! serial phases and comes back with their results.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use hotcmd_kernel::{
    Application, Commander, DispatchCommand, Dispatcher, ExecutionContexts, Extension,
};
use parking_lot::RwLock;
use tempfile::TempDir;
use tokio::runtime::Handle;
use tokio::sync::{Mutex, OwnedMutexGuard, broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::compiler::{Classpath, CompileError, CompilerPool, RustcToolchain, Toolchain};
use crate::config::{CommanderConfig, ConfigError};
use crate::document::HandlerDocument;
use crate::factory::{ConstructionContext, HandlerFactory};
use crate::load_unit::{LoadUnit, LoadUnitError, TypeScope};
use crate::loader::{ArtifactLoader, DylibLoader};
use crate::management::ManagementCommand;
use crate::namespace::{Generation, NamespaceAllocator};
use crate::registry::{RegisteredHandlers, RegistryBridge};
use crate::samples;
use crate::stager::{self, StagingError};
use crate::watcher::SourceWatcher;

/// Reload errors
#[derive(Debug, thiserror::Error)]
pub enum ReloadError {
    #[error("A reload is already in progress")]
    ReloadInProgress,

    #[error("Toolchain unavailable: {0}")]
    ToolchainUnavailable(String),

    #[error("Staging failed: {0}")]
    Staging(#[from] StagingError),

    #[error("Compilation failed: {0}")]
    Compile(#[from] CompileError),

    #[error("Load unit error: {0}")]
    LoadUnit(#[from] LoadUnitError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Execution context unavailable: {0}")]
    ContextUnavailable(String),

    #[error("Reloader has been shut down")]
    ShutDown,
}

/// Where the reload pipeline currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReloadPhase {
    #[default]
    Idle,
    Draining,
    Compiling,
    Activating,
    Failed,
}

/// Reload lifecycle events
#[derive(Debug, Clone)]
pub enum ReloadEvent {
    PhaseChanged {
        phase: ReloadPhase,
    },
    Completed {
        generation: Generation,
        elapsed: Duration,
        commands: usize,
        listeners: usize,
    },
    Failed {
        error: String,
        elapsed: Duration,
    },
}

/// Outcome of a successful reload
#[derive(Debug, Clone)]
pub struct ReloadReport {
    pub generation: Generation,
    pub elapsed: Duration,
    /// Commands registered, in document order
    pub commands: Vec<String>,
    /// Listeners attached, in document order
    pub listeners: Vec<String>,
}

/// Read-only view of the orchestrator
#[derive(Debug, Clone, Default)]
pub struct ReloadSnapshot {
    pub phase: ReloadPhase,
    pub generation: Option<Generation>,
    pub commands: Vec<String>,
    pub listeners: Vec<String>,
}

/// Completion of a reload started with [`Reloader::reload`]
#[must_use = "dropping the handle does not cancel the reload"]
pub struct ReloadHandle {
    rx: oneshot::Receiver<Result<ReloadReport, ReloadError>>,
}

impl Future for ReloadHandle {
    type Output = Result<ReloadReport, ReloadError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| {
                Err(ReloadError::ContextUnavailable(
                    "reload task ended without a result".to_string(),
                ))
            })
        })
    }
}

/// State only the holder of the reload lock may touch
#[derive(Default)]
struct ReloadState {
    generation: Option<Generation>,
    active_load_unit: Option<Arc<LoadUnit>>,
    handlers: RegisteredHandlers,
}

/// Everything a [`Reloader`] is built from
pub struct ReloaderParts {
    pub config: CommanderConfig,
    pub application: Arc<dyn Application>,
    pub contexts: Arc<dyn ExecutionContexts>,
    pub toolchain: Option<Arc<dyn Toolchain>>,
    pub loader: Arc<dyn ArtifactLoader>,
    pub builtin_types: Option<Arc<dyn TypeScope>>,
    pub allocator: Option<NamespaceAllocator>,
}

impl ReloaderParts {
    /// Defaults: `rustc` from configuration or `PATH`, `libloading` artifacts
    pub fn new(
        config: CommanderConfig,
        application: Arc<dyn Application>,
        contexts: Arc<dyn ExecutionContexts>,
    ) -> Self {
        Self {
            config,
            application,
            contexts,
            toolchain: None,
            loader: Arc::new(DylibLoader::new()),
            builtin_types: None,
            allocator: None,
        }
    }

    pub fn with_toolchain(mut self, toolchain: Arc<dyn Toolchain>) -> Self {
        self.toolchain = Some(toolchain);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn ArtifactLoader>) -> Self {
        self.loader = loader;
        self
    }

    /// Types resolved before any generation's own artifacts
    pub fn with_builtin_types(mut self, types: Arc<dyn TypeScope>) -> Self {
        self.builtin_types = Some(types);
        self
    }

    pub fn with_allocator(mut self, allocator: NamespaceAllocator) -> Self {
        self.allocator = Some(allocator);
        self
    }
}

struct Inner {
    this: Weak<Inner>,
    config: CommanderConfig,
    source_dir: PathBuf,
    extension: Arc<dyn Extension>,
    application: Arc<dyn Application>,
    dispatcher: Arc<dyn Dispatcher>,
    contexts: Arc<dyn ExecutionContexts>,
    toolchain: Arc<dyn Toolchain>,
    loader: Arc<dyn ArtifactLoader>,
    builtin_types: Option<Arc<dyn TypeScope>>,
    allocator: NamespaceAllocator,
    bridge: RegistryBridge,
    state: Arc<Mutex<ReloadState>>,
    phase: RwLock<ReloadPhase>,
    published: RwLock<ReloadSnapshot>,
    deferred: parking_lot::Mutex<Vec<TempDir>>,
    events: broadcast::Sender<ReloadEvent>,
    runtime: Handle,
    shut_down: AtomicBool,
}

/// Drives reloads of runtime-compiled handlers. Cheap to clone.
#[derive(Clone)]
pub struct Reloader {
    inner: Arc<Inner>,
}

/// Non-owning reference to a [`Reloader`]
#[derive(Clone)]
pub struct WeakReloader {
    inner: Weak<Inner>,
}

impl WeakReloader {
    pub fn upgrade(&self) -> Option<Reloader> {
        self.inner.upgrade().map(|inner| Reloader { inner })
    }
}

impl Reloader {
    /// Validate settings, probe the toolchain and capture the tokio runtime.
    /// Must be called from within a tokio runtime.
    pub fn new(parts: ReloaderParts) -> Result<Self, ReloadError> {
        let ReloaderParts {
            mut config,
            application,
            contexts,
            toolchain,
            loader,
            builtin_types,
            allocator,
        } = parts;

        config.validate()?;
        // Document command names are lower-cased; the reserved one must match them.
        config.command_name = config.command_name.to_lowercase();

        let toolchain: Arc<dyn Toolchain> = match toolchain {
            Some(toolchain) => toolchain,
            None => Arc::new(
                RustcToolchain::locate(&config.toolchain).map_err(toolchain_unavailable)?,
            ),
        };
        let version = toolchain.probe().map_err(toolchain_unavailable)?;
        check_version(toolchain.as_ref(), &version)?;
        info!("Using toolchain {} ({})", toolchain.name(), version);

        let runtime = Handle::try_current()
            .map_err(|e| ReloadError::ContextUnavailable(e.to_string()))?;

        let extension = application.extension();
        let dispatcher = application.dispatcher();
        let bridge = RegistryBridge::new(
            dispatcher.clone(),
            config.command_name.clone(),
            extension.name().to_string(),
        );
        let allocator =
            allocator.unwrap_or_else(|| NamespaceAllocator::new(config.namespace_root.clone()));
        let (events, _) = broadcast::channel(256);

        let inner = Arc::new_cyclic(|this| Inner {
            this: this.clone(),
            source_dir: config.source_dir(),
            config,
            extension,
            application,
            dispatcher,
            contexts,
            toolchain,
            loader,
            builtin_types,
            allocator,
            bridge,
            state: Arc::new(Mutex::new(ReloadState::default())),
            phase: RwLock::new(ReloadPhase::Idle),
            published: RwLock::new(ReloadSnapshot::default()),
            deferred: parking_lot::Mutex::new(Vec::new()),
            events,
            runtime,
            shut_down: AtomicBool::new(false),
        });

        Ok(Self { inner })
    }

    /// Start a reload.
    ///
    /// Fails immediately with [`ReloadError::ReloadInProgress`] while another
    /// reload holds the reload lock. Otherwise the pipeline runs on the
    /// runtime and the returned handle resolves with its outcome; dropping
    /// the handle does not stop it.
    pub fn reload(&self) -> Result<ReloadHandle, ReloadError> {
        if self.inner.shut_down.load(Ordering::Acquire) {
            return Err(ReloadError::ShutDown);
        }
        let guard = self
            .inner
            .state
            .clone()
            .try_lock_owned()
            .map_err(|_| ReloadError::ReloadInProgress)?;

        let (tx, rx) = oneshot::channel();
        let inner = self.inner.clone();
        self.inner.runtime.spawn(async move {
            let result = inner.run(guard).await;
            let _ = tx.send(result);
        });
        Ok(ReloadHandle { rx })
    }

    /// Start a reload and call `on_complete` with its outcome
    pub fn reload_with<F>(&self, on_complete: F) -> Result<(), ReloadError>
    where
        F: FnOnce(Result<ReloadReport, ReloadError>) + Send + 'static,
    {
        let handle = self.reload()?;
        self.when_complete(handle, on_complete);
        Ok(())
    }

    /// Call `on_complete` with the outcome of an already started reload
    pub fn when_complete<F>(&self, handle: ReloadHandle, on_complete: F)
    where
        F: FnOnce(Result<ReloadReport, ReloadError>) + Send + 'static,
    {
        self.inner.runtime.spawn(async move {
            on_complete(handle.await);
        });
    }

    pub fn phase(&self) -> ReloadPhase {
        *self.inner.phase.read()
    }

    /// Last published state; never blocks on a running reload
    pub fn snapshot(&self) -> ReloadSnapshot {
        let mut snapshot = self.inner.published.read().clone();
        snapshot.phase = self.phase();
        snapshot
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReloadEvent> {
        self.inner.events.subscribe()
    }

    pub fn config(&self) -> &CommanderConfig {
        &self.inner.config
    }

    pub fn toolchain(&self) -> &Arc<dyn Toolchain> {
        &self.inner.toolchain
    }

    pub fn downgrade(&self) -> WeakReloader {
        WeakReloader {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The [`Commander`] handed to handler constructors
    pub fn commander(&self) -> Arc<dyn Commander> {
        self.inner.commander()
    }

    /// Start a [`SourceWatcher`] when `auto_reload` is enabled
    pub fn watch_sources(&self) -> Result<Option<SourceWatcher>, notify::Error> {
        if !self.inner.config.auto_reload {
            return Ok(None);
        }
        // Written before watching so the first reload does not trigger a second.
        self.inner.materialize_defaults();
        SourceWatcher::start(self).map(Some)
    }

    /// Register the management command under the reserved name
    pub async fn install_management_command(&self) -> Result<(), ReloadError> {
        let command: Arc<dyn DispatchCommand> = Arc::new(ManagementCommand::new(
            self.downgrade(),
            &self.inner.config.command_name,
        ));
        let dispatcher = self.inner.dispatcher.clone();
        let name = self.inner.config.command_name.clone();
        on_serial(self.inner.contexts.as_ref(), move || {
            if !dispatcher.register(&name, &name, command) {
                warn!("Label {} is taken; management command is namespaced", name);
            }
            if let Err(e) = dispatcher.notify_commands_changed() {
                warn!("Failed to sync commands: {}", e);
            }
        })
        .await
    }

    /// Unregister every handler, release the active load unit and delete
    /// deferred directories. Waits for a running reload to finish first;
    /// later reloads are rejected.
    pub async fn shutdown(&self) -> Result<(), ReloadError> {
        self.inner.shut_down.store(true, Ordering::Release);
        let guard = self.inner.state.clone().lock_owned().await;

        let inner = self.inner.clone();
        on_serial(self.inner.contexts.as_ref(), move || {
            let mut guard = guard;
            inner.drain_state(&mut guard);
            inner.bridge.notify_changed();
        })
        .await?;

        let deferred: Vec<TempDir> = std::mem::take(&mut *self.inner.deferred.lock());
        let mut count = 0;
        for dir in deferred {
            // Released output trees are already gone.
            if !dir.path().exists() {
                continue;
            }
            count += 1;
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!("Failed to delete {:?}: {}", path, e);
            }
        }
        info!("Reloader shut down; deleted {} deferred director(ies)", count);
        Ok(())
    }
}

fn toolchain_unavailable(e: CompileError) -> ReloadError {
    match e {
        CompileError::ToolchainUnavailable(message) => ReloadError::ToolchainUnavailable(message),
        other => ReloadError::ToolchainUnavailable(other.to_string()),
    }
}

/// Handlers link against the host, so a toolchain pinned to a version must report exactly it
fn check_version(toolchain: &dyn Toolchain, version: &str) -> Result<(), ReloadError> {
    match toolchain.required_version() {
        Some(required) if required != version => {
            Err(ReloadError::ToolchainUnavailable(format!(
                "{} reports {:?}, but the host was built with {:?}",
                toolchain.name(),
                version,
                required
            )))
        }
        _ => Ok(()),
    }
}

/// Run `f` on the serial context and wait for its result
async fn on_serial<T, F>(contexts: &dyn ExecutionContexts, f: F) -> Result<T, ReloadError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    contexts.run_serial(Box::new(move || {
        let _ = tx.send(f());
    }));
    rx.await
        .map_err(|_| ReloadError::ContextUnavailable("serial context dropped the task".to_string()))
}

/// Run `f` on the background context and wait for its result
async fn on_background<T, F>(contexts: &dyn ExecutionContexts, f: F) -> Result<T, ReloadError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    contexts.run_background(Box::new(move || {
        let _ = tx.send(f());
    }));
    rx.await.map_err(|_| {
        ReloadError::ContextUnavailable("background context dropped the task".to_string())
    })
}

impl Inner {
    async fn run(
        self: Arc<Self>,
        guard: OwnedMutexGuard<ReloadState>,
    ) -> Result<ReloadReport, ReloadError> {
        let start = Instant::now();
        info!("Reloading handlers from {:?}", self.source_dir);

        // The lock stays held until the final phase is published.
        let (result, guard) = self.clone().pipeline(guard, start).await;
        match &result {
            Ok(report) => {
                self.set_phase(ReloadPhase::Idle);
                info!(
                    "Reload of {} completed in {} ms",
                    report.generation,
                    report.elapsed.as_millis()
                );
                let _ = self.events.send(ReloadEvent::Completed {
                    generation: report.generation.clone(),
                    elapsed: report.elapsed,
                    commands: report.commands.len(),
                    listeners: report.listeners.len(),
                });
            }
            Err(e) => {
                self.set_phase(ReloadPhase::Failed);
                error!("Failed to reload: {}", e);
                let _ = self.events.send(ReloadEvent::Failed {
                    error: e.to_string(),
                    elapsed: start.elapsed(),
                });
                self.set_phase(ReloadPhase::Idle);
            }
        }
        drop(guard);
        result
    }

    async fn pipeline(
        self: Arc<Self>,
        guard: OwnedMutexGuard<ReloadState>,
        start: Instant,
    ) -> (
        Result<ReloadReport, ReloadError>,
        Option<OwnedMutexGuard<ReloadState>>,
    ) {
        self.set_phase(ReloadPhase::Draining);
        let this = self.clone();
        let drained = on_serial(self.contexts.as_ref(), move || {
            let mut guard = guard;
            let document = this.drain(&mut guard);
            (guard, Arc::new(document))
        })
        .await;
        let (guard, document) = match drained {
            Ok(drained) => drained,
            Err(e) => return (Err(e), None),
        };

        self.set_phase(ReloadPhase::Compiling);
        let this = self.clone();
        let compile_document = document.clone();
        let compiled = on_background(self.contexts.as_ref(), move || {
            this.compile(&compile_document)
        })
        .await;
        let (generation, unit) = match compiled {
            Ok(Ok(compiled)) => compiled,
            Ok(Err(e)) | Err(e) => return (Err(e), Some(guard)),
        };

        self.set_phase(ReloadPhase::Activating);
        let this = self.clone();
        let activated = on_serial(self.contexts.as_ref(), move || {
            let mut guard = guard;
            let report = this.activate(&mut guard, generation, unit, &document, start);
            (guard, report)
        })
        .await;
        match activated {
            Ok((guard, report)) => (Ok(report), Some(guard)),
            Err(e) => (Err(e), None),
        }
    }

    /// Serial: tear down the previous generation and read the document
    fn drain(&self, state: &mut ReloadState) -> HandlerDocument {
        self.drain_state(state);
        self.materialize_defaults();

        let handlers_path = self.config.handlers_path();
        match HandlerDocument::load(&handlers_path) {
            Ok(document) => document,
            Err(e) => {
                error!("Failed to load handler document {:?}: {}", handlers_path, e);
                HandlerDocument::default()
            }
        }
    }

    /// Write the sample sources and default document where they are missing
    fn materialize_defaults(&self) {
        match samples::materialize(&self.source_dir) {
            Ok(true) => info!("Created sample sources in {:?}", self.source_dir),
            Ok(false) => {}
            Err(e) => error!("Failed to create sample sources in {:?}: {}", self.source_dir, e),
        }

        let handlers_path = self.config.handlers_path();
        if let Err(e) = HandlerDocument::save_default(&handlers_path, samples::DEFAULT_DOCUMENT) {
            error!("Failed to save default handler document {:?}: {}", handlers_path, e);
        }
    }

    fn drain_state(&self, state: &mut ReloadState) {
        self.bridge.unregister_all(&mut state.handlers);

        if let Some(unit) = state.active_load_unit.take() {
            if let Err(e) = unit.release() {
                error!("Failed to release load unit of {}: {}", unit.generation(), e);
            }
        }
        if let Some(generation) = state.generation.take() {
            debug!("Drained {}", generation);
        }
        self.publish(state);
    }

    /// Background: stage and compile the sources of a new generation
    fn compile(
        &self,
        document: &HandlerDocument,
    ) -> Result<(Generation, Arc<LoadUnit>), ReloadError> {
        let mut search_paths = self.config.library_paths.clone();
        search_paths.extend(Classpath::default_search_paths());
        let classpath = Classpath::setup(&search_paths, &document.classpath_imports)?;

        let generation = self.allocator.next();
        info!("Compiling generation {}", generation);

        // Staged sources are only read by the compiler; dropping the guard deletes them.
        let staging = tempfile::Builder::new().prefix("hotcmd-src-").tempdir()?;
        stager::stage(
            &generation,
            &self.source_dir,
            staging.path(),
            self.toolchain.syntax(),
        )?;

        let pool = CompilerPool::new(self.toolchain.clone(), &self.config);
        let outcome = pool.compile_all(staging.path(), &classpath, true);
        let staging_root = staging.path().to_path_buf();
        if let Err(e) = staging.close() {
            warn!("Failed to delete staged sources {:?}: {}", staging_root, e);
        }
        let output = outcome?.into_root();
        let output_root = output.path().to_path_buf();
        self.defer_cleanup(output);

        let unit = LoadUnit::open(
            generation.clone(),
            &output_root,
            self.loader.clone(),
            self.builtin_types.clone(),
        )?;
        Ok((generation, Arc::new(unit)))
    }

    /// Serial: instantiate and register the handlers of a compiled generation
    fn activate(
        &self,
        state: &mut ReloadState,
        generation: Generation,
        unit: Arc<LoadUnit>,
        document: &HandlerDocument,
        start: Instant,
    ) -> ReloadReport {
        let factory = HandlerFactory::new(self.construction_context());

        for name in &document.listeners {
            let registered = factory
                .instantiate(&unit, &generation.qualify(name))
                .map_err(|e| e.to_string())
                .and_then(|instance| {
                    self.bridge
                        .register_listener(instance)
                        .map_err(|e| e.to_string())
                });
            match registered {
                Ok(listener) => {
                    info!("Added listener {}", name);
                    state.handlers.listeners.push(listener);
                }
                Err(e) => error!("Failed to load listener {}: {}", name, e),
            }
        }

        for descriptor in &document.commands {
            if descriptor.name == self.config.command_name {
                warn!("Skipping reserved command name: {}", descriptor.name);
                continue;
            }
            let registered = factory
                .instantiate(&unit, &generation.qualify(&descriptor.type_name))
                .map_err(|e| e.to_string())
                .and_then(|instance| {
                    self.bridge
                        .register_command(descriptor.clone(), instance)
                        .map_err(|e| e.to_string())
                });
            match registered {
                Ok(command) => {
                    info!("Added command {}", descriptor.name);
                    state.handlers.commands.push(command);
                }
                Err(e) => error!("Failed to load command {}: {}", descriptor.name, e),
            }
        }

        self.bridge.notify_changed();

        state.generation = Some(generation.clone());
        state.active_load_unit = Some(unit);
        self.publish(state);

        ReloadReport {
            generation,
            elapsed: start.elapsed(),
            commands: state.handlers.command_names(),
            listeners: state.handlers.listener_names(),
        }
    }

    fn construction_context(&self) -> ConstructionContext {
        ConstructionContext {
            extension: self.extension.clone(),
            application: self.application.clone(),
            commander: self.commander(),
        }
    }

    fn commander(&self) -> Arc<dyn Commander> {
        Arc::new(CommanderHandle {
            reloader: WeakReloader {
                inner: self.this.clone(),
            },
            source_dir: self.source_dir.clone(),
        })
    }

    fn set_phase(&self, phase: ReloadPhase) {
        *self.phase.write() = phase;
        debug!("Reload phase: {:?}", phase);
        let _ = self.events.send(ReloadEvent::PhaseChanged { phase });
    }

    fn publish(&self, state: &ReloadState) {
        let mut published = self.published.write();
        published.generation = state.generation.clone();
        published.commands = state.handlers.command_names();
        published.listeners = state.handlers.listener_names();
    }

    /// Keep a temporary directory until shutdown
    fn defer_cleanup(&self, dir: TempDir) {
        debug!("Deferring cleanup of {:?}", dir.path());
        self.deferred.lock().push(dir);
    }
}

/// The [`Commander`] handlers see
struct CommanderHandle {
    reloader: WeakReloader,
    source_dir: PathBuf,
}

impl Commander for CommanderHandle {
    fn generation(&self) -> Option<u64> {
        self.reloader
            .upgrade()
            .and_then(|reloader| reloader.snapshot().generation)
            .map(|generation| generation.id())
    }

    fn source_dir(&self) -> &std::path::Path {
        &self.source_dir
    }

    fn request_reload(&self) -> bool {
        match self.reloader.upgrade() {
            Some(reloader) => reloader.reload().is_ok(),
            None => false,
        }
    }
}
