//! hotcmd runtime
//!
//! Compiles handler sources at runtime and swaps the resulting command and
//! listener handlers into a live host without restarting it.
//!
//! ```text
//! sources/*.rs ──stage──▶ staging tree ──compile──▶ output tree ──load──▶ LoadUnit
//!                                                                           │
//!            Dispatcher ◀──register── RegistryBridge ◀──instantiate── HandlerFactory
//! ```
//!
//! [`Reloader`] drives the whole pipeline; every reload gets a fresh
//! [`Generation`] so artifacts of different reloads never collide.

pub mod compiler;
pub mod config;
pub mod contexts;
pub mod document;
pub mod factory;
pub mod load_unit;
pub mod loader;
pub mod management;
pub mod namespace;
pub mod registry;
pub mod reloader;
pub mod samples;
pub mod stager;
pub mod watcher;

/// Language edition handler sources are compiled with, matching the host's
pub const HOST_EDITION: &str = "2024";

/// `rustc --version` of the compiler that built the host
pub const HOST_RUSTC_VERSION: &str = env!("HOTCMD_HOST_RUSTC");

pub use compiler::{
    Classpath, CompileError, CompileOutcome, CompilerPool, RustcToolchain, Toolchain,
};
pub use config::{CommanderConfig, ConfigError, ToolchainConfig};
pub use contexts::TokioContexts;
pub use document::{DocumentError, HandlerDocument};
pub use factory::{ConstructionContext, FactoryError, HandlerFactory, HandlerInstance};
pub use load_unit::{BuiltinTypes, LoadUnit, LoadUnitError, ResolvedType, TypeScope};
pub use loader::{ArtifactLoader, DylibLoader, LoadedArtifact};
pub use management::ManagementCommand;
pub use namespace::{Generation, NamespaceAllocator};
pub use registry::{RegisteredHandlers, RegistryBridge, RegistryError};
pub use reloader::{
    ReloadError, ReloadEvent, ReloadHandle, ReloadPhase, ReloadReport, ReloadSnapshot, Reloader,
    ReloaderParts, WeakReloader,
};
pub use stager::{SourceSyntax, SourceUnit, StagingError};
pub use watcher::SourceWatcher;
