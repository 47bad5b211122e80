//! Handler types and constructor probing
//!
//! A compiled artifact exports exactly one [`HandlerType`]. The runtime turns a
//! handler type into a live [`Handler`] by probing its constructors in the fixed
//! order of [`Constructor::PROBE_ORDER`]; the first constructor that succeeds wins.

use std::fmt;
use std::sync::Arc;

use crate::handler::Handler;
use crate::host::{Application, Commander, Extension};

/// ABI version of the artifact exports. Bumped whenever [`HandlerType`] or the
/// host traits change shape.
pub const API_VERSION: u32 = 1;

/// Name of the exported symbol returning [`API_VERSION`]
pub const API_VERSION_SYMBOL: &[u8] = b"_hotcmd_api_version";

/// Name of the exported symbol returning the boxed handler type
pub const HANDLER_TYPE_SYMBOL: &[u8] = b"_hotcmd_handler_type";

/// Constructor shapes a handler type may offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Constructor {
    /// `fn new() -> Self`
    NoArgs,
    /// `fn new(extension: Arc<dyn Extension>) -> Self`
    Extension,
    /// `fn new(application: Arc<dyn Application>) -> Self`
    Application,
    /// `fn new(commander: Arc<dyn Commander>) -> Self`
    Commander,
}

impl Constructor {
    /// The order constructors are probed in
    pub const PROBE_ORDER: [Constructor; 4] = [
        Constructor::NoArgs,
        Constructor::Extension,
        Constructor::Application,
        Constructor::Commander,
    ];

    /// Human readable signature for diagnostics
    pub fn signature(&self) -> &'static str {
        match self {
            Constructor::NoArgs => "fn new() -> Self",
            Constructor::Extension => "fn new(extension: Arc<dyn Extension>) -> Self",
            Constructor::Application => "fn new(application: Arc<dyn Application>) -> Self",
            Constructor::Commander => "fn new(commander: Arc<dyn Commander>) -> Self",
        }
    }
}

impl fmt::Display for Constructor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.signature())
    }
}

/// The argument handed to one constructor probe
#[derive(Clone, Copy)]
pub enum ConstructorArg<'a> {
    NoArgs,
    Extension(&'a Arc<dyn Extension>),
    Application(&'a Arc<dyn Application>),
    Commander(&'a Arc<dyn Commander>),
}

impl ConstructorArg<'_> {
    /// The constructor shape this argument probes
    pub fn shape(&self) -> Constructor {
        match self {
            ConstructorArg::NoArgs => Constructor::NoArgs,
            ConstructorArg::Extension(_) => Constructor::Extension,
            ConstructorArg::Application(_) => Constructor::Application,
            ConstructorArg::Commander(_) => Constructor::Commander,
        }
    }
}

/// Outcome of a single failed constructor probe
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstructError {
    #[error("no such constructor")]
    NoSuchConstructor,

    #[error("constructor failed: {0}")]
    Failed(String),
}

/// A resolvable handler type
pub trait HandlerType: Send + Sync {
    /// Simple type name, e.g. `PingCommand`
    fn type_name(&self) -> &str;

    /// Try one constructor shape
    fn construct(&self, arg: ConstructorArg<'_>) -> Result<Arc<dyn Handler>, ConstructError>;
}

type NoArgsCtor = Box<dyn Fn() -> Arc<dyn Handler> + Send + Sync>;
type ExtensionCtor = Box<dyn Fn(Arc<dyn Extension>) -> Arc<dyn Handler> + Send + Sync>;
type ApplicationCtor = Box<dyn Fn(Arc<dyn Application>) -> Arc<dyn Handler> + Send + Sync>;
type CommanderCtor = Box<dyn Fn(Arc<dyn Commander>) -> Arc<dyn Handler> + Send + Sync>;

/// Closure-backed [`HandlerType`], the usual way a handler source describes itself
///
/// ```rust,ignore
/// hotcmd_kernel::declare_handler!(
///     HandlerTypeDef::new("PingCommand").with_no_args(|| PingCommand)
/// );
/// ```
pub struct HandlerTypeDef {
    name: String,
    no_args: Option<NoArgsCtor>,
    extension: Option<ExtensionCtor>,
    application: Option<ApplicationCtor>,
    commander: Option<CommanderCtor>,
}

impl HandlerTypeDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            no_args: None,
            extension: None,
            application: None,
            commander: None,
        }
    }

    pub fn with_no_args<H, F>(mut self, ctor: F) -> Self
    where
        H: Handler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.no_args = Some(Box::new(move || Arc::new(ctor()) as Arc<dyn Handler>));
        self
    }

    pub fn with_extension<H, F>(mut self, ctor: F) -> Self
    where
        H: Handler + 'static,
        F: Fn(Arc<dyn Extension>) -> H + Send + Sync + 'static,
    {
        self.extension = Some(Box::new(move |ext| Arc::new(ctor(ext)) as Arc<dyn Handler>));
        self
    }

    pub fn with_application<H, F>(mut self, ctor: F) -> Self
    where
        H: Handler + 'static,
        F: Fn(Arc<dyn Application>) -> H + Send + Sync + 'static,
    {
        self.application = Some(Box::new(move |app| Arc::new(ctor(app)) as Arc<dyn Handler>));
        self
    }

    pub fn with_commander<H, F>(mut self, ctor: F) -> Self
    where
        H: Handler + 'static,
        F: Fn(Arc<dyn Commander>) -> H + Send + Sync + 'static,
    {
        self.commander = Some(Box::new(move |cmd| Arc::new(ctor(cmd)) as Arc<dyn Handler>));
        self
    }

    /// Constructor shapes this definition offers
    pub fn offered(&self) -> Vec<Constructor> {
        let mut offered = Vec::new();
        if self.no_args.is_some() {
            offered.push(Constructor::NoArgs);
        }
        if self.extension.is_some() {
            offered.push(Constructor::Extension);
        }
        if self.application.is_some() {
            offered.push(Constructor::Application);
        }
        if self.commander.is_some() {
            offered.push(Constructor::Commander);
        }
        offered
    }
}

impl HandlerType for HandlerTypeDef {
    fn type_name(&self) -> &str {
        &self.name
    }

    fn construct(&self, arg: ConstructorArg<'_>) -> Result<Arc<dyn Handler>, ConstructError> {
        let built = match arg {
            ConstructorArg::NoArgs => self.no_args.as_ref().map(|c| c()),
            ConstructorArg::Extension(ext) => self.extension.as_ref().map(|c| c(ext.clone())),
            ConstructorArg::Application(app) => self.application.as_ref().map(|c| c(app.clone())),
            ConstructorArg::Commander(cmd) => self.commander.as_ref().map(|c| c(cmd.clone())),
        };
        built.ok_or(ConstructError::NoSuchConstructor)
    }
}

/// Export a handler type from a compiled handler source.
///
/// Emits the two symbols the runtime's dynamic loader looks up.
#[macro_export]
macro_rules! declare_handler {
    ($handler_type:expr) => {
        #[unsafe(no_mangle)]
        pub extern "C" fn _hotcmd_api_version() -> u32 {
            $crate::API_VERSION
        }

        #[unsafe(no_mangle)]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn _hotcmd_handler_type() -> *mut dyn $crate::HandlerType {
            let handler_type: Box<dyn $crate::HandlerType> = Box::new($handler_type);
            Box::into_raw(handler_type)
        }
    };
}
