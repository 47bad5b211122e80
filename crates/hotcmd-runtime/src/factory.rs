//! Handler construction
//!
//! Instantiates a resolved handler type by probing its constructors in a
//! fixed order and checks that the instance has at least one capability.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use hotcmd_kernel::{
    Application, Commander, ConstructError, Constructor, ConstructorArg, Extension, Handler,
    has_capability,
};
use tracing::debug;

use crate::load_unit::{LoadUnit, LoadUnitError, ResolvedType};
use crate::loader::LoadedArtifact;

/// Handler construction errors
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error(transparent)]
    Resolve(#[from] LoadUnitError),

    #[error("{0}")]
    Construction(ConstructionFailure),

    #[error("{type_name} is neither a command handler nor a listener")]
    UnsupportedCapability { type_name: String },
}

/// Why no constructor of a type could be used
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstructionFailure {
    pub type_name: String,
    /// Constructors whose invocation failed, with the failure
    pub failed: Vec<(Constructor, String)>,
}

impl fmt::Display for ConstructionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "No valid constructor found in {}", self.type_name)?;
        writeln!(f, "Type must offer one of these constructors:")?;
        for constructor in Constructor::PROBE_ORDER {
            writeln!(f, "- {}", constructor.signature())?;
        }
        for (constructor, message) in &self.failed {
            writeln!(f, "{} failed: {}", constructor, message)?;
        }
        Ok(())
    }
}

/// The values handed to handler constructors
#[derive(Clone)]
pub struct ConstructionContext {
    pub extension: Arc<dyn Extension>,
    pub application: Arc<dyn Application>,
    pub commander: Arc<dyn Commander>,
}

impl ConstructionContext {
    fn arg(&self, constructor: Constructor) -> ConstructorArg<'_> {
        match constructor {
            Constructor::NoArgs => ConstructorArg::NoArgs,
            Constructor::Extension => ConstructorArg::Extension(&self.extension),
            Constructor::Application => ConstructorArg::Application(&self.application),
            Constructor::Commander => ConstructorArg::Commander(&self.commander),
        }
    }
}

/// A constructed handler together with what keeps its code loaded
pub struct HandlerInstance {
    // Dropped before `origin`.
    handler: Arc<dyn Handler>,
    type_name: String,
    constructor: Constructor,
    origin: Option<Arc<dyn LoadedArtifact>>,
}

impl HandlerInstance {
    pub fn handler(&self) -> &Arc<dyn Handler> {
        &self.handler
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The constructor the instance was built with
    pub fn constructor(&self) -> Constructor {
        self.constructor
    }

    pub fn origin(&self) -> Option<&Arc<dyn LoadedArtifact>> {
        self.origin.as_ref()
    }

    pub fn is_command(&self) -> bool {
        self.handler.as_command().is_some()
    }

    pub fn is_listener(&self) -> bool {
        self.handler.as_listener().is_some()
    }
}

impl fmt::Debug for HandlerInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerInstance")
            .field("type_name", &self.type_name)
            .field("constructor", &self.constructor)
            .field("loaded", &self.origin.is_some())
            .finish()
    }
}

/// Builds handler instances out of resolved types
pub struct HandlerFactory {
    context: ConstructionContext,
}

impl HandlerFactory {
    pub fn new(context: ConstructionContext) -> Self {
        Self { context }
    }

    /// Resolve `qualified_name` in `unit` and construct it
    pub fn instantiate(
        &self,
        unit: &LoadUnit,
        qualified_name: &str,
    ) -> Result<HandlerInstance, FactoryError> {
        let resolved = unit.resolve(qualified_name)?;
        self.construct(resolved)
    }

    /// Construct an already resolved type.
    ///
    /// Constructors are tried in [`Constructor::PROBE_ORDER`]; the first one
    /// the type offers wins.
    pub fn construct(&self, resolved: ResolvedType) -> Result<HandlerInstance, FactoryError> {
        let (handler_type, origin) = resolved.into_parts();
        let type_name = handler_type.type_name().to_string();
        let mut failed = Vec::new();

        for constructor in Constructor::PROBE_ORDER {
            let arg = self.context.arg(constructor);
            let attempt = catch_unwind(AssertUnwindSafe(|| handler_type.construct(arg)))
                .unwrap_or_else(|payload| Err(ConstructError::Failed(panic_message(payload))));
            match attempt {
                Ok(handler) => {
                    if !has_capability(handler.as_ref()) {
                        return Err(FactoryError::UnsupportedCapability { type_name });
                    }
                    debug!("Constructed {} with {}", type_name, constructor);
                    return Ok(HandlerInstance {
                        handler,
                        type_name,
                        constructor,
                        origin,
                    });
                }
                Err(ConstructError::NoSuchConstructor) => {}
                Err(ConstructError::Failed(message)) => failed.push((constructor, message)),
            }
        }

        Err(FactoryError::Construction(ConstructionFailure { type_name, failed }))
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
