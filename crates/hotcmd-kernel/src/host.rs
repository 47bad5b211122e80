//! Host extension points
//!
//! Handler constructors may receive one of three handles, from the most
//! general to the most specific:
//! - [`Extension`]: the minimal extension point every host offers
//! - [`Application`]: the concrete host application
//! - [`Commander`]: the reload runtime itself

use std::path::Path;
use std::sync::Arc;

use crate::dispatch::Dispatcher;

/// Minimal host extension point
pub trait Extension: Send + Sync {
    /// Name of the extension, used as the owner of registered listeners
    fn name(&self) -> &str;

    /// Directory the extension keeps its data in
    fn data_dir(&self) -> &Path;
}

/// The concrete host application
pub trait Application: Send + Sync {
    /// The extension point this application exposes
    fn extension(&self) -> Arc<dyn Extension>;

    /// The live command table and event bus
    fn dispatcher(&self) -> Arc<dyn Dispatcher>;

    /// Look up a connected sender by exact name
    fn find_sender(&self, _name: &str) -> Option<Arc<dyn crate::CommandSender>> {
        None
    }
}

/// Handle to the reload runtime
pub trait Commander: Send + Sync {
    /// Id of the active generation, `None` while nothing is active
    fn generation(&self) -> Option<u64>;

    /// Directory the handler sources are read from
    fn source_dir(&self) -> &Path;

    /// Ask for a reload. Returns `false` when the request was rejected,
    /// for example because a reload is already in flight.
    fn request_reload(&self) -> bool;
}
