//! hotcmd kernel
//!
//! The contract between three parties:
//! - handler sources compiled at runtime (they implement [`Handler`] and export a
//!   [`HandlerType`] through [`declare_handler!`])
//! - the host application (it implements [`Dispatcher`], [`ExecutionContexts`],
//!   [`Extension`] and [`Application`])
//! - the reload runtime in `hotcmd-runtime`, which wires the two together

// handler capabilities
pub mod handler;
pub use handler::*;

// handler types and constructor probing
pub mod handler_type;
pub use handler_type::*;

// host extension points
pub mod host;
pub use host::*;

// dispatcher and execution contexts
pub mod dispatch;
pub use dispatch::*;
