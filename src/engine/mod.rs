//! Engine discovery, binding and dispatch.
//!
//! `binding` holds the three ways of reaching an engine, `registry` caches
//! one descriptor per location, and `dispatcher` is the render entry point
//! hosts call.

pub mod binding;
pub mod descriptor;
pub mod dispatcher;
pub mod registry;

pub use binding::{CancelToken, EngineBinding, InvokeContext, Probe};
pub use descriptor::{BindingKind, EngineDescriptor};
pub use dispatcher::Dispatcher;
pub use registry::EngineRegistry;
