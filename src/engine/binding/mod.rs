//! Binding abstractions for talking to engines.
//!
//! Each binding kind implements [`EngineBinding`]. A binding holds only what
//! it needs to reach its engine; no state survives from one invocation to
//! the next.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::contract::{EngineInfo, EngineInput, EngineOutput};
use crate::engine::descriptor::BindingKind;
use crate::error::EngineError;

pub mod managed;
pub mod native;
pub mod process;

pub use managed::{
    ExportedRoutine, ExportedType, ManagedBinding, ManagedEngine, ManagedModule, ModuleCatalog,
    TypeShape,
};
pub use native::{NativeBinding, NativeEntryPoints};
pub use process::{encode_pitch_bend, ProcessBinding, ProcessOptions};

/// Trait implemented by every engine binding kind.
pub trait EngineBinding: Send + Sync {
    fn kind(&self) -> BindingKind;

    /// Query the engine's identity and flags.
    fn describe(&self) -> Result<EngineInfo, EngineError>;

    /// Synthesize one note.
    fn invoke(
        &self,
        input: &EngineInput,
        ctx: &InvokeContext,
    ) -> Result<EngineOutput, EngineError>;
}

/// Outcome of asking a binding kind whether it recognizes a location.
pub enum Probe {
    Bound(Box<dyn EngineBinding>),
    Unrecognized(String),
}

/// Shared flag used to request cancellation of an in-flight invocation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Per-call controls. Only process engines can honor them; in-process
/// engines cannot be interrupted once entered.
#[derive(Debug, Clone, Default)]
pub struct InvokeContext {
    pub timeout: Option<Duration>,
    pub cancel: CancelToken,
    started: Option<Instant>,
}

impl InvokeContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Count the timeout from `at`. An earlier anchor is kept, so time spent
    /// queued before the engine starts is charged to the same budget.
    pub fn anchored(mut self, at: Instant) -> Self {
        self.started.get_or_insert(at);
        self
    }

    /// Instant the timeout expires, counting from the anchor or `fallback`.
    pub fn deadline(&self, fallback: Instant) -> Option<Instant> {
        let started = self.started.unwrap_or(fallback);
        self.timeout.map(|timeout| started + timeout)
    }

    /// Timeout in whole milliseconds, for error reporting.
    pub fn timeout_ms(&self) -> u64 {
        self.timeout
            .map(|timeout| u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}
