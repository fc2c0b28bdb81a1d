//! A discovered engine and the binding it was committed to.

use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::contract::EngineInfo;
use crate::engine::binding::EngineBinding;
use crate::error::EngineError;

/// How an engine is reached. Variants are listed in probe priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingKind {
    Managed,
    Native,
    Process,
}

impl BindingKind {
    pub const PROBE_ORDER: [BindingKind; 3] =
        [BindingKind::Managed, BindingKind::Native, BindingKind::Process];

    /// Whether calls run inside this process.
    pub fn is_in_process(self) -> bool {
        !matches!(self, BindingKind::Process)
    }
}

impl std::fmt::Display for BindingKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BindingKind::Managed => "managed",
            BindingKind::Native => "native",
            BindingKind::Process => "process",
        };
        f.write_str(name)
    }
}

/// One discovered engine. Immutable once created; the registry hands out
/// shared references.
pub struct EngineDescriptor {
    location: String,
    info: EngineInfo,
    binding: Box<dyn EngineBinding>,
    invoke_lock: Mutex<()>,
}

impl EngineDescriptor {
    pub fn new(location: impl Into<String>, info: EngineInfo, binding: Box<dyn EngineBinding>) -> Self {
        Self {
            location: location.into(),
            info,
            binding,
            invoke_lock: Mutex::new(()),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn kind(&self) -> BindingKind {
        self.binding.kind()
    }

    pub fn info(&self) -> &EngineInfo {
        &self.info
    }

    pub fn binding(&self) -> &dyn EngineBinding {
        self.binding.as_ref()
    }

    /// Hold this to keep one call in flight for the engine.
    pub fn lock_invocations(&self) -> Result<MutexGuard<'_, ()>, EngineError> {
        self.invoke_lock.lock().map_err(|_| EngineError::LockPoisoned {
            component: format!("invoke_lock({})", self.location),
        })
    }
}

impl std::fmt::Debug for EngineDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineDescriptor")
            .field("location", &self.location)
            .field("kind", &self.kind())
            .field("info", &self.info)
            .finish()
    }
}
