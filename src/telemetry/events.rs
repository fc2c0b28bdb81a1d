//! Render event types published by the dispatcher.

use serde::{Deserialize, Serialize};

use crate::engine::descriptor::BindingKind;

/// Events describing engine discovery and per-note render outcomes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RenderEvent {
    EngineResolved {
        location: String,
        kind: BindingKind,
        engine: String,
    },
    RenderCompleted {
        location: String,
        bytes: usize,
        elapsed_ms: u64,
    },
    RenderFailed {
        location: String,
        code: i32,
        message: String,
    },
}

impl RenderEvent {
    pub fn location(&self) -> &str {
        match self {
            RenderEvent::EngineResolved { location, .. }
            | RenderEvent::RenderCompleted { location, .. }
            | RenderEvent::RenderFailed { location, .. } => location,
        }
    }
}
