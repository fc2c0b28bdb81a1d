// Resampler Host - voice resampling engine ABI
// Discovers engines behind managed, native or process bindings and renders notes through them

// Module declarations
pub mod audio;
pub mod config;
pub mod contract;
pub mod engine;
pub mod error;
pub mod render;
pub mod telemetry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-exports for convenience
pub use config::HostConfig;
pub use contract::{EngineInfo, EngineInput, EngineOutput, FlagItem};
pub use engine::{BindingKind, CancelToken, Dispatcher, EngineRegistry, InvokeContext};
pub use error::{EngineError, ErrorCode, InvocationCause};
pub use render::{build, RenderItem};
