// Error types for the resampler host
//
// This module defines the engine error taxonomy, providing structured error
// handling with numeric codes suitable for reporting across a host boundary.

mod engine;

pub use engine::{log_engine_error, EngineError, EngineErrorCodes, InvocationCause};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the host boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
