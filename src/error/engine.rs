// Engine error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Engine error code constants
///
/// Single source of truth for the codes a host receives alongside an
/// [`EngineError`].
///
/// Error code range: 3001-3006
pub struct EngineErrorCodes {}

impl EngineErrorCodes {
    /// No binding kind recognizes the engine location
    pub const ENGINE_NOT_FOUND: i32 = 3001;

    /// Engine metadata is malformed or missing
    pub const DESCRIBE_FAILED: i32 = 3002;

    /// Render item envelope violates the five-point precondition
    pub const INVALID_ENVELOPE: i32 = 3003;

    /// Engine call failed, timed out, or was cancelled
    pub const INVOCATION_FAILED: i32 = 3004;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 3005;

    /// Host configuration is unusable
    pub const CONFIG_INVALID: i32 = 3006;
}

/// Log an engine error with structured context
///
/// This function logs engine errors with structured fields including:
/// - error_code: Numeric error code for programmatic handling
/// - location: The engine location, when known
/// - message: Human-readable error message
/// - context: The operation that failed
pub fn log_engine_error(err: &EngineError, context: &str) {
    error!(
        "Engine error in {}: code={}, location={}, message={}",
        context,
        err.code(),
        err.location().unwrap_or("-"),
        err.message()
    );
}

/// Why a single engine invocation failed.
#[derive(Debug, Clone, PartialEq)]
pub enum InvocationCause {
    /// Diagnostic supplied by the engine itself
    Engine(String),

    /// The engine process could not be launched
    Spawn(String),

    /// The engine process exited unsuccessfully
    ExitStatus { code: Option<i32>, stderr: String },

    /// The engine process succeeded but never wrote its output file
    MissingOutput { path: String },

    /// The engine reported success with zero bytes of audio
    EmptyOutput,

    /// The engine did not finish within the caller's timeout
    Timeout { timeout_ms: u64 },

    /// The caller cancelled the invocation
    Cancelled,

    /// Input or output could not be converted across the ABI
    Encoding(String),

    /// An in-process engine routine panicked
    Panicked(String),
}

impl fmt::Display for InvocationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocationCause::Engine(msg) => write!(f, "engine reported: {}", msg),
            InvocationCause::Spawn(msg) => write!(f, "failed to launch engine: {}", msg),
            InvocationCause::ExitStatus { code, stderr } => {
                match code {
                    Some(code) => write!(f, "engine exited with code {}", code)?,
                    None => write!(f, "engine terminated by signal")?,
                }
                let stderr = stderr.trim();
                if !stderr.is_empty() {
                    write!(f, ": {}", stderr)?;
                }
                Ok(())
            }
            InvocationCause::MissingOutput { path } => {
                write!(f, "engine did not write output file {}", path)
            }
            InvocationCause::EmptyOutput => write!(f, "engine returned no audio data"),
            InvocationCause::Timeout { timeout_ms } => {
                write!(f, "timeout after {} ms", timeout_ms)
            }
            InvocationCause::Cancelled => write!(f, "cancelled"),
            InvocationCause::Encoding(msg) => write!(f, "ABI conversion failed: {}", msg),
            InvocationCause::Panicked(msg) => write!(f, "engine panicked: {}", msg),
        }
    }
}

/// Engine-related errors
///
/// These errors cover engine discovery, metadata retrieval, input
/// construction, and invocation.
///
/// Error code range: 3001-3006
#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// No binding kind recognizes the location
    EngineNotFound { location: String },

    /// Engine metadata could not be obtained or is incomplete
    Describe { location: String, reason: String },

    /// Render item envelope is not five non-decreasing points
    InvalidEnvelope { reason: String },

    /// Engine call failed
    Invocation {
        location: String,
        cause: InvocationCause,
    },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Host configuration is unusable
    Config { reason: String },
}

impl EngineError {
    pub fn invocation(location: impl Into<String>, cause: InvocationCause) -> Self {
        EngineError::Invocation {
            location: location.into(),
            cause,
        }
    }

    pub fn describe(location: impl Into<String>, reason: impl Into<String>) -> Self {
        EngineError::Describe {
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Engine location the error refers to, when there is one.
    pub fn location(&self) -> Option<&str> {
        match self {
            EngineError::EngineNotFound { location }
            | EngineError::Describe { location, .. }
            | EngineError::Invocation { location, .. } => Some(location),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            EngineError::Invocation {
                cause: InvocationCause::Timeout { .. },
                ..
            }
        )
    }
}

impl ErrorCode for EngineError {
    fn code(&self) -> i32 {
        match self {
            EngineError::EngineNotFound { .. } => EngineErrorCodes::ENGINE_NOT_FOUND,
            EngineError::Describe { .. } => EngineErrorCodes::DESCRIBE_FAILED,
            EngineError::InvalidEnvelope { .. } => EngineErrorCodes::INVALID_ENVELOPE,
            EngineError::Invocation { .. } => EngineErrorCodes::INVOCATION_FAILED,
            EngineError::LockPoisoned { .. } => EngineErrorCodes::LOCK_POISONED,
            EngineError::Config { .. } => EngineErrorCodes::CONFIG_INVALID,
        }
    }

    fn message(&self) -> String {
        match self {
            EngineError::EngineNotFound { location } => {
                format!("No engine binding recognizes {}", location)
            }
            EngineError::Describe { location, reason } => {
                format!("Failed to describe engine {}: {}", location, reason)
            }
            EngineError::InvalidEnvelope { reason } => {
                format!("Invalid envelope: {}", reason)
            }
            EngineError::Invocation { location, cause } => {
                format!("Engine {} failed: {}", location, cause)
            }
            EngineError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            EngineError::Config { reason } => format!("Invalid configuration: {}", reason),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EngineError (code {}): {}", self.code(), self.message())
    }
}

impl std::error::Error for EngineError {}
