//! Configuration management for the resampler host
//!
//! Runtime configuration is loaded from a JSON file so dispatch limits and
//! process-engine behavior can be tuned without recompilation. Every section
//! has defaults, and a missing or broken file falls back to them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::binding::ProcessOptions;

/// Default config file looked up by [`HostConfig::load`].
pub const DEFAULT_CONFIG_PATH: &str = "resampler_host.json";

/// Complete host configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub dispatch: DispatchConfig,
    pub process: ProcessConfig,
    pub telemetry: TelemetryConfig,
}

/// Dispatcher behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Keep one call in flight per in-process engine
    pub serialize_invocations: bool,
    /// Upper bound on concurrently running process engines
    pub max_concurrent_processes: usize,
    /// Process engine timeout; `null` waits indefinitely
    pub process_timeout_ms: Option<u64>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            serialize_invocations: false,
            max_concurrent_processes: 4,
            process_timeout_ms: Some(30_000),
        }
    }
}

impl DispatchConfig {
    pub fn process_timeout(&self) -> Option<Duration> {
        self.process_timeout_ms.map(Duration::from_millis)
    }

    /// Pool size actually used; zero is treated as one.
    pub fn process_slots(&self) -> usize {
        self.max_concurrent_processes.max(1)
    }
}

/// Process engine launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessConfig {
    /// Pass `!tempo` and the encoded pitch bend after the fixed arguments
    pub append_tempo_and_pitch: bool,
    pub working_dir: Option<PathBuf>,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            append_tempo_and_pitch: true,
            working_dir: None,
        }
    }
}

impl ProcessConfig {
    pub fn to_options(&self) -> ProcessOptions {
        ProcessOptions {
            append_tempo_and_pitch: self.append_tempo_and_pitch,
            working_dir: self.working_dir.clone(),
        }
    }
}

/// Render event collector sizing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub history_capacity: usize,
    pub channel_capacity: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            history_capacity: 64,
            channel_capacity: 256,
        }
    }
}

impl HostConfig {
    /// Load configuration from a JSON file
    ///
    /// Falls back to defaults, with a warning, if the file cannot be read
    /// or parsed.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load configuration from the working directory
    pub fn load() -> Self {
        Self::load_from_file(DEFAULT_CONFIG_PATH)
    }
}
