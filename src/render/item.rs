//! External render item model.
//!
//! Everything here is produced upstream; optional fields fall back to the
//! neutral defaults when the input is built.

use serde::{Deserialize, Serialize};

/// One envelope control point: time (ms) and amplitude (percent).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePoint {
    pub x: f64,
    pub y: f64,
}

impl EnvelopePoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Phoneme boundary timings taken from the voicebank.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct OtoTiming {
    pub offset: f64,
    pub consonant: f64,
    pub cutoff: f64,
}

/// A note ready to be synthesized.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderItem {
    /// Source waveform
    pub raw_file: String,
    /// Intermediate waveform, used by engines that cache analysis
    pub mid_file: String,
    /// Where the engine writes its result
    pub out_file: String,
    /// MIDI note number
    pub note_num: i32,
    pub velocity: Option<f64>,
    pub flags: Option<String>,
    pub oto: Option<OtoTiming>,
    pub required_length: f64,
    pub volume: Option<f64>,
    pub modulation: Option<f64>,
    pub tempo: Option<f64>,
    /// Pitch curve in cents, already sampled at the engine tick rate
    pub pitch_data: Vec<i32>,
    pub skip_over: Option<f64>,
    pub dur_tick: Option<i32>,
    pub length_adjustment: Option<f64>,
    /// Phoneme pre-utterance (ms)
    pub preutter: f64,
    /// Overlap with the previous note (ms)
    pub overlap: f64,
    pub envelope: Vec<EnvelopePoint>,
    pub last_note: bool,
}
