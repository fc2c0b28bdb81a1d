//! The complete parameter set for one synthesis call.

use serde::{Deserialize, Serialize};

/// Neutral velocity, volume and modulation value.
pub const NEUTRAL_PERCENT: f64 = 100.0;

/// Tempo used when none is supplied.
pub const DEFAULT_TEMPO: f64 = 120.0;

/// Number of envelope slots produced by the input builder.
pub const ENVELOPE_SLOTS: usize = 11;

/// One note's synthesis parameters in fixed ABI order.
///
/// Every field always carries a value; [`EngineInput::default`] is the
/// neutral input. The pitch-bend sample count is derived from
/// [`pitch_bend`](Self::pitch_bend) and cannot drift from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "WireEngineInput", try_from = "WireEngineInput")]
pub struct EngineInput {
    pub input_wave_file: String,
    pub intermediate_wave_file: String,
    pub output_wave_file: String,
    /// Pitch name such as `C4`
    pub note_string: String,
    /// Consonant velocity, 0-200
    pub velocity: f64,
    /// Engine-specific free-form flag string
    pub flags: String,
    /// Offset into the source waveform (ms)
    pub offset: f64,
    /// Required output length (ms)
    pub required_length: f64,
    /// Consonant boundary (ms)
    pub consonant: f64,
    /// Cutoff (ms); negative values are measured from the offset
    pub cutoff: f64,
    /// Volume, 0-200
    pub volume: f64,
    /// Modulation / pitch flattening, 0-200
    pub modulation: f64,
    /// Tempo (BPM)
    pub tempo: f64,
    /// Pitch deviation in cents, one sample per tick interval
    pub pitch_bend: Vec<i32>,
    /// Skip-over / pre-utterance offset (ms)
    pub skip_over: f64,
    /// Note duration in ticks
    pub dur_tick: i32,
    pub adjustment: f64,
    pub envelope: Vec<f64>,
    /// Last note of a sequence; only some engines read it
    pub last_note: bool,
}

impl EngineInput {
    /// `nPitchBend` as carried across the ABI.
    pub fn pitch_bend_count(&self) -> i32 {
        i32::try_from(self.pitch_bend.len()).unwrap_or(i32::MAX)
    }
}

impl Default for EngineInput {
    fn default() -> Self {
        Self {
            input_wave_file: String::new(),
            intermediate_wave_file: String::new(),
            output_wave_file: String::new(),
            note_string: String::new(),
            velocity: NEUTRAL_PERCENT,
            flags: String::new(),
            offset: 0.0,
            required_length: 0.0,
            consonant: 0.0,
            cutoff: 0.0,
            volume: NEUTRAL_PERCENT,
            modulation: NEUTRAL_PERCENT,
            tempo: DEFAULT_TEMPO,
            pitch_bend: Vec::new(),
            skip_over: 0.0,
            dur_tick: 0,
            adjustment: 0.0,
            envelope: vec![0.0, 0.0],
            last_note: false,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireEngineInput {
    #[serde(rename = "inputWaveFile")]
    input_wave_file: String,
    #[serde(rename = "intermediateWaveFile")]
    intermediate_wave_file: String,
    #[serde(rename = "outputWaveFile")]
    output_wave_file: String,
    #[serde(rename = "NoteString")]
    note_string: String,
    #[serde(rename = "Velocity")]
    velocity: f64,
    #[serde(rename = "StrFlags")]
    str_flags: String,
    #[serde(rename = "Offset")]
    offset: f64,
    #[serde(rename = "RequiredLength")]
    required_length: f64,
    #[serde(rename = "Consonant")]
    consonant: f64,
    #[serde(rename = "Cutoff")]
    cutoff: f64,
    #[serde(rename = "Volume")]
    volume: f64,
    #[serde(rename = "Modulation")]
    modulation: f64,
    #[serde(rename = "Tempo")]
    tempo: f64,
    #[serde(rename = "nPitchBend")]
    n_pitch_bend: i32,
    #[serde(rename = "pitchBend")]
    pitch_bend: Vec<i32>,
    stp: f64,
    #[serde(rename = "durTick")]
    dur_tick: i32,
    adjustment: f64,
    envelope: Vec<f64>,
    lastnote: bool,
}

impl From<EngineInput> for WireEngineInput {
    fn from(input: EngineInput) -> Self {
        Self {
            n_pitch_bend: input.pitch_bend_count(),
            input_wave_file: input.input_wave_file,
            intermediate_wave_file: input.intermediate_wave_file,
            output_wave_file: input.output_wave_file,
            note_string: input.note_string,
            velocity: input.velocity,
            str_flags: input.flags,
            offset: input.offset,
            required_length: input.required_length,
            consonant: input.consonant,
            cutoff: input.cutoff,
            volume: input.volume,
            modulation: input.modulation,
            tempo: input.tempo,
            pitch_bend: input.pitch_bend,
            stp: input.skip_over,
            dur_tick: input.dur_tick,
            adjustment: input.adjustment,
            envelope: input.envelope,
            lastnote: input.last_note,
        }
    }
}

impl TryFrom<WireEngineInput> for EngineInput {
    type Error = String;

    fn try_from(wire: WireEngineInput) -> Result<Self, Self::Error> {
        if usize::try_from(wire.n_pitch_bend).ok() != Some(wire.pitch_bend.len()) {
            return Err(format!(
                "nPitchBend is {} but {} pitch-bend samples were supplied",
                wire.n_pitch_bend,
                wire.pitch_bend.len()
            ));
        }
        Ok(Self {
            input_wave_file: wire.input_wave_file,
            intermediate_wave_file: wire.intermediate_wave_file,
            output_wave_file: wire.output_wave_file,
            note_string: wire.note_string,
            velocity: wire.velocity,
            flags: wire.str_flags,
            offset: wire.offset,
            required_length: wire.required_length,
            consonant: wire.consonant,
            cutoff: wire.cutoff,
            volume: wire.volume,
            modulation: wire.modulation,
            tempo: wire.tempo,
            pitch_bend: wire.pitch_bend,
            skip_over: wire.stp,
            dur_tick: wire.dur_tick,
            adjustment: wire.adjustment,
            envelope: wire.envelope,
            last_note: wire.lastnote,
        })
    }
}
