//! InputModelBuilder: render item -> engine input.

use crate::contract::input::{DEFAULT_TEMPO, ENVELOPE_SLOTS, NEUTRAL_PERCENT};
use crate::contract::EngineInput;
use crate::error::EngineError;
use crate::render::item::{EnvelopePoint, RenderItem};
use crate::render::note::note_string;

/// Envelope points every render item must carry.
pub const ENVELOPE_POINTS: usize = 5;

/// Build the engine input for one render item.
///
/// Pure: only fields already on `item` are read. Fails with
/// [`EngineError::InvalidEnvelope`] when the envelope is not five
/// non-decreasing points.
pub fn build(item: &RenderItem) -> Result<EngineInput, EngineError> {
    let envelope = pack_envelope(&item.envelope, item.preutter, item.overlap)?;
    let oto = item.oto.unwrap_or_default();

    Ok(EngineInput {
        input_wave_file: item.raw_file.clone(),
        intermediate_wave_file: item.mid_file.clone(),
        output_wave_file: item.out_file.clone(),
        note_string: note_string(item.note_num),
        velocity: item.velocity.unwrap_or(NEUTRAL_PERCENT),
        flags: item.flags.clone().unwrap_or_default(),
        offset: oto.offset,
        required_length: item.required_length,
        consonant: oto.consonant,
        cutoff: oto.cutoff,
        volume: item.volume.unwrap_or(NEUTRAL_PERCENT),
        modulation: item.modulation.unwrap_or(NEUTRAL_PERCENT),
        tempo: item.tempo.unwrap_or(DEFAULT_TEMPO),
        pitch_bend: item.pitch_data.clone(),
        skip_over: item.skip_over.unwrap_or(0.0),
        dur_tick: item.dur_tick.unwrap_or(0),
        adjustment: item.length_adjustment.unwrap_or(0.0),
        envelope: envelope.to_vec(),
        last_note: item.last_note,
    })
}

/// Pack five envelope points into the fixed eleven-slot layout.
///
/// Slots: attack start, attack width, release width, amplitudes at points
/// 0/1/3/4, overlap, a reserved zero, sustain width, amplitude at point 2.
pub fn pack_envelope(
    points: &[EnvelopePoint],
    preutter: f64,
    overlap: f64,
) -> Result<[f64; ENVELOPE_SLOTS], EngineError> {
    validate_envelope(points)?;
    let p = points;

    Ok([
        round_to(p[0].x + preutter, 5),
        p[1].x - p[0].x,
        p[4].x - p[3].x,
        p[0].y,
        p[1].y,
        p[3].y,
        p[4].y,
        overlap,
        0.0,
        (p[2].x - p[1].x).max(0.0).min(p[3].x - p[2].x),
        p[2].y,
    ])
}

fn validate_envelope(points: &[EnvelopePoint]) -> Result<(), EngineError> {
    if points.len() != ENVELOPE_POINTS {
        return Err(EngineError::InvalidEnvelope {
            reason: format!(
                "expected {} points, got {}",
                ENVELOPE_POINTS,
                points.len()
            ),
        });
    }
    if let Some(index) = points
        .iter()
        .position(|point| !point.x.is_finite() || !point.y.is_finite())
    {
        return Err(EngineError::InvalidEnvelope {
            reason: format!("point {} is not finite", index),
        });
    }
    if let Some(index) = points.windows(2).position(|pair| pair[1].x < pair[0].x) {
        return Err(EngineError::InvalidEnvelope {
            reason: format!(
                "point {} x={} precedes point {} x={}",
                index + 1,
                points[index + 1].x,
                index,
                points[index].x
            ),
        });
    }
    Ok(())
}

// Midpoints round to even.
fn round_to(value: f64, digits: i32) -> f64 {
    let scale = 10f64.powi(digits);
    (value * scale).round_ties_even() / scale
}
