//! Decoding of rendered waveform buffers.
//!
//! Engines return a complete RIFF/WAVE file image. Hosts that want samples
//! rather than bytes decode it here.

use std::io::Cursor;

use anyhow::{anyhow, Context, Result};

/// Interleaved PCM samples normalized to [-1.0, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    /// Frames per channel.
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            0
        } else {
            self.samples.len() / self.channels as usize
        }
    }

    pub fn duration_ms(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// Decode a WAV byte buffer (integer or float samples).
pub fn decode_wav(bytes: &[u8]) -> Result<DecodedAudio> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).context("parsing RIFF/WAVE header")?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|sample| sample.map_err(|err| anyhow!(err)))
            .collect::<Result<Vec<f32>>>()?,
        hound::SampleFormat::Int => {
            let max = ((1i64 << (spec.bits_per_sample - 1)) - 1) as f32;
            match spec.bits_per_sample {
                8 | 16 | 24 | 32 => reader
                    .samples::<i32>()
                    .map(|sample| {
                        sample
                            .map(|value| value as f32 / max)
                            .map_err(|err| anyhow!(err))
                    })
                    .collect::<Result<Vec<f32>>>()?,
                other => return Err(anyhow!("Unsupported bits per sample {}", other)),
            }
        }
    };

    Ok(DecodedAudio {
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        samples,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_i16(samples: &[i16], channels: u16) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 44_100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for &sample in samples {
                writer.write_sample(sample).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn decodes_int16_buffer() {
        let bytes = wav_i16(&[0, i16::MAX, -i16::MAX, 0], 2);
        let audio = decode_wav(&bytes).unwrap();
        assert_eq!(audio.sample_rate, 44_100);
        assert_eq!(audio.channels, 2);
        assert_eq!(audio.frames(), 2);
        assert!((audio.samples[1] - 1.0).abs() < 1e-6);
        assert!((audio.samples[2] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn decodes_float_buffer() {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22_050,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for i in 0..22_050 {
                writer.write_sample((i as f32 / 22_050.0) - 0.5).unwrap();
            }
            writer.finalize().unwrap();
        }
        let audio = decode_wav(&cursor.into_inner()).unwrap();
        assert_eq!(audio.frames(), 22_050);
        assert!((audio.duration_ms() - 1000.0).abs() < 1e-9);
        assert!((audio.samples[0] + 0.5).abs() < 1e-6);
    }

    #[test]
    fn rejects_non_wav_bytes() {
        assert!(decode_wav(b"not a wave file").is_err());
        assert!(decode_wav(&[]).is_err());
    }
}
