//! Raw audio returned by an engine.

use serde::{Deserialize, Serialize};

/// Synthesized audio as an opaque byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "WireEngineOutput", try_from = "WireEngineOutput")]
pub struct EngineOutput {
    data: Vec<u8>,
}

impl EngineOutput {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Hand the buffer to the caller, releasing this output.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}

#[derive(Serialize, Deserialize)]
struct WireEngineOutput {
    #[serde(rename = "nWavData")]
    n_wav_data: i64,
    #[serde(rename = "wavData")]
    wav_data: Vec<u8>,
}

impl From<EngineOutput> for WireEngineOutput {
    fn from(output: EngineOutput) -> Self {
        Self {
            n_wav_data: i64::try_from(output.data.len()).unwrap_or(i64::MAX),
            wav_data: output.data,
        }
    }
}

impl TryFrom<WireEngineOutput> for EngineOutput {
    type Error = String;

    fn try_from(wire: WireEngineOutput) -> Result<Self, Self::Error> {
        if usize::try_from(wire.n_wav_data).ok() != Some(wire.wav_data.len()) {
            return Err(format!(
                "nWavData is {} but {} bytes were supplied",
                wire.n_wav_data,
                wire.wav_data.len()
            ));
        }
        Ok(Self::new(wire.wav_data))
    }
}
