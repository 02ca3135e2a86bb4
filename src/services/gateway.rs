use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::kernel::segment::WordTiming;

/// Provider-specific knobs. The gateway resolves these into a request; the
/// kernel passes them through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderParams {
    Azure(AzureParams),
    Elevenlabs(ElevenLabsParams),
    Gemini(GeminiParams),
}

impl Default for ProviderParams {
    fn default() -> Self {
        ProviderParams::Azure(AzureParams::default())
    }
}

impl ProviderParams {
    pub fn name(&self) -> &'static str {
        match self {
            ProviderParams::Azure(_) => "azure",
            ProviderParams::Elevenlabs(_) => "elevenlabs",
            ProviderParams::Gemini(_) => "gemini",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureParams {
    pub voice: String,
    pub region: String,
    /// Relative rate, 1.0 = normal.
    pub rate: f32,
}

impl Default for AzureParams {
    fn default() -> Self {
        Self { voice: "en-US-AvaMultilingualNeural".to_string(), region: "eastus".to_string(), rate: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevenLabsParams {
    pub voice_id: String,
    pub model_id: String,
    pub stability: f32,
    pub similarity_boost: f32,
}

impl Default for ElevenLabsParams {
    fn default() -> Self {
        Self {
            voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            model_id: "eleven_multilingual_v2".to_string(),
            stability: 0.5,
            similarity_boost: 0.75,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiParams {
    pub voice: String,
    pub model: String,
}

impl Default for GeminiParams {
    fn default() -> Self {
        Self { voice: "Kore".to_string(), model: "gemini-2.5-flash-preview-tts".to_string() }
    }
}

/// Normalized synthesis result.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub bytes: Vec<u8>,
    /// e.g. "audio/wav", "audio/mpeg"
    pub mime: String,
    /// Seconds, when the provider reports it.
    pub duration: Option<f64>,
    pub word_timings: Option<Vec<WordTiming>>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct SynthesisError {
    pub retryable: bool,
    pub message: String,
}

impl SynthesisError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self { retryable: true, message: message.into() }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self { retryable: false, message: message.into() }
    }
}

/// Voice Synthesis Gateway: text + provider params in, audio (+ timings) out.
#[async_trait]
pub trait VoiceSynthesisGateway: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        params: &ProviderParams,
    ) -> Result<SynthesizedAudio, SynthesisError>;
}
