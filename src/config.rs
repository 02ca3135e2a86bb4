use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::kernel::scheduler::DEFAULT_GENERATION_CONCURRENCY;
use crate::kernel::upload::{RetryPolicy, DEFAULT_UPLOAD_CONCURRENCY};
use crate::services::gateway::{AzureParams, ElevenLabsParams, GeminiParams, ProviderParams};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}")]
    InvalidVar { name: &'static str, value: String },
    #[error("unknown provider {0:?} (expected azure, elevenlabs or gemini)")]
    UnknownProvider(String),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("upload_backoff_max_ms ({max}) is below upload_backoff_base_ms ({base})")]
    BackoffRange { base: u64, max: u64 },
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LecternConfig {
    pub generation_concurrency: usize,
    pub upload_concurrency: usize,
    pub generation_timeout_ms: u64,
    pub upload_max_attempts: u32,
    pub upload_backoff_base_ms: u64,
    pub upload_backoff_max_ms: u64,
    pub upload_attempt_timeout_ms: u64,
    pub playback_tick_ms: u64,
    pub gateway_url: String,
    pub storage_url: String,
    pub provider: ProviderParams,
}

impl Default for LecternConfig {
    fn default() -> Self {
        Self {
            generation_concurrency: DEFAULT_GENERATION_CONCURRENCY,
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            generation_timeout_ms: 60_000,
            upload_max_attempts: 3,
            upload_backoff_base_ms: 500,
            upload_backoff_max_ms: 8_000,
            upload_attempt_timeout_ms: 30_000,
            playback_tick_ms: 50,
            gateway_url: "http://localhost:8787/api/tts".to_string(),
            storage_url: "http://localhost:8787/api/audio".to_string(),
            provider: ProviderParams::default(),
        }
    }
}

impl LecternConfig {
    /// Reads `LECTERN_*` variables over the defaults, then validates.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// `from_env` over an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        parse_into(&lookup, "LECTERN_GENERATION_CONCURRENCY", &mut config.generation_concurrency)?;
        parse_into(&lookup, "LECTERN_UPLOAD_CONCURRENCY", &mut config.upload_concurrency)?;
        parse_into(&lookup, "LECTERN_GENERATION_TIMEOUT_MS", &mut config.generation_timeout_ms)?;
        parse_into(&lookup, "LECTERN_UPLOAD_MAX_ATTEMPTS", &mut config.upload_max_attempts)?;
        parse_into(&lookup, "LECTERN_UPLOAD_BACKOFF_BASE_MS", &mut config.upload_backoff_base_ms)?;
        parse_into(&lookup, "LECTERN_UPLOAD_BACKOFF_MAX_MS", &mut config.upload_backoff_max_ms)?;
        parse_into(&lookup, "LECTERN_UPLOAD_ATTEMPT_TIMEOUT_MS", &mut config.upload_attempt_timeout_ms)?;
        parse_into(&lookup, "LECTERN_PLAYBACK_TICK_MS", &mut config.playback_tick_ms)?;

        if let Some(url) = lookup("LECTERN_GATEWAY_URL") {
            config.gateway_url = url;
        }
        if let Some(url) = lookup("LECTERN_STORAGE_URL") {
            config.storage_url = url;
        }

        if let Some(name) = lookup("LECTERN_PROVIDER") {
            config.provider = match name.trim().to_ascii_lowercase().as_str() {
                "azure" => ProviderParams::Azure(AzureParams::default()),
                "elevenlabs" => ProviderParams::Elevenlabs(ElevenLabsParams::default()),
                "gemini" => ProviderParams::Gemini(GeminiParams::default()),
                _ => return Err(ConfigError::UnknownProvider(name)),
            };
        }
        if let Some(voice) = lookup("LECTERN_VOICE") {
            match &mut config.provider {
                ProviderParams::Azure(p) => p.voice = voice,
                ProviderParams::Elevenlabs(p) => p.voice_id = voice,
                ProviderParams::Gemini(p) => p.voice = voice,
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("generation_concurrency", self.generation_concurrency as u64),
            ("upload_concurrency", self.upload_concurrency as u64),
            ("upload_max_attempts", self.upload_max_attempts as u64),
            ("generation_timeout_ms", self.generation_timeout_ms),
            ("upload_attempt_timeout_ms", self.upload_attempt_timeout_ms),
            ("playback_tick_ms", self.playback_tick_ms),
        ];
        if let Some(&(name, _)) = positive.iter().find(|&&(_, v)| v == 0) {
            return Err(ConfigError::Zero(name));
        }
        if self.upload_backoff_max_ms < self.upload_backoff_base_ms {
            return Err(ConfigError::BackoffRange {
                base: self.upload_backoff_base_ms,
                max: self.upload_backoff_max_ms,
            });
        }
        Ok(())
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_millis(self.generation_timeout_ms)
    }

    pub fn playback_tick(&self) -> Duration {
        Duration::from_millis(self.playback_tick_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.upload_max_attempts,
            base_delay: Duration::from_millis(self.upload_backoff_base_ms),
            max_delay: Duration::from_millis(self.upload_backoff_max_ms),
            attempt_timeout: Duration::from_millis(self.upload_attempt_timeout_ms),
        }
    }
}

fn parse_into<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = lookup(name) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidVar { name, value })?;
    }
    Ok(())
}
