use anyhow::{anyhow, Context};
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::gateway::{ProviderParams, SynthesisError, SynthesizedAudio, VoiceSynthesisGateway};
use super::storage::{AudioUploader, StoredAudio, UploadError};
use crate::kernel::segment::{SegmentId, WordTiming};

/// Speech endpoint of the reading backend. Posts `{ text, provider, ... }` and
/// expects base64 audio back; vendor-specific shaping happens server side.
#[derive(Clone)]
pub struct HttpSynthesisGateway {
    client: Client,
    endpoint: String,
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    #[serde(flatten)]
    params: &'a ProviderParams,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SynthesisResponse {
    /// Base64-encoded audio.
    audio: String,
    #[serde(default = "default_mime")]
    mime_type: String,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    word_timings: Option<Vec<WordTiming>>,
}

fn default_mime() -> String {
    "audio/mpeg".to_string()
}

impl HttpSynthesisGateway {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
        }
    }

    fn decode(body: SynthesisResponse) -> anyhow::Result<SynthesizedAudio> {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(body.audio.trim())
            .context("audio payload is not valid base64")?;
        if bytes.is_empty() {
            return Err(anyhow!("audio payload is empty"));
        }
        Ok(SynthesizedAudio {
            bytes,
            mime: body.mime_type,
            duration: body.duration,
            word_timings: body.word_timings,
        })
    }
}

#[async_trait]
impl VoiceSynthesisGateway for HttpSynthesisGateway {
    async fn synthesize(&self, text: &str, params: &ProviderParams) -> Result<SynthesizedAudio, SynthesisError> {
        debug!(provider = params.name(), chars = text.len(), "synthesis request");
        let response = self
            .client
            .post(&self.endpoint)
            .json(&SynthesisRequest { text, params })
            .send()
            .await
            .map_err(|e| SynthesisError::transient(format!("synthesis request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            let message = format!("provider returned {status}: {}", truncate(&detail, 200));
            return Err(if is_transient(status) {
                SynthesisError::transient(message)
            } else {
                SynthesisError::permanent(message)
            });
        }

        let body: SynthesisResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::permanent(format!("invalid provider response: {e}")))?;
        Self::decode(body).map_err(|e| SynthesisError::permanent(format!("{e:#}")))
    }
}

/// Object-storage endpoint. `PUT {base}/{article}/{segment}` with the raw
/// audio; the response carries the public URL.
#[derive(Clone)]
pub struct HttpUploader {
    client: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    url: String,
}

impl HttpUploader {
    /// Per-attempt timeouts are enforced by the pipeline; the client only
    /// guards against hung connections.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn object_url(&self, article_id: &str, segment_id: SegmentId) -> String {
        format!("{}/{}/{}", self.base_url, article_id, segment_id)
    }
}

#[async_trait]
impl AudioUploader for HttpUploader {
    async fn upload(&self, article_id: &str, segment_id: SegmentId, audio: &[u8]) -> Result<StoredAudio, UploadError> {
        let response = self
            .client
            .put(self.object_url(article_id, segment_id))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    UploadError::timeout()
                } else {
                    UploadError::network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(UploadError::http(status.as_u16(), truncate(&detail, 200)));
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| UploadError::http(status.as_u16(), format!("invalid storage response: {e}")))?;
        Ok(StoredAudio { url: body.url })
    }
}

fn is_transient(status: StatusCode) -> bool {
    status.is_server_error() || matches!(status.as_u16(), 408 | 425 | 429)
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
