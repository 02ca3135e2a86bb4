use async_trait::async_trait;

use crate::kernel::segment::SegmentId;

#[derive(Debug, Clone, PartialEq)]
pub struct StoredAudio {
    pub url: String,
}

/// Failure reported by durable storage. `status` mirrors an HTTP status code;
/// `None` means the request never got a response (network, timeout).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("upload failed (status {status:?}): {message}")]
pub struct UploadError {
    pub status: Option<u16>,
    pub message: String,
}

impl UploadError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self { status: Some(status), message: message.into() }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into() }
    }

    pub fn timeout() -> Self {
        Self::network("attempt timed out")
    }

    /// 408/425/429/5xx and transport failures are transient; any other 4xx is not.
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(408 | 425 | 429) => true,
            Some(s) if (500..600).contains(&s) => true,
            Some(_) => false,
        }
    }
}

/// Durable Storage Uploader.
#[async_trait]
pub trait AudioUploader: Send + Sync {
    async fn upload(
        &self,
        article_id: &str,
        segment_id: SegmentId,
        audio: &[u8],
    ) -> Result<StoredAudio, UploadError>;
}
