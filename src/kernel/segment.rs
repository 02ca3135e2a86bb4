use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Position-derived identifier. Unique within one segment list; the same number
/// can reappear after a re-segmentation, which is why results are also matched
/// against the session token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId(pub usize);

impl SegmentId {
    pub const PREFIX: &'static str = "segment-";

    pub fn index(&self) -> usize {
        self.0
    }

    /// Parses `segment-<n>` (the form used in storage keys).
    pub fn parse(key: &str) -> Option<Self> {
        key.strip_prefix(Self::PREFIX)?.parse().ok().map(SegmentId)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", Self::PREFIX, self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentStatus {
    Idle,
    Generating,
    Ready,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Pending,
    Uploading,
    Success,
    Failed,
}

/// One spoken word, in seconds of playback time.
/// `end` may be non-finite when the provider only reports word starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WordTiming {
    pub start: f64,
    pub end: f64,
}

impl WordTiming {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

/// Drops entries with a non-finite start or a finite end before the start, then
/// orders by start. Returns `None` when nothing usable is left.
pub fn normalize_timings(mut timings: Vec<WordTiming>) -> Option<Vec<WordTiming>> {
    timings.retain(|w| w.start.is_finite() && !(w.end.is_finite() && w.end < w.start));
    if timings.is_empty() {
        return None;
    }
    timings.sort_by(|a, b| a.start.total_cmp(&b.start));
    Some(timings)
}

/// Where the playable bytes live.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioSource {
    /// Freshly synthesized, held in memory until uploaded (or dropped).
    Local { bytes: Arc<[u8]>, mime: String },
    /// Hydrated from durable storage; nothing to upload.
    Remote { url: String },
}

/// A playable clip. Each generation mints a new `clip_id`, so the playback
/// controller can tell a regenerated segment from the one it has loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub clip_id: Uuid,
    pub source: AudioSource,
    /// Seconds. `None` when the length is only known once the output decodes it.
    pub duration: Option<f64>,
}

/// Shared handle; cloning never copies the payload.
pub type AudioRef = Arc<AudioClip>;

impl AudioClip {
    pub fn local(bytes: Vec<u8>, mime: impl Into<String>, duration: Option<f64>) -> AudioRef {
        Arc::new(Self {
            clip_id: Uuid::new_v4(),
            source: AudioSource::Local { bytes: bytes.into(), mime: mime.into() },
            duration,
        })
    }

    pub fn remote(url: impl Into<String>, duration: Option<f64>) -> AudioRef {
        Arc::new(Self {
            clip_id: Uuid::new_v4(),
            source: AudioSource::Remote { url: url.into() },
            duration,
        })
    }

    /// Bytes eligible for upload, if this clip was generated locally.
    pub fn local_bytes(&self) -> Option<&Arc<[u8]>> {
        match &self.source {
            AudioSource::Local { bytes, .. } => Some(bytes),
            AudioSource::Remote { .. } => None,
        }
    }
}

/// Typical read-aloud pace, words per second.
pub const SPEECH_WORDS_PER_SEC: f64 = 2.5;

/// Provisional clip length for text whose audio length is unknown.
pub fn estimate_speech_secs(text: &str) -> f64 {
    text.split_whitespace().count() as f64 / SPEECH_WORDS_PER_SEC
}

/// Probes a RIFF/WAV payload for its length in seconds.
pub fn probe_wav_duration(bytes: &[u8]) -> Option<f64> {
    let reader = hound::WavReader::new(std::io::Cursor::new(bytes)).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(reader.duration() as f64 / spec.sample_rate as f64)
}

#[derive(Debug, Clone)]
pub struct Segment {
    pub id: SegmentId,
    pub text: String,
    pub status: SegmentStatus,
    pub audio: Option<AudioRef>,
    pub error: Option<String>,
    pub word_timings: Option<Vec<WordTiming>>,
    pub upload_status: UploadStatus,
    pub upload_attempts: u32,
    /// Last upload failure, kept separate from the generation `error`.
    pub upload_error: Option<String>,
    pub cloud_url: Option<String>,
}

impl Segment {
    pub fn new(id: SegmentId, text: String) -> Self {
        Self {
            id,
            text,
            status: SegmentStatus::Idle,
            audio: None,
            error: None,
            word_timings: None,
            upload_status: UploadStatus::Pending,
            upload_attempts: 0,
            upload_error: None,
            cloud_url: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SegmentStatus::Ready
    }

    /// Length of the clip: probed/declared duration first, then the last
    /// word end, then a reading-speed estimate over the text. Hydrated clips
    /// usually only have the last one.
    pub fn duration_hint(&self) -> Option<f64> {
        if let Some(d) = self.audio.as_ref().and_then(|a| a.duration) {
            return Some(d);
        }
        let from_timings = self
            .word_timings
            .as_ref()
            .and_then(|w| w.last())
            .map(|w| if w.end.is_finite() { w.end } else { w.start });
        from_timings.or_else(|| Some(estimate_speech_secs(&self.text)))
    }
}
