use parking_lot::RwLock;
use std::collections::HashMap;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::segment::{
    normalize_timings, AudioClip, AudioRef, Segment, SegmentId, SegmentStatus, UploadStatus,
    WordTiming,
};

const EVENT_CAPACITY: usize = 256;

/// Minted on every segment-list replacement. Async work captures the token at
/// dispatch time; the store refuses deltas carrying an older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(pub u64);

#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub token: SessionToken,
    /// Cancelled when the session is replaced.
    pub cancel: CancellationToken,
}

/// Strict state delta. This is the ONLY way segment state mutates.
#[derive(Debug, Clone)]
pub enum StoreDelta {
    GenerationStarted(SegmentId),
    GenerationSucceeded {
        id: SegmentId,
        audio: AudioRef,
        word_timings: Option<Vec<WordTiming>>,
    },
    GenerationFailed { id: SegmentId, message: String },
    UploadStarted(SegmentId),
    UploadAttemptFailed { id: SegmentId, message: String },
    UploadSucceeded { id: SegmentId, cloud_url: String },
    UploadFailed { id: SegmentId, message: String },
    Hydrated { id: SegmentId, cloud_url: String },
    WordTimingsLoaded { id: SegmentId, timings: Vec<WordTiming> },
}

impl StoreDelta {
    pub fn segment_id(&self) -> SegmentId {
        match self {
            StoreDelta::GenerationStarted(id) | StoreDelta::UploadStarted(id) => *id,
            StoreDelta::GenerationSucceeded { id, .. }
            | StoreDelta::GenerationFailed { id, .. }
            | StoreDelta::UploadAttemptFailed { id, .. }
            | StoreDelta::UploadSucceeded { id, .. }
            | StoreDelta::UploadFailed { id, .. }
            | StoreDelta::Hydrated { id, .. }
            | StoreDelta::WordTimingsLoaded { id, .. } => *id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StoreDelta::GenerationStarted(_) => "generation_started",
            StoreDelta::GenerationSucceeded { .. } => "generation_succeeded",
            StoreDelta::GenerationFailed { .. } => "generation_failed",
            StoreDelta::UploadStarted(_) => "upload_started",
            StoreDelta::UploadAttemptFailed { .. } => "upload_attempt_failed",
            StoreDelta::UploadSucceeded { .. } => "upload_succeeded",
            StoreDelta::UploadFailed { .. } => "upload_failed",
            StoreDelta::Hydrated { .. } => "hydrated",
            StoreDelta::WordTimingsLoaded { .. } => "word_timings_loaded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("stale session {stale:?} (current {current:?})")]
    StaleSession { stale: SessionToken, current: SessionToken },
    #[error("unknown segment {0}")]
    UnknownSegment(SegmentId),
    #[error("segment {id} rejects {delta} while {status:?}/{upload:?}")]
    InvalidTransition {
        id: SegmentId,
        delta: &'static str,
        status: SegmentStatus,
        upload: UploadStatus,
    },
}

impl StoreError {
    pub fn is_stale(&self) -> bool {
        matches!(self, StoreError::StaleSession { .. })
    }
}

/// Published after every committed change, in commit order.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    Replaced { session: SessionToken, count: usize },
    SegmentChanged { session: SessionToken, segment: Segment },
}

#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub session: SessionToken,
    pub article_id: Option<String>,
    pub version: u64,
    pub segments: Vec<Segment>,
}

#[derive(Debug)]
struct StoreState {
    session: SessionHandle,
    article_id: Option<String>,
    segments: Vec<Segment>,
    // Monotonic version, bumped on every committed delta
    version: u64,
}

/// Single source of truth for segment state. Every transition for one segment
/// is validated and committed under one write lock.
pub struct SegmentStore {
    state: RwLock<StoreState>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for SegmentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SegmentStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            state: RwLock::new(StoreState {
                session: SessionHandle { token: SessionToken(0), cancel: CancellationToken::new() },
                article_id: None,
                segments: Vec::new(),
                version: 0,
            }),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// Discards the whole list (dropping every audio handle it held), cancels
    /// the old session and creates fresh idle segments under a new token.
    pub fn replace(&self, article_id: Option<String>, texts: Vec<String>) -> SessionHandle {
        let mut state = self.state.write();
        state.session.cancel.cancel();

        let token = SessionToken(state.session.token.0 + 1);
        let handle = SessionHandle { token, cancel: CancellationToken::new() };
        state.session = handle.clone();
        state.article_id = article_id;
        state.segments = texts
            .into_iter()
            .enumerate()
            .map(|(i, text)| Segment::new(SegmentId(i), text))
            .collect();
        state.version += 1;

        let count = state.segments.len();
        info!(session = token.0, count, "segment list replaced");
        let _ = self.events.send(StoreEvent::Replaced { session: token, count });
        handle
    }

    pub fn session(&self) -> SessionHandle {
        self.state.read().session.clone()
    }

    pub fn token(&self) -> SessionToken {
        self.state.read().session.token
    }

    pub fn article_id(&self) -> Option<String> {
        self.state.read().article_id.clone()
    }

    pub fn version(&self) -> u64 {
        self.state.read().version
    }

    pub fn len(&self) -> usize {
        self.state.read().segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: SegmentId) -> Option<Segment> {
        self.state.read().segments.get(id.index()).cloned()
    }

    pub fn texts(&self) -> Vec<String> {
        self.state.read().segments.iter().map(|s| s.text.clone()).collect()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let state = self.state.read();
        StoreSnapshot {
            session: state.session.token,
            article_id: state.article_id.clone(),
            version: state.version,
            segments: state.segments.clone(),
        }
    }

    pub fn count_with_status(&self, status: SegmentStatus) -> usize {
        self.state.read().segments.iter().filter(|s| s.status == status).count()
    }

    /// First ready segment strictly after `id` in list order.
    pub fn next_ready_after(&self, id: SegmentId) -> Option<SegmentId> {
        let state = self.state.read();
        state
            .segments
            .iter()
            .skip(id.index() + 1)
            .find(|s| s.is_ready())
            .map(|s| s.id)
    }

    /// Validates and commits one delta. The segment is rebuilt off to the side
    /// and swapped in, so a rejected delta leaves no trace.
    pub fn apply(&self, token: SessionToken, delta: StoreDelta) -> Result<Segment, StoreError> {
        let mut state = self.state.write();
        let current = state.session.token;
        if token != current {
            debug!(stale = token.0, current = current.0, delta = delta.name(), "discarded stale delta");
            return Err(StoreError::StaleSession { stale: token, current });
        }

        let id = delta.segment_id();
        let slot = state
            .segments
            .get_mut(id.index())
            .ok_or(StoreError::UnknownSegment(id))?;

        let mut next = slot.clone();
        reduce(&mut next, delta)?;
        *slot = next.clone();
        state.version += 1;

        let _ = self.events.send(StoreEvent::SegmentChanged { session: token, segment: next.clone() });
        Ok(next)
    }

    /// Hydrates segments whose id appears as the file stem of a stored URL
    /// (`.../segment-3.mp3`). Returns the ids that became ready; segments that
    /// are not idle or errored are left alone.
    pub fn load_audio_urls(&self, urls: &[String]) -> Vec<SegmentId> {
        let token = self.token();
        let mut hydrated = Vec::new();
        for url in urls {
            let Some(id) = segment_id_from_url(url) else {
                debug!(%url, "audio url does not name a segment");
                continue;
            };
            match self.apply(token, StoreDelta::Hydrated { id, cloud_url: url.clone() }) {
                Ok(_) => hydrated.push(id),
                Err(e) => debug!(%url, error = %e, "skipped audio url"),
            }
        }
        hydrated
    }

    /// Attaches persisted word timings keyed by segment id string.
    pub fn load_segment_word_timings(&self, timings: &HashMap<String, Vec<WordTiming>>) -> usize {
        let token = self.token();
        let mut loaded = 0;
        for (key, words) in timings {
            let Some(id) = SegmentId::parse(key) else {
                debug!(%key, "word timing key does not name a segment");
                continue;
            };
            let delta = StoreDelta::WordTimingsLoaded { id, timings: words.clone() };
            if self.apply(token, delta).is_ok() {
                loaded += 1;
            }
        }
        loaded
    }
}

fn segment_id_from_url(url: &str) -> Option<SegmentId> {
    let path = url.split(['?', '#']).next()?;
    let file = path.rsplit('/').next()?;
    let stem = file.split_once('.').map(|(stem, _)| stem).unwrap_or(file);
    SegmentId::parse(stem)
}

/// Whether `delta` is a legal transition from the segment's current state.
fn admits(seg: &Segment, delta: &StoreDelta) -> bool {
    use SegmentStatus::*;
    match delta {
        StoreDelta::GenerationStarted(_) | StoreDelta::Hydrated { .. } => {
            matches!(seg.status, Idle | Error)
        }
        StoreDelta::GenerationSucceeded { .. } | StoreDelta::GenerationFailed { .. } => {
            seg.status == Generating
        }
        StoreDelta::UploadStarted(_) => {
            seg.status == Ready
                && seg.upload_status != UploadStatus::Success
                && seg.upload_status != UploadStatus::Uploading
                && seg.audio.as_ref().is_some_and(|a| a.local_bytes().is_some())
        }
        StoreDelta::UploadAttemptFailed { .. } | StoreDelta::UploadFailed { .. } => {
            seg.upload_status == UploadStatus::Uploading
        }
        StoreDelta::UploadSucceeded { .. } => {
            seg.upload_status == UploadStatus::Uploading && seg.status == Ready
        }
        StoreDelta::WordTimingsLoaded { .. } => true,
    }
}

/// Pure reduction: Segment + Delta -> next Segment, or the reason it is refused.
fn reduce(seg: &mut Segment, delta: StoreDelta) -> Result<(), StoreError> {
    use SegmentStatus::*;

    if !admits(seg, &delta) {
        return Err(StoreError::InvalidTransition {
            id: seg.id,
            delta: delta.name(),
            status: seg.status,
            upload: seg.upload_status,
        });
    }

    match delta {
        StoreDelta::GenerationStarted(_) => {
            seg.status = Generating;
            seg.error = None;
            seg.audio = None;
        }
        StoreDelta::GenerationSucceeded { audio, word_timings, .. } => {
            seg.status = Ready;
            seg.audio = Some(audio);
            seg.word_timings = word_timings.and_then(normalize_timings);
            seg.error = None;
            // New audio content: any previous upload no longer describes it
            seg.upload_status = UploadStatus::Pending;
            seg.upload_attempts = 0;
            seg.upload_error = None;
            seg.cloud_url = None;
        }
        StoreDelta::GenerationFailed { message, .. } => {
            seg.status = Error;
            seg.error = Some(message);
            seg.audio = None;
            seg.word_timings = None;
        }
        StoreDelta::UploadStarted(_) => {
            seg.upload_status = UploadStatus::Uploading;
            seg.upload_error = None;
        }
        StoreDelta::UploadAttemptFailed { message, .. } => {
            seg.upload_attempts += 1;
            seg.upload_error = Some(message);
        }
        StoreDelta::UploadSucceeded { cloud_url, .. } => {
            seg.upload_status = UploadStatus::Success;
            seg.upload_error = None;
            seg.cloud_url.get_or_insert(cloud_url);
        }
        StoreDelta::UploadFailed { message, .. } => {
            seg.upload_status = UploadStatus::Failed;
            seg.upload_error = Some(message);
        }
        StoreDelta::Hydrated { cloud_url, .. } => {
            seg.status = Ready;
            seg.audio = Some(AudioClip::remote(cloud_url.clone(), None));
            seg.error = None;
            seg.upload_status = UploadStatus::Success;
            seg.upload_error = None;
            seg.cloud_url = Some(cloud_url);
        }
        StoreDelta::WordTimingsLoaded { timings, .. } => {
            seg.word_timings = normalize_timings(timings);
        }
    }
    Ok(())
}
