use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::segment::{AudioRef, SegmentId, SegmentStatus, WordTiming};
use super::store::{SegmentStore, SessionToken};
use super::sync::active_word_index;
use super::telemetry::event::{PlaybackEventKind, TelemetryEvent};
use super::telemetry::SharedTelemetry;

/// Resource-level failure from the audio output (decode, device, ...).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct OutputError(pub String);

/// The single audio-output resource. Implementations are driven by the
/// controller only.
pub trait AudioOutput: Send {
    /// Replaces whatever is loaded; position resets to zero. Returns the clip
    /// length in seconds (`duration_hint` is what the store knows about it).
    fn load(&mut self, clip: &AudioRef, duration_hint: Option<f64>) -> Result<f64, OutputError>;
    fn play(&mut self) -> Result<(), OutputError>;
    fn pause(&mut self);
    fn seek(&mut self, time: f64);
    fn unload(&mut self);
    fn position(&self) -> f64;
    /// True once the loaded clip has played through to its end.
    fn ended(&self) -> bool;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PlaybackError {
    #[error("unknown segment {0}")]
    UnknownSegment(SegmentId),
    #[error("segment {id} is not ready ({status:?})")]
    NotReady { id: SegmentId, status: SegmentStatus },
    #[error("playback of {id} failed: {source}")]
    Output { id: SegmentId, source: OutputError },
}

/// What the UI renders. One per application session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSession {
    pub active_segment_id: Option<SegmentId>,
    pub is_playing: bool,
    pub current_time: f64,
    pub duration: f64,
    pub sequence_mode_enabled: bool,
    pub active_word_index: Option<usize>,
}

/// Outcome of a clock tick (or of an immediate end on a zero-length clip).
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Ended(SegmentId),
    Advanced { from: SegmentId, to: SegmentId },
    SequenceFinished { last: SegmentId },
}

#[derive(Debug, Clone)]
struct LoadedClip {
    session: SessionToken,
    id: SegmentId,
    clip_id: Uuid,
    timings: Option<Vec<WordTiming>>,
}

/// Plays one segment at a time on the shared output, with optional
/// sequencing across the segment list.
pub struct PlaybackController {
    store: Arc<SegmentStore>,
    output: Box<dyn AudioOutput>,
    session: PlaybackSession,
    loaded: Option<LoadedClip>,
    updates: watch::Sender<PlaybackSession>,
    telemetry: SharedTelemetry,
}

impl PlaybackController {
    pub fn new(store: Arc<SegmentStore>, output: Box<dyn AudioOutput>, telemetry: SharedTelemetry) -> Self {
        let (updates, _) = watch::channel(PlaybackSession::default());
        Self { store, output, session: PlaybackSession::default(), loaded: None, updates, telemetry }
    }

    pub fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackSession> {
        self.updates.subscribe()
    }

    /// Starts `id`. Resumes in place if it is already loaded; any other
    /// source starts from zero.
    pub fn play(&mut self, id: SegmentId) -> Result<(), PlaybackError> {
        self.start(id)?;
        self.publish();
        Ok(())
    }

    pub fn pause(&mut self) {
        let Some(id) = self.session.active_segment_id else {
            return;
        };
        if self.session.is_playing {
            self.output.pause();
            self.session.is_playing = false;
            self.sync_position();
            self.record(Some(id), PlaybackEventKind::Paused);
            self.publish();
        }
    }

    pub fn toggle_play_pause(&mut self) -> Result<(), PlaybackError> {
        match self.session.active_segment_id {
            None => Ok(()),
            Some(_) if self.session.is_playing => {
                self.pause();
                Ok(())
            }
            Some(id) => self.play(id),
        }
    }

    /// Halts playback, clears the active segment and sequencing.
    pub fn stop(&mut self) {
        let was = self.session.active_segment_id;
        self.output.unload();
        self.loaded = None;
        self.session = PlaybackSession::default();
        if was.is_some() {
            self.record(was, PlaybackEventKind::Stopped);
        }
        self.publish();
    }

    /// Seeks within `id`, loading it first if another segment is loaded.
    /// The target is clamped to `[0, duration]`.
    pub fn seek(&mut self, id: SegmentId, time: f64) -> Result<(), PlaybackError> {
        if !self.is_loaded(id) {
            let resume = self.session.is_playing;
            self.load(id)?;
            if resume {
                self.output.play().map_err(|e| self.fail(id, e))?;
                self.session.is_playing = true;
            }
        }
        let target = if time.is_finite() { time.clamp(0.0, self.session.duration.max(0.0)) } else { 0.0 };
        self.output.seek(target);
        self.session.current_time = target;
        self.update_word();
        self.publish();
        Ok(())
    }

    /// Relative seek on the active segment; no-op when nothing is active.
    pub fn step_time(&mut self, delta: f64) -> Result<(), PlaybackError> {
        match self.session.active_segment_id {
            Some(id) => self.seek(id, self.session.current_time + delta),
            None => Ok(()),
        }
    }

    /// Enables sequence mode and starts at `id`. On each natural end the
    /// next *ready* segment in list order plays; non-ready ones are skipped.
    /// A rejected start leaves the current playback and its mode as they were.
    pub fn start_sequence_from(&mut self, id: SegmentId) -> Result<(), PlaybackError> {
        let previous = self.session.sequence_mode_enabled;
        self.session.sequence_mode_enabled = true;
        let result = self.start(id);
        if result.is_err() {
            // A failed output already cleared the session
            self.session.sequence_mode_enabled = previous && self.session.active_segment_id.is_some();
        } else {
            info!(segment = %id, "sequence started");
        }
        self.publish();
        result
    }

    pub fn disable_sequence(&mut self) {
        if self.session.sequence_mode_enabled {
            self.session.sequence_mode_enabled = false;
            self.publish();
        }
    }

    /// Clears everything; used when the segment list is replaced.
    pub fn reset(&mut self) {
        self.stop();
    }

    /// One media-clock step: refreshes position and word index and handles a
    /// natural end. Errors only when advancing to the next segment fails.
    pub fn tick(&mut self) -> Result<Option<PlaybackEvent>, PlaybackError> {
        let Some((session, id)) = self.loaded.as_ref().map(|l| (l.session, l.id)) else {
            return Ok(None);
        };
        if session != self.store.token() {
            debug!("segment list replaced under the player, stopping");
            self.stop();
            return Ok(None);
        }
        if !self.session.is_playing {
            return Ok(None);
        }

        self.sync_position();
        let event = if self.output.ended() {
            Some(self.on_natural_end(id)?)
        } else {
            None
        };
        self.publish();
        Ok(event)
    }

    fn start(&mut self, id: SegmentId) -> Result<(), PlaybackError> {
        if !self.is_loaded(id) {
            self.load(id)?;
        }
        self.output.play().map_err(|e| self.fail(id, e))?;
        self.session.is_playing = true;
        self.record(Some(id), PlaybackEventKind::Started);
        debug!(segment = %id, duration = self.session.duration, "playback started");

        if self.session.duration <= 0.0 {
            // Zero-length clip: completes immediately
            self.on_natural_end(id)?;
        }
        Ok(())
    }

    fn load(&mut self, id: SegmentId) -> Result<(), PlaybackError> {
        let segment = self.store.get(id).ok_or(PlaybackError::UnknownSegment(id))?;
        let audio = match (&segment.status, &segment.audio) {
            (SegmentStatus::Ready, Some(audio)) => audio.clone(),
            (status, _) => return Err(PlaybackError::NotReady { id, status: *status }),
        };

        let duration = self
            .output
            .load(&audio, segment.duration_hint())
            .map_err(|e| self.fail(id, e))?;

        self.loaded = Some(LoadedClip {
            session: self.store.token(),
            id,
            clip_id: audio.clip_id,
            timings: segment.word_timings.clone(),
        });
        self.session.active_segment_id = Some(id);
        self.session.duration = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        self.session.current_time = 0.0;
        self.session.is_playing = false;
        self.update_word();
        Ok(())
    }

    fn is_loaded(&self, id: SegmentId) -> bool {
        let Some(loaded) = &self.loaded else {
            return false;
        };
        if loaded.id != id || loaded.session != self.store.token() {
            return false;
        }
        // A regenerated segment carries a new clip and must be reloaded
        self.store
            .get(id)
            .and_then(|s| s.audio)
            .is_some_and(|a| a.clip_id == loaded.clip_id)
    }

    /// Natural end of the active clip. Zero-length clips met while advancing
    /// end immediately as well, so this loops rather than recursing.
    fn on_natural_end(&mut self, ended: SegmentId) -> Result<PlaybackEvent, PlaybackError> {
        let mut current = ended;

        loop {
            self.record(Some(current), PlaybackEventKind::Ended);

            if !self.session.sequence_mode_enabled {
                self.session.is_playing = false;
                self.session.current_time = self.session.duration;
                self.update_word();
                return Ok(PlaybackEvent::Ended(current));
            }

            let Some(next) = self.store.next_ready_after(current) else {
                info!(last = %current, "sequence finished");
                self.record(Some(current), PlaybackEventKind::SequenceFinished);
                self.output.unload();
                self.loaded = None;
                self.session = PlaybackSession::default();
                return Ok(PlaybackEvent::SequenceFinished { last: current });
            };

            if let Err(e) = self.load(next) {
                // Lost a race with the store; end the sequence rather than skip
                self.output.unload();
                self.loaded = None;
                self.session = PlaybackSession::default();
                self.publish();
                return Err(e);
            }
            self.output.play().map_err(|e| self.fail(next, e))?;
            self.session.is_playing = true;
            self.record(Some(next), PlaybackEventKind::Advanced);
            debug!(from = %current, to = %next, "sequence advanced");

            if self.session.duration > 0.0 {
                return Ok(PlaybackEvent::Advanced { from: ended, to: next });
            }
            current = next;
        }
    }

    /// Records a resource failure: nothing is retried, the active segment and
    /// sequencing are cleared.
    fn fail(&mut self, id: SegmentId, source: OutputError) -> PlaybackError {
        warn!(segment = %id, error = %source, "playback failed");
        self.record(Some(id), PlaybackEventKind::Failed);
        self.output.unload();
        self.loaded = None;
        self.session = PlaybackSession::default();
        self.publish();
        PlaybackError::Output { id, source }
    }

    fn sync_position(&mut self) {
        let pos = self.output.position();
        self.session.current_time = if pos.is_finite() { pos.clamp(0.0, self.session.duration) } else { 0.0 };
        self.update_word();
    }

    fn update_word(&mut self) {
        self.session.active_word_index = match (&self.loaded, self.session.active_segment_id) {
            (Some(loaded), Some(id)) if loaded.id == id => loaded
                .timings
                .as_deref()
                .and_then(|t| active_word_index(t, self.session.current_time)),
            _ => None,
        };
    }

    fn publish(&self) {
        self.updates.send_replace(self.session.clone());
    }

    fn record(&self, segment: Option<SegmentId>, event: PlaybackEventKind) {
        self.telemetry.lock().record(TelemetryEvent::PlaybackLifecycle { segment, event });
    }
}
