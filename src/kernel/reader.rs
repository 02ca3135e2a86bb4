use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::playback::{AudioOutput, PlaybackController, PlaybackEvent, PlaybackSession};
use super::scheduler::GenerationScheduler;
use super::segment::{SegmentId, SegmentStatus, WordTiming};
use super::store::{SegmentStore, SessionToken, StoreError, StoreEvent, StoreSnapshot};
use super::telemetry::event::TelemetryEvent;
use super::telemetry::metrics::TelemetrySnapshot;
use super::telemetry::{SharedTelemetry, TelemetryRecorder};
use super::upload::{UploadPipeline, UploadSummary};
use crate::config::LecternConfig;
use crate::error::{LecternError, Result};
use crate::services::gateway::{ProviderParams, VoiceSynthesisGateway};
use crate::services::segmenter::{content_key, Segmenter};
use crate::services::storage::AudioUploader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplaceOutcome {
    pub session: SessionToken,
    /// False when the text segmented to exactly the current list.
    pub content_changed: bool,
    pub content_key: u64,
    pub segments: usize,
}

/// One reading session: the store plus the generation queue, the player and
/// the upload pipeline that act on it. Constructed once and shared by
/// reference; replacing the source text resets it in place.
pub struct ReaderSession {
    store: Arc<SegmentStore>,
    scheduler: GenerationScheduler,
    playback: Mutex<PlaybackController>,
    uploads: UploadPipeline,
    segmenter: Segmenter,
    telemetry: SharedTelemetry,
}

impl ReaderSession {
    pub fn new(
        config: &LecternConfig,
        gateway: Arc<dyn VoiceSynthesisGateway>,
        uploader: Arc<dyn AudioUploader>,
        output: Box<dyn AudioOutput>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(SegmentStore::new());
        let telemetry = TelemetryRecorder::shared();

        let scheduler = GenerationScheduler::new(
            Arc::clone(&store),
            gateway,
            config.provider.clone(),
            config.generation_concurrency,
            config.generation_timeout(),
            Arc::clone(&telemetry),
        );
        let playback = PlaybackController::new(Arc::clone(&store), output, Arc::clone(&telemetry));
        let uploads = UploadPipeline::new(
            Arc::clone(&store),
            uploader,
            config.upload_concurrency,
            config.retry_policy(),
            Arc::clone(&telemetry),
        );

        Ok(Self {
            store,
            scheduler,
            playback: Mutex::new(playback),
            uploads,
            segmenter: Segmenter::default(),
            telemetry,
        })
    }

    pub fn store(&self) -> &Arc<SegmentStore> {
        &self.store
    }

    pub fn scheduler(&self) -> &GenerationScheduler {
        &self.scheduler
    }

    pub fn uploads(&self) -> &UploadPipeline {
        &self.uploads
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.store.subscribe()
    }

    pub fn telemetry(&self) -> TelemetrySnapshot {
        self.telemetry.lock().snapshot()
    }

    /// Segments `text` and installs it as the article's segment list.
    pub fn set_source_text(&self, article_id: &str, text: &str) -> ReplaceOutcome {
        self.set_segments(article_id, self.segmenter.segment(text))
    }

    /// Installs a pre-segmented list. Identical content for the same article
    /// keeps the current list and its audio; anything else mints a new
    /// session, drops queued work and resets the player.
    pub fn set_segments(&self, article_id: &str, segments: Vec<String>) -> ReplaceOutcome {
        let key = content_key(&segments);
        let current = self.store.snapshot();
        let unchanged = current.article_id.as_deref() == Some(article_id)
            && current.segments.len() == segments.len()
            && current.segments.iter().zip(&segments).all(|(s, t)| &s.text == t);

        if unchanged {
            debug!(article = article_id, content_key = key, "segment list unchanged");
            return ReplaceOutcome {
                session: current.session,
                content_changed: false,
                content_key: key,
                segments: segments.len(),
            };
        }

        let count = segments.len();
        self.playback.lock().reset();
        let handle = self.store.replace(Some(article_id.to_string()), segments);
        let dropped = self.scheduler.discard_stale(handle.token);
        self.telemetry
            .lock()
            .record(TelemetryEvent::SessionReset { segments: count });
        info!(
            article = article_id,
            session = handle.token.0,
            segments = count,
            content_key = key,
            dropped,
            "source text replaced"
        );

        ReplaceOutcome { session: handle.token, content_changed: true, content_key: key, segments: count }
    }

    /// Segments enqueued from now on use `params`; queued ones keep theirs.
    pub fn set_provider(&self, params: ProviderParams) {
        self.scheduler.set_provider(params);
    }

    pub fn enqueue(&self, ids: &[SegmentId]) -> Result<Vec<SegmentId>> {
        Ok(self.scheduler.enqueue(ids)?)
    }

    /// Enqueues every segment that has no audio yet (idle or errored).
    pub fn enqueue_all(&self) -> Vec<SegmentId> {
        let pending: Vec<SegmentId> = self
            .store
            .snapshot()
            .segments
            .iter()
            .filter(|s| matches!(s.status, SegmentStatus::Idle | SegmentStatus::Error))
            .map(|s| s.id)
            .collect();
        match self.scheduler.enqueue(&pending) {
            Ok(accepted) => accepted,
            Err(e) => {
                // Only reachable if the list was replaced mid-call
                warn!(error = %e, "enqueue_all raced a replacement");
                Vec::new()
            }
        }
    }

    /// Plays `id` if it is ready; otherwise moves it to the head of the
    /// generation queue. Returns whether playback started.
    pub fn play_now(&self, id: SegmentId) -> Result<bool> {
        let segment = self.store.get(id).ok_or(StoreError::UnknownSegment(id))?;
        if segment.is_ready() {
            self.playback.lock().play(id)?;
            return Ok(true);
        }
        self.scheduler.enqueue_front(&[id])?;
        Ok(false)
    }

    pub fn play(&self, id: SegmentId) -> Result<()> {
        Ok(self.playback.lock().play(id)?)
    }

    pub fn pause(&self) {
        self.playback.lock().pause();
    }

    pub fn toggle_play_pause(&self) -> Result<()> {
        Ok(self.playback.lock().toggle_play_pause()?)
    }

    pub fn stop(&self) {
        self.playback.lock().stop();
    }

    pub fn seek(&self, id: SegmentId, time: f64) -> Result<()> {
        Ok(self.playback.lock().seek(id, time)?)
    }

    pub fn step_time(&self, delta: f64) -> Result<()> {
        Ok(self.playback.lock().step_time(delta)?)
    }

    pub fn start_sequence_from(&self, id: SegmentId) -> Result<()> {
        Ok(self.playback.lock().start_sequence_from(id)?)
    }

    pub fn disable_sequence(&self) {
        self.playback.lock().disable_sequence();
    }

    pub fn playback(&self) -> PlaybackSession {
        self.playback.lock().session().clone()
    }

    pub fn subscribe_playback(&self) -> watch::Receiver<PlaybackSession> {
        self.playback.lock().subscribe()
    }

    /// Advances the media clock by one step.
    pub fn tick(&self) -> Result<Option<PlaybackEvent>> {
        Ok(self.playback.lock().tick()?)
    }

    /// Drives `tick` every `period` until `cancel` fires. Playback errors are
    /// logged and the loop keeps running; the controller has already cleared
    /// its state.
    pub async fn run_clock(&self, period: Duration, cancel: CancellationToken) {
        let mut cadence = interval(period);
        cadence.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = cadence.tick() => {}
            }
            match self.tick() {
                Ok(Some(event)) => debug!(?event, "playback event"),
                Ok(None) => {}
                Err(e) => warn!(error = %e, "playback stopped"),
            }
        }
        debug!("playback clock stopped");
    }

    pub async fn upload_all(&self, article_id: &str) -> Result<UploadSummary> {
        self.uploads.upload_all(article_id).await.map_err(LecternError::from)
    }

    /// Hydrates segments from stored audio URLs without generating them.
    pub fn load_audio_urls(&self, urls: &[String]) -> Vec<SegmentId> {
        let hydrated = self.store.load_audio_urls(urls);
        if !hydrated.is_empty() {
            info!(count = hydrated.len(), "segments hydrated from storage");
        }
        hydrated
    }

    pub fn load_segment_word_timings(&self, timings: &HashMap<String, Vec<WordTiming>>) -> usize {
        self.store.load_segment_word_timings(timings)
    }
}
