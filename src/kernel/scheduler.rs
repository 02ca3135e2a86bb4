use futures::FutureExt;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pool::{Placement, Submission, WorkerPool};
use super::segment::{probe_wav_duration, AudioClip, SegmentId, SegmentStatus};
use super::store::{SegmentStore, SessionHandle, SessionToken, StoreDelta, StoreError};
use super::telemetry::event::{GenerationEventKind, PoolKind, TelemetryEvent};
use super::telemetry::SharedTelemetry;
use crate::services::gateway::{ProviderParams, SynthesizedAudio, VoiceSynthesisGateway};

pub const DEFAULT_GENERATION_CONCURRENCY: usize = 3;

type GenerationKey = (SessionToken, SegmentId);

/// Bounded-concurrency generation queue in front of the synthesis gateway.
///
/// `enqueue` flips each accepted segment to `generating` (and publishes it)
/// before anything is dispatched. Results are applied through the store with
/// the session token captured at enqueue time, so results for a replaced
/// segment list are dropped.
pub struct GenerationScheduler {
    store: Arc<SegmentStore>,
    gateway: Arc<dyn VoiceSynthesisGateway>,
    pool: WorkerPool<GenerationKey>,
    params: RwLock<ProviderParams>,
    timeout: Duration,
    telemetry: SharedTelemetry,
}

/// Everything one generation needs, captured when the segment is enqueued.
struct GenerationJob {
    token: SessionToken,
    cancel: CancellationToken,
    id: SegmentId,
    text: String,
    params: ProviderParams,
    store: Arc<SegmentStore>,
    gateway: Arc<dyn VoiceSynthesisGateway>,
    pool: WorkerPool<GenerationKey>,
    telemetry: SharedTelemetry,
    timeout: Duration,
}

impl GenerationScheduler {
    pub fn new(
        store: Arc<SegmentStore>,
        gateway: Arc<dyn VoiceSynthesisGateway>,
        params: ProviderParams,
        concurrency: usize,
        timeout: Duration,
        telemetry: SharedTelemetry,
    ) -> Self {
        Self {
            store,
            gateway,
            pool: WorkerPool::new("generation", concurrency),
            params: RwLock::new(params),
            timeout,
            telemetry,
        }
    }

    pub fn concurrency(&self) -> usize {
        self.pool.limit()
    }

    /// Takes effect on the next dispatch; running generations are not touched.
    pub fn set_concurrency(&self, limit: usize) {
        self.pool.set_limit(limit);
    }

    pub fn in_flight(&self) -> usize {
        self.pool.running()
    }

    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    /// Highest number of generations ever in flight together.
    pub fn peak_in_flight(&self) -> usize {
        self.pool.peak_running()
    }

    /// Nothing queued or running, and every result has been committed.
    pub fn is_idle(&self) -> bool {
        self.pool.running() == 0
            && self.pool.queued() == 0
            && self.store.count_with_status(SegmentStatus::Generating) == 0
    }

    /// Applies to segments enqueued from now on.
    pub fn set_provider(&self, params: ProviderParams) {
        info!(provider = params.name(), "synthesis provider changed");
        *self.params.write() = params;
    }

    pub fn provider(&self) -> ProviderParams {
        self.params.read().clone()
    }

    /// Appends ids to the tail of the queue. Returns the ids newly accepted;
    /// ids already generating or ready are skipped.
    pub fn enqueue(&self, ids: &[SegmentId]) -> Result<Vec<SegmentId>, StoreError> {
        self.enqueue_with(ids, Placement::Back)
    }

    /// Same as `enqueue` but inserts at the head; ids already waiting in the
    /// queue are promoted to the head too.
    pub fn enqueue_front(&self, ids: &[SegmentId]) -> Result<Vec<SegmentId>, StoreError> {
        // Reverse so the first id ends up first in line
        let reversed: Vec<SegmentId> = ids.iter().rev().copied().collect();
        let mut accepted = self.enqueue_with(&reversed, Placement::Front)?;
        accepted.reverse();
        Ok(accepted)
    }

    /// Drops queued (not yet running) work from sessions other than `current`.
    pub fn discard_stale(&self, current: SessionToken) -> usize {
        let dropped = self.pool.drain_queued(|(token, _)| *token != current);
        if !dropped.is_empty() {
            debug!(count = dropped.len(), "dropped queued generations from replaced session");
        }
        dropped.len()
    }

    fn enqueue_with(&self, ids: &[SegmentId], placement: Placement) -> Result<Vec<SegmentId>, StoreError> {
        let session = self.store.session();

        // Unknown ids are a caller bug; reject before touching any state
        let len = self.store.len();
        if let Some(bad) = ids.iter().find(|id| id.index() >= len) {
            return Err(StoreError::UnknownSegment(*bad));
        }

        let accepted = self.enqueue_in(&session, ids, placement)?;
        if !accepted.is_empty() {
            info!(
                count = accepted.len(),
                queued = self.pool.queued(),
                running = self.pool.running(),
                "generation enqueued"
            );
        }
        Ok(accepted)
    }

    /// Enqueues under `session`. If the list is replaced part way through,
    /// the ids accepted so far are returned and the rest are left alone.
    fn enqueue_in(
        &self,
        session: &SessionHandle,
        ids: &[SegmentId],
        placement: Placement,
    ) -> Result<Vec<SegmentId>, StoreError> {
        let mut accepted = Vec::new();
        for &id in ids {
            let key = (session.token, id);
            match self.store.apply(session.token, StoreDelta::GenerationStarted(id)) {
                Ok(segment) => {
                    self.record(id, GenerationEventKind::Requested, 0);
                    let job = GenerationJob {
                        token: session.token,
                        cancel: session.cancel.clone(),
                        id,
                        text: segment.text,
                        params: self.params.read().clone(),
                        store: Arc::clone(&self.store),
                        gateway: Arc::clone(&self.gateway),
                        pool: self.pool.clone(),
                        telemetry: Arc::clone(&self.telemetry),
                        timeout: self.timeout,
                    };
                    match self.pool.submit(key, placement, job.run().boxed()) {
                        Submission::Queued => accepted.push(id),
                        other => {
                            // No job will ever finish this one; hand it back as an error
                            warn!(segment = %id, submission = ?other, "generation could not be scheduled");
                            let delta = StoreDelta::GenerationFailed {
                                id,
                                message: "generation could not be scheduled".to_string(),
                            };
                            if let Err(e) = self.store.apply(session.token, delta) {
                                debug!(segment = %id, error = %e, "rollback skipped");
                            }
                        }
                    }
                }
                Err(StoreError::InvalidTransition { status: SegmentStatus::Generating, .. })
                    if placement == Placement::Front =>
                {
                    // Waiting in the queue: move it forward. Running ones stay put.
                    self.pool.promote(&key);
                }
                Err(StoreError::InvalidTransition { .. }) => {
                    debug!(segment = %id, "enqueue skipped, already generating or ready");
                }
                Err(e) if e.is_stale() => {
                    debug!(session = session.token.0, accepted = accepted.len(), "segment list replaced during enqueue");
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(accepted)
    }

    fn record(&self, segment: SegmentId, event: GenerationEventKind, latency_ms: u64) {
        self.telemetry
            .lock()
            .record(TelemetryEvent::GenerationLifecycle { segment, event, latency_ms });
    }
}

impl GenerationJob {
    async fn run(self) {
        let started = Instant::now();
        {
            let mut t = self.telemetry.lock();
            t.record(TelemetryEvent::GenerationLifecycle {
                segment: self.id,
                event: GenerationEventKind::Started,
                latency_ms: 0,
            });
            t.record(TelemetryEvent::PoolOccupancy { pool: PoolKind::Generation, running: self.pool.running() });
        }
        debug!(segment = %self.id, session = self.token.0, "synthesis dispatched");

        // The gateway call runs in its own task so a panicking provider
        // becomes an error for this segment only
        let gateway = Arc::clone(&self.gateway);
        let (text, params) = (self.text.clone(), self.params.clone());
        let call = tokio::spawn(async move { gateway.synthesize(&text, &params).await });
        let abort = call.abort_handle();

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                abort.abort();
                self.discard("session replaced before synthesis finished");
                return;
            }
            res = tokio::time::timeout(self.timeout, call) => res,
        };
        if outcome.is_err() {
            abort.abort();
        }

        let delta = match outcome {
            Ok(Ok(Ok(audio))) => self.success_delta(audio),
            Ok(Ok(Err(e))) => StoreDelta::GenerationFailed { id: self.id, message: e.message },
            Ok(Err(join)) => StoreDelta::GenerationFailed {
                id: self.id,
                message: format!("synthesis task failed: {join}"),
            },
            Err(_) => StoreDelta::GenerationFailed {
                id: self.id,
                message: format!("synthesis timed out after {}ms", self.timeout.as_millis()),
            },
        };

        let succeeded = matches!(delta, StoreDelta::GenerationSucceeded { .. });
        let latency_ms = started.elapsed().as_millis() as u64;
        // Free the key before the result is published, so a listener can
        // re-enqueue the segment the moment it sees it
        self.pool.release(&(self.token, self.id));
        match self.store.apply(self.token, delta) {
            Ok(segment) => {
                let kind = if succeeded {
                    info!(segment = %self.id, latency_ms, "segment ready");
                    GenerationEventKind::Succeeded
                } else {
                    warn!(segment = %self.id, error = segment.error.as_deref().unwrap_or_default(), "generation failed");
                    GenerationEventKind::Failed
                };
                self.telemetry.lock().record(TelemetryEvent::GenerationLifecycle {
                    segment: self.id,
                    event: kind,
                    latency_ms,
                });
            }
            Err(e) if e.is_stale() => self.discard("result arrived for a replaced session"),
            Err(e) => warn!(segment = %self.id, error = %e, "generation result rejected"),
        }
    }

    fn success_delta(&self, audio: SynthesizedAudio) -> StoreDelta {
        if audio.bytes.is_empty() {
            return StoreDelta::GenerationFailed {
                id: self.id,
                message: "provider returned an empty audio payload".to_string(),
            };
        }
        let duration = audio
            .duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .or_else(|| probe_wav_duration(&audio.bytes));
        StoreDelta::GenerationSucceeded {
            id: self.id,
            audio: AudioClip::local(audio.bytes, audio.mime, duration),
            word_timings: audio.word_timings,
        }
    }

    fn discard(&self, reason: &str) {
        debug!(segment = %self.id, session = self.token.0, reason, "generation result discarded");
        self.telemetry.lock().record(TelemetryEvent::GenerationLifecycle {
            segment: self.id,
            event: GenerationEventKind::StaleDiscarded,
            latency_ms: 0,
        });
    }
}
