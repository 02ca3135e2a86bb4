use futures::FutureExt;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::pool::{Placement, Submission, WorkerPool};
use super::segment::{SegmentId, UploadStatus};
use super::store::{SegmentStore, SessionToken, StoreDelta, StoreError};
use super::telemetry::event::{PoolKind, TelemetryEvent, UploadEventKind};
use super::telemetry::SharedTelemetry;
use crate::services::storage::{AudioUploader, UploadError};

pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per segment, first try included.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Ceiling for one attempt; exceeding it counts as a retryable failure.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `failed + 1`: base * 2^(failed - 1), capped.
    pub fn backoff(&self, failed: u32) -> Duration {
        let exp = failed.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exp).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UploadSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PipelineError {
    #[error("no article is loaded")]
    NoArticle,
    #[error("unknown article {requested:?} (loaded: {loaded:?})")]
    UnknownArticle { requested: String, loaded: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadOutcome {
    Success,
    Failed,
    /// Session replaced (or segment changed) underneath; counts as neither.
    Discarded,
}

type UploadKey = (SessionToken, SegmentId);

/// Pushes generated audio to durable storage, bounded separately from
/// generation and retrying transient failures with exponential backoff.
pub struct UploadPipeline {
    store: Arc<SegmentStore>,
    uploader: Arc<dyn AudioUploader>,
    pool: WorkerPool<UploadKey>,
    policy: RetryPolicy,
    telemetry: SharedTelemetry,
}

impl UploadPipeline {
    pub fn new(
        store: Arc<SegmentStore>,
        uploader: Arc<dyn AudioUploader>,
        concurrency: usize,
        policy: RetryPolicy,
        telemetry: SharedTelemetry,
    ) -> Self {
        Self {
            store,
            uploader,
            pool: WorkerPool::new("upload", concurrency),
            policy,
            telemetry,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn concurrency(&self) -> usize {
        self.pool.limit()
    }

    pub fn set_concurrency(&self, limit: usize) {
        self.pool.set_limit(limit);
    }

    pub fn in_flight(&self) -> usize {
        self.pool.running()
    }

    /// Uploads every ready, locally generated segment not yet stored and waits
    /// for all of them. Individual failures end up in segment state and in
    /// the counts; only an article mismatch fails the call.
    pub async fn upload_all(&self, article_id: &str) -> Result<UploadSummary, PipelineError> {
        let snapshot = self.store.snapshot();
        match snapshot.article_id.as_deref() {
            None => return Err(PipelineError::NoArticle),
            Some(loaded) if loaded != article_id => {
                return Err(PipelineError::UnknownArticle {
                    requested: article_id.to_string(),
                    loaded: Some(loaded.to_string()),
                })
            }
            Some(_) => {}
        }
        let session = self.store.session();
        if session.token != snapshot.session {
            // Replaced between the two reads; nothing here belongs to it
            return Ok(UploadSummary::default());
        }

        let mut pending = Vec::new();
        for segment in snapshot.segments {
            let eligible = segment.is_ready()
                && matches!(segment.upload_status, UploadStatus::Pending | UploadStatus::Failed);
            let Some(bytes) = segment.audio.as_ref().and_then(|a| a.local_bytes().cloned()) else {
                continue;
            };
            if !eligible {
                continue;
            }

            let (done, rx) = oneshot::channel();
            let job = UploadJob {
                token: session.token,
                cancel: session.cancel.clone(),
                article_id: article_id.to_string(),
                id: segment.id,
                bytes,
                policy: self.policy,
                store: Arc::clone(&self.store),
                uploader: Arc::clone(&self.uploader),
                pool: self.pool.clone(),
                telemetry: Arc::clone(&self.telemetry),
            };
            let task = async move {
                let outcome = job.run().await;
                let _ = done.send(outcome);
            };
            match self.pool.submit((session.token, segment.id), Placement::Back, task.boxed()) {
                Submission::Queued => pending.push(rx),
                _ => debug!(segment = %segment.id, "upload already in progress"),
            }
        }

        let total = pending.len();
        info!(article = article_id, total, "upload started");
        let outcomes = futures::future::join_all(pending).await;

        let mut summary = UploadSummary { total, ..Default::default() };
        for outcome in outcomes {
            match outcome {
                Ok(UploadOutcome::Success) => summary.success += 1,
                // A dropped sender means the job died before reporting
                Ok(UploadOutcome::Failed) | Err(_) => summary.failed += 1,
                Ok(UploadOutcome::Discarded) => {}
            }
        }
        info!(article = article_id, ?summary, "upload finished");
        Ok(summary)
    }
}

struct UploadJob {
    token: SessionToken,
    cancel: CancellationToken,
    article_id: String,
    id: SegmentId,
    bytes: Arc<[u8]>,
    policy: RetryPolicy,
    store: Arc<SegmentStore>,
    uploader: Arc<dyn AudioUploader>,
    pool: WorkerPool<UploadKey>,
    telemetry: SharedTelemetry,
}

impl UploadJob {
    async fn run(self) -> UploadOutcome {
        if let Err(e) = self.store.apply(self.token, StoreDelta::UploadStarted(self.id)) {
            return self.rejected(e);
        }
        self.telemetry
            .lock()
            .record(TelemetryEvent::PoolOccupancy { pool: PoolKind::Upload, running: self.pool.running() });

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.record(UploadEventKind::Attempted, attempt);

            let result = tokio::select! {
                _ = self.cancel.cancelled() => return self.discarded(attempt),
                r = self.attempt() => r,
            };

            let err = match result {
                Ok(url) => {
                    return match self.store.apply(self.token, StoreDelta::UploadSucceeded { id: self.id, cloud_url: url }) {
                        Ok(_) => {
                            debug!(segment = %self.id, attempt, "upload stored");
                            self.record(UploadEventKind::Succeeded, attempt);
                            UploadOutcome::Success
                        }
                        Err(e) => self.rejected(e),
                    };
                }
                Err(err) => err,
            };

            let delta = StoreDelta::UploadAttemptFailed { id: self.id, message: err.to_string() };
            if let Err(e) = self.store.apply(self.token, delta) {
                return self.rejected(e);
            }

            if err.is_retryable() && attempt < self.policy.max_attempts {
                let delay = self.policy.backoff(attempt);
                warn!(segment = %self.id, attempt, error = %err, delay_ms = delay.as_millis() as u64, "upload failed, retrying");
                self.record(UploadEventKind::RetryScheduled, attempt);
                tokio::select! {
                    _ = self.cancel.cancelled() => return self.discarded(attempt),
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            warn!(segment = %self.id, attempt, error = %err, retryable = err.is_retryable(), "upload gave up");
            return match self.store.apply(self.token, StoreDelta::UploadFailed { id: self.id, message: err.to_string() }) {
                Ok(_) => {
                    self.record(UploadEventKind::Failed, attempt);
                    UploadOutcome::Failed
                }
                Err(e) => self.rejected(e),
            };
        }
    }

    /// One bounded attempt. The storage call runs in its own task so a
    /// panicking uploader only fails this attempt.
    async fn attempt(&self) -> Result<String, UploadError> {
        let uploader = Arc::clone(&self.uploader);
        let (article, id, bytes) = (self.article_id.clone(), self.id, Arc::clone(&self.bytes));
        let call = tokio::spawn(async move { uploader.upload(&article, id, &bytes).await });
        let abort = call.abort_handle();

        match tokio::time::timeout(self.policy.attempt_timeout, call).await {
            Ok(Ok(Ok(stored))) => Ok(stored.url),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join)) => Err(UploadError::network(format!("upload task failed: {join}"))),
            Err(_) => {
                abort.abort();
                Err(UploadError::timeout())
            }
        }
    }

    fn rejected(&self, e: StoreError) -> UploadOutcome {
        if e.is_stale() {
            self.record(UploadEventKind::StaleDiscarded, 0);
            debug!(segment = %self.id, "upload result for a replaced session discarded");
        } else {
            debug!(segment = %self.id, error = %e, "upload skipped");
        }
        UploadOutcome::Discarded
    }

    fn discarded(&self, attempt: u32) -> UploadOutcome {
        debug!(segment = %self.id, attempt, "upload cancelled with its session");
        self.record(UploadEventKind::StaleDiscarded, attempt);
        UploadOutcome::Discarded
    }

    fn record(&self, event: UploadEventKind, attempt: u32) {
        self.telemetry
            .lock()
            .record(TelemetryEvent::UploadLifecycle { segment: self.id, event, attempt });
    }
}
