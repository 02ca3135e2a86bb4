#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use lectern::kernel::playback::{AudioOutput, OutputError};
use lectern::kernel::segment::{AudioClip, AudioRef, SegmentId, WordTiming};
use lectern::kernel::store::{SegmentStore, StoreDelta};
use lectern::services::gateway::{ProviderParams, SynthesisError, SynthesizedAudio, VoiceSynthesisGateway};
use lectern::services::storage::{AudioUploader, StoredAudio, UploadError};
use lectern::LecternConfig;

/// Polls `cond` every few ms; panics after `secs`.
pub async fn wait_until(secs: u64, what: &str, cond: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(secs);
    while !cond() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

pub fn fast_config() -> LecternConfig {
    LecternConfig {
        upload_backoff_base_ms: 5,
        upload_backoff_max_ms: 20,
        upload_attempt_timeout_ms: 200,
        generation_timeout_ms: 2_000,
        playback_tick_ms: 5,
        ..Default::default()
    }
}

/// Forces a segment to ready with local audio of the given length.
pub fn make_ready(store: &SegmentStore, id: SegmentId, duration: f64, timings: Option<Vec<WordTiming>>) -> AudioRef {
    let token = store.token();
    store.apply(token, StoreDelta::GenerationStarted(id)).unwrap();
    let audio = AudioClip::local(vec![7; 16], "audio/mpeg", Some(duration));
    store
        .apply(token, StoreDelta::GenerationSucceeded { id, audio: audio.clone(), word_timings: timings })
        .unwrap();
    audio
}

// --- Voice synthesis --------------------------------------------------------

#[derive(Default)]
pub struct MockGateway {
    pub delay: Duration,
    /// Reported clip length for every success.
    pub duration: f64,
    /// Texts containing any of these fail permanently.
    pub fail_on: Vec<String>,
    pub panic_on: Vec<String>,
    pub live: AtomicUsize,
    pub peak: AtomicUsize,
    pub calls: AtomicUsize,
    /// Texts in dispatch order.
    pub order: Mutex<Vec<String>>,
    /// Provider used for each text.
    pub providers: Mutex<HashMap<String, &'static str>>,
}

impl MockGateway {
    pub fn with_delay(ms: u64) -> Self {
        Self { delay: Duration::from_millis(ms), duration: 1.0, ..Default::default() }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, text: &str) -> usize {
        self.order.lock().iter().filter(|t| t.as_str() == text).count()
    }
}

struct LiveGuard<'a>(&'a AtomicUsize);

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl VoiceSynthesisGateway for MockGateway {
    async fn synthesize(&self, text: &str, params: &ProviderParams) -> Result<SynthesizedAudio, SynthesisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.order.lock().push(text.to_string());
        self.providers.lock().insert(text.to_string(), params.name());
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = LiveGuard(&self.live);
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        if self.panic_on.iter().any(|p| text.contains(p.as_str())) {
            panic!("provider blew up");
        }
        if self.fail_on.iter().any(|p| text.contains(p.as_str())) {
            return Err(SynthesisError::permanent(format!("voice rejected: {text}")));
        }
        Ok(SynthesizedAudio {
            bytes: text.as_bytes().to_vec(),
            mime: "audio/mpeg".to_string(),
            duration: Some(self.duration),
            word_timings: Some(vec![WordTiming::new(0.0, self.duration / 2.0)]),
        })
    }
}

// --- Durable storage --------------------------------------------------------

/// Scripted uploader: per segment, a queue of outcomes consumed one per call.
/// An empty queue succeeds.
#[derive(Default)]
pub struct MockUploader {
    pub delay: Duration,
    pub script: Mutex<HashMap<SegmentId, VecDeque<UploadStep>>>,
    pub calls: Mutex<HashMap<SegmentId, usize>>,
    pub live: AtomicUsize,
    pub peak: AtomicUsize,
}

#[derive(Debug, Clone)]
pub enum UploadStep {
    Status(u16),
    Hang(Duration),
}

impl MockUploader {
    pub fn script(&self, id: SegmentId, steps: Vec<UploadStep>) {
        self.script.lock().insert(id, steps.into());
    }

    pub fn calls_for(&self, id: SegmentId) -> usize {
        self.calls.lock().get(&id).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().values().sum()
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AudioUploader for MockUploader {
    async fn upload(&self, article_id: &str, segment_id: SegmentId, audio: &[u8]) -> Result<StoredAudio, UploadError> {
        assert!(!audio.is_empty(), "uploads carry the generated bytes");
        *self.calls.lock().entry(segment_id).or_default() += 1;
        let now = self.live.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = LiveGuard(&self.live);
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        let step = self.script.lock().get_mut(&segment_id).and_then(|q| q.pop_front());
        match step {
            Some(UploadStep::Status(code)) => Err(UploadError::http(code, "scripted failure")),
            Some(UploadStep::Hang(d)) => {
                tokio::time::sleep(d).await;
                Err(UploadError::network("hung attempt finished late"))
            }
            None => Ok(StoredAudio { url: format!("https://cdn.test/{article_id}/{segment_id}.mp3") }),
        }
    }
}

// --- Audio output -----------------------------------------------------------

#[derive(Debug, Default)]
pub struct OutputState {
    pub loads: Vec<uuid::Uuid>,
    pub duration: f64,
    pub position: f64,
    pub playing: bool,
    pub ended: bool,
    pub fail_load: HashSet<uuid::Uuid>,
    pub fail_play: bool,
}

/// Test output; the test moves the clock by hand through the shared handle.
#[derive(Clone, Default)]
pub struct MockOutput(pub Arc<Mutex<OutputState>>);

impl MockOutput {
    pub fn finish(&self) {
        let mut s = self.0.lock();
        s.position = s.duration;
        s.ended = true;
    }

    pub fn set_position(&self, t: f64) {
        self.0.lock().position = t;
    }

    pub fn load_count(&self) -> usize {
        self.0.lock().loads.len()
    }
}

impl AudioOutput for MockOutput {
    fn load(&mut self, clip: &AudioRef, duration_hint: Option<f64>) -> Result<f64, OutputError> {
        let mut s = self.0.lock();
        if s.fail_load.contains(&clip.clip_id) {
            return Err(OutputError("cannot decode".into()));
        }
        s.loads.push(clip.clip_id);
        s.duration = clip.duration.or(duration_hint).unwrap_or(0.0);
        s.position = 0.0;
        s.playing = false;
        s.ended = false;
        Ok(s.duration)
    }

    fn play(&mut self) -> Result<(), OutputError> {
        let mut s = self.0.lock();
        if s.fail_play {
            return Err(OutputError("device lost".into()));
        }
        s.playing = true;
        Ok(())
    }

    fn pause(&mut self) {
        self.0.lock().playing = false;
    }

    fn seek(&mut self, time: f64) {
        let mut s = self.0.lock();
        s.position = time;
        s.ended = false;
    }

    fn unload(&mut self) {
        let mut s = self.0.lock();
        s.playing = false;
        s.ended = false;
        s.position = 0.0;
        s.duration = 0.0;
    }

    fn position(&self) -> f64 {
        self.0.lock().position
    }

    fn ended(&self) -> bool {
        self.0.lock().ended
    }
}
