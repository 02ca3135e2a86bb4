use tokio::time::Instant;
use tracing::debug;

use crate::kernel::playback::{AudioOutput, OutputError};
use crate::kernel::segment::{AudioRef, AudioSource};

/// Silent output that advances on the wall clock. Stands in for a device
/// when only timing matters (CLI runs, headless hosts).
#[derive(Debug, Default)]
pub struct ClockOutput {
    duration: Option<f64>,
    /// Position at the last play/pause/seek.
    offset: f64,
    /// Set while playing.
    since: Option<Instant>,
}

impl ClockOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn anchor(&mut self, position: f64) {
        self.offset = position;
        if self.since.is_some() {
            self.since = Some(Instant::now());
        }
    }
}

impl AudioOutput for ClockOutput {
    fn load(&mut self, clip: &AudioRef, duration_hint: Option<f64>) -> Result<f64, OutputError> {
        let duration = clip
            .duration
            .or(duration_hint)
            .filter(|d| d.is_finite() && *d >= 0.0)
            .ok_or_else(|| OutputError("clip length is unknown".to_string()))?;

        if let AudioSource::Remote { url } = &clip.source {
            debug!(%url, duration, "clock output loaded remote clip");
        }
        self.duration = Some(duration);
        self.offset = 0.0;
        self.since = None;
        Ok(duration)
    }

    fn play(&mut self) -> Result<(), OutputError> {
        if self.duration.is_none() {
            return Err(OutputError("nothing loaded".to_string()));
        }
        if self.ended() {
            self.offset = 0.0;
        }
        if self.since.is_none() {
            self.since = Some(Instant::now());
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.offset = self.position();
        self.since = None;
    }

    fn seek(&mut self, time: f64) {
        let end = self.duration.unwrap_or(0.0);
        self.anchor(time.clamp(0.0, end));
    }

    fn unload(&mut self) {
        *self = Self::default();
    }

    fn position(&self) -> f64 {
        let Some(end) = self.duration else {
            return 0.0;
        };
        let running = self.since.map(|t| t.elapsed().as_secs_f64()).unwrap_or(0.0);
        (self.offset + running).min(end)
    }

    fn ended(&self) -> bool {
        self.duration.is_some_and(|end| self.position() >= end)
    }
}
