//! Lifecycle telemetry for generation, upload and playback.
//!
//! # SAFETY INVARIANT
//! Telemetry is a write-only side layer. Scheduler, pipeline and controller
//! decisions must **NEVER** read it back.
//!
//! # PRIVACY INVARIANT
//! Events carry ids, counts and durations only. Never segment text or audio.

pub mod event;
pub mod metrics;
pub mod recorder;

pub use recorder::{SharedTelemetry, TelemetryRecorder};
