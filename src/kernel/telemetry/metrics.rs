use std::collections::VecDeque;
use super::event::{
    GenerationEventKind, PlaybackEventKind, PoolKind, TelemetryEvent, UploadEventKind,
};

#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub generation: GenerationStats,
    pub upload: UploadStats,
    pub playback: PlaybackStats,
    pub session_resets: u64,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationStats {
    pub requested: u64,
    pub started: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub stale_discarded: u64,
    pub peak_in_flight: usize,
    pub total_latency_ms: u64,
    pub avg_latency_ms: f64,
}

#[derive(Debug, Clone, Default)]
pub struct UploadStats {
    pub attempts: u64,
    pub retries: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub stale_discarded: u64,
    pub peak_in_flight: usize,
}

#[derive(Debug, Clone, Default)]
pub struct PlaybackStats {
    pub started: u64,
    pub ended: u64,
    pub advanced: u64,
    pub sequences_finished: u64,
    pub failures: u64,
}

pub fn compute_snapshot(events: &VecDeque<TelemetryEvent>) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();

    // Latency only counts for completed generations
    let mut completed = 0u64;

    for event in events {
        match event {
            TelemetryEvent::GenerationLifecycle { event, latency_ms, .. } => {
                let g = &mut snap.generation;
                match event {
                    GenerationEventKind::Requested => g.requested += 1,
                    GenerationEventKind::Started => g.started += 1,
                    GenerationEventKind::Succeeded | GenerationEventKind::Failed => {
                        if *event == GenerationEventKind::Succeeded {
                            g.succeeded += 1;
                        } else {
                            g.failed += 1;
                        }
                        g.total_latency_ms += latency_ms;
                        completed += 1;
                    }
                    GenerationEventKind::StaleDiscarded => g.stale_discarded += 1,
                }
            }
            TelemetryEvent::UploadLifecycle { event, .. } => {
                let u = &mut snap.upload;
                match event {
                    UploadEventKind::Attempted => u.attempts += 1,
                    UploadEventKind::RetryScheduled => u.retries += 1,
                    UploadEventKind::Succeeded => u.succeeded += 1,
                    UploadEventKind::Failed => u.failed += 1,
                    UploadEventKind::StaleDiscarded => u.stale_discarded += 1,
                }
            }
            TelemetryEvent::PlaybackLifecycle { event, .. } => {
                let p = &mut snap.playback;
                match event {
                    PlaybackEventKind::Started => p.started += 1,
                    PlaybackEventKind::Ended => p.ended += 1,
                    PlaybackEventKind::Advanced => p.advanced += 1,
                    PlaybackEventKind::SequenceFinished => p.sequences_finished += 1,
                    PlaybackEventKind::Failed => p.failures += 1,
                    PlaybackEventKind::Paused | PlaybackEventKind::Stopped => {}
                }
            }
            TelemetryEvent::PoolOccupancy { pool, running } => {
                let peak = match pool {
                    PoolKind::Generation => &mut snap.generation.peak_in_flight,
                    PoolKind::Upload => &mut snap.upload.peak_in_flight,
                };
                *peak = (*peak).max(*running);
            }
            TelemetryEvent::SessionReset { .. } => snap.session_resets += 1,
        }
    }

    if completed > 0 {
        snap.generation.avg_latency_ms = snap.generation.total_latency_ms as f64 / completed as f64;
    }

    snap
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::segment::SegmentId;

    #[test]
    fn averages_only_completed_generations() {
        let mut events = VecDeque::new();
        let seg = SegmentId(0);
        events.push_back(TelemetryEvent::GenerationLifecycle { segment: seg, event: GenerationEventKind::Started, latency_ms: 0 });
        events.push_back(TelemetryEvent::GenerationLifecycle { segment: seg, event: GenerationEventKind::Succeeded, latency_ms: 100 });
        events.push_back(TelemetryEvent::GenerationLifecycle { segment: seg, event: GenerationEventKind::Failed, latency_ms: 300 });
        events.push_back(TelemetryEvent::PoolOccupancy { pool: PoolKind::Generation, running: 3 });
        events.push_back(TelemetryEvent::PoolOccupancy { pool: PoolKind::Generation, running: 2 });

        let snap = compute_snapshot(&events);
        assert_eq!(snap.generation.succeeded, 1);
        assert_eq!(snap.generation.failed, 1);
        assert_eq!(snap.generation.avg_latency_ms, 200.0);
        assert_eq!(snap.generation.peak_in_flight, 3);
    }
}
