use serde::{Deserialize, Serialize};

use crate::kernel::segment::SegmentId;

// Allowed: IDs, Durations, Counts, Enums
// Forbidden: Text, Audio bytes, URLs

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TelemetryEvent {
    GenerationLifecycle {
        segment: SegmentId,
        event: GenerationEventKind,
        latency_ms: u64, // since dispatch; 0 for events before dispatch
    },

    UploadLifecycle {
        segment: SegmentId,
        event: UploadEventKind,
        attempt: u32,
    },

    PlaybackLifecycle {
        segment: Option<SegmentId>,
        event: PlaybackEventKind,
    },

    PoolOccupancy {
        pool: PoolKind,
        running: usize,
    },

    SessionReset {
        segments: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenerationEventKind {
    Requested,
    Started,
    Succeeded,
    Failed,
    StaleDiscarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadEventKind {
    Attempted,
    RetryScheduled,
    Succeeded,
    Failed,
    StaleDiscarded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackEventKind {
    Started,
    Paused,
    Stopped,
    Ended,
    Advanced,
    SequenceFinished,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoolKind {
    Generation,
    Upload,
}
