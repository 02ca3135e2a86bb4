//! Segment lifecycle orchestration: one store, two bounded worker pools
//! (generation, upload) and a single-output player, all mutating segment
//! state only through `SegmentStore::apply`.

pub mod playback;
pub mod pool;
pub mod reader;
pub mod scheduler;
pub mod segment;
pub mod store;
pub mod sync;
pub mod telemetry;
pub mod upload;
