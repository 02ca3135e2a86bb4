//! Crate-level error. Per-segment failures live in segment state; this only
//! carries the consistency errors an operation hands back to its caller.

pub use crate::config::ConfigError;
pub use crate::kernel::playback::PlaybackError;
pub use crate::kernel::store::StoreError;
pub use crate::kernel::upload::PipelineError;

#[derive(Debug, thiserror::Error)]
pub enum LecternError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Playback(#[from] PlaybackError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = LecternError> = std::result::Result<T, E>;
