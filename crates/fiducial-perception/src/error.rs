/// Failure of a [`FrameSource`](crate::FrameSource) backend.
#[derive(thiserror::Error, Debug)]
pub enum FrameSourceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("frame source {0} has no frames")]
    Empty(String),
    #[error("frame source {name} is unavailable: {reason}")]
    Unavailable { name: String, reason: String },
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

#[derive(thiserror::Error, Debug)]
pub enum PerceptionError {
    #[error("perception loop is already running")]
    AlreadyRunning,
    #[error("loop resources were lost to a failed or panicked worker thread")]
    ResourcesLost,
    #[error("failed to open frame source: {0}")]
    FrameSource(#[from] FrameSourceError),
    #[error("failed to spawn perception thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
