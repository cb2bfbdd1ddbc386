use std::time::Duration;

use thiserror::Error;

use crate::channel_identity::ChannelIdError;
use crate::platform_session::PlatformError;

/// Pipeline-level failures surfaced by `start` and `PipelineHandle::join`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("invalid ingestion config: {0}")]
    Config(String),
    #[error(transparent)]
    UnsupportedChannelIdFormat(#[from] ChannelIdError),
    #[error("authorization failed: {0}")]
    Auth(String),
    #[error("rate limited during authorization; retry after {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },
    #[error("connection error: {0}")]
    Connection(String),
    #[error("listener state error: {0}")]
    State(String),
    #[error("pipeline cancelled before the session was established")]
    Cancelled,
    #[error("pipeline task failed: {0}")]
    TaskFailed(String),
}

impl IngestError {
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }

    pub(crate) fn state(error: anyhow::Error) -> Self {
        Self::State(format!("{error:#}"))
    }
}

impl From<PlatformError> for IngestError {
    fn from(error: PlatformError) -> Self {
        match error {
            PlatformError::Auth(message) => Self::Auth(message),
            PlatformError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            PlatformError::Connection(message) => Self::Connection(message),
        }
    }
}
