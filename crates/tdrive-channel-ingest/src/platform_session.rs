//! Session seam between the update listener and a concrete platform client.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::platform_update::PlatformUpdates;

/// Failures reported by a platform session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("platform authorization failed: {0}")]
    Auth(String),
    #[error("platform rate limited the session; retry after {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },
    #[error("platform connection error: {0}")]
    Connection(String),
}

/// Identity the platform confirmed for the bot credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub bot_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    Authorized(BotIdentity),
    Unauthorized,
}

/// Result of one fetch from the update stream.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PolledUpdates {
    pub shapes: Vec<PlatformUpdates>,
    /// Offset to acknowledge once every shape has been dispatched.
    pub next_offset: Option<i64>,
}

impl PolledUpdates {
    pub fn is_empty(&self) -> bool {
        self.shapes.is_empty()
    }
}

/// Connection to the messaging platform owned by one listener.
#[async_trait]
pub trait PlatformSession: Send {
    /// Reports whether the session is already authorized, given the identity
    /// persisted by a previous run.
    async fn auth_status(
        &mut self,
        persisted: Option<&BotIdentity>,
    ) -> Result<AuthStatus, PlatformError>;

    /// Performs bot-token authorization.
    async fn authorize_bot(&mut self) -> Result<BotIdentity, PlatformError>;

    /// Fetches the next updates after `offset`, blocking up to the session's
    /// long-poll window.
    async fn next_updates(&mut self, offset: Option<i64>) -> Result<PolledUpdates, PlatformError>;

    async fn close(&mut self) -> Result<(), PlatformError>;
}
