//! Owns the platform session lifecycle: authorization handshake, long-poll
//! reconnection with bounded exponential backoff, and offset acknowledgement.

use std::time::Duration;

use tdrive_core::CancellationToken;
use tokio::time::Instant;

use crate::ingest_counters::IngestCountersSnapshot;
use crate::ingest_error::IngestError;
use crate::listener_state::ListenerStateStore;
use crate::platform_session::{
    AuthStatus, BotIdentity, PlatformError, PlatformSession, PolledUpdates,
};

pub const DEFAULT_AUTH_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_RECONNECT_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_RECONNECT_INITIAL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_RECONNECT_MULTIPLIER: f64 = 1.1;
pub const DEFAULT_RECONNECT_MAX_INTERVAL_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectBackoffPolicy {
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    /// Total time spent reconnecting before the stream is declared dead.
    pub max_elapsed: Duration,
}

impl Default for ReconnectBackoffPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(DEFAULT_RECONNECT_INITIAL_INTERVAL_MS),
            multiplier: DEFAULT_RECONNECT_MULTIPLIER,
            max_interval: Duration::from_millis(DEFAULT_RECONNECT_MAX_INTERVAL_MS),
            max_elapsed: Duration::from_millis(DEFAULT_RECONNECT_TIMEOUT_MS),
        }
    }
}

impl ReconnectBackoffPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(format!(
                "reconnect multiplier must be >= 1.0, got {}",
                self.multiplier
            ));
        }
        if self.initial_interval.is_zero() {
            return Err("reconnect initial interval must be greater than 0".to_string());
        }
        if self.max_interval < self.initial_interval {
            return Err("reconnect max interval must be >= the initial interval".to_string());
        }
        Ok(())
    }

    pub fn start(&self) -> ReconnectBackoff {
        ReconnectBackoff {
            policy: *self,
            current: self.initial_interval,
            failing_since: None,
            attempts: 0,
        }
    }
}

/// Backoff state for one run of consecutive failures.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    policy: ReconnectBackoffPolicy,
    current: Duration,
    failing_since: Option<Instant>,
    attempts: u32,
}

impl ReconnectBackoff {
    /// Next delay to wait, or `None` once the elapsed budget would be exceeded.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let failing_since = *self.failing_since.get_or_insert_with(Instant::now);
        let delay = self.current;
        if failing_since.elapsed().saturating_add(delay) > self.policy.max_elapsed {
            return None;
        }
        let scaled_ms = (self.current.as_millis() as f64 * self.policy.multiplier).round() as u64;
        self.current = Duration::from_millis(scaled_ms).min(self.policy.max_interval);
        self.attempts = self.attempts.saturating_add(1);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.current = self.policy.initial_interval;
        self.failing_since = None;
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListenerConfig {
    pub auth_timeout: Duration,
    pub reconnect: ReconnectBackoffPolicy,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            auth_timeout: Duration::from_millis(DEFAULT_AUTH_TIMEOUT_MS),
            reconnect: ReconnectBackoffPolicy::default(),
        }
    }
}

pub struct UpdateListener<S> {
    session: S,
    config: ListenerConfig,
    state: ListenerStateStore,
    backoff: ReconnectBackoff,
}

impl<S: PlatformSession> UpdateListener<S> {
    pub fn new(session: S, config: ListenerConfig, state: ListenerStateStore) -> Self {
        let backoff = config.reconnect.start();
        Self {
            session,
            config,
            state,
            backoff,
        }
    }

    /// Confirms the session is authorized, authorizing the bot when needed.
    pub async fn handshake(&mut self) -> Result<BotIdentity, IngestError> {
        let status = self
            .session
            .auth_status(self.state.authorized_identity())
            .await?;
        if let AuthStatus::Authorized(identity) = status {
            tracing::info!(bot_id = identity.bot_id, "session already authorized");
            return Ok(identity);
        }

        tracing::info!("authorizing bot session");
        let identity = match tokio::time::timeout(
            self.config.auth_timeout,
            self.session.authorize_bot(),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(IngestError::Auth(format!(
                    "bot authorization timed out after {}ms",
                    self.config.auth_timeout.as_millis()
                )))
            }
        };
        tracing::info!(
            bot_id = identity.bot_id,
            username = identity.username.as_deref().unwrap_or(""),
            "bot session authorized"
        );
        self.state
            .set_authorized_identity(identity.clone())
            .map_err(IngestError::state)?;
        Ok(identity)
    }

    /// Fetches the next batch, reconnecting through transient failures.
    ///
    /// Returns `Ok(None)` once `cancel` fires.
    pub async fn next_batch(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<Option<PolledUpdates>, IngestError> {
        loop {
            let offset = self.state.next_update_offset();
            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                result = self.session.next_updates(offset) => result,
            };

            match result {
                Ok(polled) => {
                    if self.backoff.attempts() > 0 {
                        tracing::info!(
                            attempts = self.backoff.attempts(),
                            "update stream reconnected"
                        );
                    }
                    self.backoff.reset();
                    return Ok(Some(polled));
                }
                Err(PlatformError::RateLimited { retry_after }) => {
                    tracing::warn!(
                        retry_after_ms = retry_after.as_millis() as u64,
                        "update stream rate limited"
                    );
                    if !sleep_unless_cancelled(retry_after, cancel).await {
                        return Ok(None);
                    }
                }
                Err(PlatformError::Auth(message)) => {
                    if let Err(error) = self.state.clear_authorized_identity() {
                        tracing::warn!(error = %format!("{error:#}"), "failed to clear stale identity");
                    }
                    return Err(IngestError::Auth(message));
                }
                Err(PlatformError::Connection(message)) => {
                    let Some(delay) = self.backoff.next_delay() else {
                        return Err(IngestError::Connection(format!(
                            "reconnect budget of {}ms exhausted: {message}",
                            self.config.reconnect.max_elapsed.as_millis()
                        )));
                    };
                    tracing::warn!(
                        attempt = self.backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "update stream disconnected; reconnecting"
                    );
                    if !sleep_unless_cancelled(delay, cancel).await {
                        return Ok(None);
                    }
                }
            }
        }
    }

    /// Persists `next_offset` once its batch has been fully dispatched.
    pub fn acknowledge(
        &mut self,
        next_offset: Option<i64>,
        counters: IngestCountersSnapshot,
    ) -> Result<(), IngestError> {
        let Some(next_offset) = next_offset else {
            return Ok(());
        };
        self.state
            .acknowledge(next_offset, counters)
            .map_err(IngestError::state)
    }

    /// Closes the session and flushes the final counters.
    pub async fn shutdown(mut self, counters: IngestCountersSnapshot) -> Result<(), IngestError> {
        if let Err(error) = self.session.close().await {
            tracing::warn!(%error, "platform session close failed");
        }
        self.state
            .record_counters(counters)
            .map_err(IngestError::state)
    }
}

/// Sleeps for `duration`; returns false when cancelled first.
async fn sleep_unless_cancelled(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}
