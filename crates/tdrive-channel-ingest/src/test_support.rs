//! Scripted platform session shared by listener and pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::channel_identity::{ChannelClass, NormalizedChannelId};

use crate::platform_session::{
    AuthStatus, BotIdentity, PlatformError, PlatformSession, PolledUpdates,
};
use crate::platform_update::{
    DocumentAttribute, DocumentKind, DocumentMedia, MessageMedia, Peer, PlatformMessage,
    UpdateEvent,
};

pub(crate) const BOUND_CHANNEL_PUBLIC_ID: i64 = -1_001_234_567_890;
pub(crate) const BOUND_CHANNEL_INTERNAL_ID: i64 = 1_234_567_890;

#[derive(Debug, Default)]
pub(crate) struct SessionCalls {
    pub authorize: AtomicUsize,
    pub polls: AtomicUsize,
    pub closed: AtomicBool,
    pub offsets: Mutex<Vec<Option<i64>>>,
}

impl SessionCalls {
    pub fn authorize_count(&self) -> usize {
        self.authorize.load(Ordering::SeqCst)
    }

    pub fn poll_count(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn offsets(&self) -> Vec<Option<i64>> {
        self.offsets.lock().map(|offsets| offsets.clone()).unwrap_or_default()
    }
}

/// Replays scripted results; once polls run out it blocks until cancelled.
pub(crate) struct ScriptedSession {
    pub accept_persisted: bool,
    pub authorize_delay: Duration,
    pub authorize_results: VecDeque<Result<BotIdentity, PlatformError>>,
    pub poll_results: VecDeque<Result<PolledUpdates, PlatformError>>,
    pub calls: Arc<SessionCalls>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            accept_persisted: true,
            authorize_delay: Duration::ZERO,
            authorize_results: VecDeque::new(),
            poll_results: VecDeque::new(),
            calls: Arc::new(SessionCalls::default()),
        }
    }

    pub fn with_polls(mut self, polls: Vec<Result<PolledUpdates, PlatformError>>) -> Self {
        self.poll_results = polls.into();
        self
    }

    pub fn with_authorize(mut self, result: Result<BotIdentity, PlatformError>) -> Self {
        self.authorize_results.push_back(result);
        self
    }
}

pub(crate) fn test_identity() -> BotIdentity {
    BotIdentity {
        bot_id: 123_456,
        username: Some("drive_bot".to_string()),
    }
}

#[async_trait]
impl PlatformSession for ScriptedSession {
    async fn auth_status(
        &mut self,
        persisted: Option<&BotIdentity>,
    ) -> Result<AuthStatus, PlatformError> {
        Ok(match persisted {
            Some(identity) if self.accept_persisted => AuthStatus::Authorized(identity.clone()),
            _ => AuthStatus::Unauthorized,
        })
    }

    async fn authorize_bot(&mut self) -> Result<BotIdentity, PlatformError> {
        self.calls.authorize.fetch_add(1, Ordering::SeqCst);
        if !self.authorize_delay.is_zero() {
            tokio::time::sleep(self.authorize_delay).await;
        }
        self.authorize_results
            .pop_front()
            .unwrap_or_else(|| Ok(test_identity()))
    }

    async fn next_updates(&mut self, offset: Option<i64>) -> Result<PolledUpdates, PlatformError> {
        self.calls.polls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut offsets) = self.calls.offsets.lock() {
            offsets.push(offset);
        }
        match self.poll_results.pop_front() {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), PlatformError> {
        self.calls.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Peer of a broadcast-class channel with the given internal id.
pub(crate) fn broadcast_peer(internal: i64) -> Peer {
    Peer::Channel(NormalizedChannelId {
        internal,
        class: ChannelClass::Broadcast,
    })
}

pub(crate) fn document_message(message_id: i64, internal_channel: i64, name: Option<&str>) -> UpdateEvent {
    let mut attributes = vec![DocumentAttribute::Kind(DocumentKind::File)];
    if let Some(name) = name {
        attributes.push(DocumentAttribute::Filename(name.to_string()));
    }
    UpdateEvent::NewMessage(PlatformMessage {
        message_id,
        peer: broadcast_peer(internal_channel),
        date: None,
        media: Some(MessageMedia::Document(DocumentMedia {
            file_id: format!("file-{message_id}"),
            size_bytes: 1024,
            reported_mime_type: None,
            attributes,
        })),
    })
}

pub(crate) fn text_message(message_id: i64, internal_channel: i64) -> UpdateEvent {
    UpdateEvent::NewMessage(PlatformMessage {
        message_id,
        peer: broadcast_peer(internal_channel),
        date: None,
        media: None,
    })
}

pub(crate) fn connection_error() -> PlatformError {
    PlatformError::Connection("connection reset".to_string())
}
