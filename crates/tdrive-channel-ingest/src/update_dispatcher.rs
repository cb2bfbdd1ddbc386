//! Unpacks update shapes and keeps only messages from the bound channel.

use std::sync::Arc;

use crate::channel_identity::ChannelBinding;
use crate::ingest_counters::{IngestCounter, IngestCounters};
use crate::platform_update::{PlatformMessage, PlatformUpdates, UpdateEvent};

#[derive(Debug, Clone)]
pub struct UpdateDispatcher {
    binding: Arc<ChannelBinding>,
    counters: Arc<IngestCounters>,
}

impl UpdateDispatcher {
    pub fn new(binding: Arc<ChannelBinding>, counters: Arc<IngestCounters>) -> Self {
        Self { binding, counters }
    }

    /// Returns the messages of `updates` that originate from the bound
    /// channel, in delivery order. Everything else is counted and dropped.
    pub fn dispatch(&self, updates: PlatformUpdates) -> Vec<PlatformMessage> {
        let events = match updates {
            PlatformUpdates::Batch(events) => events,
            PlatformUpdates::Short(event) => vec![event],
            PlatformUpdates::TooLong { skipped } => {
                self.counters.increment(IngestCounter::UpdatesReceived);
                self.counters.increment(IngestCounter::UpdatesWithoutMessage);
                // The gap usually holds update types the session never asked for.
                tracing::debug!(
                    skipped = ?skipped,
                    channel_id = self.binding.internal_channel_id(),
                    "update offset gap; updates in the gap are not ingested"
                );
                return Vec::new();
            }
        };

        let mut matched = Vec::new();
        for event in events {
            self.counters.increment(IngestCounter::UpdatesReceived);
            let message = match event {
                UpdateEvent::NewMessage(message) => message,
                UpdateEvent::Service { kind } => {
                    self.counters.increment(IngestCounter::UpdatesWithoutMessage);
                    tracing::debug!(kind = %kind, "dropping update without message");
                    continue;
                }
            };
            self.counters.increment(IngestCounter::MessagesSeen);
            if !self.binding.matches(&message.peer) {
                self.counters.increment(IngestCounter::MessagesFiltered);
                tracing::debug!(
                    message_id = message.message_id,
                    peer = ?message.peer,
                    "filtered message from unbound peer"
                );
                continue;
            }
            matched.push(message);
        }
        matched
    }
}
