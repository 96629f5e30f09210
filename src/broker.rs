//! Broker: in-memory, best-effort fan-out.
//!
//! The broker is deliberately unreliable by contract — a subscriber that
//! is disconnected, or whose channel buffer overflows, simply misses
//! messages. Durability lives in [`crate::log::EventLog`]; the broker's
//! only job is low-latency delivery to whoever happens to be attached
//! right now. Grounded on the broadcast/ring-buffer pattern used for
//! event fan-out in the stakpak-agent and cashu `cdk` pub_sub reference
//! files (see `DESIGN.md`), not on the teacher's own mmap segments,
//! which have no tokio task to broadcast into.

use crate::event::Envelope;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::broadcast;

/// Per-channel buffer size. A slow subscriber that falls this far behind
/// the live broker loses messages — the durable path is what it should
/// have been using anyway.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Outcome of a single [`Broker::poll`] call.
pub enum PollOutcome {
    Message(Envelope),
    /// No message arrived within the timeout; the caller should loop.
    Timeout,
    /// The broker-side receiver fell behind and was disconnected. The
    /// caller (the Listener) is expected to transparently reattach and
    /// continue — this is not escalated as an error.
    Lost,
}

#[async_trait]
pub trait Broker: Send + Sync {
    /// Registers interest in `channel`, returning a handle [`poll`] can be
    /// called against. Each call creates an independent receiver; the
    /// same subscription may reattach after being [`PollOutcome::Lost`].
    fn attach(&self, channel: &str) -> BrokerHandle;

    /// Publishes `envelope` to every handle currently attached to
    /// `channel`. No-ops (does not error) if nobody is listening.
    async fn publish(&self, channel: &str, envelope: Envelope);

    /// Waits up to `timeout` for the next message on `handle`.
    async fn poll(&self, handle: &mut BrokerHandle, timeout: std::time::Duration) -> PollOutcome;
}

pub struct BrokerHandle {
    channel: String,
    receiver: broadcast::Receiver<Envelope>,
}

impl BrokerHandle {
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[derive(Default)]
pub struct InMemoryBroker {
    channels: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender_for(&self, channel: &str) -> broadcast::Sender<Envelope> {
        let mut channels = self.channels.lock().expect("broker mutex poisoned");
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl Broker for InMemoryBroker {
    fn attach(&self, channel: &str) -> BrokerHandle {
        let sender = self.sender_for(channel);
        BrokerHandle {
            channel: channel.to_string(),
            receiver: sender.subscribe(),
        }
    }

    async fn publish(&self, channel: &str, envelope: Envelope) {
        let sender = self.sender_for(channel);
        // No receivers attached is the common case and not an error.
        let _ = sender.send(envelope);
    }

    async fn poll(&self, handle: &mut BrokerHandle, timeout: std::time::Duration) -> PollOutcome {
        match tokio::time::timeout(timeout, handle.receiver.recv()).await {
            Ok(Ok(envelope)) => PollOutcome::Message(envelope),
            Ok(Err(broadcast::error::RecvError::Lagged(_))) => PollOutcome::Lost,
            Ok(Err(broadcast::error::RecvError::Closed)) => PollOutcome::Lost,
            Err(_elapsed) => PollOutcome::Timeout,
        }
    }
}
