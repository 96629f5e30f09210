//! Publisher: appends to the Event Log, then broadcasts on the Broker.
//!
//! Durability comes first. If `EventLog::append` fails, `publish` returns
//! before touching the broker — per spec this is not a transaction, so a
//! crash between the two steps can leave an event durable but never
//! broadcast live; a durable subscriber still picks it up on its next
//! catch-up, which is the whole reason the Event Log exists.

use crate::broker::Broker;
use crate::clock::Clock;
use crate::error::Result;
use crate::event::Envelope;
use crate::log::EventLog;
use serde_json::Value;
use std::sync::Arc;

pub struct Publisher {
    log: Arc<dyn EventLog>,
    broker: Arc<dyn Broker>,
    clock: Arc<dyn Clock>,
    source: String,
}

impl Publisher {
    pub fn new(log: Arc<dyn EventLog>, broker: Arc<dyn Broker>, clock: Arc<dyn Clock>, source: String) -> Self {
        Self { log, broker, clock, source }
    }

    /// Durably appends `data` to `channel` and fans it out live. Returns
    /// the allocated `sequence_id`.
    pub async fn publish(&self, channel: &str, data: Value, owner: Option<String>) -> Result<i64> {
        let event = self.log.append(channel, data, owner).await?;
        let envelope = Envelope::from_event(&event, &self.source);
        self.broker.publish(channel, envelope).await;
        Ok(event.sequence_id)
    }

    /// Sends a keep-alive "BEEP" on `channel` without touching the Event
    /// Log. Used by the Subscription Manager's keep-alive task, not by
    /// callers publishing real data.
    pub async fn publish_keepalive(&self, channel: &str) {
        let _ = self.clock.now();
        let envelope = Envelope::keep_alive(&self.source);
        self.broker.publish(channel, envelope).await;
    }
}
