//! `PubSubService`: the facade a thin HTTP layer calls into.
//!
//! Each method corresponds to one control-plane HTTP operation. `user`
//! is passed in explicitly rather than derived here — bearer-token
//! authentication is the caller's job, out of scope for this crate.

use crate::broker::{Broker, InMemoryBroker};
use crate::clock::{Clock, SystemClock};
use crate::config::Settings;
use crate::event::Event;
use crate::listener::{Listener, ListenSession};
use crate::log::{EventLog, InMemoryEventLog};
use crate::publisher::Publisher;
use crate::reaper::Reaper;
use crate::registry::{InMemorySubscriberRegistry, SubscriberRegistry};
use crate::sequence::{InMemorySequenceOracle, SequenceOracle};
use crate::subscription::{SubscriptionManager, SubscriptionOptions};
use serde_json::Value;
use std::sync::Arc;

pub struct PubSubService {
    settings: Settings,
    log: Arc<dyn EventLog>,
    broker: Arc<dyn Broker>,
    manager: Arc<SubscriptionManager>,
    publisher: Publisher,
    listener: Listener,
    reaper: Arc<Reaper>,
}

impl PubSubService {
    /// Wires up the full in-memory engine from `settings`. For
    /// production use against durable backends, assemble the pieces
    /// directly instead of going through this constructor.
    pub fn new(settings: Settings) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let event_sequence: Arc<dyn SequenceOracle> = Arc::new(InMemorySequenceOracle::new());
        let subscription_sequence: Arc<dyn SequenceOracle> = Arc::new(InMemorySequenceOracle::new());

        let log: Arc<dyn EventLog> =
            Arc::new(InMemoryEventLog::new(event_sequence.clone(), clock.clone(), settings.retention));
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let registry: Arc<dyn SubscriberRegistry> = Arc::new(InMemorySubscriberRegistry::new());
        let manager = Arc::new(SubscriptionManager::new(
            subscription_sequence,
            event_sequence,
            registry.clone(),
            clock.clone(),
        ));
        let publisher = Publisher::new(log.clone(), broker.clone(), clock, settings.cloud_events_source.clone());
        let listener = Listener::new(
            manager.clone(),
            log.clone(),
            broker.clone(),
            settings.cloud_events_source.clone(),
            settings.max_catchup_events,
        );
        let reaper = Arc::new(Reaper::new(manager.clone(), registry));

        Self { settings, log, broker, manager, publisher, listener, reaper }
    }

    /// Starts the background keep-alive and reaper tasks. Call once per
    /// process; returns their join handles so the caller can hold (or
    /// abort) them.
    pub fn spawn_background_tasks(&self) -> (tokio::task::JoinHandle<()>, tokio::task::JoinHandle<()>) {
        let publisher = Arc::new(Publisher::new(
            self.log.clone(),
            self.broker.clone(),
            Arc::new(SystemClock),
            self.settings.cloud_events_source.clone(),
        ));
        let keep_alive = self.manager.spawn_keep_alive_task(publisher, self.settings.keep_alive_period);
        let reaping = self.reaper.spawn(
            std::time::Duration::from_secs(3600),
            self.settings.stale_subscription_minutes,
            self.settings.stale_subscriber_state_days,
        );
        (keep_alive, reaping)
    }

    /// `POST /subscribe`.
    pub async fn subscribe(
        &self,
        channel: &str,
        user: &str,
        promiscuous: bool,
        subscriber_id: Option<String>,
    ) -> crate::error::Result<i64> {
        self.manager
            .subscribe(channel, user, SubscriptionOptions { promiscuous, subscriber_id })
            .await
    }

    /// `DELETE /subscribe/{id}`.
    pub fn unsubscribe(&self, subscription_id: i64, user: &str) -> crate::error::Result<()> {
        self.manager.unsubscribe(subscription_id, user)
    }

    /// `GET /listen/{id}`, long-polled. Returns a session the caller
    /// drains with repeated `next().await` calls.
    pub async fn listen(&self, subscription_id: i64, user: &str) -> crate::error::Result<ListenSession> {
        self.listener.begin(subscription_id, user).await
    }

    /// `POST /publish`.
    pub async fn publish(&self, channel: &str, data: Value, owner: Option<String>) -> crate::error::Result<i64> {
        self.publisher.publish(channel, data, owner).await
    }

    /// `GET /events`: point-in-time query, bypassing subscriptions
    /// entirely.
    pub async fn query_events(
        &self,
        channel: &str,
        after_seq_id: i64,
        user: &str,
        promiscuous: bool,
        limit: Option<usize>,
    ) -> crate::error::Result<Vec<Event>> {
        let owner_filter = if promiscuous { None } else { Some(user) };
        self.log.range(channel, after_seq_id, owner_filter, promiscuous, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_then_query_round_trip() {
        let service = PubSubService::new(Settings::default());
        let seq = service
            .publish("node", serde_json::json!({"id": "n1"}), None)
            .await
            .unwrap();

        let events = service.query_events("node", 0, "alice", false, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].sequence_id, seq);
    }

    #[tokio::test]
    async fn subscribe_listen_unsubscribe_lifecycle() {
        let service = PubSubService::new(Settings::default());
        let sub_id = service.subscribe("node", "alice", false, None).await.unwrap();

        let mut session = service.listen(sub_id, "alice").await.unwrap();
        service.publish("node", serde_json::json!({"id": "n1"}), None).await.unwrap();
        let envelope = session.next().await.unwrap();
        assert_eq!(envelope.data["id"], "n1");

        drop(session);
        service.unsubscribe(sub_id, "alice").unwrap();
        assert!(service.listen(sub_id, "alice").await.is_err());
    }
}
