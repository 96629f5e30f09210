//! Listener: the per-`listen`-call session that drains catch-up replay
//! and then serves live broker traffic.
//!
//! A `listen` call is a resumable half of a conversation, not a single
//! request: the *previous* call's delivery is acknowledged implicitly at
//! the top of this one (see [`crate::subscription::SubscriptionManager::implicit_ack`]),
//! so a client that crashes after receiving a message but before calling
//! `listen` again simply gets that message replayed.

use crate::broker::{Broker, BrokerHandle, PollOutcome};
use crate::error::{ClientError, Error, Result};
use crate::event::Envelope;
use crate::log::EventLog;
use crate::subscription::SubscriptionManager;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// How long a single broker poll waits before giving the caller a chance
/// to reattach a dropped connection / check for cancellation. Internal
/// to [`ListenSession::next`] — callers never see a timeout outcome.
pub const POLL_TIMEOUT: Duration = Duration::from_secs(1);

pub struct Listener {
    manager: Arc<SubscriptionManager>,
    log: Arc<dyn EventLog>,
    broker: Arc<dyn Broker>,
    source: String,
    max_catchup_events: usize,
}

impl Listener {
    pub fn new(
        manager: Arc<SubscriptionManager>,
        log: Arc<dyn EventLog>,
        broker: Arc<dyn Broker>,
        source: String,
        max_catchup_events: usize,
    ) -> Self {
        Self { manager, log, broker, source, max_catchup_events }
    }

    /// Validates ownership, implicitly acknowledges the previous call's
    /// delivery, replays any outstanding catch-up, and attaches to the
    /// live broker. The returned session is then driven by repeated
    /// calls to [`ListenSession::next`].
    pub async fn begin(&self, subscription_id: i64, user: &str) -> Result<ListenSession> {
        self.manager.implicit_ack(subscription_id).await?;
        self.manager.mark_polled(subscription_id);
        let subscription = self.manager.get(subscription_id)?;
        if subscription.user != user {
            return Err(Error::Client(ClientError::NotOwner(subscription_id, user.to_string())));
        }

        let mut catchup = VecDeque::new();
        if !subscription.catchup_done {
            if let Some(earliest) = self.log.earliest_sequence_id(&subscription.channel).await? {
                if subscription.last_delivered_id + 1 < earliest {
                    catchup.push_back(Envelope::retention_gap(
                        &self.source,
                        subscription.last_delivered_id,
                        earliest,
                    ));
                }
            }
            let owner_filter = if subscription.promiscuous { None } else { Some(subscription.user.as_str()) };
            let events = self
                .log
                .range(
                    &subscription.channel,
                    subscription.last_delivered_id,
                    owner_filter,
                    subscription.promiscuous,
                    Some(self.max_catchup_events),
                )
                .await?;
            for event in events {
                catchup.push_back(Envelope::from_event(&event, &self.source));
            }
        }

        let handle = self.broker.attach(&subscription.channel);
        Ok(ListenSession {
            subscription_id,
            user: user.to_string(),
            channel: subscription.channel,
            promiscuous: subscription.promiscuous,
            manager: self.manager.clone(),
            broker: self.broker.clone(),
            handle,
            catchup,
        })
    }
}

pub struct ListenSession {
    subscription_id: i64,
    user: String,
    channel: String,
    promiscuous: bool,
    manager: Arc<SubscriptionManager>,
    broker: Arc<dyn Broker>,
    handle: BrokerHandle,
    catchup: VecDeque<Envelope>,
}

impl ListenSession {
    /// Returns the next envelope due to this subscription: catch-up
    /// replay first, then live broker traffic. Never returns `Ok(None)`
    /// by design — a `listen` call is a long-poll that only ends when
    /// the caller drops the session or cancels the surrounding request.
    pub async fn next(&mut self) -> Result<Envelope> {
        if let Some(envelope) = self.catchup.pop_front() {
            self.record_delivery(&envelope);
            if self.catchup.is_empty() {
                self.manager.mark_catchup_done(self.subscription_id);
            }
            return Ok(envelope);
        }
        self.manager.mark_catchup_done(self.subscription_id);

        loop {
            match self.broker.poll(&mut self.handle, POLL_TIMEOUT).await {
                PollOutcome::Message(envelope) => {
                    if !envelope.visible_to(&self.user, self.promiscuous) {
                        continue;
                    }
                    self.record_delivery(&envelope);
                    return Ok(envelope);
                }
                PollOutcome::Timeout => continue,
                PollOutcome::Lost => {
                    self.handle = self.broker.attach(&self.channel);
                    continue;
                }
            }
        }
    }

    fn record_delivery(&self, envelope: &Envelope) {
        if let Some(sequence_id) = envelope.sequence_id {
            self.manager.mark_delivered(self.subscription_id, sequence_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InMemoryBroker;
    use crate::clock::FixedClock;
    use crate::log::InMemoryEventLog;
    use crate::publisher::Publisher;
    use crate::registry::InMemorySubscriberRegistry;
    use crate::sequence::InMemorySequenceOracle;
    use crate::subscription::SubscriptionOptions;

    struct Harness {
        listener: Listener,
        manager: Arc<SubscriptionManager>,
        publisher: Publisher,
    }

    fn harness() -> Harness {
        let clock = Arc::new(FixedClock::new(chrono::Utc::now()));
        let event_sequence = Arc::new(InMemorySequenceOracle::new());
        let log = Arc::new(InMemoryEventLog::new(
            event_sequence.clone(),
            clock.clone(),
            std::time::Duration::from_secs(604_800),
        ));
        let broker = Arc::new(InMemoryBroker::new());
        let manager = Arc::new(SubscriptionManager::new(
            Arc::new(InMemorySequenceOracle::new()),
            event_sequence,
            Arc::new(InMemorySubscriberRegistry::new()),
            clock.clone(),
        ));
        let publisher = Publisher::new(log.clone(), broker.clone(), clock, "src".to_string());
        let listener = Listener::new(manager.clone(), log, broker, "src".to_string(), 1000);
        Harness { listener, manager, publisher }
    }

    #[tokio::test]
    async fn durable_catchup_replays_events_missed_after_subscribing_but_before_first_listen() {
        let h = harness();
        let sub_id = h
            .manager
            .subscribe(
                "node",
                "alice",
                SubscriptionOptions { promiscuous: false, subscriber_id: Some("s1".to_string()) },
            )
            .await
            .unwrap();

        // Published after the durable subscriber was created but before its
        // first `listen` call — these are not missed, they are pending
        // catch-up.
        h.publisher.publish("node", serde_json::json!({"id": "a"}), None).await.unwrap();
        h.publisher.publish("node", serde_json::json!({"id": "b"}), None).await.unwrap();

        let mut session = h.listener.begin(sub_id, "alice").await.unwrap();
        let first = session.next().await.unwrap();
        let second = session.next().await.unwrap();
        assert_eq!(first.data["id"], "a");
        assert_eq!(second.data["id"], "b");
    }

    #[tokio::test]
    async fn brand_new_durable_subscriber_sees_nothing_published_before_it_subscribed() {
        let h = harness();
        h.publisher.publish("node", serde_json::json!({"id": "before"}), None).await.unwrap();

        let sub_id = h
            .manager
            .subscribe(
                "node",
                "alice",
                SubscriptionOptions { promiscuous: false, subscriber_id: Some("s1".to_string()) },
            )
            .await
            .unwrap();

        h.publisher.publish("node", serde_json::json!({"id": "after"}), None).await.unwrap();

        let mut session = h.listener.begin(sub_id, "alice").await.unwrap();
        let envelope = session.next().await.unwrap();
        assert_eq!(envelope.data["id"], "after");
    }

    #[tokio::test]
    async fn fire_and_forget_listener_only_sees_live_traffic() {
        let h = harness();
        h.publisher.publish("node", serde_json::json!({"id": "missed"}), None).await.unwrap();

        let sub_id = h.manager.subscribe("node", "alice", SubscriptionOptions::default()).await.unwrap();
        let mut session = h.listener.begin(sub_id, "alice").await.unwrap();

        h.publisher.publish("node", serde_json::json!({"id": "live"}), None).await.unwrap();
        let envelope = session.next().await.unwrap();
        assert_eq!(envelope.data["id"], "live");
    }

    #[tokio::test]
    async fn owner_filtered_events_are_silently_skipped() {
        let h = harness();
        let sub_id = h.manager.subscribe("node", "alice", SubscriptionOptions::default()).await.unwrap();
        let mut session = h.listener.begin(sub_id, "alice").await.unwrap();

        h.publisher
            .publish("node", serde_json::json!({"id": "bob-only"}), Some("bob".to_string()))
            .await
            .unwrap();
        h.publisher.publish("node", serde_json::json!({"id": "for-alice"}), None).await.unwrap();

        let envelope = session.next().await.unwrap();
        assert_eq!(envelope.data["id"], "for-alice");
    }

    #[tokio::test]
    async fn begin_by_non_owner_fails() {
        let h = harness();
        let sub_id = h.manager.subscribe("node", "alice", SubscriptionOptions::default()).await.unwrap();
        let err = h.listener.begin(sub_id, "bob").await.unwrap_err();
        assert!(matches!(err, Error::Client(ClientError::NotOwner(_, _))));
    }

    #[tokio::test]
    async fn implicit_ack_advances_durable_cursor_on_next_listen() {
        let h = harness();
        let sub_id = h
            .manager
            .subscribe(
                "node",
                "alice",
                SubscriptionOptions { promiscuous: false, subscriber_id: Some("s1".to_string()) },
            )
            .await
            .unwrap();
        h.publisher.publish("node", serde_json::json!({"id": "a"}), None).await.unwrap();

        let mut session = h.listener.begin(sub_id, "alice").await.unwrap();
        session.next().await.unwrap();
        drop(session);

        h.listener.begin(sub_id, "alice").await.unwrap();
        let state = h.manager.get(sub_id).unwrap();
        assert_eq!(state.last_delivered_id, 1);
    }

    #[tokio::test]
    async fn keep_alive_is_delivered_but_does_not_advance_cursor() {
        let h = harness();
        let sub_id = h.manager.subscribe("node", "alice", SubscriptionOptions::default()).await.unwrap();
        let mut session = h.listener.begin(sub_id, "alice").await.unwrap();

        h.publisher.publish_keepalive("node").await;
        let envelope = session.next().await.unwrap();
        assert_eq!(envelope.sequence_id, None);
        assert_eq!(h.manager.get(sub_id).unwrap().last_delivered_id, 0);
    }
}
