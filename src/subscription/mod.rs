//! Subscription Manager: the live subscription table plus durable
//! subscriber bootstrap.
//!
//! A subscription is a short-lived live registration (`subscription_id`,
//! assigned from its own [`crate::sequence::SequenceOracle`] instance —
//! see `DESIGN.md` on why this is not the same counter as event
//! `sequence_id`). When the caller supplies a `subscriber_id` the
//! subscription is additionally backed by durable state in the
//! [`crate::registry::SubscriberRegistry`], which is what survives a
//! disconnect and makes catch-up possible.

use crate::clock::Clock;
use crate::error::{ClientError, Error, Result};
use crate::publisher::Publisher;
use crate::registry::{StateUpdate, SubscriberRegistry, SubscriberState};
use crate::sequence::SequenceOracle;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: i64,
    pub channel: String,
    pub user: String,
    pub promiscuous: bool,
    pub subscriber_id: Option<String>,
    /// The last `sequence_id` handed to this subscription, whether via
    /// catch-up replay or the live broker. Starts at the durable
    /// subscriber's `last_event_id` for durable subscriptions, or 0 for
    /// fire-and-forget ones.
    pub last_delivered_id: i64,
    /// Set once catch-up replay has fully drained. Irrelevant for
    /// non-durable subscriptions, which start `true`.
    pub catchup_done: bool,
    pub created: DateTime<Utc>,
    /// Updated on every `listen` call. The reaper's stale-subscription
    /// sweep reaps live entries whose `last_poll` predates its cutoff.
    pub last_poll: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SubscriptionOptions {
    pub promiscuous: bool,
    /// When set, this subscription is durable: its cursor is tracked in
    /// the registry under this id and survives across `listen` calls.
    pub subscriber_id: Option<String>,
}

pub struct SubscriptionManager {
    table: Mutex<HashMap<i64, Subscription>>,
    subscription_ids: Arc<dyn SequenceOracle>,
    /// Read-only access to the event log's sequence counter, so a
    /// brand-new durable subscriber can bootstrap its cursor at "now"
    /// instead of replaying the whole history. Never advanced from here.
    event_sequence: Arc<dyn SequenceOracle>,
    registry: Arc<dyn SubscriberRegistry>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionManager {
    pub fn new(
        subscription_ids: Arc<dyn SequenceOracle>,
        event_sequence: Arc<dyn SequenceOracle>,
        registry: Arc<dyn SubscriberRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
            subscription_ids,
            event_sequence,
            registry,
            clock,
        }
    }

    /// Registers a new live subscription on `channel`. When
    /// `options.subscriber_id` is set, binds to (or creates) durable
    /// cursor state; a `subscriber_id` already bound to a different user
    /// fails with [`ClientError::SubscriberOwnedByOther`].
    pub async fn subscribe(&self, channel: &str, user: &str, options: SubscriptionOptions) -> Result<i64> {
        let (last_delivered_id, catchup_done) = match &options.subscriber_id {
            None => (0, true),
            Some(subscriber_id) => match self.registry.get(subscriber_id).await? {
                Some(state) if state.user != user => {
                    return Err(Error::Client(ClientError::SubscriberOwnedByOther(subscriber_id.clone())));
                }
                Some(state) => (state.last_event_id, false),
                None => {
                    // A subscriber_id seen for the first time has no history to
                    // catch up on: it bootstraps at the event log's current
                    // high-water mark, not at 0, so it never replays events
                    // published before it ever subscribed.
                    let now = self.event_sequence.current().await?;
                    self.registry
                        .create(SubscriberState {
                            subscriber_id: subscriber_id.clone(),
                            channel: channel.to_string(),
                            user: user.to_string(),
                            promiscuous: options.promiscuous,
                            last_event_id: now,
                            last_poll: Some(self.clock.now()),
                            created_at: self.clock.now(),
                        })
                        .await?;
                    (now, true)
                }
            },
        };

        let id = self.subscription_ids.next().await?;
        let now = self.clock.now();
        let subscription = Subscription {
            id,
            channel: channel.to_string(),
            user: user.to_string(),
            promiscuous: options.promiscuous,
            subscriber_id: options.subscriber_id,
            last_delivered_id,
            catchup_done,
            created: now,
            last_poll: now,
        };
        self.table.lock().expect("subscription table poisoned").insert(id, subscription);
        Ok(id)
    }

    pub fn get(&self, subscription_id: i64) -> Result<Subscription> {
        self.table
            .lock()
            .expect("subscription table poisoned")
            .get(&subscription_id)
            .cloned()
            .ok_or(Error::Client(ClientError::UnknownSubscription(subscription_id)))
    }

    pub fn unsubscribe(&self, subscription_id: i64, user: &str) -> Result<()> {
        let mut table = self.table.lock().expect("subscription table poisoned");
        let subscription = table
            .get(&subscription_id)
            .ok_or(Error::Client(ClientError::UnknownSubscription(subscription_id)))?;
        if subscription.user != user {
            return Err(Error::Client(ClientError::NotOwner(subscription_id, user.to_string())));
        }
        table.remove(&subscription_id);
        Ok(())
    }

    /// Updates the in-memory cursor after a delivery. For durable
    /// subscriptions this is mirrored into the registry by the Listener's
    /// implicit-ack step, not here — this only tracks what the live table
    /// needs for the current `listen` call.
    pub fn mark_delivered(&self, subscription_id: i64, sequence_id: i64) {
        if let Some(subscription) = self.table.lock().expect("subscription table poisoned").get_mut(&subscription_id) {
            subscription.last_delivered_id = sequence_id;
            subscription.catchup_done = true;
        }
    }

    pub fn mark_catchup_done(&self, subscription_id: i64) {
        if let Some(subscription) = self.table.lock().expect("subscription table poisoned").get_mut(&subscription_id) {
            subscription.catchup_done = true;
        }
    }

    /// Stamps `last_poll` on a live subscription. Called at the top of
    /// every `listen` call, independent of the durable implicit-ack step.
    pub fn mark_polled(&self, subscription_id: i64) {
        if let Some(subscription) = self.table.lock().expect("subscription table poisoned").get_mut(&subscription_id) {
            subscription.last_poll = self.clock.now();
        }
    }

    /// Removes live subscriptions whose `last_poll` predates `older_than`.
    /// Durable registry state is untouched — a stale live subscription
    /// just means the caller stopped polling, not that its cursor should
    /// be forgotten. Returns the number of subscriptions removed.
    pub fn cleanup_stale_subscriptions(&self, older_than: chrono::DateTime<Utc>) -> u64 {
        let mut table = self.table.lock().expect("subscription table poisoned");
        let before = table.len();
        table.retain(|_, subscription| subscription.last_poll >= older_than);
        (before - table.len()) as u64
    }

    /// Implicitly acknowledges the durable cursor: advances the
    /// registry's `last_event_id` to whatever this subscription has last
    /// delivered. Called by the Listener at the top of every `listen`
    /// call, before any new delivery — acking the *previous* call's work.
    pub async fn implicit_ack(&self, subscription_id: i64) -> Result<()> {
        let (subscriber_id, last_delivered_id) = {
            let table = self.table.lock().expect("subscription table poisoned");
            let subscription = table
                .get(&subscription_id)
                .ok_or(Error::Client(ClientError::UnknownSubscription(subscription_id)))?;
            (subscription.subscriber_id.clone(), subscription.last_delivered_id)
        };
        let Some(subscriber_id) = subscriber_id else {
            return Ok(());
        };
        self.registry
            .update(
                &subscriber_id,
                StateUpdate {
                    last_event_id: Some(last_delivered_id),
                    last_poll: Some(self.clock.now()),
                },
            )
            .await
    }

    /// Distinct channels with at least one live subscription, for the
    /// keep-alive task to iterate.
    pub fn active_channels(&self) -> Vec<String> {
        let table = self.table.lock().expect("subscription table poisoned");
        table
            .values()
            .map(|s| s.channel.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect()
    }

    /// Spawns the periodic keep-alive task. Runs until the returned
    /// handle is dropped or aborted.
    pub fn spawn_keep_alive_task(self: &Arc<Self>, publisher: Arc<Publisher>, period: Duration) -> tokio::task::JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            loop {
                interval.tick().await;
                for channel in manager.active_channels() {
                    publisher.publish_keepalive(&channel).await;
                }
            }
        })
    }
}
