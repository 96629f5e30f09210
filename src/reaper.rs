//! Reaper: periodic cleanup of stale live subscriptions and stale
//! durable subscriber state. These are two independently-configurable
//! horizons on purpose — a live subscription going stale (its owner
//! vanished mid-poll) says nothing about whether its durable cursor
//! should be forgotten, and vice versa.

use crate::registry::SubscriberRegistry;
use crate::subscription::SubscriptionManager;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub struct Reaper {
    manager: Arc<SubscriptionManager>,
    registry: Arc<dyn SubscriberRegistry>,
}

impl Reaper {
    pub fn new(manager: Arc<SubscriptionManager>, registry: Arc<dyn SubscriberRegistry>) -> Self {
        Self { manager, registry }
    }

    /// Removes durable subscriber state untouched since before `cutoff`.
    /// Returns the number of records removed.
    pub async fn cleanup_stale_subscriber_states(&self, cutoff: DateTime<Utc>) -> crate::error::Result<u64> {
        self.registry.delete_stale(cutoff).await
    }

    /// Removes live subscriptions whose `last_poll` predates `cutoff`.
    /// Durable cursor state is untouched. Returns the number removed.
    pub fn cleanup_stale_subscriptions(&self, cutoff: DateTime<Utc>) -> u64 {
        self.manager.cleanup_stale_subscriptions(cutoff)
    }

    /// Spawns the periodic sweep: both stale-subscription and
    /// stale-subscriber-state cleanup run every `check_period`, each
    /// against its own independently configured horizon.
    pub fn spawn(
        self: &Arc<Self>,
        check_period: Duration,
        stale_subscription_minutes: i64,
        stale_subscriber_state_days: i64,
    ) -> tokio::task::JoinHandle<()> {
        let reaper = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(check_period);
            loop {
                interval.tick().await;

                let subscription_cutoff = Utc::now() - chrono::Duration::minutes(stale_subscription_minutes);
                let removed = reaper.cleanup_stale_subscriptions(subscription_cutoff);
                if removed > 0 {
                    log::info!("reaper removed {removed} stale live subscription(s)");
                }

                let state_cutoff = Utc::now() - chrono::Duration::days(stale_subscriber_state_days);
                match reaper.cleanup_stale_subscriber_states(state_cutoff).await {
                    Ok(removed) if removed > 0 => {
                        log::info!("reaper removed {removed} stale subscriber state record(s)");
                    }
                    Ok(_) => {}
                    Err(err) => log::warn!("reaper sweep failed: {err}"),
                }
            }
        })
    }

    pub fn manager(&self) -> &Arc<SubscriptionManager> {
        &self.manager
    }
}
