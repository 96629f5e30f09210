//! Subscriber Registry: durable per-`subscriber_id` cursor state.
//!
//! This is the record that makes "resume after crash" possible. It
//! survives process restarts (in a real deployment; the in-memory
//! implementation here survives only the process, which is the correct
//! scope for a library-level reference implementation) and is updated on
//! every implicit ack.

use crate::error::{ClientError, Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberState {
    pub subscriber_id: String,
    pub channel: String,
    pub user: String,
    pub promiscuous: bool,
    pub last_event_id: i64,
    pub last_poll: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields that may be updated on an existing record. `None` leaves the
/// field untouched.
#[derive(Debug, Default)]
pub struct StateUpdate {
    pub last_event_id: Option<i64>,
    pub last_poll: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait SubscriberRegistry: Send + Sync {
    async fn get(&self, subscriber_id: &str) -> Result<Option<SubscriberState>>;

    /// Fails with [`ClientError::SubscriberOwnedByOther`] if a record with
    /// this `subscriber_id` already exists (uniqueness is enforced here,
    /// not left to the caller).
    async fn create(&self, state: SubscriberState) -> Result<()>;

    async fn update(&self, subscriber_id: &str, update: StateUpdate) -> Result<()>;

    /// Removes records whose `last_poll` predates `older_than`. Returns
    /// the number removed. Irreversible.
    async fn delete_stale(&self, older_than: DateTime<Utc>) -> Result<u64>;
}

#[derive(Default)]
pub struct InMemorySubscriberRegistry {
    states: RwLock<HashMap<String, SubscriberState>>,
}

impl InMemorySubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SubscriberRegistry for InMemorySubscriberRegistry {
    async fn get(&self, subscriber_id: &str) -> Result<Option<SubscriberState>> {
        Ok(self.states.read().await.get(subscriber_id).cloned())
    }

    async fn create(&self, state: SubscriberState) -> Result<()> {
        let mut states = self.states.write().await;
        if states.contains_key(&state.subscriber_id) {
            return Err(Error::Client(ClientError::SubscriberOwnedByOther(
                state.subscriber_id,
            )));
        }
        states.insert(state.subscriber_id.clone(), state);
        Ok(())
    }

    async fn update(&self, subscriber_id: &str, update: StateUpdate) -> Result<()> {
        let mut states = self.states.write().await;
        let Some(state) = states.get_mut(subscriber_id) else {
            return Err(Error::Internal(format!(
                "update on unknown subscriber_id {subscriber_id}"
            )));
        };
        if let Some(last_event_id) = update.last_event_id {
            state.last_event_id = last_event_id;
        }
        if let Some(last_poll) = update.last_poll {
            state.last_poll = Some(last_poll);
        }
        Ok(())
    }

    async fn delete_stale(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut states = self.states.write().await;
        let before = states.len();
        states.retain(|_, state| match state.last_poll {
            Some(last_poll) => last_poll >= older_than,
            None => true,
        });
        Ok((before - states.len()) as u64)
    }
}
