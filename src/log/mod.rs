//! Append-only Event Log: the durable half of the hybrid engine.
//!
//! `append` must confirm durability before the Publisher is allowed to
//! broadcast; `range` serves catch-up queries, ordered by `sequence_id`
//! ascending and owner-filtered unless the caller is promiscuous.

pub mod memory;

use crate::error::Result;
use crate::event::Event;
use async_trait::async_trait;

pub use memory::InMemoryEventLog;

/// Default page size for `range` when the caller doesn't specify one.
pub const DEFAULT_RANGE_LIMIT: usize = 1000;

#[async_trait]
pub trait EventLog: Send + Sync {
    /// Durably appends an event and returns its sequence id. The broadcast
    /// to the Broker must not happen until this returns `Ok`.
    async fn append(&self, channel: &str, data: serde_json::Value, owner: Option<String>) -> Result<Event>;

    /// Events on `channel` with `sequence_id > after_seq_id`, ascending,
    /// capped at `limit` (default [`DEFAULT_RANGE_LIMIT`]). When
    /// `promiscuous` is false, only events visible to `owner_filter`
    /// (owner is null or equal to it) are returned.
    async fn range(
        &self,
        channel: &str,
        after_seq_id: i64,
        owner_filter: Option<&str>,
        promiscuous: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Event>>;

    /// The oldest surviving `sequence_id` on `channel`, if any events
    /// remain after retention eviction. Used to detect a retention gap: a
    /// durable subscriber's `last_event_id` predates this.
    async fn earliest_sequence_id(&self, channel: &str) -> Result<Option<i64>>;

    /// Evicts events older than the configured retention horizon. Returns
    /// the number of events removed.
    async fn evict_expired(&self) -> Result<usize>;
}
