//! In-memory reference `EventLog`.
//!
//! Events are kept in a single global `BTreeMap<sequence_id, Event>` plus a
//! per-channel index of sequence ids, so `range` never scans events outside
//! the requested channel. Retention eviction removes entries whose
//! timestamp has aged past `retention`; readers are expected to tolerate
//! the resulting gap between a subscriber's `last_event_id` and the oldest
//! surviving event (see [`EventLog::earliest_sequence_id`]).

use super::EventLog;
use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::sequence::SequenceOracle;
use async_trait::async_trait;
use log::warn;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Metadata describing a pre-existing log on disk, used only to decide
/// whether the one-shot legacy migration in [`InMemoryEventLog::open`]
/// needs to run. A real on-disk implementation would read this from the
/// store's own index metadata, the way the original source inspects the
/// `expireAfterSeconds` of the `timestamp` TTL index.
#[derive(Debug, Clone, Copy)]
pub struct LegacyMarker {
    pub retention_seconds: u64,
    pub has_sequence_index: bool,
}

impl LegacyMarker {
    fn is_legacy(&self) -> bool {
        !self.has_sequence_index && self.retention_seconds < 604_800
    }
}

struct Store {
    events: BTreeMap<i64, Event>,
    by_channel: HashMap<String, BTreeSet<i64>>,
}

impl Store {
    fn new() -> Self {
        Self {
            events: BTreeMap::new(),
            by_channel: HashMap::new(),
        }
    }
}

pub struct InMemoryEventLog {
    oracle: Arc<dyn SequenceOracle>,
    clock: Arc<dyn Clock>,
    retention: chrono::Duration,
    store: RwLock<Store>,
}

impl InMemoryEventLog {
    /// Opens the log, running the one-shot legacy-format migration if
    /// `legacy` indicates the previous deployment predates sequence-based
    /// catch-up. Migration here means "start fresh": bounded data loss up
    /// to the legacy retention horizon is acceptable per spec.
    pub fn open(
        oracle: Arc<dyn SequenceOracle>,
        clock: Arc<dyn Clock>,
        retention: std::time::Duration,
        legacy: Option<LegacyMarker>,
    ) -> Self {
        if let Some(marker) = legacy {
            if marker.is_legacy() {
                warn!(
                    "detected legacy event log format (retention={}s, no sequence index); rebuilding",
                    marker.retention_seconds
                );
            }
        }
        Self {
            oracle,
            clock,
            retention: chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::days(7)),
            store: RwLock::new(Store::new()),
        }
    }

    pub fn new(oracle: Arc<dyn SequenceOracle>, clock: Arc<dyn Clock>, retention: std::time::Duration) -> Self {
        Self::open(oracle, clock, retention, None)
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, channel: &str, data: serde_json::Value, owner: Option<String>) -> Result<Event> {
        if channel.is_empty() {
            return Err(Error::Client(crate::error::ClientError::EmptyChannel));
        }
        let sequence_id = self.oracle.next().await?;
        let event = Event {
            sequence_id,
            timestamp: self.clock.now(),
            channel: channel.to_string(),
            owner,
            data,
        };

        let mut store = self.store.write().await;
        store.events.insert(sequence_id, event.clone());
        store
            .by_channel
            .entry(channel.to_string())
            .or_default()
            .insert(sequence_id);

        Ok(event)
    }

    async fn range(
        &self,
        channel: &str,
        after_seq_id: i64,
        owner_filter: Option<&str>,
        promiscuous: bool,
        limit: Option<usize>,
    ) -> Result<Vec<Event>> {
        let limit = limit.unwrap_or(super::DEFAULT_RANGE_LIMIT);
        let store = self.store.read().await;
        let Some(ids) = store.by_channel.get(channel) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();
        for &id in ids.range((after_seq_id + 1)..) {
            let event = store.events.get(&id).expect("index consistent with store");
            if !promiscuous {
                let visible = match (&event.owner, owner_filter) {
                    (None, _) => true,
                    (Some(owner), Some(filter)) => owner == filter,
                    (Some(_), None) => false,
                };
                if !visible {
                    continue;
                }
            }
            out.push(event.clone());
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    async fn earliest_sequence_id(&self, channel: &str) -> Result<Option<i64>> {
        let store = self.store.read().await;
        Ok(store
            .by_channel
            .get(channel)
            .and_then(|ids| ids.iter().next().copied()))
    }

    async fn evict_expired(&self) -> Result<usize> {
        let cutoff = self.clock.now() - self.retention;
        let mut store = self.store.write().await;
        let expired: Vec<i64> = store
            .events
            .values()
            .filter(|event| event.timestamp < cutoff)
            .map(|event| event.sequence_id)
            .collect();

        for id in &expired {
            if let Some(event) = store.events.remove(id) {
                if let Some(ids) = store.by_channel.get_mut(&event.channel) {
                    ids.remove(id);
                }
            }
        }
        Ok(expired.len())
    }
}
