//! Event storage shape and the on-wire CloudEvents envelope.
//!
//! Two related but distinct types live here: [`Event`] is what the Event
//! Log stores (durable, immutable, keyed by `sequence_id`); [`Envelope`] is
//! what a client receives from `listen`, whether the message came from
//! catch-up replay or from the live broker. They carry the same
//! information — `Envelope` is always built from an `Event` — but keeping
//! them separate keeps the CloudEvents wire shape out of the storage type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A durable, immutable record in the Event Log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub sequence_id: i64,
    pub timestamp: DateTime<Utc>,
    pub channel: String,
    pub owner: Option<String>,
    pub data: Value,
}

/// Attributes a publisher may supply; anything left unset is filled in by
/// [`crate::publisher::Publisher::publish`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attributes {
    #[serde(rename = "type")]
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub owner: Option<String>,
}

pub const DEFAULT_EVENT_TYPE: &str = "api.kernelci.org";

/// CloudEvents 1.0 structured JSON envelope, with the in-band
/// `_sequence_id` the spec requires so a Listener can track progress for
/// messages it only ever sees live.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub data: Value,
    #[serde(rename = "_sequence_id", skip_serializing_if = "Option::is_none")]
    pub sequence_id: Option<i64>,
}

impl Envelope {
    pub fn from_event(event: &Event, source: &str) -> Self {
        Self {
            event_type: DEFAULT_EVENT_TYPE.to_string(),
            source: source.to_string(),
            owner: event.owner.clone(),
            data: event.data.clone(),
            sequence_id: Some(event.sequence_id),
        }
    }

    /// A keep-alive "BEEP" envelope. Never backed by a stored `Event`.
    pub fn keep_alive(source: &str) -> Self {
        Self {
            event_type: DEFAULT_EVENT_TYPE.to_string(),
            source: source.to_string(),
            owner: None,
            data: Value::String("BEEP".to_string()),
            sequence_id: None,
        }
    }

    /// A synthetic, never-stored marker telling a reconnecting durable
    /// subscriber that some history between its last ack and the earliest
    /// surviving event was evicted by retention. See `DESIGN.md` for why
    /// this resolves the spec's "retention gap" open question.
    pub fn retention_gap(source: &str, requested_after: i64, earliest_available: i64) -> Self {
        Self {
            event_type: DEFAULT_EVENT_TYPE.to_string(),
            source: source.to_string(),
            owner: None,
            data: serde_json::json!({
                "warning": "retention_gap",
                "requested_after_id": requested_after,
                "earliest_available_id": earliest_available,
            }),
            sequence_id: None,
        }
    }

    /// True for envelopes visible to a non-promiscuous subscriber owned by
    /// `user`: owner is either unset or exactly `user`.
    pub fn visible_to(&self, user: &str, promiscuous: bool) -> bool {
        if promiscuous {
            return true;
        }
        match self.owner.as_deref() {
            None => true,
            Some(owner) => owner == user,
        }
    }
}
