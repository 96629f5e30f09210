//! Crate-wide error taxonomy.
//!
//! Four kinds, matching the error-handling design in the specification:
//! client mistakes (bad sub id, wrong owner), a durability failure on
//! append, a fatal sequence-oracle outage, and everything else bucketed as
//! an opaque internal error. Transient broker hiccups are *not* a variant
//! here — they are absorbed inside [`crate::listener::Listener`] and never
//! escape to a caller.

use thiserror::Error;

/// Client-caused failures. Callers should surface these as 4xx at the HTTP
/// boundary; the engine never retries them itself.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("subscription {0} not found")]
    UnknownSubscription(i64),

    #[error("subscription {0} is not owned by {1}")]
    NotOwner(i64, String),

    #[error("subscriber_id {0} is already bound to a different user")]
    SubscriberOwnedByOther(String),

    #[error("channel name must not be empty")]
    EmptyChannel,
}

/// Top-level crate error.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] ClientError),

    /// `EventLog::append` failed to durably record an event. The caller's
    /// `publish` never proceeds to the broker when this happens.
    #[error("event log append failed: {0}")]
    Durability(String),

    /// The sequence oracle is unavailable; the engine must refuse new
    /// publishes and new subscribes while this persists.
    #[error("sequence oracle unavailable: {0}")]
    Fatal(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
