//! Environment-driven settings, mirroring `PubSubSettings` from the
//! original Python source almost field-for-field.

use std::env;
use std::time::Duration;

/// Default catch-up queue cap per subscribe (`DEFAULT_MAX_CATCHUP_EVENTS`).
pub const DEFAULT_MAX_CATCHUP_EVENTS: usize = 1000;

/// Default event-log retention: 7 days.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(604_800);

/// Default keep-alive cadence.
pub const DEFAULT_KEEP_ALIVE_PERIOD: Duration = Duration::from_secs(45);

/// Default reaper cutoffs.
pub const DEFAULT_STALE_SUBSCRIPTION_MINUTES: i64 = 30;
pub const DEFAULT_STALE_SUBSCRIBER_STATE_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct Settings {
    /// CloudEvents `source` attribute stamped onto outgoing envelopes.
    pub cloud_events_source: String,
    /// Backing-broker host. Carried through for a real Redis-backed
    /// `Broker` implementation; the in-memory broker ignores it.
    pub redis_host: String,
    /// Backing-broker database index, same caveat as `redis_host`.
    pub redis_db_number: u32,
    /// How often the keep-alive task BEEPs each channel with a live
    /// subscription.
    pub keep_alive_period: Duration,
    /// How long an event survives in the log before it is eligible for
    /// eviction.
    pub retention: Duration,
    /// Per-subscribe cap on the number of catch-up events queued.
    pub max_catchup_events: usize,
    pub stale_subscription_minutes: i64,
    pub stale_subscriber_state_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cloud_events_source: "https://api.kernelci.org/".to_string(),
            redis_host: "redis".to_string(),
            redis_db_number: 1,
            keep_alive_period: DEFAULT_KEEP_ALIVE_PERIOD,
            retention: DEFAULT_RETENTION,
            max_catchup_events: DEFAULT_MAX_CATCHUP_EVENTS,
            stale_subscription_minutes: DEFAULT_STALE_SUBSCRIPTION_MINUTES,
            stale_subscriber_state_days: DEFAULT_STALE_SUBSCRIBER_STATE_DAYS,
        }
    }
}

impl Settings {
    /// Loads settings from the environment, falling back to defaults for
    /// anything unset or unparsable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            cloud_events_source: env::var("CLOUD_EVENTS_SOURCE")
                .unwrap_or(defaults.cloud_events_source),
            redis_host: env::var("REDIS_HOST").unwrap_or(defaults.redis_host),
            redis_db_number: env::var("REDIS_DB_NUMBER")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.redis_db_number),
            keep_alive_period: env::var("KEEP_ALIVE_PERIOD")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.keep_alive_period),
            retention: env::var("EVENT_LOG_RETENTION_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.retention),
            max_catchup_events: env::var("MAX_CATCHUP_EVENTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_catchup_events),
            stale_subscription_minutes: defaults.stale_subscription_minutes,
            stale_subscriber_state_days: defaults.stale_subscriber_state_days,
        }
    }
}
