//! Sequence Oracle: a strictly-increasing, gap-free-by-construction
//! counter shared by the Event Log (for `sequence_id`) and the
//! Subscription Manager (for `subscription_id`, via a second, independent
//! instance — see `DESIGN.md` for why these are deliberately two separate
//! counters rather than the single shared one the original source used
//! inconsistently).

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};

#[async_trait]
pub trait SequenceOracle: Send + Sync {
    /// Atomically allocates and returns the next value.
    async fn next(&self) -> Result<i64>;

    /// Returns the current high-water mark without allocating, used to
    /// start a brand-new durable subscriber "from now".
    async fn current(&self) -> Result<i64>;
}

/// In-process atomic counter. Initializes to 0 on first use, per spec.
pub struct InMemorySequenceOracle {
    value: AtomicI64,
}

impl InMemorySequenceOracle {
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }
}

impl Default for InMemorySequenceOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SequenceOracle for InMemorySequenceOracle {
    async fn next(&self) -> Result<i64> {
        Ok(self.value.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn current(&self) -> Result<i64> {
        Ok(self.value.load(Ordering::SeqCst))
    }
}

/// A oracle that always fails, for exercising the §7 "Fatal" path in
/// tests: an unavailable oracle must refuse publishes and subscribes
/// rather than silently hand out bad sequence numbers.
pub struct UnavailableSequenceOracle;

#[async_trait]
impl SequenceOracle for UnavailableSequenceOracle {
    async fn next(&self) -> Result<i64> {
        Err(Error::Fatal("sequence oracle unreachable".to_string()))
    }

    async fn current(&self) -> Result<i64> {
        Err(Error::Fatal("sequence oracle unreachable".to_string()))
    }
}
