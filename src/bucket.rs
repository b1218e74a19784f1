//! Leaky bucket state and the delay/admit algorithm.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::limit::Limit;
use crate::Params;

/// Guard against floating-point noise in the overflow comparison.
pub const EPS: f64 = 0.1;

/// Current wall-clock time as fractional unix seconds.
pub(crate) fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// The persisted portion of a bucket, as stored and journaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketState {
    /// Timestamp of the most recent admission evaluation
    pub last: Option<f64>,
    /// Earliest timestamp a message may be admitted without delay
    pub next: Option<f64>,
    /// Current fill, in seconds-equivalent
    pub level: f64,
}

/// A leaky bucket tracking admission state for one limit + parameter set.
#[derive(Debug, Clone)]
pub struct Bucket {
    limit: Arc<Limit>,
    key: String,
    last: Option<f64>,
    next: Option<f64>,
    level: f64,
}

impl Bucket {
    /// Create a fresh, empty bucket.
    pub fn new(limit: Arc<Limit>, key: impl Into<String>) -> Self {
        Self {
            limit,
            key: key.into(),
            last: None,
            next: None,
            level: 0.0,
        }
    }

    /// Reconstruct a bucket from its persisted state.
    pub fn hydrate(limit: Arc<Limit>, key: impl Into<String>, state: BucketState) -> Self {
        Self {
            limit,
            key: key.into(),
            last: state.last,
            next: state.next,
            level: state.level,
        }
    }

    /// The persisted form of this bucket.
    ///
    /// Key and limit identity are constructor context, not payload.
    pub fn dehydrate(&self) -> BucketState {
        BucketState {
            last: self.last,
            next: self.next,
            level: self.level,
        }
    }

    /// Determine the delay before the next message may be admitted.
    ///
    /// Returns `None` and raises the water level if the message is
    /// admitted, or the required delay in seconds if the bucket is over
    /// limit (in which case the level is left unchanged).
    ///
    /// A `now` earlier than the last observation is clamped to it: a
    /// journal may replay updates out of timestamp order across redundant
    /// delivery paths, and clamping keeps `last` monotonic at the cost of
    /// slightly under-counting leakage for reordered records.
    pub fn delay(&mut self, _params: &Params, mut now: f64) -> Option<f64> {
        match self.last {
            None => self.last = Some(now),
            Some(last) if now < last => now = last,
            Some(_) => {}
        }

        // How much has leaked out since the last observation?
        let leaked = now - self.last.unwrap_or(now);
        self.last = Some(now);
        self.level = (self.level - leaked).max(0.0);

        let overflow = self.level + self.limit.cost() - self.limit.unit_value() as f64;
        if overflow >= EPS {
            self.next = Some(now + overflow);
            trace!(key = %self.key, delay = overflow, "bucket over limit");
            return Some(overflow);
        }

        self.level += self.limit.cost();
        self.next = Some(now);
        None
    }

    /// Like [`delay`](Self::delay), using the current wall-clock time.
    pub fn delay_now(&mut self, params: &Params) -> Option<f64> {
        self.delay(params, unix_now())
    }

    /// Estimated number of messages still admissible in the current window.
    ///
    /// May be 0 even when the bucket isn't quite full, due to flooring.
    pub fn messages(&self) -> u64 {
        let unit_value = self.limit.unit_value() as f64;
        let value = self.limit.value() as f64;
        (((unit_value - self.level) / unit_value) * value)
            .floor()
            .max(0.0) as u64
    }

    /// Storage TTL hint: the bucket's influence is immaterial after this
    /// timestamp, since the level will have fully leaked away.
    pub fn expire(&self) -> u64 {
        (self.last.unwrap_or(0.0) + self.level).ceil() as u64
    }

    /// The key this bucket is stored under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The limit governing this bucket.
    pub fn limit(&self) -> &Arc<Limit> {
        &self.limit
    }

    /// Timestamp of the most recent admission evaluation.
    pub fn last(&self) -> Option<f64> {
        self.last
    }

    /// Earliest timestamp a message may be admitted without delay.
    pub fn next(&self) -> Option<f64> {
        self.next
    }

    /// Current water level.
    pub fn level(&self) -> f64 {
        self.level
    }
}
