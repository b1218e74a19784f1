//! Floodgate is a leaky-bucket rate limiting library.
//!
//! Limits are declarative records describing which requests they cover
//! and how many are permitted per unit time; each matched request is
//! charged against a leaky bucket identified by a versioned composite
//! key. Bucket state lives behind the [`store::BucketStore`] trait, and
//! distributed deployments can reconstruct buckets by replaying journal
//! segments through [`journal::BucketLoader`].

pub mod bucket;
pub mod config;
pub mod error;
pub mod journal;
pub mod key;
pub mod limit;
pub mod store;
pub mod unit;

/// A request parameter mapping, ordered by name.
pub type Params = std::collections::BTreeMap<String, serde_json::Value>;
