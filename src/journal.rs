//! Bucket journal records and replay.
//!
//! Distributed deployments reconstruct a bucket by replaying a journal
//! segment: an ordered sequence of records, each either a full state
//! snapshot, a single update, or a summarize marker left behind by a
//! previous compaction. Records travel as msgpack maps whose single
//! distinguishing key names the variant.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::bucket::{Bucket, BucketState};
use crate::error::{FloodgateError, Result};
use crate::limit::Limit;
use crate::Params;

/// One decoded journal record.
#[derive(Debug, Clone, PartialEq)]
pub enum JournalRecord {
    /// Replace the bucket with this state wholesale
    Snapshot(BucketState),
    /// Apply one admission evaluation at the recorded time
    Update {
        /// Request parameters at the time of the update
        params: Params,
        /// Timestamp the update was originally evaluated at
        time: f64,
        /// Identity of the request that produced the update, when the
        /// writer tagged it
        id: Option<String>,
    },
    /// Marker left where a compaction pass summarized earlier records
    Summary,
}

#[derive(Debug, Serialize, Deserialize)]
struct RawUpdate {
    params: Params,
    time: f64,
}

/// Wire shape of a record: a map carrying exactly one variant key.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    bucket: Option<BucketState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    update: Option<RawUpdate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summarize: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    uuid: Option<String>,
}

impl TryFrom<RawRecord> for JournalRecord {
    type Error = FloodgateError;

    fn try_from(raw: RawRecord) -> Result<Self> {
        match raw {
            RawRecord {
                bucket: Some(state),
                update: None,
                summarize: None,
                uuid: None,
            } => Ok(JournalRecord::Snapshot(state)),
            RawRecord {
                bucket: None,
                update: Some(update),
                summarize: None,
                uuid,
            } => Ok(JournalRecord::Update {
                params: update.params,
                time: update.time,
                id: uuid,
            }),
            RawRecord {
                bucket: None,
                update: None,
                summarize: Some(true),
                uuid: None,
            } => Ok(JournalRecord::Summary),
            other => Err(FloodgateError::JournalCorruption(format!(
                "record is not a snapshot, update, or summarize marker: {:?}",
                other
            ))),
        }
    }
}

impl From<&JournalRecord> for RawRecord {
    fn from(record: &JournalRecord) -> Self {
        match record {
            JournalRecord::Snapshot(state) => RawRecord {
                bucket: Some(state.clone()),
                ..RawRecord::default()
            },
            JournalRecord::Update { params, time, id } => RawRecord {
                update: Some(RawUpdate {
                    params: params.clone(),
                    time: *time,
                }),
                uuid: id.clone(),
                ..RawRecord::default()
            },
            JournalRecord::Summary => RawRecord {
                summarize: Some(true),
                ..RawRecord::default()
            },
        }
    }
}

impl JournalRecord {
    /// Serialize this record to its wire form.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rmp_serde::to_vec_named(&RawRecord::from(self))
            .map_err(|e| FloodgateError::JournalCorruption(format!("cannot encode record: {}", e)))
    }

    /// Deserialize a record from its wire form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let raw: RawRecord = rmp_serde::from_slice(bytes)
            .map_err(|e| FloodgateError::JournalCorruption(format!("cannot decode record: {}", e)))?;
        raw.try_into()
    }
}

/// Decode a full journal segment.
///
/// A segment is all-or-nothing: any record that fails to decode poisons
/// the whole segment, since replaying around a gap would corrupt the
/// bucket silently.
pub fn decode_segment(raw: &[Vec<u8>]) -> Result<Vec<JournalRecord>> {
    raw.iter().map(|bytes| JournalRecord::from_bytes(bytes)).collect()
}

/// Optional halting controls for a replay pass.
#[derive(Debug, Clone, Default)]
pub struct ReplayControls {
    /// Halt after the update record carrying this identity
    pub stop_id: Option<String>,
    /// Halt at the last summarize marker in the segment
    pub stop_at_last_summary: bool,
}

/// Replays a journal segment into a bucket, tracking what a compaction
/// pass needs to know.
#[derive(Debug)]
pub struct BucketLoader {
    bucket: Bucket,
    updates: usize,
    last_delay: Option<f64>,
    summarized: bool,
    last_summarize: Option<usize>,
}

impl BucketLoader {
    /// Replay decoded records into a fresh bucket.
    ///
    /// Processing stops after the record a halting control names; records
    /// beyond that point are left unconsumed.
    pub fn replay(
        limit: &Arc<Limit>,
        key: &str,
        records: &[JournalRecord],
        controls: &ReplayControls,
    ) -> Self {
        // The last-summary bound is fixed up front, not discovered as we go
        let summary_bound = if controls.stop_at_last_summary {
            records
                .iter()
                .rposition(|r| matches!(r, JournalRecord::Summary))
        } else {
            None
        };

        let mut loader = Self {
            bucket: Bucket::new(limit.clone(), key),
            updates: 0,
            last_delay: None,
            summarized: false,
            last_summarize: None,
        };

        for (index, record) in records.iter().enumerate() {
            match record {
                JournalRecord::Snapshot(state) => {
                    trace!(key, index, "journal snapshot replaces bucket");
                    loader.bucket = Bucket::hydrate(limit.clone(), key, state.clone());
                }
                JournalRecord::Update { params, time, id } => {
                    loader.last_delay = loader.bucket.delay(params, *time);
                    loader.updates += 1;
                    if id.is_some() && *id == controls.stop_id {
                        trace!(key, index, "replay halting at requested record");
                        break;
                    }
                }
                JournalRecord::Summary => {
                    loader.summarized = true;
                    loader.last_summarize = Some(index);
                }
            }

            if summary_bound == Some(index) {
                trace!(key, index, "replay halting at last summarize marker");
                break;
            }
        }

        loader
    }

    /// Decode a raw segment and replay it.
    pub fn from_segment(
        limit: &Arc<Limit>,
        key: &str,
        raw: &[Vec<u8>],
        controls: &ReplayControls,
    ) -> Result<Self> {
        let records = decode_segment(raw)?;
        Ok(Self::replay(limit, key, &records, controls))
    }

    /// The reconstructed bucket.
    pub fn bucket(&self) -> &Bucket {
        &self.bucket
    }

    /// Consume the loader, yielding the reconstructed bucket.
    pub fn into_bucket(self) -> Bucket {
        self.bucket
    }

    /// Number of update records applied.
    pub fn updates(&self) -> usize {
        self.updates
    }

    /// The delay produced by the most recent update, if any.
    pub fn last_delay(&self) -> Option<f64> {
        self.last_delay
    }

    /// Whether any summarize marker was consumed.
    pub fn summarized(&self) -> bool {
        self.summarized
    }

    /// Index of the most recent summarize marker consumed.
    pub fn last_summarize(&self) -> Option<usize> {
        self.last_summarize
    }

    /// Whether the consumed portion of the segment should be summarized:
    /// at least `threshold` updates with no summarize marker seen.
    pub fn need_summary(&self, threshold: usize) -> bool {
        self.updates >= threshold && !self.summarized
    }
}
