//! Limit configuration loading.

use std::sync::Arc;

use tracing::{info, warn};

use crate::error::{FloodgateError, Result};
use crate::limit::Limit;
use crate::store::BucketStore;
use crate::Params;

/// Load a set of limits from a YAML document.
///
/// The document is a sequence of limit records, each a mapping carrying
/// `limit_class` plus that class's attributes. Records naming a class not
/// registered in this process are skipped with a warning, so a config
/// written for a newer deployment still loads; a record whose attributes
/// fail validation is an error.
pub fn load_limits(db: Arc<dyn BucketStore>, yaml: &str) -> Result<Vec<Arc<Limit>>> {
    let records: Vec<Params> = serde_yaml::from_str(yaml)
        .map_err(|e| FloodgateError::Config(format!("cannot parse limits config: {}", e)))?;

    let mut limits = Vec::with_capacity(records.len());
    for (index, record) in records.into_iter().enumerate() {
        match Limit::hydrate(db.clone(), record)? {
            Some(limit) => limits.push(Arc::new(limit)),
            None => warn!(index, "skipping limit record with unregistered class"),
        }
    }

    info!(count = limits.len(), "loaded limits configuration");
    Ok(limits)
}
