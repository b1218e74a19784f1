//! Error types for the Floodgate library.

use thiserror::Error;

/// Main error type for Floodgate operations.
#[derive(Error, Debug)]
pub enum FloodgateError {
    /// A field was assigned an out-of-range or wrongly-typed value
    #[error("Invalid value for {field}: {reason}")]
    Validation {
        /// Name of the offending field
        field: &'static str,
        /// Why the value was rejected
        reason: String,
    },

    /// One or more required attributes were absent at construction.
    /// Carries the complete set of missing names, sorted.
    #[error("Missing required attributes: {}", .0.join(", "))]
    MissingAttrs(Vec<String>),

    /// A time unit name was not recognized
    #[error("Unknown time unit {0:?}")]
    UnknownUnit(String),

    /// A bucket key string could not be interpreted
    #[error("Malformed bucket key: {0}")]
    KeyFormat(String),

    /// A decoded bucket key belongs to a different limit
    #[error("Bucket key {key:?} does not correspond to limit {uuid}")]
    KeyMismatch {
        /// The offending key string
        key: String,
        /// UUID of the limit that attempted the decode
        uuid: String,
    },

    /// A journal segment contained an unreadable record; the whole
    /// segment must be discarded
    #[error("Corrupt journal record: {0}")]
    JournalCorruption(String),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for Floodgate operations.
pub type Result<T> = std::result::Result<T, FloodgateError>;
