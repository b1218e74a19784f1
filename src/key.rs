//! Versioned bucket key codec.
//!
//! A bucket key identifies one leaky-bucket instance: the owning limit's
//! UUID plus the request parameters the limit uses. Parameter values are
//! serialized as JSON and percent-escaped for exactly two reserved bytes,
//! `/` and `%`, so the key string can be split on `/` safely.

use std::fmt;

use once_cell::sync::OnceCell;
use serde_json::Value;

use crate::error::{FloodgateError, Result};
use crate::Params;

/// Supported bucket key encodings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyVersion {
    /// Original encoding, prefixed `bucket:`
    V1,
    /// Current encoding, prefixed `bucket_v2:`
    V2,
}

impl KeyVersion {
    /// The key prefix for this version.
    pub fn prefix(&self) -> &'static str {
        match self {
            KeyVersion::V1 => "bucket",
            KeyVersion::V2 => "bucket_v2",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "bucket" => Some(KeyVersion::V1),
            "bucket_v2" => Some(KeyVersion::V2),
            _ => None,
        }
    }
}

/// Encode one parameter value: JSON, with '/' and '%' escaped.
fn encode_value(value: &Value) -> String {
    let json = value.to_string();
    let mut out = String::with_capacity(json.len());
    for c in json.chars() {
        match c {
            '/' => out.push_str("%2f"),
            '%' => out.push_str("%25"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode one parameter value: revert '%'-escaped groups, then parse JSON.
fn decode_value(encoded: &str) -> Result<Value> {
    let chars: Vec<char> = encoded.chars().collect();
    let mut out = String::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '%' && i + 2 < chars.len() {
            let hi = chars[i + 1].to_digit(16);
            let lo = chars[i + 2].to_digit(16);
            if let (Some(hi), Some(lo)) = (hi, lo) {
                if let Some(c) = char::from_u32(hi * 16 + lo) {
                    out.push(c);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(chars[i]);
        i += 1;
    }

    serde_json::from_str(&out)
        .map_err(|e| FloodgateError::KeyFormat(format!("cannot decode key value {:?}: {}", encoded, e)))
}

/// A versioned composite key identifying one bucket instance.
///
/// The string form is computed lazily and cached; a key is value-immutable
/// once constructed.
#[derive(Debug, Clone)]
pub struct BucketKey {
    uuid: String,
    params: Params,
    version: KeyVersion,
    cache: OnceCell<String>,
}

impl BucketKey {
    /// Create a key for the given limit UUID and parameter mapping.
    pub fn new(uuid: impl Into<String>, params: Params, version: KeyVersion) -> Self {
        Self {
            uuid: uuid.into(),
            params,
            version,
            cache: OnceCell::new(),
        }
    }

    /// The UUID of the owning limit.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The parameter mapping this key was built from.
    pub fn params(&self) -> &Params {
        &self.params
    }

    /// The encoding version of this key.
    pub fn version(&self) -> KeyVersion {
        self.version
    }

    /// The canonical string form, computed on first use.
    ///
    /// Parameters are emitted in ascending name order.
    pub fn as_str(&self) -> &str {
        self.cache.get_or_init(|| {
            let mut out = format!("{}:{}", self.version.prefix(), self.uuid);
            for (name, value) in &self.params {
                out.push('/');
                out.push_str(name);
                out.push('=');
                out.push_str(&encode_value(value));
            }
            out
        })
    }

    /// Parse a key string produced by [`BucketKey::as_str`].
    ///
    /// Fails if the prefix doesn't name a known version or any segment is
    /// not a well-formed `name=value` pair.
    pub fn decode(key: &str) -> Result<Self> {
        let (prefix, rest) = key
            .split_once(':')
            .ok_or_else(|| FloodgateError::KeyFormat(format!("{:?} is not a bucket key", key)))?;
        let version = KeyVersion::from_prefix(prefix).ok_or_else(|| {
            FloodgateError::KeyFormat(format!("unknown bucket key prefix {:?}", prefix))
        })?;

        let mut segments = rest.split('/');
        // First segment is always present, even for an empty remainder
        let uuid = segments.next().unwrap_or_default().to_string();

        let mut params = Params::new();
        for segment in segments {
            let (name, value) = segment.split_once('=').ok_or_else(|| {
                FloodgateError::KeyFormat(format!("cannot interpret key part {:?}", segment))
            })?;
            params.insert(name.to_string(), decode_value(value)?);
        }

        Ok(Self {
            uuid,
            params,
            version,
            cache: OnceCell::new(),
        })
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
