//! Rate limit definitions and the request filtering pipeline.
//!
//! A [`Limit`] is a declarative configuration record: which URI pattern it
//! covers, how many messages are permitted per unit time, and which request
//! parameters identify a bucket. Concrete limit types extend the base
//! schema through the process-wide registry and per-type hooks.

pub mod registry;
pub mod schema;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, trace};

use crate::bucket::{unix_now, Bucket};
use crate::error::{FloodgateError, Result};
use crate::key::{BucketKey, KeyVersion};
use crate::store::BucketStore;
use crate::unit::TimeUnit;
use crate::Params;

pub use registry::{
    base_class, lookup, register, DefaultHooks, FilterOutcome, LimitClass, LimitHooks, BASE_CLASS,
};
pub use schema::{resolve, FieldDef, BASE_FIELDS};

/// Registry key carried by every persisted limit record.
pub const CLASS_KEY: &str = "limit_class";

/// One rate-limiting decision recorded against a request.
#[derive(Debug)]
pub struct DelayEntry {
    /// Required delay in seconds
    pub delay: f64,
    /// The limit that produced the delay
    pub limit: Arc<Limit>,
    /// The bucket state that caused the decision
    pub bucket: Bucket,
}

/// Per-request context threaded through limit evaluation.
#[derive(Debug, Default)]
pub struct RequestContext {
    /// Names of the query arguments present on the request
    pub query_args: HashSet<String>,
    /// Free-form side channel readable and writable by filter hooks
    pub vars: Params,
    /// Delays accumulated across all evaluated limits; the caller
    /// typically reports the longest
    pub delays: Vec<DelayEntry>,
}

impl RequestContext {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// The longest delay recorded against this request, if any.
    pub fn longest_delay(&self) -> Option<&DelayEntry> {
        self.delays
            .iter()
            .max_by(|a, b| a.delay.total_cmp(&b.delay))
    }
}

/// Everything the route-matching collaborator needs to wire one limit
/// into its dispatch table.
pub struct RouteBinding {
    /// URI pattern to connect, after the route hook has run
    pub uri: String,
    /// HTTP verb filter; empty means match any verb
    pub verbs: Vec<String>,
    /// Compiled per-variable constraints
    pub requirements: BTreeMap<String, Regex>,
    /// Additional arguments contributed by the route hook
    pub route_args: Params,
    /// The limit to invoke (via [`Limit::apply`]) on a match
    pub limit: Arc<Limit>,
}

/// A rate limit definition.
pub struct Limit {
    class: Arc<LimitClass>,
    db: Arc<dyn BucketStore>,
    uuid: String,
    uri: String,
    value: u64,
    unit: TimeUnit,
    verbs: Vec<String>,
    requirements: BTreeMap<String, String>,
    queries: Vec<String>,
    use_params: Vec<String>,
    continue_scan: bool,
    extra: Params,
}

fn take_string(resolved: &mut Params, field: &'static str) -> Result<String> {
    match resolved.remove(field) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(FloodgateError::Validation {
            field,
            reason: format!("expected a string, got {}", other),
        }),
        None => Ok(String::new()),
    }
}

fn take_positive(resolved: &mut Params, field: &'static str) -> Result<u64> {
    let value = resolved.remove(field).unwrap_or(Value::Null);
    match value.as_i64() {
        Some(n) if n > 0 => Ok(n as u64),
        Some(n) => Err(FloodgateError::Validation {
            field,
            reason: format!("must be > 0, got {}", n),
        }),
        None => Err(FloodgateError::Validation {
            field,
            reason: format!("expected a positive integer, got {}", value),
        }),
    }
}

fn take_unit(resolved: &mut Params) -> Result<TimeUnit> {
    match resolved.remove("unit") {
        Some(Value::String(name)) => TimeUnit::parse(&name),
        Some(Value::Number(n)) => match n.as_i64() {
            Some(seconds) => TimeUnit::from_seconds(seconds),
            None => Err(FloodgateError::Validation {
                field: "unit",
                reason: format!("expected an integer number of seconds, got {}", n),
            }),
        },
        Some(other) => Err(FloodgateError::Validation {
            field: "unit",
            reason: format!("expected a name or seconds count, got {}", other),
        }),
        None => Err(FloodgateError::Validation {
            field: "unit",
            reason: "missing".to_string(),
        }),
    }
}

fn take_string_list(resolved: &mut Params, field: &'static str) -> Result<Vec<String>> {
    let value = resolved.remove(field).unwrap_or(Value::Array(Vec::new()));
    match value {
        Value::Array(items) => items
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                other => Err(FloodgateError::Validation {
                    field,
                    reason: format!("expected a string, got {}", other),
                }),
            })
            .collect(),
        other => Err(FloodgateError::Validation {
            field,
            reason: format!("expected a list, got {}", other),
        }),
    }
}

fn take_string_map(resolved: &mut Params, field: &'static str) -> Result<BTreeMap<String, String>> {
    let value = resolved
        .remove(field)
        .unwrap_or(Value::Object(serde_json::Map::new()));
    match value {
        Value::Object(entries) => entries
            .into_iter()
            .map(|(k, v)| match v {
                Value::String(s) => Ok((k, s)),
                other => Err(FloodgateError::Validation {
                    field,
                    reason: format!("expected a string for {:?}, got {}", k, other),
                }),
            })
            .collect(),
        other => Err(FloodgateError::Validation {
            field,
            reason: format!("expected a mapping, got {}", other),
        }),
    }
}

fn take_bool(resolved: &mut Params, field: &'static str) -> Result<bool> {
    match resolved.remove(field) {
        Some(Value::Bool(b)) => Ok(b),
        Some(other) => Err(FloodgateError::Validation {
            field,
            reason: format!("expected a boolean, got {}", other),
        }),
        None => Ok(true),
    }
}

impl Limit {
    /// Construct a base-class limit from an attribute mapping.
    pub fn new(db: Arc<dyn BucketStore>, attrs: Params) -> Result<Self> {
        Self::new_of(base_class(), db, attrs)
    }

    /// Construct a limit of a specific registered class.
    ///
    /// Every declared field (inherited and class-specific) is resolved
    /// against the attribute mapping; missing required fields are reported
    /// as a complete set. Attributes declared by neither schema are
    /// ignored.
    pub fn new_of(
        class: Arc<LimitClass>,
        db: Arc<dyn BucketStore>,
        mut attrs: Params,
    ) -> Result<Self> {
        let fields: Vec<FieldDef> = BASE_FIELDS
            .iter()
            .copied()
            .chain(class.fields().iter().copied())
            .collect();
        let mut resolved = resolve(&fields, &mut attrs)?;
        if !attrs.is_empty() {
            trace!(
                class = class.name(),
                count = attrs.len(),
                "ignoring undeclared limit attributes"
            );
        }

        let uuid = take_string(&mut resolved, "uuid")?;
        let uri = take_string(&mut resolved, "uri")?;
        let value = take_positive(&mut resolved, "value")?;
        let unit = take_unit(&mut resolved)?;
        let verbs = take_string_list(&mut resolved, "verbs")?;
        let requirements = take_string_map(&mut resolved, "requirements")?;
        let queries = take_string_list(&mut resolved, "queries")?;
        let use_params = take_string_list(&mut resolved, "use")?;
        let continue_scan = take_bool(&mut resolved, "continue_scan")?;

        // Whatever the class schema declared beyond the base fields
        let extra = resolved;

        Ok(Self {
            class,
            db,
            uuid,
            uri,
            value,
            unit,
            verbs,
            requirements,
            queries,
            use_params,
            continue_scan,
            extra,
        })
    }

    /// Reconstruct a limit from a persisted record.
    ///
    /// The record's class name is looked up in the registry; if the class
    /// is unknown to this process, `Ok(None)` is returned so callers can
    /// skip records written by newer deployments.
    pub fn hydrate(db: Arc<dyn BucketStore>, mut record: Params) -> Result<Option<Self>> {
        let name = match record.remove(CLASS_KEY) {
            Some(Value::String(name)) => name,
            Some(other) => {
                return Err(FloodgateError::Validation {
                    field: CLASS_KEY,
                    reason: format!("expected a string, got {}", other),
                })
            }
            None => {
                return Err(FloodgateError::Validation {
                    field: CLASS_KEY,
                    reason: "missing".to_string(),
                })
            }
        };

        match lookup(&name) {
            Some(class) => Self::new_of(class, db, record).map(Some),
            None => {
                debug!(class = %name, "limit class not registered; skipping record");
                Ok(None)
            }
        }
    }

    /// Emit the persisted form of this limit: the registry key plus the
    /// current value of every declared field, as seen through accessors.
    pub fn dehydrate(&self) -> Params {
        let mut record = Params::new();
        record.insert(
            CLASS_KEY.to_string(),
            Value::String(self.class.name().to_string()),
        );
        record.insert("uuid".to_string(), Value::String(self.uuid.clone()));
        record.insert("uri".to_string(), Value::String(self.uri.clone()));
        record.insert("value".to_string(), Value::from(self.value));
        record.insert("unit".to_string(), Value::String(self.unit.name()));
        record.insert(
            "verbs".to_string(),
            Value::Array(self.verbs.iter().cloned().map(Value::String).collect()),
        );
        record.insert(
            "requirements".to_string(),
            Value::Object(
                self.requirements
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
        record.insert(
            "queries".to_string(),
            Value::Array(self.queries.iter().cloned().map(Value::String).collect()),
        );
        record.insert(
            "use".to_string(),
            Value::Array(self.use_params.iter().cloned().map(Value::String).collect()),
        );
        record.insert(
            "continue_scan".to_string(),
            Value::Bool(self.continue_scan),
        );
        for (name, value) in &self.extra {
            record.insert(name.clone(), value.clone());
        }
        record
    }

    /// Compute the bucket key for a set of request parameters.
    pub fn key(&self, params: Params) -> BucketKey {
        BucketKey::new(self.uuid.clone(), params, KeyVersion::V2)
    }

    /// Recover the parameters a bucket key was computed from.
    ///
    /// Fails if the key's UUID does not match this limit.
    pub fn decode_key(&self, key: &str) -> Result<Params> {
        let decoded = BucketKey::decode(key)?;
        if decoded.uuid() != self.uuid {
            return Err(FloodgateError::KeyMismatch {
                key: key.to_string(),
                uuid: self.uuid.clone(),
            });
        }
        Ok(decoded.params().clone())
    }

    /// Build the description the route-matching collaborator consumes.
    ///
    /// Requirement patterns are compiled here; a malformed pattern is a
    /// validation failure for this limit only.
    pub fn route_binding(self: &Arc<Self>) -> Result<RouteBinding> {
        let mut requirements = BTreeMap::new();
        for (name, pattern) in &self.requirements {
            let compiled = Regex::new(pattern).map_err(|e| FloodgateError::Validation {
                field: "requirements",
                reason: format!("bad pattern for {:?}: {}", name, e),
            })?;
            requirements.insert(name.clone(), compiled);
        }

        let mut route_args = Params::new();
        let uri = self.class.hooks().route(self, &self.uri, &mut route_args);

        Ok(RouteBinding {
            uri,
            verbs: self.verbs.clone(),
            requirements,
            route_args,
            limit: self.clone(),
        })
    }

    /// Evaluate this limit against a matched request.
    ///
    /// Implements the full filtering protocol: the query-argument
    /// precondition, the used/unused parameter partition, the per-type
    /// filter hook (which may defer), bucket key computation, and the
    /// atomic load-and-update of the bucket. A produced delay is recorded
    /// in the context's accumulation list.
    ///
    /// Returns whether to halt evaluation of subsequent limits: true iff
    /// `continue_scan` is false, regardless of whether this limit produced
    /// a delay. A defer or a failed query precondition always lets the
    /// scan continue.
    pub fn apply(self: &Arc<Self>, ctx: &mut RequestContext, params: &mut Params) -> Result<bool> {
        // Every named query argument must be present for this limit to apply
        if !self.queries.is_empty()
            && !self.queries.iter().all(|q| ctx.query_args.contains(q))
        {
            trace!(uuid = %self.uuid, "required query arguments absent");
            return Ok(false);
        }

        // Only the parameters listed in `use` feed the key; the rest are
        // added back later
        let mut used = Params::new();
        let mut unused = Params::new();
        for (name, value) in std::mem::take(params) {
            if self.use_params.contains(&name) {
                used.insert(name, value);
            } else {
                unused.insert(name, value);
            }
        }

        let extra = match self.class.hooks().filter(self, ctx, &mut used, &unused) {
            FilterOutcome::Defer => {
                params.extend(used);
                params.extend(unused);
                trace!(uuid = %self.uuid, "limit deferred");
                return Ok(false);
            }
            FilterOutcome::Extra(extra) => extra,
        };

        let key = BucketKey::new(self.uuid.clone(), used.clone(), KeyVersion::V2);
        let key = key.as_str().to_string();

        // Merged after key computation: recorded, but never part of the key
        params.extend(used);
        params.extend(unused);
        params.extend(extra);

        let now = unix_now();
        let snapshot = params.clone();
        let (bucket, delay) = self
            .db
            .safe_update(self, &key, &mut |bucket| bucket.delay(&snapshot, now))?;

        if let Some(delay) = delay {
            debug!(uuid = %self.uuid, key = %key, delay, "rate limit exceeded");
            ctx.delays.push(DelayEntry {
                delay,
                limit: self.clone(),
                bucket,
            });
        }

        Ok(!self.continue_scan)
    }

    /// A human-readable entity for a rate-limited response.
    pub fn retry_message(&self, bucket: &Bucket) -> String {
        let next = bucket.next().unwrap_or(0.0);
        let when = chrono::DateTime::from_timestamp(next as i64, 0).unwrap_or_default();
        format!(
            "This request was rate-limited. Please retry your request after {}.",
            when.format("%Y-%m-%dT%H:%M:%SZ")
        )
    }

    /// The registered class of this limit.
    pub fn class(&self) -> &Arc<LimitClass> {
        &self.class
    }

    /// The storage backend this limit's buckets live in.
    pub fn db(&self) -> &Arc<dyn BucketStore> {
        &self.db
    }

    /// Unique identity of this limit.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// The URI pattern this limit applies to.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Permitted number of messages per unit time.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Change the permitted message count. Rejects non-positive values
    /// without mutating state.
    pub fn set_value(&mut self, value: i64) -> Result<()> {
        if value <= 0 {
            return Err(FloodgateError::Validation {
                field: "value",
                reason: format!("must be > 0, got {}", value),
            });
        }
        self.value = value as u64;
        Ok(())
    }

    /// The unit of time over which `value` is considered.
    pub fn unit(&self) -> TimeUnit {
        self.unit
    }

    /// Change the unit of time.
    pub fn set_unit(&mut self, unit: TimeUnit) {
        self.unit = unit;
    }

    /// The unit as an integer number of seconds.
    pub fn unit_value(&self) -> u64 {
        self.unit.seconds()
    }

    /// Change the unit to the given number of seconds. Rejects
    /// non-positive values without mutating state.
    pub fn set_unit_value(&mut self, seconds: i64) -> Result<()> {
        self.unit = TimeUnit::from_seconds(seconds)?;
        Ok(())
    }

    /// Fraction of bucket capacity consumed per admitted message.
    pub fn cost(&self) -> f64 {
        self.unit_value() as f64 / self.value as f64
    }

    /// HTTP verbs this limit applies to; empty means any.
    pub fn verbs(&self) -> &[String] {
        &self.verbs
    }

    /// Per-variable regex constraints on the URI pattern.
    pub fn requirements(&self) -> &BTreeMap<String, String> {
        &self.requirements
    }

    /// Query arguments that must be present for this limit to apply.
    pub fn queries(&self) -> &[String] {
        &self.queries
    }

    /// Request parameters used to build the bucket key.
    pub fn use_params(&self) -> &[String] {
        &self.use_params
    }

    /// Whether evaluation continues past this limit once it matches.
    pub fn continue_scan(&self) -> bool {
        self.continue_scan
    }

    /// Class-specific attribute values.
    pub fn extra(&self) -> &Params {
        &self.extra
    }
}

impl fmt::Debug for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limit")
            .field("class", &self.class.name())
            .field("uuid", &self.uuid)
            .field("uri", &self.uri)
            .field("value", &self.value)
            .field("unit", &self.unit)
            .field("verbs", &self.verbs)
            .field("continue_scan", &self.continue_scan)
            .finish_non_exhaustive()
    }
}
