//! Declarative attribute schema for limit construction.
//!
//! Limits are built from a data-driven field table rather than one
//! hand-written constructor per type: each field declares an optional
//! default-producer and an optional transform, and a single resolve
//! routine applies the table to the supplied attributes.

use serde_json::Value;
use uuid::Uuid;

use crate::error::{FloodgateError, Result};
use crate::Params;

/// One declared attribute of a limit type.
#[derive(Debug, Clone, Copy)]
pub struct FieldDef {
    /// Attribute name, as it appears in persisted records
    pub name: &'static str,
    /// Zero-argument default producer; a field with no default is
    /// required. Producers run once per instance, so mutable container
    /// defaults are never shared.
    pub default: Option<fn() -> Value>,
    /// Transform applied to a supplied value before storage
    pub xform: Option<fn(Value) -> Result<Value>>,
}

impl FieldDef {
    /// A required field with no default or transform.
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            default: None,
            xform: None,
        }
    }

    /// An optional field with a default producer.
    pub const fn optional(name: &'static str, default: fn() -> Value) -> Self {
        Self {
            name,
            default: Some(default),
            xform: None,
        }
    }
}

fn default_uuid() -> Value {
    Value::String(Uuid::new_v4().to_string())
}

fn default_list() -> Value {
    Value::Array(Vec::new())
}

fn default_map() -> Value {
    Value::Object(serde_json::Map::new())
}

fn default_true() -> Value {
    Value::Bool(true)
}

/// Normalize HTTP method names to upper case.
fn xform_verbs(value: Value) -> Result<Value> {
    match value {
        Value::Array(items) => {
            let upper = items
                .into_iter()
                .map(|v| match v {
                    Value::String(s) => Ok(Value::String(s.to_uppercase())),
                    other => Err(FloodgateError::Validation {
                        field: "verbs",
                        reason: format!("expected a string, got {}", other),
                    }),
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(Value::Array(upper))
        }
        other => Err(FloodgateError::Validation {
            field: "verbs",
            reason: format!("expected a list, got {}", other),
        }),
    }
}

/// The attribute table shared by every limit type.
pub const BASE_FIELDS: &[FieldDef] = &[
    FieldDef::optional("uuid", default_uuid),
    FieldDef::required("uri"),
    FieldDef::required("value"),
    FieldDef::required("unit"),
    FieldDef {
        name: "verbs",
        default: Some(default_list),
        xform: Some(xform_verbs),
    },
    FieldDef::optional("requirements", default_map),
    FieldDef::optional("queries", default_list),
    FieldDef::optional("use", default_list),
    FieldDef::optional("continue_scan", default_true),
];

/// Apply a field table to the supplied attributes.
///
/// For each declared field: a supplied value is transformed (if the field
/// declares a transform) and stored; otherwise the default is produced;
/// otherwise the name is accumulated. Reports the complete set of missing
/// required fields, not just the first found. Supplied attributes not in
/// the table are left behind in `supplied`.
pub fn resolve(fields: &[FieldDef], supplied: &mut Params) -> Result<Params> {
    let mut resolved = Params::new();
    let mut missing = Vec::new();

    for field in fields {
        if let Some(value) = supplied.remove(field.name) {
            let value = match field.xform {
                Some(xform) => xform(value)?,
                None => value,
            };
            resolved.insert(field.name.to_string(), value);
        } else if let Some(default) = field.default {
            resolved.insert(field.name.to_string(), default());
        } else {
            missing.push(field.name.to_string());
        }
    }

    if !missing.is_empty() {
        missing.sort();
        return Err(FloodgateError::MissingAttrs(missing));
    }

    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn supplied(pairs: &[(&str, Value)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_resolve_reports_all_missing() {
        let mut attrs = supplied(&[("uri", json!("/widget"))]);
        let err = resolve(BASE_FIELDS, &mut attrs).unwrap_err();

        match err {
            FloodgateError::MissingAttrs(names) => {
                assert_eq!(names, vec!["unit".to_string(), "value".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_applies_defaults() {
        let mut attrs = supplied(&[
            ("uri", json!("/widget")),
            ("value", json!(10)),
            ("unit", json!("second")),
        ]);
        let resolved = resolve(BASE_FIELDS, &mut attrs).unwrap();

        assert_eq!(resolved["verbs"], json!([]));
        assert_eq!(resolved["requirements"], json!({}));
        assert_eq!(resolved["queries"], json!([]));
        assert_eq!(resolved["use"], json!([]));
        assert_eq!(resolved["continue_scan"], json!(true));
        assert!(resolved["uuid"].as_str().is_some());
    }

    #[test]
    fn test_defaults_are_fresh_per_instance() {
        let mut first = supplied(&[
            ("uri", json!("/widget")),
            ("value", json!(10)),
            ("unit", json!("second")),
        ]);
        let mut second = first.clone();

        let a = resolve(BASE_FIELDS, &mut first).unwrap();
        let b = resolve(BASE_FIELDS, &mut second).unwrap();

        // Generated identity differs; container defaults are per-instance
        assert_ne!(a["uuid"], b["uuid"]);
        assert_eq!(a["verbs"], json!([]));
        assert_eq!(b["verbs"], json!([]));
    }

    #[test]
    fn test_resolve_transforms_verbs() {
        let mut attrs = supplied(&[
            ("uri", json!("/widget")),
            ("value", json!(10)),
            ("unit", json!("second")),
            ("verbs", json!(["get", "Post"])),
        ]);
        let resolved = resolve(BASE_FIELDS, &mut attrs).unwrap();

        assert_eq!(resolved["verbs"], json!(["GET", "POST"]));
    }

    #[test]
    fn test_resolve_rejects_bad_verbs() {
        let mut attrs = supplied(&[
            ("uri", json!("/widget")),
            ("value", json!(10)),
            ("unit", json!("second")),
            ("verbs", json!("GET")),
        ]);

        assert!(matches!(
            resolve(BASE_FIELDS, &mut attrs),
            Err(FloodgateError::Validation { field: "verbs", .. })
        ));
    }

    #[test]
    fn test_resolve_leaves_unknown_attrs_behind() {
        let mut attrs = supplied(&[
            ("uri", json!("/widget")),
            ("value", json!(10)),
            ("unit", json!("second")),
            ("mystery", json!("leftover")),
        ]);
        let resolved = resolve(BASE_FIELDS, &mut attrs).unwrap();

        assert!(!resolved.contains_key("mystery"));
        assert_eq!(attrs["mystery"], json!("leftover"));
    }
}
