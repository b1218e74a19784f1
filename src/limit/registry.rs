//! Process-wide limit type registry and extension hooks.
//!
//! Every concrete limit type registers itself once under a stable name.
//! The registry is append-only for the life of the process; it is what
//! makes persisted limit records polymorphically reconstructable.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use tracing::debug;

use super::schema::FieldDef;
use super::{Limit, RequestContext};
use crate::Params;

/// Registry name of the base limit type.
pub const BASE_CLASS: &str = "floodgate.limit:Limit";

/// Outcome of a limit type's filter hook.
///
/// Defer is a control signal, not a failure: it means this limit does not
/// apply to the request at all, and no bucket may be touched.
#[derive(Debug)]
pub enum FilterOutcome {
    /// This limit does not apply to the request
    Defer,
    /// Proceed; the mapping is merged into the request parameters after
    /// key computation, so it is recorded without affecting the key
    Extra(Params),
}

/// Per-type behavior hooks.
///
/// Limit types extend the base behavior through a strategy object rather
/// than inheritance; both hooks have no-op defaults.
pub trait LimitHooks: Send + Sync {
    /// Adjust the URI or route arguments handed to the route-matching
    /// collaborator. Returns the URI to connect.
    fn route(&self, _limit: &Limit, uri: &str, _route_args: &mut Params) -> String {
        uri.to_string()
    }

    /// Final request filtering, invoked with the mutable parameter
    /// mapping restricted to the fields listed in `use`, plus the fields
    /// that were excluded. Parameters added to `params` here feed the
    /// bucket key; parameters returned via [`FilterOutcome::Extra`] do
    /// not.
    fn filter(
        &self,
        _limit: &Limit,
        _ctx: &mut RequestContext,
        _params: &mut Params,
        _unused: &Params,
    ) -> FilterOutcome {
        FilterOutcome::Extra(Params::new())
    }
}

/// The no-op hook set used by the base limit type.
#[derive(Debug, Default)]
pub struct DefaultHooks;

impl LimitHooks for DefaultHooks {}

/// A registered limit type: its stable name, the fields it declares
/// beyond the base schema, and its behavior hooks.
pub struct LimitClass {
    name: String,
    fields: Vec<FieldDef>,
    hooks: Arc<dyn LimitHooks>,
}

impl LimitClass {
    /// Describe a limit type. Call [`register`] to make it hydratable.
    pub fn new(
        name: impl Into<String>,
        fields: Vec<FieldDef>,
        hooks: Arc<dyn LimitHooks>,
    ) -> Self {
        Self {
            name: name.into(),
            fields,
            hooks,
        }
    }

    fn base() -> Self {
        Self::new(BASE_CLASS, Vec::new(), Arc::new(DefaultHooks))
    }

    /// The registry key for this type.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Fields declared beyond the inherited base schema.
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// The behavior hooks for this type.
    pub fn hooks(&self) -> &Arc<dyn LimitHooks> {
        &self.hooks
    }
}

static REGISTRY: Lazy<RwLock<HashMap<String, Arc<LimitClass>>>> = Lazy::new(|| {
    let base = Arc::new(LimitClass::base());
    let mut map = HashMap::new();
    map.insert(base.name().to_string(), base);
    RwLock::new(map)
});

/// Register a limit type.
///
/// The registry is append-only: registering a name that already exists
/// returns the existing entry untouched.
pub fn register(class: LimitClass) -> Arc<LimitClass> {
    let mut registry = REGISTRY.write();
    if let Some(existing) = registry.get(class.name()) {
        return existing.clone();
    }

    debug!(class = class.name(), "registering limit class");
    let class = Arc::new(class);
    registry.insert(class.name().to_string(), class.clone());
    class
}

/// Look up a registered limit type by name.
pub fn lookup(name: &str) -> Option<Arc<LimitClass>> {
    REGISTRY.read().get(name).cloned()
}

/// The always-registered base limit type.
pub fn base_class() -> Arc<LimitClass> {
    lookup(BASE_CLASS).expect("base limit class is pre-registered")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_class_preregistered() {
        let class = lookup(BASE_CLASS).unwrap();
        assert_eq!(class.name(), BASE_CLASS);
        assert!(class.fields().is_empty());
    }

    #[test]
    fn test_register_and_lookup() {
        let class = register(LimitClass::new(
            "floodgate.tests:RegistryProbe",
            Vec::new(),
            Arc::new(DefaultHooks),
        ));

        let found = lookup("floodgate.tests:RegistryProbe").unwrap();
        assert_eq!(found.name(), class.name());
    }

    #[test]
    fn test_register_is_append_only() {
        let first = register(LimitClass::new(
            "floodgate.tests:AppendOnly",
            Vec::new(),
            Arc::new(DefaultHooks),
        ));
        let second = register(LimitClass::new(
            "floodgate.tests:AppendOnly",
            vec![FieldDef::required("ignored")],
            Arc::new(DefaultHooks),
        ));

        // The second registration is discarded in favor of the first
        assert!(Arc::ptr_eq(&first, &second));
        assert!(second.fields().is_empty());
    }

    #[test]
    fn test_lookup_miss() {
        assert!(lookup("floodgate.tests:NeverRegistered").is_none());
    }
}
