//! Determinism registry: which callables are safe to run inline.

use std::collections::BTreeSet;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::script::CallTarget;

/// Lists bundled with the binary.
pub const DEFAULT_REGISTRY: &str = include_str!("default.toml");

/// Serializable form of the registry, as found in `default.toml` and the
/// `[registry]` section of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryLists {
    pub modules: Vec<String>,
    pub types: Vec<String>,
    pub callables: Vec<String>,
    pub no_activity: Vec<String>,
}

#[derive(Debug, Default)]
struct Sets {
    modules: BTreeSet<String>,
    types: BTreeSet<String>,
    callables: BTreeSet<String>,
    no_activity: BTreeSet<String>,
}

/// Process-wide registry, shared behind an `Arc`. Reads vastly outnumber
/// registrations.
#[derive(Debug, Default)]
pub struct Registry {
    sets: RwLock<Sets>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the bundled lists.
    pub fn with_defaults() -> Result<Self, toml::de::Error> {
        let lists: RegistryLists = toml::from_str(DEFAULT_REGISTRY)?;
        let registry = Self::new();
        registry.extend(&lists);
        Ok(registry)
    }

    pub fn extend(&self, lists: &RegistryLists) {
        let mut sets = self.sets.write();
        sets.modules.extend(lists.modules.iter().cloned());
        sets.types.extend(lists.types.iter().cloned());
        sets.callables.extend(lists.callables.iter().cloned());
        sets.no_activity.extend(lists.no_activity.iter().cloned());
    }

    pub fn register_no_activity(&self, qualified_name: &str) {
        if self.sets.write().no_activity.insert(qualified_name.to_string()) {
            tracing::debug!(callable = qualified_name, "Registered no-activity callable");
        }
    }

    /// Allow-listed by module, receiver type or qualified name.
    pub fn is_deterministic(&self, target: &CallTarget) -> bool {
        let sets = self.sets.read();
        sets.modules.contains(&target.module)
            || target
                .receiver_type
                .as_ref()
                .is_some_and(|t| sets.types.contains(t))
            || sets.callables.contains(&target.qualified_name())
    }

    pub fn is_no_activity(&self, qualified_name: &str) -> bool {
        self.sets.read().no_activity.contains(qualified_name)
    }

    pub fn snapshot(&self) -> RegistryLists {
        let sets = self.sets.read();
        RegistryLists {
            modules: sets.modules.iter().cloned().collect(),
            types: sets.types.iter().cloned().collect(),
            callables: sets.callables.iter().cloned().collect(),
            no_activity: sets.no_activity.iter().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(module: &str, qualname: &str, receiver: Option<&str>) -> CallTarget {
        CallTarget {
            module: module.into(),
            qualname: qualname.into(),
            receiver_type: receiver.map(str::to_string),
            activity: false,
        }
    }

    #[test]
    fn bundled_lists_parse() {
        let registry = Registry::with_defaults().unwrap();
        let lists = registry.snapshot();
        assert!(lists.modules.contains(&"builtins".to_string()));
        assert!(lists.types.contains(&"dict".to_string()));
        assert!(lists.no_activity.is_empty());
    }

    #[test]
    fn lookups_by_module_type_and_callable() {
        let registry = Registry::with_defaults().unwrap();
        assert!(registry.is_deterministic(&target("json", "dumps", None)));
        assert!(registry.is_deterministic(&target("builtins", "list.append", Some("list"))));
        assert!(registry.is_deterministic(&target("datetime", "strptime", None)));
        assert!(!registry.is_deterministic(&target("datetime", "now", None)));
        assert!(!registry.is_deterministic(&target("time", "time", None)));
        assert!(!registry.is_deterministic(&target("http", "get", None)));
    }

    #[test]
    fn registration_extends_the_lists() {
        let registry = Registry::new();
        assert!(!registry.is_no_activity("orders.total"));
        registry.register_no_activity("orders.total");
        assert!(registry.is_no_activity("orders.total"));

        registry.extend(&RegistryLists {
            types: vec!["orders.Order".into()],
            ..RegistryLists::default()
        });
        assert!(registry.is_deterministic(&target("orders", "Order.total", Some("orders.Order"))));
    }
}
