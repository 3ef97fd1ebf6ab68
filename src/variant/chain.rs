//! Filter registry and resolved filter chains.

use std::sync::Arc;

use indexmap::IndexMap;

use super::filters::{
    Filter, FilterConfig, Generic, GenericOptions, VarRename, VarRenameOptions, DNF_LIST,
};
use super::{Component, Variant};
use crate::error::ConfigError;

/// Prefix that inverts a selection filter inside a chain.
const INVERT_PREFIX: char = '!';

/// Accepts everything; in a transform chain it stands for "no transform".
pub const NONE_FILTER: &str = "_none";

#[derive(Debug, Clone)]
struct ChainEntry {
    filter: Arc<dyn Filter>,
    invert: bool,
}

/// An ordered list of resolved filters.
#[derive(Debug, Clone, Default)]
pub struct FilterChain {
    entries: Vec<ChainEntry>,
}

impl FilterChain {
    /// Returns true if the chain has no filters.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Selection: every filter must accept. An empty chain accepts all.
    #[must_use]
    pub fn accepts(&self, component: &Component) -> bool {
        self.entries
            .iter()
            .all(|e| e.filter.accepts(component) != e.invert)
    }

    /// Applies every transform in order.
    pub fn transform(&self, component: &mut Component, variant: Option<&Variant>) {
        for entry in &self.entries {
            entry.filter.transform(component, variant);
        }
    }
}

/// Named filters: built-ins plus the ones declared in the configuration.
#[derive(Debug, Clone)]
pub struct FilterRegistry {
    filters: IndexMap<String, Arc<dyn Filter>>,
}

impl Default for FilterRegistry {
    fn default() -> Self {
        let mut filters: IndexMap<String, Arc<dyn Filter>> = IndexMap::new();
        let mut kibom = GenericOptions::named("_kibom_dnf");
        kibom.keys.push(DNF_LIST.to_string());
        // Fixed patterns, these can't fail
        if let Ok(none) = Generic::new(GenericOptions::named(NONE_FILTER)) {
            filters.insert(NONE_FILTER.into(), Arc::new(none));
        }
        if let Ok(kibom) = Generic::new(kibom) {
            filters.insert("_kibom_dnf".into(), Arc::new(kibom));
        }
        filters.insert(
            "_var_rename".into(),
            Arc::new(VarRename::new(VarRenameOptions::named("_var_rename"))),
        );
        Self { filters }
    }
}

impl FilterRegistry {
    /// Builds a registry from the configured filters.
    ///
    /// # Errors
    ///
    /// Returns an error for duplicated names, names clashing with the
    /// built-ins (leading `_`), and filters that fail to build.
    pub fn from_configs(configs: &[FilterConfig]) -> Result<Self, ConfigError> {
        let mut registry = Self::default();
        for config in configs {
            let name = config.name();
            if name.is_empty() || name.starts_with('_') || name.starts_with(INVERT_PREFIX) {
                return Err(ConfigError::validation(format!(
                    "invalid filter name `{name}`"
                )));
            }
            if registry.filters.contains_key(name) {
                return Err(ConfigError::validation(format!(
                    "filter `{name}` defined more than once"
                )));
            }
            registry.filters.insert(name.to_string(), config.build()?);
        }
        tracing::debug!(count = registry.filters.len(), "Filters registered");
        Ok(registry)
    }

    /// Looks up a filter.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Filter>> {
        self.filters.get(name)
    }

    /// Resolves a chain of selection filters. `!name` inverts.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names and transform filters.
    pub fn selection_chain(&self, names: &[String], context: &str) -> Result<FilterChain, ConfigError> {
        self.chain(names, context, false)
    }

    /// Resolves a chain of transform filters.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown names, inverted entries and selection
    /// filters.
    pub fn transform_chain(&self, names: &[String], context: &str) -> Result<FilterChain, ConfigError> {
        self.chain(names, context, true)
    }

    fn chain(&self, names: &[String], context: &str, transform: bool) -> Result<FilterChain, ConfigError> {
        let mut entries = Vec::with_capacity(names.len());
        for raw in names {
            let raw = raw.trim();
            let (name, invert) = raw
                .strip_prefix(INVERT_PREFIX)
                .map_or((raw, false), |n| (n.trim(), true));
            if name == NONE_FILTER && !invert {
                continue;
            }
            let filter = self
                .filters
                .get(name)
                .ok_or_else(|| ConfigError::unknown_filter(name, context))?;
            if filter.is_transform() != transform || (transform && invert) {
                return Err(ConfigError::WrongFilterKind {
                    name: raw.to_string(),
                    context: context.to_string(),
                    expected: if transform { "transform" } else { "selection" },
                });
            }
            entries.push(ChainEntry {
                filter: Arc::clone(filter),
                invert,
            });
        }
        Ok(FilterChain { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn builtins_exist() {
        let registry = FilterRegistry::default();
        assert!(registry.get("_none").is_some());
        assert!(registry.get("_kibom_dnf").is_some());
        assert!(registry.get("_var_rename").unwrap().is_transform());
    }

    #[test]
    fn inverted_selection() {
        let registry = FilterRegistry::default();
        let chain = registry.selection_chain(&names(&["!_kibom_dnf"]), "test").unwrap();
        let dnf = Component::new("R1").with_field("Config", "DNF");
        assert!(chain.accepts(&dnf));
        assert!(!chain.accepts(&Component::new("R2")));
    }

    #[test]
    fn chain_is_an_and() {
        let yaml = "
- name: no_r1
  type: generic
  exclude_refs: [R1]
";
        let configs: Vec<FilterConfig> = serde_yml::from_str(yaml).unwrap();
        let registry = FilterRegistry::from_configs(&configs).unwrap();
        let chain = registry
            .selection_chain(&names(&["no_r1", "_kibom_dnf"]), "test")
            .unwrap();
        assert!(!chain.accepts(&Component::new("R1")));
        assert!(!chain.accepts(&Component::new("R2").with_field("Value", "DNP")));
        assert!(chain.accepts(&Component::new("R3")));
        assert!(FilterChain::default().accepts(&Component::new("R1")));
    }

    #[test]
    fn unknown_and_wrong_kind() {
        let registry = FilterRegistry::default();
        assert!(matches!(
            registry.selection_chain(&names(&["nope"]), "dnf_filter"),
            Err(ConfigError::UnknownFilter { .. })
        ));
        assert!(matches!(
            registry.selection_chain(&names(&["_var_rename"]), "dnf_filter"),
            Err(ConfigError::WrongFilterKind { .. })
        ));
        assert!(matches!(
            registry.transform_chain(&names(&["!_var_rename"]), "pre_transform"),
            Err(ConfigError::WrongFilterKind { .. })
        ));
    }

    #[test]
    fn none_is_an_empty_chain() {
        let registry = FilterRegistry::default();
        assert!(registry.transform_chain(&names(&["_none"]), "pre_transform").unwrap().is_empty());
        assert!(registry.selection_chain(&names(&["_none"]), "dnf_filter").unwrap().is_empty());
        let all_out = registry.selection_chain(&names(&["!_none"]), "dnf_filter").unwrap();
        assert!(!all_out.accepts(&Component::new("R1")));
    }

    #[test]
    fn reserved_and_duplicated_names() {
        let dup: Vec<FilterConfig> =
            serde_yml::from_str("- {name: a, type: generic}\n- {name: a, type: generic}\n").unwrap();
        assert!(FilterRegistry::from_configs(&dup).is_err());
        let reserved: Vec<FilterConfig> = serde_yml::from_str("- {name: _x, type: generic}\n").unwrap();
        assert!(FilterRegistry::from_configs(&reserved).is_err());
    }
}
