//! Variants: the last step of component resolution.

use serde::Deserialize;

use super::chain::{FilterChain, FilterRegistry};
use super::filters::default_config_field;
use super::Component;
use crate::config::string_or_list;
use crate::error::ConfigError;

/// Options of a KiBoM style variant.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KiBomOptions {
    /// Variant name.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub comment: String,
    /// Tag used in file names (`%v`). Defaults to `_<name>`.
    #[serde(default)]
    pub file_id: Option<String>,
    /// Variant tags this variant answers to. Defaults to the name.
    #[serde(default, deserialize_with = "string_or_list")]
    pub variant: Vec<String>,
    /// Field holding the `+VAR`/`-VAR` tokens.
    #[serde(default = "default_config_field")]
    pub config_field: String,
    /// Transform chain applied first.
    #[serde(default, deserialize_with = "string_or_list")]
    pub pre_transform: Vec<String>,
    /// Selection chain deciding `included`.
    #[serde(default, deserialize_with = "string_or_list")]
    pub exclude_filter: Vec<String>,
    /// Selection chain deciding `fitted`.
    #[serde(default, deserialize_with = "string_or_list")]
    pub dnf_filter: Vec<String>,
}

/// Options of an iBoM style variant.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IBomOptions {
    /// Variant name.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub comment: String,
    /// Tag used in file names (`%v`). Defaults to `_<name>`.
    #[serde(default)]
    pub file_id: Option<String>,
    /// Field holding the component variant tags.
    #[serde(default = "default_variant_field")]
    pub variant_field: String,
    /// Tags excluded by this variant.
    #[serde(default, deserialize_with = "string_or_list")]
    pub variants_blacklist: Vec<String>,
    /// Tags included by this variant.
    #[serde(default, deserialize_with = "string_or_list")]
    pub variants_whitelist: Vec<String>,
    /// Transform chain applied first.
    #[serde(default, deserialize_with = "string_or_list")]
    pub pre_transform: Vec<String>,
    /// Selection chain deciding `included`.
    #[serde(default, deserialize_with = "string_or_list")]
    pub exclude_filter: Vec<String>,
    /// Selection chain deciding `fitted`.
    #[serde(default, deserialize_with = "string_or_list")]
    pub dnf_filter: Vec<String>,
}

fn default_variant_field() -> String {
    "Variant".to_string()
}

/// A variant declared in the configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VariantConfig {
    /// KiBoM style (`+VAR`/`-VAR` tokens).
    Kibom(KiBomOptions),
    /// iBoM style (white/black lists).
    Ibom(IBomOptions),
}

impl VariantConfig {
    /// Declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Kibom(o) => &o.name,
            Self::Ibom(o) => &o.name,
        }
    }
}

/// The rule that decides `fitted` once the chains ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantRule {
    /// `-VAR` removes, any `+VAR` makes the component exclusive.
    KiBom {
        /// Active tags.
        variants: Vec<String>,
        /// Field holding the tokens.
        config_field: String,
    },
    /// Components tagged outside the whitelist, or inside the blacklist,
    /// are not fitted. Untagged components are always fitted.
    IBom {
        /// Field holding the component tags.
        variant_field: String,
        /// Excluded tags.
        blacklist: Vec<String>,
        /// Included tags.
        whitelist: Vec<String>,
    },
}

/// A resolved variant.
#[derive(Debug, Clone)]
pub struct Variant {
    name: String,
    file_id: String,
    pre_transform: FilterChain,
    exclude_filter: FilterChain,
    dnf_filter: FilterChain,
    rule: VariantRule,
}

impl Variant {
    /// Creates a variant with empty chains.
    #[must_use]
    pub fn new(name: impl Into<String>, rule: VariantRule) -> Self {
        let name = name.into();
        Self {
            file_id: format!("_{name}"),
            name,
            pre_transform: FilterChain::default(),
            exclude_filter: FilterChain::default(),
            dnf_filter: FilterChain::default(),
            rule,
        }
    }

    /// Resolves a configured variant against the filter registry.
    ///
    /// # Errors
    ///
    /// Returns an error when a chain names an unknown or wrong kind of
    /// filter.
    pub fn from_config(config: &VariantConfig, registry: &FilterRegistry) -> Result<Self, ConfigError> {
        let name = config.name();
        let context = |field: &str| format!("variant `{name}` {field}");
        let (file_id, pre, exclude, dnf, rule) = match config {
            VariantConfig::Kibom(o) => {
                let variants = if o.variant.is_empty() {
                    vec![o.name.clone()]
                } else {
                    o.variant.clone()
                };
                (
                    &o.file_id,
                    &o.pre_transform,
                    &o.exclude_filter,
                    &o.dnf_filter,
                    VariantRule::KiBom {
                        variants,
                        config_field: o.config_field.clone(),
                    },
                )
            }
            VariantConfig::Ibom(o) => (
                &o.file_id,
                &o.pre_transform,
                &o.exclude_filter,
                &o.dnf_filter,
                VariantRule::IBom {
                    variant_field: o.variant_field.clone(),
                    blacklist: o.variants_blacklist.clone(),
                    whitelist: o.variants_whitelist.clone(),
                },
            ),
        };
        let mut variant = Self::new(name, rule);
        if let Some(id) = file_id {
            variant.file_id.clone_from(id);
        }
        variant.pre_transform = registry.transform_chain(pre, &context("pre_transform"))?;
        variant.exclude_filter = registry.selection_chain(exclude, &context("exclude_filter"))?;
        variant.dnf_filter = registry.selection_chain(dnf, &context("dnf_filter"))?;
        Ok(variant)
    }

    /// Variant name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tag used by the `%v` expansion.
    #[must_use]
    pub fn file_id(&self) -> &str {
        &self.file_id
    }

    /// Returns true if `tag` selects this variant.
    #[must_use]
    pub fn matches_variant(&self, tag: &str) -> bool {
        match &self.rule {
            VariantRule::KiBom { variants, .. } => variants.iter().any(|v| v == tag),
            VariantRule::IBom {
                blacklist,
                whitelist,
                ..
            } => whitelist.iter().any(|v| v == tag) && !blacklist.iter().any(|v| v == tag),
        }
    }

    /// Applies the variant to already filtered components.
    pub fn apply(&self, components: &mut [Component]) {
        for c in components.iter_mut() {
            self.pre_transform.transform(c, Some(self));
            if !self.exclude_filter.is_empty() {
                c.included = self.exclude_filter.accepts(c);
            }
            if !self.dnf_filter.is_empty() {
                c.fitted = c.fitted && self.dnf_filter.accepts(c);
            }
            if c.fitted && !self.rule_fits(c) {
                tracing::debug!(reference = %c.reference, variant = %self.name, "Not fitted by variant");
                c.fitted = false;
            }
        }
    }

    fn rule_fits(&self, c: &Component) -> bool {
        match &self.rule {
            VariantRule::KiBom {
                variants,
                config_field,
            } => {
                let mut exclusive = false;
                let mut selected = false;
                for token in c.field_or_empty(config_field).split(',').map(str::trim) {
                    if let Some(tag) = token.strip_prefix('-') {
                        if variants.iter().any(|v| v == tag) {
                            return false;
                        }
                    } else if let Some(tag) = token.strip_prefix('+') {
                        exclusive = true;
                        selected |= variants.iter().any(|v| v == tag);
                    }
                }
                !exclusive || selected
            }
            VariantRule::IBom {
                variant_field,
                blacklist,
                whitelist,
            } => {
                let tags: Vec<&str> = c
                    .field_or_empty(variant_field)
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .collect();
                if tags.is_empty() {
                    return true;
                }
                if tags.iter().any(|t| blacklist.iter().any(|b| b == t)) {
                    return false;
                }
                whitelist.is_empty() || tags.iter().any(|t| whitelist.iter().any(|w| w == t))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::{resolve, FilterConfig};

    fn kibom(variants: &[&str]) -> Variant {
        Variant::new(
            "test",
            VariantRule::KiBom {
                variants: variants.iter().map(ToString::to_string).collect(),
                config_field: "Config".into(),
            },
        )
    }

    fn with_config(reference: &str, config: &str) -> Component {
        Component::new(reference).with_field("Config", config)
    }

    #[test]
    fn kibom_minus_removes() {
        let variant = kibom(&["production"]);
        let mut comps = vec![with_config("R1", "-production"), with_config("R2", "-test")];
        variant.apply(&mut comps);
        assert!(!comps[0].fitted);
        assert!(comps[1].fitted);
    }

    #[test]
    fn kibom_plus_is_exclusive() {
        let variant = kibom(&["production"]);
        let mut comps = vec![
            with_config("R1", "+production"),
            with_config("R2", "+test"),
            with_config("R3", "+test,+production"),
            Component::new("R4"),
        ];
        variant.apply(&mut comps);
        let fitted: Vec<bool> = comps.iter().map(|c| c.fitted).collect();
        assert_eq!(fitted, [true, false, true, true]);
    }

    #[test]
    fn ibom_lists() {
        let variant = Variant::new(
            "v1",
            VariantRule::IBom {
                variant_field: "Variant".into(),
                blacklist: vec!["T2".into()],
                whitelist: vec!["T1".into()],
            },
        );
        assert!(variant.matches_variant("T1"));
        assert!(!variant.matches_variant("T2"));
        assert!(!variant.matches_variant("T3"));
        let mut comps = vec![
            Component::new("C1").with_field("Variant", "T1"),
            Component::new("C2").with_field("Variant", "T2"),
            Component::new("C3").with_field("Variant", "T3"),
            Component::new("C4"),
        ];
        variant.apply(&mut comps);
        let fitted: Vec<bool> = comps.iter().map(|c| c.fitted).collect();
        assert_eq!(fitted, [true, false, false, true]);
    }

    #[test]
    fn file_id_defaults_to_name() {
        let registry = FilterRegistry::default();
        let config: VariantConfig =
            serde_yml::from_str("{name: prod, type: kibom, variant: production}").unwrap();
        let variant = Variant::from_config(&config, &registry).unwrap();
        assert_eq!(variant.file_id(), "_prod");
        assert!(variant.matches_variant("production"));
        assert!(!variant.matches_variant("prod"));

        let config: VariantConfig =
            serde_yml::from_str("{name: prod, type: kibom, file_id: -P}").unwrap();
        let variant = Variant::from_config(&config, &registry).unwrap();
        assert_eq!(variant.file_id(), "-P");
        assert!(variant.matches_variant("prod"));
    }

    #[test]
    fn unknown_filter_in_variant() {
        let registry = FilterRegistry::default();
        let config: VariantConfig =
            serde_yml::from_str("{name: prod, type: kibom, dnf_filter: missing}").unwrap();
        assert!(matches!(
            Variant::from_config(&config, &registry),
            Err(ConfigError::UnknownFilter { .. })
        ));
    }

    #[test]
    fn var_rename_through_variant() {
        let registry = FilterRegistry::default();
        let config: VariantConfig = serde_yml::from_str(
            "{name: prod, type: kibom, variant: [prod], pre_transform: _var_rename}",
        )
        .unwrap();
        let variant = Variant::from_config(&config, &registry).unwrap();
        let mut comps = vec![Component::new("R1")
            .with_field("Value", "10k")
            .with_field("prod:Value", "22k")
            .with_field("test:Value", "1k")];
        resolve(&mut comps, &FilterChain::default(), &FilterChain::default(), Some(&variant));
        assert_eq!(comps[0].field("Value"), Some("22k"));
    }

    #[test]
    fn exclude_filter_sets_included() {
        let configs: Vec<FilterConfig> = serde_yml::from_str("- {name: no_tp, type: generic, include_only: [{column: Reference, regex: '^TP'}], invert: true}\n").unwrap();
        let registry = FilterRegistry::from_configs(&configs).unwrap();
        let config: VariantConfig =
            serde_yml::from_str("{name: prod, type: kibom, exclude_filter: no_tp}").unwrap();
        let variant = Variant::from_config(&config, &registry).unwrap();
        let mut comps = vec![Component::new("TP1"), Component::new("R1")];
        variant.apply(&mut comps);
        assert!(!comps[0].included);
        assert!(comps[1].included);
    }
}
