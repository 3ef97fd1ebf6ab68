//! Filters: selection filters decide whether a component passes, transform
//! filters rewrite its fields.

use std::fmt;
use std::sync::Arc;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use super::{Component, Variant};
use crate::error::ConfigError;

/// Keywords that mark a component as "do not fit" (the KiBoM list).
pub const DNF_KEYWORDS: &[&str] = &[
    "dnf",
    "dnl",
    "dnp",
    "do not fit",
    "do not place",
    "do not load",
    "nofit",
    "nostuff",
    "noplace",
    "noload",
    "not fitted",
    "not loaded",
    "not placed",
    "no stuff",
];

/// Name that expands to [`DNF_KEYWORDS`] inside a `keys` list.
pub const DNF_LIST: &str = "dnf_list";

/// A named filter.
pub trait Filter: fmt::Debug + Send + Sync {
    /// Filter name, as referenced from chains.
    fn name(&self) -> &str;

    /// True for filters that rewrite fields instead of selecting.
    fn is_transform(&self) -> bool {
        false
    }

    /// Selection: returns true when the component passes.
    fn accepts(&self, _component: &Component) -> bool {
        true
    }

    /// Transform: rewrites the component fields. The active variant is
    /// available for variant aware rewrites.
    fn transform(&self, _component: &mut Component, _variant: Option<&Variant>) {}
}

/// One regular expression test against a component field.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexEntry {
    /// Field to test (`Reference` tests the designator).
    pub column: String,
    /// Pattern searched in the field value.
    #[serde(default)]
    pub regex: String,
    /// Invert the result of this test.
    #[serde(default)]
    pub invert: bool,
    /// A missing field makes the test fail, even when inverted.
    #[serde(default)]
    pub skip_if_no_field: bool,
    /// Match whenever the field exists.
    #[serde(default)]
    pub match_if_field: bool,
    /// Match whenever the field is missing.
    #[serde(default)]
    pub match_if_no_field: bool,
}

#[derive(Debug)]
struct CompiledEntry {
    entry: RegexEntry,
    regex: Regex,
}

impl CompiledEntry {
    fn new(entry: RegexEntry, filter: &str) -> Result<Self, ConfigError> {
        let regex = Regex::new(&entry.regex).map_err(|e| {
            ConfigError::invalid_regex(&entry.regex, format!("filter `{filter}`"), e)
        })?;
        Ok(Self { entry, regex })
    }

    fn matches(&self, component: &Component) -> bool {
        let result = match component.field(&self.entry.column) {
            None if self.entry.skip_if_no_field => return false,
            None if self.entry.match_if_no_field => true,
            None => self.regex.is_match(""),
            Some(_) if self.entry.match_if_field => true,
            Some(value) => self.regex.is_match(value),
        };
        result != self.entry.invert
    }
}

/// Options of the `generic` selection filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenericOptions {
    /// Filter name.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub comment: String,
    /// The component must match at least one of these.
    #[serde(default)]
    pub include_only: Vec<RegexEntry>,
    /// The component is rejected if it matches any of these.
    #[serde(default)]
    pub exclude_any: Vec<RegexEntry>,
    /// DNF keywords searched in the value and the config field.
    /// `dnf_list` expands to the KiBoM list.
    #[serde(default)]
    pub keys: Vec<String>,
    /// Field holding the DNF keywords.
    #[serde(default = "default_config_field")]
    pub config_field: String,
    /// References always rejected.
    #[serde(default)]
    pub exclude_refs: Vec<String>,
    /// Invert the final result.
    #[serde(default)]
    pub invert: bool,
}

/// Default field holding KiBoM style configuration tokens.
#[must_use]
pub fn default_config_field() -> String {
    "Config".to_string()
}

impl GenericOptions {
    /// Options accepting every component.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: String::new(),
            include_only: Vec::new(),
            exclude_any: Vec::new(),
            keys: Vec::new(),
            config_field: default_config_field(),
            exclude_refs: Vec::new(),
            invert: false,
        }
    }
}

/// The `generic` selection filter.
#[derive(Debug)]
pub struct Generic {
    name: String,
    include_only: Vec<CompiledEntry>,
    exclude_any: Vec<CompiledEntry>,
    keys: Vec<String>,
    config_field: String,
    exclude_refs: Vec<String>,
    invert: bool,
}

impl Generic {
    /// Compiles the options.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRegex`] for a bad pattern.
    pub fn new(options: GenericOptions) -> Result<Self, ConfigError> {
        let compile = |entries: Vec<RegexEntry>| {
            entries
                .into_iter()
                .map(|e| CompiledEntry::new(e, &options.name))
                .collect::<Result<Vec<_>, _>>()
        };
        let include_only = compile(options.include_only.clone())?;
        let exclude_any = compile(options.exclude_any.clone())?;
        let keys = options
            .keys
            .iter()
            .flat_map(|k| {
                if k == DNF_LIST {
                    DNF_KEYWORDS.iter().map(ToString::to_string).collect()
                } else {
                    vec![k.to_lowercase()]
                }
            })
            .collect();
        Ok(Self {
            name: options.name,
            include_only,
            exclude_any,
            keys,
            config_field: options.config_field,
            exclude_refs: options.exclude_refs,
            invert: options.invert,
        })
    }

    fn has_dnf_key(&self, component: &Component) -> bool {
        if self.keys.is_empty() {
            return false;
        }
        let value = component.field_or_empty("Value").trim().to_lowercase();
        if self.keys.contains(&value) {
            return true;
        }
        component
            .field_or_empty(&self.config_field)
            .split(',')
            .map(|t| t.trim().to_lowercase())
            .any(|t| self.keys.contains(&t))
    }

    fn accepts_raw(&self, component: &Component) -> bool {
        if self.exclude_refs.contains(&component.reference) {
            return false;
        }
        if !self.include_only.is_empty() && !self.include_only.iter().any(|e| e.matches(component))
        {
            return false;
        }
        if self.exclude_any.iter().any(|e| e.matches(component)) {
            return false;
        }
        !self.has_dnf_key(component)
    }
}

impl Filter for Generic {
    fn name(&self) -> &str {
        &self.name
    }

    fn accepts(&self, component: &Component) -> bool {
        self.accepts_raw(component) != self.invert
    }
}

/// Options of the `var_rename` transform filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VarRenameOptions {
    /// Filter name.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub comment: String,
    /// Separator between the variant and the field name.
    #[serde(default = "default_separator")]
    pub separator: String,
    /// Copy the variant name to the `Value` field.
    #[serde(default)]
    pub variant_to_value: bool,
}

fn default_separator() -> String {
    ":".to_string()
}

impl VarRenameOptions {
    /// Default options with the given name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment: String::new(),
            separator: default_separator(),
            variant_to_value: false,
        }
    }
}

/// The `var_rename` transform: `VARIANT:FIELD` overwrites `FIELD` when
/// `VARIANT` is active.
#[derive(Debug)]
pub struct VarRename {
    options: VarRenameOptions,
}

impl VarRename {
    /// Creates the filter.
    #[must_use]
    pub const fn new(options: VarRenameOptions) -> Self {
        Self { options }
    }
}

impl Filter for VarRename {
    fn name(&self) -> &str {
        &self.options.name
    }

    fn is_transform(&self) -> bool {
        true
    }

    fn transform(&self, component: &mut Component, variant: Option<&Variant>) {
        let Some(variant) = variant else {
            return;
        };
        let updates: Vec<(String, String)> = component
            .fields
            .iter()
            .filter_map(|(name, value)| {
                let (var, field) = name.split_once(self.options.separator.as_str())?;
                let (var, field) = (var.trim(), field.trim());
                (!var.is_empty() && !field.is_empty() && variant.matches_variant(var))
                    .then(|| (field.to_string(), value.clone()))
            })
            .collect();
        for (field, value) in updates {
            tracing::debug!(reference = %component.reference, field = %field, value = %value, "Variant field override");
            component.set_field(&field, value);
        }
        if self.options.variant_to_value {
            component.set_field("Value", variant.name());
        }
    }
}

/// One `field_rename` rule.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RenameEntry {
    /// Current field name.
    pub field: String,
    /// New field name.
    pub name: String,
}

/// Options of the `field_rename` transform filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldRenameOptions {
    /// Filter name.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub comment: String,
    /// Rename rules, applied in order.
    #[serde(default)]
    pub rename: Vec<RenameEntry>,
}

/// The `field_rename` transform.
#[derive(Debug)]
pub struct FieldRename {
    options: FieldRenameOptions,
}

impl Filter for FieldRename {
    fn name(&self) -> &str {
        &self.options.name
    }

    fn is_transform(&self) -> bool {
        true
    }

    fn transform(&self, component: &mut Component, _variant: Option<&Variant>) {
        for rule in &self.options.rename {
            component.rename_field(&rule.field, &rule.name);
        }
    }
}

/// Options of the `value_normalize` transform filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValueNormalizeOptions {
    /// Filter name.
    pub name: String,
    /// Free text.
    #[serde(default)]
    pub comment: String,
    /// Field to normalise.
    #[serde(default = "default_value_field")]
    pub field: String,
    /// Write `µ` instead of `u`.
    #[serde(default = "default_true")]
    pub micro_sign: bool,
    /// Decimal separator used in the result.
    #[serde(default = "default_decimal_point")]
    pub decimal_point: String,
}

fn default_value_field() -> String {
    "Value".to_string()
}

const fn default_true() -> bool {
    true
}

fn default_decimal_point() -> String {
    ".".to_string()
}

/// `<int>[.,<frac>]<ws>[prefix|R][digits]<unit>`
static VALUE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)(?:[.,](\d+))?\s*([pnuµmkKMGTrR])?(\d+)?\s*([A-Za-zΩ]*)$")
        .expect("valid value pattern")
});

/// The `value_normalize` transform.
#[derive(Debug)]
pub struct ValueNormalize {
    options: ValueNormalizeOptions,
}

impl ValueNormalize {
    /// Creates the filter.
    #[must_use]
    pub const fn new(options: ValueNormalizeOptions) -> Self {
        Self { options }
    }

    /// Normalises one value. Values that don't look like a number with an
    /// optional SI prefix are returned trimmed and otherwise unchanged.
    #[must_use]
    pub fn normalize(&self, value: &str) -> String {
        let value = value.trim();
        let Some(caps) = VALUE_RE.captures(value) else {
            return value.to_string();
        };
        let int = &caps[1];
        let frac = caps.get(2).map(|m| m.as_str());
        let prefix = caps.get(3).map(|m| m.as_str());
        let trailing = caps.get(4).map(|m| m.as_str());
        let unit = caps.get(5).map_or("", |m| m.as_str());
        // `4k7` style: the prefix letter is the decimal mark
        let frac = match (frac, trailing) {
            (Some(_), Some(_)) => return value.to_string(),
            (f, None) => f,
            (None, t) => t,
        };
        let prefix = match prefix {
            Some("K") => "k",
            Some("u" | "µ") if self.options.micro_sign => "µ",
            Some("µ") => "u",
            Some("r" | "R") | None => "",
            Some(p) => p,
        };
        let mut out = int.to_string();
        if let Some(frac) = frac.filter(|f| f.chars().any(|c| c != '0')) {
            out.push_str(&self.options.decimal_point);
            out.push_str(frac.trim_end_matches('0'));
        }
        out.push_str(prefix);
        out.push_str(unit);
        out
    }
}

impl Filter for ValueNormalize {
    fn name(&self) -> &str {
        &self.options.name
    }

    fn is_transform(&self) -> bool {
        true
    }

    fn transform(&self, component: &mut Component, _variant: Option<&Variant>) {
        if let Some(value) = component.field(&self.options.field) {
            let normalized = self.normalize(value);
            component.set_field(&self.options.field, normalized);
        }
    }
}

/// A filter declared in the configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    /// Selection by regular expressions and DNF keywords.
    Generic(GenericOptions),
    /// Variant specific field overrides.
    VarRename(VarRenameOptions),
    /// Field renaming.
    FieldRename(FieldRenameOptions),
    /// Value normalisation.
    ValueNormalize(ValueNormalizeOptions),
}

impl FilterConfig {
    /// Declared name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Generic(o) => &o.name,
            Self::VarRename(o) => &o.name,
            Self::FieldRename(o) => &o.name,
            Self::ValueNormalize(o) => &o.name,
        }
    }

    /// Builds the filter.
    ///
    /// # Errors
    ///
    /// Returns an error when a regular expression does not compile.
    pub fn build(&self) -> Result<Arc<dyn Filter>, ConfigError> {
        Ok(match self {
            Self::Generic(o) => Arc::new(Generic::new(o.clone())?),
            Self::VarRename(o) => Arc::new(VarRename::new(o.clone())),
            Self::FieldRename(o) => Arc::new(FieldRename { options: o.clone() }),
            Self::ValueNormalize(o) => Arc::new(ValueNormalize::new(o.clone())),
        })
    }
}
