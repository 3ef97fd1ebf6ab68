//! Variant and filter engine.
//!
//! Components are built once per run, either from the board footprints or
//! from a component list file, and are then mutated only by filters:
//!
//! 1. the `pre_transform` chain rewrites fields,
//! 2. every component is reset to fitted and included,
//! 3. the `dnf_filter` chain decides `fitted` (all filters must accept),
//! 4. the variant, if any, is applied last.
//!
//! Filter and variant names are resolved against a [`FilterRegistry`] while
//! the configuration is validated, so an unknown name never reaches a run.

mod chain;
pub mod filters;
mod variants;

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::board::Board;
use crate::error::ConfigError;

pub use chain::{FilterChain, FilterRegistry, NONE_FILTER};
pub use filters::{Filter, FilterConfig};
pub use variants::{Variant, VariantConfig, VariantRule};

/// A component as seen by filters and variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Reference designator, never changed by filters.
    pub reference: String,

    /// Will be soldered.
    #[serde(default = "default_true")]
    pub fitted: bool,

    /// Appears in fabrication documents.
    #[serde(default = "default_true")]
    pub included: bool,

    /// Field name/value pairs, in insertion order.
    #[serde(default)]
    pub fields: IndexMap<String, String>,
}

const fn default_true() -> bool {
    true
}

impl Component {
    /// Creates a fitted and included component with no fields.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            fitted: true,
            included: true,
            fields: IndexMap::new(),
        }
    }

    /// Adds a field, builder style.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Case insensitive field lookup. `Reference` and `References` give the
    /// reference designator.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case("reference") || name.eq_ignore_ascii_case("references") {
            return Some(&self.reference);
        }
        self.fields
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Field value or the empty string.
    #[must_use]
    pub fn field_or_empty(&self, name: &str) -> &str {
        self.field(name).unwrap_or("")
    }

    /// Sets a field, matching an existing name case insensitively.
    pub fn set_field(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.fields.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
            Some((_, v)) => *v = value,
            None => {
                self.fields.insert(name.to_string(), value);
            }
        }
    }

    /// Renames a field in place, keeping its position. An existing `to`
    /// field keeps its position and takes the value.
    pub fn rename_field(&mut self, from: &str, to: &str) {
        let Some(index) = self
            .fields
            .keys()
            .position(|k| k.eq_ignore_ascii_case(from))
        else {
            return;
        };
        let existing = self.fields.keys().position(|k| k.eq_ignore_ascii_case(to));
        let Some((_, value)) = self.fields.shift_remove_index(index) else {
            return;
        };
        match existing {
            Some(other) if other != index => self.set_field(to, value),
            _ => {
                self.fields.shift_insert(index, to.to_string(), value);
            }
        }
    }
}

/// Builds the component list from the board footprints.
#[must_use]
pub fn components_from_board(board: &Board) -> Vec<Component> {
    board
        .footprints
        .iter()
        .map(|fp| {
            let mut c = Component::new(&fp.reference)
                .with_field("Value", &fp.value)
                .with_field("Footprint", &fp.footprint);
            for (k, v) in &fp.properties {
                c.set_field(k, v);
            }
            c
        })
        .collect()
}

/// Loads a component list (JSON array of [`Component`]).
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_components(path: &Path) -> Result<Vec<Component>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let components: Vec<Component> = serde_json::from_str(&content).map_err(|e| {
        ConfigError::validation(format!("invalid component list {}: {e}", path.display()))
    })?;
    tracing::debug!(path = %path.display(), count = components.len(), "Loaded component list");
    Ok(components)
}

/// Resolves fitted/included flags for every component.
pub fn resolve(
    components: &mut [Component],
    pre_transform: &FilterChain,
    dnf_filter: &FilterChain,
    variant: Option<&Variant>,
) {
    for c in components.iter_mut() {
        pre_transform.transform(c, variant);
    }
    for c in components.iter_mut() {
        c.fitted = true;
        c.included = true;
    }
    if !dnf_filter.is_empty() {
        for c in components.iter_mut() {
            c.fitted = dnf_filter.accepts(c);
        }
    }
    if let Some(variant) = variant {
        variant.apply(components);
    }
    let not_fitted = components.iter().filter(|c| !c.fitted).count();
    let excluded = components.iter().filter(|c| !c.included).count();
    tracing::debug!(
        total = components.len(),
        not_fitted,
        excluded,
        variant = variant.map_or("none", Variant::name),
        "Resolved components"
    );
}

/// The chains and variant of one output, resolved with the configuration.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Transforms applied first.
    pub pre_transform: FilterChain,
    /// Marks the not fitted components.
    pub dnf_filter: FilterChain,
    /// Variant applied last.
    pub variant: Option<Variant>,
}

impl Selection {
    /// Resolves the named chains and variant. An empty variant name is
    /// no variant.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown filters and variants, and for filters
    /// used in the wrong kind of chain.
    pub fn new(
        filters: &FilterRegistry,
        variants: &IndexMap<String, Variant>,
        variant: &str,
        pre_transform: &[String],
        dnf_filter: &[String],
        context: &str,
    ) -> Result<Self, ConfigError> {
        let variant = if variant.is_empty() {
            None
        } else {
            let found = variants.get(variant).ok_or_else(|| ConfigError::UnknownVariant {
                name: variant.to_string(),
            })?;
            Some(found.clone())
        };
        Ok(Self {
            pre_transform: filters.transform_chain(pre_transform, &format!("{context} pre_transform"))?,
            dnf_filter: filters.selection_chain(dnf_filter, &format!("{context} dnf_filter"))?,
            variant,
        })
    }

    /// The variant, if any.
    #[must_use]
    pub const fn variant(&self) -> Option<&Variant> {
        self.variant.as_ref()
    }

    /// Resolves the flags of `components`.
    pub fn apply(&self, components: &mut [Component]) {
        resolve(components, &self.pre_transform, &self.dnf_filter, self.variant());
    }
}
