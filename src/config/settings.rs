//! Configuration structures for deserialisation.
//!
//! These structures map directly to the YAML run configuration.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::format::{Item, StrftimeItems};
use indexmap::IndexMap;
use serde::Deserialize;

use crate::board::Layer;
use crate::error::ConfigError;
use crate::outputs::{self, Output, OutputConfig};
use crate::tools::{ALL_TOOLS, DEFAULT_RETRIES};
use crate::variant::{FilterConfig, FilterRegistry, Variant, VariantConfig};

/// File name pattern used when an output doesn't give one.
pub const DEFAULT_OUTPUT_PATTERN: &str = "%f-%i%I%v.%x";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Root configuration structure.
///
/// This is the top-level structure that matches the YAML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Options shared by every output.
    #[serde(default)]
    pub global: GlobalConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Paths to the external tools, keyed by command name.
    #[serde(default)]
    pub tools: HashMap<String, PathBuf>,

    /// Checks run before the outputs.
    #[serde(default)]
    pub preflight: PreflightConfig,

    /// Named filters.
    #[serde(default)]
    pub filters: Vec<FilterConfig>,

    /// Named variants.
    #[serde(default)]
    pub variants: Vec<VariantConfig>,

    /// Outputs, in declaration order.
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

/// The configuration with every name resolved.
#[derive(Debug)]
pub struct Resolved {
    /// Built-in and configured filters.
    pub filters: FilterRegistry,
    /// Variants by name, in declaration order.
    pub variants: IndexMap<String, Variant>,
    /// Outputs, highest priority first.
    pub outputs: Vec<Output>,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolve().map(|_| ())
    }

    /// Resolves filters, variants and outputs.
    ///
    /// # Errors
    ///
    /// Returns an error for unknown or duplicated names, bad options and
    /// anything else [`Config::validate`] rejects.
    pub fn resolve(&self) -> Result<Resolved, ConfigError> {
        self.global.validate()?;
        self.logging.validate()?;
        for name in self.tools.keys() {
            if !ALL_TOOLS.iter().any(|t| t.command == name) {
                return Err(ConfigError::validation(format!("unknown tool `{name}` in `tools`")));
            }
        }
        let filters = FilterRegistry::from_configs(&self.filters)?;
        let mut variants = IndexMap::new();
        for config in &self.variants {
            let variant = Variant::from_config(config, &filters)?;
            if variants.insert(config.name().to_string(), variant).is_some() {
                return Err(ConfigError::validation(format!(
                    "variant `{}` defined more than once",
                    config.name()
                )));
            }
        }
        if !self.global.variant.is_empty() && !variants.contains_key(&self.global.variant) {
            return Err(ConfigError::UnknownVariant {
                name: self.global.variant.clone(),
            });
        }
        let outputs = outputs::resolve(&self.outputs, &self.global, &filters, &variants)?;
        Ok(Resolved {
            filters,
            variants,
            outputs,
        })
    }
}

fn default_output() -> String {
    DEFAULT_OUTPUT_PATTERN.to_string()
}

const fn default_true() -> bool {
    true
}

const fn default_work_layer() -> Layer {
    Layer::Rescue
}

fn default_field_3d_model() -> String {
    "_3D_model".to_string()
}

const fn default_retries() -> u32 {
    DEFAULT_RETRIES
}

fn default_date_format() -> String {
    "%Y-%m-%d".to_string()
}

fn default_time_format() -> String {
    "%H-%M-%S".to_string()
}

/// Options shared by every output.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Default file name pattern.
    #[serde(default = "default_output")]
    pub output: String,

    /// Default output directory, relative to the command line one.
    #[serde(default)]
    pub dir: Option<String>,

    /// Also use `dir` for the preflight reports.
    #[serde(default = "default_true")]
    pub use_dir_for_preflights: bool,

    /// Variant used by outputs that don't name one.
    #[serde(default)]
    pub variant: String,

    /// Component list file, the board footprints when missing.
    #[serde(default)]
    pub components: Option<PathBuf>,

    /// Cross not fitted footprints on the Fab layers.
    #[serde(default = "default_true")]
    pub cross_footprints_for_dnp: bool,

    /// Remove the solder paste of not fitted footprints.
    #[serde(default = "default_true")]
    pub remove_solder_paste_for_dnp: bool,

    /// Remove the adhesive of not fitted footprints.
    #[serde(default = "default_true")]
    pub remove_adhesive_for_dnp: bool,

    /// Layer where hidden graphics are parked.
    #[serde(default = "default_work_layer")]
    pub work_layer: Layer,

    /// Field with replacement 3D model names.
    #[serde(default = "default_field_3d_model", rename = "field_3D_model")]
    pub field_3d_model: String,

    /// Attempts for the KiAuto tools.
    #[serde(default = "default_retries")]
    pub kiauto_retries: u32,

    /// Tell KiAuto to apply the DRC exclusions itself.
    #[serde(default)]
    pub drc_exclusions_workaround: bool,

    /// Format for `%D` and the file dates of `%d`.
    #[serde(default = "default_date_format")]
    pub date_format: String,

    /// Format for `%T`.
    #[serde(default = "default_time_format")]
    pub time_format: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            dir: None,
            use_dir_for_preflights: true,
            variant: String::new(),
            components: None,
            cross_footprints_for_dnp: true,
            remove_solder_paste_for_dnp: true,
            remove_adhesive_for_dnp: true,
            work_layer: default_work_layer(),
            field_3d_model: default_field_3d_model(),
            kiauto_retries: default_retries(),
            drc_exclusions_workaround: false,
            date_format: default_date_format(),
            time_format: default_time_format(),
        }
    }
}

impl GlobalConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.output.trim().is_empty() {
            return Err(ConfigError::validation("global `output` can't be empty"));
        }
        if self.work_layer.is_copper() {
            return Err(ConfigError::validation(format!(
                "`work_layer` can't be a copper layer ({})",
                self.work_layer
            )));
        }
        for (field, format) in [("date_format", &self.date_format), ("time_format", &self.time_format)] {
            if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                return Err(ConfigError::validation(format!("invalid `{field}`: {format}")));
            }
        }
        if self.kiauto_retries == 0 {
            return Err(ConfigError::validation("`kiauto_retries` must be at least 1"));
        }
        if let Some(components) = &self.components {
            if !components.is_file() {
                return Err(ConfigError::validation(format!(
                    "missing component list: {}",
                    components.display()
                )));
            }
        }
        Ok(())
    }
}

/// Checks run before the outputs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreflightConfig {
    /// Run the DRC.
    #[serde(default)]
    pub run_drc: bool,

    /// Don't report unconnected items.
    #[serde(default)]
    pub ignore_unconnected: bool,

    /// KiAuto filter file for the DRC.
    #[serde(default)]
    pub drc_filter_file: Option<PathBuf>,
}

/// Options for the DRC run, taken from the global and preflight sections.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DrcOptions {
    /// KiAuto filter file.
    pub filter_file: Option<PathBuf>,
    /// `-F` flag.
    pub exclusions_workaround: bool,
    /// `-i` flag.
    pub ignore_unconnected: bool,
}

impl Config {
    /// DRC options, `None` when the DRC is disabled.
    #[must_use]
    pub fn drc_options(&self) -> Option<DrcOptions> {
        self.preflight.run_drc.then(|| DrcOptions {
            filter_file: self.preflight.drc_filter_file.clone(),
            exclusions_workaround: self.global.drc_exclusions_workaround,
            ignore_unconnected: self.preflight.ignore_unconnected,
        })
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if LOG_LEVELS.contains(&self.level.to_lowercase().as_str()) {
            Ok(())
        } else {
            Err(ConfigError::validation(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.level,
                LOG_LEVELS.join(", ")
            )))
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yml::from_str(yaml).unwrap()
    }

    #[test]
    fn parse_minimal_config() {
        let config = parse("{}");
        assert!(config.validate().is_ok());
        assert_eq!(config.global.output, DEFAULT_OUTPUT_PATTERN);
        assert_eq!(config.global.work_layer, Layer::Rescue);
        assert_eq!(config.global.kiauto_retries, DEFAULT_RETRIES);
        assert!(config.drc_options().is_none());
    }

    #[test]
    fn parse_full_config() {
        let yaml = r"
_comment: Test config
global:
  output: '%f_%i.%x'
  dir: docs
  variant: production
  field_3D_model: Alt3D
  work_layer: User.9
  kiauto_retries: 5
  drc_exclusions_workaround: true
logging:
  level: debug
preflight:
  run_drc: true
  ignore_unconnected: true
filters:
  - name: only_r
    type: generic
    include_only:
      - column: Reference
        regex: '^R'
variants:
  - name: production
    type: ibom
    variants_blacklist: [test]
outputs:
  - name: info
    type: info
";
        let config = parse(yaml);
        let resolved = config.resolve().unwrap();
        assert!(resolved.filters.get("only_r").is_some());
        assert!(resolved.variants.contains_key("production"));
        assert_eq!(resolved.outputs.len(), 1);
        assert_eq!(config.global.field_3d_model, "Alt3D");
        assert_eq!(config.global.work_layer, Layer::User(9));
        assert_eq!(config.logging.level, "debug");
        let drc = config.drc_options().unwrap();
        assert!(drc.exclusions_workaround);
        assert!(drc.ignore_unconnected);
        assert!(drc.filter_file.is_none());
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
    }

    #[test]
    fn reject_invalid_log_level() {
        assert!(parse("logging: {level: loud}").validate().is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let result: Result<Config, _> = serde_yml::from_str("unknown_field: value");
        assert!(result.is_err());
        let result: Result<Config, _> = serde_yml::from_str("global: {colour: red}");
        assert!(result.is_err());
    }

    #[test]
    fn reject_unknown_variant() {
        let err = parse("global: {variant: nope}").validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownVariant { .. }));
    }

    #[test]
    fn reject_unknown_filter_in_variant() {
        let yaml = "
variants:
  - name: v
    type: kibom
    dnf_filter: missing
";
        let err = parse(yaml).validate().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownFilter { .. }));
    }

    #[test]
    fn reject_duplicated_variant() {
        let yaml = "
variants:
  - {name: v, type: kibom}
  - {name: v, type: ibom}
";
        assert!(parse(yaml).validate().is_err());
    }

    #[test]
    fn reject_unknown_tool_and_bad_layer() {
        assert!(parse("tools: {inkscape: /usr/bin/inkscape}").validate().is_err());
        assert!(parse("tools: {rar: /opt/rar}").validate().is_ok());
        assert!(parse("global: {work_layer: F.Cu}").validate().is_err());
        assert!(serde_yml::from_str::<Config>("global: {work_layer: Nowhere}").is_err());
        assert!(parse("global: {date_format: '%Y-%Q'}").validate().is_err());
    }
}
