//! Outputs: the named jobs declared in the configuration.
//!
//! Each output has a type (`pcb_print`, `pcb_variant`, `info`,
//! `compress`), a directory, a priority and type specific `options`. An
//! output can `extends` another one of the same type, copying its options
//! and overriding the ones it sets itself.
//!
//! [`resolve`] turns the configuration records into typed [`Output`]s,
//! highest priority first. Everything is checked there, so running an
//! output only fails for problems found on the board or with the tools.

mod compress;
mod info;
mod pcb_print;
mod pcb_variant;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::{string_or_list, GlobalConfig};
use crate::context::RunContext;
use crate::error::{ConfigError, Error};
use crate::expand::{Expander, Target};
use crate::print::{PrintOptions, Theme};
use crate::variant::{FilterRegistry, Selection, Variant};

pub use compress::{ArchiveFormat, Compression, CompressOptions, FileSource};
pub use info::InfoOptions;
pub use pcb_variant::PcbVariantOptions;

/// Highest accepted `priority`.
pub const MAX_PRIORITY: u8 = 100;

/// Output types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// Multi page layer prints.
    PcbPrint,
    /// Board snapshot with the variant applied.
    PcbVariant,
    /// Report about the run environment.
    Info,
    /// Archive of other outputs.
    Compress,
}

impl OutputType {
    /// Name used in the configuration.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::PcbPrint => "pcb_print",
            Self::PcbVariant => "pcb_variant",
            Self::Info => "info",
            Self::Compress => "compress",
        }
    }

    const fn default_category(self) -> &'static [&'static str] {
        match self {
            Self::PcbPrint => &["PCB/docs"],
            Self::PcbVariant => &["PCB/export"],
            Self::Info => &["PCB/docs", "Schematic/docs"],
            Self::Compress => &["Compress"],
        }
    }
}

/// `disable_run_by_default`: another output's name, or `true` for the one
/// being extended.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum DisableRunByDefault {
    /// `true` disables the extended output.
    Flag(bool),
    /// Disables the named output.
    Name(String),
}

const fn default_true() -> bool {
    true
}

const fn default_priority() -> u8 {
    50
}

/// An output as written in the configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Identifies this output.
    pub name: String,

    /// Output type.
    #[serde(rename = "type")]
    pub kind: OutputType,

    /// Output directory. A leading `+` appends to the global `dir`.
    #[serde(default)]
    pub dir: Option<String>,

    /// Free text.
    #[serde(default)]
    pub comment: String,

    /// Copy the options from this output.
    #[serde(default)]
    pub extends: String,

    /// Run when no outputs are named on the command line.
    #[serde(default = "default_true")]
    pub run_by_default: bool,

    /// Disable the `run_by_default` of another output.
    #[serde(default)]
    pub disable_run_by_default: Option<DisableRunByDefault>,

    /// Text for the `%I` expansion.
    #[serde(default)]
    pub output_id: String,

    /// Categories, like `PCB/fabrication`.
    #[serde(default, deserialize_with = "string_or_list")]
    pub category: Vec<String>,

    /// 0 to 100, higher runs first.
    #[serde(default = "default_priority")]
    pub priority: u8,

    /// Type specific options.
    #[serde(default)]
    pub options: Option<serde_yml::Mapping>,
}

/// Typed options.
#[derive(Debug, Clone)]
pub enum OutputOptions {
    /// `pcb_print`.
    PcbPrint(Box<PrintOptions>),
    /// `pcb_variant`.
    PcbVariant(PcbVariantOptions),
    /// `info`.
    Info(InfoOptions),
    /// `compress`.
    Compress(CompressOptions),
}

/// A resolved output.
#[derive(Debug, Clone)]
pub struct Output {
    /// Name.
    pub name: String,
    /// Type.
    pub kind: OutputType,
    /// Directory pattern, relative to the run output directory.
    pub dir: String,
    /// Free text.
    pub comment: String,
    /// Runs when no outputs are named.
    pub run_by_default: bool,
    /// `%I` text.
    pub output_id: String,
    /// Categories.
    pub category: Vec<String>,
    /// Priority.
    pub priority: u8,
    /// Options.
    pub options: OutputOptions,
    /// Chains and variant, resolved with the configuration.
    pub selection: Selection,
}

impl Output {
    /// Expands a file name for this output into its directory.
    fn target(&self, ctx: &RunContext, expander: &Expander<'_>, pattern: &str, id: &str, ext: &str) -> PathBuf {
        let target = Target::new(id, ext).with_output_id(&self.output_id);
        let dir = expander.expand(&self.dir, &target);
        ctx.out_dir.join(dir).join(expander.expand(pattern, &target))
    }

    /// Files this output creates.
    #[must_use]
    pub fn targets(&self, ctx: &RunContext) -> Vec<PathBuf> {
        match &self.options {
            OutputOptions::PcbPrint(o) => pcb_print::targets(self, o, ctx),
            OutputOptions::PcbVariant(o) => pcb_variant::targets(self, o, ctx),
            OutputOptions::Info(o) => info::targets(self, o, ctx),
            OutputOptions::Compress(o) => compress::targets(self, o, ctx),
        }
    }

    /// Runs the output. `all` is the full output list, used by outputs
    /// depending on others.
    ///
    /// # Errors
    ///
    /// Returns the error of the failing step, the board is restored first.
    pub fn run(&self, ctx: &mut RunContext, all: &[Output]) -> Result<(), Error> {
        tracing::info!(name = %self.name, kind = self.kind.name(), "Running output");
        match &self.options {
            OutputOptions::PcbPrint(o) => pcb_print::run(self, o, ctx)?,
            OutputOptions::PcbVariant(o) => pcb_variant::run(self, o, ctx)?,
            OutputOptions::Info(o) => info::run(self, o, ctx)?,
            OutputOptions::Compress(o) => compress::run(self, o, ctx, all)?,
        }
        ctx.mark_done(&self.name);
        Ok(())
    }
}

/// Picks the outputs to run: `names` in priority order, or the ones that
/// run by default. `invert` runs everything but `names`.
///
/// # Errors
///
/// Returns [`Error::UnknownOutput`] for a name that isn't declared.
pub fn select<'a>(outputs: &'a [Output], names: &[String], invert: bool) -> Result<Vec<&'a Output>, Error> {
    for name in names {
        if !outputs.iter().any(|o| &o.name == name) {
            return Err(Error::UnknownOutput { name: name.clone() });
        }
    }
    let selected = outputs
        .iter()
        .filter(|o| match (names.is_empty(), invert) {
            (true, _) => o.run_by_default,
            (false, false) => names.contains(&o.name),
            (false, true) => !names.contains(&o.name),
        })
        .collect();
    Ok(selected)
}

/// Runs `selected` in order, skipping the ones already made.
///
/// # Errors
///
/// Stops at the first failing output.
pub fn run_outputs(ctx: &mut RunContext, all: &[Output], selected: &[&Output]) -> Result<(), Error> {
    for output in selected {
        if ctx.is_done(&output.name) {
            tracing::debug!(name = %output.name, "Already generated");
            continue;
        }
        output.run(ctx, all)?;
    }
    Ok(())
}

/// Names of the chains and variant an output asks for.
struct Wanted<'a> {
    variant: &'a str,
    pre_transform: &'a [String],
    dnf_filter: &'a [String],
}

impl Wanted<'static> {
    /// Outputs without filters still expand `%v` with the global variant.
    const NONE: Self = Self {
        variant: "",
        pre_transform: &[],
        dnf_filter: &[],
    };
}

impl Wanted<'_> {
    /// Resolves the names. An empty variant picks the global one.
    fn resolve(
        &self,
        context: &str,
        global: &GlobalConfig,
        filters: &FilterRegistry,
        variants: &IndexMap<String, Variant>,
    ) -> Result<Selection, ConfigError> {
        let variant = if self.variant.is_empty() {
            global.variant.as_str()
        } else {
            self.variant
        };
        Selection::new(
            filters,
            variants,
            variant,
            self.pre_transform,
            self.dnf_filter,
            context,
        )
    }
}

/// Resolves and checks the configured outputs.
///
/// # Errors
///
/// Returns an error for duplicated or unknown names (`extends`,
/// `disable_run_by_default`, `from_output`), type mismatches in `extends`,
/// out of range priorities and invalid options.
pub fn resolve(
    configs: &[OutputConfig],
    global: &GlobalConfig,
    filters: &FilterRegistry,
    variants: &IndexMap<String, Variant>,
) -> Result<Vec<Output>, ConfigError> {
    let mut by_name: HashMap<&str, &OutputConfig> = HashMap::new();
    for config in configs {
        if config.name.trim().is_empty() {
            return Err(ConfigError::validation("output without a `name`"));
        }
        if by_name.insert(config.name.as_str(), config).is_some() {
            return Err(ConfigError::validation(format!(
                "output `{}` defined more than once",
                config.name
            )));
        }
    }

    let mut disabled: HashSet<&str> = HashSet::new();
    for config in configs {
        match &config.disable_run_by_default {
            Some(DisableRunByDefault::Name(name)) if !name.is_empty() => {
                if !by_name.contains_key(name.as_str()) {
                    return Err(ConfigError::validation(format!(
                        "Unknown output `{name}` in `disable_run_by_default`"
                    )));
                }
                disabled.insert(name);
            }
            Some(DisableRunByDefault::Flag(true)) => {
                if config.extends.is_empty() {
                    tracing::warn!(name = %config.name, "`disable_run_by_default: true` without `extends`");
                } else {
                    disabled.insert(&config.extends);
                }
            }
            _ => {}
        }
    }

    let mut outputs = Vec::with_capacity(configs.len());
    for config in configs {
        if config.priority > MAX_PRIORITY {
            return Err(ConfigError::validation(format!(
                "output `{}`: `priority` must be in [0, {MAX_PRIORITY}], got {}",
                config.name, config.priority
            )));
        }
        let mapping = merged_options(config, &by_name, &mut Vec::new())?;
        let context = format!("output `{}`", config.name);
        let (options, selection) = match config.kind {
            OutputType::PcbPrint => {
                let o: PrintOptions = parse_options(&context, mapping)?;
                o.validate()
                    .map_err(|e| ConfigError::validation(format!("{context}: {e}")))?;
                Theme::load(&o.color_theme)?;
                let selection = Wanted {
                    variant: &o.variant,
                    pre_transform: &o.pre_transform,
                    dnf_filter: &o.dnf_filter,
                }
                .resolve(&context, global, filters, variants)?;
                (OutputOptions::PcbPrint(Box::new(o)), selection)
            }
            OutputType::PcbVariant => {
                let mut o: PcbVariantOptions = parse_options(&context, mapping)?;
                o.validate(&context, filters)?;
                let selection = Wanted {
                    variant: &o.variant,
                    pre_transform: &o.pre_transform,
                    dnf_filter: &o.dnf_filter,
                }
                .resolve(&context, global, filters, variants)?;
                (OutputOptions::PcbVariant(o), selection)
            }
            OutputType::Info => (
                OutputOptions::Info(parse_options(&context, mapping)?),
                Wanted::NONE.resolve(&context, global, filters, variants)?,
            ),
            OutputType::Compress => {
                let o: CompressOptions = parse_options(&context, mapping)?;
                o.validate(&context, &config.name, |name| by_name.contains_key(name))?;
                (OutputOptions::Compress(o), Wanted::NONE.resolve(&context, global, filters, variants)?)
            }
        };
        let dir = match config.dir.as_deref() {
            Some(dir) if dir.starts_with('+') => {
                format!("{}{}", global.dir.as_deref().unwrap_or("./"), &dir[1..])
            }
            Some(dir) => dir.to_string(),
            None => global.dir.clone().unwrap_or_else(|| "./".to_string()),
        };
        let category = if config.category.is_empty() {
            config
                .kind
                .default_category()
                .iter()
                .map(ToString::to_string)
                .collect()
        } else {
            config.category.clone()
        };
        let run_by_default = config.run_by_default && !disabled.contains(config.name.as_str());
        if !run_by_default && config.run_by_default {
            tracing::debug!(name = %config.name, "Run by default disabled by another output");
        }
        outputs.push(Output {
            name: config.name.clone(),
            kind: config.kind,
            dir,
            comment: config.comment.clone(),
            run_by_default,
            output_id: config.output_id.clone(),
            category,
            priority: config.priority,
            options,
            selection,
        });
    }
    // Stable: same priority keeps the declaration order
    outputs.sort_by(|a, b| b.priority.cmp(&a.priority));
    Ok(outputs)
}

/// Options of `config` on top of the ones it extends.
fn merged_options(
    config: &OutputConfig,
    by_name: &HashMap<&str, &OutputConfig>,
    seen: &mut Vec<String>,
) -> Result<serde_yml::Mapping, ConfigError> {
    let own = config.options.clone().unwrap_or_default();
    if config.extends.is_empty() {
        return Ok(own);
    }
    if seen.contains(&config.name) {
        return Err(ConfigError::validation(format!(
            "output `{}` extends itself",
            config.name
        )));
    }
    seen.push(config.name.clone());
    let base = by_name.get(config.extends.as_str()).ok_or_else(|| {
        ConfigError::validation(format!("Unknown output `{}` in `extends`", config.extends))
    })?;
    if base.kind != config.kind {
        return Err(ConfigError::validation(format!(
            "Trying to extend `{}` ({}) using another type `{}` ({})",
            base.name,
            base.kind.name(),
            config.name,
            config.kind.name()
        )));
    }
    tracing::debug!(name = %config.name, base = %base.name, "Extending output");
    let mut merged = merged_options(base, by_name, seen)?;
    for (key, value) in own {
        merged.insert(key, value);
    }
    Ok(merged)
}

fn parse_options<T: DeserializeOwned>(context: &str, mapping: serde_yml::Mapping) -> Result<T, ConfigError> {
    serde_yml::from_value(serde_yml::Value::Mapping(mapping))
        .map_err(|e| ConfigError::validation(format!("{context}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variant::{Component, VariantRule};

    fn resolve_yaml(yaml: &str) -> Result<Vec<Output>, ConfigError> {
        let configs: Vec<OutputConfig> = serde_yml::from_str(yaml).unwrap();
        resolve(
            &configs,
            &GlobalConfig::default(),
            &FilterRegistry::default(),
            &IndexMap::new(),
        )
    }

    const PRINT: &str = "
- name: print
  type: pcb_print
  options:
    format: SVG
    title: Base
    pages:
      - layers: [F.Cu, F.SilkS]
";

    #[test]
    fn extends_merges_the_options() {
        let yaml = format!(
            "{PRINT}
- name: print_pdf
  type: pcb_print
  extends: print
  disable_run_by_default: true
  options:
    format: PDF
"
        );
        let outputs = resolve_yaml(&yaml).unwrap();
        let by = |n: &str| outputs.iter().find(|o| o.name == n).unwrap();
        let OutputOptions::PcbPrint(o) = &by("print_pdf").options else {
            panic!("wrong type");
        };
        assert_eq!(o.format, crate::print::Format::Pdf);
        assert_eq!(o.title, "Base");
        assert_eq!(o.pages.len(), 1);
        assert!(!by("print").run_by_default);
        assert!(by("print_pdf").run_by_default);
    }

    #[test]
    fn extends_needs_the_same_type() {
        let yaml = format!("{PRINT}\n- {{name: i, type: info, extends: print}}\n");
        let err = resolve_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("another type"));
        let err = resolve_yaml("- {name: i, type: info, extends: nope}").unwrap_err();
        assert!(err.to_string().contains("Unknown output"));
    }

    #[test]
    fn disable_by_name() {
        let yaml = format!("{PRINT}\n- {{name: i, type: info, disable_run_by_default: print}}\n");
        let outputs = resolve_yaml(&yaml).unwrap();
        assert!(!outputs.iter().find(|o| o.name == "print").unwrap().run_by_default);
        assert!(resolve_yaml("- {name: i, type: info, disable_run_by_default: ghost}").is_err());
    }

    #[test]
    fn priority_order_and_range() {
        let yaml = "
- {name: low, type: info, priority: 10}
- {name: mid, type: info}
- {name: high, type: info, priority: 90}
- {name: mid2, type: info}
";
        let outputs = resolve_yaml(yaml).unwrap();
        let names: Vec<&str> = outputs.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, ["high", "mid", "mid2", "low"]);
        assert!(resolve_yaml("- {name: x, type: info, priority: 101}").is_err());
    }

    #[test]
    fn dir_and_category() {
        let configs: Vec<OutputConfig> =
            serde_yml::from_str("- {name: a, type: info, dir: +/info}\n- {name: b, type: info}").unwrap();
        let global = GlobalConfig {
            dir: Some("docs".into()),
            ..GlobalConfig::default()
        };
        let outputs = resolve(&configs, &global, &FilterRegistry::default(), &IndexMap::new()).unwrap();
        assert_eq!(outputs[0].dir, "docs/info");
        assert_eq!(outputs[1].dir, "docs");
        assert_eq!(outputs[0].category, ["PCB/docs", "Schematic/docs"]);
    }

    #[test]
    fn rejects_bad_options() {
        assert!(resolve_yaml("- {name: p, type: pcb_print, options: {pages: []}}").is_err());
        assert!(resolve_yaml("- {name: p, type: pcb_print, options: {bogus: 1}}").is_err());
        let bad_layer = "
- name: p
  type: pcb_print
  options:
    pages: [{layers: [F.Nothing]}]
";
        assert!(resolve_yaml(bad_layer).is_err());
        let bad_color = "
- name: p
  type: pcb_print
  options:
    pad_color: red
    pages: [{layers: F.Cu}]
";
        assert!(resolve_yaml(bad_color).is_err());
        let bad_filter = "
- name: p
  type: pcb_print
  options:
    dnf_filter: nope
    pages: [{layers: F.Cu}]
";
        assert!(matches!(resolve_yaml(bad_filter), Err(ConfigError::UnknownFilter { .. })));
        let bad_variant = "
- name: p
  type: pcb_print
  options:
    variant: nope
    pages: [{layers: F.Cu}]
";
        assert!(matches!(resolve_yaml(bad_variant), Err(ConfigError::UnknownVariant { .. })));
    }

    #[test]
    fn duplicated_and_unknown_types() {
        assert!(resolve_yaml("- {name: a, type: info}\n- {name: a, type: info}").is_err());
        assert!(serde_yml::from_str::<Vec<OutputConfig>>("- {name: a, type: gerber}").is_err());
    }

    #[test]
    fn select_outputs() {
        let outputs = resolve_yaml(
            "- {name: a, type: info}\n- {name: b, type: info, run_by_default: false}\n- {name: c, type: info}",
        )
        .unwrap();
        let names = |v: Vec<&Output>| v.into_iter().map(|o| o.name.clone()).collect::<Vec<_>>();
        assert_eq!(names(select(&outputs, &[], false).unwrap()), ["a", "c"]);
        assert_eq!(names(select(&outputs, &["b".into()], false).unwrap()), ["b"]);
        assert_eq!(names(select(&outputs, &["a".into()], true).unwrap()), ["b", "c"]);
        assert!(matches!(
            select(&outputs, &["zz".into()], false),
            Err(Error::UnknownOutput { .. })
        ));
    }

    #[test]
    fn selection_is_resolved_with_the_outputs() {
        let configs: Vec<OutputConfig> = serde_yml::from_str(
            "
- name: p
  type: pcb_print
  options:
    dnf_filter: _kibom_dnf
    pages: [{layers: F.Cu}]
- {name: i, type: info}
",
        )
        .unwrap();
        let mut variants = IndexMap::new();
        let rule = VariantRule::KiBom {
            variants: vec!["prod".into()],
            config_field: "Config".into(),
        };
        variants.insert("prod".to_string(), Variant::new("prod", rule));
        let global = GlobalConfig {
            variant: "prod".into(),
            ..GlobalConfig::default()
        };
        let outputs = resolve(&configs, &global, &FilterRegistry::default(), &variants).unwrap();
        for output in &outputs {
            assert_eq!(output.selection.variant().map(Variant::name), Some("prod"));
        }
        let print = outputs.iter().find(|o| o.name == "p").unwrap();
        let dnp = Component::new("R1").with_field("Config", "DNP");
        assert!(!print.selection.dnf_filter.accepts(&dnp));
        let info = outputs.iter().find(|o| o.name == "i").unwrap();
        assert!(info.selection.dnf_filter.is_empty());

        // Dropping the variant afterwards doesn't reach the resolved outputs
        variants.clear();
        assert!(print.selection.variant().is_some());
    }
}
