//! `pcb_variant`: saves a board snapshot with the variant applied.
//!
//! The not fitted footprints get their Fab crosses, lose paste and glue,
//! and have their 3D models removed or replaced. Listed footprints can get
//! a highlight cube. The loaded board is restored once the copy is saved.

use std::path::PathBuf;

use serde::Deserialize;

use super::Output;
use crate::config::string_or_list;
use crate::context::RunContext;
use crate::error::{ConfigError, Error};
use crate::mutation::{self, HighlightOptions, ModelOptions};
use crate::variant::{Component, FilterChain, FilterRegistry};

const ID: &str = "variant";
const EXT: &str = "json";

fn default_filter() -> Vec<String> {
    vec![crate::variant::NONE_FILTER.to_string()]
}

const fn default_true() -> bool {
    true
}

const fn default_padding() -> f64 {
    1.5
}

/// A `highlight` entry.
#[derive(Debug, Clone)]
pub(super) enum Highlight {
    /// A plain reference.
    Reference(String),
    /// `_kf(a;b)`: every component the chain accepts.
    Filter(FilterChain),
}

impl Highlight {
    fn parse(entry: &str, filters: &FilterRegistry, context: &str) -> Result<Self, ConfigError> {
        let entry = entry.trim();
        let Some(inner) = entry.strip_prefix("_kf(") else {
            return Ok(Self::Reference(entry.to_string()));
        };
        let inner = inner.strip_suffix(')').ok_or_else(|| {
            ConfigError::validation(format!("{context}: missing `)` in filter reference `{entry}`"))
        })?;
        let names: Vec<String> = inner.split(';').map(|n| n.trim().to_string()).collect();
        tracing::debug!(filters = ?names, "Highlight filter");
        let chain = filters.selection_chain(&names, &format!("{context} highlight"))?;
        Ok(Self::Filter(chain))
    }
}

/// References to highlight, in `highlights` order without repeats.
fn highlight_references(highlights: &[Highlight], components: &[Component]) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    let mut push = |reference: &str| {
        if !refs.iter().any(|r| r == reference) {
            refs.push(reference.to_string());
        }
    };
    for highlight in highlights {
        match highlight {
            Highlight::Reference(reference) => push(reference.as_str()),
            Highlight::Filter(chain) => components
                .iter()
                .filter(|c| chain.accepts(c))
                .for_each(|c| push(c.reference.as_str())),
        }
    }
    refs
}

/// Options of a `pcb_variant` output.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PcbVariantOptions {
    /// File name pattern, the global one when missing.
    #[serde(default)]
    pub output: Option<String>,

    /// Variant to apply, the global one when empty.
    #[serde(default)]
    pub variant: String,

    /// Selection chain marking not fitted components.
    #[serde(default = "default_filter", deserialize_with = "string_or_list")]
    pub dnf_filter: Vec<String>,

    /// Transform chain applied before anything else.
    #[serde(default = "default_filter", deserialize_with = "string_or_list")]
    pub pre_transform: Vec<String>,

    /// Move the Fab graphics of excluded components away.
    #[serde(default)]
    pub hide_excluded: bool,

    /// New title, `+` appends to the current one.
    #[serde(default)]
    pub title: String,

    /// Apply the 3D model mutations.
    #[serde(default = "default_true")]
    pub models: bool,

    /// References that get a highlight cube. `_kf(filter)` adds the
    /// components accepted by `filter`, several filters go `;` separated.
    #[serde(default, deserialize_with = "string_or_list")]
    pub highlight: Vec<String>,

    #[serde(skip)]
    highlights: Vec<Highlight>,

    /// Extra size of the highlight cube (mm).
    #[serde(default = "default_padding")]
    pub highlight_padding: f64,

    /// Tall highlight instead of a thin one.
    #[serde(default)]
    pub highlight_on_top: bool,

    /// Copy the resolved component fields to the footprints.
    #[serde(default = "default_true")]
    pub fields_to_footprints: bool,
}

impl PcbVariantOptions {
    /// Checks the options and resolves the `highlight` filters.
    pub(super) fn validate(&mut self, context: &str, filters: &FilterRegistry) -> Result<(), ConfigError> {
        if self.highlight_padding < 0.0 {
            return Err(ConfigError::validation(format!(
                "{context}: `highlight_padding` can't be negative"
            )));
        }
        if !self.highlight.is_empty() && !self.models {
            return Err(ConfigError::validation(format!(
                "{context}: `highlight` needs `models` enabled"
            )));
        }
        self.highlights = self
            .highlight
            .iter()
            .map(|entry| Highlight::parse(entry, filters, context))
            .collect::<Result<_, _>>()?;
        Ok(())
    }
}

pub(super) fn targets(output: &Output, options: &PcbVariantOptions, ctx: &RunContext) -> Vec<PathBuf> {
    let expander = ctx.expander(output.selection.variant());
    let pattern = options.output.as_deref().unwrap_or(&ctx.global().output);
    vec![output.target(ctx, &expander, pattern, ID, EXT)]
}

pub(super) fn run(output: &Output, options: &PcbVariantOptions, ctx: &mut RunContext) -> Result<(), Error> {
    let target = targets(output, options, ctx).remove(0);
    let dir = target
        .parent()
        .map_or_else(|| PathBuf::from("."), std::path::Path::to_path_buf);
    std::fs::create_dir_all(&dir).map_err(|e| Error::io(&dir, e))?;

    let variant = output.selection.variant();
    let title = ctx.expander(variant).expand_title(&options.title);
    let components = ctx.components_for(&output.selection);

    let mut mutations = ctx.mutation_options();
    mutations.hide_excluded = options.hide_excluded;
    mutations.fields_to_footprints = options.fields_to_footprints;
    mutations.title = Some(title);
    if options.models {
        let references = highlight_references(&options.highlights, &components);
        let highlight = if references.is_empty() {
            None
        } else {
            // Next to the snapshot, it references the file
            let model = mutation::write_highlight_model(&dir).map_err(|e| Error::io(&dir, e))?;
            Some(HighlightOptions {
                references,
                padding: options.highlight_padding,
                on_top: options.highlight_on_top,
                model,
            })
        };
        mutations.models = Some(ModelOptions {
            field_3d_model: ctx.global().field_3d_model.clone(),
            highlight,
        });
    }

    let set = mutation::apply(&mut ctx.board, &components, variant, &mutations)?;
    let changes = set.len();
    let mut snapshot = ctx.board.clone();
    set.restore(&mut ctx.board)?;
    // The copy lives elsewhere, keep it pointing at the EDA file
    snapshot.pcb_file = ctx.board.pcb_path();
    snapshot.save(&target)?;
    tracing::info!(file = %target.display(), changes, "Created");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::board::{Board, Footprint, Model3D};

    fn setup(yaml: &str, out: &Path) -> (RunContext, Vec<Output>) {
        let config = crate::config::parse_config(yaml, Path::new("t.yaml")).unwrap();
        let resolved = config.resolve().unwrap();
        let mut board = Board::default();
        board.path = out.join("src/demo.json");
        board.pcb_file = Some(PathBuf::from("demo.kicad_pcb"));
        board.title_block.title = "Demo".into();
        let mut r1 = Footprint::new("R1", "10k");
        r1.models.push(Model3D::new("R_0603.wrl"));
        board.footprints.push(r1);
        let mut c1 = Footprint::new("C1", "100n");
        c1.properties.insert("Variant".into(), "lite".into());
        c1.models.push(Model3D::new("C_0603.wrl"));
        board.footprints.push(c1);
        let ctx = RunContext::new(&config, resolved.variants, board, out).unwrap();
        (ctx, resolved.outputs)
    }

    const YAML: &str = "
variants:
  - name: full
    type: ibom
    variants_blacklist: lite
outputs:
  - name: snap
    type: pcb_variant
    options:
      variant: full
      title: '+ (full)'
      highlight: R1
";

    #[test]
    fn target_name() {
        let (ctx, outputs) = setup(YAML, Path::new("out"));
        assert_eq!(outputs[0].targets(&ctx), [PathBuf::from("out/demo-variant_full.json")]);
    }

    #[test]
    fn saves_the_variant_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctx, outputs) = setup(YAML, dir.path());
        let before = ctx.board.clone();
        outputs[0].run(&mut ctx, &outputs).unwrap();
        assert_eq!(ctx.board, before);

        let target = outputs[0].targets(&ctx).remove(0);
        let saved = Board::load(&target).unwrap();
        assert_eq!(saved.title_block.title, "Demo (full)");
        assert_eq!(saved.pcb_file, Some(dir.path().join("src/demo.kicad_pcb")));
        let c1 = saved.footprint("C1").unwrap();
        assert!(c1.models.is_empty());
        let r1 = saved.footprint("R1").unwrap();
        assert_eq!(r1.models.len(), 2);
        assert!(Path::new(&r1.models[1].filename).is_file());
    }

    #[test]
    fn rejects_negative_padding() {
        let yaml = YAML.replace("highlight: R1", "highlight_padding: -1");
        let config = crate::config::parse_config(&yaml, Path::new("t.yaml"));
        assert!(config.and_then(|c| c.resolve()).is_err());
    }

    const YAML_KF: &str = "
filters:
  - name: not_r1
    type: generic
    exclude_refs: [R1]
variants:
  - name: full
    type: ibom
    variants_blacklist: lite
outputs:
  - name: snap
    type: pcb_variant
    options:
      variant: full
      highlight: ['_kf(not_r1)', R1, C1]
";

    #[test]
    fn highlight_filters_add_the_accepted_components() {
        let dir = tempfile::tempdir().unwrap();
        let (mut ctx, outputs) = setup(YAML_KF, dir.path());
        outputs[0].run(&mut ctx, &outputs).unwrap();
        let saved = Board::load(&outputs[0].targets(&ctx).remove(0)).unwrap();
        // C1 is not fitted: its model goes, the cube stays
        let c1 = saved.footprint("C1").unwrap();
        assert_eq!(c1.models.len(), 1);
        assert!(Path::new(&c1.models[0].filename).is_file());
        assert_eq!(saved.footprint("R1").unwrap().models.len(), 2);
    }

    #[test]
    fn highlight_references_keep_the_order() {
        let filters = FilterRegistry::from_configs(
            &serde_yml::from_str::<Vec<crate::variant::FilterConfig>>(
                "[{name: not_r1, type: generic, exclude_refs: [R1]}]",
            )
            .unwrap(),
        )
        .unwrap();
        let highlights: Vec<Highlight> = ["R9", "_kf( not_r1 )", "C1"]
            .iter()
            .map(|e| Highlight::parse(e, &filters, "test").unwrap())
            .collect();
        let components = [Component::new("R1"), Component::new("C1"), Component::new("C2")];
        assert_eq!(highlight_references(&highlights, &components), ["R9", "C1", "C2"]);
    }

    #[test]
    fn bad_highlight_filters() {
        let resolve = |entry: &str| {
            let yaml = YAML_KF.replace("'_kf(not_r1)'", entry);
            crate::config::parse_config(&yaml, Path::new("t.yaml")).and_then(|c| c.resolve())
        };
        assert!(matches!(resolve("'_kf(ghost)'"), Err(ConfigError::UnknownFilter { .. })));
        let err = resolve("'_kf(not_r1'").unwrap_err();
        assert!(err.to_string().contains("missing `)`"));
        assert!(resolve("'_kf(not_r1)'").is_ok());
    }
}
