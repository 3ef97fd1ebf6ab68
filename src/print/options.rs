//! Options of the `pcb_print` output: the document, its pages and the
//! layers on each page.

use std::path::{Path, PathBuf};

use bitflags::bitflags;
use serde::{Deserialize, Deserializer};

use super::theme::{validate_color, Theme};
use crate::board::{Board, Layer};
use crate::config::string_or_list;
use crate::error::ConfigError;

/// Layer group names accepted in a page layer list.
pub const LAYER_GROUPS: [&str; 4] = ["all", "copper", "technical", "user"];

bitflags! {
    /// What the plotter draws for one layer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PlotFlags: u8 {
        /// Footprint references.
        const REFERENCES = 1;
        /// Footprint values.
        const VALUES = 1 << 1;
        /// References and values marked as invisible.
        const INVISIBLE_TEXT = 1 << 2;
        /// X axis inverted.
        const MIRROR = 1 << 3;
        /// Black and white swapped.
        const NEGATIVE = 1 << 4;
        /// Vias drawn on the solder mask layers (not tented).
        const VIAS_ON_MASK = 1 << 5;
    }
}

/// Output document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum Format {
    /// One PDF, one page per configured page.
    #[default]
    #[serde(rename = "PDF", alias = "pdf")]
    Pdf,
    /// One SVG per page.
    #[serde(rename = "SVG", alias = "svg")]
    Svg,
    /// One PNG per page.
    #[serde(rename = "PNG", alias = "png")]
    Png,
    /// One EPS per page.
    #[serde(rename = "EPS", alias = "eps")]
    Eps,
    /// One PostScript document.
    #[serde(rename = "PS", alias = "ps")]
    Ps,
}

impl Format {
    /// File extension, used for `%x`.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Svg => "svg",
            Self::Png => "png",
            Self::Eps => "eps",
            Self::Ps => "ps",
        }
    }

    /// Returns true when every page goes to its own file.
    #[must_use]
    pub const fn file_per_page(self) -> bool {
        matches!(self, Self::Svg | Self::Png | Self::Eps)
    }
}

/// How the page frame is drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameMechanism {
    /// KiAuto drives the GUI to plot it. Slow, exact, no page numbers.
    Gui,
    /// The built-in worksheet interpreter.
    #[default]
    Internal,
    /// The plotter's own frame (default layout only).
    Plot,
}

/// Drill marks on copper layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrillMarks {
    /// No holes.
    None,
    /// Small marks.
    Small,
    /// Real size holes.
    #[default]
    Full,
}

const fn default_true() -> bool {
    true
}

/// One layer of a page.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerOptions {
    /// Layer name or group (`copper`, `technical`, `user`, `all`).
    pub layer: String,

    /// Plot file suffix, defaults to the layer name with `_` for `.`.
    #[serde(default)]
    pub suffix: Option<String>,

    /// Used as sheet name for generated pages.
    #[serde(default)]
    pub description: Option<String>,

    /// Color used for this layer, from the theme when empty.
    #[serde(default)]
    pub color: Option<String>,

    /// Include the footprint references.
    #[serde(default = "default_true")]
    pub plot_footprint_refs: bool,

    /// Include the footprint values.
    #[serde(default = "default_true")]
    pub plot_footprint_values: bool,

    /// Include references and values even when marked as invisible.
    #[serde(default)]
    pub force_plot_invisible_refs_vals: bool,
}

impl LayerOptions {
    /// Options for `layer` with every default.
    #[must_use]
    pub fn named(layer: impl Into<String>) -> Self {
        Self {
            layer: layer.into(),
            suffix: None,
            description: None,
            color: None,
            plot_footprint_refs: true,
            plot_footprint_values: true,
            force_plot_invisible_refs_vals: false,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if Layer::parse(&self.layer).is_none() && !LAYER_GROUPS.contains(&self.layer.as_str()) {
            return Err(ConfigError::validation(format!(
                "unknown layer `{}`",
                self.layer
            )));
        }
        if let Some(color) = &self.color {
            validate_color("color", color)?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LayerEntry {
    Name(String),
    Options(LayerOptions),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LayerList {
    One(String),
    Many(Vec<LayerEntry>),
}

fn layer_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<LayerOptions>, D::Error> {
    Ok(match LayerList::deserialize(deserializer)? {
        LayerList::One(name) => vec![LayerOptions::named(name)],
        LayerList::Many(entries) => entries
            .into_iter()
            .map(|e| match e {
                LayerEntry::Name(name) => LayerOptions::named(name),
                LayerEntry::Options(options) => options,
            })
            .collect(),
    })
}

fn default_sheet() -> String {
    "Assembly".to_string()
}

const fn default_line_width() -> f64 {
    0.1
}

fn default_holes_color() -> String {
    "#000000".to_string()
}

/// One page of the document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageOptions {
    /// Print mirrored (X axis inverted).
    #[serde(default)]
    pub mirror: bool,

    /// Print in gray scale.
    #[serde(default)]
    pub monochrome: bool,

    /// Scale factor, 0 means autoscale. Defaults to the document scaling.
    #[serde(default)]
    pub scaling: Option<f64>,

    /// Replaces the sheet title. A leading `+` appends.
    #[serde(default)]
    pub title: String,

    /// Text for the `sheet` of the title block.
    #[serde(default = "default_sheet")]
    pub sheet: String,

    /// Color for the frame and title block.
    #[serde(default)]
    pub sheet_reference_color: Option<String>,

    /// Width for objects without width (mm).
    #[serde(default = "default_line_width")]
    pub line_width: f64,

    /// Invert black and white.
    #[serde(default)]
    pub negative_plot: bool,

    /// Cover the vias with solder mask.
    #[serde(default = "default_true")]
    pub tent_vias: bool,

    /// Paint the drill holes instead of leaving them white.
    #[serde(default = "default_true")]
    pub colored_holes: bool,

    /// Color for the holes when `colored_holes` is enabled.
    #[serde(default = "default_holes_color")]
    pub holes_color: String,

    /// Sort the layers the way KiCad prints them.
    #[serde(default)]
    pub sort_layers: bool,

    /// Layers on this page, the last one on top.
    #[serde(deserialize_with = "layer_list")]
    pub layers: Vec<LayerOptions>,
}

impl PageOptions {
    /// A page with the given layers and every default.
    #[must_use]
    pub fn with_layers(layers: Vec<LayerOptions>) -> Self {
        Self {
            mirror: false,
            monochrome: false,
            scaling: None,
            title: String::new(),
            sheet: default_sheet(),
            sheet_reference_color: None,
            line_width: default_line_width(),
            negative_plot: false,
            tent_vias: true,
            colored_holes: true,
            holes_color: default_holes_color(),
            sort_layers: false,
            layers,
        }
    }

    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        if self.layers.is_empty() {
            return Err(ConfigError::validation(format!(
                "missing `layers` list in page {}",
                index + 1
            )));
        }
        for layer in &self.layers {
            layer.validate()?;
        }
        if let Some(color) = &self.sheet_reference_color {
            validate_color("sheet_reference_color", color)?;
        }
        validate_color("holes_color", &self.holes_color)?;
        if !(0.02..=2.0).contains(&self.line_width) {
            return Err(ConfigError::validation(format!(
                "`line_width` must be in [0.02, 2], got {}",
                self.line_width
            )));
        }
        if self.scaling.is_some_and(|s| s < 0.0) {
            return Err(ConfigError::validation("`scaling` can't be negative"));
        }
        Ok(())
    }

    /// Layers on `board`: groups expanded, disabled layers dropped,
    /// `Edge.Cuts` added when forced, sorted when asked, with colors and
    /// flags.
    #[must_use]
    pub fn resolve_layers(&self, board: &Board, theme: &Theme, force_edge_cuts: bool) -> Vec<PrintLayer> {
        let mut out = Vec::new();
        for options in &self.layers {
            let layers = expand_layer_group(&options.layer, board);
            if layers.is_empty() {
                tracing::warn!(layer = %options.layer, "Layer not enabled in this board, skipping");
            }
            for layer in layers {
                let color = options
                    .color
                    .clone()
                    .or_else(|| theme.layer_color(layer).map(str::to_string))
                    .unwrap_or_else(|| "#000000".to_string());
                let mut flags = PlotFlags::empty();
                flags.set(PlotFlags::REFERENCES, options.plot_footprint_refs);
                flags.set(PlotFlags::VALUES, options.plot_footprint_values);
                flags.set(PlotFlags::INVISIBLE_TEXT, options.force_plot_invisible_refs_vals);
                let suffix = match (&options.suffix, LAYER_GROUPS.contains(&options.layer.as_str())) {
                    (Some(s), false) => s.clone(),
                    _ => layer.suffix(),
                };
                out.push(PrintLayer {
                    layer,
                    suffix,
                    color,
                    flags,
                });
            }
        }
        if force_edge_cuts && !out.iter().any(|l| l.layer == Layer::EdgeCuts) {
            out.push(PrintLayer {
                layer: Layer::EdgeCuts,
                suffix: Layer::EdgeCuts.suffix(),
                color: theme
                    .layer_color(Layer::EdgeCuts)
                    .unwrap_or("#000000")
                    .to_string(),
                flags: PlotFlags::empty(),
            });
        }
        if self.sort_layers {
            out.sort_by_key(|l| std::cmp::Reverse(l.layer.print_priority()));
        }
        out
    }
}

fn expand_layer_group(group: &str, board: &Board) -> Vec<Layer> {
    let user = || (1..=9).map(Layer::User);
    let layers: Vec<Layer> = match group {
        "all" => board
            .copper_layer_list()
            .into_iter()
            .chain(Layer::technical())
            .chain(user())
            .collect(),
        "copper" => board.copper_layer_list(),
        "technical" => Layer::technical().collect(),
        "user" => user().collect(),
        name => Layer::parse(name).into_iter().collect(),
    };
    layers
        .into_iter()
        .filter(|l| board.is_layer_enabled(*l))
        .collect()
}

/// A layer ready to plot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrintLayer {
    /// Board layer.
    pub layer: Layer,
    /// Plot file suffix.
    pub suffix: String,
    /// Color replacing the plotted black.
    pub color: String,
    /// Text flags.
    pub flags: PlotFlags,
}

fn default_color_theme() -> String {
    super::theme::BUILTIN_CLASSIC.to_string()
}

const fn default_png_width() -> u32 {
    1280
}

const fn default_scaling() -> f64 {
    1.0
}

fn default_background() -> String {
    "#FFFFFF".to_string()
}

fn default_filter() -> Vec<String> {
    vec!["_none".to_string()]
}

/// Options of a `pcb_print` output.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrintOptions {
    /// Output file name pattern (`%i` = `assembly`, `%x` = format).
    #[serde(default)]
    pub output: Option<String>,

    /// Board variant to apply.
    #[serde(default)]
    pub variant: String,

    /// Filters marking components as not fitted.
    #[serde(default = "default_filter", deserialize_with = "string_or_list")]
    pub dnf_filter: Vec<String>,

    /// Filters transforming fields before the others.
    #[serde(default = "default_filter", deserialize_with = "string_or_list")]
    pub pre_transform: Vec<String>,

    /// Hide the Fab graphics of excluded components.
    #[serde(default)]
    pub hide_excluded: bool,

    /// Color theme name, `.json` file or built-in.
    #[serde(default = "default_color_theme")]
    pub color_theme: String,

    /// Include the frame and title block.
    #[serde(default = "default_true")]
    pub plot_sheet_reference: bool,

    /// Worksheet file, the project's (or the built-in) when empty.
    #[serde(default)]
    pub sheet_reference_layout: Option<PathBuf>,

    /// How the frame is drawn.
    #[serde(default)]
    pub frame_plot_mechanism: FrameMechanism,

    /// The pages.
    #[serde(default)]
    pub pages: Vec<PageOptions>,

    /// Replaces the sheet title on every page. A leading `+` appends.
    #[serde(default)]
    pub title: String,

    /// Document format.
    #[serde(default)]
    pub format: Format,

    /// Width of the PNG in pixels.
    #[serde(default = "default_png_width")]
    pub png_width: u32,

    /// Plot through hole pads in their own color.
    #[serde(default = "default_true")]
    pub colored_pads: bool,

    /// Color for `colored_pads`.
    #[serde(default)]
    pub pad_color: Option<String>,

    /// Plot vias in their own colors.
    #[serde(default = "default_true")]
    pub colored_vias: bool,

    /// Color for through vias.
    #[serde(default)]
    pub via_color: Option<String>,

    /// Color for micro vias.
    #[serde(default)]
    pub micro_via_color: Option<String>,

    /// Color for blind and buried vias.
    #[serde(default)]
    pub blind_via_color: Option<String>,

    /// Keep the per page and per layer files in the output directory.
    #[serde(default)]
    pub keep_temporal_files: bool,

    /// Add `Edge.Cuts` to every page.
    #[serde(default)]
    pub force_edge_cuts: bool,

    /// Default scale factor, 0 means autoscale.
    #[serde(default = "default_scaling")]
    pub scaling: f64,

    /// Draw the solder mask as a real mask using PcbDraw.
    #[serde(default = "default_true")]
    pub realistic_solder_mask: bool,

    /// Add a background to the pages.
    #[serde(default)]
    pub add_background: bool,

    /// Background color.
    #[serde(default = "default_background")]
    pub background_color: String,

    /// Background SVG image.
    #[serde(default)]
    pub background_image: Option<PathBuf>,

    /// Drill marks on copper layers.
    #[serde(default)]
    pub drill_marks: DrillMarks,
}

impl Default for PrintOptions {
    fn default() -> Self {
        Self {
            output: None,
            variant: String::new(),
            dnf_filter: default_filter(),
            pre_transform: default_filter(),
            hide_excluded: false,
            color_theme: default_color_theme(),
            plot_sheet_reference: true,
            sheet_reference_layout: None,
            frame_plot_mechanism: FrameMechanism::default(),
            pages: Vec::new(),
            title: String::new(),
            format: Format::default(),
            png_width: default_png_width(),
            colored_pads: true,
            pad_color: None,
            colored_vias: true,
            via_color: None,
            micro_via_color: None,
            blind_via_color: None,
            keep_temporal_files: false,
            force_edge_cuts: false,
            scaling: default_scaling(),
            realistic_solder_mask: true,
            add_background: false,
            background_color: default_background(),
            background_image: None,
            drill_marks: DrillMarks::default(),
        }
    }
}

impl PrintOptions {
    /// Checks everything that doesn't need the board.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending option.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pages.is_empty() {
            return Err(ConfigError::validation("missing `pages` list"));
        }
        for (index, page) in self.pages.iter().enumerate() {
            page.validate(index)?;
        }
        for (field, color) in [
            ("pad_color", &self.pad_color),
            ("via_color", &self.via_color),
            ("micro_via_color", &self.micro_via_color),
            ("blind_via_color", &self.blind_via_color),
        ] {
            if let Some(color) = color {
                validate_color(field, color)?;
            }
        }
        if self.scaling < 0.0 {
            return Err(ConfigError::validation("`scaling` can't be negative"));
        }
        if self.png_width == 0 {
            return Err(ConfigError::validation("`png_width` must be positive"));
        }
        if let Some(layout) = &self.sheet_reference_layout {
            if !layout.is_file() {
                return Err(ConfigError::validation(format!(
                    "missing page layout file: {}",
                    layout.display()
                )));
            }
        }
        if self.add_background {
            validate_color("background_color", &self.background_color)?;
            if let Some(image) = &self.background_image {
                check_svg_image(image)?;
            }
        }
        Ok(())
    }

    /// Scale for `page`.
    #[must_use]
    pub fn page_scaling(&self, page: &PageOptions) -> f64 {
        page.scaling.unwrap_or(self.scaling)
    }

    /// Pad color: the option, else the theme.
    #[must_use]
    pub fn pad_color(&self, theme: &Theme) -> String {
        self.pad_color
            .clone()
            .unwrap_or_else(|| theme.pad_through_hole.clone())
    }

    /// Via color by via type code, the option else the theme.
    #[must_use]
    pub fn via_color(&self, via_type: crate::board::ViaType, theme: &Theme) -> String {
        use crate::board::ViaType;
        let (option, fallback) = match via_type {
            ViaType::Through => (&self.via_color, &theme.via_through),
            ViaType::BlindBuried => (&self.blind_via_color, &theme.via_blind_buried),
            ViaType::Micro => (&self.micro_via_color, &theme.via_micro),
        };
        option.clone().unwrap_or_else(|| fallback.clone())
    }
}

fn check_svg_image(path: &Path) -> Result<(), ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.to_path_buf(),
        source: e,
    })?;
    let first = content.lines().next().unwrap_or("").trim_start();
    if first.starts_with("<?xml") || first.starts_with("<!DOCTYPE svg") || first.starts_with("<svg") {
        Ok(())
    } else {
        Err(ConfigError::validation(format!(
            "background image must be an SVG ({})",
            path.display()
        )))
    }
}
