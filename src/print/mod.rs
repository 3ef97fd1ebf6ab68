//! Multi-page print compositor.
//!
//! For every page: pick the layers, set the page title, plot each layer
//! (plus the pad and via isolation passes on copper) through a
//! [`Plotter`], replace the mask layers by a realistic mask, draw the
//! frame, then stack everything into one colored SVG. The pages are then
//! converted to the requested format.
//!
//! Every external tool the job needs is checked before the first file is
//! plotted.

pub mod convert;
pub mod frame;
pub mod mask;
pub mod options;
pub mod plotter;
pub mod svg;
pub mod theme;
pub mod worksheet;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::board::{Board, Layer, ViaType};
use crate::mutation::{self, MutationError, MutationOptions};
use crate::tools::{ToolError, ToolRegistry, GHOSTSCRIPT, IMAGEMAGICK, PCBDRAW, RSVG_CONVERT};

pub use options::{DrillMarks, Format, FrameMechanism, LayerOptions, PageOptions, PlotFlags, PrintLayer, PrintOptions};
pub use plotter::{LayerJob, PageTransform, PlotContent, Plotter, SvgPlotter};
pub use svg::SvgError;
pub use theme::Theme;
pub use worksheet::{WksError, Worksheet};

use svg::{Background, ColorStyle, PageImage, PlotFile};

/// Errors raised while producing a print.
#[derive(Debug, Error)]
pub enum PrintError {
    /// An external tool is missing or failed.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// A file could not be read or written.
    #[error("I/O error on {path}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An SVG file could not be understood.
    #[error("invalid SVG file {path}")]
    Svg {
        /// The file.
        path: PathBuf,
        /// What is wrong.
        #[source]
        source: SvgError,
    },

    /// The page layout could not be used.
    #[error("invalid page layout {path}")]
    Worksheet {
        /// The layout file.
        path: PathBuf,
        /// What is wrong.
        #[source]
        source: WksError,
    },

    /// The page title could not be set or restored.
    #[error(transparent)]
    Mutation(#[from] MutationError),

    /// Nothing to plot on a page.
    #[error("page {page} has no layers to plot")]
    NoLayers {
        /// Page number (1 based).
        page: usize,
    },

    /// A feature needs the `.kicad_pcb` file and the snapshot has none.
    #[error("the {purpose} needs the board's .kicad_pcb file")]
    NoPcbFile {
        /// What needed it.
        purpose: &'static str,
    },

    /// Wrong number of output files for the format.
    #[error("expected {expected} output files, got {found}")]
    Targets {
        /// Files needed.
        expected: usize,
        /// Files given.
        found: usize,
    },
}

impl PrintError {
    /// Creates an I/O error.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates an SVG error.
    pub fn svg(path: impl AsRef<Path>, source: SvgError) -> Self {
        Self::Svg {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Creates a worksheet error.
    pub fn worksheet(path: impl AsRef<Path>, source: WksError) -> Self {
        Self::Worksheet {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// One print request.
#[derive(Debug, Clone, Copy)]
pub struct PrintJob<'a> {
    /// The options.
    pub options: &'a PrintOptions,
    /// Colors for layers without their own.
    pub theme: &'a Theme,
    /// Output files: one per page for SVG, PNG and EPS, one otherwise.
    pub targets: &'a [PathBuf],
    /// Title to set on each page, already expanded. Empty keeps the board
    /// title, a leading `+` appends.
    pub titles: &'a [String],
}

impl PrintJob<'_> {
    fn title(&self, page: usize) -> &str {
        self.titles.get(page).map_or("", String::as_str)
    }
}

/// Checks every tool the job will need.
fn check_tools(
    job: &PrintJob<'_>,
    board: &Board,
    worksheet: Option<&Worksheet>,
    tools: &mut ToolRegistry,
) -> Result<(), PrintError> {
    let options = job.options;
    match options.format {
        Format::Svg => {}
        Format::Eps => {
            tools.ensure_version(&RSVG_CONVERT, convert::RSVG_EPS_VERSION)?;
        }
        Format::Ps => {
            tools.ensure(&RSVG_CONVERT)?;
            tools.ensure(&GHOSTSCRIPT)?;
        }
        Format::Pdf | Format::Png => {
            tools.ensure(&RSVG_CONVERT)?;
        }
    }
    if options.realistic_solder_mask && board.pcb_file.is_some() {
        let has_mask = options.pages.iter().any(|p| {
            p.resolve_layers(board, job.theme, false)
                .iter()
                .any(|l| matches!(l.layer, Layer::FMask | Layer::BMask))
        });
        if has_mask {
            tools.ensure(&PCBDRAW)?;
        }
    }
    if options.plot_sheet_reference {
        match options.frame_plot_mechanism {
            FrameMechanism::Gui => {
                tools.ensure_version(&crate::tools::KIAUTO, frame::KIAUTO_FRAME_VERSION)?;
            }
            FrameMechanism::Internal => {
                let gray = options.pages.iter().any(|p| p.monochrome);
                if gray && worksheet.is_some_and(Worksheet::has_images) {
                    tools.ensure(&IMAGEMAGICK)?;
                }
            }
            FrameMechanism::Plot => {}
        }
    }
    Ok(())
}

/// Produces the document.
///
/// The board is changed while each page is plotted (title) and restored
/// before returning, also on errors.
///
/// # Errors
///
/// Returns [`PrintError::Tool`] for a missing or failing tool (checked
/// before anything is plotted) and other variants for I/O, SVG and layout
/// problems.
pub fn generate(
    board: &mut Board,
    job: &PrintJob<'_>,
    tools: &mut ToolRegistry,
    plotter: &mut dyn Plotter,
) -> Result<(), PrintError> {
    let options = job.options;
    let expected = if options.format.file_per_page() {
        options.pages.len().max(1)
    } else {
        1
    };
    if job.targets.len() != expected {
        return Err(PrintError::Targets {
            expected,
            found: job.targets.len(),
        });
    }
    let worksheet = if options.plot_sheet_reference && options.frame_plot_mechanism == FrameMechanism::Internal {
        Some(frame::load_worksheet(board, options.sheet_reference_layout.as_deref())?)
    } else {
        None
    };
    check_tools(job, board, worksheet.as_ref(), tools)?;

    let output_dir = job.targets[0]
        .parent()
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    std::fs::create_dir_all(&output_dir).map_err(|e| PrintError::io(&output_dir, e))?;
    let temp = if options.keep_temporal_files {
        None
    } else {
        Some(
            tempfile::Builder::new()
                .prefix("tmp-kiprint-pcb_print-")
                .tempdir()
                .map_err(|e| PrintError::io(std::env::temp_dir(), e))?,
        )
    };
    let work_dir = temp.as_ref().map_or(output_dir.as_path(), tempfile::TempDir::path);

    let mut pages = Vec::with_capacity(options.pages.len());
    for (index, page) in options.pages.iter().enumerate() {
        let dir = work_dir.join(format!("{:02}", index + 1));
        std::fs::create_dir_all(&dir).map_err(|e| PrintError::io(&dir, e))?;
        let ctx = PageContext {
            job,
            page,
            index,
            dir: &dir,
            worksheet: worksheet.as_ref(),
        };
        let set = mutation::apply(board, &[], None, &MutationOptions::title_only(job.title(index)))?;
        let result = ctx.render(board, tools, plotter);
        let restored = set.restore(board);
        pages.push(result?);
        restored?;
    }
    write_document(options, &pages, job.targets, work_dir, tools)
}

fn write_document(
    options: &PrintOptions,
    pages: &[PathBuf],
    targets: &[PathBuf],
    work_dir: &Path,
    tools: &mut ToolRegistry,
) -> Result<(), PrintError> {
    match options.format {
        Format::Svg => {
            for (page, target) in pages.iter().zip(targets) {
                std::fs::copy(page, target).map_err(|e| PrintError::io(target, e))?;
            }
        }
        Format::Png => {
            for (page, target) in pages.iter().zip(targets) {
                convert::svg_to_png(tools, page, target, options.png_width)?;
            }
        }
        Format::Eps => {
            for (page, target) in pages.iter().zip(targets) {
                convert::svg_to_eps(tools, page, target)?;
            }
        }
        Format::Pdf => convert::svg_to_pdf(tools, pages, &targets[0])?,
        Format::Ps => {
            let pdf = work_dir.join("print.pdf");
            convert::svg_to_pdf(tools, pages, &pdf)?;
            convert::pdf_to_ps(tools, &pdf, &targets[0])?;
        }
    }
    for target in targets {
        tracing::info!(file = %target.display(), "Created");
    }
    Ok(())
}

struct PageContext<'a> {
    job: &'a PrintJob<'a>,
    page: &'a PageOptions,
    index: usize,
    dir: &'a Path,
    worksheet: Option<&'a Worksheet>,
}

impl PageContext<'_> {
    fn render(&self, board: &Board, tools: &mut ToolRegistry, plotter: &mut dyn Plotter) -> Result<PathBuf, PrintError> {
        let options = self.job.options;
        let theme = self.job.theme;
        let page = self.page;
        let number = self.index + 1;
        let layers = page.resolve_layers(board, theme, options.force_edge_cuts);
        if layers.is_empty() {
            return Err(PrintError::NoLayers { page: number });
        }
        let transform = PageTransform::new(
            &board.paper,
            options.page_scaling(page),
            page.mirror,
            board.bounding_box(),
        );
        tracing::info!(page = number, layers = layers.len(), scale = transform.scale(), "Printing page");

        let mut common = PlotFlags::empty();
        common.set(PlotFlags::MIRROR, page.mirror);
        common.set(PlotFlags::NEGATIVE, page.negative_plot);
        common.set(PlotFlags::VIAS_ON_MASK, !page.tent_vias);
        let base = board.file_stem();
        let title = board.title_block.title.as_str();
        let mut files = Vec::new();
        for layer in &layers {
            let mut plot = |suffix: &str, content: PlotContent, color: String| -> Result<PathBuf, PrintError> {
                let path = self.dir.join(format!("{base}-{suffix}.svg"));
                let job = LayerJob {
                    layer: layer.layer,
                    content,
                    flags: layer.flags | common,
                    transform,
                    drill_marks: options.drill_marks,
                    line_width: page.line_width,
                    title,
                };
                plotter.plot_layer(board, &job, &path)?;
                files.push(PlotFile {
                    path: path.clone(),
                    color,
                });
                Ok(path)
            };
            let path = plot(&layer.suffix, PlotContent::Layer, layer.color.clone())?;
            if options.realistic_solder_mask && matches!(layer.layer, Layer::FMask | Layer::BMask) {
                mask::realistic_mask(tools, board, &path, &layer.color, &transform, self.dir)?;
            }
            if layer.layer.is_copper() {
                if options.colored_pads {
                    plot(
                        &format!("{}_pads", layer.suffix),
                        PlotContent::ThroughHolePads,
                        options.pad_color(theme),
                    )?;
                }
                if options.colored_vias {
                    for via_type in ViaType::ALL {
                        plot(
                            &format!("{}_vias_{}", layer.suffix, via_type.code()),
                            PlotContent::Vias(via_type),
                            options.via_color(via_type, theme),
                        )?;
                    }
                }
            }
        }

        let mut images = Vec::new();
        if options.plot_sheet_reference {
            let path = self.dir.join(format!("{base}-frame.svg"));
            match options.frame_plot_mechanism {
                FrameMechanism::Internal => {
                    if let Some(worksheet) = self.worksheet {
                        let names: Vec<Layer> = layers.iter().map(|l| l.layer).collect();
                        let vars = frame::title_block_vars(board, &page.sheet, number, options.pages.len(), &names);
                        images = frame::plot_internal(worksheet, board, &vars, number, &path)?;
                        if page.monochrome {
                            images = self.gray_images(images, tools)?;
                        }
                    }
                }
                FrameMechanism::Gui => frame::plot_gui(tools, board, &path)?,
                FrameMechanism::Plot => plotter.plot_frame(board, &page.sheet, &path)?,
            }
            let color = page
                .sheet_reference_color
                .clone()
                .unwrap_or_else(|| theme.pcb_frame.clone());
            files.push(PlotFile { path, color });
        }

        let style = ColorStyle {
            colored_holes: page.colored_holes,
            holes_color: page.holes_color.clone(),
            monochrome: page.monochrome,
        };
        let background = options.add_background.then(|| Background {
            color: options.background_color.clone(),
            image: options.background_image.clone(),
        });
        let merged = svg::merge(&files, &style, background.as_ref(), &images, board.paper.width)?;
        let out = self.dir.join(format!("{base}-assembly_page_{number:02}.svg"));
        merged.save(&out)?;
        tracing::debug!(file = %out.display(), "Page merged");
        Ok(out)
    }

    fn gray_images(&self, images: Vec<PageImage>, tools: &mut ToolRegistry) -> Result<Vec<PageImage>, PrintError> {
        images
            .into_iter()
            .enumerate()
            .map(|(n, image)| {
                let png = convert::gray_png(tools, &image.png, self.dir, &format!("image_{n}"))?;
                Ok(PageImage { png, ..image })
            })
            .collect()
    }
}
