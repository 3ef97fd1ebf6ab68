//! Realistic solder mask: PcbDraw renders the board substrate with the pad
//! and silkscreen openings, we keep just that, paint it in the layer color
//! and put it where the plot of the mask layer was.

use std::path::Path;
use std::process::Command;

use super::plotter::PageTransform;
use super::svg::{hex_to_rgb, Element, SvgDocument};
use super::PrintError;
use crate::board::Board;
use crate::tools::{run, ToolRegistry, PCBDRAW};

/// PcbDraw coordinates per board millimetre (KiCad internal units).
pub const PCBDRAW_UNITS_PER_MM: f64 = 1_000_000.0;

const KEPT_DEFS: [&str; 2] = ["cut-off", "pads-mask-silkscreen"];

/// Replaces `plot_file` by a PcbDraw rendered mask in `color`.
///
/// Boards without a `.kicad_pcb` file and PcbDraw drawings missing the
/// expected elements are skipped with a warning, leaving the regular plot.
///
/// # Errors
///
/// Returns an error if PcbDraw fails or a file can't be read or written.
pub fn realistic_mask(
    tools: &mut ToolRegistry,
    board: &Board,
    plot_file: &Path,
    color: &str,
    transform: &PageTransform,
    work_dir: &Path,
) -> Result<(), PrintError> {
    let Some(pcb) = board.pcb_path() else {
        tracing::warn!(file = %plot_file.display(), "No board file for PcbDraw, using a plain mask");
        return Ok(());
    };
    let exe = tools.ensure(&PCBDRAW)?;
    let stem = plot_file
        .file_stem()
        .map_or_else(|| "mask".into(), |s| s.to_string_lossy().into_owned());
    let drawing_file = work_dir.join(format!("{stem}-pcbdraw.svg"));
    let mut cmd = Command::new(exe);
    cmd.args(["--no-warn-back", "-f", ""]);
    if transform.mirror() {
        cmd.arg("-b");
    }
    cmd.arg(&pcb).arg(&drawing_file);
    run(PCBDRAW.command, &mut cmd)?;

    let mut drawing = SvgDocument::load(&drawing_file)?;
    let plot = SvgDocument::load(plot_file)?;
    let (plot_width, _) = plot.size().map_err(|e| PrintError::svg(plot_file, e))?;
    let unit = plot_width / board.paper.width;
    let board_transform = format!(
        "{} scale({})",
        transform.svg_matrix(unit),
        1.0 / PCBDRAW_UNITS_PER_MM
    );
    if !restyle(&mut drawing, color, &board_transform) {
        tracing::warn!(file = %drawing_file.display(), "Failed to extract elements from the PcbDraw SVG");
        return Ok(());
    }
    for name in ["width", "height", "viewBox"] {
        if let Some(value) = plot.root.attr(name) {
            drawing.root.set_attr(name, value);
        }
    }
    tracing::debug!(file = %plot_file.display(), "Using realistic solder mask");
    drawing.save(plot_file)
}

fn is_mask_group(e: &Element) -> bool {
    e.attr("clip-path") == Some("url(#cut-off)") && e.attr("mask") == Some("url(#hole-mask)")
}

/// Keeps the substrate with the mask openings. Returns false when the
/// drawing lacks the definitions or the board container.
fn restyle(drawing: &mut SvgDocument, color: &str, transform: &str) -> bool {
    let (_, alpha) = hex_to_rgb(color);
    let fill = color.get(..7).unwrap_or(color);
    let style = format!("fill:{fill}; fill-opacity:{alpha}; stroke:{fill};");
    let (mut defs, mut container) = (false, false);
    for e in drawing.root.elements_mut() {
        if e.local_name() == "defs" {
            e.retain_elements(|d| d.attr("id").is_some_and(|id| KEPT_DEFS.contains(&id)));
            defs = true;
        } else if e.local_name() == "g" && e.attr("id") == Some("boardContainer") {
            e.set_attr("transform", transform);
            let Some(group) = e.elements_mut().find(|g| is_mask_group(g)) else {
                continue;
            };
            group.set_attr("mask", "url(#pads-mask-silkscreen)");
            group.retain_elements(|s| s.attr("id") == Some("substrate-board"));
            for substrate in group.elements_mut() {
                substrate.set_attr("style", style.clone());
            }
            container = true;
        }
    }
    defs && container
}

#[cfg(test)]
mod tests {
    use super::*;

    const DRAWING: &str = r##"<?xml version="1.0"?>
<svg xmlns="http://www.w3.org/2000/svg" width="60mm" height="40mm" viewBox="0 0 60000000 40000000">
<defs><g id="cut-off"/><mask id="hole-mask"/><mask id="pads-mask-silkscreen"/><g id="other"/></defs>
<g id="boardContainer" transform="scale(-1,1)">
  <g clip-path="url(#cut-off)" mask="url(#hole-mask)">
    <g id="substrate-board" style="fill:#1c5e0f"/>
    <g id="substrate-copper"/>
  </g>
  <g id="silk"/>
</g>
</svg>"##;

    #[test]
    fn keeps_the_substrate_only() {
        let mut doc = SvgDocument::parse(DRAWING).unwrap();
        assert!(restyle(&mut doc, "#14332440", "matrix(1,0,0,1,0,0)"));
        let out = doc.to_svg_string();
        assert!(out.contains("id=\"cut-off\""));
        assert!(out.contains("id=\"pads-mask-silkscreen\""));
        assert!(!out.contains("id=\"hole-mask\""));
        assert!(!out.contains("id=\"other\""));
        assert!(!out.contains("substrate-copper"));
        assert!(out.contains("mask=\"url(#pads-mask-silkscreen)\""));
        assert!(out.contains("transform=\"matrix(1,0,0,1,0,0)\""));
        assert!(out.contains("style=\"fill:#143324; fill-opacity:0.25"));
        // the rest of the container stays
        assert!(out.contains("id=\"silk\""));
    }

    #[test]
    fn missing_elements_are_reported() {
        let mut doc = SvgDocument::parse("<svg><defs/></svg>").unwrap();
        assert!(!restyle(&mut doc, "#000000", "none"));
    }

    #[test]
    fn skipped_without_board_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("b-F_Mask.svg");
        std::fs::write(&file, "<svg viewBox=\"0 0 1 1\"/>").unwrap();
        let board = Board::default();
        let t = PageTransform::identity(&board.paper);
        realistic_mask(&mut ToolRegistry::default(), &board, &file, "#ff000080", &t, dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&file).unwrap(), "<svg viewBox=\"0 0 1 1\"/>");
    }
}
