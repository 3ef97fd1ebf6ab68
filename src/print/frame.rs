//! Page frame and title block.
//!
//! Three ways to get it: the built-in worksheet interpreter (`internal`),
//! KiAuto driving the GUI (`gui`) or the plotter's own frame (`plot`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::svg::{PageImage, SvgCanvas, SvgDocument};
use super::worksheet::Worksheet;
use super::PrintError;
use crate::board::{Board, Layer, TITLE_BLOCK_COMMENTS};
use crate::tools::{exec_with_retry, ToolError, ToolRegistry, Version, KIAUTO};

/// KiAuto release able to plot the frame alone.
pub const KIAUTO_FRAME_VERSION: Version = Version(1, 6, 7);

/// Values for the worksheet text variables.
#[must_use]
pub fn title_block_vars(
    board: &Board,
    sheet: &str,
    page: usize,
    pages: usize,
    layers: &[Layer],
) -> HashMap<String, String> {
    let tb = &board.title_block;
    let mut vars: HashMap<String, String> = [
        ("KICAD_VERSION", format!("kiprint v{}", env!("CARGO_PKG_VERSION"))),
        ("#", page.to_string()),
        ("##", pages.to_string()),
        ("COMPANY", tb.company.clone()),
        ("ISSUE_DATE", tb.date.clone()),
        ("REVISION", tb.revision.clone()),
        ("TITLE", tb.title.clone()),
        ("FILENAME", format!("{}.kicad_pcb", board.file_stem())),
        ("SHEETNAME", sheet.to_string()),
        (
            "LAYER",
            layers.iter().map(|l| l.name()).collect::<Vec<_>>().join("+"),
        ),
        ("PAPER", board.paper.name.clone()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect();
    for n in 1..=TITLE_BLOCK_COMMENTS {
        vars.insert(format!("COMMENT{n}"), tb.comment(n).to_string());
    }
    vars
}

/// Worksheet named by the KiCad project next to the board, if any.
#[must_use]
pub fn project_layout(board: &Board) -> Option<PathBuf> {
    let pro = board.pcb_path()?.with_extension("kicad_pro");
    let text = std::fs::read_to_string(&pro).ok()?;
    let json: serde_json::Value = match serde_json::from_str(&text) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(file = %pro.display(), error = %e, "Unable to parse the project file");
            return None;
        }
    };
    let name = json
        .pointer("/pcbnew/page_layout_descr_file")
        .and_then(serde_json::Value::as_str)
        .filter(|s| !s.is_empty())?;
    let pro_dir = pro.parent().unwrap_or_else(|| Path::new("."));
    let name = name.replace("${KIPRJMOD}", &pro_dir.to_string_lossy());
    let path = pro_dir.join(name);
    if path.is_file() {
        tracing::debug!(layout = %path.display(), "Using the project worksheet");
        Some(path)
    } else {
        tracing::warn!(layout = %path.display(), "Missing page layout file, using the default");
        None
    }
}

/// Loads `layout`, the project's layout, or the built-in one.
///
/// # Errors
///
/// Returns an error if the layout can't be read or parsed.
pub fn load_worksheet(board: &Board, layout: Option<&Path>) -> Result<Worksheet, PrintError> {
    match layout.map(Path::to_path_buf).or_else(|| project_layout(board)) {
        Some(path) => Worksheet::load(&path).map_err(|e| PrintError::worksheet(&path, e)),
        None => Worksheet::builtin().map_err(|e| PrintError::worksheet(Path::new("<builtin>"), e)),
    }
}

/// Draws the frame with the worksheet interpreter. Returns the bitmaps the
/// merge step must add.
///
/// # Errors
///
/// Returns an error if the file can't be written.
pub fn plot_internal(
    worksheet: &Worksheet,
    board: &Board,
    vars: &HashMap<String, String>,
    page: usize,
    output: &Path,
) -> Result<Vec<PageImage>, PrintError> {
    let mut canvas = SvgCanvas::new(board.paper.width, board.paper.height);
    let page = u32::try_from(page).unwrap_or(u32::MAX);
    let images = worksheet.draw(&mut canvas, page, vars);
    std::fs::write(output, canvas.finish(&board.title_block.title)).map_err(|e| PrintError::io(output, e))?;
    Ok(images)
}

/// Plots the frame using KiAuto, then drops its white background.
///
/// KiAuto works on the `.kicad_pcb` file, so the frame comes with that
/// file's `Edge.Cuts`.
///
/// # Errors
///
/// Returns [`PrintError::NoPcbFile`] for a snapshot without a board file,
/// a tool error if KiAuto fails.
pub fn plot_gui(tools: &mut ToolRegistry, board: &Board, output: &Path) -> Result<(), PrintError> {
    let pcb = board.pcb_path().ok_or(PrintError::NoPcbFile { purpose: "GUI frame" })?;
    let exe = tools.ensure_version(&KIAUTO, KIAUTO_FRAME_VERSION)?;
    let dir = output.parent().unwrap_or_else(|| Path::new("."));
    let code = exec_with_retry(
        KIAUTO.command,
        || {
            let mut cmd = Command::new(&exe);
            cmd.arg("export")
                .arg("--output_name")
                .arg(output)
                .args(["--monochrome", "--svg", "--pads", "0"])
                .arg(&pcb)
                .arg(dir)
                .arg(Layer::EdgeCuts.name());
            cmd
        },
        tools.retries(),
    )?;
    if code != 0 {
        return Err(ToolError::Failed {
            tool: KIAUTO.command.to_string(),
            code,
            output: String::new(),
        }
        .into());
    }
    patch_gui_svg(output, board.paper.portrait)
}

fn is_white_background(e: &super::svg::Element) -> bool {
    if e.local_name() != "rect" || e.attr("x") != Some("0") || e.attr("y") != Some("0") {
        return false;
    }
    let white = |s: &str| {
        let s = s.to_ascii_uppercase().replace(' ', "");
        s.contains("FILL:#FFFFFF") || s == "#FFFFFF"
    };
    e.attr("style").is_some_and(white) || e.attr("fill").is_some_and(white)
}

fn remove_background(e: &mut super::svg::Element) {
    e.retain_elements(|c| !is_white_background(c));
    for child in e.elements_mut() {
        remove_background(child);
    }
}

/// Removes the page background from a GUI plot and, for portrait
/// pages, swaps the page size KiCad writes landscape.
///
/// # Errors
///
/// Returns an error if the file can't be read, parsed or written.
pub fn patch_gui_svg(path: &Path, portrait: bool) -> Result<(), PrintError> {
    let mut doc = SvgDocument::load(path)?;
    remove_background(&mut doc.root);
    if portrait {
        let root = &mut doc.root;
        let width = root.attr("width").map(str::to_string);
        let height = root.attr("height").map(str::to_string);
        if let (Some(w), Some(h)) = (width, height) {
            root.set_attr("width", h);
            root.set_attr("height", w);
        }
        let view_box = root.attr("viewBox").map(|v| v.split_whitespace().map(str::to_string).collect::<Vec<_>>());
        if let Some([x, y, w, h]) = view_box.as_deref() {
            root.set_attr("viewBox", format!("{x} {y} {h} {w}"));
        }
    }
    doc.save(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variables() {
        let mut board = Board::default();
        board.path = PathBuf::from("/work/demo.json");
        board.pcb_file = Some(PathBuf::from("demo.kicad_pcb"));
        board.title_block.title = "Demo".into();
        board.title_block.comments = vec!["first".into(), String::new(), "third".into()];
        let vars = title_block_vars(&board, "Top", 2, 3, &[Layer::FCu, Layer::EdgeCuts]);
        assert_eq!(vars["#"], "2");
        assert_eq!(vars["##"], "3");
        assert_eq!(vars["TITLE"], "Demo");
        assert_eq!(vars["FILENAME"], "demo.kicad_pcb");
        assert_eq!(vars["SHEETNAME"], "Top");
        assert_eq!(vars["LAYER"], "F.Cu+Edge.Cuts");
        assert_eq!(vars["PAPER"], "A4");
        assert_eq!(vars["COMMENT1"], "first");
        assert_eq!(vars["COMMENT3"], "third");
        assert_eq!(vars["COMMENT9"], "");
        assert!(vars["KICAD_VERSION"].starts_with("kiprint v"));
    }

    #[test]
    fn layout_from_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("my.kicad_wks"), "(kicad_wks (line (start 0 0) (end 1 1)))").unwrap();
        std::fs::write(
            dir.path().join("demo.kicad_pro"),
            r#"{"pcbnew": {"page_layout_descr_file": "${KIPRJMOD}/my.kicad_wks"}}"#,
        )
        .unwrap();
        let mut board = Board::default();
        board.path = dir.path().join("demo.json");
        board.pcb_file = Some(PathBuf::from("demo.kicad_pcb"));
        let layout = project_layout(&board).unwrap();
        assert!(layout.ends_with("my.kicad_wks"));
        assert!(load_worksheet(&board, None).is_ok());

        board.pcb_file = None;
        assert!(project_layout(&board).is_none());
        assert!(load_worksheet(&board, Some(&dir.path().join("missing.kicad_wks"))).is_err());
    }

    #[test]
    fn gui_patch() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("frame.svg");
        std::fs::write(
            &file,
            r##"<svg xmlns="http://www.w3.org/2000/svg" width="297mm" height="210mm" viewBox="0 0 2970 2100">
<rect x="0" y="0" width="2970" height="2100" style="fill:#FFFFFF; fill-opacity:1.0;stroke:#FFFFFF;"/>
<g><rect x="0" y="0" width="10" height="10" fill="#ffffff"/><path d="M0 0"/></g>
<rect x="0" y="0" width="5" height="5" style="fill:#000000"/>
</svg>"##,
        )
        .unwrap();
        patch_gui_svg(&file, true).unwrap();
        let out = std::fs::read_to_string(&file).unwrap();
        assert_eq!(out.matches("<rect").count(), 1);
        assert!(out.contains("<path"));
        assert!(out.contains("width=\"210mm\""));
        assert!(out.contains("viewBox=\"0 0 2100 2970\""));
    }

    #[test]
    fn gui_frame_needs_the_board_file() {
        let mut tools = ToolRegistry::default();
        let dir = tempfile::tempdir().unwrap();
        let err = plot_gui(&mut tools, &Board::default(), &dir.path().join("f.svg")).unwrap_err();
        assert!(matches!(err, PrintError::NoPcbFile { .. }));
    }
}
