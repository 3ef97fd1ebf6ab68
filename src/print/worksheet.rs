//! `.kicad_wks` worksheet interpreter.
//!
//! Draws the page frame and title block on an [`SvgCanvas`]. Supported
//! items: `setup`, `line`, `rect`, `tbtext`, `polygon` and `bitmap`, with
//! `repeat`/`incrx`/`incry`/`incrlabel`, the four corner anchors and the
//! `page1only`/`notonpage1` options. Texts get `${VAR}` (KiCad 6) and
//! `%X` (KiCad 5) substitutions.
//!
//! Bitmaps are not drawn on the canvas: [`Worksheet::draw`] returns them so
//! the compositor can gray them and add them to the merged page.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

use super::svg::{Anchor, PageImage, SvgCanvas, TextStyle};
use crate::board::Point;

/// The layout used when the project doesn't name one.
pub const DEFAULT_WORKSHEET: &str = include_str!("default.kicad_wks");

const DEFAULT_PPI: f64 = 300.0;

/// Highest `repeat` count honoured.
const MAX_REPEAT: u32 = 1000;

/// Errors while reading a worksheet.
#[derive(Debug, Error)]
pub enum WksError {
    /// The file could not be read.
    #[error("failed to read {path}")]
    Read {
        /// Worksheet path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed s-expression.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// Not a worksheet.
    #[error("not a worksheet, found `{0}`")]
    NotWorksheet(String),

    /// A known item with bad arguments.
    #[error("bad `{item}`: {message}")]
    BadItem {
        /// Item keyword.
        item: String,
        /// What is wrong.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// S-expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Sexp {
    Atom(String),
    List(Vec<Sexp>),
}

impl Sexp {
    fn atom(&self) -> Option<&str> {
        match self {
            Self::Atom(a) => Some(a),
            Self::List(_) => None,
        }
    }

    fn list(&self) -> Option<&[Self]> {
        match self {
            Self::List(l) => Some(l),
            Self::Atom(_) => None,
        }
    }

    /// Keyword of a list (`(line ...)` -> `line`).
    fn head(&self) -> Option<&str> {
        self.list()?.first()?.atom()
    }

    /// Arguments of a list, after the keyword.
    fn args(&self) -> &[Self] {
        self.list().and_then(|l| l.get(1..)).unwrap_or(&[])
    }

    /// Sub lists named `name`.
    fn children<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Self> + 'a {
        self.args().iter().filter(move |s| s.head() == Some(name))
    }

    fn child(&self, name: &str) -> Option<&Self> {
        self.args().iter().find(|s| s.head() == Some(name))
    }

    /// Returns true if an atom `flag` is among the arguments.
    fn has_flag(&self, flag: &str) -> bool {
        self.args().iter().any(|s| s.atom() == Some(flag))
    }

    fn num(&self, i: usize) -> Option<f64> {
        self.args().get(i)?.atom()?.parse().ok()
    }
}

fn parse_sexp(text: &str) -> Result<Sexp, WksError> {
    let mut stack: Vec<Vec<Sexp>> = Vec::new();
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '(' => stack.push(Vec::new()),
            ')' => {
                let list = stack
                    .pop()
                    .ok_or_else(|| WksError::Syntax("unbalanced `)`".to_string()))?;
                let node = Sexp::List(list);
                match stack.last_mut() {
                    Some(parent) => parent.push(node),
                    None => return Ok(node),
                }
            }
            '"' => {
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some('\\') => match chars.next() {
                            Some('n') => s.push('\n'),
                            Some(other) => s.push(other),
                            None => break,
                        },
                        Some('"') => break,
                        Some(other) => s.push(other),
                        None => return Err(WksError::Syntax("unterminated string".to_string())),
                    }
                }
                push_atom(&mut stack, s)?;
            }
            c if c.is_whitespace() => {}
            c => {
                let mut s = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || next == '(' || next == ')' {
                        break;
                    }
                    s.push(next);
                    chars.next();
                }
                push_atom(&mut stack, s)?;
            }
        }
    }
    Err(WksError::Syntax("unexpected end of file".to_string()))
}

fn push_atom(stack: &mut [Vec<Sexp>], atom: String) -> Result<(), WksError> {
    stack
        .last_mut()
        .map(|l| l.push(Sexp::Atom(atom)))
        .ok_or_else(|| WksError::Syntax("atom outside a list".to_string()))
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Corner {
    #[default]
    RightBottom,
    RightTop,
    LeftBottom,
    LeftTop,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Pos {
    x: f64,
    y: f64,
    corner: Corner,
}

impl Pos {
    fn parse(expr: &Sexp, default_corner: Corner) -> Self {
        let corner = match expr.args().get(2).and_then(Sexp::atom) {
            Some("ltcorner") => Corner::LeftTop,
            Some("lbcorner") => Corner::LeftBottom,
            Some("rtcorner") => Corner::RightTop,
            Some("rbcorner") => Corner::RightBottom,
            _ => default_corner,
        };
        Self {
            x: expr.num(0).unwrap_or(0.0),
            y: expr.num(1).unwrap_or(0.0),
            corner,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Visibility {
    #[default]
    All,
    Page1Only,
    NotOnPage1,
}

impl Visibility {
    const fn shows(self, page: u32) -> bool {
        match self {
            Self::All => true,
            Self::Page1Only => page == 1,
            Self::NotOnPage1 => page != 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Shape {
    Line { start: Pos, end: Pos, width: Option<f64> },
    Rect { start: Pos, end: Pos, width: Option<f64> },
    Text {
        text: String,
        pos: Pos,
        size: Option<f64>,
        bold: bool,
        italic: bool,
        anchor: Anchor,
        rotation: f64,
        incr_label: i32,
    },
    Polygon {
        pos: Pos,
        rotation: f64,
        width: Option<f64>,
        points: Vec<Point>,
    },
    Bitmap { pos: Pos, scale: f64, png: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq)]
struct Item {
    shape: Shape,
    repeat: u32,
    incr: Point,
    visibility: Visibility,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Setup {
    text_size: f64,
    line_width: f64,
    left: f64,
    right: f64,
    top: f64,
    bottom: f64,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            text_size: 1.5,
            line_width: 0.15,
            left: 10.0,
            right: 10.0,
            top: 10.0,
            bottom: 10.0,
        }
    }
}

/// A parsed worksheet.
#[derive(Debug, Clone, PartialEq)]
pub struct Worksheet {
    setup: Setup,
    items: Vec<Item>,
}

impl Worksheet {
    /// Parses a worksheet (KiCad 6 `kicad_wks` or KiCad 5 `page_layout`).
    ///
    /// # Errors
    ///
    /// Returns an error for malformed content.
    pub fn parse(text: &str) -> Result<Self, WksError> {
        let root = parse_sexp(text)?;
        match root.head() {
            Some("kicad_wks" | "page_layout") => {}
            other => return Err(WksError::NotWorksheet(other.unwrap_or("").to_string())),
        }
        let mut sheet = Self {
            setup: Setup::default(),
            items: Vec::new(),
        };
        for expr in root.args() {
            match expr.head() {
                Some("setup") => sheet.setup = parse_setup(expr),
                Some(kind @ ("line" | "rect" | "tbtext" | "polygon" | "bitmap")) => {
                    sheet.items.push(parse_item(kind, expr)?);
                }
                _ => {}
            }
        }
        Ok(sheet)
    }

    /// Loads a worksheet file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be read or parsed.
    pub fn load(path: &Path) -> Result<Self, WksError> {
        let text = std::fs::read_to_string(path).map_err(|source| WksError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let sheet = Self::parse(&text)?;
        tracing::debug!(path = %path.display(), items = sheet.items.len(), "Loaded worksheet");
        Ok(sheet)
    }

    /// The built-in layout.
    ///
    /// # Errors
    ///
    /// Never fails for the embedded layout; the result mirrors [`Worksheet::parse`].
    pub fn builtin() -> Result<Self, WksError> {
        Self::parse(DEFAULT_WORKSHEET)
    }

    /// Returns true if the layout has bitmaps.
    #[must_use]
    pub fn has_images(&self) -> bool {
        self.items
            .iter()
            .any(|i| matches!(i.shape, Shape::Bitmap { .. }))
    }

    /// Draws page `page` on `canvas`, returning the bitmaps to place.
    pub fn draw(&self, canvas: &mut SvgCanvas, page: u32, vars: &HashMap<String, String>) -> Vec<PageImage> {
        let area = PageArea {
            width: canvas.width(),
            height: canvas.height(),
            setup: self.setup,
        };
        let mut images = Vec::new();
        for item in self.items.iter().filter(|i| i.visibility.shows(page)) {
            for n in 0..item.repeat.max(1) {
                #[allow(clippy::cast_precision_loss)] // repeat counts are small
                let step = Point::new(item.incr.x * n as f64, item.incr.y * n as f64);
                let at = |p: &Pos| area.place(p, step);
                match &item.shape {
                    Shape::Line { start, end, width } => {
                        let (a, b) = (at(start), at(end));
                        if n > 0 && !(area.contains(a) && area.contains(b)) {
                            break;
                        }
                        canvas.line(a, b, width.unwrap_or(self.setup.line_width));
                    }
                    Shape::Rect { start, end, width } => {
                        let (a, b) = (at(start), at(end));
                        if n > 0 && !(area.contains(a) && area.contains(b)) {
                            break;
                        }
                        canvas.rect(a, b, width.unwrap_or(self.setup.line_width), false);
                    }
                    Shape::Text {
                        text,
                        pos,
                        size,
                        bold,
                        italic,
                        anchor,
                        rotation,
                        incr_label,
                    } => {
                        let p = at(pos);
                        if n > 0 && !area.contains(p) {
                            break;
                        }
                        #[allow(clippy::cast_possible_wrap)] // repeat counts are small
                        let label = increment_label(text, incr_label * n as i32);
                        let style = TextStyle {
                            size: size.unwrap_or(self.setup.text_size),
                            anchor: *anchor,
                            bold: *bold,
                            italic: *italic,
                            rotation: *rotation,
                        };
                        canvas.text(p, &substitute(&label, vars), &style);
                    }
                    Shape::Polygon {
                        pos,
                        rotation,
                        width,
                        points,
                    } => {
                        let origin = at(pos);
                        if n > 0 && !area.contains(origin) {
                            break;
                        }
                        let (sin, cos) = (-rotation.to_radians()).sin_cos();
                        let pts: Vec<Point> = points
                            .iter()
                            .map(|p| {
                                Point::new(origin.x + p.x * cos - p.y * sin, origin.y + p.x * sin + p.y * cos)
                            })
                            .collect();
                        canvas.polygon(&pts, width.unwrap_or(0.0), true);
                    }
                    Shape::Bitmap { pos, scale, png } => {
                        let center = at(pos);
                        if n > 0 && !area.contains(center) {
                            break;
                        }
                        let Some((w, h)) = png_size_mm(png) else {
                            tracing::warn!("Skipping worksheet bitmap with unknown size");
                            break;
                        };
                        let (w, h) = (w * scale, h * scale);
                        images.push(PageImage {
                            pos: Point::new(center.x - w / 2.0, center.y - h / 2.0),
                            width: w,
                            height: h,
                            png: png.clone(),
                        });
                    }
                }
            }
        }
        images
    }
}

struct PageArea {
    width: f64,
    height: f64,
    setup: Setup,
}

impl PageArea {
    fn place(&self, pos: &Pos, step: Point) -> Point {
        let (x, y) = (pos.x + step.x, pos.y + step.y);
        let s = &self.setup;
        match pos.corner {
            Corner::LeftTop => Point::new(s.left + x, s.top + y),
            Corner::LeftBottom => Point::new(s.left + x, self.height - s.bottom - y),
            Corner::RightTop => Point::new(self.width - s.right - x, s.top + y),
            Corner::RightBottom => Point::new(self.width - s.right - x, self.height - s.bottom - y),
        }
    }

    fn contains(&self, p: Point) -> bool {
        const EPS: f64 = 1e-6;
        let s = &self.setup;
        p.x >= s.left - EPS
            && p.x <= self.width - s.right + EPS
            && p.y >= s.top - EPS
            && p.y <= self.height - s.bottom + EPS
    }
}

fn parse_setup(expr: &Sexp) -> Setup {
    let mut setup = Setup::default();
    let value = |name: &str| expr.child(name).and_then(|c| c.num(0));
    if let Some(v) = value("textsize") {
        setup.text_size = v;
    }
    if let Some(v) = value("linewidth") {
        setup.line_width = v;
    }
    for (name, slot) in [
        ("left_margin", &mut setup.left),
        ("right_margin", &mut setup.right),
        ("top_margin", &mut setup.top),
        ("bottom_margin", &mut setup.bottom),
    ] {
        if let Some(v) = value(name) {
            *slot = v;
        }
    }
    setup
}

fn bad(item: &str, message: &str) -> WksError {
    WksError::BadItem {
        item: item.to_string(),
        message: message.to_string(),
    }
}

fn parse_item(kind: &str, expr: &Sexp) -> Result<Item, WksError> {
    let num = |name: &str| expr.child(name).and_then(|c| c.num(0));
    let pos = |name: &str| {
        expr.child(name)
            .map(|c| Pos::parse(c, Corner::RightBottom))
            .ok_or_else(|| bad(kind, &format!("missing `{name}`")))
    };
    let option = expr.child("option");
    let visibility = match option {
        Some(o) if o.has_flag("page1only") => Visibility::Page1Only,
        Some(o) if o.has_flag("notonpage1") => Visibility::NotOnPage1,
        _ => Visibility::All,
    };
    let width = num("linewidth");
    let shape = match kind {
        "line" => Shape::Line {
            start: pos("start")?,
            end: pos("end")?,
            width,
        },
        "rect" => Shape::Rect {
            start: pos("start")?,
            end: pos("end")?,
            width,
        },
        "tbtext" => {
            let text = expr
                .args()
                .first()
                .and_then(Sexp::atom)
                .ok_or_else(|| bad(kind, "missing text"))?
                .to_string();
            let font = expr.child("font");
            let justify = expr.child("justify");
            let anchor = match justify {
                Some(j) if j.has_flag("center") => Anchor::Middle,
                Some(j) if j.has_flag("right") => Anchor::End,
                _ => Anchor::Start,
            };
            #[allow(clippy::cast_possible_truncation)] // small label steps
            let incr_label = num("incrlabel").map_or(1, |v| v as i32);
            Shape::Text {
                text,
                pos: pos("pos")?,
                size: font.and_then(|f| f.child("size")).and_then(|s| s.num(1).or(s.num(0))),
                bold: font.is_some_and(|f| f.has_flag("bold")),
                italic: font.is_some_and(|f| f.has_flag("italic")),
                anchor,
                rotation: num("rotate").unwrap_or(0.0),
                incr_label,
            }
        }
        "polygon" => {
            let points = expr
                .children("pts")
                .flat_map(|pts| pts.children("xy"))
                .map(|xy| Point::new(xy.num(0).unwrap_or(0.0), xy.num(1).unwrap_or(0.0)))
                .collect();
            Shape::Polygon {
                pos: pos("pos")?,
                rotation: num("rotate").unwrap_or(0.0),
                width,
                points,
            }
        }
        _ => {
            let data = expr
                .child("pngdata")
                .ok_or_else(|| bad(kind, "missing `pngdata`"))?;
            let png = decode_png_data(data).map_err(|m| bad(kind, &m))?;
            Shape::Bitmap {
                pos: pos("pos")?,
                scale: num("scale").unwrap_or(1.0),
                png,
            }
        }
    };
    let repeat = match num("repeat") {
        Some(v) if v > f64::from(MAX_REPEAT) => {
            tracing::warn!(kind, repeat = v, max = MAX_REPEAT, "Worksheet repeat count too big, clamped");
            MAX_REPEAT
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // in 1..=MAX_REPEAT
        Some(v) => v.max(1.0) as u32,
        None => 1,
    };
    Ok(Item {
        shape,
        repeat,
        incr: Point::new(num("incrx").unwrap_or(0.0), num("incry").unwrap_or(0.0)),
        visibility,
    })
}

/// Joins the hex bytes of every `(data "..")` line.
fn decode_png_data(expr: &Sexp) -> Result<Vec<u8>, String> {
    expr.children("data")
        .flat_map(|d| d.args().iter().filter_map(Sexp::atom))
        .flat_map(str::split_whitespace)
        .map(|byte| u8::from_str_radix(byte, 16).map_err(|_| format!("bad byte `{byte}`")))
        .collect()
}

/// PNG size in mm from the IHDR chunk and the pHYs density (300 PPI when
/// absent).
fn png_size_mm(png: &[u8]) -> Option<(f64, f64)> {
    const SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";
    if !png.starts_with(SIGNATURE) || png.get(12..16)? != b"IHDR" {
        return None;
    }
    let be = |at: usize| png.get(at..at + 4).and_then(|b| b.try_into().ok()).map(u32::from_be_bytes);
    let (w, h) = (be(16)?, be(20)?);
    let ppi = png
        .windows(4)
        .position(|chunk| chunk == b"pHYs")
        .and_then(|at| {
            let ppu = be(at + 4)?;
            (png.get(at + 12) == Some(&1) && ppu > 0).then(|| f64::from(ppu) * 0.0254)
        })
        .unwrap_or(DEFAULT_PPI);
    Some((f64::from(w) / ppi * 25.4, f64::from(h) / ppi * 25.4))
}

/// Increments a repeated label: numbers are added to, otherwise the last
/// character is advanced.
fn increment_label(text: &str, by: i32) -> String {
    if by == 0 {
        return text.to_string();
    }
    if let Ok(n) = text.parse::<i64>() {
        return (n + i64::from(by)).to_string();
    }
    let mut chars: Vec<char> = text.chars().collect();
    if let Some(last) = chars.last_mut() {
        let code = i64::from(u32::from(*last)) + i64::from(by);
        if let Some(c) = u32::try_from(code).ok().and_then(char::from_u32) {
            *last = c;
        }
    }
    chars.into_iter().collect()
}

static VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("valid variable pattern"));

static LEGACY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%(C[0-8]|[KZYDRSNFPLT])").expect("valid format code pattern"));

/// Replaces `${VAR}` and the KiCad 5 `%X` codes. Unknown names are kept.
#[must_use]
pub fn substitute(text: &str, vars: &HashMap<String, String>) -> String {
    let text = VAR_RE.replace_all(text, |caps: &regex::Captures<'_>| {
        vars.get(&caps[1]).cloned().unwrap_or_else(|| caps[0].to_string())
    });
    LEGACY_RE
        .replace_all(&text, |caps: &regex::Captures<'_>| {
            let code = &caps[1];
            let name = match code {
                "K" => "KICAD_VERSION".to_string(),
                "Z" => "PAPER".to_string(),
                "Y" => "COMPANY".to_string(),
                "D" => "ISSUE_DATE".to_string(),
                "R" => "REVISION".to_string(),
                "S" => "#".to_string(),
                "N" => "##".to_string(),
                "F" => "FILENAME".to_string(),
                "P" => "SHEETNAME".to_string(),
                "L" => "LAYER".to_string(),
                "T" => "TITLE".to_string(),
                comment => {
                    let n: u32 = comment[1..].parse().unwrap_or(0);
                    format!("COMMENT{}", n + 1)
                }
            };
            vars.get(&name).cloned().unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}
