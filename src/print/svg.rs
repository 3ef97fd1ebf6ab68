//! SVG handling for the compositor: color substitution, a small element
//! tree used to merge layer files, and the canvas the built-in plotter and
//! the worksheet interpreter draw on.
//!
//! Layer files are plotted in black (`#000000`) with white holes
//! (`#FFFFFF`); [`colorize`] turns them into the layer color before the
//! files are stacked by [`merge`].

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::Engine as _;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use regex::Regex;
use thiserror::Error;

use super::PrintError;
use crate::board::Point;

/// viewBox units per millimetre in the files we write.
pub const UNITS_PER_MM: f64 = 1000.0;

const HOLE_PLACEHOLDER: &str = "**black_hole**";

/// Malformed SVG content.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct SvgError(String);

// ---------------------------------------------------------------------------
// Colors
// ---------------------------------------------------------------------------

/// Splits `#RRGGBB[AA]` into 0..1 components and alpha.
#[must_use]
pub fn hex_to_rgb(color: &str) -> ([f64; 3], f64) {
    let hex = color.trim_start_matches('#');
    let byte = |i: usize| {
        hex.get(i..i + 2)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .map_or(0.0, |v| f64::from(v) / 255.0)
    };
    let alpha = if hex.len() == 8 { byte(6) } else { 1.0 };
    ([byte(0), byte(2), byte(4)], alpha)
}

/// Luminance average gray of a color, as `#GGGGGG`. Alpha is dropped.
#[must_use]
pub fn to_gray_hex(color: &str) -> String {
    let (rgb, _) = hex_to_rgb(color);
    let avg = (rgb[0] + rgb[1] + rgb[2]) / 3.0;
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)] // 0..=255
    let level = (avg * 255.0) as u8;
    format!("#{level:02X}{level:02X}{level:02X}")
}

/// How a plotted layer file is recolored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorStyle {
    /// Repaint the white holes.
    pub colored_holes: bool,
    /// Color for the holes.
    pub holes_color: String,
    /// Convert everything to gray.
    pub monochrome: bool,
}

/// Replaces the plotted black with `color` (alpha dropped) and, when
/// enabled, the white holes with the holes color.
#[must_use]
pub fn colorize(content: &str, color: &str, style: &ColorStyle) -> String {
    let mut color = color.get(..7).unwrap_or(color).to_string();
    let mut holes = style
        .holes_color
        .get(..7)
        .unwrap_or(&style.holes_color)
        .to_string();
    if style.monochrome {
        color = to_gray_hex(&color);
        holes = to_gray_hex(&holes);
    }
    let mut content = content.to_string();
    if style.colored_holes {
        content = content.replace("#FFFFFF", HOLE_PLACEHOLDER);
    }
    if color != "#000000" {
        content = content
            .replace("#000000", &color)
            .replace("stroke:rgb(0%,0%,0%)", &format!("stroke:{color}"));
    }
    if style.colored_holes {
        content = content.replace(HOLE_PLACEHOLDER, &holes);
    }
    content
}

// ---------------------------------------------------------------------------
// Element tree
// ---------------------------------------------------------------------------

/// A node of the element tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// An element.
    Element(Element),
    /// Raw text, comments and CDATA, kept verbatim.
    Text(String),
}

/// An XML element. Attribute values are stored decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Element {
    /// Tag name, with its prefix if any.
    pub name: String,
    /// Attributes in file order.
    pub attrs: Vec<(String, String)>,
    /// Children.
    pub children: Vec<Node>,
}

impl Element {
    /// Creates an element without attributes.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Builder style attribute setter.
    #[must_use]
    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Tag name without namespace prefix.
    #[must_use]
    pub fn local_name(&self) -> &str {
        self.name.rsplit(':').next().unwrap_or(&self.name)
    }

    /// Attribute value.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Sets (or adds) an attribute.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    /// Child elements.
    pub fn elements(&self) -> impl Iterator<Item = &Self> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Child elements, mutably.
    pub fn elements_mut(&mut self) -> impl Iterator<Item = &mut Self> {
        self.children.iter_mut().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            Node::Text(_) => None,
        })
    }

    /// Keeps only the child elements for which `keep` returns true.
    pub fn retain_elements(&mut self, mut keep: impl FnMut(&Self) -> bool) {
        self.children.retain(|n| match n {
            Node::Element(e) => keep(e),
            Node::Text(_) => true,
        });
    }

    fn write(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (k, v) in &self.attrs {
            let _ = write!(out, " {k}=\"{}\"", escape(v));
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                Node::Element(e) => e.write(out),
                Node::Text(t) => out.push_str(t),
            }
        }
        let _ = write!(out, "</{}>", self.name);
    }
}

/// A parsed SVG file.
#[derive(Debug, Clone, PartialEq)]
pub struct SvgDocument {
    prolog: String,
    /// The `<svg>` element.
    pub root: Element,
}

impl SvgDocument {
    /// Parses an SVG file content.
    ///
    /// Attribute values are decoded, including entities declared in the
    /// DOCTYPE internal subset. Text, comments and CDATA are kept verbatim.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed XML (unbalanced tags, unquoted
    /// attribute values, unknown entities) or a root that isn't `<svg>`.
    pub fn parse(text: &str) -> Result<Self, SvgError> {
        let mut reader = Reader::from_str(text);
        let mut prolog = String::new();
        let mut entities: HashMap<String, String> = HashMap::new();
        let mut stack: Vec<Element> = Vec::new();
        let mut root = None;
        loop {
            let event = reader
                .read_event()
                .map_err(|e| SvgError(format!("at byte {}: {e}", reader.buffer_position())))?;
            let raw = match event {
                Event::Start(tag) => {
                    stack.push(element(&tag, &entities)?);
                    continue;
                }
                Event::Empty(tag) => {
                    close(&mut stack, &mut root, element(&tag, &entities)?)?;
                    continue;
                }
                Event::End(tag) => {
                    // The reader already matched the names
                    let element = stack.pop().ok_or_else(|| {
                        SvgError(format!("unexpected </{}>", String::from_utf8_lossy(tag.name().as_ref())))
                    })?;
                    close(&mut stack, &mut root, element)?;
                    continue;
                }
                Event::Text(t) => {
                    push_text(&mut stack, &String::from_utf8_lossy(&t));
                    continue;
                }
                Event::CData(t) => format!("<![CDATA[{}]]>", String::from_utf8_lossy(&t)),
                Event::Comment(t) => format!("<!--{}-->", String::from_utf8_lossy(&t)),
                Event::Decl(d) => format!("<?{}?>", String::from_utf8_lossy(&d)),
                Event::PI(p) => format!("<?{}?>", String::from_utf8_lossy(&p)),
                Event::DocType(t) => {
                    let content = String::from_utf8_lossy(&t);
                    entities = declared_entities(&content);
                    format!("<!DOCTYPE {}>", content.trim())
                }
                Event::Eof => break,
            };
            if stack.is_empty() && root.is_none() {
                prolog.push_str(&raw);
                prolog.push('\n');
            } else {
                push_text(&mut stack, &raw);
            }
        }
        if let Some(open) = stack.last() {
            return Err(SvgError(format!("unclosed <{}>", open.name)));
        }
        let root = root.ok_or_else(|| SvgError("no root element".to_string()))?;
        if root.local_name() != "svg" {
            return Err(SvgError(format!("root element is <{}>", root.name)));
        }
        Ok(Self { prolog, root })
    }

    /// Reads and parses a file.
    ///
    /// # Errors
    ///
    /// Returns [`PrintError::Io`] or [`PrintError::Svg`].
    pub fn load(path: &Path) -> Result<Self, PrintError> {
        let text = std::fs::read_to_string(path).map_err(|e| PrintError::io(path, e))?;
        Self::parse(&text).map_err(|e| PrintError::svg(path, e))
    }

    /// Width and height in viewBox units.
    ///
    /// # Errors
    ///
    /// Returns an error when the root has no usable `viewBox`.
    pub fn size(&self) -> Result<(f64, f64), SvgError> {
        let view_box = self
            .root
            .attr("viewBox")
            .ok_or_else(|| SvgError("missing viewBox".to_string()))?;
        let values: Vec<f64> = view_box
            .split([' ', ','])
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        match values[..] {
            [_, _, w, h] if w > 0.0 && h > 0.0 => Ok((w, h)),
            _ => Err(SvgError(format!("bad viewBox `{view_box}`"))),
        }
    }

    /// Serialises the document.
    #[must_use]
    pub fn to_svg_string(&self) -> String {
        let mut out = self.prolog.clone();
        self.root.write(&mut out);
        out.push('\n');
        out
    }

    /// Writes the document to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PrintError::Io`].
    pub fn save(&self, path: &Path) -> Result<(), PrintError> {
        std::fs::write(path, self.to_svg_string()).map_err(|e| PrintError::io(path, e))
    }
}

fn push_text(stack: &mut [Element], text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(parent) = stack.last_mut() {
        parent.children.push(Node::Text(text.to_string()));
    }
}

/// `<!ENTITY name "value">` declarations of a DOCTYPE internal subset.
fn declared_entities(doctype: &str) -> HashMap<String, String> {
    ENTITY_RE
        .captures_iter(doctype)
        .filter_map(|c| {
            let value = c.get(2).or_else(|| c.get(3))?;
            Some((c[1].to_string(), value.as_str().to_string()))
        })
        .collect()
}

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<!ENTITY\s+([\w.:-]+)\s+(?:"([^"]*)"|'([^']*)')\s*>"#).expect("valid entity pattern")
});

fn xml_entity(name: &str) -> Option<&'static str> {
    match name {
        "lt" => Some("<"),
        "gt" => Some(">"),
        "amp" => Some("&"),
        "apos" => Some("'"),
        "quot" => Some("\""),
        _ => None,
    }
}

fn element(tag: &BytesStart<'_>, entities: &HashMap<String, String>) -> Result<Element, SvgError> {
    let mut element = Element::new(String::from_utf8_lossy(tag.name().as_ref()));
    for attr in tag.attributes() {
        let attr = attr.map_err(|e| SvgError(format!("<{}>: {e}", element.name)))?;
        let value = attr
            .unescape_value_with(|name| entities.get(name).map(String::as_str).or_else(|| xml_entity(name)))
            .map_err(|e| SvgError(format!("<{}>: {e}", element.name)))?;
        let name = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        element.attrs.push((name, value.into_owned()));
    }
    Ok(element)
}

fn close(stack: &mut [Element], root: &mut Option<Element>, element: Element) -> Result<(), SvgError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(Node::Element(element)),
        None if root.is_none() => *root = Some(element),
        None => return Err(SvgError(format!("second root element <{}>", element.name))),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Canvas
// ---------------------------------------------------------------------------

/// Horizontal text alignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Anchor {
    /// Left aligned.
    #[default]
    Start,
    /// Centred.
    Middle,
    /// Right aligned.
    End,
}

impl Anchor {
    const fn as_svg(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Middle => "middle",
            Self::End => "end",
        }
    }
}

/// Text style for [`SvgCanvas::text`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TextStyle {
    /// Character height in mm.
    pub size: f64,
    /// Alignment.
    pub anchor: Anchor,
    /// Bold.
    pub bold: bool,
    /// Italic.
    pub italic: bool,
    /// Rotation in degrees, counter-clockwise.
    pub rotation: f64,
}

/// Writes a plot file in KiCad's style: black items, white holes, integer
/// coordinates in [`UNITS_PER_MM`] units. All inputs are in page mm.
#[derive(Debug, Clone)]
pub struct SvgCanvas {
    width: f64,
    height: f64,
    body: String,
}

#[allow(clippy::cast_possible_truncation)] // page coordinates are small
fn u(mm: f64) -> i64 {
    (mm * UNITS_PER_MM).round() as i64
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

impl SvgCanvas {
    /// Creates a canvas for a page of `width` x `height` mm.
    #[must_use]
    pub const fn new(width: f64, height: f64) -> Self {
        Self {
            width,
            height,
            body: String::new(),
        }
    }

    /// Page width in mm.
    #[must_use]
    pub const fn width(&self) -> f64 {
        self.width
    }

    /// Page height in mm.
    #[must_use]
    pub const fn height(&self) -> f64 {
        self.height
    }

    fn paint(filled: bool, color: &str) -> String {
        if filled {
            format!("fill=\"{color}\" stroke=\"{color}\"")
        } else {
            format!("fill=\"none\" stroke=\"{color}\"")
        }
    }

    /// Straight line.
    pub fn line(&mut self, a: Point, b: Point, width: f64) {
        let _ = writeln!(
            self.body,
            "<path d=\"M{} {} L{} {}\" fill=\"none\" stroke=\"#000000\" stroke-width=\"{}\"/>",
            u(a.x),
            u(a.y),
            u(b.x),
            u(b.y),
            u(width)
        );
    }

    /// Closed polygon.
    pub fn polygon(&mut self, points: &[Point], width: f64, filled: bool) {
        self.polygon_colored(points, width, filled, "#000000");
    }

    fn polygon_colored(&mut self, points: &[Point], width: f64, filled: bool, color: &str) {
        let Some((first, rest)) = points.split_first() else {
            return;
        };
        let mut d = format!("M{} {}", u(first.x), u(first.y));
        for p in rest {
            let _ = write!(d, " L{} {}", u(p.x), u(p.y));
        }
        d.push_str(" Z");
        let _ = writeln!(
            self.body,
            "<path d=\"{d}\" {} stroke-width=\"{}\"/>",
            Self::paint(filled, color),
            u(width)
        );
    }

    /// Rectangle given by two opposite corners.
    pub fn rect(&mut self, a: Point, b: Point, width: f64, filled: bool) {
        let corners = [a, Point::new(b.x, a.y), b, Point::new(a.x, b.y)];
        self.polygon(&corners, width, filled);
    }

    /// Rectangle covering the whole page in `color`.
    pub fn fill_page(&mut self, color: &str) {
        let corners = [
            Point::new(0.0, 0.0),
            Point::new(self.width, 0.0),
            Point::new(self.width, self.height),
            Point::new(0.0, self.height),
        ];
        self.polygon_colored(&corners, 0.0, true, color);
    }

    /// Filled rectangle in `color`.
    pub fn fill_rect(&mut self, a: Point, b: Point, color: &str) {
        let corners = [a, Point::new(b.x, a.y), b, Point::new(a.x, b.y)];
        self.polygon_colored(&corners, 0.0, true, color);
    }

    /// Circle.
    pub fn circle(&mut self, center: Point, radius: f64, width: f64, filled: bool) {
        self.circle_colored(center, radius, width, filled, "#000000");
    }

    /// Circle in `color`.
    pub fn circle_colored(&mut self, center: Point, radius: f64, width: f64, filled: bool, color: &str) {
        let _ = writeln!(
            self.body,
            "<circle cx=\"{}\" cy=\"{}\" r=\"{}\" {} stroke-width=\"{}\"/>",
            u(center.x),
            u(center.y),
            u(radius),
            Self::paint(filled, color),
            u(width)
        );
    }

    /// Drill hole, painted white.
    pub fn hole(&mut self, center: Point, diameter: f64) {
        self.circle_colored(center, diameter / 2.0, 0.0, true, "#FFFFFF");
    }

    /// Text anchored at `pos` (baseline centred vertically on it).
    pub fn text(&mut self, pos: Point, text: &str, style: &TextStyle) {
        if text.is_empty() {
            return;
        }
        let mut attrs = format!(
            "x=\"{}\" y=\"{}\" font-family=\"sans-serif\" font-size=\"{}\" text-anchor=\"{}\" dominant-baseline=\"central\" fill=\"#000000\"",
            u(pos.x),
            u(pos.y),
            u(style.size),
            style.anchor.as_svg()
        );
        if style.bold {
            attrs.push_str(" font-weight=\"bold\"");
        }
        if style.italic {
            attrs.push_str(" font-style=\"italic\"");
        }
        if style.rotation != 0.0 {
            let _ = write!(
                attrs,
                " transform=\"rotate({} {} {})\"",
                -style.rotation,
                u(pos.x),
                u(pos.y)
            );
        }
        let _ = writeln!(self.body, "<text {attrs}>{}</text>", escape(text));
    }

    /// Negative plot: swaps black and white in what was drawn so far and
    /// puts a black rectangle from `a` to `b` under it.
    pub fn invert(&mut self, a: Point, b: Point) {
        const SWAP: &str = "#5E3A7F";
        let body = std::mem::take(&mut self.body)
            .replace("#000000", SWAP)
            .replace("#FFFFFF", "#000000")
            .replace(SWAP, "#FFFFFF");
        self.fill_rect(a, b, "#000000");
        self.body.push_str(&body);
    }

    /// Finishes the file.
    #[must_use]
    pub fn finish(&self, title: &str) -> String {
        format!(
            "<?xml version=\"1.0\" standalone=\"no\"?>\n\
             <svg xmlns=\"http://www.w3.org/2000/svg\" xmlns:xlink=\"http://www.w3.org/1999/xlink\" \
             version=\"1.1\" width=\"{w:.4}mm\" height=\"{h:.4}mm\" viewBox=\"0 0 {vw} {vh}\">\n\
             <title>{title}</title>\n\
             <g stroke-linecap=\"round\" stroke-linejoin=\"round\">\n{body}</g>\n</svg>\n",
            w = self.width,
            h = self.height,
            vw = u(self.width),
            vh = u(self.height),
            title = escape(title),
            body = self.body
        )
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// One file to stack and the color for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlotFile {
    /// The plotted SVG.
    pub path: PathBuf,
    /// Color replacing the plotted black.
    pub color: String,
}

/// A PNG placed on the page, in page mm.
#[derive(Debug, Clone, PartialEq)]
pub struct PageImage {
    /// Top left corner.
    pub pos: Point,
    /// Width in mm.
    pub width: f64,
    /// Height in mm.
    pub height: f64,
    /// PNG data.
    pub png: Vec<u8>,
}

/// Page background.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Background {
    /// Solid color under everything.
    pub color: String,
    /// Optional SVG stretched over the page, above the color.
    pub image: Option<PathBuf>,
}

fn group(children: Vec<Node>, transform: Option<String>) -> Element {
    let mut g = Element::new("g");
    if let Some(t) = transform {
        g.set_attr("transform", t);
    }
    g.children = children;
    g
}

fn background_nodes(bg: &Background, width: f64, height: f64) -> Result<Vec<Node>, PrintError> {
    let (fill, alpha) = {
        let (_, alpha) = hex_to_rgb(&bg.color);
        (bg.color.get(..7).unwrap_or(&bg.color).to_string(), alpha)
    };
    let rect = Element::new("rect")
        .with_attr("x", "0")
        .with_attr("y", "0")
        .with_attr("width", width.to_string())
        .with_attr("height", height.to_string())
        .with_attr("style", format!("fill:{fill}; fill-opacity:{alpha}; stroke:none;"));
    let mut nodes = vec![Node::Element(rect)];
    if let Some(path) = &bg.image {
        let img = SvgDocument::load(path)?;
        let (w, h) = img.size().map_err(|e| PrintError::svg(path, e))?;
        nodes.push(Node::Element(group(
            img.root.children,
            Some(format!("scale({},{})", width / w, height / h)),
        )));
    }
    Ok(nodes)
}

fn image_node(image: &PageImage, unit: f64) -> Node {
    let data = base64::engine::general_purpose::STANDARD.encode(&image.png);
    Node::Element(
        Element::new("image")
            .with_attr("x", (image.pos.x * unit).to_string())
            .with_attr("y", (image.pos.y * unit).to_string())
            .with_attr("width", (image.width * unit).to_string())
            .with_attr("height", (image.height * unit).to_string())
            .with_attr("preserveAspectRatio", "none")
            .with_attr("xlink:href", format!("data:image/png;base64,{data}")),
    )
}

/// Stacks the layer files into one page, the last file on top.
///
/// The first file sets the page: the background goes under it and the
/// worksheet images over it. The others are scaled to its width, so files
/// plotted with other units line up. `paper_width` (mm) converts the image
/// positions to viewBox units.
///
/// # Errors
///
/// Returns an error if a file can't be read or parsed.
pub fn merge(
    files: &[PlotFile],
    style: &ColorStyle,
    background: Option<&Background>,
    images: &[PageImage],
    paper_width: f64,
) -> Result<SvgDocument, PrintError> {
    let mut out: Option<(SvgDocument, f64)> = None;
    for file in files {
        tracing::debug!(file = %file.path.display(), color = %file.color, "Loading layer file");
        let text = std::fs::read_to_string(&file.path).map_err(|e| PrintError::io(&file.path, e))?;
        let doc = SvgDocument::parse(&colorize(&text, &file.color, style))
            .map_err(|e| PrintError::svg(&file.path, e))?;
        let (width, height) = doc.size().map_err(|e| PrintError::svg(&file.path, e))?;
        match &mut out {
            None => {
                let mut doc = doc;
                if let Some(bg) = background {
                    let mut nodes = background_nodes(bg, width, height)?;
                    nodes.append(&mut doc.root.children);
                    doc.root.children = nodes;
                }
                let unit = width / paper_width;
                doc.root
                    .children
                    .extend(images.iter().map(|i| image_node(i, unit)));
                out = Some((doc, width));
            }
            Some((base, base_width)) => {
                let scale = *base_width / width;
                let transform = if (scale - 1.0).abs() > f64::EPSILON {
                    tracing::debug!(file = %file.path.display(), scale, "Scaling layer");
                    Some(format!("scale({scale})"))
                } else {
                    None
                };
                base.root
                    .children
                    .push(Node::Element(group(doc.root.children, transform)));
            }
        }
    }
    out.map(|(doc, _)| doc)
        .ok_or_else(|| PrintError::svg(Path::new("."), SvgError("nothing to merge".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn style(colored_holes: bool, monochrome: bool) -> ColorStyle {
        ColorStyle {
            colored_holes,
            holes_color: "#000000".to_string(),
            monochrome,
        }
    }

    #[test]
    fn gray_levels() {
        assert_eq!(to_gray_hex("#FF0000"), "#555555");
        assert_eq!(to_gray_hex("#FFFFFF"), "#FFFFFF");
        assert_eq!(to_gray_hex("#000000"), "#000000");
        // alpha is ignored
        assert_eq!(to_gray_hex("#0000FF80"), "#555555");
    }

    #[test]
    fn colors_are_substituted() {
        let svg = "<path stroke=\"#000000\"/><circle fill=\"#FFFFFF\"/><g style=\"stroke:rgb(0%,0%,0%)\"/>";
        let out = colorize(svg, "#C8343480", &style(true, false));
        assert_eq!(
            out,
            "<path stroke=\"#C83434\"/><circle fill=\"#000000\"/><g style=\"stroke:#C83434\"/>"
        );
        let out = colorize(svg, "#C83434", &style(false, false));
        assert!(out.contains("fill=\"#FFFFFF\""));
    }

    #[test]
    fn monochrome_grays_layer_and_holes() {
        let mut s = style(true, true);
        s.holes_color = "#FF0000".to_string();
        let out = colorize("<a c=\"#000000\"/><b c=\"#FFFFFF\"/>", "#00FF00", &s);
        assert_eq!(out, "<a c=\"#555555\"/><b c=\"#555555\"/>");
    }

    #[test]
    fn black_layer_keeps_content() {
        let out = colorize("<a c=\"#000000\"/>", "#000000", &style(false, false));
        assert_eq!(out, "<a c=\"#000000\"/>");
    }

    #[test]
    fn parse_and_write_tree() {
        let text = "<?xml version=\"1.0\"?>\n<!-- c -->\n<svg viewBox=\"0 0 100 50\" a='1'>\
                    <defs><clipPath id=\"x\"/></defs><g id=\"b\"><path d=\"M0 0\"/>text</g></svg>";
        let doc = SvgDocument::parse(text).unwrap();
        assert_eq!(doc.size().unwrap(), (100.0, 50.0));
        assert_eq!(doc.root.attr("a"), Some("1"));
        let names: Vec<_> = doc.root.elements().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["defs", "g"]);
        let out = doc.to_svg_string();
        assert!(out.starts_with("<?xml version=\"1.0\"?>\n<!-- c -->\n<svg"));
        assert!(out.contains("<g id=\"b\"><path d=\"M0 0\"/>text</g>"));
    }

    #[test]
    fn parse_errors() {
        assert!(SvgDocument::parse("<svg><g></svg>").is_err());
        assert!(SvgDocument::parse("<html/>").is_err());
        assert!(SvgDocument::parse("<svg/>").unwrap().size().is_err());
    }

    #[test]
    fn attribute_entities_are_decoded() {
        let text = "<svg viewBox=\"0 0 10 10\"><g id=\"a&amp;b\" title=\"&#x41;&lt;\">x &amp; y</g></svg>";
        let doc = SvgDocument::parse(text).unwrap();
        let g = doc.root.elements().next().unwrap();
        assert_eq!(g.attr("id"), Some("a&b"));
        assert_eq!(g.attr("title"), Some("A<"));
        let out = doc.to_svg_string();
        assert!(out.contains("id=\"a&amp;b\""));
        assert!(out.contains("title=\"A&lt;\""));
        assert!(out.contains(">x &amp; y</g>"));
    }

    #[test]
    fn doctype_internal_subset() {
        let text = "<?xml version=\"1.0\"?>
<!DOCTYPE svg [
  <!ENTITY ns_svg \"http://www.w3.org/2000/svg\">
  <!ELEMENT svg ANY>
]>
<svg xmlns=\"&ns_svg;\" viewBox=\"0 0 10 10\"><rect x=\"0\"/></svg>";
        let doc = SvgDocument::parse(text).unwrap();
        assert_eq!(doc.root.attr("xmlns"), Some("http://www.w3.org/2000/svg"));
        assert_eq!(doc.root.elements().count(), 1);
        assert_eq!(doc.size().unwrap(), (10.0, 10.0));
        let out = doc.to_svg_string();
        assert!(out.contains("<!DOCTYPE svg ["));
        assert!(out.contains("<!ENTITY ns_svg"));
    }

    #[test]
    fn malformed_attributes_are_errors() {
        assert!(SvgDocument::parse("<svg viewBox=0><g/></svg>").is_err());
        assert!(SvgDocument::parse("<svg viewBox=\"0 0 1 1\" id=\"&nope;\"/>").is_err());
    }

    #[test]
    fn canvas_output_is_parseable() {
        let mut canvas = SvgCanvas::new(297.0, 210.0);
        canvas.line(Point::new(0.0, 0.0), Point::new(10.0, 0.0), 0.1);
        canvas.hole(Point::new(5.0, 5.0), 1.0);
        canvas.text(Point::new(5.0, 5.0), "a<b", &TextStyle { size: 1.5, ..TextStyle::default() });
        let text = canvas.finish("F.Cu");
        let doc = SvgDocument::parse(&text).unwrap();
        assert_eq!(doc.size().unwrap(), (297_000.0, 210_000.0));
        assert!(text.contains("M0 0 L10000 0"));
        assert!(text.contains("fill=\"#FFFFFF\""));
        assert!(text.contains("a&lt;b"));
    }

    #[test]
    fn merge_stacks_and_scales() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.svg");
        let b = dir.path().join("b.svg");
        std::fs::write(&a, "<svg viewBox=\"0 0 2000 1000\"><path stroke=\"#000000\"/></svg>").unwrap();
        std::fs::write(&b, "<svg viewBox=\"0 0 1000 500\"><path stroke=\"#000000\"/></svg>").unwrap();
        let files = [
            PlotFile {
                path: a,
                color: "#FF0000".into(),
            },
            PlotFile {
                path: b,
                color: "#0000FF".into(),
            },
        ];
        let bg = Background {
            color: "#FFFFFF".into(),
            image: None,
        };
        let image = PageImage {
            pos: Point::new(1.0, 1.0),
            width: 1.0,
            height: 1.0,
            png: vec![1, 2, 3],
        };
        let doc = merge(&files, &style(false, false), Some(&bg), &[image], 2.0).unwrap();
        let out = doc.to_svg_string();
        let rect = out.find("<rect").unwrap();
        let red = out.find("#FF0000").unwrap();
        let img = out.find("<image").unwrap();
        let blue = out.find("#0000FF").unwrap();
        assert!(rect < red && red < img && img < blue);
        assert!(out.contains("<g transform=\"scale(2)\">"));
        assert!(out.contains("x=\"1000\""));
        assert!(out.contains("data:image/png;base64,AQID"));
    }
}
