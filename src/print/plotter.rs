//! The plotter seam: draws one layer (or one isolation pass of a layer) of
//! the board to an SVG file.
//!
//! The compositor never edits the board to isolate pads or vias: it asks
//! the plotter for a [`PlotContent`] instead. [`SvgPlotter`] is the built-in
//! implementation; it draws items in black and holes in white, the way
//! KiCad's SVG plotter does, so the merge step can recolor them.

use std::collections::HashMap;
use std::path::Path;

use super::options::{DrillMarks, PlotFlags};
use super::svg::{SvgCanvas, TextStyle};
use super::worksheet::Worksheet;
use super::PrintError;
use crate::board::{Board, GraphicItem, Layer, Pad, PadShape, Paper, Point, Rect, TextKind, ViaType};

/// Drill diameter used for small drill marks (mm).
pub const SMALL_DRILL: f64 = 0.35;

/// Largest scale that fits `bbox` on the paper, keeping the aspect ratio.
/// Returns 1 for an empty board.
#[must_use]
pub fn autoscale(paper: &Paper, bbox: Option<Rect>) -> f64 {
    match bbox {
        Some(b) if b.width() > 0.0 && b.height() > 0.0 => {
            (paper.width / b.width()).min(paper.height / b.height())
        }
        _ => 1.0,
    }
}

/// Board mm to page mm.
///
/// At scale 1 board coordinates are page coordinates. Any other scale
/// centres the board on the page. Mirroring flips the X axis around the
/// page centre.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageTransform {
    scale: f64,
    mirror: bool,
    width: f64,
    height: f64,
    center: Option<Point>,
}

impl PageTransform {
    /// Transform for `paper`. A `scale` of 0 autoscales to `bbox`.
    #[must_use]
    pub fn new(paper: &Paper, scale: f64, mirror: bool, bbox: Option<Rect>) -> Self {
        let scale = if scale == 0.0 { autoscale(paper, bbox) } else { scale };
        let center = if (scale - 1.0).abs() > f64::EPSILON {
            bbox.map(|b| b.center())
        } else {
            None
        };
        Self {
            scale,
            mirror,
            width: paper.width,
            height: paper.height,
            center,
        }
    }

    /// Identity for `paper`.
    #[must_use]
    pub fn identity(paper: &Paper) -> Self {
        Self::new(paper, 1.0, false, None)
    }

    /// The scale factor.
    #[must_use]
    pub const fn scale(&self) -> f64 {
        self.scale
    }

    /// Returns true when the X axis is inverted.
    #[must_use]
    pub const fn mirror(&self) -> bool {
        self.mirror
    }

    fn offset(&self) -> (f64, f64) {
        self.center.map_or((0.0, 0.0), |c| {
            (
                self.width / 2.0 - self.scale * c.x,
                self.height / 2.0 - self.scale * c.y,
            )
        })
    }

    /// Maps a board point to the page.
    #[must_use]
    pub fn point(&self, p: Point) -> Point {
        let (ox, oy) = self.offset();
        let x = self.scale.mul_add(p.x, ox);
        let y = self.scale.mul_add(p.y, oy);
        if self.mirror {
            Point::new(self.width - x, y)
        } else {
            Point::new(x, y)
        }
    }

    /// Maps a board length to the page.
    #[must_use]
    pub fn length(&self, l: f64) -> f64 {
        l * self.scale
    }

    /// The same mapping as an SVG `matrix()`, producing viewBox units when
    /// one page mm is `unit` units.
    #[must_use]
    pub fn svg_matrix(&self, unit: f64) -> String {
        let (ox, oy) = self.offset();
        let (a, e) = if self.mirror {
            (-self.scale, self.width - ox)
        } else {
            (self.scale, ox)
        };
        format!(
            "matrix({},0,0,{},{},{})",
            a * unit,
            self.scale * unit,
            e * unit,
            oy * unit
        )
    }
}

/// What a plot pass draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotContent {
    /// Every item on the layer.
    Layer,
    /// Only the through hole pads on the layer.
    ThroughHolePads,
    /// Only the vias of one type on the layer.
    Vias(ViaType),
}

/// One plot request.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerJob<'a> {
    /// Layer to draw.
    pub layer: Layer,
    /// What to draw from it.
    pub content: PlotContent,
    /// Text and mode flags.
    pub flags: PlotFlags,
    /// Page placement.
    pub transform: PageTransform,
    /// Drill marks on copper.
    pub drill_marks: DrillMarks,
    /// Default width for items without one (mm).
    pub line_width: f64,
    /// Title stored in the file.
    pub title: &'a str,
}

/// Draws board layers and page frames to SVG files.
pub trait Plotter {
    /// Plots one layer pass to `output`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be produced.
    fn plot_layer(&mut self, board: &Board, job: &LayerJob<'_>, output: &Path) -> Result<(), PrintError>;

    /// Plots the default page frame to `output`, unscaled.
    ///
    /// # Errors
    ///
    /// Returns an error if the file can't be produced.
    fn plot_frame(&mut self, board: &Board, sheet: &str, output: &Path) -> Result<(), PrintError>;
}

/// Built-in SVG plotter.
#[derive(Debug, Default, Clone, Copy)]
pub struct SvgPlotter;

impl SvgPlotter {
    /// Creates the plotter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn draw_graphic(canvas: &mut SvgCanvas, item: &GraphicItem, t: &PageTransform, line_width: f64) {
    let w = |width: f64| t.length(if width > 0.0 { width } else { line_width });
    match item {
        GraphicItem::Segment {
            width, start, end, ..
        } => canvas.line(t.point(*start), t.point(*end), w(*width)),
        GraphicItem::Rect {
            width,
            start,
            end,
            filled,
            ..
        } => {
            let corners = [
                *start,
                Point::new(end.x, start.y),
                *end,
                Point::new(start.x, end.y),
            ]
            .map(|p| t.point(p));
            canvas.polygon(&corners, w(*width), *filled);
        }
        GraphicItem::Circle {
            width,
            center,
            radius,
            filled,
            ..
        } => canvas.circle(t.point(*center), t.length(*radius), w(*width), *filled),
        GraphicItem::Polygon {
            width,
            points,
            filled,
            ..
        } => {
            let points: Vec<Point> = points.iter().map(|p| t.point(*p)).collect();
            canvas.polygon(&points, w(*width), *filled);
        }
        GraphicItem::Text {
            text,
            position,
            size,
            ..
        } => canvas.text(
            t.point(*position),
            text,
            &TextStyle {
                size: t.length(*size),
                anchor: super::svg::Anchor::Middle,
                ..TextStyle::default()
            },
        ),
    }
}

fn text_allowed(item: &GraphicItem, flags: PlotFlags) -> bool {
    let GraphicItem::Text { kind, visible, .. } = item else {
        return true;
    };
    let wanted = match kind {
        TextKind::Reference => flags.contains(PlotFlags::REFERENCES),
        TextKind::Value => flags.contains(PlotFlags::VALUES),
        TextKind::User => true,
    };
    wanted && (*visible || flags.contains(PlotFlags::INVISIBLE_TEXT))
}

fn draw_pad(canvas: &mut SvgCanvas, pad: &Pad, t: &PageTransform) {
    let center = t.point(pad.position);
    match pad.shape {
        PadShape::Circle => canvas.circle(center, t.length(pad.width / 2.0), 0.0, true),
        _ => {
            let r = Rect::centered(pad.position, pad.width, pad.height);
            let corners = [
                r.min,
                Point::new(r.max.x, r.min.y),
                r.max,
                Point::new(r.min.x, r.max.y),
            ]
            .map(|p| t.point(p));
            canvas.polygon(&corners, 0.0, true);
        }
    }
}

fn draw_hole(canvas: &mut SvgCanvas, center: Point, drill: f64, job: &LayerJob<'_>) {
    if !job.layer.is_copper() {
        return;
    }
    let diameter = match job.drill_marks {
        DrillMarks::None => return,
        DrillMarks::Small => SMALL_DRILL.min(drill),
        DrillMarks::Full => drill,
    };
    canvas.hole(job.transform.point(center), job.transform.length(diameter));
}

/// The copper layer a solder mask opening follows.
fn mask_copper(layer: Layer) -> Option<Layer> {
    match layer {
        Layer::FMask => Some(Layer::FCu),
        Layer::BMask => Some(Layer::BCu),
        _ => None,
    }
}

impl SvgPlotter {
    fn draw_layer(canvas: &mut SvgCanvas, board: &Board, job: &LayerJob<'_>) {
        let t = &job.transform;
        let layer = job.layer;
        for zone in board.zones.iter().filter(|z| z.layer == layer) {
            let points: Vec<Point> = zone.outline.iter().map(|p| t.point(*p)).collect();
            canvas.polygon(&points, t.length(job.line_width), true);
        }
        for item in board.drawings.iter().filter(|d| d.layer() == layer) {
            draw_graphic(canvas, item, t, job.line_width);
        }
        for track in board.tracks.iter().filter(|tr| tr.layer == layer) {
            canvas.line(t.point(track.start), t.point(track.end), t.length(track.width));
        }
        let mut holes = Vec::new();
        for fp in &board.footprints {
            for item in fp
                .graphics
                .iter()
                .filter(|g| g.layer() == layer && text_allowed(g, job.flags))
            {
                draw_graphic(canvas, item, t, job.line_width);
            }
            for pad in fp.pads.iter().filter(|p| p.layers.contains(layer)) {
                draw_pad(canvas, pad, t);
                holes.extend(pad.drill.map(|d| (pad.position, d)));
            }
        }
        let via_layer = match mask_copper(layer) {
            Some(copper) if job.flags.contains(PlotFlags::VIAS_ON_MASK) => Some(copper),
            Some(_) => None,
            None => Some(layer),
        };
        if let Some(copper) = via_layer {
            for via in board.vias.iter().filter(|v| v.is_on_layer(copper)) {
                canvas.circle(t.point(via.position), t.length(via.width / 2.0), 0.0, true);
                holes.push((via.position, via.drill));
            }
        }
        for (center, drill) in holes {
            draw_hole(canvas, center, drill, job);
        }
    }

    fn draw_pads(canvas: &mut SvgCanvas, board: &Board, job: &LayerJob<'_>) {
        let pads = board
            .footprints
            .iter()
            .flat_map(|fp| &fp.pads)
            .filter(|p| p.is_through_hole() && p.layers.contains(job.layer));
        for pad in pads {
            draw_pad(canvas, pad, &job.transform);
            if let Some(drill) = pad.drill {
                draw_hole(canvas, pad.position, drill, job);
            }
        }
    }

    fn draw_vias(canvas: &mut SvgCanvas, board: &Board, job: &LayerJob<'_>, via_type: ViaType) {
        let t = &job.transform;
        let vias = board
            .vias
            .iter()
            .filter(|v| v.via_type == via_type && v.is_on_layer(job.layer));
        for via in vias {
            canvas.circle(t.point(via.position), t.length(via.width / 2.0), 0.0, true);
            draw_hole(canvas, via.position, via.drill, job);
        }
    }
}

impl Plotter for SvgPlotter {
    fn plot_layer(&mut self, board: &Board, job: &LayerJob<'_>, output: &Path) -> Result<(), PrintError> {
        tracing::debug!(
            layer = %job.layer,
            content = ?job.content,
            scale = job.transform.scale(),
            file = %output.display(),
            "Plotting layer"
        );
        let mut canvas = SvgCanvas::new(board.paper.width, board.paper.height);
        match job.content {
            PlotContent::Layer => Self::draw_layer(&mut canvas, board, job),
            PlotContent::ThroughHolePads => Self::draw_pads(&mut canvas, board, job),
            PlotContent::Vias(via_type) => Self::draw_vias(&mut canvas, board, job, via_type),
        }
        if job.flags.contains(PlotFlags::NEGATIVE) {
            if let Some(bbox) = board.bounding_box() {
                let (a, b) = (job.transform.point(bbox.min), job.transform.point(bbox.max));
                canvas.invert(a, b);
            }
        }
        std::fs::write(output, canvas.finish(job.title)).map_err(|e| PrintError::io(output, e))
    }

    fn plot_frame(&mut self, board: &Board, sheet: &str, output: &Path) -> Result<(), PrintError> {
        let worksheet = Worksheet::builtin().map_err(|e| PrintError::worksheet(Path::new("<builtin>"), e))?;
        let mut canvas = SvgCanvas::new(board.paper.width, board.paper.height);
        let vars: HashMap<String, String> = super::frame::title_block_vars(board, sheet, 1, 1, &[]);
        // the plotter frame has no room for bitmaps
        let _ = worksheet.draw(&mut canvas, 1, &vars);
        std::fs::write(output, canvas.finish(&board.title_block.title)).map_err(|e| PrintError::io(output, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Footprint, Via};

    fn board() -> Board {
        let mut board = Board::default();
        board.copper_layers = 2;
        board.drawings = vec![
            GraphicItem::Rect {
                layer: Layer::EdgeCuts,
                width: 0.1,
                start: Point::new(100.0, 50.0),
                end: Point::new(150.0, 80.0),
                filled: false,
            },
            GraphicItem::text(Layer::FSilkS, "LOGO", Point::new(120.0, 60.0)),
        ];
        let mut fp = Footprint::new("J1", "CONN");
        fp.pads.push(crate::board::Pad::through_hole("1", Point::new(110.0, 60.0), 1.7, 1.0));
        fp.pads.push(crate::board::Pad::smd("2", Point::new(115.0, 60.0), 1.0, 1.0));
        fp.graphics.push(GraphicItem::Text {
            layer: Layer::FSilkS,
            text: "J1".into(),
            position: Point::new(110.0, 57.0),
            size: 1.0,
            kind: TextKind::Reference,
            visible: true,
        });
        fp.graphics.push(GraphicItem::Text {
            layer: Layer::FSilkS,
            text: "CONN".into(),
            position: Point::new(110.0, 63.0),
            size: 1.0,
            kind: TextKind::Value,
            visible: false,
        });
        board.footprints.push(fp);
        board.vias.push(Via::through(Point::new(130.0, 70.0), 0.8, 0.4));
        board.vias.push(Via {
            via_type: ViaType::Micro,
            bottom: Layer::In(1),
            ..Via::through(Point::new(140.0, 70.0), 0.3, 0.1)
        });
        board
    }

    fn job(layer: Layer, content: PlotContent, flags: PlotFlags, board: &Board) -> LayerJob<'static> {
        LayerJob {
            layer,
            content,
            flags,
            transform: PageTransform::identity(&board.paper),
            drill_marks: DrillMarks::Full,
            line_width: 0.1,
            title: "test",
        }
    }

    fn plot(board: &Board, job: &LayerJob<'_>) -> String {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.svg");
        SvgPlotter::new().plot_layer(board, job, &out).unwrap();
        std::fs::read_to_string(out).unwrap()
    }

    #[test]
    fn autoscale_fits_the_page() {
        let paper = Paper::default();
        for (w, h) in [(50.0, 30.0), (400.0, 20.0), (10.0, 300.0), (297.0, 210.0)] {
            let bbox = Rect::from_corners(Point::new(5.0, 5.0), Point::new(5.0 + w, 5.0 + h));
            let s = autoscale(&paper, Some(bbox));
            assert!(s * w <= paper.width + 1e-9);
            assert!(s * h <= paper.height + 1e-9);
            let tight = ((s * w) - paper.width).abs() < 1e-9 || ((s * h) - paper.height).abs() < 1e-9;
            assert!(tight, "{w}x{h} -> {s}");
        }
        assert!((autoscale(&paper, None) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn transform_centres_and_mirrors() {
        let paper = Paper::default();
        let bbox = Rect::from_corners(Point::new(100.0, 50.0), Point::new(150.0, 80.0));
        let t = PageTransform::new(&paper, 2.0, false, Some(bbox));
        assert_eq!(t.point(Point::new(125.0, 65.0)), Point::new(148.5, 105.0));
        assert_eq!(t.point(Point::new(150.0, 65.0)), Point::new(198.5, 105.0));
        let m = PageTransform::new(&paper, 2.0, true, Some(bbox));
        assert_eq!(m.point(Point::new(150.0, 65.0)), Point::new(98.5, 105.0));

        let id = PageTransform::new(&paper, 1.0, true, Some(bbox));
        assert_eq!(id.point(Point::new(10.0, 20.0)), Point::new(287.0, 20.0));
        assert_eq!(id.svg_matrix(1000.0), "matrix(-1000,0,0,1000,297000,0)");

        let auto = PageTransform::new(&paper, 0.0, false, Some(bbox));
        assert!((auto.scale() - 5.94).abs() < 1e-9);
    }

    #[test]
    fn layer_pass_filters_texts() {
        let board = board();
        let all = plot(
            &board,
            &job(Layer::FSilkS, PlotContent::Layer, PlotFlags::REFERENCES | PlotFlags::VALUES, &board),
        );
        assert!(all.contains(">LOGO<"));
        assert!(all.contains(">J1<"));
        // invisible value needs the force flag
        assert!(!all.contains(">CONN<"));
        let forced = plot(
            &board,
            &job(
                Layer::FSilkS,
                PlotContent::Layer,
                PlotFlags::VALUES | PlotFlags::INVISIBLE_TEXT,
                &board,
            ),
        );
        assert!(forced.contains(">CONN<"));
        assert!(!forced.contains(">J1<"));
    }

    #[test]
    fn copper_pass_draws_pads_vias_and_holes() {
        let board = board();
        let svg = plot(&board, &job(Layer::FCu, PlotContent::Layer, PlotFlags::empty(), &board));
        // round pad, two vias and three holes
        assert_eq!(svg.matches("<circle").count(), 2 + 3 + 1);
        assert_eq!(svg.matches("fill=\"#FFFFFF\"").count(), 3);

        let back = plot(&board, &job(Layer::BCu, PlotContent::Layer, PlotFlags::empty(), &board));
        // smd pad and micro via are not on B.Cu
        assert_eq!(back.matches("fill=\"#FFFFFF\"").count(), 2);
    }

    #[test]
    fn isolation_passes() {
        let board = board();
        let pads = plot(&board, &job(Layer::FCu, PlotContent::ThroughHolePads, PlotFlags::empty(), &board));
        assert!(pads.contains("cx=\"110000\""));
        assert!(!pads.contains("115000"));
        assert!(!pads.contains("cx=\"130000\""));

        let micro = plot(
            &board,
            &job(Layer::FCu, PlotContent::Vias(ViaType::Micro), PlotFlags::empty(), &board),
        );
        assert!(micro.contains("cx=\"140000\""));
        assert!(!micro.contains("cx=\"130000\""));
        let none = plot(
            &board,
            &job(Layer::BCu, PlotContent::Vias(ViaType::Micro), PlotFlags::empty(), &board),
        );
        assert!(!none.contains("<circle"));
    }

    #[test]
    fn vias_on_mask_only_when_not_tented() {
        let mut board = board();
        board.footprints.clear();
        let tented = plot(&board, &job(Layer::FMask, PlotContent::Layer, PlotFlags::empty(), &board));
        assert!(!tented.contains("<circle"));
        let open = plot(&board, &job(Layer::FMask, PlotContent::Layer, PlotFlags::VIAS_ON_MASK, &board));
        assert_eq!(open.matches("<circle").count(), 2);
        // no holes on a non copper layer
        assert!(!open.contains("#FFFFFF"));
    }

    #[test]
    fn negative_plot_inverts() {
        let board = board();
        let svg = plot(&board, &job(Layer::FCu, PlotContent::Layer, PlotFlags::NEGATIVE, &board));
        assert_eq!(svg.matches("fill=\"#000000\"").count(), 1 + 3);
        assert!(svg.contains("#FFFFFF"));
    }

    #[test]
    fn drill_mark_sizes() {
        let mut board = board();
        board.footprints.clear();
        board.vias.truncate(1);
        let mut j = job(Layer::FCu, PlotContent::Layer, PlotFlags::empty(), &board);
        j.drill_marks = DrillMarks::None;
        assert!(!plot(&board, &j).contains("#FFFFFF"));
        j.drill_marks = DrillMarks::Small;
        assert!(plot(&board, &j).contains("r=\"175\" fill=\"#FFFFFF\""));
    }
}
