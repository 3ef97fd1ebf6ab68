//! Primitive types of the board model: geometry, pads, graphics, 3D models,
//! tracks, vias and zones.
//!
//! All coordinates are absolute board coordinates in millimetres. As in
//! KiCad, the Y axis grows downwards.

use serde::{Deserialize, Serialize};

use super::layer::{Layer, LayerSet};

/// A point in board coordinates (mm).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// X coordinate in mm.
    pub x: f64,
    /// Y coordinate in mm (grows downwards).
    pub y: f64,
}

impl Point {
    /// Creates a point.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// A three component vector, used by 3D model placement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component.
    pub x: f64,
    /// Y component.
    pub y: f64,
    /// Z component.
    pub z: f64,
}

impl Vec3 {
    /// Creates a vector.
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The identity scale.
    #[must_use]
    pub const fn ones() -> Self {
        Self::new(1.0, 1.0, 1.0)
    }
}

/// An axis aligned rectangle (mm).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Top-left corner.
    pub min: Point,
    /// Bottom-right corner.
    pub max: Point,
}

impl Rect {
    /// Creates the rectangle spanned by two arbitrary corners.
    #[must_use]
    pub fn from_corners(a: Point, b: Point) -> Self {
        Self {
            min: Point::new(a.x.min(b.x), a.y.min(b.y)),
            max: Point::new(a.x.max(b.x), a.y.max(b.y)),
        }
    }

    /// Creates a rectangle centred on `center`.
    #[must_use]
    pub fn centered(center: Point, width: f64, height: f64) -> Self {
        Self::from_corners(
            Point::new(center.x - width / 2.0, center.y - height / 2.0),
            Point::new(center.x + width / 2.0, center.y + height / 2.0),
        )
    }

    /// Width in mm.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.max.x - self.min.x
    }

    /// Height in mm.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.max.y - self.min.y
    }

    /// Centre point.
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(
            (self.min.x + self.max.x) / 2.0,
            (self.min.y + self.max.y) / 2.0,
        )
    }

    /// Smallest rectangle containing both.
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            min: Point::new(self.min.x.min(other.min.x), self.min.y.min(other.min.y)),
            max: Point::new(self.max.x.max(other.max.x), self.max.y.max(other.max.y)),
        }
    }

    /// Grows an optional accumulator with `other`.
    #[must_use]
    pub fn merge(acc: Option<Self>, other: Self) -> Option<Self> {
        Some(acc.map_or(other, |r| r.union(&other)))
    }

    fn inflate(&self, margin: f64) -> Self {
        Self {
            min: Point::new(self.min.x - margin, self.min.y - margin),
            max: Point::new(self.max.x + margin, self.max.y + margin),
        }
    }
}

/// What a footprint text represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextKind {
    /// The reference designator.
    Reference,
    /// The value field.
    Value,
    /// Free user text.
    #[default]
    User,
}

/// A graphical item, either inside a footprint or drawn on the board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GraphicItem {
    /// A straight line.
    Segment {
        /// Layer the item lives on.
        layer: Layer,
        /// Line width in mm.
        width: f64,
        /// Start point.
        start: Point,
        /// End point.
        end: Point,
    },
    /// A rectangle given by two corners.
    Rect {
        /// Layer the item lives on.
        layer: Layer,
        /// Line width in mm.
        width: f64,
        /// First corner.
        start: Point,
        /// Opposite corner.
        end: Point,
        /// Filled interior.
        #[serde(default)]
        filled: bool,
    },
    /// A circle.
    Circle {
        /// Layer the item lives on.
        layer: Layer,
        /// Line width in mm.
        width: f64,
        /// Centre.
        center: Point,
        /// Radius in mm.
        radius: f64,
        /// Filled interior.
        #[serde(default)]
        filled: bool,
    },
    /// A closed polygon.
    Polygon {
        /// Layer the item lives on.
        layer: Layer,
        /// Line width in mm.
        width: f64,
        /// Vertices.
        points: Vec<Point>,
        /// Filled interior.
        #[serde(default = "default_true")]
        filled: bool,
    },
    /// A text.
    Text {
        /// Layer the item lives on.
        layer: Layer,
        /// The text itself.
        text: String,
        /// Anchor (centre) of the text.
        position: Point,
        /// Character height in mm.
        #[serde(default = "default_text_size")]
        size: f64,
        /// What the text represents.
        #[serde(default)]
        kind: TextKind,
        /// Visibility flag.
        #[serde(default = "default_true")]
        visible: bool,
    },
}

const fn default_true() -> bool {
    true
}

const fn default_text_size() -> f64 {
    1.0
}

impl GraphicItem {
    /// Creates a segment.
    #[must_use]
    pub const fn segment(layer: Layer, start: Point, end: Point, width: f64) -> Self {
        Self::Segment {
            layer,
            width,
            start,
            end,
        }
    }

    /// Creates a user text.
    #[must_use]
    pub fn text(layer: Layer, text: impl Into<String>, position: Point) -> Self {
        Self::Text {
            layer,
            text: text.into(),
            position,
            size: default_text_size(),
            kind: TextKind::User,
            visible: true,
        }
    }

    /// Layer the item lives on.
    #[must_use]
    pub const fn layer(&self) -> Layer {
        match self {
            Self::Segment { layer, .. }
            | Self::Rect { layer, .. }
            | Self::Circle { layer, .. }
            | Self::Polygon { layer, .. }
            | Self::Text { layer, .. } => *layer,
        }
    }

    /// Moves the item to another layer.
    pub fn set_layer(&mut self, new_layer: Layer) {
        match self {
            Self::Segment { layer, .. }
            | Self::Rect { layer, .. }
            | Self::Circle { layer, .. }
            | Self::Polygon { layer, .. }
            | Self::Text { layer, .. } => *layer = new_layer,
        }
    }

    /// Returns true for texts.
    #[must_use]
    pub const fn is_text(&self) -> bool {
        matches!(self, Self::Text { .. })
    }

    /// Returns the text content for text items.
    #[must_use]
    pub fn text_content(&self) -> Option<&str> {
        match self {
            Self::Text { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Bounding box, including half the line width.
    #[must_use]
    pub fn bounding_box(&self) -> Option<Rect> {
        match self {
            Self::Segment {
                width, start, end, ..
            }
            | Self::Rect {
                width, start, end, ..
            } => Some(Rect::from_corners(*start, *end).inflate(width / 2.0)),
            Self::Circle {
                width,
                center,
                radius,
                ..
            } => Some(Rect::centered(*center, 2.0 * radius, 2.0 * radius).inflate(width / 2.0)),
            Self::Polygon { width, points, .. } => points
                .iter()
                .map(|p| Rect::from_corners(*p, *p))
                .reduce(|a, b| a.union(&b))
                .map(|r| r.inflate(width / 2.0)),
            Self::Text {
                text,
                position,
                size,
                ..
            } => {
                #[allow(clippy::cast_precision_loss)] // text lengths are small
                let len = text.chars().count().max(1) as f64;
                Some(Rect::centered(*position, len * size * 0.8, *size))
            }
        }
    }
}

/// Pad copper shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PadShape {
    /// Rectangle.
    Rect,
    /// Rounded rectangle.
    #[default]
    RoundRect,
    /// Circle (uses the width as diameter).
    Circle,
    /// Oblong.
    Oval,
}

/// A footprint pad.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pad {
    /// Pad number (e.g. "1", "A1").
    #[serde(default)]
    pub number: String,
    /// Centre position.
    pub position: Point,
    /// Width in mm.
    pub width: f64,
    /// Height in mm.
    pub height: f64,
    /// Copper shape.
    #[serde(default)]
    pub shape: PadShape,
    /// Drill diameter for through-hole pads. None for SMD pads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drill: Option<f64>,
    /// Layers the pad is present on.
    pub layers: LayerSet,
}

impl Pad {
    /// Creates an SMD pad on the front copper, paste and mask layers.
    #[must_use]
    pub fn smd(number: impl Into<String>, position: Point, width: f64, height: f64) -> Self {
        Self {
            number: number.into(),
            position,
            width,
            height,
            shape: PadShape::RoundRect,
            drill: None,
            layers: LayerSet::of(&[Layer::FCu, Layer::FPaste, Layer::FMask]),
        }
    }

    /// Creates a through-hole pad on all copper and both masks.
    #[must_use]
    pub fn through_hole(number: impl Into<String>, position: Point, size: f64, drill: f64) -> Self {
        Self {
            number: number.into(),
            position,
            width: size,
            height: size,
            shape: PadShape::Circle,
            drill: Some(drill),
            layers: LayerSet::of(&[Layer::FCu, Layer::BCu, Layer::FMask, Layer::BMask]),
        }
    }

    /// Returns true for pads with a drill.
    #[must_use]
    pub fn is_through_hole(&self) -> bool {
        self.drill.is_some_and(|d| d > 0.0)
    }

    /// Bounding box of the copper.
    #[must_use]
    pub fn bounding_box(&self) -> Rect {
        Rect::centered(self.position, self.width, self.height)
    }
}

/// A 3D model attached to a footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model3D {
    /// Model file name, may contain `${VAR}` references.
    pub filename: String,
    /// Offset from the footprint origin in mm.
    #[serde(default)]
    pub offset: Vec3,
    /// Scale factors.
    #[serde(default = "Vec3::ones")]
    pub scale: Vec3,
    /// Rotation in degrees.
    #[serde(default)]
    pub rotation: Vec3,
}

impl Model3D {
    /// Creates a model with identity placement.
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            offset: Vec3::default(),
            scale: Vec3::ones(),
            rotation: Vec3::default(),
        }
    }
}

/// A copper track segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Start point.
    pub start: Point,
    /// End point.
    pub end: Point,
    /// Width in mm.
    pub width: f64,
    /// Copper layer.
    pub layer: Layer,
}

/// Via construction type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViaType {
    /// Goes through all copper layers.
    #[default]
    Through,
    /// Blind or buried.
    BlindBuried,
    /// Micro via.
    Micro,
}

impl ViaType {
    /// All via types, in the order their isolation passes are plotted.
    pub const ALL: [Self; 3] = [Self::Through, Self::BlindBuried, Self::Micro];

    /// Numeric code used in plot file suffixes (KiCad's `VIATYPE` values).
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Through => 3,
            Self::BlindBuried => 2,
            Self::Micro => 1,
        }
    }
}

/// A via.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Via {
    /// Centre position.
    pub position: Point,
    /// Annular ring outer diameter in mm.
    pub width: f64,
    /// Drill diameter in mm.
    pub drill: f64,
    /// Construction type.
    #[serde(default)]
    pub via_type: ViaType,
    /// First copper layer.
    #[serde(default = "default_top")]
    pub top: Layer,
    /// Last copper layer.
    #[serde(default = "default_bottom")]
    pub bottom: Layer,
}

const fn default_top() -> Layer {
    Layer::FCu
}

const fn default_bottom() -> Layer {
    Layer::BCu
}

impl Via {
    /// Creates a through via.
    #[must_use]
    pub const fn through(position: Point, width: f64, drill: f64) -> Self {
        Self {
            position,
            width,
            drill,
            via_type: ViaType::Through,
            top: Layer::FCu,
            bottom: Layer::BCu,
        }
    }

    /// Returns true if the via has copper on `layer`.
    #[must_use]
    pub fn is_on_layer(&self, layer: Layer) -> bool {
        if !layer.is_copper() {
            return false;
        }
        let (a, b) = (self.top.id().min(self.bottom.id()), self.top.id().max(self.bottom.id()));
        (a..=b).contains(&layer.id())
    }
}

/// A copper zone, stored with its outline. Fills are not computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    /// Layer of the zone.
    pub layer: Layer,
    /// Outline vertices.
    pub outline: Vec<Point>,
}
