//! Board snapshot model.
//!
//! The board is the in-process stand-in for the EDA host's object model: a
//! JSON snapshot holding footprints, board drawings, tracks, vias, zones, the
//! title block and the paper. Everything the mutation engine and the print
//! compositor touch lives here.
//!
//! # Snapshot format
//!
//! ```json
//! {
//!   "pcb_file": "board.kicad_pcb",
//!   "copper_layers": 2,
//!   "paper": {"name": "A4", "width": 297.0, "height": 210.0},
//!   "title_block": {"title": "Demo", "revision": "A", "comments": []},
//!   "footprints": [{"reference": "R1", "value": "10k", "position": {"x": 0, "y": 0}}],
//!   "drawings": [], "tracks": [], "vias": [], "zones": []
//! }
//! ```

mod error;
pub mod layer;
pub mod primitives;

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub use error::{BoardError, BoardResult};
pub use layer::{Layer, LayerSet};
pub use primitives::{
    GraphicItem, Model3D, Pad, PadShape, Point, Rect, TextKind, Track, Vec3, Via, ViaType, Zone,
};

/// Number of comment lines in a title block.
pub const TITLE_BLOCK_COMMENTS: usize = 9;

/// A placed footprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    /// Reference designator (unique key).
    pub reference: String,

    /// Value field.
    #[serde(default)]
    pub value: String,

    /// Library identifier (e.g. `Resistor_SMD:R_0603`).
    #[serde(default)]
    pub footprint: String,

    /// Anchor position.
    #[serde(default)]
    pub position: Point,

    /// Orientation in degrees, counter-clockwise.
    #[serde(default)]
    pub orientation: f64,

    /// Side the footprint is placed on (`F.Cu` or `B.Cu`).
    #[serde(default = "default_side")]
    pub layer: Layer,

    /// Extra fields (properties), in file order.
    #[serde(default)]
    pub properties: IndexMap<String, String>,

    /// Pads.
    #[serde(default)]
    pub pads: Vec<Pad>,

    /// Shapes and texts.
    #[serde(default)]
    pub graphics: Vec<GraphicItem>,

    /// 3D models, in file order.
    #[serde(default)]
    pub models: Vec<Model3D>,
}

const fn default_side() -> Layer {
    Layer::FCu
}

impl Footprint {
    /// Creates an empty footprint on the front side.
    #[must_use]
    pub fn new(reference: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            value: value.into(),
            footprint: String::new(),
            position: Point::default(),
            orientation: 0.0,
            layer: Layer::FCu,
            properties: IndexMap::new(),
            pads: Vec::new(),
            graphics: Vec::new(),
            models: Vec::new(),
        }
    }

    /// Returns true when placed on the bottom side.
    #[must_use]
    pub fn is_back(&self) -> bool {
        self.layer == Layer::BCu
    }

    /// Bounding box of the non-text graphics on `layer`.
    #[must_use]
    pub fn shapes_bbox_on(&self, layer: Layer) -> Option<Rect> {
        self.graphics
            .iter()
            .filter(|g| !g.is_text() && g.layer() == layer)
            .filter_map(GraphicItem::bounding_box)
            .fold(None, Rect::merge)
    }

    /// Bounding box of the courtyard shapes on either side.
    #[must_use]
    pub fn courtyard_bbox(&self) -> Option<Rect> {
        [Layer::FCrtYd, Layer::BCrtYd]
            .into_iter()
            .filter_map(|l| self.shapes_bbox_on(l))
            .fold(None, Rect::merge)
    }

    /// Bounding box of everything: pads, shapes and texts.
    #[must_use]
    pub fn bounding_box(&self) -> Rect {
        let pads = self.pads.iter().map(Pad::bounding_box);
        let graphics = self.graphics.iter().filter_map(GraphicItem::bounding_box);
        pads.chain(graphics)
            .fold(None, Rect::merge)
            .unwrap_or_else(|| Rect::from_corners(self.position, self.position))
    }
}

/// Paper size, already oriented.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    /// Paper name (`A4`, `A3`, `USLetter`, `User`, ...).
    pub name: String,
    /// Width in mm.
    pub width: f64,
    /// Height in mm.
    pub height: f64,
    /// Portrait orientation.
    #[serde(default)]
    pub portrait: bool,
}

impl Default for Paper {
    fn default() -> Self {
        Self {
            name: "A4".to_string(),
            width: 297.0,
            height: 210.0,
            portrait: false,
        }
    }
}

/// Title block fields.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TitleBlock {
    /// Title.
    #[serde(default)]
    pub title: String,
    /// Issue date.
    #[serde(default)]
    pub date: String,
    /// Revision.
    #[serde(default)]
    pub revision: String,
    /// Company name.
    #[serde(default)]
    pub company: String,
    /// Comment lines (up to nine).
    #[serde(default)]
    pub comments: Vec<String>,
}

impl TitleBlock {
    /// Returns comment `n` (1 based), empty when unset.
    #[must_use]
    pub fn comment(&self, n: usize) -> &str {
        n.checked_sub(1)
            .and_then(|i| self.comments.get(i))
            .map_or("", String::as_str)
    }
}

/// A board snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    /// The EDA file this snapshot was exported from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pcb_file: Option<PathBuf>,

    /// Path of the snapshot itself, set by [`Board::load`].
    #[serde(skip)]
    pub path: PathBuf,

    /// Enabled copper layer count.
    #[serde(default = "default_copper_layers")]
    pub copper_layers: u8,

    /// Paper.
    #[serde(default)]
    pub paper: Paper,

    /// Title block.
    #[serde(default)]
    pub title_block: TitleBlock,

    /// Footprints.
    #[serde(default)]
    pub footprints: Vec<Footprint>,

    /// Board level drawings (including the Edge.Cuts outline).
    #[serde(default)]
    pub drawings: Vec<GraphicItem>,

    /// Tracks.
    #[serde(default)]
    pub tracks: Vec<Track>,

    /// Vias.
    #[serde(default)]
    pub vias: Vec<Via>,

    /// Zones.
    #[serde(default)]
    pub zones: Vec<Zone>,
}

const fn default_copper_layers() -> u8 {
    2
}

impl Default for Board {
    fn default() -> Self {
        Self {
            pcb_file: None,
            path: PathBuf::new(),
            copper_layers: default_copper_layers(),
            paper: Paper::default(),
            title_block: TitleBlock::default(),
            footprints: Vec::new(),
            drawings: Vec::new(),
            tracks: Vec::new(),
            vias: Vec::new(),
            zones: Vec::new(),
        }
    }
}

impl Board {
    /// Loads a board snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::NotFound`] if the file does not exist, and
    /// [`BoardError::Corrupted`] if it cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> BoardResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(BoardError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| BoardError::file_read(path, e))?;
        let mut board: Self =
            serde_json::from_str(&content).map_err(|e| BoardError::corrupted(path, e))?;
        board.path = path.to_path_buf();

        tracing::info!(
            path = %path.display(),
            footprints = board.footprints.len(),
            copper_layers = board.copper_layers,
            "Loaded board"
        );
        Ok(board)
    }

    /// Writes the snapshot as pretty printed JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> BoardResult<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).map_err(|e| BoardError::corrupted(path, e))?;
        std::fs::write(path, json).map_err(|e| BoardError::file_write(path, e))
    }

    /// Base name used for `%f` expansions: the EDA file stem when known,
    /// otherwise the snapshot stem.
    #[must_use]
    pub fn file_stem(&self) -> String {
        self.pcb_file
            .as_deref()
            .unwrap_or(&self.path)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Directory holding the board, used to resolve relative paths.
    #[must_use]
    pub fn dir(&self) -> PathBuf {
        self.path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }

    /// The EDA file, made absolute against the snapshot directory.
    #[must_use]
    pub fn pcb_path(&self) -> Option<PathBuf> {
        let file = self.pcb_file.as_ref()?;
        Some(if file.is_absolute() {
            file.clone()
        } else {
            self.dir().join(file)
        })
    }

    /// Looks up a footprint by reference.
    #[must_use]
    pub fn footprint(&self, reference: &str) -> Option<&Footprint> {
        self.footprints.iter().find(|f| f.reference == reference)
    }

    /// Looks up a footprint by reference, mutably.
    ///
    /// # Errors
    ///
    /// Returns [`BoardError::FootprintNotFound`] when no footprint matches.
    pub fn footprint_mut(&mut self, reference: &str) -> BoardResult<&mut Footprint> {
        self.footprints
            .iter_mut()
            .find(|f| f.reference == reference)
            .ok_or_else(|| BoardError::footprint_not_found(reference))
    }

    /// Enabled copper layers, front to back.
    #[must_use]
    pub fn copper_layer_list(&self) -> Vec<Layer> {
        Layer::copper(self.copper_layers)
    }

    /// Returns true if `layer` exists on this board.
    #[must_use]
    pub fn is_layer_enabled(&self, layer: Layer) -> bool {
        !layer.is_copper() || self.copper_layer_list().contains(&layer)
    }

    /// Board outline bounding box: the Edge.Cuts drawings when present,
    /// everything otherwise.
    #[must_use]
    pub fn bounding_box(&self) -> Option<Rect> {
        let edges = self
            .drawings
            .iter()
            .filter(|d| d.layer() == Layer::EdgeCuts)
            .filter_map(GraphicItem::bounding_box)
            .fold(None, Rect::merge);
        if edges.is_some() {
            return edges;
        }
        let drawings = self.drawings.iter().filter_map(GraphicItem::bounding_box);
        let footprints = self.footprints.iter().map(Footprint::bounding_box);
        let tracks = self
            .tracks
            .iter()
            .map(|t| Rect::from_corners(t.start, t.end));
        let vias = self
            .vias
            .iter()
            .map(|v| Rect::centered(v.position, v.width, v.width));
        drawings
            .chain(footprints)
            .chain(tracks)
            .chain(vias)
            .fold(None, Rect::merge)
    }
}
