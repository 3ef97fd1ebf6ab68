//! Board mutation and restore engine.
//!
//! [`apply`] edits the board according to the resolved components (crosses
//! on not fitted parts, paste and adhesive removal, hidden excluded parts, 3D
//! model masking/replacement/highlight, page title) and returns a
//! [`MutationSet`] holding every original value. [`MutationSet::restore`]
//! consumes it and undoes the edits in reverse order of application.
//!
//! Records are keyed by footprint (index and reference) and item index, so
//! restoring does not depend on the board's iteration order. A failed
//! `apply` restores what it already changed before returning the error.

mod fab;
mod highlight;
mod models;
mod paste;
mod title;

use std::collections::HashMap;
use std::path::PathBuf;

use thiserror::Error;

use crate::board::{Board, Footprint, GraphicItem, Layer, LayerSet, Model3D};
use crate::variant::{Component, Variant};

pub use highlight::{write_highlight_model, HIGHLIGHT_3D_WRL};
pub use models::DISABLE_3D_MODEL_TEXT;

/// Errors raised by the mutation engine.
#[derive(Debug, Error)]
pub enum MutationError {
    /// A footprint has a different number of 3D models than replacements.
    #[error("Found {models} models in component {reference}, but {replacements} replacements provided")]
    ModelCountMismatch {
        /// Footprint reference.
        reference: String,
        /// Models in the footprint.
        models: usize,
        /// Names in the replacement field.
        replacements: usize,
    },

    /// A record points to a footprint or item that is gone.
    #[error("Cannot restore {reference}: {detail}")]
    RestoreMismatch {
        /// Footprint reference.
        reference: String,
        /// What is missing.
        detail: String,
    },
}

impl MutationError {
    fn mismatch(reference: &str, detail: impl Into<String>) -> Self {
        Self::RestoreMismatch {
            reference: reference.to_string(),
            detail: detail.into(),
        }
    }
}

/// Options for the 3D model mutations.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelOptions {
    /// Field holding replacement model names.
    pub field_3d_model: String,
    /// Highlight cubes, if any.
    pub highlight: Option<HighlightOptions>,
}

/// Highlight cube options.
#[derive(Debug, Clone, PartialEq)]
pub struct HighlightOptions {
    /// References to highlight.
    pub references: Vec<String>,
    /// Extra size added to the cube (mm).
    pub padding: f64,
    /// Tall cube over the part instead of a thin one.
    pub on_top: bool,
    /// The VRML cube file.
    pub model: PathBuf,
}

/// Which mutations to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOptions {
    /// Cross not fitted footprints on the Fab layers.
    pub cross_not_fitted: bool,
    /// Remove solder paste from not fitted footprints.
    pub remove_paste: bool,
    /// Remove adhesive from not fitted footprints.
    pub remove_adhesive: bool,
    /// Move the Fab graphics of excluded footprints out of the way.
    pub hide_excluded: bool,
    /// Copy the component fields to the footprints.
    pub fields_to_footprints: bool,
    /// Layer used to park graphics.
    pub work_layer: Layer,
    /// 3D model mutations, when the output needs them.
    pub models: Option<ModelOptions>,
    /// New page title (already expanded). A leading `+` appends.
    pub title: Option<String>,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            cross_not_fitted: true,
            remove_paste: true,
            remove_adhesive: true,
            hide_excluded: false,
            fields_to_footprints: false,
            work_layer: Layer::Rescue,
            models: None,
            title: None,
        }
    }
}

impl MutationOptions {
    /// Only replaces the page title.
    #[must_use]
    pub fn title_only(title: impl Into<String>) -> Self {
        Self {
            cross_not_fitted: false,
            remove_paste: false,
            remove_adhesive: false,
            title: Some(title.into()),
            ..Self::default()
        }
    }
}

/// Identifies a footprint: its index when the set was made, and its
/// reference to validate the index.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FootprintKey {
    index: usize,
    reference: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Record {
    AddedGraphics {
        fp: FootprintKey,
        start: usize,
        count: usize,
    },
    GraphicLayer {
        fp: FootprintKey,
        item: usize,
        layer: Layer,
    },
    PadLayers {
        fp: FootprintKey,
        pad: usize,
        layers: LayerSet,
    },
    ModelFilename {
        fp: FootprintKey,
        model: usize,
        filename: String,
    },
    RemovedModels {
        fp: FootprintKey,
        models: Vec<Model3D>,
    },
    AddedModel {
        fp: FootprintKey,
        index: usize,
    },
    FootprintFields {
        fp: FootprintKey,
        value: String,
        footprint: String,
        properties: indexmap::IndexMap<String, String>,
    },
    Title {
        title: String,
    },
}

/// Everything needed to undo one [`apply`].
#[derive(Debug, Default, PartialEq)]
#[must_use = "a MutationSet must be restored"]
pub struct MutationSet {
    records: Vec<Record>,
}

impl MutationSet {
    /// Number of recorded changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if nothing was changed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    /// Undoes every change, last applied first.
    ///
    /// # Errors
    ///
    /// Returns [`MutationError::RestoreMismatch`] if the board no longer has
    /// an item a record refers to. Records after the failing one (in undo
    /// order) are still applied.
    pub fn restore(self, board: &mut Board) -> Result<(), MutationError> {
        let count = self.records.len();
        let mut first_error = None;
        for record in self.records.into_iter().rev() {
            if let Err(e) = undo(board, record) {
                tracing::warn!(error = %e, "Restore failed");
                first_error.get_or_insert(e);
            }
        }
        tracing::debug!(records = count, "Board restored");
        first_error.map_or(Ok(()), Err)
    }
}

fn locate<'a>(board: &'a mut Board, key: &FootprintKey) -> Result<&'a mut Footprint, MutationError> {
    let by_index = board
        .footprints
        .get(key.index)
        .is_some_and(|f| f.reference == key.reference);
    let found = if by_index {
        board.footprints.get_mut(key.index)
    } else {
        board
            .footprints
            .iter_mut()
            .find(|f| f.reference == key.reference)
    };
    found.ok_or_else(|| MutationError::mismatch(&key.reference, "footprint not found"))
}

fn undo(board: &mut Board, record: Record) -> Result<(), MutationError> {
    match record {
        Record::Title { title } => board.title_block.title = title,
        Record::AddedGraphics { fp, start, count } => {
            let f = locate(board, &fp)?;
            if f.graphics.len() != start + count {
                return Err(MutationError::mismatch(&fp.reference, "added graphics moved"));
            }
            f.graphics.truncate(start);
        }
        Record::GraphicLayer { fp, item, layer } => {
            let f = locate(board, &fp)?;
            let g = f
                .graphics
                .get_mut(item)
                .ok_or_else(|| MutationError::mismatch(&fp.reference, format!("graphic {item}")))?;
            g.set_layer(layer);
        }
        Record::PadLayers { fp, pad, layers } => {
            let f = locate(board, &fp)?;
            let p = f
                .pads
                .get_mut(pad)
                .ok_or_else(|| MutationError::mismatch(&fp.reference, format!("pad {pad}")))?;
            p.layers = layers;
        }
        Record::ModelFilename {
            fp,
            model,
            filename,
        } => {
            let f = locate(board, &fp)?;
            let m = f
                .models
                .get_mut(model)
                .ok_or_else(|| MutationError::mismatch(&fp.reference, format!("model {model}")))?;
            m.filename = filename;
        }
        Record::RemovedModels { fp, models } => {
            let f = locate(board, &fp)?;
            if !f.models.is_empty() {
                return Err(MutationError::mismatch(&fp.reference, "removed models replaced"));
            }
            f.models = models;
        }
        Record::AddedModel { fp, index } => {
            let f = locate(board, &fp)?;
            if f.models.len() != index + 1 {
                return Err(MutationError::mismatch(&fp.reference, "highlight model moved"));
            }
            f.models.truncate(index);
        }
        Record::FootprintFields {
            fp,
            value,
            footprint,
            properties,
        } => {
            let f = locate(board, &fp)?;
            f.value = value;
            f.footprint = footprint;
            f.properties = properties;
        }
    }
    Ok(())
}

/// Context shared by the individual passes.
struct Pass<'a> {
    components: HashMap<&'a str, &'a Component>,
    variant: Option<&'a Variant>,
    options: &'a MutationOptions,
}

impl Pass<'_> {
    fn component(&self, fp: &Footprint) -> Option<&Component> {
        self.components.get(fp.reference.as_str()).copied()
    }

    /// Included but not fitted.
    fn is_dnp(&self, fp: &Footprint) -> bool {
        self.component(fp).is_some_and(|c| c.included && !c.fitted)
    }
}

/// Applies the enabled mutations.
///
/// # Errors
///
/// Returns [`MutationError::ModelCountMismatch`] for a bad 3D replacement
/// field. The board is restored before the error is returned.
pub fn apply(
    board: &mut Board,
    components: &[Component],
    variant: Option<&Variant>,
    options: &MutationOptions,
) -> Result<MutationSet, MutationError> {
    let pass = Pass {
        components: components.iter().map(|c| (c.reference.as_str(), c)).collect(),
        variant,
        options,
    };
    let mut set = MutationSet::default();
    if let Err(e) = apply_all(board, &pass, &mut set) {
        if let Err(restore) = set.restore(board) {
            tracing::warn!(error = %restore, "Partial restore after failed mutation");
        }
        return Err(e);
    }
    tracing::debug!(records = set.len(), "Board mutated");
    Ok(set)
}

fn apply_all(board: &mut Board, pass: &Pass<'_>, set: &mut MutationSet) -> Result<(), MutationError> {
    let options = pass.options;
    if options.fields_to_footprints {
        title::fields_to_footprints(board, pass, set);
    }
    if !pass.components.is_empty() {
        if options.cross_not_fitted {
            fab::cross_not_fitted(board, pass, set);
        }
        if options.remove_paste {
            paste::remove_paste(board, pass, set);
        }
        if options.remove_adhesive {
            fab::remove_adhesive(board, pass, set);
        }
        if options.hide_excluded {
            fab::hide_excluded(board, pass, set);
        }
    }
    if let Some(models) = &options.models {
        if !pass.components.is_empty() {
            models::mask_variant_slots(board, pass, set);
        }
        models::remove_or_replace(board, pass, &models.field_3d_model, set)?;
        if let Some(hl) = &models.highlight {
            highlight::add_highlights(board, hl, set);
        }
    }
    if let Some(title) = &options.title {
        title::set_title(board, title, set);
    }
    Ok(())
}

/// Moves every graphic of `fp` on one of `from` to `to`, recording it.
fn park_graphics(fp: &mut Footprint, key: &FootprintKey, from: &[Layer], to: Layer, set: &mut MutationSet) {
    for (item, g) in fp.graphics.iter_mut().enumerate() {
        let layer = g.layer();
        if from.contains(&layer) {
            g.set_layer(to);
            set.push(Record::GraphicLayer {
                fp: key.clone(),
                item,
                layer,
            });
        }
    }
}

fn key(index: usize, fp: &Footprint) -> FootprintKey {
    FootprintKey {
        index,
        reference: fp.reference.clone(),
    }
}

fn add_graphics(fp: &mut Footprint, key: FootprintKey, items: Vec<GraphicItem>, set: &mut MutationSet) {
    let start = fp.graphics.len();
    let count = items.len();
    fp.graphics.extend(items);
    set.push(Record::AddedGraphics { fp: key, start, count });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{Pad, Point};
    use crate::variant::VariantRule;

    pub(super) fn fab_footprint(reference: &str) -> Footprint {
        let mut fp = Footprint::new(reference, "10k");
        fp.position = Point::new(10.0, 10.0);
        fp.graphics.push(GraphicItem::Rect {
            layer: Layer::FFab,
            width: 0.1,
            start: Point::new(9.0, 9.5),
            end: Point::new(11.0, 10.5),
            filled: false,
        });
        fp.graphics.push(GraphicItem::Segment {
            layer: Layer::FAdhes,
            width: 0.1,
            start: Point::new(9.5, 10.0),
            end: Point::new(10.5, 10.0),
        });
        fp.graphics.push(GraphicItem::text(Layer::FFab, "${REFERENCE}", Point::new(10.0, 10.0)));
        fp.pads.push(Pad::smd("1", Point::new(9.2, 10.0), 0.8, 0.9));
        fp.pads.push(Pad::smd("2", Point::new(10.8, 10.0), 0.8, 0.9));
        fp.models.push(Model3D::new("${KICAD6_3DMODEL_DIR}/R_0603.wrl"));
        fp
    }

    pub(super) fn board_with(refs: &[&str]) -> Board {
        let mut board = Board::default();
        board.title_block.title = "Demo".into();
        board.footprints = refs.iter().map(|r| fab_footprint(r)).collect();
        board
    }

    fn dnp(reference: &str) -> Component {
        let mut c = Component::new(reference);
        c.fitted = false;
        c
    }

    fn all_options() -> MutationOptions {
        MutationOptions {
            hide_excluded: true,
            models: Some(ModelOptions {
                field_3d_model: "_3D_model".into(),
                highlight: None,
            }),
            title: Some("+ (assembly)".into()),
            ..MutationOptions::default()
        }
    }

    #[test]
    fn restore_returns_the_board_unchanged() {
        let mut board = board_with(&["R1", "R2", "R3"]);
        let original = board.clone();
        let mut excluded = Component::new("R3");
        excluded.included = false;
        let comps = vec![dnp("R1"), Component::new("R2"), excluded];

        let set = apply(&mut board, &comps, None, &all_options()).unwrap();
        assert_ne!(board, original);
        assert_eq!(board.title_block.title, "Demo (assembly)");
        set.restore(&mut board).unwrap();
        assert_eq!(board, original);
    }

    #[test]
    fn restore_ignores_iteration_order() {
        let mut board = board_with(&["R1", "R2"]);
        let original = board.clone();
        let set = apply(&mut board, &[dnp("R1"), dnp("R2")], None, &all_options()).unwrap();
        // keys carry the reference, a reordered board still restores
        board.footprints.reverse();
        set.restore(&mut board).unwrap();
        board.footprints.reverse();
        assert_eq!(board, original);
    }

    #[test]
    fn unknown_components_are_untouched() {
        let mut board = board_with(&["R1"]);
        let original = board.clone();
        let set = apply(&mut board, &[dnp("R9")], None, &MutationOptions::default()).unwrap();
        assert!(set.is_empty());
        assert_eq!(board, original);
    }

    #[test]
    fn failed_apply_rolls_back() {
        let mut board = board_with(&["R1", "U1"]);
        board.footprints[1].models.push(Model3D::new("b.wrl"));
        let original = board.clone();
        let u1 = Component::new("U1").with_field("_3D_model", "x.wrl,y.wrl,z.wrl");
        let err = apply(&mut board, &[dnp("R1"), u1], None, &all_options()).unwrap_err();
        assert!(matches!(
            err,
            MutationError::ModelCountMismatch {
                models: 2,
                replacements: 3,
                ..
            }
        ));
        assert!(err.to_string().contains("U1"));
        assert_eq!(board, original);
    }

    #[test]
    fn variant_reaches_slot_masking() {
        let mut board = board_with(&["R1"]);
        board.footprints[0].models.push(Model3D::new("alt.wrl"));
        board.footprints[0]
            .graphics
            .push(GraphicItem::text(Layer::FFab, "%prod:2%", Point::default()));
        let variant = Variant::new(
            "prod",
            VariantRule::KiBom {
                variants: vec!["prod".into()],
                config_field: "Config".into(),
            },
        );
        let set = apply(
            &mut board,
            &[Component::new("R1")],
            Some(&variant),
            &all_options(),
        )
        .unwrap();
        let models = &board.footprints[0].models;
        assert!(models[0].filename.ends_with(DISABLE_3D_MODEL_TEXT));
        assert_eq!(models[1].filename, "alt.wrl");
        set.restore(&mut board).unwrap();
        assert!(!board.footprints[0].models[0].filename.ends_with(DISABLE_3D_MODEL_TEXT));
    }

    #[test]
    fn no_components_leaves_the_slots_alone() {
        let mut board = board_with(&["R1"]);
        board.footprints[0].models.push(Model3D::new("alt.wrl"));
        board.footprints[0]
            .graphics
            .push(GraphicItem::text(Layer::FFab, "%prod:2%", Point::default()));
        let original = board.clone();
        let variant = Variant::new(
            "prod",
            VariantRule::KiBom {
                variants: vec!["prod".into()],
                config_field: "Config".into(),
            },
        );
        let options = MutationOptions {
            title: None,
            ..all_options()
        };
        let set = apply(&mut board, &[], Some(&variant), &options).unwrap();
        assert!(set.is_empty());
        assert_eq!(board, original);
    }
}
