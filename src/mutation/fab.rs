//! Fabrication layer passes: crosses over not fitted parts, adhesive removal
//! and hiding excluded parts.

use super::{add_graphics, key, park_graphics, MutationSet, Pass};
use crate::board::{Board, GraphicItem, Layer, Point};

/// Width of the cross segments (mm).
pub const CROSS_WIDTH: f64 = 0.12;

/// Draws an X over the Fab drawings of every included, not fitted
/// footprint. Only non-text graphics are measured, one cross per Fab layer
/// that has drawings.
pub(super) fn cross_not_fitted(board: &mut Board, pass: &Pass<'_>, set: &mut MutationSet) {
    for (index, fp) in board.footprints.iter_mut().enumerate() {
        if !pass.is_dnp(fp) {
            continue;
        }
        let mut lines = Vec::new();
        for layer in [Layer::FFab, Layer::BFab] {
            if let Some(r) = fp.shapes_bbox_on(layer) {
                lines.push(GraphicItem::segment(layer, r.min, r.max, CROSS_WIDTH));
                lines.push(GraphicItem::segment(
                    layer,
                    Point::new(r.min.x, r.max.y),
                    Point::new(r.max.x, r.min.y),
                    CROSS_WIDTH,
                ));
            }
        }
        if !lines.is_empty() {
            tracing::debug!(reference = %fp.reference, "Crossing not fitted footprint");
            let k = key(index, fp);
            add_graphics(fp, k, lines, set);
        }
    }
}

/// Parks the adhesive graphics of not fitted footprints on the work layer.
pub(super) fn remove_adhesive(board: &mut Board, pass: &Pass<'_>, set: &mut MutationSet) {
    let work = pass.options.work_layer;
    for (index, fp) in board.footprints.iter_mut().enumerate() {
        if pass.is_dnp(fp) {
            let k = key(index, fp);
            park_graphics(fp, &k, &[Layer::FAdhes, Layer::BAdhes], work, set);
        }
    }
}

/// Parks the Fab graphics of excluded footprints on the work layer.
pub(super) fn hide_excluded(board: &mut Board, pass: &Pass<'_>, set: &mut MutationSet) {
    let work = pass.options.work_layer;
    for (index, fp) in board.footprints.iter_mut().enumerate() {
        if pass.component(fp).is_some_and(|c| !c.included) {
            let k = key(index, fp);
            park_graphics(fp, &k, &[Layer::FFab, Layer::BFab], work, set);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::tests::board_with;
    use crate::mutation::{apply, MutationOptions};
    use crate::variant::Component;

    fn only(options: impl FnOnce(&mut MutationOptions)) -> MutationOptions {
        let mut o = MutationOptions {
            cross_not_fitted: false,
            remove_paste: false,
            remove_adhesive: false,
            ..MutationOptions::default()
        };
        options(&mut o);
        o
    }

    #[test]
    fn cross_uses_shape_bbox() {
        let mut board = board_with(&["R1"]);
        let mut c = Component::new("R1");
        c.fitted = false;
        let set = apply(&mut board, &[c], None, &only(|o| o.cross_not_fitted = true)).unwrap();
        let graphics = &board.footprints[0].graphics;
        assert_eq!(graphics.len(), 5);
        match &graphics[3] {
            GraphicItem::Segment {
                layer,
                width,
                start,
                end,
            } => {
                assert_eq!(*layer, Layer::FFab);
                assert!((width - CROSS_WIDTH).abs() < f64::EPSILON);
                // rect 9..11 x 9.5..10.5 grown by half its 0.1 width
                assert!((start.x - 8.95).abs() < 1e-9);
                assert!((end.y - 10.55).abs() < 1e-9);
            }
            other => panic!("unexpected {other:?}"),
        }
        set.restore(&mut board).unwrap();
        assert_eq!(board.footprints[0].graphics.len(), 3);
    }

    #[test]
    fn excluded_parts_are_not_crossed() {
        let mut board = board_with(&["R1"]);
        let mut c = Component::new("R1");
        c.fitted = false;
        c.included = false;
        let set = apply(&mut board, &[c], None, &only(|o| o.cross_not_fitted = true)).unwrap();
        assert!(set.is_empty());
    }

    #[test]
    fn adhesive_goes_to_work_layer() {
        let mut board = board_with(&["R1"]);
        let mut c = Component::new("R1");
        c.fitted = false;
        let set = apply(&mut board, &[c], None, &only(|o| o.remove_adhesive = true)).unwrap();
        assert_eq!(board.footprints[0].graphics[1].layer(), Layer::Rescue);
        set.restore(&mut board).unwrap();
        assert_eq!(board.footprints[0].graphics[1].layer(), Layer::FAdhes);
    }

    #[test]
    fn hide_excluded_moves_fab_text_too() {
        let mut board = board_with(&["R1"]);
        let mut c = Component::new("R1");
        c.included = false;
        let set = apply(&mut board, &[c], None, &only(|o| o.hide_excluded = true)).unwrap();
        let layers: Vec<Layer> = board.footprints[0].graphics.iter().map(GraphicItem::layer).collect();
        assert_eq!(layers, [Layer::Rescue, Layer::FAdhes, Layer::Rescue]);
        assert_eq!(set.len(), 2);
        set.restore(&mut board).unwrap();
    }
}
