//! 3D model passes: variant slot masking, removal for not fitted parts and
//! replacement from a component field.
//!
//! Slot markers are footprint texts:
//!
//! - `%name:1,3%` enables models 1 and 3 when the variant is called `name`
//!   (`_default_` applies when no other marker matched),
//! - `$tag:2$` enables model 2 when the variant answers to `tag`.
//!
//! Models outside the enabled slots get [`DISABLE_3D_MODEL_TEXT`] appended
//! to their file name so the 3D viewer can't load them.

use std::sync::LazyLock;

use regex::Regex;

use super::{key, MutationError, MutationSet, Pass, Record};
use crate::board::{Board, Footprint};

/// Suffix that disables a model.
pub const DISABLE_3D_MODEL_TEXT: &str = ".disabled_by_variant";

const DEFAULT_SLOTS: &str = "_default_";

static BY_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^%([^:]+):([\d,]*)%").expect("valid slot pattern"));

static BY_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$([^:]*):([\d,]*)\$").expect("valid slot pattern"));

fn parse_slots(reference: &str, list: &str) -> Vec<usize> {
    list.split(',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| match s.parse() {
            Ok(n) => Some(n),
            Err(_) => {
                tracing::warn!(reference, slot = s, "Invalid 3D model slot");
                None
            }
        })
        .collect()
}

/// Slots enabled for `fp` under the current variant, if any marker applies.
fn enabled_slots(fp: &Footprint, pass: &Pass<'_>) -> Option<Vec<usize>> {
    let mut default = None;
    for text in fp.graphics.iter().filter_map(|g| g.text_content()) {
        let text = text.trim();
        if let Some(caps) = BY_NAME.captures(text) {
            let slots = parse_slots(&fp.reference, &caps[2]);
            if &caps[1] == DEFAULT_SLOTS {
                default = Some(slots);
            } else if pass.variant.is_some_and(|v| v.name() == &caps[1]) {
                return Some(slots);
            }
        } else if let Some(caps) = BY_TAG.captures(text) {
            if pass.variant.is_some_and(|v| v.matches_variant(&caps[1])) {
                return Some(parse_slots(&fp.reference, &caps[2]));
            }
        }
    }
    default
}

/// Disables the models that don't belong to the current variant.
pub(super) fn mask_variant_slots(board: &mut Board, pass: &Pass<'_>, set: &mut MutationSet) {
    for (index, fp) in board.footprints.iter_mut().enumerate() {
        let Some(slots) = enabled_slots(fp, pass) else {
            continue;
        };
        let k = key(index, fp);
        for (i, model) in fp.models.iter_mut().enumerate() {
            if slots.contains(&(i + 1)) || model.filename.ends_with(DISABLE_3D_MODEL_TEXT) {
                continue;
            }
            tracing::debug!(reference = %k.reference, slot = i + 1, file = %model.filename, "Disabling 3D model");
            set.push(Record::ModelFilename {
                fp: k.clone(),
                model: i,
                filename: model.filename.clone(),
            });
            model.filename.push_str(DISABLE_3D_MODEL_TEXT);
        }
    }
}

/// Removes every model of not fitted footprints, and renames the models of
/// the others when `field` has a value.
pub(super) fn remove_or_replace(
    board: &mut Board,
    pass: &Pass<'_>,
    field: &str,
    set: &mut MutationSet,
) -> Result<(), MutationError> {
    for (index, fp) in board.footprints.iter_mut().enumerate() {
        let Some(component) = pass.component(fp) else {
            continue;
        };
        let k = key(index, fp);
        if component.included && !component.fitted {
            if !fp.models.is_empty() {
                let models = std::mem::take(&mut fp.models);
                set.push(Record::RemovedModels { fp: k, models });
            }
            continue;
        }
        let new_model = component.field_or_empty(field).trim();
        if new_model.is_empty() || fp.models.is_empty() {
            continue;
        }
        let names: Vec<&str> = if fp.models.len() > 1 {
            new_model.split(',').map(str::trim).collect()
        } else {
            vec![new_model]
        };
        if names.len() != fp.models.len() {
            return Err(MutationError::ModelCountMismatch {
                reference: k.reference,
                models: fp.models.len(),
                replacements: names.len(),
            });
        }
        tracing::debug!(reference = %k.reference, "Changing 3D models");
        for (i, (model, name)) in fp.models.iter_mut().zip(names).enumerate() {
            let old = std::mem::replace(&mut model.filename, name.to_string());
            set.push(Record::ModelFilename {
                fp: k.clone(),
                model: i,
                filename: old,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{GraphicItem, Layer, Model3D, Point};
    use crate::mutation::tests::board_with;
    use crate::mutation::{apply, ModelOptions, MutationOptions};
    use crate::variant::{Component, Variant, VariantRule};

    fn models_only() -> MutationOptions {
        MutationOptions {
            cross_not_fitted: false,
            remove_paste: false,
            remove_adhesive: false,
            models: Some(ModelOptions {
                field_3d_model: "_3D_model".into(),
                highlight: None,
            }),
            ..MutationOptions::default()
        }
    }

    fn ibom(name: &str, whitelist: &[&str]) -> Variant {
        Variant::new(
            name,
            VariantRule::IBom {
                variant_field: "Variant".into(),
                blacklist: Vec::new(),
                whitelist: whitelist.iter().map(ToString::to_string).collect(),
            },
        )
    }

    fn three_models(marker: &[&str]) -> Board {
        let mut board = board_with(&["U1"]);
        let fp = &mut board.footprints[0];
        fp.models = vec![Model3D::new("a.wrl"), Model3D::new("b.wrl"), Model3D::new("c.wrl")];
        for m in marker {
            fp.graphics.push(GraphicItem::text(Layer::FFab, *m, Point::default()));
        }
        board
    }

    fn names(board: &Board) -> Vec<String> {
        board.footprints[0].models.iter().map(|m| m.filename.clone()).collect()
    }

    #[test]
    fn slot_by_variant_name() {
        let mut board = three_models(&["%default:1%", "%v1:1,3%"]);
        let variant = ibom("v1", &[]);
        let set = apply(&mut board, &[], Some(&variant), &models_only()).unwrap();
        assert_eq!(names(&board), ["a.wrl", "b.wrl.disabled_by_variant", "c.wrl"]);
        set.restore(&mut board).unwrap();
        assert_eq!(names(&board), ["a.wrl", "b.wrl", "c.wrl"]);
    }

    #[test]
    fn slot_by_tag_and_default() {
        let variant = ibom("production", &["T2"]);
        let mut board = three_models(&["$T2:2$"]);
        let _set = apply(&mut board, &[], Some(&variant), &models_only()).unwrap();
        assert_eq!(
            names(&board),
            ["a.wrl.disabled_by_variant", "b.wrl", "c.wrl.disabled_by_variant"]
        );

        let mut board = three_models(&["%_default_:3%", "$T9:1$"]);
        let _set = apply(&mut board, &[], Some(&variant), &models_only()).unwrap();
        assert_eq!(
            names(&board),
            ["a.wrl.disabled_by_variant", "b.wrl.disabled_by_variant", "c.wrl"]
        );
    }

    #[test]
    fn sentinel_is_never_duplicated() {
        let mut board = three_models(&["%_default_:%"]);
        board.footprints[0].models[0].filename = "a.wrl.disabled_by_variant".into();
        let set = apply(&mut board, &[], None, &models_only()).unwrap();
        assert_eq!(names(&board)[0], "a.wrl.disabled_by_variant");
        assert_eq!(set.len(), 2);
        set.restore(&mut board).unwrap();
        // only the suffixes this set added are stripped
        assert_eq!(names(&board), ["a.wrl.disabled_by_variant", "b.wrl", "c.wrl"]);
    }

    #[test]
    fn not_fitted_loses_models() {
        let mut board = three_models(&[]);
        let mut c = Component::new("U1");
        c.fitted = false;
        let set = apply(&mut board, &[c], None, &models_only()).unwrap();
        assert!(board.footprints[0].models.is_empty());
        set.restore(&mut board).unwrap();
        assert_eq!(names(&board).len(), 3);
    }

    #[test]
    fn replacement_from_field() {
        let mut board = three_models(&[]);
        let c = Component::new("U1").with_field("_3D_model", "x.step, y.step ,z.step");
        let set = apply(&mut board, &[c], None, &models_only()).unwrap();
        assert_eq!(names(&board), ["x.step", "y.step", "z.step"]);
        set.restore(&mut board).unwrap();
        assert_eq!(names(&board), ["a.wrl", "b.wrl", "c.wrl"]);
    }

    #[test]
    fn single_model_takes_whole_field() {
        let mut board = board_with(&["R1"]);
        let c = Component::new("R1").with_field("_3D_model", "odd,name.wrl");
        let _set = apply(&mut board, &[c], None, &models_only()).unwrap();
        assert_eq!(names(&board), ["odd,name.wrl"]);
    }
}
