//! Highlight cubes: a translucent red box added as an extra 3D model over
//! selected footprints.

use std::io;
use std::path::{Path, PathBuf};

use super::{HighlightOptions, MutationSet, Record};
use crate::board::{Board, Model3D, Vec3};

/// VRML unit cube used for highlights.
pub const HIGHLIGHT_3D_WRL: &str = "#VRML V2.0 utf8
#kiprint generated highlight
Shape {
  appearance Appearance {
    material DEF RED-01 Material {
      ambientIntensity 0.494
      diffuseColor 1.0 0.0 0.0
      specularColor 0.5 0.0 0.0
      emissiveColor 0.0 0.0 0.0
      transparency 0.5
      shininess 0.25
    }
  }
}
Shape {
  geometry Box { size 1 1 1 }
  appearance Appearance {material USE RED-01 }
}
";

/// VRML units per mm.
const VRML_UNIT: f64 = 2.54;

/// Writes the highlight cube into `dir` under a unique name.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_highlight_model(dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join(format!("highlight-{}.wrl", uuid::Uuid::new_v4()));
    std::fs::write(&path, HIGHLIGHT_3D_WRL)?;
    tracing::debug!(path = %path.display(), "Created highlight model");
    Ok(path)
}

/// Adds a highlight cube to every listed footprint.
pub(super) fn add_highlights(board: &mut Board, options: &HighlightOptions, set: &mut MutationSet) {
    let z = (if options.on_top { 100.0 } else { 0.1 }) / VRML_UNIT;
    for (index, fp) in board.footprints.iter_mut().enumerate() {
        if !options.references.contains(&fp.reference) {
            continue;
        }
        let bbox = fp.courtyard_bbox().unwrap_or_else(|| {
            tracing::warn!(reference = %fp.reference, "Missing courtyard");
            fp.bounding_box()
        });
        let center = bbox.center();
        let off_x = center.x - fp.position.x;
        // Y grows downwards on the board, upwards in 3D
        let off_y = -(center.y - fp.position.y);
        let rot = fp.orientation.to_radians();
        let (sin, cos) = rot.sin_cos();
        let model = Model3D {
            filename: options.model.to_string_lossy().into_owned(),
            offset: Vec3::new(off_x * cos + off_y * sin, -off_x * sin + off_y * cos, 0.0),
            scale: Vec3::new(
                (bbox.width() + options.padding) / VRML_UNIT,
                (bbox.height() + options.padding) / VRML_UNIT,
                z,
            ),
            rotation: Vec3::new(0.0, 0.0, fp.orientation),
        };
        fp.models.push(model);
        set.push(Record::AddedModel {
            fp: super::key(index, fp),
            index: fp.models.len() - 1,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{GraphicItem, Layer, Point};
    use crate::mutation::tests::board_with;
    use crate::mutation::{apply, ModelOptions, MutationOptions};

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn options(on_top: bool) -> MutationOptions {
        MutationOptions {
            cross_not_fitted: false,
            remove_paste: false,
            remove_adhesive: false,
            models: Some(ModelOptions {
                field_3d_model: "_3D_model".into(),
                highlight: Some(HighlightOptions {
                    references: vec!["R1".into()],
                    padding: 1.5,
                    on_top,
                    model: PathBuf::from("/tmp/hl.wrl"),
                }),
            }),
            ..MutationOptions::default()
        }
    }

    #[test]
    fn cube_uses_courtyard() {
        let mut board = board_with(&["R1", "R2"]);
        // 4 x 2 courtyard centred 1 mm right and 1 mm below the anchor (10, 10)
        board.footprints[0].graphics.push(GraphicItem::Rect {
            layer: Layer::FCrtYd,
            width: 0.0,
            start: Point::new(9.0, 10.0),
            end: Point::new(13.0, 12.0),
            filled: false,
        });
        board.footprints[0].orientation = 90.0;
        let set = apply(&mut board, &[], None, &options(true)).unwrap();
        let cube = board.footprints[0].models.last().unwrap();
        assert_eq!(cube.filename, "/tmp/hl.wrl");
        assert!(approx_eq(cube.scale.x, 5.5 / 2.54));
        assert!(approx_eq(cube.scale.y, 3.5 / 2.54));
        assert!(approx_eq(cube.scale.z, 100.0 / 2.54));
        assert!(approx_eq(cube.rotation.z, 90.0));
        // offset (1, -1) rotated by 90 degrees
        assert!(approx_eq(cube.offset.x, -1.0));
        assert!(approx_eq(cube.offset.y, -1.0));
        assert_eq!(board.footprints[1].models.len(), 1);
        set.restore(&mut board).unwrap();
        assert_eq!(board.footprints[0].models.len(), 1);
    }

    #[test]
    fn cube_falls_back_to_bbox() {
        let mut board = board_with(&["R1"]);
        let _set = apply(&mut board, &[], None, &options(false)).unwrap();
        let cube = board.footprints[0].models.last().unwrap();
        assert!(approx_eq(cube.scale.z, 0.1 / 2.54));
        assert!(cube.scale.x > 1.5 / 2.54);
    }

    #[test]
    fn highlight_file_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_highlight_model(dir.path()).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.starts_with("#VRML V2.0 utf8"));
        assert!(content.contains("Box { size 1 1 1 }"));
        assert!(content.contains("transparency 0.5"));
    }
}
