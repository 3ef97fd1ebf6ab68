use super::{key, MutationSet, Pass, Record};
use crate::board::{Board, Layer, LayerSet};

/// Removes the paste layers from every pad of not fitted footprints.
///
/// A pad left with no layer at all gets its mask aperture back (`F.Mask`
/// when it had front paste, `B.Mask` otherwise).
pub(super) fn remove_paste(board: &mut Board, pass: &Pass<'_>, set: &mut MutationSet) {
    let paste = LayerSet::of(&[Layer::FPaste, Layer::BPaste]);
    for (index, fp) in board.footprints.iter_mut().enumerate() {
        if !pass.is_dnp(fp) {
            continue;
        }
        let k = key(index, fp);
        for (pad_index, pad) in fp.pads.iter_mut().enumerate() {
            let old = pad.layers;
            let mut layers = old;
            layers.remove_set(paste);
            if layers == old {
                continue;
            }
            if layers.is_empty() {
                let mask = if old.contains(Layer::FPaste) {
                    Layer::FMask
                } else {
                    Layer::BMask
                };
                layers.insert(mask);
                tracing::warn!(
                    reference = %k.reference,
                    pad = %pad.number,
                    "Pad with solder paste, but no copper or solder mask aperture"
                );
            }
            pad.layers = layers;
            set.push(Record::PadLayers {
                fp: k.clone(),
                pad: pad_index,
                layers: old,
            });
        }
    }
}
