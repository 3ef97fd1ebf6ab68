//! Page title and footprint field passes.

use super::{key, MutationSet, Pass, Record};
use crate::board::Board;

/// Sets the title block title. A leading `+` appends to the current title.
pub(super) fn set_title(board: &mut Board, title: &str, set: &mut MutationSet) {
    if title.is_empty() {
        return;
    }
    let old = board.title_block.title.clone();
    let new = title
        .strip_prefix('+')
        .map_or_else(|| title.to_string(), |rest| format!("{old}{rest}"));
    tracing::debug!(title = %new, "Setting page title");
    board.title_block.title = new;
    set.push(Record::Title { title: old });
}

/// Copies the resolved component fields to the footprints: `Value` and
/// `Footprint` go to their own slots, the rest become properties.
pub(super) fn fields_to_footprints(board: &mut Board, pass: &Pass<'_>, set: &mut MutationSet) {
    for (index, fp) in board.footprints.iter_mut().enumerate() {
        let Some(component) = pass.component(fp) else {
            continue;
        };
        set.push(Record::FootprintFields {
            fp: key(index, fp),
            value: fp.value.clone(),
            footprint: fp.footprint.clone(),
            properties: fp.properties.clone(),
        });
        if let Some(value) = component.field("Value") {
            fp.value = value.to_string();
        }
        if let Some(footprint) = component.field("Footprint") {
            fp.footprint = footprint.to_string();
        }
        fp.properties = component
            .fields
            .iter()
            .filter(|(k, _)| !k.eq_ignore_ascii_case("value") && !k.eq_ignore_ascii_case("footprint"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
    }
}
