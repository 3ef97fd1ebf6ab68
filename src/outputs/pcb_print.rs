//! `pcb_print`: the print compositor run with the variant applied.

use std::path::PathBuf;

use super::Output;
use crate::context::RunContext;
use crate::error::Error;
use crate::mutation;
use crate::print::{self, PrintJob, PrintOptions, Theme};

const ID: &str = "assembly";

pub(super) fn targets(output: &Output, options: &PrintOptions, ctx: &RunContext) -> Vec<PathBuf> {
    let expander = ctx.expander(output.selection.variant());
    let pattern = options.output.as_deref().unwrap_or(&ctx.global().output);
    let ext = options.format.extension();
    if options.format.file_per_page() {
        (1..=options.pages.len())
            .map(|n| output.target(ctx, &expander, pattern, &format!("{ID}_page_{n:02}"), ext))
            .collect()
    } else {
        vec![output.target(ctx, &expander, pattern, ID, ext)]
    }
}

pub(super) fn run(output: &Output, options: &PrintOptions, ctx: &mut RunContext) -> Result<(), Error> {
    let targets = targets(output, options, ctx);
    let variant = output.selection.variant();
    let titles: Vec<String> = {
        let expander = ctx.expander(variant);
        options
            .pages
            .iter()
            .map(|page| {
                let title = if page.title.is_empty() { &options.title } else { &page.title };
                expander.expand_title(title)
            })
            .collect()
    };
    let theme = Theme::load(&options.color_theme)?;
    let components = ctx.components_for(&output.selection);

    let mut mutations = ctx.mutation_options();
    mutations.hide_excluded = options.hide_excluded;
    let set = mutation::apply(&mut ctx.board, &components, variant, &mutations)?;
    let job = PrintJob {
        options,
        theme: &theme,
        targets: &targets,
        titles: &titles,
    };
    let result = print::generate(&mut ctx.board, &job, &mut ctx.tools, ctx.plotter.as_mut());
    let restored = set.restore(&mut ctx.board);
    result?;
    restored?;
    Ok(())
}
