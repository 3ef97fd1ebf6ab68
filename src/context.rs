//! State shared by the outputs of one run.

use std::collections::HashSet;
use std::path::PathBuf;

use indexmap::IndexMap;

use crate::board::Board;
use crate::config::{Config, GlobalConfig};
use crate::error::ConfigError;
use crate::expand::Expander;
use crate::mutation::MutationOptions;
use crate::print::{Plotter, SvgPlotter};
use crate::tools::ToolRegistry;
use crate::variant::{self, Component, Selection, Variant};

/// The board, tools and resolved configuration for one run.
pub struct RunContext {
    /// The loaded board. Outputs mutate it and restore it.
    pub board: Board,
    /// External tools.
    pub tools: ToolRegistry,
    /// Base directory for every output.
    pub out_dir: PathBuf,
    /// Draws the layers of `pcb_print` outputs.
    pub plotter: Box<dyn Plotter>,
    global: GlobalConfig,
    variants: IndexMap<String, Variant>,
    components: Vec<Component>,
    done: HashSet<String>,
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("board", &self.board.path)
            .field("out_dir", &self.out_dir)
            .field("variants", &self.variants.keys().collect::<Vec<_>>())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    /// Creates the context. Components come from `global.components` when
    /// set, else from the board footprints.
    ///
    /// # Errors
    ///
    /// Returns an error if the component list can't be loaded.
    pub fn new(
        config: &Config,
        variants: IndexMap<String, Variant>,
        board: Board,
        out_dir: impl Into<PathBuf>,
    ) -> Result<Self, ConfigError> {
        let mut tools = ToolRegistry::new(config.tools.clone());
        tools.set_retries(config.global.kiauto_retries);
        let components = match &config.global.components {
            Some(path) => variant::load_components(path)?,
            None => variant::components_from_board(&board),
        };
        Ok(Self {
            board,
            tools,
            out_dir: out_dir.into(),
            plotter: Box::new(SvgPlotter::new()),
            global: config.global.clone(),
            variants,
            components,
            done: HashSet::new(),
        })
    }

    /// Replaces the plotter.
    #[must_use]
    pub fn with_plotter(mut self, plotter: Box<dyn Plotter>) -> Self {
        self.plotter = plotter;
        self
    }

    /// Global options.
    #[must_use]
    pub const fn global(&self) -> &GlobalConfig {
        &self.global
    }

    /// The variant an output asked for; an empty name means the global one.
    #[must_use]
    pub fn variant(&self, name: &str) -> Option<&Variant> {
        let name = if name.is_empty() { &self.global.variant } else { name };
        if name.is_empty() {
            return None;
        }
        self.variants.get(name)
    }

    /// Components with fitted and included flags resolved for an output.
    #[must_use]
    pub fn components_for(&self, selection: &Selection) -> Vec<Component> {
        let mut components = self.components.clone();
        selection.apply(&mut components);
        components
    }

    /// Pattern expander for the current board.
    #[must_use]
    pub fn expander<'a>(&'a self, variant: Option<&'a Variant>) -> Expander<'a> {
        Expander::new(
            &self.board,
            variant,
            &self.global.date_format,
            &self.global.time_format,
        )
    }

    /// Mutations enabled by the global options.
    #[must_use]
    pub fn mutation_options(&self) -> MutationOptions {
        MutationOptions {
            cross_not_fitted: self.global.cross_footprints_for_dnp,
            remove_paste: self.global.remove_solder_paste_for_dnp,
            remove_adhesive: self.global.remove_adhesive_for_dnp,
            work_layer: self.global.work_layer,
            ..MutationOptions::default()
        }
    }

    /// Records a finished output.
    pub fn mark_done(&mut self, name: &str) {
        self.done.insert(name.to_string());
    }

    /// True if the output already ran.
    #[must_use]
    pub fn is_done(&self, name: &str) -> bool {
        self.done.contains(name)
    }
}
