//! kiprint: variant aware PCB prints and fabrication documents
//!
//! kiprint reads a board snapshot exported from KiCad and a YAML run
//! configuration, then produces the configured outputs.
//!
//! # Architecture
//!
//! A run loads the board once and hands it to each output in priority
//! order. Outputs change the board for their own purpose and undo every
//! change before the next one starts:
//!
//! - **Variants**: filters and variants decide which components are fitted
//!   and which are included
//! - **Mutations**: reversible board changes (Fab crosses, paste and glue
//!   removal, 3D models, titles) recorded in a [`mutation::MutationSet`]
//! - **Print compositor**: per layer SVGs merged into pages with frames,
//!   converted to PDF, PNG, EPS or PostScript
//!
//! External programs (`rsvg-convert`, `pcbnew_do`, `rar`, ...) are found
//! and checked by [`tools::ToolRegistry`].
//!
//! # Modules
//!
//! - [`board`]: Board snapshot model
//! - [`config`]: Configuration loading and validation
//! - [`context`]: Per run state
//! - [`error`]: Error types and exit codes
//! - [`expand`]: File name patterns
//! - [`mutation`]: Reversible board changes
//! - [`outputs`]: Output declarations and runners
//! - [`preflight`]: DRC
//! - [`print`]: Print compositor
//! - [`tools`]: External tools
//! - [`variant`]: Filters and variants

pub mod board;
pub mod config;
pub mod context;
pub mod error;
pub mod expand;
pub mod mutation;
pub mod outputs;
pub mod preflight;
pub mod print;
pub mod tools;
pub mod variant;
