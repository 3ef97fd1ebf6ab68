//! Error types for kiprint.
//!
//! Each layer owns its error enum ([`BoardError`], [`ToolError`],
//! [`MutationError`], [`PrintError`]); configuration problems share
//! [`ConfigError`]. The crate level [`Error`] wraps them and decides the
//! process exit code.

use std::path::PathBuf;

use thiserror::Error;

use crate::board::BoardError;
use crate::mutation::MutationError;
use crate::print::PrintError;
use crate::tools::ToolError;

/// Process exit codes.
pub mod exit_code {
    /// Unexpected internal failure.
    pub const INTERNAL_ERROR: u8 = 1;
    /// A required external tool is not installed.
    pub const MISSING_TOOL: u8 = 4;
    /// The DRC reported errors or could not run.
    pub const DRC_ERROR: u8 = 5;
    /// Bad command line arguments.
    pub const EXIT_BAD_ARGS: u8 = 6;
    /// Invalid configuration.
    pub const EXIT_BAD_CONFIG: u8 = 7;
    /// The board file is missing.
    pub const NO_PCB_FILE: u8 = 8;
    /// A PCB print could not be produced.
    pub const PDF_PCB_PRINT: u8 = 13;
    /// The board file could not be parsed.
    pub const CORRUPTED_PCB: u8 = 17;
    /// An external tool is installed but misbehaves.
    pub const WRONG_INSTALL: u8 = 23;
}

/// Errors that can occur during configuration operations.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Configuration file could not be read.
    #[error("failed to read configuration file: {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration file: {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// The underlying YAML error.
        #[source]
        source: serde_yml::Error,
    },

    /// Configuration file not found.
    #[error("configuration file not found: {path}")]
    NotFound {
        /// Path where the configuration file was expected.
        path: PathBuf,
    },

    /// A referenced filter does not exist.
    #[error("unknown filter `{name}` used in {context}")]
    UnknownFilter {
        /// Filter name.
        name: String,
        /// Where it was referenced.
        context: String,
    },

    /// A filter of the wrong kind was used.
    #[error("filter `{name}` used in {context} must be a {expected} filter")]
    WrongFilterKind {
        /// Filter name.
        name: String,
        /// Where it was referenced.
        context: String,
        /// The kind that was expected.
        expected: &'static str,
    },

    /// A referenced variant does not exist.
    #[error("unknown variant `{name}`")]
    UnknownVariant {
        /// Variant name.
        name: String,
    },

    /// A regular expression in the configuration is invalid.
    #[error("invalid regular expression `{pattern}` in {context}")]
    InvalidRegex {
        /// The offending pattern.
        pattern: String,
        /// Where it was used.
        context: String,
        /// The underlying regex error.
        #[source]
        source: regex::Error,
    },

    /// Configuration validation failed.
    #[error("configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation failure.
        message: String,
    },
}

impl ConfigError {
    /// Creates a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
        }
    }

    /// Creates an unknown filter error.
    pub fn unknown_filter(name: impl Into<String>, context: impl Into<String>) -> Self {
        Self::UnknownFilter {
            name: name.into(),
            context: context.into(),
        }
    }

    /// Creates an invalid regex error.
    pub fn invalid_regex(
        pattern: impl Into<String>,
        context: impl Into<String>,
        source: regex::Error,
    ) -> Self {
        Self::InvalidRegex {
            pattern: pattern.into(),
            context: context.into(),
            source,
        }
    }
}

/// Pipeline stage a tool failure happened in. Decides the exit code of
/// [`ToolError::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// PCB print rendering and conversion.
    Print,
    /// DRC preflight.
    Drc,
    /// Archive creation.
    Compress,
    /// Tool information report.
    Info,
}

/// Top level error.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Board snapshot problem.
    #[error(transparent)]
    Board(#[from] BoardError),

    /// Mutation engine problem.
    #[error(transparent)]
    Mutation(#[from] MutationError),

    /// Print compositor problem.
    #[error(transparent)]
    Print(#[from] PrintError),

    /// External tool problem while running a stage.
    #[error("{stage:?} stage: {source}")]
    Tool {
        /// Stage that ran the tool.
        stage: Stage,
        /// The tool error.
        #[source]
        source: ToolError,
    },

    /// The DRC found errors.
    #[error("DRC errors: {count}")]
    DrcViolations {
        /// Number of errors reported.
        count: i32,
    },

    /// An output name given on the command line does not exist.
    #[error("unknown output `{name}`")]
    UnknownOutput {
        /// The requested name.
        name: String,
    },

    /// A ZIP archive could not be written.
    #[error("failed to write archive {path}")]
    Archive {
        /// Archive path.
        path: PathBuf,
        /// The underlying zip error.
        #[source]
        source: zip::result::ZipError,
    },

    /// Generic I/O failure.
    #[error("I/O error on {path}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for crate level operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wraps a tool error raised while running `stage`.
    #[must_use]
    pub const fn tool(stage: Stage, source: ToolError) -> Self {
        Self::Tool { stage, source }
    }

    /// Creates an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        use exit_code::{
            CORRUPTED_PCB, DRC_ERROR, EXIT_BAD_ARGS, EXIT_BAD_CONFIG, INTERNAL_ERROR, MISSING_TOOL,
            NO_PCB_FILE, PDF_PCB_PRINT, WRONG_INSTALL,
        };
        match self {
            Self::Config(_) | Self::Mutation(MutationError::ModelCountMismatch { .. }) => {
                EXIT_BAD_CONFIG
            }
            Self::Board(BoardError::NotFound { .. }) => NO_PCB_FILE,
            Self::Board(BoardError::Corrupted { .. }) => CORRUPTED_PCB,
            Self::Board(_) | Self::Mutation(_) | Self::Io { .. } | Self::Archive { .. } => {
                INTERNAL_ERROR
            }
            Self::Print(PrintError::Tool(ToolError::Missing { .. })) => MISSING_TOOL,
            Self::Print(_) => PDF_PCB_PRINT,
            Self::DrcViolations { .. } => DRC_ERROR,
            Self::UnknownOutput { .. } => EXIT_BAD_ARGS,
            Self::Tool { source, stage } => match (source, stage) {
                (ToolError::Missing { .. }, _) => MISSING_TOOL,
                (_, Stage::Print) => PDF_PCB_PRINT,
                (_, Stage::Drc) => DRC_ERROR,
                (_, Stage::Compress) => WRONG_INSTALL,
                (_, Stage::Info) => INTERNAL_ERROR,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let error = ConfigError::NotFound {
            path: PathBuf::from("/path/to/kiprint.yaml"),
        };
        let msg = error.to_string();
        assert!(msg.contains("not found"));
        assert!(msg.contains("kiprint.yaml"));
    }

    #[test]
    fn validation_error_display() {
        let error = ConfigError::validation("invalid setting");
        assert!(error.to_string().contains("invalid setting"));
    }

    #[test]
    fn exit_codes_by_stage() {
        let missing = || ToolError::Missing {
            tool: "rsvg-convert".into(),
        };
        let failed = || ToolError::Failed {
            tool: "rar".into(),
            code: 2,
            output: String::new(),
        };
        assert_eq!(Error::tool(Stage::Print, missing()).exit_code(), exit_code::MISSING_TOOL);
        assert_eq!(Error::tool(Stage::Compress, missing()).exit_code(), exit_code::MISSING_TOOL);
        assert_eq!(Error::tool(Stage::Compress, failed()).exit_code(), exit_code::WRONG_INSTALL);
        assert_eq!(Error::tool(Stage::Print, failed()).exit_code(), exit_code::PDF_PCB_PRINT);
        assert_eq!(Error::tool(Stage::Drc, failed()).exit_code(), exit_code::DRC_ERROR);
        assert_eq!(Error::DrcViolations { count: 3 }.exit_code(), exit_code::DRC_ERROR);
    }

    #[test]
    fn exit_codes_for_board_and_config() {
        let not_found = Error::from(BoardError::NotFound {
            path: PathBuf::from("x.json"),
        });
        assert_eq!(not_found.exit_code(), exit_code::NO_PCB_FILE);
        let config = Error::from(ConfigError::UnknownVariant { name: "x".into() });
        assert_eq!(config.exit_code(), exit_code::EXIT_BAD_CONFIG);
        let mismatch = Error::from(MutationError::ModelCountMismatch {
            reference: "U1".into(),
            models: 2,
            replacements: 3,
        });
        assert_eq!(mismatch.exit_code(), exit_code::EXIT_BAD_CONFIG);
    }
}
