//! External tool dependencies.
//!
//! Every companion program kiprint shells out to is described by a
//! [`ToolSpec`]. The [`ToolRegistry`] finds them (configured path first,
//! then `PATH`), checks versions and caches the result for the run. A
//! missing tool is reported before any output file is produced.
//!
//! # Tools
//!
//! | Tool | Used for |
//! |------|----------|
//! | `rsvg-convert` | SVG to PDF/PNG/EPS |
//! | `gs` | PDF to PostScript |
//! | `convert` | Gray worksheet bitmaps |
//! | `pcbdraw` | Realistic solder mask |
//! | `pcbnew_do` | GUI frame plot and DRC |
//! | `rar` | RAR archives |

mod runner;

use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub use runner::{exec_with_retry, run, CommandOutput, DEFAULT_RETRIES};

/// Errors raised while looking for or running external tools.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool is not installed.
    #[error("Missing `{tool}` command, please install it")]
    Missing {
        /// Tool command name.
        tool: String,
    },

    /// The tool is too old.
    #[error("`{tool}` version {found} is too old, {required} or newer is needed")]
    Version {
        /// Tool command name.
        tool: String,
        /// Detected version.
        found: Version,
        /// Minimum version.
        required: Version,
    },

    /// The tool ran and returned an error code.
    #[error("`{tool}` failed with exit code {code}")]
    Failed {
        /// Tool command name.
        tool: String,
        /// Exit code (negative when killed by a signal).
        code: i32,
        /// Captured stderr and stdout.
        output: String,
    },

    /// The tool could not be started.
    #[error("Failed to run `{tool}`")]
    Spawn {
        /// Tool command name.
        tool: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
}

/// A `major.minor.patch` version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Version(pub u32, pub u32, pub u32);

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+))?").expect("valid version pattern"));

impl Version {
    /// Finds the first `X.Y[.Z]` in a tool banner.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let caps = VERSION_RE.captures(text)?;
        let num = |i: usize| {
            caps.get(i)
                .and_then(|m| m.as_str().parse().ok())
                .unwrap_or(0)
        };
        Some(Self(num(1), num(2), num(3)))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.0, self.1, self.2)
    }
}

/// Static description of an external tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolSpec {
    /// Command name, also the key for configured paths.
    pub command: &'static str,
    /// Human name.
    pub name: &'static str,
    /// Arguments that print the version.
    pub version_args: &'static [&'static str],
    /// What it is needed for.
    pub role: &'static str,
}

/// librsvg command line converter.
pub const RSVG_CONVERT: ToolSpec = ToolSpec {
    command: "rsvg-convert",
    name: "RSVG tools",
    version_args: &["--version"],
    role: "Create PDF, PNG, EPS and PS formats",
};

/// Ghostscript.
pub const GHOSTSCRIPT: ToolSpec = ToolSpec {
    command: "gs",
    name: "Ghostscript",
    version_args: &["--version"],
    role: "Create PS files",
};

/// ImageMagick.
pub const IMAGEMAGICK: ToolSpec = ToolSpec {
    command: "convert",
    name: "ImageMagick",
    version_args: &["--version"],
    role: "Convert worksheet bitmaps to gray",
};

/// PcbDraw.
pub const PCBDRAW: ToolSpec = ToolSpec {
    command: "pcbdraw",
    name: "PcbDraw",
    version_args: &["--version"],
    role: "Realistic solder mask",
};

/// KiAuto.
pub const KIAUTO: ToolSpec = ToolSpec {
    command: "pcbnew_do",
    name: "KiAuto",
    version_args: &["--version"],
    role: "Print the page frame in GUI mode and run the DRC",
};

/// RAR archiver.
pub const RAR: ToolSpec = ToolSpec {
    command: "rar",
    name: "RAR",
    version_args: &["-iver"],
    role: "Compress in RAR format",
};

/// Every known tool.
pub const ALL_TOOLS: [ToolSpec; 6] = [RSVG_CONVERT, GHOSTSCRIPT, IMAGEMAGICK, PCBDRAW, KIAUTO, RAR];

/// Result of probing one tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStatus {
    /// The tool.
    pub tool: ToolSpec,
    /// Where it was found.
    pub path: Option<PathBuf>,
    /// Detected version.
    pub version: Option<Version>,
}

/// Finds tools and remembers where they are.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    overrides: HashMap<String, PathBuf>,
    found: HashMap<&'static str, PathBuf>,
    versions: HashMap<&'static str, Option<Version>>,
    retries: Option<u32>,
}

impl ToolRegistry {
    /// Creates a registry with configured paths, keyed by command name.
    #[must_use]
    pub fn new(overrides: HashMap<String, PathBuf>) -> Self {
        Self {
            overrides,
            ..Self::default()
        }
    }

    /// Sets the attempts used for the KiAuto tools.
    pub fn set_retries(&mut self, retries: u32) {
        self.retries = Some(retries);
    }

    /// Attempts used for the KiAuto tools.
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.retries.unwrap_or(DEFAULT_RETRIES)
    }

    /// Locates a tool without running it.
    #[must_use]
    pub fn locate(&self, tool: &ToolSpec) -> Option<PathBuf> {
        if let Some(path) = self.found.get(tool.command) {
            return Some(path.clone());
        }
        match self.overrides.get(tool.command) {
            Some(path) => is_executable(path).then(|| path.clone()),
            None => search_path(tool.command),
        }
    }

    /// Returns the tool path, failing when it isn't installed.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Missing`].
    pub fn ensure(&mut self, tool: &ToolSpec) -> Result<PathBuf, ToolError> {
        let path = self.locate(tool).ok_or_else(|| ToolError::Missing {
            tool: tool.command.to_string(),
        })?;
        if !self.found.contains_key(tool.command) {
            tracing::debug!(tool = tool.command, path = %path.display(), "Found tool");
            self.found.insert(tool.command, path.clone());
        }
        Ok(path)
    }

    /// Like [`ToolRegistry::ensure`], also checking a minimum version.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Missing`] or [`ToolError::Version`]. A version
    /// that can't be detected is accepted with a warning.
    pub fn ensure_version(&mut self, tool: &ToolSpec, required: Version) -> Result<PathBuf, ToolError> {
        let path = self.ensure(tool)?;
        match self.version(tool) {
            Some(found) if found < required => Err(ToolError::Version {
                tool: tool.command.to_string(),
                found,
                required,
            }),
            Some(_) => Ok(path),
            None => {
                tracing::warn!(tool = tool.command, "Unable to determine the version");
                Ok(path)
            }
        }
    }

    /// Detected tool version, cached.
    pub fn version(&mut self, tool: &ToolSpec) -> Option<Version> {
        if let Some(v) = self.versions.get(tool.command) {
            return *v;
        }
        let version = self.locate(tool).and_then(|path| {
            let mut cmd = Command::new(path);
            cmd.args(tool.version_args);
            let output = run(tool.command, &mut cmd).ok()?;
            Version::parse(&output.stdout).or_else(|| Version::parse(&output.stderr))
        });
        self.versions.insert(tool.command, version);
        version
    }

    /// Looks up every known tool.
    pub fn status(&mut self) -> Vec<ToolStatus> {
        ALL_TOOLS
            .iter()
            .map(|tool| ToolStatus {
                tool: *tool,
                path: self.locate(tool),
                version: self.version(tool),
            })
            .collect()
    }
}

fn search_path(command: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH").unwrap_or_else(OsString::new);
    std::env::split_paths(&paths)
        .flat_map(|dir| executable_names(command).map(move |name| dir.join(name)))
        .find(|candidate| is_executable(candidate))
}

fn executable_names(command: &str) -> impl Iterator<Item = String> + '_ {
    let extensions: &[&str] = if cfg!(windows) { &[".exe", ".bat", ""] } else { &[""] };
    extensions.iter().map(move |ext| format!("{command}{ext}"))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .is_ok_and(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}
