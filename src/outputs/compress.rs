//! `compress`: packs files, usually other outputs, into one archive.
//!
//! ZIP archives are written in process. RAR needs the `rar` tool: a missing
//! `rar` is reported like any other missing tool, a failing one as a broken
//! installation.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use regex::Regex;
use serde::Deserialize;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::Output;
use crate::context::RunContext;
use crate::error::{ConfigError, Error, Stage};
use crate::tools::{self, RAR};

/// Archive format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ArchiveFormat {
    /// ZIP, written directly.
    #[default]
    #[serde(rename = "ZIP", alias = "zip")]
    Zip,
    /// RAR, through the `rar` tool.
    #[serde(rename = "RAR", alias = "rar")]
    Rar,
}

impl ArchiveFormat {
    /// File extension.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Zip => "zip",
            Self::Rar => "rar",
        }
    }
}

/// Compression level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Format default.
    #[default]
    Auto,
    /// No compression.
    Stored,
    /// Compressed (best for RAR).
    Deflated,
}

fn default_source() -> String {
    "*".to_string()
}

fn default_filter() -> String {
    ".*".to_string()
}

/// A set of files to add.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileSource {
    /// Glob relative to the output directory (or the current one).
    #[serde(default = "default_source")]
    pub source: String,
    /// Use the files made by this output instead of `source`.
    #[serde(default)]
    pub from_output: String,
    /// `source` is relative to the current directory.
    #[serde(default)]
    pub from_cwd: bool,
    /// Directory inside the archive. Files keep only their name there,
    /// without it they keep their path relative to the source base.
    #[serde(default)]
    pub dest: String,
    /// Only files whose path matches this regular expression.
    #[serde(default = "default_filter")]
    pub filter: String,
}

/// Options of a `compress` output.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompressOptions {
    /// File name pattern (`%i=compress`, `%x=zip|rar`), the global one
    /// when missing.
    #[serde(default)]
    pub output: Option<String>,
    /// Archive format.
    #[serde(default)]
    pub format: ArchiveFormat,
    /// Compression level.
    #[serde(default)]
    pub compression: Compression,
    /// What to add.
    pub files: Vec<FileSource>,
    /// Remove the files once archived.
    #[serde(default)]
    pub move_files: bool,
}

impl CompressOptions {
    pub(super) fn validate(
        &self,
        context: &str,
        name: &str,
        exists: impl Fn(&str) -> bool,
    ) -> Result<(), ConfigError> {
        if self.files.is_empty() {
            return Err(ConfigError::validation(format!("{context}: empty `files` list")));
        }
        for file in &self.files {
            if !file.from_output.is_empty() {
                if file.from_output == name {
                    return Err(ConfigError::validation(format!("{context}: can't compress itself")));
                }
                if !exists(&file.from_output) {
                    return Err(ConfigError::validation(format!(
                        "{context}: unknown output `{}` in `from_output`",
                        file.from_output
                    )));
                }
            }
            Regex::new(&file.filter)
                .map_err(|e| ConfigError::invalid_regex(&file.filter, format!("{context} filter"), e))?;
            glob::Pattern::new(&file.source).map_err(|e| {
                ConfigError::validation(format!("{context}: invalid `source` `{}`: {e}", file.source))
            })?;
            if file.dest.contains("..") || file.dest.starts_with('/') || file.dest.starts_with('\\') {
                return Err(ConfigError::validation(format!("{context}: invalid `dest` `{}`", file.dest)));
            }
        }
        Ok(())
    }
}

pub(super) fn targets(output: &Output, options: &CompressOptions, ctx: &RunContext) -> Vec<PathBuf> {
    let expander = ctx.expander(output.selection.variant());
    let pattern = options.output.as_deref().unwrap_or(&ctx.global().output);
    vec![output.target(ctx, &expander, pattern, "compress", options.format.extension())]
}

/// A file on disk and its name inside the archive.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    path: PathBuf,
    name: String,
}

/// Name inside the archive: `dest/<file name>`, or the path relative to the
/// source base when there is no `dest`.
fn archive_name(dest: &str, relative: &Path) -> String {
    let dest = dest.trim_matches(|c| c == '/' || c == '\\');
    if dest.is_empty() {
        relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .filter(|c| c != ".")
            .collect::<Vec<_>>()
            .join("/")
    } else {
        let file = relative.file_name().unwrap_or_default().to_string_lossy();
        format!("{dest}/{file}")
    }
}

fn collect(
    output: &Output,
    options: &CompressOptions,
    ctx: &mut RunContext,
    all: &[Output],
    archive: &Path,
) -> Result<Vec<Entry>, Error> {
    let mut entries: Vec<Entry> = Vec::new();
    for source in &options.files {
        let filter = Regex::new(&source.filter).map_err(|e| {
            ConfigError::invalid_regex(&source.filter, format!("output `{}` filter", output.name), e)
        })?;
        let (base, files) = if source.from_output.is_empty() {
            let base = if source.from_cwd { PathBuf::from(".") } else { ctx.out_dir.clone() };
            let pattern = base.join(&source.source);
            let paths = glob::glob(&pattern.to_string_lossy()).map_err(|e| {
                ConfigError::validation(format!("output `{}`: invalid `source`: {e}", output.name))
            })?;
            let files: Vec<PathBuf> = paths
                .filter_map(|p| match p {
                    Ok(path) => Some(path),
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping unreadable path");
                        None
                    }
                })
                .filter(|p| p.is_file())
                .collect();
            (base, files)
        } else {
            let Some(from) = all.iter().find(|o| o.name == source.from_output) else {
                return Err(Error::UnknownOutput {
                    name: source.from_output.clone(),
                });
            };
            if !ctx.is_done(&from.name) {
                tracing::debug!(name = %from.name, "Generating files to compress");
                from.run(ctx, all)?;
            }
            (ctx.out_dir.clone(), from.targets(ctx))
        };
        for path in files {
            if path == archive || !filter.is_match(&path.to_string_lossy()) {
                continue;
            }
            let relative = path
                .strip_prefix(&base)
                .map_or_else(|_| PathBuf::from(path.file_name().unwrap_or_default()), Path::to_path_buf);
            let name = archive_name(&source.dest, &relative);
            if entries.iter().any(|e| e.name == name) {
                tracing::warn!(name = %name, "Duplicated file in archive, skipping");
                continue;
            }
            entries.push(Entry { path, name });
        }
    }
    Ok(entries)
}

fn write_zip(archive: &Path, entries: &[Entry], compression: Compression) -> Result<(), Error> {
    let archive_error = |source| Error::Archive {
        path: archive.to_path_buf(),
        source,
    };
    let file = File::create(archive).map_err(|e| Error::io(archive, e))?;
    let mut zip = ZipWriter::new(file);
    let method = match compression {
        Compression::Stored => zip::CompressionMethod::Stored,
        Compression::Auto | Compression::Deflated => zip::CompressionMethod::Deflated,
    };
    let options = SimpleFileOptions::default()
        .compression_method(method)
        .unix_permissions(0o644);
    for entry in entries {
        let content = std::fs::read(&entry.path).map_err(|e| Error::io(&entry.path, e))?;
        zip.start_file(entry.name.as_str(), options).map_err(archive_error)?;
        zip.write_all(&content).map_err(|e| Error::io(archive, e))?;
    }
    zip.finish().map_err(archive_error)?;
    Ok(())
}

fn write_rar(ctx: &mut RunContext, archive: &Path, entries: &[Entry], compression: Compression) -> Result<(), Error> {
    let rar = ctx.tools.ensure(&RAR).map_err(|e| Error::tool(Stage::Compress, e))?;
    // `rar a` adds to an existing archive
    if archive.exists() {
        std::fs::remove_file(archive).map_err(|e| Error::io(archive, e))?;
    }
    for entry in entries {
        let mut cmd = Command::new(&rar);
        cmd.arg("a");
        match compression {
            Compression::Stored => {
                cmd.arg("-m0");
            }
            Compression::Deflated => {
                cmd.arg("-m5");
            }
            Compression::Auto => {}
        }
        cmd.arg("-ep");
        if let Some((dir, _)) = entry.name.rsplit_once('/') {
            cmd.arg(format!("-ap{dir}"));
        }
        cmd.arg(archive).arg(&entry.path);
        tools::run(RAR.command, &mut cmd).map_err(|e| Error::tool(Stage::Compress, e))?;
    }
    Ok(())
}

pub(super) fn run(output: &Output, options: &CompressOptions, ctx: &mut RunContext, all: &[Output]) -> Result<(), Error> {
    let archive = targets(output, options, ctx).remove(0);
    let entries = collect(output, options, ctx, all, &archive)?;
    if entries.is_empty() {
        tracing::warn!(name = %output.name, "No files to compress");
    }
    if let Some(dir) = archive.parent() {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    match options.format {
        ArchiveFormat::Zip => write_zip(&archive, &entries, options.compression)?,
        ArchiveFormat::Rar => write_rar(ctx, &archive, &entries, options.compression)?,
    }
    tracing::info!(file = %archive.display(), files = entries.len(), "Created");
    if options.move_files {
        for entry in &entries {
            std::fs::remove_file(&entry.path).map_err(|e| Error::io(&entry.path, e))?;
        }
    }
    Ok(())
}
