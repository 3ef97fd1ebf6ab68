//! Converting merged SVG pages to the output formats.

use std::path::{Path, PathBuf};
use std::process::Command;

use super::PrintError;
use crate::tools::{run, ToolRegistry, Version, GHOSTSCRIPT, IMAGEMAGICK, RSVG_CONVERT};

/// First `rsvg-convert` able to write EPS.
pub const RSVG_EPS_VERSION: Version = Version(2, 40, 0);

fn rsvg(tools: &mut ToolRegistry, format: &str, output: &Path) -> Result<Command, PrintError> {
    let mut cmd = Command::new(tools.ensure(&RSVG_CONVERT)?);
    cmd.args(["-d", "72", "-p", "72", "-f", format, "-o"]).arg(output);
    Ok(cmd)
}

/// Joins the pages into one PDF, one page each.
///
/// # Errors
///
/// Returns a tool error if `rsvg-convert` is missing or fails.
pub fn svg_to_pdf(tools: &mut ToolRegistry, pages: &[PathBuf], output: &Path) -> Result<(), PrintError> {
    tracing::debug!(pages = pages.len(), output = %output.display(), "Creating PDF");
    let mut cmd = rsvg(tools, "pdf", output)?;
    cmd.args(pages);
    run(RSVG_CONVERT.command, &mut cmd)?;
    Ok(())
}

/// Renders a page as a PNG `width` pixels wide.
///
/// # Errors
///
/// Returns a tool error if `rsvg-convert` is missing or fails.
pub fn svg_to_png(tools: &mut ToolRegistry, page: &Path, output: &Path, width: u32) -> Result<(), PrintError> {
    let mut cmd = rsvg(tools, "png", output)?;
    cmd.arg("-w").arg(width.to_string()).arg(page);
    run(RSVG_CONVERT.command, &mut cmd)?;
    Ok(())
}

/// Renders a page as EPS.
///
/// # Errors
///
/// Returns a tool error if `rsvg-convert` is missing, too old or fails.
pub fn svg_to_eps(tools: &mut ToolRegistry, page: &Path, output: &Path) -> Result<(), PrintError> {
    tools.ensure_version(&RSVG_CONVERT, RSVG_EPS_VERSION)?;
    let mut cmd = rsvg(tools, "eps", output)?;
    cmd.arg(page);
    run(RSVG_CONVERT.command, &mut cmd)?;
    Ok(())
}

/// Converts a PDF to PostScript.
///
/// # Errors
///
/// Returns a tool error if Ghostscript is missing or fails.
pub fn pdf_to_ps(tools: &mut ToolRegistry, pdf: &Path, output: &Path) -> Result<(), PrintError> {
    let mut cmd = Command::new(tools.ensure(&GHOSTSCRIPT)?);
    cmd.args(["-q", "-dNOPAUSE", "-dBATCH", "-P-", "-dSAFER", "-sDEVICE=ps2write"])
        .arg(format!("-sOutputFile={}", output.display()))
        .args(["-c", "save", "pop", "-f"])
        .arg(pdf);
    run(GHOSTSCRIPT.command, &mut cmd)?;
    Ok(())
}

/// Converts a PNG to gray using ImageMagick. `work_dir` holds the
/// intermediate files.
///
/// # Errors
///
/// Returns a tool error if ImageMagick is missing or fails, an I/O error
/// for the intermediate files.
pub fn gray_png(tools: &mut ToolRegistry, png: &[u8], work_dir: &Path, name: &str) -> Result<Vec<u8>, PrintError> {
    let input = work_dir.join(format!("{name}.png"));
    let output = work_dir.join(format!("{name}_gray.png"));
    std::fs::write(&input, png).map_err(|e| PrintError::io(&input, e))?;
    let mut cmd = Command::new(tools.ensure(&IMAGEMAGICK)?);
    cmd.arg(&input)
        .args(["-set", "colorspace", "Gray", "-separate", "-average"])
        .arg(&output);
    run(IMAGEMAGICK.command, &mut cmd)?;
    std::fs::read(&output).map_err(|e| PrintError::io(&output, e))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::os::unix::fs::PermissionsExt;

    /// A fake tool logging its arguments and creating the file after `-o`
    /// (or the last argument).
    fn fake(dir: &Path, name: &str, version: &str) -> PathBuf {
        let log = dir.join(format!("{name}.log"));
        let script = format!(
            "#!/bin/sh\n\
             if [ \"$1\" = \"--version\" ]; then echo \"{name} version {version}\"; exit 0; fi\n\
             echo \"$@\" >> '{log}'\n\
             out=\"\"; prev=\"\"; for a in \"$@\"; do if [ \"$prev\" = \"-o\" ]; then out=\"$a\"; fi; prev=\"$a\"; last=\"$a\"; done\n\
             [ -z \"$out\" ] && out=\"$last\"\n\
             echo fake > \"$out\"\n",
            log = log.display()
        );
        let path = dir.join(name);
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn registry(entries: &[(&str, PathBuf)]) -> ToolRegistry {
        let overrides: HashMap<String, PathBuf> =
            entries.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect();
        ToolRegistry::new(overrides)
    }

    #[test]
    fn pdf_joins_pages() {
        let dir = tempfile::tempdir().unwrap();
        let mut tools = registry(&[("rsvg-convert", fake(dir.path(), "rsvg-convert", "2.52.5"))]);
        let out = dir.path().join("out.pdf");
        let pages = [dir.path().join("p1.svg"), dir.path().join("p2.svg")];
        svg_to_pdf(&mut tools, &pages, &out).unwrap();
        assert!(out.is_file());
        let log = std::fs::read_to_string(dir.path().join("rsvg-convert.log")).unwrap();
        assert!(log.starts_with("-d 72 -p 72 -f pdf -o "));
        assert!(log.contains("p1.svg "));
        assert!(log.trim_end().ends_with("p2.svg"));
    }

    #[test]
    fn eps_needs_a_recent_converter() {
        let dir = tempfile::tempdir().unwrap();
        let mut tools = registry(&[("rsvg-convert", fake(dir.path(), "rsvg-convert", "2.38.0"))]);
        let err = svg_to_eps(&mut tools, &dir.path().join("p.svg"), &dir.path().join("p.eps")).unwrap_err();
        assert!(matches!(
            err,
            PrintError::Tool(crate::tools::ToolError::Version { .. })
        ));
    }

    #[test]
    fn ps_through_ghostscript() {
        let dir = tempfile::tempdir().unwrap();
        let gs = dir.path().join("gs");
        std::fs::write(
            &gs,
            format!(
                "#!/bin/sh\necho \"$@\" > '{}'\nfor a in \"$@\"; do case \"$a\" in -sOutputFile=*) echo ps > \"${{a#-sOutputFile=}}\";; esac; done\n",
                dir.path().join("gs.log").display()
            ),
        )
        .unwrap();
        std::fs::set_permissions(&gs, std::fs::Permissions::from_mode(0o755)).unwrap();
        let mut tools = registry(&[("gs", gs)]);
        let out = dir.path().join("out.ps");
        pdf_to_ps(&mut tools, &dir.path().join("in.pdf"), &out).unwrap();
        assert!(out.is_file());
        let log = std::fs::read_to_string(dir.path().join("gs.log")).unwrap();
        assert!(log.contains("-sDEVICE=ps2write"));
        assert!(log.contains("-c save pop -f"));
    }

    #[test]
    fn missing_converter() {
        let mut tools = registry(&[("rsvg-convert", PathBuf::from("/nonexistent/rsvg-convert"))]);
        let err = svg_to_png(&mut tools, Path::new("a.svg"), Path::new("a.png"), 100).unwrap_err();
        assert!(matches!(
            err,
            PrintError::Tool(crate::tools::ToolError::Missing { .. })
        ));
    }
}
