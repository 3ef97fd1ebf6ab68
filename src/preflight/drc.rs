//! DRC through KiAuto's `pcbnew_do run_drc`.

use std::path::PathBuf;
use std::process::Command;

use tracing::Level;

use crate::board::BoardError;
use crate::config::DrcOptions;
use crate::context::RunContext;
use crate::error::{ConfigError, Error, Stage};
use crate::expand::Target;
use crate::tools::{self, ToolError, Version, KIAUTO};

/// Oldest KiAuto with a usable `run_drc`.
pub const KIAUTO_DRC_VERSION: Version = Version(2, 0, 0);

/// Report file: the global output pattern with `%i=drc` and `%x=txt`.
///
/// The global `dir` is added when `use_dir_for_preflights` is set.
#[must_use]
pub fn drc_report_path(ctx: &RunContext) -> PathBuf {
    let expander = ctx.expander(ctx.variant(""));
    let target = Target::new("drc", "txt");
    let global = ctx.global();
    let mut dir = ctx.out_dir.clone();
    if global.use_dir_for_preflights {
        if let Some(sub) = &global.dir {
            dir = dir.join(expander.expand(sub, &target));
        }
    }
    dir.join(expander.expand(&global.output, &target))
}

/// Maps the KiAuto exit code. Codes above 127 are negated error counts.
fn check_status(code: i32) -> Result<(), Error> {
    if code == 0 {
        return Ok(());
    }
    let code = if code > 127 { -(256 - code) } else { code };
    if code < 0 {
        tracing::error!("DRC errors: {}", -code);
        Err(Error::DrcViolations { count: -code })
    } else {
        tracing::error!("DRC returned {code}");
        Err(Error::tool(
            Stage::Drc,
            ToolError::Failed {
                tool: KIAUTO.command.to_string(),
                code,
                output: String::new(),
            },
        ))
    }
}

/// Runs the DRC on the board's PCB file.
///
/// # Errors
///
/// - [`Error::DrcViolations`] when the DRC reports errors
/// - [`Error::Tool`] for a missing, old or failing KiAuto
/// - a configuration error when the snapshot doesn't name its PCB file,
///   and [`BoardError::NotFound`] when that file doesn't exist
pub fn run_drc(ctx: &mut RunContext, options: &DrcOptions) -> Result<(), Error> {
    let exe = ctx
        .tools
        .ensure_version(&KIAUTO, KIAUTO_DRC_VERSION)
        .map_err(|e| Error::tool(Stage::Drc, e))?;
    let pcb = ctx
        .board
        .pcb_path()
        .ok_or_else(|| ConfigError::validation("the DRC needs the board `pcb_file`"))?;
    if !pcb.is_file() {
        return Err(BoardError::NotFound { path: pcb }.into());
    }
    let report = drc_report_path(ctx);
    if let Some(dir) = report.parent() {
        std::fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    }
    tracing::debug!(report = %report.display(), "DRC report");

    let out_dir = ctx.out_dir.clone();
    let verbose = tracing::enabled!(Level::DEBUG);
    let build = || {
        let mut cmd = Command::new(&exe);
        if verbose {
            cmd.arg("-v");
        }
        cmd.arg("run_drc").arg("-o").arg(&report);
        if let Some(filter) = &options.filter_file {
            cmd.arg("-f").arg(filter);
        }
        if options.exclusions_workaround {
            cmd.arg("-F");
        }
        if options.ignore_unconnected {
            cmd.arg("-i");
        }
        cmd.arg(&pcb).arg(&out_dir);
        cmd
    };
    tracing::info!("Running the DRC");
    let code = tools::exec_with_retry(KIAUTO.command, build, ctx.tools.retries())
        .map_err(|e| Error::tool(Stage::Drc, e))?;
    check_status(code)
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::board::Board;
    use crate::error::exit_code;

    fn context(yaml: &str, out: &Path, pcb_file: Option<&str>) -> RunContext {
        let config = crate::config::parse_config(yaml, Path::new("t.yaml")).unwrap();
        let resolved = config.resolve().unwrap();
        let mut board = Board::default();
        board.path = out.join("demo.json");
        board.pcb_file = pcb_file.map(PathBuf::from);
        RunContext::new(&config, resolved.variants, board, out).unwrap()
    }

    #[test]
    fn exit_code_mapping() {
        assert!(check_status(0).is_ok());
        assert!(matches!(check_status(253), Err(Error::DrcViolations { count: 3 })));
        assert!(matches!(check_status(-2), Err(Error::DrcViolations { count: 2 })));
        let failed = check_status(9).unwrap_err();
        assert_eq!(failed.exit_code(), exit_code::DRC_ERROR);
        assert!(matches!(failed, Error::Tool { .. }));
    }

    #[test]
    fn report_path_uses_the_global_dir() {
        let with_dir = context("global: {dir: reports}", Path::new("out"), None);
        assert_eq!(drc_report_path(&with_dir), PathBuf::from("out/reports/demo-drc.txt"));
        let flat = context(
            "global: {dir: reports, use_dir_for_preflights: false}",
            Path::new("out"),
            None,
        );
        assert_eq!(drc_report_path(&flat), PathBuf::from("out/demo-drc.txt"));
    }

    #[test]
    fn missing_kiauto() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context("tools: {pcbnew_do: /nonexistent/pcbnew_do}", dir.path(), None);
        let err = run_drc(&mut ctx, &DrcOptions::default()).unwrap_err();
        assert_eq!(err.exit_code(), exit_code::MISSING_TOOL);
    }

    #[cfg(unix)]
    mod fake_kiauto {
        use std::os::unix::fs::PermissionsExt;

        use super::*;

        /// Writes a `pcbnew_do` that logs its arguments and exits with `code`.
        fn fake(dir: &Path, code: i32) -> PathBuf {
            let exe = dir.join("pcbnew_do");
            let script = format!(
                "#!/bin/sh\n\
                 if [ \"$1\" = \"--version\" ]; then echo 'pcbnew_do 2.1.0'; exit 0; fi\n\
                 echo \"$@\" > \"{}\"\n\
                 exit {code}\n",
                dir.join("args.txt").display()
            );
            std::fs::write(&exe, script).unwrap();
            std::fs::set_permissions(&exe, std::fs::Permissions::from_mode(0o755)).unwrap();
            std::fs::write(dir.join("demo.kicad_pcb"), "(kicad_pcb)").unwrap();
            exe
        }

        fn yaml(exe: &Path) -> String {
            format!("global: {{kiauto_retries: 1}}\ntools: {{pcbnew_do: {}}}\n", exe.display())
        }

        #[test]
        fn clean_run() {
            let dir = tempfile::tempdir().unwrap();
            let exe = fake(dir.path(), 0);
            let mut ctx = context(&yaml(&exe), dir.path(), Some("demo.kicad_pcb"));
            let options = DrcOptions {
                filter_file: Some(PathBuf::from("filters.txt")),
                exclusions_workaround: true,
                ignore_unconnected: true,
            };
            run_drc(&mut ctx, &options).unwrap();
            let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
            assert!(args.contains("run_drc -o"));
            assert!(args.contains("demo-drc.txt -f filters.txt -F -i"));
            assert!(args.contains("demo.kicad_pcb"));
        }

        #[test]
        fn violations() {
            let dir = tempfile::tempdir().unwrap();
            let exe = fake(dir.path(), 254);
            let mut ctx = context(&yaml(&exe), dir.path(), Some("demo.kicad_pcb"));
            let err = run_drc(&mut ctx, &DrcOptions::default()).unwrap_err();
            assert!(matches!(err, Error::DrcViolations { count: 2 }));
            assert_eq!(err.exit_code(), exit_code::DRC_ERROR);
        }

        #[test]
        fn missing_pcb_file() {
            let dir = tempfile::tempdir().unwrap();
            let exe = fake(dir.path(), 0);
            let mut ctx = context(&yaml(&exe), dir.path(), Some("other.kicad_pcb"));
            let err = run_drc(&mut ctx, &DrcOptions::default()).unwrap_err();
            assert_eq!(err.exit_code(), exit_code::NO_PCB_FILE);
            let mut ctx = context(&yaml(&exe), dir.path(), None);
            let err = run_drc(&mut ctx, &DrcOptions::default()).unwrap_err();
            assert_eq!(err.exit_code(), exit_code::EXIT_BAD_CONFIG);
        }
    }
}
