//! kiprint: variant aware PCB prints and fabrication documents
//!
//! Loads a run configuration and a board snapshot, runs the preflights and
//! then the selected outputs.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use kiprint::board::{Board, BoardError};
use kiprint::config::{self, Config, Resolved};
use kiprint::context::RunContext;
use kiprint::error::{exit_code, ConfigError, Error};
use kiprint::outputs::{self, Output};
use kiprint::preflight;

/// Variant aware PCB print and fabrication document generator.
///
/// Runs the outputs declared in the configuration on a KiCad board
/// snapshot. Without output names every output that runs by default is
/// generated.
#[derive(Parser, Debug)]
#[command(name = "kiprint")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Outputs to generate
    #[arg(value_name = "OUTPUT")]
    outputs: Vec<String>,

    /// Run configuration (YAML)
    #[arg(short = 'c', long, value_name = "CONFIG_FILE")]
    plot_config: Option<PathBuf>,

    /// Board snapshot (JSON)
    #[arg(short, long, value_name = "BOARD_FILE")]
    board: Option<PathBuf>,

    /// Base directory for the generated files
    #[arg(short = 'd', long, value_name = "DIR", default_value = ".")]
    out_dir: PathBuf,

    /// Skip the preflights
    #[arg(short, long)]
    skip_pre: bool,

    /// Generate every output except the named ones
    #[arg(short, long)]
    invert_sel: bool,

    /// List the preflights and outputs, then exit
    #[arg(short, long)]
    list: bool,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN,
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints the preflights and outputs.
fn list(config: &Config, outputs: &[Output]) {
    let preflights = preflight::enabled(config);
    if !preflights.is_empty() {
        println!("Preflight:");
        for name in preflights {
            println!("- {name}");
        }
    }
    println!("Outputs:");
    for output in outputs {
        let default = if output.run_by_default { "" } else { " (not by default)" };
        let comment = if output.comment.is_empty() {
            String::new()
        } else {
            format!(": {}", output.comment)
        };
        println!(
            "- {} [{}]{comment}{default} [{}]",
            output.name,
            output.kind.name(),
            output.category.join(", ")
        );
    }
}

fn load_board(path: Option<&Path>) -> Result<Board, Error> {
    let path = path.ok_or_else(|| BoardError::NotFound {
        path: PathBuf::from("<none>"),
    })?;
    Ok(Board::load(path)?)
}

/// Runs preflights and outputs.
fn run(args: &Args, config: &Config, resolved: Resolved) -> Result<(), Error> {
    let selected: Vec<String> = {
        let picked = outputs::select(&resolved.outputs, &args.outputs, args.invert_sel)?;
        picked.into_iter().map(|o| o.name.clone()).collect()
    };
    let board = load_board(args.board.as_deref())?;
    let mut ctx = RunContext::new(config, resolved.variants, board, &args.out_dir)?;

    if args.skip_pre {
        info!("Skipping preflights");
    } else {
        preflight::run_preflights(&mut ctx, config)?;
    }

    let all = resolved.outputs;
    let selected: Vec<&Output> = all.iter().filter(|o| selected.contains(&o.name)).collect();
    if selected.is_empty() {
        info!("No outputs to generate");
    }
    outputs::run_outputs(&mut ctx, &all, &selected)
}

/// Entry point for kiprint.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let config_path = args.plot_config.as_deref();
    let cfg = match config::load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if matches!(e, ConfigError::NotFound { .. }) && config_path.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nExpected config at: {}", default_path.display());
                    eprintln!("or {} in the current directory", config::LOCAL_CONFIG_NAME);
                    eprintln!("Create one based on config/example.kiprint.yaml");
                }
            }
            return ExitCode::from(exit_code::EXIT_BAD_CONFIG);
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting kiprint");

    let resolved = match cfg.resolve() {
        Ok(resolved) => resolved,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(exit_code::EXIT_BAD_CONFIG);
        }
    };

    if args.list {
        list(&cfg, &resolved.outputs);
        return ExitCode::SUCCESS;
    }

    match run(&args, &cfg, resolved) {
        Ok(()) => {
            info!("Done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            let mut source = std::error::Error::source(&e);
            while let Some(cause) = source {
                error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn log_levels() {
        assert_eq!(get_log_level(0, true, "trace"), Level::ERROR);
        assert_eq!(get_log_level(0, false, "debug"), Level::DEBUG);
        assert_eq!(get_log_level(0, false, "bogus"), Level::WARN);
        assert_eq!(get_log_level(2, false, "warn"), Level::DEBUG);
    }

    #[test]
    fn parses_the_selection() {
        let args = Args::parse_from(["kiprint", "-c", "k.yaml", "-b", "b.json", "-s", "-i", "print", "info"]);
        assert_eq!(args.outputs, ["print", "info"]);
        assert!(args.skip_pre && args.invert_sel);
        assert_eq!(args.out_dir, PathBuf::from("."));
    }
}
