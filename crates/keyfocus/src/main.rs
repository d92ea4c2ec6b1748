//! Binary entrypoint for keyfocus: remembers a keyboard input source per
//! application (or per window) and restores it when focus returns.
use std::{
    path::{Path, PathBuf},
    process,
};

use clap::{Parser, Subcommand, value_parser};
use config::{Settings, resolve_config_path};
use logging as logshared;
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*};

/// Settings and CLI flag merging.
mod overrides;
/// Engine and backend wiring (macOS only).
#[cfg(target_os = "macos")]
mod runtime;

use crate::overrides::{Overrides, engine_cfg};

#[derive(Parser, Debug)]
#[command(
    name = "keyfocus",
    about = "Per-application keyboard input source switcher",
    version
)]
/// Command-line interface for the `keyfocus` binary.
struct Cli {
    /// Optional subcommand.
    #[command(subcommand)]
    command: Option<Command>,

    /// Logging controls
    #[command(flatten)]
    log: logshared::LogArgs,

    /// Optional path to the settings file (defaults to ~/.keyfocus/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Track input sources per window instead of per application
    #[arg(long)]
    per_window: bool,

    /// Echo suppression window in milliseconds
    #[arg(long, value_name = "MS", value_parser = value_parser!(u64).range(20..=5000))]
    suppression_ms: Option<u64>,

    /// Skip the notification-priming hop on the first switch
    #[arg(long)]
    no_prime: bool,
}

#[derive(Subcommand, Debug)]
/// Top-level CLI subcommands.
enum Command {
    /// Load and validate the settings, print them, then exit.
    Check {
        /// Settings file to check (defaults to --config or ~/.keyfocus/config.toml)
        path: Option<PathBuf>,
    },
    /// List enabled keyboard input sources.
    Sources,
    /// Persist the default input source used for newly seen applications.
    SetDefault {
        /// Input source id, e.g. com.apple.keylayout.US
        id: String,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(cli.log.env_filter())
        .with(fmt::layer().without_time())
        .try_init()
        .ok();

    let config_path = resolve_config_path(cli.config.as_deref());
    match &cli.command {
        Some(Command::Check { path }) => {
            check(&resolve_config_path(path.as_deref().or(cli.config.as_deref())));
        }
        Some(Command::Sources) => list_sources(),
        Some(Command::SetDefault { id }) => set_default(&config_path, id),
        None => run(&cli, config_path),
    }
}

fn check(path: &Path) {
    match config::load(path) {
        Ok(settings) => match toml::to_string_pretty(&settings) {
            Ok(text) => {
                println!("# {}", path.display());
                print!("{text}");
            }
            Err(e) => {
                eprintln!("Failed to render settings: {e}");
                process::exit(1);
            }
        },
        Err(e) => {
            eprintln!("{}", e.pretty());
            process::exit(1);
        }
    }
}

fn set_default(path: &Path, id: &str) {
    #[cfg(target_os = "macos")]
    {
        use keyfocus_engine::InputSources;
        if mac_input::TisInputSources::new().by_id(id).is_none() {
            eprintln!("warning: no enabled input source has id {id}");
        }
    }
    if let Err(e) = Settings::set_default_source(path, id) {
        eprintln!("{}", e.pretty());
        process::exit(1);
    }
    println!("default input source set to {id}");
    println!("send SIGHUP to a running keyfocus to apply it now");
}

#[cfg(target_os = "macos")]
fn list_sources() {
    use keyfocus_engine::InputSources;
    let sources = mac_input::TisInputSources::new();
    let current = sources.current();
    for pref in sources.all() {
        let marker = if current.as_ref() == Some(&pref) { "*" } else { " " };
        println!("{marker} {}\t{}", pref.id(), pref.name());
    }
}

#[cfg(not(target_os = "macos"))]
fn list_sources() {
    eprintln!("keyfocus: input sources are only available on macOS");
    process::exit(1);
}

#[cfg(target_os = "macos")]
fn run(cli: &Cli, config_path: PathBuf) {
    use keyfocus_engine::Error;

    let settings = match config::load(&config_path) {
        Ok(s) => s,
        Err(e) => {
            error!("{}", e.pretty());
            process::exit(1);
        }
    };
    let overrides = Overrides {
        per_window: cli.per_window,
        suppression_ms: cli.suppression_ms,
        no_prime: cli.no_prime,
    };
    let cfg = engine_cfg(&settings, &overrides);
    debug!(?cfg, path = %config_path.display(), "starting");
    if let Err(e) = runtime::run(cfg, config_path) {
        error!(error = %e, "keyfocus failed");
        if matches!(e, Error::PermissionDenied) {
            eprintln!(
                "keyfocus needs Accessibility permission: System Settings > Privacy & Security > Accessibility"
            );
        }
        process::exit(1);
    }
}

#[cfg(not(target_os = "macos"))]
fn run(cli: &Cli, config_path: PathBuf) {
    let settings = config::load(&config_path).unwrap_or_default();
    let overrides = Overrides {
        per_window: cli.per_window,
        suppression_ms: cli.suppression_ms,
        no_prime: cli.no_prime,
    };
    debug!(cfg = ?engine_cfg(&settings, &overrides), "resolved settings");
    error!("keyfocus only runs on macOS");
    process::exit(1);
}
