mod config;
mod config_document;
mod migrate;
mod script;

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;
use waypoint_core::Domain;

use crate::migrate::MigrateArgs;

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Waypoint versioned migration orchestrator.
#[derive(Parser)]
#[command(name = "waypoint", version, about = "Waypoint versioned migration orchestrator")]
struct Cli {
    /// Path to the waypoint.toml configuration file
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations up to the target version
    Migrate {
        /// Target version (default: WAYPOINT_MIGRATION_TARGET, then the app version)
        #[arg(long)]
        target: Option<String>,
        /// Revert migrations down to the target version
        #[arg(long)]
        down: bool,
        /// Show the plan without executing anything
        #[arg(long)]
        dry_run: bool,
        /// Apply the plan without stopping for approval
        #[arg(long)]
        yes: bool,
        /// Exit 0 even when migration units fail
        #[arg(long)]
        failsafe: bool,
        /// Skip all migrations for this run
        #[arg(long)]
        skip_all: bool,
        /// Comma-separated identifier substrings to skip
        #[arg(long)]
        ignore: Option<String>,
        /// Restrict the run to one domain (schema, config, content)
        #[arg(long)]
        domain: Option<Domain>,
    },

    /// Show the migration plan without executing it
    Plan {
        /// Target version (default: WAYPOINT_MIGRATION_TARGET, then the app version)
        #[arg(long)]
        target: Option<String>,
        /// Plan a downgrade to the target version
        #[arg(long)]
        down: bool,
        /// Restrict the plan to one domain (schema, config, content)
        #[arg(long)]
        domain: Option<Domain>,
    },

    /// Show current version markers and pending migrations
    Status {
        /// Target version (default: WAYPOINT_MIGRATION_TARGET, then the app version)
        #[arg(long)]
        target: Option<String>,
    },

    /// List recorded migration runs, newest first
    History {
        /// Maximum number of runs to show (0 = all)
        #[arg(long, default_value = "10")]
        limit: usize,
    },
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            report_error(
                &format!("failed to create tokio runtime: {}", e),
                cli.output,
                cli.quiet,
            );
            process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Migrate {
            target,
            down,
            dry_run,
            yes,
            failsafe,
            skip_all,
            ignore,
            domain,
        } => {
            let args = MigrateArgs {
                target,
                down,
                dry_run,
                yes,
                failsafe,
                skip_all,
                ignore,
                domain,
            };
            rt.block_on(migrate::cmd_migrate(&cli.config, &args, cli.output, cli.quiet))
        }
        Commands::Plan {
            target,
            down,
            domain,
        } => {
            let args = MigrateArgs {
                target,
                down,
                dry_run: true,
                domain,
                ..MigrateArgs::default()
            };
            rt.block_on(migrate::cmd_migrate(&cli.config, &args, cli.output, cli.quiet))
        }
        Commands::Status { target } => {
            rt.block_on(migrate::cmd_status(&cli.config, target, cli.output, cli.quiet))
        }
        Commands::History { limit } => {
            rt.block_on(migrate::cmd_history(&cli.config, limit, cli.output, cli.quiet))
        }
    };

    process::exit(code);
}

/// Install the stderr log subscriber. stdout carries plans and reports.
fn init_logging(verbose: u8, quiet: bool) {
    let default = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, _) => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("error: {}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}
