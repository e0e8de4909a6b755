//! m4gflash CLI - command-line front-end for the m4gflash engine.
//!
//! ## Features
//!
//! - List serial ports, marking boards on the vendor allow-list
//! - Inspect the firmware catalog
//! - Plan a flash: resolve and fetch a payload without touching a device
//! - Reclaim a serial port left locked by a crashed session
//! - Environment variable and config file support

use anyhow::Result;
use clap::{Parser, Subcommand};
use console::style;
use env_logger::Env;
use log::debug;
use m4gflash::{FlashFreq, FlashMode, FlashSize};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod config;
mod serial;

use config::Config;

/// Default catalog base when neither the flag nor the config names one.
const DEFAULT_CATALOG_BASE: &str = "public";

/// Errors with a dedicated exit code.
#[derive(Debug, thiserror::Error)]
pub(crate) enum CliError {
    /// Bad invocation or missing setup (exit 2).
    #[error("{0}")]
    Usage(String),
    /// The operator aborted a prompt (exit 130).
    #[error("{0}")]
    Cancelled(String),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => 2,
            Self::Cancelled(_) => 130,
        }
    }
}

/// m4gflash - serial bootloader flashing front-end.
///
/// Environment variables:
///   M4GFLASH_PORT              - Default serial port
///   M4GFLASH_CATALOG           - Firmware catalog base (URL or directory)
///   M4GFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "m4gflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (chosen interactively if not specified).
    #[arg(short, long, global = true, env = "M4GFLASH_PORT")]
    port: Option<String>,

    /// Firmware catalog base URL or directory.
    #[arg(long, global = true, env = "M4GFLASH_CATALOG")]
    catalog: Option<String>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "M4GFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,

        /// Include ports outside the vendor allow-list.
        #[arg(long)]
        all: bool,
    },

    /// List the packages of the firmware catalog.
    Catalog {
        /// Output the catalog as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Resolve and fetch a payload without touching a device.
    Plan(PlanArgs),

    /// Release leftover stream locks on a serial port and close it.
    Reclaim,
}

/// Arguments of the `plan` command.
#[derive(clap::Args, Debug)]
#[command(group(clap::ArgGroup::new("source").required(true).args(["package", "file"])))]
struct PlanArgs {
    /// Catalog package id.
    #[arg(long)]
    package: Option<String>,

    /// Local firmware binary.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Flash address of the local binary (hex with 0x, or decimal).
    #[arg(long, default_value = "0x0000", requires = "file")]
    address: String,

    /// Flash size passed to the loader.
    #[arg(long, default_value = "keep", requires = "file")]
    flash_size: FlashSize,

    /// Flash mode passed to the loader.
    #[arg(long, default_value = "keep", requires = "file")]
    flash_mode: FlashMode,

    /// Flash frequency passed to the loader.
    #[arg(long, default_value = "keep", requires = "file")]
    flash_freq: FlashFreq,

    /// Erase the whole chip before writing.
    #[arg(long, requires = "file")]
    erase_all: bool,

    /// Output the plan as JSON to stdout.
    #[arg(long)]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if std::env::var_os("NO_COLOR").is_some() || !console::Term::stderr().is_term() {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "m4gflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("Error:").red().bold());
            let code = err
                .downcast_ref::<CliError>()
                .map_or(1, CliError::exit_code);
            ExitCode::from(code)
        },
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };
    let catalog_base = cli
        .catalog
        .clone()
        .or_else(|| config.catalog.base.clone())
        .unwrap_or_else(|| DEFAULT_CATALOG_BASE.to_string());

    match &cli.command {
        Commands::ListPorts { json, all } => commands::ports::cmd_list_ports(&config, *json, *all),
        Commands::Catalog { json } => commands::catalog::cmd_catalog(&catalog_base, *json).await,
        Commands::Plan(args) => commands::plan::cmd_plan(&catalog_base, args, cli.quiet).await,
        Commands::Reclaim => {
            let options = serial::SerialOptions {
                port: cli
                    .port
                    .clone()
                    .or_else(|| config.connection.port.clone()),
                non_interactive: cli.non_interactive,
            };
            commands::reclaim::cmd_reclaim(&config, &options).await
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_command_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_parse_list_ports() {
        let cli = Cli::try_parse_from(["m4gflash", "list-ports", "--json", "--all"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::ListPorts {
                json: true,
                all: true
            }
        ));
    }

    #[test]
    fn test_cli_parse_plan_package() {
        let cli = Cli::try_parse_from(["m4gflash", "plan", "--package", "blink"]).unwrap();
        let Commands::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        assert_eq!(args.package.as_deref(), Some("blink"));
        assert_eq!(args.flash_size, FlashSize::Keep);
    }

    #[test]
    fn test_cli_parse_plan_file_with_params() {
        let cli = Cli::try_parse_from([
            "m4gflash",
            "plan",
            "--file",
            "app.bin",
            "--address",
            "0x10000",
            "--flash-size",
            "4MB",
            "--flash-mode",
            "dio",
            "--erase-all",
        ])
        .unwrap();
        let Commands::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        assert_eq!(args.address, "0x10000");
        assert_eq!(args.flash_size, FlashSize::Mb4);
        assert_eq!(args.flash_mode, FlashMode::Dio);
        assert!(args.erase_all);
    }

    #[test]
    fn test_cli_plan_requires_a_source() {
        assert!(Cli::try_parse_from(["m4gflash", "plan"]).is_err());
        assert!(
            Cli::try_parse_from(["m4gflash", "plan", "--package", "a", "--file", "b.bin"]).is_err()
        );
    }

    #[test]
    fn test_cli_plan_rejects_unknown_flash_mode() {
        assert!(
            Cli::try_parse_from(["m4gflash", "plan", "--file", "a.bin", "--flash-mode", "spi"])
                .is_err()
        );
    }

    #[test]
    fn test_cli_global_options() {
        let cli = Cli::try_parse_from([
            "m4gflash",
            "-vv",
            "--port",
            "/dev/ttyACM0",
            "--non-interactive",
            "reclaim",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert!(cli.non_interactive);
    }

    #[test]
    fn test_cli_error_exit_codes() {
        assert_eq!(CliError::Usage("x".into()).exit_code(), 2);
        assert_eq!(CliError::Cancelled("x".into()).exit_code(), 130);
    }
}
