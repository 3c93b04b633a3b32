//! mqflash CLI - programs MQ79-series MCUs over the serial ISP protocol.
//!
//! ## Features
//!
//! - Program raw firmware images from the bench
//! - Validate images against the device's flash capacity without hardware
//! - Erase flash
//! - List serial ports
//! - Shell completion generation

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use console::style;
use env_logger::Env;
use mqflash::{EraseKind, NativePortEnumerator, PortEnumerator, ProgramOptions};
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;

/// mqflash - factory programming tool for MQ79-series MCUs.
///
/// Environment variables:
///   MQFLASH_PORT   - Default serial port
#[derive(Parser)]
#[command(name = "mqflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Serial port to use (first detected port if not specified).
    #[arg(short, long, global = true, env = "MQFLASH_PORT")]
    port: Option<String>,

    /// Verbose output level (-v, -vv, -vvv for increasing detail).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Erase mode applied before programming.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum EraseArg {
    /// Erase the whole chip (default).
    Full,
    /// Erase only the configured address range.
    Partial,
    /// Erase the range but keep the data flash area.
    KeepData,
}

impl From<EraseArg> for EraseKind {
    fn from(arg: EraseArg) -> Self {
        match arg {
            EraseArg::Full => EraseKind::FullChip,
            EraseArg::Partial => EraseKind::Partial,
            EraseArg::KeepData => EraseKind::PartialKeepData,
        }
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Program a raw firmware image into the device.
    Flash {
        /// Path to the raw firmware image (at most 12 KiB).
        image: PathBuf,

        /// Erase mode applied before programming.
        #[arg(long, value_enum, default_value_t = EraseArg::Full)]
        erase: EraseArg,

        /// Write-protect the flash against in-application programming.
        #[arg(long)]
        iap_protect: bool,
    },

    /// Validate an image against the flash capacity. No hardware needed.
    Check {
        /// Path to the raw firmware image.
        image: PathBuf,
    },

    /// Erase the entire flash without programming anything.
    Erase,

    /// List available serial ports.
    Ports {
        /// Output the port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    Completions {
        /// Shell type for completions.
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Pick the serial port: `--port`/`MQFLASH_PORT`, or the first detected
/// port.
fn resolve_port(cli: &Cli) -> Result<String> {
    if let Some(port) = &cli.port {
        return Ok(port.clone());
    }
    let ports =
        NativePortEnumerator::list_ports().context("failed to enumerate serial ports")?;
    ports
        .into_iter()
        .next()
        .map(|p| p.name)
        .context("no serial ports detected; pass --port")
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Flash {
            image,
            erase,
            iap_protect,
        } => {
            let options = ProgramOptions::default()
                .with_erase((*erase).into())
                .with_iap_protect(*iap_protect);
            commands::flash::cmd_flash(cli, image, &options)
        }
        Commands::Check { image } => commands::flash::cmd_check(image),
        Commands::Erase => commands::flash::cmd_erase(cli),
        Commands::Ports { json } => commands::ports::cmd_ports(*json),
        Commands::Completions { shell } => {
            commands::completions::cmd_completions(*shell);
            Ok(())
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}
