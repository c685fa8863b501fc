mod check;
mod config;
mod install;
mod list;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "asset")]
#[command(about = "Install and inspect content-addressed runtime assets")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: config::GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install assets and print the composed environment
    Install(install::InstallArgs),

    /// List installed assets
    List(list::ListArgs),

    /// Show which assets apply to an entity
    Check(check::CheckArgs),
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_logging(cli.global.verbose);

    match cli.command {
        Commands::Install(args) => {
            let config = cli.global.agent_config()?;
            let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
            rt.block_on(install::execute(args, config))
        }
        Commands::List(args) => {
            let config = cli.global.agent_config()?;
            list::execute(args, &config)
        }
        Commands::Check(args) => check::execute(args),
    }
}

fn main() -> ExitCode {
    match run() {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            eprintln!("Error: {}", e);
            for cause in e.chain().skip(1) {
                eprintln!("  Caused by: {}", cause);
            }
            ExitCode::FAILURE
        }
    }
}
