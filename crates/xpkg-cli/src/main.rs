//! xpkg CLI - install and run Kubernetes control plane packages

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use xpkg_core::PackageKind;

mod commands;
mod display;
mod error;
mod exit_codes;
mod logging;

use commands::controller::ControllerArgs;
use commands::get::{Output, Target};
use error::CliError;
use logging::LogFormat;

#[derive(Parser)]
#[command(name = "xpkg")]
#[command(author = "xpkg Contributors")]
#[command(version)]
#[command(about = "Package manager and controller for Kubernetes control plane extensions", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter, e.g. `info` or `xpkg_kube=debug` (defaults to RUST_LOG, then info)
    #[arg(long, global = true, env = "XPKG_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Plain, env = "XPKG_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the package and revision controllers
    Controller(ControllerArgs),

    /// List packages or revisions
    Get {
        /// What to list
        #[arg(value_enum)]
        target: Target,

        /// Only packages of this kind (provider or configuration)
        #[arg(long)]
        kind: Option<PackageKind>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = Output::Table)]
        output: Output,
    },

    /// Validate a local package stream and show its contents
    Inspect {
        /// Package YAML stream
        file: PathBuf,

        /// Also check the package's platform constraint against this version
        #[arg(long)]
        platform_version: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();

    let result = match logging::init(cli.log_level.as_deref(), cli.log_format) {
        Ok(()) => run(cli.command).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        let code = e.exit_code();
        eprintln!("{:?}", miette::Report::new(e));
        std::process::exit(code);
    }
}

async fn run(command: Commands) -> Result<(), CliError> {
    match command {
        Commands::Controller(args) => commands::controller::run(args).await,

        Commands::Get {
            target,
            kind,
            output,
        } => commands::get::run(target, kind, output).await,

        Commands::Inspect {
            file,
            platform_version,
        } => commands::inspect::run(&file, platform_version.as_deref()),
    }
}
