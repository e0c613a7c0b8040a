use clap::{Parser, Subcommand};
use log::{debug, warn};
use std::path::PathBuf;
use std::process::ExitCode;

use diffoci::command::{self, DiffArgs};
use diffoci::logging::{self, VerbosityLevel};
use diffoci::{Context, Error, ExecutionOutcome, LayerEngine, LayoutBackend};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Debug mode (-d for debug, -dd for trace)"
    )]
    debug: u8,

    #[arg(short, long, global = true, help = "Only print warnings and errors")]
    quiet: bool,

    #[arg(
        long,
        global = true,
        env = "DIFFOCI_LAYOUT",
        help = "OCI image layout directory holding the images [default: <data dir>/diffoci/layout]"
    )]
    layout: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Diff images
    Diff(DiffArgs),
}

fn default_layout() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("diffoci")
        .join("layout")
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(VerbosityLevel::from_flags(cli.quiet, cli.debug));

    let ctx = Context::new();
    let handle = ctx.clone();
    if let Err(e) = ctrlc::set_handler(move || handle.cancel()) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let layout = cli.layout.unwrap_or_else(default_layout);
    debug!("Using OCI layout {}", layout.display());

    let code = {
        // The backend is dropped at the end of this block, before exiting.
        let outcome = match &cli.command {
            Commands::Diff(args) => match LayoutBackend::open(&layout) {
                Ok(backend) => command::run(&ctx, args, &backend, &LayerEngine::new()),
                Err(e) => ExecutionOutcome::Failed(Error::Backend(e)),
            },
        };
        outcome.finish()
    };
    ExitCode::from(code)
}
