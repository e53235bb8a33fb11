//! CLI entry point for guotu

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

// Load .env at startup
fn load_env() {
    // Look in the current directory first, then next to the binary
    if dotenvy::dotenv().is_err() {
        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let _ = dotenvy::from_path(dir.join(".env"));
            }
        }
    }
}

mod cli;
mod config;

use cli::Commands;

/// 国土空间 vector data converter
#[derive(Parser)]
#[command(name = "guotu")]
#[command(author, version)]
#[command(about = "Convert land-survey vector data between 国土TXT, Shapefile, GeoJSON, FileGDB and PostGIS")]
#[command(long_about = "Reads a vector layer from one format and writes it to another, \
normalizing CRS, encodings and attribute schemas on the way.\n\nFormats are inferred from \
file extensions and PG: connection strings; pass --from/--to to override.")]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Quiet mode
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before anything reads the environment
    load_env();

    let cli = Cli::parse();

    init_logging(cli.verbose, cli.quiet);

    match cli.command {
        Commands::Convert(args) => cli::cmd_convert(args).await?,
        Commands::Inspect(args) => cli::cmd_inspect(args).await?,
        Commands::Engines => cli::cmd_engines(),
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::WARN,
        (_, 0) => Level::INFO,
        (_, 1) => Level::DEBUG,
        (_, _) => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .init();
}
