//! Ratedeck CLI
//!
//! Command-line tools for loading LERG and rate-deck exports into the
//! storage core and inspecting them.
//!
//! # Commands
//!
//! - `summarize` - Load a LERG export and print the region/country summary
//! - `query` - Load a rate deck and print one filtered, sorted page

mod commands;

use clap::{Parser, Subcommand};
use ratedeck_core::Config;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Ratedeck command-line tools.
#[derive(Parser)]
#[command(name = "ratedeck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(global = true, short, long)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load a LERG export (JSON lines) and summarize it
    Summarize {
        /// Input file, one JSON object per line
        input: PathBuf,

        /// Only list the area codes of this region
        #[arg(short, long)]
        region: Option<String>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Load a rate deck (JSON lines) and print one page of it
    Query {
        /// Input file, one JSON object per line
        input: PathBuf,

        /// Exact match, as field=value
        #[arg(long = "eq", value_parser = commands::query::parse_pair)]
        equals: Vec<(String, String)>,

        /// Case-insensitive substring match, as field=text
        #[arg(long, value_parser = commands::query::parse_pair)]
        contains: Vec<(String, String)>,

        /// Numeric lower bound, as field=number
        #[arg(long, value_parser = commands::query::parse_bound)]
        min: Vec<(String, f64)>,

        /// Numeric upper bound, as field=number
        #[arg(long, value_parser = commands::query::parse_bound)]
        max: Vec<(String, f64)>,

        /// Field to sort by
        #[arg(short, long)]
        sort: Option<String>,

        /// Sort descending
        #[arg(long, requires = "sort")]
        desc: bool,

        /// Page to show, as typed by a user
        #[arg(short, long, default_value = "1")]
        page: String,

        /// Records per page
        #[arg(long)]
        page_size: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn load_config(path: Option<&PathBuf>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            Ok(Config::from_json(&json)?)
        }
        None => Ok(Config::default()),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_ref())?;
    let runtime = tokio::runtime::Runtime::new()?;

    match cli.command {
        Commands::Summarize {
            input,
            region,
            format,
        } => {
            runtime.block_on(commands::summarize::run(&input, config, region.as_deref(), &format))?;
        }
        Commands::Query {
            input,
            equals,
            contains,
            min,
            max,
            sort,
            desc,
            page,
            page_size,
            format,
        } => {
            let options = commands::query::QueryOptions {
                equals,
                contains,
                min,
                max,
                sort,
                descending: desc,
                page,
                page_size,
            };
            runtime.block_on(commands::query::run(&input, config, &options, &format))?;
        }
        Commands::Version => {
            println!("Ratedeck CLI v{}", env!("CARGO_PKG_VERSION"));
            println!("Ratedeck Core v{}", ratedeck_core::VERSION);
        }
    }

    Ok(())
}
