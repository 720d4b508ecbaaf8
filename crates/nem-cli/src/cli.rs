use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

use nem_core::{ImputeStrategy, Region, Resolution};

#[derive(Parser, Debug)]
#[command(author, version, about = "NEM telemetry acquisition, validation and imputation pipeline", long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,

    /// Path to a pipeline config JSON file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Storage root (overrides the configured one)
    #[arg(long)]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch, validate, repair and store telemetry for a region
    Collect {
        /// Market region (TAS, SA, VIC, NSW, QLD)
        #[arg(long)]
        region: Region,
        /// Range start, market time (YYYY-MM-DD or YYYY-MM-DDTHH:MM)
        #[arg(long)]
        start: String,
        /// Range end, exclusive
        #[arg(long)]
        end: String,
        /// Grid resolution (5m or 30m)
        #[arg(long, default_value = "30m")]
        resolution: Resolution,
        /// Gap repair strategy (defaults to the configured one)
        #[arg(long)]
        strategy: Option<ImputeStrategy>,
        /// Fail if any gap is left unresolved after imputation
        #[arg(long)]
        require_complete: bool,
        /// Base URL of the telemetry provider
        #[arg(long)]
        provider_url: Option<String>,
    },
    /// Report stored coverage for a region and range
    Load {
        #[arg(long)]
        region: Region,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "30m")]
        resolution: Resolution,
    },
    /// Per-field summary statistics over stored data
    Summarize {
        #[arg(long)]
        region: Region,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "30m")]
        resolution: Resolution,
        /// Comma-separated column names (default: all observed fields)
        #[arg(long)]
        fields: Option<String>,
        /// Include suspect values in the statistics
        #[arg(long)]
        include_flagged: bool,
    },
    /// Write the tabular view consumed by the plotting sink
    Plot {
        #[arg(long)]
        region: Region,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "30m")]
        resolution: Resolution,
        /// Comma-separated column names (default: all observed fields)
        #[arg(long)]
        fields: Option<String>,
        /// Output CSV path
        #[arg(short, long)]
        out: PathBuf,
    },
    /// Show metadata and the first rows of a stored dataset
    Inspect {
        #[arg(long)]
        region: Region,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "30m")]
        resolution: Resolution,
        /// Rows to print
        #[arg(long, default_value_t = 12)]
        rows: usize,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
        /// Write output to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}
