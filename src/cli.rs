//! Command-line interface definitions for mediadupe.
//!
//! This module defines all CLI arguments, subcommands, and options using the clap derive API.
//! Global options (verbosity, color, config file) apply to every subcommand.
//!
//! # Example
//!
//! ```bash
//! # Scan two folders for exact and similar media
//! mediadupe scan ~/Pictures ~/Videos
//!
//! # Only byte-identical files, JSON output for scripting
//! mediadupe scan ~/Pictures --mode exact --json
//!
//! # Show the last saved results, revalidated against the filesystem
//! mediadupe show
//!
//! # Verbose mode for debugging
//! mediadupe -v scan ~/Pictures --threshold 8
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::repository::ScanMode;
use crate::scanner::HASH_BITS;

/// Find duplicate and visually similar photos and videos.
///
/// mediadupe groups byte-identical media by content signature and similar
/// images by perceptual hash, caching every fingerprint so rescans only
/// touch what changed.
#[derive(Debug, Parser)]
#[command(name = "mediadupe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Print errors as JSON objects on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands for mediadupe.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Scan directories for duplicate and similar media
    Scan(ScanArgs),
    /// Show the last saved scan results
    Show(ShowArgs),
    /// Empty every cache table and the saved results
    ClearCache(CacheArgs),
    /// Print the effective configuration as TOML
    Config,
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Directories or files to scan
    #[arg(value_name = "PATH", required = true)]
    pub paths: Vec<PathBuf>,

    /// Which kinds of groups to look for
    #[arg(short, long, value_enum, default_value = "all")]
    pub mode: ModeArg,

    /// Maximum Hamming distance (0-64) for two images to count as similar
    #[arg(short, long, value_name = "N", value_parser = parse_threshold)]
    pub threshold: Option<u32>,

    /// Path to the cache database
    ///
    /// If not specified, the configured or platform-specific path is used.
    #[arg(long, value_name = "PATH")]
    pub cache: Option<PathBuf>,

    /// Do not display progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the show subcommand.
#[derive(Debug, Args)]
pub struct ShowArgs {
    /// Path to the cache database
    #[arg(long, value_name = "PATH")]
    pub cache: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for subcommands that only need the cache location.
#[derive(Debug, Args)]
pub struct CacheArgs {
    /// Path to the cache database
    #[arg(long, value_name = "PATH")]
    pub cache: Option<PathBuf>,
}

/// Scan mode as accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Byte-identical files only
    Exact,
    /// Visually similar images only
    Similar,
    /// Both
    All,
}

impl From<ModeArg> for ScanMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Exact => ScanMode::Exact,
            ModeArg::Similar => ScanMode::Similar,
            ModeArg::All => ScanMode::All,
        }
    }
}

impl std::fmt::Display for ModeArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeArg::Exact => write!(f, "exact"),
            ModeArg::Similar => write!(f, "similar"),
            ModeArg::All => write!(f, "all"),
        }
    }
}

/// Parse a similarity threshold in Hamming bits.
///
/// # Examples
///
/// ```
/// use mediadupe::cli::parse_threshold;
///
/// assert_eq!(parse_threshold("5").unwrap(), 5);
/// assert!(parse_threshold("65").is_err());
/// ```
///
/// # Errors
///
/// Returns an error if the value is not a number between 0 and 64.
pub fn parse_threshold(s: &str) -> Result<u32, String> {
    let value: u32 = s
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if value > HASH_BITS {
        return Err(format!("Threshold must be at most {HASH_BITS}"));
    }
    Ok(value)
}
