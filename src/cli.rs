//! CLI argument definitions for the `bookprep` binary.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};

/// Prepare eBook collections for Amazon/Goodreads integration.
#[derive(Debug, Parser)]
#[command(name = "bookprep", version, about)]
pub struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a JSON config file
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Look up Amazon ASINs by ISBN, title, or book file
    Asin(AsinArgs),
    /// Validate eBook files against their claimed formats
    Validate(ValidateArgs),
    /// Convert books using Calibre's ebook-convert
    Convert(ConvertArgs),
}

#[derive(Debug, Args)]
pub struct AsinArgs {
    /// Look up by ISBN (10 or 13 digits, separators allowed)
    #[arg(long, conflicts_with_all = ["file", "batch_dir"])]
    pub isbn: Option<String>,

    /// Look up by title
    #[arg(long, conflicts_with_all = ["file", "batch_dir"])]
    pub title: Option<String>,

    /// Author, used together with --title
    #[arg(long)]
    pub author: Option<String>,

    /// Look up a single book file (metadata is extracted first)
    #[arg(long, conflicts_with = "batch_dir")]
    pub file: Option<PathBuf>,

    /// Look up every book file in a directory
    #[arg(long, value_name = "DIR")]
    pub batch_dir: Option<PathBuf>,

    /// Worker count for batch lookups
    #[arg(long, default_value_t = 3)]
    pub parallel: usize,

    /// Skip the lookup cache
    #[arg(long)]
    pub no_cache: bool,

    /// Narrow the source set (repeatable; e.g. --source amazon-search)
    #[arg(long = "source", value_name = "NAME")]
    pub sources: Vec<String>,
}

#[derive(Debug, Args)]
pub struct ValidateArgs {
    /// Directory to validate
    pub path: PathBuf,

    /// Walk subdirectories
    #[arg(short, long)]
    pub recursive: bool,

    /// Restrict to these formats (repeatable; e.g. --format epub)
    #[arg(long = "format", value_name = "EXT")]
    pub formats: Vec<String>,

    /// Worker pool size
    #[arg(long, default_value_t = 4)]
    pub workers: usize,

    /// Validate one file at a time
    #[arg(long)]
    pub sequential: bool,

    /// Skip the validation cache
    #[arg(long)]
    pub no_cache: bool,
}

#[derive(Debug, Args)]
pub struct ConvertArgs {
    /// Input files
    pub inputs: Vec<PathBuf>,

    /// Discover convertible files in this directory
    #[arg(long, value_name = "DIR")]
    pub input_dir: Option<PathBuf>,

    /// Recurse when discovering from --input-dir
    #[arg(long)]
    pub recursive: bool,

    /// Only discover this source format from --input-dir
    #[arg(long, value_name = "EXT")]
    pub source_format: Option<String>,

    /// Target format
    #[arg(long, default_value = "epub", value_name = "EXT")]
    pub to: String,

    /// Output directory (config default when omitted)
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,

    /// Worker pool size (capped by conversion.max_parallel)
    #[arg(long, default_value_t = 4)]
    pub parallel: usize,

    /// Quality preset: high, medium, or low
    #[arg(long, default_value = "high")]
    pub quality: String,

    /// Do not carry the cover into the output
    #[arg(long)]
    pub no_cover: bool,

    /// Do not preserve metadata
    #[arg(long)]
    pub no_metadata: bool,

    /// Preview the batch without invoking ebook-convert
    #[arg(long)]
    pub dry_run: bool,

    /// Treat inputs as KFX books (plugin-gated, `_from_kfx` output naming)
    #[arg(long)]
    pub kfx_input: bool,
}
