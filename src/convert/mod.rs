//! Parallel conversion orchestrator driving the external `ebook-convert`
//! tool.
//!
//! # Architecture
//!
//! - [`command`] - Format-specific argument vectors for `ebook-convert`
//! - [`KfxPluginGate`] - `calibre-customize` probe for the KFX Output plugin
//! - [`Converter`] - Discovery, dry-run, skip logic, bounded-parallel
//!   dispatch, per-job timeouts, and result aggregation

pub mod command;
mod kfx;
mod orchestrator;

pub use kfx::KfxPluginGate;
pub use orchestrator::{
    ConversionSummary, Converter, ConverterSettings, ProgressFn, find_convertible,
};

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Supported book formats, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BookFormat {
    Mobi,
    Epub,
    Pdf,
    Azw,
    Azw3,
    Kfx,
    Txt,
    Rtf,
    Html,
    Docx,
    Fb2,
    Lit,
    Pdb,
}

impl BookFormat {
    /// Maps a file extension (without dot, any case) to a format.
    #[must_use]
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.trim_start_matches('.').to_lowercase().as_str() {
            "mobi" => Some(Self::Mobi),
            "epub" => Some(Self::Epub),
            "pdf" => Some(Self::Pdf),
            "azw" => Some(Self::Azw),
            "azw3" => Some(Self::Azw3),
            "kfx" => Some(Self::Kfx),
            "txt" => Some(Self::Txt),
            "rtf" => Some(Self::Rtf),
            "html" | "htm" => Some(Self::Html),
            "docx" => Some(Self::Docx),
            "fb2" => Some(Self::Fb2),
            "lit" => Some(Self::Lit),
            "pdb" => Some(Self::Pdb),
            _ => None,
        }
    }

    /// The canonical file extension for this format.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mobi => "mobi",
            Self::Epub => "epub",
            Self::Pdf => "pdf",
            Self::Azw => "azw",
            Self::Azw3 => "azw3",
            Self::Kfx => "kfx",
            Self::Txt => "txt",
            Self::Rtf => "rtf",
            Self::Html => "html",
            Self::Docx => "docx",
            Self::Fb2 => "fb2",
            Self::Lit => "lit",
            Self::Pdb => "pdb",
        }
    }
}

impl fmt::Display for BookFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Conversion quality presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    #[default]
    High,
    Medium,
    Low,
}

/// Caller-tunable conversion options.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub quality: Quality,
    pub include_cover: bool,
    pub preserve_metadata: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            quality: Quality::High,
            include_cover: true,
            preserve_metadata: true,
        }
    }
}

/// Outcome of one conversion job.
///
/// Invariant: `success` without `skipped` means the output file exists and
/// is non-empty. Skipped jobs (pre-existing outputs in a batch) report
/// `success` with `skipped` set so batch outputs stay one-to-one with
/// inputs.
#[derive(Debug, Clone)]
pub struct ConversionResult {
    pub input_file: PathBuf,
    pub output_file: Option<PathBuf>,
    pub input_format: Option<BookFormat>,
    pub output_format: BookFormat,
    pub success: bool,
    pub skipped: bool,
    pub error: Option<String>,
    pub conversion_time: Duration,
    pub file_size_before: Option<u64>,
    pub file_size_after: Option<u64>,
}

impl ConversionResult {
    /// A failure result with an error message.
    #[must_use]
    pub fn failure(
        input_file: impl Into<PathBuf>,
        output_file: Option<PathBuf>,
        input_format: Option<BookFormat>,
        output_format: BookFormat,
        error: impl Into<String>,
    ) -> Self {
        Self {
            input_file: input_file.into(),
            output_file,
            input_format,
            output_format,
            success: false,
            skipped: false,
            error: Some(error.into()),
            conversion_time: Duration::ZERO,
            file_size_before: None,
            file_size_after: None,
        }
    }
}
