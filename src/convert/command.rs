//! Argument-vector construction for the external `ebook-convert` tool.
//!
//! The exact argument shapes matter: these are the option sets the
//! conversion pipeline has been tuned with, per target format and quality
//! preset.

use std::path::Path;

use super::{BookFormat, ConvertOptions, Quality};

/// Builds the `ebook-convert` argument vector for one job.
///
/// The returned vector starts with the input and output paths; the program
/// name itself is supplied by the orchestrator.
#[must_use]
pub fn build_command(
    input: &Path,
    output: &Path,
    format: BookFormat,
    options: &ConvertOptions,
    kfx_plugin_available: bool,
) -> Vec<String> {
    let mut cmd = vec![
        input.display().to_string(),
        output.display().to_string(),
    ];

    match format {
        BookFormat::Kfx => {
            cmd.extend(
                [
                    "--output-profile",
                    "kindle_fire",
                    "--no-inline-toc",
                    "--margin-left",
                    "5",
                    "--margin-right",
                    "5",
                    "--margin-top",
                    "5",
                    "--margin-bottom",
                    "5",
                    "--change-justification",
                    "left",
                    "--remove-paragraph-spacing",
                    "--remove-paragraph-spacing-indent-size",
                    "1.5",
                    "--insert-blank-line",
                    "--insert-blank-line-size",
                    "0.5",
                ]
                .map(String::from),
            );
            if kfx_plugin_available {
                cmd.extend(
                    [
                        "--enable-heuristics",
                        "--markup-chapter-headings",
                        "--remove-fake-margins",
                    ]
                    .map(String::from),
                );
            }
        }
        BookFormat::Epub | BookFormat::Mobi | BookFormat::Azw3 => {
            if options.quality == Quality::High {
                cmd.extend(
                    [
                        "--preserve-cover-aspect-ratio",
                        "--embed-all-fonts",
                        "--subset-embedded-fonts",
                    ]
                    .map(String::from),
                );
            }
            if options.include_cover {
                cmd.push("--preserve-cover-aspect-ratio".to_string());
            } else {
                cmd.push("--no-default-epub-cover".to_string());
            }
        }
        BookFormat::Pdf => {
            cmd.extend(
                [
                    "--paper-size",
                    "a4",
                    "--pdf-default-font-size",
                    "12",
                    "--pdf-mono-font-size",
                    "10",
                ]
                .map(String::from),
            );
        }
        _ => {}
    }

    if options.preserve_metadata {
        cmd.push("--preserve-metadata".to_string());
    }

    match options.quality {
        Quality::High => {
            cmd.push("--extra-css".to_string());
            cmd.push("body { text-align: justify; }".to_string());
        }
        Quality::Low => {
            cmd.push("--compress-images".to_string());
            cmd.push("--jpeg-quality".to_string());
            cmd.push("60".to_string());
        }
        Quality::Medium => {}
    }

    cmd
}
