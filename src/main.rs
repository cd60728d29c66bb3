//! CLI entry point for the bookprep tool.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info, warn};

use bookprep_core::convert::ProgressFn;
use bookprep_core::{
    AppConfig, AsinLookupService, BookFormat, BookIdentity, CancelFlag, ConversionSummary,
    Converter, ConvertOptions, Database, FileValidator, Quality, SourceId, ValidateOptions,
    find_convertible,
};

mod cli;

use cli::{AsinArgs, Cli, Command, ConvertArgs, ValidateArgs};

/// Exit code for interactive cancellation (SIGINT convention).
const EXIT_CANCELLED: i32 = 130;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    debug!(?config, "configuration resolved");

    match cli.command {
        Command::Asin(args) => run_asin(&config, args).await,
        Command::Validate(args) => run_validate(&config, args).await,
        Command::Convert(args) => run_convert(&config, args).await,
    }
}

async fn run_asin(config: &AppConfig, args: AsinArgs) -> Result<()> {
    let db = Database::new(&config.asin_lookup.cache_path)
        .await
        .context("opening cache store")?;

    let enabled = if args.sources.is_empty() {
        config.asin_lookup.resolved_sources()
    } else {
        resolve_cli_sources(&args.sources)?
    };
    let service = AsinLookupService::new(
        db,
        config.asin_lookup.rate_limit_duration(),
        enabled,
    )
    .context("constructing lookup service")?;
    let use_cache = !args.no_cache;

    if let Some(batch_dir) = &args.batch_dir {
        return run_asin_batch(&service, batch_dir, args.parallel, use_cache).await;
    }

    let result = if let Some(file) = &args.file {
        service.lookup_by_file(file, None, use_cache).await
    } else if let Some(isbn) = &args.isbn {
        service.lookup_by_isbn(isbn, None, use_cache).await
    } else if let Some(title) = &args.title {
        service
            .lookup_by_title(title, args.author.as_deref(), None, use_cache)
            .await
    } else {
        bail!("provide --isbn, --title, --file, or --batch-dir");
    };

    if let Some(asin) = &result.asin {
        let source = result.source.as_deref().unwrap_or("unknown");
        let confidence = result
            .confidence
            .map_or_else(String::new, |c| format!(" (confidence {c:.2})"));
        println!("{asin}  via {source}{confidence}");
        Ok(())
    } else {
        warn!(error = result.error.as_deref().unwrap_or(""), "no ASIN found");
        std::process::exit(1);
    }
}

async fn run_asin_batch(
    service: &AsinLookupService,
    batch_dir: &PathBuf,
    parallel: usize,
    use_cache: bool,
) -> Result<()> {
    let identities: Vec<BookIdentity> = find_convertible(batch_dir, false, None)
        .into_iter()
        .map(BookIdentity::from_file)
        .collect();
    if identities.is_empty() {
        info!(dir = %batch_dir.display(), "no book files found");
        return Ok(());
    }

    // Ctrl-C flips the cooperative flag; in-flight lookups finish on their
    // own timeouts.
    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("cancellation requested; finishing in-flight lookups");
                cancel.cancel();
            }
        });
    }

    let results = service
        .batch(&identities, parallel, None, use_cache, &cancel)
        .await;

    let mut found = 0usize;
    for result in &results {
        match &result.asin {
            Some(asin) => {
                found += 1;
                println!(
                    "{asin}  {}  via {}",
                    result.query_title,
                    result.source.as_deref().unwrap_or("unknown")
                );
            }
            None => println!(
                "not found  {}  ({})",
                result.query_title,
                result.error.as_deref().unwrap_or("no error recorded")
            ),
        }
    }
    info!(
        found,
        missed = results.len() - found,
        total = identities.len(),
        "batch lookup finished"
    );

    if cancel.is_cancelled() {
        std::process::exit(EXIT_CANCELLED);
    }
    if found == 0 {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_validate(config: &AppConfig, args: ValidateArgs) -> Result<()> {
    let db = Database::new(&config.asin_lookup.cache_path)
        .await
        .context("opening cache store")?;
    let validator = FileValidator::new(db);

    let options = ValidateOptions {
        recursive: args.recursive,
        formats: (!args.formats.is_empty()).then(|| args.formats.clone()),
        parallel: !args.sequential,
        workers: args.workers,
        use_cache: !args.no_cache,
    };
    let results = validator.validate_directory(&args.path, &options).await;
    let summary = FileValidator::summary(&results);

    for result in &results {
        let mark = match result.status {
            bookprep_core::ValidationStatus::Valid => "ok  ",
            _ => "FAIL",
        };
        println!(
            "{mark} {}  [{}]",
            result.file_path.display(),
            result.status.as_str()
        );
        for error in &result.errors {
            println!("       {error}");
        }
    }
    println!(
        "{} files: {} valid, {} problems ({} extension mismatches)",
        summary.total_files,
        summary.valid_files,
        summary.invalid_files,
        summary.extension_mismatches
    );
    Ok(())
}

async fn run_convert(config: &AppConfig, args: ConvertArgs) -> Result<()> {
    let format = BookFormat::from_extension(&args.to)
        .with_context(|| format!("unsupported target format: {}", args.to))?;
    let quality = match args.quality.to_lowercase().as_str() {
        "high" => Quality::High,
        "medium" => Quality::Medium,
        "low" => Quality::Low,
        other => bail!("unsupported quality preset: {other}"),
    };
    let options = ConvertOptions {
        quality,
        include_cover: !args.no_cover,
        preserve_metadata: !args.no_metadata,
    };

    let mut inputs = args.inputs.clone();
    if let Some(dir) = &args.input_dir {
        inputs.extend(find_convertible(
            dir,
            args.recursive,
            args.source_format.as_deref(),
        ));
    }
    if inputs.is_empty() {
        bail!("no input files; pass paths or --input-dir");
    }

    let converter = Converter::new(config.conversion.converter_settings());

    let bar = ProgressBar::new(inputs.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    let progress: Arc<ProgressFn> = {
        let bar = bar.clone();
        Arc::new(move |fraction: f64, description: &str| {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            bar.set_position((fraction * bar.length().unwrap_or(1) as f64) as u64);
            bar.set_message(description.to_string());
        })
    };

    let results = if args.kfx_input {
        converter
            .convert_kfx_batch(
                &inputs,
                args.output_dir.as_deref(),
                format,
                args.parallel,
                &options,
                args.dry_run,
                Some(progress),
            )
            .await
    } else {
        converter
            .convert_batch(
                &inputs,
                args.output_dir.as_deref(),
                format,
                args.parallel,
                &options,
                args.dry_run,
                Some(progress),
            )
            .await
    };
    bar.finish_and_clear();

    let summary = ConversionSummary::from_results(&results);
    for failure in results.iter().filter(|r| !r.success) {
        println!(
            "failed  {}: {}",
            failure.input_file.display(),
            failure.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!(
        "{} converted, {} failed, {} skipped",
        summary.successful, summary.failed, summary.skipped
    );

    if summary.failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn resolve_cli_sources(names: &[String]) -> Result<Vec<SourceId>> {
    let mut sources = Vec::new();
    for name in names {
        let Some(source) = SourceId::from_config_name(name) else {
            bail!("unknown ASIN source: {name}");
        };
        if !sources.contains(&source) {
            sources.push(source);
        }
    }
    Ok(sources)
}
