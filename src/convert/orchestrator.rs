//! Conversion orchestrator: discovery, dry-run, skip logic, bounded-parallel
//! dispatch, per-job timeouts, and result aggregation.
//!
//! Each job spawns the external `ebook-convert` tool; failures never abort
//! sibling jobs, and batch result lists come back sorted by input path with
//! exactly one result per input.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::command::build_command;
use super::kfx::KfxPluginGate;
use super::{BookFormat, ConversionResult, ConvertOptions};

/// Per-job subprocess timeout (10 minutes).
const JOB_TIMEOUT: Duration = Duration::from_secs(600);

/// Error reported uniformly when the KFX gate fails.
const KFX_PLUGIN_ERROR: &str =
    "KFX Output plugin is required but not available. Please install the KFX plugin.";

/// Input extensions `ebook-convert` accepts from us.
const CONVERTIBLE_INPUT_EXTENSIONS: &[&str] = &[
    "epub", "mobi", "azw", "azw3", "pdf", "txt", "html", "rtf", "docx", "fb2", "lit", "pdb",
];

/// Stems carrying these markers are prior conversion outputs and are never
/// rediscovered as inputs.
const OUTPUT_MARKERS: &[&str] = &["_kfx", "_from_kfx", "_converted"];

/// Progress callback: `(fraction_complete, description)`.
pub type ProgressFn = dyn Fn(f64, &str) + Send + Sync;

/// Converter configuration, resolved from the `conversion` config section.
#[derive(Debug, Clone)]
pub struct ConverterSettings {
    /// Hard cap on worker-pool size per batch.
    pub max_parallel: usize,
    /// Default output directory.
    pub output_path: PathBuf,
    /// Refuse KFX work when the Output plugin is missing.
    pub kfx_plugin_required: bool,
}

impl Default for ConverterSettings {
    fn default() -> Self {
        Self {
            max_parallel: 4,
            output_path: PathBuf::from("converted-books"),
            kfx_plugin_required: true,
        }
    }
}

/// Batch outcome counts for user-facing summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConversionSummary {
    pub successful: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ConversionSummary {
    /// Tallies a result list.
    #[must_use]
    pub fn from_results(results: &[ConversionResult]) -> Self {
        let mut summary = Self::default();
        for result in results {
            if result.skipped {
                summary.skipped += 1;
            } else if result.success {
                summary.successful += 1;
            } else {
                summary.failed += 1;
            }
        }
        summary
    }
}

/// One prepared conversion job.
#[derive(Debug, Clone)]
struct Job {
    input: PathBuf,
    output: PathBuf,
    input_format: Option<BookFormat>,
}

/// Drives `ebook-convert` across single files and batches.
#[derive(Debug, Clone)]
pub struct Converter {
    settings: ConverterSettings,
    ebook_convert: PathBuf,
    gate: KfxPluginGate,
}

impl Converter {
    /// Creates a converter using the system `ebook-convert` and
    /// `calibre-customize` binaries.
    #[must_use]
    pub fn new(settings: ConverterSettings) -> Self {
        Self {
            settings,
            ebook_convert: PathBuf::from("ebook-convert"),
            gate: KfxPluginGate::new(),
        }
    }

    /// Creates a converter with custom tool paths (for testing with stub
    /// executables).
    #[must_use]
    pub fn with_commands(
        settings: ConverterSettings,
        ebook_convert: impl Into<PathBuf>,
        calibre_customize: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings,
            ebook_convert: ebook_convert.into(),
            gate: KfxPluginGate::with_command(calibre_customize),
        }
    }

    /// Converts one file.
    ///
    /// `output` defaults to `<output_path>/<stem>.<ext>`. Dry runs
    /// synthesize a success result without touching the subprocess.
    #[instrument(skip(self, input, output, options), fields(input = %input.display(), %format))]
    pub async fn convert_single(
        &self,
        input: &Path,
        output: Option<PathBuf>,
        format: BookFormat,
        options: &ConvertOptions,
        dry_run: bool,
    ) -> ConversionResult {
        let kfx_plugin_available = if format == BookFormat::Kfx {
            let available = self.gate.is_available().await;
            if self.settings.kfx_plugin_required && !available && !dry_run {
                return ConversionResult::failure(
                    input,
                    output,
                    BookFormat::from_extension(
                        &input.extension().unwrap_or_default().to_string_lossy(),
                    ),
                    format,
                    KFX_PLUGIN_ERROR,
                );
            }
            available
        } else {
            false
        };

        let output =
            output.unwrap_or_else(|| self.default_output(input, format, &self.settings.output_path));
        match self.prepare_job(input, output, format) {
            Ok(job) => {
                self.run_job(&job, format, options, dry_run, kfx_plugin_available)
                    .await
            }
            Err(result) => result,
        }
    }

    /// Converts a batch with bounded parallelism.
    ///
    /// Pre-existing outputs are skipped (reported as `skipped`, not
    /// failures); a dry run previews every file without subprocesses.
    /// Results return sorted by input path, one per input.
    #[instrument(skip_all, fields(count = files.len(), %format))]
    pub async fn convert_batch(
        &self,
        files: &[PathBuf],
        output_dir: Option<&Path>,
        format: BookFormat,
        parallel: usize,
        options: &ConvertOptions,
        dry_run: bool,
        progress: Option<Arc<ProgressFn>>,
    ) -> Vec<ConversionResult> {
        if files.is_empty() {
            warn!("no files provided for batch conversion");
            return Vec::new();
        }

        let output_dir = output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.settings.output_path.clone());

        // KFX output needs the plugin before any per-file work begins
        let kfx_plugin_available = if format == BookFormat::Kfx {
            let available = self.gate.is_available().await;
            if self.settings.kfx_plugin_required && !available && !dry_run {
                warn!("KFX Output plugin missing; failing whole batch");
                return files
                    .iter()
                    .map(|file| {
                        ConversionResult::failure(
                            file,
                            None,
                            BookFormat::from_extension(
                                &file.extension().unwrap_or_default().to_string_lossy(),
                            ),
                            format,
                            KFX_PLUGIN_ERROR,
                        )
                    })
                    .collect();
            }
            available
        } else {
            false
        };

        let naming =
            |input: &Path| output_dir.join(format!("{}.{}", stem_of(input), format.extension()));
        self.run_batch(
            files,
            &output_dir,
            format,
            parallel,
            options,
            dry_run,
            progress,
            kfx_plugin_available,
            &naming,
        )
        .await
    }

    /// Converts a batch of KFX files to another format.
    ///
    /// The KFX plugin gate must pass first when required; non-KFX inputs
    /// are reported as individual failures rather than attempted; outputs
    /// use the `<stem>_from_kfx.<ext>` naming scheme.
    #[instrument(skip_all, fields(count = files.len(), %output_format))]
    pub async fn convert_kfx_batch(
        &self,
        files: &[PathBuf],
        output_dir: Option<&Path>,
        output_format: BookFormat,
        parallel: usize,
        options: &ConvertOptions,
        dry_run: bool,
        progress: Option<Arc<ProgressFn>>,
    ) -> Vec<ConversionResult> {
        if files.is_empty() {
            warn!("no KFX files provided for batch conversion");
            return Vec::new();
        }

        let kfx_plugin_available = self.gate.is_available().await;
        if self.settings.kfx_plugin_required && !kfx_plugin_available {
            warn!("KFX Output plugin missing; failing whole KFX batch");
            return files
                .iter()
                .map(|file| {
                    ConversionResult::failure(
                        file,
                        None,
                        Some(BookFormat::Kfx),
                        output_format,
                        KFX_PLUGIN_ERROR,
                    )
                })
                .collect();
        }

        // Pre-filter: only true KFX inputs are attempted
        let mut non_kfx_results = Vec::new();
        let mut kfx_files = Vec::new();
        for file in files {
            let detected = BookFormat::from_extension(
                &file.extension().unwrap_or_default().to_string_lossy(),
            );
            if detected == Some(BookFormat::Kfx) {
                kfx_files.push(file.clone());
            } else {
                let detected_name =
                    detected.map_or_else(|| "unknown".to_string(), |f| f.to_string());
                non_kfx_results.push(ConversionResult::failure(
                    file,
                    None,
                    detected,
                    output_format,
                    format!("File is not KFX format (detected: {detected_name})"),
                ));
            }
        }
        if kfx_files.is_empty() {
            warn!("no actual KFX files found in provided list");
            non_kfx_results.sort_by(|a, b| a.input_file.cmp(&b.input_file));
            return non_kfx_results;
        }

        let output_dir = output_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.settings.output_path.clone());

        let naming = |input: &Path| {
            output_dir.join(format!(
                "{}_from_kfx.{}",
                stem_of(input),
                output_format.extension()
            ))
        };
        let mut results = self
            .run_batch(
                &kfx_files,
                &output_dir,
                output_format,
                parallel,
                options,
                dry_run,
                progress,
                kfx_plugin_available,
                &naming,
            )
            .await;

        results.extend(non_kfx_results);
        results.sort_by(|a, b| a.input_file.cmp(&b.input_file));
        results
    }

    /// Shared batch driver used by both batch entry points.
    #[allow(clippy::too_many_arguments)]
    async fn run_batch(
        &self,
        files: &[PathBuf],
        output_dir: &Path,
        format: BookFormat,
        parallel: usize,
        options: &ConvertOptions,
        dry_run: bool,
        progress: Option<Arc<ProgressFn>>,
        kfx_plugin_available: bool,
        naming: &dyn Fn(&Path) -> PathBuf,
    ) -> Vec<ConversionResult> {
        if let Err(error) = std::fs::create_dir_all(output_dir) {
            warn!(%error, dir = %output_dir.display(), "cannot create output directory");
            return files
                .iter()
                .map(|file| {
                    ConversionResult::failure(
                        file,
                        None,
                        None,
                        format,
                        format!("Cannot create output directory: {error}"),
                    )
                })
                .collect();
        }

        let parallel = parallel.clamp(1, self.settings.max_parallel.max(1));
        info!(
            files = files.len(),
            parallel, dry_run, "starting batch conversion"
        );

        // Skip logic only applies to real runs; dry runs preview every file
        let mut skipped = Vec::new();
        let mut jobs = Vec::new();
        for file in files {
            let output = naming(file);
            if !dry_run && output.exists() {
                info!(
                    input = %file.display(),
                    output = %output.display(),
                    "skipping - output already exists"
                );
                skipped.push(ConversionResult {
                    input_file: file.clone(),
                    output_file: Some(output),
                    input_format: BookFormat::from_extension(
                        &file.extension().unwrap_or_default().to_string_lossy(),
                    ),
                    output_format: format,
                    success: true,
                    skipped: true,
                    error: None,
                    conversion_time: Duration::ZERO,
                    file_size_before: std::fs::metadata(file).map(|m| m.len()).ok(),
                    file_size_after: None,
                });
                continue;
            }
            jobs.push((file.clone(), output));
        }

        let total_jobs = jobs.len();
        let semaphore = Arc::new(Semaphore::new(parallel));
        let mut handles = Vec::with_capacity(total_jobs);
        for (input, output) in jobs {
            let converter = self.clone();
            let options = options.clone();
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return ConversionResult::failure(
                        &input,
                        Some(output),
                        None,
                        format,
                        "worker pool closed",
                    );
                };
                match converter.prepare_job(&input, output, format) {
                    Ok(job) => {
                        converter
                            .run_job(&job, format, &options, dry_run, kfx_plugin_available)
                            .await
                    }
                    Err(result) => result,
                }
            }));
        }

        let mut results = skipped;
        let mut completed = 0usize;
        for handle in handles {
            let result = match handle.await {
                Ok(result) => result,
                Err(error) => ConversionResult::failure(
                    PathBuf::new(),
                    None,
                    None,
                    format,
                    format!("conversion task failed: {error}"),
                ),
            };
            completed += 1;
            if let Some(progress) = &progress {
                #[allow(clippy::cast_precision_loss)]
                let fraction = completed as f64 / total_jobs.max(1) as f64;
                let mark = if result.success { "converted" } else { "failed" };
                progress(
                    fraction,
                    &format!(
                        "{mark} {completed}/{total_jobs}: {}",
                        result.input_file.display()
                    ),
                );
            }
            results.push(result);
        }

        results.sort_by(|a, b| a.input_file.cmp(&b.input_file));
        log_batch_summary(&results);
        results
    }

    /// Validates the input and assembles a [`Job`], or produces the
    /// immediate failure result.
    fn prepare_job(
        &self,
        input: &Path,
        output: PathBuf,
        format: BookFormat,
    ) -> Result<Job, ConversionResult> {
        if !input.exists() {
            return Err(ConversionResult::failure(
                input,
                None,
                None,
                format,
                format!("Input file does not exist: {}", input.display()),
            ));
        }
        if !input.is_file() {
            return Err(ConversionResult::failure(
                input,
                None,
                None,
                format,
                format!("Input path is not a file: {}", input.display()),
            ));
        }

        let extension = input.extension().unwrap_or_default().to_string_lossy();
        let Some(input_format) = BookFormat::from_extension(&extension) else {
            return Err(ConversionResult::failure(
                input,
                None,
                None,
                format,
                format!("Unsupported input format: .{extension}"),
            ));
        };

        if let Some(parent) = output.parent()
            && let Err(error) = std::fs::create_dir_all(parent)
        {
            return Err(ConversionResult::failure(
                input,
                Some(output),
                Some(input_format),
                format,
                format!("Cannot create output directory: {error}"),
            ));
        }

        Ok(Job {
            input: input.to_path_buf(),
            output,
            input_format: Some(input_format),
        })
    }

    /// Runs one prepared job: dry-run synthesis or the real subprocess with
    /// its timeout and output verification.
    async fn run_job(
        &self,
        job: &Job,
        format: BookFormat,
        options: &ConvertOptions,
        dry_run: bool,
        kfx_plugin_available: bool,
    ) -> ConversionResult {
        let start = Instant::now();
        let file_size_before = std::fs::metadata(&job.input).map(|m| m.len()).ok();

        if dry_run {
            info!(
                input = %job.input.display(),
                output = %job.output.display(),
                "dry run - would convert"
            );
            return ConversionResult {
                input_file: job.input.clone(),
                output_file: Some(job.output.clone()),
                input_format: job.input_format,
                output_format: format,
                success: true,
                skipped: false,
                error: None,
                conversion_time: Duration::ZERO,
                file_size_before,
                // Size estimate: assume roughly input-sized output
                file_size_after: file_size_before,
            };
        }

        let args = build_command(&job.input, &job.output, format, options, kfx_plugin_available);
        debug!(command = %args.join(" "), "running ebook-convert");

        let child = Command::new(&self.ebook_convert)
            .args(&args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(JOB_TIMEOUT, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                return self.job_failure(
                    job,
                    format,
                    start,
                    file_size_before,
                    format!("Failed to launch ebook-convert: {error}"),
                );
            }
            Err(_) => {
                return self.job_failure(
                    job,
                    format,
                    start,
                    file_size_before,
                    format!(
                        "Conversion timeout ({}s exceeded) for {}",
                        JOB_TIMEOUT.as_secs(),
                        stem_of(&job.input)
                    ),
                );
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let error = if stderr.is_empty() {
                "Unknown conversion error".to_string()
            } else {
                stderr
            };
            return self.job_failure(job, format, start, file_size_before, error);
        }

        let file_size_after = std::fs::metadata(&job.output).map(|m| m.len()).ok();
        if !matches!(file_size_after, Some(size) if size > 0) {
            return self.job_failure(
                job,
                format,
                start,
                file_size_before,
                "Conversion completed but output file was not created",
            );
        }

        info!(
            input = %job.input.display(),
            output = %job.output.display(),
            bytes = file_size_after,
            "conversion succeeded"
        );
        ConversionResult {
            input_file: job.input.clone(),
            output_file: Some(job.output.clone()),
            input_format: job.input_format,
            output_format: format,
            success: true,
            skipped: false,
            error: None,
            conversion_time: start.elapsed(),
            file_size_before,
            file_size_after,
        }
    }

    fn job_failure(
        &self,
        job: &Job,
        format: BookFormat,
        start: Instant,
        file_size_before: Option<u64>,
        error: impl Into<String>,
    ) -> ConversionResult {
        let error = error.into();
        warn!(input = %job.input.display(), %error, "conversion failed");
        ConversionResult {
            input_file: job.input.clone(),
            output_file: Some(job.output.clone()),
            input_format: job.input_format,
            output_format: format,
            success: false,
            skipped: false,
            error: Some(error),
            conversion_time: start.elapsed(),
            file_size_before,
            file_size_after: None,
        }
    }

    fn default_output(&self, input: &Path, format: BookFormat, dir: &Path) -> PathBuf {
        dir.join(format!("{}.{}", stem_of(input), format.extension()))
    }
}

/// Finds convertible book files under `root`.
///
/// Prior conversion outputs (stems containing `_kfx`, `_from_kfx`, or
/// `_converted`) are excluded so runs do not re-convert their own products.
/// A missing or non-directory root yields an empty list.
#[must_use]
#[instrument(skip(root), fields(root = %root.display()))]
pub fn find_convertible(
    root: &Path,
    recursive: bool,
    source_format: Option<&str>,
) -> Vec<PathBuf> {
    if !root.exists() {
        warn!("input directory does not exist");
        return Vec::new();
    }
    if !root.is_dir() {
        warn!("input path is not a directory");
        return Vec::new();
    }

    let allowed: Vec<&str> = match source_format {
        Some(format) => {
            let format = format.trim_start_matches('.').to_lowercase();
            match CONVERTIBLE_INPUT_EXTENSIONS
                .iter()
                .find(|ext| **ext == format)
            {
                Some(ext) => vec![*ext],
                None => {
                    warn!(%format, "unsupported source format");
                    return Vec::new();
                }
            }
        }
        None => CONVERTIBLE_INPUT_EXTENSIONS.to_vec(),
    };

    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else {
            continue;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    pending.push(path);
                }
                continue;
            }
            let extension = path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !allowed.contains(&extension.as_str()) {
                continue;
            }
            let stem = stem_of(&path).to_lowercase();
            if OUTPUT_MARKERS.iter().any(|marker| stem.contains(marker)) {
                debug!(path = %path.display(), "excluding prior conversion output");
                continue;
            }
            files.push(path);
        }
    }
    files.sort();
    info!(count = files.len(), "found convertible files");
    files
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn log_batch_summary(results: &[ConversionResult]) {
    let summary = ConversionSummary::from_results(results);
    info!(
        successful = summary.successful,
        failed = summary.failed,
        skipped = summary.skipped,
        "batch conversion completed"
    );
    for failure in results.iter().filter(|r| !r.success).take(5) {
        warn!(
            input = %failure.input_file.display(),
            error = failure.error.as_deref().unwrap_or("unknown"),
            "conversion failure"
        );
    }
}
