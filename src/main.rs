//! seo-convert - batch image optimizer with AI-generated SEO filenames
//!
//! Thin command-line front end over [`BatchScheduler`]: loads configuration,
//! applies flag overrides, wires Ctrl-C to the batch cancellation token and
//! renders progress and the final report.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{debug, info};

use seo_image_converter::analysis::VisionBackend;
use seo_image_converter::{
    init_with_config, BatchReport, BatchScheduler, BatchStatus, Config, OllamaBackend, OutputFormat,
    ProcessingResult,
};

/// Exit code used when the batch was interrupted
const EXIT_CANCELLED: i32 = 130;

/// seo-convert - Optimize images and give them SEO-friendly names
#[derive(Parser)]
#[command(
    name = "seo-convert",
    version,
    about = "Batch image optimizer with AI-generated SEO filenames",
    long_about = "Analyzes each image with a local Ollama vision model, renames it from the \
                  returned keywords, backs up the original and re-encodes it as WebP, PNG or \
                  JPEG. Falls back to deterministic names when the model is unavailable.",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Directory containing images to process
    #[arg(value_name = "INPUT_DIR")]
    input: Option<PathBuf>,

    /// Output directory (default: same as input)
    #[arg(short, long, value_name = "PATH")]
    output: Option<PathBuf>,

    /// Configuration file (.toml or .yaml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Output format override
    #[arg(long, value_enum, value_name = "FORMAT")]
    format: Option<CliOutputFormat>,

    /// Quality override for the output format (PNG: compression level 0-6)
    #[arg(long, value_name = "QUALITY")]
    quality: Option<u8>,

    /// Number of parallel jobs (0 = auto)
    #[arg(short, long, value_name = "COUNT")]
    jobs: Option<usize>,

    /// Process subdirectories too
    #[arg(short = 'R', long)]
    recursive: bool,

    /// Analyze and encode without writing anything
    #[arg(long)]
    dry_run: bool,

    /// Skip images already converted into the output directory
    #[arg(long)]
    skip_existing: bool,

    /// Do not back up original files
    #[arg(long)]
    no_backup: bool,

    /// Save the full report as JSON
    #[arg(long, value_name = "FILE")]
    json_output: Option<PathBuf>,

    /// Show a line for every processed image
    #[arg(long)]
    detailed: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Suppress progress output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Generate an example configuration file
    ExampleConfig {
        /// Output file path; the extension picks TOML or YAML
        #[arg(short, long, default_value = "seo-convert.toml")]
        output: PathBuf,
    },
    /// Validate a configuration file
    CheckConfig {
        /// Configuration file to validate
        file: PathBuf,
    },
    /// Show system information and vision backend status
    Info {
        /// Configuration file with the backend settings to probe
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
    },
}

/// CLI-compatible output format enum
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliOutputFormat {
    Webp,
    Png,
    Jpeg,
}

impl From<CliOutputFormat> for OutputFormat {
    fn from(format: CliOutputFormat) -> Self {
        match format {
            CliOutputFormat::Webp => OutputFormat::WebP,
            CliOutputFormat::Png => OutputFormat::Png,
            CliOutputFormat::Jpeg => OutputFormat::Jpeg,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}: {:#}", style("Error").red().bold(), e);
            1
        }
    };

    process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    if let Some(command) = cli.command {
        handle_subcommand(command).await?;
        return Ok(0);
    }

    let Some(input) = cli.input.clone() else {
        bail!("Input directory is required (run with --help for usage)");
    };
    let output = cli.output.clone().unwrap_or_else(|| input.clone());

    let config = load_config(cli.config.as_deref())?;
    let config = apply_overrides(config, &cli);
    init_with_config(&config.logging)?;

    let jobs = config.processing.worker_count();
    let dry_run = config.processing.dry_run;
    let backend = Arc::new(OllamaBackend::new(&config.ollama));

    if !cli.quiet {
        println!("{}", style("SEO Image Converter").blue().bold());
        println!("  Input:   {}", input.display());
        println!("  Output:  {}", output.display());
        println!("  Format:  {}", config.image.format);
        println!("  Jobs:    {}", jobs);
        println!("  Dry run: {}", if dry_run { "yes" } else { "no" });
        println!();

        let probe = Arc::clone(&backend);
        let health = tokio::task::spawn_blocking(move || probe.health_check()).await?;
        if let Err(e) = health {
            println!(
                "{}: vision backend not available ({}). Filenames will use the fallback scheme.",
                style("Warning").yellow().bold(),
                e
            );
            println!();
        }
    }

    let scheduler = BatchScheduler::new(config, backend)?;
    let cancel = scheduler.cancellation_token();

    let progress = if cli.quiet {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
                .progress_chars("#>-"),
        );
        pb
    };

    let bar = progress.clone();
    let (batch_input, batch_output) = (input.clone(), output.clone());
    let mut batch = tokio::task::spawn_blocking(move || {
        scheduler.run_with_progress(&batch_input, &batch_output, jobs, |completed, total, latest| {
            bar.set_length(total as u64);
            bar.set_position(completed as u64);
            bar.set_message(file_name(&latest.source_path));
            if let Some(error) = &latest.error {
                bar.println(format!(
                    "{} {}: {}",
                    style("✗").red(),
                    file_name(&latest.source_path),
                    error.message
                ));
            }
        })
    });

    let report = tokio::select! {
        joined = &mut batch => joined??,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            progress.println(format!(
                "{}: interrupted, finishing images already in progress",
                style("Info").blue().bold()
            ));
            batch.await??
        }
    };
    progress.finish_and_clear();

    if report.total == 0 {
        eprintln!("{}: No supported images found in {}", style("Error").red().bold(), input.display());
        return Ok(1);
    }

    if !cli.quiet {
        print_summary(&report);
        print_errors(&report);
        if cli.detailed {
            print_details(&report);
        }
    }

    if let Some(path) = &cli.json_output {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("Failed to write JSON report to {}", path.display()))?;
        info!("Report saved to {:?}", path);
        if !cli.quiet {
            println!("{}: Report saved to {}", style("Success").green().bold(), path.display());
        }
    }

    Ok(exit_code(&report))
}

fn exit_code(report: &BatchReport) -> i32 {
    match report.status {
        BatchStatus::Cancelled => EXIT_CANCELLED,
        BatchStatus::TimedOut => 1,
        BatchStatus::Completed if report.has_failures() => 1,
        BatchStatus::Completed => 0,
    }
}

/// Load `path`, or defaults when none is given, then apply environment overrides
fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let mut config = match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

fn apply_overrides(mut config: Config, cli: &Cli) -> Config {
    if let Some(format) = cli.format {
        config.image.format = format.into();
    }
    if let Some(quality) = cli.quality {
        let quality_config = &mut config.image.quality;
        match config.image.format {
            OutputFormat::WebP => quality_config.webp = quality,
            OutputFormat::Jpeg => quality_config.jpeg = quality,
            OutputFormat::Png => quality_config.png_compression = quality,
        }
    }
    if let Some(jobs) = cli.jobs {
        config.processing.parallel_jobs = jobs;
    }
    if cli.recursive {
        config.processing.recursive = true;
    }
    if cli.dry_run {
        config.processing.dry_run = true;
    }
    if cli.skip_existing {
        config.processing.skip_existing = true;
    }
    if cli.no_backup {
        config.processing.backup_originals = false;
    }
    if cli.verbose {
        config.logging.level = "debug".to_string();
    } else if cli.quiet {
        config.logging.level = "error".to_string();
    }

    debug!("Effective configuration: {:?}", config);
    config
}

/// Handle subcommands
async fn handle_subcommand(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::ExampleConfig { output } => generate_example_config(&output)?,
        Commands::CheckConfig { file } => validate_config_file(&file)?,
        Commands::Info { config } => {
            let config = load_config(config.as_deref())?;
            show_system_info(config).await?;
        }
    }
    Ok(())
}

/// Generate example configuration file
fn generate_example_config(output_path: &Path) -> anyhow::Result<()> {
    Config::default().to_file(output_path)?;

    println!(
        "{}: Generated example configuration: {}",
        style("Success").green().bold(),
        output_path.display()
    );
    Ok(())
}

/// Validate configuration file
fn validate_config_file(file_path: &Path) -> anyhow::Result<()> {
    let config = Config::from_file(file_path)?;
    config.validate()?;

    println!("{}: Configuration file is valid", style("Success").green().bold());
    println!("  Output format: {}", config.image.format);
    println!("  Model: {} at {}", config.ollama.model, config.ollama.endpoint);
    println!("  Jobs: {}", config.processing.worker_count());
    Ok(())
}

/// Show system information
async fn show_system_info(config: Config) -> anyhow::Result<()> {
    use sysinfo::{CpuExt, System, SystemExt};

    println!("{}", style("SEO Image Converter System Information").bold());
    println!();
    println!("{}: {}", style("Version").bold(), seo_image_converter::VERSION);
    println!();

    let mut system = System::new_all();
    system.refresh_all();

    println!("{}", style("System:").bold());
    if let Some(name) = system.name() {
        println!("  OS: {}", name);
    }
    if let Some(version) = system.os_version() {
        println!("  Version: {}", version);
    }
    println!("  CPUs: {}", system.cpus().len());
    if let Some(cpu) = system.cpus().first() {
        println!("  CPU: {} ({:.2} GHz)", cpu.brand(), cpu.frequency() as f64 / 1000.0);
    }
    println!(
        "  Memory: {:.2} GB total, {:.2} GB available",
        system.total_memory() as f64 / 1024.0 / 1024.0 / 1024.0,
        system.available_memory() as f64 / 1024.0 / 1024.0 / 1024.0
    );
    println!("  Default jobs: {}", seo_image_converter::parallel::default_worker_count());
    println!();

    println!("{}", style("Supported Formats:").bold());
    println!("  Input: JPEG, PNG, WebP, GIF, TIFF, BMP");
    println!("  Output: WebP, PNG, JPEG");
    println!();

    println!("{}", style("Vision Backend:").bold());
    println!("  Endpoint: {}", config.ollama.endpoint);
    println!("  Model: {}", config.ollama.model);

    let backend = OllamaBackend::new(&config.ollama);
    match tokio::task::spawn_blocking(move || backend.health_check()).await? {
        Ok(()) => println!("  Status: {}", style("available").green()),
        Err(e) => println!("  Status: {} ({})", style("unavailable").red(), e),
    }

    Ok(())
}

/// Print processing summary
fn print_summary(report: &BatchReport) {
    let title = match report.status {
        BatchStatus::Completed => style("Processing Summary:").bold(),
        BatchStatus::Cancelled => style("Processing Summary (cancelled):").yellow().bold(),
        BatchStatus::TimedOut => style("Processing Summary (timed out):").yellow().bold(),
    };

    println!();
    println!("{}", title);
    println!("  {}: {}", style("Total").bold(), report.total);
    println!("  {}: {}", style("Processed").green(), report.succeeded);
    if report.skipped > 0 {
        println!("  {}: {}", style("Skipped").dim(), report.skipped);
    }
    if report.failed > 0 {
        println!("  {}: {}", style("Failed").red(), report.failed);
    }
    if report.not_started > 0 {
        println!("  {}: {}", style("Not started").yellow(), report.not_started);
    }
    println!("  {}: {:.2}s", style("Duration").blue(), report.elapsed.as_secs_f64());

    if report.succeeded > 0 {
        println!(
            "  {}: {:.2}MB → {:.2}MB",
            style("Size").cyan(),
            report.original_bytes as f64 / 1024.0 / 1024.0,
            report.optimized_bytes as f64 / 1024.0 / 1024.0
        );
        println!(
            "  {}: {:.1}% overall, {:.1}% average",
            style("Savings").cyan(),
            report.compression_ratio(),
            report.average_compression_ratio()
        );
        println!("  {}: {:.1} files/sec", style("Speed").cyan(), report.files_per_second());
    }

    let fallbacks = report
        .results
        .iter()
        .filter(|r| r.keywords.as_ref().is_some_and(|k| k.is_fallback()))
        .count();
    if fallbacks > 0 {
        println!("  {}: {}", style("Fallback names").yellow(), fallbacks);
    }
}

fn print_errors(report: &BatchReport) {
    let failed = report.failed_items();
    if failed.is_empty() {
        return;
    }

    println!();
    println!("{}", style(format!("Found {} errors during processing:", failed.len())).red().bold());
    for result in failed {
        if let Some(error) = &result.error {
            println!("  {} {} [{}]: {}", style("✗").red(), file_name(&result.source_path), error.kind, error.message);
        }
    }
}

fn print_details(report: &BatchReport) {
    println!();
    println!("{}", style("Detailed Results:").bold());
    for result in report.results.iter().filter(|r| !r.is_failure()) {
        println!("  {}", describe_result(result));
    }
}

fn describe_result(result: &ProcessingResult) -> String {
    let source = file_name(&result.source_path);
    let target = result.output_path.as_deref().map(file_name).unwrap_or_default();

    if !result.is_success() {
        return format!("{} {} (already converted as {})", style("-").dim(), source, target);
    }

    let keywords = result
        .keywords
        .as_ref()
        .map(|k| format!("{:?}: {}", k.source, k.keywords.join(", ")))
        .unwrap_or_default();

    format!(
        "{} {} → {} ({:.1}%) [{}]",
        style("✓").green(),
        source,
        target,
        result.compression_ratio().unwrap_or(0.0),
        keywords
    )
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
