//! CLI binary for edgequake-img2txt.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to `ExtractorConfig` and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use edgequake_img2txt::auth::token_source_from_config;
use edgequake_img2txt::config::parse_image_size;
use edgequake_img2txt::diagnose::DEFAULT_PROBE_TIMEOUT;
use edgequake_img2txt::usage::{estimate_cost, group_thousands};
use edgequake_img2txt::{
    extract_single, probe_endpoints, process_folder, BatchProgressCallback, DiagnosticReport,
    ExtractionClient, ExtractorConfig, ProgressCallback, ResponseMode, RunSummary,
    SingleExtraction,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log file written under `--log-dir`, appended to across runs.
const LOG_FILE_NAME: &str = "extraction.log";

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}\u{2026}")
    } else {
        s.to_string()
    }
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar for the batch, one log line per image.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Wall-clock start of the image currently in flight.
    current: Mutex<Option<Instant>>,
    errors: AtomicUsize,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Scanning input folder…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            current: Mutex::new(None),
            errors: AtomicUsize::new(0),
        })
    }

    fn elapsed_secs(&self) -> f64 {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }
}

impl BatchProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total_files: usize) {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} images  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total_files as u64);
        self.bar.set_style(style);
        self.bar.set_prefix("Extracting");
        self.bar.println(format!(
            "{} {}",
            cyan("◆"),
            bold(&format!("Found {total_files} images to process"))
        ));
    }

    fn on_file_start(&self, _index: usize, _total: usize, filename: &str) {
        *self.current.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        self.bar.set_message(filename.to_string());
    }

    fn on_file_complete(&self, index: usize, total: usize, filename: &str, chars: usize) {
        let secs = self.elapsed_secs();
        self.bar.println(format!(
            "  {} [{:>3}/{:<3}] {:<28} {}  {}",
            green("✓"),
            index,
            total,
            filename,
            dim(&format!("{chars:>6} chars")),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_file_error(&self, index: usize, total: usize, filename: &str, error: &str) {
        let secs = self.elapsed_secs();
        self.errors.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} [{:>3}/{:<3}] {:<28} {}  {}",
            red("✗"),
            index,
            total,
            filename,
            red(&truncate_chars(error, 80)),
            dim(&format!("{secs:.1}s")),
        ));
        self.bar.inc(1);
    }

    fn on_waiting(&self, delay: Duration) {
        self.bar
            .set_message(format!("waiting {}s before next image", delay.as_secs()));
    }

    fn on_batch_complete(&self, total_files: usize, success_count: usize) {
        let failed = total_files.saturating_sub(success_count);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} images extracted successfully",
                green("✔"),
                bold(&success_count.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} images extracted  ({} failed)",
                if failed == total_files {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&success_count.to_string()),
                total_files,
                red(&failed.to_string()),
            );
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Check credentials and endpoint with one image (first in data/input)
  img2txt extract

  # A specific image
  img2txt extract scans/chapter1_p001.jpg

  # Every image in data/input → data/output
  img2txt batch

  # Other folders, no pause between requests
  img2txt --input-dir scans --output-dir text --delay-secs 0 batch

  # Non-streamed responses, JSON run summary on stdout
  img2txt --response-mode document --json batch > run.json

  # Which endpoint variant does this project accept?
  img2txt diagnose

ENVIRONMENT VARIABLES (also read from ./.env):
  GOOGLE_CLOUD_PROJECT             Google Cloud project ID (required)
  GOOGLE_APPLICATION_CREDENTIALS   Service-account JSON key
  VERTEX_ACCESS_TOKEN              Pre-fetched bearer token (wins over the key file)
  GCP_LOCATION                     Vertex AI region (default: us-central1)
  IMG2TXT_PUBLISHER                Model publisher (default: google)
  IMG2TXT_MODEL                    Model ID (default: gemini-2.0-flash-001)
  IMG2TXT_RESPONSE_MODE            stream | document (default: stream)
  IMG2TXT_DELAY_SECS               Pause between images (default: 5)
  IMG2TXT_PRICE_PER_MILLION        USD per 1M tokens for the estimate (default: 0.075)
  IMG2TXT_INPUT_DIR / _OUTPUT_DIR  Folders (default: data/input, data/output)
  LOG_LEVEL                        error | warn | info | debug (RUST_LOG wins)
  IMG2TXT_LOG_DIR                  Folder for extraction.log (default: logs)

SETUP:
  1. Enable the Vertex AI API and create a service account with the
     "Vertex AI User" role; download its JSON key.
  2. export GOOGLE_CLOUD_PROJECT=my-project
     export GOOGLE_APPLICATION_CREDENTIALS=/path/to/key.json
  3. img2txt extract
"#;

/// Transcribe scanned page images to text with a Vertex AI vision model.
#[derive(Parser, Debug)]
#[command(
    name = "img2txt",
    version,
    about = "Transcribe scanned page images to text with a Vertex AI vision model",
    long_about = "Send scanned textbook pages to a Vertex AI multimodal model and save the \
transcribed text, one file per image, with token usage and a cost estimate.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Google Cloud project ID.
    #[arg(long, global = true, env = "GOOGLE_CLOUD_PROJECT")]
    project: Option<String>,

    /// Vertex AI region.
    #[arg(long, global = true, env = "GCP_LOCATION", default_value = "us-central1")]
    location: String,

    /// Service-account JSON key file.
    #[arg(long, global = true, env = "GOOGLE_APPLICATION_CREDENTIALS")]
    credentials: Option<PathBuf>,

    /// Pre-fetched bearer token, e.g. from `gcloud auth print-access-token`.
    #[arg(long, global = true, env = "VERTEX_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Model publisher segment of the endpoint.
    #[arg(long, global = true, env = "IMG2TXT_PUBLISHER", default_value = "google")]
    publisher: String,

    /// Model ID.
    #[arg(long, global = true, env = "IMG2TXT_MODEL", default_value = "gemini-2.0-flash-001")]
    model: String,

    /// Override the API origin (scheme + host).
    #[arg(long, global = true, env = "IMG2TXT_API_BASE_URL")]
    api_base_url: Option<String>,

    /// Max output tokens per image.
    #[arg(long, global = true, env = "IMG2TXT_MAX_OUTPUT_TOKENS", default_value_t = 4096)]
    max_output_tokens: u32,

    /// Sampling temperature.
    #[arg(long, global = true, env = "IMG2TXT_TEMPERATURE", default_value_t = 0.1)]
    temperature: f32,

    /// Nucleus sampling cut-off.
    #[arg(long, global = true, env = "IMG2TXT_TOP_P", default_value_t = 0.95)]
    top_p: f32,

    /// Top-k sampling cut-off.
    #[arg(long, global = true, env = "IMG2TXT_TOP_K", default_value_t = 40)]
    top_k: u32,

    /// Largest image sent, as WIDTHxHEIGHT.
    #[arg(long, global = true, env = "IMG2TXT_MAX_IMAGE_SIZE", default_value = "1024x1024",
          value_parser = parse_image_size)]
    max_image_size: (u32, u32),

    /// JPEG quality for the re-encoded image (1–100).
    #[arg(long, global = true, env = "IMG2TXT_JPEG_QUALITY", default_value_t = 85,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Response transport.
    #[arg(long, global = true, env = "IMG2TXT_RESPONSE_MODE", value_enum, default_value = "stream")]
    response_mode: ModeArg,

    /// Pause between images in a batch, in seconds.
    #[arg(long, global = true, env = "IMG2TXT_DELAY_SECS", default_value_t = 5)]
    delay_secs: u64,

    /// USD per one million tokens, for the cost estimate.
    #[arg(long, global = true, env = "IMG2TXT_PRICE_PER_MILLION", default_value_t = 0.075)]
    price_per_million: f64,

    /// Path to a text file containing a custom extraction prompt.
    #[arg(long, global = true, env = "IMG2TXT_PROMPT_FILE")]
    prompt_file: Option<PathBuf>,

    /// Folder scanned for images.
    #[arg(long, global = true, env = "IMG2TXT_INPUT_DIR", default_value = "data/input")]
    input_dir: PathBuf,

    /// Folder receiving extracted text and the summary.
    #[arg(long, global = true, env = "IMG2TXT_OUTPUT_DIR", default_value = "data/output")]
    output_dir: PathBuf,

    /// Output structured JSON instead of a human-readable report.
    #[arg(long, global = true)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "IMG2TXT_NO_PROGRESS")]
    no_progress: bool,

    /// Log level when RUST_LOG is not set.
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Folder receiving extraction.log.
    #[arg(long, global = true, env = "IMG2TXT_LOG_DIR", default_value = "logs")]
    log_dir: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract one image and save it as <stem>_test.txt (smoke test).
    Extract {
        /// Image to extract. Defaults to the first image in the input folder.
        image: Option<PathBuf>,
    },
    /// Extract every image in the input folder.
    Batch,
    /// Probe endpoint variants to find one the project can call.
    Diagnose {
        /// Per-probe timeout in seconds.
        #[arg(long, default_value_t = DEFAULT_PROBE_TIMEOUT.as_secs())]
        timeout: u64,
    },
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Stream,
    Document,
}

impl From<ModeArg> for ResponseMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Stream => ResponseMode::Stream,
            ModeArg::Document => ResponseMode::Document,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Before parsing, so `.env` values feed the `env = ...` defaults.
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar gives all the per-file feedback; keep INFO logs out
    // of its way unless asked for.
    let show_progress =
        !cli.quiet && !cli.no_progress && !cli.json && matches!(cli.command, Command::Batch);
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        cli.log_level.as_str()
    };

    // The file keeps the configured level even while the terminal is quiet.
    let file_level = if cli.verbose { "debug" } else { cli.log_level.as_str() };
    let (log_writer, _log_guard) = open_log_writer(&cli.log_dir)?;

    let stderr_layer = fmt::layer()
        .with_writer(io::stderr)
        .with_filter(env_filter_or(filter));
    let file_layer = fmt::layer()
        .with_ansi(false)
        .with_writer(log_writer)
        .with_filter(env_filter_or(file_level));
    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    if let Ok(path) = dotenv {
        tracing::debug!("Loaded environment from {}", path.display());
    }

    let config = build_config(&cli).await?;

    if !cli.quiet {
        for warning in config.startup_warnings() {
            eprintln!("{} {}", yellow("⚠"), warning);
        }
    }

    // ── Directory bootstrap ──────────────────────────────────────────────
    for dir in [&config.input_dir, &config.output_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create directory {}", dir.display()))?;
    }

    match cli.command {
        Command::Extract { ref image } => run_extract(&cli, config, image.clone()).await,
        Command::Batch => run_batch(&cli, config, show_progress).await,
        Command::Diagnose { timeout } => {
            run_diagnose(&cli, config, Duration::from_secs(timeout)).await
        }
    }
}

/// `RUST_LOG` when set, otherwise `level`.
fn env_filter_or(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Create `dir` and open `extraction.log` inside it for appending.
///
/// The guard flushes buffered lines when dropped; keep it alive for the run.
fn open_log_writer(dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let appender = tracing_appender::rolling::never(dir, LOG_FILE_NAME);
    Ok(tracing_appender::non_blocking(appender))
}

/// Map CLI args to `ExtractorConfig`.
async fn build_config(cli: &Cli) -> Result<ExtractorConfig> {
    let (width, height) = cli.max_image_size;
    let mut builder = ExtractorConfig::builder()
        .location(cli.location.clone())
        .publisher(cli.publisher.clone())
        .model(cli.model.clone())
        .max_output_tokens(cli.max_output_tokens)
        .temperature(cli.temperature)
        .top_p(cli.top_p)
        .top_k(cli.top_k)
        .max_image_size(width, height)
        .jpeg_quality(cli.jpeg_quality)
        .response_mode(cli.response_mode.into())
        .request_delay(Duration::from_secs(cli.delay_secs))
        .price_per_million_tokens(cli.price_per_million)
        .input_dir(cli.input_dir.clone())
        .output_dir(cli.output_dir.clone());

    if let Some(ref project) = cli.project {
        builder = builder.project_id(project.clone());
    }
    if let Some(ref path) = cli.credentials {
        builder = builder.credentials_path(path.clone());
    }
    if let Some(ref token) = cli.access_token {
        builder = builder.access_token(token.clone());
    }
    if let Some(ref url) = cli.api_base_url {
        builder = builder.api_base_url(url.clone());
    }
    if let Some(ref path) = cli.prompt_file {
        let prompt = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read prompt from {:?}", path))?;
        builder = builder.prompt(prompt);
    }

    builder.build().context("Invalid configuration")
}

async fn run_extract(cli: &Cli, config: ExtractorConfig, image: Option<PathBuf>) -> Result<()> {
    let price = config.price_per_million_tokens;
    let input_dir = config.input_dir.clone();
    let output_dir = config.output_dir.clone();
    let client = ExtractionClient::new(config).context("Failed to initialise extractor")?;

    let result = extract_single(&client, image.as_deref(), &input_dir, &output_dir)
        .await
        .context("Extraction failed")?;

    if cli.json {
        let json = serde_json::json!({
            "image": result.image,
            "output_path": result.output_path,
            "text": result.extraction.text,
            "usage": result.extraction.usage,
            "estimated_cost": estimate_cost(result.extraction.usage.total_tokens, price),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&json).context("Failed to serialise output")?
        );
    } else if !cli.quiet {
        print_single(&result, price);
    }
    Ok(())
}

fn print_single(result: &SingleExtraction, price: f64) {
    let usage = result.extraction.usage;
    let rule = "=".repeat(60);
    println!("{}", bold("Extraction successful!"));
    println!("{rule}");
    println!("Image:          {}", result.image.display());
    println!("Input tokens:   {}", group_thousands(usage.input_tokens));
    println!("Output tokens:  {}", group_thousands(usage.output_tokens));
    println!("Total tokens:   {}", group_thousands(usage.total_tokens));
    println!(
        "Estimated cost: ${:.6}",
        estimate_cost(usage.total_tokens, price)
    );
    println!("{rule}");
    println!("{}", dim("First 500 characters:"));
    let preview: String = result.extraction.text.chars().take(500).collect();
    println!("{preview}");
    if result.extraction.text.chars().count() > 500 {
        println!("{}", dim("…"));
    }
    println!("{rule}");
    println!(
        "{} Saved to {}",
        green("✔"),
        bold(&result.output_path.display().to_string())
    );
}

async fn run_batch(cli: &Cli, config: ExtractorConfig, show_progress: bool) -> Result<()> {
    let input_dir = config.input_dir.clone();
    let output_dir = config.output_dir.clone();
    if !cli.quiet && !cli.json && !config.request_delay.is_zero() {
        eprintln!(
            "{}",
            dim(&format!(
                "Processing with {}s delay between images…",
                config.request_delay.as_secs()
            ))
        );
    }
    let client = ExtractionClient::new(config).context("Failed to initialise extractor")?;

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn BatchProgressCallback>)
    } else {
        None
    };

    let summary = process_folder(&client, &input_dir, &output_dir, progress)
        .await
        .context("Batch processing failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&summary).context("Failed to serialise summary")?;
        println!("{json}");
    } else if !cli.quiet {
        print_batch(&summary, &output_dir);
    }
    Ok(())
}

fn print_batch(summary: &RunSummary, output_dir: &std::path::Path) {
    let t = &summary.totals;
    let rule = "=".repeat(60);
    println!("{rule}");
    println!("{}", bold("BATCH PROCESSING COMPLETE!"));
    println!("{rule}");
    println!(
        "Files: {} total, {} succeeded, {} failed  ({}ms)",
        summary.files.len(),
        summary.succeeded(),
        summary.failed(),
        summary.duration_ms
    );
    println!();
    println!("Token Usage Summary:");
    println!("- Total input tokens: {}", group_thousands(t.input_tokens));
    println!("- Total output tokens: {}", group_thousands(t.output_tokens));
    println!("- Total tokens used: {}", group_thousands(t.total_tokens));
    if t.calls > 0 {
        println!();
        println!("Averages per image:");
        println!("- Average input tokens: {:.2}", t.average_input_tokens());
        println!("- Average output tokens: {:.2}", t.average_output_tokens());
        println!("- Average total tokens: {:.2}", t.average_total_tokens());
    }
    println!();
    println!("Estimated total cost: ${:.4}", summary.estimated_cost());
    if t.calls > 0 {
        println!(
            "Average cost per page: ${:.4}",
            t.average_cost(summary.price_per_million_tokens)
        );
    }
    println!();
    println!(
        "Summary saved to {}",
        bold(
            &output_dir
                .join(edgequake_img2txt::output::SUMMARY_FILE_NAME)
                .display()
                .to_string()
        )
    );
}

async fn run_diagnose(cli: &Cli, config: ExtractorConfig, timeout: Duration) -> Result<()> {
    if !cli.quiet && !cli.json {
        println!("Configuration:");
        println!("Project ID:  {}", config.project_id.as_deref().unwrap_or("<unset>"));
        println!("Location:    {}", config.location);
        println!(
            "Credentials: {}",
            match (&config.access_token, &config.credentials_path) {
                (Some(_), _) => "VERTEX_ACCESS_TOKEN".to_string(),
                (None, Some(p)) => p.display().to_string(),
                (None, None) => "<unset>".to_string(),
            }
        );
        println!("{}", "=".repeat(60));
    }

    let tokens = token_source_from_config(&config).context("Authentication failed")?;
    let report = probe_endpoints(&config, tokens.as_ref(), timeout)
        .await
        .context("Endpoint diagnostic failed")?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise report")?;
        println!("{json}");
    } else if !cli.quiet {
        print_diagnosis(&report);
    }
    Ok(())
}

fn print_diagnosis(report: &DiagnosticReport) {
    println!("Testing endpoint variants…");
    for (i, probe) in report.probes.iter().enumerate() {
        let mark = if probe.outcome.is_success() {
            green("✓")
        } else {
            red("✗")
        };
        println!(
            "{} Test {}: {}  {}",
            mark,
            i + 1,
            probe.variant.label(),
            dim(&probe.outcome.hint())
        );
        if let Some(ref preview) = probe.preview {
            println!("    Response preview: {}…", preview);
        }
    }
    println!("{}", "=".repeat(60));

    match report.working {
        Some(ref variant) => {
            println!("{} Found working endpoint!", green("✔"));
            println!("Use this endpoint: {}", variant.url);
            println!();
            println!("Set in your .env:");
            println!("IMG2TXT_MODEL={}", variant.model);
        }
        None => {
            println!("{} No working endpoint found.", red("✘"));
            println!();
            println!("Possible issues:");
            println!("1. Model licence not accepted in Model Garden");
            println!("2. Vertex AI API not enabled");
            println!("3. Model not available in your region");
            println!("4. Billing not enabled on your project");
        }
    }

    println!();
    if report.api_access.is_success() {
        println!("{} Vertex AI API is accessible", green("✓"));
    } else {
        println!(
            "{} Vertex AI API access issue: {}",
            red("✗"),
            report.api_access.hint()
        );
    }
}
