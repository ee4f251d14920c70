//! CLI binary for ca460-sync.
//!
//! A thin shim over [`SyncService`] that maps CLI flags to `SyncConfig`,
//! runs a sync in the foreground and prints job state, events and
//! extracted documents.

use anyhow::{Context, Result};
use ca460_sync::config::{DEFAULT_CLASSIFIER_MODEL, DEFAULT_DOCUMENTCLOUD_API_URL, DEFAULT_EXTRACTOR_MODEL};
use ca460_sync::{
    EventType, JobStatus, ProgressCallback, Store, SyncConfig, SyncEvent, SyncProgressCallback,
    SyncService, SyncStage,
};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

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

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Renders one progress bar per stage and a log line per extracted page.
struct CliProgressCallback {
    bar: ProgressBar,
    extracted: AtomicUsize,
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
        bar.set_prefix("Starting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            extracted: AtomicUsize::new(0),
            errors: AtomicUsize::new(0),
        })
    }

    fn counting_style(unit: &str) -> ProgressStyle {
        ProgressStyle::with_template(&format!(
            "{{spinner:.cyan}} {{prefix:.bold}}  [{{bar:42.green/238}}] {{pos:>4}}/{{len}} {unit}  \
             ⏱ {{elapsed_precise}}  {{msg}}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS)
    }
}

impl SyncProgressCallback for CliProgressCallback {
    fn on_sync_start(&self, job_id: &str, project_id: i64) {
        self.bar.println(format!(
            "{} {}  {}",
            cyan("◆"),
            bold(&format!("Syncing project {project_id}")),
            dim(job_id)
        ));
    }

    fn on_stage(&self, stage: SyncStage, total: usize) {
        let (prefix, unit) = match stage {
            SyncStage::FetchingProject => ("Fetching", ""),
            SyncStage::SyncingDocuments => ("Documents", "docs"),
            SyncStage::ClassifyingPages => ("Classifying", "pages"),
            SyncStage::ExtractingSummaryPages => ("Summary", "pages"),
            SyncStage::ExtractingSchedulePages => ("Schedule A", "pages"),
            SyncStage::Finalizing => ("Finalizing", ""),
        };
        self.bar.set_prefix(prefix);
        self.bar.set_message("");
        if total > 0 {
            self.bar.set_style(Self::counting_style(unit));
            self.bar.set_length(total as u64);
            self.bar.set_position(0);
            self.bar.reset_eta();
        }
    }

    fn on_page_classified(&self, document_id: i64, page_number: u32, page_type: &str, cached: bool) {
        let note = if cached { " (cached)" } else { "" };
        self.bar
            .set_message(format!("{document_id} p{page_number}: {page_type}{note}"));
        self.bar.inc(1);
    }

    fn on_page_extracted(&self, document_id: i64, page_number: u32, page_type: &str) {
        self.extracted.fetch_add(1, Ordering::SeqCst);
        self.bar.println(format!(
            "  {} {:<34} document {} page {}",
            green("✓"),
            page_type,
            document_id,
            page_number
        ));
        self.bar.inc(1);
    }

    fn on_page_error(&self, document_id: i64, page_number: u32, error: &str) {
        self.errors.fetch_add(1, Ordering::SeqCst);
        let msg = if error.chars().count() > 80 {
            format!("{}…", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} document {} page {}  {}",
            red("✗"),
            document_id,
            page_number,
            red(&msg)
        ));
        self.bar.inc(1);
    }

    fn on_sync_complete(&self, _job_id: &str, status: JobStatus) {
        self.bar.finish_and_clear();
        let extracted = self.extracted.load(Ordering::SeqCst);
        let errors = self.errors.load(Ordering::SeqCst);
        match status {
            JobStatus::Completed if errors == 0 => eprintln!(
                "{} sync complete, {} pages extracted",
                green("✔"),
                bold(&extracted.to_string())
            ),
            JobStatus::Completed => eprintln!(
                "{} sync complete, {} pages extracted ({} failed)",
                yellow("⚠"),
                bold(&extracted.to_string()),
                red(&errors.to_string())
            ),
            _ => eprintln!("{} sync {}", red("✘"), status),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Sync a DocumentCloud project with the default models
  ca460 sync 12345

  # Pick the classifier and extractor models (provider/model)
  ca460 sync 12345 --classifier-model ollama/qwen2.5vl:7b \
                   --extractor-model gemini/gemini-2.5-flash

  # Inspect a job
  ca460 status 6f1c...
  ca460 events 6f1c... --follow

  # Browse what was extracted
  ca460 documents
  ca460 document 2406517 --json

  # Fail jobs left running by a crashed process
  ca460 recover

ENVIRONMENT VARIABLES:
  CA460_DB                 SQLite database path (default: ca460.db)
  CA460_CLASSIFIER_MODEL   Default classifier model
  CA460_EXTRACTOR_MODEL    Default extractor model
  DOCUMENTCLOUD_API_URL    DocumentCloud API root
  DOCUMENTCLOUD_TOKEN      Bearer token for private projects
  EDGEQUAKE_LLM_PROVIDER   Provider for model ids without a provider/ prefix
  OPENAI_API_KEY, GEMINI_API_KEY, ANTHROPIC_API_KEY
                           Provider credentials
"#;

#[derive(Parser, Debug)]
#[command(
    name = "ca460",
    version,
    about = "Sync California Form 460 filings from DocumentCloud and extract them with vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// SQLite database file.
    #[arg(long, global = true, env = "CA460_DB", default_value = "ca460.db")]
    db: PathBuf,

    /// Print machine-readable JSON.
    #[arg(long, global = true, env = "CA460_JSON")]
    json: bool,

    /// Debug logging.
    #[arg(short, long, global = true, env = "CA460_VERBOSE")]
    verbose: bool,

    /// Errors only.
    #[arg(short, long, global = true, env = "CA460_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a sync for a DocumentCloud project and wait for it to finish.
    Sync(SyncArgs),
    /// Show a job's status.
    Status { job_id: String },
    /// Show a job's events.
    Events {
        job_id: String,
        /// Keep printing new events until the job finishes.
        #[arg(short, long)]
        follow: bool,
    },
    /// List documents with at least one extraction.
    Documents,
    /// Show every extraction of one document.
    Document { document_id: i64 },
    /// Mark jobs left pending or running by a previous process as failed.
    Recover,
}

#[derive(clap::Args, Debug)]
struct SyncArgs {
    /// DocumentCloud project id.
    project_id: i64,

    #[arg(long, env = "CA460_CLASSIFIER_MODEL", default_value = DEFAULT_CLASSIFIER_MODEL)]
    classifier_model: String,

    #[arg(long, env = "CA460_EXTRACTOR_MODEL", default_value = DEFAULT_EXTRACTOR_MODEL)]
    extractor_model: String,

    /// Provider for model ids without a `provider/` prefix.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    #[arg(long, env = "DOCUMENTCLOUD_API_URL", default_value = DEFAULT_DOCUMENTCLOUD_API_URL)]
    documentcloud_url: String,

    #[arg(long, env = "DOCUMENTCLOUD_TOKEN", hide_env_values = true)]
    documentcloud_token: Option<String>,

    #[arg(long, env = "CA460_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    #[arg(long, env = "CA460_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    #[arg(long, env = "CA460_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    #[arg(long, env = "CA460_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    #[arg(long, env = "CA460_FETCH_TIMEOUT", default_value_t = 60)]
    fetch_timeout: u64,

    /// Print events instead of a progress bar.
    #[arg(long, env = "CA460_NO_PROGRESS")]
    no_progress: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO-level library logs during a sync.
    let show_progress = match &cli.command {
        Command::Sync(args) => !cli.quiet && !cli.json && !args.no_progress,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress || cli.json {
        "error"
    } else if matches!(cli.command, Command::Sync(_)) {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let store = Store::open(&cli.db)
        .await
        .with_context(|| format!("Failed to open database {}", cli.db.display()))?;

    match &cli.command {
        Command::Sync(args) => run_sync(&cli, args, store, show_progress).await,
        Command::Status { job_id } => {
            let service = SyncService::from_config(store, SyncConfig::default())?;
            let status = service
                .get_job_status(job_id)
                .await
                .context("Failed to read job")?;
            if cli.json {
                print_json(&status)?;
            } else {
                println!("Status:     {}", status_label(status.status));
                println!("Started:    {}", status.started_at.to_rfc3339());
                if let Some(done) = status.completed_at {
                    println!("Completed:  {}", done.to_rfc3339());
                }
                if let Some(error) = &status.error {
                    println!("Error:      {}", red(error));
                }
            }
            Ok(())
        }
        Command::Events { job_id, follow } => {
            let service = SyncService::from_config(store, SyncConfig::default())?;
            if *follow {
                let mut events = service.watch_events(job_id);
                while let Some(event) = events.next().await {
                    print_event(&event.context("Failed to read events")?, cli.json)?;
                }
            } else {
                let events = service
                    .get_job_events(job_id)
                    .await
                    .context("Failed to read events")?;
                if cli.json {
                    print_json(&events)?;
                } else {
                    for event in &events {
                        print_event(event, false)?;
                    }
                }
            }
            Ok(())
        }
        Command::Documents => {
            let service = SyncService::from_config(store, SyncConfig::default())?;
            let docs = service.list_documents_with_any_extraction().await?;
            if cli.json {
                print_json(&docs)?;
            } else if docs.is_empty() {
                eprintln!("{}", dim("No documents have been extracted yet."));
            } else {
                println!("{:>10}  {:>5}  {:>6}  TITLE", "ID", "PAGES", "MODELS");
                for doc in &docs {
                    println!(
                        "{:>10}  {:>5}  {:>6}  {}",
                        doc.id,
                        doc.page_count,
                        doc.model_count,
                        doc.title.as_deref().unwrap_or("")
                    );
                }
            }
            Ok(())
        }
        Command::Document { document_id } => {
            let service = SyncService::from_config(store, SyncConfig::default())?;
            let view = service
                .get_document_extractions(*document_id)
                .await
                .context("Failed to read document")?;
            if cli.json {
                print_json(&view)?;
            } else {
                println!(
                    "{}  {}",
                    bold(&view.document.title),
                    dim(&format!("{} pages", view.document.page_count))
                );
                for (model, pages) in &view.models {
                    println!("\n{} {}", cyan("◆"), bold(model));
                    for page in pages {
                        println!(
                            "  page {:>3}  {}",
                            page.page_number,
                            page.page_type
                        );
                        let body = serde_json::to_string_pretty(&page.parsed_data)?;
                        for line in body.lines() {
                            println!("    {}", dim(line));
                        }
                    }
                }
            }
            Ok(())
        }
        Command::Recover => {
            let service = SyncService::from_config(store, SyncConfig::default())?;
            let recovered = service.recover_interrupted_jobs().await?;
            if cli.json {
                print_json(&recovered)?;
            } else if recovered.is_empty() {
                eprintln!("{} no interrupted jobs", green("✔"));
            } else {
                for id in &recovered {
                    eprintln!("{} marked {} as failed", yellow("⚠"), id);
                }
            }
            Ok(())
        }
    }
}

/// Start a sync and block until it finishes. Ctrl-C cancels the job at the
/// next page boundary.
async fn run_sync(cli: &Cli, args: &SyncArgs, store: Store, show_progress: bool) -> Result<()> {
    let progress: Option<ProgressCallback> = if show_progress {
        let cb: ProgressCallback = CliProgressCallback::new();
        Some(cb)
    } else {
        None
    };
    let config = build_config(args, progress)?;
    let service = SyncService::from_config(store, config).context("Failed to set up sync")?;

    let job_id = service
        .start_sync(args.project_id, &args.classifier_model, &args.extractor_model)
        .await
        .context("Failed to start sync")?;

    let follow = {
        let service = service.clone();
        let job_id = job_id.clone();
        let print = !show_progress && !cli.quiet;
        let json = cli.json;
        async move {
            let mut events = service.watch_events(&job_id);
            while let Some(event) = events.next().await {
                let event = event?;
                if print {
                    print_event(&event, json)?;
                }
            }
            anyhow::Ok(())
        }
    };

    tokio::select! {
        result = follow => result.context("Failed to follow job events")?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("{} cancelling {}…", yellow("⚠"), job_id);
            service.cancel(&job_id)?;
        }
    }

    let status = service.wait(&job_id).await?;
    if cli.json {
        print_json(&status)?;
    }
    match status.status {
        JobStatus::Completed => Ok(()),
        _ => anyhow::bail!(
            "sync {} {}: {}",
            job_id,
            status.status,
            status.error.unwrap_or_default()
        ),
    }
}

/// Map CLI args to `SyncConfig`.
fn build_config(args: &SyncArgs, progress: Option<ProgressCallback>) -> Result<SyncConfig> {
    let mut builder = SyncConfig::builder()
        .documentcloud_api_url(&args.documentcloud_url)
        .max_tokens(args.max_tokens)
        .temperature(args.temperature)
        .max_retries(args.max_retries)
        .api_timeout_secs(args.api_timeout)
        .fetch_timeout_secs(args.fetch_timeout);
    if let Some(token) = &args.documentcloud_token {
        builder = builder.documentcloud_token(token);
    }
    if let Some(provider) = &args.provider {
        builder = builder.default_provider(provider);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }
    builder.build().context("Invalid configuration")
}

fn status_label(status: JobStatus) -> String {
    match status {
        JobStatus::Completed => green(status.as_str()),
        JobStatus::Failed => red(status.as_str()),
        JobStatus::Pending | JobStatus::Running => cyan(status.as_str()),
    }
}

fn print_event(event: &SyncEvent, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    let tag = match event.event_type {
        EventType::Info => dim("info   "),
        EventType::Warning => yellow("warning"),
        EventType::Error => red("error  "),
        EventType::Success => green("success"),
    };
    println!(
        "{} {} {}",
        dim(&event.created_at.format("%H:%M:%S").to_string()),
        tag,
        event.message
    );
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialise output")?
    );
    Ok(())
}
