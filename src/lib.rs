//! # ca460-sync
//!
//! Sync California Form 460 campaign filings from a DocumentCloud project
//! into SQLite, using vision language models to classify every page and to
//! extract structured data from the pages that carry it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! DocumentCloud project
//!  │
//!  ├─ 1. Fetch     project and its documents
//!  ├─ 2. Sync      one row per document and per page (insert-if-absent)
//!  ├─ 3. Classify  top-left crop → VLM → page type, once per (page, model)
//!  ├─ 4. Extract   summary pages and Schedule A pages → VLM → JSON record,
//!  │               once per (page, page type, model)
//!  └─ 5. Finalize  job → completed | failed, with an ordered event log
//! ```
//!
//! Every step is resumable: a run only does what the database says is
//! missing, so re-running a failed or partial job picks up where it stopped
//! and re-running a finished one does nothing.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ca460_sync::{Store, SyncConfig, SyncService};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Store::open("ca460.db").await?;
//!     let service = SyncService::from_config(store, SyncConfig::default())?;
//!
//!     let job_id = service
//!         .start_sync(12345, "ollama/qwen2.5vl", "gemini/gemini-2.5-flash")
//!         .await?;
//!     let status = service.wait(&job_id).await?;
//!     println!("{job_id}: {}", status.status);
//!     for event in service.get_job_events(&job_id).await? {
//!         println!("[{}] {}", event.event_type, event.message);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ca460` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod events;
pub mod forms;
pub mod jobs;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod source;
pub mod store;
pub mod sync;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{SyncConfig, SyncConfigBuilder};
pub use error::{ErrorKind, PageError, SyncError};
pub use events::{follow_events, EventLog, EventStream};
pub use forms::PageType;
pub use jobs::SyncService;
pub use pipeline::extract::Extractor;
pub use pipeline::llm::{ModelUsage, ProviderRegistry, VisionModel, VisionRequest, VisionResponse};
pub use progress::{NoopProgressCallback, ProgressCallback, SyncProgressCallback};
pub use source::{DocumentCloud, DocumentStore, Project, RemoteDocument};
pub use store::{
    DocumentExtractions, DocumentSummary, EventType, JobReport, JobStatus, JobStatusReport, Store,
    SyncEvent, SyncJob, TableCounts,
};
pub use sync::{CancelToken, RunSummary, SyncRunner, SyncStage};
