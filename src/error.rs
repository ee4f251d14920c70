//! Error types for the ca460-sync library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`SyncError`]: **Fatal** for the current operation: a run that hits one
//!   stops, the job is marked `failed`, and whatever was already persisted
//!   stays valid for the next run. Returned as `Err(SyncError)` from every
//!   public async function.
//!
//! * [`PageError`]: **Non-fatal**: one page could not be extracted (the
//!   model answered with something that does not match the schema) but the
//!   rest of the batch is fine. The orchestrator writes it to the job's event
//!   log and moves on to the next page.
//!
//! [`SyncError::kind`] groups variants into an [`ErrorKind`] so callers can
//! decide on retry or skip policy without matching every variant.

use thiserror::Error;

/// Coarse failure category used for retry / skip decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network or provider hiccup; the same call may succeed later.
    Transient,
    /// The model answered, but not in the expected structured shape.
    Validation,
    /// An unknown job, document or project at the boundary.
    NotFound,
    /// The run was cancelled between pages.
    Cancelled,
    /// A model call exceeded its time budget.
    Timeout,
    /// Anything else: database, corrupt image, misconfiguration, bugs.
    Fatal,
}

/// All fatal errors returned by the ca460-sync library.
///
/// Per-page extraction failures use [`PageError`] and are recorded in the
/// event log rather than propagated here.
#[derive(Debug, Error)]
pub enum SyncError {
    // ── Persistence errors ───────────────────────────────────────────────
    /// SQLite rejected a statement or the connection failed.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A JSON blob could not be serialised or read back.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Document store errors ────────────────────────────────────────────
    /// DocumentCloud has no project with this id (or it is private).
    #[error("DocumentCloud project {project_id} not found")]
    ProjectNotFound { project_id: i64 },

    /// A DocumentCloud API request failed.
    #[error("DocumentCloud request to '{url}' failed: {reason}")]
    DocumentStore { url: String, reason: String },

    /// Downloading a page image failed.
    #[error("Failed to fetch page {page} of document {document_id} from '{url}': {reason}")]
    ImageFetch {
        document_id: i64,
        page: u32,
        url: String,
        reason: String,
    },

    // ── Image errors ─────────────────────────────────────────────────────
    /// The page image could not be decoded or re-encoded.
    #[error("Image processing failed: {detail}")]
    ImageDecode { detail: String },

    // ── LLM errors ───────────────────────────────────────────────────────
    /// The provider for a model id is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The model call itself failed after all retries.
    #[error("Model '{model}' call failed after {attempts} attempt(s): {detail}")]
    ModelCall {
        model: String,
        attempts: u32,
        detail: String,
    },

    /// The model call did not return within the configured timeout.
    #[error("Model '{model}' call timed out after {secs}s")]
    ModelTimeout { model: String, secs: u64 },

    /// The model answered but the answer does not match the output schema.
    #[error("Model '{model}' returned an invalid response: {detail}")]
    InvalidModelResponse { model: String, detail: String },

    // ── Boundary errors ──────────────────────────────────────────────────
    /// No sync job with this id.
    #[error("Sync job '{job_id}' not found")]
    JobNotFound { job_id: String },

    /// The job was not `pending` when a run tried to claim it.
    #[error("Sync job '{job_id}' is not pending")]
    JobNotPending { job_id: String },

    /// No stored document with this id.
    #[error("Document {document_id} not found")]
    DocumentNotFound { document_id: i64 },

    /// The run was cancelled through [`crate::jobs::SyncService::cancel`].
    #[error("Sync job '{job_id}' was cancelled")]
    Cancelled { job_id: String },

    // ── Config errors ────────────────────────────────────────────────────
    /// Builder or request validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ────────────────────────────────────────────────────────
    /// Unexpected internal error (panicked task, poisoned lock).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::DocumentStore { .. }
            | SyncError::ImageFetch { .. }
            | SyncError::ModelCall { .. } => ErrorKind::Transient,
            SyncError::InvalidModelResponse { .. } => ErrorKind::Validation,
            SyncError::ProjectNotFound { .. }
            | SyncError::JobNotFound { .. }
            | SyncError::DocumentNotFound { .. } => ErrorKind::NotFound,
            SyncError::Cancelled { .. } => ErrorKind::Cancelled,
            SyncError::JobNotPending { .. } => ErrorKind::Fatal,
            SyncError::ModelTimeout { .. } => ErrorKind::Timeout,
            SyncError::Database(_)
            | SyncError::Json(_)
            | SyncError::ImageDecode { .. }
            | SyncError::ProviderNotConfigured { .. }
            | SyncError::InvalidConfig(_)
            | SyncError::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// True when the model responded with data that failed validation.
    pub fn is_validation(&self) -> bool {
        self.kind() == ErrorKind::Validation
    }

    /// Multi-line diagnostic: the message, its `source()` chain and the
    /// debug representation. Written to the event log on run failure; the
    /// job row only keeps the one-line `Display` form.
    pub fn trace(&self) -> String {
        let mut out = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            out.push_str(&format!("\ncaused by: {cause}"));
            source = cause.source();
        }
        out.push_str(&format!("\n\n{self:?}"));
        out
    }
}

/// A non-fatal error for a single page.
///
/// Written to the job's event log as an `error` event; the run continues
/// with the next page.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[error("Failed to parse {page_type} page {page_number} from document {document_id}: {detail}")]
pub struct PageError {
    pub document_id: i64,
    pub page_number: u32,
    pub page_type: String,
    pub kind: ErrorKind,
    pub detail: String,
}
