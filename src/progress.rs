//! Progress-callback trait for in-process sync observers.
//!
//! Inject an [`Arc<dyn SyncProgressCallback>`] via
//! [`crate::config::SyncConfigBuilder::progress_callback`] to receive events
//! as a run moves through its stages. The durable record of a run is its
//! event log in the store; callbacks are for live UIs such as the CLI's
//! progress bar.
//!
//! # Example
//!
//! ```rust
//! use ca460_sync::{SyncConfig, SyncProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     extracted: AtomicUsize,
//! }
//!
//! impl SyncProgressCallback for CountingCallback {
//!     fn on_page_extracted(&self, document_id: i64, page_number: u32, page_type: &str) {
//!         self.extracted.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("{page_type}: document {document_id} page {page_number}");
//!     }
//! }
//!
//! let config = SyncConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { extracted: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::store::JobStatus;
use crate::sync::SyncStage;
use std::sync::Arc;

/// Called by the orchestrator as a run progresses.
///
/// One service may run several jobs at once, so implementations must be
/// `Send + Sync`. Every method has a no-op default.
pub trait SyncProgressCallback: Send + Sync {
    /// A run for `project_id` has started.
    fn on_sync_start(&self, job_id: &str, project_id: i64) {
        let _ = (job_id, project_id);
    }

    /// The run entered `stage`; `total` is the number of work items the
    /// stage will process (documents or pages), 0 if unknown.
    fn on_stage(&self, stage: SyncStage, total: usize) {
        let _ = (stage, total);
    }

    /// A page has a type label. `cached` is true when no model call was made.
    fn on_page_classified(&self, document_id: i64, page_number: u32, page_type: &str, cached: bool) {
        let _ = (document_id, page_number, page_type, cached);
    }

    /// A page's structured record was stored.
    fn on_page_extracted(&self, document_id: i64, page_number: u32, page_type: &str) {
        let _ = (document_id, page_number, page_type);
    }

    /// A page was skipped because of a non-fatal error.
    fn on_page_error(&self, document_id: i64, page_number: u32, error: &str) {
        let _ = (document_id, page_number, error);
    }

    /// The job reached a terminal status.
    fn on_sync_complete(&self, job_id: &str, status: JobStatus) {
        let _ = (job_id, status);
    }
}

/// The default when no callback is configured.
pub struct NoopProgressCallback;

impl SyncProgressCallback for NoopProgressCallback {}

/// The type stored in [`crate::config::SyncConfig`].
pub type ProgressCallback = Arc<dyn SyncProgressCallback>;
