//! The sync orchestrator: one run of the pipeline for one job.
//!
//! ## Stages
//!
//! ```text
//! FetchingProject ─▶ SyncingDocuments ─▶ ClassifyingPages
//!     ─▶ ExtractingSummaryPages ─▶ ExtractingSchedulePages ─▶ Finalizing
//! ```
//!
//! Stages run strictly in order and pages within a stage one at a time. Any
//! error escaping a stage ends the run; everything persisted before it stays
//! and the next run picks up from there, because every write is
//! insert-if-absent and every work queue is computed from what is missing.
//!
//! ## Failure policy
//!
//! * Classification errors of any kind abort the run: routing depends on the
//!   label.
//! * Extraction errors of kind [`ErrorKind::Validation`] are recorded as an
//!   `error` event for that page and the run continues.
//! * Every other extraction error (network, provider, timeout after retries)
//!   aborts the run, so the page stays queued for the next one.
//!
//! [`SyncRunner::run`] is the single error boundary. It always leaves the job
//! `completed` or `failed`; on failure the event log gets the full trace and
//! the job row the one-line message.

use crate::error::{ErrorKind, PageError, SyncError};
use crate::events::EventLog;
use crate::pipeline::classify::PageClassifier;
use crate::pipeline::extract::{Extractor, PageExtractor};
use crate::pipeline::llm::VisionModel;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::source::{DocumentStore, Project, RemoteDocument};
use crate::store::{JobStatus, PageRow, Store, SyncJob};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStage {
    FetchingProject,
    SyncingDocuments,
    ClassifyingPages,
    ExtractingSummaryPages,
    ExtractingSchedulePages,
    Finalizing,
}

impl SyncStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStage::FetchingProject => "fetching-project",
            SyncStage::SyncingDocuments => "syncing-documents",
            SyncStage::ClassifyingPages => "classifying-pages",
            SyncStage::ExtractingSummaryPages => "extracting-summary-pages",
            SyncStage::ExtractingSchedulePages => "extracting-schedule-pages",
            SyncStage::Finalizing => "finalizing",
        }
    }

    fn for_extractor(extractor: Extractor) -> Self {
        match extractor {
            Extractor::Summary => SyncStage::ExtractingSummaryPages,
            Extractor::Schedule => SyncStage::ExtractingSchedulePages,
        }
    }
}

impl fmt::Display for SyncStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read side of a job's cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelToken(watch::Receiver<bool>);

impl CancelToken {
    /// A token plus the sender that trips it.
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self(rx))
    }

    /// A token that is never cancelled.
    pub fn never() -> Self {
        Self::new().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

/// Counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub documents: usize,
    pub new_documents: usize,
    pub pages: usize,
    pub new_pages: usize,
    /// Pages classified by a model call in this run.
    pub classified: usize,
    /// Pages whose label was already stored.
    pub cached_classifications: usize,
    pub extracted: usize,
    /// Extraction failures recorded as page errors.
    pub failed_pages: usize,
    /// Queued pages whose document is not in the fetched project.
    pub skipped_pages: usize,
}

/// Drives runs. Cheap to clone; every dependency is shared.
#[derive(Clone)]
pub struct SyncRunner {
    store: Store,
    source: Arc<dyn DocumentStore>,
    classifier: PageClassifier,
    extractor: PageExtractor,
    progress: ProgressCallback,
}

impl fmt::Debug for SyncRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncRunner")
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}

impl SyncRunner {
    pub fn new(
        store: Store,
        source: Arc<dyn DocumentStore>,
        vision: Arc<dyn VisionModel>,
        progress: Option<ProgressCallback>,
    ) -> Self {
        Self {
            classifier: PageClassifier::new(store.clone(), Arc::clone(&source), Arc::clone(&vision)),
            extractor: PageExtractor::new(store.clone(), Arc::clone(&source), vision),
            store,
            source,
            progress: progress.unwrap_or_else(|| Arc::new(NoopProgressCallback)),
        }
    }

    /// Run the pipeline for `job` and move it to a terminal status.
    ///
    /// Returns the run's error after it has been recorded. An `Err` from the
    /// finalizing writes themselves leaves the job non-terminal; see
    /// [`crate::jobs::SyncService::recover_interrupted_jobs`].
    ///
    /// A job that is no longer `pending` is left untouched and yields
    /// [`SyncError::JobNotPending`].
    pub async fn run(&self, job: &SyncJob, cancel: &CancelToken) -> Result<RunSummary, SyncError> {
        let log = EventLog::new(self.store.clone(), &job.id);
        if !self.store.mark_job_running(&job.id).await? {
            warn!("Sync job {} is not pending; not running it", job.id);
            return Err(SyncError::JobNotPending {
                job_id: job.id.clone(),
            });
        }
        self.progress.on_sync_start(&job.id, job.project_id);
        info!(
            "Sync {} started: project {}, classifier '{}', extractor '{}'",
            job.id, job.project_id, job.classifier_model, job.extractor_model
        );

        let mut summary = RunSummary::default();
        let outcome = match self.run_stages(job, &log, cancel, &mut summary).await {
            Ok(()) => log.success("Sync complete!").await.map(|_| ()),
            Err(e) => Err(e),
        };

        self.progress.on_stage(SyncStage::Finalizing, 0);
        match outcome {
            Ok(()) => {
                self.store
                    .finish_job(&job.id, JobStatus::Completed, None)
                    .await?;
                info!("Sync {} completed: {:?}", job.id, summary);
                self.progress.on_sync_complete(&job.id, JobStatus::Completed);
                Ok(summary)
            }
            Err(e) => {
                error!("Sync {} failed: {}", job.id, e);
                if let Err(log_err) = log.error(e.trace()).await {
                    error!("Sync {}: could not record failure event: {}", job.id, log_err);
                }
                self.store
                    .finish_job(&job.id, JobStatus::Failed, Some(e.to_string()))
                    .await?;
                self.progress.on_sync_complete(&job.id, JobStatus::Failed);
                Err(e)
            }
        }
    }

    fn enter(&self, job: &SyncJob, stage: SyncStage, total: usize) {
        debug!("Sync {}: entering {} ({} items)", job.id, stage, total);
        self.progress.on_stage(stage, total);
    }

    fn check_cancelled(&self, job: &SyncJob, cancel: &CancelToken) -> Result<(), SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled {
                job_id: job.id.clone(),
            });
        }
        Ok(())
    }

    async fn run_stages(
        &self,
        job: &SyncJob,
        log: &EventLog,
        cancel: &CancelToken,
        summary: &mut RunSummary,
    ) -> Result<(), SyncError> {
        // ── Fetching project ────────────────────────────────────────────────
        self.enter(job, SyncStage::FetchingProject, 0);
        log.info(format!("Starting sync for project {}", job.project_id))
            .await?;
        log.info("Fetching project from DocumentCloud...").await?;
        let project = self.source.get_project(job.project_id).await?;
        log.info(format!("Found {} documents", project.documents.len()))
            .await?;

        // ── Syncing documents and pages ─────────────────────────────────────
        self.enter(job, SyncStage::SyncingDocuments, project.documents.len());
        let pages = self.sync_documents(job, &project, cancel, summary).await?;

        // ── Classifying pages ───────────────────────────────────────────────
        self.enter(job, SyncStage::ClassifyingPages, summary.pages);
        for (document, rows) in &pages {
            log.info(format!(
                "Processing document {} ({} pages)...",
                document.id, document.page_count
            ))
            .await?;
            for page in rows {
                self.check_cancelled(job, cancel)?;
                let label = self
                    .classifier
                    .classify(page, document, &job.classifier_model)
                    .await?;
                if label.cached {
                    summary.cached_classifications += 1;
                } else {
                    summary.classified += 1;
                }
                self.progress.on_page_classified(
                    page.document_id,
                    page.page_number,
                    &label.page_type,
                    label.cached,
                );
            }
            log.info(format!(
                "Completed page type predictions for document {}",
                document.id
            ))
            .await?;
        }

        // ── Extracting ──────────────────────────────────────────────────────
        for extractor in Extractor::ALL {
            self.extract_stage(extractor, job, &project, log, cancel, summary)
                .await?;
        }
        Ok(())
    }

    /// Upsert every document and page of the project, in project order.
    async fn sync_documents<'p>(
        &self,
        job: &SyncJob,
        project: &'p Project,
        cancel: &CancelToken,
        summary: &mut RunSummary,
    ) -> Result<Vec<(&'p RemoteDocument, Vec<PageRow>)>, SyncError> {
        let mut synced = Vec::with_capacity(project.documents.len());
        for document in &project.documents {
            self.check_cancelled(job, cancel)?;
            let inserted = self
                .store
                .upsert_document(document.id, document.page_count, document.metadata())
                .await?;
            if inserted.is_new() {
                summary.new_documents += 1;
            }

            let mut rows = Vec::with_capacity(document.page_count as usize);
            for page_number in 1..=document.page_count {
                let page = self.store.upsert_page(document.id, page_number).await?;
                if page.is_new() {
                    summary.new_pages += 1;
                }
                rows.push(PageRow {
                    id: page.id(),
                    document_id: document.id,
                    page_number,
                });
            }
            summary.documents += 1;
            summary.pages += rows.len();
            synced.push((document, rows));
        }
        Ok(synced)
    }

    async fn extract_stage(
        &self,
        extractor: Extractor,
        job: &SyncJob,
        project: &Project,
        log: &EventLog,
        cancel: &CancelToken,
        summary: &mut RunSummary,
    ) -> Result<(), SyncError> {
        let target = extractor.target_page_type();
        let sources: Vec<&str> = extractor
            .source_page_types()
            .iter()
            .map(|t| t.as_str())
            .collect();
        let queued = self
            .store
            .pages_needing_extraction(
                target.as_str(),
                &sources,
                &job.classifier_model,
                &job.extractor_model,
            )
            .await?;

        self.enter(job, SyncStage::for_extractor(extractor), queued.len());
        if queued.is_empty() {
            log.info(format!("No {} pages to parse", extractor.label()))
                .await?;
            return Ok(());
        }
        log.info(format!(
            "Parsing {} {} pages...",
            queued.len(),
            extractor.label()
        ))
        .await?;

        for page in &queued {
            self.check_cancelled(job, cancel)?;
            let Some(document) = project.document(page.document_id) else {
                log.warning(format!(
                    "Could not find document {}, skipping page {}",
                    page.document_id, page.page_number
                ))
                .await?;
                summary.skipped_pages += 1;
                continue;
            };

            match self
                .extractor
                .extract(extractor, page, document, &job.extractor_model)
                .await
            {
                Ok(_) => {
                    summary.extracted += 1;
                    log.info(format!(
                        "Parsed {} page {} from document {}",
                        extractor.label(),
                        page.page_number,
                        page.document_id
                    ))
                    .await?;
                    self.progress
                        .on_page_extracted(page.document_id, page.page_number, target.as_str());
                }
                Err(e) if e.kind() == ErrorKind::Validation => {
                    let page_error = PageError {
                        document_id: page.document_id,
                        page_number: page.page_number,
                        page_type: target.as_str().to_string(),
                        kind: e.kind(),
                        detail: e.to_string(),
                    };
                    summary.failed_pages += 1;
                    log.error(page_error.to_string()).await?;
                    self.progress.on_page_error(
                        page.document_id,
                        page.page_number,
                        &page_error.detail,
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}
