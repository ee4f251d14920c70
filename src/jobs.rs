//! The job manager: the surface callers use to start and observe syncs.
//!
//! [`SyncService::start_sync`] writes a `pending` job row, spawns a
//! [`SyncRunner`] for it and returns the job id at once. The service keeps
//! each run's `JoinHandle` and cancel sender, but the persisted job row is the
//! source of truth: every read goes to the store, so an outcome is
//! recoverable even after the in-memory handle is gone.

use crate::config::{SyncConfig, DEFAULT_CLASSIFIER_MODEL, DEFAULT_EXTRACTOR_MODEL};
use crate::error::SyncError;
use crate::events::{follow_events, EventStream};
use crate::pipeline::llm::{ProviderRegistry, VisionModel};
use crate::source::{DocumentCloud, DocumentStore};
use crate::store::{
    DocumentExtractions, DocumentSummary, JobReport, JobStatus, JobStatusReport, Store, SyncEvent,
};
use crate::sync::{CancelToken, SyncRunner};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Message stored on jobs failed by [`SyncService::recover_interrupted_jobs`].
pub const INTERRUPTED_MESSAGE: &str = "Sync was interrupted before it finished";

struct RunningJob {
    handle: JoinHandle<()>,
    cancel: watch::Sender<bool>,
}

/// Starts sync jobs and answers questions about them.
#[derive(Clone)]
pub struct SyncService {
    store: Store,
    runner: SyncRunner,
    config: SyncConfig,
    running: Arc<Mutex<HashMap<String, RunningJob>>>,
}

impl std::fmt::Debug for SyncService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncService")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SyncService {
    /// Build a service from explicit collaborators.
    pub fn new(
        store: Store,
        source: Arc<dyn DocumentStore>,
        vision: Arc<dyn VisionModel>,
        config: SyncConfig,
    ) -> Self {
        let runner = SyncRunner::new(
            store.clone(),
            source,
            vision,
            config.progress_callback.clone(),
        );
        Self {
            store,
            runner,
            config,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Build a service talking to DocumentCloud and edgequake-llm providers.
    pub fn from_config(store: Store, config: SyncConfig) -> Result<Self, SyncError> {
        let source = Arc::new(DocumentCloud::from_config(&config)?);
        let vision = Arc::new(ProviderRegistry::new(&config));
        Ok(Self::new(store, source, vision, config))
    }

    fn registry(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, RunningJob>>, SyncError> {
        self.running
            .lock()
            .map_err(|_| SyncError::Internal("job registry lock poisoned".into()))
    }

    /// Create a job and run it in the background. Returns the job id.
    ///
    /// Blank model ids fall back to the defaults. The caller never sees a run
    /// failure here; it is recorded on the job.
    pub async fn start_sync(
        &self,
        project_id: i64,
        classifier_model: &str,
        extractor_model: &str,
    ) -> Result<String, SyncError> {
        if project_id <= 0 {
            return Err(SyncError::InvalidConfig(format!(
                "project id must be positive, got {project_id}"
            )));
        }
        let classifier_model = non_blank(classifier_model, DEFAULT_CLASSIFIER_MODEL);
        let extractor_model = non_blank(extractor_model, DEFAULT_EXTRACTOR_MODEL);

        self.store.ensure_schema().await?;
        let job = self
            .store
            .create_job(project_id, classifier_model, extractor_model)
            .await?;
        info!(
            "Created sync job {} for project {} ({} / {})",
            job.id, project_id, classifier_model, extractor_model
        );

        let (cancel, token) = CancelToken::new();
        let runner = self.runner.clone();
        let job_id = job.id.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = runner.run(&job, &token).await {
                warn!("Sync job {} ended with error: {}", job.id, e);
            }
        });

        let mut running = self.registry()?;
        running.retain(|_, job| !job.handle.is_finished());
        running.insert(job_id.clone(), RunningJob { handle, cancel });
        Ok(job_id)
    }

    pub async fn get_job_status(&self, job_id: &str) -> Result<JobStatusReport, SyncError> {
        let job = self.store.get_job(job_id).await?;
        Ok(JobStatusReport::from(&job))
    }

    /// Every event of a job, in insertion order.
    pub async fn get_job_events(&self, job_id: &str) -> Result<Vec<SyncEvent>, SyncError> {
        Ok(self.store.job_report(job_id).await?.events)
    }

    /// Status and events read together.
    pub async fn get_job_report(&self, job_id: &str) -> Result<JobReport, SyncError> {
        self.store.job_report(job_id).await
    }

    pub async fn list_documents_with_any_extraction(
        &self,
    ) -> Result<Vec<DocumentSummary>, SyncError> {
        self.store.list_documents_with_any_extraction().await
    }

    pub async fn get_document_extractions(
        &self,
        document_id: i64,
    ) -> Result<DocumentExtractions, SyncError> {
        self.store.document_extractions(document_id).await
    }

    /// Ask a running job to stop at the next page boundary. Returns false if
    /// this service is not running the job.
    pub fn cancel(&self, job_id: &str) -> Result<bool, SyncError> {
        let running = self.registry()?;
        match running.get(job_id) {
            Some(job) if !job.handle.is_finished() => {
                info!("Cancelling sync job {}", job_id);
                Ok(job.cancel.send(true).is_ok())
            }
            _ => Ok(false),
        }
    }

    /// Wait for a job started by this service to finish, then return its
    /// persisted status. For other jobs the status is returned as is.
    pub async fn wait(&self, job_id: &str) -> Result<JobStatusReport, SyncError> {
        let handle = self.registry()?.remove(job_id).map(|job| job.handle);
        if let Some(handle) = handle {
            handle
                .await
                .map_err(|e| SyncError::Internal(format!("Sync task panicked: {e}")))?;
        }
        self.get_job_status(job_id).await
    }

    /// Fail every job left `pending` or `running` that this service is not
    /// running. Call once at startup: with a single-process executor such
    /// jobs can never finish on their own. Returns the ids it failed.
    pub async fn recover_interrupted_jobs(&self) -> Result<Vec<String>, SyncError> {
        self.store.ensure_schema().await?;
        let live: Vec<String> = self.registry()?.keys().cloned().collect();
        let mut recovered = Vec::new();
        for job in self.store.unfinished_jobs().await? {
            if live.contains(&job.id) {
                continue;
            }
            let detail = format!(
                "{INTERRUPTED_MESSAGE}; the process running it exited while the job was {}",
                job.status
            );
            if self
                .store
                .fail_unfinished_job(&job.id, INTERRUPTED_MESSAGE, &detail)
                .await?
            {
                warn!("Marked interrupted sync job {} as failed", job.id);
                recovered.push(job.id);
            }
        }
        Ok(recovered)
    }

    /// Stream a job's events live; the stream ends when the job is terminal.
    pub fn watch_events(&self, job_id: &str) -> EventStream {
        follow_events(
            self.store.clone(),
            job_id,
            Duration::from_millis(self.config.event_poll_interval_ms),
        )
    }
}

fn non_blank<'a>(value: &'a str, default: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default
    } else {
        trimmed
    }
}
