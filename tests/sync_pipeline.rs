//! Integration tests for the sync pipeline.
//!
//! The document store and the vision model are in-memory fakes. The fake
//! store renders each page as a blank image whose dimensions encode the
//! document and page number, so the fake model can tell which page it was
//! shown (and which stage asked) from the request alone.
//!
//! Run with:
//!   cargo test --test sync_pipeline -- --nocapture

use async_trait::async_trait;
use ca460_sync::forms::{ScheduleA, ScheduleAContribution, SummaryPage};
use ca460_sync::jobs::INTERRUPTED_MESSAGE;
use ca460_sync::prompts::SUMMARY_PAGE_PROMPT;
use ca460_sync::{
    CancelToken, DocumentStore, ErrorKind, EventType, JobStatus, ModelUsage, PageType, Project,
    ProgressCallback, RemoteDocument, Store, SyncConfig, SyncError, SyncProgressCallback,
    SyncRunner, SyncService, SyncStage, TableCounts, VisionModel, VisionRequest, VisionResponse,
};
use futures::StreamExt;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::{json, Map};
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};
use tokio_test::{assert_err, assert_ok};

// ── Fixtures ─────────────────────────────────────────────────────────────────

const CLASSIFIER: &str = "fake/classifier-1";
const EXTRACTOR: &str = "fake/extractor-1";

/// One document of a project and the label of each of its pages.
struct Filing {
    project_id: i64,
    document_id: i64,
    pages: Vec<PageType>,
}

fn filing(project_id: i64, document_id: i64, pages: &[PageType]) -> Filing {
    Filing {
        project_id,
        document_id,
        pages: pages.to_vec(),
    }
}

fn remote_document(document_id: i64, page_count: u32) -> RemoteDocument {
    RemoteDocument {
        id: document_id,
        page_count,
        title: Some(format!("Form 460 filing {document_id}")),
        slug: format!("form-460-{document_id}"),
        asset_url: "https://assets.test/".to_string(),
        data: Map::new(),
    }
}

/// Page `n` of the `i`-th document is a `2(100+n) x 6(100+i)` image, so the
/// classification crop is `(100+n) x (100+i)`.
fn page_png(index: usize, page_number: u32) -> Vec<u8> {
    let width = 2 * (100 + page_number);
    let height = 6 * (100 + index as u32);
    let img = RgbImage::from_pixel(width, height, Rgb([250, 250, 250]));
    let mut buf = Vec::new();
    DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .unwrap();
    buf
}

// ── Fake document store ──────────────────────────────────────────────────────

struct FakeCloud {
    filings: Vec<(i64, RemoteDocument)>,
}

impl FakeCloud {
    fn new(filings: &[Filing]) -> Self {
        Self {
            filings: filings
                .iter()
                .map(|f| (f.project_id, remote_document(f.document_id, f.pages.len() as u32)))
                .collect(),
        }
    }
}

#[async_trait]
impl DocumentStore for FakeCloud {
    async fn get_project(&self, project_id: i64) -> Result<Project, SyncError> {
        let documents: Vec<RemoteDocument> = self
            .filings
            .iter()
            .filter(|(p, _)| *p == project_id)
            .map(|(_, d)| d.clone())
            .collect();
        if documents.is_empty() {
            return Err(SyncError::ProjectNotFound { project_id });
        }
        Ok(Project {
            id: project_id,
            title: Some(format!("Project {project_id}")),
            documents,
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        Err(SyncError::DocumentStore {
            url: url.to_string(),
            reason: "not served by the fake".to_string(),
        })
    }

    async fn fetch_page_image(
        &self,
        document: &RemoteDocument,
        page_number: u32,
    ) -> Result<Vec<u8>, SyncError> {
        let index = self
            .filings
            .iter()
            .position(|(_, d)| d.id == document.id)
            .ok_or_else(|| SyncError::ImageFetch {
                document_id: document.id,
                page: page_number,
                url: document.xlarge_image_url(page_number),
                reason: "HTTP 404".to_string(),
            })?;
        Ok(page_png(index, page_number))
    }
}

// ── Fake vision model ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Classify,
    Summary,
    Schedule,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Call {
    model: String,
    stage: Stage,
    document_id: i64,
    page_number: u32,
}

/// Holds every call until released.
struct Gate {
    entered: Arc<Notify>,
    release: Arc<Semaphore>,
}

struct FakeVision {
    documents: Vec<(i64, Vec<PageType>)>,
    calls: Mutex<Vec<Call>>,
    /// Pages whose extraction answer is prose instead of JSON.
    unreadable: Mutex<HashSet<(i64, u32)>>,
    /// Model id whose calls fail like an unavailable provider.
    broken_model: Mutex<Option<String>>,
    /// Model id whose classification answer is not a known label.
    confused_classifier: Mutex<Option<String>>,
    gate: Mutex<Option<Gate>>,
}

impl FakeVision {
    fn new(filings: &[Filing]) -> Self {
        Self {
            documents: filings
                .iter()
                .map(|f| (f.document_id, f.pages.clone()))
                .collect(),
            calls: Mutex::new(Vec::new()),
            unreadable: Mutex::new(HashSet::new()),
            broken_model: Mutex::new(None),
            confused_classifier: Mutex::new(None),
            gate: Mutex::new(None),
        }
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, model: &str, stage: Stage) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.model == model && c.stage == stage)
            .count()
    }
}

#[async_trait]
impl VisionModel for FakeVision {
    async fn invoke(
        &self,
        model_id: &str,
        request: &VisionRequest,
    ) -> Result<VisionResponse, SyncError> {
        let gate = self
            .gate
            .lock()
            .unwrap()
            .as_ref()
            .map(|g| (Arc::clone(&g.entered), Arc::clone(&g.release)));
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.acquire().await.unwrap().forget();
        }

        let img = image::load_from_memory(&request.image).unwrap();
        let (stage, w, h) = if request.mime_type == "image/png" {
            (Stage::Classify, img.width(), img.height())
        } else if request.prompt == SUMMARY_PAGE_PROMPT {
            (Stage::Summary, img.width() / 2, img.height() / 6)
        } else {
            (Stage::Schedule, img.width() / 2, img.height() / 6)
        };
        let page_number = w - 100;
        let (document_id, labels) = &self.documents[(h - 100) as usize];
        self.calls.lock().unwrap().push(Call {
            model: model_id.to_string(),
            stage,
            document_id: *document_id,
            page_number,
        });

        if self.broken_model.lock().unwrap().as_deref() == Some(model_id) {
            return Err(SyncError::ModelCall {
                model: model_id.to_string(),
                attempts: 3,
                detail: "HTTP 503 Service Unavailable".to_string(),
            });
        }

        let unreadable = self
            .unreadable
            .lock()
            .unwrap()
            .contains(&(*document_id, page_number));
        let confused =
            self.confused_classifier.lock().unwrap().as_deref() == Some(model_id);
        let text = match stage {
            Stage::Classify if confused => json!({ "page_type": "not_a_form" }).to_string(),
            Stage::Classify => {
                let label = labels
                    .get(page_number as usize - 1)
                    .copied()
                    .unwrap_or(PageType::Other);
                format!("```json\n{}\n```", json!({ "page_type": label.as_str() }))
            }
            _ if unreadable => "I could not read the numbers on this page.".to_string(),
            Stage::Summary => serde_json::to_string(&SummaryPage {
                filer_name: Some(format!("Committee {document_id}")),
                outstanding_debts: Some(0.0),
                ..Default::default()
            })
            .unwrap(),
            Stage::Schedule => serde_json::to_string(&ScheduleA {
                contributions: vec![ScheduleAContribution {
                    contributor_name: "Jane Doe".to_string(),
                    amount_received_this_period: Some(250.0),
                    ..Default::default()
                }],
                subtotal: Some(250.0),
                ..Default::default()
            })
            .unwrap(),
        };
        Ok(VisionResponse {
            text,
            usage: ModelUsage {
                input_tokens: 1200,
                output_tokens: 40,
                total_tokens: 1240,
                model: model_id.to_string(),
            },
        })
    }
}

// ── Recording progress callback ──────────────────────────────────────────────

#[derive(Default)]
struct RecordingProgress {
    stages: Mutex<Vec<(SyncStage, usize)>>,
    classified: Mutex<Vec<(i64, u32, String, bool)>>,
    finished: Mutex<Option<JobStatus>>,
}

impl SyncProgressCallback for RecordingProgress {
    fn on_stage(&self, stage: SyncStage, total: usize) {
        self.stages.lock().unwrap().push((stage, total));
    }

    fn on_page_classified(&self, document_id: i64, page_number: u32, page_type: &str, cached: bool) {
        self.classified.lock().unwrap().push((
            document_id,
            page_number,
            page_type.to_string(),
            cached,
        ));
    }

    fn on_sync_complete(&self, _job_id: &str, status: JobStatus) {
        *self.finished.lock().unwrap() = Some(status);
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    service: SyncService,
    store: Store,
    vision: Arc<FakeVision>,
}

impl Harness {
    async fn new(filings: Vec<Filing>) -> Self {
        let store = Store::in_memory().await.unwrap();
        Self::with_store(store, filings, None)
    }

    fn with_store(store: Store, filings: Vec<Filing>, progress: Option<ProgressCallback>) -> Self {
        let source = Arc::new(FakeCloud::new(&filings));
        let vision = Arc::new(FakeVision::new(&filings));
        let mut builder = SyncConfig::builder().event_poll_interval_ms(10);
        if let Some(cb) = progress {
            builder = builder.progress_callback(cb);
        }
        let config = builder.build().unwrap();
        let service = SyncService::new(
            store.clone(),
            source,
            Arc::clone(&vision) as Arc<dyn VisionModel>,
            config,
        );
        Self {
            service,
            store,
            vision,
        }
    }

    /// Start a sync and wait for it.
    async fn run(&self, project_id: i64, classifier: &str, extractor: &str) -> (String, JobStatus) {
        let job_id = assert_ok!(self.service.start_sync(project_id, classifier, extractor).await);
        let status = assert_ok!(self.service.wait(&job_id).await);
        (job_id, status.status)
    }

    async fn events(&self, job_id: &str) -> Vec<(EventType, String)> {
        self.service
            .get_job_events(job_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| (e.event_type, e.message))
            .collect()
    }

    async fn counts(&self) -> TableCounts {
        self.store.table_counts().await.unwrap()
    }
}

fn info(message: &str) -> (EventType, String) {
    (EventType::Info, message.to_string())
}

/// Row counts that only grow with pipeline work, ignoring job bookkeeping.
fn work_counts(c: TableCounts) -> (u64, u64, u64, u64) {
    (c.documents, c.pages, c.predictions, c.extractions)
}

// ── Scenario ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn summary_and_schedule_pages_are_extracted() {
    let h = Harness::new(vec![filing(
        12345,
        1001,
        &[PageType::CampaignDisclosureSummaryPage, PageType::ScheduleA],
    )])
    .await;

    let (job_id, status) = h.run(12345, CLASSIFIER, EXTRACTOR).await;
    assert_eq!(status, JobStatus::Completed);

    let counts = h.counts().await;
    assert_eq!(work_counts(counts), (1, 2, 2, 2));
    assert_eq!(counts.jobs, 1);

    let view = assert_ok!(h.service.get_document_extractions(1001).await);
    assert_eq!(view.document.title, "Form 460 filing 1001");
    assert_eq!(view.document.page_count, 2);
    let pages = &view.models[EXTRACTOR];
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].page_number, 1);
    assert_eq!(pages[0].page_type, "campaign_disclosure_summary_page");
    assert_eq!(pages[0].parsed_data["filer_name"], "Committee 1001");
    assert_eq!(pages[1].page_number, 2);
    assert_eq!(pages[1].page_type, "schedule_a");
    assert_eq!(
        pages[1].parsed_data["contributions"][0]["contributor_name"],
        "Jane Doe"
    );

    let status = assert_ok!(h.service.get_job_status(&job_id).await);
    assert!(status.error.is_none());
    assert!(status.completed_at.unwrap() >= status.started_at);
}

#[tokio::test]
async fn events_are_recorded_in_order() {
    let h = Harness::new(vec![filing(
        12345,
        1001,
        &[PageType::CampaignDisclosureSummaryPage, PageType::ScheduleA],
    )])
    .await;
    let (job_id, _) = h.run(12345, CLASSIFIER, EXTRACTOR).await;

    assert_eq!(
        h.events(&job_id).await,
        vec![
            info("Starting sync for project 12345"),
            info("Fetching project from DocumentCloud..."),
            info("Found 1 documents"),
            info("Processing document 1001 (2 pages)..."),
            info("Completed page type predictions for document 1001"),
            info("Parsing 1 summary pages..."),
            info("Parsed summary page 1 from document 1001"),
            info("Parsing 1 Schedule A pages..."),
            info("Parsed Schedule A page 2 from document 1001"),
            (EventType::Success, "Sync complete!".to_string()),
        ]
    );

    let events = h.service.get_job_events(&job_id).await.unwrap();
    assert!(events.windows(2).all(|w| w[0].id < w[1].id));
    assert!(events.windows(2).all(|w| w[0].created_at <= w[1].created_at));
}

// ── Idempotent resumability ──────────────────────────────────────────────────

#[tokio::test]
async fn rerun_does_no_new_work() {
    let h = Harness::new(vec![
        filing(
            12345,
            1001,
            &[PageType::CampaignDisclosureSummaryPage, PageType::ScheduleA],
        ),
        filing(12345, 1002, &[PageType::CoverPage, PageType::ScheduleAContinuation]),
    ])
    .await;

    let (_, first) = h.run(12345, CLASSIFIER, EXTRACTOR).await;
    assert_eq!(first, JobStatus::Completed);
    let before = h.counts().await;
    let calls_before = h.vision.calls().len();

    let (second_id, second) = h.run(12345, CLASSIFIER, EXTRACTOR).await;
    assert_eq!(second, JobStatus::Completed);
    let after = h.counts().await;

    assert_eq!(work_counts(after), work_counts(before));
    assert_eq!(after.jobs, before.jobs + 1);
    assert_eq!(h.vision.calls().len(), calls_before, "no model calls on re-run");

    let events = h.events(&second_id).await;
    assert!(events.contains(&info("No summary pages to parse")));
    assert!(events.contains(&info("No Schedule A pages to parse")));
    assert_eq!(events.last().unwrap().0, EventType::Success);
}

#[tokio::test]
async fn failed_run_resumes_where_it_stopped() {
    let h = Harness::new(vec![filing(
        12345,
        1001,
        &[PageType::CampaignDisclosureSummaryPage, PageType::ScheduleA],
    )])
    .await;
    *h.vision.broken_model.lock().unwrap() = Some(EXTRACTOR.to_string());

    let (job_id, status) = h.run(12345, CLASSIFIER, EXTRACTOR).await;
    assert_eq!(status, JobStatus::Failed);
    let report = assert_ok!(h.service.get_job_report(&job_id).await);
    let error = report.job.error.unwrap();
    assert!(error.contains(EXTRACTOR), "{error}");
    assert!(error.contains("503"), "{error}");
    let last = report.events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);
    assert!(last.message.contains("HTTP 503"));
    assert!(!report
        .events
        .iter()
        .any(|e| e.event_type == EventType::Success));

    // Classification finished before the extraction failure.
    let counts = h.counts().await;
    assert_eq!(work_counts(counts), (1, 2, 2, 0));

    *h.vision.broken_model.lock().unwrap() = None;
    let (_, status) = h.run(12345, CLASSIFIER, EXTRACTOR).await;
    assert_eq!(status, JobStatus::Completed);
    assert_eq!(h.vision.count(CLASSIFIER, Stage::Classify), 2, "labels reused");
    assert_eq!(work_counts(h.counts().await), (1, 2, 2, 2));
}

#[tokio::test]
async fn invalid_classification_aborts_the_run() {
    let h = Harness::new(vec![filing(
        12345,
        1001,
        &[PageType::CampaignDisclosureSummaryPage, PageType::ScheduleA],
    )])
    .await;
    *h.vision.confused_classifier.lock().unwrap() = Some(CLASSIFIER.to_string());

    let (job_id, status) = h.run(12345, CLASSIFIER, EXTRACTOR).await;
    assert_eq!(status, JobStatus::Failed);
    let report = assert_ok!(h.service.get_job_report(&job_id).await);
    let error = report.job.error.unwrap();
    assert!(error.contains("invalid response"), "{error}");
    let last = report.events.last().unwrap();
    assert_eq!(last.event_type, EventType::Error);

    // The first page's answer stops the run; nothing is guessed or stored.
    assert_eq!(h.vision.count(CLASSIFIER, Stage::Classify), 1);
    assert_eq!(h.counts().await.predictions, 0);
    assert_eq!(h.counts().await.extractions, 0);
    assert_eq!(h.vision.count(EXTRACTOR, Stage::Summary), 0);
    assert_eq!(h.vision.count(EXTRACTOR, Stage::Schedule), 0);
}

#[tokio::test]
async fn runner_leaves_finished_job_untouched() {
    let filings = vec![filing(12345, 1001, &[PageType::CampaignDisclosureSummaryPage])];
    let store = Store::in_memory().await.unwrap();
    let job = store.create_job(12345, CLASSIFIER, EXTRACTOR).await.unwrap();
    assert!(store.finish_job(&job.id, JobStatus::Completed, None).await.unwrap());

    let vision = Arc::new(FakeVision::new(&filings));
    let runner = SyncRunner::new(
        store.clone(),
        Arc::new(FakeCloud::new(&filings)),
        Arc::clone(&vision) as Arc<dyn VisionModel>,
        None,
    );
    let err = assert_err!(runner.run(&job, &CancelToken::never()).await);
    assert!(matches!(err, SyncError::JobNotPending { .. }), "{err}");

    let report = store.job_report(&job.id).await.unwrap();
    assert_eq!(report.job.status, JobStatus::Completed);
    assert!(report.job.error.is_none());
    assert!(report.events.is_empty());
    assert!(vision.calls().is_empty());
    assert_eq!(work_counts(store.table_counts().await.unwrap()), (0, 0, 0, 0));
}

// ── Memoization ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn classification_is_memoized_per_model() {
    let h = Harness::new(vec![filing(
        12345,
        1001,
        &[PageType::CampaignDisclosureSummaryPage, PageType::ScheduleA],
    )])
    .await;

    h.run(12345, "fake/m1", EXTRACTOR).await;
    assert_eq!(h.vision.count("fake/m1", Stage::Classify), 2);

    h.run(12345, "fake/m1", EXTRACTOR).await;
    assert_eq!(h.vision.count("fake/m1", Stage::Classify), 2);

    h.run(12345, "fake/m2", EXTRACTOR).await;
    assert_eq!(h.vision.count("fake/m1", Stage::Classify), 2);
    assert_eq!(h.vision.count("fake/m2", Stage::Classify), 2);
    assert_eq!(h.counts().await.predictions, 4);

    // Extractions are keyed on the extractor model, not the classifier.
    assert_eq!(h.vision.count(EXTRACTOR, Stage::Summary), 1);
    assert_eq!(h.vision.count(EXTRACTOR, Stage::Schedule), 1);
    assert_eq!(h.counts().await.extractions, 2);
}

#[tokio::test]
async fn second_extractor_model_adds_its_own_records() {
    let h = Harness::new(vec![filing(
        12345,
        1001,
        &[PageType::CampaignDisclosureSummaryPage, PageType::ScheduleA],
    )])
    .await;

    h.run(12345, CLASSIFIER, "fake/extractor-1").await;
    h.run(12345, CLASSIFIER, "fake/extractor-2").await;

    assert_eq!(h.vision.count(CLASSIFIER, Stage::Classify), 2);
    let view = h.service.get_document_extractions(1001).await.unwrap();
    assert_eq!(
        view.models.keys().cloned().collect::<Vec<_>>(),
        vec!["fake/extractor-1".to_string(), "fake/extractor-2".to_string()]
    );

    let docs = h.service.list_documents_with_any_extraction().await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].id, 1001);
    assert_eq!(docs[0].model_count, 2);
    assert_eq!(docs[0].title.as_deref(), Some("Form 460 filing 1001"));
}

// ── Routing ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn only_summary_and_schedule_a_pages_are_extracted() {
    let h = Harness::new(vec![filing(
        777,
        2001,
        &[
            PageType::CoverPage,
            PageType::CoverPagePart2,
            PageType::CampaignDisclosureSummaryPage,
            PageType::ScheduleA,
            PageType::ScheduleAContinuation,
            PageType::ScheduleBPart1,
            PageType::ScheduleE,
            PageType::Other,
        ],
    )])
    .await;

    let (_, status) = h.run(777, CLASSIFIER, EXTRACTOR).await;
    assert_eq!(status, JobStatus::Completed);

    let extracted: Vec<(Stage, u32)> = h
        .vision
        .calls()
        .into_iter()
        .filter(|c| c.stage != Stage::Classify)
        .map(|c| (c.stage, c.page_number))
        .collect();
    assert_eq!(
        extracted,
        vec![(Stage::Summary, 3), (Stage::Schedule, 4), (Stage::Schedule, 5)]
    );

    let view = h.service.get_document_extractions(2001).await.unwrap();
    let stored: Vec<(u32, &str)> = view.models[EXTRACTOR]
        .iter()
        .map(|p| (p.page_number, p.page_type.as_str()))
        .collect();
    assert_eq!(
        stored,
        vec![
            (3, "campaign_disclosure_summary_page"),
            (4, "schedule_a"),
            (5, "schedule_a"),
        ]
    );
}

#[tokio::test]
async fn document_without_extractable_pages_is_not_listed() {
    let h = Harness::new(vec![filing(
        5,
        3001,
        &[PageType::CoverPage, PageType::ScheduleC],
    )])
    .await;

    let (job_id, status) = h.run(5, CLASSIFIER, EXTRACTOR).await;
    assert_eq!(status, JobStatus::Completed);
    assert!(h
        .service
        .list_documents_with_any_extraction()
        .await
        .unwrap()
        .is_empty());

    let view = h.service.get_document_extractions(3001).await.unwrap();
    assert!(view.models.is_empty());

    let events = h.events(&job_id).await;
    assert!(events.contains(&info("No summary pages to parse")));
}

// ── Page-level failures ──────────────────────────────────────────────────────

#[tokio::test]
async fn unreadable_page_is_logged_and_run_continues() {
    let h = Harness::new(vec![filing(
        100,
        10,
        &[PageType::CampaignDisclosureSummaryPage, PageType::ScheduleA],
    )])
    .await;
    h.vision.unreadable.lock().unwrap().insert((10, 1));

    let (job_id, status) = h.run(100, CLASSIFIER, EXTRACTOR).await;
    assert_eq!(status, JobStatus::Completed);

    let events = h.events(&job_id).await;
    let errors: Vec<&String> = events
        .iter()
        .filter(|(t, _)| *t == EventType::Error)
        .map(|(_, m)| m)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("page 1 from document 10"), "{}", errors[0]);
    assert!(events.contains(&info("Parsed Schedule A page 2 from document 10")));
    assert_eq!(events.last().unwrap().0, EventType::Success);

    // The failed page stays queued; once the model can read it, it is parsed.
    h.vision.unreadable.lock().unwrap().clear();
    let (job_id, _) = h.run(100, CLASSIFIER, EXTRACTOR).await;
    assert!(h
        .events(&job_id)
        .await
        .contains(&info("Parsed summary page 1 from document 10")));
    assert_eq!(h.counts().await.extractions, 2);
}

#[tokio::test]
async fn queued_page_of_another_project_is_skipped_with_warning() {
    let h = Harness::new(vec![
        filing(100, 10, &[PageType::CampaignDisclosureSummaryPage]),
        filing(200, 20, &[PageType::CoverPage]),
    ])
    .await;
    h.vision.unreadable.lock().unwrap().insert((10, 1));
    h.run(100, CLASSIFIER, EXTRACTOR).await;

    let (job_id, status) = h.run(200, CLASSIFIER, EXTRACTOR).await;
    assert_eq!(status, JobStatus::Completed);
    let events = h.events(&job_id).await;
    assert!(events.contains(&(
        EventType::Warning,
        "Could not find document 10, skipping page 1".to_string()
    )));
    assert_eq!(h.vision.count(EXTRACTOR, Stage::Summary), 1, "no call for the skipped page");
}

#[tokio::test]
async fn unknown_project_fails_the_job() {
    let h = Harness::new(vec![filing(1, 1, &[PageType::CoverPage])]).await;

    let (job_id, status) = h.run(999, CLASSIFIER, EXTRACTOR).await;
    assert_eq!(status, JobStatus::Failed);
    let report = h.service.get_job_report(&job_id).await.unwrap();
    assert_eq!(
        report.job.error.as_deref(),
        Some("DocumentCloud project 999 not found")
    );
    assert_eq!(report.events.last().unwrap().event_type, EventType::Error);
    assert_eq!(work_counts(h.counts().await), (0, 0, 0, 0));
}

// ── Job manager surface ──────────────────────────────────────────────────────

#[tokio::test]
async fn invalid_requests_are_rejected_up_front() {
    let h = Harness::new(vec![filing(1, 1, &[PageType::CoverPage])]).await;

    let err = assert_err!(h.service.start_sync(0, CLASSIFIER, EXTRACTOR).await);
    assert!(matches!(err, SyncError::InvalidConfig(_)));
    assert_eq!(h.counts().await.jobs, 0);

    let err = assert_err!(h.service.get_job_status("no-such-job").await);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = assert_err!(h.service.get_job_events("no-such-job").await);
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = assert_err!(h.service.get_document_extractions(42).await);
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn blank_model_ids_use_defaults() {
    let h = Harness::new(vec![filing(1, 1, &[PageType::CoverPage])]).await;
    h.run(1, "  ", "").await;

    assert_eq!(
        h.vision.count(ca460_sync::config::DEFAULT_CLASSIFIER_MODEL, Stage::Classify),
        1
    );
}

#[tokio::test]
async fn event_stream_ends_when_job_finishes() {
    let h = Harness::new(vec![filing(
        12345,
        1001,
        &[PageType::CampaignDisclosureSummaryPage, PageType::ScheduleA],
    )])
    .await;

    let job_id = h.service.start_sync(12345, CLASSIFIER, EXTRACTOR).await.unwrap();
    let streamed: Vec<String> = h
        .service
        .watch_events(&job_id)
        .map(|e| e.unwrap().message)
        .collect()
        .await;
    assert_eq!(streamed.first().unwrap(), "Starting sync for project 12345");
    assert_eq!(streamed.last().unwrap(), "Sync complete!");

    let stored: Vec<String> = h
        .service
        .get_job_events(&job_id)
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(streamed, stored);
}

#[tokio::test]
async fn progress_callback_sees_every_stage() {
    let store = Store::in_memory().await.unwrap();
    let progress = Arc::new(RecordingProgress::default());
    let h = Harness::with_store(
        store,
        vec![filing(
            12345,
            1001,
            &[PageType::CampaignDisclosureSummaryPage, PageType::ScheduleA],
        )],
        Some(Arc::clone(&progress) as ProgressCallback),
    );
    h.run(12345, CLASSIFIER, EXTRACTOR).await;
    h.run(12345, CLASSIFIER, EXTRACTOR).await;

    let stages = progress.stages.lock().unwrap().clone();
    assert_eq!(
        &stages[..6],
        &[
            (SyncStage::FetchingProject, 0),
            (SyncStage::SyncingDocuments, 1),
            (SyncStage::ClassifyingPages, 2),
            (SyncStage::ExtractingSummaryPages, 1),
            (SyncStage::ExtractingSchedulePages, 1),
            (SyncStage::Finalizing, 0),
        ]
    );

    let classified = progress.classified.lock().unwrap().clone();
    assert_eq!(classified.len(), 4);
    assert!(!classified[0].3 && !classified[1].3);
    assert!(classified[2].3 && classified[3].3, "second run uses stored labels");
    assert_eq!(classified[0].2, "campaign_disclosure_summary_page");
    assert_eq!(*progress.finished.lock().unwrap(), Some(JobStatus::Completed));
}

#[tokio::test]
async fn cancelled_job_stops_at_page_boundary() {
    let h = Harness::new(vec![filing(
        12345,
        1001,
        &[PageType::CoverPage, PageType::CoverPage, PageType::CoverPage],
    )])
    .await;
    let entered = Arc::new(Notify::new());
    let release = Arc::new(Semaphore::new(0));
    *h.vision.gate.lock().unwrap() = Some(Gate {
        entered: Arc::clone(&entered),
        release: Arc::clone(&release),
    });

    let job_id = h.service.start_sync(12345, CLASSIFIER, EXTRACTOR).await.unwrap();
    entered.notified().await;
    assert!(assert_ok!(h.service.cancel(&job_id)));
    release.add_permits(10);

    let status = h.service.wait(&job_id).await.unwrap();
    assert_eq!(status.status, JobStatus::Failed);
    assert!(status.error.unwrap().contains("cancelled"));
    assert_eq!(h.vision.count(CLASSIFIER, Stage::Classify), 1);
    assert_eq!(h.counts().await.predictions, 1);

    // Not running any more.
    assert!(!h.service.cancel(&job_id).unwrap());
}

#[tokio::test]
async fn interrupted_jobs_are_failed_on_recovery() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ca460.db");

    let stale = {
        let store = Store::open(&path).await.unwrap();
        let job = store.create_job(12345, CLASSIFIER, EXTRACTOR).await.unwrap();
        assert!(store.mark_job_running(&job.id).await.unwrap());
        let pending = store.create_job(12345, CLASSIFIER, EXTRACTOR).await.unwrap();
        (job.id, pending.id)
    };

    let store = Store::open(&path).await.unwrap();
    let h = Harness::with_store(store, vec![filing(12345, 1001, &[PageType::CoverPage])], None);
    let mut recovered = h.service.recover_interrupted_jobs().await.unwrap();
    recovered.sort();
    let mut expected = vec![stale.0.clone(), stale.1.clone()];
    expected.sort();
    assert_eq!(recovered, expected);

    let report = h.service.get_job_report(&stale.0).await.unwrap();
    assert_eq!(report.job.status, JobStatus::Failed);
    assert_eq!(report.job.error.as_deref(), Some(INTERRUPTED_MESSAGE));
    assert!(report.job.completed_at.is_some());
    assert_eq!(report.events.len(), 1);
    assert_eq!(report.events[0].event_type, EventType::Error);

    assert!(h.service.recover_interrupted_jobs().await.unwrap().is_empty());

    // A finished job is left alone.
    let (job_id, status) = h.run(12345, CLASSIFIER, EXTRACTOR).await;
    assert_eq!(status, JobStatus::Completed);
    assert!(h.service.recover_interrupted_jobs().await.unwrap().is_empty());
    assert_eq!(
        h.service.get_job_status(&job_id).await.unwrap().status,
        JobStatus::Completed
    );
}
