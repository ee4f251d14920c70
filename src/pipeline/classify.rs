//! Page classification, memoized per `(page, classifier model)`.

use crate::error::SyncError;
use crate::forms::{page_type_schema, PageTypePrediction};
use crate::pipeline::encode::PNG_MIME;
use crate::pipeline::image::classification_image;
use crate::pipeline::llm::{VisionModel, VisionRequest};
use crate::pipeline::response::parse_structured;
use crate::prompts::PAGE_TYPE_PROMPT;
use crate::source::{DocumentStore, RemoteDocument};
use crate::store::{Inserted, NewPrediction, PageRow, Store, Timing};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// The label a page ended up with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub page_type: String,
    /// True when the label came from the store and no model was called.
    pub cached: bool,
}

/// Classifies pages with a vision model and records each answer once.
#[derive(Clone)]
pub struct PageClassifier {
    store: Store,
    source: Arc<dyn DocumentStore>,
    vision: Arc<dyn VisionModel>,
}

impl PageClassifier {
    pub fn new(store: Store, source: Arc<dyn DocumentStore>, vision: Arc<dyn VisionModel>) -> Self {
        Self {
            store,
            source,
            vision,
        }
    }

    /// Return the stored label for `(page, classifier_model)` or produce and
    /// store a new one.
    ///
    /// A response that does not validate against the page-type schema is an
    /// error; no label is stored in that case.
    pub async fn classify(
        &self,
        page: &PageRow,
        document: &RemoteDocument,
        classifier_model: &str,
    ) -> Result<Classification, SyncError> {
        if let Some(existing) = self.store.find_prediction(page.id, classifier_model).await? {
            debug!(
                "Page {} of document {} already classified by {} as {}",
                page.page_number, page.document_id, classifier_model, existing.page_type
            );
            return Ok(Classification {
                page_type: existing.page_type,
                cached: true,
            });
        }

        let raw = self
            .source
            .fetch_page_image(document, page.page_number)
            .await?;
        let cropped = classification_image(raw).await?;

        let request = VisionRequest {
            prompt: PAGE_TYPE_PROMPT.to_string(),
            schema: page_type_schema(),
            image: cropped,
            mime_type: PNG_MIME,
        };
        let start = Instant::now();
        let response = self.vision.invoke(classifier_model, &request).await?;
        let timing = Timing::from_duration(start.elapsed());

        let prediction: PageTypePrediction = parse_structured(classifier_model, &response.text)?;
        let page_type = prediction.page_type.as_str().to_string();

        let inserted = self
            .store
            .insert_prediction(NewPrediction {
                page_id: page.id,
                model: classifier_model.to_string(),
                page_type: page_type.clone(),
                usage: serde_json::to_value(&response.usage)?,
                timing,
            })
            .await?;

        // Another job may have classified the same page in the meantime; the
        // first stored label stands.
        if let Inserted::Existing(_) = inserted {
            if let Some(stored) = self.store.find_prediction(page.id, classifier_model).await? {
                return Ok(Classification {
                    page_type: stored.page_type,
                    cached: true,
                });
            }
        }

        debug!(
            "Classified page {} of document {} as {} in {:.2}s",
            page.page_number, page.document_id, page_type, timing.time_taken_s
        );
        Ok(Classification {
            page_type,
            cached: false,
        })
    }
}
