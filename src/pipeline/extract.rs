//! Structured extraction for the page types that carry data.
//!
//! [`Extractor`] is the closed set of extraction variants. Each variant binds
//! a prompt, an output schema, the page-type label its records are stored
//! under, and the classifier labels that route a page to it. The two
//! variants' source label sets are disjoint, so a page is queued for at most
//! one of them.

use crate::error::SyncError;
use crate::forms::{schedule_a_schema, summary_page_schema, PageType, ScheduleA, SummaryPage};
use crate::pipeline::encode::JPEG_MIME;
use crate::pipeline::image::extraction_image;
use crate::pipeline::llm::{VisionModel, VisionRequest};
use crate::pipeline::response::parse_structured;
use crate::prompts::{SCHEDULE_A_PROMPT, SUMMARY_PAGE_PROMPT};
use crate::source::{DocumentStore, RemoteDocument};
use crate::store::{Inserted, NewExtraction, PageRow, Store, Timing};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// An extraction variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Extractor {
    /// Campaign Disclosure Summary Page totals.
    Summary,
    /// Schedule A contribution line items (including continuation sheets).
    Schedule,
}

impl Extractor {
    /// Every variant, in the order a run processes them.
    pub const ALL: [Extractor; 2] = [Extractor::Summary, Extractor::Schedule];

    /// Page type the extracted records are stored under.
    pub fn target_page_type(&self) -> PageType {
        match self {
            Extractor::Summary => PageType::CampaignDisclosureSummaryPage,
            Extractor::Schedule => PageType::ScheduleA,
        }
    }

    /// Classifier labels routed to this variant.
    pub fn source_page_types(&self) -> &'static [PageType] {
        match self {
            Extractor::Summary => &[PageType::CampaignDisclosureSummaryPage],
            Extractor::Schedule => &[PageType::ScheduleA, PageType::ScheduleAContinuation],
        }
    }

    /// Human-readable name used in event messages.
    pub fn label(&self) -> &'static str {
        match self {
            Extractor::Summary => "summary",
            Extractor::Schedule => "Schedule A",
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            Extractor::Summary => SUMMARY_PAGE_PROMPT,
            Extractor::Schedule => SCHEDULE_A_PROMPT,
        }
    }

    pub fn schema(&self) -> Value {
        match self {
            Extractor::Summary => summary_page_schema(),
            Extractor::Schedule => schedule_a_schema(),
        }
    }

    /// Validate a model answer against this variant's output type and
    /// return it in normalized JSON form.
    pub fn validate(&self, model: &str, text: &str) -> Result<Value, SyncError> {
        let value = match self {
            Extractor::Summary => serde_json::to_value(parse_structured::<SummaryPage>(model, text)?)?,
            Extractor::Schedule => serde_json::to_value(parse_structured::<ScheduleA>(model, text)?)?,
        };
        Ok(value)
    }
}

/// Runs extraction calls and stores their records.
#[derive(Clone)]
pub struct PageExtractor {
    store: Store,
    source: Arc<dyn DocumentStore>,
    vision: Arc<dyn VisionModel>,
}

impl PageExtractor {
    pub fn new(store: Store, source: Arc<dyn DocumentStore>, vision: Arc<dyn VisionModel>) -> Self {
        Self {
            store,
            source,
            vision,
        }
    }

    /// Extract `page` with `extractor` and store the record.
    ///
    /// Callers pre-filter to pages without a record; if one appears anyway
    /// the insert is a no-op and `Inserted::Existing` is returned.
    pub async fn extract(
        &self,
        extractor: Extractor,
        page: &PageRow,
        document: &RemoteDocument,
        extractor_model: &str,
    ) -> Result<Inserted, SyncError> {
        let raw = self
            .source
            .fetch_page_image(document, page.page_number)
            .await?;
        let jpeg = extraction_image(raw).await?;

        let request = VisionRequest {
            prompt: extractor.prompt().to_string(),
            schema: extractor.schema(),
            image: jpeg,
            mime_type: JPEG_MIME,
        };
        let start = Instant::now();
        let response = self.vision.invoke(extractor_model, &request).await?;
        let timing = Timing::from_duration(start.elapsed());

        let parsed_data = extractor.validate(extractor_model, &response.text)?;
        let inserted = self
            .store
            .insert_extraction(NewExtraction {
                page_id: page.id,
                page_type: extractor.target_page_type().as_str().to_string(),
                model: extractor_model.to_string(),
                parsed_data,
                usage: serde_json::to_value(&response.usage)?,
                timing,
            })
            .await?;
        debug!(
            "Extracted {} page {} of document {} in {:.2}s",
            extractor.label(),
            page.page_number,
            page.document_id,
            timing.time_taken_s
        );
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(page_type: PageType) -> Option<Extractor> {
        Extractor::ALL
            .into_iter()
            .find(|e| e.source_page_types().contains(&page_type))
    }

    #[test]
    fn routing_is_disjoint() {
        for t in PageType::ALL {
            let routed: Vec<_> = Extractor::ALL
                .into_iter()
                .filter(|e| e.source_page_types().contains(&t))
                .collect();
            assert!(routed.len() <= 1, "{t} routed to {routed:?}");
        }
    }

    #[test]
    fn routing_table() {
        assert_eq!(
            route(PageType::CampaignDisclosureSummaryPage),
            Some(Extractor::Summary)
        );
        assert_eq!(route(PageType::ScheduleA), Some(Extractor::Schedule));
        assert_eq!(route(PageType::ScheduleAContinuation), Some(Extractor::Schedule));
        assert_eq!(route(PageType::ScheduleBPart1), None);
        assert_eq!(route(PageType::CoverPage), None);
        assert_eq!(route(PageType::Other), None);
    }

    #[test]
    fn continuation_pages_store_as_schedule_a() {
        assert_eq!(Extractor::Schedule.target_page_type().as_str(), "schedule_a");
    }

    #[test]
    fn validate_schedule_a() {
        let value = Extractor::Schedule
            .validate(
                "m",
                "```json\n{\"contributions\": [{\"contributor_name\": \"Jane Doe\"}]}\n```",
            )
            .unwrap();
        assert_eq!(value["contributions"][0]["contributor_name"], "Jane Doe");
    }

    #[test]
    fn validate_rejects_wrong_shape() {
        let err = Extractor::Summary
            .validate("m", r#"{"contributions": []}"#)
            .unwrap_err();
        assert!(err.is_validation());
    }
}
