//! Read-only views over extracted data.

use super::{json_column, DocumentExtractions, DocumentInfo, DocumentSummary, PageExtraction, Store};
use crate::error::SyncError;
use rusqlite::{params, OptionalExtension};
use std::collections::BTreeMap;

impl Store {
    /// Documents with at least one extraction, newest id first.
    pub async fn list_documents_with_any_extraction(
        &self,
    ) -> Result<Vec<DocumentSummary>, SyncError> {
        self.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT d.id, d.page_count, json_extract(d.data, '$.title'),
                        COUNT(DISTINCT pp.model)
                 FROM documents d
                 JOIN pages p ON p.document_id = d.id
                 JOIN page_parsed pp ON pp.page_id = p.id
                 GROUP BY d.id
                 ORDER BY d.id DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(DocumentSummary {
                    id: row.get(0)?,
                    page_count: row.get(1)?,
                    title: row.get(2)?,
                    model_count: row.get(3)?,
                })
            })?;
            rows.collect()
        })
        .await
    }

    /// Every extraction of one document grouped by extractor model.
    ///
    /// Within a model, records are ordered by page number. Documents without
    /// a title in their metadata are labelled `Document {id}`.
    pub async fn document_extractions(
        &self,
        document_id: i64,
    ) -> Result<DocumentExtractions, SyncError> {
        let found = self
            .read(move |conn| {
                let header = conn
                    .query_row(
                        "SELECT id, page_count, json_extract(data, '$.title')
                         FROM documents WHERE id = ?1",
                        params![document_id],
                        |row| {
                            let id: i64 = row.get(0)?;
                            let title: Option<String> = row.get(2)?;
                            Ok(DocumentInfo {
                                id,
                                page_count: row.get(1)?,
                                title: title.unwrap_or_else(|| format!("Document {id}")),
                            })
                        },
                    )
                    .optional()?;
                let Some(document) = header else {
                    return Ok(None);
                };

                let mut stmt = conn.prepare(
                    "SELECT pp.model, pp.page_type, p.page_number, pp.parsed_data,
                            pp.timing, pp.created_at
                     FROM page_parsed pp
                     JOIN pages p ON p.id = pp.page_id
                     WHERE p.document_id = ?1
                     ORDER BY pp.model, p.page_number",
                )?;
                let mut rows = stmt.query(params![document_id])?;
                let mut models: BTreeMap<String, Vec<PageExtraction>> = BTreeMap::new();
                while let Some(row) = rows.next()? {
                    let model: String = row.get(0)?;
                    models.entry(model).or_default().push(PageExtraction {
                        page_type: row.get(1)?,
                        page_number: row.get(2)?,
                        parsed_data: json_column(row, 3)?,
                        timing: json_column(row, 4)?,
                        created_at: row.get(5)?,
                    });
                }
                Ok(Some(DocumentExtractions { document, models }))
            })
            .await?;
        found.ok_or(SyncError::DocumentNotFound { document_id })
    }
}
