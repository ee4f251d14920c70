//! Documents, pages, type predictions and extracted records.

use super::{json_column, to_json, Inserted, NewExtraction, NewPrediction, PageRow, Store};
use super::TypePrediction;
use crate::error::SyncError;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;

fn row_to_page(row: &Row<'_>) -> rusqlite::Result<PageRow> {
    Ok(PageRow {
        id: row.get(0)?,
        document_id: row.get(1)?,
        page_number: row.get(2)?,
    })
}

fn row_to_prediction(row: &Row<'_>) -> rusqlite::Result<TypePrediction> {
    Ok(TypePrediction {
        id: row.get(0)?,
        page_id: row.get(1)?,
        model: row.get(2)?,
        page_type: row.get(3)?,
        usage: json_column(row, 4)?,
        timing: json_column(row, 5)?,
        created_at: row.get(6)?,
    })
}

/// Turn the affected-row count of an `ON CONFLICT DO NOTHING` insert into
/// [`Inserted`], looking up the existing id when nothing was written.
fn inserted_or_existing(
    conn: &Connection,
    changed: usize,
    lookup: impl FnOnce(&Connection) -> rusqlite::Result<i64>,
) -> rusqlite::Result<Inserted> {
    if changed == 1 {
        Ok(Inserted::New(conn.last_insert_rowid()))
    } else {
        lookup(conn).map(Inserted::Existing)
    }
}

impl Store {
    /// Record a document the first time it is seen. Never updates an
    /// existing row.
    pub async fn upsert_document(
        &self,
        document_id: i64,
        page_count: u32,
        metadata: Value,
    ) -> Result<Inserted, SyncError> {
        let data = serde_json::to_string(&metadata)?;
        self.write(move |conn| {
            let changed = conn.execute(
                "INSERT INTO documents (id, page_count, data, created_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (id) DO NOTHING",
                params![document_id, page_count, data, Utc::now()],
            )?;
            if changed == 1 {
                Ok(Inserted::New(document_id))
            } else {
                Ok(Inserted::Existing(document_id))
            }
        })
        .await
    }

    /// Return the page id for `(document_id, page_number)`, creating the row
    /// if needed.
    pub async fn upsert_page(
        &self,
        document_id: i64,
        page_number: u32,
    ) -> Result<Inserted, SyncError> {
        self.write(move |conn| {
            let changed = conn.execute(
                "INSERT INTO pages (document_id, page_number, created_at)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (document_id, page_number) DO NOTHING",
                params![document_id, page_number, Utc::now()],
            )?;
            inserted_or_existing(conn, changed, |conn| {
                conn.query_row(
                    "SELECT id FROM pages WHERE document_id = ?1 AND page_number = ?2",
                    params![document_id, page_number],
                    |row| row.get(0),
                )
            })
        })
        .await
    }

    /// The prediction for `(page_id, model)`, if one was ever written.
    pub async fn find_prediction(
        &self,
        page_id: i64,
        model: &str,
    ) -> Result<Option<TypePrediction>, SyncError> {
        let model = model.to_string();
        self.read(move |conn| {
            conn.query_row(
                "SELECT id, page_id, model, predicted_page_type, model_usage, timing, created_at
                 FROM page_type_predictions
                 WHERE page_id = ?1 AND model = ?2",
                params![page_id, model],
                row_to_prediction,
            )
            .optional()
        })
        .await
    }

    /// Write a prediction unless `(page_id, model)` already has one.
    pub async fn insert_prediction(&self, new: NewPrediction) -> Result<Inserted, SyncError> {
        self.write(move |conn| {
            let changed = conn.execute(
                "INSERT INTO page_type_predictions
                     (page_id, model, predicted_page_type, model_usage, timing, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (page_id, model) DO NOTHING",
                params![
                    new.page_id,
                    new.model,
                    new.page_type,
                    to_json(&new.usage)?,
                    to_json(&new.timing)?,
                    Utc::now(),
                ],
            )?;
            inserted_or_existing(conn, changed, |conn| {
                conn.query_row(
                    "SELECT id FROM page_type_predictions WHERE page_id = ?1 AND model = ?2",
                    params![new.page_id, new.model],
                    |row| row.get(0),
                )
            })
        })
        .await
    }

    /// Pages whose prediction under `classifier_model` is one of
    /// `source_types` and which have no `target_type` record under
    /// `extractor_model`.
    pub async fn pages_needing_extraction(
        &self,
        target_type: &str,
        source_types: &[&str],
        classifier_model: &str,
        extractor_model: &str,
    ) -> Result<Vec<PageRow>, SyncError> {
        let target_type = target_type.to_string();
        let source_types = serde_json::to_string(source_types)?;
        let classifier_model = classifier_model.to_string();
        let extractor_model = extractor_model.to_string();
        self.read(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT p.id, p.document_id, p.page_number
                 FROM pages p
                 JOIN page_type_predictions ptp ON p.id = ptp.page_id
                 LEFT JOIN page_parsed pp
                     ON p.id = pp.page_id
                    AND pp.page_type = ?1
                    AND pp.model = ?2
                 WHERE ptp.model = ?3
                   AND ptp.predicted_page_type IN (SELECT value FROM json_each(?4))
                   AND pp.id IS NULL
                 ORDER BY p.document_id, p.page_number",
            )?;
            let rows = stmt.query_map(
                params![target_type, extractor_model, classifier_model, source_types],
                row_to_page,
            )?;
            rows.collect()
        })
        .await
    }

    /// Write an extraction unless `(page_id, page_type, model)` already has one.
    pub async fn insert_extraction(&self, new: NewExtraction) -> Result<Inserted, SyncError> {
        self.write(move |conn| {
            let changed = conn.execute(
                "INSERT INTO page_parsed
                     (page_id, page_type, model, model_usage, timing, parsed_data, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (page_id, page_type, model) DO NOTHING",
                params![
                    new.page_id,
                    new.page_type,
                    new.model,
                    to_json(&new.usage)?,
                    to_json(&new.timing)?,
                    to_json(&new.parsed_data)?,
                    Utc::now(),
                ],
            )?;
            inserted_or_existing(conn, changed, |conn| {
                conn.query_row(
                    "SELECT id FROM page_parsed
                     WHERE page_id = ?1 AND page_type = ?2 AND model = ?3",
                    params![new.page_id, new.page_type, new.model],
                    |row| row.get(0),
                )
            })
        })
        .await
    }
}
