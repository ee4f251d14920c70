//! Table definitions. Every statement is `IF NOT EXISTS` so the batch can be
//! re-run at any time.

pub(crate) const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    id          INTEGER PRIMARY KEY,
    page_count  INTEGER NOT NULL,
    data        TEXT NOT NULL DEFAULT '{}',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pages (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    document_id  INTEGER NOT NULL REFERENCES documents(id),
    page_number  INTEGER NOT NULL CHECK (page_number >= 1),
    created_at   TEXT NOT NULL,
    UNIQUE (document_id, page_number)
);

CREATE TABLE IF NOT EXISTS page_type_predictions (
    id                   INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id              INTEGER NOT NULL REFERENCES pages(id),
    model                TEXT NOT NULL,
    predicted_page_type  TEXT NOT NULL,
    model_usage          TEXT NOT NULL,
    timing               TEXT NOT NULL,
    created_at           TEXT NOT NULL,
    UNIQUE (page_id, model)
);

CREATE INDEX IF NOT EXISTS idx_predictions_model_type
    ON page_type_predictions (model, predicted_page_type);

CREATE TABLE IF NOT EXISTS page_parsed (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    page_id      INTEGER NOT NULL REFERENCES pages(id),
    page_type    TEXT NOT NULL,
    model        TEXT NOT NULL,
    model_usage  TEXT NOT NULL,
    timing       TEXT NOT NULL,
    parsed_data  TEXT NOT NULL,
    created_at   TEXT NOT NULL,
    UNIQUE (page_id, page_type, model)
);

CREATE TABLE IF NOT EXISTS sync_jobs (
    id                TEXT PRIMARY KEY,
    project_id        INTEGER NOT NULL,
    classifier_model  TEXT NOT NULL,
    extractor_model   TEXT NOT NULL,
    status            TEXT NOT NULL DEFAULT 'pending'
                      CHECK (status IN ('pending', 'running', 'completed', 'failed')),
    error             TEXT,
    started_at        TEXT NOT NULL,
    completed_at      TEXT
);

CREATE TABLE IF NOT EXISTS sync_events (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    sync_job_id  TEXT NOT NULL REFERENCES sync_jobs(id),
    event_type   TEXT NOT NULL CHECK (event_type IN ('info', 'warning', 'error', 'success')),
    message      TEXT NOT NULL,
    created_at   TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sync_events_job ON sync_events (sync_job_id, id);
"#;
