//! Remote document store: the [`DocumentStore`] trait and its DocumentCloud
//! implementation.
//!
//! The orchestrator only needs three things from the store: the documents of
//! a project, the URL of a page image, and the bytes behind a URL. Keeping
//! those behind a trait lets tests serve generated images from memory.

use crate::config::SyncConfig;
use crate::error::SyncError;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Page size for project document listings.
const DOCUMENTS_PER_PAGE: u32 = 100;

/// One document of a project, as the store describes it.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RemoteDocument {
    pub id: i64,
    pub page_count: u32,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: String,
    /// Root of the asset host, with trailing slash.
    #[serde(default)]
    pub asset_url: String,
    /// Free-form key/value data attached to the document.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl RemoteDocument {
    /// The metadata blob stored with the document row: the document's own
    /// key/value data plus its title and slug. The document's title and slug
    /// replace key/value entries of the same name.
    pub fn metadata(&self) -> Value {
        let mut meta = self.data.clone();
        if let Some(title) = &self.title {
            meta.insert("title".to_string(), Value::String(title.clone()));
        }
        if !self.slug.is_empty() {
            meta.insert("slug".to_string(), Value::String(self.slug.clone()));
        }
        Value::Object(meta)
    }

    /// URL of the extra-large GIF rendering of `page_number` (1-based).
    pub fn xlarge_image_url(&self, page_number: u32) -> String {
        let base = if self.asset_url.ends_with('/') || self.asset_url.is_empty() {
            self.asset_url.clone()
        } else {
            format!("{}/", self.asset_url)
        };
        format!(
            "{base}documents/{}/pages/{}-p{page_number}-xlarge.gif",
            self.id, self.slug
        )
    }
}

/// A project and its documents, in the order the store lists them.
#[derive(Debug, Clone, PartialEq)]
pub struct Project {
    pub id: i64,
    pub title: Option<String>,
    pub documents: Vec<RemoteDocument>,
}

impl Project {
    pub fn document(&self, document_id: i64) -> Option<&RemoteDocument> {
        self.documents.iter().find(|d| d.id == document_id)
    }
}

/// Read access to a remote document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a project and every one of its documents.
    async fn get_project(&self, project_id: i64) -> Result<Project, SyncError>;

    /// URL of the full-resolution image of one page.
    fn page_image_url(&self, document: &RemoteDocument, page_number: u32) -> String {
        document.xlarge_image_url(page_number)
    }

    /// Plain content fetch.
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, SyncError>;

    /// Fetch the image bytes of one page.
    async fn fetch_page_image(
        &self,
        document: &RemoteDocument,
        page_number: u32,
    ) -> Result<Vec<u8>, SyncError> {
        let url = self.page_image_url(document, page_number);
        debug!("Fetching page image {}", url);
        self.fetch_bytes(&url).await.map_err(|e| match e {
            SyncError::DocumentStore { url, reason } => SyncError::ImageFetch {
                document_id: document.id,
                page: page_number,
                url,
                reason,
            },
            other => other,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ProjectResponse {
    id: i64,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProjectDocumentEntry {
    document: RemoteDocument,
}

#[derive(Debug, Deserialize)]
struct ProjectDocumentsPage {
    #[serde(default)]
    next: Option<String>,
    results: Vec<ProjectDocumentEntry>,
}

/// DocumentCloud REST client.
#[derive(Debug, Clone)]
pub struct DocumentCloud {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl DocumentCloud {
    pub fn new(
        api_url: impl Into<String>,
        token: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, SyncError> {
        let api_url = api_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("ca460-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::DocumentStore {
                url: api_url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            api_url,
            token,
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, SyncError> {
        Self::new(
            config.documentcloud_api_url.clone(),
            config.documentcloud_token.clone(),
            config.fetch_timeout_secs,
        )
    }

    /// GET `url`, with the bearer token only for URLs under the API root.
    /// Page images live on the asset host and are fetched anonymously.
    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.get(url);
        match &self.token {
            Some(token) if self.is_api_url(url) => request.bearer_auth(token),
            _ => request,
        }
    }

    fn is_api_url(&self, url: &str) -> bool {
        url.strip_prefix(self.api_url.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
    ) -> Result<Option<T>, SyncError> {
        let failed = |reason: String| SyncError::DocumentStore {
            url: url.to_string(),
            reason,
        };
        let response = self.get(url).send().await.map_err(|e| failed(e.to_string()))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }
        response
            .json::<T>()
            .await
            .map(Some)
            .map_err(|e| failed(e.to_string()))
    }
}

#[async_trait]
impl DocumentStore for DocumentCloud {
    async fn get_project(&self, project_id: i64) -> Result<Project, SyncError> {
        let url = format!("{}/projects/{project_id}/", self.api_url);
        let project: ProjectResponse = self
            .get_json(&url)
            .await?
            .ok_or(SyncError::ProjectNotFound { project_id })?;

        let mut documents = Vec::new();
        let mut next = Some(format!(
            "{}/projects/{project_id}/documents/?expand=document&per_page={DOCUMENTS_PER_PAGE}",
            self.api_url
        ));
        while let Some(url) = next.take() {
            let page: ProjectDocumentsPage = self
                .get_json(&url)
                .await?
                .ok_or(SyncError::ProjectNotFound { project_id })?;
            documents.extend(page.results.into_iter().map(|entry| entry.document));
            next = page.next;
        }

        info!(
            "Fetched project {} ({} documents)",
            project.id,
            documents.len()
        );
        Ok(Project {
            id: project.id,
            title: project.title,
            documents,
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, SyncError> {
        let failed = |reason: String| SyncError::DocumentStore {
            url: url.to_string(),
            reason,
        };
        let response = self.get(url).send().await.map_err(|e| failed(e.to_string()))?;
        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }
        let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
