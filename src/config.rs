//! Configuration for sync runs.
//!
//! Every knob the pipeline reads lives in [`SyncConfig`], built via its
//! [`SyncConfigBuilder`]. The config is cloned into each background job, so
//! it holds only cheap values and `Arc`s.

use crate::error::SyncError;
use crate::progress::ProgressCallback;
use std::fmt;

/// Default DocumentCloud REST API root.
pub const DEFAULT_DOCUMENTCLOUD_API_URL: &str = "https://api.www.documentcloud.org/api";

/// Classifier model used when a caller does not name one.
pub const DEFAULT_CLASSIFIER_MODEL: &str = "llama-server";

/// Extractor model used when a caller does not name one.
pub const DEFAULT_EXTRACTOR_MODEL: &str = "gemini-3-flash-preview";

/// Configuration shared by every sync run started from one service.
///
/// # Example
/// ```rust
/// use ca460_sync::SyncConfig;
///
/// let config = SyncConfig::builder()
///     .max_retries(1)
///     .api_timeout_secs(90)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_retries, 1);
/// ```
#[derive(Clone)]
pub struct SyncConfig {
    /// DocumentCloud REST API root, without trailing slash.
    pub documentcloud_api_url: String,

    /// Optional bearer token for private DocumentCloud projects.
    pub documentcloud_token: Option<String>,

    /// edgequake-llm provider used for model ids without a `provider/` prefix.
    ///
    /// If None, `EDGEQUAKE_LLM_PROVIDER` is consulted, then `openai`.
    pub default_provider: Option<String>,

    /// Sampling temperature for classification and extraction. Default: 0.0.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    ///
    /// A dense Schedule A page lists up to four contributions with addresses
    /// and employer details; 4 096 tokens covers that with room to spare.
    pub max_tokens: usize,

    /// Retry attempts on a transient model-call failure. Default: 2.
    ///
    /// Invalid responses are never retried: a model that answered with the
    /// wrong shape once will usually do it again, and each attempt costs money.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (exponential backoff). Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// DocumentCloud HTTP timeout in seconds (API calls and image fetches). Default: 60.
    pub fetch_timeout_secs: u64,

    /// How often event streams poll the store for new entries. Default: 500.
    pub event_poll_interval_ms: u64,

    /// In-process progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            documentcloud_api_url: DEFAULT_DOCUMENTCLOUD_API_URL.to_string(),
            documentcloud_token: None,
            default_provider: None,
            temperature: 0.0,
            max_tokens: 4096,
            max_retries: 2,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            fetch_timeout_secs: 60,
            event_poll_interval_ms: 500,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for SyncConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncConfig")
            .field("documentcloud_api_url", &self.documentcloud_api_url)
            .field(
                "documentcloud_token",
                &self.documentcloud_token.as_ref().map(|_| "<redacted>"),
            )
            .field("default_provider", &self.default_provider)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("event_poll_interval_ms", &self.event_poll_interval_ms)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn SyncProgressCallback>"),
            )
            .finish()
    }
}

impl SyncConfig {
    /// Create a new builder for `SyncConfig`.
    pub fn builder() -> SyncConfigBuilder {
        SyncConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`SyncConfig`].
#[derive(Debug)]
pub struct SyncConfigBuilder {
    config: SyncConfig,
}

impl SyncConfigBuilder {
    pub fn documentcloud_api_url(mut self, url: impl Into<String>) -> Self {
        self.config.documentcloud_api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn documentcloud_token(mut self, token: impl Into<String>) -> Self {
        self.config.documentcloud_token = Some(token.into());
        self
    }

    pub fn default_provider(mut self, provider: impl Into<String>) -> Self {
        self.config.default_provider = Some(provider.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn fetch_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch_timeout_secs = secs;
        self
    }

    pub fn event_poll_interval_ms(mut self, ms: u64) -> Self {
        self.config.event_poll_interval_ms = ms.max(10);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SyncConfig, SyncError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(SyncError::InvalidConfig("max_tokens must be ≥ 1".into()));
        }
        if c.api_timeout_secs == 0 || c.fetch_timeout_secs == 0 {
            return Err(SyncError::InvalidConfig(
                "timeouts must be at least one second".into(),
            ));
        }
        if !(c.documentcloud_api_url.starts_with("http://")
            || c.documentcloud_api_url.starts_with("https://"))
        {
            return Err(SyncError::InvalidConfig(format!(
                "DocumentCloud API URL must be http(s), got '{}'",
                c.documentcloud_api_url
            )));
        }
        Ok(self.config)
    }
}
