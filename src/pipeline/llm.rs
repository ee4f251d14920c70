//! Vision-model invocation: the [`VisionModel`] seam and its edgequake-llm
//! implementation.
//!
//! The pipeline never talks to a provider directly. It hands a
//! [`VisionRequest`] (prompt, output schema, one image) and a model id to a
//! `VisionModel` and gets back the raw text plus usage accounting. Tests swap
//! in a scripted fake; production uses [`ProviderRegistry`].
//!
//! ## Model ids
//!
//! A model id is either `provider/model` (`gemini/gemini-2.5-flash`) or a
//! bare model name, which is paired with the configured default provider.
//!
//! ## Retry strategy
//!
//! Transient provider errors retry with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`): with a 500 ms base and 2 retries the
//! waits are 500 ms then 1 s. Each attempt is bounded by `api_timeout_secs`;
//! a timeout is reported as [`SyncError::ModelTimeout`] and not retried.

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::pipeline::encode;
use crate::prompts::with_schema;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Provider used when neither the model id, the config nor the environment
/// names one.
pub const FALLBACK_PROVIDER: &str = "openai";

/// One structured vision call.
#[derive(Debug, Clone)]
pub struct VisionRequest {
    pub prompt: String,
    pub schema: Value,
    pub image: Vec<u8>,
    pub mime_type: &'static str,
}

/// Vendor-reported token accounting for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
    pub model: String,
}

/// Raw answer of a vision call.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionResponse {
    pub text: String,
    pub usage: ModelUsage,
}

/// Anything that can answer a [`VisionRequest`] for a model id.
#[async_trait]
pub trait VisionModel: Send + Sync {
    async fn invoke(
        &self,
        model_id: &str,
        request: &VisionRequest,
    ) -> Result<VisionResponse, SyncError>;
}

/// Split `provider/model`; bare names yield `None` for the provider.
pub fn split_model_id(model_id: &str) -> (Option<&str>, &str) {
    match model_id.split_once('/') {
        Some((provider, model)) if !provider.is_empty() && !model.is_empty() => {
            (Some(provider), model)
        }
        _ => (None, model_id),
    }
}

/// Call knobs copied out of [`SyncConfig`].
#[derive(Debug, Clone, Copy)]
struct CallSettings {
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    timeout_secs: u64,
}

/// edgequake-llm backed [`VisionModel`], caching one provider per model id.
pub struct ProviderRegistry {
    default_provider: Option<String>,
    settings: CallSettings,
    providers: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("default_provider", &self.default_provider)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            default_provider: config.default_provider.clone(),
            settings: CallSettings {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                max_retries: config.max_retries,
                retry_backoff_ms: config.retry_backoff_ms,
                timeout_secs: config.api_timeout_secs,
            },
            providers: Mutex::new(HashMap::new()),
        }
    }

    fn provider_name(&self, explicit: Option<&str>) -> String {
        if let Some(name) = explicit {
            return name.to_string();
        }
        if let Some(name) = &self.default_provider {
            return name.clone();
        }
        match std::env::var("EDGEQUAKE_LLM_PROVIDER") {
            Ok(name) if !name.is_empty() => name,
            _ => FALLBACK_PROVIDER.to_string(),
        }
    }

    /// Resolve (and cache) the provider for `model_id`.
    pub fn provider_for(&self, model_id: &str) -> Result<Arc<dyn LLMProvider>, SyncError> {
        let mut cache = self
            .providers
            .lock()
            .map_err(|_| SyncError::Internal("provider cache lock poisoned".into()))?;
        if let Some(provider) = cache.get(model_id) {
            return Ok(Arc::clone(provider));
        }

        let (explicit, model) = split_model_id(model_id);
        let provider_name = self.provider_name(explicit);
        let provider = ProviderFactory::create_llm_provider(&provider_name, model).map_err(|e| {
            SyncError::ProviderNotConfigured {
                provider: provider_name.clone(),
                hint: format!("{e}"),
            }
        })?;
        debug!("Created provider '{}' for model '{}'", provider_name, model);
        cache.insert(model_id.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    fn build_options(&self) -> CompletionOptions {
        CompletionOptions {
            temperature: Some(self.settings.temperature),
            max_tokens: Some(self.settings.max_tokens),
            ..Default::default()
        }
    }
}

/// Message layout: the prompt with its schema as the system turn, the image
/// as the user turn.
fn build_messages(request: &VisionRequest) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(with_schema(&request.prompt, &request.schema)),
        ChatMessage::user_with_images(
            "",
            vec![encode::image_data(&request.image, request.mime_type)],
        ),
    ]
}

#[async_trait]
impl VisionModel for ProviderRegistry {
    async fn invoke(
        &self,
        model_id: &str,
        request: &VisionRequest,
    ) -> Result<VisionResponse, SyncError> {
        let provider = self.provider_for(model_id)?;
        let messages = build_messages(request);
        let options = self.build_options();
        let settings = self.settings;
        let start = Instant::now();

        let mut last_err: Option<String> = None;
        for attempt in 0..=settings.max_retries {
            if attempt > 0 {
                let backoff = settings.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "Model '{}': retry {}/{} after {}ms",
                    model_id, attempt, settings.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = provider.chat(&messages, Some(&options));
            match timeout(Duration::from_secs(settings.timeout_secs), call).await {
                Err(_) => {
                    return Err(SyncError::ModelTimeout {
                        model: model_id.to_string(),
                        secs: settings.timeout_secs,
                    })
                }
                Ok(Ok(response)) => {
                    debug!(
                        "Model '{}': {} input tokens, {} output tokens, {:?}",
                        model_id,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(VisionResponse {
                        usage: ModelUsage {
                            input_tokens: response.prompt_tokens,
                            output_tokens: response.completion_tokens,
                            total_tokens: response.prompt_tokens + response.completion_tokens,
                            model: model_id.to_string(),
                        },
                        text: response.content,
                    });
                }
                Ok(Err(e)) => {
                    let err_msg = format!("{e}");
                    warn!("Model '{}': attempt {} failed: {}", model_id, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(SyncError::ModelCall {
            model: model_id.to_string(),
            attempts: settings.max_retries + 1,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}
