//! Default vision collaborator: a multimodal LLM behind `edgequake-llm`.
//!
//! Thin by intent. Prompts live in [`crate::prompts`]; this module only
//! builds messages, retries, and turns the reply into layout items.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 from LLM APIs are transient and common when several
//! runners hit the same provider. Exponential backoff
//! (`retry_backoff_ms * 2^attempt`) with 500 ms base and 3 retries waits
//! 500 ms → 1 s → 2 s before giving up.
//!
//! ## Provider Resolution
//!
//! The task's `vision_backend` names the **model**. The provider is picked
//! once per model and cached:
//!
//! 1. a pre-built provider from [`LlmVisionConfig::provider`], used as-is;
//! 2. [`LlmVisionConfig::provider_name`], or `EDGEQUAKE_LLM_PROVIDER`;
//! 3. `openai` when `OPENAI_API_KEY` is set;
//! 4. whatever [`ProviderFactory::from_env`] detects.

use super::{DetectedLayout, VisionAnalyzer, VisionRequest};
use crate::error::CollaboratorError;
use crate::layout::LayoutItem;
use crate::pipeline::encode::encode_for_vision;
use crate::prompts::{refine_layout_prompt, DETECT_LAYOUT_PROMPT, SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Settings for [`LlmVisionAnalyzer`].
#[derive(Clone)]
pub struct LlmVisionConfig {
    /// Pre-built provider used for every backend. Takes priority.
    pub provider: Option<Arc<dyn LLMProvider>>,
    /// Provider name (e.g. `openai`, `gemini`) combined with the backend model.
    pub provider_name: Option<String>,
    /// Sampling temperature. Default: 0.1.
    pub temperature: f32,
    /// Maximum output tokens. Default: 8192; dense slides produce long JSON.
    pub max_tokens: usize,
    /// Retries after the first attempt. Default: 3.
    pub max_retries: u32,
    /// Base backoff in milliseconds. Default: 500.
    pub retry_backoff_ms: u64,
}

impl Default for LlmVisionConfig {
    fn default() -> Self {
        Self {
            provider: None,
            provider_name: None,
            temperature: 0.1,
            max_tokens: 8192,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl std::fmt::Debug for LlmVisionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmVisionConfig")
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("provider_name", &self.provider_name)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

impl LlmVisionConfig {
    pub fn builder() -> LlmVisionConfigBuilder {
        LlmVisionConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`LlmVisionConfig`].
#[derive(Debug)]
pub struct LlmVisionConfigBuilder {
    config: LlmVisionConfig,
}

impl LlmVisionConfigBuilder {
    pub fn provider(mut self, p: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(p);
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t;
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

    pub fn build(self) -> LlmVisionConfig {
        self.config
    }
}

/// Vision analyzer backed by a multimodal chat model.
pub struct LlmVisionAnalyzer {
    config: LlmVisionConfig,
    providers: Mutex<HashMap<String, Arc<dyn LLMProvider>>>,
}

impl LlmVisionAnalyzer {
    pub fn new(config: LlmVisionConfig) -> Self {
        Self {
            config,
            providers: Mutex::new(HashMap::new()),
        }
    }

    fn provider_for(&self, backend: &str) -> Result<Arc<dyn LLMProvider>, CollaboratorError> {
        if let Some(ref p) = self.config.provider {
            return Ok(Arc::clone(p));
        }
        let mut cache = self.providers.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(p) = cache.get(backend) {
            return Ok(Arc::clone(p));
        }
        let provider = resolve_provider(self.config.provider_name.as_deref(), backend)?;
        cache.insert(backend.to_string(), Arc::clone(&provider));
        Ok(provider)
    }

    /// Send one image with an instruction, retrying transient failures.
    async fn ask(
        &self,
        backend: &str,
        image: ImageData,
        instruction: String,
    ) -> Result<String, CollaboratorError> {
        let provider = self.provider_for(backend)?;
        let messages = vec![
            ChatMessage::system(SYSTEM_PROMPT),
            ChatMessage::user_with_images(instruction.as_str(), vec![image]),
        ];
        let options = build_options(&self.config);
        let start = Instant::now();
        let mut last_err: Option<String> = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff = self.config.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    backend, attempt, self.config.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            match provider.chat(&messages, Some(&options)).await {
                Ok(response) => {
                    debug!(
                        "{}: {} input tokens, {} output tokens, {:?}",
                        backend,
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(response.content);
                }
                Err(e) => {
                    let msg = e.to_string();
                    warn!("{}: attempt {} failed: {}", backend, attempt + 1, msg);
                    last_err = Some(msg);
                }
            }
        }

        Err(CollaboratorError::Backend {
            backend: backend.to_string(),
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

#[async_trait]
impl VisionAnalyzer for LlmVisionAnalyzer {
    async fn detect_layout(
        &self,
        request: &VisionRequest,
    ) -> Result<DetectedLayout, CollaboratorError> {
        info!("Detecting initial layout: {}", request.image.display());
        let (image, width, height) = load_for_vision(&request.image).await?;
        let reply = self
            .ask(&request.backend, image, DETECT_LAYOUT_PROMPT.to_string())
            .await?;
        let items = parse_layout(&reply)?;
        info!("Initial detection: {} text blocks", items.len());
        Ok(DetectedLayout {
            items,
            width,
            height,
        })
    }

    async fn refine_layout(
        &self,
        request: &VisionRequest,
        initial: &[LayoutItem],
    ) -> Result<Vec<LayoutItem>, CollaboratorError> {
        let layout_json = serde_json::to_string(initial)
            .map_err(|e| CollaboratorError::MalformedResponse(e.to_string()))?;
        let (image, _, _) = load_for_vision(&request.image).await?;
        let reply = self
            .ask(&request.backend, image, refine_layout_prompt(&layout_json))
            .await?;
        parse_layout(&reply)
    }
}

/// Decode, measure and encode off the async runtime.
async fn load_for_vision(path: &Path) -> Result<(ImageData, u32, u32), CollaboratorError> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || -> Result<_, CollaboratorError> {
        let img = image::open(&path)?;
        let (w, h) = (img.width(), img.height());
        Ok((encode_for_vision(&img)?, w, h))
    })
    .await
    .map_err(|e| CollaboratorError::Backend {
        backend: "image".into(),
        detail: e.to_string(),
    })?
}

fn build_options(config: &LlmVisionConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn resolve_provider(
    provider_name: Option<&str>,
    model: &str,
) -> Result<Arc<dyn LLMProvider>, CollaboratorError> {
    let create = |name: &str| {
        ProviderFactory::create_llm_provider(name, model).map_err(|e| CollaboratorError::Backend {
            backend: model.to_string(),
            detail: format!("cannot create {name} provider: {e}"),
        })
    };

    if let Some(name) = provider_name {
        return create(name);
    }
    if let Ok(name) = std::env::var("EDGEQUAKE_LLM_PROVIDER") {
        if !name.is_empty() {
            return create(&name);
        }
    }
    if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
        return create("openai");
    }

    let (llm, _embedding) = ProviderFactory::from_env().map_err(|e| CollaboratorError::Backend {
        backend: model.to_string(),
        detail: format!(
            "no LLM provider could be auto-detected; set OPENAI_API_KEY or \
             EDGEQUAKE_LLM_PROVIDER ({e})"
        ),
    })?;
    Ok(llm)
}

// ── Reply parsing ────────────────────────────────────────────────────────

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[a-zA-Z]*\s*\n(.*?)\n?\s*```\s*$").unwrap());

/// Parse a reply into layout items.
///
/// Models sometimes wrap the JSON in code fences despite the prompt, or
/// return `{"items": [...]}` instead of a bare list; both are accepted.
pub fn parse_layout(reply: &str) -> Result<Vec<LayoutItem>, CollaboratorError> {
    let body = RE_FENCED
        .captures(reply)
        .and_then(|c| c.get(1))
        .map_or(reply.trim(), |m| m.as_str().trim());

    let value: Value = serde_json::from_str(body)
        .map_err(|e| CollaboratorError::MalformedResponse(format!("reply is not JSON: {e}")))?;

    let list = match value {
        Value::Array(_) => value,
        Value::Object(map) => map
            .into_iter()
            .map(|(_, v)| v)
            .find(Value::is_array)
            .ok_or_else(|| {
                CollaboratorError::MalformedResponse("expected a JSON list of text blocks".into())
            })?,
        _ => {
            return Err(CollaboratorError::MalformedResponse(
                "expected a JSON list of text blocks".into(),
            ))
        }
    };

    serde_json::from_value(list)
        .map_err(|e| CollaboratorError::MalformedResponse(format!("invalid text block: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_options_defaults() {
        let opts = build_options(&LlmVisionConfig::default());
        assert_eq!(opts.temperature, Some(0.1));
        assert_eq!(opts.max_tokens, Some(8192));
    }

    #[test]
    fn parses_bare_list() {
        let items = parse_layout(r#"[{"text":"Hi","bbox":[1,2,3,4]}]"#).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "Hi");
    }

    #[test]
    fn parses_fenced_reply() {
        let reply = "```json\n[{\"text\":\"A\",\"bbox\":[0,0,10,10]}]\n```";
        assert_eq!(parse_layout(reply).unwrap().len(), 1);
    }

    #[test]
    fn parses_wrapped_object() {
        let reply = r#"{"items": [{"text":"A","bbox":[0,0,10,10]}]}"#;
        assert_eq!(parse_layout(reply).unwrap()[0].text, "A");
    }

    #[test]
    fn rejects_non_json() {
        let err = parse_layout("Sorry, I cannot help with that.").unwrap_err();
        assert!(matches!(err, CollaboratorError::MalformedResponse(_)));
    }

    #[test]
    fn rejects_items_without_bbox() {
        assert!(parse_layout(r#"[{"text":"A"}]"#).is_err());
    }

    #[test]
    fn builder_overrides_defaults() {
        let c = LlmVisionConfig::builder()
            .provider_name("gemini")
            .max_retries(0)
            .build();
        assert_eq!(c.provider_name.as_deref(), Some("gemini"));
        assert_eq!(c.max_retries, 0);
        assert_eq!(c.retry_backoff_ms, 500);
    }
}
