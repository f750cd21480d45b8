//! Translation backends. [`LlmEngine`] talks to an OpenAI-compatible chat endpoint; anything that
//! implements [`TranslationEngine`] can stand in for it.

pub mod openai;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, trace, warn};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, TranslateError};
use crate::textutil::{contains_cjk, truncate_for_log};

use self::openai::{CallError, ChatClient};

/// Translates one fragment. Implementations must be callable from many tasks at once and must
/// return [`TranslateError::Cancelled`] promptly once `cancel` fires.
#[async_trait]
pub trait TranslationEngine: Send + Sync {
    async fn translate(&self, cancel: &CancellationToken, text: &str) -> Result<String>;
}

/// Exact-text memo shared by every engine of one run. Append-only.
///
/// Each key owns one slot. While the first caller of a text is talking to the backend, other
/// callers of the same text wait on its slot instead of sending their own request.
#[derive(Default)]
pub struct TranslationCache {
    entries: RwLock<HashMap<String, Arc<OnceCell<String>>>>,
}

impl TranslationCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, text: &str) -> Arc<OnceCell<String>> {
        if let Some(slot) = self.entries.read().unwrap_or_else(|e| e.into_inner()).get(text) {
            return Arc::clone(slot);
        }
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        Arc::clone(guard.entry(text.to_string()).or_default())
    }

    pub fn get(&self, text: &str) -> Option<String> {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        guard.get(text).and_then(|slot| slot.get().cloned())
    }

    /// The first value stored for a text wins.
    pub fn insert(&self, text: &str, translated: &str) {
        if self.slot(text).set(translated.to_string()).is_err() {
            trace!("cache already holds: {}", truncate_for_log(text, 80));
        }
    }

    pub fn len(&self) -> usize {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        guard.values().filter(|slot| slot.initialized()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Total attempts per fragment and the base pause between them (pause grows linearly).
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.delay.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_millis(200),
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub prompt: String,
    pub cjk_only: bool,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

pub struct LlmEngine {
    client: ChatClient,
    settings: EngineSettings,
    cache: Arc<TranslationCache>,
    stream_only: RwLock<HashSet<String>>,
}

impl LlmEngine {
    pub fn new(settings: EngineSettings, cache: Arc<TranslationCache>) -> Result<Self> {
        let client =
            ChatClient::new(&settings.base_url, &settings.api_key, settings.request_timeout)
                .map_err(|e| TranslateError::HttpClient(e.to_string()))?;
        Ok(Self {
            client,
            settings,
            cache,
            stream_only: RwLock::new(HashSet::new()),
        })
    }

    pub fn cache(&self) -> &Arc<TranslationCache> {
        &self.cache
    }

    fn is_stream_only(&self, model: &str) -> bool {
        self.stream_only
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(model)
    }

    async fn call_backend(&self, text: &str) -> std::result::Result<String, CallError> {
        let model = self.settings.model.as_str();
        let prompt = self.settings.prompt.as_str();
        if self.is_stream_only(model) {
            trace!("model {model} is stream-only, streaming request");
            return self.client.stream_complete(model, prompt, text).await;
        }
        match self.client.complete(model, prompt, text).await {
            Err(CallError::StreamRequired(body)) => {
                warn!(
                    "model {model} requires stream mode, switching to streamed requests: {}",
                    truncate_for_log(&body, 200)
                );
                self.stream_only
                    .write()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(model.to_string());
                self.client.stream_complete(model, prompt, text).await
            }
            other => other,
        }
    }

    async fn request_translation(&self, cancel: &CancellationToken, text: &str) -> Result<String> {
        let retry = self.settings.retry;
        let attempts = retry.max_attempts.max(1);
        let mut last_err: Option<CallError> = None;
        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(TranslateError::Cancelled);
            }
            trace!("request attempt {attempt}/{attempts}: {}", truncate_for_log(text, 80));
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
                r = self.call_backend(text) => r,
            };
            match outcome {
                Ok(raw) => {
                    let translated = raw.trim().to_string();
                    debug!(
                        "translated: {} -> {}",
                        truncate_for_log(text, 80),
                        truncate_for_log(&translated, 200)
                    );
                    return Ok(translated);
                }
                Err(err) => {
                    warn!(
                        "translation attempt {attempt}/{attempts} failed for {}: {err}",
                        truncate_for_log(text, 80)
                    );
                    last_err = Some(err);
                }
            }
            if attempt < attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
                    _ = tokio::time::sleep(retry.delay_after(attempt)) => {}
                }
            }
        }

        let detail = last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempt made".to_string());
        Err(TranslateError::Engine(format!(
            "gave up after {attempts} attempts: {detail}"
        )))
    }
}

#[async_trait]
impl TranslationEngine for LlmEngine {
    async fn translate(&self, cancel: &CancellationToken, text: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        if self.settings.cjk_only && !contains_cjk(text) {
            return Ok(text.to_string());
        }
        let slot = self.cache.slot(text);
        if let Some(hit) = slot.get() {
            debug!("cache hit: {}", truncate_for_log(text, 80));
            return Ok(hit.clone());
        }
        let translated = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TranslateError::Cancelled),
            r = slot.get_or_try_init(|| self.request_translation(cancel, text)) => r?,
        };
        Ok(translated.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_engine(cjk_only: bool) -> LlmEngine {
        // Port 9 (discard) is never contacted by these tests.
        let settings = EngineSettings {
            base_url: "http://127.0.0.1:9/v1".into(),
            api_key: String::new(),
            model: "test".into(),
            prompt: "translate".into(),
            cjk_only,
            request_timeout: Duration::from_secs(1),
            retry: RetryPolicy {
                max_attempts: 1,
                delay: Duration::from_millis(1),
            },
        };
        LlmEngine::new(settings, Arc::new(TranslationCache::new())).expect("engine")
    }

    #[test]
    fn linear_backoff() {
        let p = RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(200),
        };
        assert_eq!(p.delay_after(1), Duration::from_millis(200));
        assert_eq!(p.delay_after(2), Duration::from_millis(400));
    }

    #[test]
    fn cache_is_shared_and_exact() {
        let cache = TranslationCache::new();
        assert!(cache.is_empty());
        cache.insert(" 東京 ", "Tokyo");
        assert_eq!(cache.get(" 東京 ").as_deref(), Some("Tokyo"));
        assert_eq!(cache.get("東京"), None);
        assert_eq!(cache.len(), 1);
        cache.insert(" 東京 ", "Tokio");
        assert_eq!(cache.get(" 東京 ").as_deref(), Some("Tokyo"));
    }

    #[tokio::test]
    async fn blank_input_short_circuits() {
        let engine = offline_engine(false);
        let out = engine
            .translate(&CancellationToken::new(), "  \n ")
            .await
            .expect("blank");
        assert_eq!(out, "");
    }

    #[tokio::test]
    async fn non_cjk_passes_through_when_gated() {
        let engine = offline_engine(true);
        let out = engine
            .translate(&CancellationToken::new(), "Hello")
            .await
            .expect("gated");
        assert_eq!(out, "Hello");
        assert!(engine.cache().is_empty());
    }

    #[tokio::test]
    async fn cached_text_skips_backend() {
        let engine = offline_engine(true);
        engine.cache().insert("こんにちは", "Hello");
        let out = engine
            .translate(&CancellationToken::new(), "こんにちは")
            .await
            .expect("cached");
        assert_eq!(out, "Hello");
    }

    #[tokio::test]
    async fn cancelled_before_request() {
        let engine = offline_engine(false);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine.translate(&cancel, "こんにちは").await.err().expect("cancelled");
        assert!(err.is_cancelled());
    }
}
