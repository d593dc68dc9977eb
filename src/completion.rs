//! Completion engine with look-ahead cache
//!
//! Responses are keyed by normalized prompt text plus persona. With
//! `cache_ahead_completions` enabled a fresh response is fetched in the
//! background after every user-visible turn, so a repeated request is
//! answered from cache with no added provider latency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use mini_moka::sync::Cache;
use regex::Regex;

use crate::config::ListenConfig;
use crate::providers::CompletionProvider;
use crate::Result;

/// Upper bound on distinct cached prompts
const CACHE_MAX_ENTRIES: u64 = 4096;

/// Wraps the completion provider with persona framing and the cache
pub struct CompletionEngine {
    provider: Arc<dyn CompletionProvider>,
    cache: Cache<String, String>,
    persona: Mutex<String>,
    cache_ahead: AtomicBool,
}

impl CompletionEngine {
    #[must_use]
    pub fn new(provider: Arc<dyn CompletionProvider>, cfg: &ListenConfig) -> Self {
        Self {
            provider,
            cache: Cache::builder().max_capacity(CACHE_MAX_ENTRIES).build(),
            persona: Mutex::new(cfg.persona.clone()),
            cache_ahead: AtomicBool::new(cfg.cache_ahead_completions),
        }
    }

    /// Apply reconfigured persona and cache-ahead flag
    pub fn apply_config(&self, cfg: &ListenConfig) {
        *self.lock_persona() = cfg.persona.clone();
        self.cache_ahead
            .store(cfg.cache_ahead_completions, Ordering::Relaxed);
    }

    /// Produce the spoken reply for `text`
    ///
    /// Cache hits are returned immediately; the look-ahead refresh (when
    /// enabled) always runs after the user-visible response is ready,
    /// never before.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::CompletionUnavailable`] when the provider
    /// fails on a cache miss.
    pub async fn respond(&self, text: &str) -> Result<String> {
        let persona = self.lock_persona().clone();
        let key = cache_key(text, &persona);
        let prompt = wrap_prompt(text, &persona);

        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!("completion served from cache");
            if self.cache_ahead.load(Ordering::Relaxed) {
                self.spawn_refresh(key, prompt);
            }
            return Ok(cached);
        }

        let reply = sanitize_reply(&self.provider.complete(&prompt).await?);
        self.cache.insert(key.clone(), reply.clone());

        if self.cache_ahead.load(Ordering::Relaxed) {
            self.spawn_refresh(key, prompt);
        }

        Ok(reply)
    }

    /// Fire-and-forget refresh of the cached response for `key`
    fn spawn_refresh(&self, key: String, prompt: String) {
        let provider = Arc::clone(&self.provider);
        let cache = self.cache.clone();
        tokio::spawn(async move {
            match provider.complete(&prompt).await {
                Ok(reply) => {
                    tracing::debug!("refreshed cached completion");
                    cache.insert(key, sanitize_reply(&reply));
                }
                Err(e) => tracing::warn!(error = %e, "completion cache refresh failed"),
            }
        });
    }

    fn lock_persona(&self) -> std::sync::MutexGuard<'_, String> {
        self.persona
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Normalized cache key: trimmed lowercase text plus persona
fn cache_key(text: &str, persona: &str) -> String {
    format!("{persona}\u{1f}{}", text.trim().to_lowercase())
}

/// Frame the request with the configured persona
fn wrap_prompt(text: &str, persona: &str) -> String {
    if persona.is_empty() {
        text.to_string()
    } else {
        format!("As {persona} respond to '{text}'")
    }
}

/// Reduce a completion to cleanly speakable text
fn sanitize_reply(reply: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[^0-9a-zA-Z.!?,:'/ ]+").expect("static reply regex"));
    re.replace_all(reply, "").trim().to_lowercase()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    use super::*;

    struct CountingProvider {
        calls: AtomicUsize,
    }

    impl CountingProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CompletionProvider for CountingProvider {
        async fn complete(&self, prompt: &str) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("reply {n} to {prompt}"))
        }
    }

    fn engine(provider: Arc<CountingProvider>, cache_ahead: bool) -> CompletionEngine {
        let cfg = ListenConfig {
            cache_ahead_completions: cache_ahead,
            ..ListenConfig::default()
        };
        CompletionEngine::new(provider, &cfg)
    }

    #[tokio::test]
    async fn cache_hit_skips_provider() {
        let provider = CountingProvider::new();
        let engine = engine(Arc::clone(&provider), false);

        let first = engine.respond("what time is it").await.unwrap();
        let second = engine.respond("What time is it").await.unwrap();

        // Same normalized key: one provider call, identical replies
        assert_eq!(provider.calls(), 1);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn distinct_prompts_each_hit_provider() {
        let provider = CountingProvider::new();
        let engine = engine(Arc::clone(&provider), false);

        engine.respond("one").await.unwrap();
        engine.respond("two").await.unwrap();

        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test]
    async fn cache_ahead_refreshes_after_response() {
        let provider = CountingProvider::new();
        let engine = engine(Arc::clone(&provider), true);

        let first = engine.respond("status report").await.unwrap();
        assert_eq!(first, "reply 1 to status report");

        // Wait for the background refresh to land
        let mut refreshed = false;
        for _ in 0..50 {
            if provider.calls() == 2 {
                refreshed = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert!(refreshed, "look-ahead refresh never ran");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // Second turn is served from cache with the refreshed response
        let second = engine.respond("status report").await.unwrap();
        assert_eq!(second, "reply 2 to status report");
    }

    #[tokio::test]
    async fn persona_separates_cache_entries() {
        let provider = CountingProvider::new();
        let engine = engine(Arc::clone(&provider), false);

        engine.respond("hello").await.unwrap();

        engine.apply_config(&ListenConfig {
            persona: "a grumpy robot".to_string(),
            ..ListenConfig::default()
        });
        engine.respond("hello").await.unwrap();

        assert_eq!(provider.calls(), 2);
    }

    #[test]
    fn sanitize_strips_unspeakable_characters() {
        assert_eq!(
            sanitize_reply("Sure — it's 5 o'clock! *beep*"),
            "sure  it's 5 o'clock! beep"
        );
    }

    #[test]
    fn prompt_wrapping_uses_persona() {
        assert_eq!(wrap_prompt("hi", ""), "hi");
        assert_eq!(
            wrap_prompt("hi", "a pirate"),
            "As a pirate respond to 'hi'"
        );
    }
}
