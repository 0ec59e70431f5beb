//! Tier 0: the once-per-day context block.
//!
//! For each (symbol, local date) the fundamentals sweep runs at most
//! once; concurrent requests for the same key are deduplicated with a
//! per-key lock and a double-check after acquiring it. The macro block
//! from the context adapters is composed in on every build.

use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use llm_client::{ContentBlock, ModelProvider, ModelRequest, SystemBlock};
use market_context::{CacheDb, ContextBuilder};
use trade_core::PairProfile;

use crate::parse::clamp_words;
use crate::prompts;

const FUNDAMENTALS_MAX_WORDS: usize = 300;
const FUNDAMENTALS_TIMEOUT: Duration = Duration::from_secs(120);

pub struct DailyContext {
    provider: Option<Arc<dyn ModelProvider>>,
    macro_builder: ContextBuilder,
    cache: CacheDb,
    memory: DashMap<String, String>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl DailyContext {
    pub fn new(
        provider: Option<Arc<dyn ModelProvider>>,
        macro_builder: ContextBuilder,
        cache: CacheDb,
    ) -> Self {
        Self {
            provider,
            macro_builder,
            cache,
            memory: DashMap::new(),
            locks: DashMap::new(),
        }
    }

    /// Combined fundamentals + macro context for the day. Returns `None`
    /// only when neither source produced anything.
    pub async fn get_or_fetch(&self, profile: &PairProfile, date: &str) -> Option<String> {
        let key = format!("daily_context_{}_{}", profile.symbol, date);

        if let Some(cached) = self.memory.get(&key) {
            return Some(cached.clone());
        }

        let lock = self
            .locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // Double-check: another task may have fetched while we waited
        if let Some(cached) = self.memory.get(&key) {
            return Some(cached.clone());
        }
        if let Some(persisted) = self.cache.get(&key, 24.0).await {
            if let Some(text) = persisted.get("text").and_then(|v| v.as_str()) {
                self.memory.insert(key, text.to_string());
                return Some(text.to_string());
            }
        }

        let fundamentals = self.fetch_fundamentals(profile).await;
        let macro_context = self.macro_builder.build_context(profile).await;

        let mut sections = Vec::new();
        if let Some(fundamentals) = fundamentals {
            sections.push(format!("## TODAY'S FUNDAMENTALS\n{fundamentals}"));
        }
        if let Some(macro_context) = macro_context {
            sections.push(macro_context);
        }
        if sections.is_empty() {
            return None;
        }

        let combined = sections.join("\n\n");
        self.memory.insert(key.clone(), combined.clone());
        self.cache.set(&key, &json!({ "text": combined })).await;
        tracing::info!(
            "[{}] Daily context built for {} ({} chars)",
            profile.symbol,
            date,
            combined.len()
        );
        Some(combined)
    }

    async fn fetch_fundamentals(&self, profile: &PairProfile) -> Option<String> {
        let provider = self.provider.as_ref()?;

        let request = ModelRequest::new(
            vec![SystemBlock::new(
                "You are an FX fundamentals researcher. Be concise and factual.",
            )],
            vec![ContentBlock::text(prompts::fundamentals_prompt(profile))],
        )
        .with_max_tokens(1024)
        .with_web_search(10)
        .with_timeout(FUNDAMENTALS_TIMEOUT);

        match provider.complete(request).await {
            Ok(response) => {
                let clamped = clamp_words(&response.text, FUNDAMENTALS_MAX_WORDS);
                if clamped.is_empty() {
                    None
                } else {
                    Some(clamped)
                }
            }
            Err(e) => {
                tracing::warn!("[{}] Fundamentals fetch failed: {}", profile.symbol, e);
                None
            }
        }
    }
}
