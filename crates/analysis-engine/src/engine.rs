use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use llm_client::{ContentBlock, LlmError, ModelProvider, ModelRequest, SystemBlock};
use trade_core::{
    get_profile, AnalysisReport, ConfirmVerdict, MarketData, ScreenerVerdict, WatchTrade,
};
use trade_store::{TradeRecord, TradeStore};

use crate::daily_context::DailyContext;
use crate::{feedback, parse, prompts};

const SCREENER_TIMEOUT: Duration = Duration::from_secs(60);
const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(300);
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);

/// Reasoning budget for the expensive tier; large enough that the client
/// switches to a streamed call.
const ANALYSIS_THINKING_BUDGET: u32 = 10_000;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model provider error: {0}")]
    Provider(#[from] LlmError),

    #[error("unparseable model response")]
    Unparseable,
}

/// Three-tier pipeline over the model provider: cheap screener,
/// expensive full analysis, fast per-tick entry confirmation. Tier 0
/// (daily context) is owned here as well.
pub struct AnalysisEngine {
    provider: Option<Arc<dyn ModelProvider>>,
    store: TradeStore,
    daily_context: DailyContext,
}

impl AnalysisEngine {
    pub fn new(
        provider: Option<Arc<dyn ModelProvider>>,
        store: TradeStore,
        daily_context: DailyContext,
    ) -> Self {
        Self {
            provider,
            store,
            daily_context,
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    /// Today's context for the pair; `date` is the desk-local date tag.
    pub async fn context_for(&self, symbol: &str, date: &str) -> Option<String> {
        let profile = get_profile(symbol);
        self.daily_context.get_or_fetch(&profile, date).await
    }

    /// Tier 1: decide cheaply whether the full analysis is worth running.
    ///
    /// Fails open: on any transport or parse problem the verdict is
    /// `has_setup = true` with the error recorded, so a flaky screener
    /// only costs money, never a missed session. Every decision lands in
    /// the screener log.
    pub async fn screen(
        &self,
        symbol: &str,
        m15_png: &[u8],
        m5_png: &[u8],
        market_data: &MarketData,
        context: Option<&str>,
    ) -> ScreenerVerdict {
        let verdict = self
            .screen_inner(symbol, m15_png, m5_png, market_data, context)
            .await;

        if let Err(e) = self
            .store
            .log_screener_decision(symbol, verdict.has_setup, &verdict.reasoning)
            .await
        {
            tracing::warn!("[{}] Failed to log screener decision: {}", symbol, e);
        }
        verdict
    }

    async fn screen_inner(
        &self,
        symbol: &str,
        m15_png: &[u8],
        m5_png: &[u8],
        market_data: &MarketData,
        context: Option<&str>,
    ) -> ScreenerVerdict {
        let Some(provider) = self.provider.as_ref() else {
            // Keep the downstream path observable without a model
            return ScreenerVerdict {
                has_setup: true,
                reasoning: "no model provider configured; escalating by default".to_string(),
                ..Default::default()
            };
        };

        let profile = get_profile(symbol);
        let mut system = vec![SystemBlock::cached(prompts::screener_system(&profile))];
        if let Some(context) = context {
            system.push(SystemBlock::new(context.to_string()));
        }

        let content = vec![
            ContentBlock::text("--- M15 Chart ---"),
            ContentBlock::png(m15_png),
            ContentBlock::text("--- M5 Chart ---"),
            ContentBlock::png(m5_png),
            ContentBlock::text(prompts::market_data_block(market_data, false)),
            ContentBlock::text("Screen the charts above. JSON only."),
        ];

        let request = ModelRequest::new(system, content)
            .with_max_tokens(512)
            .with_timeout(SCREENER_TIMEOUT);

        match provider.complete(request).await {
            Ok(response) => match parse::extract_json(&response.text)
                .as_ref()
                .and_then(parse::parse_screener)
            {
                Some(verdict) => {
                    tracing::info!(
                        "[{}] Screener verdict: has_setup={} ({})",
                        symbol,
                        verdict.has_setup,
                        verdict.reasoning
                    );
                    verdict
                }
                None => {
                    tracing::warn!("[{}] Screener response unparseable; failing open", symbol);
                    ScreenerVerdict {
                        has_setup: true,
                        reasoning: "screener response unparseable; escalated".to_string(),
                        ..Default::default()
                    }
                }
            },
            Err(e) => {
                tracing::warn!("[{}] Screener call failed ({}); failing open", symbol, e);
                ScreenerVerdict {
                    has_setup: true,
                    reasoning: format!("screener error: {e}; escalated"),
                    ..Default::default()
                }
            }
        }
    }

    /// Tier 2: the expensive full analysis over all four timeframes.
    ///
    /// Always returns a report; provider failures produce an empty
    /// report whose summary carries the error, which is what the
    /// notifier shows.
    pub async fn analyze(
        &self,
        symbol: &str,
        h4_png: &[u8],
        h1_png: &[u8],
        m15_png: &[u8],
        m5_png: &[u8],
        market_data: &MarketData,
        context: Option<&str>,
    ) -> AnalysisReport {
        let profile = get_profile(symbol);

        let Some(provider) = self.provider.as_ref() else {
            return AnalysisReport {
                symbol: symbol.to_string(),
                digits: profile.digits,
                market_summary: "Error: no model provider configured".to_string(),
                ..Default::default()
            };
        };

        let mut system = vec![SystemBlock::cached(prompts::analysis_system(&profile))];
        if let Some(context) = context {
            system.push(SystemBlock::new(context.to_string()));
        }
        if let Some(feedback) = feedback::build_feedback(&self.store, symbol).await {
            system.push(SystemBlock::new(feedback));
        }

        let mut content = Vec::new();
        for (label, image) in [
            ("H4", h4_png),
            ("H1", h1_png),
            ("M15", m15_png),
            ("M5", m5_png),
        ] {
            content.push(ContentBlock::text(format!("--- {label} Chart ---")));
            content.push(ContentBlock::png(image));
        }
        content.push(ContentBlock::text(prompts::market_data_block(market_data, true)));
        content.push(ContentBlock::text(
            "Analyze the charts and market data above and respond with your analysis as JSON.",
        ));

        let request = ModelRequest::new(system, content)
            .with_max_tokens(16_384)
            .with_thinking_budget(ANALYSIS_THINKING_BUDGET)
            .with_timeout(ANALYSIS_TIMEOUT);

        tracing::info!("[{}] Sending full analysis request", symbol);
        match provider.complete(request).await {
            Ok(response) => {
                tracing::info!(
                    "[{}] Analysis response received ({} chars)",
                    symbol,
                    response.text.len()
                );
                match parse::extract_json(&response.text) {
                    Some(parsed) => {
                        parse::parse_report(&parsed, symbol, profile.digits, &response.text)
                    }
                    None => {
                        tracing::warn!("[{}] Analysis response JSON parse failed", symbol);
                        AnalysisReport {
                            symbol: symbol.to_string(),
                            digits: profile.digits,
                            market_summary: "Analysis received but JSON parsing failed.".to_string(),
                            raw_response: response.text,
                            ..Default::default()
                        }
                    }
                }
            }
            Err(e) => {
                tracing::error!("[{}] Analysis call failed: {}", symbol, e);
                AnalysisReport {
                    symbol: symbol.to_string(),
                    digits: profile.digits,
                    market_summary: format!("Model provider error: {e}"),
                    ..Default::default()
                }
            }
        }
    }

    /// Tier 3: per-tick entry confirmation from one M1 chart.
    ///
    /// Fails closed: transport and parse problems return `Err` so the
    /// caller does NOT consume a confirmation attempt; only a real
    /// true/false verdict counts. Without a provider the answer is a
    /// real deny.
    pub async fn confirm_entry(
        &self,
        watch: &WatchTrade,
        current_price: f64,
        m1_png: &[u8],
    ) -> Result<ConfirmVerdict, EngineError> {
        let Some(provider) = self.provider.as_ref() else {
            return Ok(ConfirmVerdict {
                confirmed: false,
                reasoning: "no model provider configured; entries are denied by default".to_string(),
            });
        };

        let profile = get_profile(&watch.symbol);
        let system = vec![SystemBlock::cached(prompts::confirm_system(&watch.symbol))];
        let content = vec![
            ContentBlock::text("--- M1 Chart ---"),
            ContentBlock::png(m1_png),
            ContentBlock::text(prompts::confirm_user_text(watch, current_price, profile.digits)),
        ];

        let request = ModelRequest::new(system, content)
            .with_max_tokens(256)
            .with_timeout(CONFIRM_TIMEOUT);

        let response = provider.complete(request).await?;
        let verdict = parse::extract_json(&response.text)
            .as_ref()
            .and_then(parse::parse_confirm)
            .ok_or(EngineError::Unparseable)?;

        tracing::info!(
            "[{}] Entry confirmation for {}: {} ({})",
            watch.symbol,
            watch.id,
            verdict.confirmed,
            verdict.reasoning
        );
        Ok(verdict)
    }

    /// Generate and store a short review after a close. Best-effort; the
    /// trade is already closed and nothing depends on this succeeding.
    pub async fn post_trade_review(&self, record: &TradeRecord) -> Option<String> {
        let provider = self.provider.as_ref()?;

        let request = ModelRequest::new(
            vec![SystemBlock::new(
                "You are reviewing closed FX trades to sharpen future setup scoring.",
            )],
            vec![ContentBlock::text(prompts::review_prompt(record))],
        )
        .with_max_tokens(256)
        .with_timeout(Duration::from_secs(60));

        match provider.complete(request).await {
            Ok(response) => {
                let review = response.text.trim().to_string();
                if review.is_empty() {
                    return None;
                }
                if let Err(e) = self
                    .store
                    .record_post_trade_review(&record.id, &record.symbol, &review)
                    .await
                {
                    tracing::warn!("[{}] Failed to store review: {}", record.symbol, e);
                }
                Some(review)
            }
            Err(e) => {
                tracing::debug!("[{}] Post-trade review failed: {}", record.symbol, e);
                None
            }
        }
    }
}
