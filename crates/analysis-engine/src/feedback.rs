//! Rolling performance feedback injected into the full-analysis prompt:
//! win-rate buckets from recent closed trades plus the latest post-trade
//! reviews, so the model sees which of its own patterns have been paying.

use trade_store::{TradeStore, WinBucket};

/// Build the feedback block for one symbol. `None` when there is no
/// closed history worth mentioning.
pub async fn build_feedback(store: &TradeStore, symbol: &str) -> Option<String> {
    let report = match store.weekly_report(Some(symbol)).await {
        Ok(report) => report,
        Err(e) => {
            tracing::warn!("[{}] Feedback query failed: {}", symbol, e);
            return None;
        }
    };

    let recent = store.recent_closed_for_pair(symbol, 10).await.ok()?;
    if report.total == 0 && recent.is_empty() {
        return None;
    }

    let mut lines = vec![format!(
        "## RECENT PERFORMANCE ({symbol}, last 7 days)\n{} closed trades, {} wins / {} losses ({:.0}% win rate), {:+.1} pips",
        report.total, report.wins, report.losses, report.win_rate, report.total_pnl_pips
    )];

    push_buckets(&mut lines, "By checklist", &report.by_checklist);
    push_buckets(&mut lines, "By confidence", &report.by_confidence);
    push_buckets(&mut lines, "By entry status", &report.by_entry_status);
    push_buckets(&mut lines, "By price zone", &report.by_price_zone);
    push_buckets(&mut lines, "By trend alignment", &report.by_trend_alignment);
    push_buckets(&mut lines, "By bias", &report.by_bias);

    if !recent.is_empty() {
        lines.push("Recent closed trades:".to_string());
        for trade in recent.iter().take(5) {
            lines.push(format!(
                "- {} {} ({}, checklist {}): {} {:+.1} pips",
                trade.symbol,
                trade.bias,
                trade.confidence,
                trade.checklist_score,
                trade.outcome,
                trade.pnl_pips,
            ));
        }
    }

    if let Ok(reviews) = store.recent_reviews(symbol, 3).await {
        if !reviews.is_empty() {
            lines.push("Post-trade reviews:".to_string());
            for review in reviews {
                lines.push(format!("- {}", review.review));
            }
        }
    }

    lines.push(
        "Weigh these outcomes when scoring new setups: patterns that have been losing deserve a lower checklist score."
            .to_string(),
    );

    Some(lines.join("\n"))
}

fn push_buckets(
    lines: &mut Vec<String>,
    label: &str,
    buckets: &std::collections::BTreeMap<String, WinBucket>,
) {
    if buckets.is_empty() {
        return;
    }
    let parts: Vec<String> = buckets
        .iter()
        .map(|(key, bucket)| {
            format!("{key}: {}/{} ({:.0}%)", bucket.wins, bucket.total, bucket.win_rate)
        })
        .collect();
    lines.push(format!("{label}: {}", parts.join(" | ")));
}
