//! Unauthenticated transparency surface: redacted trade history,
//! aggregate stats, and the monthly PDF produced by the external
//! report renderer.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

use trade_store::TradeRecord;

use crate::error::AppError;
use crate::AppState;

pub fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/public/trades", get(public_trades))
        .route("/public/stats", get(public_stats))
        .route("/public/report/:year/:month", get(public_report))
}

#[derive(Deserialize)]
struct TradesQuery {
    limit: Option<i64>,
    #[serde(default)]
    symbol: String,
}

#[derive(Deserialize)]
struct StatsQuery {
    days: Option<i64>,
}

/// Account-sensitive fields (monetary P&L, lot sizes, broker tickets)
/// never leave this function.
fn redact(record: &TradeRecord) -> Value {
    json!({
        "id": record.id,
        "symbol": record.symbol,
        "bias": record.bias,
        "confidence": record.confidence,
        "checklist_score": record.checklist_score,
        "entry_min": record.entry_min,
        "entry_max": record.entry_max,
        "stop_loss": record.stop_loss,
        "tp1": record.tp1,
        "tp2": record.tp2,
        "sl_pips": record.sl_pips,
        "tp1_pips": record.tp1_pips,
        "tp2_pips": record.tp2_pips,
        "rr_tp1": record.rr_tp1,
        "rr_tp2": record.rr_tp2,
        "status": record.status,
        "outcome": record.outcome,
        "error_message": record.error_message,
        "pnl_pips": record.pnl_pips,
        "entry_status": record.entry_status,
        "price_zone": record.price_zone,
        "created_at": record.created_at,
        "closed_at": record.closed_at,
    })
}

async fn public_trades(
    State(state): State<AppState>,
    Query(query): Query<TradesQuery>,
) -> Result<Json<Value>, AppError> {
    let limit = query.limit.unwrap_or(100).clamp(1, 500);
    let symbol = (!query.symbol.is_empty()).then_some(query.symbol.as_str());
    let trades = state.store.recent_trades(limit, symbol).await?;

    Ok(Json(json!({
        "count": trades.len(),
        "trades": trades.iter().map(redact).collect::<Vec<_>>(),
    })))
}

async fn public_stats(
    State(state): State<AppState>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, AppError> {
    let days = query.days.unwrap_or(30).clamp(1, 365);
    let stats = state.store.stats(None, days).await?;

    Ok(Json(json!({
        "period_days": stats.period_days,
        "total_trades": stats.total_trades,
        "closed_trades": stats.closed_trades,
        "wins": stats.wins,
        "full_wins": stats.full_wins,
        "partial_wins": stats.partial_wins,
        "losses": stats.losses,
        "win_rate": stats.win_rate,
        "total_pnl_pips": stats.total_pnl_pips,
        "avg_win_pips": stats.avg_win_pips,
        "avg_loss_pips": stats.avg_loss_pips,
        "pair_stats": stats
            .pair_stats
            .iter()
            .map(|(symbol, pair)| {
                (
                    symbol.clone(),
                    json!({
                        "total": pair.total,
                        "closed": pair.closed,
                        "wins": pair.wins,
                        "win_rate": pair.win_rate,
                        "pnl_pips": pair.pnl_pips,
                    }),
                )
            })
            .collect::<serde_json::Map<_, _>>(),
    })))
}

/// Serve the monthly PDF when the external renderer has produced one.
async fn public_report(
    State(state): State<AppState>,
    Path((year, month)): Path<(i32, u32)>,
) -> Result<impl IntoResponse, AppError> {
    if !(1..=12).contains(&month) {
        return Err(AppError::bad_request("month must be 1-12"));
    }

    let path = state
        .config
        .reports_dir()
        .join(format!("performance_report_{year:04}_{month:02}.pdf"));

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| AppError::not_found("no report for that month"))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/pdf".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("inline; filename=\"performance_report_{year:04}_{month:02}.pdf\""),
            ),
        ],
        bytes,
    ))
}
