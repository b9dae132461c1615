// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Read views over the rate cache and the store, joined at request time to
// produce mark-to-market values, plus two triggers: the manual agent cycle
// and the internal snapshot job.
//
// Error shape: 400 for missing/invalid query params, 404 for unknown
// asset/portfolio/agent, 500 when a write path needs a store that is not
// configured. Other internal read failures degrade to empty collections
// with 200, consistent with a read-only operational tool.
//
// CORS is permissive on every route; response bodies are camelCase for the
// dashboard.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::warn;

use crate::ai::prompts::AGENT_BASELINE;
use crate::analytics::{compute_sharpe_and_drawdown, RiskMetrics};
use crate::app_state::AppState;
use crate::store::models::{
    AiDecision, AiPosition, AiTrader, EquitySnapshot, Portfolio, Position, Transaction,
};
use crate::store::Store;
use crate::types::Venue;
use crate::valuation::{mark_to_market, OpenLeg};

/// Closed positions shown on a portfolio detail view.
const DETAIL_CLOSED_POSITIONS: usize = 20;
/// Transactions shown on a portfolio detail view.
const DETAIL_TRANSACTIONS: usize = 50;
/// Decisions shown on a trader detail view.
const DETAIL_DECISIONS: usize = 20;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST router with permissive CORS and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(root))
        .route("/api/health", get(health))
        .route("/api/funding", get(funding))
        .route("/api/funding/history", get(funding_history))
        .route("/api/funding/:asset", get(funding_asset))
        .route("/api/paper/portfolios", get(paper_portfolios))
        .route("/api/paper/leaderboard", get(paper_leaderboard))
        .route("/api/paper/portfolios/:id", get(paper_portfolio_detail))
        .route("/api/paper/snapshots", get(paper_snapshots))
        .route("/api/ai/traders", get(ai_traders))
        .route("/api/ai/traders/:name", get(ai_trader_detail))
        .route("/api/ai/snapshots", get(ai_snapshots))
        .route("/api/ai/run/:name", post(ai_run))
        .route("/api/internal/snapshot", post(internal_snapshot))
        .layer(cors)
        .with_state(state)
}

type ApiError = (StatusCode, Json<serde_json::Value>);

fn error_json(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(serde_json::json!({ "error": message.into() })))
}

fn store_of(state: &AppState) -> Option<&Arc<Store>> {
    state.store.as_ref()
}

// =============================================================================
// Root + health
// =============================================================================

async fn root() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok", "service": "hldesk-api" }))
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let age = state.cache.age_ms();
    Json(serde_json::json!({
        "status": "ok",
        "lastFetch": state.cache.last_fetch_ms(),
        "assetCount": state.cache.asset_count(),
        "cacheAge": if age == i64::MAX { serde_json::Value::Null } else { age.into() },
    }))
}

// =============================================================================
// Funding reads
// =============================================================================

#[derive(Deserialize)]
struct FundingQuery {
    limit: Option<i64>,
}

async fn funding(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FundingQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20).clamp(1, 100) as usize;
    let agg = state.cache.get().await;
    let top: Vec<_> = agg.spreads.iter().take(limit).cloned().collect();
    Json(serde_json::json!({
        "timestamp": agg.timestamp,
        "spreads": top,
    }))
}

async fn funding_asset(
    State(state): State<Arc<AppState>>,
    Path(asset): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let agg = state.cache.get().await;
    match agg.spread_for(&asset) {
        Some(spread) => Ok(Json(spread.clone())),
        None => Err(error_json(
            StatusCode::NOT_FOUND,
            format!("no funding data for asset '{}'", asset.to_uppercase()),
        )),
    }
}

#[derive(Deserialize)]
struct HistoryQuery {
    asset: Option<String>,
    venue: Option<String>,
    from: Option<i64>,
    to: Option<i64>,
}

async fn funding_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(asset) = query.asset else {
        return Err(error_json(
            StatusCode::BAD_REQUEST,
            "query param 'asset' is required",
        ));
    };
    let venue = match &query.venue {
        None => None,
        Some(raw) => match Venue::parse(raw) {
            Some(v) => Some(v),
            None => {
                return Err(error_json(
                    StatusCode::BAD_REQUEST,
                    format!("unknown venue '{raw}'"),
                ))
            }
        },
    };

    let rows = match store_of(&state) {
        None => Vec::new(),
        Some(store) => store
            .funding_history(&asset, venue, query.from, query.to)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "funding history read failed");
                Vec::new()
            }),
    };
    let views: Vec<HistoryRowView> = rows.iter().map(history_row_view).collect();
    Ok(Json(views))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRowView {
    asset: String,
    venue: Venue,
    rate_8h: f64,
    rate_raw: f64,
    next_funding_time: i64,
    open_interest: Option<f64>,
    mark_price: Option<f64>,
    observed_at: i64,
}

fn history_row_view(row: &crate::store::models::FundingSnapshotRow) -> HistoryRowView {
    HistoryRowView {
        asset: row.asset.clone(),
        venue: row.venue,
        rate_8h: row.rate_8h,
        rate_raw: row.rate_raw,
        next_funding_time: row.next_funding_time,
        open_interest: row.open_interest,
        mark_price: row.mark_price,
        observed_at: row.observed_at,
    }
}

// =============================================================================
// Paper portfolio views
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioView {
    id: String,
    strategy_name: String,
    strategy_config: serde_json::Value,
    cash_balance: f64,
    initial_balance: f64,
    is_active: bool,
    created_at: DateTime<Utc>,
    total_value: f64,
    unrealized_pnl: f64,
    funding_collected: f64,
    open_positions: i64,
    pnl: f64,
    pnl_pct: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PositionView {
    id: String,
    asset: String,
    side: String,
    size_usd: f64,
    entry_rate_8h: f64,
    entry_spread: f64,
    entry_price: f64,
    current_price: Option<f64>,
    unrealized_pnl: Option<f64>,
    total_funding_collected: f64,
    opened_at: DateTime<Utc>,
    is_open: bool,
    exit_price: Option<f64>,
    realized_pnl: Option<f64>,
    closed_at: Option<DateTime<Utc>>,
    fees_paid: f64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionView {
    id: String,
    position_id: Option<String>,
    #[serde(rename = "type")]
    tx_type: String,
    asset: String,
    amount: f64,
    description: String,
    created_at: DateTime<Utc>,
}

async fn enriched_portfolio(
    store: &Store,
    portfolio: &Portfolio,
    agg: &crate::types::AggregatedResult,
) -> PortfolioView {
    let positions = store
        .open_positions(&portfolio.id)
        .await
        .unwrap_or_default();
    let legs: Vec<OpenLeg> = positions.iter().map(Into::into).collect();
    let mtm = mark_to_market(portfolio.cash_balance, &legs, agg);
    let pnl = mtm.total_value - portfolio.initial_balance;
    let pnl_pct = if portfolio.initial_balance > 0.0 {
        pnl / portfolio.initial_balance * 100.0
    } else {
        0.0
    };

    PortfolioView {
        id: portfolio.id.clone(),
        strategy_name: portfolio.strategy_name.clone(),
        strategy_config: portfolio.strategy_config.clone(),
        cash_balance: portfolio.cash_balance,
        initial_balance: portfolio.initial_balance,
        is_active: portfolio.is_active,
        created_at: portfolio.created_at,
        total_value: mtm.total_value,
        unrealized_pnl: mtm.unrealized_pnl,
        funding_collected: mtm.funding_collected,
        open_positions: mtm.open_positions,
        pnl,
        pnl_pct,
    }
}

fn position_view(pos: &Position, agg: &crate::types::AggregatedResult) -> PositionView {
    let mark = agg
        .spread_for(&pos.asset)
        .and_then(|s| s.primary.mark_price)
        .filter(|m| *m > 0.0);
    let unrealized = mark.filter(|_| pos.is_open).map(|m| {
        pos.side.sign() * (pos.entry_price - m) / pos.entry_price * pos.size_usd
    });

    PositionView {
        id: pos.id.clone(),
        asset: pos.asset.clone(),
        side: pos.side.to_string(),
        size_usd: pos.size_usd,
        entry_rate_8h: pos.entry_rate_8h,
        entry_spread: pos.entry_spread,
        entry_price: pos.entry_price,
        current_price: mark,
        unrealized_pnl: unrealized,
        total_funding_collected: pos.total_funding_collected,
        opened_at: pos.opened_at,
        is_open: pos.is_open,
        exit_price: pos.exit_price,
        realized_pnl: pos.realized_pnl,
        closed_at: pos.closed_at,
        fees_paid: pos.fees_paid,
    }
}

fn transaction_view(tx: &Transaction) -> TransactionView {
    TransactionView {
        id: tx.id.clone(),
        position_id: tx.position_id.clone(),
        tx_type: tx.tx_type.to_string(),
        asset: tx.asset.clone(),
        amount: tx.amount,
        description: tx.description.clone(),
        created_at: tx.created_at,
    }
}

async fn portfolio_views(state: &AppState) -> Vec<PortfolioView> {
    let Some(store) = store_of(state) else {
        return Vec::new();
    };
    let portfolios = match store.all_portfolios().await {
        Ok(p) => p,
        Err(e) => {
            warn!(error = %e, "portfolio read failed");
            return Vec::new();
        }
    };
    let agg = state.cache.get().await;

    let mut views = Vec::with_capacity(portfolios.len());
    for portfolio in &portfolios {
        views.push(enriched_portfolio(store, portfolio, &agg).await);
    }
    views
}

async fn paper_portfolios(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(portfolio_views(&state).await)
}

async fn paper_leaderboard(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut views = portfolio_views(&state).await;
    views.sort_by(|a, b| {
        b.pnl_pct
            .partial_cmp(&a.pnl_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Json(views)
}

async fn paper_portfolio_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(store) = store_of(&state) else {
        return Err(error_json(
            StatusCode::NOT_FOUND,
            format!("unknown portfolio '{id}'"),
        ));
    };
    let portfolio = match store.portfolio(&id).await {
        Ok(Some(p)) => p,
        Ok(None) => {
            return Err(error_json(
                StatusCode::NOT_FOUND,
                format!("unknown portfolio '{id}'"),
            ))
        }
        Err(e) => {
            warn!(error = %e, "portfolio detail read failed");
            return Err(error_json(
                StatusCode::NOT_FOUND,
                format!("unknown portfolio '{id}'"),
            ));
        }
    };

    let agg = state.cache.get().await;
    let view = enriched_portfolio(store, &portfolio, &agg).await;
    let open = store.open_positions(&id).await.unwrap_or_default();
    let closed = store
        .closed_positions(&id, DETAIL_CLOSED_POSITIONS)
        .await
        .unwrap_or_default();
    let transactions = store
        .transactions(&id, DETAIL_TRANSACTIONS)
        .await
        .unwrap_or_default();

    Ok(Json(serde_json::json!({
        "portfolio": view,
        "openPositions": open.iter().map(|p| position_view(p, &agg)).collect::<Vec<_>>(),
        "closedPositions": closed.iter().map(|p| position_view(p, &agg)).collect::<Vec<_>>(),
        "transactions": transactions.iter().map(transaction_view).collect::<Vec<_>>(),
    })))
}

// =============================================================================
// Snapshot time series
// =============================================================================

#[derive(Deserialize)]
struct DaysQuery {
    days: Option<i64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotPointView {
    snapshot_at: DateTime<Utc>,
    total_value: f64,
    cash_balance: f64,
    unrealized_pnl: f64,
    funding_collected: f64,
    open_positions: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotSeriesView {
    series: Vec<SnapshotPointView>,
    metrics: RiskMetrics,
}

/// Group rows by owner and attach Sharpe/drawdown per series.
fn snapshot_series(rows: Vec<EquitySnapshot>) -> BTreeMap<String, SnapshotSeriesView> {
    let mut grouped: BTreeMap<String, Vec<SnapshotPointView>> = BTreeMap::new();
    let mut values: BTreeMap<String, Vec<f64>> = BTreeMap::new();

    for row in rows {
        values
            .entry(row.owner_id.clone())
            .or_default()
            .push(row.total_value);
        grouped
            .entry(row.owner_id.clone())
            .or_default()
            .push(SnapshotPointView {
                snapshot_at: row.snapshot_at,
                total_value: row.total_value,
                cash_balance: row.cash_balance,
                unrealized_pnl: row.unrealized_pnl,
                funding_collected: row.funding_collected,
                open_positions: row.open_positions,
            });
    }

    grouped
        .into_iter()
        .map(|(owner, series)| {
            let metrics = compute_sharpe_and_drawdown(&values[&owner]);
            (owner, SnapshotSeriesView { series, metrics })
        })
        .collect()
}

async fn snapshots_for(
    state: &AppState,
    table: &str,
    days: Option<i64>,
) -> BTreeMap<String, SnapshotSeriesView> {
    let days = days.unwrap_or(7).clamp(1, 90);
    let since = Utc::now() - Duration::days(days);

    let rows = match store_of(state) {
        None => Vec::new(),
        Some(store) => store.snapshots_since(table, since).await.unwrap_or_else(|e| {
            warn!(table, error = %e, "snapshot read failed");
            Vec::new()
        }),
    };
    snapshot_series(rows)
}

async fn paper_snapshots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DaysQuery>,
) -> impl IntoResponse {
    Json(snapshots_for(&state, "paper_snapshots", query.days).await)
}

async fn ai_snapshots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DaysQuery>,
) -> impl IntoResponse {
    Json(snapshots_for(&state, "ai_snapshots", query.days).await)
}

// =============================================================================
// AI trader views
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TraderView {
    id: String,
    name: String,
    model: String,
    emoji: Option<String>,
    persona: Option<String>,
    cash_balance: f64,
    is_active: bool,
    total_value: f64,
    unrealized_pnl: f64,
    funding_collected: f64,
    open_positions: i64,
    pnl: f64,
    pnl_pct: f64,
    last_decision: Option<DecisionView>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DecisionView {
    action: String,
    asset: Option<String>,
    size_usd: Option<f64>,
    reasoning: String,
    created_at: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AiPositionView {
    id: String,
    asset: String,
    direction: String,
    size_usd: f64,
    entry_price: f64,
    entry_rate_8h: f64,
    current_price: Option<f64>,
    unrealized_pnl: Option<f64>,
    funding_collected: f64,
    opened_at: DateTime<Utc>,
    is_open: bool,
    exit_price: Option<f64>,
    realized_pnl: Option<f64>,
    closed_at: Option<DateTime<Utc>>,
}

fn decision_view(d: &AiDecision) -> DecisionView {
    DecisionView {
        action: d.action.to_string(),
        asset: d.asset.clone(),
        size_usd: d.size_usd,
        reasoning: d.reasoning.clone(),
        created_at: d.created_at,
    }
}

fn ai_position_view(pos: &AiPosition, agg: &crate::types::AggregatedResult) -> AiPositionView {
    let mark = agg
        .spread_for(&pos.asset)
        .and_then(|s| s.primary.mark_price)
        .filter(|m| *m > 0.0);
    let unrealized = mark.filter(|_| pos.is_open).map(|m| {
        pos.direction.sign() * (pos.entry_price - m) / pos.entry_price * pos.size_usd
    });

    AiPositionView {
        id: pos.id.clone(),
        asset: pos.asset.clone(),
        direction: pos.direction.to_string(),
        size_usd: pos.size_usd,
        entry_price: pos.entry_price,
        entry_rate_8h: pos.entry_rate_8h,
        current_price: mark,
        unrealized_pnl: unrealized,
        funding_collected: pos.funding_collected,
        opened_at: pos.opened_at,
        is_open: pos.is_open,
        exit_price: pos.exit_price,
        realized_pnl: pos.realized_pnl,
        closed_at: pos.closed_at,
    }
}

async fn trader_view(store: &Store, trader: &AiTrader, agg: &crate::types::AggregatedResult) -> TraderView {
    let positions = store.open_ai_positions(&trader.id).await.unwrap_or_default();
    let legs: Vec<OpenLeg> = positions.iter().map(Into::into).collect();
    let mtm = mark_to_market(trader.cash_balance, &legs, agg);
    let pnl = mtm.total_value - AGENT_BASELINE;
    let last_decision = store
        .decisions(&trader.id, 1)
        .await
        .unwrap_or_default()
        .first()
        .map(decision_view);

    TraderView {
        id: trader.id.clone(),
        name: trader.name.clone(),
        model: trader.model.clone(),
        emoji: trader.emoji.clone(),
        persona: trader.persona.clone(),
        cash_balance: trader.cash_balance,
        is_active: trader.is_active,
        total_value: mtm.total_value,
        unrealized_pnl: mtm.unrealized_pnl,
        funding_collected: mtm.funding_collected,
        open_positions: mtm.open_positions,
        pnl,
        pnl_pct: pnl / AGENT_BASELINE * 100.0,
        last_decision,
    }
}

async fn ai_traders(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let Some(store) = store_of(&state) else {
        return Json(Vec::<TraderView>::new());
    };
    let traders = match store.traders().await {
        Ok(t) => t,
        Err(e) => {
            warn!(error = %e, "trader read failed");
            return Json(Vec::new());
        }
    };
    let agg = state.cache.get().await;

    let mut views = Vec::with_capacity(traders.len());
    for trader in &traders {
        views.push(trader_view(store, trader, &agg).await);
    }
    views.sort_by(|a, b| {
        b.pnl_pct
            .partial_cmp(&a.pnl_pct)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Json(views)
}

async fn ai_trader_detail(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let not_found = || error_json(StatusCode::NOT_FOUND, format!("unknown trader '{name}'"));

    let Some(store) = store_of(&state) else {
        return Err(not_found());
    };
    let trader = match store.trader_by_name(&name).await {
        Ok(Some(t)) => t,
        Ok(None) => return Err(not_found()),
        Err(e) => {
            warn!(error = %e, "trader detail read failed");
            return Err(not_found());
        }
    };

    let agg = state.cache.get().await;
    let view = trader_view(store, &trader, &agg).await;
    let positions = store.open_ai_positions(&trader.id).await.unwrap_or_default();
    let decisions = store
        .decisions(&trader.id, DETAIL_DECISIONS)
        .await
        .unwrap_or_default();

    Ok(Json(serde_json::json!({
        "trader": view,
        "openPositions": positions.iter().map(|p| ai_position_view(p, &agg)).collect::<Vec<_>>(),
        "decisions": decisions.iter().map(decision_view).collect::<Vec<_>>(),
    })))
}

// =============================================================================
// Triggers
// =============================================================================

async fn ai_run(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(engine) = state.ai_engine.clone() else {
        return Err(error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store not configured; agent cycles disabled",
        ));
    };

    let agg = state.cache.get().await;
    match engine.run_agent_cycle(&name, &agg).await {
        Ok(Some(decision)) => Ok(Json(decision_view(&decision))),
        Ok(None) => Err(error_json(
            StatusCode::NOT_FOUND,
            format!("unknown trader '{name}'"),
        )),
        Err(e) => Err(error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("agent cycle failed: {e}"),
        )),
    }
}

async fn internal_snapshot(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(store) = store_of(&state).filter(|s| !s.read_only()) else {
        return Err(error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store not configured; snapshots disabled",
        ));
    };

    let agg = state.cache.get().await;
    match crate::sampler::run_snapshot_job(store, &agg).await {
        Ok(count) => Ok(Json(serde_json::json!({ "ok": true, "snapshotted": count }))),
        Err(e) => Err(error_json(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("snapshot job failed: {e}"),
        )),
    }
}
