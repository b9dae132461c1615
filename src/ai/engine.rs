// =============================================================================
// AI Trader Engine — one LLM-backed decision per agent cycle
// =============================================================================
//
// Cycle shape: load agent + positions + aggregate, accrue funding, check the
// fixed stop-loss, then consult the model and execute its (validated)
// action. Every path out of the cycle persists exactly one decision row and
// mutates at most one position. Business rejections (cap hit, duplicate
// asset, dust size, unknown asset) are not errors — the action downgrades
// to hold and the reasoning records why.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::openrouter::OpenRouterClient;
use super::prompts;
use crate::paper::engine::{accrue_funding, price_pct, FEE_RATE, MIN_POSITION_SIZE};
use crate::store::models::{AiAction, AiDecision, AiPosition, AiTrader, TradeDirection};
use crate::store::Store;
use crate::types::AggregatedResult;

/// Fixed stop-loss for every agent, as a fraction of entry.
pub const AI_STOP_LOSS: f64 = 0.15;

/// Hard cap on concurrently open agent positions.
pub const AI_MAX_POSITIONS: usize = 3;

/// One position may be at most this fraction of total value.
pub const AI_MAX_POSITION_FRACTION: f64 = 0.3;

// =============================================================================
// Decision parsing
// =============================================================================

/// What the model asked for, before validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDecision {
    pub action: AiAction,
    pub asset: Option<String>,
    pub size_usd: Option<f64>,
    pub reasoning: String,
}

/// Extract the first balanced JSON object embedded in `text`.
///
/// Models routinely wrap the object in prose or markdown fences; we scan for
/// the first `{` and walk to its matching brace, string-aware.
pub fn extract_json_object(text: &str) -> Option<serde_json::Value> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&text[start..=i]).ok();
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse and validate the model's reply. `None` when no JSON object is
/// found or the action is not one of the four allowed values.
pub fn parse_decision(text: &str) -> Option<ParsedDecision> {
    let v = extract_json_object(text)?;
    let action = AiAction::parse(v["action"].as_str()?)?;
    let asset = v["asset"].as_str().map(str::to_uppercase);
    let size_usd = v["size_usd"].as_f64().or_else(|| v["sizeUsd"].as_f64());
    let reasoning = v["reasoning"].as_str().unwrap_or("").to_string();
    Some(ParsedDecision {
        action,
        asset,
        size_usd,
        reasoning,
    })
}

// =============================================================================
// Close accounting
// =============================================================================

/// Agent close math. Unlike the paper engine, realized P&L also nets the
/// entry fee (agents have no per-position fee ledger). Funding is already in
/// cash, so the credit excludes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AiCloseOutcome {
    pub price_return: f64,
    pub realized_pnl: f64,
    pub cash_credit: f64,
}

pub fn ai_close_outcome(
    direction: TradeDirection,
    entry_price: f64,
    mark: f64,
    size_usd: f64,
    funding_collected: f64,
) -> AiCloseOutcome {
    let price_return = price_pct(direction.sign(), entry_price, mark) * size_usd;
    let entry_fee = size_usd * FEE_RATE;
    let exit_fee = size_usd * FEE_RATE;
    AiCloseOutcome {
        price_return,
        realized_pnl: price_return + funding_collected - entry_fee - exit_fee,
        cash_credit: size_usd + price_return - exit_fee,
    }
}

// =============================================================================
// Engine
// =============================================================================

pub struct AiTraderEngine {
    store: Arc<Store>,
    llm: Option<OpenRouterClient>,
}

impl AiTraderEngine {
    pub fn new(store: Arc<Store>, llm: Option<OpenRouterClient>) -> Self {
        if llm.is_none() {
            warn!("OPENROUTER_API_KEY not configured; agents will always hold");
        }
        Self { store, llm }
    }

    /// Run one full cycle for the agent named `name`.
    ///
    /// Returns `Ok(None)` when no active agent has that name. Cycles for the
    /// same agent must not run concurrently; the caller serializes them.
    pub async fn run_agent_cycle(
        &self,
        name: &str,
        agg: &AggregatedResult,
    ) -> Result<Option<AiDecision>> {
        let Some(trader) = self.store.active_trader_by_name(name).await? else {
            return Ok(None);
        };
        let mut positions = self.store.open_ai_positions(&trader.id).await?;
        let now = Utc::now();
        let mut cash = trader.cash_balance;

        // ── Funding accrual (shared mechanics with the paper engine) ─────
        for pos in positions.iter_mut() {
            let Some(spread) = agg.spread_for(&pos.asset) else {
                continue;
            };
            let Some(accrual) = accrue_funding(
                pos.size_usd,
                pos.direction.sign(),
                spread.primary.rate_8h,
                pos.last_funding_at,
                now,
            ) else {
                continue;
            };

            pos.funding_collected += accrual.earned;
            pos.last_funding_at = accrual.advanced_to;
            self.store
                .update_ai_position_funding(&pos.id, pos.funding_collected, pos.last_funding_at)
                .await?;
            cash += accrual.earned;
        }

        // ── Stop-loss: a triggered close is this cycle's decision ────────
        for pos in &positions {
            let Some(mark) = agg
                .spread_for(&pos.asset)
                .and_then(|s| s.primary.mark_price)
                .filter(|m| *m > 0.0)
            else {
                continue;
            };
            let pct = price_pct(pos.direction.sign(), pos.entry_price, mark);
            if pct >= -AI_STOP_LOSS {
                continue;
            }

            let outcome = ai_close_outcome(
                pos.direction,
                pos.entry_price,
                mark,
                pos.size_usd,
                pos.funding_collected,
            );
            self.store
                .close_ai_position(&pos.id, mark, outcome.realized_pnl, now)
                .await?;
            cash += outcome.cash_credit;

            let decision = AiDecision {
                id: Uuid::new_v4().to_string(),
                trader_id: trader.id.clone(),
                action: AiAction::Close,
                asset: Some(pos.asset.clone()),
                size_usd: Some(pos.size_usd),
                reasoning: format!(
                    "Stop-loss: {} {} is {:.1}% against the entry (limit {:.0}%)",
                    pos.direction,
                    pos.asset,
                    pct * 100.0,
                    AI_STOP_LOSS * 100.0
                ),
                created_at: now,
            };
            self.store.insert_decision(&decision).await?;
            self.store.update_trader_cash(&trader.id, cash).await?;

            info!(
                trader = %trader.name,
                asset = %pos.asset,
                realized_pnl = outcome.realized_pnl,
                "agent position stop-lossed"
            );
            return Ok(Some(decision));
        }

        // ── Consult the model ────────────────────────────────────────────
        let parsed = match &self.llm {
            None => ParsedDecision {
                action: AiAction::Hold,
                asset: None,
                size_usd: None,
                reasoning: "LLM disabled: no API key configured — holding".to_string(),
            },
            Some(llm) => {
                let system = prompts::system_prompt(&trader);
                let user = prompts::user_prompt(&trader, &positions, agg, cash);
                match llm.chat(&trader.model, &system, &user).await {
                    Ok(reply) => parse_decision(&reply).unwrap_or_else(|| ParsedDecision {
                        action: AiAction::Hold,
                        asset: None,
                        size_usd: None,
                        reasoning: "Could not parse a valid decision from the model reply — holding"
                            .to_string(),
                    }),
                    Err(e) => ParsedDecision {
                        action: AiAction::Hold,
                        asset: None,
                        size_usd: None,
                        reasoning: format!("{e} — holding"),
                    },
                }
            }
        };

        // ── Execute ──────────────────────────────────────────────────────
        let decision = self.execute(&trader, &positions, parsed, agg, &mut cash, now).await?;
        self.store.insert_decision(&decision).await?;
        self.store.update_trader_cash(&trader.id, cash).await?;

        info!(
            trader = %trader.name,
            action = %decision.action,
            asset = ?decision.asset,
            "agent cycle complete"
        );
        Ok(Some(decision))
    }

    /// Apply the model's request, downgrading to hold when a gate rejects
    /// it. Returns the decision row to persist.
    async fn execute(
        &self,
        trader: &AiTrader,
        positions: &[AiPosition],
        parsed: ParsedDecision,
        agg: &AggregatedResult,
        cash: &mut f64,
        now: chrono::DateTime<Utc>,
    ) -> Result<AiDecision> {
        let mut decision = AiDecision {
            id: Uuid::new_v4().to_string(),
            trader_id: trader.id.clone(),
            action: parsed.action,
            asset: parsed.asset.clone(),
            size_usd: parsed.size_usd,
            reasoning: parsed.reasoning.clone(),
            created_at: now,
        };

        let downgrade = |decision: &mut AiDecision, why: &str| {
            decision.action = AiAction::Hold;
            decision.size_usd = None;
            decision.reasoning = format!("{} (downgraded to hold: {})", parsed.reasoning, why);
        };

        match parsed.action {
            AiAction::Hold => {}

            AiAction::OpenLong | AiAction::OpenShort => {
                let Some(asset) = parsed.asset.clone() else {
                    downgrade(&mut decision, "no asset specified");
                    return Ok(decision);
                };
                if positions.len() >= AI_MAX_POSITIONS {
                    downgrade(&mut decision, "position cap reached");
                    return Ok(decision);
                }
                if positions.iter().any(|p| p.asset == asset) {
                    downgrade(&mut decision, "position already open in this asset");
                    return Ok(decision);
                }
                let Some(mark) = agg
                    .spread_for(&asset)
                    .and_then(|s| s.primary.mark_price)
                    .filter(|m| *m > 0.0)
                else {
                    downgrade(&mut decision, "asset not tradeable right now");
                    return Ok(decision);
                };

                let total_value: f64 =
                    *cash + positions.iter().map(|p| p.size_usd).sum::<f64>();
                let cap = total_value * AI_MAX_POSITION_FRACTION;
                let size = parsed.size_usd.unwrap_or(cap).min(cap);
                let fee = size * FEE_RATE;
                if size < MIN_POSITION_SIZE || *cash < size + fee {
                    downgrade(&mut decision, "size below minimum or insufficient cash");
                    return Ok(decision);
                }

                let direction = if parsed.action == AiAction::OpenLong {
                    TradeDirection::Long
                } else {
                    TradeDirection::Short
                };
                let rate_8h = agg
                    .spread_for(&asset)
                    .map(|s| s.primary.rate_8h)
                    .unwrap_or(0.0);

                let position = AiPosition {
                    id: Uuid::new_v4().to_string(),
                    trader_id: trader.id.clone(),
                    asset: asset.clone(),
                    direction,
                    size_usd: size,
                    entry_price: mark,
                    entry_rate_8h: rate_8h,
                    funding_collected: 0.0,
                    last_funding_at: now,
                    opened_at: now,
                    is_open: true,
                    exit_price: None,
                    realized_pnl: None,
                    closed_at: None,
                };
                self.store.insert_ai_position(&position).await?;
                *cash -= size + fee;
                decision.size_usd = Some(size);

                info!(
                    trader = %trader.name,
                    asset = %asset,
                    direction = %direction,
                    size,
                    entry_price = mark,
                    "agent position opened"
                );
            }

            AiAction::Close => {
                let Some(asset) = parsed.asset.clone() else {
                    downgrade(&mut decision, "no asset specified");
                    return Ok(decision);
                };
                let Some(pos) = positions.iter().find(|p| p.asset == asset) else {
                    downgrade(&mut decision, "no open position in this asset");
                    return Ok(decision);
                };
                let mark = agg
                    .spread_for(&asset)
                    .and_then(|s| s.primary.mark_price)
                    .filter(|m| *m > 0.0)
                    .unwrap_or(pos.entry_price);

                let outcome = ai_close_outcome(
                    pos.direction,
                    pos.entry_price,
                    mark,
                    pos.size_usd,
                    pos.funding_collected,
                );
                self.store
                    .close_ai_position(&pos.id, mark, outcome.realized_pnl, now)
                    .await?;
                *cash += outcome.cash_credit;
                decision.size_usd = Some(pos.size_usd);

                info!(
                    trader = %trader.name,
                    asset = %asset,
                    realized_pnl = outcome.realized_pnl,
                    "agent position closed"
                );
            }
        }

        Ok(decision)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn extracts_object_from_prose_and_fences() {
        let text = "Sure! Here's my decision:\n```json\n{\"action\": \"hold\", \
                    \"reasoning\": \"waiting for a setup\"}\n```\nGood luck!";
        let v = extract_json_object(text).unwrap();
        assert_eq!(v["action"], "hold");
    }

    #[test]
    fn extracts_nested_objects_and_braces_in_strings() {
        let text = "{\"action\": \"close\", \"asset\": \"BTC\", \
                    \"reasoning\": \"pattern {wedge} resolved\", \
                    \"meta\": {\"x\": 1}} trailing";
        let v = extract_json_object(text).unwrap();
        assert_eq!(v["meta"]["x"], 1);
        assert_eq!(v["reasoning"], "pattern {wedge} resolved");
    }

    #[test]
    fn no_json_yields_none() {
        assert!(extract_json_object("I think we should buy BTC").is_none());
        assert!(extract_json_object("{broken json").is_none());
    }

    #[test]
    fn parse_decision_validates_action() {
        let good = parse_decision(
            "{\"action\": \"open_short\", \"asset\": \"eth\", \"size_usd\": 500, \
             \"reasoning\": \"funding is rich\"}",
        )
        .unwrap();
        assert_eq!(good.action, AiAction::OpenShort);
        assert_eq!(good.asset.as_deref(), Some("ETH"));
        assert_eq!(good.size_usd, Some(500.0));

        assert!(parse_decision("{\"action\": \"yolo\", \"asset\": \"BTC\"}").is_none());
        assert!(parse_decision("{\"asset\": \"BTC\"}").is_none());
    }

    #[test]
    fn parse_decision_accepts_camel_case_size() {
        let d = parse_decision("{\"action\": \"open_long\", \"asset\": \"BTC\", \"sizeUsd\": 250}")
            .unwrap();
        assert_eq!(d.size_usd, Some(250.0));
        assert_eq!(d.reasoning, "");
    }

    #[test]
    fn ai_close_nets_both_fees_in_realized_pnl() {
        // Long 1000 from 100 to 110: +100 price return, 0.5 fee each way.
        let outcome = ai_close_outcome(TradeDirection::Long, 100.0, 110.0, 1_000.0, 2.0);
        assert!((outcome.price_return - 100.0).abs() < EPS);
        assert!((outcome.realized_pnl - 101.0).abs() < EPS);
        // Cash credit excludes funding (already credited) and the entry fee
        // (already debited at open).
        assert!((outcome.cash_credit - 1_099.5).abs() < EPS);
    }

    #[test]
    fn ai_close_short_loses_on_rally() {
        let outcome = ai_close_outcome(TradeDirection::Short, 100.0, 110.0, 1_000.0, 0.0);
        assert!((outcome.price_return + 100.0).abs() < EPS);
        assert!((outcome.realized_pnl + 101.0).abs() < EPS);
        assert!((outcome.cash_credit - 899.5).abs() < EPS);
    }
}
