// =============================================================================
// Agent Prompts — persona system prompts + market/portfolio context
// =============================================================================
//
// The system prompt carries the persona; the user message carries a compact
// text rendering of the top of the market plus the agent's own book. The
// model must answer with a single JSON object; anything else downgrades to
// hold at the validation layer.

use crate::store::models::{AiPosition, AiTrader};
use crate::types::AggregatedResult;

/// Starting bankroll every agent is measured against.
pub const AGENT_BASELINE: f64 = 10_000.0;

/// Assets shown in the market context.
const CONTEXT_ASSETS: usize = 20;

const RESPONSE_CONTRACT: &str = "\
Respond with a single JSON object and nothing else:\n\
{\"action\": \"open_long\" | \"open_short\" | \"close\" | \"hold\", \
\"asset\": \"TICKER\", \"size_usd\": 1000, \"reasoning\": \"one or two sentences\"}\n\
Rules: max 3 open positions; one position per asset; a position is at most \
30% of your total value; \"close\" needs an asset you actually hold. \
Funding is quoted per 8 hours; shorts collect positive funding, longs \
collect negative funding.";

/// Persona-specific system prompt, selected by agent name.
pub fn system_prompt(trader: &AiTrader) -> String {
    let name = trader.name.to_lowercase();

    let persona = if name.contains("macro") {
        "You build a macro thesis first: funding regimes, open-interest \
         shifts, and where the crowd is positioned. You only trade when the \
         market structure supports a multi-day view, and you size with \
         patience rather than chasing single prints."
    } else if name.contains("momentum") {
        "You hunt momentum breakouts: assets where price, volume, and \
         funding are accelerating together. You enter strength, cut quickly \
         when the move stalls, and never average into a loser."
    } else if name.contains("contrarian") {
        "You are a contrarian mean-reversion trader: extreme funding is a \
         crowded boat and you fade it. Deeply negative funding on a washed \
         out asset is your favourite long; euphoric positive funding is \
         your favourite short."
    } else if name.contains("risk") || name.contains("quant") {
        "You are a risk-adjusted-conviction trader: every idea is judged by \
         its expected funding carry against its price volatility. You would \
         rather hold than take a trade without a clear edge, and you keep \
         position sizes small relative to your bankroll."
    } else {
        "You are a disciplined perpetual-futures trader focused on funding \
         rate opportunities across venues."
    };

    format!(
        "You are {}, an autonomous crypto perp trader in a funding-rate \
         arbitrage simulation. {}\n\n{}",
        trader.name, persona, RESPONSE_CONTRACT
    )
}

/// The full user message: market table + portfolio summary.
pub fn user_prompt(
    trader: &AiTrader,
    positions: &[AiPosition],
    agg: &AggregatedResult,
    cash_balance: f64,
) -> String {
    let mut out = String::with_capacity(4096);
    out.push_str("Market snapshot (top assets by open interest):\n");
    out.push_str(&market_context(agg));
    out.push('\n');
    out.push_str(&portfolio_context(trader, positions, agg, cash_balance));
    out.push_str("\nWhat is your single action this cycle?");
    out
}

/// One line per asset: price, 24h change, volume, OI, primary rate, CEX
/// average, and the max spread.
pub fn market_context(agg: &AggregatedResult) -> String {
    let mut by_oi: Vec<_> = agg.spreads.iter().collect();
    by_oi.sort_by(|a, b| {
        b.primary
            .open_interest
            .unwrap_or(0.0)
            .partial_cmp(&a.primary.open_interest.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut out = String::new();
    for spread in by_oi.into_iter().take(CONTEXT_ASSETS) {
        let p = &spread.primary;
        let cex_avg = if spread.cex_rates.is_empty() {
            0.0
        } else {
            spread.cex_rates.values().map(|r| r.rate_8h).sum::<f64>()
                / spread.cex_rates.len() as f64
        };
        out.push_str(&format!(
            "{}: px={} 24h={:+.2}% vol=${:.1}M oi=${:.1}M funding8h={:+.4}% cexAvg={:+.4}% spread={:+.4}%\n",
            spread.asset,
            p.mark_price.map(|m| format!("{m}")).unwrap_or_else(|| "?".to_string()),
            p.change_24h.unwrap_or(0.0),
            p.volume_24h.unwrap_or(0.0) / 1_000_000.0,
            p.open_interest.unwrap_or(0.0) / 1_000_000.0,
            p.rate_8h * 100.0,
            cex_avg * 100.0,
            spread.max_spread * 100.0,
        ));
    }
    out
}

/// Cash, mark-to-market value, P&L vs. the baseline, and every open
/// position's entry vs. current state.
pub fn portfolio_context(
    trader: &AiTrader,
    positions: &[AiPosition],
    agg: &AggregatedResult,
    cash_balance: f64,
) -> String {
    let mut total_value = cash_balance;
    let mut lines = String::new();

    if positions.is_empty() {
        lines.push_str("(no open positions)\n");
    }
    for pos in positions {
        let spread = agg.spread_for(&pos.asset);
        let mark = spread
            .and_then(|s| s.primary.mark_price)
            .unwrap_or(pos.entry_price);
        let current_rate = spread.map(|s| s.primary.rate_8h).unwrap_or(0.0);
        let unrealized =
            pos.direction.sign() * (pos.entry_price - mark) / pos.entry_price * pos.size_usd;
        total_value += pos.size_usd + unrealized;

        lines.push_str(&format!(
            "- {} {} ${:.0}: entry={} now={} unrealizedPnl={:+.2} fundingCollected={:+.2} currentRate8h={:+.4}%\n",
            pos.direction,
            pos.asset,
            pos.size_usd,
            pos.entry_price,
            mark,
            unrealized,
            pos.funding_collected,
            current_rate * 100.0,
        ));
    }

    let pnl = total_value - AGENT_BASELINE;
    format!(
        "Your portfolio ({}):\ncash=${:.2} totalValue=${:.2} pnlVsStart={:+.2}\nPositions:\n{}",
        trader.name, cash_balance, total_value, pnl, lines
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::TradeDirection;
    use crate::types::{FundingRate, FundingSpread, Venue};
    use std::collections::HashMap;

    fn trader(name: &str) -> AiTrader {
        AiTrader {
            id: "t1".to_string(),
            name: name.to_string(),
            model: "test/model".to_string(),
            emoji: None,
            persona: None,
            cash_balance: 10_000.0,
            is_active: true,
        }
    }

    fn spread(asset: &str, rate_8h: f64, oi: f64, mark: f64) -> FundingSpread {
        FundingSpread {
            asset: asset.to_string(),
            primary: FundingRate {
                asset: asset.to_string(),
                venue: Venue::Hyperliquid,
                rate_8h,
                rate_raw: rate_8h / 8.0,
                next_funding_time: 0,
                open_interest: Some(oi),
                mark_price: Some(mark),
                change_24h: Some(1.5),
                volume_24h: Some(2_000_000.0),
                observed_at: 0,
            },
            cex_rates: HashMap::new(),
            best_cex: None,
            best_cex_rate: 0.0,
            max_spread: 0.0,
        }
    }

    #[test]
    fn personas_differ_by_name() {
        let macro_prompt = system_prompt(&trader("MacroMind"));
        let momentum_prompt = system_prompt(&trader("Momentum Max"));
        let contrarian_prompt = system_prompt(&trader("The Contrarian"));
        let risk_prompt = system_prompt(&trader("RiskWeighted"));
        let generic_prompt = system_prompt(&trader("Alice"));

        assert!(macro_prompt.contains("macro thesis"));
        assert!(momentum_prompt.contains("momentum breakouts"));
        assert!(contrarian_prompt.contains("mean-reversion"));
        assert!(risk_prompt.contains("risk-adjusted"));
        assert!(generic_prompt.contains("disciplined"));
        // Every variant carries the response contract.
        for p in [&macro_prompt, &momentum_prompt, &contrarian_prompt, &risk_prompt, &generic_prompt] {
            assert!(p.contains("single JSON object"));
        }
    }

    #[test]
    fn market_context_ranks_by_open_interest() {
        let agg = AggregatedResult {
            spreads: vec![
                spread("SMALL", 0.001, 1_000_000.0, 1.0),
                spread("BIG", 0.002, 9_000_000.0, 2.0),
            ],
            all_rates: Vec::new(),
            timestamp: 0,
        };
        let ctx = market_context(&agg);
        let big_at = ctx.find("BIG").unwrap();
        let small_at = ctx.find("SMALL").unwrap();
        assert!(big_at < small_at);
    }

    #[test]
    fn portfolio_context_marks_to_market() {
        let agg = AggregatedResult {
            spreads: vec![spread("BTC", 0.0008, 1_000_000.0, 110.0)],
            all_rates: Vec::new(),
            timestamp: 0,
        };
        let positions = vec![AiPosition {
            id: "p1".to_string(),
            trader_id: "t1".to_string(),
            asset: "BTC".to_string(),
            direction: TradeDirection::Long,
            size_usd: 1_000.0,
            entry_price: 100.0,
            entry_rate_8h: 0.0008,
            funding_collected: 1.0,
            last_funding_at: chrono::Utc::now(),
            opened_at: chrono::Utc::now(),
            is_open: true,
            exit_price: None,
            realized_pnl: None,
            closed_at: None,
        }];
        let ctx = portfolio_context(&trader("Alice"), &positions, &agg, 9_000.0);
        // Long from 100 to 110 on 1000 notional: +100 unrealized.
        assert!(ctx.contains("unrealizedPnl=+100.00"));
        // total = 9000 cash + 1000 size + 100 unrealized.
        assert!(ctx.contains("totalValue=$10100.00"));
    }
}
