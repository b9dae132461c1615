// =============================================================================
// Paper Strategies — closed set of entry/exit rule variants
// =============================================================================
//
// Each portfolio names one strategy; the engine dispatches on the tag. The
// strategy config arrives as an opaque JSON map on the portfolio row. Every
// key is optional; defaults differ per strategy where noted. Keys are
// accepted under both the `enter_*` and `entry_*` prefixes, with `enter_*`
// winning when both are present.

use serde_json::Value;

use crate::store::models::PositionSide;
use crate::types::FundingSpread;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Short the perp wherever the cross-venue spread is wide and funding
    /// is positive.
    Aggressive,
    /// Like aggressive, but only in majors and at a wider spread.
    Conservative,
    /// Spread-shorting constrained to the most liquid names by open
    /// interest.
    Diversified,
    /// Fade deeply negative funding by going long.
    NegativeFade,
    /// Short extreme positive funding or long extreme negative funding,
    /// whichever regime is stronger.
    RegimeAdaptive,
}

impl Strategy {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "aggressive" => Some(Self::Aggressive),
            "conservative" => Some(Self::Conservative),
            "diversified" => Some(Self::Diversified),
            "negative_fade" => Some(Self::NegativeFade),
            "regime_adaptive" => Some(Self::RegimeAdaptive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Conservative => "conservative",
            Self::Diversified => "diversified",
            Self::NegativeFade => "negative_fade",
            Self::RegimeAdaptive => "regime_adaptive",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// StrategyConfig
// =============================================================================

/// Fully resolved tuning knobs for one portfolio: raw JSON merged with the
/// per-strategy defaults.
#[derive(Debug, Clone)]
pub struct StrategyConfig {
    pub max_position_size_pct: f64,
    pub max_positions: usize,
    pub stop_loss_pct: f64,
    pub exit_rate_threshold: f64,
    pub exit_spread_threshold: f64,
    pub enter_rate_threshold: f64,
    pub enter_spread_threshold: f64,
    pub allowed_assets: Vec<String>,
    pub top_n_by_oi: usize,
    pub positive_rate_threshold: f64,
    pub negative_rate_threshold: f64,
}

fn num_key(raw: &Value, key: &str, default: f64) -> f64 {
    raw.get(key).and_then(Value::as_f64).unwrap_or(default)
}

/// Dual-prefix numeric lookup: `enter_*` wins over `entry_*`.
fn enter_key(raw: &Value, enter: &str, entry: &str, default: f64) -> f64 {
    raw.get(enter)
        .and_then(Value::as_f64)
        .or_else(|| raw.get(entry).and_then(Value::as_f64))
        .unwrap_or(default)
}

fn usize_key(raw: &Value, key: &str, default: usize) -> usize {
    raw.get(key)
        .and_then(Value::as_u64)
        .map(|v| v as usize)
        .unwrap_or(default)
}

fn assets_key(raw: &Value, key: &str, default: &[&str]) -> Vec<String> {
    raw.get(key)
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(Value::as_str)
                .map(str::to_uppercase)
                .collect()
        })
        .unwrap_or_else(|| default.iter().map(|s| s.to_string()).collect())
}

impl StrategyConfig {
    pub fn parse(strategy: Strategy, raw: &Value) -> Self {
        let exit_rate_default = match strategy {
            Strategy::NegativeFade => -0.01,
            Strategy::RegimeAdaptive => 0.0001,
            _ => 0.0,
        };
        let enter_spread_default = match strategy {
            Strategy::Conservative => 0.05,
            Strategy::Diversified => 0.04,
            _ => 0.03,
        };

        Self {
            max_position_size_pct: num_key(raw, "max_position_size_pct", 0.20),
            max_positions: usize_key(raw, "max_positions", 5),
            stop_loss_pct: num_key(raw, "stop_loss_pct", 0.10),
            exit_rate_threshold: num_key(raw, "exit_rate_threshold", exit_rate_default),
            exit_spread_threshold: num_key(raw, "exit_spread_threshold", 0.01),
            enter_rate_threshold: enter_key(
                raw,
                "enter_rate_threshold",
                "entry_rate_threshold",
                -0.05,
            ),
            enter_spread_threshold: enter_key(
                raw,
                "enter_spread_threshold",
                "entry_spread_threshold",
                enter_spread_default,
            ),
            allowed_assets: assets_key(raw, "allowed_assets", &["BTC", "ETH"]),
            top_n_by_oi: usize_key(raw, "top_n_by_oi", 20),
            positive_rate_threshold: num_key(raw, "positive_rate_threshold", 0.0003),
            negative_rate_threshold: num_key(raw, "negative_rate_threshold", 0.0003),
        }
    }
}

// =============================================================================
// Exit rules
// =============================================================================

/// Strategy-specific exit condition. Evaluated only after the stop-loss
/// check has passed.
pub fn should_exit(
    strategy: Strategy,
    cfg: &StrategyConfig,
    side: PositionSide,
    spread: &FundingSpread,
) -> bool {
    match strategy {
        Strategy::NegativeFade => spread.primary.rate_8h > cfg.exit_rate_threshold,
        Strategy::RegimeAdaptive => match side {
            PositionSide::LongPerp => spread.primary.rate_8h > cfg.exit_rate_threshold,
            PositionSide::ShortPerp => spread.primary.rate_8h < -cfg.exit_rate_threshold,
        },
        _ => spread.max_spread < cfg.exit_spread_threshold,
    }
}

// =============================================================================
// Candidate selection
// =============================================================================

/// Entry candidates in rank order, paired with the side to open.
pub fn select_candidates<'a>(
    strategy: Strategy,
    cfg: &StrategyConfig,
    spreads: &'a [FundingSpread],
) -> Vec<(&'a FundingSpread, PositionSide)> {
    match strategy {
        Strategy::NegativeFade => {
            let mut out: Vec<&FundingSpread> = spreads
                .iter()
                .filter(|s| s.primary.rate_8h < cfg.enter_rate_threshold)
                .collect();
            out.sort_by(|a, b| cmp_f64(a.primary.rate_8h, b.primary.rate_8h));
            out.into_iter()
                .map(|s| (s, PositionSide::LongPerp))
                .collect()
        }
        Strategy::Conservative => {
            let mut out: Vec<&FundingSpread> = spreads
                .iter()
                .filter(|s| cfg.allowed_assets.iter().any(|a| a == &s.asset))
                .filter(|s| s.max_spread > cfg.enter_spread_threshold && s.primary.rate_8h > 0.0)
                .collect();
            out.sort_by(|a, b| cmp_f64(b.max_spread, a.max_spread));
            out.into_iter()
                .map(|s| (s, PositionSide::ShortPerp))
                .collect()
        }
        Strategy::Diversified => {
            // Liquidity universe first: top-N primary assets by open interest.
            let mut by_oi: Vec<&FundingSpread> = spreads.iter().collect();
            by_oi.sort_by(|a, b| {
                cmp_f64(
                    b.primary.open_interest.unwrap_or(0.0),
                    a.primary.open_interest.unwrap_or(0.0),
                )
            });
            let mut out: Vec<&FundingSpread> = by_oi
                .into_iter()
                .take(cfg.top_n_by_oi)
                .filter(|s| s.max_spread > cfg.enter_spread_threshold && s.primary.rate_8h > 0.0)
                .collect();
            out.sort_by(|a, b| cmp_f64(b.max_spread, a.max_spread));
            out.into_iter()
                .map(|s| (s, PositionSide::ShortPerp))
                .collect()
        }
        Strategy::Aggressive => {
            let mut out: Vec<&FundingSpread> = spreads
                .iter()
                .filter(|s| s.max_spread > cfg.enter_spread_threshold && s.primary.rate_8h > 0.0)
                .collect();
            out.sort_by(|a, b| cmp_f64(b.max_spread, a.max_spread));
            out.into_iter()
                .map(|s| (s, PositionSide::ShortPerp))
                .collect()
        }
        Strategy::RegimeAdaptive => {
            let mut shorts: Vec<&FundingSpread> = spreads
                .iter()
                .filter(|s| s.primary.rate_8h > cfg.positive_rate_threshold)
                .collect();
            let mut longs: Vec<&FundingSpread> = spreads
                .iter()
                .filter(|s| s.primary.rate_8h < -cfg.negative_rate_threshold)
                .collect();
            shorts.sort_by(|a, b| cmp_f64(b.primary.rate_8h.abs(), a.primary.rate_8h.abs()));
            longs.sort_by(|a, b| cmp_f64(b.primary.rate_8h.abs(), a.primary.rate_8h.abs()));

            // Trade the bucket whose extreme is more extreme.
            let best_short = shorts.first().map(|s| s.primary.rate_8h.abs()).unwrap_or(0.0);
            let best_long = longs.first().map(|s| s.primary.rate_8h.abs()).unwrap_or(0.0);
            if best_short >= best_long {
                shorts
                    .into_iter()
                    .map(|s| (s, PositionSide::ShortPerp))
                    .collect()
            } else {
                longs
                    .into_iter()
                    .map(|s| (s, PositionSide::LongPerp))
                    .collect()
            }
        }
    }
}

fn cmp_f64(a: f64, b: f64) -> std::cmp::Ordering {
    a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FundingRate, Venue};
    use std::collections::HashMap;

    fn spread(asset: &str, rate_8h: f64, max_spread: f64, oi: Option<f64>) -> FundingSpread {
        FundingSpread {
            asset: asset.to_string(),
            primary: FundingRate {
                asset: asset.to_string(),
                venue: Venue::Hyperliquid,
                rate_8h,
                rate_raw: rate_8h / 8.0,
                next_funding_time: 0,
                open_interest: oi,
                mark_price: Some(100.0),
                change_24h: None,
                volume_24h: None,
                observed_at: 0,
            },
            cex_rates: HashMap::new(),
            best_cex: None,
            best_cex_rate: 0.0,
            max_spread,
        }
    }

    #[test]
    fn parse_recognizes_all_five_strategies() {
        for name in [
            "aggressive",
            "conservative",
            "diversified",
            "negative_fade",
            "regime_adaptive",
        ] {
            assert!(Strategy::parse(name).is_some(), "{name}");
        }
        assert!(Strategy::parse("momentum").is_none());
    }

    #[test]
    fn config_defaults_differ_per_strategy() {
        let empty = serde_json::json!({});
        let aggressive = StrategyConfig::parse(Strategy::Aggressive, &empty);
        assert_eq!(aggressive.enter_spread_threshold, 0.03);
        assert_eq!(aggressive.max_positions, 5);
        assert_eq!(aggressive.stop_loss_pct, 0.10);

        let conservative = StrategyConfig::parse(Strategy::Conservative, &empty);
        assert_eq!(conservative.enter_spread_threshold, 0.05);
        assert_eq!(conservative.allowed_assets, vec!["BTC", "ETH"]);

        let diversified = StrategyConfig::parse(Strategy::Diversified, &empty);
        assert_eq!(diversified.enter_spread_threshold, 0.04);
        assert_eq!(diversified.top_n_by_oi, 20);

        let fade = StrategyConfig::parse(Strategy::NegativeFade, &empty);
        assert_eq!(fade.exit_rate_threshold, -0.01);
        assert_eq!(fade.enter_rate_threshold, -0.05);

        let regime = StrategyConfig::parse(Strategy::RegimeAdaptive, &empty);
        assert_eq!(regime.exit_rate_threshold, 0.0001);
        assert_eq!(regime.positive_rate_threshold, 0.0003);
    }

    #[test]
    fn enter_prefix_wins_over_entry_prefix() {
        let raw = serde_json::json!({
            "enter_spread_threshold": 0.08,
            "entry_spread_threshold": 0.02,
            "entry_rate_threshold": -0.09,
        });
        let cfg = StrategyConfig::parse(Strategy::Aggressive, &raw);
        assert_eq!(cfg.enter_spread_threshold, 0.08);
        // Only the entry_ spelling present: accepted.
        assert_eq!(cfg.enter_rate_threshold, -0.09);
    }

    #[test]
    fn aggressive_filters_and_ranks_by_spread() {
        let cfg = StrategyConfig::parse(Strategy::Aggressive, &serde_json::json!({}));
        let spreads = vec![
            spread("A", 0.001, 0.031, None),
            spread("B", 0.002, 0.09, None),
            spread("C", -0.001, 0.5, None), // negative rate: excluded
            spread("D", 0.001, 0.01, None), // spread too small: excluded
        ];
        let picks = select_candidates(Strategy::Aggressive, &cfg, &spreads);
        let assets: Vec<&str> = picks.iter().map(|(s, _)| s.asset.as_str()).collect();
        assert_eq!(assets, vec!["B", "A"]);
        assert!(picks.iter().all(|(_, side)| *side == PositionSide::ShortPerp));
    }

    #[test]
    fn conservative_respects_allowed_assets() {
        let cfg = StrategyConfig::parse(Strategy::Conservative, &serde_json::json!({}));
        let spreads = vec![
            spread("BTC", 0.001, 0.06, None),
            spread("DOGE", 0.002, 0.3, None), // not allowed
            spread("ETH", 0.001, 0.04, None), // spread below 0.05
        ];
        let picks = select_candidates(Strategy::Conservative, &cfg, &spreads);
        assert_eq!(picks.len(), 1);
        assert_eq!(picks[0].0.asset, "BTC");
    }

    #[test]
    fn diversified_restricts_to_top_oi_universe() {
        let raw = serde_json::json!({ "top_n_by_oi": 2 });
        let cfg = StrategyConfig::parse(Strategy::Diversified, &raw);
        let spreads = vec![
            spread("A", 0.001, 0.10, Some(1_000_000.0)),
            spread("B", 0.001, 0.20, Some(500_000.0)),
            // Widest spread but too little open interest to make the universe.
            spread("C", 0.001, 0.90, Some(10.0)),
        ];
        let picks = select_candidates(Strategy::Diversified, &cfg, &spreads);
        let assets: Vec<&str> = picks.iter().map(|(s, _)| s.asset.as_str()).collect();
        assert_eq!(assets, vec!["B", "A"]);
    }

    #[test]
    fn negative_fade_goes_long_most_negative_first() {
        let cfg = StrategyConfig::parse(Strategy::NegativeFade, &serde_json::json!({}));
        let spreads = vec![
            spread("A", -0.06, 0.0, None),
            spread("B", -0.30, 0.0, None),
            spread("C", -0.01, 0.0, None), // above the -0.05 threshold
        ];
        let picks = select_candidates(Strategy::NegativeFade, &cfg, &spreads);
        let assets: Vec<&str> = picks.iter().map(|(s, _)| s.asset.as_str()).collect();
        assert_eq!(assets, vec!["B", "A"]);
        assert!(picks.iter().all(|(_, side)| *side == PositionSide::LongPerp));
    }

    #[test]
    fn regime_adaptive_picks_stronger_bucket() {
        let cfg = StrategyConfig::parse(Strategy::RegimeAdaptive, &serde_json::json!({}));
        // Negative extreme (-0.01) beats positive extreme (+0.005).
        let spreads = vec![
            spread("POS", 0.005, 0.0, None),
            spread("NEG", -0.01, 0.0, None),
            spread("NEG2", -0.002, 0.0, None),
        ];
        let picks = select_candidates(Strategy::RegimeAdaptive, &cfg, &spreads);
        assert_eq!(picks[0].0.asset, "NEG");
        assert_eq!(picks[0].1, PositionSide::LongPerp);
        assert_eq!(picks.len(), 2);

        // Flip the extremes: the short bucket wins.
        let spreads = vec![
            spread("POS", 0.02, 0.0, None),
            spread("NEG", -0.01, 0.0, None),
        ];
        let picks = select_candidates(Strategy::RegimeAdaptive, &cfg, &spreads);
        assert_eq!(picks[0].0.asset, "POS");
        assert_eq!(picks[0].1, PositionSide::ShortPerp);
    }

    #[test]
    fn exit_rules_per_strategy() {
        let empty = serde_json::json!({});

        // negative_fade exits once funding recovers above the threshold.
        let cfg = StrategyConfig::parse(Strategy::NegativeFade, &empty);
        let recovered = spread("A", -0.005, 0.0, None);
        assert!(should_exit(
            Strategy::NegativeFade,
            &cfg,
            PositionSide::LongPerp,
            &recovered
        ));
        let still_deep = spread("A", -0.05, 0.0, None);
        assert!(!should_exit(
            Strategy::NegativeFade,
            &cfg,
            PositionSide::LongPerp,
            &still_deep
        ));

        // regime_adaptive exit is side-dependent.
        let cfg = StrategyConfig::parse(Strategy::RegimeAdaptive, &empty);
        let mildly_positive = spread("A", 0.0002, 0.0, None);
        assert!(should_exit(
            Strategy::RegimeAdaptive,
            &cfg,
            PositionSide::LongPerp,
            &mildly_positive
        ));
        assert!(!should_exit(
            Strategy::RegimeAdaptive,
            &cfg,
            PositionSide::ShortPerp,
            &mildly_positive
        ));

        // Spread strategies exit when the spread collapses.
        let cfg = StrategyConfig::parse(Strategy::Aggressive, &empty);
        let collapsed = spread("A", 0.001, 0.005, None);
        assert!(should_exit(
            Strategy::Aggressive,
            &cfg,
            PositionSide::ShortPerp,
            &collapsed
        ));
        let wide = spread("A", 0.001, 0.05, None);
        assert!(!should_exit(
            Strategy::Aggressive,
            &cfg,
            PositionSide::ShortPerp,
            &wide
        ));
    }
}
