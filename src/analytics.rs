// =============================================================================
// Analytics — annualized Sharpe + max drawdown over equity series
// =============================================================================
//
// Input is an hourly equity snapshot series, so the Sharpe annualization
// factor is sqrt(8760). Standard deviation is the sample form (n-1).

/// Hours in a (non-leap) year.
const HOURS_PER_YEAR: f64 = 8760.0;

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskMetrics {
    pub sharpe: Option<f64>,
    pub max_drawdown: Option<f64>,
}

impl RiskMetrics {
    fn none() -> Self {
        Self {
            sharpe: None,
            max_drawdown: None,
        }
    }
}

/// Compute both metrics from a value series.
///
/// Fewer than 2 values, or fewer than 2 valid returns, yields `None` for
/// both. A zero standard deviation yields `None` for Sharpe only. Max
/// drawdown is negative (e.g. -0.05 for a 5% peak-to-trough decline),
/// rounded to 5 decimals.
pub fn compute_sharpe_and_drawdown(values: &[f64]) -> RiskMetrics {
    if values.len() < 2 {
        return RiskMetrics::none();
    }

    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    if returns.len() < 2 {
        return RiskMetrics::none();
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();

    let sharpe = if std == 0.0 {
        None
    } else {
        Some(mean / std * HOURS_PER_YEAR.sqrt())
    };

    let mut peak = values[0];
    let mut max_dd = 0.0_f64;
    for &v in values {
        if v > peak {
            peak = v;
        } else if peak > 0.0 {
            max_dd = max_dd.max((peak - v) / peak);
        }
    }

    RiskMetrics {
        sharpe,
        max_drawdown: Some(round5(-max_dd)),
    }
}

fn round5(x: f64) -> f64 {
    (x * 100_000.0).round() / 100_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fewer_than_two_values_yields_none() {
        assert_eq!(compute_sharpe_and_drawdown(&[]), RiskMetrics::none());
        assert_eq!(compute_sharpe_and_drawdown(&[10_000.0]), RiskMetrics::none());
    }

    #[test]
    fn nonpositive_predecessors_produce_no_returns() {
        // Both windows start at a non-positive value: no valid returns.
        let metrics = compute_sharpe_and_drawdown(&[0.0, 0.0, 100.0]);
        assert_eq!(metrics, RiskMetrics::none());
    }

    #[test]
    fn flat_series_has_null_sharpe_but_zero_drawdown() {
        let metrics = compute_sharpe_and_drawdown(&[100.0, 100.0, 100.0]);
        assert_eq!(metrics.sharpe, None);
        assert_eq!(metrics.max_drawdown, Some(0.0));
    }

    #[test]
    fn known_series_matches_expected_metrics() {
        let values = [10_000.0, 10_100.0, 10_050.0, 10_200.0, 10_150.0];
        let metrics = compute_sharpe_and_drawdown(&values);

        // Deepest drawdown is 50/10100, not 50/10200.
        assert_eq!(metrics.max_drawdown, Some(-0.00495));

        // (mean/std) * sqrt(8760) over the four hourly returns.
        let sharpe = metrics.sharpe.unwrap();
        assert!((sharpe - 34.45).abs() < 0.05, "sharpe = {sharpe}");
    }

    #[test]
    fn drawdown_stays_within_bounds() {
        let metrics = compute_sharpe_and_drawdown(&[100.0, 1.0, 0.5]);
        let dd = metrics.max_drawdown.unwrap();
        assert!((-1.0..=0.0).contains(&dd));
    }

    #[test]
    fn monotonic_rise_has_zero_drawdown() {
        let metrics = compute_sharpe_and_drawdown(&[100.0, 110.0, 125.0]);
        assert_eq!(metrics.max_drawdown, Some(0.0));
        assert!(metrics.sharpe.unwrap() > 0.0);
    }
}
