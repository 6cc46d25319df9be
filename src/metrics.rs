//! Return-series risk statistics.
//!
//! Standard deviations are sample deviations (n - 1 denominator). Anything
//! undefined for short or flat input collapses to 0.0 so callers never see
//! NaN.

use crate::config::{RISK_FREE_RATE, TRADING_DAYS};
use serde::Serialize;

/// Headline risk figures for one return series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct RiskMetricSet {
    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub annualized_volatility: f64,
    pub max_drawdown: f64,
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation; 0.0 for fewer than two observations.
pub fn sample_std(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    variance.sqrt()
}

/// Sample covariance over the common prefix of `x` and `y`.
pub fn sample_covariance(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return 0.0;
    }
    let (x, y) = (&x[..n], &y[..n]);
    let mx = mean(x);
    let my = mean(y);
    x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum::<f64>() / (n as f64 - 1.0)
}

/// Worst peak-to-trough decline of the compounded wealth curve.
///
/// Wealth starts at 1.0 before the first return, so a loss on day one counts
/// as a drawdown. Result is in `[-1.0, 0.0]`.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut wealth = 1.0_f64;
    let mut peak = 1.0_f64;
    let mut worst = 0.0_f64;
    for r in returns {
        wealth *= 1.0 + r;
        if wealth > peak {
            peak = wealth;
        }
        if peak > 0.0 {
            let drawdown = wealth / peak - 1.0;
            if drawdown < worst {
                worst = drawdown;
            }
        }
    }
    worst.max(-1.0)
}

/// Sharpe, Sortino, volatility and drawdown of a daily return series.
pub fn risk_metrics(returns: &[f64], risk_free_annual: f64) -> RiskMetricSet {
    risk_metrics_with_factor(returns, risk_free_annual, TRADING_DAYS)
}

/// [`risk_metrics`] at the default 3% risk-free rate.
pub fn default_risk_metrics(returns: &[f64]) -> RiskMetricSet {
    risk_metrics(returns, RISK_FREE_RATE)
}

pub fn risk_metrics_with_factor(returns: &[f64], risk_free_annual: f64, ann_factor: f64) -> RiskMetricSet {
    if returns.is_empty() {
        return RiskMetricSet::default();
    }

    let sqrt_f = ann_factor.sqrt();
    let std = sample_std(returns);
    let annualized_volatility = std * sqrt_f;

    let excess = mean(returns) - risk_free_annual / ann_factor;
    let sharpe_ratio = if std > 0.0 { excess / std * sqrt_f } else { 0.0 };

    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    let downside_deviation = if downside.is_empty() {
        0.0
    } else {
        sample_std(&downside) * sqrt_f
    };
    // downside_deviation is already annualized; sqrt(F) is applied once more.
    let sortino_ratio = if downside_deviation > 0.0 {
        excess / downside_deviation * sqrt_f
    } else {
        0.0
    };

    RiskMetricSet {
        sharpe_ratio: finite_or_zero(sharpe_ratio),
        sortino_ratio: finite_or_zero(sortino_ratio),
        annualized_volatility: finite_or_zero(annualized_volatility),
        max_drawdown: finite_or_zero(max_drawdown(returns)),
    }
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_empty_returns_all_zero() {
        assert_eq!(risk_metrics(&[], 0.03), RiskMetricSet::default());
    }

    #[test]
    fn test_constant_returns_have_zero_ratios() {
        let flat = vec![0.0; 20];
        let m = risk_metrics(&flat, 0.03);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.sortino_ratio, 0.0);
        assert_eq!(m.annualized_volatility, 0.0);
        assert_eq!(m.max_drawdown, 0.0);

        let steady = vec![0.0078125; 20];
        let m = risk_metrics(&steady, 0.03);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.sortino_ratio, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
    }

    #[test]
    fn test_single_return_is_finite() {
        let m = risk_metrics(&[-0.02], 0.03);
        assert_eq!(m.annualized_volatility, 0.0);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.sortino_ratio, 0.0);
        assert_relative_eq!(m.max_drawdown, -0.02, epsilon = 1e-12);
    }

    #[test]
    fn test_sharpe_and_volatility_match_hand_computation() {
        let returns = [0.01, -0.02, 0.03, 0.005, -0.01];
        let m = risk_metrics(&returns, 0.03);

        let mu = 0.003;
        let std = sample_std(&returns);
        let expected_sharpe = (mu - 0.03 / 252.0) / std * 252f64.sqrt();
        assert_relative_eq!(m.annualized_volatility, std * 252f64.sqrt(), epsilon = 1e-12);
        assert_relative_eq!(m.sharpe_ratio, expected_sharpe, epsilon = 1e-9);

        let downside_dev = sample_std(&[-0.02, -0.01]) * 252f64.sqrt();
        let expected_sortino = (mu - 0.03 / 252.0) / downside_dev * 252f64.sqrt();
        assert_relative_eq!(m.sortino_ratio, expected_sortino, epsilon = 1e-9);
    }

    #[test]
    fn test_noisy_uptrend_has_large_positive_ratios() {
        let returns = [0.10, -0.002, 0.11, 0.10, -0.001, 0.10];
        let m = risk_metrics(&returns, 0.03);
        assert!(m.sharpe_ratio.is_finite() && m.sharpe_ratio > 10.0);
        assert!(m.sortino_ratio.is_finite() && m.sortino_ratio > 10.0);
    }

    #[test]
    fn test_max_drawdown_bounds_and_trough() {
        // 100 -> 50 -> 100
        assert_relative_eq!(max_drawdown(&[-0.5, 1.0]), -0.5, epsilon = 1e-12);
        assert_eq!(max_drawdown(&[0.1, 0.1]), 0.0);
        assert_eq!(max_drawdown(&[]), 0.0);

        let crash = max_drawdown(&[0.2, -1.0, 0.5]);
        assert!((-1.0..=0.0).contains(&crash));
        assert_relative_eq!(crash, -1.0, epsilon = 1e-12);

        // Peak at 1.2, trough at 1.2 * 0.5 * 0.9
        let dd = max_drawdown(&[0.2, -0.5, -0.1, 0.3]);
        assert_relative_eq!(dd, 0.45 - 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_covariance_of_series_with_itself_is_variance() {
        let x = [0.01, 0.02, -0.01, 0.03];
        assert_relative_eq!(sample_covariance(&x, &x), sample_std(&x).powi(2), epsilon = 1e-15);
        assert_eq!(sample_covariance(&[1.0], &[2.0]), 0.0);
    }
}
