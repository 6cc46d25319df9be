use crate::annualize::{annualized_return, total_return_pct};
use crate::config::AnalyticsConfig;
use crate::metrics::{risk_metrics_with_factor, sample_covariance, sample_std, RiskMetricSet};
use crate::prices::PriceTable;
use crate::valuation::{normalized_weights, series_values, value_and_returns, ValueSeries, WeightMap};
use serde::Serialize;
use tracing::{info, warn};

/// Backtest summary for one named portfolio. Percent fields are already
/// multiplied by 100; ratios and drawdown are raw fractions.
#[derive(Clone, Debug, Serialize)]
pub struct PortfolioReport {
    pub name: String,
    pub total_return_pct: f64,
    pub annualized_return_pct: f64,
    pub risk: RiskMetricSet,
    pub average_volatility_pct: f64,
    /// `annualized_return_pct * (sharpe + sortino) / 2`.
    pub raw_score: f64,
    /// Raw score min-max scaled to 0..=100 across the compared set.
    pub performance_score: f64,
    /// Weights actually applied, renormalized over tickers with data.
    pub allocation: Vec<(String, f64)>,
    pub values: ValueSeries,
}

/// Backtests each named portfolio against the shared price table.
///
/// Portfolios with no usable data are left out of the result.
pub fn compare_portfolios(
    prices: &PriceTable,
    portfolios: &[(String, WeightMap)],
    config: &AnalyticsConfig,
) -> Vec<PortfolioReport> {
    let mut reports = Vec::with_capacity(portfolios.len());

    for (name, weights) in portfolios {
        let available: Vec<String> = weights.keys().filter(|t| prices.contains(t)).cloned().collect();
        if available.is_empty() {
            warn!("{}: none of its tickers have price data, skipped", name);
            continue;
        }
        let sub_prices = prices.select(&available);
        let (values, returns) = value_and_returns(&sub_prices, weights, config.initial_investment);
        let (Some(first), Some(last)) = (values.first(), values.last()) else {
            warn!("{}: valuation produced no data, skipped", name);
            continue;
        };

        let total_ret = total_return_pct(first.value, last.value);
        let days = (last.date - first.date).num_days();
        let ann_ret = annualized_return(total_ret, days);
        let risk = risk_metrics_with_factor(&series_values(&returns), config.risk_free_rate, config.trading_days);
        let raw_score = ann_ret * (risk.sharpe_ratio + risk.sortino_ratio) / 2.0;

        info!(
            "{}: total={:.2}% annualized={:.2}% sharpe={:.2} sortino={:.2} mdd={:.2}%",
            name,
            total_ret,
            ann_ret,
            risk.sharpe_ratio,
            risk.sortino_ratio,
            risk.max_drawdown * 100.0
        );

        reports.push(PortfolioReport {
            name: name.clone(),
            total_return_pct: total_ret,
            annualized_return_pct: ann_ret,
            risk,
            average_volatility_pct: risk.annualized_volatility * 100.0,
            raw_score,
            performance_score: 0.0,
            allocation: normalized_weights(&sub_prices, weights),
            values,
        });
    }

    assign_performance_scores(&mut reports);
    reports
}

fn assign_performance_scores(reports: &mut [PortfolioReport]) {
    let min = reports.iter().map(|r| r.raw_score).fold(f64::INFINITY, f64::min);
    let max = reports.iter().map(|r| r.raw_score).fold(f64::NEG_INFINITY, f64::max);
    for report in reports.iter_mut() {
        report.performance_score = if max > min {
            (report.raw_score - min) / (max - min) * 100.0
        } else {
            100.0
        };
    }
}

/// Pairwise Pearson correlation of daily returns between tickers.
#[derive(Clone, Debug, Serialize)]
pub struct CorrelationMatrix {
    pub tickers: Vec<String>,
    pub values: Vec<Vec<f64>>,
}

/// Correlation of day-over-day returns for every ticker pair in `prices`.
///
/// Each pair uses the days on which both tickers have a return. The diagonal
/// is 1.0; a pair with too little overlap or no variance reports 0.0.
pub fn correlation_matrix(prices: &PriceTable) -> CorrelationMatrix {
    let tickers = prices.tickers().to_vec();
    let returns: Vec<Vec<Option<f64>>> = tickers
        .iter()
        .filter_map(|t| prices.column(t))
        .map(|column| {
            column
                .windows(2)
                .map(|w| match (w[0], w[1]) {
                    (Some(prev), Some(cur)) if prev > 0.0 => Some(cur / prev - 1.0),
                    _ => None,
                })
                .collect()
        })
        .collect();

    let n = tickers.len();
    let mut values = vec![vec![0.0; n]; n];
    for i in 0..n {
        values[i][i] = 1.0;
        for j in (i + 1)..n {
            let (x, y): (Vec<f64>, Vec<f64>) = returns[i]
                .iter()
                .zip(&returns[j])
                .filter_map(|(a, b)| Some(((*a)?, (*b)?)))
                .unzip();
            let denom = sample_std(&x) * sample_std(&y);
            let corr = if denom > 0.0 {
                (sample_covariance(&x, &y) / denom).clamp(-1.0, 1.0)
            } else {
                0.0
            };
            values[i][j] = corr;
            values[j][i] = corr;
        }
    }

    CorrelationMatrix { tickers, values }
}
