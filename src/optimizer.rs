use crate::config::{clamp_sample_count, DEFAULT_OPTIMIZER_SAMPLES, RATIO_EPSILON, RISK_FREE_RATE, TRADING_DAYS};
use crate::metrics::{max_drawdown, sample_covariance, sample_std};
use crate::prices::PriceTable;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp1};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

// ──────────────────────────────────────────────────────────────────────────────
// Configuration
// ──────────────────────────────────────────────────────────────────────────────

/// What the optimizer ranks sampled portfolios by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Objective {
    SharpeRatio,
    SortinoRatio,
    AnnualizedReturn,
    MinimumVolatility,
    CalmarRatio,
    SortinoPlusCalmar,
    /// Pick the portfolio whose beta to the market is closest to 1.0.
    Beta,
}

impl Objective {
    pub const ALL: [Objective; 7] = [
        Objective::SharpeRatio,
        Objective::SortinoRatio,
        Objective::AnnualizedReturn,
        Objective::MinimumVolatility,
        Objective::CalmarRatio,
        Objective::SortinoPlusCalmar,
        Objective::Beta,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::SharpeRatio => "Sharpe Ratio",
            Self::SortinoRatio => "Sortino Ratio",
            Self::AnnualizedReturn => "Annualized Return",
            Self::MinimumVolatility => "Minimum Volatility",
            Self::CalmarRatio => "Calmar Ratio",
            Self::SortinoPlusCalmar => "Sortino + Calmar",
            Self::Beta => "Beta (closest to 1)",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct OptimizerConfig {
    pub samples: usize,
    /// Annual risk-free rate as a fraction.
    pub risk_free_rate: f64,
    pub objective: Objective,
    pub trading_days: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            samples: DEFAULT_OPTIMIZER_SAMPLES,
            risk_free_rate: RISK_FREE_RATE,
            objective: Objective::SharpeRatio,
            trading_days: TRADING_DAYS,
        }
    }
}

impl OptimizerConfig {
    pub fn new(objective: Objective, samples: usize, risk_free_rate: f64) -> Self {
        Self {
            samples: clamp_sample_count(samples),
            risk_free_rate,
            objective,
            ..Self::default()
        }
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Data Structures
// ──────────────────────────────────────────────────────────────────────────────

/// One sampled allocation and its backtested statistics. Returns and risk
/// figures are fractions (0.12 = 12%).
#[derive(Clone, Debug, Serialize)]
pub struct OptimizationSample {
    pub weights: Vec<f64>,
    pub annualized_return: f64,
    pub annualized_volatility: f64,
    pub downside_deviation: f64,
    pub max_drawdown: f64,
    /// Present only under [`Objective::Beta`].
    pub beta: Option<f64>,
    pub objective_value: f64,
}

/// Every sample drawn in one run plus the index of the winner.
#[derive(Clone, Debug, Serialize)]
pub struct OptimizationResult {
    pub tickers: Vec<String>,
    pub objective: Objective,
    pub samples: Vec<OptimizationSample>,
    pub best_index: usize,
}

impl OptimizationResult {
    pub fn best(&self) -> &OptimizationSample {
        &self.samples[self.best_index]
    }

    /// Winning allocation keyed by ticker.
    pub fn best_weights(&self) -> BTreeMap<String, f64> {
        self.tickers
            .iter()
            .cloned()
            .zip(self.best().weights.iter().copied())
            .collect()
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Return Matrix
// ──────────────────────────────────────────────────────────────────────────────

/// Tickers × days matrix of simple daily returns from an aligned table.
///
/// A day is kept only when every ticker has a price on it and on the previous
/// row, so all rows share the same dates.
pub fn daily_return_matrix(prices: &PriceTable) -> (Vec<String>, Vec<Vec<f64>>) {
    let tickers = prices.tickers().to_vec();
    let columns: Vec<&[Option<f64>]> = tickers.iter().filter_map(|t| prices.column(t)).collect();
    let mut matrix = vec![Vec::new(); tickers.len()];

    for row in 1..prices.num_rows() {
        let day: Option<Vec<f64>> = columns
            .iter()
            .map(|c| match (c[row - 1], c[row]) {
                (Some(prev), Some(cur)) if prev > 0.0 => Some(cur / prev - 1.0),
                _ => None,
            })
            .collect();
        if let Some(day) = day {
            for (series, r) in matrix.iter_mut().zip(day) {
                series.push(r);
            }
        }
    }

    (tickers, matrix)
}

// ──────────────────────────────────────────────────────────────────────────────
// Per-Sample Statistics
// ──────────────────────────────────────────────────────────────────────────────

fn portfolio_daily_returns(weights: &[f64], returns: &[Vec<f64>], num_days: usize) -> Vec<f64> {
    (0..num_days)
        .map(|d| weights.iter().zip(returns).map(|(w, r)| w * r[d]).sum())
        .collect()
}

/// Compounded growth annualized on a trading-day clock.
fn compounded_annual_return(daily: &[f64], trading_days: f64) -> f64 {
    if daily.is_empty() {
        return 0.0;
    }
    let growth: f64 = daily.iter().map(|r| 1.0 + r).product();
    if growth <= 0.0 {
        return -1.0;
    }
    growth.powf(trading_days / daily.len() as f64) - 1.0
}

/// Root-mean-square of the negative days only, annualized.
fn downside_deviation(daily: &[f64], trading_days: f64) -> f64 {
    let negatives: Vec<f64> = daily.iter().copied().filter(|r| *r < 0.0).collect();
    if negatives.is_empty() {
        return 0.0;
    }
    let mean_sq = negatives.iter().map(|r| r * r).sum::<f64>() / negatives.len() as f64;
    mean_sq.sqrt() * trading_days.sqrt()
}

fn beta_to_market(sample: &[f64], market: &[f64]) -> f64 {
    let var = sample_std(market).powi(2);
    sample_covariance(sample, market) / (var + RATIO_EPSILON)
}

fn evaluate_sample(
    weights: Vec<f64>,
    returns: &[Vec<f64>],
    market: Option<&[f64]>,
    num_days: usize,
    config: &OptimizerConfig,
) -> OptimizationSample {
    let daily = portfolio_daily_returns(&weights, returns, num_days);
    let ann_ret = compounded_annual_return(&daily, config.trading_days);
    let vol = sample_std(&daily) * config.trading_days.sqrt();
    let down = downside_deviation(&daily, config.trading_days);
    let mdd = max_drawdown(&daily);
    let rf = config.risk_free_rate;

    let sortino = (ann_ret - rf) / (down + RATIO_EPSILON);
    let calmar = ann_ret / (mdd.abs() + RATIO_EPSILON);

    let (objective_value, beta) = match config.objective {
        Objective::SharpeRatio => ((ann_ret - rf) / (vol + RATIO_EPSILON), None),
        Objective::SortinoRatio => (sortino, None),
        Objective::AnnualizedReturn => (ann_ret, None),
        Objective::MinimumVolatility => (vol, None),
        Objective::CalmarRatio => (calmar, None),
        Objective::SortinoPlusCalmar => (sortino * calmar, None),
        Objective::Beta => {
            let b = market.map_or(0.0, |m| beta_to_market(&daily, m));
            (b, Some(b))
        }
    };

    OptimizationSample {
        weights,
        annualized_return: ann_ret,
        annualized_volatility: vol,
        downside_deviation: down,
        max_drawdown: mdd,
        beta,
        objective_value,
    }
}

/// Ranking key where larger is better; NaN sorts last.
fn selection_score(objective: Objective, sample: &OptimizationSample) -> f64 {
    let score = match objective {
        Objective::MinimumVolatility => -sample.objective_value,
        Objective::Beta => -(sample.objective_value - 1.0).abs(),
        _ => sample.objective_value,
    };
    if score.is_nan() { f64::NEG_INFINITY } else { score }
}

/// First index holding the best score, so ties keep the earliest sample.
fn select_best(objective: Objective, samples: &[OptimizationSample]) -> usize {
    let mut best_index = 0;
    let mut best_score = f64::NEG_INFINITY;
    for (i, sample) in samples.iter().enumerate() {
        let score = selection_score(objective, sample);
        if i == 0 || score > best_score {
            best_score = score;
            best_index = i;
        }
    }
    best_index
}

// ──────────────────────────────────────────────────────────────────────────────
// Optimizer: Monte Carlo Dirichlet Sampling
// ──────────────────────────────────────────────────────────────────────────────

/// Draws a weight vector from the flat Dirichlet distribution over `n` assets
/// (normalized unit exponentials), so weights are non-negative and sum to 1.
pub fn generate_random_weights(n: usize, rng: &mut impl Rng) -> Vec<f64> {
    let raw: Vec<f64> = (0..n).map(|_| Exp1.sample(rng)).collect();
    let sum: f64 = raw.iter().sum();
    if sum <= 0.0 {
        return vec![1.0 / n as f64; n];
    }
    raw.iter().map(|v| v / sum).collect()
}

/// Random-search allocation over `tickers`.
///
/// `returns` holds one row of daily returns per ticker (rows are truncated to
/// the shortest). `market` supplies benchmark returns for
/// [`Objective::Beta`]; without it the equal-weight basket of the tickers is
/// used. All weights are drawn from `rng` up front and scored in parallel, so
/// a seeded `rng` gives the same result every run.
///
/// Returns `None` when there are no tickers or no common days.
pub fn optimize(
    tickers: &[String],
    returns: &[Vec<f64>],
    market: Option<&[f64]>,
    config: &OptimizerConfig,
    rng: &mut impl Rng,
) -> Option<OptimizationResult> {
    let n = tickers.len().min(returns.len());
    if n == 0 {
        warn!("Optimizer called without tickers");
        return None;
    }
    if tickers.len() != returns.len() {
        warn!(
            "Optimizer got {} tickers but {} return rows; using the first {}",
            tickers.len(),
            returns.len(),
            n
        );
    }
    let returns = &returns[..n];

    let mut num_days = returns.iter().map(Vec::len).min().unwrap_or(0);
    let basket: Vec<f64>;
    let market = match (config.objective, market) {
        (Objective::Beta, Some(m)) => {
            num_days = num_days.min(m.len());
            Some(m)
        }
        (Objective::Beta, None) => {
            warn!("Beta objective without a market series; using the equal-weight basket");
            basket = portfolio_daily_returns(&vec![1.0 / n as f64; n], returns, num_days);
            Some(basket.as_slice())
        }
        _ => None,
    };
    if num_days == 0 {
        warn!("Optimizer has no overlapping return days");
        return None;
    }
    let market = market.map(|m| &m[..num_days]);

    let samples = config.samples.max(1);
    info!(
        "Optimizing {} assets over {} days, {} random samples, objective={}",
        n,
        num_days,
        samples,
        config.objective.label()
    );

    let draws: Vec<Vec<f64>> = (0..samples).map(|_| generate_random_weights(n, rng)).collect();
    let evaluated: Vec<OptimizationSample> = draws
        .into_par_iter()
        .map(|w| evaluate_sample(w, returns, market, num_days, config))
        .collect();

    let best_index = select_best(config.objective, &evaluated);
    debug!(
        "Best sample #{} objective={:.6}",
        best_index, evaluated[best_index].objective_value
    );

    Some(OptimizationResult {
        tickers: tickers[..n].to_vec(),
        objective: config.objective,
        samples: evaluated,
        best_index,
    })
}

/// [`optimize`] with a freshly seeded generator; results differ run to run.
pub fn optimize_unseeded(
    tickers: &[String],
    returns: &[Vec<f64>],
    market: Option<&[f64]>,
    config: &OptimizerConfig,
) -> Option<OptimizationResult> {
    let mut rng = StdRng::from_entropy();
    optimize(tickers, returns, market, config, &mut rng)
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────
