use rayon::ThreadPoolBuilder;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

/// Starting capital for every valuation unless the caller overrides it.
pub const DEFAULT_INITIAL_INVESTMENT: f64 = 10_000.0;

/// Annual risk-free rate used by Sharpe/Sortino (fraction, not percent).
pub const RISK_FREE_RATE: f64 = 0.03;

/// Trading days per year, used to annualize daily statistics.
pub const TRADING_DAYS: f64 = 252.0;

/// Calendar days per year, used only by total-return annualization.
pub const CALENDAR_DAYS: f64 = 365.0;

/// Number of random portfolios sampled by the optimizer.
pub const DEFAULT_OPTIMIZER_SAMPLES: usize = 5_000;
pub const MIN_OPTIMIZER_SAMPLES: usize = 100;
pub const MAX_OPTIMIZER_SAMPLES: usize = 20_000;

/// Additive guard for optimizer ratio denominators.
pub const RATIO_EPSILON: f64 = 1e-12;

/// Tickers requested per network round-trip (keeps the chart API from rate limiting).
pub const FETCH_BATCH_SIZE: usize = 5;

/// Cached price responses older than this are refetched.
pub const CACHE_TTL_SECS: u64 = 24 * 3600;

/// Portfolios offered when no registry file is supplied.
pub const DEFAULT_PORTFOLIOS: &[(&str, &[(&str, f64)])] = &[
    ("Balanced 60/40", &[("SPY", 0.6), ("AGG", 0.4)]),
    ("S&P500", &[("VOO", 1.0)]),
];

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

/// Caller-tunable knobs shared by valuation, risk metrics and the optimizer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnalyticsConfig {
    pub initial_investment: f64,
    pub risk_free_rate: f64,
    pub trading_days: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            initial_investment: DEFAULT_INITIAL_INVESTMENT,
            risk_free_rate: RISK_FREE_RATE,
            trading_days: TRADING_DAYS,
        }
    }
}

impl AnalyticsConfig {
    /// Defaults overlaid with `AUTOINVEST_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_f64("AUTOINVEST_INITIAL_INVESTMENT", |v| v > 0.0) {
            cfg.initial_investment = v;
        }
        if let Some(v) = env_f64("AUTOINVEST_RISK_FREE_RATE", |v| v.is_finite()) {
            cfg.risk_free_rate = v;
        }
        if let Some(v) = env_f64("AUTOINVEST_TRADING_DAYS", |v| v >= 1.0) {
            cfg.trading_days = v;
        }
        cfg
    }
}

fn env_f64(key: &str, valid: impl Fn(f64) -> bool) -> Option<f64> {
    parse_f64_setting(key, std::env::var(key).ok().as_deref(), valid)
}

fn parse_f64_setting(key: &str, raw: Option<&str>, valid: impl Fn(f64) -> bool) -> Option<f64> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && valid(v) => Some(v),
        _ => {
            warn!("Ignoring invalid {}={} ; keeping default", key, trimmed);
            None
        }
    }
}

/// Clamps a requested sample count into the supported range.
pub fn clamp_sample_count(requested: usize) -> usize {
    let clamped = requested.clamp(MIN_OPTIMIZER_SAMPLES, MAX_OPTIMIZER_SAMPLES);
    if clamped != requested {
        warn!(
            "Optimizer sample count {} outside [{}, {}]; using {}",
            requested, MIN_OPTIMIZER_SAMPLES, MAX_OPTIMIZER_SAMPLES, clamped
        );
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_constants() {
        let cfg = AnalyticsConfig::default();
        assert_eq!(cfg.initial_investment, 10_000.0);
        assert_eq!(cfg.risk_free_rate, 0.03);
        assert_eq!(cfg.trading_days, 252.0);
    }

    #[test]
    fn test_sample_count_is_clamped() {
        assert_eq!(clamp_sample_count(5), MIN_OPTIMIZER_SAMPLES);
        assert_eq!(clamp_sample_count(1_000_000), MAX_OPTIMIZER_SAMPLES);
        assert_eq!(clamp_sample_count(5_000), 5_000);
    }

    #[test]
    fn test_f64_setting_rejects_garbage() {
        let key = "AUTOINVEST_RISK_FREE_RATE";
        assert_eq!(parse_f64_setting(key, Some("abc"), |_| true), None);
        assert_eq!(parse_f64_setting(key, Some(" 2.5 "), |_| true), Some(2.5));
        assert_eq!(parse_f64_setting(key, Some(" 2.5 "), |v| v > 10.0), None);
        assert_eq!(parse_f64_setting(key, Some("inf"), |_| true), None);
        assert_eq!(parse_f64_setting(key, Some("   "), |_| true), None);
        assert_eq!(parse_f64_setting(key, None, |_| true), None);
    }
}
