use anyhow::{anyhow, Result};
use autoinvest::comparison::{compare_portfolios, correlation_matrix, PortfolioReport};
use autoinvest::config::{self, AnalyticsConfig, DEFAULT_OPTIMIZER_SAMPLES, DEFAULT_PORTFOLIOS};
use autoinvest::data::PriceSource;
use autoinvest::prices::PriceTable;
use autoinvest::optimizer::{daily_return_matrix, optimize, Objective, OptimizationResult, OptimizerConfig};
use autoinvest::valuation::{weight_map, WeightMap};
use chrono::{Duration, Local, NaiveDate};
use clap::{Parser, ValueEnum};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ObjectiveChoice {
    Sharpe,
    Sortino,
    Return,
    MinVol,
    Calmar,
    SortinoCalmar,
    Beta,
}

impl From<ObjectiveChoice> for Objective {
    fn from(choice: ObjectiveChoice) -> Self {
        match choice {
            ObjectiveChoice::Sharpe => Objective::SharpeRatio,
            ObjectiveChoice::Sortino => Objective::SortinoRatio,
            ObjectiveChoice::Return => Objective::AnnualizedReturn,
            ObjectiveChoice::MinVol => Objective::MinimumVolatility,
            ObjectiveChoice::Calmar => Objective::CalmarRatio,
            ObjectiveChoice::SortinoCalmar => Objective::SortinoPlusCalmar,
            ObjectiveChoice::Beta => Objective::Beta,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "AutoInvest: backtest weighted portfolios and search for better allocations",
    after_help = "EXAMPLES:
    # Compare the built-in portfolios over the last year
    cargo run --release -- --backtest

    # Compare custom portfolios over a fixed window
    cargo run --release -- --backtest --portfolio \"Tech=QQQ:0.7,TLT:0.3\" --start 2022-01-01 --end 2024-12-31

    # Random-search the max-Sortino allocation, reproducibly
    cargo run --release -- --optimize NVDA,MSFT,AAPL,TLT --objective sortino --seed 42

    # Use local JSON price files instead of the network
    cargo run --release -- --backtest --data-dir ./data"
)]
struct Args {
    /// Backtest and compare portfolios
    #[arg(long)]
    backtest: bool,

    /// Run the random-search optimizer over comma-separated tickers (e.g. SPY,AGG,GLD)
    #[arg(long)]
    optimize: Option<String>,

    /// List the portfolios in the registry and exit
    #[arg(long)]
    list: bool,

    /// Portfolio definition NAME=TICKER:WEIGHT,... (repeatable). Replaces the registry selection.
    #[arg(long = "portfolio")]
    portfolios: Vec<String>,

    /// JSON registry of named portfolios: {"name": {"TICKER": weight}}
    #[arg(long)]
    registry: Option<PathBuf>,

    /// Start date (YYYY-MM-DD). Defaults to one year before --end.
    #[arg(long)]
    start: Option<NaiveDate>,

    /// End date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    end: Option<NaiveDate>,

    /// Read prices from <DIR>/<TICKER>.json instead of the network
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Starting capital for valuation
    #[arg(long)]
    initial: Option<f64>,

    /// Annual risk-free rate as a fraction (0.03 = 3%)
    #[arg(long)]
    risk_free: Option<f64>,

    /// Number of random portfolios to sample (100..=20000)
    #[arg(long, default_value_t = DEFAULT_OPTIMIZER_SAMPLES)]
    samples: usize,

    /// Optimizer objective
    #[arg(long, value_enum, default_value_t = ObjectiveChoice::Sharpe)]
    objective: ObjectiveChoice,

    /// Benchmark ticker for the beta objective (defaults to an equal-weight basket)
    #[arg(long)]
    benchmark: Option<String>,

    /// Seed for reproducible optimizer runs
    #[arg(long)]
    seed: Option<u64>,

    /// Print results as JSON instead of tables
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    config::init_cpu_parallelism();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("autoinvest=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    let args = Args::parse();

    let mut analytics = AnalyticsConfig::from_env();
    if let Some(initial) = args.initial {
        if initial <= 0.0 {
            error!("--initial must be > 0");
            return Ok(());
        }
        analytics.initial_investment = initial;
    }
    if let Some(rf) = args.risk_free {
        analytics.risk_free_rate = rf;
    }

    let (start, end) = match resolve_dates(args.start, args.end) {
        Ok(range) => range,
        Err(e) => {
            error!("{}", e);
            return Ok(());
        }
    };

    let source = match &args.data_dir {
        Some(dir) => PriceSource::local(dir),
        None => PriceSource::from_env(),
    };

    let registry = match load_registry(args.registry.as_deref()) {
        Ok(r) => r,
        Err(e) => {
            error!("Failed to load portfolio registry: {}", e);
            return Ok(());
        }
    };

    if args.list {
        print_registry(&registry);
        return Ok(());
    }

    if let Some(ref symbols_str) = args.optimize {
        let tickers: Vec<String> = symbols_str
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if tickers.is_empty() {
            error!("Optimization requires at least 1 ticker. Example: --optimize SPY,AGG,GLD");
            return Ok(());
        }
        let opt_config = OptimizerConfig {
            trading_days: analytics.trading_days,
            ..OptimizerConfig::new(args.objective.into(), args.samples, analytics.risk_free_rate)
        };
        match run_optimizer(&source, &tickers, args.benchmark.as_deref(), start, end, &opt_config, args.seed).await {
            Ok(Some(result)) => {
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else {
                    print_optimization(&result);
                }
            }
            Ok(None) => warn!("No price data available for optimization."),
            Err(e) => error!("Optimization failed: {}", e),
        }
        return Ok(());
    }

    if args.backtest {
        let selected = if args.portfolios.is_empty() {
            registry
        } else {
            match args.portfolios.iter().map(|p| parse_portfolio_arg(p)).collect::<Result<Vec<_>>>() {
                Ok(p) => p,
                Err(e) => {
                    error!("{}", e);
                    return Ok(());
                }
            }
        };
        info!("Backtesting from {} to {}", start, end);
        match run_backtest(&source, &selected, start, end, &analytics).await {
            Ok(reports) if reports.is_empty() => warn!("No price data available."),
            Ok(reports) => {
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&reports)?);
                } else {
                    print_reports(&reports);
                }
            }
            Err(e) => error!("Backtest failed: {}", e),
        }
        return Ok(());
    }

    error!("Nothing to do. Pass --backtest, --optimize or --list (see --help).");
    Ok(())
}

fn resolve_dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(NaiveDate, NaiveDate)> {
    let end = end.unwrap_or_else(|| Local::now().date_naive());
    let start = start.unwrap_or(end - Duration::days(365));
    if start > end {
        return Err(anyhow!("Start date {} cannot be after end date {}.", start, end));
    }
    Ok((start, end))
}

/// Parses `NAME=TICKER:WEIGHT,TICKER:WEIGHT`.
fn parse_portfolio_arg(raw: &str) -> Result<(String, WeightMap)> {
    let (name, assets) = raw
        .split_once('=')
        .ok_or(anyhow!("Invalid portfolio '{}', expected NAME=TICKER:WEIGHT,...", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(anyhow!("Portfolio '{}' has no name", raw));
    }

    let mut pairs = Vec::new();
    for asset in assets.split(',').map(str::trim).filter(|a| !a.is_empty()) {
        let (ticker, weight) = asset
            .split_once(':')
            .ok_or(anyhow!("Invalid asset '{}' in portfolio {}, expected TICKER:WEIGHT", asset, name))?;
        let weight = weight
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("Invalid weight '{}' for {} in portfolio {}", weight.trim(), ticker.trim(), name))?;
        if !weight.is_finite() || weight < 0.0 {
            return Err(anyhow!("Weight for {} in portfolio {} must be >= 0", ticker.trim(), name));
        }
        pairs.push((ticker.to_string(), weight));
    }
    if pairs.is_empty() {
        return Err(anyhow!("Portfolio {} needs at least one asset", name));
    }
    Ok((name.to_string(), weight_map(pairs)))
}

fn load_registry(path: Option<&Path>) -> Result<Vec<(String, WeightMap)>> {
    let Some(path) = path else {
        return Ok(DEFAULT_PORTFOLIOS
            .iter()
            .map(|(name, assets)| (name.to_string(), weight_map(assets.iter().copied())))
            .collect());
    };
    let file = std::fs::File::open(path).map_err(|e| anyhow!("{}: {}", path.display(), e))?;
    let reader = std::io::BufReader::new(file);
    let raw: BTreeMap<String, BTreeMap<String, f64>> = serde_json::from_reader(reader)?;
    Ok(raw
        .into_iter()
        .map(|(name, assets)| (name, weight_map(assets)))
        .collect())
}

async fn run_backtest(
    source: &PriceSource,
    portfolios: &[(String, WeightMap)],
    start: NaiveDate,
    end: NaiveDate,
    analytics: &AnalyticsConfig,
) -> Result<Vec<PortfolioReport>> {
    let tickers: Vec<String> = portfolios
        .iter()
        .flat_map(|(_, w)| w.keys().cloned())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    let prices = source.price_table(&tickers, start, end).await?;
    if prices.is_empty() {
        return Ok(Vec::new());
    }

    let reports = compare_portfolios(&prices, portfolios, analytics);
    for report in &reports {
        let held: Vec<String> = report.allocation.iter().map(|(t, _)| t.clone()).collect();
        let corr = correlation_matrix(&prices.select(&held));
        for (i, a) in corr.tickers.iter().enumerate() {
            for (j, b) in corr.tickers.iter().enumerate().skip(i + 1) {
                info!("{}: corr({}, {}) = {:.2}", report.name, a, b, corr.values[i][j]);
            }
        }
    }
    Ok(reports)
}

/// Asset return rows and the optional market row for the optimizer.
///
/// Without a benchmark the asset rows come from the assets' own prices, so a
/// sparse benchmark never narrows their window. With one, all rows share the
/// days on which the assets and the benchmark all trade.
fn optimizer_inputs(
    prices: &PriceTable,
    tickers: &[String],
    benchmark: Option<&str>,
) -> (Vec<String>, Vec<Vec<f64>>, Option<Vec<f64>>) {
    let market_available = benchmark.is_some_and(|b| prices.contains(b));
    if benchmark.is_some() && !market_available {
        warn!("Benchmark has no price data; beta falls back to the equal-weight basket");
    }
    let benchmark = benchmark.filter(|_| market_available);

    let mut wanted = tickers.to_vec();
    if let Some(b) = benchmark {
        wanted.push(b.to_string());
    }
    let (all_tickers, matrix) = daily_return_matrix(&prices.select(&wanted));

    let mut market = None;
    let mut opt_tickers = Vec::new();
    let mut opt_returns = Vec::new();
    for (ticker, row) in all_tickers.into_iter().zip(matrix) {
        if benchmark == Some(ticker.as_str()) {
            market = Some(row.clone());
        }
        if tickers.contains(&ticker) {
            opt_tickers.push(ticker);
            opt_returns.push(row);
        }
    }
    (opt_tickers, opt_returns, market)
}

async fn run_optimizer(
    source: &PriceSource,
    tickers: &[String],
    benchmark: Option<&str>,
    start: NaiveDate,
    end: NaiveDate,
    config: &OptimizerConfig,
    seed: Option<u64>,
) -> Result<Option<OptimizationResult>> {
    let mut benchmark = benchmark.map(|b| b.trim().to_uppercase()).filter(|b| !b.is_empty());
    if benchmark.is_some() && config.objective != Objective::Beta {
        info!("Benchmark only applies to the beta objective; ignoring it");
        benchmark = None;
    }
    let mut wanted = tickers.to_vec();
    if let Some(b) = &benchmark {
        if !wanted.contains(b) {
            wanted.push(b.clone());
        }
    }

    let prices = source.price_table(&wanted, start, end).await?;
    if prices.is_empty() {
        return Ok(None);
    }
    let (opt_tickers, opt_returns, market) = optimizer_inputs(&prices, tickers, benchmark.as_deref());

    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    Ok(optimize(&opt_tickers, &opt_returns, market.as_deref(), config, &mut rng))
}

fn print_registry(registry: &[(String, WeightMap)]) {
    if registry.is_empty() {
        println!("No portfolios saved yet.");
        return;
    }
    for (name, weights) in registry {
        let assets: Vec<String> = weights
            .iter()
            .map(|(t, w)| format!("{} ({:.1}%)", t, w * 100.0))
            .collect();
        println!("{}: {}", name, assets.join(", "));
    }
}

fn print_reports(reports: &[PortfolioReport]) {
    println!("\n╔══════════════════════════════════════════════════════════════════════════════════════════╗");
    println!("║                              Portfolio Metrics Comparison                               ║");
    println!("╠══════════════════════════════════════════════════════════════════════════════════════════╣");
    println!("║  Portfolio            Total%   Annual%   Sharpe  Sortino   MaxDD%    Vol%    Score       ║");
    println!("╠══════════════════════════════════════════════════════════════════════════════════════════╣");
    for r in reports {
        println!(
            "║  {:<18} {:>+8.2} {:>+9.2} {:>8.2} {:>8.2} {:>8.2} {:>7.2} {:>8.2}       ║",
            truncate(&r.name, 18),
            r.total_return_pct,
            r.annualized_return_pct,
            r.risk.sharpe_ratio,
            r.risk.sortino_ratio,
            r.risk.max_drawdown * 100.0,
            r.average_volatility_pct,
            r.performance_score
        );
    }
    println!("╠══════════════════════════════════════════════════════════════════════════════════════════╣");
    println!("║  Asset Allocation                                                                        ║");
    for r in reports {
        let assets: Vec<String> = r
            .allocation
            .iter()
            .map(|(t, w)| format!("{} {:.1}%", t, w * 100.0))
            .collect();
        println!("║    {:<18} {:<66} ║", truncate(&r.name, 18), truncate(&assets.join(", "), 66));
    }
    println!("╠══════════════════════════════════════════════════════════════════════════════════════════╣");
    println!("║  Value of initial investment                                                             ║");
    for r in reports {
        if let (Some(first), Some(last)) = (r.values.first(), r.values.last()) {
            println!(
                "║    {:<18} {} {:>12.2}  ->  {} {:>12.2}                            ║",
                truncate(&r.name, 18),
                first.date,
                first.value,
                last.date,
                last.value
            );
        }
    }
    println!("╚══════════════════════════════════════════════════════════════════════════════════════════╝");
    println!();
    println!("⚠  Educational use only. Not financial advice.");
}

fn print_optimization(result: &OptimizationResult) {
    let best = result.best();
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║           Random-Search Portfolio Allocation               ║");
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  Objective              : {:<32} ║", result.objective.label());
    println!("║  Samples                : {:>7}                          ║", result.samples.len());
    println!("║  Annualized Return      : {:>+7.2}%                         ║", best.annualized_return * 100.0);
    println!("║  Annualized Volatility  : {:>7.2}%                         ║", best.annualized_volatility * 100.0);
    println!("║  Downside Deviation     : {:>7.2}%                         ║", best.downside_deviation * 100.0);
    println!("║  Max Drawdown           : {:>7.2}%                         ║", best.max_drawdown * 100.0);
    if let Some(beta) = best.beta {
        println!("║  Beta                   : {:>7.3}                          ║", beta);
    }
    println!("║  Objective Value        : {:>10.4}                       ║", best.objective_value);
    println!("╠════════════════════════════════════════════════════════════╣");
    println!("║  Ticker   Weight                                           ║");
    println!("╠════════════════════════════════════════════════════════════╣");

    let mut sorted: Vec<(String, f64)> = result.best_weights().into_iter().collect();
    sorted.sort_by(|a, b| b.1.total_cmp(&a.1));
    for (ticker, w) in &sorted {
        println!("║  {:<7} {:>7.2}%                                          ║", ticker, w * 100.0);
    }
    println!("╚════════════════════════════════════════════════════════════╝");
    println!();
    println!("⚠  Educational use only. Not financial advice.");
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
