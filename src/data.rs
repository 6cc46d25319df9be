use crate::config::{CACHE_TTL_SECS, FETCH_BATCH_SIZE};
use crate::prices::{align_prices, PriceTable, RawPriceSeries};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DataProviderMode {
    Yahoo,
    LocalFile,
}

impl DataProviderMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yahoo => "yahoo",
            Self::LocalFile => "local",
        }
    }
}

pub fn configured_data_provider_mode() -> DataProviderMode {
    let provider = std::env::var("AUTOINVEST_DATA_PROVIDER")
        .unwrap_or_else(|_| "yahoo".to_string())
        .trim()
        .to_ascii_lowercase();

    match provider.as_str() {
        "yahoo" | "yfinance" => DataProviderMode::Yahoo,
        "local" | "file" => DataProviderMode::LocalFile,
        other => {
            warn!(
                "Unknown AUTOINVEST_DATA_PROVIDER={} ; defaulting to yahoo. Allowed values: yahoo | local",
                other
            );
            DataProviderMode::Yahoo
        }
    }
}

/// Where daily closes come from. Either way the result is a set of raw
/// per-ticker series; a ticker that cannot be loaded is simply absent.
#[derive(Clone, Debug)]
pub enum PriceSource {
    /// Yahoo Finance chart API with a JSON response cache.
    Yahoo { cache_dir: PathBuf },
    /// One `<TICKER>.json` file per ticker under `dir`.
    LocalFile { dir: PathBuf },
}

impl PriceSource {
    pub fn yahoo() -> Self {
        Self::Yahoo {
            cache_dir: PathBuf::from(".cache"),
        }
    }

    pub fn local(dir: impl Into<PathBuf>) -> Self {
        Self::LocalFile { dir: dir.into() }
    }

    /// Source selected by `AUTOINVEST_DATA_PROVIDER` / `AUTOINVEST_DATA_DIR`.
    pub fn from_env() -> Self {
        match configured_data_provider_mode() {
            DataProviderMode::Yahoo => Self::yahoo(),
            DataProviderMode::LocalFile => {
                let dir = std::env::var("AUTOINVEST_DATA_DIR").unwrap_or_else(|_| "data".to_string());
                Self::local(dir.trim())
            }
        }
    }

    pub fn mode(&self) -> DataProviderMode {
        match self {
            Self::Yahoo { .. } => DataProviderMode::Yahoo,
            Self::LocalFile { .. } => DataProviderMode::LocalFile,
        }
    }

    /// Raw close series for `tickers` covering `[start, end]`.
    ///
    /// Tickers are uppercased and deduplicated. Per-ticker failures are logged
    /// and skipped; the call only errors on setup problems such as an
    /// unusable cache directory.
    pub async fn fetch_prices(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<RawPriceSeries>> {
        let symbols = normalize_tickers(tickers);
        if symbols.is_empty() {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(symbols.len());
        match self {
            Self::Yahoo { cache_dir } => {
                if !cache_dir.exists() {
                    std::fs::create_dir_all(cache_dir)?;
                }
                let delay_ms = batch_fetch_delay_ms();
                let batches: Vec<&[String]> = symbols.chunks(FETCH_BATCH_SIZE).collect();
                for (idx, batch) in batches.iter().enumerate() {
                    for symbol in batch.iter() {
                        match fetch_yahoo_series(symbol, start, end, cache_dir).await {
                            Ok(series) => out.push(series),
                            Err(e) => warn!("Yahoo download failed for {}: {}", symbol, e),
                        }
                    }
                    if idx + 1 < batches.len() && delay_ms > 0 {
                        tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                    }
                }
            }
            Self::LocalFile { dir } => {
                for symbol in &symbols {
                    match load_local_series(dir, symbol) {
                        Ok(series) => out.push(series),
                        Err(e) => warn!("Local price file unusable for {}: {}", symbol, e),
                    }
                }
            }
        }

        info!(
            "Fetched {}/{} tickers from {} source",
            out.len(),
            symbols.len(),
            self.mode().as_str()
        );
        Ok(out)
    }

    /// Fetches and aligns in one step.
    pub async fn price_table(&self, tickers: &[String], start: NaiveDate, end: NaiveDate) -> Result<PriceTable> {
        let raw = self.fetch_prices(tickers, start, end).await?;
        Ok(align_prices(&raw, start, end))
    }
}

fn normalize_tickers(tickers: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tickers.len());
    for t in tickers {
        let upper = t.trim().to_uppercase();
        if !upper.is_empty() && !out.contains(&upper) {
            out.push(upper);
        }
    }
    out
}

fn batch_fetch_delay_ms() -> u64 {
    std::env::var("AUTOINVEST_BATCH_FETCH_DELAY_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|v| v.clamp(0, 5_000))
        .unwrap_or(350)
}

// ──────────────────────────────────────────────────────────────────────────────
// Yahoo chart API
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Serialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
}

impl YahooChartResponse {
    fn has_data(&self) -> bool {
        self.chart.result.as_ref().is_some_and(|r| !r.is_empty())
    }
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooIndicators {
    #[serde(default)]
    quote: Vec<YahooQuote>,
    #[serde(default)]
    adjclose: Vec<YahooAdjClose>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooAdjClose {
    #[serde(default)]
    adjclose: Vec<Option<f64>>,
}

/// Converts a chart response to a raw series, preferring adjusted closes.
fn chart_to_series(symbol: &str, response: &YahooChartResponse) -> Result<RawPriceSeries> {
    let result = response
        .chart
        .result
        .as_ref()
        .and_then(|r| r.first())
        .ok_or(anyhow!("No chart data found for {}", symbol))?;

    let closes = result
        .indicators
        .adjclose
        .first()
        .map(|a| &a.adjclose)
        .filter(|a| !a.is_empty())
        .or_else(|| result.indicators.quote.first().map(|q| &q.close))
        .ok_or(anyhow!("Chart response for {} has no close prices", symbol))?;

    let points = result
        .timestamp
        .iter()
        .zip(closes.iter())
        .filter_map(|(&ts, &close)| {
            let date = DateTime::<Utc>::from_timestamp(ts, 0)?.date_naive();
            Some((date, close))
        })
        .collect();

    Ok(RawPriceSeries::new(symbol, points))
}

async fn fetch_yahoo_series(symbol: &str, start: NaiveDate, end: NaiveDate, cache_dir: &Path) -> Result<RawPriceSeries> {
    let cache_file = cache_dir.join(format!("{}_{}_{}.json", symbol, start, end));

    let response: YahooChartResponse = if cache_file.exists() {
        let metadata = std::fs::metadata(&cache_file)?;
        let modified = metadata.modified()?;
        let age = std::time::SystemTime::now().duration_since(modified)?;

        if age.as_secs() < CACHE_TTL_SECS {
            info!("Loading {} from cache...", symbol);
            let file = std::fs::File::open(&cache_file)?;
            let reader = std::io::BufReader::new(file);
            serde_json::from_reader(reader)?
        } else {
            info!("Cache expired for {}, fetching...", symbol);
            fetch_from_api(symbol, start, end, &cache_file).await?
        }
    } else {
        info!("Cache miss for {}, fetching...", symbol);
        fetch_from_api(symbol, start, end, &cache_file).await?
    };

    chart_to_series(symbol, &response)
}

/// Linear back-off between API attempts: 2s, 4s, 6s...
fn retry_delay(attempt: u32) -> std::time::Duration {
    std::time::Duration::from_secs(2 * u64::from(attempt.max(1)))
}

async fn fetch_from_api(symbol: &str, start: NaiveDate, end: NaiveDate, cache_path: &Path) -> Result<YahooChartResponse> {
    let period1 = start.and_hms_opt(0, 0, 0).map(|t| t.and_utc().timestamp()).unwrap_or(0);
    // period2 is exclusive, so ask for the day after `end`.
    let period2 = (end + Duration::days(1))
        .and_hms_opt(0, 0, 0)
        .map(|t| t.and_utc().timestamp())
        .unwrap_or(period1);
    let url = format!(
        "https://query1.finance.yahoo.com/v8/finance/chart/{}?period1={}&period2={}&interval=1d&includeAdjustedClose=true",
        symbol, period1, period2
    );

    let mut attempts: u32 = 0;
    let max_attempts: u32 = 3;

    loop {
        attempts += 1;
        match reqwest::Client::new()
            .get(&url)
            .header("User-Agent", "Mozilla/5.0")
            .timeout(std::time::Duration::from_secs(15))
            .send()
            .await
        {
            Ok(resp) => match resp.json::<YahooChartResponse>().await {
                Ok(resp_json) => {
                    if resp_json.has_data() {
                        let file = std::fs::File::create(cache_path)?;
                        let writer = std::io::BufWriter::new(file);
                        serde_json::to_writer(writer, &resp_json)?;
                    } else {
                        debug!("{}: chart response has no result, not caching", symbol);
                    }

                    return Ok(resp_json);
                }
                Err(e) => {
                    if attempts >= max_attempts {
                        return Err(e.into());
                    }
                    warn!("Failed to parse JSON for {} (attempt {}/{}): {}", symbol, attempts, max_attempts, e);
                }
            },
            Err(e) => {
                if attempts >= max_attempts {
                    return Err(e.into());
                }
                warn!("Failed to fetch data for {} (attempt {}/{}): {}", symbol, attempts, max_attempts, e);
            }
        }

        tokio::time::sleep(retry_delay(attempts)).await;
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Local files
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct LocalPricePoint {
    date: NaiveDate,
    close: Option<f64>,
}

#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum LocalPriceFile {
    Points(Vec<LocalPricePoint>),
    Chart(YahooChartResponse),
}

fn load_local_series(dir: &Path, symbol: &str) -> Result<RawPriceSeries> {
    let path = dir.join(format!("{}.json", symbol));
    if !path.is_file() {
        return Err(anyhow!("{} not found", path.display()));
    }
    debug!("Reading {}", path.display());
    let file = std::fs::File::open(&path)?;
    let reader = std::io::BufReader::new(file);
    let parsed: LocalPriceFile = serde_json::from_reader(reader)
        .map_err(|e| anyhow!("{}: not a price list or chart response ({})", path.display(), e))?;

    match parsed {
        LocalPriceFile::Points(points) => Ok(RawPriceSeries::new(
            symbol,
            points.into_iter().map(|p| (p.date, p.close)).collect(),
        )),
        LocalPriceFile::Chart(chart) => chart_to_series(symbol, &chart),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    const CHART_JSON: &str = r#"{
        "chart": {
            "result": [{
                "timestamp": [1704205800, 1704292200, 1704378600],
                "indicators": {
                    "quote": [{"close": [470.0, null, 468.0]}],
                    "adjclose": [{"adjclose": [465.0, null, 463.5]}]
                }
            }]
        }
    }"#;

    #[test]
    fn test_chart_prefers_adjusted_close() {
        let response: YahooChartResponse = serde_json::from_str(CHART_JSON).unwrap();
        let series = chart_to_series("SPY", &response).unwrap();
        assert_eq!(series.ticker, "SPY");
        assert_eq!(series.points.len(), 3);
        assert_eq!(series.points[0], (d(2024, 1, 2), Some(465.0)));
        assert_eq!(series.points[1].1, None);
    }

    #[test]
    fn test_chart_without_result_is_error() {
        let response: YahooChartResponse = serde_json::from_str(r#"{"chart": {"result": null}}"#).unwrap();
        assert!(chart_to_series("NOPE", &response).is_err());
        assert!(!response.has_data());

        let empty: YahooChartResponse = serde_json::from_str(r#"{"chart": {"result": []}}"#).unwrap();
        assert!(!empty.has_data());
        let full: YahooChartResponse = serde_json::from_str(CHART_JSON).unwrap();
        assert!(full.has_data());
    }

    #[test]
    fn test_retry_delay_backs_off() {
        assert_eq!(retry_delay(1), std::time::Duration::from_secs(2));
        assert_eq!(retry_delay(2), std::time::Duration::from_secs(4));
        assert!(retry_delay(3) > retry_delay(2));
    }

    #[test]
    fn test_normalize_tickers() {
        let input = vec![" spy".to_string(), "SPY".to_string(), String::new(), "agg".to_string()];
        assert_eq!(normalize_tickers(&input), vec!["SPY".to_string(), "AGG".to_string()]);
    }

    #[tokio::test]
    async fn test_local_source_loads_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("AAA.json"),
            r#"[{"date": "2024-01-02", "close": 10.0},
                {"date": "2024-01-03", "close": null},
                {"date": "2024-01-04", "close": 11.0}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("SPY.json"), CHART_JSON).unwrap();
        std::fs::write(dir.path().join("BAD.json"), "not json").unwrap();

        let source = PriceSource::local(dir.path());
        let tickers = vec!["aaa".to_string(), "spy".to_string(), "bad".to_string(), "missing".to_string()];
        let raw = source.fetch_prices(&tickers, d(2024, 1, 1), d(2024, 1, 31)).await.unwrap();
        assert_eq!(raw.len(), 2);

        let table = source.price_table(&tickers, d(2024, 1, 1), d(2024, 1, 31)).await.unwrap();
        assert_eq!(table.tickers(), &["AAA".to_string(), "SPY".to_string()]);
        // 2024-01-03 is missing for both tickers, so the row is dropped.
        assert_eq!(table.dates(), &[d(2024, 1, 2), d(2024, 1, 4)]);
        assert_eq!(table.price(1, "AAA"), Some(11.0));
        assert_eq!(table.price(1, "SPY"), Some(463.5));
    }

    #[tokio::test]
    async fn test_no_tickers_is_empty_not_error() {
        let source = PriceSource::local("does-not-exist");
        let raw = source.fetch_prices(&[], d(2024, 1, 1), d(2024, 1, 2)).await.unwrap();
        assert!(raw.is_empty());
    }
}
