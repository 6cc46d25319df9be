use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// One ticker's close prices exactly as a price source delivered them:
/// possibly unsorted, with duplicates, gaps and junk values.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RawPriceSeries {
    pub ticker: String,
    pub points: Vec<(NaiveDate, Option<f64>)>,
}

impl RawPriceSeries {
    pub fn new(ticker: &str, points: Vec<(NaiveDate, Option<f64>)>) -> Self {
        Self {
            ticker: ticker.to_string(),
            points,
        }
    }
}

/// Date-aligned close prices, one column per ticker.
///
/// Rows are strictly increasing dates. A cell is `None` when that ticker has
/// no usable price on that date; no row is `None` across every column.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PriceTable {
    dates: Vec<NaiveDate>,
    tickers: Vec<String>,
    columns: Vec<Vec<Option<f64>>>,
}

impl PriceTable {
    /// Builds a table from pre-aligned columns. Ticker names are uppercased,
    /// later duplicates are dropped and so are rows missing in every column.
    pub fn from_columns(dates: Vec<NaiveDate>, columns: Vec<(String, Vec<Option<f64>>)>) -> Self {
        let mut table = Self {
            dates,
            tickers: Vec::with_capacity(columns.len()),
            columns: Vec::with_capacity(columns.len()),
        };
        for (ticker, mut column) in columns {
            let ticker = ticker.trim().to_uppercase();
            if table.tickers.contains(&ticker) {
                warn!("Duplicate column {} ignored", ticker);
                continue;
            }
            column.resize(table.dates.len(), None);
            table.tickers.push(ticker);
            table.columns.push(column);
        }
        table.drop_empty_rows();
        table
    }

    pub fn is_empty(&self) -> bool {
        self.tickers.is_empty() || self.dates.is_empty()
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn num_rows(&self) -> usize {
        self.dates.len()
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.ticker_index(ticker).is_some()
    }

    pub fn ticker_index(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t.eq_ignore_ascii_case(ticker))
    }

    pub fn column(&self, ticker: &str) -> Option<&[Option<f64>]> {
        self.ticker_index(ticker).map(|i| self.columns[i].as_slice())
    }

    pub fn price(&self, row: usize, ticker: &str) -> Option<f64> {
        self.column(ticker)?.get(row).copied().flatten()
    }

    /// Sub-table over `tickers` (those present), dropping rows that become
    /// entirely empty.
    pub fn select(&self, tickers: &[String]) -> PriceTable {
        let mut seen = BTreeSet::new();
        let mut out_tickers = Vec::new();
        let mut out_columns = Vec::new();
        for ticker in tickers {
            if let Some(idx) = self.ticker_index(ticker) {
                if seen.insert(idx) {
                    out_tickers.push(self.tickers[idx].clone());
                    out_columns.push(self.columns[idx].clone());
                }
            }
        }
        let mut table = PriceTable {
            dates: self.dates.clone(),
            tickers: out_tickers,
            columns: out_columns,
        };
        table.drop_empty_rows();
        table
    }

    fn drop_empty_rows(&mut self) {
        if self.columns.is_empty() {
            self.dates.clear();
            return;
        }
        let keep: Vec<bool> = (0..self.dates.len())
            .map(|row| self.columns.iter().any(|c| c[row].is_some()))
            .collect();
        if keep.iter().all(|&k| k) {
            return;
        }
        let mut row = 0;
        self.dates.retain(|_| {
            let k = keep[row];
            row += 1;
            k
        });
        for column in &mut self.columns {
            let mut row = 0;
            column.retain(|_| {
                let k = keep[row];
                row += 1;
                k
            });
        }
    }
}

/// Normalizes raw per-ticker series into one outer-joined [`PriceTable`].
///
/// Per ticker: non-positive, non-finite and missing prices are dropped, the
/// series is restricted to `[start, end]` inclusive and the first occurrence
/// of a duplicated date wins. Tickers left with no points are excluded
/// without error; a caller sees that as an empty table.
pub fn align_prices(raw: &[RawPriceSeries], start: NaiveDate, end: NaiveDate) -> PriceTable {
    let mut per_ticker: Vec<(String, BTreeMap<NaiveDate, f64>)> = Vec::with_capacity(raw.len());

    for series in raw {
        let ticker = series.ticker.trim().to_uppercase();
        if ticker.is_empty() {
            continue;
        }
        if per_ticker.iter().any(|(t, _)| *t == ticker) {
            warn!("{}: duplicate series from source, keeping the first", ticker);
            continue;
        }

        let mut points = BTreeMap::new();
        for &(date, price) in &series.points {
            let Some(price) = price.filter(|p| p.is_finite() && *p > 0.0) else {
                continue;
            };
            if date < start || date > end {
                continue;
            }
            points.entry(date).or_insert(price);
        }

        if points.is_empty() {
            debug!("{}: no usable prices in {}..={}, excluded", ticker, start, end);
            continue;
        }
        per_ticker.push((ticker, points));
    }

    let dates: Vec<NaiveDate> = per_ticker
        .iter()
        .flat_map(|(_, points)| points.keys().copied())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let columns = per_ticker
        .into_iter()
        .map(|(ticker, points)| {
            let column = dates.iter().map(|d| points.get(d).copied()).collect();
            (ticker, column)
        })
        .collect();

    PriceTable::from_columns(dates, columns)
}
