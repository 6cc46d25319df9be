use crate::config::DEFAULT_INITIAL_INVESTMENT;
use crate::prices::PriceTable;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Ticker -> capital fraction. Need not sum to one; valuation renormalizes.
pub type WeightMap = BTreeMap<String, f64>;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub date: NaiveDate,
    pub value: f64,
}

pub type ValueSeries = Vec<SeriesPoint>;
pub type ReturnSeries = Vec<SeriesPoint>;

/// Builds a [`WeightMap`] from `(ticker, weight)` pairs, uppercasing tickers.
/// Repeated tickers accumulate.
pub fn weight_map<S: AsRef<str>>(pairs: impl IntoIterator<Item = (S, f64)>) -> WeightMap {
    let mut map = WeightMap::new();
    for (ticker, w) in pairs {
        *map.entry(ticker.as_ref().trim().to_uppercase()).or_insert(0.0) += w;
    }
    map
}

/// Weights over tickers present in `prices`, rescaled to sum to 1.
///
/// Negative and non-finite weights are ignored. Empty when nothing overlaps or
/// the surviving weights sum to zero.
pub fn normalized_weights(prices: &PriceTable, weights: &WeightMap) -> Vec<(String, f64)> {
    let available: Vec<(String, f64)> = weights
        .iter()
        .filter(|(_, w)| w.is_finite() && **w >= 0.0)
        .filter_map(|(t, w)| {
            let idx = prices.ticker_index(t)?;
            Some((prices.tickers()[idx].clone(), *w))
        })
        .collect();

    let total: f64 = available.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Vec::new();
    }
    available.into_iter().map(|(t, w)| (t, w / total)).collect()
}

/// Holdings bought on the table's first date: `(ticker, shares)`.
///
/// A ticker without a positive first-row price is left out and its capital
/// stays uninvested.
pub fn initial_shares(
    prices: &PriceTable,
    normalized: &[(String, f64)],
    initial_investment: f64,
) -> Vec<(String, f64)> {
    normalized
        .iter()
        .filter_map(|(ticker, w)| match prices.price(0, ticker) {
            Some(p) if p > 0.0 => Some((ticker.clone(), initial_investment * w / p)),
            _ => {
                debug!("{}: no price on first date, left out of valuation", ticker);
                None
            }
        })
        .collect()
}

/// Buy-and-hold value series and its day-over-day returns.
///
/// On a date where a held ticker has no price it contributes nothing, so the
/// value dips for that day rather than carrying the last price forward.
/// Both series are empty when no weighted ticker can be bought on day one.
pub fn value_and_returns(
    prices: &PriceTable,
    weights: &WeightMap,
    initial_investment: f64,
) -> (ValueSeries, ReturnSeries) {
    if prices.is_empty() || weights.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let normalized = normalized_weights(prices, weights);
    if normalized.is_empty() {
        debug!("No weighted ticker present in price table");
        return (Vec::new(), Vec::new());
    }

    let holdings = initial_shares(prices, &normalized, initial_investment);
    if holdings.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let columns: Vec<(&[Option<f64>], f64)> = holdings
        .iter()
        .filter_map(|(t, shares)| prices.column(t).map(|c| (c, *shares)))
        .collect();

    let values: ValueSeries = prices
        .dates()
        .iter()
        .enumerate()
        .map(|(row, &date)| {
            let value = columns
                .iter()
                .map(|(column, shares)| column[row].map_or(0.0, |p| p * shares))
                .sum();
            SeriesPoint { date, value }
        })
        .collect();

    let returns = pct_change(&values);
    (values, returns)
}

/// [`value_and_returns`] with the default 10,000 starting capital.
pub fn default_value_and_returns(prices: &PriceTable, weights: &WeightMap) -> (ValueSeries, ReturnSeries) {
    value_and_returns(prices, weights, DEFAULT_INITIAL_INVESTMENT)
}

/// Day-over-day fractional change, dated at the later point.
///
/// A day on which the portfolio is worth nothing (every holding gapped) is
/// reported as flat, and the next change is measured from the last non-zero
/// value. The result always has one point fewer than `values`.
pub fn pct_change(values: &[SeriesPoint]) -> ReturnSeries {
    let mut base = values.first().map(|p| p.value).filter(|v| *v != 0.0);
    values
        .iter()
        .skip(1)
        .map(|point| {
            let value = match base {
                Some(b) if point.value != 0.0 => point.value / b - 1.0,
                _ => 0.0,
            };
            if point.value != 0.0 {
                base = Some(point.value);
            }
            SeriesPoint { date: point.date, value }
        })
        .collect()
}

pub fn series_values(series: &[SeriesPoint]) -> Vec<f64> {
    series.iter().map(|p| p.value).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::risk_metrics;
    use approx::assert_relative_eq;
    use chrono::Duration;

    fn dates(n: usize) -> Vec<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        (0..n).map(|i| start + Duration::days(i as i64)).collect()
    }

    fn single(ticker: &str, prices: &[f64]) -> PriceTable {
        PriceTable::from_columns(
            dates(prices.len()),
            vec![(ticker.to_string(), prices.iter().map(|p| Some(*p)).collect())],
        )
    }

    #[test]
    fn test_flat_two_asset_portfolio() {
        let table = PriceTable::from_columns(
            dates(10),
            vec![
                ("A".to_string(), vec![Some(100.0); 10]),
                ("B".to_string(), vec![Some(200.0); 10]),
            ],
        );
        let weights = weight_map([("A", 0.5), ("B", 0.5)]);
        let (values, returns) = value_and_returns(&table, &weights, 10_000.0);

        assert_eq!(values.len(), 10);
        assert!(values.iter().all(|p| (p.value - 10_000.0).abs() < 1e-9));
        assert_eq!(returns.len(), 9);
        assert!(returns.iter().all(|p| p.value == 0.0));

        let m = risk_metrics(&series_values(&returns), 0.03);
        assert_eq!(m.sharpe_ratio, 0.0);
        assert_eq!(m.sortino_ratio, 0.0);
        assert_eq!(m.annualized_volatility, 0.0);
        assert_eq!(m.max_drawdown, 0.0);
    }

    #[test]
    fn test_ten_percent_growth() {
        let table = single("X", &[100.0, 110.0, 121.0]);
        let (values, returns) = default_value_and_returns(&table, &weight_map([("x", 1.0)]));

        let v = series_values(&values);
        assert_relative_eq!(v[0], 10_000.0, epsilon = 1e-9);
        assert_relative_eq!(v[1], 11_000.0, epsilon = 1e-9);
        assert_relative_eq!(v[2], 12_100.0, epsilon = 1e-9);

        let r = series_values(&returns);
        assert_eq!(r.len(), 2);
        assert_relative_eq!(r[0], 0.10, epsilon = 1e-12);
        assert_relative_eq!(r[1], 0.10, epsilon = 1e-12);

        let m = risk_metrics(&r, 0.03);
        assert!(m.sharpe_ratio.is_finite() && m.sharpe_ratio >= 0.0);
        assert!(m.sortino_ratio.is_finite() && m.sortino_ratio >= 0.0);
        assert_eq!(m.max_drawdown, 0.0);
    }

    #[test]
    fn test_round_trip_drawdown() {
        let table = single("X", &[100.0, 50.0, 100.0]);
        let (values, returns) = default_value_and_returns(&table, &weight_map([("X", 1.0)]));
        assert_eq!(series_values(&values), vec![10_000.0, 5_000.0, 10_000.0]);

        let m = risk_metrics(&series_values(&returns), 0.03);
        assert_relative_eq!(m.max_drawdown, -0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_empty_inputs_yield_empty_series() {
        let table = single("X", &[1.0, 2.0]);
        let (v, r) = default_value_and_returns(&PriceTable::default(), &weight_map([("X", 1.0)]));
        assert!(v.is_empty() && r.is_empty());

        let (v, r) = default_value_and_returns(&table, &WeightMap::new());
        assert!(v.is_empty() && r.is_empty());

        let (v, r) = default_value_and_returns(&table, &weight_map([("NOPE", 1.0)]));
        assert!(v.is_empty() && r.is_empty());

        let (v, r) = default_value_and_returns(&table, &weight_map([("X", 0.0)]));
        assert!(v.is_empty() && r.is_empty());
    }

    #[test]
    fn test_weights_renormalize_over_present_tickers() {
        let table = PriceTable::from_columns(
            dates(3),
            vec![
                ("A".to_string(), vec![Some(10.0), Some(11.0), Some(12.0)]),
                ("B".to_string(), vec![Some(40.0), Some(40.0), Some(44.0)]),
            ],
        );
        let weights = weight_map([("A", 3.0), ("B", 1.0), ("ABSENT", 10.0)]);
        let normalized = normalized_weights(&table, &weights);
        let total: f64 = normalized.iter().map(|(_, w)| w).sum();
        assert_relative_eq!(total, 1.0, epsilon = 1e-12);
        assert_relative_eq!(normalized[0].1, 0.75, epsilon = 1e-12);

        let holdings = initial_shares(&table, &normalized, 10_000.0);
        let invested: f64 = holdings
            .iter()
            .map(|(t, s)| s * table.price(0, t).unwrap())
            .sum();
        assert_relative_eq!(invested, 10_000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_ticker_missing_on_first_date_is_excluded() {
        let table = PriceTable::from_columns(
            dates(3),
            vec![
                ("A".to_string(), vec![Some(10.0), Some(10.0), Some(10.0)]),
                ("LATE".to_string(), vec![None, Some(5.0), Some(5.0)]),
            ],
        );
        let (values, _) = default_value_and_returns(&table, &weight_map([("A", 0.5), ("LATE", 0.5)]));
        // Only A's half of the capital is ever invested.
        assert!(values.iter().all(|p| (p.value - 5_000.0).abs() < 1e-9));

        let (values, returns) = default_value_and_returns(&table, &weight_map([("LATE", 1.0)]));
        assert!(values.is_empty() && returns.is_empty());
    }

    #[test]
    fn test_mid_series_gap_contributes_zero() {
        let table = PriceTable::from_columns(
            dates(3),
            vec![
                ("A".to_string(), vec![Some(10.0), Some(10.0), Some(10.0)]),
                ("B".to_string(), vec![Some(10.0), None, Some(10.0)]),
            ],
        );
        let (values, returns) = default_value_and_returns(&table, &weight_map([("A", 1.0), ("B", 1.0)]));
        assert_eq!(series_values(&values), vec![10_000.0, 5_000.0, 10_000.0]);
        let r = series_values(&returns);
        assert_relative_eq!(r[0], -0.5, epsilon = 1e-12);
        assert_relative_eq!(r[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_value_day_keeps_return_dates() {
        let table = PriceTable::from_columns(
            dates(4),
            vec![
                ("A".to_string(), vec![Some(10.0), None, Some(10.0), Some(10.0)]),
                ("B".to_string(), vec![None, Some(5.0), Some(5.0), Some(5.0)]),
            ],
        );
        let (values, returns) = default_value_and_returns(&table, &weight_map([("A", 1.0)]));
        assert_eq!(series_values(&values), vec![10_000.0, 0.0, 10_000.0, 10_000.0]);
        assert_eq!(returns.len(), values.len() - 1);
        assert!(returns.iter().zip(values.iter().skip(1)).all(|(r, v)| r.date == v.date));
        assert_eq!(series_values(&returns), vec![0.0, 0.0, 0.0]);

        let rebuilt: f64 = returns.iter().fold(values[0].value, |acc, r| acc * (1.0 + r.value));
        assert_relative_eq!(rebuilt, values[3].value, epsilon = 1e-9);

        let m = risk_metrics(&series_values(&returns), 0.03);
        assert_eq!(m.max_drawdown, 0.0);
    }

    #[test]
    fn test_returns_compound_back_to_values() {
        let prices = [50.0, 51.5, 49.0, 52.25, 60.0, 58.1];
        let table = single("X", &prices);
        let (values, returns) = default_value_and_returns(&table, &weight_map([("X", 1.0)]));

        let mut rebuilt = values[0].value;
        for (r, v) in returns.iter().zip(values.iter().skip(1)) {
            rebuilt *= 1.0 + r.value;
            assert_relative_eq!(rebuilt, v.value, max_relative = 1e-12);
            assert_eq!(r.date, v.date);
        }
    }
}
