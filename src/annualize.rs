use crate::config::CALENDAR_DAYS;

/// Converts a total return over `elapsed_days` calendar days into an
/// annualized percentage.
///
/// Both input and output are percentages (`25.0` means +25%). Uses a 365-day
/// year, unlike the 252 trading-day factor used for daily statistics.
pub fn annualized_return(total_return_pct: f64, elapsed_days: i64) -> f64 {
    if elapsed_days <= 0 {
        return 0.0;
    }
    let growth = 1.0 + total_return_pct / 100.0;
    let annualized = (growth.powf(CALENDAR_DAYS / elapsed_days as f64) - 1.0) * 100.0;
    if annualized.is_finite() { annualized } else { 0.0 }
}

/// Percentage change from the first to the last value; 0.0 when undefined.
pub fn total_return_pct(first: f64, last: f64) -> f64 {
    if first <= 0.0 || !first.is_finite() || !last.is_finite() {
        return 0.0;
    }
    (last / first - 1.0) * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_zero_and_doubling_over_one_year() {
        assert_eq!(annualized_return(0.0, 365), 0.0);
        assert_relative_eq!(annualized_return(100.0, 365), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn test_non_positive_days_yield_zero() {
        assert_eq!(annualized_return(50.0, 0), 0.0);
        assert_eq!(annualized_return(50.0, -10), 0.0);
    }

    #[test]
    fn test_two_years_compounds_down() {
        // +21% over 730 days is 10% a year.
        assert_relative_eq!(annualized_return(21.0, 730), 10.0, epsilon = 1e-9);
    }

    #[test]
    fn test_calendar_year_differs_from_trading_year() {
        // 252 elapsed calendar days is not treated as a full year here.
        let ann = annualized_return(10.0, 252);
        assert!(ann > 10.0, "short window should annualize above the raw return, got {}", ann);
    }

    #[test]
    fn test_total_loss_is_finite() {
        assert_eq!(annualized_return(-100.0, 30), -100.0);
        assert_eq!(annualized_return(-150.0, 30), 0.0);
    }

    #[test]
    fn test_total_return_pct() {
        assert_relative_eq!(total_return_pct(10_000.0, 12_100.0), 21.0, epsilon = 1e-9);
        assert_eq!(total_return_pct(0.0, 5.0), 0.0);
    }
}
