//! Backtesting and allocation analytics for weighted stock portfolios.
//!
//! The analytics modules (`prices`, `valuation`, `metrics`, `annualize`,
//! `optimizer`, `comparison`) are synchronous and pure: every input is an
//! argument and "no data" comes back as an empty or zeroed result, never an
//! error. `data` is the only module that touches the network or disk.

pub mod annualize;
pub mod comparison;
pub mod config;
pub mod data;
pub mod metrics;
pub mod optimizer;
pub mod prices;
pub mod valuation;
