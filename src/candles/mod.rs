//! Shared market data value types: ticks, candles, timeframes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod builder;
pub mod merge;

pub use builder::{REALTIME_SERIES_LIMIT, apply_tick};
pub use merge::merge_candles;

/// A single real-time trade/price observation for a symbol
#[derive(Debug, Clone, PartialEq)]
pub struct Tick {
    pub symbol: String,
    /// Source-clock timestamp in epoch milliseconds
    pub ts_ms: u64,
    pub price: f64,
    pub volume: Option<f64>,
}

/// OHLCV aggregate over one timeframe-aligned period
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Timeframe-aligned start of the period this candle covers
    pub period_start_ms: u64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Cumulative volume within the period
    pub volume: f64,
}

impl Candle {
    /// Open a fresh candle from the first tick of a period
    pub fn from_tick(period_start_ms: u64, tick: &Tick) -> Self {
        Self {
            period_start_ms,
            open: tick.price,
            high: tick.price,
            low: tick.price,
            close: tick.price,
            volume: tick.volume.unwrap_or(0.0),
        }
    }
}

/// Chart granularity, mapped to a fixed period length in milliseconds.
///
/// Month and year use fixed 30-day / 365-day approximations rather than
/// calendar boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "1d")]
    Day,
    #[serde(rename = "1w")]
    Week,
    #[serde(rename = "1M")]
    Month,
    #[serde(rename = "1y")]
    Year,
}

const HOUR_MS: u64 = 3_600_000;
const DAY_MS: u64 = 86_400_000;

impl Timeframe {
    /// Period length in milliseconds
    pub fn period_ms(&self) -> u64 {
        match self {
            Timeframe::Hour => HOUR_MS,
            Timeframe::Day => DAY_MS,
            Timeframe::Week => 7 * DAY_MS,
            Timeframe::Month => 30 * DAY_MS,
            Timeframe::Year => 365 * DAY_MS,
        }
    }

    /// Floor a timestamp to the start of the period it falls into
    pub fn align(&self, ts_ms: u64) -> u64 {
        let period = self.period_ms();
        (ts_ms / period) * period
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Timeframe::Hour => "1h",
            Timeframe::Day => "1d",
            Timeframe::Week => "1w",
            Timeframe::Month => "1M",
            Timeframe::Year => "1y",
        };
        f.write_str(label)
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // No minute granularity exists, so "1m" can only mean one month
        match s {
            "1h" | "1H" => Ok(Timeframe::Hour),
            "1d" | "1D" => Ok(Timeframe::Day),
            "1w" | "1W" => Ok(Timeframe::Week),
            "1m" | "1M" => Ok(Timeframe::Month),
            "1y" | "1Y" => Ok(Timeframe::Year),
            other => Err(format!(
                "unknown timeframe '{}', expected one of 1h, 1d, 1w, 1M, 1y",
                other
            )),
        }
    }
}
