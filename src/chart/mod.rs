//! Per-symbol chart state: composes the live tick aggregation with the
//! latest historical snapshot into one chart-ready series

use std::collections::HashMap;

use anyhow::Result;
use tracing::debug;

use crate::candles::{Candle, Tick, Timeframe, apply_tick, merge_candles};

/// Supplier of historical OHLC snapshots. The HTTP plumbing behind it is an
/// external collaborator; this crate only consumes the ordered result.
pub trait HistoricalSource {
    fn fetch(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> impl std::future::Future<Output = Result<Vec<Candle>>> + Send;
}

/// In-memory [`HistoricalSource`] keyed by symbol. Serves fixtures in tests
/// and pre-fetched snapshots handed over by a caller.
#[derive(Debug, Default, Clone)]
pub struct StaticHistory {
    series: HashMap<String, Vec<Candle>>,
}

impl StaticHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, symbol: &str, candles: Vec<Candle>) {
        self.series.insert(symbol.to_string(), candles);
    }
}

impl HistoricalSource for StaticHistory {
    async fn fetch(&self, symbol: &str, _timeframe: Timeframe) -> Result<Vec<Candle>> {
        Ok(self.series.get(symbol).cloned().unwrap_or_default())
    }
}

/// Aggregation state for one symbol at one timeframe.
///
/// The historical snapshot is replaced wholesale on refresh; the live series
/// grows tick by tick. Neither is locked here: a caller that reads while
/// another writes must hand over consistent snapshots itself.
#[derive(Debug, Clone)]
pub struct ChartState {
    timeframe: Timeframe,
    historical: Vec<Candle>,
    realtime: Vec<Candle>,
}

impl ChartState {
    pub fn new(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            historical: Vec::new(),
            realtime: Vec::new(),
        }
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// Replace the historical snapshot with a freshly fetched one
    pub fn set_historical(&mut self, candles: Vec<Candle>) {
        debug!(
            "historical snapshot replaced: {} candles, boundary {:?}",
            candles.len(),
            candles.last().map(|c| c.period_start_ms)
        );
        self.historical = candles;
    }

    /// Aligned boundary of the most recent historical candle, used to keep
    /// overlapping live ticks from double counting
    pub fn last_historical_boundary(&self) -> Option<u64> {
        self.historical
            .last()
            .map(|candle| self.timeframe.align(candle.period_start_ms))
    }

    /// Fold one live tick into the real-time series
    pub fn on_tick(&mut self, tick: &Tick) {
        let boundary = self.last_historical_boundary();
        apply_tick(&mut self.realtime, tick, self.timeframe, boundary);
    }

    /// The merged, chart-ready series
    pub fn chart_candles(&self) -> Vec<Candle> {
        merge_candles(&self.historical, &self.realtime, self.timeframe)
    }

    pub fn realtime_len(&self) -> usize {
        self.realtime.len()
    }
}
