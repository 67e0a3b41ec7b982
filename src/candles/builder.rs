//! Folds a stream of ticks into an ordered series of aligned OHLCV candles

use tracing::trace;

use super::{Candle, Tick, Timeframe};

/// Maximum number of real-time candles retained per symbol; oldest are
/// dropped first once the window is full.
pub const REALTIME_SERIES_LIMIT: usize = 1000;

/// Fold one tick into the running real-time series for a timeframe.
///
/// When `last_historical_boundary` is given, ticks at or before it are
/// dropped: those periods are already covered by the historical snapshot and
/// folding them again would double-count against the merged output.
///
/// Deterministic and free of I/O, so a recorded tick stream can be replayed
/// to reproduce the exact series.
pub fn apply_tick(
    series: &mut Vec<Candle>,
    tick: &Tick,
    timeframe: Timeframe,
    last_historical_boundary: Option<u64>,
) {
    if let Some(boundary) = last_historical_boundary {
        if tick.ts_ms <= boundary {
            trace!(
                "dropping tick for {} at {} (historical boundary {})",
                tick.symbol, tick.ts_ms, boundary
            );
            return;
        }
    }

    let period_start = timeframe.align(tick.ts_ms);

    match series.last_mut() {
        Some(last) if timeframe.align(last.period_start_ms) == period_start => {
            // Re-align in case the stored candle came from a different
            // alignment policy
            last.period_start_ms = period_start;
            last.close = tick.price;
            last.high = last.high.max(tick.price);
            last.low = last.low.min(tick.price);
            last.volume += tick.volume.unwrap_or(0.0);
        }
        _ => {
            series.push(Candle::from_tick(period_start, tick));
            if series.len() > REALTIME_SERIES_LIMIT {
                let overflow = series.len() - REALTIME_SERIES_LIMIT;
                series.drain(..overflow);
            }
        }
    }
}
