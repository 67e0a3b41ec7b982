//! Combines a historical snapshot with the live series into one timeline

use super::{Candle, Timeframe};

/// Merge an externally-fetched historical series with the real-time series
/// built from ticks, producing a single sequence that is strictly ordered by
/// period start and free of duplicate periods.
///
/// The boundary of the last historical candle is re-floored before
/// comparison; the two sources may have been aligned by different code and
/// any off-by-one here would silently duplicate or drop a candle.
pub fn merge_candles(historical: &[Candle], realtime: &[Candle], timeframe: Timeframe) -> Vec<Candle> {
    let Some(hist_last) = historical.last() else {
        return realtime.to_vec();
    };
    if realtime.is_empty() {
        return historical.to_vec();
    }

    let last_hist_boundary = timeframe.align(hist_last.period_start_ms);

    let mut merged: Vec<Candle> = historical.to_vec();

    let mut surviving = realtime
        .iter()
        .filter(|candle| timeframe.align(candle.period_start_ms) >= last_hist_boundary)
        .peekable();

    if let Some(first) =
        surviving.next_if(|candle| timeframe.align(candle.period_start_ms) == last_hist_boundary)
    {
        // A live candle covers the same period as the historical tail: fold
        // the two into one instead of keeping either alone
        if let Some(tail) = merged.last_mut() {
            tail.high = tail.high.max(first.high);
            tail.low = tail.low.min(first.low);
            tail.close = first.close;
            tail.volume += first.volume;
        }
    }

    merged.extend(surviving.cloned());
    merged
}
