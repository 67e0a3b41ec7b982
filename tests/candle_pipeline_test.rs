//! End-to-end tests for the tick → candle → merge pipeline

use chartfeed::candles::{
    Candle, REALTIME_SERIES_LIMIT, Tick, Timeframe, apply_tick, merge_candles,
};
use chartfeed::chart::ChartState;

fn tick(ts_ms: u64, price: f64, volume: Option<f64>) -> Tick {
    Tick {
        symbol: "AAPL".to_string(),
        ts_ms,
        price,
        volume,
    }
}

fn candle(period_start_ms: u64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Candle {
    Candle {
        period_start_ms,
        open,
        high,
        low,
        close,
        volume,
    }
}

/// A steady tick stream across several periods produces one candle per
/// period, all aligned and invariant-respecting
#[test]
fn test_tick_stream_builds_aligned_series() {
    let timeframe = Timeframe::Hour;
    let period = timeframe.period_ms();
    let mut series = Vec::new();

    // Four ticks per period across six periods, prices wobbling around 100
    for p in 0..6u64 {
        for (i, delta) in [0.0, 2.5, -1.5, 1.0].iter().enumerate() {
            let ts = p * period + (i as u64) * 60_000 + 17;
            apply_tick(
                &mut series,
                &tick(ts, 100.0 + *delta + p as f64, Some(1.0)),
                timeframe,
                None,
            );
        }
    }

    assert_eq!(series.len(), 6);
    for (p, candle) in series.iter().enumerate() {
        assert_eq!(candle.period_start_ms, p as u64 * period);
        assert_eq!(candle.period_start_ms % period, 0);
        assert!(candle.low <= candle.open && candle.open <= candle.high);
        assert!(candle.low <= candle.close && candle.close <= candle.high);
        assert_eq!(candle.volume, 4.0);
    }
}

/// A historical boundary of 1000 drops the tick at 1000 and accepts the
/// tick at 1001
#[test]
fn test_boundary_tick_discard() {
    let mut series = Vec::new();
    apply_tick(&mut series, &tick(1000, 5.0, None), Timeframe::Hour, Some(1000));
    assert!(series.is_empty());

    apply_tick(&mut series, &tick(1001, 5.0, None), Timeframe::Hour, Some(1000));
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].open, 5.0);
}

/// A realtime candle sharing the historical tail's period is folded into
/// it, later candles pass through unchanged
#[test]
fn test_merge_with_overlap() {
    let timeframe = Timeframe::Hour;
    let period = timeframe.period_ms();

    let historical = vec![candle(period, 10.0, 10.0, 10.0, 10.0, 1.0)];
    let realtime = vec![
        candle(period, 10.0, 12.0, 9.0, 11.0, 5.0),
        candle(2 * period, 11.0, 11.5, 10.9, 11.2, 2.0),
    ];

    let merged = merge_candles(&historical, &realtime, timeframe);

    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].high, 12.0);
    assert_eq!(merged[0].low, 9.0);
    assert_eq!(merged[0].close, 11.0);
    assert_eq!(merged[0].volume, 6.0);
    assert_eq!(merged[1], realtime[1]);
}

#[test]
fn test_merge_identity_laws() {
    let series = vec![
        candle(0, 1.0, 2.0, 0.5, 1.5, 10.0),
        candle(3_600_000, 1.5, 1.8, 1.2, 1.6, 4.0),
    ];
    assert_eq!(merge_candles(&[], &series, Timeframe::Hour), series);
    assert_eq!(merge_candles(&series, &[], Timeframe::Hour), series);
}

#[test]
fn test_merge_output_is_strictly_ordered_and_unique() {
    let period = Timeframe::Day.period_ms();
    let historical: Vec<Candle> = (0..10)
        .map(|i| candle(i * period, 10.0, 11.0, 9.0, 10.5, 1.0))
        .collect();
    // Realtime overlaps the historical tail by several periods
    let realtime: Vec<Candle> = (7..15)
        .map(|i| candle(i * period, 20.0, 21.0, 19.0, 20.5, 1.0))
        .collect();

    let merged = merge_candles(&historical, &realtime, Timeframe::Day);

    assert_eq!(merged.len(), 15);
    for pair in merged.windows(2) {
        assert!(pair[0].period_start_ms < pair[1].period_start_ms);
    }
}

#[test]
fn test_series_window_never_exceeds_limit() {
    let timeframe = Timeframe::Hour;
    let period = timeframe.period_ms();
    let mut series = Vec::new();

    for i in 0..(REALTIME_SERIES_LIMIT as u64 * 2) {
        apply_tick(&mut series, &tick(i * period, 50.0, None), timeframe, None);
        assert!(series.len() <= REALTIME_SERIES_LIMIT);
    }
    assert_eq!(series.len(), REALTIME_SERIES_LIMIT);
}

/// The full flow a charting consumer sees: snapshot arrives, live ticks
/// stream in, snapshot refreshes, and the chart stays consistent throughout
#[test]
fn test_chart_state_full_cycle() {
    let timeframe = Timeframe::Hour;
    let period = timeframe.period_ms();
    let mut state = ChartState::new(timeframe);

    // Live ticks before any snapshot
    state.on_tick(&tick(10 * period + 100, 100.0, Some(1.0)));
    state.on_tick(&tick(11 * period + 100, 101.0, Some(1.0)));
    assert_eq!(state.chart_candles().len(), 2);

    // Snapshot lands, covering everything up to period 11
    let snapshot: Vec<Candle> = (5..=11)
        .map(|i| candle(i * period, 90.0 + i as f64, 95.0 + i as f64, 85.0, 92.0, 3.0))
        .collect();
    state.set_historical(snapshot);

    // Ticks inside covered periods are dropped, later ones accepted
    state.on_tick(&tick(11 * period + 200, 150.0, Some(1.0)));
    state.on_tick(&tick(12 * period + 50, 103.0, Some(2.0)));

    let chart = state.chart_candles();
    assert_eq!(chart.last().unwrap().period_start_ms, 12 * period);
    assert_eq!(chart.last().unwrap().close, 103.0);
    for pair in chart.windows(2) {
        assert!(pair[0].period_start_ms < pair[1].period_start_ms);
    }
    for c in &chart {
        assert!(c.low <= c.open && c.open <= c.high);
        assert!(c.low <= c.close && c.close <= c.high);
    }
}
