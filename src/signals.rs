use crate::indicators::IndicatorSet;
use crate::models::Candle;

/// Bars averaged by the volume filter.
pub const VOLUME_LOOKBACK: usize = 20;
pub const RSI_LOWER_BAND: f64 = 25.0;
pub const RSI_UPPER_BAND: f64 = 75.0;

/// Filter outcomes for one processing bar. All values are read one bar in
/// arrears: the crossover compares `i - 2` against `i - 1`, and the filters
/// read bar `i - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SignalDecision {
    pub cross_up: bool,
    pub cross_down: bool,
    pub volume_ok: bool,
    pub momentum_ok: bool,
    pub volatility_ok: bool,
}

impl SignalDecision {
    pub fn entry_allowed(&self) -> bool {
        self.cross_up && self.volume_ok && self.momentum_ok && self.volatility_ok
    }

    /// Crossover exits are not gated by the entry filters.
    pub fn exit_signalled(&self) -> bool {
        self.cross_down
    }
}

/// Inputs shared by every bar of a run.
pub struct SignalContext<'a> {
    pub candles: &'a [Candle],
    pub indicators: &'a IndicatorSet,
    pub volume_multiplier: f64,
    pub min_atr_ratio: f64,
}

/// Returns `None` when `index` leaves no room for the two-bar lookback.
pub fn evaluate_signals(context: &SignalContext, index: usize) -> Option<SignalDecision> {
    let SignalContext {
        candles,
        indicators,
        volume_multiplier,
        min_atr_ratio,
    } = *context;

    if index < 2 || index >= candles.len() {
        return None;
    }
    let fast_prev = *indicators.ema_fast.get(index - 2)?;
    let fast_now = *indicators.ema_fast.get(index - 1)?;
    let slow_prev = *indicators.ema_slow.get(index - 2)?;
    let slow_now = *indicators.ema_slow.get(index - 1)?;
    let rsi = *indicators.rsi.get(index - 1)?;

    Some(SignalDecision {
        cross_up: fast_prev <= slow_prev && fast_now > slow_now,
        cross_down: fast_prev >= slow_prev && fast_now < slow_now,
        volume_ok: volume_confirmed(candles, index, volume_multiplier),
        momentum_ok: rsi > RSI_LOWER_BAND && rsi < RSI_UPPER_BAND,
        volatility_ok: volatility_sufficient(candles, indicators, index, min_atr_ratio),
    })
}

/// Bar `index - 1` must out-trade the mean of the 20 bars before it. Passes
/// until enough history exists.
fn volume_confirmed(candles: &[Candle], index: usize, multiplier: f64) -> bool {
    if index <= VOLUME_LOOKBACK + 1 {
        return true;
    }
    let window = &candles[index - VOLUME_LOOKBACK - 1..index - 1];
    let avg_volume = window.iter().map(|c| c.volume).sum::<f64>() / VOLUME_LOOKBACK as f64;
    candles[index - 1].volume > avg_volume * multiplier
}

fn volatility_sufficient(
    candles: &[Candle],
    indicators: &IndicatorSet,
    index: usize,
    min_atr_ratio: f64,
) -> bool {
    if min_atr_ratio <= 0.0 {
        return true;
    }
    match indicators.atr_at(index - 1) {
        Some(atr) => atr / candles[index - 1].close >= min_atr_ratio,
        None => true,
    }
}
