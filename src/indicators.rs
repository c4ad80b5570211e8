use crate::config::BacktestConfig;
use crate::models::Candle;

pub const RSI_NEUTRAL: f64 = 50.0;
/// Floor for the seeded average loss when the seed window has no losses.
const RSI_SEED_LOSS_FLOOR: f64 = 1e-9;
const RSI_EPSILON: f64 = 1e-12;

/// EMA seeded with the first value rather than a windowed average.
pub fn calculate_ema(values: &[f64], span: usize) -> Vec<f64> {
    if values.is_empty() {
        return Vec::new();
    }

    let alpha = 2.0 / (span as f64 + 1.0);
    let mut ema_values = Vec::with_capacity(values.len());
    let mut previous = values[0];
    ema_values.push(previous);

    for &value in &values[1..] {
        previous += (value - previous) * alpha;
        ema_values.push(previous);
    }

    ema_values
}

/// Rolling mean; element `k` covers `values[k..k + period]`, so the output is
/// `period - 1` elements shorter than the input.
pub fn calculate_sma(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period {
        return Vec::new();
    }

    let mut sma_values = Vec::with_capacity(values.len() + 1 - period);
    let mut window_sum: f64 = values[..period].iter().sum();
    sma_values.push(window_sum / period as f64);
    for i in period..values.len() {
        window_sum += values[i] - values[i - period];
        sma_values.push(window_sum / period as f64);
    }

    sma_values
}

/// Wilder RSI. The first `period + 1` entries are the neutral placeholder, and
/// inputs too short to seed the averages yield an all-neutral series.
pub fn calculate_rsi(values: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || values.len() < period + 1 {
        return vec![RSI_NEUTRAL; values.len()];
    }

    let (gains, losses): (Vec<f64>, Vec<f64>) = values
        .windows(2)
        .map(|pair| {
            let delta = pair[1] - pair[0];
            if delta > 0.0 {
                (delta, 0.0)
            } else {
                (0.0, -delta)
            }
        })
        .unzip();

    let period_f = period as f64;
    let mut avg_gain = gains[..period].iter().sum::<f64>() / period_f;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period_f;
    if avg_loss == 0.0 {
        avg_loss = RSI_SEED_LOSS_FLOOR;
    }

    let mut rsi_values = Vec::with_capacity(values.len());
    rsi_values.resize(period + 1, RSI_NEUTRAL);
    for (gain, loss) in gains[period..].iter().zip(&losses[period..]) {
        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
        let rs = avg_gain / (avg_loss + RSI_EPSILON);
        rsi_values.push(100.0 - 100.0 / (1.0 + rs));
    }

    rsi_values
}

/// ATR as the SMA of true range. True range starts at index 1, so element `k`
/// of the result belongs to bar `k + period`.
pub fn calculate_atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<f64> {
    let len = highs.len().min(lows.len()).min(closes.len());
    if len < 2 {
        return Vec::new();
    }

    let tr_values: Vec<f64> = (1..len)
        .map(|i| {
            (highs[i] - lows[i])
                .max((highs[i] - closes[i - 1]).abs())
                .max((lows[i] - closes[i - 1]).abs())
        })
        .collect();

    calculate_sma(&tr_values, period)
}

/// Every indicator series a run consults, computed once up front.
#[derive(Debug, Clone)]
pub struct IndicatorSet {
    pub ema_fast: Vec<f64>,
    pub ema_slow: Vec<f64>,
    pub rsi: Vec<f64>,
    pub atr: Vec<f64>,
    pub atr_period: usize,
}

impl IndicatorSet {
    pub fn compute(candles: &[Candle], config: &BacktestConfig) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = candles.iter().map(|c| c.low).collect();

        Self {
            ema_fast: calculate_ema(&closes, config.ema_fast_span),
            ema_slow: calculate_ema(&closes, config.ema_slow_span),
            rsi: calculate_rsi(&closes, config.rsi_period),
            atr: calculate_atr(&highs, &lows, &closes, config.atr_period),
            atr_period: config.atr_period,
        }
    }

    /// ATR value belonging to candle `candle_index`, if the warm-up has passed.
    pub fn atr_at(&self, candle_index: usize) -> Option<f64> {
        candle_index
            .checked_sub(self.atr_period)
            .and_then(|k| self.atr.get(k))
            .copied()
    }
}
