use crate::error::BacktestError;
use serde::{Deserialize, Serialize};

/// One OHLCV bar. `time` is epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn new(
        time: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, BacktestError> {
        let candle = Candle {
            time,
            open,
            high,
            low,
            close,
            volume,
        };
        candle.check().map_err(|reason| BacktestError::InvalidCandle {
            index: 0,
            reason: reason.to_string(),
        })?;
        Ok(candle)
    }

    fn check(&self) -> Result<(), &'static str> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err("prices must be finite");
        }
        if prices.iter().any(|&p| p <= 0.0) {
            return Err("prices must be positive");
        }
        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err("volume must be finite and non-negative");
        }
        if self.low > self.high {
            return Err("low is above high");
        }
        if self.open < self.low || self.open > self.high {
            return Err("open is outside the low/high range");
        }
        if self.close < self.low || self.close > self.high {
            return Err("close is outside the low/high range");
        }
        Ok(())
    }
}

/// Rejects the whole sequence on the first malformed or out-of-order candle.
pub fn validate_candles(candles: &[Candle]) -> Result<(), BacktestError> {
    let mut previous_time: Option<i64> = None;
    for (index, candle) in candles.iter().enumerate() {
        candle
            .check()
            .map_err(|reason| BacktestError::InvalidCandle {
                index,
                reason: reason.to_string(),
            })?;
        if let Some(previous) = previous_time {
            if candle.time < previous {
                return Err(BacktestError::UnorderedCandles {
                    index,
                    previous,
                    current: candle.time,
                });
            }
        }
        previous_time = Some(candle.time);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub entry_price: f64,
    pub quantity: f64,
    pub stop_price: f64,
    pub entry_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    StopLoss,
    SignalExit,
}

/// A closed position. `time` is the exit bar's time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub time: i64,
    pub entry_time: i64,
    pub entry: f64,
    pub exit: f64,
    pub quantity: f64,
    pub profit: f64,
    pub balance_after: f64,
    pub reason: ExitReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub initial_balance: f64,
    pub final_balance: f64,
    pub trades: Vec<Trade>,
    /// Still open after the last evaluated bar; not reflected in `final_balance`.
    pub open_position: Option<Position>,
    pub bars_processed: usize,
}
