use thiserror::Error;

/// Reasons a backtest run is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BacktestError {
    #[error("invalid configuration for {field}: {reason}")]
    InvalidConfig { field: &'static str, reason: String },

    #[error("invalid candle at index {index}: {reason}")]
    InvalidCandle { index: usize, reason: String },

    #[error("candle at index {index} has time {current} before previous time {previous}")]
    UnorderedCandles {
        index: usize,
        previous: i64,
        current: i64,
    },

    /// Position size or equity left the finite range while simulating.
    #[error("equity is no longer finite at candle index {index}")]
    NumericOverflow { index: usize },
}

impl BacktestError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        BacktestError::InvalidConfig {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BacktestError::config("ema_fast_span", "must be greater than zero");
        assert_eq!(
            err.to_string(),
            "invalid configuration for ema_fast_span: must be greater than zero"
        );

        let err = BacktestError::UnorderedCandles {
            index: 3,
            previous: 2_000,
            current: 1_000,
        };
        assert_eq!(
            err.to_string(),
            "candle at index 3 has time 1000 before previous time 2000"
        );

        let err = BacktestError::NumericOverflow { index: 8 };
        assert_eq!(err.to_string(), "equity is no longer finite at candle index 8");
    }
}
