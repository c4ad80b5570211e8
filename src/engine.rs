use crate::config::{BacktestConfig, EquityRule};
use crate::error::BacktestError;
use crate::indicators::IndicatorSet;
use crate::models::{validate_candles, BacktestResult, Candle, ExitReason, Position, Trade};
use crate::signals::{evaluate_signals, SignalContext};
use crate::trading_rules::{determine_position_size, stop_loss_exit_price, PositionSizingParams};

/// Bars skipped at the start so the two-bar lookback stays in range.
const FIRST_PROCESSED_INDEX: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PositionState {
    Flat,
    Holding(Position),
}

/// Mutable state of a single run. Each run owns exactly one.
#[derive(Debug, Clone)]
pub struct RunState {
    equity: f64,
    position: PositionState,
    trades: Vec<Trade>,
    equity_rule: EquityRule,
}

impl RunState {
    pub fn new(initial_balance: f64, equity_rule: EquityRule) -> Self {
        Self {
            equity: initial_balance,
            position: PositionState::Flat,
            trades: Vec::new(),
            equity_rule,
        }
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn position(&self) -> PositionState {
        self.position
    }

    pub fn trades(&self) -> &[Trade] {
        &self.trades
    }

    /// Returns false without touching state when a position is already open.
    pub fn open(&mut self, position: Position) -> bool {
        match self.position {
            PositionState::Holding(_) => false,
            PositionState::Flat => {
                self.position = PositionState::Holding(position);
                true
            }
        }
    }

    /// Closes the open position and settles equity exactly once.
    pub fn close(&mut self, exit_price: f64, time: i64, reason: ExitReason) -> Option<&Trade> {
        let PositionState::Holding(position) = self.position else {
            return None;
        };
        self.position = PositionState::Flat;

        let proceeds = position.quantity * exit_price;
        let profit = proceeds - position.quantity * position.entry_price;
        self.equity = match self.equity_rule {
            EquityRule::ReplaceWithProceeds => proceeds,
            EquityRule::AccumulateProfit => self.equity + profit,
        };
        self.trades.push(Trade {
            time,
            entry_time: position.entry_time,
            entry: position.entry_price,
            exit: exit_price,
            quantity: position.quantity,
            profit,
            balance_after: self.equity,
            reason,
        });
        self.trades.last()
    }

    fn into_result(self, initial_balance: f64, bars_processed: usize) -> BacktestResult {
        BacktestResult {
            initial_balance,
            final_balance: self.equity,
            trades: self.trades,
            open_position: match self.position {
                PositionState::Holding(position) => Some(position),
                PositionState::Flat => None,
            },
            bars_processed,
        }
    }
}

pub struct Engine {
    pub config: BacktestConfig,
}

impl Engine {
    pub fn new(config: BacktestConfig) -> Self {
        Self { config }
    }

    /// Runs the crossover strategy over `candles`. The first two bars and the
    /// last bar are never evaluated, and a position still open at the end is
    /// reported but not liquidated.
    pub fn backtest(&self, candles: &[Candle]) -> Result<BacktestResult, BacktestError> {
        self.config.validate()?;
        validate_candles(candles)?;

        let indicators = IndicatorSet::compute(candles, &self.config);
        let context = SignalContext {
            candles,
            indicators: &indicators,
            volume_multiplier: self.config.volume_multiplier,
            min_atr_ratio: self.config.min_atr_ratio,
        };

        let mut state = RunState::new(self.config.initial_balance, self.config.equity_rule);
        let end = candles.len().saturating_sub(1);
        let mut bars_processed = 0usize;

        for index in FIRST_PROCESSED_INDEX..end {
            let Some(decision) = evaluate_signals(&context, index) else {
                continue;
            };
            bars_processed += 1;
            let candle = &candles[index];

            match state.position() {
                PositionState::Flat => {
                    if decision.entry_allowed() {
                        let allocation = determine_position_size(PositionSizingParams {
                            equity: state.equity(),
                            risk_fraction: self.config.risk_per_trade,
                            price: candle.close,
                            stop_loss_pct: self.config.stop_loss_pct,
                        });
                        if !allocation.quantity.is_finite() {
                            return Err(BacktestError::NumericOverflow { index });
                        }
                        state.open(Position {
                            entry_price: candle.close,
                            quantity: allocation.quantity,
                            stop_price: allocation.stop_price,
                            entry_time: candle.time,
                        });
                    }
                }
                PositionState::Holding(position) => {
                    let exit = if let Some(exit_price) = stop_loss_exit_price(candle, &position) {
                        Some((exit_price, ExitReason::StopLoss))
                    } else if decision.exit_signalled() {
                        Some((candle.close, ExitReason::SignalExit))
                    } else {
                        None
                    };
                    if let Some((exit_price, reason)) = exit {
                        let settled = state
                            .close(exit_price, candle.time, reason)
                            .map_or(true, |trade| {
                                trade.profit.is_finite() && trade.balance_after.is_finite()
                            });
                        if !settled {
                            return Err(BacktestError::NumericOverflow { index });
                        }
                    }
                }
            }
        }

        Ok(state.into_result(self.config.initial_balance, bars_processed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(entry_price: f64, quantity: f64) -> Position {
        Position {
            entry_price,
            quantity,
            stop_price: entry_price * 0.99,
            entry_time: 0,
        }
    }

    #[test]
    fn run_state_rejects_second_entry() {
        let mut state = RunState::new(100.0, EquityRule::ReplaceWithProceeds);
        assert!(state.open(position(10.0, 2.0)));
        assert!(!state.open(position(20.0, 5.0)));
        assert_eq!(state.position(), PositionState::Holding(position(10.0, 2.0)));
    }

    #[test]
    fn close_without_position_is_a_no_op() {
        let mut state = RunState::new(100.0, EquityRule::ReplaceWithProceeds);
        assert!(state.close(10.0, 1, ExitReason::SignalExit).is_none());
        assert_eq!(state.equity(), 100.0);
        assert!(state.trades().is_empty());
    }

    #[test]
    fn close_replaces_equity_with_proceeds() {
        let mut state = RunState::new(100.0, EquityRule::ReplaceWithProceeds);
        state.open(position(10.0, 4.0));
        let trade = state.close(12.0, 7, ExitReason::SignalExit).cloned().unwrap();
        assert!((trade.profit - 8.0).abs() < 1e-12);
        assert!((trade.balance_after - 48.0).abs() < 1e-12);
        assert_eq!(trade.time, 7);
        assert_eq!(state.equity(), trade.balance_after);
        assert_eq!(state.position(), PositionState::Flat);
    }

    #[test]
    fn close_accumulates_profit_when_configured() {
        let mut state = RunState::new(100.0, EquityRule::AccumulateProfit);
        state.open(position(10.0, 4.0));
        let trade = state.close(9.0, 3, ExitReason::StopLoss).cloned().unwrap();
        assert!((trade.profit + 4.0).abs() < 1e-12);
        assert!((state.equity() - 96.0).abs() < 1e-12);
    }

    #[test]
    fn backtest_rejects_invalid_config() {
        let engine = Engine::new(BacktestConfig {
            ema_fast_span: 0,
            ..BacktestConfig::default()
        });
        let err = engine.backtest(&[]).unwrap_err();
        assert!(matches!(
            err,
            BacktestError::InvalidConfig {
                field: "ema_fast_span",
                ..
            }
        ));
    }

    #[test]
    fn overflowing_equity_fails_the_run() {
        let flat = |time: i64, price: f64| Candle {
            time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 100.0,
        };
        let mut candles: Vec<Candle> = (0..4).map(|i| flat(i, 100.0)).collect();
        candles.push(Candle {
            time: 4,
            open: 100.0,
            high: 110.0,
            low: 100.0,
            close: 110.0,
            volume: 100.0,
        });
        candles.extend((5..8).map(|i| flat(i, 110.0)));
        candles.push(Candle {
            time: 8,
            open: 110.0,
            high: 110.0,
            low: 100.0,
            close: 100.0,
            volume: 100.0,
        });
        candles.extend((9..12).map(|i| flat(i, 100.0)));

        // Twice the equity is deployed, so the stop-out proceeds exceed f64::MAX.
        let engine = Engine::new(BacktestConfig {
            initial_balance: 1e308,
            ..BacktestConfig::default()
        });
        assert_eq!(
            engine.backtest(&candles),
            Err(BacktestError::NumericOverflow { index: 8 })
        );

        let engine = Engine::new(BacktestConfig {
            initial_balance: 1e300,
            ..BacktestConfig::default()
        });
        let result = engine.backtest(&candles).unwrap();
        assert!(result.final_balance.is_finite());
    }

    #[test]
    fn short_inputs_produce_an_idle_result() {
        let engine = Engine::new(BacktestConfig::default());
        let candle = Candle {
            time: 0,
            open: 1.0,
            high: 1.0,
            low: 1.0,
            close: 1.0,
            volume: 1.0,
        };
        for len in 0..=3 {
            let candles = vec![candle; len];
            let result = engine.backtest(&candles).unwrap();
            assert!(result.trades.is_empty());
            assert_eq!(result.final_balance, result.initial_balance);
            assert_eq!(result.bars_processed, len.saturating_sub(3));
        }
    }
}
