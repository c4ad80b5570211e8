use crate::models::{BacktestResult, Trade};
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub total_profit: f64,
    pub avg_profit: f64,
    pub profit_std_dev: f64,
    pub best_trade: f64,
    pub worst_trade: f64,
    pub total_return_ratio: f64,
    pub max_drawdown_ratio: f64,
}

pub struct PerformanceCalculator;

impl PerformanceCalculator {
    pub fn calculate(result: &BacktestResult) -> TradeStats {
        Self::calculate_from_trades(&result.trades, result.initial_balance, result.final_balance)
    }

    pub fn calculate_from_trades(
        trades: &[Trade],
        initial_balance: f64,
        final_balance: f64,
    ) -> TradeStats {
        let profits: Vec<f64> = trades.iter().map(|t| t.profit).collect();
        let total_trades = profits.len();
        let wins = profits.iter().filter(|&&p| p > 0.0).count();
        let losses = profits.iter().filter(|&&p| p < 0.0).count();
        let win_rate = if total_trades > 0 {
            wins as f64 / total_trades as f64
        } else {
            0.0
        };

        let total_profit: f64 = profits.iter().sum();
        let avg_profit = if profits.is_empty() {
            0.0
        } else {
            profits.iter().mean()
        };
        let profit_std_dev = if profits.len() < 2 {
            0.0
        } else {
            finite_or_zero(profits.iter().std_dev())
        };
        let best_trade = if profits.is_empty() {
            0.0
        } else {
            profits.iter().copied().fold(f64::NEG_INFINITY, f64::max)
        };
        let worst_trade = if profits.is_empty() {
            0.0
        } else {
            profits.iter().copied().fold(f64::INFINITY, f64::min)
        };

        let total_return_ratio = if initial_balance > 0.0 {
            finite_or_zero((final_balance - initial_balance) / initial_balance)
        } else {
            0.0
        };

        TradeStats {
            total_trades,
            wins,
            losses,
            win_rate,
            total_profit,
            avg_profit,
            profit_std_dev,
            best_trade,
            worst_trade,
            total_return_ratio,
            max_drawdown_ratio: Self::calculate_max_drawdown(trades, initial_balance),
        }
    }

    /// Largest peak-to-trough decline of the realized balance path, as a
    /// fraction of the peak.
    pub fn calculate_max_drawdown(trades: &[Trade], initial_balance: f64) -> f64 {
        let balances =
            std::iter::once(initial_balance).chain(trades.iter().map(|t| t.balance_after));

        let mut peak = f64::NEG_INFINITY;
        let mut max_drawdown: f64 = 0.0;
        for balance in balances {
            if balance > peak {
                peak = balance;
            }
            if peak > 0.0 {
                max_drawdown = max_drawdown.max((peak - balance) / peak);
            }
        }
        max_drawdown
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExitReason;

    fn trade(profit: f64, balance_after: f64) -> Trade {
        Trade {
            time: 0,
            entry_time: 0,
            entry: 10.0,
            exit: 10.0,
            quantity: 1.0,
            profit,
            balance_after,
            reason: ExitReason::SignalExit,
        }
    }

    #[test]
    fn empty_ledger_reports_zeroes() {
        let stats = PerformanceCalculator::calculate_from_trades(&[], 10.0, 10.0);
        assert_eq!(stats.total_trades, 0);
        assert_eq!(stats.win_rate, 0.0);
        assert_eq!(stats.avg_profit, 0.0);
        assert_eq!(stats.best_trade, 0.0);
        assert_eq!(stats.max_drawdown_ratio, 0.0);
        assert_eq!(stats.total_return_ratio, 0.0);
    }

    #[test]
    fn counts_wins_losses_and_extremes() {
        let trades = vec![trade(5.0, 105.0), trade(-10.0, 95.0), trade(3.0, 98.0)];
        let stats = PerformanceCalculator::calculate_from_trades(&trades, 100.0, 98.0);
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.wins, 2);
        assert_eq!(stats.losses, 1);
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!((stats.total_profit + 2.0).abs() < 1e-12);
        assert!((stats.avg_profit + 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.best_trade, 5.0);
        assert_eq!(stats.worst_trade, -10.0);
        assert!((stats.total_return_ratio + 0.02).abs() < 1e-12);
        assert!(stats.profit_std_dev > 0.0);
    }

    #[test]
    fn drawdown_measured_from_running_peak() {
        let trades = vec![trade(20.0, 120.0), trade(-30.0, 90.0), trade(40.0, 130.0)];
        let drawdown = PerformanceCalculator::calculate_max_drawdown(&trades, 100.0);
        assert!((drawdown - 0.25).abs() < 1e-12);
    }
}
