use crate::models::{Candle, Position};

/// Smallest quantity a sized position may carry.
pub const MIN_QUANTITY: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionAllocation {
    pub quantity: f64,
    pub stop_price: f64,
}

pub struct PositionSizingParams {
    pub equity: f64,
    pub risk_fraction: f64,
    pub price: f64,
    pub stop_loss_pct: f64,
}

/// Fixed-fractional sizing: a fill at the stop loses `equity * risk_fraction`.
/// Without a stop distance the whole equity is deployed instead.
pub fn determine_position_size(params: PositionSizingParams) -> PositionAllocation {
    let PositionSizingParams {
        equity,
        risk_fraction,
        price,
        stop_loss_pct,
    } = params;

    let stop_price = price * (1.0 - stop_loss_pct);
    let quantity = if stop_loss_pct <= 0.0 {
        equity / price
    } else {
        let risk_amount = equity * risk_fraction;
        risk_amount / (price * stop_loss_pct).max(f64::MIN_POSITIVE)
    };

    PositionAllocation {
        quantity: if quantity.is_nan() {
            MIN_QUANTITY
        } else {
            quantity.max(MIN_QUANTITY)
        },
        stop_price,
    }
}

/// Long stops fill exactly at the stop price once the bar trades through it.
pub fn stop_loss_exit_price(current_candle: &Candle, position: &Position) -> Option<f64> {
    if current_candle.low <= position.stop_price {
        Some(position.stop_price)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_size_risks_fixed_fraction() {
        let allocation = determine_position_size(PositionSizingParams {
            equity: 1_000.0,
            risk_fraction: 0.02,
            price: 50.0,
            stop_loss_pct: 0.04,
        });
        assert!((allocation.stop_price - 48.0).abs() < 1e-9);
        assert!((allocation.quantity - 10.0).abs() < 1e-9);
        let loss = allocation.quantity * (50.0 - allocation.stop_price);
        assert!((loss - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_stop_deploys_full_equity() {
        let allocation = determine_position_size(PositionSizingParams {
            equity: 250.0,
            risk_fraction: 0.02,
            price: 20.0,
            stop_loss_pct: 0.0,
        });
        assert!((allocation.quantity - 12.5).abs() < 1e-12);
        assert_eq!(allocation.stop_price, 20.0);
    }

    #[test]
    fn test_quantity_is_floored() {
        let allocation = determine_position_size(PositionSizingParams {
            equity: 1e-12,
            risk_fraction: 0.01,
            price: 30_000.0,
            stop_loss_pct: 0.5,
        });
        assert_eq!(allocation.quantity, MIN_QUANTITY);
    }

    #[test]
    fn test_stop_fills_at_stop_price() {
        let position = Position {
            entry_price: 100.0,
            quantity: 1.0,
            stop_price: 99.0,
            entry_time: 0,
        };
        let mut candle = Candle {
            time: 1,
            open: 100.0,
            high: 101.0,
            low: 99.5,
            close: 100.5,
            volume: 1.0,
        };
        assert_eq!(stop_loss_exit_price(&candle, &position), None);

        candle.low = 99.0;
        assert_eq!(stop_loss_exit_price(&candle, &position), Some(99.0));

        // Gapping below the stop still fills at the stop.
        candle.open = 95.0;
        candle.low = 94.0;
        assert_eq!(stop_loss_exit_price(&candle, &position), Some(99.0));
    }
}
