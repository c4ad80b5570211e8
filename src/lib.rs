pub mod config;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod market_data;
pub mod models;
pub mod optimizer;
pub mod param_utils;
pub mod performance;
pub mod report;
pub mod signals;
pub mod trading_rules;

pub use config::{BacktestConfig, EquityRule};
pub use engine::{Engine, PositionState, RunState};
pub use error::BacktestError;
pub use models::{BacktestResult, Candle, ExitReason, Position, Trade};
