use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tradesim::{
    config::{BacktestConfig, EquityRule, SETTING_KEYS},
    engine::Engine,
    market_data,
    optimizer::{Optimizer, SweepGrid},
    param_utils::format_parameters,
    performance::PerformanceCalculator,
    report,
};

#[derive(Parser)]
#[command(name = "tradesim")]
#[command(about = "Deterministic EMA crossover backtester. Simulation only, no orders are placed.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one backtest over a candle file
    Backtest {
        /// Candle CSV (time,open,high,low,close,volume) or .bin snapshot
        #[arg(long = "data", value_name = "PATH")]
        data: PathBuf,
        #[command(flatten)]
        overrides: ConfigOverrides,
        /// Write the result and statistics as JSON
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
        /// Write the trade ledger as CSV
        #[arg(long = "trades-csv", value_name = "PATH")]
        trades_csv: Option<PathBuf>,
    },
    /// Backtest a grid of parameter combinations in parallel
    Sweep {
        /// Candle CSV or .bin snapshot
        #[arg(long = "data", value_name = "PATH")]
        data: PathBuf,
        #[command(flatten)]
        overrides: SharedOverrides,
        /// Comma separated fast EMA spans
        #[arg(long = "ema-fast", value_delimiter = ',', value_name = "LIST")]
        ema_fast: Vec<usize>,
        /// Comma separated slow EMA spans
        #[arg(long = "ema-slow", value_delimiter = ',', value_name = "LIST")]
        ema_slow: Vec<usize>,
        /// Comma separated risk fractions
        #[arg(long = "risk", value_delimiter = ',', value_name = "LIST")]
        risk: Vec<f64>,
        /// Comma separated stop-loss fractions
        #[arg(long = "stop", value_delimiter = ',', value_name = "LIST")]
        stop: Vec<f64>,
        /// Number of best variations to report
        #[arg(long, default_value_t = 10)]
        top: usize,
        /// Worker thread count (defaults to the number of CPUs)
        #[arg(long)]
        workers: Option<usize>,
    },
    /// Convert a candle CSV into a binary snapshot
    ExportSnapshot {
        /// Source candle CSV
        #[arg(long = "data", value_name = "PATH")]
        data: PathBuf,
        /// Destination snapshot file
        #[arg(short, long = "output", value_name = "PATH")]
        output: PathBuf,
        /// Symbol label stored with the snapshot
        #[arg(long)]
        symbol: Option<String>,
    },
}

/// Command line values take precedence over environment settings.
#[derive(Args, Default)]
struct ConfigOverrides {
    #[command(flatten)]
    shared: SharedOverrides,
    #[arg(long)]
    risk_per_trade: Option<f64>,
    #[arg(long)]
    stop_loss_pct: Option<f64>,
    #[arg(long)]
    ema_fast: Option<usize>,
    #[arg(long)]
    ema_slow: Option<usize>,
}

/// Overrides that are never swept.
#[derive(Args, Default)]
struct SharedOverrides {
    #[arg(long)]
    initial_balance: Option<f64>,
    #[arg(long)]
    rsi_period: Option<usize>,
    #[arg(long)]
    volume_multiplier: Option<f64>,
    #[arg(long)]
    atr_period: Option<usize>,
    #[arg(long)]
    min_atr_ratio: Option<f64>,
    /// replace_with_proceeds or accumulate_profit
    #[arg(long)]
    equity_rule: Option<String>,
}

impl ConfigOverrides {
    fn apply(self, config: BacktestConfig) -> Result<BacktestConfig> {
        let mut config = self.shared.overlay(config)?;
        if let Some(value) = self.risk_per_trade {
            config.risk_per_trade = value;
        }
        if let Some(value) = self.stop_loss_pct {
            config.stop_loss_pct = value;
        }
        if let Some(value) = self.ema_fast {
            config.ema_fast_span = value;
        }
        if let Some(value) = self.ema_slow {
            config.ema_slow_span = value;
        }
        config.validate()?;
        Ok(config)
    }
}

impl SharedOverrides {
    fn overlay(self, mut config: BacktestConfig) -> Result<BacktestConfig> {
        if let Some(value) = self.initial_balance {
            config.initial_balance = value;
        }
        if let Some(value) = self.rsi_period {
            config.rsi_period = value;
        }
        if let Some(value) = self.volume_multiplier {
            config.volume_multiplier = value;
        }
        if let Some(value) = self.atr_period {
            config.atr_period = value;
        }
        if let Some(value) = self.min_atr_ratio {
            config.min_atr_ratio = value;
        }
        if let Some(raw) = self.equity_rule.as_deref() {
            config.equity_rule = EquityRule::parse(raw)?;
        }
        Ok(config)
    }
}

/// Collects the known configuration keys from the process environment.
fn settings_from_env() -> Result<HashMap<String, String>> {
    let mut settings = HashMap::new();
    for key in SETTING_KEYS {
        match env::var(key) {
            Ok(value) => {
                settings.insert(key.to_string(), value);
            }
            Err(env::VarError::NotPresent) => {}
            Err(env::VarError::NotUnicode(_)) => {
                return Err(anyhow!("Environment variable {} is not valid UTF-8", key));
            }
        }
    }
    Ok(settings)
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let Cli { command } = Cli::parse();

    let settings = settings_from_env()?;
    let env_config = BacktestConfig::from_settings_map(&settings)
        .context("Invalid backtest settings in environment")?;

    match command {
        Commands::Backtest {
            data,
            overrides,
            output,
            trades_csv,
        } => {
            let config = overrides.apply(env_config)?;
            run_backtest(config, &data, output, trades_csv)?;
        }
        Commands::Sweep {
            data,
            overrides,
            ema_fast,
            ema_slow,
            risk,
            stop,
            top,
            workers,
        } => {
            // Swept fields are checked per variation, so the base is not validated here.
            let config = overrides.overlay(env_config)?;
            let grid = SweepGrid {
                ema_fast,
                ema_slow,
                risk_per_trade: risk,
                stop_loss_pct: stop,
            };
            run_sweep(config, &data, grid, top, workers)?;
        }
        Commands::ExportSnapshot {
            data,
            output,
            symbol,
        } => {
            info!("Converting {} into snapshot {}", data.display(), output.display());
            let candles = market_data::load_candles_csv(&data)?;
            market_data::save_snapshot(&output, symbol.as_deref(), &candles)?;
            info!(
                "Snapshot with {} candles written to {}",
                candles.len(),
                output.display()
            );
        }
    }

    Ok(())
}

fn run_backtest(
    config: BacktestConfig,
    data: &Path,
    output: Option<PathBuf>,
    trades_csv: Option<PathBuf>,
) -> Result<()> {
    let candles = market_data::load_candles(data)?;
    info!(
        "Backtesting {} candles from {} (EMA {}/{}, RSI {}, risk {:.2}%, stop {:.2}%, equity rule {})",
        candles.len(),
        data.display(),
        config.ema_fast_span,
        config.ema_slow_span,
        config.rsi_period,
        config.risk_per_trade * 100.0,
        config.stop_loss_pct * 100.0,
        config.equity_rule.label()
    );

    let engine = Engine::new(config);
    let result = engine.backtest(&candles)?;
    let stats = PerformanceCalculator::calculate(&result);

    info!(
        "Final balance {:.6} from {:.6} ({:+.2}%). Trades: {}, wins: {}, losses: {}, max drawdown: {:.2}%",
        result.final_balance,
        result.initial_balance,
        stats.total_return_ratio * 100.0,
        stats.total_trades,
        stats.wins,
        stats.losses,
        stats.max_drawdown_ratio * 100.0
    );
    if let Some(position) = &result.open_position {
        warn!(
            "Position opened at {} ({} @ {:.6}) is still open and excluded from the final balance",
            position.entry_time, position.quantity, position.entry_price
        );
    }

    if let Some(path) = output {
        report::write_result_json(&path, &result, &stats)?;
        info!("Result written to {}", path.display());
    }
    if let Some(path) = trades_csv {
        report::write_trades_csv(&path, &result.trades)?;
        info!("Trade ledger written to {}", path.display());
    }
    Ok(())
}

fn run_sweep(
    config: BacktestConfig,
    data: &Path,
    grid: SweepGrid,
    top: usize,
    workers: Option<usize>,
) -> Result<()> {
    let candles = Arc::new(market_data::load_candles(data)?);
    let variations = grid.variations(&config);
    if variations.is_empty() {
        return Err(anyhow!(
            "Sweep grid has no valid combinations (fast spans must be below slow spans)"
        ));
    }

    let mut optimizer = Optimizer::new(config, candles);
    if let Some(count) = workers {
        optimizer = optimizer.with_worker_limit(count);
    }
    let report = optimizer.run(&variations)?;

    info!(
        "Top {} of {} variations by final balance:",
        top.min(report.outcomes.len()),
        report.outcomes.len()
    );
    for (rank, outcome) in report.outcomes.iter().take(top).enumerate() {
        info!(
            "#{} final balance {:.6} ({:+.2}%), trades {}, win rate {:.1}%, max drawdown {:.2}% [{}]",
            rank + 1,
            outcome.result.final_balance,
            outcome.stats.total_return_ratio * 100.0,
            outcome.stats.total_trades,
            outcome.stats.win_rate * 100.0,
            outcome.stats.max_drawdown_ratio * 100.0,
            format_parameters(&outcome.parameters)
        );
    }
    for failure in &report.failures {
        warn!(
            "Variation {} failed: {} [{}]",
            failure.id,
            failure.error,
            format_parameters(&failure.parameters)
        );
    }
    Ok(())
}
