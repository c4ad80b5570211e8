use crate::models::{BacktestResult, Trade};
use crate::performance::TradeStats;
use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

#[derive(Serialize)]
struct BacktestReport<'a> {
    #[serde(flatten)]
    result: &'a BacktestResult,
    stats: &'a TradeStats,
}

fn create_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
    }
    File::create(path).with_context(|| format!("Unable to create {}", path.display()))
}

/// Writes the result and its statistics as pretty JSON.
pub fn write_result_json<P: AsRef<Path>>(
    path: P,
    result: &BacktestResult,
    stats: &TradeStats,
) -> Result<()> {
    let path = path.as_ref();
    let mut writer = BufWriter::new(create_file(path)?);
    serde_json::to_writer_pretty(&mut writer, &BacktestReport { result, stats })
        .with_context(|| format!("Failed to serialize backtest result to {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}

/// Writes the trade ledger in processing order, one row per closed trade.
pub fn write_trades_csv<P: AsRef<Path>>(path: P, trades: &[Trade]) -> Result<()> {
    let path = path.as_ref();
    let mut writer = csv::Writer::from_writer(create_file(path)?);
    if trades.is_empty() {
        writer.write_record([
            "time",
            "entry_time",
            "entry",
            "exit",
            "quantity",
            "profit",
            "balance_after",
            "reason",
        ])?;
    }
    for trade in trades {
        writer
            .serialize(trade)
            .with_context(|| format!("Failed to write trade row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("Failed to flush {}", path.display()))?;
    Ok(())
}
