use crate::models::{validate_candles, Candle};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const MARKET_DATA_SNAPSHOT_VERSION: u32 = 1;
const CSV_COLUMNS: usize = 6;

#[derive(Serialize, Deserialize)]
struct MarketDataSnapshot {
    version: u32,
    generated_at: DateTime<Utc>,
    symbol: Option<String>,
    candles: Vec<Candle>,
}

/// Loads candles from a snapshot (`.bin`) or a CSV file, by extension.
pub fn load_candles<P: AsRef<Path>>(path: P) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let is_snapshot = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("bin"))
        .unwrap_or(false);
    if is_snapshot {
        load_snapshot(path)
    } else {
        load_candles_csv(path)
    }
}

pub fn load_candles_csv<P: AsRef<Path>>(path: P) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let file = File::open(path)
        .with_context(|| format!("Failed to open candle file at {}", path.display()))?;
    let candles = parse_candles_csv(BufReader::new(file))
        .with_context(|| format!("Failed to parse candle file at {}", path.display()))?;
    debug!("Loaded {} candles from {}", candles.len(), path.display());
    Ok(candles)
}

/// Parses `time,open,high,low,close,volume` rows. A leading header row is
/// skipped when it names both `time` and `open`; blank rows are ignored.
pub fn parse_candles_csv<R: Read>(reader: R) -> Result<Vec<Candle>> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut candles = Vec::new();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed CSV row {}", row + 1))?;
        if record.iter().all(|field| field.is_empty()) {
            continue;
        }
        if row == 0 && is_header(&record) {
            continue;
        }
        if record.len() < CSV_COLUMNS {
            return Err(anyhow!(
                "Row {} has {} columns, expected {}",
                row + 1,
                record.len(),
                CSV_COLUMNS
            ));
        }

        let time = parse_candle_time(&record[0])
            .with_context(|| format!("Invalid time on row {}", row + 1))?;
        let mut values = [0.0f64; 5];
        for (slot, field) in values.iter_mut().zip(record.iter().skip(1)) {
            *slot = field.parse::<f64>().map_err(|_| {
                anyhow!("Row {} has a non-numeric value '{}'", row + 1, field)
            })?;
        }
        let [open, high, low, close, volume] = values;
        candles.push(Candle {
            time,
            open,
            high,
            low,
            close,
            volume,
        });
    }

    validate_candles(&candles)?;
    Ok(candles)
}

fn is_header(record: &csv::StringRecord) -> bool {
    let line = record
        .iter()
        .collect::<Vec<_>>()
        .join(",")
        .to_ascii_lowercase();
    line.contains("time") && line.contains("open")
}

/// Epoch milliseconds (more than 10 digits), epoch seconds (up to 10 digits),
/// or an ISO-8601 style date/time taken as UTC.
pub fn parse_candle_time(raw: &str) -> Result<i64> {
    let raw = raw.trim();
    if !raw.is_empty() && raw.chars().all(|c| c.is_ascii_digit()) {
        let value: i64 = raw
            .parse()
            .map_err(|_| anyhow!("Timestamp {} is out of range", raw))?;
        return if raw.len() > 10 {
            Ok(value)
        } else {
            value
                .checked_mul(1000)
                .ok_or_else(|| anyhow!("Timestamp {} is out of range", raw))
        };
    }

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(parsed.and_utc().timestamp_millis());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc().timestamp_millis());
        }
    }

    Err(anyhow!("Unrecognized timestamp format: {}", raw))
}

pub fn save_snapshot<P: AsRef<Path>>(
    path: P,
    symbol: Option<&str>,
    candles: &[Candle],
) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create snapshot directory {}", parent.display())
            })?;
        }
    }

    let file = File::create(path).with_context(|| {
        format!(
            "Unable to create market data snapshot at {}",
            path.display()
        )
    })?;
    let mut writer = BufWriter::new(file);
    let snapshot = MarketDataSnapshot {
        version: MARKET_DATA_SNAPSHOT_VERSION,
        generated_at: Utc::now(),
        symbol: symbol.map(str::to_string),
        candles: candles.to_vec(),
    };
    bincode::serialize_into(&mut writer, &snapshot)
        .context("Failed to serialize market data snapshot")?;
    writer
        .flush()
        .context("Failed to flush market data snapshot to disk")?;
    Ok(())
}

pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Vec<Candle>> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| {
        format!("Failed to open market data snapshot at {}", path.display())
    })?;
    let snapshot: MarketDataSnapshot =
        bincode::deserialize_from(BufReader::new(file)).context("Snapshot decode failed")?;

    if snapshot.version != MARKET_DATA_SNAPSHOT_VERSION {
        return Err(anyhow!(
            "Market data snapshot version mismatch (found {}, expected {})",
            snapshot.version,
            MARKET_DATA_SNAPSHOT_VERSION
        ));
    }
    debug!(
        "Loaded {} candles for {} from snapshot generated at {}",
        snapshot.candles.len(),
        snapshot.symbol.as_deref().unwrap_or("unknown symbol"),
        snapshot.generated_at
    );

    validate_candles(&snapshot.candles)?;
    Ok(snapshot.candles)
}
