pub mod error;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use bt_common::{Bar, Tape};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;

pub use error::{Error, Result};

/// One row of the tape's CSV format: `date, open, high, low, close,
/// volume`, dropped to the single-timeframe case this tape needs (no
/// continuous-contract splicing).
#[derive(Debug, Deserialize)]
struct RawBar {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

fn parse_timestamp(path: &Path, raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Ok(Utc.from_utc_datetime(&naive));
        }
    }
    Err(Error::Timestamp {
        path: path.to_path_buf(),
        raw: raw.to_string(),
    })
}

/// Reads one asset's bar sequence from `<dir>/<asset>.csv`.
pub fn read_asset_csv(dir: &Path, asset: &str) -> Result<Vec<Bar>> {
    let path = dir.join(format!("{asset}.csv"));
    let mut reader = csv::Reader::from_path(&path).map_err(|source| Error::Csv {
        path: path.clone(),
        source,
    })?;

    let mut bars = Vec::new();
    for result in reader.deserialize::<RawBar>() {
        let row = result.map_err(|source| Error::Csv {
            path: path.clone(),
            source,
        })?;
        let timestamp = parse_timestamp(&path, &row.date)?;
        bars.push(Bar {
            timestamp,
            open: row.open,
            high: row.high,
            low: row.low,
            close: row.close,
            volume: row.volume,
        });
    }
    tracing::info!(asset, rows = bars.len(), path = %path.display(), "loaded asset CSV");
    Ok(bars)
}

/// Reads one CSV per asset from `dir` and assembles the `Tape` the core
/// expects. `assets[0]` is the pace driver; its timeline must be
/// non-empty, checked by `Tape::new` itself.
pub fn load_tape(dir: &Path, assets: &[String]) -> Result<Tape> {
    let mut data = HashMap::with_capacity(assets.len());
    for asset in assets {
        let bars = read_asset_csv(dir, asset)?;
        data.insert(asset.clone(), bars);
    }
    Ok(Tape::new(assets.to_vec(), data)?)
}

/// Discovers assets by scanning `dir` for `*.csv` files, ordering them
/// alphabetically except for an optional pace asset forced to the front.
pub fn discover_assets(dir: &Path, pace_asset: Option<&str>) -> Result<Vec<String>> {
    let mut assets: Vec<String> = std::fs::read_dir(dir)
        .map_err(|source| Error::Open {
            path: dir.to_path_buf(),
            source,
        })?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            let path: PathBuf = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("csv") {
                path.file_stem().and_then(|s| s.to_str()).map(String::from)
            } else {
                None
            }
        })
        .collect();
    assets.sort();

    if let Some(pace) = pace_asset {
        if let Some(pos) = assets.iter().position(|a| a == pace) {
            let asset = assets.remove(pos);
            assets.insert(0, asset);
        }
    }
    Ok(assets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn parses_rfc3339_and_naive_timestamps() {
        let path = Path::new("BTC.csv");
        let a = parse_timestamp(path, "2024-01-01T00:00:00Z").unwrap();
        let b = parse_timestamp(path, "2024-01-01 00:00:00").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn rejects_garbage_timestamp() {
        let path = Path::new("BTC.csv");
        let err = parse_timestamp(path, "not-a-date").unwrap_err();
        assert!(matches!(err, Error::Timestamp { .. }));
    }
}
