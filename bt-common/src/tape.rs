use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// A single OHLCV bar for one asset at one timestamp.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bar {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Read-only, time-indexed per-asset bar store. `assets()[0]` is the pace
/// driver the engine steps on; every other asset is simply queried at
/// the timestamps the pace driver produces.
///
/// Validation happens once, at construction, rather than on every lookup:
/// every asset's bar sequence must be strictly increasing with no
/// duplicate timestamps, and the pace driver's sequence must be
/// non-empty.
#[derive(Debug, Clone)]
pub struct Tape {
    assets: Vec<String>,
    series: HashMap<String, Vec<Bar>>,
    index: HashMap<String, HashMap<DateTime<Utc>, usize>>,
}

impl Tape {
    pub fn new(assets: Vec<String>, data: HashMap<String, Vec<Bar>>) -> Result<Tape> {
        if assets.is_empty() {
            return Err(Error::Config("tape requires at least one asset".into()));
        }
        let pace = &assets[0];
        let pace_bars = data
            .get(pace)
            .ok_or_else(|| Error::Config(format!("pace asset '{pace}' has no bar data")))?;
        if pace_bars.is_empty() {
            return Err(Error::Config(format!("pace asset '{pace}' has an empty timeline")));
        }

        let mut index = HashMap::with_capacity(assets.len());
        for asset in &assets {
            let bars = data
                .get(asset)
                .ok_or_else(|| Error::Config(format!("asset '{asset}' has no bar data")))?;
            let mut by_ts = HashMap::with_capacity(bars.len());
            for (i, bar) in bars.iter().enumerate() {
                if i > 0 && bar.timestamp <= bars[i - 1].timestamp {
                    return Err(Error::Config(format!(
                        "asset '{asset}' timeline is not strictly increasing at index {i}"
                    )));
                }
                by_ts.insert(bar.timestamp, i);
            }
            index.insert(asset.clone(), by_ts);
        }

        Ok(Tape {
            assets,
            series: data,
            index,
        })
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    fn bar_index(&self, asset: &str, ts: DateTime<Utc>) -> Result<usize> {
        self.index
            .get(asset)
            .ok_or_else(|| Error::AssetNotFound(asset.to_string()))?
            .get(&ts)
            .copied()
            .ok_or(Error::TimestampNotFound {
                asset: asset.to_string(),
                timestamp: ts,
            })
    }

    pub fn ohlcv(&self, asset: &str, ts: DateTime<Utc>) -> Result<&Bar> {
        let i = self.bar_index(asset, ts)?;
        Ok(&self.series[asset][i])
    }

    pub fn price(&self, asset: &str, ts: DateTime<Utc>) -> Result<f64> {
        Ok(self.ohlcv(asset, ts)?.close)
    }

    pub fn first_ts(&self, asset: &str) -> Result<DateTime<Utc>> {
        let bars = self
            .series
            .get(asset)
            .ok_or_else(|| Error::AssetNotFound(asset.to_string()))?;
        Ok(bars[0].timestamp)
    }

    pub fn last_ts(&self, asset: &str) -> Result<DateTime<Utc>> {
        let bars = self
            .series
            .get(asset)
            .ok_or_else(|| Error::AssetNotFound(asset.to_string()))?;
        Ok(bars[bars.len() - 1].timestamp)
    }

    /// Returns `(end_of_tape, next_timestamp)`. `end_of_tape` is `true`
    /// and `next_timestamp` is `None` when `ts` names the last bar.
    pub fn next_ts(&self, asset: &str, ts: DateTime<Utc>) -> Result<(bool, Option<DateTime<Utc>>)> {
        let i = self.bar_index(asset, ts)?;
        let bars = &self.series[asset];
        if i + 1 >= bars.len() {
            Ok((true, None))
        } else {
            Ok((false, Some(bars[i + 1].timestamp)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar(ts_secs: i64, close: f64) -> Bar {
        Bar {
            timestamp: Utc.timestamp_opt(ts_secs, 0).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn rejects_non_monotonic_timeline() {
        let mut data = HashMap::new();
        data.insert("BTC".to_string(), vec![bar(0, 1.0), bar(0, 1.0)]);
        let err = Tape::new(vec!["BTC".to_string()], data).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn next_ts_reports_end_of_tape() {
        let mut data = HashMap::new();
        data.insert("BTC".to_string(), vec![bar(0, 1.0), bar(3600, 2.0)]);
        let tape = Tape::new(vec!["BTC".to_string()], data).unwrap();
        let first = tape.first_ts("BTC").unwrap();
        let (end, next) = tape.next_ts("BTC", first).unwrap();
        assert!(!end);
        let last = next.unwrap();
        assert_eq!(last, tape.last_ts("BTC").unwrap());
        let (end, next) = tape.next_ts("BTC", last).unwrap();
        assert!(end);
        assert!(next.is_none());
    }
}
