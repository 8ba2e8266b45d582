//! Append-only metrics history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Per-batch keys: `batch`, `cd_loss`, `reg_loss`.
/// Per-epoch keys: `epoch`, `lpl`, `dt` (seconds).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    series: BTreeMap<String, Vec<f64>>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: &str, value: f64) {
        self.series.entry(key.to_string()).or_default().push(value);
    }

    /// Values recorded under `key`, oldest first.
    pub fn get(&self, key: &str) -> &[f64] {
        self.series.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last(&self, key: &str) -> Option<f64> {
        self.get(key).last().copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    /// Appends every series of `other` after this one's.
    pub fn extend(&mut self, other: History) {
        for (k, v) in other.series {
            self.series.entry(k).or_default().extend(v);
        }
    }
}
