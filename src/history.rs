//! Append-only training history.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::table::{Column, Table};

/// Logs of one epoch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    /// 1-based, continuing across fit calls.
    pub epoch: usize,
    pub logs: BTreeMap<String, f64>,
}

/// Per-epoch records accumulated over every fit of a session.
///
/// Epoch numbers are assigned here rather than by the backend, so a second
/// fit of `K` epochs after `M` recorded ones appends epochs `M+1..=M+K`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    records: Vec<EpochRecord>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    /// Append the logs of a fit call, numbering epochs after the last recorded one.
    pub fn extend<I>(&mut self, epochs: I)
    where
        I: IntoIterator<Item = BTreeMap<String, f64>>,
    {
        let start = self.records.last().map_or(0, |r| r.epoch);
        self.records.extend(
            epochs
                .into_iter()
                .enumerate()
                .map(|(i, logs)| EpochRecord {
                    epoch: start + i + 1,
                    logs,
                }),
        );
    }

    /// Every log name seen in any epoch, sorted.
    pub fn log_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.records.iter().flat_map(|r| r.logs.keys()).collect();
        names.into_iter().cloned().collect()
    }

    pub fn has_log(&self, name: &str) -> bool {
        self.records.iter().any(|r| r.logs.contains_key(name))
    }

    pub fn epochs(&self) -> Vec<usize> {
        self.records.iter().map(|r| r.epoch).collect()
    }

    /// Values of one log over epochs, `None` where an epoch did not report it.
    pub fn values(&self, name: &str) -> Vec<Option<f64>> {
        self.records.iter().map(|r| r.logs.get(name).copied()).collect()
    }

    /// `epoch` followed by one float column per log name.
    pub fn to_table(&self) -> Result<Table> {
        let mut columns = Vec::with_capacity(1 + self.log_names().len());
        columns.push(Column::int(
            "epoch",
            self.records.iter().map(|r| r.epoch as i64).collect(),
        ));
        for name in self.log_names() {
            let values = self.values(&name);
            columns.push(Column::float(name, values));
        }
        Table::new(columns)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }
}
