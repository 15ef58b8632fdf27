//! Aggregate report serialization
//!
//! The shutdown export: a JSON document with exactly two top-level keys,
//! `operations` and `footprint`, each mapping a counter name to a
//! `[precise, approx]` pair. Persistence failure is logged and never
//! escalated; the process is already exiting when this runs.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::counters::CounterSnapshot;
use crate::error::RuntimeError;

/// The exported accounting document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Report {
    /// Operation name to `[precise, approx]` counts.
    pub operations: BTreeMap<String, [u64; 2]>,
    /// Footprint category to `[precise, approx]` totals. Categories follow
    /// `<heap|stack>-objects` (milliseconds) and `<heap|stack>-bytes`
    /// (byte-milliseconds).
    pub footprint: BTreeMap<String, [u64; 2]>,
}

impl Report {
    pub fn from_snapshot(snapshot: CounterSnapshot) -> Self {
        Self {
            operations: snapshot.operations,
            footprint: snapshot.footprint,
        }
    }

    /// Serialize to pretty-printed JSON.
    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a previously exported report.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Persist the report to `path`.
    pub fn write_to(&self, path: &Path) -> Result<(), RuntimeError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|source| RuntimeError::ReportWrite {
            path: path.to_path_buf(),
            source,
        })
    }
}
