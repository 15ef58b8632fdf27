//! Precision-tagged counter store
//!
//! Every instrumented operation and every finalized object footprint lands
//! here as a `(precise, approx)` pair keyed by a stable string. Counts are
//! monotonically non-decreasing for the process lifetime; readers take a
//! consistent snapshot at export time.

use std::sync::Arc;
use std::sync::Mutex;

use fnv::FnvHashMap;
use std::collections::BTreeMap;

/// A precise/approximate tally for one counter slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrecisionPair {
    pub precise: u64,
    pub approx: u64,
}

impl PrecisionPair {
    fn add(&mut self, approx: bool, amount: u64) {
        if approx {
            self.approx += amount;
        } else {
            self.precise += amount;
        }
    }
}

/// Consistent point-in-time copy of the counter tables, ordered for stable
/// report output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub operations: BTreeMap<String, [u64; 2]>,
    pub footprint: BTreeMap<String, [u64; 2]>,
}

/// Sink for operation and footprint events.
///
/// This is the runtime's single pluggable seam: the host can select an
/// alternate implementation by name (see [`strategy`]). All methods must be
/// safe under concurrent calls from arbitrarily many instrumented sites.
pub trait CounterSink: Send + Sync {
    /// Increment the precise or approximate slot for `name`, creating the
    /// slot on first use.
    fn count_operation(&self, name: &str, approx: bool);

    /// Add `amount` to the precise or approximate slot of a footprint
    /// category (`heap-objects`, `stack-bytes`, ...).
    fn count_footprint(&self, category: &str, approx: bool, amount: u64);

    /// Take a consistent snapshot of both tables.
    fn snapshot(&self) -> CounterSnapshot;
}

/// Default sink: two mutex-guarded FNV maps.
///
/// Critical sections are short and low-contention; coarse per-table locking
/// is sufficient here.
#[derive(Debug, Default)]
pub struct CounterStore {
    operations: Mutex<FnvHashMap<String, PrecisionPair>>,
    footprint: Mutex<FnvHashMap<String, PrecisionPair>>,
}

impl CounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterSink for CounterStore {
    fn count_operation(&self, name: &str, approx: bool) {
        if let Ok(mut table) = self.operations.lock() {
            table.entry(name.to_string()).or_default().add(approx, 1);
        }
    }

    fn count_footprint(&self, category: &str, approx: bool, amount: u64) {
        if let Ok(mut table) = self.footprint.lock() {
            table
                .entry(category.to_string())
                .or_default()
                .add(approx, amount);
        }
    }

    fn snapshot(&self) -> CounterSnapshot {
        let mut snap = CounterSnapshot::default();
        if let Ok(table) = self.operations.lock() {
            for (name, pair) in table.iter() {
                snap.operations
                    .insert(name.clone(), [pair.precise, pair.approx]);
            }
        }
        if let Ok(table) = self.footprint.lock() {
            for (name, pair) in table.iter() {
                snap.footprint
                    .insert(name.clone(), [pair.precise, pair.approx]);
            }
        }
        snap
    }
}

/// Sink that drops everything; selecting it disables accounting overhead
/// while keeping every entry point callable.
#[derive(Debug, Default)]
pub struct DiscardCounters;

impl CounterSink for DiscardCounters {
    fn count_operation(&self, _name: &str, _approx: bool) {}

    fn count_footprint(&self, _category: &str, _approx: bool, _amount: u64) {}

    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot::default()
    }
}

impl std::fmt::Debug for dyn CounterSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CounterSink")
    }
}

type SinkFactory = fn() -> Arc<dyn CounterSink>;

fn make_store() -> Arc<dyn CounterSink> {
    Arc::new(CounterStore::new())
}

fn make_discard() -> Arc<dyn CounterSink> {
    Arc::new(DiscardCounters)
}

/// Named registry of counter sink implementations.
const STRATEGIES: &[(&str, SinkFactory)] = &[("store", make_store), ("discard", make_discard)];

/// Look up a sink factory by strategy name.
pub fn strategy(name: &str) -> Option<SinkFactory> {
    STRATEGIES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, f)| *f)
}

/// Name of the default strategy used when none (or an unknown one) is
/// configured.
pub const DEFAULT_STRATEGY: &str = "store";
