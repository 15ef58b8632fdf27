//! Runtime service object
//!
//! One explicit `Runtime` ties the components together: the counter sink,
//! the precision registry, the per-thread creation stacks, and the reaper
//! thread draining the death channel. The host constructs it at startup and
//! tears it down with [`Runtime::shutdown`], which drains pending deaths,
//! force-finalizes every surviving registration, and exports the report,
//! in that order, always.
//!
//! The handle is cheap to clone and safe to share across however many
//! threads the instrumented program runs.

use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam::channel::{self, Sender};

use crate::counters::{self, CounterSink};
use crate::creation::CreationStacks;
use crate::error::RuntimeError;
use crate::reaper::{self, DeathEvent, TrackHandle};
use crate::registry::{ObjId, PrecisionRegistry};
use crate::report::Report;

/// Millisecond clock relative to runtime startup.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Clock {
    startup: Instant,
}

impl Clock {
    fn new() -> Self {
        Self {
            startup: Instant::now(),
        }
    }

    pub(crate) fn now_ms(&self) -> u64 {
        self.startup.elapsed().as_millis() as u64
    }
}

/// Host-facing configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Where the shutdown report is written. `None` keeps the report
    /// in memory only.
    pub report_path: Option<PathBuf>,
    /// Counter sink strategy name (see [`crate::counters::strategy`]).
    /// Unknown names log a warning and fall back to the default store.
    pub strategy: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            report_path: Some(PathBuf::from("borroso_counts.json")),
            strategy: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct RuntimeInner {
    counters: Arc<dyn CounterSink>,
    registry: Arc<PrecisionRegistry>,
    creations: CreationStacks,
    tx: Sender<DeathEvent>,
    reaper: Mutex<Option<JoinHandle<()>>>,
    clock: Clock,
    config: RuntimeConfig,
    shut_down: AtomicBool,
}

/// The accounting runtime handle.
#[derive(Debug, Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

fn sink_for(name: &str) -> Result<Arc<dyn CounterSink>, RuntimeError> {
    match counters::strategy(name) {
        Some(factory) => Ok(factory()),
        None => Err(RuntimeError::UnknownStrategy(name.to_string())),
    }
}

impl Runtime {
    /// Construct a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Construct a runtime from `config`.
    ///
    /// An unknown strategy name is never fatal: it logs a warning and the
    /// default counter store is used instead.
    pub fn with_config(config: RuntimeConfig) -> Self {
        let counters: Arc<dyn CounterSink> = match config.strategy.as_deref() {
            None => sink_for(counters::DEFAULT_STRATEGY)
                .unwrap_or_else(|_| Arc::new(counters::CounterStore::new())),
            Some(name) => sink_for(name).unwrap_or_else(|err| {
                tracing::warn!(error = %err, "falling back to default counter store");
                Arc::new(counters::CounterStore::new())
            }),
        };

        let registry = Arc::new(PrecisionRegistry::new());
        let clock = Clock::new();
        let (tx, rx) = channel::unbounded();

        let reaper = match reaper::spawn(
            rx,
            Arc::clone(&registry),
            Arc::clone(&counters),
            clock,
        ) {
            Ok(handle) => Some(handle),
            Err(err) => {
                // Deaths will only be folded at shutdown.
                tracing::warn!(error = %err, "reaper thread unavailable");
                None
            }
        };

        Self {
            inner: Arc::new(RuntimeInner {
                counters,
                registry,
                creations: CreationStacks::new(),
                tx,
                reaper: Mutex::new(reaper),
                clock,
                config,
                shut_down: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn register(
        &self,
        approx: bool,
        heap: bool,
        precise_size: u64,
        approx_size: u64,
    ) -> TrackHandle {
        let id = self.inner.registry.insert(
            approx,
            heap,
            precise_size,
            approx_size,
            self.inner.clock.now_ms(),
        );
        TrackHandle::new(id, self.inner.tx.clone())
    }

    /// The live counter sink (snapshots are consistent at any time).
    pub fn counters(&self) -> &dyn CounterSink {
        self.inner.counters.as_ref()
    }

    pub(crate) fn registry(&self) -> &PrecisionRegistry {
        &self.inner.registry
    }

    pub(crate) fn creations(&self) -> &CreationStacks {
        &self.inner.creations
    }

    fn drain_and_finalize(&self) {
        // The mutex serializes concurrent shutdown callers: a second caller
        // blocks here until the first has drained and force-finalized, so
        // every snapshot taken after this returns is complete.
        let Ok(mut guard) = self.inner.reaper.lock() else {
            return;
        };
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        // The channel is FIFO: every death enqueued before the sentinel is
        // finalized before the reaper exits.
        let _ = self.inner.tx.send(DeathEvent::Shutdown);
        if let Some(handle) = guard.take() {
            let _ = handle.join();
        }
        // Objects still alive would otherwise lose their footprint.
        let now = self.inner.clock.now_ms();
        let survivors = self.inner.registry.live_ids();
        if !survivors.is_empty() {
            tracing::debug!(count = survivors.len(), "force-finalizing survivors");
        }
        for id in survivors {
            reaper::finalize(&self.inner.registry, self.inner.counters.as_ref(), id, now);
        }
    }

    /// Drain, force-finalize, and export the report.
    ///
    /// Export failure is logged, never escalated. Calling this more than
    /// once re-exports the (now frozen) counters without re-finalizing.
    pub fn shutdown(&self) -> Report {
        let report = self.shutdown_quiet();
        if let Some(path) = &self.inner.config.report_path {
            match report.write_to(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "report written"),
                Err(err) => tracing::warn!(error = %err, "report export failed"),
            }
        }
        report
    }

    /// Like [`Runtime::shutdown`] but without persisting the report.
    pub fn shutdown_quiet(&self) -> Report {
        self.drain_and_finalize();
        Report::from_snapshot(self.inner.counters.snapshot())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        // Stop the reaper if the host never called shutdown(). The export
        // stays an explicit host responsibility.
        let _ = self.tx.send(DeathEvent::Shutdown);
        if let Ok(mut guard) = self.reaper.lock() {
            if let Some(handle) = guard.take() {
                let _ = handle.join();
            }
        }
    }
}

/// A host value registered with the runtime.
///
/// Owns the value and its tracking handle; dropping the wrapper is the
/// object's death event. Objects constructed outside the instrumented
/// program carry no handle and stay untracked.
#[derive(Debug)]
pub struct Tracked<T> {
    value: T,
    handle: Option<TrackHandle>,
}

impl<T> Tracked<T> {
    /// Register a heap object directly, outside the creation-frame
    /// protocol.
    pub fn new(
        runtime: &Runtime,
        value: T,
        approx: bool,
        precise_size: u64,
        approx_size: u64,
    ) -> Self {
        Self {
            handle: Some(runtime.mark_approximate(approx, true, precise_size, approx_size)),
            value,
        }
    }

    /// Register the value from inside its (instrumented) constructor body,
    /// claiming this thread's top creation frame. Falls back to an
    /// untracked wrapper when no frame is present.
    pub fn from_constructor(runtime: &Runtime, value: T) -> Self {
        Self {
            handle: runtime.enter_constructor(),
            value,
        }
    }

    pub(crate) fn with_handle(value: T, handle: Option<TrackHandle>) -> Self {
        Self { value, handle }
    }

    pub fn id(&self) -> ObjId {
        self.handle
            .as_ref()
            .map(TrackHandle::id)
            .unwrap_or(ObjId::UNTRACKED)
    }

    pub fn is_tracked(&self) -> bool {
        self.handle.is_some()
    }

    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
