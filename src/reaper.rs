//! Death notifier
//!
//! Object unreachability is detected without the runtime ever holding a
//! reference to the object: registration hands back a [`TrackHandle`] whose
//! embedded [`DeathWatch`] enqueues a death event when dropped. A dedicated
//! reaper thread blocks on the channel and folds each finished object's
//! footprint into the counter store.
//!
//! The hot path only enqueues; all bookkeeping I/O happens on the reaper
//! thread. Shutdown sends a sentinel after any pending deaths, so the FIFO
//! channel guarantees a full drain before the forced finalization sweep.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{Receiver, Sender};

use crate::counters::CounterSink;
use crate::registry::{ObjId, PrecisionRegistry};
use crate::runtime::Clock;

/// Event on the death-notification channel.
#[derive(Debug)]
pub(crate) enum DeathEvent {
    Died(ObjId),
    Shutdown,
}

/// Drop guard that reports its object's death.
///
/// Send failures are ignored: after shutdown the receiver is gone and the
/// object's footprint has already been force-finalized.
#[derive(Debug)]
pub(crate) struct DeathWatch {
    id: ObjId,
    tx: Sender<DeathEvent>,
}

impl Drop for DeathWatch {
    fn drop(&mut self) {
        let _ = self.tx.send(DeathEvent::Died(self.id));
    }
}

/// Handle returned by registration.
///
/// Embeds the object's identity and its death watch; the host-side wrapper
/// (`Tracked<T>`, `LocalSlot<T>`) keeps it alive exactly as long as the
/// object, so dropping the wrapper is the object's death event.
#[derive(Debug)]
pub struct TrackHandle {
    id: ObjId,
    _watch: DeathWatch,
}

impl TrackHandle {
    pub(crate) fn new(id: ObjId, tx: Sender<DeathEvent>) -> Self {
        Self {
            id,
            _watch: DeathWatch { id, tx },
        }
    }

    pub fn id(&self) -> ObjId {
        self.id
    }
}

/// Close out one object's accounting.
///
/// No-op for duplicate or late notifications. Folds the lifetime duration
/// into the `<heap|stack>-objects` bucket and the byte-milliseconds
/// integral into `<heap|stack>-bytes`, precise and approximate sizes each
/// into their own slot.
pub(crate) fn finalize(
    registry: &PrecisionRegistry,
    counters: &dyn CounterSink,
    id: ObjId,
    now_ms: u64,
) {
    let Some(info) = registry.take_for_finalize(id, now_ms) else {
        return;
    };
    let mem_part = if info.heap { "heap" } else { "stack" };
    let duration = now_ms.saturating_sub(info.created_at);

    counters.count_footprint(&format!("{mem_part}-objects"), info.approx, duration);
    // The byte integral saturates so a huge size times a long lifetime
    // pins at the maximum instead of wrapping the counter backwards.
    counters.count_footprint(
        &format!("{mem_part}-bytes"),
        false,
        info.precise_size.saturating_mul(duration),
    );
    counters.count_footprint(
        &format!("{mem_part}-bytes"),
        true,
        info.approx_size.saturating_mul(duration),
    );

    tracing::debug!(
        id = id.0,
        duration_ms = duration,
        approx = info.approx,
        mem = mem_part,
        "object collected"
    );
}

/// Spawn the reaper thread. It blocks on the channel until the shutdown
/// sentinel arrives, finalizing each death as it comes in.
///
/// Spawn failure is reported to the caller, which degrades to
/// shutdown-time-only finalization instead of aborting the host.
pub(crate) fn spawn(
    rx: Receiver<DeathEvent>,
    registry: Arc<PrecisionRegistry>,
    counters: Arc<dyn CounterSink>,
    clock: Clock,
) -> std::io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("borroso-reaper".to_string())
        .spawn(move || {
            while let Ok(event) = rx.recv() {
                match event {
                    DeathEvent::Died(id) => {
                        finalize(&registry, counters.as_ref(), id, clock.now_ms());
                    }
                    DeathEvent::Shutdown => break,
                }
            }
        })
}
