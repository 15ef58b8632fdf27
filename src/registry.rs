//! Precision registry
//!
//! Tracks which live objects are approximate, and holds the per-object
//! bookkeeping (`ApproxInfo`) that the reaper folds into the counter store
//! at death. The registry never owns or references host objects: identity
//! is a runtime-minted `ObjId` carried by the host-side wrappers, and death
//! arrives through the drop guard in [`crate::reaper`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use fnv::FnvHashMap;

use crate::runtime::Runtime;

/// Identity of a tracked object.
///
/// Minted once per registration; two registrations of the same host value
/// get distinct ids (identity, not value equality). `UNTRACKED` stands for
/// creators outside the instrumented program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjId(pub(crate) u64);

impl ObjId {
    pub const UNTRACKED: ObjId = ObjId(0);
}

/// Per-object accounting record.
///
/// Created at registration, mutated exactly once at death to set
/// `collected_at`, and destroyed once its footprint is folded into the
/// counter store.
#[derive(Debug, Clone)]
pub struct ApproxInfo {
    /// Milliseconds since runtime startup.
    pub created_at: u64,
    /// Set at death; doubles as the idempotence marker for late
    /// notifications.
    pub collected_at: Option<u64>,
    pub approx: bool,
    pub heap: bool,
    pub precise_size: u64,
    pub approx_size: u64,
}

/// Shared tables mapping live registrations to their accounting records.
///
/// `approx_objects` holds only the ids currently registered approximate
/// (it answers `is_approximate`); `deaths` holds every tracked object,
/// precise ones included, purely to receive death notifications.
#[derive(Debug)]
pub struct PrecisionRegistry {
    next_id: AtomicU64,
    approx_objects: Mutex<FnvHashMap<ObjId, ()>>,
    deaths: Mutex<FnvHashMap<ObjId, ApproxInfo>>,
}

impl Default for PrecisionRegistry {
    fn default() -> Self {
        Self {
            // 0 is reserved for ObjId::UNTRACKED.
            next_id: AtomicU64::new(1),
            approx_objects: Mutex::new(FnvHashMap::default()),
            deaths: Mutex::new(FnvHashMap::default()),
        }
    }
}

impl PrecisionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh object identity without registering anything.
    pub fn mint_id(&self) -> ObjId {
        ObjId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Register an object, returning its new identity.
    pub fn insert(
        &self,
        approx: bool,
        heap: bool,
        precise_size: u64,
        approx_size: u64,
        now_ms: u64,
    ) -> ObjId {
        let id = self.mint_id();
        let info = ApproxInfo {
            created_at: now_ms,
            collected_at: None,
            approx,
            heap,
            precise_size,
            approx_size,
        };
        if approx {
            if let Ok(mut table) = self.approx_objects.lock() {
                table.insert(id, ());
            }
        }
        if let Ok(mut table) = self.deaths.lock() {
            table.insert(id, info);
        }
        id
    }

    /// Whether `id` currently has a live approximate-class registration.
    pub fn is_approximate(&self, id: ObjId) -> bool {
        self.approx_objects
            .lock()
            .map(|table| table.contains_key(&id))
            .unwrap_or(false)
    }

    /// Claim an object's record for finalization.
    ///
    /// Removes it from both tables and stamps `collected_at`. Returns `None`
    /// for duplicate or late notifications, making finalization idempotent.
    pub fn take_for_finalize(&self, id: ObjId, now_ms: u64) -> Option<ApproxInfo> {
        let mut info = match self.deaths.lock() {
            Ok(mut table) => table.remove(&id)?,
            Err(_) => return None,
        };
        if let Ok(mut table) = self.approx_objects.lock() {
            table.remove(&id);
        }
        info.collected_at = Some(now_ms);
        Some(info)
    }

    /// Ids of every registration not yet finalized (shutdown sweep).
    pub fn live_ids(&self) -> Vec<ObjId> {
        self.deaths
            .lock()
            .map(|table| table.keys().copied().collect())
            .unwrap_or_default()
    }
}

impl Runtime {
    /// Register an object with the runtime, returning the handle whose drop
    /// signals the object's death.
    ///
    /// Repeated registration of the same host value is not deduplicated:
    /// each call creates a new record and a new handle.
    pub fn mark_approximate(
        &self,
        approx: bool,
        heap: bool,
        precise_size: u64,
        approx_size: u64,
    ) -> crate::reaper::TrackHandle {
        self.register(approx, heap, precise_size, approx_size)
    }

    /// Whether the object behind `id` has a live approximate registration.
    pub fn is_approximate(&self, id: ObjId) -> bool {
        self.registry().is_approximate(id)
    }

    /// Mint an identity for a creator that is not itself tracked (e.g. the
    /// host's top-level driver), so `after_creation` matching stays
    /// per-creator.
    pub fn mint_id(&self) -> ObjId {
        self.registry().mint_id()
    }
}
