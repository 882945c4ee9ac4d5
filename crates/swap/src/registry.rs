//! The engine's view of currently-managed cowns.
//!
//! An insertion-ordered vector of weak cown references plus a resident-flag
//! map, guarded by a mutex. The resident byte total is kept in an atomic so
//! swap and fetch callbacks can adjust it without taking the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use boc_runtime::CownId;
use parking_lot::{Mutex, MutexGuard};

use crate::swappable::SwapCown;

/// One registered cown.
pub struct RegistryEntry {
    /// Observer reference; upgrade fails once user code dropped the cown.
    pub cown: Weak<dyn SwapCown>,
    pub id: CownId,
    /// Payload footprint sampled at registration.
    pub size_bytes: u64,
}

/// Mutable registry state, exposed to the victim selector under the lock.
pub struct RegistryInner {
    pub entries: Vec<RegistryEntry>,
    pub resident: HashMap<CownId, bool>,
    /// Cursor for the Round-Robin and Second-Chance policies.
    pub next_cown: usize,
}

/// Mutex-guarded registry plus resident-size accounting.
pub struct Registry {
    inner: Mutex<RegistryInner>,
    cowns_size_bytes: AtomicU64,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                entries: Vec::new(),
                resident: HashMap::new(),
                next_cown: 0,
            }),
            cowns_size_bytes: AtomicU64::new(0),
        }
    }

    /// Lock the registry for selection or bulk edits.
    pub fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock()
    }

    /// Register a cown. Idempotent: a second registration of the same cown
    /// is a no-op. Returns whether a new entry was inserted.
    pub fn add(&self, cown: &Arc<dyn SwapCown>, size_bytes: u64) -> bool {
        let id = cown.id();
        let mut inner = self.inner.lock();
        if inner.resident.contains_key(&id) {
            return false;
        }
        inner.entries.push(RegistryEntry {
            cown: Arc::downgrade(cown),
            id,
            size_bytes,
        });
        inner.resident.insert(id, true);
        self.cowns_size_bytes.fetch_add(size_bytes, Ordering::Relaxed);
        true
    }

    /// Whether `id` is currently registered.
    pub fn contains(&self, id: CownId) -> bool {
        self.inner.lock().resident.contains_key(&id)
    }

    /// Unregister a cown, releasing the weak reference.
    pub fn remove(&self, id: CownId) -> bool {
        let mut inner = self.inner.lock();
        self.remove_locked(&mut inner, id)
    }

    fn remove_locked(&self, inner: &mut RegistryInner, id: CownId) -> bool {
        let Some(position) = inner.entries.iter().position(|entry| entry.id == id) else {
            return false;
        };
        let entry = inner.entries.swap_remove(position);
        if inner.resident.remove(&entry.id).unwrap_or(false) {
            self.cowns_size_bytes
                .fetch_sub(entry.size_bytes, Ordering::Relaxed);
        }
        if inner.next_cown >= inner.entries.len() {
            inner.next_cown = 0;
        }
        true
    }

    /// Flip a cown's resident flag, adjusting the size accounting to match.
    pub fn mark_resident(&self, id: CownId, resident: bool) {
        let mut inner = self.inner.lock();
        self.mark_resident_locked(&mut inner, id, resident);
    }

    /// Variant of [`mark_resident`](Self::mark_resident) for callers already
    /// holding the lock.
    pub fn mark_resident_locked(&self, inner: &mut RegistryInner, id: CownId, resident: bool) {
        let Some(size_bytes) = inner
            .entries
            .iter()
            .find(|entry| entry.id == id)
            .map(|entry| entry.size_bytes)
        else {
            return;
        };
        let Some(flag) = inner.resident.get_mut(&id) else {
            return;
        };
        if *flag == resident {
            return;
        }
        *flag = resident;
        if resident {
            self.cowns_size_bytes.fetch_add(size_bytes, Ordering::Relaxed);
        } else {
            self.cowns_size_bytes.fetch_sub(size_bytes, Ordering::Relaxed);
        }
    }

    /// Drop every entry whose cown has no live strong reference. Returns the
    /// removed ids so the caller can clean their swap files up.
    pub fn sweep_dead(&self) -> Vec<CownId> {
        let mut inner = self.inner.lock();
        let dead: Vec<CownId> = inner
            .entries
            .iter()
            .filter(|entry| entry.cown.strong_count() == 0)
            .map(|entry| entry.id)
            .collect();
        for id in &dead {
            self.remove_locked(&mut inner, *id);
        }
        dead
    }

    /// Unregister everything, releasing all weak references.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.resident.clear();
        inner.next_cown = 0;
        self.cowns_size_bytes.store(0, Ordering::Relaxed);
    }

    /// Number of registered cowns.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte total of resident payloads.
    pub fn cowns_size_bytes(&self) -> u64 {
        self.cowns_size_bytes.load(Ordering::Relaxed)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
