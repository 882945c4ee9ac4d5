//! Cowns: concurrently-owned objects scheduled through behaviours.
//!
//! A [`Cown`] is a strong handle to a payload the runtime grants exclusive
//! access to, one behaviour at a time. [`WeakCown`] is the observer handle
//! the swap engine registers cowns with: it does not extend the payload's
//! lifetime and can be upgraded only while some strong handle is alive.

use std::cell::UnsafeCell;
use std::fmt;
use std::sync::{Arc, Weak};

use crate::behaviour::BehaviourQueue;
use crate::meta::{CownMeta, SwapState};

/// Stable, address-derived identity of a cown.
///
/// Rendered as lowercase hex; the swap engine uses it as the on-disk file
/// stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CownId(pub(crate) usize);

impl fmt::Display for CownId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.to_be_bytes()))
    }
}

/// Object-safe view of a cown shared by the scheduler and the swap engine.
pub trait CownHeader: Send + Sync {
    /// The cown's metadata block.
    fn meta(&self) -> &CownMeta;

    /// The cown's queue of pending behaviours.
    fn queue(&self) -> &BehaviourQueue;

    /// The cown's stable identity.
    fn id(&self) -> CownId;
}

/// Shared cown storage: metadata, behaviour queue and the payload cell.
pub struct CownInner<T> {
    meta: CownMeta,
    queue: BehaviourQueue,
    payload: UnsafeCell<Option<T>>,
}

// The payload cell is only touched by code holding exclusive scheduling
// access to the cown (behaviour bodies, swap/fetch bodies).
unsafe impl<T: Send> Send for CownInner<T> {}
unsafe impl<T: Send> Sync for CownInner<T> {}

impl<T: Send + 'static> CownInner<T> {
    fn new(payload: T) -> Self {
        Self {
            meta: CownMeta::new(),
            queue: BehaviourQueue::new(),
            payload: UnsafeCell::new(Some(payload)),
        }
    }

    /// Direct access to the payload cell. The cell holds `None` exactly
    /// while the payload is on disk.
    ///
    /// # Safety
    ///
    /// The caller must hold exclusive scheduling access to this cown: either
    /// it is running inside a behaviour whose cown set contains it, or no
    /// behaviour that touches the cown can be in flight.
    pub unsafe fn payload_slot(&self) -> &mut Option<T> {
        unsafe { &mut *self.payload.get() }
    }
}

impl<T: Send + 'static> CownHeader for CownInner<T> {
    fn meta(&self) -> &CownMeta {
        &self.meta
    }

    fn queue(&self) -> &BehaviourQueue {
        &self.queue
    }

    fn id(&self) -> CownId {
        CownId(self as *const Self as *const () as usize)
    }
}

/// Strong handle to a cown.
pub struct Cown<T: Send + 'static> {
    inner: Arc<CownInner<T>>,
}

impl<T: Send + 'static> Cown<T> {
    /// Create a cown owning `payload`.
    pub fn new(payload: T) -> Self {
        Self {
            inner: Arc::new(CownInner::new(payload)),
        }
    }

    /// The cown's stable identity.
    pub fn id(&self) -> CownId {
        CownId(Arc::as_ptr(&self.inner) as *const () as usize)
    }

    /// Current swap state of the payload.
    pub fn state(&self) -> SwapState {
        self.inner.meta().state()
    }

    /// Downgrade to an observer handle.
    pub fn downgrade(&self) -> WeakCown<T> {
        WeakCown {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// The shared storage backing this handle.
    pub fn inner(&self) -> &Arc<CownInner<T>> {
        &self.inner
    }
}

impl<T: Send + 'static> Clone for Cown<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> fmt::Debug for Cown<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cown")
            .field("id", &self.id().to_string())
            .field("state", &self.state())
            .finish()
    }
}

/// Observer handle to a cown; upgrade succeeds iff a strong handle is alive.
pub struct WeakCown<T: Send + 'static> {
    inner: Weak<CownInner<T>>,
}

impl<T: Send + 'static> WeakCown<T> {
    /// Promote observation to ownership, if the cown is still alive.
    pub fn upgrade(&self) -> Option<Cown<T>> {
        self.inner.upgrade().map(|inner| Cown { inner })
    }

    /// Number of strong handles currently alive.
    pub fn strong_count(&self) -> usize {
        self.inner.strong_count()
    }
}

impl<T: Send + 'static> Clone for WeakCown<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_is_stable_across_clones() {
        let cown = Cown::new(1u32);
        let other = cown.clone();
        assert_eq!(cown.id(), other.id());
        assert_eq!(cown.id().to_string().len(), 16);
    }

    #[test]
    fn test_distinct_cowns_have_distinct_ids() {
        let a = Cown::new(1u32);
        let b = Cown::new(1u32);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_weak_upgrade_fails_after_drop() {
        let cown = Cown::new(vec![1u8, 2, 3]);
        let weak = cown.downgrade();
        assert!(weak.upgrade().is_some());
        drop(cown);
        assert_eq!(weak.strong_count(), 0);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_payload_slot_round_trip() {
        let cown = Cown::new(String::from("resident"));
        // Safety: no behaviours are in flight on this cown.
        let slot = unsafe { cown.inner().payload_slot() };
        assert_eq!(slot.as_deref(), Some("resident"));
        let taken = slot.take();
        assert!(taken.is_some());
        assert!(unsafe { cown.inner().payload_slot() }.is_none());
    }
}
