//! Behaviours: ordered units of work over a set of cowns.
//!
//! A behaviour acquires exclusive access to every cown in its set. Each cown
//! keeps a FIFO queue of pending behaviours; a behaviour runs once it has
//! reached the head of every queue it sits in.

use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::cown::CownHeader;

/// Distinguishes user work from the engine's swap/fetch behaviours.
///
/// System behaviours do not refresh a cown's access metadata, so an eviction
/// never counts as a use of its own victim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviourKind {
    User,
    System,
}

type Body = Box<dyn FnOnce() + Send>;

/// A unit of work attached to a set of cowns.
pub struct Behaviour {
    cowns: Vec<Arc<dyn CownHeader>>,
    kind: BehaviourKind,
    /// Count of acquisitions still outstanding, offset by one so the
    /// scheduling thread and releasing predecessors can race on it safely.
    pub(crate) pending: AtomicUsize,
    body: Mutex<Option<Body>>,
}

impl Behaviour {
    /// Build a behaviour over `cowns`. The set is sorted by cown identity
    /// and deduplicated, so requesting the same cown twice is harmless.
    pub fn new<F>(mut cowns: Vec<Arc<dyn CownHeader>>, kind: BehaviourKind, body: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        cowns.sort_by_key(|cown| cown.id());
        cowns.dedup_by(|a, b| a.id() == b.id());
        let pending = AtomicUsize::new(cowns.len() + 1);
        Self {
            cowns,
            kind,
            pending,
            body: Mutex::new(Some(Box::new(body))),
        }
    }

    /// The cowns this behaviour will acquire, in identity order.
    pub fn cowns(&self) -> &[Arc<dyn CownHeader>] {
        &self.cowns
    }

    pub fn kind(&self) -> BehaviourKind {
        self.kind
    }

    pub(crate) fn take_body(&self) -> Option<Body> {
        self.body.lock().take()
    }
}

/// Per-cown FIFO of pending behaviours.
pub struct BehaviourQueue {
    inner: Mutex<VecDeque<Arc<Behaviour>>>,
}

impl BehaviourQueue {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, VecDeque<Arc<Behaviour>>> {
        self.inner.lock()
    }
}

impl Default for BehaviourQueue {
    fn default() -> Self {
        Self::new()
    }
}
