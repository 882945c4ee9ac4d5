//! Per-cown metadata shared between the scheduler and the swap engine.
//!
//! Every cown carries one [`CownMeta`] block: the atomic swap-state machine,
//! the access counters consulted by the replacement policies, and the slot a
//! prepared fetch behaviour is stashed in while the payload lives on disk.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// Process-wide epoch for access timestamps.
static EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Nanoseconds elapsed since the process epoch, monotone.
pub(crate) fn monotonic_nanos() -> u64 {
    EPOCH.elapsed().as_nanos() as u64
}

/// Lifecycle marker of a cown's payload.
///
/// `InMemory` and `OnDisk` are the stable states; `Swapping` and `Fetching`
/// are transient while an eviction or a re-materialization is in flight.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    /// Payload resident, no swap activity pending.
    InMemory = 0,
    /// A swap behaviour is scheduled or running; the payload stays valid
    /// until it completes.
    Swapping = 1,
    /// Payload serialized and freed; a fetch behaviour is stashed in the
    /// cown's fetch slot.
    OnDisk = 2,
    /// Fetch behaviour running; the payload is being reconstructed.
    Fetching = 3,
}

impl SwapState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SwapState::InMemory,
            1 => SwapState::Swapping,
            2 => SwapState::OnDisk,
            3 => SwapState::Fetching,
            _ => unreachable!("invalid swap state discriminant: {value}"),
        }
    }
}

/// A prepared fetch, stashed at swap time and consumed by the dispatch path.
///
/// The action is `FnMut` so a failed fetch can be retried without being
/// prepared again; on success it is simply dropped.
pub type FetchAction = Box<dyn FnMut() -> io::Result<()> + Send>;

/// Metadata block attached to every cown.
pub struct CownMeta {
    state: AtomicU8,
    num_accesses: AtomicU64,
    last_access: AtomicU64,
    accessed: AtomicBool,
    fetch: Mutex<Option<FetchAction>>,
}

impl CownMeta {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(SwapState::InMemory as u8),
            num_accesses: AtomicU64::new(0),
            last_access: AtomicU64::new(0),
            accessed: AtomicBool::new(false),
            fetch: Mutex::new(None),
        }
    }

    /// Current swap state.
    pub fn state(&self) -> SwapState {
        SwapState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Attempt the `from -> to` transition; returns whether the CAS won.
    pub fn transition(&self, from: SwapState, to: SwapState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record a behaviour acquisition. Counters are relaxed; the policies
    /// tolerate stale reads.
    pub fn record_access(&self) {
        self.num_accesses.fetch_add(1, Ordering::Relaxed);
        self.last_access.store(monotonic_nanos(), Ordering::Relaxed);
        self.accessed.store(true, Ordering::Relaxed);
    }

    /// Total number of behaviour acquisitions (LFU key).
    pub fn accesses(&self) -> u64 {
        self.num_accesses.load(Ordering::Relaxed)
    }

    /// Timestamp of the most recent acquisition (LRU key).
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    /// Clear the second-chance bit, returning whether it was set.
    ///
    /// This only touches the bit; the access counter survives the sweep.
    pub fn take_accessed(&self) -> bool {
        self.accessed.swap(false, Ordering::Relaxed)
    }

    /// Stash a prepared fetch behaviour for the next acquisition to consume.
    pub fn stash_fetch(&self, action: FetchAction) {
        *self.fetch.lock() = Some(action);
    }

    /// Take the stashed fetch behaviour, if any.
    pub fn take_fetch(&self) -> Option<FetchAction> {
        self.fetch.lock().take()
    }

    /// Whether a fetch behaviour is currently stashed.
    pub fn has_fetch(&self) -> bool {
        self.fetch.lock().is_some()
    }
}

impl Default for CownMeta {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_in_memory() {
        let meta = CownMeta::new();
        assert_eq!(meta.state(), SwapState::InMemory);
        assert_eq!(meta.accesses(), 0);
        assert!(!meta.has_fetch());
    }

    #[test]
    fn test_transition_follows_the_swap_cycle() {
        let meta = CownMeta::new();
        assert!(meta.transition(SwapState::InMemory, SwapState::Swapping));
        assert!(meta.transition(SwapState::Swapping, SwapState::OnDisk));
        assert!(meta.transition(SwapState::OnDisk, SwapState::Fetching));
        assert!(meta.transition(SwapState::Fetching, SwapState::InMemory));
        assert_eq!(meta.state(), SwapState::InMemory);
    }

    #[test]
    fn test_transition_rejects_wrong_source_state() {
        let meta = CownMeta::new();
        assert!(!meta.transition(SwapState::OnDisk, SwapState::Fetching));
        assert_eq!(meta.state(), SwapState::InMemory);
        // A lost race leaves the state untouched.
        assert!(meta.transition(SwapState::InMemory, SwapState::Swapping));
        assert!(!meta.transition(SwapState::InMemory, SwapState::Swapping));
        assert_eq!(meta.state(), SwapState::Swapping);
    }

    #[test]
    fn test_error_back_edges() {
        let meta = CownMeta::new();
        assert!(meta.transition(SwapState::InMemory, SwapState::Swapping));
        assert!(meta.transition(SwapState::Swapping, SwapState::InMemory));

        assert!(meta.transition(SwapState::InMemory, SwapState::Swapping));
        assert!(meta.transition(SwapState::Swapping, SwapState::OnDisk));
        assert!(meta.transition(SwapState::OnDisk, SwapState::Fetching));
        assert!(meta.transition(SwapState::Fetching, SwapState::OnDisk));
        assert_eq!(meta.state(), SwapState::OnDisk);
    }

    #[test]
    fn test_record_access_updates_counters() {
        let meta = CownMeta::new();
        meta.record_access();
        let first = meta.last_access();
        meta.record_access();
        assert_eq!(meta.accesses(), 2);
        assert!(meta.last_access() >= first);
        assert!(meta.take_accessed());
        assert!(!meta.take_accessed());
        // Clearing the second-chance bit must not reset the LFU counter.
        assert_eq!(meta.accesses(), 2);
    }

    #[test]
    fn test_fetch_slot_is_one_shot() {
        let meta = CownMeta::new();
        meta.stash_fetch(Box::new(|| Ok(())));
        assert!(meta.has_fetch());
        assert!(meta.take_fetch().is_some());
        assert!(meta.take_fetch().is_none());
    }
}
