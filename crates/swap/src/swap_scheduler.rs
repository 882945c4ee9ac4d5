//! Construction of swap and fetch behaviours.
//!
//! A swap batch becomes one System behaviour requesting exclusive access to
//! every surviving candidate; its body serializes each payload, frees the
//! in-memory form and leaves the cown `OnDisk`. A matching fetch behaviour
//! is prepared per cown *before* the swap is enqueued and parked in the
//! cown's fetch slot, where the scheduler's dispatch path consumes it the
//! next time user work touches the cown.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use boc_runtime::{Behaviour, BehaviourKind, CownHeader, CownId, FetchAction, RuntimeHandle, SwapState};
use tracing::{debug, error, trace};

use crate::engine::EngineShared;
use crate::swappable::SwapCown;

/// A victim picked by the monitor, referenced weakly until scheduling.
pub struct SwapCandidate {
    pub cown: Weak<dyn SwapCown>,
    pub id: CownId,
    pub size_bytes: u64,
}

/// Schedule one swap behaviour over the surviving candidates of `batch`.
///
/// Candidates whose strong-upgrade fails are returned as the dead list; the
/// caller unregisters them. Candidates that lost the `InMemory -> Swapping`
/// race are handed back to the next selection pass. The caller must have
/// incremented the in-flight counter; the swap body decrements it (or this
/// function does, when nothing survives to schedule).
pub(crate) fn schedule_swap(
    shared: &Arc<EngineShared>,
    rt: &RuntimeHandle,
    batch: Vec<SwapCandidate>,
) -> Vec<CownId> {
    let mut dead = Vec::new();
    let mut survivors: Vec<(Arc<dyn SwapCown>, CownId, u64)> = Vec::new();

    for candidate in batch {
        match candidate.cown.upgrade() {
            None => dead.push(candidate.id),
            Some(cown) => {
                if cown
                    .meta()
                    .transition(SwapState::InMemory, SwapState::Swapping)
                {
                    survivors.push((cown, candidate.id, candidate.size_bytes));
                } else {
                    trace!(
                        "cown {} is already transitioning, returning it to the pool",
                        candidate.id
                    );
                    shared.registry.mark_resident(candidate.id, true);
                }
            }
        }
    }

    if survivors.is_empty() {
        shared.in_flight.fetch_sub(1, Ordering::AcqRel);
        return dead;
    }

    for (cown, id, _) in &survivors {
        prepare_fetch(shared, cown, *id);
    }

    let headers: Vec<Arc<dyn CownHeader>> = survivors
        .iter()
        .map(|(cown, _, _)| Arc::clone(cown).as_header())
        .collect();

    let body_shared = Arc::clone(shared);
    let body = move || {
        for (cown, id, _) in &survivors {
            let path = body_shared.codec.path_for(*id);
            // Safety: this behaviour holds exclusive access to the cown.
            match unsafe { cown.swap_out(&path) } {
                Ok(bytes) => {
                    cown.meta().transition(SwapState::Swapping, SwapState::OnDisk);
                    debug!("swapped cown {} to disk ({} bytes)", id, bytes);
                }
                Err(err) => {
                    error!("swapping cown {} failed, keeping it resident: {}", id, err);
                    cown.meta().take_fetch();
                    cown.meta().transition(SwapState::Swapping, SwapState::InMemory);
                    if let Err(remove_err) = body_shared.codec.remove(*id) {
                        error!("{}", remove_err);
                    }
                    body_shared.registry.mark_resident(*id, true);
                    body_shared.failed.lock().push(*id);
                }
            }
        }
        // The transferred strong references drop with the closure.
        body_shared.in_flight.fetch_sub(1, Ordering::AcqRel);
    };

    rt.schedule(Behaviour::new(headers, BehaviourKind::System, body));
    dead
}

/// Prepare the fetch behaviour for `cown` and park it in the fetch slot.
///
/// The action captures only a weak reference: a stashed fetch must not keep
/// a dropped cown alive.
fn prepare_fetch(shared: &Arc<EngineShared>, cown: &Arc<dyn SwapCown>, id: CownId) {
    let weak = Arc::downgrade(cown);
    let path = shared.codec.path_for(id);
    let shared = Arc::clone(shared);
    let action: FetchAction = Box::new(move || {
        let Some(cown) = weak.upgrade() else {
            // The cown died between dispatch and fetch; nothing to restore.
            return Ok(());
        };
        // Safety: the dispatching worker holds exclusive access.
        if let Err(err) = unsafe { cown.fetch_in(&path) } {
            cown.meta().transition(SwapState::Fetching, SwapState::OnDisk);
            return Err(err);
        }
        cown.meta().transition(SwapState::Fetching, SwapState::InMemory);
        shared.registry.mark_resident(id, true);
        debug!("fetched cown {} back into memory", id);
        Ok(())
    });
    cown.meta().stash_fetch(action);
}
