//! Ergonomic behaviour construction over one or more cowns.
//!
//! `when` schedules a closure that receives exclusive access to the cown's
//! payload. By the time a body runs, the payload is resident: the dispatch
//! path re-materializes swapped-out cowns first.

use std::sync::Arc;

use crate::behaviour::{Behaviour, BehaviourKind};
use crate::cown::{Cown, CownHeader};
use crate::scheduler::RuntimeHandle;

fn expect_resident<T>(slot: &mut Option<T>) -> &mut T {
    slot.as_mut()
        .expect("payload must be resident when a behaviour body runs")
}

/// Schedule `body` with exclusive access to `cown`.
pub fn when<T, F>(rt: &RuntimeHandle, cown: &Cown<T>, body: F)
where
    T: Send + 'static,
    F: FnOnce(&mut T) + Send + 'static,
{
    let cown = cown.clone();
    let header: Arc<dyn CownHeader> = Arc::clone(cown.inner()) as Arc<dyn CownHeader>;
    rt.schedule(Behaviour::new(vec![header], BehaviourKind::User, move || {
        // Safety: this behaviour holds exclusive access to the cown.
        let slot = unsafe { cown.inner().payload_slot() };
        body(expect_resident(slot));
    }));
}

/// Schedule `body` with exclusive access to two distinct cowns.
///
/// Panics if both arguments are the same cown.
pub fn when2<A, B, F>(rt: &RuntimeHandle, a: &Cown<A>, b: &Cown<B>, body: F)
where
    A: Send + 'static,
    B: Send + 'static,
    F: FnOnce(&mut A, &mut B) + Send + 'static,
{
    assert_ne!(a.id(), b.id(), "when2 requires two distinct cowns");
    let a = a.clone();
    let b = b.clone();
    let headers: Vec<Arc<dyn CownHeader>> = vec![
        Arc::clone(a.inner()) as Arc<dyn CownHeader>,
        Arc::clone(b.inner()) as Arc<dyn CownHeader>,
    ];
    rt.schedule(Behaviour::new(headers, BehaviourKind::User, move || {
        // Safety: this behaviour holds exclusive access to both cowns.
        let slot_a = unsafe { a.inner().payload_slot() };
        let slot_b = unsafe { b.inner().payload_slot() };
        body(expect_resident(slot_a), expect_resident(slot_b));
    }));
}

/// Schedule `body` with exclusive access to a batch of same-typed cowns,
/// in the order given.
///
/// Panics if the batch contains the same cown twice.
pub fn when_all<T, F>(rt: &RuntimeHandle, cowns: &[Cown<T>], body: F)
where
    T: Send + 'static,
    F: FnOnce(&mut [&mut T]) + Send + 'static,
{
    let mut ids: Vec<_> = cowns.iter().map(|c| c.id()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), cowns.len(), "when_all requires distinct cowns");

    let cowns: Vec<Cown<T>> = cowns.to_vec();
    let headers: Vec<Arc<dyn CownHeader>> = cowns
        .iter()
        .map(|c| Arc::clone(c.inner()) as Arc<dyn CownHeader>)
        .collect();
    rt.schedule(Behaviour::new(headers, BehaviourKind::User, move || {
        // Safety: this behaviour holds exclusive access to every cown in
        // the batch, and the cowns are distinct.
        let mut payloads: Vec<&mut T> = cowns
            .iter()
            .map(|c| expect_resident(unsafe { c.inner().payload_slot() }))
            .collect();
        body(&mut payloads);
    }));
}
