//! Worker-pool scheduler for behaviours.
//!
//! The runtime owns a pool of OS worker threads fed through a channel. A
//! behaviour is enqueued on every cown it requests under a runtime-wide
//! enqueue lock (which makes the multi-cown enqueue atomic and keeps the
//! per-cown queues consistently ordered), then dispatched once it reaches
//! the head of all of them.
//!
//! The dispatch path is also where swapped-out cowns come back: before a
//! body runs, any cown observed `OnDisk` has its stashed fetch behaviour
//! consumed and executed as the body's predecessor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use crate::behaviour::{Behaviour, BehaviourKind};
use crate::cown::CownHeader;
use crate::meta::{CownMeta, SwapState};

/// Attempts to run a stashed fetch before giving up on the payload.
const MAX_FETCH_ATTEMPTS: usize = 3;

enum WorkItem {
    Run(Arc<Behaviour>),
    Exit,
}

struct SchedShared {
    tx: Sender<WorkItem>,
    enqueue_lock: Mutex<()>,
    in_flight: AtomicUsize,
    external_sources: AtomicUsize,
    quiesce_lock: Mutex<()>,
    quiesce_cv: Condvar,
}

impl SchedShared {
    fn dispatch(&self, behaviour: Arc<Behaviour>) {
        let _ = self.tx.send(WorkItem::Run(behaviour));
    }

    fn notify_quiescence(&self) {
        let _guard = self.quiesce_lock.lock();
        self.quiesce_cv.notify_all();
    }
}

/// The behaviour runtime: a worker pool plus the scheduling state.
pub struct Runtime {
    shared: Arc<SchedShared>,
    workers: Vec<JoinHandle<()>>,
}

impl Runtime {
    /// Start a runtime with `threads` workers (at least one).
    pub fn new(threads: usize) -> Self {
        let threads = threads.max(1);
        let (tx, rx) = channel::unbounded();
        let shared = Arc::new(SchedShared {
            tx,
            enqueue_lock: Mutex::new(()),
            in_flight: AtomicUsize::new(0),
            external_sources: AtomicUsize::new(0),
            quiesce_lock: Mutex::new(()),
            quiesce_cv: Condvar::new(),
        });

        let workers = (0..threads)
            .map(|index| {
                let shared = Arc::clone(&shared);
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("boc-worker-{index}"))
                    .spawn(move || worker_loop(shared, rx))
                    .expect("failed to spawn scheduler worker")
            })
            .collect();

        debug!("runtime started with {} workers", threads);
        Self { shared, workers }
    }

    /// A cloneable handle that can schedule work and manage event sources.
    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Schedule a behaviour for execution.
    pub fn schedule(&self, behaviour: Behaviour) {
        self.handle().schedule(behaviour);
    }

    /// Block until no behaviours are pending and no external event sources
    /// are registered.
    pub fn wait_for_quiescence(&self) {
        self.handle().wait_for_quiescence();
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        for _ in &self.workers {
            let _ = self.shared.tx.send(WorkItem::Exit);
        }
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

/// Cloneable scheduling handle, detached from the pool's lifetime.
#[derive(Clone)]
pub struct RuntimeHandle {
    shared: Arc<SchedShared>,
}

impl RuntimeHandle {
    /// Schedule a behaviour for execution.
    ///
    /// The behaviour is appended to the queue of every cown it requests;
    /// whichever of the scheduling thread or the last releasing predecessor
    /// observes the final acquisition dispatches it.
    pub fn schedule(&self, behaviour: Behaviour) {
        let behaviour = Arc::new(behaviour);
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);

        let ready = {
            let _guard = self.shared.enqueue_lock.lock();
            let mut heads = 0usize;
            for cown in behaviour.cowns() {
                let mut queue = cown.queue().lock();
                queue.push_back(Arc::clone(&behaviour));
                if queue.len() == 1 {
                    heads += 1;
                }
            }
            behaviour.pending.fetch_sub(heads + 1, Ordering::SeqCst) == heads + 1
        };

        if ready {
            self.shared.dispatch(behaviour);
        }
    }

    /// Keep the runtime from quiescing while an external driver (such as
    /// the swap monitor) is alive.
    pub fn add_external_event_source(&self) {
        self.shared.external_sources.fetch_add(1, Ordering::SeqCst);
    }

    /// Drop one external event source registration.
    pub fn remove_external_event_source(&self) {
        if self.shared.external_sources.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.shared.notify_quiescence();
        }
    }

    /// Block until no behaviours are pending and no external event sources
    /// are registered.
    pub fn wait_for_quiescence(&self) {
        let mut guard = self.shared.quiesce_lock.lock();
        while self.shared.in_flight.load(Ordering::SeqCst) > 0
            || self.shared.external_sources.load(Ordering::SeqCst) > 0
        {
            self.shared.quiesce_cv.wait(&mut guard);
        }
    }
}

fn worker_loop(shared: Arc<SchedShared>, rx: Receiver<WorkItem>) {
    while let Ok(item) = rx.recv() {
        match item {
            WorkItem::Exit => break,
            WorkItem::Run(behaviour) => run_behaviour(&shared, behaviour),
        }
    }
    trace!("scheduler worker exiting");
}

fn run_behaviour(shared: &Arc<SchedShared>, behaviour: Arc<Behaviour>) {
    materialize_cowns(&behaviour);
    if let Some(body) = behaviour.take_body() {
        body();
    }
    release(shared, &behaviour);
}

/// Dispatch-path hook: restore on-disk payloads and record accesses before
/// the body runs.
fn materialize_cowns(behaviour: &Behaviour) {
    for cown in behaviour.cowns() {
        let meta = cown.meta();
        if meta.state() == SwapState::OnDisk
            && meta.transition(SwapState::OnDisk, SwapState::Fetching)
        {
            run_fetch(&**cown, meta);
        }
        if behaviour.kind() == BehaviourKind::User {
            meta.record_access();
        }
    }
}

fn run_fetch(cown: &dyn CownHeader, meta: &CownMeta) {
    let Some(mut fetch) = meta.take_fetch() else {
        meta.transition(SwapState::Fetching, SwapState::OnDisk);
        error!("cown {} is on disk but has no stashed fetch behaviour", cown.id());
        return;
    };

    let mut attempt = 1;
    loop {
        match fetch() {
            Ok(()) => return,
            Err(err) => {
                error!(
                    "fetch for cown {} failed (attempt {}/{}): {}",
                    cown.id(),
                    attempt,
                    MAX_FETCH_ATTEMPTS,
                    err
                );
                if attempt == MAX_FETCH_ATTEMPTS {
                    meta.stash_fetch(fetch);
                    panic!(
                        "cown {}: payload could not be restored from disk after {} attempts: {}",
                        cown.id(),
                        MAX_FETCH_ATTEMPTS,
                        err
                    );
                }
                attempt += 1;
                // The failed action rolled the state back to OnDisk; arm the
                // transition again before retrying.
                if !meta.transition(SwapState::OnDisk, SwapState::Fetching) {
                    return;
                }
            }
        }
    }
}

fn release(shared: &Arc<SchedShared>, behaviour: &Arc<Behaviour>) {
    for cown in behaviour.cowns() {
        let next = {
            let mut queue = cown.queue().lock();
            queue.pop_front();
            queue.front().cloned()
        };
        if let Some(next) = next {
            if next.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
                shared.dispatch(next);
            }
        }
    }
    if shared.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
        shared.notify_quiescence();
    }
}
