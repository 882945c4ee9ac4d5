//! Behaviour-oriented concurrency runtime.
//!
//! The unit of concurrency is a *cown* — a concurrently-owned object — and
//! the unit of work is a *behaviour*: a closure attached to a set of cowns
//! that runs with exclusive access to all of them. Behaviours touching the
//! same cown run in the order they were scheduled.
//!
//! The runtime also carries the hooks a memory-pressure swap engine needs:
//! every cown owns a [`meta::CownMeta`] block with an atomic swap-state
//! machine, access counters for replacement policies, and a slot where a
//! prepared fetch behaviour waits while the payload lives on disk. The
//! dispatch path consumes that slot before running any body over an
//! `OnDisk` cown, so user code never observes a missing payload.

pub mod behaviour;
pub mod cown;
pub mod meta;
pub mod scheduler;
pub mod when;

pub use behaviour::{Behaviour, BehaviourKind, BehaviourQueue};
pub use cown::{Cown, CownHeader, CownId, CownInner, WeakCown};
pub use meta::{CownMeta, FetchAction, SwapState};
pub use scheduler::{Runtime, RuntimeHandle};
pub use when::{when, when2, when_all};
