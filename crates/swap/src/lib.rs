//! Memory-pressure driven swap engine for the boc behaviour runtime.
//!
//! When the process's resident set approaches a configured limit, the
//! engine picks registered cowns with a replacement policy (LRU, LFU,
//! Random, Round-Robin or Second-Chance), serializes their payloads to
//! disk through a swap behaviour and frees the in-memory form. The payload
//! is transparently re-materialized by a prepared fetch behaviour the next
//! time user work touches the cown, so behaviour bodies always observe a
//! resident value.
//!
//! ```no_run
//! use boc_swap::{Runtime, SwapConfig, SwapEngine, SwapPolicy, Cown, when};
//!
//! let rt = Runtime::new(4);
//! let engine = SwapEngine::start(
//!     rt.handle(),
//!     SwapConfig::new(1024, 60, SwapPolicy::Lru),
//! ).unwrap();
//!
//! let data = Cown::new(vec![0u8; 64 * 1024 * 1024]);
//! engine.register(&[data.clone()]);
//!
//! when(&rt.handle(), &data, |payload| {
//!     // Resident here, whether or not it was evicted in between.
//!     payload[0] = 1;
//! });
//!
//! let average_mb = engine.stop();
//! println!("average usage: {average_mb} MB");
//! ```

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod monitor;
pub mod policy;
pub mod registry;
pub mod swap_scheduler;
pub mod swappable;

pub use codec::{Codec, SWAP_FILE_EXT};
pub use config::{SwapConfig, BYTES_PER_MB};
pub use engine::SwapEngine;
pub use error::{SwapError, SwapResult};
pub use monitor::{memory_usage_mb, MemorySampler};
pub use policy::{select_victim, ParsePolicyError, SwapPolicy};
pub use registry::{Registry, RegistryEntry, RegistryInner};
pub use swap_scheduler::SwapCandidate;
pub use swappable::{SwapCown, Swappable};

// Re-export the runtime surface the engine is used together with.
pub use boc_runtime::{
    when, when2, when_all, Behaviour, BehaviourKind, Cown, CownHeader, CownId, Runtime,
    RuntimeHandle, SwapState, WeakCown,
};
