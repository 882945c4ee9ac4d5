//! The swap engine façade.
//!
//! [`SwapEngine`] is an owning handle over the monitor thread and the
//! engine's shared state. Its lifecycle is a value: `start` spawns the
//! monitor, `stop` joins it and returns the average observed usage, and
//! dropping the handle stops it implicitly. There is deliberately no
//! process-wide singleton — a second engine cannot be started "while the
//! old one is running" by construction, because the old one must be stopped
//! (or dropped) to go away.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use boc_runtime::{Cown, CownId, RuntimeHandle};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::config::SwapConfig;
use crate::error::{SwapError, SwapResult};
use crate::monitor;
use crate::registry::Registry;
use crate::swappable::{SwapCown, Swappable};

/// State shared between the façade, the monitor thread and the swap/fetch
/// behaviour bodies.
pub(crate) struct EngineShared {
    pub registry: Registry,
    pub codec: Codec,
    /// Concurrently in-flight swap behaviours.
    pub in_flight: AtomicU64,
    pub max_in_flight: u64,
    pub shutdown: AtomicBool,
    /// Tick sleep, interruptible on shutdown.
    pub tick_lock: Mutex<()>,
    pub tick_cv: Condvar,
    /// Cowns whose swap failed, excluded from the next selection pass.
    pub failed: Mutex<Vec<CownId>>,
    pressure_generation: Mutex<u64>,
    pressure_cv: Condvar,
}

impl EngineShared {
    /// Wake everyone parked on the pressure condition variable.
    pub(crate) fn notify_pressure(&self) {
        *self.pressure_generation.lock() += 1;
        self.pressure_cv.notify_all();
    }

    /// Park until the monitor next signals the pressure condition variable
    /// (or the engine shuts down).
    pub(crate) fn wait_pressure(&self) {
        let mut generation = self.pressure_generation.lock();
        let seen = *generation;
        while *generation == seen && !self.shutdown.load(Ordering::Acquire) {
            self.pressure_cv.wait(&mut generation);
        }
    }
}

/// Owning handle of a running swap engine.
pub struct SwapEngine {
    shared: Arc<EngineShared>,
    monitor: Option<JoinHandle<u64>>,
}

impl SwapEngine {
    /// Start the engine: resolve the swap directory and spawn the monitor
    /// thread against `rt`.
    pub fn start(rt: RuntimeHandle, config: SwapConfig) -> SwapResult<Self> {
        let dir = config
            .swap_dir
            .clone()
            .unwrap_or_else(Codec::default_dir);
        let codec = Codec::open(dir)?;

        let shared = Arc::new(EngineShared {
            registry: Registry::new(),
            codec,
            in_flight: AtomicU64::new(0),
            max_in_flight: config.max_swaps_in_flight.max(1),
            shutdown: AtomicBool::new(false),
            tick_lock: Mutex::new(()),
            tick_cv: Condvar::new(),
            failed: Mutex::new(Vec::new()),
            pressure_generation: Mutex::new(0),
            pressure_cv: Condvar::new(),
        });

        // Keep the runtime alive while the monitor drives it from outside.
        // The matching removal is scheduled by the monitor's final pass.
        rt.add_external_event_source();
        let monitor = {
            let shared = Arc::clone(&shared);
            let monitor_rt = rt.clone();
            thread::Builder::new()
                .name("swap-monitor".into())
                .spawn(move || monitor::run(shared, monitor_rt, config))
                .map_err(|err| {
                    rt.remove_external_event_source();
                    SwapError::Monitor(err)
                })?
        };

        info!("swap engine started");
        Ok(Self {
            shared,
            monitor: Some(monitor),
        })
    }

    /// Register cowns with the engine, making them eviction candidates.
    ///
    /// Only payload types implementing [`Swappable`] can be registered;
    /// anything else is rejected when this generic is instantiated. Returns
    /// `false` if the engine has already been stopped. Registering a cown
    /// twice is a no-op.
    ///
    /// The payload size is sampled directly, so cowns should be registered
    /// before behaviours that mutate them are scheduled.
    pub fn register<T: Swappable>(&self, cowns: &[Cown<T>]) -> bool {
        if self.shared.shutdown.load(Ordering::Acquire) {
            warn!("register called on a stopped swap engine");
            return false;
        }
        for cown in cowns {
            if self.shared.registry.contains(cown.id()) {
                continue;
            }
            // Safety: the cown is not yet visible to the engine, and the
            // caller must keep mutating behaviours off it while registering.
            let size_bytes = unsafe { cown.inner().payload_slot() }
                .as_ref()
                .map(|payload| payload.size() as u64)
                .unwrap_or(0);
            let erased: Arc<dyn SwapCown> = Arc::clone(cown.inner()) as Arc<dyn SwapCown>;
            if self.shared.registry.add(&erased, size_bytes) {
                debug!("registered cown {} ({} bytes)", cown.id(), size_bytes);
            }
        }
        true
    }

    /// Block until the monitor observes usage at or below the pressure
    /// threshold. Benchmarks use this to start measuring once memory is
    /// warm and the engine keeps up.
    pub fn wait(&self) {
        self.shared.wait_pressure();
    }

    /// Stop the engine: join the monitor thread and return the average
    /// observed memory usage in MB (0 if nothing was measured).
    pub fn stop(mut self) -> u64 {
        self.stop_inner()
    }

    fn stop_inner(&mut self) -> u64 {
        let Some(handle) = self.monitor.take() else {
            return 0;
        };
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.shared.tick_lock.lock();
            self.shared.tick_cv.notify_all();
        }
        let average_mb = handle.join().unwrap_or(0);
        self.shared.notify_pressure();
        info!("swap engine stopped; average usage {} MB", average_mb);
        average_mb
    }

    /// Number of cowns currently registered.
    pub fn registered_cowns(&self) -> usize {
        self.shared.registry.len()
    }

    /// Byte total of resident registered payloads.
    pub fn cowns_size_bytes(&self) -> u64 {
        self.shared.registry.cowns_size_bytes()
    }

    /// Currently in-flight swap behaviours.
    pub fn swaps_in_flight(&self) -> u64 {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    /// The directory swap files are written to.
    pub fn swap_dir(&self) -> &std::path::Path {
        self.shared.codec.dir()
    }
}

impl Drop for SwapEngine {
    fn drop(&mut self) {
        self.stop_inner();
    }
}
