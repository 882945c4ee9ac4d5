//! The memory monitor loop.
//!
//! A dedicated OS thread samples process memory, computes pressure against
//! the configured limit and drives eviction: it selects a victim batch,
//! marks it non-resident, and hands it to the swap scheduler — throttled by
//! the in-flight cap. Below the pressure threshold it instead notifies
//! waiters parked on the engine's pressure condition variable.

use std::collections::HashSet;
use std::process;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use boc_runtime::{Behaviour, BehaviourKind, CownId, RuntimeHandle};
use sysinfo::{Pid, ProcessExt, System, SystemExt};
use tracing::{debug, info};

use crate::config::{SwapConfig, BYTES_PER_MB};
use crate::engine::EngineShared;
use crate::policy::select_victim;
use crate::swap_scheduler::{schedule_swap, SwapCandidate};

/// Samples the resident set size of the current process.
pub struct MemorySampler {
    system: System,
    pid: Pid,
}

impl MemorySampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            pid: Pid::from(process::id() as usize),
        }
    }

    /// Current RSS in bytes; 0 if the process cannot be sampled.
    pub fn rss_bytes(&mut self) -> u64 {
        self.system.refresh_process(self.pid);
        self.system
            .process(self.pid)
            .map(|process| process.memory() * 1024)
            .unwrap_or(0)
    }
}

impl Default for MemorySampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Current RSS of the process in MB.
pub fn memory_usage_mb() -> u64 {
    MemorySampler::new().rss_bytes() / BYTES_PER_MB
}

/// Monitor thread entry point. Returns the average observed usage in MB.
pub(crate) fn run(shared: Arc<EngineShared>, rt: RuntimeHandle, config: SwapConfig) -> u64 {
    let limit_bytes = config.memory_limit_mb * BYTES_PER_MB;
    let multiplier = config.multiplier.min(100);

    debug!(
        "memory monitor started (limit {} MB, multiplier {}, policy {})",
        config.memory_limit_mb, multiplier, config.policy
    );

    interruptible_sleep(&shared, config.warmup);

    let mut sampler = MemorySampler::new();
    let mut sum_mb = 0u64;
    let mut measure_count = 0u64;
    let mut last_measure = Instant::now();
    let mut pending_batch: Vec<SwapCandidate> = Vec::new();
    let mut pending_batch_bytes = 0u64;

    while !shared.shutdown.load(Ordering::Acquire) {
        let rss = sampler.rss_bytes();
        let cowns_size = shared.registry.cowns_size_bytes();
        // The engine's own resident accounting backs the sampled RSS up:
        // RSS lags frees, and a freshly registered working set may not have
        // faulted in yet.
        let usage = rss.max(cowns_size);

        if last_measure.elapsed() >= Duration::from_secs(1) {
            last_measure = Instant::now();
            sum_mb += usage / BYTES_PER_MB;
            measure_count += 1;
            debug!(
                "memory usage {} MB ({} cowns registered, {} resident bytes)",
                usage / BYTES_PER_MB,
                shared.registry.len(),
                cowns_size
            );
        }

        let excluded: HashSet<CownId> = shared.failed.lock().drain(..).collect();

        if limit_bytes > 0 && usage > limit_bytes * 90 / 100 {
            let target = limit_bytes * multiplier / 100;
            let to_shed = usage.saturating_sub(target);
            {
                let mut inner = shared.registry.lock();
                while pending_batch.len() < inner.entries.len()
                    && pending_batch_bytes < to_shed
                {
                    let Some(index) =
                        select_victim(&mut inner, config.policy, &shared.shutdown, &excluded)
                    else {
                        break;
                    };
                    let entry = &inner.entries[index];
                    let candidate = SwapCandidate {
                        cown: entry.cown.clone(),
                        id: entry.id,
                        size_bytes: entry.size_bytes,
                    };
                    shared
                        .registry
                        .mark_resident_locked(&mut inner, candidate.id, false);
                    pending_batch_bytes += candidate.size_bytes;
                    pending_batch.push(candidate);
                }
            }

            if !pending_batch.is_empty()
                && shared.in_flight.load(Ordering::Acquire) < shared.max_in_flight
            {
                shared.in_flight.fetch_add(1, Ordering::AcqRel);
                let batch = std::mem::take(&mut pending_batch);
                pending_batch_bytes = 0;
                info!(
                    "pressure at {} MB over limit {} MB: swapping {} cowns",
                    usage / BYTES_PER_MB,
                    config.memory_limit_mb,
                    batch.len()
                );
                for id in schedule_swap(&shared, &rt, batch) {
                    shared.registry.remove(id);
                    let _ = shared.codec.remove(id);
                }
            }
        } else {
            shared.notify_pressure();
        }

        for id in shared.registry.sweep_dead() {
            let _ = shared.codec.remove(id);
        }

        interruptible_sleep(&shared, config.tick_period);
    }

    debug!("memory monitor stopping");
    for id in shared.registry.sweep_dead() {
        let _ = shared.codec.remove(id);
    }
    shared.registry.clear();
    {
        let handle = rt.clone();
        rt.schedule(Behaviour::new(Vec::new(), BehaviourKind::System, move || {
            handle.remove_external_event_source();
        }));
    }
    shared.notify_pressure();

    if measure_count == 0 {
        0
    } else {
        sum_mb / measure_count
    }
}

/// Sleep for `period`, waking early on shutdown.
fn interruptible_sleep(shared: &EngineShared, period: Duration) {
    if period.is_zero() {
        return;
    }
    let mut guard = shared.tick_lock.lock();
    if shared.shutdown.load(Ordering::Acquire) {
        return;
    }
    shared.tick_cv.wait_for(&mut guard, period);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampler_reports_nonzero_rss() {
        let mut sampler = MemorySampler::new();
        assert!(sampler.rss_bytes() > 0);
    }
}
