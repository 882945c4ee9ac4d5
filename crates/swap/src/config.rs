//! Swap engine configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::SwapPolicy;

pub const BYTES_PER_MB: u64 = 1024 * 1024;

/// Tunables of the swap engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwapConfig {
    /// Pressure ceiling in MB. `0` disables eviction entirely; the monitor
    /// still runs but never schedules swaps.
    pub memory_limit_mb: u64,
    /// Target memory level after shedding, as a percentage of the limit
    /// (clamped to 0..=100). Lower values shed more aggressively.
    pub multiplier: u64,
    /// Victim selection policy.
    pub policy: SwapPolicy,
    /// Delay before the monitor starts evaluating pressure, letting the
    /// process reach steady state.
    pub warmup: Duration,
    /// Sampling period of the monitor loop.
    pub tick_period: Duration,
    /// Cap on concurrently in-flight swap behaviours.
    pub max_swaps_in_flight: u64,
    /// Override of the swap directory; defaults to a process-local
    /// directory under the OS temp dir.
    pub swap_dir: Option<PathBuf>,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 0,
            multiplier: 60,
            policy: SwapPolicy::Lru,
            warmup: Duration::from_secs(5),
            tick_period: Duration::from_millis(50),
            max_swaps_in_flight: 1,
            swap_dir: None,
        }
    }
}

impl SwapConfig {
    /// Configuration with the three user-facing knobs set and internal
    /// defaults for the rest.
    pub fn new(memory_limit_mb: u64, multiplier: u64, policy: SwapPolicy) -> Self {
        Self {
            memory_limit_mb,
            multiplier,
            policy,
            ..Self::default()
        }
    }

    pub fn with_warmup(mut self, warmup: Duration) -> Self {
        self.warmup = warmup;
        self
    }

    pub fn with_tick_period(mut self, tick_period: Duration) -> Self {
        self.tick_period = tick_period;
        self
    }

    pub fn with_max_swaps_in_flight(mut self, cap: u64) -> Self {
        self.max_swaps_in_flight = cap;
        self
    }

    pub fn with_swap_dir(mut self, dir: PathBuf) -> Self {
        self.swap_dir = Some(dir);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SwapConfig::default();
        assert_eq!(config.memory_limit_mb, 0);
        assert_eq!(config.multiplier, 60);
        assert_eq!(config.policy, SwapPolicy::Lru);
        assert_eq!(config.warmup, Duration::from_secs(5));
        assert_eq!(config.max_swaps_in_flight, 1);
        assert!(config.swap_dir.is_none());
    }

    #[test]
    fn test_serde_round_trip() {
        let config = SwapConfig::new(512, 80, SwapPolicy::SecondChance)
            .with_tick_period(Duration::from_millis(25));
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("SECOND_CHANCE"));
        let back: SwapConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.memory_limit_mb, 512);
        assert_eq!(back.multiplier, 80);
        assert_eq!(back.policy, SwapPolicy::SecondChance);
        assert_eq!(back.tick_period, Duration::from_millis(25));
    }
}
