//! Replacement policies and the victim selector.
//!
//! Selection is a pure function over the registry: it inspects the resident
//! entries' access metadata and returns the index of the next eviction
//! candidate, or `None` once every resident entry has been rejected.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use boc_runtime::CownId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::RegistryInner;
use crate::swappable::SwapCown;

/// Which cown to evict next under memory pressure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwapPolicy {
    /// Evict the least recently used resident cown.
    Lru,
    /// Evict the least frequently used resident cown.
    Lfu,
    /// Evict a uniformly random resident cown.
    Random,
    /// Evict resident cowns in registration order, cyclically.
    RoundRobin,
    /// Clock sweep: a set accessed-bit buys the cown one more round.
    SecondChance,
}

impl fmt::Display for SwapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwapPolicy::Lru => "LRU",
            SwapPolicy::Lfu => "LFU",
            SwapPolicy::Random => "Random",
            SwapPolicy::RoundRobin => "Round Robin",
            SwapPolicy::SecondChance => "Second Chance",
        };
        f.write_str(name)
    }
}

/// Error returned when parsing an unknown policy name.
#[derive(Debug, Error)]
#[error("unknown swap policy: {0}")]
pub struct ParsePolicyError(String);

impl FromStr for SwapPolicy {
    type Err = ParsePolicyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "lru" => Ok(SwapPolicy::Lru),
            "lfu" => Ok(SwapPolicy::Lfu),
            "random" => Ok(SwapPolicy::Random),
            "round_robin" => Ok(SwapPolicy::RoundRobin),
            "second_chance" => Ok(SwapPolicy::SecondChance),
            _ => Err(ParsePolicyError(value.to_string())),
        }
    }
}

/// Pick the next eviction candidate.
///
/// Entries are eligible when they are resident, not in `excluded`, and
/// still alive. Ties break towards the lowest index. The caller holds the
/// registry lock; Round-Robin and Second-Chance advance `inner.next_cown`.
pub fn select_victim(
    inner: &mut RegistryInner,
    policy: SwapPolicy,
    shutdown: &AtomicBool,
    excluded: &HashSet<CownId>,
) -> Option<usize> {
    if inner.entries.is_empty() {
        return None;
    }
    match policy {
        SwapPolicy::Lru => min_by_key(inner, excluded, |cown| cown.meta().last_access()),
        SwapPolicy::Lfu => min_by_key(inner, excluded, |cown| cown.meta().accesses()),
        SwapPolicy::Random => random(inner, excluded),
        SwapPolicy::RoundRobin => round_robin(inner, excluded),
        SwapPolicy::SecondChance => second_chance(inner, shutdown, excluded),
    }
}

fn candidate(
    inner: &RegistryInner,
    index: usize,
    excluded: &HashSet<CownId>,
) -> Option<Arc<dyn SwapCown>> {
    let entry = &inner.entries[index];
    if !inner.resident.get(&entry.id).copied().unwrap_or(false) {
        return None;
    }
    if excluded.contains(&entry.id) {
        return None;
    }
    entry.cown.upgrade()
}

fn min_by_key<F>(inner: &RegistryInner, excluded: &HashSet<CownId>, key: F) -> Option<usize>
where
    F: Fn(&dyn SwapCown) -> u64,
{
    let mut best: Option<(usize, u64)> = None;
    for index in 0..inner.entries.len() {
        let Some(cown) = candidate(inner, index, excluded) else {
            continue;
        };
        let value = key(cown.as_ref());
        match best {
            Some((_, current)) if value >= current => {}
            _ => best = Some((index, value)),
        }
    }
    best.map(|(index, _)| index)
}

fn random(inner: &RegistryInner, excluded: &HashSet<CownId>) -> Option<usize> {
    let eligible: Vec<usize> = (0..inner.entries.len())
        .filter(|&index| candidate(inner, index, excluded).is_some())
        .collect();
    if eligible.is_empty() {
        return None;
    }
    let pick = rand::thread_rng().gen_range(0..eligible.len());
    Some(eligible[pick])
}

fn round_robin(inner: &mut RegistryInner, excluded: &HashSet<CownId>) -> Option<usize> {
    let len = inner.entries.len();
    for step in 0..len {
        let index = (inner.next_cown + step) % len;
        if candidate(inner, index, excluded).is_some() {
            inner.next_cown = (index + 1) % len;
            return Some(index);
        }
    }
    None
}

fn second_chance(
    inner: &mut RegistryInner,
    shutdown: &AtomicBool,
    excluded: &HashSet<CownId>,
) -> Option<usize> {
    let len = inner.entries.len();
    let mut index = inner.next_cown % len;
    // Two full passes suffice: the first clears every set bit on the way.
    for _ in 0..(2 * len) {
        if shutdown.load(Ordering::Acquire) {
            return None;
        }
        if let Some(cown) = candidate(inner, index, excluded) {
            if !cown.meta().take_accessed() {
                inner.next_cown = (index + 1) % len;
                return Some(index);
            }
        }
        index = (index + 1) % len;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Registry;
    use boc_runtime::{Cown, CownHeader};

    fn erased(cown: &Cown<Vec<u8>>) -> Arc<dyn SwapCown> {
        Arc::clone(cown.inner()) as Arc<dyn SwapCown>
    }

    fn registry_with(cowns: &[Cown<Vec<u8>>]) -> Registry {
        let registry = Registry::new();
        for cown in cowns {
            registry.add(&erased(cown), 1024);
        }
        registry
    }

    fn no_shutdown() -> AtomicBool {
        AtomicBool::new(false)
    }

    fn none_excluded() -> HashSet<CownId> {
        HashSet::new()
    }

    fn access(cown: &Cown<Vec<u8>>, times: usize) {
        for _ in 0..times {
            cown.inner().meta().record_access();
        }
    }

    #[test]
    fn test_lfu_selects_least_frequently_used() {
        let cowns: Vec<Cown<Vec<u8>>> = (0..3).map(|_| Cown::new(vec![0u8; 16])).collect();
        access(&cowns[0], 10);
        access(&cowns[1], 3);
        access(&cowns[2], 1);
        let registry = registry_with(&cowns);
        let mut inner = registry.lock();
        let victim = select_victim(&mut inner, SwapPolicy::Lfu, &no_shutdown(), &none_excluded());
        assert_eq!(victim, Some(2));
    }

    #[test]
    fn test_lru_selects_oldest_access() {
        let cowns: Vec<Cown<Vec<u8>>> = (0..3).map(|_| Cown::new(vec![0u8; 16])).collect();
        access(&cowns[1], 1);
        std::thread::sleep(std::time::Duration::from_millis(2));
        access(&cowns[2], 1);
        std::thread::sleep(std::time::Duration::from_millis(2));
        access(&cowns[0], 1);
        let registry = registry_with(&cowns);
        let mut inner = registry.lock();
        let victim = select_victim(&mut inner, SwapPolicy::Lru, &no_shutdown(), &none_excluded());
        assert_eq!(victim, Some(1));
    }

    #[test]
    fn test_ties_break_towards_the_lowest_index() {
        let cowns: Vec<Cown<Vec<u8>>> = (0..3).map(|_| Cown::new(vec![0u8; 16])).collect();
        // Nothing accessed: every LFU key is zero.
        let registry = registry_with(&cowns);
        let mut inner = registry.lock();
        let victim = select_victim(&mut inner, SwapPolicy::Lfu, &no_shutdown(), &none_excluded());
        assert_eq!(victim, Some(0));
    }

    #[test]
    fn test_round_robin_cycles_and_skips_non_resident() {
        let cowns: Vec<Cown<Vec<u8>>> = (0..3).map(|_| Cown::new(vec![0u8; 16])).collect();
        let registry = registry_with(&cowns);
        registry.mark_resident(cowns[1].id(), false);
        let mut inner = registry.lock();
        let first = select_victim(
            &mut inner,
            SwapPolicy::RoundRobin,
            &no_shutdown(),
            &none_excluded(),
        );
        let second = select_victim(
            &mut inner,
            SwapPolicy::RoundRobin,
            &no_shutdown(),
            &none_excluded(),
        );
        let third = select_victim(
            &mut inner,
            SwapPolicy::RoundRobin,
            &no_shutdown(),
            &none_excluded(),
        );
        assert_eq!(first, Some(0));
        assert_eq!(second, Some(2));
        assert_eq!(third, Some(0));
    }

    #[test]
    fn test_second_chance_spares_accessed_cowns_once() {
        let cowns: Vec<Cown<Vec<u8>>> = (0..3).map(|_| Cown::new(vec![0u8; 16])).collect();
        access(&cowns[0], 5);
        let registry = registry_with(&cowns);
        let mut inner = registry.lock();
        let victim = select_victim(
            &mut inner,
            SwapPolicy::SecondChance,
            &no_shutdown(),
            &none_excluded(),
        );
        // Index 0 had its bit set, so it is cleared and spared; index 1 is
        // the first clear entry.
        assert_eq!(victim, Some(1));
        // The sweep must not have touched the LFU counter.
        assert_eq!(cowns[0].inner().meta().accesses(), 5);
        // With its bit now clear, index 0 loses its next round.
        let next = select_victim(
            &mut inner,
            SwapPolicy::SecondChance,
            &no_shutdown(),
            &none_excluded(),
        );
        assert_eq!(next, Some(2));
    }

    #[test]
    fn test_second_chance_returns_none_on_shutdown() {
        let cowns: Vec<Cown<Vec<u8>>> = (0..3).map(|_| Cown::new(vec![0u8; 16])).collect();
        let registry = registry_with(&cowns);
        let mut inner = registry.lock();
        let shutdown = AtomicBool::new(true);
        let victim = select_victim(
            &mut inner,
            SwapPolicy::SecondChance,
            &shutdown,
            &none_excluded(),
        );
        assert_eq!(victim, None);
    }

    #[test]
    fn test_random_picks_a_resident_entry() {
        let cowns: Vec<Cown<Vec<u8>>> = (0..4).map(|_| Cown::new(vec![0u8; 16])).collect();
        let registry = registry_with(&cowns);
        registry.mark_resident(cowns[0].id(), false);
        registry.mark_resident(cowns[2].id(), false);
        let mut inner = registry.lock();
        for _ in 0..32 {
            let victim = select_victim(
                &mut inner,
                SwapPolicy::Random,
                &no_shutdown(),
                &none_excluded(),
            )
            .unwrap();
            assert!(victim == 1 || victim == 3);
        }
    }

    #[test]
    fn test_empty_and_all_swapped_registries_yield_none() {
        let registry = Registry::new();
        let mut inner = registry.lock();
        assert_eq!(
            select_victim(&mut inner, SwapPolicy::Lru, &no_shutdown(), &none_excluded()),
            None
        );
        drop(inner);

        let cowns: Vec<Cown<Vec<u8>>> = (0..2).map(|_| Cown::new(vec![0u8; 16])).collect();
        let registry = registry_with(&cowns);
        for cown in &cowns {
            registry.mark_resident(cown.id(), false);
        }
        let mut inner = registry.lock();
        for policy in [
            SwapPolicy::Lru,
            SwapPolicy::Lfu,
            SwapPolicy::Random,
            SwapPolicy::RoundRobin,
            SwapPolicy::SecondChance,
        ] {
            assert_eq!(
                select_victim(&mut inner, policy, &no_shutdown(), &none_excluded()),
                None
            );
        }
    }

    #[test]
    fn test_excluded_cowns_are_skipped_for_one_pass() {
        let cowns: Vec<Cown<Vec<u8>>> = (0..3).map(|_| Cown::new(vec![0u8; 16])).collect();
        let registry = registry_with(&cowns);
        let mut excluded = HashSet::new();
        excluded.insert(cowns[0].id());
        let mut inner = registry.lock();
        let victim = select_victim(&mut inner, SwapPolicy::Lru, &no_shutdown(), &excluded);
        assert_eq!(victim, Some(1));
        let victim = select_victim(&mut inner, SwapPolicy::Lru, &no_shutdown(), &none_excluded());
        assert_eq!(victim, Some(0));
    }

    #[test]
    fn test_dead_cowns_are_skipped() {
        let alive = Cown::new(vec![0u8; 16]);
        let doomed = Cown::new(vec![0u8; 16]);
        let registry = Registry::new();
        registry.add(&erased(&doomed), 16);
        registry.add(&erased(&alive), 16);
        drop(doomed);
        let mut inner = registry.lock();
        let victim = select_victim(&mut inner, SwapPolicy::Lru, &no_shutdown(), &none_excluded());
        assert_eq!(victim, Some(1));
    }

    #[test]
    fn test_policy_parsing_and_display() {
        assert_eq!("lru".parse::<SwapPolicy>().unwrap(), SwapPolicy::Lru);
        assert_eq!(
            "ROUND-ROBIN".parse::<SwapPolicy>().unwrap(),
            SwapPolicy::RoundRobin
        );
        assert_eq!(
            "second_chance".parse::<SwapPolicy>().unwrap(),
            SwapPolicy::SecondChance
        );
        assert!("clock".parse::<SwapPolicy>().is_err());
        assert_eq!(SwapPolicy::Lfu.to_string(), "LFU");
        assert_eq!(SwapPolicy::RoundRobin.to_string(), "Round Robin");
    }
}
