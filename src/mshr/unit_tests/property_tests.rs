use std::collections::{HashMap, HashSet};

use anyhow::Result;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::mshr::{Completion, EntryId, FillTarget, MergePolicy, MshrConfig, MshrPool};
use crate::timeq::Cycle;

const BLOCK: u64 = 64;

struct NullCache;

impl FillTarget for NullCache {
    fn write_block(&mut self, _block_addr: u64, _data: &[u8], _now: Cycle) -> Result<()> {
        Ok(())
    }
}

fn pool(num_entries: usize, blocks: usize, policy: MergePolicy) -> MshrPool<u32> {
    let cfg = MshrConfig {
        block_size: BLOCK as u32,
        num_entries,
        blocks_per_entry: blocks,
        merge_policy: policy,
    };
    MshrPool::new(&cfg, Box::new(|_, _, _, _, _| 8)).unwrap()
}

fn assert_invariants(mshr: &MshrPool<u32>) {
    let live: Vec<EntryId> = mshr.live_entries().collect();
    assert_eq!(live.len(), mshr.valid_entries());
    assert!(mshr.valid_entries() <= mshr.num_entries());

    let mut blocks = HashSet::new();
    for id in live {
        let entry = mshr.entry(id).unwrap();
        assert!(
            blocks.insert(entry.block_addr()),
            "two valid entries track {:#x}",
            entry.block_addr()
        );
        assert!(entry.slot_count() <= mshr.blocks_per_entry());
        assert_eq!(entry.slots().count(), entry.slot_count());
    }
}

// Random insert/complete/free traffic over a small address window; every requester that was
// accepted is woken exactly once unless its entry was freed.
fn churn(policy: MergePolicy, seed: u64) {
    let mut mshr = pool(4, 3, policy);
    let mut rng = StdRng::seed_from_u64(seed);
    let data = vec![0u8; BLOCK as usize];

    let mut accepted: HashMap<u32, EntryId> = HashMap::new();
    let mut woken: Vec<u32> = Vec::new();
    let mut filled: HashSet<u32> = HashSet::new();
    let mut dropped: HashSet<u32> = HashSet::new();
    let mut stale_ids: Vec<EntryId> = Vec::new();

    for step in 0..2_000u32 {
        let now = step as Cycle;
        match rng.gen_range(0..10) {
            0..=5 => {
                let addr = rng.gen_range(0..8u64) * BLOCK + rng.gen_range(0..BLOCK);
                if let Ok(ins) = mshr.insert(addr, step, now) {
                    accepted.insert(step, ins.entry);
                }
            }
            6..=8 => {
                let live: Vec<EntryId> = mshr.live_entries().collect();
                if live.is_empty() {
                    continue;
                }
                let id = live[rng.gen_range(0..live.len())];
                filled.extend(
                    accepted
                        .iter()
                        .filter(|(_, entry)| **entry == id)
                        .map(|(requester, _)| *requester),
                );
                let mut wake = |requester: u32, _: Cycle| woken.push(requester);
                let done = mshr
                    .complete_request(id, &data, &mut NullCache, &mut wake, now)
                    .unwrap();
                assert!(matches!(done, Completion::Filled { .. }));
                stale_ids.push(id);
            }
            _ => {
                let live: Vec<EntryId> = mshr.live_entries().collect();
                if live.is_empty() {
                    continue;
                }
                let id = live[rng.gen_range(0..live.len())];
                dropped.extend(
                    accepted
                        .iter()
                        .filter(|(_, entry)| **entry == id)
                        .map(|(requester, _)| *requester),
                );
                assert!(mshr.free_entry(id));
                stale_ids.push(id);
            }
        }
        assert_invariants(&mshr);
    }

    let mut late_wakes = 0;
    for id in stale_ids {
        let mut wake = |_: u32, _: Cycle| late_wakes += 1;
        let done = mshr
            .complete_request(id, &data, &mut NullCache, &mut wake, 5_000)
            .unwrap();
        assert_eq!(done, Completion::Stale);
    }
    assert_eq!(late_wakes, 0);

    let mut seen = HashSet::new();
    for requester in &woken {
        assert!(seen.insert(*requester), "requester {} woken twice", requester);
        assert!(accepted.contains_key(requester));
        assert!(!dropped.contains(requester));
    }
    assert_eq!(seen, filled, "a filled entry left requesters asleep");
    assert!(mshr.stats().hits() > 0);
    assert!(mshr.stats().misses() > 0);
}

#[test]
fn random_churn_match_first() {
    churn(MergePolicy::MatchFirst, 1);
}

#[test]
fn random_churn_full_blocks_merge() {
    churn(MergePolicy::FullBlocksMerge, 2);
}

#[test]
fn exactly_one_dispatch_per_outstanding_block() {
    let mut mshr = pool(8, 8, MergePolicy::MatchFirst);
    for i in 0..32u64 {
        mshr.insert((i % 4) * BLOCK + i, i as u32, i).unwrap();
    }
    assert_eq!(mshr.stats().dispatched(), 4);
    assert_eq!(mshr.stats().hits(), 28);
    assert_invariants(&mshr);
}

#[test]
fn lookup_never_exceeds_capacity() {
    let mut mshr = pool(3, 1, MergePolicy::MatchFirst);
    let claimed: Vec<_> = (0..10u64).filter_map(|i| mshr.lookup(i * BLOCK)).collect();
    assert_eq!(claimed.len(), 3);
    assert!(mshr.is_full());
    assert_invariants(&mshr);
}
