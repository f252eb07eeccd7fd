use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{bail, Result};

use crate::mshr::{
    Completion, EntryId, FillTarget, InsertKind, MemCmd, MergePolicy, MshrConfig, MshrPool,
    MshrReject,
};
use crate::timeq::Cycle;

type Dispatches = Rc<RefCell<Vec<(MemCmd, u64, u32, EntryId, Cycle)>>>;

fn pool_with(num_entries: usize, blocks: usize, policy: MergePolicy) -> (MshrPool<u32>, Dispatches) {
    let dispatches: Dispatches = Rc::new(RefCell::new(Vec::new()));
    let log = Rc::clone(&dispatches);
    let cfg = MshrConfig {
        block_size: 64,
        num_entries,
        blocks_per_entry: blocks,
        merge_policy: policy,
    };
    let pool = MshrPool::new(
        &cfg,
        Box::new(move |cmd, block_addr, size, entry, now| {
            log.borrow_mut().push((cmd, block_addr, size, entry, now));
            20
        }),
    )
    .expect("valid geometry");
    (pool, dispatches)
}

fn pool() -> (MshrPool<u32>, Dispatches) {
    pool_with(4, 4, MergePolicy::MatchFirst)
}

#[derive(Default)]
struct RecordingCache {
    writes: Vec<(u64, Vec<u8>, Cycle)>,
}

impl FillTarget for RecordingCache {
    fn write_block(&mut self, block_addr: u64, data: &[u8], now: Cycle) -> Result<()> {
        self.writes.push((block_addr, data.to_vec(), now));
        Ok(())
    }
}

struct RejectingCache;

impl FillTarget for RejectingCache {
    fn write_block(&mut self, block_addr: u64, _data: &[u8], _now: Cycle) -> Result<()> {
        bail!("no way to place {:#x}", block_addr)
    }
}

fn block_data() -> Vec<u8> {
    (0..64u8).collect()
}

#[test]
fn first_miss_claims_and_dispatches_once() {
    let (mut mshr, dispatches) = pool();
    let ins = mshr.insert(0x1000, 1, 0).unwrap();
    assert!(matches!(ins.kind, InsertKind::Allocated { latency: 20 }));
    assert_eq!(ins.slot_count, 1);
    assert_eq!(mshr.valid_entries(), 1);

    let log = dispatches.borrow();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0], (MemCmd::Read, 0x1000, 64, ins.entry, 0));

    let entry = mshr.entry(ins.entry).unwrap();
    assert!(entry.is_pending());
    assert_eq!(entry.ready_at(), Some(20));
}

#[test]
fn same_block_merges_without_dispatch() {
    let (mut mshr, dispatches) = pool();
    let first = mshr.insert(0x1000, 1, 0).unwrap();
    let second = mshr.insert(0x1010, 2, 1).unwrap();
    assert_eq!(second.entry, first.entry);
    assert_eq!(second.kind, InsertKind::Merged);
    assert_eq!(second.slot_count, 2);
    assert_eq!(dispatches.borrow().len(), 1);
    assert_eq!(mshr.stats().hits(), 1);
    assert_eq!(mshr.stats().misses(), 1);
}

#[test]
fn fifth_distinct_block_finds_pool_full() {
    let (mut mshr, dispatches) = pool();
    for i in 0..4u64 {
        mshr.insert(0x1000 + i * 0x40, i as u32, i).unwrap();
    }
    assert!(mshr.is_full());
    assert_eq!(mshr.insert(0x2000, 9, 4), Err(MshrReject::PoolFull));
    assert_eq!(mshr.valid_entries(), 4);
    assert_eq!(dispatches.borrow().len(), 4);
    assert_eq!(mshr.stats().full_stalls(), 1);
}

#[test]
fn completion_fills_cache_and_wakes_merged_requesters() {
    let (mut mshr, _) = pool();
    let first = mshr.insert(0x1000, 1, 0).unwrap();
    mshr.insert(0x1010, 2, 1).unwrap();

    let mut cache = RecordingCache::default();
    let mut woken = Vec::new();
    let mut wake = |requester: u32, now: Cycle| woken.push((requester, now));
    let done = mshr
        .complete_request(first.entry, &block_data(), &mut cache, &mut wake, 20)
        .unwrap();

    assert_eq!(
        done,
        Completion::Filled {
            block_addr: 0x1000,
            notified: 2
        }
    );
    assert_eq!(cache.writes, vec![(0x1000, block_data(), 20)]);
    assert_eq!(woken, vec![(1, 20), (2, 20)]);

    assert!(mshr.entry(first.entry).is_none());
    let raw = mshr.entry_at(first.entry.index).unwrap();
    assert_eq!(raw.slot_count(), 0);
    assert!(!raw.is_valid());
    assert!(mshr.is_empty());
}

#[test]
fn fifth_merge_overflows_entry() {
    let (mut mshr, dispatches) = pool();
    let mut entry = None;
    for i in 0..4u64 {
        let ins = mshr.insert(0x1000 + i * 4, i as u32, i).unwrap();
        entry = Some(ins.entry);
    }
    let entry = entry.unwrap();
    assert!(mshr.entry(entry).unwrap().is_full());

    assert_eq!(
        mshr.insert(0x1020, 5, 5),
        Err(MshrReject::EntryFull { entry })
    );
    let state = mshr.entry(entry).unwrap();
    assert!(state.is_full());
    assert_eq!(state.slot_count(), 4);
    assert_eq!(dispatches.borrow().len(), 1);
    assert_eq!(mshr.stats().merge_overflows(), 1);
    assert_eq!(mshr.stats().hits(), 3);
    assert_eq!(mshr.stats().misses(), 1);
}

#[test]
fn overflow_on_single_slot_entry_is_not_a_hit() {
    let (mut mshr, _) = pool_with(2, 1, MergePolicy::MatchFirst);
    let first = mshr.insert(0x1000, 1, 0).unwrap();
    assert_eq!(
        mshr.insert(0x1008, 2, 1),
        Err(MshrReject::EntryFull { entry: first.entry })
    );
    assert_eq!(mshr.stats().hits(), 0);
    assert_eq!(mshr.stats().misses(), 1);
    assert_eq!(mshr.stats().merge_overflows(), 1);
}

#[test]
fn lookup_then_insert_counts_one_miss() {
    let (mut mshr, dispatches) = pool();
    let claimed = mshr.lookup(0x2000).unwrap();
    assert!(dispatches.borrow().is_empty());

    let ins = mshr.insert(0x2000, 1, 0).unwrap();
    assert_eq!(ins.entry, claimed);
    assert_eq!(ins.kind, InsertKind::Allocated { latency: 20 });
    assert_eq!(dispatches.borrow().len(), 1);
    assert_eq!(mshr.stats().hits(), 0);
    assert_eq!(mshr.stats().misses(), 1);
    assert_eq!(mshr.stats().dispatched(), 1);
}

#[test]
fn late_fill_after_reclaim_is_dropped() {
    let (mut mshr, dispatches) = pool_with(1, 2, MergePolicy::MatchFirst);
    let old = mshr.insert(0x1000, 1, 0).unwrap();
    assert!(mshr.free_entry(old.entry));
    let new = mshr.insert(0x8000, 2, 3).unwrap();
    assert_eq!(new.entry.index, old.entry.index);
    assert_ne!(new.entry, old.entry);
    assert_eq!(dispatches.borrow().len(), 2);

    let mut cache = RecordingCache::default();
    let mut woken = Vec::new();
    let mut wake = |requester: u32, _now: Cycle| woken.push(requester);
    let done = mshr
        .complete_request(old.entry, &block_data(), &mut cache, &mut wake, 20)
        .unwrap();
    assert_eq!(done, Completion::Stale);
    assert!(cache.writes.is_empty());
    assert!(woken.is_empty());

    let live = mshr.entry(new.entry).unwrap();
    assert_eq!(live.block_addr(), 0x8000);
    assert_eq!(live.slot_count(), 1);
    assert_eq!(mshr.stats().stale_completions(), 1);
}

#[test]
fn free_twice_is_a_no_op() {
    let (mut mshr, _) = pool();
    let ins = mshr.insert(0x40, 1, 0).unwrap();
    mshr.insert(0x80, 2, 0).unwrap();
    assert!(mshr.free_entry(ins.entry));
    let valid = mshr.valid_entries();
    let released = mshr.stats().released();

    assert!(!mshr.free_entry(ins.entry));
    assert_eq!(mshr.valid_entries(), valid);
    assert_eq!(mshr.stats().released(), released);
    assert_eq!(mshr.entry_at(ins.entry.index).unwrap().slot_count(), 0);
}

#[test]
fn full_pool_merge_depends_on_policy() {
    let (mut match_first, _) = pool_with(2, 4, MergePolicy::MatchFirst);
    let (mut conservative, _) = pool_with(2, 4, MergePolicy::FullBlocksMerge);
    for mshr in [&mut match_first, &mut conservative] {
        mshr.insert(0x0, 1, 0).unwrap();
        mshr.insert(0x40, 2, 0).unwrap();
        assert!(mshr.is_full());
    }

    let merged = match_first.insert(0x8, 3, 1).unwrap();
    assert_eq!(merged.kind, InsertKind::Merged);
    assert_eq!(conservative.insert(0x8, 3, 1), Err(MshrReject::PoolFull));
    assert_eq!(conservative.lookup(0x8), None);
}

#[test]
fn prefetch_fill_notifies_nobody() {
    let (mut mshr, dispatches) = pool();
    let pf = mshr.insert_prefetch(0x3000, 0).unwrap();
    assert!(matches!(pf.kind, InsertKind::Allocated { .. }));
    assert_eq!(dispatches.borrow().len(), 1);

    let mut cache = RecordingCache::default();
    let mut woken = 0;
    let mut wake = |_: u32, _: Cycle| woken += 1;
    let done = mshr
        .complete_request(pf.entry, &block_data(), &mut cache, &mut wake, 7)
        .unwrap();
    assert_eq!(
        done,
        Completion::Filled {
            block_addr: 0x3000,
            notified: 0
        }
    );
    assert_eq!(woken, 0);
    assert_eq!(cache.writes.len(), 1);
}

#[test]
fn short_fill_is_an_error_and_keeps_entry() {
    let (mut mshr, _) = pool();
    let ins = mshr.insert(0x1000, 1, 0).unwrap();
    let mut cache = RecordingCache::default();
    let mut wake = |_: u32, _: Cycle| {};
    assert!(mshr
        .complete_request(ins.entry, &[0u8; 32], &mut cache, &mut wake, 5)
        .is_err());
    assert!(mshr.is_live(ins.entry));
    assert!(cache.writes.is_empty());
}

#[test]
fn cache_error_propagates() {
    let (mut mshr, _) = pool();
    let ins = mshr.insert(0x1000, 1, 0).unwrap();
    let mut wake = |_: u32, _: Cycle| {};
    let err = mshr
        .complete_request(ins.entry, &block_data(), &mut RejectingCache, &mut wake, 5)
        .unwrap_err();
    assert!(err.to_string().contains("0x1000"));
}

#[test]
fn send_request_redispatches_live_entry() {
    let (mut mshr, dispatches) = pool();
    let ins = mshr.insert(0x1000, 1, 0).unwrap();
    assert_eq!(mshr.send_request(ins.entry, 30), Some(20));
    assert_eq!(dispatches.borrow().len(), 2);
    assert_eq!(mshr.entry(ins.entry).unwrap().ready_at(), Some(50));
}

#[test]
fn find_does_not_claim() {
    let (mut mshr, _) = pool();
    assert_eq!(mshr.find(0x1000), None);
    assert!(mshr.is_empty());
    let ins = mshr.insert(0x1004, 1, 0).unwrap();
    assert_eq!(mshr.find(0x103f), Some(ins.entry));
}
