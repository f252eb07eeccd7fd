use std::fmt;
use std::io::{self, Write};

use anyhow::{ensure, Result};
use log::{debug, trace};
use smallvec::SmallVec;

use crate::mshr::addr::BlockDecoder;
use crate::mshr::config::{MergePolicy, MshrConfig};
use crate::mshr::entry::{EntryId, EntryStatus, MshrEntry};
use crate::mshr::notify::{CompletionSink, FillTarget, MemAccessFn, MemCmd};
use crate::mshr::stats::MshrStats;
use crate::timeq::Cycle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertKind {
    /// A fresh entry was claimed and its fill dispatched.
    Allocated { latency: Cycle },
    /// Merged into an entry whose fill is already outstanding.
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inserted {
    pub entry: EntryId,
    pub kind: InsertKind,
    pub slot_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MshrReject {
    /// No entry tracks the block and none is free. Stall and retry.
    PoolFull,
    /// The block is tracked but its entry has no free slot. Stall and retry.
    EntryFull { entry: EntryId },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Filled { block_addr: u64, notified: usize },
    /// The entry was released (and possibly reclaimed) before the fill arrived.
    Stale,
}

/// Fixed-capacity pool of miss status holding registers.
///
/// Entries live in an arena allocated once at construction. Claiming and releasing an entry
/// only flips status bits, so the miss path never allocates. At most one valid entry tracks
/// a given block address, and each entry dispatches one backing fill no matter how many
/// sub-requests merge into it.
pub struct MshrPool<R> {
    decoder: BlockDecoder,
    entries: Vec<MshrEntry<R>>,
    num_blocks: usize,
    valid_entries: usize,
    merge_policy: MergePolicy,
    access_fn: MemAccessFn,
    stats: MshrStats,
}

impl<R: Copy + fmt::Debug> MshrPool<R> {
    pub fn new(config: &MshrConfig, access_fn: MemAccessFn) -> Result<Self> {
        let decoder = BlockDecoder::new(config.block_size)?;
        ensure!(config.num_entries > 0, "mshr needs at least one entry");
        ensure!(
            config.blocks_per_entry > 0,
            "mshr entries need at least one block slot"
        );
        let entries = (0..config.num_entries)
            .map(|_| MshrEntry::new(config.blocks_per_entry))
            .collect();
        debug!(
            "mshr: {} entries x {} slots, {}B blocks, {:?}",
            config.num_entries, config.blocks_per_entry, config.block_size, config.merge_policy
        );
        Ok(Self {
            decoder,
            entries,
            num_blocks: config.blocks_per_entry,
            valid_entries: 0,
            merge_policy: config.merge_policy,
            access_fn,
            stats: MshrStats::default(),
        })
    }

    pub fn decoder(&self) -> &BlockDecoder {
        &self.decoder
    }

    pub fn block_size(&self) -> u32 {
        self.decoder.block_size()
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn blocks_per_entry(&self) -> usize {
        self.num_blocks
    }

    pub fn valid_entries(&self) -> usize {
        self.valid_entries
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    pub fn is_full(&self) -> bool {
        self.valid_entries == self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.valid_entries == 0
    }

    pub fn stats(&self) -> &MshrStats {
        &self.stats
    }

    /// The entry behind `id`, if that claim is still live.
    pub fn entry(&self, id: EntryId) -> Option<&MshrEntry<R>> {
        self.entries
            .get(id.index)
            .filter(|entry| entry.is_valid() && entry.generation() == id.generation)
    }

    #[cfg(test)]
    pub(crate) fn entry_at(&self, index: usize) -> Option<&MshrEntry<R>> {
        self.entries.get(index)
    }

    pub fn is_live(&self, id: EntryId) -> bool {
        self.entry(id).is_some()
    }

    /// Finds the live entry tracking `addr`'s block without claiming anything.
    pub fn find(&self, addr: u64) -> Option<EntryId> {
        let block_addr = self.decoder.block_addr(addr);
        self.entries
            .iter()
            .enumerate()
            .find(|(_, entry)| entry.is_valid() && entry.block_addr() == block_addr)
            .map(|(index, entry)| entry.id(index))
    }

    pub fn live_entries(&self) -> impl Iterator<Item = EntryId> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_valid())
            .map(|(index, entry)| entry.id(index))
    }

    /// Find-or-claim. Returns the entry already tracking `addr`'s block, or claims a free entry
    /// for it. A claimed entry has no slots and no request in flight yet.
    pub fn lookup(&mut self, addr: u64) -> Option<EntryId> {
        self.lookup_index(addr)
            .map(|index| self.entries[index].id(index))
    }

    fn lookup_index(&mut self, addr: u64) -> Option<usize> {
        if self.merge_policy == MergePolicy::FullBlocksMerge && self.is_full() {
            return None;
        }

        let block_addr = self.decoder.block_addr(addr);
        let mut reusable = None;
        for (index, entry) in self.entries.iter().enumerate() {
            if entry.is_valid() {
                if entry.block_addr() == block_addr {
                    return Some(index);
                }
            } else {
                reusable = Some(index);
            }
        }

        if self.is_full() {
            return None;
        }
        let index = reusable?;
        self.entries[index].claim(block_addr);
        self.valid_entries += 1;
        self.stats.record_miss(self.valid_entries);
        Some(index)
    }

    /// Tracks a demand miss for `addr` on behalf of `requester`.
    pub fn insert(&mut self, addr: u64, requester: R, now: Cycle) -> Result<Inserted, MshrReject> {
        self.insert_inner(addr, Some(requester), now)
    }

    /// Tracks a prefetch for `addr`. Nobody is notified when it fills.
    pub fn insert_prefetch(&mut self, addr: u64, now: Cycle) -> Result<Inserted, MshrReject> {
        self.insert_inner(addr, None, now)
    }

    fn insert_inner(
        &mut self,
        addr: u64,
        requester: Option<R>,
        now: Cycle,
    ) -> Result<Inserted, MshrReject> {
        self.stats.record_access();
        let Some(index) = self.lookup_index(addr) else {
            self.stats.record_full_stall();
            trace!("mshr full, rejecting {:#x} at {}", addr, now);
            return Err(MshrReject::PoolFull);
        };

        // an entry claimed here or by an earlier bare lookup has no fill in flight yet
        let id = self.entries[index].id(index);
        let merging = self.entries[index].is_pending();
        let kind = if merging {
            if requester.is_some() {
                self.entries[index].set_status(EntryStatus::PREFETCH, false);
            }
            InsertKind::Merged
        } else {
            self.entries[index].set_status(EntryStatus::PREFETCH, requester.is_none());
            InsertKind::Allocated {
                latency: self.dispatch(index, now),
            }
        };

        let offset = self.decoder.offset(addr);
        let entry = &mut self.entries[index];
        if !entry.push_slot(offset, requester, now) {
            self.stats.record_merge_overflow();
            trace!("mshr entry {} full, rejecting {:#x}", id, addr);
            return Err(MshrReject::EntryFull { entry: id });
        }
        if merging {
            self.stats.record_hit();
        }

        trace!(
            "mshr {:?} {:#x} -> {} ({} slots)",
            kind,
            addr,
            id,
            entry.slot_count()
        );
        Ok(Inserted {
            entry: id,
            kind,
            slot_count: entry.slot_count(),
        })
    }

    /// Launches the backing fill for `id`. Returns the callback's latency estimate, or `None`
    /// if the entry is no longer live.
    pub fn send_request(&mut self, id: EntryId, now: Cycle) -> Option<Cycle> {
        if !self.is_live(id) {
            return None;
        }
        Some(self.dispatch(id.index, now))
    }

    fn dispatch(&mut self, index: usize, now: Cycle) -> Cycle {
        let entry = &self.entries[index];
        let id = entry.id(index);
        let block_addr = entry.block_addr();
        let latency = (self.access_fn)(MemCmd::Read, block_addr, self.decoder.block_size(), id, now);
        self.entries[index].mark_dispatched(now, latency);
        self.stats.record_dispatch();
        debug!(
            "mshr dispatch {} block {:#x} at {} (+{})",
            id, block_addr, now, latency
        );
        latency
    }

    /// Writes the returned block into `cache`, wakes every merged requester in insertion
    /// order, and releases the entry. Fills for entries released in the meantime are dropped.
    pub fn complete_request<C, S>(
        &mut self,
        id: EntryId,
        data: &[u8],
        cache: &mut C,
        sink: &mut S,
        now: Cycle,
    ) -> Result<Completion>
    where
        C: FillTarget + ?Sized,
        S: CompletionSink<R> + ?Sized,
    {
        if !self.is_live(id) {
            self.stats.record_stale_completion();
            debug!("mshr dropping stale fill for {} at {}", id, now);
            return Ok(Completion::Stale);
        }
        ensure!(
            data.len() == self.decoder.block_size() as usize,
            "fill for {} carries {} bytes, expected {}",
            id,
            data.len(),
            self.decoder.block_size()
        );

        let block_addr = self.entries[id.index].block_addr();
        cache.write_block(block_addr, data, now)?;

        let mut notified = 0;
        for slot in self.entries[id.index].slots() {
            if let Some(requester) = slot.requester() {
                sink.mark_complete(requester, now);
                notified += 1;
            }
        }

        self.release(id.index);
        self.stats.record_completion(notified, now);
        debug!(
            "mshr complete {} block {:#x} at {}, woke {}",
            id, block_addr, now, notified
        );
        Ok(Completion::Filled {
            block_addr,
            notified,
        })
    }

    /// Discards an entry and its sub-requests without waiting for the fill. Merged requesters
    /// are not notified. Returns false if `id` was already released.
    pub fn free_entry(&mut self, id: EntryId) -> bool {
        if !self.is_live(id) {
            return false;
        }
        self.release(id.index);
        self.stats.record_release();
        debug!("mshr free {}", id);
        true
    }

    /// Frees every live entry, e.g. on a full pipeline flush.
    pub fn clear(&mut self) {
        let live: SmallVec<[EntryId; 8]> = self.live_entries().collect();
        for id in live {
            self.free_entry(id);
        }
    }

    fn release(&mut self, index: usize) {
        let entry = &mut self.entries[index];
        if entry.is_valid() {
            self.valid_entries -= 1;
        }
        entry.release();
    }

    /// Entries whose fill was expected by `now`, for callers that poll instead of waiting for
    /// the backing memory to push completions.
    pub fn update(&self, now: Cycle) -> SmallVec<[EntryId; 4]> {
        if self.is_empty() {
            return SmallVec::new();
        }
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| {
                entry.is_valid()
                    && entry.is_pending()
                    && entry.ready_at().map_or(false, |ready_at| ready_at <= now)
            })
            .map(|(index, entry)| entry.id(index))
            .collect()
    }

    /// Writes the state of every entry to `out`, or stderr when none is given.
    pub fn dump(&self, out: Option<&mut dyn io::Write>) -> io::Result<()> {
        match out {
            Some(out) => write!(out, "{}", self),
            None => write!(io::stderr().lock(), "{}", self),
        }
    }
}

impl<R: Copy + fmt::Debug> fmt::Display for MshrPool<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== MSHR state ===")?;
        writeln!(
            f,
            "entries: {}, valid: {}, slots per entry: {}, block size: {}",
            self.entries.len(),
            self.valid_entries,
            self.num_blocks,
            self.decoder.block_size()
        )?;
        for (index, entry) in self.entries.iter().enumerate() {
            writeln!(f, "entry {} (gen {}):", index, entry.generation())?;
            writeln!(f, "  status: {}", entry.status())?;
            if entry.is_valid() {
                writeln!(f, "  block_addr: {:#010x}", entry.block_addr())?;
                if let Some(ready_at) = entry.ready_at() {
                    writeln!(f, "  ready_at: {}", ready_at)?;
                }
            }
            writeln!(f, "  valid slots: {}/{}", entry.slot_count(), entry.capacity())?;
            for (slot_idx, slot) in entry.slots().enumerate() {
                writeln!(
                    f,
                    "    slot {}: offset {:#x} valid requester {:?} t={}",
                    slot_idx,
                    slot.offset(),
                    slot.requester(),
                    slot.request_time()
                )?;
            }
        }
        Ok(())
    }
}
