use std::fmt;

use crate::mshr::slot::BlockSlot;
use crate::timeq::Cycle;

/// Entry-level status flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryStatus(u8);

impl EntryStatus {
    pub const VALID: EntryStatus = EntryStatus(0x1);
    pub const FULL: EntryStatus = EntryStatus(0x2);
    pub const PENDING: EntryStatus = EntryStatus(0x4);
    pub const PREFETCH: EntryStatus = EntryStatus(0x8);

    pub fn empty() -> Self {
        EntryStatus(0)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: EntryStatus) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: EntryStatus) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: EntryStatus) {
        self.0 &= !other.0;
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)?;
        for (flag, name) in [
            (Self::VALID, "valid"),
            (Self::FULL, "full"),
            (Self::PENDING, "pending"),
            (Self::PREFETCH, "prefetch"),
        ] {
            if self.contains(flag) {
                write!(f, " ({})", name)?;
            }
        }
        Ok(())
    }
}

/// Reference to one claim of an entry. The generation changes on every claim and release,
/// so a reference held across a release no longer matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    pub index: usize,
    pub generation: u32,
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.g{}", self.index, self.generation)
    }
}

#[derive(Debug)]
pub struct MshrEntry<R> {
    block_addr: u64,
    status: EntryStatus,
    slots: Vec<BlockSlot<R>>,
    slot_count: usize,
    generation: u32,
    issued_at: Option<Cycle>,
    ready_at: Option<Cycle>,
}

impl<R: Copy> MshrEntry<R> {
    pub(crate) fn new(num_blocks: usize) -> Self {
        Self {
            block_addr: 0,
            status: EntryStatus::empty(),
            slots: vec![BlockSlot::empty(); num_blocks],
            slot_count: 0,
            generation: 0,
            issued_at: None,
            ready_at: None,
        }
    }

    pub fn block_addr(&self) -> u64 {
        self.block_addr
    }

    pub fn status(&self) -> EntryStatus {
        self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status.contains(EntryStatus::VALID)
    }

    pub fn is_pending(&self) -> bool {
        self.status.contains(EntryStatus::PENDING)
    }

    pub fn is_full(&self) -> bool {
        self.status.contains(EntryStatus::FULL)
    }

    pub fn is_prefetch(&self) -> bool {
        self.status.contains(EntryStatus::PREFETCH)
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn issued_at(&self) -> Option<Cycle> {
        self.issued_at
    }

    pub fn ready_at(&self) -> Option<Cycle> {
        self.ready_at
    }

    /// Live sub-requests in insertion order.
    pub fn slots(&self) -> impl Iterator<Item = &BlockSlot<R>> {
        self.slots[..self.slot_count]
            .iter()
            .filter(|slot| slot.is_valid())
    }

    pub(crate) fn id(&self, index: usize) -> EntryId {
        EntryId {
            index,
            generation: self.generation,
        }
    }

    pub(crate) fn claim(&mut self, block_addr: u64) {
        debug_assert!(!self.is_valid());
        debug_assert_eq!(self.slot_count, 0);
        self.generation = self.generation.wrapping_add(1);
        self.block_addr = block_addr;
        self.status = EntryStatus::VALID;
        self.issued_at = None;
        self.ready_at = None;
    }

    pub(crate) fn set_status(&mut self, flag: EntryStatus, on: bool) {
        if on {
            self.status.insert(flag);
        } else {
            self.status.remove(flag);
        }
    }

    pub(crate) fn mark_dispatched(&mut self, now: Cycle, latency: Cycle) {
        self.status.insert(EntryStatus::PENDING);
        self.issued_at = Some(now);
        self.ready_at = Some(now.saturating_add(latency));
    }

    /// Appends a sub-request. Returns false and sets FULL when every slot is taken.
    pub(crate) fn push_slot(&mut self, offset: u64, requester: Option<R>, now: Cycle) -> bool {
        if self.slot_count >= self.slots.len() {
            self.status.insert(EntryStatus::FULL);
            return false;
        }
        self.slots[self.slot_count].fill(offset, requester, now);
        self.slot_count += 1;
        if self.slot_count == self.slots.len() {
            self.status.insert(EntryStatus::FULL);
        }
        true
    }

    pub(crate) fn release(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.clear();
        }
        self.slot_count = 0;
        self.status = EntryStatus::empty();
        self.generation = self.generation.wrapping_add(1);
        self.issued_at = None;
        self.ready_at = None;
    }
}
