use std::collections::VecDeque;

use log::trace;
use serde::Serialize;
use smallvec::SmallVec;

use crate::mshr::{CompletionSink, EntryId};
use crate::timeq::Cycle;

/// Handle to an in-flight load. Stays comparable after the load is squashed, but no longer
/// resolves once its slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadId {
    slot: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoadState {
    Free,
    Waiting { entry: Option<EntryId> },
    Done { at: Cycle },
}

#[derive(Debug, Clone, Copy)]
struct LoadSlot {
    generation: u32,
    addr: u64,
    issued_at: Cycle,
    state: LoadState,
}

#[derive(Debug, Clone, Copy)]
pub struct RetiredLoad {
    pub id: LoadId,
    pub addr: u64,
    pub latency: Cycle,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct LoadStats {
    pub issued: u64,
    pub retired: u64,
    pub squashed: u64,
    pub stale_notifications: u64,
    pub total_latency: u64,
    pub max_latency: u64,
}

impl LoadStats {
    pub fn mean_latency(&self) -> f64 {
        if self.retired == 0 {
            0.0
        } else {
            self.total_latency as f64 / self.retired as f64
        }
    }
}

/// Fixed-size table of loads waiting on memory.
#[derive(Debug)]
pub struct LoadQueue {
    slots: Vec<LoadSlot>,
    free: Vec<u32>,
    completed: VecDeque<LoadId>,
    stats: LoadStats,
}

impl LoadQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let slots = vec![
            LoadSlot {
                generation: 0,
                addr: 0,
                issued_at: 0,
                state: LoadState::Free,
            };
            capacity
        ];
        // popped from the back, so slot 0 is handed out first
        let free = (0..capacity as u32).rev().collect();
        Self {
            slots,
            free,
            completed: VecDeque::new(),
            stats: LoadStats::default(),
        }
    }

    pub fn stats(&self) -> &LoadStats {
        &self.stats
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.free.len() == self.slots.len()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    fn slot(&self, id: LoadId) -> Option<&LoadSlot> {
        self.slots
            .get(id.slot as usize)
            .filter(|slot| slot.generation == id.generation && slot.state != LoadState::Free)
    }

    fn slot_mut(&mut self, id: LoadId) -> Option<&mut LoadSlot> {
        self.slots
            .get_mut(id.slot as usize)
            .filter(|slot| slot.generation == id.generation && slot.state != LoadState::Free)
    }

    pub fn is_live(&self, id: LoadId) -> bool {
        self.slot(id).is_some()
    }

    pub fn alloc(&mut self, addr: u64, now: Cycle) -> Option<LoadId> {
        let idx = self.free.pop()?;
        let slot = &mut self.slots[idx as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.addr = addr;
        slot.issued_at = now;
        slot.state = LoadState::Waiting { entry: None };
        self.stats.issued += 1;
        Some(LoadId {
            slot: idx,
            generation: slot.generation,
        })
    }

    pub fn addr(&self, id: LoadId) -> Option<u64> {
        self.slot(id).map(|slot| slot.addr)
    }

    pub fn is_done(&self, id: LoadId) -> bool {
        matches!(self.slot(id).map(|slot| slot.state), Some(LoadState::Done { .. }))
    }

    /// Records which MSHR entry the load merged into.
    pub fn set_entry(&mut self, id: LoadId, entry: EntryId) {
        if let Some(slot) = self.slot_mut(id) {
            if let LoadState::Waiting { entry: waiting } = &mut slot.state {
                *waiting = Some(entry);
            }
        }
    }

    pub fn waiting_on(&self, entry: EntryId) -> SmallVec<[LoadId; 4]> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == LoadState::Waiting { entry: Some(entry) })
            .map(|(idx, slot)| LoadId {
                slot: idx as u32,
                generation: slot.generation,
            })
            .collect()
    }

    /// Marks a waiting load as having its data. Returns false for stale or finished handles.
    pub fn complete(&mut self, id: LoadId, now: Cycle) -> bool {
        let Some(slot) = self
            .slot_mut(id)
            .filter(|slot| matches!(slot.state, LoadState::Waiting { .. }))
        else {
            self.stats.stale_notifications += 1;
            trace!("ignoring completion for stale load {:?}", id);
            return false;
        };
        slot.state = LoadState::Done { at: now };
        self.completed.push_back(id);
        true
    }

    /// Drops a load without completing it.
    pub fn squash(&mut self, id: LoadId) -> bool {
        if !self.is_live(id) {
            return false;
        }
        self.release(id.slot);
        self.stats.squashed += 1;
        true
    }

    fn release(&mut self, idx: u32) {
        let slot = &mut self.slots[idx as usize];
        slot.state = LoadState::Free;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(idx);
    }

    /// Frees every load that has completed since the last call, oldest completion first.
    pub fn retire(&mut self) -> Vec<RetiredLoad> {
        let mut retired = Vec::with_capacity(self.completed.len());
        while let Some(id) = self.completed.pop_front() {
            let Some(slot) = self.slot(id) else {
                continue;
            };
            let LoadState::Done { at } = slot.state else {
                continue;
            };
            let latency = at.saturating_sub(slot.issued_at);
            let addr = slot.addr;
            self.release(id.slot);
            self.stats.retired += 1;
            self.stats.total_latency += latency;
            self.stats.max_latency = self.stats.max_latency.max(latency);
            retired.push(RetiredLoad { id, addr, latency });
        }
        retired
    }
}

impl CompletionSink<LoadId> for LoadQueue {
    fn mark_complete(&mut self, requester: LoadId, now: Cycle) {
        self.complete(requester, now);
    }
}
