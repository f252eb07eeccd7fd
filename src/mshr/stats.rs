use crate::timeq::Cycle;
use serde::Serialize;
use std::ops::AddAssign;

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MshrStats {
    accesses: u64,
    hits: u64,
    misses: u64,
    full_stalls: u64,
    merge_overflows: u64,
    dispatched: u64,
    completed: u64,
    stale_completions: u64,
    released: u64,
    notified: u64,
    max_outstanding: u64,
    last_completion_cycle: Option<Cycle>,
}

impl MshrStats {
    pub fn accesses(&self) -> u64 {
        self.accesses
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn full_stalls(&self) -> u64 {
        self.full_stalls
    }

    pub fn merge_overflows(&self) -> u64 {
        self.merge_overflows
    }

    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn stale_completions(&self) -> u64 {
        self.stale_completions
    }

    pub fn released(&self) -> u64 {
        self.released
    }

    pub fn notified(&self) -> u64 {
        self.notified
    }

    pub fn max_outstanding(&self) -> u64 {
        self.max_outstanding
    }

    pub fn last_completion_cycle(&self) -> Option<Cycle> {
        self.last_completion_cycle
    }

    pub fn record_access(&mut self) {
        self.accesses = self.accesses.saturating_add(1);
    }

    pub fn record_hit(&mut self) {
        self.hits = self.hits.saturating_add(1);
    }

    pub fn record_miss(&mut self, outstanding: usize) {
        self.misses = self.misses.saturating_add(1);
        self.max_outstanding = self.max_outstanding.max(outstanding as u64);
    }

    pub fn record_full_stall(&mut self) {
        self.full_stalls = self.full_stalls.saturating_add(1);
    }

    pub fn record_merge_overflow(&mut self) {
        self.merge_overflows = self.merge_overflows.saturating_add(1);
    }

    pub fn record_dispatch(&mut self) {
        self.dispatched = self.dispatched.saturating_add(1);
    }

    pub fn record_completion(&mut self, notified: usize, now: Cycle) {
        self.completed = self.completed.saturating_add(1);
        self.notified = self.notified.saturating_add(notified as u64);
        self.last_completion_cycle = Some(now);
    }

    pub fn record_stale_completion(&mut self) {
        self.stale_completions = self.stale_completions.saturating_add(1);
    }

    pub fn record_release(&mut self) {
        self.released = self.released.saturating_add(1);
    }
}

impl AddAssign<&MshrStats> for MshrStats {
    fn add_assign(&mut self, other: &MshrStats) {
        self.accesses = self.accesses.saturating_add(other.accesses);
        self.hits = self.hits.saturating_add(other.hits);
        self.misses = self.misses.saturating_add(other.misses);
        self.full_stalls = self.full_stalls.saturating_add(other.full_stalls);
        self.merge_overflows = self.merge_overflows.saturating_add(other.merge_overflows);
        self.dispatched = self.dispatched.saturating_add(other.dispatched);
        self.completed = self.completed.saturating_add(other.completed);
        self.stale_completions = self
            .stale_completions
            .saturating_add(other.stale_completions);
        self.released = self.released.saturating_add(other.released);
        self.notified = self.notified.saturating_add(other.notified);
        self.max_outstanding = self.max_outstanding.max(other.max_outstanding);
        self.last_completion_cycle = match (self.last_completion_cycle, other.last_completion_cycle)
        {
            (Some(a), Some(b)) => Some(a.max(b)),
            (None, Some(b)) => Some(b),
            (a, None) => a,
        };
    }
}

impl AddAssign<MshrStats> for MshrStats {
    fn add_assign(&mut self, other: MshrStats) {
        *self += &other;
    }
}
