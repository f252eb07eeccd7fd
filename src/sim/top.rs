use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use anyhow::{bail, ensure, Result};
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use smallvec::SmallVec;

use crate::base::mem::HasMemory;
use crate::mshr::{Completion, EntryId, InsertKind, MemAccessFn, MshrConfig, MshrPool, MshrReject};
use crate::sim::cache::DataCache;
use crate::sim::config::{CacheConfig, CompletionMode, MemConfig, SimConfig};
use crate::sim::load_queue::{LoadId, LoadQueue};
use crate::sim::memory::TimedMemory;
use crate::sim::perf_log::RunSummary;
use crate::timeq::Cycle;
use crate::traffic::{PatternEngine, TrafficConfig};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SimStats {
    pub cache_hit_loads: u64,
    pub mshr_allocations: u64,
    pub mshr_merges: u64,
    pub pool_full_stalls: u64,
    pub entry_full_stalls: u64,
    pub load_queue_stalls: u64,
    pub prefetches_issued: u64,
    pub prefetches_dropped: u64,
    pub squash_events: u64,
    pub stale_fills: u64,
    pub verified_loads: u64,
    pub unverified_loads: u64,
    pub value_mismatches: u64,
}

/// Load/store front end, data cache and backing memory wrapped around one MSHR pool.
pub struct MshrSim {
    config: SimConfig,
    cycle: Cycle,
    mshr: MshrPool<LoadId>,
    memory: Rc<RefCell<TimedMemory>>,
    mem_size: u64,
    cache: DataCache,
    loads: LoadQueue,
    traffic: PatternEngine,
    next_request: u64,
    // loads that missed and could not get an MSHR slot yet
    stalled: VecDeque<LoadId>,
    rng: StdRng,
    stats: SimStats,
}

impl MshrSim {
    pub fn new(
        sim_config: SimConfig,
        mshr_config: MshrConfig,
        cache_config: CacheConfig,
        mem_config: MemConfig,
        traffic_config: TrafficConfig,
    ) -> Result<Self> {
        ensure!(sim_config.issue_width > 0, "issue_width must be > 0");
        ensure!(
            (0.0..=1.0).contains(&sim_config.squash_rate),
            "squash_rate {} outside [0, 1]",
            sim_config.squash_rate
        );
        ensure!(mem_config.bytes_per_cycle > 0, "bytes_per_cycle must be > 0");
        ensure!(mem_config.queue_capacity > 0, "queue_capacity must be > 0");

        let traffic = PatternEngine::new(&traffic_config)?;
        let mem_size = mem_config.size_bytes as u64;
        if traffic.end_addr().saturating_add(mshr_config.block_size as u64) > mem_size {
            bail!(
                "traffic reaches {:#x} but backing memory is only {:#x} bytes",
                traffic.end_addr(),
                mem_size
            );
        }

        let memory = Rc::new(RefCell::new(TimedMemory::new(&mem_config)));
        let handle = Rc::clone(&memory);
        let access_fn: MemAccessFn = Box::new(move |cmd, block_addr, size, entry, now| {
            handle.borrow_mut().access(cmd, block_addr, size, entry, now)
        });
        let mshr: MshrPool<LoadId> = MshrPool::new(&mshr_config, access_fn)?;
        let cache = DataCache::new(&cache_config, *mshr.decoder());

        info!(
            "mshr sim: {} loads over {} pattern(s), {:?} completions",
            traffic.total_requests(),
            traffic.len(),
            sim_config.completion_mode
        );
        Ok(Self {
            cycle: 0,
            mshr,
            memory,
            mem_size,
            cache,
            loads: LoadQueue::new(sim_config.load_queue_size),
            traffic,
            next_request: 0,
            stalled: VecDeque::new(),
            rng: StdRng::seed_from_u64(sim_config.seed),
            stats: SimStats::default(),
            config: sim_config,
        })
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn cycle(&self) -> Cycle {
        self.cycle
    }

    pub fn mshr(&self) -> &MshrPool<LoadId> {
        &self.mshr
    }

    pub fn cache(&self) -> &DataCache {
        &self.cache
    }

    pub fn loads(&self) -> &LoadQueue {
        &self.loads
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn finished(&self) -> bool {
        self.next_request >= self.traffic.total_requests()
            && self.stalled.is_empty()
            && self.loads.is_empty()
    }

    pub fn simulate(&mut self) -> Result<RunSummary> {
        while !self.finished() {
            if self.cycle >= self.config.timeout {
                warn!(
                    "timeout at cycle {}: {} loads in flight, {} stalled",
                    self.cycle,
                    self.loads.len(),
                    self.stalled.len()
                );
                self.mshr.dump(None)?;
                bail!("simulation did not finish within {} cycles", self.config.timeout);
            }
            self.tick()?;
        }
        info!("mshr sim finished after {} cycles", self.cycle);
        if self.config.dump_on_exit {
            self.mshr.dump(None)?;
        }
        Ok(self.summary())
    }

    pub fn tick(&mut self) -> Result<()> {
        let now = self.cycle;
        self.deliver_fills(now)?;
        self.retire_loads();
        self.inject_squash(now);
        self.retry_stalled(now);
        self.issue_new(now)?;
        self.cycle += 1;
        Ok(())
    }

    fn deliver_fills(&mut self, now: Cycle) -> Result<()> {
        let fills = self.memory.borrow_mut().tick(now)?;
        match self.config.completion_mode {
            CompletionMode::Push => {
                for fill in fills {
                    self.complete(fill.entry, &fill.data, now)?;
                }
            }
            CompletionMode::Poll => {
                // the server still paces the channel; data is read once the estimate elapses
                for id in self.mshr.update(now) {
                    let Some(entry) = self.mshr.entry(id) else {
                        continue;
                    };
                    let data = self
                        .memory
                        .borrow()
                        .read_block(entry.block_addr(), self.mshr.block_size())?;
                    self.complete(id, &data, now)?;
                }
            }
        }
        Ok(())
    }

    fn complete(&mut self, id: EntryId, data: &[u8], now: Cycle) -> Result<()> {
        let completion =
            self.mshr
                .complete_request(id, data, &mut self.cache, &mut self.loads, now)?;
        if completion == Completion::Stale {
            self.stats.stale_fills += 1;
        }
        Ok(())
    }

    fn retire_loads(&mut self) {
        for load in self.loads.retire() {
            let cached = self.cache.read(load.addr, 1).map(|bytes| bytes[0]);
            let Some(cached) = cached else {
                self.stats.unverified_loads += 1;
                continue;
            };
            let memory = self.memory.borrow();
            match memory.backing().read(load.addr as usize, 1) {
                Ok(expected) if expected[0] == cached => self.stats.verified_loads += 1,
                _ => {
                    warn!("load {:?} @ {:#x} returned stale data", load.id, load.addr);
                    self.stats.value_mismatches += 1;
                }
            }
        }
    }

    // Models misspeculation recovery: drop one outstanding miss and every load merged into it.
    fn inject_squash(&mut self, now: Cycle) {
        if self.config.squash_rate <= 0.0 || self.mshr.is_empty() {
            return;
        }
        if !self.rng.gen_bool(self.config.squash_rate) {
            return;
        }
        let live: SmallVec<[EntryId; 8]> = self.mshr.live_entries().collect();
        let victim = live[self.rng.gen_range(0..live.len())];
        let loads = self.loads.waiting_on(victim);
        self.mshr.free_entry(victim);
        for id in loads.iter() {
            self.loads.squash(*id);
        }
        self.stats.squash_events += 1;
        debug!("squashed {} with {} loads at {}", victim, loads.len(), now);
    }

    fn retry_stalled(&mut self, now: Cycle) {
        for _ in 0..self.stalled.len() {
            let Some(id) = self.stalled.pop_front() else {
                break;
            };
            if !self.try_issue(id, now) {
                self.stalled.push_back(id);
            }
        }
    }

    fn issue_new(&mut self, now: Cycle) -> Result<()> {
        for _ in 0..self.config.issue_width {
            if self.next_request >= self.traffic.total_requests() {
                break;
            }
            if self.loads.is_full() {
                self.stats.load_queue_stalls += 1;
                break;
            }
            let Some((addr, pattern)) = self.traffic.request(self.next_request) else {
                bail!("traffic stream ended early at request {}", self.next_request);
            };
            let prefetch_distance = pattern.prefetch_distance as u64;
            let Some(id) = self.loads.alloc(addr, now) else {
                break;
            };
            self.next_request += 1;
            if !self.try_issue(id, now) {
                self.stalled.push_back(id);
            }
            if prefetch_distance > 0 {
                let ahead = prefetch_distance.saturating_mul(self.mshr.block_size() as u64);
                self.prefetch(addr.saturating_add(ahead), now);
            }
        }
        Ok(())
    }

    /// Returns false when the load missed and the MSHR could not take it this cycle.
    fn try_issue(&mut self, id: LoadId, now: Cycle) -> bool {
        let Some(addr) = self.loads.addr(id) else {
            return true;
        };
        if self.cache.access(addr) {
            self.stats.cache_hit_loads += 1;
            self.loads.complete(id, now);
            return true;
        }
        match self.mshr.insert(addr, id, now) {
            Ok(inserted) => {
                self.loads.set_entry(id, inserted.entry);
                match inserted.kind {
                    InsertKind::Allocated { .. } => self.stats.mshr_allocations += 1,
                    InsertKind::Merged => self.stats.mshr_merges += 1,
                }
                true
            }
            Err(MshrReject::PoolFull) => {
                self.stats.pool_full_stalls += 1;
                false
            }
            Err(MshrReject::EntryFull { .. }) => {
                self.stats.entry_full_stalls += 1;
                false
            }
        }
    }

    fn prefetch(&mut self, addr: u64, now: Cycle) {
        let block_addr = self.mshr.decoder().block_addr(addr);
        if block_addr.saturating_add(self.mshr.block_size() as u64) > self.mem_size {
            return;
        }
        if self.cache.read(block_addr, 1).is_some() || self.mshr.find(block_addr).is_some() {
            return;
        }
        match self.mshr.insert_prefetch(block_addr, now) {
            Ok(_) => self.stats.prefetches_issued += 1,
            Err(_) => self.stats.prefetches_dropped += 1,
        }
    }

    pub fn dump(&self, out: Option<&mut dyn io::Write>) -> io::Result<()> {
        self.mshr.dump(out)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            cycles: self.cycle,
            mean_load_latency: self.loads.stats().mean_latency(),
            loads: *self.loads.stats(),
            sim: self.stats,
            mshr: *self.mshr.stats(),
            cache: *self.cache.stats(),
            memory: *self.memory.borrow().stats(),
        }
    }
}
