use anyhow::{ensure, Result};
use log::trace;
use serde::Serialize;

use crate::mshr::{BlockDecoder, FillTarget};
use crate::sim::config::CacheConfig;
use crate::timeq::Cycle;

#[derive(Debug, Clone)]
struct CacheLine {
    block_addr: u64,
    data: Box<[u8]>,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CacheStats {
    pub accesses: u64,
    pub hits: u64,
    pub fills: u64,
    pub evictions: u64,
}

/// Set-associative LRU cache holding line data. The MSHR writes fills into it.
#[derive(Debug)]
pub struct DataCache {
    decoder: BlockDecoder,
    sets: usize,
    lines: Vec<Vec<Option<CacheLine>>>,
    // per-set way order, most recently used first
    lru: Vec<Vec<usize>>,
    stats: CacheStats,
}

impl DataCache {
    pub fn new(config: &CacheConfig, decoder: BlockDecoder) -> Self {
        let sets = config.sets.max(1);
        let ways = config.ways.max(1);
        let mut lines = Vec::with_capacity(sets);
        let mut lru = Vec::with_capacity(sets);
        for _ in 0..sets {
            lines.push(vec![None; ways]);
            lru.push((0..ways).collect());
        }
        Self {
            decoder,
            sets,
            lines,
            lru,
            stats: CacheStats::default(),
        }
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    fn set_index(&self, block_addr: u64) -> usize {
        (self.decoder.block_number(block_addr) % self.sets as u64) as usize
    }

    fn find_way(&self, set_idx: usize, block_addr: u64) -> Option<usize> {
        self.lines[set_idx].iter().position(|line| {
            line.as_ref()
                .map_or(false, |line| line.block_addr == block_addr)
        })
    }

    /// Tag check for `addr`'s block; updates LRU on a hit.
    pub fn access(&mut self, addr: u64) -> bool {
        self.stats.accesses += 1;
        let block_addr = self.decoder.block_addr(addr);
        let set_idx = self.set_index(block_addr);
        match self.find_way(set_idx, block_addr) {
            Some(way) => {
                self.stats.hits += 1;
                self.touch(set_idx, way);
                true
            }
            None => false,
        }
    }

    /// Reads `n` bytes at `addr` if the line is resident. Does not touch LRU or stats.
    pub fn read(&self, addr: u64, n: usize) -> Option<&[u8]> {
        let block_addr = self.decoder.block_addr(addr);
        let offset = self.decoder.offset(addr) as usize;
        let line = self.lines[self.set_index(block_addr)]
            .iter()
            .flatten()
            .find(|line| line.block_addr == block_addr)?;
        line.data.get(offset..offset.checked_add(n)?)
    }

    fn touch(&mut self, set_idx: usize, way: usize) {
        let order = &mut self.lru[set_idx];
        if let Some(pos) = order.iter().position(|&idx| idx == way) {
            order.remove(pos);
        }
        order.insert(0, way);
    }
}

impl FillTarget for DataCache {
    fn write_block(&mut self, block_addr: u64, data: &[u8], now: Cycle) -> Result<()> {
        ensure!(
            data.len() == self.decoder.block_size() as usize,
            "fill of {} bytes into {}B lines",
            data.len(),
            self.decoder.block_size()
        );
        let block_addr = self.decoder.block_addr(block_addr);
        let set_idx = self.set_index(block_addr);
        let way = match self.find_way(set_idx, block_addr) {
            Some(way) => way,
            None => {
                let set = &self.lines[set_idx];
                match set.iter().position(|line| line.is_none()) {
                    Some(way) => way,
                    None => {
                        self.stats.evictions += 1;
                        *self.lru[set_idx].last().unwrap_or(&0)
                    }
                }
            }
        };
        trace!(
            "cache fill {:#x} into set {} way {} at {}",
            block_addr,
            set_idx,
            way,
            now
        );
        self.lines[set_idx][way] = Some(CacheLine {
            block_addr,
            data: data.into(),
        });
        self.stats.fills += 1;
        self.touch(set_idx, way);
        Ok(())
    }
}
