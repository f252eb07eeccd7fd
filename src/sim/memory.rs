use std::collections::VecDeque;

use anyhow::{Context, Result};
use log::trace;
use serde::Serialize;

use crate::base::mem::HasMemory;
use crate::mshr::{EntryId, MemCmd};
use crate::sim::config::MemConfig;
use crate::sim::flat_mem::FlatMemory;
use crate::timeq::{Cycle, ServiceRequest, TimedServer};

#[derive(Debug, Clone, Copy)]
struct PendingFill {
    cmd: MemCmd,
    entry: EntryId,
    block_addr: u64,
    size: u32,
}

/// A block returned by the backing memory, tagged with the entry that asked for it.
#[derive(Debug, Clone)]
pub struct Fill {
    pub entry: EntryId,
    pub block_addr: u64,
    pub data: Vec<u8>,
    pub issued_at: Cycle,
    pub ready_at: Cycle,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MemStats {
    pub reads: u64,
    pub writes: u64,
    pub deferred: u64,
    pub fills_returned: u64,
    pub bytes_returned: u64,
}

/// Backing memory behind the MSHR: a latency/bandwidth server in front of a flat store.
#[derive(Debug)]
pub struct TimedMemory {
    server: TimedServer<PendingFill>,
    // requests the server turned away, retried in order on later ticks
    deferred: VecDeque<ServiceRequest<PendingFill>>,
    backing: FlatMemory,
    stats: MemStats,
}

impl TimedMemory {
    pub fn new(config: &MemConfig) -> Self {
        Self {
            server: TimedServer::new(config.server_config()),
            deferred: VecDeque::new(),
            backing: FlatMemory::new_with_size(config.size_bytes),
            stats: MemStats::default(),
        }
    }

    pub fn backing(&self) -> &FlatMemory {
        &self.backing
    }

    pub fn stats(&self) -> &MemStats {
        &self.stats
    }

    pub fn outstanding(&self) -> usize {
        self.server.inflight_len() + self.deferred.len()
    }

    /// Memory-access callback body. Returns the estimated cycles until the block is back.
    pub fn access(
        &mut self,
        cmd: MemCmd,
        block_addr: u64,
        size: u32,
        entry: EntryId,
        now: Cycle,
    ) -> Cycle {
        match cmd {
            MemCmd::Read => self.stats.reads += 1,
            MemCmd::Write => self.stats.writes += 1,
        }
        let request = ServiceRequest::new(
            PendingFill {
                cmd,
                entry,
                block_addr,
                size,
            },
            size,
        );

        if self.deferred.is_empty() {
            match self.server.try_enqueue(now, request) {
                Ok(ticket) => return ticket.remaining_cycles(now),
                Err(bp) => self.defer(bp.into_request()),
            }
        } else {
            self.defer(request);
        }
        self.estimate_deferred(now, size)
    }

    fn defer(&mut self, request: ServiceRequest<PendingFill>) {
        trace!(
            "memory busy, deferring block {:#x}",
            request.payload.block_addr
        );
        self.stats.deferred += 1;
        self.deferred.push_back(request);
    }

    // Assumes everything ahead of the newest deferred request is served back to back.
    fn estimate_deferred(&self, now: Cycle, size: u32) -> Cycle {
        let backlog = self.server.available_at().saturating_sub(now);
        let queued = self.deferred.len() as Cycle;
        backlog.saturating_add(queued.saturating_mul(self.server.service_cycles(size)))
    }

    /// Drains reads whose service finished by `now`, then admits deferred requests.
    pub fn tick(&mut self, now: Cycle) -> Result<Vec<Fill>> {
        let mut done = Vec::new();
        self.server.service_ready(now, |result| done.push(result));

        while let Some(request) = self.deferred.pop_front() {
            if let Err(bp) = self.server.try_enqueue(now, request) {
                self.deferred.push_front(bp.into_request());
                break;
            }
        }

        let mut fills = Vec::with_capacity(done.len());
        for result in done {
            let pending = result.payload;
            if pending.cmd != MemCmd::Read {
                continue;
            }
            let data = self.read_block(pending.block_addr, pending.size)?;
            self.stats.fills_returned += 1;
            self.stats.bytes_returned += data.len() as u64;
            fills.push(Fill {
                entry: pending.entry,
                block_addr: pending.block_addr,
                data,
                issued_at: result.ticket.issued_at(),
                ready_at: result.ticket.ready_at(),
            });
        }
        Ok(fills)
    }

    pub fn read_block(&self, block_addr: u64, size: u32) -> Result<Vec<u8>> {
        let addr = usize::try_from(block_addr)
            .with_context(|| format!("block {:#x} outside host address range", block_addr))?;
        Ok(self.backing.read(addr, size as usize)?.to_vec())
    }
}
