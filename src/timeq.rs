//! Latency/bandwidth server for the memory behind the MSHR.
//!
//! Requests are served one after another. Each one occupies the server for
//! `base_latency + ceil(size_bytes / bytes_per_cycle)` cycles, starting no earlier than the cycle
//! the previous request finished. At most `queue_capacity` requests may be queued or in service;
//! beyond that the request is handed back as [`Backpressure`] so the caller can hold it and retry.

use std::collections::VecDeque;

pub type Cycle = u64;

/// When an accepted request entered the server and when its payload comes back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    issued_at: Cycle,
    ready_at: Cycle,
}

impl Ticket {
    pub fn issued_at(&self) -> Cycle {
        self.issued_at
    }

    pub fn ready_at(&self) -> Cycle {
        self.ready_at
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        now >= self.ready_at
    }

    /// Zero once the ticket is ready.
    pub fn remaining_cycles(&self, now: Cycle) -> Cycle {
        self.ready_at.saturating_sub(now)
    }
}

#[derive(Debug)]
pub struct ServiceRequest<T> {
    pub payload: T,
    pub size_bytes: u32,
}

impl<T> ServiceRequest<T> {
    pub fn new(payload: T, size_bytes: u32) -> Self {
        Self { payload, size_bytes }
    }
}

#[derive(Debug)]
pub struct ServiceResult<T> {
    pub payload: T,
    pub ticket: Ticket,
}

/// The server queue was full. Carries the request back to the caller.
#[derive(Debug)]
pub struct Backpressure<T> {
    request: ServiceRequest<T>,
    capacity: usize,
}

impl<T> Backpressure<T> {
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn into_request(self) -> ServiceRequest<T> {
        self.request
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    pub base_latency: Cycle,
    pub bytes_per_cycle: u32,
    pub queue_capacity: usize,
}

#[derive(Debug)]
pub struct TimedServer<T> {
    config: ServerConfig,
    queue: VecDeque<ServiceResult<T>>,
    // cycle at which the last accepted request finishes
    free_at: Cycle,
}

impl<T> TimedServer<T> {
    /// `bytes_per_cycle` and `queue_capacity` must be nonzero; callers validate config first.
    pub fn new(config: ServerConfig) -> Self {
        debug_assert!(config.bytes_per_cycle > 0 && config.queue_capacity > 0);
        Self {
            config,
            queue: VecDeque::with_capacity(config.queue_capacity),
            free_at: 0,
        }
    }

    pub fn try_enqueue(
        &mut self,
        now: Cycle,
        request: ServiceRequest<T>,
    ) -> Result<Ticket, Backpressure<T>> {
        if self.queue.len() >= self.config.queue_capacity {
            return Err(Backpressure {
                request,
                capacity: self.config.queue_capacity,
            });
        }
        let start = self.free_at.max(now);
        let ticket = Ticket {
            issued_at: now,
            ready_at: start.saturating_add(self.service_cycles(request.size_bytes)),
        };
        self.free_at = ticket.ready_at;
        self.queue.push_back(ServiceResult {
            payload: request.payload,
            ticket,
        });
        Ok(ticket)
    }

    /// Hands every request finished by `now` to `sink`, oldest first.
    pub fn service_ready<F>(&mut self, now: Cycle, mut sink: F)
    where
        F: FnMut(ServiceResult<T>),
    {
        while self.queue.front().map_or(false, |r| r.ticket.is_ready(now)) {
            if let Some(result) = self.queue.pop_front() {
                sink(result);
            }
        }
    }

    /// Earliest cycle a newly accepted request could start service.
    pub fn available_at(&self) -> Cycle {
        self.free_at
    }

    pub fn inflight_len(&self) -> usize {
        self.queue.len()
    }

    /// Service time of one request, not counting time spent waiting behind others.
    pub fn service_cycles(&self, size_bytes: u32) -> Cycle {
        let per_cycle = self.config.bytes_per_cycle.max(1) as u64;
        let transfer = (size_bytes as u64 + per_cycle - 1) / per_cycle;
        self.config.base_latency.saturating_add(transfer)
    }
}
