pub mod cache;
pub mod config;
pub mod flat_mem;
pub mod load_queue;
pub mod memory;
pub mod perf_log;
pub mod top;
