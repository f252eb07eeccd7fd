pub mod addr;
pub mod config;
pub mod entry;
pub mod notify;
pub mod pool;
pub mod slot;
pub mod stats;

pub use addr::BlockDecoder;
pub use config::{MergePolicy, MshrConfig};
pub use entry::{EntryId, EntryStatus, MshrEntry};
pub use notify::{CompletionSink, FillTarget, MemAccessFn, MemCmd};
pub use pool::{Completion, InsertKind, Inserted, MshrPool, MshrReject};
pub use slot::BlockSlot;
pub use stats::MshrStats;

#[cfg(test)]
mod unit_tests;
