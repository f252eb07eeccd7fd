use serde::Deserialize;

use crate::sim::config::Config;

/// Order in which lookup checks pool capacity and address matches.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// Scan for a matching block first; a full pool only rejects new misses.
    #[default]
    MatchFirst,
    /// Reject everything, merges included, while every entry is valid.
    FullBlocksMerge,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct MshrConfig {
    pub block_size: u32,
    pub num_entries: usize,
    pub blocks_per_entry: usize,
    pub merge_policy: MergePolicy,
}

impl Config for MshrConfig {}

impl Default for MshrConfig {
    fn default() -> Self {
        Self {
            block_size: 64,
            num_entries: 8,
            blocks_per_entry: 4,
            merge_policy: MergePolicy::MatchFirst,
        }
    }
}
