use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};
use log::{warn, LevelFilter};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use toml::Value;

use crate::timeq::{Cycle, ServerConfig};

/// How fills reach `MshrPool::complete_request`.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CompletionMode {
    /// The backing memory hands back each fill once its ticket is ready.
    #[default]
    Push,
    /// Every cycle the pool is polled for entries whose latency estimate has elapsed.
    Poll,
}

impl FromStr for CompletionMode {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "push" => Ok(Self::Push),
            "poll" => Ok(Self::Poll),
            _ => Err(format!(
                "unsupported completion mode '{}', expected one of: push, poll",
                value
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SimConfig {
    pub log_level: u64,
    pub timeout: Cycle,
    pub completion_mode: CompletionMode,
    pub issue_width: usize,
    pub load_queue_size: usize,
    pub squash_rate: f64,
    pub seed: u64,
    pub dump_on_exit: bool,
    pub stats_json: Option<PathBuf>,
}

pub trait Config: DeserializeOwned + Default {
    fn from_section(section: Option<&Value>) -> Result<Self> {
        match section {
            Some(value) => value
                .clone()
                .try_into()
                .context("cannot deserialize config section"),
            None => {
                warn!("config section not found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

impl Config for SimConfig {}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            log_level: 0,
            timeout: 1_000_000,
            completion_mode: CompletionMode::Push,
            issue_width: 1,
            load_queue_size: 32,
            squash_rate: 0.0,
            seed: 0,
            dump_on_exit: false,
            stats_json: None,
        }
    }
}

impl SimConfig {
    pub fn level_filter(&self) -> LevelFilter {
        match self.log_level {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct MemConfig {
    pub size_bytes: usize,
    pub base_latency: Cycle,
    pub bytes_per_cycle: u32,
    pub queue_capacity: usize,
}

impl Config for MemConfig {}

impl Default for MemConfig {
    fn default() -> Self {
        Self {
            size_bytes: 1 << 20,
            base_latency: 100,
            bytes_per_cycle: 16,
            queue_capacity: 16,
        }
    }
}

impl MemConfig {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            base_latency: self.base_latency,
            bytes_per_cycle: self.bytes_per_cycle,
            queue_capacity: self.queue_capacity,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct CacheConfig {
    pub sets: usize,
    pub ways: usize,
}

impl Config for CacheConfig {}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { sets: 64, ways: 4 }
    }
}
