use serde::Deserialize;

use crate::sim::config::Config;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficConfig {
    pub base_addr: u64,
    pub within_bytes: u64,
    pub reqs_per_pattern: u32,
    pub patterns: Vec<TrafficPatternSpec>,
}

impl Config for TrafficConfig {}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            base_addr: 0x1_0000,
            within_bytes: 64 << 10,
            reqs_per_pattern: 4096,
            patterns: vec![TrafficPatternSpec::default()],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TrafficPatternSpec {
    pub name: String,
    pub kind: String,
    pub req_bytes: u32,
    pub stride: u32,
    pub random_min: u32,
    pub random_max: u32,
    pub seed: u64,
    pub within_bytes: Option<u64>,
    pub prefetch_distance: u32,
}

impl Default for TrafficPatternSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: "strided".to_string(),
            req_bytes: 4,
            stride: 1,
            random_min: 0,
            random_max: 0,
            seed: 0,
            within_bytes: None,
            prefetch_distance: 0,
        }
    }
}
