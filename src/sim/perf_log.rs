use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::mshr::MshrStats;
use crate::sim::cache::CacheStats;
use crate::sim::load_queue::LoadStats;
use crate::sim::memory::MemStats;
use crate::sim::top::SimStats;
use crate::timeq::Cycle;

/// End-of-run counters for one simulation.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub cycles: Cycle,
    pub mean_load_latency: f64,
    pub loads: LoadStats,
    pub sim: SimStats,
    pub mshr: MshrStats,
    pub cache: CacheStats,
    pub memory: MemStats,
}

impl RunSummary {
    /// Fraction of MSHR accesses that merged into an outstanding miss.
    pub fn merge_rate(&self) -> f64 {
        if self.mshr.accesses() == 0 {
            0.0
        } else {
            self.mshr.hits() as f64 / self.mshr.accesses() as f64
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("failed to serialize run summary")
    }
}

pub fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("cannot create {}", parent.display()))?;
    }
    let file =
        File::create(path).with_context(|| format!("cannot create {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, summary)?;
    writeln!(writer)?;
    writer.flush()?;
    Ok(())
}
