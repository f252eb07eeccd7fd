use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use toml::Table;

use crate::mshr::{MergePolicy, MshrConfig};
use crate::sim::config::{CacheConfig, CompletionMode, Config, MemConfig, SimConfig};
use crate::sim::top::MshrSim;
use crate::traffic::TrafficConfig;

#[derive(Parser, Debug, Default)]
#[command(version, about)]
pub struct MshrSimArgs {
    #[arg(help = "Path to config.toml; built-in defaults when omitted")]
    pub config_path: Option<PathBuf>,
    #[arg(long, help = "Enable log at level (0:warn, 1:info, 2:debug, 3:trace)")]
    pub log: Option<u64>,
    #[arg(long, help = "Override number of MSHR entries")]
    pub num_entries: Option<usize>,
    #[arg(long, help = "Override sub-requests per MSHR entry")]
    pub blocks_per_entry: Option<usize>,
    #[arg(long, help = "Override cache block size in bytes")]
    pub block_size: Option<u32>,
    #[arg(long, help = "Check capacity before matching (conservative merge order)")]
    pub full_blocks_merge: bool,
    #[arg(long, help = "Completion delivery: push or poll")]
    pub completion_mode: Option<CompletionMode>,
    #[arg(long, help = "Dump MSHR state when the run ends")]
    pub dump: bool,
    #[arg(long, help = "Write the run summary as JSON to this path")]
    pub stats_json: Option<PathBuf>,
}

/// All config sections of one run.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub sim: SimConfig,
    pub mshr: MshrConfig,
    pub cache: CacheConfig,
    pub mem: MemConfig,
    pub traffic: TrafficConfig,
}

impl RunConfig {
    pub fn from_toml(toml_string: &str) -> Result<Self> {
        let table: Table = toml::from_str(toml_string).context("cannot parse config toml")?;
        Ok(Self {
            sim: SimConfig::from_section(table.get("sim")).context("in [sim]")?,
            mshr: MshrConfig::from_section(table.get("mshr")).context("in [mshr]")?,
            cache: CacheConfig::from_section(table.get("cache")).context("in [cache]")?,
            mem: MemConfig::from_section(table.get("mem")).context("in [mem]")?,
            traffic: TrafficConfig::from_section(table.get("traffic")).context("in [traffic]")?,
        })
    }

    /// Override TOML options with CLI arguments.
    pub fn apply_args(&mut self, args: &MshrSimArgs) {
        self.sim.log_level = args.log.unwrap_or(self.sim.log_level);
        self.sim.completion_mode = args.completion_mode.unwrap_or(self.sim.completion_mode);
        self.sim.dump_on_exit |= args.dump;
        if args.stats_json.is_some() {
            self.sim.stats_json = args.stats_json.clone();
        }
        self.mshr.num_entries = args.num_entries.unwrap_or(self.mshr.num_entries);
        self.mshr.blocks_per_entry = args.blocks_per_entry.unwrap_or(self.mshr.blocks_per_entry);
        self.mshr.block_size = args.block_size.unwrap_or(self.mshr.block_size);
        if args.full_blocks_merge {
            self.mshr.merge_policy = MergePolicy::FullBlocksMerge;
        }
    }

    pub fn build(self) -> Result<MshrSim> {
        MshrSim::new(self.sim, self.mshr, self.cache, self.mem, self.traffic)
    }
}

/// Make an MshrSim from the TOML configuration.
/// If `cli_args` is given, override TOML options with CLI arguments.
pub fn make_sim(toml_string: &str, cli_args: Option<&MshrSimArgs>) -> Result<MshrSim> {
    let mut config = RunConfig::from_toml(toml_string)?;
    if let Some(args) = cli_args {
        config.apply_args(args);
    }
    config.build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn args_override_toml() {
        let mut config = RunConfig::from_toml(
            r#"
            [sim]
            log_level = 1
            [mshr]
            num_entries = 2
            "#,
        )
        .unwrap();
        let args = MshrSimArgs {
            num_entries: Some(6),
            full_blocks_merge: true,
            completion_mode: Some(CompletionMode::Poll),
            ..Default::default()
        };
        config.apply_args(&args);
        assert_eq!(config.sim.log_level, 1);
        assert_eq!(config.sim.completion_mode, CompletionMode::Poll);
        assert_eq!(config.mshr.num_entries, 6);
        assert_eq!(config.mshr.merge_policy, MergePolicy::FullBlocksMerge);
    }

    #[test]
    fn bad_section_is_reported() {
        let err = RunConfig::from_toml("[mshr]\nnum_entries = \"many\"\n").unwrap_err();
        assert!(format!("{:#}", err).contains("[mshr]"));
    }

    #[test]
    fn invalid_geometry_fails_to_build() {
        assert!(make_sim("[mshr]\nblock_size = 48\n", None).is_err());
    }

    #[test]
    fn cli_parses_flags() {
        let args = MshrSimArgs::parse_from([
            "mshrsim",
            "run.toml",
            "--num-entries",
            "4",
            "--completion-mode",
            "poll",
            "--dump",
        ]);
        assert_eq!(args.config_path, Some(PathBuf::from("run.toml")));
        assert_eq!(args.num_entries, Some(4));
        assert_eq!(args.completion_mode, Some(CompletionMode::Poll));
        assert!(args.dump);
    }
}
