use std::fs;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use mshrsim::sim::perf_log::write_summary;
use mshrsim::ui::{MshrSimArgs, RunConfig};

pub fn main() -> Result<()> {
    let argv = MshrSimArgs::parse();
    let toml_string = match &argv.config_path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?,
        None => String::new(),
    };

    let mut config = RunConfig::from_toml(&toml_string)?;
    config.apply_args(&argv);

    env_logger::Builder::new()
        .filter_level(config.sim.level_filter())
        .parse_default_env()
        .init();

    let stats_json = config.sim.stats_json.clone();
    let mut sim = config.build()?;
    let summary = sim.simulate()?;

    match stats_json {
        Some(path) => {
            write_summary(&path, &summary)?;
            info!("wrote run summary to {}", path.display());
        }
        None => println!("{}", summary.to_json()?),
    }
    Ok(())
}
