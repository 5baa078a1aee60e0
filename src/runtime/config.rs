use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Resolved simulation parameters. Time is counted in clock ticks; one tick
/// is one beat of the advertisement timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimConfig {
    pub route_timeout_ticks: u64,
    pub garbage_hold_ticks: u64,
    pub update_interval_ticks: u64,
    pub trigger_debounce_ticks: u64,
    pub max_ticks: u64,
    pub stability_halt_ticks: u64,
    pub tick_interval: Duration,
    pub unreachable_metric: u32,
    pub poisoned_reverse: bool,
    pub logs_dir: PathBuf,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            route_timeout_ticks: 6,
            garbage_hold_ticks: 6,
            update_interval_ticks: 1,
            trigger_debounce_ticks: 0,
            max_ticks: 12,
            stability_halt_ticks: 3,
            tick_interval: Duration::ZERO,
            unreachable_metric: 145,
            poisoned_reverse: false,
            logs_dir: PathBuf::from("router_logs"),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawTimers {
    route_timeout_ticks: Option<u64>,
    garbage_hold_ticks: Option<u64>,
    update_interval_ticks: Option<u64>,
    trigger_debounce_ticks: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawRun {
    max_ticks: Option<u64>,
    stability_halt_ticks: Option<u64>,
    tick_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct RawProtocol {
    unreachable_metric: Option<u32>,
    poisoned_reverse: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct RawSimConfig {
    timers: Option<RawTimers>,
    run: Option<RawRun>,
    protocol: Option<RawProtocol>,
    logs_dir: Option<PathBuf>,
}

pub fn load_sim_config(path: &Path) -> Result<SimConfig> {
    let raw_text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_sim_config(&raw_text)
}

pub fn parse_sim_config(text: &str) -> Result<SimConfig> {
    let raw_cfg: RawSimConfig =
        serde_yaml::from_str(text).context("failed to parse simulation config yaml")?;

    let defaults = SimConfig::default();
    let timers = raw_cfg.timers.unwrap_or_default();
    let run = raw_cfg.run.unwrap_or_default();
    let protocol = raw_cfg.protocol.unwrap_or_default();

    Ok(SimConfig {
        route_timeout_ticks: timers
            .route_timeout_ticks
            .unwrap_or(defaults.route_timeout_ticks)
            .max(1),
        garbage_hold_ticks: timers
            .garbage_hold_ticks
            .unwrap_or(defaults.garbage_hold_ticks),
        update_interval_ticks: timers
            .update_interval_ticks
            .unwrap_or(defaults.update_interval_ticks)
            .max(1),
        trigger_debounce_ticks: timers
            .trigger_debounce_ticks
            .unwrap_or(defaults.trigger_debounce_ticks),
        max_ticks: run.max_ticks.unwrap_or(defaults.max_ticks).max(1),
        stability_halt_ticks: run
            .stability_halt_ticks
            .unwrap_or(defaults.stability_halt_ticks),
        tick_interval: Duration::from_millis(run.tick_interval_ms.unwrap_or(0)),
        unreachable_metric: protocol
            .unreachable_metric
            .unwrap_or(defaults.unreachable_metric),
        poisoned_reverse: protocol
            .poisoned_reverse
            .unwrap_or(defaults.poisoned_reverse),
        logs_dir: raw_cfg.logs_dir.unwrap_or(defaults.logs_dir),
    })
}
