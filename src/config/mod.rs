//! Layered configuration: TOML on disk with compiled-in defaults for every
//! field, following the same `Config::load` / `Config::create_default` shape
//! used throughout this codebase.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::stage::Stage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub stages: StagesConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_supported_rooms")]
    pub supported_rooms: Vec<String>,
    #[serde(default = "default_room")]
    pub default_room: String,
    #[serde(default = "default_ball_pool_size")]
    pub ball_pool_size: u8,
    #[serde(default = "default_lucky_ball_count")]
    pub lucky_ball_count: u8,
    #[serde(default = "default_extra_ball_max")]
    pub extra_ball_max: u8,
}

fn default_supported_rooms() -> Vec<String> {
    vec!["SG01".to_string(), "SG02".to_string()]
}
fn default_room() -> String {
    "SG01".to_string()
}
fn default_ball_pool_size() -> u8 {
    75
}
fn default_lucky_ball_count() -> u8 {
    7
}
fn default_extra_ball_max() -> u8 {
    3
}

/// Optional per-stage duration overrides, layered over the compiled-in
/// stage-table defaults. Stage names use the same `snake_case` form as the
/// rest of the on-disk representation.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StagesConfig {
    /// Stage name (`snake_case`, e.g. `card_purchase_open`) to override
    /// duration in seconds.
    #[serde(default)]
    pub overrides: HashMap<String, u64>,
}

impl StagesConfig {
    /// Materialize the override map as `Stage -> Duration`, ready for the
    /// manager to layer over [`Stage::timeout`]. Unknown stage names are
    /// logged and skipped rather than failing config load.
    pub fn to_duration_map(&self) -> HashMap<Stage, Duration> {
        self.overrides
            .iter()
            .filter_map(|(key, &secs)| match Stage::from_config_key(key) {
                Some(stage) => Some((stage, Duration::from_secs(secs))),
                None => {
                    warn!("config: ignoring stage duration override for unknown stage '{key}'");
                    None
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_cache_path")]
    pub cache_path: String,
    #[serde(default = "default_durable_path")]
    pub durable_path: String,
    #[serde(default = "default_sweep_interval_seconds")]
    pub cache_sweep_interval_seconds: u64,
}

fn default_cache_path() -> String {
    "./data/cache".to_string()
}
fn default_durable_path() -> String {
    "./data/durable".to_string()
}
fn default_sweep_interval_seconds() -> u64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub force_plain: bool,
}

impl Config {
    /// Load configuration from a file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("failed to read config file {}: {}", path, e))?;
        let config: Config =
            toml::from_str(&content).map_err(|e| anyhow!("failed to parse config file {}: {}", path, e))?;
        Ok(config)
    }

    /// Create a default configuration file at `path`.
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content =
            toml::to_string_pretty(&config).map_err(|e| anyhow!("failed to serialize default config: {}", e))?;
        fs::write(path, content).await.map_err(|e| anyhow!("failed to write config file {}: {}", path, e))?;
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            orchestrator: OrchestratorConfig {
                supported_rooms: default_supported_rooms(),
                default_room: default_room(),
                ball_pool_size: default_ball_pool_size(),
                lucky_ball_count: default_lucky_ball_count(),
                extra_ball_max: default_extra_ball_max(),
            },
            stages: StagesConfig::default(),
            storage: StorageConfig {
                cache_path: default_cache_path(),
                durable_path: default_durable_path(),
                cache_sweep_interval_seconds: default_sweep_interval_seconds(),
            },
            logging: LoggingConfig { level: "info".to_string(), force_plain: false },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_knobs() {
        let config = Config::default();
        assert_eq!(config.orchestrator.supported_rooms, vec!["SG01", "SG02"]);
        assert_eq!(config.orchestrator.default_room, "SG01");
        assert_eq!(config.orchestrator.ball_pool_size, 75);
        assert_eq!(config.orchestrator.lucky_ball_count, 7);
        assert_eq!(config.orchestrator.extra_ball_max, 3);
    }

    #[test]
    fn stage_overrides_convert_to_durations() {
        let mut stages = StagesConfig::default();
        stages.overrides.insert("card_purchase_open".to_string(), 120);
        stages.overrides.insert("not_a_real_stage".to_string(), 5);
        let durations = stages.to_duration_map();
        assert_eq!(durations.get(&Stage::CardPurchaseOpen), Some(&Duration::from_secs(120)));
        assert_eq!(durations.len(), 1);
    }

    #[tokio::test]
    async fn create_default_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drawhall.toml");
        let path_str = path.to_str().unwrap();

        Config::create_default(path_str).await.unwrap();
        let loaded = Config::load(path_str).await.unwrap();
        assert_eq!(loaded.orchestrator.default_room, "SG01");
    }
}
