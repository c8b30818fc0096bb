use anyhow::Result;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub general: General,
    pub rpc: Rpc,
    pub contract: Contract,
    pub scan: Scan,
    pub grading: Grading,
    pub publish: Publish,
    pub scheduler: Scheduler,
    pub observability: Observability,
    pub inspector: Inspector,
}

#[derive(Debug, Deserialize)]
pub struct General {
    pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Rpc {
    pub urls: Vec<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Contract {
    pub staking_address: String,
    pub token_address: String,
    pub stake_selector: String,
    pub unstake_selector: String,
    pub genesis_block: u64,
}

#[derive(Debug, Deserialize)]
pub struct Scan {
    pub chunk_blocks: u64,
    pub incremental_max_blocks: u64,
    pub tx_fetch_delay_ms: u64,
    pub chunk_delay_ms: u64,
}

#[derive(Debug, Deserialize)]
pub struct Grading {
    pub genesis_window_secs: u64,
    pub current_phase: u32,
    pub total_phases: u32,
}

#[derive(Debug, Deserialize)]
pub struct Publish {
    pub webhook_url: Option<String>,
    pub public_path: String,
    pub backup_dir: String,
    pub checkpoint_path: String,
    pub request_timeout_secs: u64,
    pub max_payload_mb: f64,
    pub chunk_size: usize,
    pub chunk_delay_ms: u64,
    pub safe_mode: bool,
    pub update_range: String,
    pub git_commit: bool,
}

#[derive(Debug, Deserialize)]
pub struct Scheduler {
    pub update_interval_secs: u64,
}

#[derive(Debug, Deserialize)]
pub struct Observability {
    pub prometheus_port: u16,
}

#[derive(Debug, Deserialize)]
pub struct Inspector {
    pub search_blocks: u64,
    pub extended_search_blocks: u64,
    pub chunk_blocks: u64,
}

impl Config {
    pub fn load() -> Result<Self> {
        let content = std::fs::read_to_string("config/default.toml")?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Deployment settings come from the environment (CI secrets); everything
    /// else stays in the TOML file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("WEBHOOK_URL") {
            if !url.trim().is_empty() {
                self.publish.webhook_url = Some(url.trim().to_string());
            }
        }
        if let Ok(flag) = std::env::var("SAFE_MODE") {
            self.publish.safe_mode = flag.trim().eq_ignore_ascii_case("true");
        }
        if let Ok(range) = std::env::var("UPDATE_RANGE") {
            if !range.trim().is_empty() {
                // Pass-through descriptor; the webhook interprets it.
                self.publish.update_range = range.trim().to_string();
            }
        }
        if let Ok(raw) = std::env::var("RPC_URLS") {
            let urls: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|u| !u.is_empty())
                .map(str::to_string)
                .collect();
            if !urls.is_empty() {
                self.rpc.urls = urls;
            }
        }
    }
}

impl FromStr for Config {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_default_config() {
        let config = Config::from_toml_str(include_str!("../../../config/default.toml")).unwrap();
        assert!(!config.rpc.urls.is_empty());
        assert_eq!(config.contract.stake_selector, "0xa694fc3a");
        assert_eq!(config.contract.genesis_block, 30_732_159);
        assert_eq!(config.scan.chunk_blocks, 1500);
        assert_eq!(config.scan.incremental_max_blocks, 10_000);
        assert!(config.scheduler.update_interval_secs > 0);
    }

    #[test]
    fn test_webhook_url_optional_and_safe_mode_defaults() {
        let config = Config::from_toml_str(include_str!("../../../config/default.toml")).unwrap();
        assert!(config.publish.webhook_url.is_none());
        assert!(!config.publish.safe_mode);
        assert_eq!(config.publish.update_range, "A:U");
    }
}
