//! Agent configuration
//!
//! Handles:
//! - HQ address and connection timeouts
//! - Source identity (defaults to the hostname)
//! - Collection / retry pacing
//! - Monitored services and disk mount points
//!
//! Stored as TOML in the OS config directory, or wherever
//! `SENTINEL_AGENT_CONFIG` points.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "SENTINEL_AGENT_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub hq: HqConfig,
    pub agent: AgentInfo,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HqConfig {
    /// gRPC address of HQ; `http://` is assumed when no scheme is given
    pub address: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentInfo {
    /// Source identity reported to HQ. Empty = hostname.
    pub server_id: String,
    pub collection_interval_secs: u64,
    pub retry_delay_secs: u64,
    pub close_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Process-name substrings reported as services (case-insensitive)
    pub services: Vec<String>,
    pub disk_paths: Vec<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            hq: HqConfig::default(),
            agent: AgentInfo::default(),
            monitoring: MonitoringConfig::default(),
        }
    }
}

impl Default for HqConfig {
    fn default() -> Self {
        Self {
            address: "http://localhost:9090".to_string(),
            connect_timeout_secs: 5,
        }
    }
}

impl Default for AgentInfo {
    fn default() -> Self {
        Self {
            server_id: String::new(),
            collection_interval_secs: 10,
            retry_delay_secs: 5,
            close_timeout_secs: 5,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            services: Vec::new(),
            disk_paths: vec![default_disk_path().to_string()],
        }
    }
}

fn default_disk_path() -> &'static str {
    if cfg!(windows) {
        "C:\\"
    } else {
        "/"
    }
}

impl AgentConfig {
    /// Load config from `SENTINEL_AGENT_CONFIG` or the OS-specific location.
    /// A missing file yields the defaults.
    pub async fn load() -> Result<Self> {
        let path = Self::config_file_path()?;
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config: AgentConfig = toml::from_str(&content)
            .with_context(|| format!("Invalid agent config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to `path`, creating parent directories
    pub async fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let content = toml::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        Ok(())
    }

    /// Get config file path (env override first)
    pub fn config_file_path() -> Result<PathBuf> {
        if let Ok(custom) = std::env::var(CONFIG_ENV) {
            if !custom.trim().is_empty() {
                return Ok(PathBuf::from(custom));
            }
        }

        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;

        path.push("sentinel-agent");
        path.push("config.toml");
        Ok(path)
    }

    /// Check if this is first-time setup
    pub fn is_first_time_setup() -> bool {
        Self::config_file_path()
            .map(|p| !p.exists())
            .unwrap_or(true)
    }

    pub fn validate(&self) -> Result<()> {
        if self.hq.address.trim().is_empty() {
            bail!("hq.address must not be empty");
        }
        if self.agent.collection_interval_secs == 0 {
            bail!("agent.collection_interval_secs must be greater than zero");
        }
        Ok(())
    }

    /// HQ address with a scheme, as tonic expects it
    pub fn hq_endpoint(&self) -> String {
        let address = self.hq.address.trim();
        if address.contains("://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        }
    }

    /// Configured identity, or the hostname when left empty
    pub fn source_id(&self) -> String {
        let configured = self.agent.server_id.trim();
        if configured.is_empty() {
            gethostname::gethostname().to_string_lossy().to_string()
        } else {
            configured.to_string()
        }
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.agent.collection_interval_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.agent.retry_delay_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.close_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.hq.connect_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AgentConfig::default();
        assert_eq!(config.agent.collection_interval_secs, 10);
        assert_eq!(config.retry_delay(), Duration::from_secs(5));
        assert_eq!(config.monitoring.disk_paths.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint_scheme_added() {
        let mut config = AgentConfig::default();
        config.hq.address = "hq.lan:9090".into();
        assert_eq!(config.hq_endpoint(), "http://hq.lan:9090");

        config.hq.address = "https://hq.example.com".into();
        assert_eq!(config.hq_endpoint(), "https://hq.example.com");
    }

    #[test]
    fn test_source_id_falls_back_to_hostname() {
        let mut config = AgentConfig::default();
        assert!(!config.source_id().is_empty());

        config.agent.server_id = "  db-02 ".into();
        assert_eq!(config.source_id(), "db-02");
    }

    #[tokio::test]
    async fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(
            &path,
            "[agent]\nserver_id = \"web-01\"\n\n[monitoring]\nservices = [\"postgres\", \"nginx\"]\n",
        )
        .await
        .unwrap();

        let config = AgentConfig::load_from(&path).await.unwrap();
        assert_eq!(config.agent.server_id, "web-01");
        assert_eq!(config.monitoring.services, vec!["postgres", "nginx"]);
        assert_eq!(config.agent.collection_interval_secs, 10);
        assert_eq!(config.hq.address, "http://localhost:9090");
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[agent]\ncollection_interval_secs = 0\n")
            .await
            .unwrap();

        assert!(AgentConfig::load_from(&path).await.is_err());
    }

    #[tokio::test]
    async fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AgentConfig::load_from(&dir.path().join("absent.toml"))
            .await
            .unwrap();
        assert_eq!(config, AgentConfig::default());
    }

    #[tokio::test]
    async fn test_saved_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = AgentConfig::default();
        config.monitoring.services = vec!["redis".into()];

        config.save_to(&path).await.unwrap();
        assert_eq!(AgentConfig::load_from(&path).await.unwrap(), config);
    }
}
