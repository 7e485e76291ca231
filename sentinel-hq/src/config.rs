use crate::store::LivenessPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "SENTINEL_HQ_CONFIG";
pub const DATABASE_URL_ENV: &str = "DATABASE_URL";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct HqConfig {
    pub database_path: PathBuf,
    pub grpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub liveness_policy: LivenessPolicy,
}

impl Default for HqConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("sentinel.db"),
            grpc_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            liveness_policy: LivenessPolicy::default(),
        }
    }
}

impl HqConfig {
    /// `DATABASE_URL` wins over the file's `database_path`
    pub fn with_database_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            let path = url
                .trim()
                .trim_start_matches("sqlite://")
                .trim_start_matches("sqlite:")
                .to_string();
            self.database_path = PathBuf::from(path);
        }
        self
    }
}

pub async fn load_config() -> Result<HqConfig> {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "hq.yaml".into());
    let cfg = load_config_from(Path::new(&path)).await?;
    Ok(cfg.with_database_url(std::env::var(DATABASE_URL_ENV).ok()))
}

pub async fn load_config_from(path: &Path) -> Result<HqConfig> {
    if !path.exists() {
        warn!("pas de {}, usage config par défaut", path.display());
        return Ok(HqConfig::default());
    }

    let txt = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    if txt.trim().is_empty() {
        return Ok(HqConfig::default());
    }

    let cfg = serde_yaml::from_str(&txt)
        .with_context(|| format!("config invalide: {}", path.display()))?;
    info!("config chargée depuis {}", path.display());
    Ok(cfg)
}
