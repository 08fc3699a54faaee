use std::{env, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use serde::Deserialize;
use tokio::fs;
use tracing::info;

use crate::backends::PdfOptions;
use crate::pipeline::enrichment::DEFAULT_MAX_CONCURRENCY;

pub const DEFAULT_CONFIG_PATH: &str = "config/app.yaml";

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub worker: WorkerSettings,
    #[serde(default)]
    pub enrichment: EnrichmentSettings,
    #[serde(default)]
    pub store: StoreSettings,
    #[serde(default)]
    pub pdf: PdfOptions,
    #[serde(default)]
    pub llm: Option<LlmSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            working_dir: default_working_dir(),
            workspace: None,
            worker: WorkerSettings::default(),
            enrichment: EnrichmentSettings::default(),
            store: StoreSettings::default(),
            pdf: PdfOptions::default(),
            llm: None,
        }
    }
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub poll_timeout_ms: u64,
    pub idle_sleep_ms: u64,
    pub conversion_timeout_secs: u64,
    pub intake: bool,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 1000,
            idle_sleep_ms: 1000,
            conversion_timeout_secs: 3600,
            intake: true,
        }
    }
}

impl WorkerSettings {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn conversion_timeout(&self) -> Duration {
        Duration::from_secs(self.conversion_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnrichmentSettings {
    pub max_concurrency: usize,
    pub enhance_timeout_secs: u64,
}

impl Default for EnrichmentSettings {
    fn default() -> Self {
        Self {
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            enhance_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub namespace: String,
    pub status_ttl_secs: u64,
    pub result_ttl_secs: u64,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            namespace: "tasks".to_string(),
            status_ttl_secs: 3600,
            result_ttl_secs: 86400,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmSettings {
    #[serde(default)]
    pub base_url: Option<String>,
    pub model: String,
    #[serde(default)]
    pub vision_model: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_api_key_env() -> String {
    "LLM_API_KEY".to_string()
}

fn default_max_attempts() -> u32 {
    crate::ai::client::DEFAULT_MAX_ATTEMPTS
}

impl LlmSettings {
    pub fn api_key(&self) -> Option<String> {
        env::var(&self.api_key_env)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }
}

impl AppConfig {
    /// `WORKSPACE` from the environment wins over the file.
    pub fn resolved_workspace(&self) -> Option<String> {
        env::var("WORKSPACE")
            .ok()
            .or_else(|| self.workspace.clone())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    pub fn workspace_dir(&self) -> PathBuf {
        match self.resolved_workspace() {
            Some(ws) => self.working_dir.join(ws),
            None => self.working_dir.clone(),
        }
    }
}

pub async fn load_config() -> Result<AppConfig> {
    let path = config_path();
    let contents = fs::read_to_string(&path)
        .await
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: AppConfig = serde_yaml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    info!(path = %path.display(), "Configuration loaded from disk");
    Ok(config)
}

pub fn config_path() -> PathBuf {
    env::var("APP_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}
