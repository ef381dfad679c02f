use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Arc;

/// Closed set of upstream adapter variants. Unknown values fail config
/// parsing rather than falling through to a runtime "unsupported type"
/// branch — the adapter registry is built once, at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    GoogleGemini,
    Mistral,
    Deepseek,
}

/// Immutable-after-load description of one upstream provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ProviderType,
    pub endpoint: String,
    pub model: String,

    #[serde(default)]
    pub api_key: String,

    pub cost_per_1k_tokens: f64,

    #[serde(default)]
    pub prompt_cost_per_1k_tokens: Option<f64>,

    #[serde(default)]
    pub completion_cost_per_1k_tokens: Option<f64>,

    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default)]
    pub max_retries: Option<u32>,
}

impl Provider {
    pub fn timeout_secs(&self) -> u64 {
        self.timeout.unwrap_or(30)
    }

    pub fn prompt_rate(&self) -> f64 {
        self.prompt_cost_per_1k_tokens.unwrap_or(self.cost_per_1k_tokens)
    }

    pub fn completion_rate(&self) -> f64 {
        self.completion_cost_per_1k_tokens
            .unwrap_or(self.cost_per_1k_tokens)
    }
}

/// The `providers.yaml` document, deserialized verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigFile {
    pub providers: Vec<Provider>,

    /// Path to the append-only usage log. Defaults to `logs/usage.log`,
    /// matching the CostTracker this crate's ledger replaces.
    #[serde(default = "default_log_path")]
    pub usage_log_path: String,
}

fn default_log_path() -> String {
    "logs/usage.log".to_string()
}

#[derive(Debug)]
struct ConfigInner {
    file: ConfigFile,
    http_client: reqwest::Client,
}

/// Runtime configuration shared across handlers via Axum state. Cheap to
/// clone: wraps an `Arc` around the parsed file and the process-wide
/// `reqwest::Client` connection pool.
#[derive(Debug, Clone)]
pub struct Config {
    inner: Arc<ConfigInner>,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path))?;
        let file: ConfigFile =
            serde_yaml::from_str(&content).context("failed to parse providers.yaml")?;

        validate(&file)?;

        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(8)
            .tcp_nodelay(true)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Config {
            inner: Arc::new(ConfigInner { file, http_client }),
        })
    }

    pub fn providers(&self) -> &[Provider] {
        &self.inner.file.providers
    }

    pub fn usage_log_path(&self) -> &str {
        &self.inner.file.usage_log_path
    }

    pub fn http_client(&self) -> reqwest::Client {
        self.inner.http_client.clone()
    }
}

/// Load-time validation beyond what serde already enforces (required
/// fields, recognized `type`). Rejects an empty provider list and duplicate
/// provider names, neither of which serde's field-level checks catch.
fn validate(file: &ConfigFile) -> Result<()> {
    if file.providers.is_empty() {
        anyhow::bail!("config file must contain a non-empty 'providers' list");
    }

    let mut seen = std::collections::HashSet::new();
    for provider in &file.providers {
        if !seen.insert(provider.name.as_str()) {
            anyhow::bail!("duplicate provider name: {}", provider.name);
        }
        if provider.cost_per_1k_tokens < 0.0 {
            anyhow::bail!(
                "provider {} has a negative cost_per_1k_tokens",
                provider.name
            );
        }
    }

    Ok(())
}
