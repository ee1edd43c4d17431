//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

/// Environment variables consulted for the LLM API key, in order
pub const API_KEY_ENV_VARS: &[&str] = &["PATENTGRAPH_API_KEY", "LLM_API_KEY"];

/// Patentgraph configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub enrich: EnrichConfig,
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    pub system_prompt: String,
}

/// What happens to items whose chunk produced no usable output in a cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Mark every fetched item processed, whatever the outcome (fail forward)
    #[default]
    MarkProcessed,
    /// Leave fully failed items out of the ledger so the next run retries them
    RetryNextRun,
}

impl FailurePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarkProcessed => "mark_processed",
            Self::RetryNextRun => "retry_next_run",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mark_processed" => Some(Self::MarkProcessed),
            "retry_next_run" => Some(Self::RetryNextRun),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub output_dir: PathBuf,
    pub batch_size: usize,
    pub max_concurrent_requests: usize,
    pub max_retries: u32,
    pub retry_delay_secs: u64,
    pub entity_batch_size: usize,
    pub patent_pause_ms: u64,
    pub entity_pause_ms: u64,
    pub enable_green_classification: bool,
    pub enable_tech_classification: bool,
    pub enable_location_extraction: bool,
    pub failure_policy: FailurePolicy,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub records_path: Option<PathBuf>,
    pub taxonomy_path: Option<PathBuf>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://ai.gitee.com/v1".to_string(),
            model: "Qwen2.5-72B-Instruct".to_string(),
            temperature: 0.1,
            max_tokens: 2000,
            timeout_secs: 120,
            system_prompt: "你是专利分析专家。仔细分析输入,返回准确的JSON格式结果。".to_string(),
        }
    }
}

impl Default for EnrichConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./llm_output"),
            batch_size: 10,
            max_concurrent_requests: 5,
            max_retries: 3,
            retry_delay_secs: 3,
            entity_batch_size: 10,
            patent_pause_ms: 100,
            entity_pause_ms: 500,
            enable_green_classification: true,
            enable_tech_classification: true,
            enable_location_extraction: true,
            failure_policy: FailurePolicy::MarkProcessed,
        }
    }
}

impl LlmConfig {
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        self.enforce_env_only()?;

        Ok(API_KEY_ENV_VARS
            .iter()
            .find_map(|var| env::var(var).ok().filter(|v| !v.is_empty())))
    }

    pub fn redacted_api_key(&self) -> anyhow::Result<Option<String>> {
        self.resolved_api_key().map(|opt| {
            opt.map(|key| {
                if key.len() <= 4 {
                    "***".to_string()
                } else {
                    let suffix = &key[key.len() - 4..];
                    format!("***{}", suffix)
                }
            })
        })
    }

    pub fn enforce_env_only(&self) -> anyhow::Result<()> {
        if self.api_key.is_some() {
            return Err(anyhow!(
                "LLM API keys must be provided via environment variables, not stored in configuration"
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl EnrichConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("PATENTGRAPH_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("patentgraph")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or return defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        let path = Self::config_path()?;

        if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.validate()?;

        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let path = Self::config_path()?;
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        self.llm.enforce_env_only()?;

        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
        }
        if self.enrich.batch_size == 0 || self.enrich.entity_batch_size == 0 {
            return Err(anyhow!("Batch sizes must be at least 1"));
        }
        if self.enrich.max_concurrent_requests == 0 {
            return Err(anyhow!("max_concurrent_requests must be at least 1"));
        }
        if self.llm.timeout_secs == 0 {
            return Err(anyhow!("timeout_secs must be at least 1"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // LLM settings
            "llm.api_base" => Ok(self.llm.api_base.clone()),
            "llm.model" => Ok(self.llm.model.clone()),
            "llm.temperature" => Ok(self.llm.temperature.to_string()),
            "llm.max_tokens" => Ok(self.llm.max_tokens.to_string()),
            "llm.timeout_secs" => Ok(self.llm.timeout_secs.to_string()),

            // Enrichment settings
            "enrich.output_dir" => Ok(self.enrich.output_dir.display().to_string()),
            "enrich.batch_size" => Ok(self.enrich.batch_size.to_string()),
            "enrich.max_concurrent_requests" => {
                Ok(self.enrich.max_concurrent_requests.to_string())
            }
            "enrich.max_retries" => Ok(self.enrich.max_retries.to_string()),
            "enrich.retry_delay_secs" => Ok(self.enrich.retry_delay_secs.to_string()),
            "enrich.entity_batch_size" => Ok(self.enrich.entity_batch_size.to_string()),
            "enrich.patent_pause_ms" => Ok(self.enrich.patent_pause_ms.to_string()),
            "enrich.entity_pause_ms" => Ok(self.enrich.entity_pause_ms.to_string()),
            "enrich.enable_green_classification" => {
                Ok(self.enrich.enable_green_classification.to_string())
            }
            "enrich.enable_tech_classification" => {
                Ok(self.enrich.enable_tech_classification.to_string())
            }
            "enrich.enable_location_extraction" => {
                Ok(self.enrich.enable_location_extraction.to_string())
            }
            "enrich.failure_policy" => Ok(self.enrich.failure_policy.as_str().to_string()),

            // Data settings
            "data.records_path" => Ok(display_opt_path(&self.data.records_path)),
            "data.taxonomy_path" => Ok(display_opt_path(&self.data.taxonomy_path)),

            // API key (special handling - show redacted)
            "llm.api_key" | "api_key" => match self.llm.redacted_api_key()? {
                Some(redacted) => Ok(redacted),
                None => Ok("(not set - use PATENTGRAPH_API_KEY or LLM_API_KEY env var)".to_string()),
            },

            _ => Err(anyhow!(
                "Unknown configuration key: {}. Use `patentgraph config list` to see available keys.",
                key
            )),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            "llm.api_base" => {
                self.llm.api_base = value.trim_end_matches('/').to_string();
            }
            "llm.model" => {
                self.llm.model = value.to_string();
            }
            "llm.temperature" => {
                let temp: f32 = value
                    .parse()
                    .with_context(|| format!("Invalid temperature value: {}", value))?;
                if !(0.0..=2.0).contains(&temp) {
                    return Err(anyhow!("Temperature must be between 0.0 and 2.0"));
                }
                self.llm.temperature = temp;
            }
            "llm.max_tokens" => {
                self.llm.max_tokens = value
                    .parse()
                    .with_context(|| format!("Invalid max_tokens value: {}", value))?;
            }
            "llm.timeout_secs" => {
                self.llm.timeout_secs = parse_positive(key, value)? as u64;
            }

            "enrich.output_dir" => {
                self.enrich.output_dir = PathBuf::from(value);
            }
            "enrich.batch_size" => {
                self.enrich.batch_size = parse_positive(key, value)?;
            }
            "enrich.max_concurrent_requests" => {
                self.enrich.max_concurrent_requests = parse_positive(key, value)?;
            }
            "enrich.max_retries" => {
                self.enrich.max_retries = value
                    .parse()
                    .with_context(|| format!("Invalid max_retries value: {}", value))?;
            }
            "enrich.retry_delay_secs" => {
                self.enrich.retry_delay_secs = value
                    .parse()
                    .with_context(|| format!("Invalid retry_delay_secs value: {}", value))?;
            }
            "enrich.entity_batch_size" => {
                self.enrich.entity_batch_size = parse_positive(key, value)?;
            }
            "enrich.patent_pause_ms" => {
                self.enrich.patent_pause_ms = value
                    .parse()
                    .with_context(|| format!("Invalid patent_pause_ms value: {}", value))?;
            }
            "enrich.entity_pause_ms" => {
                self.enrich.entity_pause_ms = value
                    .parse()
                    .with_context(|| format!("Invalid entity_pause_ms value: {}", value))?;
            }
            "enrich.enable_green_classification" => {
                self.enrich.enable_green_classification = parse_bool(value)?;
            }
            "enrich.enable_tech_classification" => {
                self.enrich.enable_tech_classification = parse_bool(value)?;
            }
            "enrich.enable_location_extraction" => {
                self.enrich.enable_location_extraction = parse_bool(value)?;
            }
            "enrich.failure_policy" => {
                self.enrich.failure_policy = FailurePolicy::parse(value).ok_or_else(|| {
                    anyhow!(
                        "Invalid failure policy: {}. Valid options: mark_processed, retry_next_run",
                        value
                    )
                })?;
            }

            "data.records_path" => {
                self.data.records_path = Some(PathBuf::from(value));
            }
            "data.taxonomy_path" => {
                self.data.taxonomy_path = Some(PathBuf::from(value));
            }

            // API key cannot be set via config
            "llm.api_key" | "api_key" => {
                return Err(anyhow!(
                    "API keys cannot be stored in configuration for security. \
                     Set the PATENTGRAPH_API_KEY or LLM_API_KEY environment variable instead."
                ));
            }

            _ => {
                return Err(anyhow!(
                    "Unknown configuration key: {}. Use `patentgraph config list` to see available keys.",
                    key
                ));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "llm.api_base",
            "llm.model",
            "llm.temperature",
            "llm.max_tokens",
            "llm.timeout_secs",
            "llm.api_key",
            "enrich.output_dir",
            "enrich.batch_size",
            "enrich.max_concurrent_requests",
            "enrich.max_retries",
            "enrich.retry_delay_secs",
            "enrich.entity_batch_size",
            "enrich.patent_pause_ms",
            "enrich.entity_pause_ms",
            "enrich.enable_green_classification",
            "enrich.enable_tech_classification",
            "enrich.enable_location_extraction",
            "enrich.failure_policy",
            "data.records_path",
            "data.taxonomy_path",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn display_opt_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "(not set)".to_string())
}

fn parse_positive(key: &str, value: &str) -> anyhow::Result<usize> {
    let n: usize = value
        .parse()
        .with_context(|| format!("Invalid {} value: {}", key, value))?;
    if n == 0 {
        return Err(anyhow!("{} must be at least 1", key));
    }
    Ok(n)
}

fn parse_bool(value: &str) -> anyhow::Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(anyhow!("Invalid boolean value: {}", value)),
    }
}
