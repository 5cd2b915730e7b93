//! dossierflow configuration types and loading
//!
//! The configuration is constructed once at startup and handed to every
//! component that needs it. Nothing here is process-global.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::resilient::RetryPolicy;

/// Main dossierflow configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level override (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Primary analysis model
    pub llm: LlmConfig,

    /// Research model (OpenAI-compatible online search model)
    pub research: LlmConfig,

    /// Fast model used only to repair malformed structured output
    pub repair: LlmConfig,

    /// Retry/backoff policy for external calls
    pub retry: RetryConfig,

    /// Fan-out limits
    pub dispatch: DispatchConfig,

    /// Cache sizes and lifetimes
    pub cache: CacheConfig,

    /// Whole-run settings
    pub pipeline: PipelineConfig,

    /// Prompt template locations
    pub prompts: PromptsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            llm: LlmConfig::default(),
            research: LlmConfig::research_default(),
            repair: LlmConfig::repair_default(),
            retry: RetryConfig::default(),
            dispatch: DispatchConfig::default(),
            cache: CacheConfig::default(),
            pipeline: PipelineConfig::default(),
            prompts: PromptsConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration before use
    ///
    /// Every configured credential variable must be present. A missing credential is a
    /// fatal configuration error and no pipeline may start.
    pub fn validate(&self) -> Result<()> {
        debug!("Config::validate: called");
        let mut missing: Vec<&str> = Vec::new();
        for llm in [&self.llm, &self.research, &self.repair] {
            if std::env::var(&llm.api_key_env).map(|v| v.trim().is_empty()).unwrap_or(true)
                && !missing.contains(&llm.api_key_env.as_str())
            {
                missing.push(&llm.api_key_env);
            }
        }

        if !missing.is_empty() {
            debug!(?missing, "Config::validate: credentials missing");
            return Err(eyre::eyre!(
                "Missing credentials. Set the following environment variables: {}",
                missing.join(", ")
            ));
        }

        if self.dispatch.concurrency_limit == 0 {
            return Err(eyre::eyre!("dispatch.concurrency-limit must be at least 1"));
        }

        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .dossierflow.yml
        let local_config = PathBuf::from(".dossierflow.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/dossierflow/dossierflow.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("dossierflow").join("dossierflow.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is initialized
    ///
    /// Errors are swallowed: a broken config file is reported properly by `load` later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// LLM provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name ("anthropic" or "openai"; the latter covers any compatible endpoint)
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Maximum tokens per response
    #[serde(rename = "max-tokens")]
    pub max_tokens: u32,

    /// Per-attempt request timeout in milliseconds
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl LlmConfig {
    /// Read the API key from the configured environment variable
    pub fn get_api_key(&self) -> Result<String> {
        debug!(api_key_env = %self.api_key_env, "LlmConfig::get_api_key: called");
        let key = std::env::var(&self.api_key_env)
            .map_err(|_| eyre::eyre!("API key not found in environment variable {}", self.api_key_env))?;
        if key.trim().is_empty() {
            return Err(eyre::eyre!("API key in {} is empty", self.api_key_env));
        }
        Ok(key)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Default research model: an OpenAI-compatible online search endpoint
    pub fn research_default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "sonar-pro".to_string(),
            api_key_env: "PERPLEXITY_API_KEY".to_string(),
            base_url: "https://api.perplexity.ai".to_string(),
            max_tokens: 4096,
            timeout_ms: 40_000,
        }
    }

    /// Default repair model: small, fast, low token budget
    pub fn repair_default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-3-5-haiku-latest".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 4096,
            timeout_ms: 20_000,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            api_key_env: "ANTHROPIC_API_KEY".to_string(),
            base_url: "https://api.anthropic.com".to_string(),
            max_tokens: 8192,
            timeout_ms: 120_000,
        }
    }
}

/// Retry/backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(rename = "base-delay-ms")]
    pub base_delay_ms: u64,

    /// Growth factor applied per retry
    pub multiplier: f64,

    /// Upper bound on any single delay
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
            max_delay: Duration::from_millis(self.max_delay_ms),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            multiplier: 1.5,
            max_delay_ms: 10_000,
        }
    }
}

/// Fan-out limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Maximum external calls in flight within one stage
    #[serde(rename = "concurrency-limit")]
    pub concurrency_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { concurrency_limit: 3 }
    }
}

/// Cache sizes and lifetimes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries in the lookup cache (research findings, baseline data)
    pub capacity: usize,

    #[serde(rename = "research-ttl-secs")]
    pub research_ttl_secs: u64,

    #[serde(rename = "baseline-ttl-secs")]
    pub baseline_ttl_secs: u64,

    /// Lifetime of a finished dossier
    #[serde(rename = "dossier-ttl-secs")]
    pub dossier_ttl_secs: u64,

    /// Maximum finished dossiers kept
    #[serde(rename = "dossier-capacity")]
    pub dossier_capacity: usize,
}

impl CacheConfig {
    pub fn research_ttl(&self) -> Duration {
        Duration::from_secs(self.research_ttl_secs)
    }

    pub fn baseline_ttl(&self) -> Duration {
        Duration::from_secs(self.baseline_ttl_secs)
    }

    pub fn dossier_ttl(&self) -> Duration {
        Duration::from_secs(self.dossier_ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            research_ttl_secs: 3_600,
            baseline_ttl_secs: 3_600,
            dossier_ttl_secs: 86_400,
            dossier_capacity: 100,
        }
    }
}

/// Whole-run settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Run deadline in milliseconds, 0 disables it
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,
}

impl PipelineConfig {
    pub fn deadline(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

/// Prompt template locations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory of `.pmt` overrides, searched before the embedded defaults
    pub dir: Option<PathBuf>,
}
