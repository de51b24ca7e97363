//! Application configuration for StudyKit.
//!
//! User config lives at `~/.studykit/studykit.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, StudyKitError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "studykit.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".studykit";

// ---------------------------------------------------------------------------
// Config structs (matching studykit.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reasoning service settings.
    #[serde(default)]
    pub reasoning: ReasoningConfig,

    /// Rate-limit retry policy.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Pipeline limits.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Quiz generation settings.
    #[serde(default)]
    pub quiz: QuizConfig,
}

/// `[reasoning]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReasoningConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier sent with every request.
    #[serde(default = "default_model")]
    pub model: String,

    /// Base URL of the generative API.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// HTTP timeout for a single request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_model(),
            endpoint: default_endpoint(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ReasoningConfig {
    /// Parse the configured endpoint.
    pub fn endpoint_url(&self) -> Result<Url> {
        Url::parse(&self.endpoint).map_err(|e| {
            StudyKitError::config(format!("invalid reasoning endpoint '{}': {e}", self.endpoint))
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".into()
}
fn default_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_endpoint() -> String {
    "https://generativelanguage.googleapis.com/v1beta".into()
}
fn default_request_timeout() -> u64 {
    60
}

/// `[retry]` section. Only rate-limited calls are retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay, doubled on every attempt.
    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Upper bound of the uniform random jitter added to each delay.
    #[serde(default = "default_jitter_max")]
    pub jitter_max_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            jitter_max_ms: default_jitter_max(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1000
}
fn default_jitter_max() -> u64 {
    1000
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound for one stage, retries and backoff included.
    #[serde(default = "default_stage_timeout")]
    pub stage_timeout_secs: u64,

    /// Input text is truncated to this many characters before prompting.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            stage_timeout_secs: default_stage_timeout(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

impl PipelineConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

fn default_stage_timeout() -> u64 {
    120
}
fn default_max_input_chars() -> usize {
    30_000
}

/// `[quiz]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizConfig {
    /// Number of questions requested per quiz.
    #[serde(default = "default_question_count")]
    pub question_count: usize,
}

impl Default for QuizConfig {
    fn default() -> Self {
        Self {
            question_count: default_question_count(),
        }
    }
}

fn default_question_count() -> usize {
    5
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.studykit/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| StudyKitError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.studykit/studykit.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| StudyKitError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        StudyKitError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    if config.retry.max_attempts == 0 {
        return Err(StudyKitError::config("retry.max_attempts must be at least 1"));
    }
    if config.quiz.question_count == 0 {
        return Err(StudyKitError::config("quiz.question_count must be at least 1"));
    }
    if config.pipeline.stage_timeout_secs == 0 {
        return Err(StudyKitError::config("pipeline.stage_timeout_secs must be at least 1"));
    }
    if config.pipeline.max_input_chars == 0 {
        return Err(StudyKitError::config("pipeline.max_input_chars must be at least 1"));
    }

    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| StudyKitError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| StudyKitError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| StudyKitError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the API key from the configured env var.
pub fn resolve_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.reasoning.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(StudyKitError::config(format!(
            "Reasoning service API key not found. Set the {var_name} environment variable."
        ))),
    }
}

/// Check that the API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    resolve_api_key(config).map(|_| ())
}
