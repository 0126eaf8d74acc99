use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a technical writer. Turn the following source \
material into clear, well-structured documentation written in Markdown. Preserve every \
technical detail and do not invent behavior that is not present in the input.";

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
}

/// Runtime configuration for the docsmith server and CLI.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
    /// Directory where uploaded inputs are stored before processing.
    pub upload_folder: PathBuf,
    /// Directory receiving generated documentation artifacts.
    pub output_folder: PathBuf,
    /// Token budget for each chunk produced by the splitter.
    pub text_splitter_chunk_size: usize,
    /// Sliding token overlap between adjacent chunks.
    pub text_splitter_chunk_overlap: usize,
    /// Model or encoding name used to count tokens while splitting.
    pub tokenizer_model: String,
    /// Attempts granted to each retryable unit of work (chunk, store call, artifact write).
    pub retry_max_attempts: u32,
    /// Fixed delay between retry attempts, in milliseconds.
    pub retry_delay_ms: u64,
    /// Minimum share of successful chunks required to persist the artifact.
    pub success_threshold: f64,
    /// Upper bound on chunk jobs running at the same time for one pipeline.
    pub max_concurrent_chunks: usize,
    /// Maximum time a pipeline may spend waiting on its chunk jobs, in seconds.
    pub max_job_wait_secs: u64,
    /// Heartbeat cadence of the status stream, in seconds.
    pub stream_interval_secs: u64,
    /// How long a finished job stays queryable before it is evicted, in seconds.
    pub job_retention_secs: u64,
    /// System prompt prepended to every chunk sent to a model.
    pub system_prompt: String,
    /// API key enabling the OpenAI-backed models.
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible chat completions.
    pub openai_base_url: Option<String>,
    /// API key enabling the Anthropic-backed model.
    pub anthropic_api_key: Option<String>,
    /// Anthropic model identifier used by the `anthropic` handler.
    pub anthropic_model: String,
    /// Base URL of a local Ollama runtime.
    pub ollama_url: Option<String>,
    /// Ollama models registered under their own names.
    pub ollama_models: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let success_threshold: f64 = load_env_or("SUCCESS_THRESHOLD", 0.5)?;
        if !(0.0..=1.0).contains(&success_threshold) {
            return Err(ConfigError::InvalidValue("SUCCESS_THRESHOLD".into()));
        }
        let retry_max_attempts: u32 = load_env_or("RETRY_MAX_ATTEMPTS", 3)?;
        if retry_max_attempts == 0 {
            return Err(ConfigError::InvalidValue("RETRY_MAX_ATTEMPTS".into()));
        }

        Ok(Self {
            server_port: load_env_optional("SERVER_PORT")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".into()))
                })
                .transpose()?,
            upload_folder: load_env_optional("UPLOAD_FOLDER")
                .unwrap_or_else(|| "uploads".into())
                .into(),
            output_folder: load_env_optional("OUTPUT_FOLDER")
                .unwrap_or_else(|| "docs".into())
                .into(),
            text_splitter_chunk_size: load_env_or("TEXT_SPLITTER_CHUNK_SIZE", 1024)?,
            text_splitter_chunk_overlap: load_env_or("TEXT_SPLITTER_CHUNK_OVERLAP", 0)?,
            tokenizer_model: load_env_optional("TOKENIZER_MODEL")
                .unwrap_or_else(|| "cl100k_base".into()),
            retry_max_attempts,
            retry_delay_ms: load_env_or("RETRY_DELAY_MS", 5_000)?,
            success_threshold,
            max_concurrent_chunks: load_env_or::<usize>("MAX_CONCURRENT_CHUNKS", 8)?.max(1),
            max_job_wait_secs: load_env_or("MAX_JOB_WAIT_SECS", 1_800)?,
            stream_interval_secs: load_env_or::<u64>("STREAM_INTERVAL_SECS", 5)?.max(1),
            job_retention_secs: load_env_or("JOB_RETENTION_SECS", 3_600)?,
            system_prompt: load_env_optional("SYSTEM_PROMPT")
                .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string()),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL"),
            anthropic_api_key: load_env_optional("ANTHROPIC_API_KEY"),
            anthropic_model: load_env_optional("ANTHROPIC_MODEL")
                .unwrap_or_else(|| "claude-3-5-sonnet-latest".into()),
            ollama_url: load_env_optional("OLLAMA_URL"),
            ollama_models: load_env_optional("OLLAMA_MODELS")
                .map(|value| parse_list(&value))
                .unwrap_or_default(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: None,
            upload_folder: "uploads".into(),
            output_folder: "docs".into(),
            text_splitter_chunk_size: 1024,
            text_splitter_chunk_overlap: 0,
            tokenizer_model: "cl100k_base".into(),
            retry_max_attempts: 3,
            retry_delay_ms: 5_000,
            success_threshold: 0.5,
            max_concurrent_chunks: 8,
            max_job_wait_secs: 1_800,
            stream_interval_secs: 5,
            job_retention_secs: 3_600,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            openai_api_key: None,
            openai_base_url: None,
            anthropic_api_key: None,
            anthropic_model: "claude-3-5-sonnet-latest".into(),
            ollama_url: None,
            ollama_models: Vec::new(),
        }
    }
}

/// Tunables consumed by the pipeline components.
///
/// Derived from [`Config`] at startup so the coordinator never reaches for global state.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Token budget per chunk.
    pub chunk_size: usize,
    /// Sliding token overlap between chunks.
    pub chunk_overlap: usize,
    /// Tokenizer model or encoding name.
    pub tokenizer_model: String,
    /// Attempts per retryable unit.
    pub retry_max_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_delay: Duration,
    /// Inclusive success-rate threshold for persisting the artifact.
    pub success_threshold: f64,
    /// Maximum chunk jobs in flight per pipeline.
    pub max_concurrent_chunks: usize,
    /// Maximum time spent waiting on chunk jobs.
    pub max_job_wait: Duration,
    /// How long finished jobs stay in the registry.
    pub job_retention: Duration,
    /// System prompt prepended to every chunk.
    pub system_prompt: String,
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            chunk_size: config.text_splitter_chunk_size,
            chunk_overlap: config.text_splitter_chunk_overlap,
            tokenizer_model: config.tokenizer_model.clone(),
            retry_max_attempts: config.retry_max_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            success_threshold: config.success_threshold,
            max_concurrent_chunks: config.max_concurrent_chunks,
            max_job_wait: Duration::from_secs(config.max_job_wait_secs),
            job_retention: Duration::from_secs(config.job_retention_secs),
            system_prompt: config.system_prompt.clone(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn load_env_or<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match load_env_optional(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
pub fn init_config() {
    dotenvy::dotenv().ok();
    let config = Config::from_env().expect("Failed to load config from environment");
    tracing::debug!(
        server_port = ?config.server_port,
        upload_folder = %config.upload_folder.display(),
        output_folder = %config.output_folder.display(),
        chunk_size = config.text_splitter_chunk_size,
        retry_max_attempts = config.retry_max_attempts,
        success_threshold = config.success_threshold,
        ollama_models = ?config.ollama_models,
        "Loaded configuration"
    );
    CONFIG.set(config).expect("Failed to set config");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_list_trims_and_drops_empty_entries() {
        assert_eq!(
            parse_list(" llama3 , ,mistral,"),
            vec!["llama3".to_string(), "mistral".to_string()]
        );
    }

    #[test]
    fn pipeline_settings_follow_config_defaults() {
        let settings = PipelineSettings::default();
        assert_eq!(settings.retry_max_attempts, 3);
        assert_eq!(settings.retry_delay, Duration::from_secs(5));
        assert!((settings.success_threshold - 0.5).abs() < f64::EPSILON);
        assert_eq!(settings.chunk_size, 1024);
        assert_eq!(settings.job_retention, Duration::from_secs(3_600));
    }
}
