use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

const MAX_RETRY_BUDGET: u32 = 10;
pub const MAX_HTTP_RETRIES: u32 = 10;

/// Main configuration structure loaded from coding_analysis.toml and environment variables
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub openrouter: OpenRouterConfig,
    pub pipeline: PipelineConfig,
    pub output: OutputConfig,
    pub prompts: PromptsConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// LLM transport settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenRouterConfig {
    pub base_url: String,
    pub default_model: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            base_url: "https://openrouter.ai/api/v1".to_string(),
            default_model: "meta-llama/llama-3.3-70b-instruct".to_string(),
            timeout_secs: 60,
            max_retries: 3,
            temperature: 0.7,
            max_tokens: 4000,
        }
    }
}

/// Stage execution settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub num_ideas: usize,
    pub max_parallelism: usize,
    /// Maximum responses evaluated per interaction, and maximum idea top-up rounds
    pub retry_budget: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            num_ideas: 15,
            max_parallelism: 4,
            retry_budget: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    pub base_dir: PathBuf,
    pub ideas_filename: String,
    pub dependencies_filename: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("output"),
            ideas_filename: "ideas.json".to_string(),
            dependencies_filename: "dependencies.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory whose `<name>.txt` files override the built-in templates
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub api_key: Option<String>,
    pub log_level: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            log_level: "llm_coding_analysis=info".to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        Self {
            api_key: std::env::var("OPENROUTER_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            log_level: std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "llm_coding_analysis=info".to_string()),
        }
    }
}

impl Config {
    /// Load configuration from TOML file and environment variables.
    /// Uses CODING_ANALYSIS_CONFIG or defaults to "coding_analysis.toml".
    /// `.env` is not read here; call `crate::load_env` first.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CODING_ANALYSIS_CONFIG")
            .unwrap_or_else(|_| "coding_analysis.toml".to_string());
        Self::load_from(config_path)
    }

    /// Load from an explicit TOML path, falling back to defaults when the file is absent.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let mut config: Config = match std::fs::read_to_string(&path) {
            Ok(content) => toml::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Config file {} not found, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                return Err(PipelineError::Config {
                    message: format!("cannot read {}: {}", path.display(), e),
                });
            }
        };

        config.apply_env_overrides();
        config.runtime = RuntimeConfig::load_from_env();
        config.validate();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(model) = std::env::var("OPENROUTER_MODEL") {
            self.openrouter.default_model = model;
            tracing::debug!("OPENROUTER_MODEL env override applied");
        }
        if let Ok(url) = std::env::var("OPENROUTER_BASE_URL") {
            self.openrouter.base_url = url;
        }
        if let Some(n) = std::env::var("CODING_ANALYSIS_MAX_PARALLEL")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.pipeline.max_parallelism = n;
        }
        if let Some(n) = std::env::var("CODING_ANALYSIS_RETRY_BUDGET")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.pipeline.retry_budget = n;
        }
        if let Some(n) = std::env::var("CODING_ANALYSIS_NUM_IDEAS")
            .ok()
            .and_then(|v| v.parse().ok())
        {
            self.pipeline.num_ideas = n;
        }
    }

    /// Clamp values into their supported ranges.
    pub fn validate(&mut self) {
        if self.pipeline.max_parallelism == 0 {
            tracing::warn!("max_parallelism 0 is not allowed, using 1");
            self.pipeline.max_parallelism = 1;
        }
        if self.pipeline.retry_budget == 0 {
            self.pipeline.retry_budget = 1;
        } else if self.pipeline.retry_budget > MAX_RETRY_BUDGET {
            tracing::warn!(
                "retry_budget {} exceeds max {}, clamping",
                self.pipeline.retry_budget,
                MAX_RETRY_BUDGET
            );
            self.pipeline.retry_budget = MAX_RETRY_BUDGET;
        }
        if self.openrouter.max_retries == 0 {
            self.openrouter.max_retries = 1;
        } else if self.openrouter.max_retries > MAX_HTTP_RETRIES {
            tracing::warn!(
                "max_retries {} exceeds max {}, clamping",
                self.openrouter.max_retries,
                MAX_HTTP_RETRIES
            );
            self.openrouter.max_retries = MAX_HTTP_RETRIES;
        }
        if self.pipeline.num_ideas == 0 {
            tracing::warn!("num_ideas 0 is not allowed, using 1");
            self.pipeline.num_ideas = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [pipeline]
            max_parallelism = 8

            [openrouter]
            default_model = "openai/gpt-4o-mini"
            "#,
        )
        .unwrap();
        assert_eq!(config.pipeline.max_parallelism, 8);
        assert_eq!(config.pipeline.num_ideas, 15);
        assert_eq!(config.openrouter.default_model, "openai/gpt-4o-mini");
        assert_eq!(config.openrouter.timeout_secs, 60);
        assert_eq!(config.output.ideas_filename, "ideas.json");
    }

    #[test]
    fn validate_clamps_out_of_range_values() {
        let mut config = Config::default();
        config.pipeline.max_parallelism = 0;
        config.pipeline.retry_budget = 99;
        config.openrouter.max_retries = 0;
        config.validate();
        assert_eq!(config.pipeline.max_parallelism, 1);
        assert_eq!(config.pipeline.retry_budget, 10);
        assert_eq!(config.openrouter.max_retries, 1);

        config.pipeline.retry_budget = 0;
        config.validate();
        assert_eq!(config.pipeline.retry_budget, 1);
    }

    #[test]
    fn validate_caps_http_retries() {
        let mut config = Config::default();
        config.openrouter.max_retries = 64;
        config.validate();
        assert_eq!(config.openrouter.max_retries, 10);

        config.openrouter.max_retries = 4;
        config.validate();
        assert_eq!(config.openrouter.max_retries, 4);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.output.base_dir, PathBuf::from("output"));
    }

    #[test]
    fn malformed_file_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[pipeline\nmax_parallelism = ").unwrap();
        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Config { .. }));
    }
}
