//! Configuration - layered defaults, optional TOML file and `MANICE_*` environment
//!
//! Precedence, lowest first:
//!
//! 1. [`Config::default`]
//! 2. `manice.toml` in the working directory, or the file given with `--config`
//! 3. the `MANICE_ENV` profile (`development` or `production`)
//! 4. `MANICE_*` variables, nested with `__` (e.g. `MANICE_LARGE_MODEL__TIMEOUT=60`)

use manice_llm::{
    ModelProfile, ModelProfiles, ModelTier, ProviderEndpoints, ProviderKind, UnknownProvider,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

const ENV_PREFIX: &str = "MANICE";
const ENV_PROFILE_VAR: &str = "MANICE_ENV";
const DEFAULT_FILE: &str = "manice.toml";

const DEVELOPMENT_OVERRIDES: &str = r#"
debug = true
log_level = "DEBUG"

[large_model]
timeout = 120
"#;

const PRODUCTION_OVERRIDES: &str = r#"
debug = false
log_level = "WARNING"
"#;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error(transparent)]
    UnknownProvider(#[from] UnknownProvider),
    #[error("{slot} is configured with tier '{found}'")]
    TierMismatch { slot: &'static str, found: ModelTier },
    #[error("{0} must not be empty")]
    EmptyUrl(&'static str),
    #[error("Unknown environment profile: {0} (expected development or production)")]
    UnknownProfile(String),
}

/// Process-wide settings, read-only once loaded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    pub log_level: String,
    pub ollama_url: String,
    pub lm_studio_url: String,
    pub jan_url: String,
    pub preferred_provider: ProviderKind,
    pub model_cache_size: usize,
    pub large_model: ModelProfile,
    pub small_model: ModelProfile,
}

impl Default for Config {
    fn default() -> Self {
        let endpoints = ProviderEndpoints::default();
        Self {
            host: "127.0.0.1".to_string(),
            port: 8899,
            debug: false,
            log_level: "INFO".to_string(),
            ollama_url: endpoints.ollama_url,
            lm_studio_url: endpoints.lm_studio_url,
            jan_url: endpoints.jan_url,
            preferred_provider: ProviderKind::Ollama,
            model_cache_size: 2,
            large_model: ModelProfile::large(),
            small_model: ModelProfile::small(),
        }
    }
}

impl Config {
    /// Load from `path` (or `manice.toml` if present) and the process environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let env: HashMap<String, String> = std::env::vars()
            .filter(|(key, _)| key.starts_with(ENV_PREFIX))
            .collect();
        Self::load_with_env(path, env)
    }

    /// Load with an explicit set of environment variables
    pub fn load_with_env(
        path: Option<&Path>,
        env: HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        let defaults = config::Config::try_from(&Config::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        builder = match path {
            Some(path) => builder.add_source(config::File::from(path).required(true)),
            None => builder.add_source(config::File::from(Path::new(DEFAULT_FILE)).required(false)),
        };

        if let Some(profile) = env.get(ENV_PROFILE_VAR) {
            let overrides = match profile.to_lowercase().as_str() {
                "development" | "dev" => DEVELOPMENT_OVERRIDES,
                "production" | "prod" => PRODUCTION_OVERRIDES,
                other => return Err(ConfigError::UnknownProfile(other.to_string())),
            };
            builder = builder.add_source(config::File::from_str(
                overrides,
                config::FileFormat::Toml,
            ));
        }

        let env_source = config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
            .source(Some(env));

        let config: Config = builder.add_source(env_source).build()?.try_deserialize()?;
        config.validate()?;

        tracing::debug!(
            provider = %config.preferred_provider,
            cache_size = config.model_cache_size,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Check invariants the type system cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.large_model.tier != ModelTier::Large {
            return Err(ConfigError::TierMismatch {
                slot: "large_model",
                found: self.large_model.tier,
            });
        }
        if self.small_model.tier != ModelTier::Small {
            return Err(ConfigError::TierMismatch {
                slot: "small_model",
                found: self.small_model.tier,
            });
        }
        for (name, url) in [
            ("ollama_url", &self.ollama_url),
            ("lm_studio_url", &self.lm_studio_url),
            ("jan_url", &self.jan_url),
        ] {
            if url.trim().is_empty() {
                return Err(ConfigError::EmptyUrl(name));
            }
        }
        Ok(())
    }

    /// Override the preferred provider by name, e.g. from the command line
    pub fn set_provider(&mut self, name: &str) -> Result<(), ConfigError> {
        self.preferred_provider = name.parse()?;
        Ok(())
    }

    pub fn endpoints(&self) -> ProviderEndpoints {
        ProviderEndpoints {
            ollama_url: self.ollama_url.clone(),
            lm_studio_url: self.lm_studio_url.clone(),
            jan_url: self.jan_url.clone(),
        }
    }

    pub fn profiles(&self) -> ModelProfiles {
        ModelProfiles::new(self.large_model.clone(), self.small_model.clone())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
