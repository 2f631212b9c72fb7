//! Pipeline configuration: where the model lives and how long stages may run.
//!
//! Settings come from an optional YAML file, then environment variables
//! override individual model fields.

use std::{env, fs::File, io::BufReader, path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::session::UploadLimits;

pub const ENDPOINT_ENV: &str = "CSV_MAPPER_ENDPOINT";
pub const MODEL_ENV: &str = "CSV_MAPPER_MODEL";
pub const API_KEY_ENV: &str = "CSV_MAPPER_API_KEY";
pub const FALLBACK_API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ModelSettings {
    pub endpoint: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub request_timeout_secs: u64,
    pub max_retries: usize,
    pub retry_backoff_ms: u64,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.0,
            max_tokens: None,
            request_timeout_secs: 60,
            max_retries: 2,
            retry_backoff_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MapperConfig {
    pub model: ModelSettings,
    /// Rows of each table shown to the model in prompts.
    pub sample_rows: usize,
    /// Upper bound on one pipeline stage; zero disables it.
    pub stage_timeout_secs: u64,
    /// Source files one session accepts.
    pub max_sources: usize,
    /// Largest accepted source file.
    pub max_source_bytes: u64,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            model: ModelSettings::default(),
            sample_rows: 3,
            stage_timeout_secs: 300,
            max_sources: UploadLimits::default().max_sources,
            max_source_bytes: UploadLimits::default().max_source_bytes,
        }
    }
}

impl MapperConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("Opening config file {path:?}"))?;
        let config = serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Parsing config file {path:?}"))?;
        Ok(config)
    }

    /// Loads `path` when given, otherwise defaults, then applies environment
    /// overrides.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| env::var(name).ok());
        Ok(config)
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        if let Some(endpoint) = non_empty(ENDPOINT_ENV) {
            self.model.endpoint = endpoint;
        }
        if let Some(model) = non_empty(MODEL_ENV) {
            self.model.model = model;
        }
        if let Some(key) = non_empty(API_KEY_ENV).or_else(|| {
            self.model
                .api_key
                .is_none()
                .then(|| non_empty(FALLBACK_API_KEY_ENV))
                .flatten()
        }) {
            self.model.api_key = Some(key);
        }
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_sources: self.max_sources,
            max_source_bytes: self.max_source_bytes,
        }
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        (self.stage_timeout_secs > 0).then(|| Duration::from_secs(self.stage_timeout_secs))
    }
}
