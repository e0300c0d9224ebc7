use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use config::{Config, Environment};
use serde::Deserialize;

use crate::classify::MAX_ATTEMPTS_LIMIT;
use crate::export::window::DEFAULT_STEP_HOURS;

const ENV_PREFIX: &str = "NEWSCAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Ollama,
    Azure,
}

/// Everything the pipeline reads from the environment, resolved once at start-up.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub weaviate_host: String,
    pub weaviate_port: u16,
    pub weaviate_secure: bool,
    pub collection: String,
    pub page_limit: usize,

    pub start_date: String,
    pub end_date: Option<String>,
    pub step_hours: i64,
    pub max_records: usize,
    pub export_path: PathBuf,
    pub state_db_path: PathBuf,

    pub backend: Backend,
    pub ollama_server: String,
    pub ollama_model: String,
    pub azure_endpoint: Option<String>,
    pub azure_api_key: Option<String>,
    pub azure_api_version: String,
    pub azure_deployment: String,
    pub temperature: f64,
    pub max_attempts: u32,
    pub classify_limit: usize,
    pub output_dir: PathBuf,
}

impl Settings {
    /// Loads `.env`, then the process environment.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars().collect())
    }

    /// `NEWSCAT_*` variables win over the legacy unprefixed names, which win over defaults.
    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self> {
        let legacy = |name: &str| vars.get(name).filter(|v| !v.is_empty()).cloned();

        let mut builder = Config::builder()
            .set_default("weaviate_host", legacy("SERVER").unwrap_or_else(|| "localhost".into()))?
            .set_default("weaviate_port", 8889)?
            .set_default("weaviate_secure", false)?
            .set_default("collection", "Article")?
            .set_default("page_limit", 10_000)?
            .set_default("start_date", "2024-03-14T00:00:00Z")?
            .set_default("step_hours", DEFAULT_STEP_HOURS)?
            .set_default("max_records", 1_000_000)?
            .set_default("export_path", "data/articles_export.csv")?
            .set_default("state_db_path", "data/export_state.sqlite")?
            .set_default("backend", "ollama")?
            .set_default(
                "ollama_server",
                legacy("OLLAMA_SERVER")
                    .unwrap_or_else(|| "http://localhost:11434/api/generate".into()),
            )?
            .set_default("ollama_model", "llama3.1")?
            .set_default(
                "azure_api_version",
                legacy("API_VERSION").unwrap_or_else(|| "2024-02-01".into()),
            )?
            .set_default("azure_deployment", "gpt-35-turbo")?
            .set_default("temperature", 0.1)?
            .set_default("max_attempts", 3)?
            .set_default("classify_limit", 25_000)?
            .set_default("output_dir", "data")?;

        if let Some(endpoint) = legacy("AZURE_OPENAI_ENDPOINT") {
            builder = builder.set_default("azure_endpoint", endpoint)?;
        }
        if let Some(key) = legacy("AZURE_OPENAI_API_KEY") {
            builder = builder.set_default("azure_api_key", key)?;
        }

        let settings: Settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .source(Some(vars)),
            )
            .build()?
            .try_deserialize()
            .context("Invalid configuration")?;

        if settings.step_hours <= 0 {
            return Err(anyhow!("step_hours must be positive, got {}", settings.step_hours));
        }
        if settings.max_attempts == 0 || settings.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(anyhow!(
                "max_attempts must be between 1 and {}, got {}",
                MAX_ATTEMPTS_LIMIT,
                settings.max_attempts
            ));
        }
        Ok(settings)
    }

    pub fn weaviate_base_url(&self) -> String {
        let scheme = if self.weaviate_secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.weaviate_host, self.weaviate_port)
    }

    pub fn start(&self) -> Result<DateTime<Utc>> {
        parse_utc(&self.start_date)
    }

    /// Configured end date, or now.
    pub fn end(&self) -> Result<DateTime<Utc>> {
        match &self.end_date {
            Some(s) if !s.trim().is_empty() => parse_utc(s),
            _ => Ok(Utc::now()),
        }
    }

    pub fn step(&self) -> Duration {
        Duration::hours(self.step_hours)
    }

    pub fn model_name(&self) -> &str {
        match self.backend {
            Backend::Ollama => &self.ollama_model,
            Backend::Azure => &self.azure_deployment,
        }
    }

    pub fn output_json_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("analysis_output_{}.json", file_safe(self.model_name())))
    }

    pub fn output_csv_path(&self) -> PathBuf {
        self.output_dir
            .join(format!("analysis_output_{}.csv", file_safe(self.model_name())))
    }
}

fn file_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

/// RFC 3339 (converted to UTC), naive datetime (taken as UTC) or a bare date (midnight UTC).
pub fn parse_utc(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Ok(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    Err(anyhow!("Unrecognized date '{}'", value))
}
