//! Configuration loading and validation.
//!
//! The pipeline is configured from a single TOML file (default
//! `./config/docsum.toml`). Every section except `[db]` and `[storage]` is
//! optional and falls back to the defaults below. Secrets are never read
//! from the file: service keys and AWS credentials come from environment
//! variables named in the config.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub handoff: HandoffConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub summarization: SummarizationConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub markings: MarkingsConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// The watched root new documents land in.
#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

fn default_backend() -> String {
    "filesystem".to_string()
}

fn default_include_globs() -> Vec<String> {
    ["pdf", "doc", "docx", "txt", "msg"]
        .iter()
        .map(|ext| format!("**/*.{}", ext))
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Where non-message attachments are staged for independent extraction.
#[derive(Debug, Deserialize, Clone)]
pub struct HandoffConfig {
    /// Filesystem root of the handoff store. Defaults to the watched root.
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_handoff_prefix")]
    pub prefix: String,
}

impl Default for HandoffConfig {
    fn default() -> Self {
        Self {
            root: None,
            prefix: default_handoff_prefix(),
        }
    }
}

fn default_handoff_prefix() -> String {
    "email_attachments".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_extraction_provider")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_analysis_model")]
    pub model: String,
    #[serde(default = "default_analysis_api_version")]
    pub api_version: String,
    #[serde(default = "default_analysis_key_env")]
    pub api_key_env: String,
    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Bound on one whole extraction, including retries and polling.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_true")]
    pub local_pdf_pages: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            provider: default_extraction_provider(),
            endpoint: None,
            model: default_analysis_model(),
            api_version: default_analysis_api_version(),
            api_key_env: default_analysis_key_env(),
            timeout_secs: default_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            max_retries: default_max_retries(),
            poll_interval_ms: default_poll_interval_ms(),
            local_pdf_pages: true,
        }
    }
}

fn default_extraction_provider() -> String {
    "local".to_string()
}
fn default_analysis_model() -> String {
    "prebuilt-read".to_string()
}
fn default_analysis_api_version() -> String {
    "2023-07-31".to_string()
}
fn default_analysis_key_env() -> String {
    "FORM_RECOGNIZER_KEY".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummarizationConfig {
    #[serde(default = "default_summarization_provider")]
    pub provider: String,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_language_api_version")]
    pub api_version: String,
    #[serde(default = "default_language_key_env")]
    pub api_key_env: String,
    /// The service's per-request input limit, in characters.
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    /// Texts shorter than this (trimmed, in characters) are not summarized.
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_sentence_count")]
    pub sentence_count: u32,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Concurrent chunk calls per document.
    #[serde(default = "default_chunk_concurrency")]
    pub concurrency: usize,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            provider: default_summarization_provider(),
            endpoint: None,
            api_version: default_language_api_version(),
            api_key_env: default_language_key_env(),
            max_chars: default_max_chars(),
            min_chars: default_min_chars(),
            sentence_count: default_sentence_count(),
            language: default_language(),
            timeout_secs: default_timeout_secs(),
            operation_timeout_secs: default_operation_timeout_secs(),
            max_retries: default_max_retries(),
            poll_interval_ms: default_poll_interval_ms(),
            concurrency: default_chunk_concurrency(),
        }
    }
}

impl SummarizationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_summarization_provider() -> String {
    "disabled".to_string()
}
fn default_language_api_version() -> String {
    "2023-04-01".to_string()
}
fn default_language_key_env() -> String {
    "AI_LANGUAGE_KEY".to_string()
}
fn default_max_chars() -> usize {
    125_000
}
fn default_min_chars() -> usize {
    500
}
fn default_sentence_count() -> u32 {
    6
}
fn default_language() -> String {
    "en".to_string()
}
fn default_chunk_concurrency() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    60
}
fn default_operation_timeout_secs() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    5
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    /// Cap on items produced by expanding one top-level message.
    #[serde(default = "default_max_expanded_items")]
    pub max_expanded_items: usize,
    /// Items processed concurrently within one invocation.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_max_record_bytes")]
    pub max_record_bytes: usize,
    #[serde(default = "default_true")]
    pub skip_complete: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_expanded_items: default_max_expanded_items(),
            max_concurrency: default_max_concurrency(),
            max_record_bytes: default_max_record_bytes(),
            skip_complete: true,
        }
    }
}

fn default_max_expanded_items() -> usize {
    500
}
fn default_max_concurrency() -> usize {
    4
}
fn default_max_record_bytes() -> usize {
    2 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct PersistenceConfig {
    #[serde(default = "default_persist_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_persist_retries(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_persist_retries() -> u32 {
    5
}
fn default_backoff_ms() -> u64 {
    200
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct MarkingsConfig {
    /// Lookup file with one classification marking per line.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    match config.storage.backend.as_str() {
        "filesystem" => {
            if config.storage.root.is_none() {
                anyhow::bail!("storage.root is required for the filesystem backend");
            }
        }
        "s3" => {
            if config.storage.s3.is_none() {
                anyhow::bail!("[storage.s3] is required for the s3 backend");
            }
            if config.handoff.root.is_none() {
                anyhow::bail!("handoff.root is required for the s3 backend");
            }
        }
        other => anyhow::bail!(
            "Unknown storage backend: '{}'. Must be filesystem or s3.",
            other
        ),
    }

    if config.handoff.prefix.trim_matches('/').is_empty() {
        anyhow::bail!("handoff.prefix must not be empty");
    }

    match config.extraction.provider.as_str() {
        "local" => {}
        "azure" => {
            if config.extraction.endpoint.is_none() {
                anyhow::bail!("extraction.endpoint is required when provider is 'azure'");
            }
        }
        other => anyhow::bail!(
            "Unknown extraction provider: '{}'. Must be local or azure.",
            other
        ),
    }

    let s = &config.summarization;
    match s.provider.as_str() {
        "disabled" => {}
        "azure" => {
            if s.endpoint.is_none() {
                anyhow::bail!("summarization.endpoint is required when provider is 'azure'");
            }
        }
        other => anyhow::bail!(
            "Unknown summarization provider: '{}'. Must be disabled or azure.",
            other
        ),
    }
    if s.max_chars == 0 {
        anyhow::bail!("summarization.max_chars must be > 0");
    }
    if s.min_chars >= s.max_chars {
        anyhow::bail!("summarization.min_chars must be < summarization.max_chars");
    }
    if s.concurrency == 0 {
        anyhow::bail!("summarization.concurrency must be >= 1");
    }

    if config.pipeline.max_expanded_items == 0 {
        anyhow::bail!("pipeline.max_expanded_items must be >= 1");
    }
    if config.pipeline.max_concurrency == 0 {
        anyhow::bail!("pipeline.max_concurrency must be >= 1");
    }

    Ok(())
}

impl Config {
    /// Filesystem root of the handoff store.
    pub fn handoff_root(&self) -> Option<&Path> {
        self.handoff
            .root
            .as_deref()
            .or(self.storage.root.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        validate(&config)?;
        Ok(config)
    }

    const MINIMAL: &str = r#"
        [db]
        path = "./data/docsum.sqlite"

        [storage]
        root = "./inbox"
    "#;

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.storage.backend, "filesystem");
        assert_eq!(config.storage.include_globs.len(), 5);
        assert_eq!(config.handoff.prefix, "email_attachments");
        assert_eq!(config.summarization.max_chars, 125_000);
        assert_eq!(config.summarization.min_chars, 500);
        assert!(!config.summarization.is_enabled());
        assert_eq!(config.extraction.provider, "local");
        assert_eq!(config.pipeline.max_expanded_items, 500);
        assert_eq!(config.pipeline.max_record_bytes, 2 * 1024 * 1024);
        assert_eq!(config.persistence.max_retries, 5);
        assert_eq!(config.handoff_root(), Some(Path::new("./inbox")));
    }

    #[test]
    fn azure_summarization_requires_endpoint() {
        let toml_str = format!("{}\n[summarization]\nprovider = \"azure\"\n", MINIMAL);
        let err = parse(&toml_str).unwrap_err();
        assert!(err.to_string().contains("summarization.endpoint"));
    }

    #[test]
    fn min_chars_must_be_below_max_chars() {
        let toml_str = format!(
            "{}\n[summarization]\nmax_chars = 100\nmin_chars = 100\n",
            MINIMAL
        );
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let toml_str = format!("{}\n[extraction]\nprovider = \"tesseract\"\n", MINIMAL);
        let err = parse(&toml_str).unwrap_err();
        assert!(err.to_string().contains("tesseract"));
    }

    #[test]
    fn zero_expansion_cap_is_rejected() {
        let toml_str = format!("{}\n[pipeline]\nmax_expanded_items = 0\n", MINIMAL);
        assert!(parse(&toml_str).is_err());
    }

    #[test]
    fn filesystem_backend_requires_root() {
        let toml_str = "[db]\npath = \"x.sqlite\"\n[storage]\nbackend = \"filesystem\"\n";
        assert!(parse(toml_str).is_err());
    }
}
