use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::records::LoaderOptions;
use crate::semantic::retry::RetryPolicy;

const CONFIG_FILE_NAME: &str = "config.yaml";

/// Default remote embedding model (the one the archive was originally built with)
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_EMBEDDING_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";
const DEFAULT_BATCH_SIZE: usize = 100;
/// Per-request input cap of the OpenAI embeddings endpoint
const DEFAULT_MAX_BATCH_TOKENS: usize = 300_000;
const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 1000;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 60_000;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
/// Upper bound for "auto" parallelism; more concurrent requests only buys rate limits
const MAX_AUTO_PARALLELISM: usize = 8;

/// Cheap pre-check before tokenizing
const DEFAULT_MAX_CONTENT_CHARS: usize = 30_000;
/// The default model accepts at most 8192 input tokens
const DEFAULT_MAX_CONTENT_TOKENS: usize = 8_191;
const DEFAULT_MIN_CONTENT_CHARS: usize = 3;

const DEFAULT_TOP_K: usize = 5;
const DEFAULT_MAX_TOP_K: usize = 100;
const DEFAULT_OVERFETCH_FACTOR: usize = 4;

const DEFAULT_CLUSTERS: usize = 5;
const DEFAULT_CLUSTER_SEED: u64 = 42;
const DEFAULT_KEYWORDS_PER_CLUSTER: usize = 5;
const DEFAULT_CLUSTER_MAX_ITERATIONS: usize = 100;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible HTTP endpoint
    OpenAi,
    /// In-process fastembed model
    Local,
}

/// Configuration for the embedding service
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: ProviderKind,

    /// Model name, sent to the service (or resolved locally for `local`)
    #[serde(default = "default_embedding_model")]
    pub model: String,

    #[serde(default = "default_embedding_endpoint")]
    pub endpoint: String,

    /// Name of the environment variable holding the API key. The key itself
    /// never lives in this file.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// A batch is closed early once its texts would exceed this many tokens
    #[serde(default = "default_max_batch_tokens")]
    pub max_batch_tokens: usize,

    /// Concurrent embedding batches: "auto" or a positive integer
    #[serde(default = "default_parallelism")]
    pub parallelism: String,

    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            endpoint: default_embedding_endpoint(),
            api_key_env: default_api_key_env(),
            batch_size: DEFAULT_BATCH_SIZE,
            max_batch_tokens: DEFAULT_MAX_BATCH_TOKENS,
            parallelism: default_parallelism(),
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            retry_max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

impl EmbeddingConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
        }
    }

    /// Resolve "auto" to the number of available cores (capped).
    pub fn resolved_parallelism(&self) -> usize {
        match self.parallelism.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(MAX_AUTO_PARALLELISM),
        }
    }
}

fn default_provider() -> ProviderKind {
    ProviderKind::OpenAi
}

fn default_embedding_model() -> String {
    DEFAULT_EMBEDDING_MODEL.to_string()
}

fn default_embedding_endpoint() -> String {
    DEFAULT_EMBEDDING_ENDPOINT.to_string()
}

fn default_api_key_env() -> String {
    DEFAULT_API_KEY_ENV.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_max_batch_tokens() -> usize {
    DEFAULT_MAX_BATCH_TOKENS
}

fn default_parallelism() -> String {
    "auto".to_string()
}

fn default_retry_attempts() -> u32 {
    DEFAULT_RETRY_ATTEMPTS
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_retry_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

/// Limits for the record loader
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoaderConfig {
    #[serde(default = "default_min_content_chars")]
    pub min_content_chars: usize,

    /// Longer messages are rejected, never truncated
    #[serde(default = "default_max_content_chars")]
    pub max_content_chars: usize,

    /// Counted with cl100k_base; longer messages are rejected
    #[serde(default = "default_max_content_tokens")]
    pub max_content_tokens: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            min_content_chars: DEFAULT_MIN_CONTENT_CHARS,
            max_content_chars: DEFAULT_MAX_CONTENT_CHARS,
            max_content_tokens: DEFAULT_MAX_CONTENT_TOKENS,
        }
    }
}

impl LoaderConfig {
    pub fn options(&self) -> LoaderOptions {
        LoaderOptions {
            min_content_chars: self.min_content_chars,
            max_content_chars: self.max_content_chars,
            max_content_tokens: self.max_content_tokens,
        }
    }
}

fn default_min_content_chars() -> usize {
    DEFAULT_MIN_CONTENT_CHARS
}

fn default_max_content_chars() -> usize {
    DEFAULT_MAX_CONTENT_CHARS
}

fn default_max_content_tokens() -> usize {
    DEFAULT_MAX_CONTENT_TOKENS
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "default_max_top_k")]
    pub max_top_k: usize,

    /// Candidate multiplier used when filters will discard hits
    #[serde(default = "default_overfetch_factor")]
    pub filter_overfetch_factor: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_top_k: DEFAULT_TOP_K,
            max_top_k: DEFAULT_MAX_TOP_K,
            filter_overfetch_factor: DEFAULT_OVERFETCH_FACTOR,
        }
    }
}

fn default_top_k() -> usize {
    DEFAULT_TOP_K
}

fn default_max_top_k() -> usize {
    DEFAULT_MAX_TOP_K
}

fn default_overfetch_factor() -> usize {
    DEFAULT_OVERFETCH_FACTOR
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClusteringConfig {
    #[serde(default = "default_clusters")]
    pub clusters: usize,

    #[serde(default = "default_cluster_seed")]
    pub seed: u64,

    #[serde(default = "default_keywords_per_cluster")]
    pub keywords_per_cluster: usize,

    #[serde(default = "default_cluster_max_iterations")]
    pub max_iterations: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            clusters: DEFAULT_CLUSTERS,
            seed: DEFAULT_CLUSTER_SEED,
            keywords_per_cluster: DEFAULT_KEYWORDS_PER_CLUSTER,
            max_iterations: DEFAULT_CLUSTER_MAX_ITERATIONS,
        }
    }
}

fn default_clusters() -> usize {
    DEFAULT_CLUSTERS
}

fn default_cluster_seed() -> u64 {
    DEFAULT_CLUSTER_SEED
}

fn default_keywords_per_cluster() -> usize {
    DEFAULT_KEYWORDS_PER_CLUSTER
}

fn default_cluster_max_iterations() -> usize {
    DEFAULT_CLUSTER_MAX_ITERATIONS
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub loader: LoaderConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let emb = &self.embedding;
        if emb.model.trim().is_empty() {
            bail!("embedding.model cannot be empty");
        }
        if emb.provider == ProviderKind::OpenAi {
            let endpoint = url::Url::parse(&emb.endpoint)
                .with_context(|| format!("embedding.endpoint is not a valid URL: '{}'", emb.endpoint))?;
            if !matches!(endpoint.scheme(), "http" | "https") {
                bail!("embedding.endpoint must be an http(s) URL, got '{}'", emb.endpoint);
            }
            if emb.api_key_env.trim().is_empty() {
                bail!("embedding.api_key_env cannot be empty");
            }
        }
        if emb.batch_size == 0 {
            bail!("embedding.batch_size must be greater than 0");
        }
        if emb.max_batch_tokens < self.loader.max_content_tokens {
            bail!(
                "embedding.max_batch_tokens ({}) must be at least loader.max_content_tokens ({})",
                emb.max_batch_tokens,
                self.loader.max_content_tokens
            );
        }
        if emb.parallelism != "auto" {
            match emb.parallelism.parse::<u32>() {
                Ok(0) | Err(_) => bail!(
                    "embedding.parallelism must be 'auto' or a positive integer, got '{}'",
                    emb.parallelism
                ),
                Ok(_) => {}
            }
        }
        if emb.retry_attempts == 0 {
            bail!("embedding.retry_attempts must be at least 1");
        }
        if emb.request_timeout_secs == 0 {
            bail!("embedding.request_timeout_secs must be greater than 0");
        }

        let loader = &self.loader;
        if loader.max_content_chars == 0 || loader.min_content_chars > loader.max_content_chars {
            bail!(
                "loader limits are inconsistent: min_content_chars={} max_content_chars={}",
                loader.min_content_chars,
                loader.max_content_chars
            );
        }
        if loader.max_content_tokens == 0 {
            bail!("loader.max_content_tokens must be greater than 0");
        }

        let search = &self.search;
        if search.max_top_k == 0 {
            bail!("search.max_top_k must be greater than 0");
        }
        if search.default_top_k == 0 || search.default_top_k > search.max_top_k {
            bail!(
                "search.default_top_k must be between 1 and {}, got {}",
                search.max_top_k,
                search.default_top_k
            );
        }
        if search.filter_overfetch_factor == 0 {
            bail!("search.filter_overfetch_factor must be at least 1");
        }

        if self.clustering.clusters == 0 {
            bail!("clustering.clusters must be at least 1");
        }
        if self.clustering.max_iterations == 0 {
            bail!("clustering.max_iterations must be at least 1");
        }

        Ok(())
    }

    /// Load `config.yaml` from `base_path`, writing defaults on first run.
    pub fn load_with(base_path: &Path) -> anyhow::Result<Self> {
        let path = base_path.join(CONFIG_FILE_NAME);

        // create new if does not exist
        if !path.exists() {
            let mut config = Self::default();
            config.base_path = base_path.to_path_buf();
            config.save()?;
            log::info!("Wrote default configuration to {}", path.display());
        }

        let config_str = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut config: Self = serde_yml::from_str(&config_str)
            .with_context(|| format!("{} is malformed", path.display()))?;

        config.base_path = base_path.to_path_buf();
        config.validate()?;

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = self.base_path.join(CONFIG_FILE_NAME);
        let temp_path = path.with_extension("yaml.tmp");

        let config_str = serde_yml::to_string(&self).context("failed to serialize config")?;
        std::fs::write(&temp_path, config_str.as_bytes())
            .with_context(|| format!("failed to write {}", temp_path.display()))?;
        std::fs::rename(&temp_path, &path)
            .with_context(|| format!("failed to replace {}", path.display()))?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path()).unwrap();

        assert!(dir.path().join(CONFIG_FILE_NAME).exists());
        assert_eq!(config.embedding.provider, ProviderKind::OpenAi);
        assert_eq!(config.embedding.model, DEFAULT_EMBEDDING_MODEL);
        assert_eq!(config.search.default_top_k, DEFAULT_TOP_K);
        assert_eq!(config.clustering.seed, DEFAULT_CLUSTER_SEED);
        assert_eq!(config.base_path(), dir.path());
    }

    #[test]
    fn test_partial_file_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "embedding:\n  provider: local\n  model: all-MiniLM-L6-v2\nsearch:\n  default_top_k: 10\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path()).unwrap();
        assert_eq!(config.embedding.provider, ProviderKind::Local);
        assert_eq!(config.embedding.model, "all-MiniLM-L6-v2");
        assert_eq!(config.embedding.batch_size, DEFAULT_BATCH_SIZE);
        assert_eq!(config.search.default_top_k, 10);
        assert_eq!(config.search.max_top_k, DEFAULT_MAX_TOP_K);
        assert_eq!(config.loader.max_content_chars, DEFAULT_MAX_CONTENT_CHARS);
        assert_eq!(config.loader.max_content_tokens, DEFAULT_MAX_CONTENT_TOKENS);
        assert_eq!(config.embedding.max_batch_tokens, DEFAULT_MAX_BATCH_TOKENS);
    }

    #[test]
    fn test_invalid_values_are_errors() {
        let mut config = Config::default();
        config.embedding.parallelism = "0".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.endpoint = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search.default_top_k = 500;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.loader.min_content_chars = 10;
        config.loader.max_content_chars = 5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.loader.max_content_tokens = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.embedding.max_batch_tokens = 1_000;
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "search: [unclosed").unwrap();
        assert!(Config::load_with(dir.path()).is_err());
    }

    #[test]
    fn test_parallelism_resolution() {
        let mut config = EmbeddingConfig::default();
        config.parallelism = "3".to_string();
        assert_eq!(config.resolved_parallelism(), 3);

        config.parallelism = "auto".to_string();
        let auto = config.resolved_parallelism();
        assert!((1..=MAX_AUTO_PARALLELISM).contains(&auto));
    }

    #[test]
    fn test_api_key_is_not_serialized() {
        let yaml = serde_yml::to_string(&Config::default()).unwrap();
        assert!(yaml.contains("api_key_env: OPENAI_API_KEY"));
        assert!(!yaml.contains("base_path"));
    }
}
