//! Wiring between configuration, the embedding provider and the snapshot store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use homedir::my_home;
use once_cell::sync::OnceCell;
use serde::Serialize;

use crate::config::{Config, EmbeddingConfig, ProviderKind};
use crate::records::load_records;
use crate::semantic::{
    cluster_messages, BatchOptions, CancelToken, Cluster, ClusterParams, EmbeddingProvider, IndexBuilder,
    IndexSnapshot, QueryEngine, QueryOptions, SearchFilters, SearchResult, SnapshotStore,
};
use crate::semantic::openai::OpenAiEmbedder;
use crate::stats::{conversation_transcript, corpus_stats, CorpusStats, TranscriptLine};

const BASE_PATH_ENV: &str = "MEMSEARCH_BASE_PATH";
const INDEX_DIR: &str = "index";

/// Resolve the data directory: `$MEMSEARCH_BASE_PATH`, else `~/.local/share/memsearch`.
pub fn resolve_base_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(BASE_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    let home = my_home()
        .map_err(|e| anyhow::anyhow!("Could not determine home directory: {e:?}"))?
        .context("Home directory path is empty")?;
    Ok(home.join(".local/share/memsearch"))
}

/// Build the configured embedding provider.
pub fn create_provider(config: &EmbeddingConfig, base_path: &Path) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider {
        ProviderKind::OpenAi => {
            let provider = OpenAiEmbedder::from_config(config)?;
            log::debug!("Using remote embedding model '{}' at {}", config.model, config.endpoint);
            Ok(Arc::new(provider))
        }
        #[cfg(feature = "local-embeddings")]
        ProviderKind::Local => {
            let provider = crate::semantic::embeddings::LocalEmbedder::new(&config.model, base_path.to_path_buf())?;
            Ok(Arc::new(provider))
        }
        #[cfg(not(feature = "local-embeddings"))]
        ProviderKind::Local => {
            let _ = base_path;
            bail!("embedding.provider is 'local' but memsearch was built without the local-embeddings feature")
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexSummary {
    pub generation: String,
    pub model: String,
    pub dimensions: usize,
    pub indexed: usize,
    pub rejected: usize,
    pub rejections: BTreeMap<&'static str, usize>,
    pub clusters: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterView {
    pub cluster_id: usize,
    pub size: usize,
    pub keywords: Vec<String>,
    pub member_slots: Vec<usize>,
}

impl From<Cluster> for ClusterView {
    fn from(cluster: Cluster) -> Self {
        Self {
            cluster_id: cluster.cluster_id,
            size: cluster.member_slots.len(),
            keywords: cluster.keywords,
            member_slots: cluster.member_slots,
        }
    }
}

pub struct App {
    config: Config,
    base_path: PathBuf,
    store: SnapshotStore,
    provider: OnceCell<Arc<dyn EmbeddingProvider>>,
    cancel: CancelToken,
}

impl App {
    pub fn new(config: Config, base_path: PathBuf, cancel: CancelToken) -> Self {
        let store = SnapshotStore::new(base_path.join(INDEX_DIR));
        Self {
            config,
            base_path,
            store,
            provider: OnceCell::new(),
            cancel,
        }
    }

    /// Use `provider` instead of building one from config.
    pub fn with_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = OnceCell::with_value(provider);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    fn provider(&self) -> Result<Arc<dyn EmbeddingProvider>> {
        self.provider
            .get_or_try_init(|| create_provider(&self.config.embedding, &self.base_path))
            .cloned()
    }

    /// Load, embed and publish `log_path` as the new live index.
    pub fn index(&self, log_path: &Path) -> Result<IndexSummary> {
        let report = load_records(log_path, &self.config.loader.options())
            .with_context(|| format!("failed to load {}", log_path.display()))?;
        let indexed = report.accepted();
        let rejected = report.rejected();
        let rejections = report.rejections_by_kind();

        let provider = self.provider()?;
        let batch = BatchOptions {
            batch_size: self.config.embedding.batch_size,
            max_batch_tokens: self.config.embedding.max_batch_tokens,
            parallelism: self.config.embedding.resolved_parallelism(),
            show_progress: true,
        };
        let builder = IndexBuilder::new(
            provider.as_ref(),
            batch,
            ClusterParams::from(&self.config.clustering),
            self.cancel.clone(),
        );
        let snapshot = builder.build_and_publish(report.records, &self.store)?;

        Ok(IndexSummary {
            generation: snapshot.generation().to_string(),
            model: snapshot.model().to_string(),
            dimensions: snapshot.dimensions(),
            indexed,
            rejected,
            rejections,
            clusters: snapshot.metadata().clusters.len(),
        })
    }

    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>> {
        Ok(Arc::new(self.store.load()?))
    }

    fn query_options(&self) -> QueryOptions {
        QueryOptions {
            max_top_k: self.config.search.max_top_k,
            filter_overfetch_factor: self.config.search.filter_overfetch_factor,
        }
    }

    pub fn query_engine(&self) -> Result<QueryEngine> {
        let snapshot = self.snapshot()?;
        Ok(QueryEngine::new(snapshot, self.provider()?, self.query_options())?)
    }

    /// Bad input is rejected before the snapshot is read or a provider built.
    pub fn search(&self, query: &str, top_k: Option<usize>, filters: &SearchFilters) -> Result<Vec<SearchResult>> {
        let top_k = top_k.unwrap_or(self.config.search.default_top_k);
        QueryEngine::validate_request(query, top_k, filters, &self.query_options())?;
        Ok(self.query_engine()?.search(query, top_k, filters)?)
    }

    /// Clusters stored with the live snapshot, or recomputed when `count` or
    /// `seed` override the configured parameters.
    pub fn clusters(&self, count: Option<usize>, seed: Option<u64>) -> Result<Vec<ClusterView>> {
        let snapshot = self.snapshot()?;
        if count.is_none() && seed.is_none() {
            return Ok(snapshot.metadata().clusters.iter().cloned().map(ClusterView::from).collect());
        }

        let mut params = ClusterParams::from(&self.config.clustering);
        if let Some(count) = count {
            params.clusters = count;
        }
        if let Some(seed) = seed {
            params.seed = seed;
        }
        let clustering = cluster_messages(snapshot.index(), &snapshot.metadata().contents(), &params)?;
        Ok(clustering.clusters.into_iter().map(ClusterView::from).collect())
    }

    pub fn stats(&self) -> Result<CorpusStats> {
        let snapshot = self.snapshot()?;
        Ok(corpus_stats(snapshot.records().map(|(_, r)| r)))
    }

    pub fn thread(&self, conversation_id: &str) -> Result<Vec<TranscriptLine>> {
        let snapshot = self.snapshot()?;
        let lines = conversation_transcript(snapshot.records(), conversation_id);
        if lines.is_empty() {
            bail!("no messages found for conversation '{conversation_id}'");
        }
        Ok(lines)
    }
}
