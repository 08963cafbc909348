//! Full-batch index build.
//!
//! There is no incremental update: every build embeds the whole corpus,
//! inserts vectors in record order (so slot `n` is record `n`), clusters the
//! result and publishes it as a new snapshot generation. Nothing is written
//! until every step has succeeded.

use crate::records::MessageRecord;
use crate::semantic::batch::{embed_in_batches, BatchOptions, CancelToken};
use crate::semantic::cluster::{cluster_messages, ClusterParams, ClusteringError};
use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::semantic::index::{IndexError, VectorIndex};
use crate::semantic::metadata::{MetadataError, MetadataStore};
use crate::semantic::snapshot::{IndexSnapshot, SnapshotError, SnapshotStore};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Nothing to index")]
    EmptyCorpus,

    #[error("Embedding failed: {0}")]
    Embedding(EmbeddingError),

    #[error("Indexing cancelled; the existing index was left untouched")]
    Cancelled,

    #[error("Vector for slot {slot} (message {message_id}) is unusable: {source}")]
    InvalidVector {
        slot: usize,
        message_id: String,
        source: IndexError,
    },

    #[error("Clustering failed: {0}")]
    Clustering(#[from] ClusteringError),

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("Failed to publish index: {0}")]
    Snapshot(#[from] SnapshotError),
}

impl From<EmbeddingError> for BuildError {
    fn from(err: EmbeddingError) -> Self {
        match err {
            EmbeddingError::Cancelled => BuildError::Cancelled,
            other => BuildError::Embedding(other),
        }
    }
}

pub struct IndexBuilder<'a> {
    provider: &'a dyn EmbeddingProvider,
    batch: BatchOptions,
    clustering: ClusterParams,
    cancel: CancelToken,
}

impl<'a> IndexBuilder<'a> {
    pub fn new(
        provider: &'a dyn EmbeddingProvider,
        batch: BatchOptions,
        clustering: ClusterParams,
        cancel: CancelToken,
    ) -> Self {
        Self {
            provider,
            batch,
            clustering,
            cancel,
        }
    }

    /// Build an in-memory snapshot without persisting it.
    pub fn build(&self, records: Vec<MessageRecord>) -> Result<(VectorIndex, MetadataStore), BuildError> {
        let _span = tracing::info_span!("build_index", records = records.len()).entered();

        if records.is_empty() {
            return Err(BuildError::EmptyCorpus);
        }

        let texts: Vec<String> = records.iter().map(|r| r.content.clone()).collect();
        let vectors = embed_in_batches(self.provider, &texts, &self.batch, &self.cancel)?;
        drop(texts);

        let dimensions = vectors.first().map_or(0, Vec::len);
        let mut index = VectorIndex::with_capacity(dimensions, vectors.len());
        for (slot, (vector, record)) in vectors.iter().zip(&records).enumerate() {
            index.push(vector).map_err(|source| BuildError::InvalidVector {
                slot,
                message_id: record.message_id.clone(),
                source,
            })?;
        }
        log::info!("Indexed {} vectors ({dimensions} dimensions)", index.len());

        let mut metadata = MetadataStore::new(self.provider.model_name(), dimensions, records);

        let clustering = cluster_messages(&index, &metadata.contents(), &self.clustering)?;
        log::info!(
            "Grouped messages into {} topic clusters ({} iterations)",
            clustering.clusters.len(),
            clustering.iterations
        );
        metadata.set_clusters(clustering.clusters)?;

        Ok((index, metadata))
    }

    /// Build and atomically publish a new generation to `store`.
    pub fn build_and_publish(
        &self,
        records: Vec<MessageRecord>,
        store: &SnapshotStore,
    ) -> Result<IndexSnapshot, BuildError> {
        let (index, metadata) = self.build(records)?;

        // last chance to back out before anything touches disk
        if self.cancel.is_cancelled() {
            return Err(BuildError::Cancelled);
        }

        Ok(store.publish(index, metadata)?)
    }
}
