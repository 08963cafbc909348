//! Query engine over a loaded snapshot.

use std::sync::Arc;

use serde::Serialize;

use crate::records::{MessageRecord, Role};
use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::semantic::index::IndexError;
use crate::semantic::snapshot::IndexSnapshot;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("Query text is empty")]
    EmptyQuery,

    #[error("top_k must be between 1 and {max}, got {top_k}")]
    InvalidTopK { top_k: usize, max: usize },

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Index was built with model '{index_model}' but the configured model is '{provider_model}'; rebuild the index")]
    ModelMismatch {
        index_model: String,
        provider_model: String,
    },

    #[error("Embedding service returned an empty vector for the query")]
    EmptyEmbedding,

    #[error("Failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Query vector rejected: {0}")]
    Index(#[from] IndexError),
}

/// Post-filters applied to candidates. All present filters must match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchFilters {
    pub role: Option<Role>,
    /// Inclusive, epoch seconds
    pub since: Option<i64>,
    /// Inclusive, epoch seconds
    pub until: Option<i64>,
    pub conversation_id: Option<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.since.is_none() && self.until.is_none() && self.conversation_id.is_none()
    }

    pub fn matches(&self, record: &MessageRecord) -> bool {
        self.role.map_or(true, |role| record.role == role)
            && self.since.map_or(true, |since| record.timestamp >= since)
            && self.until.map_or(true, |until| record.timestamp <= until)
            && self
                .conversation_id
                .as_deref()
                .map_or(true, |id| record.conversation_id == id)
    }

    fn validate(&self) -> Result<(), QueryError> {
        if let (Some(since), Some(until)) = (self.since, self.until) {
            if since > until {
                return Err(QueryError::InvalidFilter(format!(
                    "date range is empty (since {since} is after until {until})"
                )));
            }
        }
        if matches!(self.conversation_id.as_deref(), Some(id) if id.trim().is_empty()) {
            return Err(QueryError::InvalidFilter("conversation id is empty".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub slot: usize,
    pub score: f32,
    pub role: Role,
    pub content: String,
    pub conversation_id: String,
    pub message_id: String,
    pub timestamp: i64,
    pub cluster_id: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct QueryOptions {
    pub max_top_k: usize,
    /// Candidate multiplier used when filters are present
    pub filter_overfetch_factor: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            max_top_k: 100,
            filter_overfetch_factor: 4,
        }
    }
}

/// Read-only search over an immutable snapshot. Cheap to share across threads.
#[derive(Clone)]
pub struct QueryEngine {
    snapshot: Arc<IndexSnapshot>,
    provider: Arc<dyn EmbeddingProvider>,
    options: QueryOptions,
}

impl QueryEngine {
    /// Fails when the snapshot was built by a different model than `provider`
    /// uses, since scores across models are meaningless.
    pub fn new(
        snapshot: Arc<IndexSnapshot>,
        provider: Arc<dyn EmbeddingProvider>,
        options: QueryOptions,
    ) -> Result<Self, QueryError> {
        if snapshot.model() != provider.model_name() {
            return Err(QueryError::ModelMismatch {
                index_model: snapshot.model().to_string(),
                provider_model: provider.model_name().to_string(),
            });
        }
        Ok(Self {
            snapshot,
            provider,
            options,
        })
    }

    pub fn snapshot(&self) -> &IndexSnapshot {
        &self.snapshot
    }

    /// Check query text, `top_k` and filters without touching a snapshot or
    /// provider.
    pub fn validate_request(
        query: &str,
        top_k: usize,
        filters: &SearchFilters,
        options: &QueryOptions,
    ) -> Result<(), QueryError> {
        if query.trim().is_empty() {
            return Err(QueryError::EmptyQuery);
        }
        if top_k == 0 || top_k > options.max_top_k {
            return Err(QueryError::InvalidTopK {
                top_k,
                max: options.max_top_k,
            });
        }
        filters.validate()
    }

    /// Return up to `top_k` messages most similar to `query`, best first.
    ///
    /// Equal scores are ordered by ascending slot. Input is validated before
    /// the embedding service is called.
    pub fn search(&self, query: &str, top_k: usize, filters: &SearchFilters) -> Result<Vec<SearchResult>, QueryError> {
        Self::validate_request(query, top_k, filters, &self.options)?;
        let query = query.trim();

        let corpus = self.snapshot.len();
        if corpus == 0 {
            return Ok(vec![]);
        }

        let _span = tracing::debug_span!("search", top_k, filtered = !filters.is_empty()).entered();

        let vector = self.provider.embed(query)?;
        if vector.is_empty() {
            return Err(QueryError::EmptyEmbedding);
        }

        let mut request = if filters.is_empty() {
            top_k
        } else {
            top_k.saturating_mul(self.options.filter_overfetch_factor.max(1))
        }
        .min(corpus);

        loop {
            let hits = self.snapshot.index().search(&vector, request)?;
            let results: Vec<SearchResult> = hits
                .iter()
                .filter_map(|hit| {
                    let entry = self.snapshot.entry(hit.slot)?;
                    filters.matches(&entry.record).then(|| SearchResult {
                        slot: hit.slot,
                        score: hit.score,
                        role: entry.record.role,
                        content: entry.record.content.clone(),
                        conversation_id: entry.record.conversation_id.clone(),
                        message_id: entry.record.message_id.clone(),
                        timestamp: entry.record.timestamp,
                        cluster_id: entry.cluster_id,
                    })
                })
                .take(top_k)
                .collect();

            if results.len() >= top_k || request >= corpus {
                log::debug!(
                    "Query matched {} results from {request} candidates",
                    results.len()
                );
                return Ok(results);
            }

            log::debug!(
                "Filters kept {} of {request} candidates, widening search",
                results.len()
            );
            request = request.saturating_mul(2).min(corpus);
        }
    }
}
