//! Parallel batch embedding.
//!
//! Texts are split into batches bounded by both a text count and a token
//! budget, which are embedded on a bounded rayon pool. Batch results are collected in batch order, so the returned
//! vectors line up with the input texts regardless of completion order.

use std::io::IsTerminal;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;

use crate::semantic::embeddings::{EmbeddingError, EmbeddingProvider};
use crate::tokens::TokenCounter;

/// Cooperative cancellation flag shared between the Ctrl-C handler and workers.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Debug)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// Token budget per request, counted with cl100k_base
    pub max_batch_tokens: usize,
    /// Number of batches in flight at once
    pub parallelism: usize,
    pub show_progress: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: 100,
            max_batch_tokens: 300_000,
            parallelism: 1,
            show_progress: false,
        }
    }
}

/// Embed `texts`, returning one vector per text in input order.
///
/// Cancellation is checked before each batch starts. After the first failed
/// batch no further batches are started; the earliest failure (in batch order)
/// is returned.
pub fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    options: &BatchOptions,
    cancel: &CancelToken,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    if texts.is_empty() {
        return Ok(vec![]);
    }

    let counter = TokenCounter::cl100k().map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;
    let token_counts: Vec<usize> = texts.iter().map(|t| counter.count(t)).collect();
    let batches: Vec<&[String]> = plan_batches(&token_counts, options.batch_size, options.max_batch_tokens)
        .into_iter()
        .map(|range| &texts[range])
        .collect();
    log::info!(
        "Embedding {} texts in {} batches ({} at a time) with '{}'",
        texts.len(),
        batches.len(),
        options.parallelism.max(1),
        provider.model_name()
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.parallelism.max(1))
        .thread_name(|i| format!("embed-{i}"))
        .build()
        .map_err(|e| EmbeddingError::InitFailed(format!("Failed to start embedding workers: {e}")))?;

    let bar = progress_bar(texts.len() as u64, options.show_progress);
    let failed = AtomicBool::new(false);

    let outcomes: Vec<Option<Result<Vec<Vec<f32>>, EmbeddingError>>> = pool.install(|| {
        batches
            .par_iter()
            .map(|batch| {
                if cancel.is_cancelled() || failed.load(Ordering::SeqCst) {
                    return None;
                }
                let result = embed_one(provider, batch);
                if result.is_err() {
                    failed.store(true, Ordering::SeqCst);
                }
                bar.inc(batch.len() as u64);
                Some(result)
            })
            .collect()
    });
    bar.finish_and_clear();

    if cancel.is_cancelled() {
        log::warn!("Embedding cancelled, discarding partial results");
        return Err(EmbeddingError::Cancelled);
    }

    let mut vectors = Vec::with_capacity(texts.len());
    let mut skipped = false;
    for outcome in outcomes {
        match outcome {
            Some(Ok(batch)) => vectors.extend(batch),
            Some(Err(err)) => return Err(err),
            None => skipped = true,
        }
    }
    if skipped {
        return Err(EmbeddingError::Cancelled);
    }

    Ok(vectors)
}

/// Split `token_counts.len()` texts into consecutive ranges holding at most
/// `batch_size` texts and at most `max_tokens` tokens. A single text over the
/// budget gets a batch of its own.
pub fn plan_batches(token_counts: &[usize], batch_size: usize, max_tokens: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::new();
    let mut start = 0;
    let mut tokens = 0usize;

    for (i, &count) in token_counts.iter().enumerate() {
        let full = i - start == batch_size || (i > start && tokens.saturating_add(count) > max_tokens);
        if full {
            batches.push(start..i);
            start = i;
            tokens = 0;
        }
        tokens = tokens.saturating_add(count);
    }
    if start < token_counts.len() {
        batches.push(start..token_counts.len());
    }
    batches
}

fn embed_one(provider: &dyn EmbeddingProvider, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let vectors = provider.embed_batch(batch)?;
    if vectors.len() != batch.len() {
        return Err(EmbeddingError::CountMismatch {
            expected: batch.len(),
            got: vectors.len(),
        });
    }
    Ok(vectors)
}

fn progress_bar(total: u64, enabled: bool) -> ProgressBar {
    if !enabled || !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} embedded")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}
