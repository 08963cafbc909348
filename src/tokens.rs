//! Token counting with the `cl100k_base` encoding, the one used by the
//! OpenAI embedding models. Limits on message and request size are
//! expressed in these tokens.

use once_cell::sync::OnceCell;
use tiktoken_rs::CoreBPE;

static CL100K: OnceCell<CoreBPE> = OnceCell::new();

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("failed to load the cl100k_base tokenizer: {0}")]
pub struct TokenizerError(String);

/// Cheap handle to the process-wide encoder.
#[derive(Clone, Copy)]
pub struct TokenCounter {
    encoding: &'static CoreBPE,
}

impl TokenCounter {
    /// The shared `cl100k_base` encoder, built on first use.
    pub fn cl100k() -> Result<Self, TokenizerError> {
        let encoding = CL100K.get_or_try_init(|| {
            tiktoken_rs::cl100k_base().map_err(|e| TokenizerError(e.to_string()))
        })?;
        Ok(Self { encoding })
    }

    pub fn count(&self, text: &str) -> usize {
        self.encoding.encode_ordinary(text).len()
    }
}
