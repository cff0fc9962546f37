//! Token estimation.
//!
//! The history buffer charges every entry through a [`TokenEstimator`].
//! [`HeuristicEstimator`] uses ~4 characters per token and never fails;
//! [`TiktokenEstimator`] counts cl100k BPE tokens, which is what GLM and
//! GPT-4 class models bill close to.

use std::sync::Arc;
use tiktoken_rs::{CoreBPE, cl100k_base};

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 bytes. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.len().div_ceil(4)
}

/// A tokenizer could not produce a count.
#[derive(Debug, Clone, thiserror::Error)]
#[error("token estimation failed: {0}")]
pub struct EstimatorError(pub String);

/// Counts tokens for a specific model family.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> Result<usize, EstimatorError>;

    /// A short label for logs.
    fn name(&self) -> &str;
}

/// The length heuristic as an estimator.
#[derive(Debug, Default, Clone, Copy)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> Result<usize, EstimatorError> {
        Ok(estimate_tokens(text))
    }

    fn name(&self) -> &str {
        "heuristic"
    }
}

/// cl100k BPE token counts.
#[derive(Clone)]
pub struct TiktokenEstimator {
    bpe: Arc<CoreBPE>,
}

impl TiktokenEstimator {
    pub fn cl100k() -> Result<Self, EstimatorError> {
        let bpe = cl100k_base().map_err(|e| EstimatorError(e.to_string()))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenEstimator for TiktokenEstimator {
    fn estimate(&self, text: &str) -> Result<usize, EstimatorError> {
        Ok(self.bpe.encode_with_special_tokens(text).len())
    }

    fn name(&self) -> &str {
        "cl100k"
    }
}

/// Build the estimator named in config, falling back to the heuristic when
/// the BPE tables cannot be loaded.
pub fn estimator_for(kind: storyhelm_config::TokenizerKind) -> Arc<dyn TokenEstimator> {
    match kind {
        storyhelm_config::TokenizerKind::Heuristic => Arc::new(HeuristicEstimator),
        storyhelm_config::TokenizerKind::Cl100k => match TiktokenEstimator::cl100k() {
            Ok(estimator) => Arc::new(estimator),
            Err(e) => {
                tracing::warn!(error = %e, "cl100k tokenizer unavailable, using heuristic");
                Arc::new(HeuristicEstimator)
            }
        },
    }
}
