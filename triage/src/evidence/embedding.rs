//! Embedding ranker
//!
//! One run: optional health check, embed the task as the query, embed the
//! chunks in sequential batches, score by cosine similarity. Failed runs are
//! retried inside the same attempt until the call's circuit breaker opens.

use crate::config::EmbeddingConfig;
use crate::evidence::{
    rank, BackendTarget, CallCircuitBreaker, Chunk, EmbeddingBackend, EvidenceError,
    EvidenceSelected, STRATEGY_EMBEDDING,
};
use tracing::{debug, warn};

pub struct EmbeddingStrategy<'a> {
    config: &'a EmbeddingConfig,
    backend: &'a dyn EmbeddingBackend,
}

impl<'a> EmbeddingStrategy<'a> {
    pub fn new(config: &'a EmbeddingConfig, backend: &'a dyn EmbeddingBackend) -> Self {
        Self { config, backend }
    }

    /// Rank `chunks` against `task`.
    ///
    /// `calls` is incremented for every backend call issued, including the
    /// ones belonging to failed runs.
    pub async fn select(
        &self,
        task: &str,
        chunks: &[Chunk],
        top_k: usize,
        breaker: &mut CallCircuitBreaker,
        calls: &mut u32,
    ) -> Result<Vec<EvidenceSelected>, EvidenceError> {
        let target = BackendTarget::from_config(self.config).ok_or(EvidenceError::NotConfigured)?;

        if breaker.is_open(STRATEGY_EMBEDDING) {
            return Err(EvidenceError::CircuitOpen {
                failures: breaker.failure_count(STRATEGY_EMBEDDING),
                retry_after_ms: breaker.cooloff_ms,
                last: Box::new(EvidenceError::backend(
                    "strategy already abandoned in this call",
                )),
            });
        }

        let mut tries = 0u32;
        loop {
            let err = match self.run(&target, task, chunks, top_k, calls).await {
                Ok(selected) => return Ok(selected),
                Err(err) if !err.counts_toward_breaker() => return Err(err),
                Err(err) => err,
            };

            tries += 1;
            let failures = breaker.record_failure(STRATEGY_EMBEDDING);
            warn!(
                model = %target.model,
                error_type = err.error_type(),
                failures,
                max_failures = breaker.max_failures,
                "Embedding run failed: {err}"
            );

            // `tries` bounds the loop even when the window forgets failures.
            if failures >= breaker.max_failures || tries >= breaker.max_failures {
                breaker.trip(STRATEGY_EMBEDDING);
                return Err(EvidenceError::CircuitOpen {
                    failures: failures.max(tries),
                    retry_after_ms: breaker.cooloff_ms,
                    last: Box::new(err),
                });
            }
        }
    }

    async fn run(
        &self,
        target: &BackendTarget,
        task: &str,
        chunks: &[Chunk],
        top_k: usize,
        calls: &mut u32,
    ) -> Result<Vec<EvidenceSelected>, EvidenceError> {
        if self.config.health_check {
            *calls += 1;
            self.backend.health(target).await?;
        }

        *calls += 1;
        let query = self
            .backend
            .embed(target, &[task.to_string()])
            .await?
            .into_iter()
            .next()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| EvidenceError::malformed("query embedding missing or empty"))?;

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.batch_size.max(1)) {
            *calls += 1;
            let embedded = self.backend.embed(target, batch).await?;
            if embedded.len() != batch.len() {
                return Err(EvidenceError::malformed(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    embedded.len()
                )));
            }
            vectors.extend(embedded);
        }

        if let Some(bad) = vectors.iter().find(|v| v.len() != query.len()) {
            return Err(EvidenceError::malformed(format!(
                "dimension mismatch: query {} vs chunk {}",
                query.len(),
                bad.len()
            )));
        }

        debug!(chunks = chunks.len(), dim = query.len(), "Scoring chunk embeddings");
        let scored = chunks
            .iter()
            .zip(&vectors)
            .map(|(chunk, v)| EvidenceSelected::from_chunk(chunk, cosine_similarity(&query, v)))
            .collect();
        Ok(rank(scored, top_k))
    }
}

/// Cosine similarity; 0.0 for mismatched lengths, zero vectors or non-finite results.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    let magnitude_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let magnitude_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    // `+ 0.0` folds -0.0 into 0.0
    let score = dot / (magnitude_a * magnitude_b) + 0.0;
    if score.is_finite() {
        score
    } else {
        0.0
    }
}
