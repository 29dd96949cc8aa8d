//! Strategy walk: first successful strategy produces the bundle

use crate::config::{EvidenceConfig, RulesConfig};
use crate::evidence::embedding::EmbeddingStrategy;
use crate::evidence::{
    chunk_text, keyword, CallCircuitBreaker, EmbeddingBackend, EvidenceBundle, EvidenceError,
    EvidenceOutcome, EvidenceSelected, EvidenceStats, EvidenceSummary, StrategyAttempt,
    STRATEGY_EMBEDDING, STRATEGY_KEYWORD,
};
use crate::excerpt::clip_chars;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    Embedding,
    Keyword,
}

impl Strategy {
    fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "embedding" | "embed" => Some(Self::Embedding),
            "keyword_stub" | "keyword" => Some(Self::Keyword),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Embedding => STRATEGY_EMBEDDING,
            Self::Keyword => STRATEGY_KEYWORD,
        }
    }

    fn enabled(self, config: &EvidenceConfig) -> bool {
        match self {
            Self::Embedding => config.embedding.enabled,
            Self::Keyword => config.keyword.enabled,
        }
    }
}

pub struct EvidenceSelector<'a> {
    config: &'a EvidenceConfig,
    backend: &'a dyn EmbeddingBackend,
}

impl<'a> EvidenceSelector<'a> {
    pub fn new(config: &'a EvidenceConfig, backend: &'a dyn EmbeddingBackend) -> Self {
        Self { config, backend }
    }

    /// Rank context chunks against the task.
    ///
    /// Never fails: strategy errors end up in `summary.attempts`, and a call
    /// where no strategy succeeds yields no bundle with outcome `disabled`.
    pub async fn select(
        &self,
        task: &str,
        context: &str,
    ) -> (Option<EvidenceBundle>, EvidenceSummary) {
        if !self.config.enabled {
            return (None, EvidenceSummary::disabled("evidence disabled", Vec::new()));
        }
        if context.is_empty() {
            return (None, EvidenceSummary::disabled("empty context", Vec::new()));
        }

        let started = Instant::now();
        let limit = self.config.max_context_chars_for_evidence;
        let (bounded, truncated) = clip_chars(context, limit);
        let chunks = chunk_text(bounded, self.config.chunk_chars);
        let top_k = self.config.top_k;

        let mut notes = Vec::new();
        if truncated {
            notes.push(format!("context truncated to {limit} chars for evidence"));
        }

        if chunks.is_empty() {
            notes.push("no chunks to rank".to_string());
            let bundle = self.bundle(
                STRATEGY_KEYWORD,
                Vec::new(),
                notes,
                0,
                truncated,
                started,
                Vec::new(),
            );
            let summary = summarize(EvidenceOutcome::Ok, &bundle);
            return (Some(bundle), summary);
        }

        let preference = if self.config.fallback_enabled {
            &self.config.strategy_preference[..]
        } else {
            let end = self.config.strategy_preference.len().min(1);
            &self.config.strategy_preference[..end]
        };

        let mut breaker = CallCircuitBreaker::new(&self.config.embedding.circuit_breaker);
        let mut attempts: Vec<StrategyAttempt> = Vec::new();

        for name in preference {
            let attempt_started = Instant::now();
            let Some(strategy) = Strategy::parse(name) else {
                let err = EvidenceError::UnknownStrategy { name: name.clone() };
                warn!(strategy = %name, "Skipping unknown evidence strategy");
                notes.push(format!("{name}: {}", err.error_type()));
                attempts.push(StrategyAttempt::failed(name, 0, &err, 0));
                continue;
            };
            if !strategy.enabled(self.config) {
                debug!(strategy = strategy.name(), "Evidence strategy disabled, skipping");
                continue;
            }

            let mut calls = 0u32;
            let result = match strategy {
                Strategy::Embedding => {
                    EmbeddingStrategy::new(&self.config.embedding, self.backend)
                        .select(task, &chunks, top_k, &mut breaker, &mut calls)
                        .await
                }
                Strategy::Keyword => Ok(keyword::select(
                    task,
                    &chunks,
                    top_k,
                    self.config.min_score,
                )),
            };
            let latency_ms = elapsed_ms(attempt_started);

            match result {
                Ok(selected) => {
                    attempts.push(StrategyAttempt::succeeded(strategy.name(), latency_ms, calls));
                    let outcome = if attempts.iter().any(|a| !a.ok) {
                        EvidenceOutcome::Fallback
                    } else {
                        EvidenceOutcome::Ok
                    };
                    let bundle = self.bundle(
                        strategy.name(),
                        selected,
                        notes,
                        chunks.len(),
                        truncated,
                        started,
                        attempts,
                    );
                    let summary = summarize(outcome, &bundle);
                    info!(
                        kind = %bundle.kind,
                        selected = bundle.selected.len(),
                        chunks = chunks.len(),
                        latency_ms = bundle.stats.latency_ms,
                        "Evidence selected"
                    );
                    return (Some(bundle), summary);
                }
                Err(err) => {
                    warn!(
                        strategy = strategy.name(),
                        error_type = err.error_type(),
                        calls,
                        "Evidence strategy failed: {err}"
                    );
                    notes.push(format!("{}: {}", strategy.name(), err.error_type()));
                    attempts.push(StrategyAttempt::failed(strategy.name(), latency_ms, &err, calls));
                }
            }
        }

        let reason = if attempts.is_empty() {
            "no evidence strategy available"
        } else {
            "all evidence strategies failed"
        };
        (None, EvidenceSummary::disabled(reason, attempts))
    }

    #[allow(clippy::too_many_arguments)]
    fn bundle(
        &self,
        kind: &str,
        selected: Vec<EvidenceSelected>,
        notes: Vec<String>,
        chunks_total: usize,
        truncated: bool,
        started: Instant,
        attempts: Vec<StrategyAttempt>,
    ) -> EvidenceBundle {
        EvidenceBundle {
            kind: kind.to_string(),
            top_k: self.config.top_k,
            stats: EvidenceStats {
                chunks_total,
                chunks_used: selected.len(),
                truncated,
                latency_ms: elapsed_ms(started),
                strategy_attempts: attempts,
            },
            selected,
            notes,
        }
    }
}

/// Select evidence using the evidence section of `rules`.
pub async fn select(
    task: &str,
    context: &str,
    rules: &RulesConfig,
    backend: &dyn EmbeddingBackend,
) -> (Option<EvidenceBundle>, EvidenceSummary) {
    EvidenceSelector::new(&rules.evidence, backend)
        .select(task, context)
        .await
}

fn summarize(outcome: EvidenceOutcome, bundle: &EvidenceBundle) -> EvidenceSummary {
    EvidenceSummary {
        outcome,
        kind: Some(bundle.kind.clone()),
        selected: bundle.selected.len(),
        reason: None,
        attempts: bundle.stats.strategy_attempts.clone(),
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::backend::MockEmbeddingBackend;

    const CONTEXT: &str = "Weather is sunny today. The ACME invoice is overdue. \
        Payment terms are net 30. Ping the team about lunch.";

    fn keyword_only() -> EvidenceConfig {
        EvidenceConfig {
            strategy_preference: vec!["keyword_stub".into()],
            chunk_chars: 25,
            top_k: 2,
            ..Default::default()
        }
    }

    fn embedding_first() -> EvidenceConfig {
        let mut cfg = keyword_only();
        cfg.strategy_preference = vec!["embedding".into(), "keyword_stub".into()];
        cfg.embedding.model = Some("test-embed".into());
        cfg
    }

    #[tokio::test]
    async fn test_disabled_and_empty_context() {
        let backend = MockEmbeddingBackend::new();
        let cfg = EvidenceConfig {
            enabled: false,
            ..keyword_only()
        };
        let (bundle, summary) = EvidenceSelector::new(&cfg, &backend).select("x", CONTEXT).await;
        assert!(bundle.is_none());
        assert_eq!(summary.outcome, EvidenceOutcome::Disabled);

        let cfg = keyword_only();
        let (bundle, summary) = EvidenceSelector::new(&cfg, &backend).select("x", "").await;
        assert!(bundle.is_none());
        assert_eq!(summary.reason.as_deref(), Some("empty context"));
    }

    #[tokio::test]
    async fn test_keyword_selection() {
        let backend = MockEmbeddingBackend::new();
        let cfg = keyword_only();
        let (bundle, summary) = EvidenceSelector::new(&cfg, &backend)
            .select("Is the ACME invoice overdue?", CONTEXT)
            .await;
        let bundle = bundle.unwrap();
        assert_eq!(bundle.kind, STRATEGY_KEYWORD);
        assert_eq!(summary.outcome, EvidenceOutcome::Ok);
        assert!(bundle.selected.len() <= 2);
        assert!(!bundle.selected.is_empty());
        assert_eq!(bundle.stats.chunks_used, bundle.selected.len());
        assert_eq!(bundle.stats.strategy_attempts.len(), 1);
        assert!(bundle.stats.strategy_attempts[0].ok);
    }

    #[tokio::test]
    async fn test_embedding_failure_falls_back_to_keyword() {
        let mut backend = MockEmbeddingBackend::new();
        backend
            .expect_health()
            .times(2)
            .returning(|_| Err(EvidenceError::backend("connection refused")));

        let cfg = embedding_first();
        let (bundle, summary) = EvidenceSelector::new(&cfg, &backend)
            .select("ACME invoice", CONTEXT)
            .await;

        let bundle = bundle.unwrap();
        assert_eq!(bundle.kind, STRATEGY_KEYWORD);
        assert_eq!(summary.outcome, EvidenceOutcome::Fallback);
        let first = &summary.attempts[0];
        assert_eq!(first.strategy, STRATEGY_EMBEDDING);
        assert!(first.circuit_open);
        assert_eq!(first.calls, 2);
        assert!(bundle.notes.iter().any(|n| n.contains("circuit_open")));
    }

    #[tokio::test]
    async fn test_unconfigured_embedding_is_recorded() {
        let backend = MockEmbeddingBackend::new();
        let mut cfg = embedding_first();
        cfg.embedding.model = None;
        let (bundle, summary) = EvidenceSelector::new(&cfg, &backend)
            .select("ACME invoice", CONTEXT)
            .await;
        assert!(bundle.is_some());
        assert_eq!(summary.outcome, EvidenceOutcome::Fallback);
        assert_eq!(summary.attempts[0].error_type.as_deref(), Some("not_configured"));
        assert!(!summary.attempts[0].circuit_open);
    }

    #[tokio::test]
    async fn test_no_fallback_uses_first_strategy_only() {
        let backend = MockEmbeddingBackend::new();
        let mut cfg = embedding_first();
        cfg.embedding.model = None;
        cfg.fallback_enabled = false;
        let (bundle, summary) = EvidenceSelector::new(&cfg, &backend)
            .select("ACME invoice", CONTEXT)
            .await;
        assert!(bundle.is_none());
        assert_eq!(summary.outcome, EvidenceOutcome::Disabled);
        assert_eq!(summary.attempts.len(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_entry_after_open_circuit_makes_no_calls() {
        let mut backend = MockEmbeddingBackend::new();
        backend
            .expect_health()
            .times(2)
            .returning(|_| Err(EvidenceError::backend("down")));

        let mut cfg = embedding_first();
        cfg.strategy_preference = vec!["embedding".into(), "embed".into(), "keyword".into()];
        let (_, summary) = EvidenceSelector::new(&cfg, &backend)
            .select("ACME invoice", CONTEXT)
            .await;

        assert_eq!(summary.attempts.len(), 3);
        assert!(summary.attempts[1].circuit_open);
        assert_eq!(summary.attempts[1].calls, 0);
        assert!(summary.attempts[2].ok);
    }

    #[tokio::test]
    async fn test_unknown_strategy_recorded() {
        let backend = MockEmbeddingBackend::new();
        let mut cfg = keyword_only();
        cfg.strategy_preference = vec!["bm25".into(), "keyword_stub".into()];
        let (_, summary) = EvidenceSelector::new(&cfg, &backend)
            .select("invoice", CONTEXT)
            .await;
        assert_eq!(summary.attempts[0].strategy, "bm25");
        assert_eq!(summary.attempts[0].error_type.as_deref(), Some("unknown_strategy"));
        assert_eq!(summary.outcome, EvidenceOutcome::Fallback);
    }

    #[tokio::test]
    async fn test_context_truncated_for_evidence() {
        let backend = MockEmbeddingBackend::new();
        let mut cfg = keyword_only();
        cfg.max_context_chars_for_evidence = 30;
        let (bundle, _) = EvidenceSelector::new(&cfg, &backend)
            .select("invoice", CONTEXT)
            .await;
        let bundle = bundle.unwrap();
        assert!(bundle.stats.truncated);
        assert_eq!(bundle.stats.chunks_total, 2);
        assert!(bundle.selected.iter().all(|s| s.end <= 30));
    }

    #[tokio::test]
    async fn test_zero_chunks_gives_empty_keyword_bundle() {
        let backend = MockEmbeddingBackend::new();
        let mut cfg = embedding_first();
        cfg.max_context_chars_for_evidence = 0;
        let (bundle, summary) = EvidenceSelector::new(&cfg, &backend)
            .select("invoice", CONTEXT)
            .await;
        let bundle = bundle.unwrap();
        assert_eq!(bundle.kind, STRATEGY_KEYWORD);
        assert!(bundle.selected.is_empty());
        assert_eq!(summary.outcome, EvidenceOutcome::Ok);
        assert!(summary.attempts.is_empty());
    }
}
