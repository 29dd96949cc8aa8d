//! Evidence Selector: ranked context excerpts with graceful degradation
//!
//! Chunks the (bounded) context and ranks chunks against the task using the
//! strategies named in `evidence.strategy_preference`, first success wins:
//!
//! ```text
//! select(task, context)
//!   ├─ evidence disabled / empty context  → no bundle, outcome=disabled
//!   ├─ zero chunks                        → empty keyword_stub bundle, no external call
//!   └─ for strategy in preference:
//!        ├─ embedding     health → embed query → embed chunks (sequential batches) → cosine
//!        │                failures feed a per-call circuit breaker
//!        └─ keyword_stub  token overlap, deterministic, no I/O
//! ```
//!
//! Backend failures never abort triage: they are recorded as
//! [`StrategyAttempt`]s and the next strategy is tried.

pub mod backend;
pub mod chunker;
pub mod circuit_breaker;
pub mod embedding;
pub mod keyword;
pub mod selector;

pub use backend::{BackendTarget, EmbeddingBackend, SubprocessBackend};
pub use chunker::{chunk_text, Chunk};
pub use circuit_breaker::CallCircuitBreaker;
pub use selector::{select, EvidenceSelector};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Strategy name of the embedding ranker
pub const STRATEGY_EMBEDDING: &str = "embedding";
/// Strategy name of the keyword fallback (also the kind of empty bundles)
pub const STRATEGY_KEYWORD: &str = "keyword_stub";

/// Evidence strategy failure. Never fatal to a triage call.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvidenceError {
    /// No model reference or command configured
    #[error("embedding backend not configured")]
    NotConfigured,

    /// External call exceeded its bound and was killed
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Backend refused or failed the request
    #[error("backend unavailable: {message}")]
    BackendUnavailable { message: String },

    /// Backend answered with something that is not a valid payload
    #[error("malformed backend response: {message}")]
    MalformedResponse { message: String },

    /// Failure budget for this call exhausted
    #[error("circuit open after {failures} failures (retry after {retry_after_ms}ms): {last}")]
    CircuitOpen {
        failures: u32,
        retry_after_ms: u64,
        last: Box<EvidenceError>,
    },

    /// Name in `strategy_preference` that no strategy answers to
    #[error("unknown evidence strategy: {name}")]
    UnknownStrategy { name: String },
}

impl EvidenceError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    /// Stable tag recorded on a failed attempt
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::Timeout { .. } => "timeout",
            Self::BackendUnavailable { .. } => "backend_unavailable",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::UnknownStrategy { .. } => "unknown_strategy",
        }
    }

    /// Whether this failure is counted by the circuit breaker
    pub fn counts_toward_breaker(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::BackendUnavailable { .. } | Self::MalformedResponse { .. }
        )
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }
}

/// One attempted strategy within one selection call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: String,
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub circuit_open: bool,
    /// External calls issued during this attempt
    pub calls: u32,
}

impl StrategyAttempt {
    pub fn succeeded(strategy: &str, latency_ms: u64, calls: u32) -> Self {
        Self {
            strategy: strategy.to_string(),
            ok: true,
            latency_ms,
            error_type: None,
            error: None,
            circuit_open: false,
            calls,
        }
    }

    pub fn failed(strategy: &str, latency_ms: u64, err: &EvidenceError, calls: u32) -> Self {
        Self {
            strategy: strategy.to_string(),
            ok: false,
            latency_ms,
            error_type: Some(err.error_type().to_string()),
            error: Some(err.to_string()),
            circuit_open: err.is_circuit_open(),
            calls,
        }
    }
}

/// A ranked chunk reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSelected {
    pub id: String,
    pub start: usize,
    pub end: usize,
    /// Cosine similarity (embedding) or token overlap count (keyword)
    pub score: f64,
}

impl EvidenceSelected {
    pub fn from_chunk(chunk: &Chunk, score: f64) -> Self {
        Self {
            id: chunk.id.clone(),
            start: chunk.start,
            end: chunk.end,
            score,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceStats {
    pub chunks_total: usize,
    /// Chunks that made it into `selected`
    pub chunks_used: usize,
    /// Context was clipped to `max_context_chars_for_evidence`
    pub truncated: bool,
    pub latency_ms: u64,
    pub strategy_attempts: Vec<StrategyAttempt>,
}

/// Ranked evidence produced by one selection call. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceBundle {
    /// Strategy that produced the selection
    pub kind: String,
    pub top_k: usize,
    pub selected: Vec<EvidenceSelected>,
    pub notes: Vec<String>,
    pub stats: EvidenceStats,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvidenceOutcome {
    /// First strategy tried succeeded
    Ok,
    /// An earlier strategy failed before a later one succeeded
    Fallback,
    /// No bundle was produced
    Disabled,
}

/// Outcome of a selection call, returned alongside the bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSummary {
    pub outcome: EvidenceOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub selected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub attempts: Vec<StrategyAttempt>,
}

impl EvidenceSummary {
    pub fn disabled(reason: impl Into<String>, attempts: Vec<StrategyAttempt>) -> Self {
        Self {
            outcome: EvidenceOutcome::Disabled,
            kind: None,
            selected: 0,
            reason: Some(reason.into()),
            attempts,
        }
    }
}

/// Sort by score descending, ties by ascending start, keep `top_k`.
/// `-0.0` and `0.0` tie.
pub fn rank(mut scored: Vec<EvidenceSelected>, top_k: usize) -> Vec<EvidenceSelected> {
    scored.sort_by(|a, b| {
        (b.score + 0.0)
            .total_cmp(&(a.score + 0.0))
            .then(a.start.cmp(&b.start))
    });
    scored.truncate(top_k);
    scored
}
