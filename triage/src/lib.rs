//! Task Triage Engine
//!
//! Decides, for one task at a time, whether it should be dropped or
//! processed, and if processed at which tier (LOCAL, REMOTE or HUMAN).
//!
//! # Stages
//!
//! - **Prefilter**: deterministic gate (source lists, drop/escalate rules)
//!   that can short-circuit the call
//! - **Excerpt Builder**: bounds task and context to character budgets
//! - **Tier Decision Engine**: force-human signals, error escalation, then
//!   sentinel or rule mode
//! - **Evidence Selector**: ranks context chunks against the task, embedding
//!   first with keyword fallback
//! - **Orchestrator**: runs the stages in order and appends an audit line
//!
//! # Usage
//!
//! ```bash
//! echo '{"task": "ping"}' | triage --rules config/triage_rules.yaml
//! ```

pub mod audit;
pub mod config;
pub mod decision;
pub mod error;
pub mod evidence;
pub mod excerpt;
pub mod orchestrator;
pub mod prefilter;
pub mod tier;

pub use audit::{AuditEvent, AuditLog};
pub use config::RulesConfig;
pub use decision::{DecisionSignals, HandoffRequest, TierDecision, TierEngine};
pub use error::{ErrorKind, StructuredError, TriageError, TriageResult};
pub use evidence::{
    EmbeddingBackend, EvidenceBundle, EvidenceError, EvidenceOutcome, EvidenceSelector,
    EvidenceSummary, SubprocessBackend,
};
pub use excerpt::Excerpt;
pub use orchestrator::{Triage, TriageAction, TriageInput, TriageOutput};
pub use prefilter::{PrefilterDecision, PrefilterResult};
pub use tier::{LocalError, LocalSuggestion, SentinelResult, Tier};
