//! Triage Orchestrator
//!
//! Fixed pipeline for one task:
//!
//! ```text
//! input ─▶ prefilter ─┬─ DROP      ─▶ output (no tier)
//!                     ├─ ESCALATE  ─▶ excerpt ─▶ evidence ─▶ output (prefilter tier)
//!                     └─ PASS      ─▶ excerpt ─▶ decision ─▶ evidence ─▶ output
//!                                                                   └─▶ audit line
//! ```
//!
//! The priority checks (force-human, last-error escalation) run before the
//! sentinel is consulted, so error-driven escalation always wins over
//! sentinel output.

use crate::audit::{AuditEvent, AuditLog};
use crate::config::RulesConfig;
use crate::decision::{DecisionSignals, HandoffRequest, TierEngine};
use crate::error::{TriageError, TriageResult};
use crate::evidence::{
    EmbeddingBackend, EvidenceBundle, EvidenceOutcome, EvidenceSelector, EvidenceSummary,
    SubprocessBackend,
};
use crate::excerpt::{self, Excerpt};
use crate::prefilter::{self, PrefilterDecision, PrefilterResult};
use crate::tier::{LocalError, LocalSuggestion, SentinelResult, Tier};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Added when evidence came from a later strategy after an earlier one failed
pub const FLAG_EVIDENCE_FALLBACK: &str = "EVIDENCE_FALLBACK";

/// Sentinel pipeline hints supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentinelHints {
    #[serde(default)]
    pub max_excerpt_chars: Option<usize>,
}

/// Excerpts prepared upstream; used in place of the raw text when present
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuppliedExcerpt {
    #[serde(default)]
    pub task_excerpt: Option<String>,
    #[serde(default)]
    pub context_excerpt: Option<String>,
}

/// One triage request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriageInput {
    /// Mandatory; `None` is rejected before any stage runs
    #[serde(default)]
    pub task: Option<String>,
    #[serde(default)]
    pub context: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub last_local_error: Option<LocalError>,
    #[serde(default)]
    pub local: Option<LocalSuggestion>,
    #[serde(default)]
    pub local_sentinel_result: Option<SentinelResult>,
    #[serde(default)]
    pub sentinel: Option<SentinelHints>,
    #[serde(default)]
    pub excerpt: Option<SuppliedExcerpt>,
}

impl TriageInput {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: Some(task.into()),
            ..Default::default()
        }
    }

    pub fn from_json(raw: &str) -> TriageResult<Self> {
        if raw.trim().is_empty() {
            return Err(TriageError::invalid_input("empty input document"));
        }
        let input: Self = serde_json::from_str(raw)?;
        input.validate()?;
        Ok(input)
    }

    pub fn validate(&self) -> TriageResult<()> {
        if self.task.is_none() {
            return Err(TriageError::MissingTask);
        }
        Ok(())
    }

    fn task(&self) -> TriageResult<&str> {
        self.task.as_deref().ok_or(TriageError::MissingTask)
    }

    fn context(&self) -> &str {
        self.context.as_deref().unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TriageAction {
    Drop,
    Process,
}

impl std::fmt::Display for TriageAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Drop => write!(f, "DROP"),
            Self::Process => write!(f, "PROCESS"),
        }
    }
}

/// Final decision record; `tier` is present iff `action` is PROCESS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageOutput {
    pub action: TriageAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    pub confidence: f64,
    pub rationale: String,
    pub flags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_for_chatgpt: Option<HandoffRequest>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence_bundle: Option<EvidenceBundle>,
}

impl TriageOutput {
    fn dropped(prefilter: &PrefilterResult) -> Self {
        Self {
            action: TriageAction::Drop,
            tier: None,
            confidence: prefilter.confidence.unwrap_or(1.0),
            rationale: prefilter.rationale.clone(),
            flags: merge_flags([prefilter.flags.as_slice()]),
            request_for_chatgpt: None,
            evidence_bundle: None,
        }
    }
}

/// The triage engine: rules, an embedding backend and an optional audit sink
pub struct Triage {
    rules: Arc<RulesConfig>,
    backend: Arc<dyn EmbeddingBackend>,
    audit: Option<AuditLog>,
}

impl Triage {
    /// Engine with the subprocess embedding backend and the audit log from `rules`
    pub fn new(rules: impl Into<Arc<RulesConfig>>) -> Self {
        let rules = rules.into();
        let backend = Arc::new(SubprocessBackend::from_config(&rules.evidence.embedding));
        let audit = rules
            .audit
            .enabled
            .then(|| AuditLog::new(&rules.audit.path));
        Self {
            rules,
            backend,
            audit,
        }
    }

    pub fn with_backend(mut self, backend: Arc<dyn EmbeddingBackend>) -> Self {
        self.backend = backend;
        self
    }

    /// Replace the audit sink; `None` disables auditing
    pub fn with_audit(mut self, audit: Option<AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn rules(&self) -> &RulesConfig {
        &self.rules
    }

    /// Run one triage call end to end.
    ///
    /// Only input errors fail the call. Evidence failures degrade to a
    /// missing bundle and audit failures are logged.
    pub async fn run(&self, input: &TriageInput) -> TriageResult<TriageOutput> {
        let task = input.task()?;
        let context = input.context();
        let rules = self.rules.as_ref();

        let gate = prefilter::evaluate(task, context, input.source.as_deref(), rules);
        debug!(
            decision = %gate.decision,
            task_chars = gate.stats.task_chars,
            context_chars = gate.stats.context_chars,
            matched_rule = ?gate.stats.matched_rule,
            "Prefilter evaluated"
        );

        let output = match gate.decision {
            PrefilterDecision::Drop => TriageOutput::dropped(&gate),
            PrefilterDecision::Escalate => {
                let excerpt = self.excerpt(input, task, context);
                let (bundle, summary) = self.evidence(&excerpt).await;
                TriageOutput {
                    action: TriageAction::Process,
                    tier: Some(gate.tier.unwrap_or(Tier::Remote)),
                    confidence: gate.confidence.unwrap_or_default(),
                    rationale: gate.rationale.clone(),
                    flags: with_evidence_flag(
                        merge_flags([gate.flags.as_slice(), excerpt.flags.as_slice()]),
                        &summary,
                    ),
                    request_for_chatgpt: None,
                    evidence_bundle: bundle,
                }
            }
            PrefilterDecision::Pass => {
                let excerpt = self.excerpt(input, task, context);
                let signals = DecisionSignals {
                    task,
                    context,
                    task_excerpt: Some(&excerpt.task_excerpt),
                    context_excerpt: Some(&excerpt.context_excerpt),
                    local: input.local.as_ref(),
                    last_error: input.last_local_error.as_ref(),
                    sentinel: input.local_sentinel_result.as_ref(),
                };
                let decision = TierEngine::new(rules).decide(&signals);
                debug!(tier = %decision.tier, source = ?decision.source, "Tier decided");

                let (bundle, summary) = self.evidence(&excerpt).await;
                TriageOutput {
                    action: TriageAction::Process,
                    tier: Some(decision.tier),
                    confidence: decision.confidence,
                    rationale: decision.rationale,
                    flags: with_evidence_flag(
                        merge_flags([
                            gate.flags.as_slice(),
                            excerpt.flags.as_slice(),
                            decision.flags.as_slice(),
                        ]),
                        &summary,
                    ),
                    request_for_chatgpt: decision.request_for_chatgpt,
                    evidence_bundle: bundle,
                }
            }
        };

        self.record(&output);
        info!(
            action = %output.action,
            tier = ?output.tier,
            confidence = output.confidence,
            flags = ?output.flags,
            "Triage complete"
        );
        Ok(output)
    }

    fn excerpt(&self, input: &TriageInput, task: &str, context: &str) -> Excerpt {
        let supplied = input.excerpt.as_ref();
        let task = supplied
            .and_then(|e| e.task_excerpt.as_deref())
            .unwrap_or(task);
        let context = supplied
            .and_then(|e| e.context_excerpt.as_deref())
            .unwrap_or(context);
        let cap = input.sentinel.as_ref().and_then(|s| s.max_excerpt_chars);
        excerpt::build(task, context, &self.rules, cap)
    }

    async fn evidence(&self, excerpt: &Excerpt) -> (Option<EvidenceBundle>, EvidenceSummary) {
        let (bundle, summary) = EvidenceSelector::new(&self.rules.evidence, self.backend.as_ref())
            .select(&excerpt.task_excerpt, &excerpt.context_excerpt)
            .await;
        debug!(
            outcome = ?summary.outcome,
            kind = ?summary.kind,
            selected = summary.selected,
            reason = ?summary.reason,
            "Evidence summary"
        );
        (bundle, summary)
    }

    fn record(&self, output: &TriageOutput) {
        let Some(audit) = &self.audit else {
            return;
        };
        if let Err(e) = audit.append(&AuditEvent::from_output(output)) {
            warn!(path = %audit.path().display(), "Failed to append audit event: {e}");
        }
    }
}

/// Concatenate flag lists, keeping the first occurrence of each flag
fn merge_flags<'a>(lists: impl IntoIterator<Item = &'a [String]>) -> Vec<String> {
    let mut flags: Vec<String> = Vec::new();
    for flag in lists.into_iter().flatten() {
        if !flags.contains(flag) {
            flags.push(flag.clone());
        }
    }
    flags
}

fn with_evidence_flag(mut flags: Vec<String>, summary: &EvidenceSummary) -> Vec<String> {
    if summary.outcome == EvidenceOutcome::Fallback
        && !flags.iter().any(|f| f == FLAG_EVIDENCE_FALLBACK)
    {
        flags.push(FLAG_EVIDENCE_FALLBACK.to_string());
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::backend::MockEmbeddingBackend;
    use crate::evidence::EvidenceError;

    fn quiet(rules: RulesConfig) -> Triage {
        Triage::new(rules)
            .with_backend(Arc::new(MockEmbeddingBackend::new()))
            .with_audit(None)
    }

    fn keyword_rules() -> RulesConfig {
        let mut rules = RulesConfig::default();
        rules.evidence.strategy_preference = vec!["keyword_stub".into()];
        rules
    }

    #[test]
    fn test_input_requires_task() {
        let err = TriageInput::from_json(r#"{"context": "x"}"#).unwrap_err();
        assert!(matches!(err, TriageError::MissingTask));
        assert!(TriageInput::from_json("   ").is_err());
        assert!(TriageInput::from_json("{not json").is_err());
        let ok = TriageInput::from_json(r#"{"task": "hello"}"#).unwrap();
        assert_eq!(ok.task.as_deref(), Some("hello"));
    }

    #[test]
    fn test_dedup_preserves_order() {
        let a = vec!["B".to_string(), "A".to_string()];
        let b = vec!["A".to_string(), "C".to_string(), "B".to_string()];
        assert_eq!(merge_flags([a.as_slice(), b.as_slice()]), ["B", "A", "C"]);
    }

    #[tokio::test]
    async fn test_missing_task_fails_before_pipeline() {
        let triage = quiet(RulesConfig::default());
        let err = triage.run(&TriageInput::default()).await.unwrap_err();
        assert!(matches!(err, TriageError::MissingTask));
    }

    #[tokio::test]
    async fn test_process_has_tier() {
        let triage = quiet(keyword_rules());
        let mut input = TriageInput::new("summarize the release notes");
        input.local = Some(LocalSuggestion {
            tier_suggestion: Some(Tier::Local),
            confidence: Some(0.95),
            rationale: Some("simple summary".into()),
        });
        let out = triage.run(&input).await.unwrap();
        assert_eq!(out.action, TriageAction::Process);
        assert_eq!(out.tier, Some(Tier::Local));
        assert_eq!(out.rationale, "simple summary");
        assert!(out.evidence_bundle.is_none());
    }

    #[tokio::test]
    async fn test_error_escalation_beats_sentinel() {
        let mut rules = keyword_rules();
        rules.sentinel.enabled = true;
        rules.error_escalations = vec![crate::config::ErrorEscalation {
            error_type: "OOM".into(),
            tier: Tier::Human,
            confidence: 0.9,
            rationale: None,
        }];
        let triage = quiet(rules);

        let mut input = TriageInput::new("train the model");
        input.last_local_error = Some(LocalError {
            error_type: "oom".into(),
            message: "out of memory".into(),
        });
        input.local_sentinel_result = Some(SentinelResult {
            tier_suggestion: Some(Tier::Local),
            confidence: Some(0.99),
            rationale: Some("easy".into()),
            labels: vec![],
        });

        let out = triage.run(&input).await.unwrap();
        assert_eq!(out.tier, Some(Tier::Human));
        assert_eq!(out.confidence, 0.9);
        assert!(out.flags.contains(&"ERROR_ESCALATION".to_string()));
    }

    #[tokio::test]
    async fn test_evidence_fallback_flag() {
        let mut rules = RulesConfig::default();
        rules.evidence.embedding.model = Some("test-embed".into());
        rules.evidence.chunk_chars = 20;
        let mut backend = MockEmbeddingBackend::new();
        backend
            .expect_health()
            .returning(|_| Err(EvidenceError::backend("down")));
        let triage = Triage::new(rules)
            .with_backend(Arc::new(backend))
            .with_audit(None);

        let mut input = TriageInput::new("check the invoice total");
        input.context = Some("the invoice total is 40 EUR. shipping is free.".into());
        let out = triage.run(&input).await.unwrap();

        let bundle = out.evidence_bundle.unwrap();
        assert_eq!(bundle.kind, "keyword_stub");
        assert!(out.flags.contains(&FLAG_EVIDENCE_FALLBACK.to_string()));
    }

    #[tokio::test]
    async fn test_supplied_excerpt_and_cap() {
        let triage = quiet(keyword_rules());
        let mut input = TriageInput::new("raw task text that is long");
        input.excerpt = Some(SuppliedExcerpt {
            task_excerpt: Some("short task".into()),
            context_excerpt: None,
        });
        input.sentinel = Some(SentinelHints {
            max_excerpt_chars: Some(5),
        });
        let out = triage.run(&input).await.unwrap();
        assert!(out.flags.contains(&"TASK_TRUNCATED".to_string()));
    }

    fn force_human_rules() -> RulesConfig {
        let mut rules = keyword_rules();
        rules.signals.force_human = vec!["delete prod".into()];
        rules
    }

    fn confident_local() -> Option<LocalSuggestion> {
        Some(LocalSuggestion {
            tier_suggestion: Some(Tier::Local),
            confidence: Some(0.95),
            rationale: Some("easy".into()),
        })
    }

    #[tokio::test]
    async fn test_force_human_survives_excerpt_cap() {
        let triage = quiet(force_human_rules());
        let mut input = TriageInput::new("please delete prod data now");
        input.local = confident_local();
        input.sentinel = Some(SentinelHints {
            max_excerpt_chars: Some(10),
        });
        let out = triage.run(&input).await.unwrap();
        assert_eq!(out.tier, Some(Tier::Human));
        assert_eq!(out.confidence, 1.0);
        assert!(out.flags.contains(&"TASK_TRUNCATED".to_string()));
        assert!(out.flags.contains(&"FORCE_HUMAN".to_string()));
    }

    #[tokio::test]
    async fn test_force_human_survives_supplied_excerpt() {
        let triage = quiet(force_human_rules());
        let mut input = TriageInput::new("please delete prod data now");
        input.local = confident_local();
        input.excerpt = Some(SuppliedExcerpt {
            task_excerpt: Some("please tidy data".into()),
            context_excerpt: None,
        });
        let out = triage.run(&input).await.unwrap();
        assert_eq!(out.tier, Some(Tier::Human));
    }

    #[tokio::test]
    async fn test_force_human_found_past_context_budget() {
        let mut rules = force_human_rules();
        rules.prefilter.enabled = false;
        let max = rules.excerpt.max_context_chars;
        let triage = quiet(rules);

        let mut input = TriageInput::new("tidy the log");
        input.local = confident_local();
        input.context = Some(format!("{} then delete prod", "x".repeat(max)));
        let out = triage.run(&input).await.unwrap();
        assert_eq!(out.tier, Some(Tier::Human));
        assert_eq!(out.confidence, 1.0);
        assert!(out.flags.contains(&"CONTEXT_TRUNCATED".to_string()));
    }

    #[tokio::test]
    async fn test_audit_failure_does_not_fail_call() {
        let dir = tempfile::TempDir::new().unwrap();
        let triage = quiet(keyword_rules()).with_audit(Some(AuditLog::new(dir.path())));
        let out = triage.run(&TriageInput::new("anything")).await.unwrap();
        assert_eq!(out.action, TriageAction::Process);
    }
}
