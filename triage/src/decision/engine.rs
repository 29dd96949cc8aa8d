//! Rule-based tiering and the priority checks shared by both modes

use crate::config::RulesConfig;
use crate::decision::sentinel::decide_sentinel;
use crate::tier::{LocalError, LocalSuggestion, SentinelResult, Tier};
use serde::{Deserialize, Serialize};

pub const FLAG_FORCE_HUMAN: &str = "FORCE_HUMAN";
pub const FLAG_ERROR_ESCALATION: &str = "ERROR_ESCALATION";
pub const FLAG_ROUTE_OVERRIDE: &str = "ROUTE_OVERRIDE";

/// Instruction attached to every human hand-off request
pub const HANDOFF_EXPECTED_OUTPUT: &str =
    "Reply with a short assessment of the task and the concrete next step the operator should take.";

const RATIONALE_MID_CONFIDENCE: &str = "confidence below LOCAL threshold; escalated to REMOTE";
const RATIONALE_LOW_CONFIDENCE: &str = "confidence too low for REMOTE";

/// Which rule produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    ForceHuman,
    ErrorEscalation,
    RouteOverride,
    LocalAccepted,
    MidConfidence,
    LowConfidence,
    SentinelAccepted,
    SentinelLowConfidence,
    SentinelMissing,
}

/// Structured hand-off payload for a human route override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffRequest {
    pub task: String,
    pub context: String,
    pub reason: String,
    pub expected_output: String,
}

/// Decision produced by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierDecision {
    pub tier: Tier,
    pub confidence: f64,
    pub rationale: String,
    pub flags: Vec<String>,
    pub source: DecisionSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_for_chatgpt: Option<HandoffRequest>,
}

impl TierDecision {
    fn new(
        tier: Tier,
        confidence: f64,
        rationale: impl Into<String>,
        source: DecisionSource,
    ) -> Self {
        Self {
            tier,
            confidence,
            rationale: rationale.into(),
            flags: Vec::new(),
            source,
            request_for_chatgpt: None,
        }
    }

    fn with_flag(mut self, flag: &str) -> Self {
        self.flags.push(flag.to_string());
        self
    }
}

/// Prior-stage signals for one task
#[derive(Debug, Clone, Copy, Default)]
pub struct DecisionSignals<'a> {
    /// Full task text; substring signals scan this, never an excerpt.
    pub task: &'a str,
    pub context: &'a str,
    /// Bounded texts for the hand-off payload (falls back to `task`/`context`)
    pub task_excerpt: Option<&'a str>,
    pub context_excerpt: Option<&'a str>,
    pub local: Option<&'a LocalSuggestion>,
    pub last_error: Option<&'a LocalError>,
    pub sentinel: Option<&'a SentinelResult>,
}

impl DecisionSignals<'_> {
    /// Text scanned by substring signals
    fn combined_lower(&self) -> String {
        format!("{}\n{}", self.task, self.context).to_lowercase()
    }
}

/// The Tier Decision Engine
pub struct TierEngine<'a> {
    rules: &'a RulesConfig,
}

impl<'a> TierEngine<'a> {
    pub fn new(rules: &'a RulesConfig) -> Self {
        Self { rules }
    }

    /// Full decision: priority checks, then sentinel or rule mode.
    pub fn decide(&self, signals: &DecisionSignals<'_>) -> TierDecision {
        if let Some(decision) = self.priority_override(signals) {
            return decision;
        }
        if self.rules.sentinel.enabled {
            decide_sentinel(signals.sentinel, &self.rules.sentinel)
        } else {
            self.rule_mode(signals)
        }
    }

    /// Checks that outrank both modes: force-human, then error escalation.
    pub fn priority_override(&self, signals: &DecisionSignals<'_>) -> Option<TierDecision> {
        self.force_human(signals)
            .or_else(|| signals.last_error.and_then(|e| self.error_escalation(e)))
    }

    /// Any `signals.force_human` substring in task + context → HUMAN 1.0
    pub fn force_human(&self, signals: &DecisionSignals<'_>) -> Option<TierDecision> {
        let haystack = signals.combined_lower();
        let matched: Vec<&str> = self
            .rules
            .signals
            .force_human
            .iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty() && haystack.contains(&s.to_lowercase()))
            .collect();

        if matched.is_empty() {
            return None;
        }
        tracing::debug!(signals = ?matched, "Force-human signal matched");
        Some(
            TierDecision::new(
                Tier::Human,
                1.0,
                format!("force-human signal matched: {}", matched.join(", ")),
                DecisionSource::ForceHuman,
            )
            .with_flag(FLAG_FORCE_HUMAN),
        )
    }

    /// Case-insensitive exact match of the error type against `error_escalations`
    pub fn error_escalation(&self, error: &LocalError) -> Option<TierDecision> {
        let wanted = error.error_type.trim();
        let entry = self
            .rules
            .error_escalations
            .iter()
            .find(|e| e.error_type.trim().eq_ignore_ascii_case(wanted))?;

        let rationale = entry
            .rationale
            .clone()
            .unwrap_or_else(|| format!("error escalation: {}", entry.error_type));
        Some(
            TierDecision::new(
                entry.tier,
                entry.confidence,
                rationale,
                DecisionSource::ErrorEscalation,
            )
            .with_flag(FLAG_ERROR_ESCALATION),
        )
    }

    /// Ordered rule evaluation; first match wins.
    pub fn rule_mode(&self, signals: &DecisionSignals<'_>) -> TierDecision {
        // 1-2: priority checks
        if let Some(decision) = self.priority_override(signals) {
            return decision;
        }

        let local_conf = signals.local.map_or(0.0, LocalSuggestion::confidence_or_zero);
        let local_tier = signals.local.and_then(|l| l.tier_suggestion);

        // 3: route override (only HUMAN is honored)
        let haystack = signals.combined_lower();
        if let Some(ov) = self.rules.route_overrides.iter().find(|ov| {
            ov.tier == Tier::Human && haystack.contains(&ov.pattern.to_lowercase())
        }) {
            let mut decision = TierDecision::new(
                Tier::Human,
                local_conf.max(self.rules.confidence_threshold_human),
                format!("route override: {}", ov.reason),
                DecisionSource::RouteOverride,
            )
            .with_flag(FLAG_ROUTE_OVERRIDE);
            decision.request_for_chatgpt = Some(HandoffRequest {
                task: signals.task_excerpt.unwrap_or(signals.task).to_string(),
                context: signals
                    .context_excerpt
                    .unwrap_or(signals.context)
                    .to_string(),
                reason: ov.reason.clone(),
                expected_output: HANDOFF_EXPECTED_OUTPUT.to_string(),
            });
            return decision;
        }

        // 4: high-confidence local
        if local_tier == Some(Tier::Local) && local_conf >= self.rules.confidence_threshold_remote
        {
            let rationale = signals
                .local
                .and_then(|l| l.rationale.clone())
                .unwrap_or_default();
            return TierDecision::new(
                Tier::Local,
                local_conf,
                rationale,
                DecisionSource::LocalAccepted,
            );
        }

        // 5: mid confidence
        if local_conf >= self.rules.confidence_threshold_human {
            return TierDecision::new(
                Tier::Remote,
                local_conf,
                RATIONALE_MID_CONFIDENCE,
                DecisionSource::MidConfidence,
            );
        }

        // 6: low confidence
        TierDecision::new(
            Tier::Human,
            local_conf,
            RATIONALE_LOW_CONFIDENCE,
            DecisionSource::LowConfidence,
        )
    }
}
