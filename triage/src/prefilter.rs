//! Prefilter: cheap deterministic gate before any model step
//!
//! Evaluation order (first match wins):
//!
//! ```text
//! disabled            → PASS
//! source denylisted   → ESCALATE HUMAN 0.95
//! source not allowed  → ESCALATE REMOTE 0.85
//! drop_if[..]         → DROP
//! escalate_if[..]     → ESCALATE (rule tier/confidence, default REMOTE 0.8)
//! otherwise           → PASS
//! ```
//!
//! Size flags are computed independently of the decision and are always
//! reported, including on PASS.

use crate::config::{PrefilterConfig, PrefilterRule, RuleCondition, RulesConfig};
use crate::tier::Tier;
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const FLAG_TASK_TOO_LARGE: &str = "TASK_TOO_LARGE";
pub const FLAG_CONTEXT_TOO_LARGE: &str = "CONTEXT_TOO_LARGE";
pub const FLAG_PREFILTER_DROP: &str = "PREFILTER_DROP";
pub const FLAG_PREFILTER_ESCALATE: &str = "PREFILTER_ESCALATE";
pub const FLAG_SOURCE_DENYLISTED: &str = "SOURCE_DENYLISTED";
pub const FLAG_SOURCE_NOT_ALLOWLISTED: &str = "SOURCE_NOT_ALLOWLISTED";

const DENYLIST_CONFIDENCE: f64 = 0.95;
const ALLOWLIST_CONFIDENCE: f64 = 0.85;
const DROP_CONFIDENCE: f64 = 1.0;
const ESCALATE_CONFIDENCE: f64 = 0.8;

/// Outcome of the gate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PrefilterDecision {
    Pass,
    Drop,
    Escalate,
}

impl std::fmt::Display for PrefilterDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "PASS"),
            Self::Drop => write!(f, "DROP"),
            Self::Escalate => write!(f, "ESCALATE"),
        }
    }
}

/// Size measurements taken on every evaluation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefilterStats {
    pub task_chars: usize,
    pub context_chars: usize,
    pub task_too_large: bool,
    pub context_too_large: bool,
    /// Label of the rule that decided, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<String>,
}

/// Result of [`evaluate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefilterResult {
    pub decision: PrefilterDecision,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    pub rationale: String,
    pub flags: Vec<String>,
    pub stats: PrefilterStats,
}

/// A rule pattern after compilation. Malformed patterns never match.
#[derive(Debug)]
enum Pattern {
    Valid(Regex),
    Malformed,
}

impl Pattern {
    fn compile(source: &str, rule_label: &str) -> Self {
        match Regex::new(source) {
            Ok(re) => Self::Valid(re),
            Err(e) => {
                tracing::warn!(
                    rule = rule_label,
                    pattern = source,
                    "Malformed prefilter pattern treated as non-matching: {e}"
                );
                Self::Malformed
            }
        }
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            Self::Valid(re) => re.is_match(text),
            Self::Malformed => false,
        }
    }
}

#[derive(Debug)]
struct CompiledRule<'a> {
    rule: &'a PrefilterRule,
    label: String,
    task_re: Option<Pattern>,
    context_re: Option<Pattern>,
}

impl<'a> CompiledRule<'a> {
    fn new(rule: &'a PrefilterRule, index: usize) -> Self {
        let label = rule.label(index);
        let RuleCondition {
            task_regex,
            context_regex,
            ..
        } = &rule.when;
        Self {
            task_re: task_regex.as_deref().map(|p| Pattern::compile(p, &label)),
            context_re: context_regex.as_deref().map(|p| Pattern::compile(p, &label)),
            rule,
            label,
        }
    }

    /// True iff every specified sub-condition holds. An empty condition never matches.
    fn matches(&self, task: &str, context: &str, stats: &PrefilterStats) -> bool {
        let when = &self.rule.when;
        if when.is_empty() {
            return false;
        }
        self.task_re.as_ref().map_or(true, |p| p.is_match(task))
            && self.context_re.as_ref().map_or(true, |p| p.is_match(context))
            && when
                .task_too_large
                .map_or(true, |want| want == stats.task_too_large)
            && when
                .context_too_large
                .map_or(true, |want| want == stats.context_too_large)
    }
}

/// Compiled prefilter for one rules document
#[derive(Debug)]
pub struct Prefilter<'a> {
    config: &'a PrefilterConfig,
    drop_rules: Vec<CompiledRule<'a>>,
    escalate_rules: Vec<CompiledRule<'a>>,
}

impl<'a> Prefilter<'a> {
    pub fn new(config: &'a PrefilterConfig) -> Self {
        Self {
            config,
            drop_rules: compile_all(&config.drop_if),
            escalate_rules: compile_all(&config.escalate_if),
        }
    }

    /// Measure sizes against the configured limits
    pub fn measure(&self, task: &str, context: &str) -> PrefilterStats {
        let task_chars = task.chars().count();
        let context_chars = context.chars().count();
        PrefilterStats {
            task_chars,
            context_chars,
            task_too_large: task_chars > self.config.max_task_chars,
            context_too_large: context_chars > self.config.max_context_chars,
            matched_rule: None,
        }
    }

    /// Run the gate. Pure: identical inputs give identical results.
    pub fn evaluate(&self, task: &str, context: &str, source: Option<&str>) -> PrefilterResult {
        let mut stats = self.measure(task, context);
        let mut flags = Vec::new();
        if stats.task_too_large {
            flags.push(FLAG_TASK_TOO_LARGE.to_string());
        }
        if stats.context_too_large {
            flags.push(FLAG_CONTEXT_TOO_LARGE.to_string());
        }

        if !self.config.enabled {
            return PrefilterResult {
                decision: PrefilterDecision::Pass,
                tier: None,
                confidence: None,
                rationale: "prefilter disabled".to_string(),
                flags,
                stats,
            };
        }

        let source = source.map(str::trim).filter(|s| !s.is_empty());

        if let Some(src) = source {
            if contains_ignore_case(&self.config.denylist_sources, src) {
                flags.push(FLAG_SOURCE_DENYLISTED.to_string());
                flags.push(FLAG_PREFILTER_ESCALATE.to_string());
                return PrefilterResult {
                    decision: PrefilterDecision::Escalate,
                    tier: Some(Tier::Human),
                    confidence: Some(DENYLIST_CONFIDENCE),
                    rationale: format!("source '{src}' is denylisted"),
                    flags,
                    stats,
                };
            }
            if !self.config.allowlist_sources.is_empty()
                && !contains_ignore_case(&self.config.allowlist_sources, src)
            {
                flags.push(FLAG_SOURCE_NOT_ALLOWLISTED.to_string());
                flags.push(FLAG_PREFILTER_ESCALATE.to_string());
                return PrefilterResult {
                    decision: PrefilterDecision::Escalate,
                    tier: Some(Tier::Remote),
                    confidence: Some(ALLOWLIST_CONFIDENCE),
                    rationale: format!("source '{src}' is not allowlisted"),
                    flags,
                    stats,
                };
            }
        }

        if let Some(rule) = self
            .drop_rules
            .iter()
            .find(|r| r.matches(task, context, &stats))
        {
            flags.push(FLAG_PREFILTER_DROP.to_string());
            stats.matched_rule = Some(rule.label.clone());
            return PrefilterResult {
                decision: PrefilterDecision::Drop,
                tier: None,
                confidence: Some(rule.rule.confidence.unwrap_or(DROP_CONFIDENCE)),
                rationale: rule
                    .rule
                    .rationale
                    .clone()
                    .unwrap_or_else(|| format!("dropped by prefilter rule {}", rule.label)),
                flags,
                stats,
            };
        }

        if let Some(rule) = self
            .escalate_rules
            .iter()
            .find(|r| r.matches(task, context, &stats))
        {
            flags.push(FLAG_PREFILTER_ESCALATE.to_string());
            stats.matched_rule = Some(rule.label.clone());
            return PrefilterResult {
                decision: PrefilterDecision::Escalate,
                tier: Some(rule.rule.tier.unwrap_or(Tier::Remote)),
                confidence: Some(rule.rule.confidence.unwrap_or(ESCALATE_CONFIDENCE)),
                rationale: rule
                    .rule
                    .rationale
                    .clone()
                    .unwrap_or_else(|| format!("escalated by prefilter rule {}", rule.label)),
                flags,
                stats,
            };
        }

        PrefilterResult {
            decision: PrefilterDecision::Pass,
            tier: None,
            confidence: None,
            rationale: "prefilter pass".to_string(),
            flags,
            stats,
        }
    }
}

/// One-shot evaluation against a rules document
pub fn evaluate(
    task: &str,
    context: &str,
    source: Option<&str>,
    rules: &RulesConfig,
) -> PrefilterResult {
    Prefilter::new(&rules.prefilter).evaluate(task, context, source)
}

fn compile_all(rules: &[PrefilterRule]) -> Vec<CompiledRule<'_>> {
    rules
        .iter()
        .enumerate()
        .map(|(i, r)| CompiledRule::new(r, i))
        .collect()
}

fn contains_ignore_case(list: &[String], needle: &str) -> bool {
    let needle = needle.to_lowercase();
    list.iter().any(|s| s.trim().to_lowercase() == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn when_task(re: &str) -> RuleCondition {
        RuleCondition {
            task_regex: Some(re.to_string()),
            ..Default::default()
        }
    }

    fn rules() -> RulesConfig {
        let mut r = RulesConfig::default();
        r.prefilter.max_task_chars = 50;
        r.prefilter.max_context_chars = 12000;
        r.prefilter.drop_if = vec![PrefilterRule {
            name: Some("trivial".into()),
            when: when_task(r"(?i)^\s*(ping|test|hello)\s*$"),
            rationale: Some("trivial task".into()),
            ..Default::default()
        }];
        r.prefilter.escalate_if = vec![PrefilterRule {
            name: Some("big-context".into()),
            when: RuleCondition {
                context_too_large: Some(true),
                ..Default::default()
            },
            rationale: Some("context too large for local".into()),
            tier: Some(Tier::Remote),
            confidence: Some(0.85),
        }];
        r
    }

    #[test]
    fn test_trivial_task_dropped() {
        let res = evaluate("PING", "", None, &rules());
        assert_eq!(res.decision, PrefilterDecision::Drop);
        assert_eq!(res.rationale, "trivial task");
        assert_eq!(res.tier, None);
        assert_eq!(res.stats.matched_rule.as_deref(), Some("trivial"));
        assert!(res.flags.contains(&FLAG_PREFILTER_DROP.to_string()));
    }

    #[test]
    fn test_large_context_escalates() {
        let context = "x".repeat(13000);
        let res = evaluate("summarize the log", &context, None, &rules());
        assert_eq!(res.decision, PrefilterDecision::Escalate);
        assert_eq!(res.tier, Some(Tier::Remote));
        assert_eq!(res.confidence, Some(0.85));
        assert!(res.flags.contains(&FLAG_CONTEXT_TOO_LARGE.to_string()));
    }

    #[test]
    fn test_size_flags_present_on_pass() {
        let mut r = rules();
        r.prefilter.escalate_if.clear();
        let res = evaluate("a".repeat(60).as_str(), "ctx", None, &r);
        assert_eq!(res.decision, PrefilterDecision::Pass);
        assert_eq!(res.rationale, "prefilter pass");
        assert_eq!(res.flags, vec![FLAG_TASK_TOO_LARGE]);
        assert!(res.stats.task_too_large);
        assert_eq!(res.stats.task_chars, 60);
    }

    #[test]
    fn test_disabled_passes_but_measures() {
        let mut r = rules();
        r.prefilter.enabled = false;
        r.prefilter.denylist_sources = vec!["bad".into()];
        let res = evaluate("ping", &"x".repeat(13000), Some("bad"), &r);
        assert_eq!(res.decision, PrefilterDecision::Pass);
        assert_eq!(res.rationale, "prefilter disabled");
        assert!(res.stats.context_too_large);
    }

    #[test]
    fn test_denylist_beats_allowlist_and_rules() {
        let mut r = rules();
        r.prefilter.denylist_sources = vec!["Spam-Bot".into()];
        r.prefilter.allowlist_sources = vec!["mail".into()];
        let res = evaluate("ping", "", Some("spam-bot"), &r);
        assert_eq!(res.decision, PrefilterDecision::Escalate);
        assert_eq!(res.tier, Some(Tier::Human));
        assert_eq!(res.confidence, Some(0.95));
        assert!(res.flags.contains(&FLAG_SOURCE_DENYLISTED.to_string()));
    }

    #[test]
    fn test_allowlist_miss_escalates_remote() {
        let mut r = rules();
        r.prefilter.allowlist_sources = vec!["mail".into(), "calendar".into()];
        let res = evaluate("ping", "", Some("telegram"), &r);
        assert_eq!(res.decision, PrefilterDecision::Escalate);
        assert_eq!(res.tier, Some(Tier::Remote));
        assert_eq!(res.confidence, Some(0.85));

        // Allowed source falls through to rules
        let res = evaluate("ping", "", Some("MAIL"), &r);
        assert_eq!(res.decision, PrefilterDecision::Drop);

        // Missing source skips the allowlist check
        let res = evaluate("ping", "", None, &r);
        assert_eq!(res.decision, PrefilterDecision::Drop);
    }

    #[test]
    fn test_malformed_regex_never_matches() {
        let mut r = rules();
        r.prefilter.drop_if.insert(
            0,
            PrefilterRule {
                when: when_task("(unclosed"),
                ..Default::default()
            },
        );
        let res = evaluate("ping", "", None, &r);
        assert_eq!(res.decision, PrefilterDecision::Drop);
        assert_eq!(res.stats.matched_rule.as_deref(), Some("trivial"));
    }

    #[test]
    fn test_all_subconditions_required() {
        let mut r = RulesConfig::default();
        r.prefilter.max_context_chars = 10;
        r.prefilter.escalate_if = vec![PrefilterRule {
            when: RuleCondition {
                task_regex: Some("(?i)invoice".into()),
                context_too_large: Some(true),
                ..Default::default()
            },
            ..Default::default()
        }];
        let small = evaluate("Invoice #42", "short", None, &r);
        assert_eq!(small.decision, PrefilterDecision::Pass);

        let large = evaluate("Invoice #42", "a much longer context", None, &r);
        assert_eq!(large.decision, PrefilterDecision::Escalate);
        assert_eq!(large.tier, Some(Tier::Remote));
        assert_eq!(large.confidence, Some(0.8));
        assert_eq!(large.rationale, "escalated by prefilter rule rule[0]");
    }

    fn when_context(re: &str) -> RuleCondition {
        RuleCondition {
            context_regex: Some(re.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_context_regex_alone_drops() {
        let mut r = RulesConfig::default();
        r.prefilter.drop_if = vec![PrefilterRule {
            name: Some("newsletter".into()),
            when: when_context(r"unsubscribe"),
            rationale: Some("bulk mail".into()),
            ..Default::default()
        }];
        let res = evaluate("read this", "click to unsubscribe", None, &r);
        assert_eq!(res.decision, PrefilterDecision::Drop);
        assert_eq!(res.rationale, "bulk mail");
        assert_eq!(res.stats.matched_rule.as_deref(), Some("newsletter"));

        // The pattern is not applied to the task
        let res = evaluate("unsubscribe me", "hello", None, &r);
        assert_eq!(res.decision, PrefilterDecision::Pass);

        // Case-sensitive without (?i)
        let res = evaluate("read this", "UNSUBSCRIBE", None, &r);
        assert_eq!(res.decision, PrefilterDecision::Pass);
    }

    #[test]
    fn test_task_and_context_regex_both_required() {
        let mut r = RulesConfig::default();
        r.prefilter.escalate_if = vec![PrefilterRule {
            name: Some("payroll".into()),
            when: RuleCondition {
                task_regex: Some("^fix".into()),
                context_regex: Some("salary".into()),
                ..Default::default()
            },
            tier: Some(Tier::Human),
            confidence: Some(0.9),
            ..Default::default()
        }];
        let both = evaluate("fix the report", "salary table", None, &r);
        assert_eq!(both.decision, PrefilterDecision::Escalate);
        assert_eq!(both.tier, Some(Tier::Human));
        assert_eq!(both.confidence, Some(0.9));

        let task_miss = evaluate("read the report", "salary table", None, &r);
        assert_eq!(task_miss.decision, PrefilterDecision::Pass);

        let context_miss = evaluate("fix the report", "expense table", None, &r);
        assert_eq!(context_miss.decision, PrefilterDecision::Pass);
    }

    #[test]
    fn test_case_insensitive_context_regex() {
        let mut r = RulesConfig::default();
        r.prefilter.escalate_if = vec![PrefilterRule {
            when: when_context("(?i)password"),
            ..Default::default()
        }];
        let res = evaluate("summarize", "reset your PassWord here", None, &r);
        assert_eq!(res.decision, PrefilterDecision::Escalate);
        assert_eq!(res.tier, Some(Tier::Remote));
        assert!(res.flags.contains(&FLAG_PREFILTER_ESCALATE.to_string()));
    }

    #[test]
    fn test_empty_condition_never_matches() {
        let mut r = RulesConfig::default();
        r.prefilter.drop_if = vec![PrefilterRule::default()];
        let res = evaluate("anything", "", None, &r);
        assert_eq!(res.decision, PrefilterDecision::Pass);
    }

    #[test]
    fn test_evaluate_is_idempotent() {
        let r = rules();
        let ctx = "y".repeat(12500);
        let a = evaluate("check", &ctx, Some("mail"), &r);
        let b = evaluate("check", &ctx, Some("mail"), &r);
        assert_eq!(a, b);
    }
}
