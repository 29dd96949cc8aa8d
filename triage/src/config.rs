//! Rules configuration
//!
//! One typed, versioned document loaded once per process. Defaults are
//! applied here at load time so consumers never re-check optional fields.
//! The document is read-only after [`RulesConfig::load`] returns.

use crate::error::{TriageError, TriageResult};
use crate::tier::Tier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Rules document version understood by this build
pub const SUPPORTED_RULES_VERSION: u32 = 1;

/// Environment variable naming the rules file
pub const RULES_PATH_ENV: &str = "TRIAGE_RULES";

/// File name searched for next to the installation
pub const DEFAULT_RULES_FILE: &str = "triage_rules.yaml";

/// Top-level rules document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub version: u32,
    /// Minimum local confidence to keep a LOCAL suggestion
    pub confidence_threshold_remote: f64,
    /// Minimum local confidence to avoid HUMAN
    pub confidence_threshold_human: f64,
    pub signals: SignalsConfig,
    pub error_escalations: Vec<ErrorEscalation>,
    pub route_overrides: Vec<RouteOverride>,
    pub prefilter: PrefilterConfig,
    pub evidence: EvidenceConfig,
    pub sentinel: SentinelConfig,
    pub excerpt: ExcerptConfig,
    pub audit: AuditConfig,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_RULES_VERSION,
            confidence_threshold_remote: 0.8,
            confidence_threshold_human: 0.5,
            signals: SignalsConfig::default(),
            error_escalations: Vec::new(),
            route_overrides: Vec::new(),
            prefilter: PrefilterConfig::default(),
            evidence: EvidenceConfig::default(),
            sentinel: SentinelConfig::default(),
            excerpt: ExcerptConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

/// Substring signals scanned over task + context
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalsConfig {
    /// Any case-insensitive match forces HUMAN at confidence 1.0
    pub force_human: Vec<String>,
}

/// Escalation keyed by the local process's last error type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEscalation {
    #[serde(rename = "type")]
    pub error_type: String,
    pub tier: Tier,
    #[serde(default = "default_rule_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub rationale: Option<String>,
}

/// Substring-triggered route override
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteOverride {
    #[serde(rename = "match")]
    pub pattern: String,
    pub tier: Tier,
    #[serde(default)]
    pub reason: String,
}

/// Prefilter gate settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefilterConfig {
    pub enabled: bool,
    pub max_task_chars: usize,
    pub max_context_chars: usize,
    pub allowlist_sources: Vec<String>,
    pub denylist_sources: Vec<String>,
    pub drop_if: Vec<PrefilterRule>,
    pub escalate_if: Vec<PrefilterRule>,
}

impl Default for PrefilterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_task_chars: 4000,
            max_context_chars: 12000,
            allowlist_sources: Vec::new(),
            denylist_sources: Vec::new(),
            drop_if: Vec::new(),
            escalate_if: Vec::new(),
        }
    }
}

/// One `drop_if` / `escalate_if` entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefilterRule {
    pub name: Option<String>,
    pub when: RuleCondition,
    pub rationale: Option<String>,
    /// Escalation tier (escalate_if only; defaults to REMOTE)
    pub tier: Option<Tier>,
    pub confidence: Option<f64>,
}

impl PrefilterRule {
    /// Label used in stats and logs
    pub fn label(&self, index: usize) -> String {
        self.name.clone().unwrap_or_else(|| format!("rule[{index}]"))
    }
}

/// Predicate of a prefilter rule; every specified field must hold
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleCondition {
    pub task_regex: Option<String>,
    pub context_regex: Option<String>,
    pub task_too_large: Option<bool>,
    pub context_too_large: Option<bool>,
}

impl RuleCondition {
    /// Whether no sub-condition is specified
    pub fn is_empty(&self) -> bool {
        self.task_regex.is_none()
            && self.context_regex.is_none()
            && self.task_too_large.is_none()
            && self.context_too_large.is_none()
    }
}

/// Evidence selection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidenceConfig {
    pub enabled: bool,
    /// Strategy names in preference order
    pub strategy_preference: Vec<String>,
    pub chunk_chars: usize,
    pub top_k: usize,
    /// Minimum keyword overlap for the keyword strategy
    pub min_score: f64,
    pub max_context_chars_for_evidence: usize,
    /// When false only the first preferred strategy is attempted
    pub fallback_enabled: bool,
    pub embedding: EmbeddingConfig,
    pub keyword: KeywordConfig,
}

impl Default for EvidenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy_preference: vec!["embedding".to_string(), "keyword_stub".to_string()],
            chunk_chars: 800,
            top_k: 5,
            min_score: 1.0,
            max_context_chars_for_evidence: 20000,
            fallback_enabled: true,
            embedding: EmbeddingConfig::default(),
            keyword: KeywordConfig::default(),
        }
    }
}

/// Where the embedding backend should run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeMode {
    #[default]
    Auto,
    Cpu,
    Gpu,
}

impl std::fmt::Display for ComputeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu => write!(f, "gpu"),
        }
    }
}

/// Embedding strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub enabled: bool,
    /// Backend program and arguments
    pub command: Vec<String>,
    /// Model reference; the strategy is "not configured" without one
    pub model: Option<String>,
    pub compute_mode: ComputeMode,
    /// Maximum texts per embed call
    pub batch_size: usize,
    /// Per-call bound for health and embed
    pub timeout_ms: u64,
    pub health_check: bool,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: vec!["triage-embed".to_string()],
            model: None,
            compute_mode: ComputeMode::Auto,
            batch_size: 16,
            timeout_ms: 15_000,
            health_check: true,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl EmbeddingConfig {
    /// Model reference, if the backend is usable at all
    pub fn model_ref(&self) -> Option<&str> {
        match self.model.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() && !self.command.is_empty() => Some(m),
            _ => None,
        }
    }
}

/// Per-call circuit breaker for one strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures older than this are forgotten
    pub failure_window_ms: u64,
    /// Failures before the circuit opens
    pub max_failures: u32,
    /// Advisory wait before the strategy should be tried again
    pub cooloff_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_window_ms: 60_000,
            max_failures: 2,
            cooloff_ms: 30_000,
        }
    }
}

/// Keyword strategy settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeywordConfig {
    pub enabled: bool,
}

impl Default for KeywordConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Sentinel classifier acceptance
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// When true the sentinel path replaces rule-based tiering
    pub enabled: bool,
    pub min_confidence: f64,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_confidence: 0.7,
        }
    }
}

/// Character budgets for excerpts handed to later stages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcerptConfig {
    pub max_task_chars: usize,
    pub max_context_chars: usize,
}

impl Default for ExcerptConfig {
    fn default() -> Self {
        Self {
            max_task_chars: 4000,
            max_context_chars: 12000,
        }
    }
}

/// Audit trail location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("logs/triage_audit.jsonl"),
        }
    }
}

fn default_rule_confidence() -> f64 {
    0.8
}

impl RulesConfig {
    /// Load and validate a rules file.
    ///
    /// `.toml` files are parsed as TOML; anything else as YAML (which also
    /// accepts JSON).
    pub fn load(path: impl AsRef<Path>) -> TriageResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(TriageError::RulesNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("toml"));

        let config = if is_toml {
            Self::from_toml_str(&content)?
        } else {
            Self::from_yaml_str(&content)?
        };
        tracing::debug!(
            path = %path.display(),
            version = config.version,
            "Loaded rules configuration"
        );
        Ok(config)
    }

    pub fn from_yaml_str(content: &str) -> TriageResult<Self> {
        let config: Self = if content.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(content)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> TriageResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve the rules path: explicit, then `TRIAGE_RULES`, then
    /// `<exe dir>/../config/triage_rules.yaml`, then `./config/triage_rules.yaml`.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        if let Some(p) = explicit {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var(RULES_PATH_ENV) {
            if !p.trim().is_empty() {
                return PathBuf::from(p);
            }
        }
        if let Some(installed) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().and_then(Path::parent).map(Path::to_path_buf))
            .map(|root| root.join("config").join(DEFAULT_RULES_FILE))
        {
            if installed.exists() {
                return installed;
            }
        }
        PathBuf::from("config").join(DEFAULT_RULES_FILE)
    }

    /// Reject documents that cannot be evaluated
    pub fn validate(&self) -> TriageResult<()> {
        if self.version != SUPPORTED_RULES_VERSION {
            return Err(TriageError::UnsupportedVersion {
                found: self.version,
                supported: SUPPORTED_RULES_VERSION,
            });
        }
        check_unit("confidence_threshold_remote", self.confidence_threshold_remote)?;
        check_unit("confidence_threshold_human", self.confidence_threshold_human)?;
        check_unit("sentinel.min_confidence", self.sentinel.min_confidence)?;

        for (i, esc) in self.error_escalations.iter().enumerate() {
            if esc.error_type.trim().is_empty() {
                return Err(TriageError::config(format!(
                    "error_escalations[{i}]: type must not be empty"
                )));
            }
            check_unit(&format!("error_escalations[{i}].confidence"), esc.confidence)?;
        }
        for (i, ov) in self.route_overrides.iter().enumerate() {
            if ov.pattern.is_empty() {
                return Err(TriageError::config(format!(
                    "route_overrides[{i}]: match must not be empty"
                )));
            }
        }
        for (list, rules) in [
            ("drop_if", &self.prefilter.drop_if),
            ("escalate_if", &self.prefilter.escalate_if),
        ] {
            for (i, rule) in rules.iter().enumerate() {
                if let Some(c) = rule.confidence {
                    check_unit(&format!("prefilter.{list}[{i}].confidence"), c)?;
                }
            }
        }
        if self.evidence.top_k == 0 {
            return Err(TriageError::config("evidence.top_k must be at least 1"));
        }
        if self.evidence.embedding.batch_size == 0 {
            return Err(TriageError::config(
                "evidence.embedding.batch_size must be at least 1",
            ));
        }
        Ok(())
    }
}

fn check_unit(field: &str, value: f64) -> TriageResult<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(TriageError::config(format!(
            "{field} must be within [0, 1], got {value}"
        )))
    }
}
