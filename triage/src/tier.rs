//! Tier: routing destinations and the prior-stage signals that feed them

use serde::{Deserialize, Serialize};

/// Routing destination for a task.
///
/// Ordering expresses escalation severity: `Local < Remote < Human`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    /// Cheap local process
    #[serde(alias = "local")]
    Local,
    /// Stronger remote process
    #[serde(alias = "remote")]
    Remote,
    /// Human operator
    #[serde(alias = "human")]
    Human,
}

impl Tier {
    /// Next tier up the ladder (saturates at Human)
    pub fn escalate(&self) -> Self {
        match self {
            Self::Local => Self::Remote,
            Self::Remote => Self::Human,
            Self::Human => Self::Human,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "LOCAL"),
            Self::Remote => write!(f, "REMOTE"),
            Self::Human => write!(f, "HUMAN"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOCAL" => Ok(Self::Local),
            "REMOTE" => Ok(Self::Remote),
            "HUMAN" => Ok(Self::Human),
            other => Err(format!("unknown tier: {other}")),
        }
    }
}

/// Suggestion produced by the local process before triage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalSuggestion {
    #[serde(default)]
    pub tier_suggestion: Option<Tier>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rationale: Option<String>,
}

impl LocalSuggestion {
    /// Confidence, treating a missing value as zero
    pub fn confidence_or_zero(&self) -> f64 {
        self.confidence.unwrap_or(0.0)
    }
}

/// Output of the external sentinel classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SentinelResult {
    #[serde(default)]
    pub tier_suggestion: Option<Tier>,
    /// Non-numeric confidences deserialize as `None`
    #[serde(default, deserialize_with = "lenient_f64")]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub rationale: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Last error reported by the local process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalError {
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default)]
    pub message: String,
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| v.as_f64()).filter(|c| c.is_finite()))
}
