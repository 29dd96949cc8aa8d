//! Sentinel mode: adopt the external classifier when it is confident enough

use crate::config::SentinelConfig;
use crate::decision::engine::{DecisionSource, TierDecision};
use crate::tier::{SentinelResult, Tier};

pub const FLAG_SENTINEL_ACCEPTED: &str = "SENTINEL_ACCEPTED";
pub const FLAG_SENTINEL_LOW_CONFIDENCE: &str = "SENTINEL_LOW_CONFIDENCE";
pub const FLAG_SENTINEL_MISSING: &str = "SENTINEL_MISSING";

/// Rationale used whenever the sentinel result is not adopted
pub const RATIONALE_SENTINEL_FALLBACK: &str = "low confidence; escalated";

/// Resolve a tier from a sentinel result.
///
/// A result whose numeric confidence reaches `min_confidence` and which names
/// a tier is adopted verbatim; anything else falls back to REMOTE.
pub fn decide_sentinel(result: Option<&SentinelResult>, config: &SentinelConfig) -> TierDecision {
    let Some(result) = result else {
        return TierDecision {
            tier: Tier::Remote,
            confidence: 0.0,
            rationale: RATIONALE_SENTINEL_FALLBACK.to_string(),
            flags: vec![FLAG_SENTINEL_MISSING.to_string()],
            source: DecisionSource::SentinelMissing,
            request_for_chatgpt: None,
        };
    };

    match (result.confidence, result.tier_suggestion) {
        (Some(confidence), Some(tier)) if confidence >= config.min_confidence => {
            let mut flags = vec![FLAG_SENTINEL_ACCEPTED.to_string()];
            flags.extend(result.labels.iter().filter_map(|l| label_flag(l)));
            TierDecision {
                tier,
                confidence,
                rationale: result.rationale.clone().unwrap_or_default(),
                flags,
                source: DecisionSource::SentinelAccepted,
                request_for_chatgpt: None,
            }
        }
        (confidence, _) => {
            tracing::debug!(
                confidence = ?confidence,
                min = config.min_confidence,
                "Sentinel result below acceptance threshold"
            );
            TierDecision {
                tier: Tier::Remote,
                confidence: confidence.unwrap_or(0.0),
                rationale: RATIONALE_SENTINEL_FALLBACK.to_string(),
                flags: vec![FLAG_SENTINEL_LOW_CONFIDENCE.to_string()],
                source: DecisionSource::SentinelLowConfidence,
                request_for_chatgpt: None,
            }
        }
    }
}

/// `"needs review"` → `"NEEDS_REVIEW"`; blank labels are dropped
fn label_flag(label: &str) -> Option<String> {
    let flag: String = label
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    (!flag.is_empty()).then_some(flag)
}
