//! Excerpt Builder: bounds task and context text to character budgets

use crate::config::RulesConfig;
use serde::{Deserialize, Serialize};

pub const FLAG_TRUNCATED: &str = "TRUNCATED";
pub const FLAG_TASK_TRUNCATED: &str = "TASK_TRUNCATED";
pub const FLAG_CONTEXT_TRUNCATED: &str = "CONTEXT_TRUNCATED";

/// Bounded task/context pair handed to the decision and evidence stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Excerpt {
    pub task_excerpt: String,
    pub context_excerpt: String,
    pub flags: Vec<String>,
}

impl Excerpt {
    pub fn truncated(&self) -> bool {
        self.flags.iter().any(|f| f == FLAG_TRUNCATED)
    }
}

/// Clip `task` and `context` to `min(configured, external_cap)` characters.
///
/// Straight prefix clip on character boundaries; never fails.
pub fn build(
    task: &str,
    context: &str,
    rules: &RulesConfig,
    external_cap: Option<usize>,
) -> Excerpt {
    let cap = |configured: usize| external_cap.map_or(configured, |ext| configured.min(ext));
    let task_cap = cap(rules.excerpt.max_task_chars);
    let context_cap = cap(rules.excerpt.max_context_chars);

    let (task_excerpt, task_cut) = clip_chars(task, task_cap);
    let (context_excerpt, context_cut) = clip_chars(context, context_cap);

    let mut flags = Vec::new();
    if task_cut || context_cut {
        flags.push(FLAG_TRUNCATED.to_string());
    }
    if task_cut {
        flags.push(FLAG_TASK_TRUNCATED.to_string());
    }
    if context_cut {
        flags.push(FLAG_CONTEXT_TRUNCATED.to_string());
    }

    Excerpt {
        task_excerpt: task_excerpt.to_string(),
        context_excerpt: context_excerpt.to_string(),
        flags,
    }
}

/// Prefix of at most `max` characters, and whether anything was cut.
pub fn clip_chars(text: &str, max: usize) -> (&str, bool) {
    match text.char_indices().nth(max) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}
