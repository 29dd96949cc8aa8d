//! Append-only audit trail (JSON Lines)
//!
//! One line per triage call. The file is never read back by the engine;
//! each event is serialized first and written with a single `write_all` so
//! concurrent appenders never interleave within a line.

use crate::error::TriageResult;
use crate::orchestrator::{TriageAction, TriageOutput};
use crate::tier::Tier;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Event name of triage audit records
pub const AUDIT_EVENT_TRIAGE: &str = "triage";

/// One audit record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub event: String,
    pub action: TriageAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tier: Option<Tier>,
    pub confidence: f64,
    pub flags: Vec<String>,
}

impl AuditEvent {
    /// Record the outcome of one triage call, stamped now
    pub fn from_output(output: &TriageOutput) -> Self {
        Self {
            timestamp: Utc::now(),
            event: AUDIT_EVENT_TRIAGE.to_string(),
            action: output.action,
            tier: output.tier,
            confidence: output.confidence,
            flags: output.flags.clone(),
        }
    }

    pub fn to_log_line(&self) -> TriageResult<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Append-only JSONL sink
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event, creating the file and its parent directory if needed
    pub fn append(&self, event: &AuditEvent) -> TriageResult<()> {
        let line = event.to_log_line()?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}
