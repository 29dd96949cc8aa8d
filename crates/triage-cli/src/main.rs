//! Triage CLI
//!
//! Reads one JSON task record (stdin or `--input`), prints one JSON triage
//! decision on stdout. Logs go to stderr.
//!
//! # Usage
//!
//! ```bash
//! echo '{"task": "ping"}' | triage
//! triage --rules ./config/triage_rules.yaml --input task.json --pretty
//! RUST_LOG=triage=debug triage --no-audit < task.json
//! ```
//!
//! Exit codes: 0 decision printed, 2 input error, 3 configuration error,
//! 1 anything else. On failure a structured error object is printed instead
//! of a decision.

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use triage::{
    AuditLog, ErrorKind, RulesConfig, Triage, TriageError, TriageInput, TriageOutput,
    TriageResult,
};

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rules file (YAML, or TOML by extension); overrides TRIAGE_RULES
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Task record to triage (default: stdin)
    #[arg(long)]
    input: Option<PathBuf>,

    /// Audit log path (overrides the rules file)
    #[arg(long)]
    audit_log: Option<PathBuf>,

    /// Do not append an audit event
    #[arg(long, default_value_t = false, conflicts_with = "audit_log")]
    no_audit: bool,

    /// Pretty-print the JSON output
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "triage=info,warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&args).await {
        Ok(output) => emit(&output, args.pretty),
        Err(err) => {
            let structured = err.to_structured();
            tracing::error!(kind = %structured.kind, "Triage failed: {err}");
            emit(&structured, args.pretty)?;
            std::process::exit(exit_code(structured.kind));
        }
    }
}

async fn run(args: &Args) -> TriageResult<TriageOutput> {
    let raw = read_input(args.input.as_deref())?;
    let input = TriageInput::from_json(&raw)?;

    let rules_path = RulesConfig::resolve_path(args.rules.as_deref());
    let rules = RulesConfig::load(&rules_path)?;
    tracing::debug!(rules = %rules_path.display(), "Rules loaded");

    let mut triage = Triage::new(rules);
    if args.no_audit {
        triage = triage.with_audit(None);
    } else if let Some(path) = &args.audit_log {
        triage = triage.with_audit(Some(AuditLog::new(path)));
    }

    triage.run(&input).await
}

fn read_input(path: Option<&Path>) -> TriageResult<String> {
    match path {
        Some(p) => std::fs::read_to_string(p).map_err(|e| {
            TriageError::invalid_input(format!("cannot read input {}: {e}", p.display()))
        }),
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .map_err(|e| TriageError::invalid_input(format!("cannot read stdin: {e}")))?;
            Ok(raw)
        }
    }
}

fn emit<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .context("serializing output")?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{json}").context("writing output")?;
    stdout.flush().context("flushing output")?;
    Ok(())
}

fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::InputError => 2,
        ErrorKind::ConfigError => 3,
        ErrorKind::BackendError | ErrorKind::InternalError => 1,
    }
}
