//! Tier Decision Engine: Deterministic LOCAL / REMOTE / HUMAN resolution
//!
//! Two interchangeable modes, chosen by `sentinel.enabled`:
//!
//! ```text
//! priority checks (always, in this order)
//!     ├─ force_human substring        → HUMAN 1.0
//!     └─ last error type escalation   → entry tier/confidence
//!
//! sentinel mode
//!     ├─ confidence ≥ min_confidence  → adopt sentinel verbatim
//!     └─ otherwise                    → REMOTE "low confidence; escalated"
//!
//! rule mode
//!     ├─ HUMAN route override         → HUMAN + hand-off request
//!     ├─ LOCAL, conf ≥ remote thresh  → LOCAL
//!     ├─ conf ≥ human thresh          → REMOTE
//!     └─ otherwise                    → HUMAN
//! ```
//!
//! No I/O and no mutation; every decision is a pure function of the
//! signals and the rules document.

pub mod engine;
pub mod sentinel;

pub use engine::{DecisionSignals, DecisionSource, HandoffRequest, TierDecision, TierEngine};
pub use sentinel::decide_sentinel;
