//! Rule-based compliance engine and audit log
//!
//! Evaluates text against a versioned, hot-reloadable rule document and
//! records every decision in a PII-redacted, day-partitioned audit trail.

pub mod audit;
pub mod engine;
pub mod loader;

pub use audit::{AuditEntry, AuditLog, DailyStats};
pub use engine::{GuardrailEngine, GuardrailStatus};
pub use loader::{RuleSet, RuleStore, REQUIRED_CATEGORIES};

use thiserror::Error;

/// Guardrail subsystem errors. Load-time errors are fatal at startup;
/// per-check errors never escape the engine.
#[derive(Error, Debug)]
pub enum GuardrailError {
    #[error("Rule document not found: {0}")]
    NotFound(String),

    #[error("Rule document schema error: {0}")]
    Schema(String),

    #[error("Rule validation error: {0}")]
    Validation(String),

    #[error("I/O error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
