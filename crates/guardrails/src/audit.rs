//! Compliance audit logging
//!
//! Append-only, day-partitioned NDJSON records of every guardrail decision.
//! Raw text is never stored: entries carry a one-way digest plus a redacted
//! snippet. Logging failures are reported but never propagate, since an
//! audit write error must not take down the conversation.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, SecondsFormat, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use repvoice_core::guardrail::GuardrailCheckResult;
use repvoice_core::session::Role;

/// Characters kept from each end of the original text in the snippet
const SNIPPET_EDGE_CHARS: usize = 20;

static SSN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{3}-\d{2}-\d{4}").unwrap());
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\(?\d{3}\)?[-.\s]?\d{3}[-.\s]?\d{4}").unwrap());
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap()
});
static ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d{6,}\b").unwrap());

/// One audit record. Immutable once written; never contains raw text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: String,
    pub session_id: String,
    pub role: String,
    /// SHA-256 hex digest of the original text
    pub text_hash: String,
    /// Redacted first/last-characters preview
    pub text_snippet: String,
    pub matched_rule_ids: Vec<String>,
    pub categories: Vec<String>,
    pub severities: Vec<String>,
    pub action_taken: String,
    pub locale: Option<String>,
    pub violated: bool,
    pub noncompliance_descriptions: Vec<String>,
}

/// Aggregate counts for one day partition
#[derive(Debug, Clone, Serialize)]
pub struct DailyStats {
    pub date: String,
    pub total_checks: u64,
    pub violations: u64,
    pub blocked: u64,
    pub rewritten: u64,
    pub warned: u64,
    pub passed: u64,
    pub categories: HashMap<String, u64>,
    pub rules: HashMap<String, u64>,
}

impl DailyStats {
    fn empty(date: &str) -> Self {
        Self {
            date: date.to_string(),
            total_checks: 0,
            violations: 0,
            blocked: 0,
            rewritten: 0,
            warned: 0,
            passed: 0,
            categories: HashMap::new(),
            rules: HashMap::new(),
        }
    }
}

/// Append-only audit logger with daily file rotation
pub struct AuditLog {
    log_dir: PathBuf,
}

impl AuditLog {
    /// Resolve the log directory once: the primary is probed with a write
    /// test and the fallback takes over if it is unusable. The choice is
    /// never revisited for the process lifetime.
    pub fn new(primary: impl AsRef<Path>, fallback: impl AsRef<Path>) -> Self {
        let primary = primary.as_ref();
        let fallback = fallback.as_ref();

        let log_dir = if Self::probe_writable(primary) {
            primary.to_path_buf()
        } else {
            tracing::warn!(
                primary = %primary.display(),
                fallback = %fallback.display(),
                "Primary audit directory not writable, using fallback"
            );
            if let Err(e) = std::fs::create_dir_all(fallback) {
                tracing::error!(error = %e, "Could not create fallback audit directory");
            }
            fallback.to_path_buf()
        };

        tracing::info!(dir = %log_dir.display(), "AuditLog initialized");
        Self { log_dir }
    }

    fn probe_writable(dir: &Path) -> bool {
        if std::fs::create_dir_all(dir).is_err() {
            return false;
        }
        let probe = dir.join(".write_test");
        match std::fs::File::create(&probe) {
            Ok(_) => {
                let _ = std::fs::remove_file(&probe);
                true
            }
            Err(_) => false,
        }
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    fn partition_path(&self, date: NaiveDate) -> PathBuf {
        self.log_dir
            .join(format!("guardrails_audit_{}.ndjson", date.format("%Y-%m-%d")))
    }

    /// Record one guardrail decision. Errors are logged, never returned.
    pub fn log_check(
        &self,
        session_id: &str,
        role: Role,
        text: &str,
        result: &GuardrailCheckResult,
        locale: Option<&str>,
    ) {
        let entry = build_entry(session_id, role, text, result, locale);

        if result.has_violations() {
            tracing::warn!(
                session_id,
                role = %role,
                action = %entry.action_taken,
                rules = ?entry.matched_rule_ids,
                categories = ?entry.categories,
                "Guardrail violation recorded"
            );
        }

        if let Err(e) = self.append_entry(&entry) {
            tracing::error!(session_id, error = %e, "Error writing audit log");
        }
    }

    fn append_entry(&self, entry: &AuditEntry) -> std::io::Result<()> {
        // Partition recomputed per write so rotation happens on the first
        // entry of a new UTC day.
        let path = self.partition_path(Utc::now().date_naive());
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)?;
        let line = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(file, "{line}")
    }

    /// All entries for a session across every partition. The snippet is
    /// re-redacted on read unless `include_text` is set.
    pub fn read_session_logs(&self, session_id: &str, include_text: bool) -> Vec<AuditEntry> {
        let mut entries = Vec::new();

        let mut partitions: Vec<PathBuf> = match std::fs::read_dir(&self.log_dir) {
            Ok(dir) => dir
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| {
                            n.starts_with("guardrails_audit_") && n.ends_with(".ndjson")
                        })
                })
                .collect(),
            Err(e) => {
                tracing::error!(error = %e, "Could not list audit directory");
                return entries;
            }
        };
        partitions.sort();

        for path in partitions {
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "Error reading audit file");
                    continue;
                }
            };
            for line in content.lines() {
                let Ok(mut entry) = serde_json::from_str::<AuditEntry>(line) else {
                    continue;
                };
                if entry.session_id != session_id {
                    continue;
                }
                if !include_text {
                    entry.text_snippet = "[REDACTED]".to_string();
                }
                entries.push(entry);
            }
        }

        entries
    }

    /// Aggregate counts for a single day partition
    pub fn get_daily_stats(&self, date: NaiveDate) -> DailyStats {
        let date_str = date.format("%Y-%m-%d").to_string();
        let path = self.partition_path(date);
        let mut stats = DailyStats::empty(&date_str);

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return stats,
        };

        for line in content.lines() {
            let Ok(entry) = serde_json::from_str::<AuditEntry>(line) else {
                continue;
            };
            stats.total_checks += 1;
            match entry.action_taken.as_str() {
                "blocked" => stats.blocked += 1,
                "rewritten" => stats.rewritten += 1,
                "warned" => stats.warned += 1,
                _ => stats.passed += 1,
            }
            if entry.violated {
                stats.violations += 1;
            }
            for category in entry.categories {
                *stats.categories.entry(category).or_insert(0) += 1;
            }
            for rule_id in entry.matched_rule_ids {
                *stats.rules.entry(rule_id).or_insert(0) += 1;
            }
        }

        stats
    }
}

fn build_entry(
    session_id: &str,
    role: Role,
    text: &str,
    result: &GuardrailCheckResult,
    locale: Option<&str>,
) -> AuditEntry {
    let mut categories = Vec::new();
    let mut severities = Vec::new();
    let mut descriptions = Vec::new();
    for v in &result.violations {
        if !categories.contains(&v.category) {
            categories.push(v.category.clone());
        }
        let severity = v.severity.as_str().to_string();
        if !severities.contains(&severity) {
            severities.push(severity);
        }
        if !v.noncompliance_description.is_empty() {
            descriptions.push(v.noncompliance_description.clone());
        }
    }

    AuditEntry {
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        session_id: session_id.to_string(),
        role: role.as_str().to_string(),
        text_hash: hash_text(text),
        text_snippet: create_snippet(text),
        matched_rule_ids: result.all_matched_rules.clone(),
        categories,
        severities,
        action_taken: result.action_taken().as_str().to_string(),
        locale: locale.map(str::to_string),
        violated: result.has_violations(),
        noncompliance_descriptions: descriptions,
    }
}

fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Short texts collapse to a fixed placeholder; longer texts keep only the
/// first and last characters, with PII-looking fragments replaced.
fn create_snippet(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() || chars.len() <= SNIPPET_EDGE_CHARS * 2 {
        return "[REDACTED]".to_string();
    }

    let head: String = chars[..SNIPPET_EDGE_CHARS].iter().collect();
    let tail: String = chars[chars.len() - SNIPPET_EDGE_CHARS..].iter().collect();
    redact_pii_patterns(&format!("{head}...{tail}"))
}

fn redact_pii_patterns(text: &str) -> String {
    let text = SSN_RE.replace_all(text, "[SSN]");
    let text = PHONE_RE.replace_all(&text, "[PHONE]");
    let text = EMAIL_RE.replace_all(&text, "[EMAIL]");
    ID_RE.replace_all(&text, "[ID]").into_owned()
}
