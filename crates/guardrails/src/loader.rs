//! Rule document loading and caching
//!
//! The rule source is a TOML document with two tables: `[[rules]]` rows and
//! an optional `[[language_policies]]` row. Loaded generations are immutable
//! behind `Arc` and swapped wholesale, so concurrent checks never observe a
//! half-updated rule set.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use repvoice_core::guardrail::{GuardrailRule, LanguagePolicy, PatternType, Severity};

use crate::GuardrailError;

/// Keys every `[[rules]]` row must carry (`notes` is optional)
pub const REQUIRED_RULE_KEYS: &[&str] = &[
    "rule_id",
    "category",
    "pattern_type",
    "pattern",
    "severity",
    "action_message",
    "noncompliance_description",
    "enabled",
];

/// Categories that must have at least one enabled rule; gaps are logged as
/// warnings at load, not errors.
pub const REQUIRED_CATEGORIES: &[&str] = &[
    "PHI_HIPAA",
    "OFF_LABEL",
    "AE_DETECTION",
    "COMPARATIVE_CLAIM",
    "PRICING_REBATE",
    "UNAPPROVED_INDICATION",
    "GUARANTEE",
    "CLINICAL_GUIDANCE",
    "LANGUAGE_EN_ONLY",
    "PII_PROMPT",
];

/// One loaded generation of the rule document
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub rules: Vec<GuardrailRule>,
    pub language_policy: Option<LanguagePolicy>,
    pub loaded_at: DateTime<Utc>,
    pub file_modified: SystemTime,
}

impl RuleSet {
    /// Enabled rules in declaration order
    pub fn enabled_rules(&self) -> impl Iterator<Item = &GuardrailRule> {
        self.rules.iter().filter(|r| r.enabled)
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled_rules().count()
    }
}

/// Loads, validates, and caches the rule document
pub struct RuleStore {
    path: PathBuf,
    cache: RwLock<Option<Arc<RuleSet>>>,
}

impl RuleStore {
    /// Create a store for the document at `path`. Fails fast when the
    /// document does not exist.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, GuardrailError> {
        let path = path.into();
        if !path.exists() {
            return Err(GuardrailError::NotFound(path.display().to_string()));
        }
        tracing::info!(path = %path.display(), "RuleStore initialized");
        Ok(Self {
            path,
            cache: RwLock::new(None),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn file_modified(&self) -> Result<SystemTime, GuardrailError> {
        let meta = std::fs::metadata(&self.path).map_err(|source| GuardrailError::Io {
            path: self.path.display().to_string(),
            source,
        })?;
        meta.modified().map_err(|source| GuardrailError::Io {
            path: self.path.display().to_string(),
            source,
        })
    }

    /// Has the document been modified since `last_modified`?
    pub fn has_changed(&self, last_modified: SystemTime) -> bool {
        match self.file_modified() {
            Ok(current) => current > last_modified,
            Err(e) => {
                tracing::warn!(error = %e, "Could not stat rule document");
                false
            }
        }
    }

    /// Parse and validate the document, replacing the cached generation.
    pub fn load(&self) -> Result<Arc<RuleSet>, GuardrailError> {
        let file_modified = self.file_modified()?;
        let raw = std::fs::read_to_string(&self.path).map_err(|source| GuardrailError::Io {
            path: self.path.display().to_string(),
            source,
        })?;

        let doc: toml::Value = raw
            .parse()
            .map_err(|e| GuardrailError::Schema(format!("not a valid TOML document: {e}")))?;

        let rows = doc
            .get("rules")
            .and_then(|v| v.as_array())
            .ok_or_else(|| GuardrailError::Schema("missing required [[rules]] table".into()))?;

        let mut rules = Vec::with_capacity(rows.len());
        for (idx, row) in rows.iter().enumerate() {
            rules.push(parse_rule(row, idx)?);
        }

        let language_policy = match doc.get("language_policies").and_then(|v| v.as_array()) {
            Some(rows) if !rows.is_empty() => Some(parse_language_policy(&rows[0])?),
            _ => None,
        };

        // Non-fatal coverage check over the enabled subset
        let present: std::collections::HashSet<&str> = rules
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.category.as_str())
            .collect();
        let missing: Vec<&str> = REQUIRED_CATEGORIES
            .iter()
            .copied()
            .filter(|c| !present.contains(c))
            .collect();
        if !missing.is_empty() {
            tracing::warn!(?missing, "Missing enabled rules for required categories");
        }

        let enabled = rules.iter().filter(|r| r.enabled).count();
        tracing::info!(
            total = rules.len(),
            enabled,
            path = %self.path.display(),
            "Loaded guardrail rules"
        );
        for category in REQUIRED_CATEGORIES {
            let count = rules
                .iter()
                .filter(|r| r.category == *category && r.enabled)
                .count();
            tracing::debug!(category, count, "Category coverage");
        }

        let set = Arc::new(RuleSet {
            rules,
            language_policy,
            loaded_at: Utc::now(),
            file_modified,
        });
        *self.cache.write() = Some(set.clone());
        Ok(set)
    }

    /// The cached generation, loading on first use and reloading when the
    /// document has changed on disk. A failed reload keeps serving the last
    /// good generation.
    pub fn cached(&self) -> Result<Arc<RuleSet>, GuardrailError> {
        let current = self.cache.read().clone();
        match current {
            None => self.load(),
            Some(set) => {
                if self.has_changed(set.file_modified) {
                    tracing::info!("Rule document changed on disk, reloading");
                    match self.load() {
                        Ok(fresh) => Ok(fresh),
                        Err(e) => {
                            tracing::error!(error = %e, "Reload failed, keeping previous rule set");
                            Ok(set)
                        }
                    }
                } else {
                    Ok(set)
                }
            }
        }
    }

    /// Force a reload regardless of the modification time
    pub fn reload(&self) -> Result<Arc<RuleSet>, GuardrailError> {
        self.load()
    }
}

fn parse_rule(row: &toml::Value, idx: usize) -> Result<GuardrailRule, GuardrailError> {
    let table = row
        .as_table()
        .ok_or_else(|| GuardrailError::Schema(format!("rule {} is not a table", idx + 1)))?;

    for key in REQUIRED_RULE_KEYS {
        if !table.contains_key(*key) {
            return Err(GuardrailError::Schema(format!(
                "rule {} is missing required key '{}'",
                idx + 1,
                key
            )));
        }
    }

    let str_field = |key: &str| -> Result<String, GuardrailError> {
        table
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                GuardrailError::Schema(format!("rule {}: '{}' must be a string", idx + 1, key))
            })
    };

    let rule_id = str_field("rule_id")?;

    let pattern_type_raw = str_field("pattern_type")?;
    let pattern_type = PatternType::parse(&pattern_type_raw).ok_or_else(|| {
        GuardrailError::Validation(format!(
            "rule {} ({}): pattern_type must be one of regex, keyword, llm_hint (got '{}')",
            idx + 1,
            rule_id,
            pattern_type_raw
        ))
    })?;

    let severity_raw = str_field("severity")?;
    let severity = Severity::parse(&severity_raw).ok_or_else(|| {
        GuardrailError::Validation(format!(
            "rule {} ({}): severity must be one of block, rewrite, warn (got '{}')",
            idx + 1,
            rule_id,
            severity_raw
        ))
    })?;

    Ok(GuardrailRule {
        category: str_field("category")?,
        pattern: str_field("pattern")?,
        action_message: str_field("action_message")?,
        noncompliance_description: str_field("noncompliance_description")?,
        enabled: table.get("enabled").map(parse_enabled).unwrap_or(false),
        notes: table
            .get("notes")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        rule_id,
        pattern_type,
        severity,
    })
}

/// `enabled` accepts booleans or case-insensitive TRUE/YES/1/ENABLED strings;
/// anything else is false.
fn parse_enabled(value: &toml::Value) -> bool {
    match value {
        toml::Value::Boolean(b) => *b,
        toml::Value::String(s) => {
            matches!(s.to_uppercase().as_str(), "TRUE" | "YES" | "1" | "ENABLED")
        }
        toml::Value::Integer(n) => *n == 1,
        _ => false,
    }
}

fn parse_language_policy(row: &toml::Value) -> Result<LanguagePolicy, GuardrailError> {
    let table = row
        .as_table()
        .ok_or_else(|| GuardrailError::Schema("language policy row is not a table".into()))?;

    let allowed = table
        .get("allowed_locales")
        .ok_or_else(|| {
            GuardrailError::Schema("language policy is missing 'allowed_locales'".into())
        })?;
    let allowed_locales: Vec<String> = match allowed {
        toml::Value::String(s) => s.split(',').map(|l| l.trim().to_string()).collect(),
        toml::Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(str::to_string)
            .collect(),
        _ => {
            return Err(GuardrailError::Schema(
                "'allowed_locales' must be a comma-separated string or array".into(),
            ))
        }
    };

    let fallback_message = table
        .get("fallback_message")
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            GuardrailError::Schema("language policy is missing 'fallback_message'".into())
        })?;

    Ok(LanguagePolicy {
        allowed_locales,
        fallback_message,
        notes: table
            .get("notes")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}
