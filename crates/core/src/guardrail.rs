//! Guardrail rule and check-result types
//!
//! Rules classify assistant/user text against pharma compliance policy.
//! Conflicting outcomes resolve through the fixed severity precedence
//! block > rewrite > warn.

use serde::{Deserialize, Serialize};

/// Rule severity. Declaration order doubles as precedence: a lower
/// discriminant wins when resolving multiple simultaneous matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Content must be blocked entirely
    Block,
    /// Content must be replaced with a compliant message
    Rewrite,
    /// Content passes but the match is logged
    Warn,
}

impl Severity {
    /// Parse from the rule document's string form
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "block" => Some(Self::Block),
            "rewrite" => Some(Self::Rewrite),
            "warn" => Some(Self::Warn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Block => "block",
            Self::Rewrite => "rewrite",
            Self::Warn => "warn",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How a rule's pattern is evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    /// Case-insensitive, unanchored regular expression
    Regex,
    /// Comma-separated keywords, whole-word matched
    Keyword,
    /// Marker for an external classifier; never matched locally
    LlmHint,
}

impl PatternType {
    /// Parse from the rule document's string form
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "regex" => Some(Self::Regex),
            "keyword" => Some(Self::Keyword),
            "llm_hint" => Some(Self::LlmHint),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Regex => "regex",
            Self::Keyword => "keyword",
            Self::LlmHint => "llm_hint",
        }
    }
}

/// A single compliance rule loaded from the rule document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailRule {
    /// Unique rule identifier (e.g. "PHI_002")
    pub rule_id: String,
    /// Compliance category (e.g. "PHI_HIPAA")
    pub category: String,
    /// How `pattern` is evaluated
    pub pattern_type: PatternType,
    /// The pattern text
    pub pattern: String,
    /// Outcome when the rule matches
    pub severity: Severity,
    /// Compliant message substituted on block/rewrite
    pub action_message: String,
    /// Why a match is non-compliant (audit trail)
    pub noncompliance_description: String,
    /// Disabled rules never contribute violations
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Locale policy from the rule document (optional second table)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguagePolicy {
    /// Allowed locale tags in declaration order (e.g. "en-US")
    pub allowed_locales: Vec<String>,
    /// Message substituted when the locale is rejected
    pub fallback_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// One match of one rule against one text segment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailViolation {
    pub rule_id: String,
    pub category: String,
    pub severity: Severity,
    pub action_message: String,
    pub noncompliance_description: String,
    /// The text that triggered the match
    pub matched_text: String,
}

impl GuardrailViolation {
    /// Build a violation from the rule that matched
    pub fn from_rule(rule: &GuardrailRule, matched_text: impl Into<String>) -> Self {
        Self {
            rule_id: rule.rule_id.clone(),
            category: rule.category.clone(),
            severity: rule.severity,
            action_message: rule.action_message.clone(),
            noncompliance_description: rule.noncompliance_description.clone(),
            matched_text: matched_text.into(),
        }
    }
}

/// Action classification derived from a check result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionTaken {
    Passed,
    Blocked,
    Rewritten,
    Warned,
}

impl ActionTaken {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Blocked => "blocked",
            Self::Rewritten => "rewritten",
            Self::Warned => "warned",
        }
    }
}

/// Result of checking one text segment against all enabled rules
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardrailCheckResult {
    /// All violations in match order
    pub violations: Vec<GuardrailViolation>,
    /// Matched rule ids in match order
    pub all_matched_rules: Vec<String>,
}

impl GuardrailCheckResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_violation(&mut self, violation: GuardrailViolation) {
        self.all_matched_rules.push(violation.rule_id.clone());
        self.violations.push(violation);
    }

    pub fn has_violations(&self) -> bool {
        !self.violations.is_empty()
    }

    /// The winning violation under block > rewrite > warn precedence.
    /// Ties at equal severity resolve to the earliest match, so rule
    /// declaration order is the deterministic tie-break.
    pub fn highest_severity_violation(&self) -> Option<&GuardrailViolation> {
        let mut best: Option<&GuardrailViolation> = None;
        for v in &self.violations {
            match best {
                Some(b) if v.severity >= b.severity => {}
                _ => best = Some(v),
            }
        }
        best
    }

    pub fn should_block(&self) -> bool {
        self.violations.iter().any(|v| v.severity == Severity::Block)
    }

    /// True only when no block violation exists but a rewrite one does
    pub fn should_rewrite(&self) -> bool {
        !self.should_block() && self.violations.iter().any(|v| v.severity == Severity::Rewrite)
    }

    pub fn should_warn(&self) -> bool {
        self.violations.iter().any(|v| v.severity == Severity::Warn)
    }

    /// Action message from the winning violation
    pub fn action_message(&self) -> Option<&str> {
        self.highest_severity_violation().map(|v| v.action_message.as_str())
    }

    /// Classify the outcome for audit logging
    pub fn action_taken(&self) -> ActionTaken {
        if !self.has_violations() {
            ActionTaken::Passed
        } else if self.should_block() {
            ActionTaken::Blocked
        } else if self.should_rewrite() {
            ActionTaken::Rewritten
        } else {
            ActionTaken::Warned
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, category: &str, severity: Severity) -> GuardrailRule {
        GuardrailRule {
            rule_id: id.to_string(),
            category: category.to_string(),
            pattern_type: PatternType::Keyword,
            pattern: "test".to_string(),
            severity,
            action_message: format!("{} message", id),
            noncompliance_description: format!("{} description", id),
            enabled: true,
            notes: None,
        }
    }

    #[test]
    fn empty_result_passes() {
        let result = GuardrailCheckResult::new();
        assert!(!result.has_violations());
        assert!(!result.should_block());
        assert!(!result.should_rewrite());
        assert_eq!(result.action_taken(), ActionTaken::Passed);
        assert!(result.highest_severity_violation().is_none());
    }

    #[test]
    fn block_dominates_rewrite_and_warn() {
        let mut result = GuardrailCheckResult::new();
        result.add_violation(GuardrailViolation::from_rule(
            &rule("W1", "AE_DETECTION", Severity::Warn),
            "reaction",
        ));
        result.add_violation(GuardrailViolation::from_rule(
            &rule("R1", "COMPARATIVE_CLAIM", Severity::Rewrite),
            "better than",
        ));
        result.add_violation(GuardrailViolation::from_rule(
            &rule("B1", "PRICING_REBATE", Severity::Block),
            "price",
        ));

        assert!(result.should_block());
        assert!(!result.should_rewrite());
        assert_eq!(result.action_taken(), ActionTaken::Blocked);
        let top = result.highest_severity_violation().unwrap();
        assert_eq!(top.rule_id, "B1");
        assert_eq!(top.severity, Severity::Block);
        assert_eq!(result.action_message(), Some("B1 message"));
    }

    #[test]
    fn rewrite_without_block() {
        let mut result = GuardrailCheckResult::new();
        result.add_violation(GuardrailViolation::from_rule(
            &rule("R1", "GUARANTEE", Severity::Rewrite),
            "guaranteed",
        ));
        assert!(!result.should_block());
        assert!(result.should_rewrite());
        assert_eq!(result.action_taken(), ActionTaken::Rewritten);
    }

    #[test]
    fn warn_only_result() {
        let mut result = GuardrailCheckResult::new();
        result.add_violation(GuardrailViolation::from_rule(
            &rule("W1", "AE_DETECTION", Severity::Warn),
            "side effect",
        ));
        assert!(!result.should_block());
        assert!(!result.should_rewrite());
        assert!(result.should_warn());
        assert_eq!(result.action_taken(), ActionTaken::Warned);
        assert_eq!(
            result.highest_severity_violation().unwrap().severity,
            Severity::Warn
        );
    }

    #[test]
    fn same_severity_tie_breaks_by_match_order() {
        let mut result = GuardrailCheckResult::new();
        result.add_violation(GuardrailViolation::from_rule(
            &rule("B1", "PHI_HIPAA", Severity::Block),
            "ssn",
        ));
        result.add_violation(GuardrailViolation::from_rule(
            &rule("B2", "OFF_LABEL", Severity::Block),
            "off-label",
        ));
        assert_eq!(result.highest_severity_violation().unwrap().rule_id, "B1");
    }

    #[test]
    fn severity_parse_is_closed() {
        assert_eq!(Severity::parse("block"), Some(Severity::Block));
        assert_eq!(Severity::parse("warn"), Some(Severity::Warn));
        assert_eq!(Severity::parse("critical"), None);
        assert_eq!(PatternType::parse("llm_hint"), Some(PatternType::LlmHint));
        assert_eq!(PatternType::parse("glob"), None);
    }

    #[test]
    fn severity_ordering_matches_precedence() {
        assert!(Severity::Block < Severity::Rewrite);
        assert!(Severity::Rewrite < Severity::Warn);
    }
}
