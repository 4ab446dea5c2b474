//! Guardrail evaluation engine
//!
//! Checks one text segment against the cached rule set and locale policy.
//! The locale check runs first and is final: a rejected locale blocks the
//! text without evaluating any other rule.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::RegexBuilder;
use serde::Serialize;

use repvoice_core::guardrail::{
    GuardrailCheckResult, GuardrailRule, GuardrailViolation, LanguagePolicy, PatternType,
    Severity,
};
use repvoice_core::session::Role;

use crate::loader::RuleStore;
use crate::GuardrailError;

/// Rule id and category used for locale-policy violations
const LANGUAGE_RULE_ID: &str = "LANGUAGE_001";
const LANGUAGE_CATEGORY: &str = "LANGUAGE_EN_ONLY";

/// Snapshot of the engine's configuration for the admin surface
#[derive(Debug, Clone, Serialize)]
pub struct GuardrailStatus {
    pub rules_path: String,
    pub loaded_at: DateTime<Utc>,
    pub total_rules: usize,
    pub enabled_rules: usize,
    pub categories: Vec<String>,
    pub language_policy_configured: bool,
}

/// Evaluates text against the cached rule generation
pub struct GuardrailEngine {
    store: Arc<RuleStore>,
}

impl GuardrailEngine {
    /// Create the engine, loading the rule document eagerly so configuration
    /// errors fail at startup rather than mid-conversation.
    pub fn new(store: Arc<RuleStore>) -> Result<Self, GuardrailError> {
        store.cached()?;
        tracing::info!("GuardrailEngine initialized");
        Ok(Self { store })
    }

    /// Force a reload of the rule document
    pub fn reload_rules(&self) -> Result<(), GuardrailError> {
        self.store.reload()?;
        tracing::info!("GuardrailEngine reloaded rules");
        Ok(())
    }

    /// Evaluate `text` against every enabled rule. Role filtering is the
    /// caller's responsibility; the role is only carried into trigger logs.
    pub fn check(&self, text: &str, locale: Option<&str>, role: Role) -> GuardrailCheckResult {
        let mut result = GuardrailCheckResult::new();

        if text.trim().is_empty() {
            return result;
        }

        let rules = match self.store.cached() {
            Ok(rules) => rules,
            Err(e) => {
                // Unreachable after a successful new(), but never let a rule
                // source problem abort a live check.
                tracing::error!(error = %e, "No rule set available for check");
                return result;
            }
        };

        if let (Some(policy), Some(locale)) = (&rules.language_policy, locale) {
            if let Some(violation) = check_language(policy, locale) {
                let is_block = violation.severity == Severity::Block;
                result.add_violation(violation);
                if is_block {
                    // Language rejection is final
                    return result;
                }
            }
        }

        for rule in rules.enabled_rules() {
            if let Some(matched) = match_rule(rule, text) {
                tracing::info!(
                    rule_id = %rule.rule_id,
                    category = %rule.category,
                    severity = %rule.severity,
                    role = %role,
                    "Guardrail triggered"
                );
                result.add_violation(GuardrailViolation::from_rule(rule, matched));
            }
        }

        result
    }

    /// Configuration snapshot for the admin status endpoint
    pub fn status(&self) -> Result<GuardrailStatus, GuardrailError> {
        let rules = self.store.cached()?;
        let mut categories: Vec<String> = Vec::new();
        for rule in rules.enabled_rules() {
            if !categories.iter().any(|c| c == &rule.category) {
                categories.push(rule.category.clone());
            }
        }
        Ok(GuardrailStatus {
            rules_path: self.store.path().display().to_string(),
            loaded_at: rules.loaded_at,
            total_rules: rules.rules.len(),
            enabled_rules: rules.enabled_count(),
            categories,
            language_policy_configured: rules.language_policy.is_some(),
        })
    }
}

/// Locale acceptance: the normalized input must equal an allowed entry, be a
/// dash-prefixed extension of one, or share its base language tag.
fn check_language(policy: &LanguagePolicy, locale: &str) -> Option<GuardrailViolation> {
    let normalize = |s: &str| s.replace('_', "-").to_lowercase();
    let locale_norm = normalize(locale);
    let locale_base = locale_norm.split('-').next().unwrap_or(&locale_norm).to_string();

    let is_allowed = policy.allowed_locales.iter().any(|allowed| {
        let allowed_norm = normalize(allowed);
        let allowed_base = allowed_norm
            .split('-')
            .next()
            .unwrap_or(&allowed_norm)
            .to_string();
        locale_norm == allowed_norm
            || locale_norm.starts_with(&format!("{allowed_norm}-"))
            || locale_base == allowed_base
    });

    if is_allowed {
        return None;
    }

    Some(GuardrailViolation {
        rule_id: LANGUAGE_RULE_ID.to_string(),
        category: LANGUAGE_CATEGORY.to_string(),
        severity: Severity::Block,
        action_message: policy.fallback_message.clone(),
        noncompliance_description: format!("Non-allowed locale detected: {locale}"),
        matched_text: locale.to_string(),
    })
}

/// Match one rule against the text, returning the matched fragment.
fn match_rule(rule: &GuardrailRule, text: &str) -> Option<String> {
    match rule.pattern_type {
        PatternType::Regex => match_regex(rule, text),
        PatternType::Keyword => match_keyword(&rule.pattern, text),
        // Markers for an external classifier; never matched here
        PatternType::LlmHint => None,
    }
}

/// Case-insensitive, unanchored regex search. Invalid patterns are logged
/// and skipped so one bad rule never aborts the whole check.
fn match_regex(rule: &GuardrailRule, text: &str) -> Option<String> {
    let regex = match RegexBuilder::new(&rule.pattern).case_insensitive(true).build() {
        Ok(regex) => regex,
        Err(e) => {
            tracing::error!(rule_id = %rule.rule_id, pattern = %rule.pattern, error = %e,
                "Invalid regex pattern, skipping rule");
            return None;
        }
    };
    regex.find(text).map(|m| m.as_str().to_string())
}

/// Comma-separated keyword list, whole-word matched against the lowercased
/// text. The first matching keyword wins.
fn match_keyword(pattern: &str, text: &str) -> Option<String> {
    let text_lower = text.to_lowercase();
    for keyword in pattern.split(',') {
        let keyword = keyword.trim().to_lowercase();
        if keyword.is_empty() {
            continue;
        }
        let word_pattern = format!(r"\b{}\b", regex::escape(&keyword));
        match RegexBuilder::new(&word_pattern).build() {
            Ok(regex) if regex.is_match(&text_lower) => return Some(keyword),
            Ok(_) => {}
            Err(e) => {
                tracing::error!(keyword = %keyword, error = %e, "Keyword pattern failed to build");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOC: &str = r#"
[[rules]]
rule_id = "PHI_001"
category = "PHI_HIPAA"
pattern_type = "regex"
pattern = '\b(SSN|social security|medical record number|MRN|patient id)\b'
severity = "block"
action_message = "I cannot discuss specific patient identifiers. Please keep our conversation general."
noncompliance_description = "Attempted to reference patient identifiers"
enabled = true

[[rules]]
rule_id = "PHI_002"
category = "PHI_HIPAA"
pattern_type = "regex"
pattern = '\b\d{3}-\d{2}-\d{4}\b'
severity = "block"
action_message = "I cannot discuss specific patient identifiers. Please keep our conversation general."
noncompliance_description = "SSN-like pattern detected"
enabled = true

[[rules]]
rule_id = "AE_001"
category = "AE_DETECTION"
pattern_type = "keyword"
pattern = "side effect,adverse event,reaction"
severity = "warn"
action_message = "Thank you for reporting this. A medical information specialist will follow up."
noncompliance_description = "Adverse event mentioned"
enabled = true

[[rules]]
rule_id = "COMPARATIVE_001"
category = "COMPARATIVE_CLAIM"
pattern_type = "keyword"
pattern = "better than,superior to,outperforms"
severity = "rewrite"
action_message = "Each treatment option has its own profile."
noncompliance_description = "Unsubstantiated comparative claim"
enabled = true

[[rules]]
rule_id = "PRICING_001"
category = "PRICING_REBATE"
pattern_type = "keyword"
pattern = "cost,price,copay,rebate,discount"
severity = "block"
action_message = "I cannot discuss pricing details."
noncompliance_description = "Pricing discussion not permitted"
enabled = true

[[rules]]
rule_id = "DISABLED_001"
category = "GUARANTEE"
pattern_type = "keyword"
pattern = "guaranteed"
severity = "block"
action_message = "Outcomes vary."
noncompliance_description = "Guarantee claim"
enabled = false

[[rules]]
rule_id = "BROKEN_001"
category = "CLINICAL_GUIDANCE"
pattern_type = "regex"
pattern = '([unclosed'
severity = "block"
action_message = "n/a"
noncompliance_description = "broken pattern"
enabled = true

[[language_policies]]
allowed_locales = "en-US,en-GB,en-CA,en-AU"
fallback_message = "Please continue in English."
"#;

    fn engine() -> (GuardrailEngine, tempfile::NamedTempFile) {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(DOC.as_bytes()).unwrap();
        file.flush().unwrap();
        let store = Arc::new(RuleStore::new(file.path()).unwrap());
        (GuardrailEngine::new(store).unwrap(), file)
    }

    #[test]
    fn empty_text_short_circuits() {
        let (engine, _doc) = engine();
        assert!(!engine.check("", Some("en-US"), Role::Assistant).has_violations());
        assert!(!engine.check("   ", Some("en-US"), Role::Assistant).has_violations());
    }

    #[test]
    fn ssn_pattern_blocks_with_phi_category() {
        let (engine, _doc) = engine();
        let result = engine.check(
            "The patient's SSN is 123-45-6789",
            Some("en-US"),
            Role::Assistant,
        );
        assert!(result.should_block());
        assert!(result
            .violations
            .iter()
            .any(|v| v.category == "PHI_HIPAA"));
        assert_eq!(
            result.action_message(),
            Some("I cannot discuss specific patient identifiers. Please keep our conversation general.")
        );
    }

    #[test]
    fn block_wins_over_rewrite_when_both_match() {
        let (engine, _doc) = engine();
        let result = engine.check(
            "This is better than competitor X and the price is lower",
            Some("en-US"),
            Role::Assistant,
        );
        assert!(result.violations.len() >= 2);
        assert!(result.should_block());
        assert!(!result.should_rewrite());
        assert_eq!(
            result.highest_severity_violation().unwrap().severity,
            Severity::Block
        );
    }

    #[test]
    fn adverse_event_only_warns() {
        let (engine, _doc) = engine();
        let result = engine.check("I experienced a side effect", Some("en-US"), Role::User);
        assert!(!result.should_block());
        assert!(!result.should_rewrite());
        assert!(result.should_warn());
        assert_eq!(
            result.highest_severity_violation().unwrap().severity,
            Severity::Warn
        );
    }

    #[test]
    fn disabled_rules_never_match() {
        let (engine, _doc) = engine();
        let result = engine.check("This outcome is guaranteed", Some("en-US"), Role::Assistant);
        assert!(!result.all_matched_rules.contains(&"DISABLED_001".to_string()));
    }

    #[test]
    fn invalid_regex_is_skipped_not_fatal() {
        let (engine, _doc) = engine();
        // BROKEN_001 has an unparsable pattern; other rules still evaluate
        let result = engine.check("price", Some("en-US"), Role::Assistant);
        assert!(result.should_block());
        assert!(!result.all_matched_rules.contains(&"BROKEN_001".to_string()));
    }

    #[test]
    fn rejected_locale_blocks_and_short_circuits() {
        let (engine, _doc) = engine();
        // Text that would also hit PRICING_001 if rule evaluation ran
        let result = engine.check("le prix est bas, price", Some("fr-FR"), Role::Assistant);
        assert_eq!(result.violations.len(), 1);
        let v = &result.violations[0];
        assert_eq!(v.rule_id, "LANGUAGE_001");
        assert_eq!(v.category, "LANGUAGE_EN_ONLY");
        assert!(result.should_block());
        assert_eq!(result.action_message(), Some("Please continue in English."));
    }

    #[test]
    fn locale_normalization_accepts_variants() {
        let (engine, _doc) = engine();
        for locale in ["en-US", "en_US", "EN-GB", "en-US-posix"] {
            let result = engine.check("hello there", Some(locale), Role::Assistant);
            assert!(!result.has_violations(), "locale {locale} should pass");
        }
    }

    #[test]
    fn base_language_tag_is_accepted() {
        // Open question kept as-is: bare "en" satisfies an en-US-only policy
        let (engine, _doc) = engine();
        let result = engine.check("hello there", Some("en"), Role::Assistant);
        assert!(!result.has_violations());
    }

    #[test]
    fn missing_locale_skips_language_check() {
        let (engine, _doc) = engine();
        let result = engine.check("hello there", None, Role::Assistant);
        assert!(!result.has_violations());
    }

    #[test]
    fn keyword_matching_is_whole_word() {
        let (engine, _doc) = engine();
        // "costume" must not trigger the "cost" keyword
        let result = engine.check("nice costume", Some("en-US"), Role::Assistant);
        assert!(!result.has_violations());

        let result = engine.check("what does it cost", Some("en-US"), Role::Assistant);
        assert!(result.should_block());
    }

    #[test]
    fn status_reports_rule_counts() {
        let (engine, _doc) = engine();
        let status = engine.status().unwrap();
        assert_eq!(status.total_rules, 7);
        assert_eq!(status.enabled_rules, 6);
        assert!(status.language_policy_configured);
        assert!(status.categories.contains(&"PHI_HIPAA".to_string()));
    }
}
