//! Core types for the rep voice agent
//!
//! This crate provides foundational types used across all other crates:
//! - Guardrail rule, violation, and check-result types
//! - Speaker roles and session status/info models
//! - Conversation slot-filling state and the final call record

pub mod guardrail;
pub mod session;
pub mod slots;

pub use guardrail::{
    ActionTaken, GuardrailCheckResult, GuardrailRule, GuardrailViolation,
    LanguagePolicy, PatternType, Severity,
};
pub use session::{Role, SessionInfo, SessionStatus};
pub use slots::{CallRecord, ConversationSlotState, FollowUpTask, Turn, REQUIRED_SLOTS};
