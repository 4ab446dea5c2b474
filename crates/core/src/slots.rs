//! Slot-filling conversation state and the final call record
//!
//! Tracks the structured fields a call-recording dialogue must collect
//! (HCP name, date, time, product) independently of the underlying model
//! turns, and produces the confirmation summary plus the final record.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::Role;

/// Slots that must be filled before the summary can be confirmed
pub const REQUIRED_SLOTS: &[&str] = &["hcp_name", "date", "time", "product"];

/// A single turn in the conversation transcript
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Follow-up task captured alongside a call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FollowUpTask {
    #[serde(default)]
    pub task_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub due_date: String,
    #[serde(default)]
    pub assigned_to: String,
}

impl FollowUpTask {
    pub fn is_present(&self) -> bool {
        !self.task_type.is_empty()
    }
}

/// Final structured call record persisted after the user confirms the summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_channel: String,
    pub discussion_topic: String,
    pub status: String,
    pub account: String,
    pub id: String,
    pub adverse_event: bool,
    pub adverse_event_details: Option<String>,
    pub noncompliance_event: bool,
    pub noncompliance_description: String,
    pub call_notes: String,
    pub call_date: Option<String>,
    pub call_time: Option<String>,
    pub product: String,
    pub call_follow_up_task: FollowUpTask,
}

impl Default for CallRecord {
    fn default() -> Self {
        Self {
            call_channel: "In-person".to_string(),
            discussion_topic: String::new(),
            status: "Saved_vod".to_string(),
            account: String::new(),
            id: String::new(),
            adverse_event: false,
            adverse_event_details: None,
            noncompliance_event: false,
            noncompliance_description: String::new(),
            call_notes: String::new(),
            call_date: None,
            call_time: None,
            product: String::new(),
            call_follow_up_task: FollowUpTask::default(),
        }
    }
}

/// Per-session slot-filling state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSlotState {
    pub session_id: String,
    pub hcp_name: Option<String>,
    pub hcp_id: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub product: Option<String>,
    #[serde(default)]
    pub call_notes: String,
    #[serde(default)]
    pub discussion_topic: String,
    #[serde(default)]
    pub follow_up: FollowUpTask,
    #[serde(default)]
    pub adverse_event: bool,
    pub adverse_event_details: Option<String>,
    #[serde(default)]
    pub noncompliance_event: bool,
    #[serde(default)]
    pub noncompliance_description: String,
    #[serde(default)]
    pub confirmed_slots: HashSet<String>,
    #[serde(default)]
    pub transcript: Vec<Turn>,
    #[serde(default)]
    pub summary_read_back: bool,
    pub output_record: Option<CallRecord>,
}

impl ConversationSlotState {
    pub fn new(session_id: impl Into<String>) -> Self {
        let session_id = session_id.into();
        tracing::info!(session_id = %session_id, "Initialized conversation slot state");
        Self {
            session_id,
            hcp_name: None,
            hcp_id: None,
            date: None,
            time: None,
            product: None,
            call_notes: String::new(),
            discussion_topic: String::new(),
            follow_up: FollowUpTask::default(),
            adverse_event: false,
            adverse_event_details: None,
            noncompliance_event: false,
            noncompliance_description: String::new(),
            confirmed_slots: HashSet::new(),
            transcript: Vec::new(),
            summary_read_back: false,
            output_record: None,
        }
    }

    /// Append a turn to the transcript
    pub fn add_turn(&mut self, role: Role, content: impl Into<String>) {
        self.transcript.push(Turn::new(role, content));
    }

    /// Set a slot by name. Unknown names are logged and ignored.
    pub fn set_slot(&mut self, name: &str, value: Value) {
        let as_string = |v: &Value| match v {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        };

        match name {
            "hcp_name" => self.hcp_name = as_string(&value),
            "hcp_id" => self.hcp_id = as_string(&value),
            "date" => self.date = as_string(&value),
            "time" => self.time = as_string(&value),
            "product" => self.product = as_string(&value),
            "call_notes" => self.call_notes = as_string(&value).unwrap_or_default(),
            "discussion_topic" => self.discussion_topic = as_string(&value).unwrap_or_default(),
            "adverse_event" => self.adverse_event = value.as_bool().unwrap_or(false),
            "adverse_event_details" => self.adverse_event_details = as_string(&value),
            "noncompliance_event" => self.noncompliance_event = value.as_bool().unwrap_or(false),
            "noncompliance_description" => {
                self.noncompliance_description = as_string(&value).unwrap_or_default()
            }
            "call_follow_up_task" => {
                match serde_json::from_value::<FollowUpTask>(value) {
                    Ok(task) => self.follow_up = task,
                    Err(e) => tracing::warn!(error = %e, "Invalid follow-up task payload"),
                }
                return;
            }
            other => {
                tracing::warn!(slot = other, "Attempted to set unknown slot");
                return;
            }
        }
        tracing::info!(session_id = %self.session_id, slot = name, "Slot updated");
    }

    /// Mark a slot as confirmed by the user
    pub fn confirm_slot(&mut self, name: impl Into<String>) {
        self.confirmed_slots.insert(name.into());
    }

    pub fn is_slot_filled(&self, name: &str) -> bool {
        let filled = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());
        match name {
            "hcp_name" => filled(&self.hcp_name),
            "hcp_id" => filled(&self.hcp_id),
            "date" => filled(&self.date),
            "time" => filled(&self.time),
            "product" => filled(&self.product),
            _ => false,
        }
    }

    /// Required slots still missing, in canonical order
    pub fn missing_required_slots(&self) -> Vec<&'static str> {
        REQUIRED_SLOTS
            .iter()
            .copied()
            .filter(|slot| !self.is_slot_filled(slot))
            .collect()
    }

    pub fn all_required_slots_filled(&self) -> bool {
        self.missing_required_slots().is_empty()
    }

    /// The question to ask next, driven by the first missing required slot.
    /// Returns the confirmation summary once everything is filled but not
    /// yet read back, and nothing once the summary has been confirmed.
    pub fn next_prompt(&self) -> Option<String> {
        if let Some(slot) = self.missing_required_slots().first() {
            let question = match *slot {
                "hcp_name" => "Which healthcare professional did you meet with?",
                "date" => "What date was the interaction?",
                "time" => "What time did the interaction take place?",
                "product" => "Which product did you discuss?",
                _ => return None,
            };
            return Some(question.to_string());
        }
        if !self.summary_read_back {
            return Some(self.generate_summary());
        }
        None
    }

    /// Human-readable confirmation summary read back before persisting
    pub fn generate_summary(&self) -> String {
        let unknown = || "Unknown".to_string();
        let mut summary = format!(
            "Let me confirm the details of your call recording. \
             You met with {}, whose ID is {}. \
             The meeting was on {} at {}. \
             You discussed {}. ",
            self.hcp_name.clone().unwrap_or_else(unknown),
            self.hcp_id.clone().unwrap_or_else(unknown),
            self.date.clone().unwrap_or_else(unknown),
            self.time.clone().unwrap_or_else(unknown),
            self.product.clone().unwrap_or_else(unknown),
        );

        if !self.call_notes.is_empty() {
            summary.push_str(&format!("Your call notes mention: {}. ", self.call_notes));
        }
        if self.follow_up.is_present() {
            summary.push_str(&format!(
                "You have a follow-up task: {}. {}. ",
                self.follow_up.task_type, self.follow_up.description
            ));
        }

        summary.push_str("Is this correct?");
        summary
    }

    /// Build the final call record and remember it on the state
    pub fn finalize(&mut self) -> CallRecord {
        let record = CallRecord {
            account: self.hcp_name.clone().unwrap_or_default(),
            id: self.hcp_id.clone().unwrap_or_default(),
            call_date: self.date.clone(),
            call_time: self.time.clone(),
            product: self.product.clone().unwrap_or_default(),
            call_notes: self.call_notes.clone(),
            discussion_topic: self.discussion_topic.clone(),
            adverse_event: self.adverse_event,
            adverse_event_details: self.adverse_event_details.clone(),
            noncompliance_event: self.noncompliance_event,
            noncompliance_description: self.noncompliance_description.clone(),
            call_follow_up_task: self.follow_up.clone(),
            ..CallRecord::default()
        };
        self.output_record = Some(record.clone());
        tracing::info!(session_id = %self.session_id, "Generated call record");
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_slots_follow_canonical_order() {
        let mut state = ConversationSlotState::new("s-1");
        assert_eq!(
            state.missing_required_slots(),
            vec!["hcp_name", "date", "time", "product"]
        );

        state.set_slot("hcp_name", json!("Dr. Susan Carter"));
        state.set_slot("time", json!("2:30 PM"));
        assert_eq!(state.missing_required_slots(), vec!["date", "product"]);
        assert!(!state.all_required_slots_filled());

        state.set_slot("date", json!("2025-11-12"));
        state.set_slot("product", json!("Cardiofix"));
        assert!(state.all_required_slots_filled());
    }

    #[test]
    fn unknown_slot_is_ignored() {
        let mut state = ConversationSlotState::new("s-1");
        state.set_slot("favorite_color", json!("blue"));
        assert!(state.missing_required_slots().len() == 4);
    }

    #[test]
    fn next_prompt_walks_missing_slots_then_summary() {
        let mut state = ConversationSlotState::new("s-1");
        assert!(state.next_prompt().unwrap().contains("healthcare professional"));

        state.set_slot("hcp_name", json!("Dr. William Harper"));
        assert!(state.next_prompt().unwrap().contains("date"));

        state.set_slot("date", json!("2025-11-12"));
        state.set_slot("time", json!("10:00 AM"));
        state.set_slot("product", json!("Cardiofix"));
        let summary = state.next_prompt().unwrap();
        assert!(summary.contains("Let me confirm"));
        assert!(summary.ends_with("Is this correct?"));

        state.summary_read_back = true;
        assert!(state.next_prompt().is_none());
    }

    #[test]
    fn summary_includes_notes_and_follow_up() {
        let mut state = ConversationSlotState::new("s-1");
        state.set_slot("hcp_name", json!("Dr. Emily Hughes"));
        state.set_slot("hcp_id", json!("0013K000013ez2UQAQ"));
        state.set_slot("date", json!("2025-11-12"));
        state.set_slot("time", json!("3:00 PM"));
        state.set_slot("product", json!("Cardiofix"));
        state.set_slot("call_notes", json!("Discussed dosing materials"));
        state.set_slot(
            "call_follow_up_task",
            json!({"task_type": "Email", "description": "Send samples brochure",
                   "due_date": "2025-11-13", "assigned_to": "Sales Rep 1"}),
        );

        let summary = state.generate_summary();
        assert!(summary.contains("Dr. Emily Hughes"));
        assert!(summary.contains("Discussed dosing materials"));
        assert!(summary.contains("follow-up task: Email"));
    }

    #[test]
    fn finalize_maps_slots_into_record() {
        let mut state = ConversationSlotState::new("s-1");
        state.set_slot("hcp_name", json!("Dr. James Lawson"));
        state.set_slot("hcp_id", json!("0013K000013ez2TQAQ"));
        state.set_slot("date", json!("2025-11-12"));
        state.set_slot("time", json!("9:00 AM"));
        state.set_slot("product", json!("Cardiofix"));
        state.set_slot("noncompliance_event", json!(true));
        state.set_slot("noncompliance_description", json!("Pricing question raised"));

        let record = state.finalize();
        assert_eq!(record.call_channel, "In-person");
        assert_eq!(record.status, "Saved_vod");
        assert_eq!(record.account, "Dr. James Lawson");
        assert_eq!(record.id, "0013K000013ez2TQAQ");
        assert_eq!(record.call_date.as_deref(), Some("2025-11-12"));
        assert!(record.noncompliance_event);
        assert!(state.output_record.is_some());
    }

    #[test]
    fn transcript_records_turns_in_order() {
        let mut state = ConversationSlotState::new("s-1");
        state.add_turn(Role::User, "I met Dr. Harper today");
        state.add_turn(Role::Assistant, "What date was the interaction?");
        assert_eq!(state.transcript.len(), 2);
        assert_eq!(state.transcript[0].role, Role::User);
    }
}
