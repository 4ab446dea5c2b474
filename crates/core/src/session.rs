//! Session status and speaker-role models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Speaker role on the provider stream.
/// Serialized uppercase to match the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    #[default]
    Assistant,
    System,
    Tool,
}

impl Role {
    /// Wire form ("USER", "ASSISTANT", ...)
    pub fn wire_name(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Assistant => "ASSISTANT",
            Role::System => "SYSTEM",
            Role::Tool => "TOOL",
        }
    }

    /// Lowercase form used in transcripts and audit records
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }

    /// Parse either the wire form or the lowercase form
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            "tool" => Some(Role::Tool),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Created,
    Active,
    Ended,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Created => "created",
            SessionStatus::Active => "active",
            SessionStatus::Ended => "ended",
            SessionStatus::Error => "error",
        }
    }
}

/// Session information surfaced by the info endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub audio_bytes_sent: u64,
    #[serde(default)]
    pub audio_bytes_received: u64,
    #[serde(default)]
    pub message_count: u64,
}

impl SessionInfo {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Active,
            created_at: now,
            last_activity: Some(now),
            audio_bytes_sent: 0,
            audio_bytes_received: 0,
            message_count: 0,
        }
    }

    /// Record activity now
    pub fn touch(&mut self) {
        self.last_activity = Some(Utc::now());
    }
}
