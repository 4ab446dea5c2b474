//! Output event translation
//!
//! Turns the session's internal stream events into client-facing events.
//! Assistant transcripts pass through the guardrail engine first: blocked or
//! rewritten text is replaced with the rule's compliant message, the check is
//! audit logged, and the audio belonging to that content block is suppressed.
//! Confirmed tool results feed the slot-filling state as a side channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::Stream;
use serde::Serialize;
use serde_json::Value;

use repvoice_core::session::Role;
use repvoice_stream::{OutputConsumer, StreamEvent};

use crate::registry::SessionHandle;
use crate::state::AppState;

/// Locale attached to guardrail checks on the output path.
/// TODO: derive from per-session negotiation once the client reports one.
const SESSION_LOCALE: &str = "en-US";

/// Events delivered to the client over the output stream
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    Transcript {
        speaker: String,
        text: String,
        timestamp: DateTime<Utc>,
    },
    AudioResponse {
        audio_data: String,
        format: String,
        sample_rate: u32,
        channels: u32,
        timestamp: DateTime<Utc>,
    },
    ToolLog {
        kind: String,
        tool_name: String,
        tool_use_id: String,
        payload: Value,
        timestamp: DateTime<Utc>,
    },
    ContentStart {
        role: String,
        timestamp: DateTime<Utc>,
    },
    ContentEnd {
        timestamp: DateTime<Utc>,
    },
    Error {
        message: String,
        timestamp: DateTime<Utc>,
    },
}

impl ClientEvent {
    /// SSE event name
    pub fn event_name(&self) -> &'static str {
        match self {
            ClientEvent::Transcript { .. } => "transcript",
            ClientEvent::AudioResponse { .. } => "audio",
            ClientEvent::ToolLog { .. } => "tool_log",
            ClientEvent::ContentStart { .. } => "content_start",
            ClientEvent::ContentEnd { .. } => "content_end",
            ClientEvent::Error { .. } => "error",
        }
    }
}

/// Translate the session's bus into client events until the bus closes or
/// the provider reports an error.
pub fn client_event_stream(
    state: AppState,
    handle: Arc<SessionHandle>,
    mut consumer: OutputConsumer,
) -> impl Stream<Item = ClientEvent> {
    async_stream::stream! {
        let session_id = handle.stream.session_id().to_string();
        let audio = state.settings.audio.clone();
        // Set while the current content block's audio must not reach the
        // client (guardrail substitution or barge-in)
        let mut suppress_audio = false;

        loop {
            let event = match consumer.recv().await {
                Ok(event) => event,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(session_id = %session_id, skipped, "Output consumer lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            };
            handle.touch();

            match event {
                StreamEvent::ContentStart { role, .. } => {
                    suppress_audio = false;
                    handle.stream.clear_barge_in();
                    yield ClientEvent::ContentStart {
                        role: role.as_str().to_string(),
                        timestamp: Utc::now(),
                    };
                }
                StreamEvent::Transcript { role, text } => {
                    let final_text = if role == Role::Assistant {
                        let checked = check_assistant_text(&state, &handle, &session_id, &text);
                        if checked.replaced {
                            suppress_audio = true;
                        }
                        checked.text
                    } else {
                        handle.slots.lock().add_turn(role, text.clone());
                        text
                    };

                    handle.info.write().message_count += 1;
                    yield ClientEvent::Transcript {
                        speaker: role.as_str().to_string(),
                        text: final_text,
                        timestamp: Utc::now(),
                    };
                }
                StreamEvent::Interrupted => {
                    // Barge-in: never shown as a transcript; drop the rest of
                    // the interrupted turn's audio
                    suppress_audio = true;
                }
                StreamEvent::Audio { content } => {
                    if suppress_audio {
                        tracing::debug!(session_id = %session_id, "Suppressing audio chunk");
                        continue;
                    }
                    handle.info.write().audio_bytes_received += (content.len() as u64 * 3) / 4;
                    yield ClientEvent::AudioResponse {
                        audio_data: content,
                        format: "pcm".to_string(),
                        sample_rate: audio.output_sample_rate,
                        channels: audio.channels,
                        timestamp: Utc::now(),
                    };
                }
                StreamEvent::ToolInvocation { tool_name, tool_use_id, input } => {
                    yield ClientEvent::ToolLog {
                        kind: "invocation".to_string(),
                        tool_name,
                        tool_use_id,
                        payload: input,
                        timestamp: Utc::now(),
                    };
                }
                StreamEvent::ToolResult { tool_name, tool_use_id, result } => {
                    apply_tool_result_to_slots(&handle, &tool_name, &result);
                    yield ClientEvent::ToolLog {
                        kind: "result".to_string(),
                        tool_name,
                        tool_use_id,
                        payload: result,
                        timestamp: Utc::now(),
                    };
                }
                StreamEvent::ContentEnd => {
                    suppress_audio = false;
                    yield ClientEvent::ContentEnd { timestamp: Utc::now() };
                }
                StreamEvent::PromptEnd => {}
                StreamEvent::Error { message } => {
                    yield ClientEvent::Error {
                        message,
                        timestamp: Utc::now(),
                    };
                    break;
                }
            }
        }
    }
}

struct CheckedText {
    text: String,
    replaced: bool,
}

/// Run one assistant utterance through guardrails, audit the decision, and
/// substitute the compliant message on block/rewrite.
fn check_assistant_text(
    state: &AppState,
    handle: &SessionHandle,
    session_id: &str,
    text: &str,
) -> CheckedText {
    let result = state
        .engine
        .check(text, Some(SESSION_LOCALE), Role::Assistant);

    state
        .audit
        .log_check(session_id, Role::Assistant, text, &result, Some(SESSION_LOCALE));

    let mut slots = handle.slots.lock();
    if result
        .violations
        .iter()
        .any(|v| v.category == "AE_DETECTION")
    {
        slots.adverse_event = true;
    }

    if result.should_block() || result.should_rewrite() {
        let replacement = result
            .action_message()
            .unwrap_or("I cannot continue with that topic.")
            .to_string();

        slots.noncompliance_event = true;
        if let Some(violation) = result.highest_severity_violation() {
            slots.noncompliance_description = violation.noncompliance_description.clone();
        }
        slots.add_turn(Role::Assistant, replacement.clone());

        tracing::warn!(
            session_id,
            rules = ?result.all_matched_rules,
            "Guardrail violation: substituting compliant message"
        );
        CheckedText {
            text: replacement,
            replaced: true,
        }
    } else {
        slots.add_turn(Role::Assistant, text.to_string());
        CheckedText {
            text: text.to_string(),
            replaced: false,
        }
    }
}

/// Side channel from confirmed tool results into the slot-filling state
fn apply_tool_result_to_slots(handle: &SessionHandle, tool_name: &str, result: &Value) {
    let mut slots = handle.slots.lock();
    match tool_name {
        "lookupHcpTool" if result["found"] == true => {
            if let Some(name) = result.get("name").and_then(Value::as_str) {
                slots.set_slot("hcp_name", Value::String(name.to_string()));
            }
            if let Some(id) = result.get("hcp_id").and_then(Value::as_str) {
                slots.set_slot("hcp_id", Value::String(id.to_string()));
            }
            slots.confirm_slot("hcp_name");
        }
        "insertCallTool" if result["ok"] == true => {
            // Persistence only happens after the user confirms the summary
            slots.summary_read_back = true;
            slots.finalize();
        }
        _ => {}
    }
}
