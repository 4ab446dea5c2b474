//! Provider event protocol
//!
//! Every message on the bidirectional stream is a JSON envelope
//! `{"event": {<eventName>: {...}}}`. The types here construct and parse
//! those envelopes; protocol messages are never assembled by string
//! formatting, so arbitrary nested JSON (system prompts, tool results)
//! cannot break the framing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use repvoice_core::session::Role;
use repvoice_tools::ToolDefinition;

/// Marker the provider embeds in transcript text on barge-in
pub const INTERRUPTED_MARKER: &str = r#"{ "interrupted" : true }"#;

/// Top-level protocol envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub event: Event,
}

/// All protocol events, keyed by their wire name
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Event {
    SessionStart(SessionStartEvent),
    PromptStart(PromptStartEvent),
    ContentStart(ContentStartEvent),
    AudioInput(PayloadEvent),
    TextInput(PayloadEvent),
    ToolResult(PayloadEvent),
    ContentEnd(ContentEndEvent),
    PromptEnd(PromptEndEvent),
    SessionEnd(SessionEndEvent),
    TextOutput(TextOutputEvent),
    AudioOutput(AudioOutputEvent),
    ToolUse(ToolUseEvent),
}

impl Event {
    /// Wire name, for logs and assertions
    pub fn name(&self) -> &'static str {
        match self {
            Event::SessionStart(_) => "sessionStart",
            Event::PromptStart(_) => "promptStart",
            Event::ContentStart(_) => "contentStart",
            Event::AudioInput(_) => "audioInput",
            Event::TextInput(_) => "textInput",
            Event::ToolResult(_) => "toolResult",
            Event::ContentEnd(_) => "contentEnd",
            Event::PromptEnd(_) => "promptEnd",
            Event::SessionEnd(_) => "sessionEnd",
            Event::TextOutput(_) => "textOutput",
            Event::AudioOutput(_) => "audioOutput",
            Event::ToolUse(_) => "toolUse",
        }
    }
}

/// Inference parameters sent at session start
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceConfiguration {
    pub max_tokens: u32,
    pub top_p: f32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStartEvent {
    pub inference_configuration: InferenceConfiguration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptStartEvent {
    pub prompt_name: String,
    pub text_output_configuration: TextConfiguration,
    pub audio_output_configuration: AudioOutputConfiguration,
    pub tool_use_output_configuration: MediaTypeConfiguration,
    pub tool_configuration: ToolConfiguration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextConfiguration {
    pub media_type: String,
}

impl TextConfiguration {
    pub fn plain() -> Self {
        Self {
            media_type: "text/plain".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaTypeConfiguration {
    pub media_type: String,
}

/// Audio emitted by the provider (voice output)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputConfiguration {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    pub voice_id: String,
    pub encoding: String,
    pub audio_type: String,
}

impl AudioOutputConfiguration {
    pub fn lpcm(sample_rate_hertz: u32, sample_size_bits: u32, channel_count: u32, voice_id: impl Into<String>) -> Self {
        Self {
            media_type: "audio/lpcm".to_string(),
            sample_rate_hertz,
            sample_size_bits,
            channel_count,
            voice_id: voice_id.into(),
            encoding: "base64".to_string(),
            audio_type: "SPEECH".to_string(),
        }
    }
}

/// Audio accepted from the client (microphone input)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioInputConfiguration {
    pub media_type: String,
    pub sample_rate_hertz: u32,
    pub sample_size_bits: u32,
    pub channel_count: u32,
    pub audio_type: String,
    pub encoding: String,
}

impl AudioInputConfiguration {
    pub fn lpcm(sample_rate_hertz: u32, sample_size_bits: u32, channel_count: u32) -> Self {
        Self {
            media_type: "audio/lpcm".to_string(),
            sample_rate_hertz,
            sample_size_bits,
            channel_count,
            audio_type: "SPEECH".to_string(),
            encoding: "base64".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolConfiguration {
    pub tools: Vec<ToolSpec>,
}

/// One tool declaration advertised at promptStart
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    pub tool_spec: ToolSpecInner,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpecInner {
    pub name: String,
    pub description: String,
    pub input_schema: InputSchema,
}

/// The schema travels as JSON text inside the declaration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSchema {
    pub json: String,
}

impl From<&ToolDefinition> for ToolSpec {
    fn from(def: &ToolDefinition) -> Self {
        Self {
            tool_spec: ToolSpecInner {
                name: def.name.to_string(),
                description: def.description.to_string(),
                input_schema: InputSchema {
                    json: def.input_schema.to_string(),
                },
            },
        }
    }
}

/// Content block type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ContentType {
    Audio,
    Text,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentStartEvent {
    pub prompt_name: String,
    pub content_name: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub interactive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_input_configuration: Option<AudioInputConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_input_configuration: Option<TextConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result_input_configuration: Option<ToolResultInputConfiguration>,
    /// Provider-side extras on inbound contentStart (generation stage etc.)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_model_fields: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultInputConfiguration {
    pub tool_use_id: String,
    #[serde(rename = "type")]
    pub content_type: ContentType,
    pub text_input_configuration: TextConfiguration,
}

/// audioInput / textInput / toolResult all share this payload shape
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadEvent {
    pub prompt_name: String,
    pub content_name: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEndEvent {
    pub prompt_name: String,
    pub content_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptEndEvent {
    pub prompt_name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionEndEvent {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOutputEvent {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutputEvent {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUseEvent {
    pub tool_use_id: String,
    pub tool_name: String,
    /// JSON-encoded tool arguments
    #[serde(default)]
    pub content: Option<String>,
}

impl Envelope {
    fn new(event: Event) -> Self {
        Self { event }
    }

    pub fn session_start(inference: InferenceConfiguration) -> Self {
        Self::new(Event::SessionStart(SessionStartEvent {
            inference_configuration: inference,
        }))
    }

    pub fn prompt_start(
        prompt_name: impl Into<String>,
        audio_output: AudioOutputConfiguration,
        tools: Vec<ToolSpec>,
    ) -> Self {
        Self::new(Event::PromptStart(PromptStartEvent {
            prompt_name: prompt_name.into(),
            text_output_configuration: TextConfiguration::plain(),
            audio_output_configuration: audio_output,
            tool_use_output_configuration: MediaTypeConfiguration {
                media_type: "application/json".to_string(),
            },
            tool_configuration: ToolConfiguration { tools },
        }))
    }

    /// TEXT content block carrying the system prompt (or any text input)
    pub fn text_content_start(
        prompt_name: impl Into<String>,
        content_name: impl Into<String>,
        role: Role,
    ) -> Self {
        Self::new(Event::ContentStart(ContentStartEvent {
            prompt_name: prompt_name.into(),
            content_name: content_name.into(),
            content_type: ContentType::Text,
            interactive: true,
            role: Some(role),
            audio_input_configuration: None,
            text_input_configuration: Some(TextConfiguration::plain()),
            tool_result_input_configuration: None,
            additional_model_fields: None,
        }))
    }

    /// AUDIO content block for the user's microphone stream
    pub fn audio_content_start(
        prompt_name: impl Into<String>,
        content_name: impl Into<String>,
        audio_input: AudioInputConfiguration,
    ) -> Self {
        Self::new(Event::ContentStart(ContentStartEvent {
            prompt_name: prompt_name.into(),
            content_name: content_name.into(),
            content_type: ContentType::Audio,
            interactive: true,
            role: Some(Role::User),
            audio_input_configuration: Some(audio_input),
            text_input_configuration: None,
            tool_result_input_configuration: None,
            additional_model_fields: None,
        }))
    }

    /// TOOL content block referencing the originating toolUse id
    pub fn tool_content_start(
        prompt_name: impl Into<String>,
        content_name: impl Into<String>,
        tool_use_id: impl Into<String>,
    ) -> Self {
        Self::new(Event::ContentStart(ContentStartEvent {
            prompt_name: prompt_name.into(),
            content_name: content_name.into(),
            content_type: ContentType::Tool,
            interactive: false,
            role: Some(Role::Tool),
            audio_input_configuration: None,
            text_input_configuration: None,
            tool_result_input_configuration: Some(ToolResultInputConfiguration {
                tool_use_id: tool_use_id.into(),
                content_type: ContentType::Text,
                text_input_configuration: TextConfiguration::plain(),
            }),
            additional_model_fields: None,
        }))
    }

    pub fn text_input(
        prompt_name: impl Into<String>,
        content_name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(Event::TextInput(PayloadEvent {
            prompt_name: prompt_name.into(),
            content_name: content_name.into(),
            content: content.into(),
        }))
    }

    pub fn audio_input(
        prompt_name: impl Into<String>,
        content_name: impl Into<String>,
        base64_audio: impl Into<String>,
    ) -> Self {
        Self::new(Event::AudioInput(PayloadEvent {
            prompt_name: prompt_name.into(),
            content_name: content_name.into(),
            content: base64_audio.into(),
        }))
    }

    /// Tool result payload; the result JSON is carried as serialized text
    pub fn tool_result(
        prompt_name: impl Into<String>,
        content_name: impl Into<String>,
        result: &Value,
    ) -> Self {
        Self::new(Event::ToolResult(PayloadEvent {
            prompt_name: prompt_name.into(),
            content_name: content_name.into(),
            content: result.to_string(),
        }))
    }

    pub fn content_end(
        prompt_name: impl Into<String>,
        content_name: impl Into<String>,
    ) -> Self {
        Self::new(Event::ContentEnd(ContentEndEvent {
            prompt_name: prompt_name.into(),
            content_name: content_name.into(),
        }))
    }

    pub fn prompt_end(prompt_name: impl Into<String>) -> Self {
        Self::new(Event::PromptEnd(PromptEndEvent {
            prompt_name: prompt_name.into(),
        }))
    }

    pub fn session_end() -> Self {
        Self::new(Event::SessionEnd(SessionEndEvent::default()))
    }
}
