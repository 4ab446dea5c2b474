//! Per-session stream coordination
//!
//! A `StreamSession` owns one bidirectional provider stream: it sends the
//! initialization sequence, forwards audio, runs the tool round trip, and
//! fans provider events out on an internal broadcast bus. Exactly one
//! response loop reads from the provider; at most one external output
//! consumer may be attached at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use repvoice_core::session::Role;
use repvoice_tools::ToolDispatcher;

use crate::protocol::{
    AudioInputConfiguration, AudioOutputConfiguration, Envelope, Event, InferenceConfiguration,
    ToolSpec, INTERRUPTED_MARKER,
};
use crate::provider::{ProviderConnector, ProviderSink, ProviderSource};
use crate::StreamError;

const EVENT_BUS_CAPACITY: usize = 256;

/// Session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    Streaming,
    Closing,
    Closed,
    Error,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Created => "created",
            SessionState::Streaming => "streaming",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Error => "error",
        }
    }
}

/// Translated provider events published on the session bus
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    ContentStart { role: Role, speculative: bool },
    Transcript { role: Role, text: String },
    Interrupted,
    Audio { content: String },
    ToolInvocation {
        tool_name: String,
        tool_use_id: String,
        input: Value,
    },
    ToolResult {
        tool_name: String,
        tool_use_id: String,
        result: Value,
    },
    ContentEnd,
    PromptEnd,
    Error { message: String },
}

/// Stream parameters resolved by the caller from application settings
#[derive(Debug, Clone)]
pub struct StreamSessionConfig {
    pub model_id: String,
    pub connect_timeout: Duration,
    pub inference: InferenceConfiguration,
    pub audio_input: AudioInputConfiguration,
    pub audio_output: AudioOutputConfiguration,
    pub system_prompt: String,
}

/// One session over one provider stream
pub struct StreamSession {
    session_id: String,
    prompt_name: String,
    text_content_name: String,
    audio_content_name: String,
    config: StreamSessionConfig,
    dispatcher: Arc<ToolDispatcher>,

    state: RwLock<SessionState>,
    // Single outbound sink behind an async mutex: holding the lock across a
    // multi-event sequence is what guarantees per-session send ordering.
    sink: tokio::sync::Mutex<Option<Box<dyn ProviderSink>>>,
    event_tx: broadcast::Sender<StreamEvent>,
    consumer_attached: Arc<AtomicBool>,
    current_role: RwLock<Role>,
    speculative: AtomicBool,
    barge_in: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    response_task: Mutex<Option<JoinHandle<()>>>,
    last_activity: RwLock<Instant>,
}

impl StreamSession {
    pub fn new(
        session_id: impl Into<String>,
        config: StreamSessionConfig,
        dispatcher: Arc<ToolDispatcher>,
    ) -> Arc<Self> {
        let session_id = session_id.into();
        let (event_tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);

        tracing::info!(session_id = %session_id, "StreamSession created");

        Arc::new(Self {
            session_id,
            prompt_name: uuid::Uuid::new_v4().to_string(),
            text_content_name: uuid::Uuid::new_v4().to_string(),
            audio_content_name: uuid::Uuid::new_v4().to_string(),
            config,
            dispatcher,
            state: RwLock::new(SessionState::Created),
            sink: tokio::sync::Mutex::new(None),
            event_tx,
            consumer_attached: Arc::new(AtomicBool::new(false)),
            current_role: RwLock::new(Role::Assistant),
            speculative: AtomicBool::new(false),
            barge_in: AtomicBool::new(false),
            shutdown_tx,
            response_task: Mutex::new(None),
            last_activity: RwLock::new(Instant::now()),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn prompt_name(&self) -> &str {
        &self.prompt_name
    }

    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    pub fn is_active(&self) -> bool {
        self.state() == SessionState::Streaming
    }

    /// Record session activity
    pub fn touch(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Time since the last observed activity
    pub fn idle(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    pub fn is_barge_in(&self) -> bool {
        self.barge_in.load(Ordering::SeqCst)
    }

    /// Reset the barge-in flag once interrupted audio has been suppressed
    pub fn clear_barge_in(&self) {
        self.barge_in.store(false, Ordering::SeqCst);
    }

    /// Open the provider stream, send the initialization sequence, and start
    /// the response loop. Fails with a connection/timeout error and leaves
    /// the session in the `Error` state when the provider is unreachable.
    pub async fn initialize_stream(
        self: &Arc<Self>,
        connector: &dyn ProviderConnector,
    ) -> Result<(), StreamError> {
        {
            let state = self.state.read();
            if *state != SessionState::Created {
                return Err(StreamError::InvalidState {
                    expected: "created",
                    found: state.as_str(),
                });
            }
        }

        tracing::info!(
            session_id = %self.session_id,
            model_id = %self.config.model_id,
            "Connecting to provider"
        );
        let connect = connector.connect(&self.config.model_id);
        let (sink, source) = match tokio::time::timeout(self.config.connect_timeout, connect).await
        {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                *self.state.write() = SessionState::Error;
                tracing::error!(session_id = %self.session_id, error = %e, "Provider connection failed");
                return Err(StreamError::Connection(e.to_string()));
            }
            Err(_) => {
                *self.state.write() = SessionState::Error;
                let secs = self.config.connect_timeout.as_secs();
                tracing::error!(session_id = %self.session_id, timeout_secs = secs, "Provider connection timed out");
                return Err(StreamError::ConnectionTimeout(secs));
            }
        };
        *self.sink.lock().await = Some(sink);

        let tools: Vec<ToolSpec> = repvoice_tools::tool_definitions()
            .iter()
            .map(ToolSpec::from)
            .collect();
        let init_events = [
            Envelope::session_start(self.config.inference.clone()),
            Envelope::prompt_start(&self.prompt_name, self.config.audio_output.clone(), tools),
            Envelope::text_content_start(&self.prompt_name, &self.text_content_name, Role::System),
            Envelope::text_input(
                &self.prompt_name,
                &self.text_content_name,
                &self.config.system_prompt,
            ),
            Envelope::content_end(&self.prompt_name, &self.text_content_name),
        ];
        for envelope in &init_events {
            if let Err(e) = self.send_event(envelope).await {
                *self.state.write() = SessionState::Error;
                tracing::error!(session_id = %self.session_id, error = %e, "Failed to send init event");
                return Err(e);
            }
        }

        *self.state.write() = SessionState::Streaming;
        self.touch();

        let session = Arc::clone(self);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(async move {
            session.response_loop(source, shutdown_rx).await;
        });
        *self.response_task.lock() = Some(handle);

        tracing::info!(session_id = %self.session_id, "Stream initialized");
        Ok(())
    }

    /// Subscribe to the raw event bus. Any number of internal subscribers is
    /// fine; client-facing delivery must go through `attach_consumer`.
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.event_tx.subscribe()
    }

    /// Attach the single external output consumer. A second concurrent
    /// attach is a conflict; the slot frees when the consumer drops.
    pub fn attach_consumer(&self) -> Result<OutputConsumer, StreamError> {
        if self.consumer_attached.swap(true, Ordering::SeqCst) {
            tracing::warn!(session_id = %self.session_id, "Output consumer already attached");
            return Err(StreamError::ConsumerConflict);
        }
        Ok(OutputConsumer {
            rx: self.event_tx.subscribe(),
            slot: Arc::clone(&self.consumer_attached),
        })
    }

    /// Open the AUDIO content block for the user's microphone stream
    pub async fn send_audio_content_start(&self) -> Result<(), StreamError> {
        self.send_event(&Envelope::audio_content_start(
            &self.prompt_name,
            &self.audio_content_name,
            self.config.audio_input.clone(),
        ))
        .await
    }

    /// Forward one base64 audio chunk. Chunks are sent in submission order.
    pub async fn add_audio_chunk(&self, audio_base64: &str) -> Result<(), StreamError> {
        if !self.is_active() {
            return Err(StreamError::NotActive);
        }
        self.touch();
        self.send_event(&Envelope::audio_input(
            &self.prompt_name,
            &self.audio_content_name,
            audio_base64,
        ))
        .await
    }

    /// Close the AUDIO content block (end of microphone input)
    pub async fn end_audio_input(&self) -> Result<(), StreamError> {
        self.send_event(&Envelope::content_end(
            &self.prompt_name,
            &self.audio_content_name,
        ))
        .await
    }

    async fn send_event(&self, envelope: &Envelope) -> Result<(), StreamError> {
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(StreamError::NotActive)?;
        sink.send(envelope).await
    }

    /// Close the session: signal the response loop, best-effort send the
    /// closing event sequence, release the provider stream. Idempotent and
    /// safe on a never-initialized session.
    pub async fn close(&self) {
        {
            let mut state = self.state.write();
            match *state {
                SessionState::Closing | SessionState::Closed => return,
                _ => *state = SessionState::Closing,
            }
        }
        tracing::info!(session_id = %self.session_id, "Closing session");

        let _ = self.shutdown_tx.send(true);

        {
            let mut guard = self.sink.lock().await;
            if let Some(sink) = guard.as_mut() {
                let closing = [
                    Envelope::content_end(&self.prompt_name, &self.audio_content_name),
                    Envelope::prompt_end(&self.prompt_name),
                    Envelope::session_end(),
                ];
                for envelope in &closing {
                    if let Err(e) = sink.send(envelope).await {
                        tracing::warn!(session_id = %self.session_id, error = %e,
                            "Failed to send closing event");
                        break;
                    }
                }
                if let Err(e) = sink.close().await {
                    tracing::warn!(session_id = %self.session_id, error = %e,
                        "Error closing provider stream");
                }
            }
            *guard = None;
        }

        let task = self.response_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }

        *self.state.write() = SessionState::Closed;
        tracing::info!(session_id = %self.session_id, "Session closed");
    }

    /// Single reader of the provider stream. Cancellation is observed
    /// around the receive, never mid-send.
    async fn response_loop(
        self: Arc<Self>,
        mut source: Box<dyn ProviderSource>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let value = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                received = source.recv() => match received {
                    Ok(Some(value)) => value,
                    Ok(None) => {
                        tracing::info!(session_id = %self.session_id, "Provider stream ended");
                        break;
                    }
                    Err(e) => {
                        tracing::error!(session_id = %self.session_id, error = %e,
                            "Error receiving provider event");
                        self.publish(StreamEvent::Error {
                            message: e.to_string(),
                        });
                        break;
                    }
                },
            };

            if let Some(error) = value.get("error") {
                tracing::error!(session_id = %self.session_id, error = %error, "Provider error payload");
                self.publish(StreamEvent::Error {
                    message: error.to_string(),
                });
                continue;
            }

            let envelope: Envelope = match serde_json::from_value(value) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::debug!(session_id = %self.session_id, error = %e,
                        "Unrecognized provider event, skipping");
                    continue;
                }
            };
            self.handle_provider_event(envelope.event).await;
        }
    }

    async fn handle_provider_event(&self, event: Event) {
        match event {
            Event::ContentStart(e) => {
                let role = e.role.unwrap_or(Role::Assistant);
                *self.current_role.write() = role;

                let speculative = e
                    .additional_model_fields
                    .as_deref()
                    .and_then(|raw| serde_json::from_str::<Value>(raw).ok())
                    .and_then(|fields| {
                        fields
                            .get("generationStage")
                            .and_then(Value::as_str)
                            .map(|stage| stage == "SPECULATIVE")
                    })
                    .unwrap_or(false);
                self.speculative.store(speculative, Ordering::SeqCst);

                self.publish(StreamEvent::ContentStart { role, speculative });
            }
            Event::TextOutput(e) => {
                if e.content.contains(INTERRUPTED_MARKER) {
                    tracing::info!(session_id = %self.session_id, "Barge-in detected");
                    self.barge_in.store(true, Ordering::SeqCst);
                    self.publish(StreamEvent::Interrupted);
                    return;
                }
                let role = e.role.unwrap_or(*self.current_role.read());
                self.publish(StreamEvent::Transcript {
                    role,
                    text: e.content,
                });
            }
            Event::AudioOutput(e) => {
                self.publish(StreamEvent::Audio { content: e.content });
            }
            Event::ToolUse(e) => {
                self.handle_tool_use(e.tool_use_id, e.tool_name, e.content).await;
            }
            Event::ContentEnd(_) => self.publish(StreamEvent::ContentEnd),
            Event::PromptEnd(_) => self.publish(StreamEvent::PromptEnd),
            other => {
                tracing::debug!(session_id = %self.session_id, event = other.name(),
                    "Ignoring provider event");
            }
        }
    }

    async fn handle_tool_use(
        &self,
        tool_use_id: String,
        tool_name: String,
        content: Option<String>,
    ) {
        // Malformed argument payloads decode to an empty object, never fail
        let input: Value = match content.as_deref() {
            None | Some("") => Value::Object(Default::default()),
            Some(raw) => serde_json::from_str(raw).unwrap_or_else(|e| {
                tracing::error!(tool_name = %tool_name, error = %e, "Failed to parse tool input");
                Value::Object(Default::default())
            }),
        };

        tracing::info!(
            session_id = %self.session_id,
            tool_name = %tool_name,
            tool_use_id = %tool_use_id,
            "Tool invocation"
        );
        self.publish(StreamEvent::ToolInvocation {
            tool_name: tool_name.clone(),
            tool_use_id: tool_use_id.clone(),
            input: input.clone(),
        });

        let result = self.dispatcher.dispatch(&tool_name, input).await;

        // The provider-bound round trip completes before the result is
        // announced on the bus, so observers never see a half-sent call.
        if let Err(e) = self.send_tool_result(&tool_use_id, &result).await {
            tracing::error!(
                session_id = %self.session_id,
                tool_use_id = %tool_use_id,
                error = %e,
                "Error sending tool result"
            );
        }

        self.publish(StreamEvent::ToolResult {
            tool_name,
            tool_use_id,
            result,
        });
    }

    /// Three-part tool result sequence. The sink lock is held across all
    /// three sends, so no other provider-bound event can interleave.
    async fn send_tool_result(
        &self,
        tool_use_id: &str,
        result: &Value,
    ) -> Result<(), StreamError> {
        let content_name = uuid::Uuid::new_v4().to_string();
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(StreamError::NotActive)?;

        sink.send(&Envelope::tool_content_start(
            &self.prompt_name,
            &content_name,
            tool_use_id,
        ))
        .await?;
        sink.send(&Envelope::tool_result(
            &self.prompt_name,
            &content_name,
            result,
        ))
        .await?;
        sink.send(&Envelope::content_end(&self.prompt_name, &content_name))
            .await?;

        tracing::info!(
            session_id = %self.session_id,
            tool_use_id,
            "Tool result transmitted"
        );
        Ok(())
    }

    fn publish(&self, event: StreamEvent) {
        // No receivers is fine; consumers may attach later
        let _ = self.event_tx.send(event);
    }
}

/// Guard for the single external output consumer. Dropping it frees the
/// consumer slot so a new subscriber may attach.
pub struct OutputConsumer {
    rx: broadcast::Receiver<StreamEvent>,
    slot: Arc<AtomicBool>,
}

impl OutputConsumer {
    pub async fn recv(&mut self) -> Result<StreamEvent, broadcast::error::RecvError> {
        self.rx.recv().await
    }
}

impl Drop for OutputConsumer {
    fn drop(&mut self) {
        self.slot.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::LoopbackConnector;
    use async_trait::async_trait;
    use repvoice_tools::WebhookClient;
    use serde_json::json;

    fn test_config() -> StreamSessionConfig {
        StreamSessionConfig {
            model_id: "speech-s2s-v1".to_string(),
            connect_timeout: Duration::from_millis(200),
            inference: InferenceConfiguration {
                max_tokens: 1024,
                top_p: 0.9,
                temperature: 0.7,
            },
            audio_input: AudioInputConfiguration::lpcm(16_000, 16, 1),
            audio_output: AudioOutputConfiguration::lpcm(24_000, 16, 1, "matthew"),
            system_prompt: "You are a test assistant.".to_string(),
        }
    }

    fn dispatcher() -> Arc<ToolDispatcher> {
        Arc::new(ToolDispatcher::new(WebhookClient::disabled()))
    }

    async fn started_session() -> (Arc<StreamSession>, LoopbackConnector) {
        let connector = LoopbackConnector::new();
        let session = StreamSession::new("test-session", test_config(), dispatcher());
        session.initialize_stream(&connector).await.unwrap();
        (session, connector)
    }

    async fn next_event(
        rx: &mut broadcast::Receiver<StreamEvent>,
    ) -> StreamEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for bus event")
            .expect("bus closed")
    }

    #[tokio::test]
    async fn initialization_sends_events_in_order() {
        let (session, connector) = started_session().await;
        assert_eq!(session.state(), SessionState::Streaming);

        let sent = connector.last_handle().unwrap().sent_events();
        let names: Vec<&str> = sent.iter().map(|e| e.event.name()).collect();
        assert_eq!(
            names,
            vec!["sessionStart", "promptStart", "contentStart", "textInput", "contentEnd"]
        );

        match &sent[3].event {
            Event::TextInput(payload) => {
                assert_eq!(payload.content, "You are a test assistant.")
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[tokio::test]
    async fn connect_failure_moves_session_to_error() {
        struct RefusingConnector;

        #[async_trait]
        impl ProviderConnector for RefusingConnector {
            async fn connect(
                &self,
                _model_id: &str,
            ) -> Result<(Box<dyn ProviderSink>, Box<dyn ProviderSource>), StreamError>
            {
                Err(StreamError::Connection("connection refused".into()))
            }
        }

        let session = StreamSession::new("s", test_config(), dispatcher());
        let err = session.initialize_stream(&RefusingConnector).await.unwrap_err();
        assert!(matches!(err, StreamError::Connection(_)));
        assert_eq!(session.state(), SessionState::Error);
    }

    #[tokio::test]
    async fn connect_timeout_moves_session_to_error() {
        struct HangingConnector;

        #[async_trait]
        impl ProviderConnector for HangingConnector {
            async fn connect(
                &self,
                _model_id: &str,
            ) -> Result<(Box<dyn ProviderSink>, Box<dyn ProviderSource>), StreamError>
            {
                std::future::pending().await
            }
        }

        let session = StreamSession::new("s", test_config(), dispatcher());
        let err = session.initialize_stream(&HangingConnector).await.unwrap_err();
        assert!(matches!(err, StreamError::ConnectionTimeout(_)));
        assert_eq!(session.state(), SessionState::Error);
    }

    #[tokio::test]
    async fn transcripts_carry_the_current_role() {
        let (session, connector) = started_session().await;
        let handle = connector.last_handle().unwrap();
        let mut rx = session.subscribe();

        handle.inject(json!({"event": {"contentStart": {
            "promptName": "p", "contentName": "c", "type": "TEXT",
            "interactive": true, "role": "USER"
        }}}));
        handle.inject(json!({"event": {"textOutput": {
            "content": "I met Dr. Harper today"
        }}}));

        assert!(matches!(
            next_event(&mut rx).await,
            StreamEvent::ContentStart { role: Role::User, speculative: false }
        ));
        match next_event(&mut rx).await {
            StreamEvent::Transcript { role, text } => {
                assert_eq!(role, Role::User);
                assert_eq!(text, "I met Dr. Harper today");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn speculative_flag_comes_from_additional_model_fields() {
        let (session, connector) = started_session().await;
        let handle = connector.last_handle().unwrap();
        let mut rx = session.subscribe();

        handle.inject(json!({"event": {"contentStart": {
            "promptName": "p", "contentName": "c", "type": "TEXT",
            "interactive": true, "role": "ASSISTANT",
            "additionalModelFields": "{\"generationStage\":\"SPECULATIVE\"}"
        }}}));

        assert!(matches!(
            next_event(&mut rx).await,
            StreamEvent::ContentStart { role: Role::Assistant, speculative: true }
        ));
    }

    #[tokio::test]
    async fn interrupted_marker_sets_barge_in_and_is_not_a_transcript() {
        let (session, connector) = started_session().await;
        let handle = connector.last_handle().unwrap();
        let mut rx = session.subscribe();

        handle.inject(json!({"event": {"textOutput": {
            "content": "{ \"interrupted\" : true }"
        }}}));

        assert!(matches!(next_event(&mut rx).await, StreamEvent::Interrupted));
        assert!(session.is_barge_in());

        session.clear_barge_in();
        assert!(!session.is_barge_in());
    }

    #[tokio::test]
    async fn tool_round_trip_is_ordered_and_complete() {
        let (session, connector) = started_session().await;
        let handle = connector.last_handle().unwrap();
        let mut rx = session.subscribe();

        handle.inject(json!({"event": {"toolUse": {
            "toolUseId": "tu-9",
            "toolName": "getDateTool",
            "content": "{}"
        }}}));

        match next_event(&mut rx).await {
            StreamEvent::ToolInvocation { tool_name, tool_use_id, .. } => {
                assert_eq!(tool_name, "getDateTool");
                assert_eq!(tool_use_id, "tu-9");
            }
            other => panic!("unexpected event {:?}", other),
        }
        match next_event(&mut rx).await {
            StreamEvent::ToolResult { result, .. } => {
                assert_eq!(result["timezone"], "UTC");
            }
            other => panic!("unexpected event {:?}", other),
        }

        // Init (5 events) + contentStart/toolResult/contentEnd, nothing interleaved
        let sent = handle.sent_events();
        let names: Vec<&str> = sent[5..].iter().map(|e| e.event.name()).collect();
        assert_eq!(names, vec!["contentStart", "toolResult", "contentEnd"]);
        match &sent[5].event {
            Event::ContentStart(e) => {
                let cfg = e.tool_result_input_configuration.as_ref().unwrap();
                assert_eq!(cfg.tool_use_id, "tu-9");
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[tokio::test]
    async fn malformed_tool_input_decodes_to_empty_object() {
        let (session, connector) = started_session().await;
        let handle = connector.last_handle().unwrap();
        let mut rx = session.subscribe();

        handle.inject(json!({"event": {"toolUse": {
            "toolUseId": "tu-1",
            "toolName": "getDateTool",
            "content": "this is not json"
        }}}));

        match next_event(&mut rx).await {
            StreamEvent::ToolInvocation { input, .. } => {
                assert_eq!(input, json!({}));
            }
            other => panic!("unexpected event {:?}", other),
        }
        // The round trip still completes with a result
        assert!(matches!(
            next_event(&mut rx).await,
            StreamEvent::ToolResult { .. }
        ));
    }

    #[tokio::test]
    async fn second_consumer_is_rejected_until_first_detaches() {
        let (session, connector) = started_session().await;
        let handle = connector.last_handle().unwrap();

        let mut first = session.attach_consumer().unwrap();
        assert!(matches!(
            session.attach_consumer(),
            Err(StreamError::ConsumerConflict)
        ));

        // Delivery to the first consumer is unaffected by the rejection
        handle.inject(json!({"event": {"textOutput": {"content": "hello"}}}));
        match tokio::time::timeout(Duration::from_secs(1), first.recv())
            .await
            .unwrap()
            .unwrap()
        {
            StreamEvent::Transcript { text, .. } => assert_eq!(text, "hello"),
            other => panic!("unexpected event {:?}", other),
        }

        drop(first);
        assert!(session.attach_consumer().is_ok());
    }

    #[tokio::test]
    async fn audio_chunks_are_forwarded_in_submission_order() {
        let (session, connector) = started_session().await;
        let handle = connector.last_handle().unwrap();

        session.send_audio_content_start().await.unwrap();
        for chunk in ["AAAA", "BBBB", "CCCC"] {
            session.add_audio_chunk(chunk).await.unwrap();
        }
        session.end_audio_input().await.unwrap();

        let sent = handle.sent_events();
        let audio: Vec<String> = sent
            .iter()
            .filter_map(|e| match &e.event {
                Event::AudioInput(payload) => Some(payload.content.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(audio, vec!["AAAA", "BBBB", "CCCC"]);
    }

    #[tokio::test]
    async fn audio_chunk_on_inactive_session_is_rejected() {
        let session = StreamSession::new("s", test_config(), dispatcher());
        let err = session.add_audio_chunk("AAAA").await.unwrap_err();
        assert!(matches!(err, StreamError::NotActive));
    }

    #[tokio::test]
    async fn provider_error_payload_is_published() {
        let (session, connector) = started_session().await;
        let handle = connector.last_handle().unwrap();
        let mut rx = session.subscribe();

        handle.inject(json!({"error": "throttled"}));
        match next_event(&mut rx).await {
            StreamEvent::Error { message } => assert!(message.contains("throttled")),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn close_is_idempotent_and_sends_closing_sequence_once() {
        let (session, connector) = started_session().await;
        let handle = connector.last_handle().unwrap();

        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);

        let sent = handle.sent_events();
        let names: Vec<&str> = sent.iter().map(|e| e.event.name()).collect();
        assert_eq!(
            &names[names.len() - 3..],
            &["contentEnd", "promptEnd", "sessionEnd"]
        );
        assert_eq!(
            names.iter().filter(|n| **n == "sessionEnd").count(),
            1
        );
    }

    #[tokio::test]
    async fn close_on_created_session_is_a_no_op() {
        let session = StreamSession::new("s", test_config(), dispatcher());
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
    }
}
