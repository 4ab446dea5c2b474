//! Session registry
//!
//! Bounded pool of stream sessions keyed by session id. Enforces the
//! concurrency ceiling, reclaims idle sessions on a fixed sweep interval,
//! and closes everything on shutdown.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;

use repvoice_config::Settings;
use repvoice_core::session::{SessionInfo, SessionStatus};
use repvoice_core::slots::ConversationSlotState;
use repvoice_stream::protocol::{
    AudioInputConfiguration, AudioOutputConfiguration, InferenceConfiguration,
};
use repvoice_stream::{ProviderConnector, StreamSession, StreamSessionConfig};
use repvoice_tools::ToolDispatcher;

use crate::ServerError;

/// One registered session: the provider stream plus server-side bookkeeping
pub struct SessionHandle {
    pub stream: Arc<StreamSession>,
    pub info: RwLock<SessionInfo>,
    pub slots: Mutex<ConversationSlotState>,
}

impl SessionHandle {
    fn new(stream: Arc<StreamSession>) -> Self {
        let session_id = stream.session_id().to_string();
        Self {
            stream,
            info: RwLock::new(SessionInfo::new(&session_id)),
            slots: Mutex::new(ConversationSlotState::new(session_id)),
        }
    }

    /// Record activity on both the stream and the info model
    pub fn touch(&self) {
        self.stream.touch();
        self.info.write().touch();
    }
}

/// Bounded pool of stream sessions
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    connector: Arc<dyn ProviderConnector>,
    dispatcher: Arc<ToolDispatcher>,
    settings: Arc<Settings>,
    max_sessions: usize,
    idle_timeout: Duration,
    sweep_interval: Duration,
    sweep_shutdown: Mutex<Option<watch::Sender<bool>>>,
}

impl SessionRegistry {
    pub fn new(
        settings: Arc<Settings>,
        connector: Arc<dyn ProviderConnector>,
        dispatcher: Arc<ToolDispatcher>,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            connector,
            dispatcher,
            max_sessions: settings.session.max_concurrent_sessions,
            idle_timeout: Duration::from_secs(settings.session.idle_timeout_secs),
            sweep_interval: Duration::from_secs(settings.session.sweep_interval_secs),
            settings,
            sweep_shutdown: Mutex::new(None),
        }
    }

    fn stream_config(&self, system_prompt_override: Option<String>) -> StreamSessionConfig {
        let s = &self.settings;
        StreamSessionConfig {
            model_id: s.provider.model_id.clone(),
            connect_timeout: Duration::from_secs(s.provider.connect_timeout_secs),
            inference: InferenceConfiguration {
                max_tokens: s.inference.max_tokens,
                top_p: s.inference.top_p,
                temperature: s.inference.temperature,
            },
            audio_input: AudioInputConfiguration::lpcm(
                s.audio.input_sample_rate,
                s.audio.bit_depth,
                s.audio.channels,
            ),
            audio_output: AudioOutputConfiguration::lpcm(
                s.audio.output_sample_rate,
                s.audio.bit_depth,
                s.audio.channels,
                s.inference.voice_id.clone(),
            ),
            system_prompt: system_prompt_override
                .unwrap_or_else(|| s.system_prompt().to_string()),
        }
    }

    /// Create and initialize a session. Fails immediately with a capacity
    /// error at the ceiling; a session whose stream fails to open is never
    /// registered.
    pub async fn create(
        &self,
        system_prompt_override: Option<String>,
    ) -> Result<Arc<SessionHandle>, ServerError> {
        let streaming = self
            .sessions
            .read()
            .values()
            .filter(|h| h.stream.is_active())
            .count();
        if streaming >= self.max_sessions {
            tracing::warn!(streaming, ceiling = self.max_sessions, "Session ceiling reached");
            return Err(ServerError::Capacity(self.max_sessions));
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let stream = StreamSession::new(
            &session_id,
            self.stream_config(system_prompt_override),
            Arc::clone(&self.dispatcher),
        );

        stream
            .initialize_stream(self.connector.as_ref())
            .await
            .map_err(|e| {
                tracing::error!(session_id = %session_id, error = %e, "Failed to create session");
                ServerError::Provider(e.to_string())
            })?;

        let handle = Arc::new(SessionHandle::new(stream));
        self.sessions
            .write()
            .insert(session_id.clone(), Arc::clone(&handle));

        tracing::info!(session_id = %session_id, "Session created");
        Ok(handle)
    }

    pub fn get(&self, session_id: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(session_id).cloned()
    }

    /// End a session and release it from the registry. Unknown ids are a
    /// logged no-op.
    pub async fn end_session(&self, session_id: &str) {
        let handle = self.sessions.write().remove(session_id);
        let Some(handle) = handle else {
            tracing::warn!(session_id, "Session not found");
            return;
        };

        handle.stream.close().await;
        {
            let mut info = handle.info.write();
            info.status = SessionStatus::Ended;
            info.touch();
        }
        tracing::info!(session_id, "Session ended");
    }

    pub fn count(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn list(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    /// Sessions idle beyond the timeout
    fn stale_session_ids(&self) -> Vec<String> {
        self.sessions
            .read()
            .iter()
            .filter(|(_, h)| h.stream.is_active() && h.stream.idle() > self.idle_timeout)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Start the background sweep that reclaims idle sessions
    pub fn start_sweep(self: &Arc<Self>) {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        *self.sweep_shutdown.lock() = Some(shutdown_tx);

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(registry.sweep_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let stale = registry.stale_session_ids();
                        for session_id in stale {
                            tracing::info!(session_id = %session_id, "Reclaiming idle session");
                            registry.end_session(&session_id).await;
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            tracing::info!("Session sweep shutting down");
                            break;
                        }
                    }
                }
            }
        });
    }

    /// Stop the sweep and close every remaining session, waiting for each
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down session registry");
        if let Some(tx) = self.sweep_shutdown.lock().take() {
            let _ = tx.send(true);
        }
        for session_id in self.list() {
            self.end_session(&session_id).await;
        }
        tracing::info!("Session registry shutdown complete");
    }
}
