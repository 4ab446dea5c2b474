//! Provider connector seam
//!
//! The cloud speech-to-speech service is an external collaborator; these
//! traits are the only surface the rest of the system sees. The loopback
//! implementation backs tests and local development.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::protocol::Envelope;
use crate::StreamError;

/// Outbound half of a provider stream. One sink per session; callers
/// serialize access, which is what gives per-session event ordering.
#[async_trait]
pub trait ProviderSink: Send {
    async fn send(&mut self, event: &Envelope) -> Result<(), StreamError>;
    async fn close(&mut self) -> Result<(), StreamError>;
}

/// Inbound half of a provider stream
#[async_trait]
pub trait ProviderSource: Send {
    /// Next decoded provider message; `None` when the stream has ended
    async fn recv(&mut self) -> Result<Option<Value>, StreamError>;
}

/// Opens bidirectional streams to the provider
#[async_trait]
pub trait ProviderConnector: Send + Sync {
    async fn connect(
        &self,
        model_id: &str,
    ) -> Result<(Box<dyn ProviderSink>, Box<dyn ProviderSource>), StreamError>;
}

/// In-process provider used by tests and local development. Every opened
/// stream records the events sent to it and exposes an injection handle for
/// scripting responses.
#[derive(Default)]
pub struct LoopbackConnector {
    handles: Mutex<Vec<LoopbackHandle>>,
}

impl LoopbackConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles for every stream opened so far, in connect order
    pub fn handles(&self) -> Vec<LoopbackHandle> {
        self.handles.lock().clone()
    }

    pub fn last_handle(&self) -> Option<LoopbackHandle> {
        self.handles.lock().last().cloned()
    }
}

#[async_trait]
impl ProviderConnector for LoopbackConnector {
    async fn connect(
        &self,
        model_id: &str,
    ) -> Result<(Box<dyn ProviderSink>, Box<dyn ProviderSource>), StreamError> {
        tracing::debug!(model_id, "Loopback provider stream opened");
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(Mutex::new(Vec::new()));

        let handle = LoopbackHandle {
            sent: sent.clone(),
            inbound: inbound_tx,
        };
        self.handles.lock().push(handle);

        Ok((
            Box::new(LoopbackSink { sent }),
            Box::new(LoopbackSource { rx: inbound_rx }),
        ))
    }
}

/// Test/dev handle to one loopback stream
#[derive(Clone)]
pub struct LoopbackHandle {
    sent: Arc<Mutex<Vec<Envelope>>>,
    inbound: mpsc::UnboundedSender<Value>,
}

impl LoopbackHandle {
    /// Everything the session has sent to the provider, in order
    pub fn sent_events(&self) -> Vec<Envelope> {
        self.sent.lock().clone()
    }

    /// Push a raw provider message into the session's response loop
    pub fn inject(&self, value: Value) {
        let _ = self.inbound.send(value);
    }

    /// Push a typed event into the session's response loop
    pub fn inject_event(&self, envelope: &Envelope) {
        if let Ok(value) = serde_json::to_value(envelope) {
            self.inject(value);
        }
    }
}

struct LoopbackSink {
    sent: Arc<Mutex<Vec<Envelope>>>,
}

#[async_trait]
impl ProviderSink for LoopbackSink {
    async fn send(&mut self, event: &Envelope) -> Result<(), StreamError> {
        self.sent.lock().push(event.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), StreamError> {
        Ok(())
    }
}

struct LoopbackSource {
    rx: mpsc::UnboundedReceiver<Value>,
}

#[async_trait]
impl ProviderSource for LoopbackSource {
    async fn recv(&mut self) -> Result<Option<Value>, StreamError> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn loopback_records_sent_events_and_relays_injections() {
        let connector = LoopbackConnector::new();
        let (mut sink, mut source) = connector.connect("model-x").await.unwrap();
        let handle = connector.last_handle().unwrap();

        sink.send(&Envelope::session_end()).await.unwrap();
        assert_eq!(handle.sent_events().len(), 1);

        handle.inject(json!({"event": {"promptEnd": {"promptName": "p"}}}));
        let value = source.recv().await.unwrap().unwrap();
        assert!(value["event"]["promptEnd"].is_object());
    }
}
