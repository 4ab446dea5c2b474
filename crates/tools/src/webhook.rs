//! Outbound webhook client
//!
//! POSTs tool events to an automation webhook with an optional
//! shared-secret header. An unconfigured URL skips emission rather than
//! failing, so the conversation flow is never coupled to automation uptime.

use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};

/// Header carrying the shared secret
const SECRET_HEADER: &str = "X-Webhook-Secret";

#[derive(Debug, Clone)]
pub struct WebhookClient {
    url: Option<String>,
    secret: Option<String>,
    client: reqwest::Client,
}

impl WebhookClient {
    pub fn new(url: Option<String>, secret: Option<String>, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            url,
            secret,
            client,
        }
    }

    /// Client with no destination; every emit is skipped
    pub fn disabled() -> Self {
        Self::new(None, None, 10)
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// POST an event, returning the original handler result shape:
    /// `{ok: true, ...}` on success or skip, `{ok: false, error}` on failure.
    pub async fn emit(&self, event_type: &str, payload: Value) -> Value {
        let Some(url) = &self.url else {
            tracing::warn!(event_type, "Webhook URL not configured, skipping event emission");
            return json!({"ok": true, "message": "webhook not configured (skipped)"});
        };

        let body = json!({
            "eventType": event_type,
            "payload": payload,
            "timestamp": Utc::now().to_rfc3339(),
        });

        let mut request = self.client.post(url).json(&body);
        if let Some(secret) = &self.secret {
            request = request.header(SECRET_HEADER, secret);
        }

        match request.send().await.and_then(|r| r.error_for_status()) {
            Ok(response) => {
                let status = response.status().as_u16();
                tracing::info!(event_type, status, "Webhook event emitted");
                json!({"ok": true, "status_code": status})
            }
            Err(e) => {
                tracing::error!(event_type, error = %e, "Failed to emit webhook event");
                json!({"ok": false, "error": format!("HTTP error: {e}")})
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unconfigured_webhook_skips() {
        let client = WebhookClient::disabled();
        assert!(!client.is_configured());
        let result = client.emit("call.saved", json!({"call_pk": "abc"})).await;
        assert_eq!(result["ok"], true);
        assert!(result["message"].as_str().unwrap().contains("skipped"));
    }
}
