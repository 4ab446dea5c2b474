//! Tool dispatch for the rep voice agent
//!
//! Maps named tool-call requests arriving over the provider stream to local
//! handlers and returns structured results. `dispatch` never fails: handler
//! errors become `{error, tool_name}` results so the tool round trip on the
//! stream always completes with some payload.

pub mod hcp;
pub mod webhook;

pub use webhook::WebhookClient;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

/// Tool handler errors. Converted to structured error results inside
/// `dispatch`; they never cross the dispatcher boundary.
#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Store unavailable: {0}")]
    Store(String),

    #[error("Not configured: {0}")]
    NotConfigured(&'static str),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
}

/// Warehouse row for an HCP lookup
#[derive(Debug, Clone)]
pub struct HcpRecord {
    pub name: String,
    pub hcp_id: String,
    pub hco_id: Option<String>,
    pub hco_name: Option<String>,
}

/// Seam to the relational warehouse's HCP directory
#[async_trait]
pub trait HcpStore: Send + Sync {
    async fn fetch_by_name(&self, name: &str) -> Result<Option<HcpRecord>, ToolError>;
}

/// Seam to the relational warehouse's calls table
#[async_trait]
pub trait CallStore: Send + Sync {
    /// Persist a call record, returning the new primary key
    async fn insert_call(&self, record: &Value) -> Result<String, ToolError>;
}

/// A tool declaration advertised to the provider at promptStart
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

const TOOL_NAMES: &[&str] = &[
    "lookupHcpTool",
    "insertCallTool",
    "emitEventTool",
    "createFollowUpTaskTool",
    "getDateTool",
];

/// Declarations for the promptStart toolConfiguration
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: "lookupHcpTool",
            description: "Look up an HCP (Healthcare Professional) by name. Use this tool when \
                 the user mentions a doctor's name or asks if an HCP exists. Prefers the \
                 warehouse; falls back to the static directory.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": {
                        "type": "string",
                        "minLength": 2,
                        "description": "The name of the healthcare professional to look up"
                    }
                },
                "required": ["name"]
            }),
        },
        ToolDefinition {
            name: "insertCallTool",
            description: "Persist the final call JSON to the calls table. Use this tool after \
                 the user confirms the call summary.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "record": {
                        "type": "object",
                        "description": "Complete call record JSON with all fields"
                    }
                },
                "required": ["record"]
            }),
        },
        ToolDefinition {
            name: "emitEventTool",
            description: "POST the saved call row and session metadata to the automation \
                 webhook. Use this tool after successfully inserting a call.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "eventType": {
                        "type": "string",
                        "description": "Event type (e.g. 'call.saved', 'call.updated')"
                    },
                    "payload": {
                        "type": "object",
                        "description": "Event payload data"
                    }
                },
                "required": ["eventType", "payload"]
            }),
        },
        ToolDefinition {
            name: "createFollowUpTaskTool",
            description: "Create a follow-up task when call_follow_up_task.task_type is \
                 present. Use this tool after persisting a call that includes a follow-up task.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task": {
                        "type": "object",
                        "description": "Task details (task_type, description, due_date, assigned_to)"
                    }
                },
                "required": ["task"]
            }),
        },
        ToolDefinition {
            name: "getDateTool",
            description: "Return current date/time for sanity checks. Use this tool when the \
                 user asks about the current date or time.",
            input_schema: json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
        },
    ]
}

/// Routes tool calls to handlers
pub struct ToolDispatcher {
    hcp_store: Option<Arc<dyn HcpStore>>,
    call_store: Option<Arc<dyn CallStore>>,
    webhook: WebhookClient,
}

impl ToolDispatcher {
    pub fn new(webhook: WebhookClient) -> Self {
        Self {
            hcp_store: None,
            call_store: None,
            webhook,
        }
    }

    pub fn with_hcp_store(mut self, store: Arc<dyn HcpStore>) -> Self {
        self.hcp_store = Some(store);
        self
    }

    pub fn with_call_store(mut self, store: Arc<dyn CallStore>) -> Self {
        self.call_store = Some(store);
        self
    }

    /// Dispatch a tool call. Unknown tools and handler failures both come
    /// back as structured results; this never returns an error.
    pub async fn dispatch(&self, tool_name: &str, arguments: Value) -> Value {
        tracing::info!(tool_name, "Dispatching tool call");

        let result = match tool_name {
            "lookupHcpTool" => self.handle_lookup_hcp(&arguments).await,
            "insertCallTool" => self.handle_insert_call(&arguments).await,
            "emitEventTool" => self.handle_emit_event(&arguments).await,
            "createFollowUpTaskTool" => self.handle_create_follow_up_task(&arguments).await,
            "getDateTool" => Ok(handle_get_date()),
            _ => {
                tracing::error!(tool_name, available = ?TOOL_NAMES, "Unknown tool");
                return json!({
                    "error": format!("Unknown tool: {tool_name}"),
                    "available_tools": TOOL_NAMES,
                });
            }
        };

        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(tool_name, error = %e, "Tool execution failed");
                json!({
                    "error": format!("Tool execution failed: {e}"),
                    "tool_name": tool_name,
                })
            }
        }
    }

    /// Warehouse first, static directory second; the result names the source
    /// that satisfied the match.
    async fn handle_lookup_hcp(&self, arguments: &Value) -> Result<Value, ToolError> {
        let name = arguments
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();

        if name.len() < 2 {
            tracing::warn!(name, "HCP lookup with invalid name");
            return Ok(json!({
                "found": false,
                "hcp_id": null,
                "hco_id": null,
                "hco_name": null,
                "source": null,
                "error": "Name must be at least 2 characters",
            }));
        }

        if let Some(store) = &self.hcp_store {
            match store.fetch_by_name(name).await {
                Ok(Some(record)) => {
                    tracing::info!(name, hcp_id = %record.hcp_id, "HCP found in warehouse");
                    return Ok(json!({
                        "found": true,
                        "hcp_id": record.hcp_id,
                        "hco_id": record.hco_id,
                        "hco_name": record.hco_name,
                        "name": record.name,
                        "source": "warehouse",
                    }));
                }
                Ok(None) => tracing::info!(name, "HCP not found in warehouse"),
                Err(e) => {
                    tracing::warn!(name, error = %e, "Warehouse lookup failed, using static table")
                }
            }
        }

        if let Some(hcp_id) = hcp::lookup_hcp_id(name) {
            return Ok(json!({
                "found": true,
                "hcp_id": hcp_id,
                "hco_id": null,
                "hco_name": null,
                "name": hcp::full_hcp_name(name),
                "source": "static",
            }));
        }

        Ok(json!({
            "found": false,
            "hcp_id": null,
            "hco_id": null,
            "hco_name": null,
            "source": null,
        }))
    }

    async fn handle_insert_call(&self, arguments: &Value) -> Result<Value, ToolError> {
        let record = arguments.get("record").filter(|r| !r.is_null());
        let Some(record) = record else {
            return Ok(json!({"ok": false, "error": "No record provided"}));
        };

        let Some(store) = &self.call_store else {
            return Ok(json!({"ok": false, "error": "Call store not configured"}));
        };

        match store.insert_call(record).await {
            Ok(call_pk) => {
                tracing::info!(call_pk, "Call record persisted");
                Ok(json!({"ok": true, "call_pk": call_pk}))
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to insert call");
                Ok(json!({"ok": false, "error": e.to_string()}))
            }
        }
    }

    async fn handle_emit_event(&self, arguments: &Value) -> Result<Value, ToolError> {
        let event_type = arguments
            .get("eventType")
            .and_then(Value::as_str)
            .unwrap_or("");
        if event_type.is_empty() {
            return Ok(json!({"ok": false, "error": "No eventType provided"}));
        }

        let payload = arguments.get("payload").cloned().unwrap_or(json!({}));
        Ok(self.webhook.emit(event_type, payload).await)
    }

    async fn handle_create_follow_up_task(&self, arguments: &Value) -> Result<Value, ToolError> {
        let task = arguments.get("task").cloned().unwrap_or(Value::Null);
        let has_type = task
            .get("task_type")
            .and_then(Value::as_str)
            .is_some_and(|t| !t.is_empty());
        if !has_type {
            return Ok(json!({"ok": false, "error": "No task or task_type provided"}));
        }

        tracing::info!(task_type = %task["task_type"], "Creating follow-up task");

        let event_result = self
            .webhook
            .emit(
                "task.created",
                json!({
                    "task": task,
                    "created_at": chrono::Utc::now().to_rfc3339(),
                }),
            )
            .await;

        if event_result["ok"] == true {
            let external_task_id = format!(
                "TASK_{}",
                uuid::Uuid::new_v4().simple().to_string()[..8].to_uppercase()
            );
            tracing::info!(external_task_id, "Follow-up task created");
            Ok(json!({"ok": true, "external_task_id": external_task_id}))
        } else {
            Ok(json!({
                "ok": false,
                "error": format!("Failed to emit task event: {}", event_result["error"]),
            }))
        }
    }
}

/// Built-in date tool; no external dependencies
fn handle_get_date() -> Value {
    let now = chrono::Utc::now();
    json!({
        "date": now.format("%Y-%m-%d").to_string(),
        "time": now.format("%H:%M:%S").to_string(),
        "timezone": "UTC",
        "timestamp": now.to_rfc3339(),
    })
}
