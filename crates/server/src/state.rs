//! Shared application state
//!
//! Every component is constructed once at startup and injected here; there
//! are no module-level singletons.

use std::sync::Arc;

use repvoice_config::Settings;
use repvoice_guardrails::{AuditLog, GuardrailEngine};

use crate::registry::SessionRegistry;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub registry: Arc<SessionRegistry>,
    pub engine: Arc<GuardrailEngine>,
    pub audit: Arc<AuditLog>,
}

impl AppState {
    pub fn new(
        settings: Arc<Settings>,
        registry: Arc<SessionRegistry>,
        engine: Arc<GuardrailEngine>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self {
            settings,
            registry,
            engine,
            audit,
        }
    }
}
