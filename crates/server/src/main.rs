//! Process entry point
//!
//! Constructs every component explicitly and injects it into the router;
//! configuration errors (rule document included) are fatal here, before any
//! session can start.

use std::sync::Arc;

use anyhow::Context;

use repvoice_config::load_settings;
use repvoice_guardrails::{AuditLog, GuardrailEngine, RuleStore};
use repvoice_server::{create_router, AppState, SessionRegistry};
use repvoice_stream::{LoopbackConnector, ProviderConnector};
use repvoice_tools::{ToolDispatcher, WebhookClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = std::env::var("REPVOICE_CONFIG").ok();
    let settings = Arc::new(
        load_settings(config_path.as_deref()).context("failed to load settings")?,
    );

    // Guardrails fail fast: a malformed rule document must not start serving
    let rule_store = Arc::new(
        RuleStore::new(&settings.guardrails.rules_path)
            .context("guardrail rule document unavailable")?,
    );
    let engine = Arc::new(
        GuardrailEngine::new(rule_store).context("guardrail rule document invalid")?,
    );

    let audit = Arc::new(AuditLog::new(
        &settings.guardrails.audit_log_dir,
        &settings.guardrails.audit_fallback_dir,
    ));

    let webhook = WebhookClient::new(
        settings.webhook.url.clone(),
        settings.webhook.secret.clone(),
        settings.webhook.timeout_secs,
    );
    let dispatcher = Arc::new(ToolDispatcher::new(webhook));

    let connector: Arc<dyn ProviderConnector> = if settings.provider.loopback {
        tracing::warn!("Using loopback provider (development mode)");
        Arc::new(LoopbackConnector::new())
    } else {
        // The cloud connector is deployment-specific; nothing in this build
        // implements it.
        anyhow::bail!(
            "no provider connector available: set provider.loopback = true or \
             deploy with a provider integration"
        );
    };

    let registry = Arc::new(SessionRegistry::new(
        Arc::clone(&settings),
        connector,
        dispatcher,
    ));
    registry.start_sweep();

    let state = AppState::new(
        Arc::clone(&settings),
        Arc::clone(&registry),
        engine,
        audit,
    );
    let router = create_router(state);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(addr = %addr, "repvoice server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    registry.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutdown signal received");
}
