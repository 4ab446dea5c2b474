//! Application settings
//!
//! Every section has working defaults so the server starts with no
//! configuration file at all; a TOML file and REPVOICE_-prefixed
//! environment variables layer on top.

use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Top-level settings tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub inference: InferenceConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub guardrails: GuardrailsSettings,
    #[serde(default)]
    pub webhook: WebhookConfig,
    /// Overrides the built-in call-recording system prompt
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Settings {
    /// Effective system prompt (configured override or the built-in default)
    pub fn system_prompt(&self) -> &str {
        self.system_prompt
            .as_deref()
            .unwrap_or(crate::prompts::DEFAULT_SYSTEM_PROMPT)
    }
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_enabled: bool,
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_enabled: true,
            cors_origins: vec![
                "http://localhost:8080".to_string(),
                "http://localhost:3000".to_string(),
            ],
        }
    }
}

/// Speech-to-speech provider settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Model identifier passed to the provider connector
    pub model_id: String,
    pub region: String,
    /// Bound on opening the bidirectional stream
    pub connect_timeout_secs: u64,
    /// Use the in-process loopback provider instead of a cloud connector
    pub loopback: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            model_id: "speech-s2s-v1".to_string(),
            region: "us-east-1".to_string(),
            connect_timeout_secs: 10,
            loopback: true,
        }
    }
}

/// Audio stream parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub input_sample_rate: u32,
    pub output_sample_rate: u32,
    pub channels: u32,
    pub bit_depth: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_sample_rate: 16_000,
            output_sample_rate: 24_000,
            channels: 1,
            bit_depth: 16,
        }
    }
}

/// Inference parameters advertised at session start
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub voice_id: String,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.7,
            top_p: 0.9,
            voice_id: "matthew".to_string(),
        }
    }
}

/// Session pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Ceiling on simultaneously streaming sessions
    pub max_concurrent_sessions: usize,
    /// Inactivity window before the sweep reclaims a session
    pub idle_timeout_secs: u64,
    /// Sweep cadence
    pub sweep_interval_secs: u64,
    /// Hard cap on session lifetime
    pub max_duration_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: 100,
            idle_timeout_secs: 300,
            sweep_interval_secs: 60,
            max_duration_secs: 1800,
        }
    }
}

/// Guardrail rule source and audit log locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardrailsSettings {
    /// Path to the rule document
    pub rules_path: String,
    /// Primary audit log directory
    pub audit_log_dir: String,
    /// Fallback used when the primary is not writable
    pub audit_fallback_dir: String,
}

impl Default for GuardrailsSettings {
    fn default() -> Self {
        Self {
            rules_path: "rules/guardrails.toml".to_string(),
            audit_log_dir: "/var/log/guardrails".to_string(),
            audit_fallback_dir: "logs/guardrails".to_string(),
        }
    }
}

/// Outbound webhook settings for tool event emission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub timeout_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret: None,
            timeout_secs: 10,
        }
    }
}

/// Load settings from defaults, an optional TOML file, and the environment
pub fn load_settings(path: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = config::Config::builder()
        .add_source(config::Config::try_from(&Settings::default())?);

    if let Some(path) = path {
        builder = builder.add_source(config::File::with_name(path).required(true));
    } else {
        builder = builder.add_source(config::File::with_name("repvoice").required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("REPVOICE")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder.build()?.try_deserialize()?;
    tracing::debug!(
        host = %settings.server.host,
        port = settings.server.port,
        max_sessions = settings.session.max_concurrent_sessions,
        "Settings loaded"
    );
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_expected_values() {
        let settings = Settings::default();
        assert_eq!(settings.audio.input_sample_rate, 16_000);
        assert_eq!(settings.audio.output_sample_rate, 24_000);
        assert_eq!(settings.provider.connect_timeout_secs, 10);
        assert_eq!(settings.session.max_concurrent_sessions, 100);
        assert_eq!(settings.session.idle_timeout_secs, 300);
        assert!(settings.webhook.url.is_none());
        assert!(settings.system_prompt().contains("CRM"));
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            "[session]\nmax_concurrent_sessions = 4\nidle_timeout_secs = 30\n\
             sweep_interval_secs = 5\nmax_duration_secs = 600\n"
        )
        .unwrap();

        let settings = load_settings(file.path().to_str()).unwrap();
        assert_eq!(settings.session.max_concurrent_sessions, 4);
        assert_eq!(settings.session.idle_timeout_secs, 30);
        // Untouched sections keep their defaults
        assert_eq!(settings.inference.max_tokens, 1024);
    }

    #[test]
    fn system_prompt_override_wins() {
        let settings = Settings {
            system_prompt: Some("You are a test harness.".to_string()),
            ..Settings::default()
        };
        assert_eq!(settings.system_prompt(), "You are a test harness.");
    }
}
