//! # Configuration Management
//!
//! Loads and manages application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_UPSTREAM_AGENT_URL, ...)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// Broken into logical groups so each subsystem reads only its own section:
/// the HTTP server, the audio pipeline, the upstream conversational agent,
/// the coaching collaborators, and performance limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioConfig,
    pub upstream: UpstreamConfig,
    pub coaching: CoachingConfig,
    pub performance: PerformanceConfig,
}

/// HTTP server settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: only accept connections from localhost
/// - `host = "0.0.0.0"`: accept connections from any IP address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Audio pipeline settings for the live interview session.
///
/// ## Fields:
/// - `capture_sample_rate`: microphone rate sent upstream (16 kHz PCM)
/// - `playback_sample_rate`: rate of agent audio played back (24 kHz PCM)
/// - `capture_block_size`: samples per capture block handed to the encoder
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub capture_block_size: usize,
}

/// Upstream conversational agent connection settings.
///
/// ## Fields:
/// - `agent_url`: WebSocket endpoint of the live agent
/// - `model`: model identifier sent in the session setup message
/// - `system_instruction`: interviewer persona for the agent
/// - `open_timeout_ms`: bounded wait for the transport open handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub agent_url: String,
    pub model: String,
    pub system_instruction: String,
    pub open_timeout_ms: u64,
}

/// Post-session coaching collaborator settings.
///
/// ## Fields:
/// - `feedback_model`: generative model used for transcript analysis
/// - `api_key_env`: name of the environment variable holding the API key
/// - `history_path`: JSON file backing the append-only session store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoachingConfig {
    pub feedback_model: String,
    pub api_key_env: String,
    pub history_path: String,
}

/// Performance tuning configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    pub max_concurrent_sessions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioConfig {
                capture_sample_rate: 16_000,
                playback_sample_rate: 24_000,
                // Mirrors the 4096-sample processing block used by the
                // browser client this backend replaced.
                capture_block_size: 4096,
            },
            upstream: UpstreamConfig {
                agent_url: "wss://generativelanguage.googleapis.com/ws/live".to_string(),
                model: "gemini-1.5-flash".to_string(),
                system_instruction:
                    "You are a senior hiring manager. Ask high-stakes follow-up questions."
                        .to_string(),
                open_timeout_ms: 10_000,
            },
            coaching: CoachingConfig {
                feedback_model: "gemini-1.5-pro".to_string(),
                api_key_env: "GOOGLE_API_KEY".to_string(),
                history_path: "interview_sessions.json".to_string(),
            },
            performance: PerformanceConfig {
                max_concurrent_sessions: 4,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle the bare HOST/PORT variables used by deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what is wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.capture_sample_rate == 0 || self.audio.playback_sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rates must be greater than 0"));
        }

        if self.audio.capture_block_size == 0 {
            return Err(anyhow::anyhow!("Capture block size must be greater than 0"));
        }

        if self.upstream.agent_url.is_empty() {
            return Err(anyhow::anyhow!("Upstream agent URL cannot be empty"));
        }

        if self.upstream.open_timeout_ms == 0 {
            return Err(anyhow::anyhow!("Transport open timeout must be greater than 0"));
        }

        if self.performance.max_concurrent_sessions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent sessions must be greater than 0"
            ));
        }

        Ok(())
    }

    /// Update configuration from a JSON string (used for runtime config updates).
    ///
    /// ## Partial updates:
    /// Only the fields present in the JSON are changed; everything else keeps
    /// its current value. For example `{"server": {"port": 9000}}` changes
    /// only the port. The updated configuration is re-validated.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial_config: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(server) = partial_config.get("server") {
            if let Some(host) = server.get("host").and_then(|v| v.as_str()) {
                self.server.host = host.to_string();
            }
            if let Some(port) = server.get("port").and_then(|v| v.as_u64()) {
                self.server.port = port as u16;
            }
        }

        if let Some(audio) = partial_config.get("audio") {
            if let Some(rate) = audio.get("capture_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.capture_sample_rate = rate as u32;
            }
            if let Some(rate) = audio.get("playback_sample_rate").and_then(|v| v.as_u64()) {
                self.audio.playback_sample_rate = rate as u32;
            }
            if let Some(block) = audio.get("capture_block_size").and_then(|v| v.as_u64()) {
                self.audio.capture_block_size = block as usize;
            }
        }

        if let Some(upstream) = partial_config.get("upstream") {
            if let Some(url) = upstream.get("agent_url").and_then(|v| v.as_str()) {
                self.upstream.agent_url = url.to_string();
            }
            if let Some(model) = upstream.get("model").and_then(|v| v.as_str()) {
                self.upstream.model = model.to_string();
            }
            if let Some(instruction) = upstream.get("system_instruction").and_then(|v| v.as_str()) {
                self.upstream.system_instruction = instruction.to_string();
            }
            if let Some(timeout) = upstream.get("open_timeout_ms").and_then(|v| v.as_u64()) {
                self.upstream.open_timeout_ms = timeout;
            }
        }

        if let Some(coaching) = partial_config.get("coaching") {
            if let Some(model) = coaching.get("feedback_model").and_then(|v| v.as_str()) {
                self.coaching.feedback_model = model.to_string();
            }
            if let Some(path) = coaching.get("history_path").and_then(|v| v.as_str()) {
                self.coaching.history_path = path.to_string();
            }
        }

        if let Some(performance) = partial_config.get("performance") {
            if let Some(sessions) = performance
                .get("max_concurrent_sessions")
                .and_then(|v| v.as_u64())
            {
                self.performance.max_concurrent_sessions = sessions as usize;
            }
        }

        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.audio.capture_sample_rate, 16_000);
        assert_eq!(config.audio.playback_sample_rate, 24_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.upstream.open_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.audio.capture_block_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"server": {"port": 9090}, "upstream": {"model": "gemini-2.0-flash"}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.upstream.model, "gemini-2.0-flash");
        // Untouched fields keep their defaults
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.audio.capture_block_size, 4096);
    }
}
