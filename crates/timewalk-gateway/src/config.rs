//! Gateway configuration.
//!
//! Precedence: environment (`TIMEWALK__...`) > TOML file (`TIMEWALK_CONFIG`,
//! default `config/timewalk`) > defaults. API keys are read from their
//! conventional environment variables, usually via `.env`.

use serde::Deserialize;
use std::path::Path;
use timewalk_voice::VoiceConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    /// Listen address (default: 127.0.0.1)
    pub host: String,
    /// Listen port (default: 8000)
    pub port: u16,
    /// Origin allowed by CORS (default: http://localhost:5173)
    pub frontend_origin: String,
    /// Seconds between world job polls (default: 5)
    pub world_poll_interval_secs: u64,
    /// Polls before a world job is abandoned (default: 120)
    pub world_poll_attempts: u32,
    #[serde(default)]
    pub voice: VoiceConfig,
}

impl GatewayConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("TIMEWALK_CONFIG").unwrap_or_else(|_| "config/timewalk".to_string());
        let builder = config::Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 8000_i64)?
            .set_default("frontend_origin", "http://localhost:5173")?
            .set_default("world_poll_interval_secs", 5_i64)?
            .set_default("world_poll_attempts", 120_i64)?;

        // `config/timewalk` resolves to config/timewalk.toml
        let builder = if Path::new(&config_path).exists() || Path::new(&format!("{}.toml", config_path)).exists() {
            builder.add_source(config::File::with_name(&config_path))
        } else {
            builder
        };

        builder
            .add_source(config::Environment::with_prefix("TIMEWALK").separator("__"))
            .build()?
            .try_deserialize()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Upstream credentials.
#[derive(Clone)]
pub struct Credentials {
    pub gradium_api_key: String,
    pub gemini_api_key: String,
    pub world_labs_api_key: String,
}

impl Credentials {
    pub fn from_env() -> Result<Self, String> {
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| format!("{} is not set (add it to .env)", name))
        };
        Ok(Self {
            gradium_api_key: var("GRADIUM_API_KEY")?,
            gemini_api_key: var("GEMINI_API_KEY")?,
            world_labs_api_key: var("WORLD_LABS_API_KEY")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_file_or_env() {
        std::env::set_var("TIMEWALK_CONFIG", "does/not/exist");
        let cfg = GatewayConfig::load().unwrap();
        assert_eq!(cfg.port, 8000);
        assert_eq!(cfg.bind_addr(), "127.0.0.1:8000");
        assert_eq!(cfg.world_poll_attempts, 120);
        assert_eq!(cfg.voice.turn.debounce_ms, 500);
    }
}
