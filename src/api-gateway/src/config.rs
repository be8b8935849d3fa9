//! Application Configuration
//!
//! Settings are layered with the `config` crate: built-in defaults, then
//! `config/default.*`, then `config/{APP_ENV}.*`, then `GATEKEEPER_*` environment
//! variables (nested keys separated by `__`, e.g. `GATEKEEPER_SERVER__PORT`).

use gatekeeper_security::GateConfig;
use rand::{distributions::Alphanumeric, Rng};
use serde::Deserialize;
use std::path::Path;
use tracing::warn;

use crate::error::{ApiError, Result};

const ENV_PREFIX: &str = "GATEKEEPER";
const GENERATED_SECRET_LEN: usize = 48;

/// Main configuration for the application
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub environment: String,
    pub server: ServerConfig,
    pub gate: GateConfig,
    pub observability: ObservabilityConfig,
    pub bootstrap: BootstrapConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

/// Observability (logging and metrics) configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_format: LogFormat,
    /// `EnvFilter` directives used when `RUST_LOG` is unset
    pub log_filter: String,
    pub metrics_enabled: bool,
}

/// Super admin account created at start-up when the directory has none
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    pub admin_email: Option<String>,
    pub admin_name: Option<String>,
    /// Plain password, hashed at start-up
    pub admin_password: Option<String>,
    /// Pre-computed Argon2 PHC string; takes precedence over `admin_password`
    pub admin_password_hash: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            environment: "development".to_string(),
            server: ServerConfig::default(),
            gate: GateConfig::default(),
            observability: ObservabilityConfig::default(),
            bootstrap: BootstrapConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            request_timeout_seconds: 30,
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Json,
            log_filter: "info,gatekeeper_api=debug,gatekeeper_security=debug".to_string(),
            metrics_enabled: true,
        }
    }
}

impl Config {
    /// Load configuration for the environment named by `APP_ENV` (default `development`)
    pub fn load(config_dir: impl AsRef<Path>) -> Result<Self> {
        let environment = std::env::var("APP_ENV").unwrap_or_else(|_| "development".into());
        Self::load_for(config_dir, &environment)
    }

    /// Load configuration for an explicit environment
    pub fn load_for(config_dir: impl AsRef<Path>, environment: &str) -> Result<Self> {
        let dir = config_dir.as_ref();

        let builder = config::Config::builder()
            .add_source(config::File::from(dir.join("default")).required(false))
            .add_source(config::File::from(dir.join(environment)).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            // Flat alias for the one secret operators set most often
            .set_override_option("gate.jwt.secret", std::env::var("GATEKEEPER_JWT_SECRET").ok())?
            .set_override("environment", environment)?;

        Ok(builder.build()?.try_deserialize()?)
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }

    /// Fill in derived values and validate. Outside production a missing token secret is
    /// replaced with a random one, which invalidates tokens on every restart. A secret
    /// that is set but too short always fails validation.
    pub fn finalize(mut self) -> Result<Self> {
        if self.gate.jwt.secret.is_empty() {
            if self.is_production() {
                return Err(ApiError::configuration(
                    "gate.jwt.secret must be set in production",
                ));
            }
            warn!("No token secret configured, generating an ephemeral one");
            self.gate.jwt.secret = rand::thread_rng()
                .sample_iter(&Alphanumeric)
                .take(GENERATED_SECRET_LEN)
                .map(char::from)
                .collect();
        }

        self.gate.validate()?;

        if self.bootstrap.admin_email.is_some()
            && self.bootstrap.admin_password.is_none()
            && self.bootstrap.admin_password_hash.is_none()
        {
            return Err(ApiError::configuration(
                "bootstrap.admin_email requires admin_password or admin_password_hash",
            ));
        }

        Ok(self)
    }
}
