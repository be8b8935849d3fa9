//! Application state shared by every handler and by the gate middleware

use std::sync::Arc;

use gatekeeper_security::{
    Clock, GateServices, PasswordService, Role, SecurityGate, SystemClock,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use crate::config::Config;
use crate::error::{ApiError, Result};
use crate::services::directory::{NewUser, UserDirectory, UserRecord};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub gate: Arc<SecurityGate>,
    pub services: GateServices,
    pub directory: Arc<UserDirectory>,
    pub passwords: Arc<PasswordService>,
    /// Present when the Prometheus recorder is installed
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    /// Build the state from a finalized configuration
    pub fn new(config: Config, metrics: Option<PrometheusHandle>) -> Result<Self> {
        Self::with_clock(config, Arc::new(SystemClock), metrics)
    }

    pub fn with_clock(
        config: Config,
        clock: Arc<dyn Clock>,
        metrics: Option<PrometheusHandle>,
    ) -> Result<Self> {
        let directory = Arc::new(UserDirectory::new());
        let services = GateServices::in_memory(&config.gate, directory.clone(), clock)?;
        let gate = SecurityGate::standard(&config.gate, &services)?;

        info!(stages = ?gate.stage_names(), "Security gate assembled");

        Ok(Self {
            config: Arc::new(config),
            gate: Arc::new(gate),
            services,
            directory,
            passwords: Arc::new(PasswordService::new()?),
            metrics,
        })
    }

    /// Create the configured super admin unless one already exists
    pub fn seed_bootstrap_admin(&self) -> Result<Option<UserRecord>> {
        let bootstrap = &self.config.bootstrap;
        let Some(email) = bootstrap.admin_email.as_deref() else {
            return Ok(None);
        };
        if self.directory.has_role(&Role::SuperAdmin) {
            return Ok(None);
        }

        let password_hash = match (&bootstrap.admin_password_hash, &bootstrap.admin_password) {
            (Some(hash), _) => {
                PasswordService::check_hash(hash).map_err(|e| {
                    ApiError::configuration(format!("bootstrap.admin_password_hash: {}", e))
                })?;
                hash.clone()
            }
            (None, Some(password)) => self.passwords.hash(password)?,
            (None, None) => return Ok(None),
        };

        let admin = self.directory.create(NewUser {
            email: email.to_string(),
            name: bootstrap
                .admin_name
                .clone()
                .unwrap_or_else(|| "Administrator".to_string()),
            password_hash,
            role: Role::SuperAdmin,
        })?;

        info!(user_id = %admin.id, email = %admin.email, "Bootstrap super admin created");
        Ok(Some(admin))
    }
}
