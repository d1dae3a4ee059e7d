//! Liveness checks comparing registry records with the OS

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::debug;

use crate::deploy::ports::PortProbe;
use crate::deploy::spawner::ProcessSupervisor;
use crate::errors::OrchestratorError;
use crate::models::deployment::Deployment;

/// Result of checking one active deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Process alive and port accepting connections
    Healthy,

    /// Process alive, not listening yet, still inside the startup grace period
    Starting,

    /// Process alive but not listening after the grace period
    Stalled,
}

/// Reconciler settings
#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// How long a fresh process may take to open its port
    pub startup_grace: Duration,

    /// Require the port to accept connections to count as healthy
    pub require_listening: bool,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            startup_grace: Duration::from_secs(15),
            require_listening: true,
        }
    }
}

/// Checks recorded process handles against live OS state
pub struct Reconciler {
    supervisor: Arc<dyn ProcessSupervisor>,
    probe: Arc<dyn PortProbe>,
    settings: ReconcilerSettings,
}

impl Reconciler {
    pub fn new(
        supervisor: Arc<dyn ProcessSupervisor>,
        probe: Arc<dyn PortProbe>,
        settings: ReconcilerSettings,
    ) -> Self {
        Self {
            supervisor,
            probe,
            settings,
        }
    }

    /// Observe one deployment.
    ///
    /// Returns `ProcessNotFound` when the handle no longer identifies a live
    /// process (or no handle was ever recorded).
    pub async fn check(&self, deployment: &Deployment) -> Result<Observation, OrchestratorError> {
        let Some(handle) = &deployment.process else {
            return Err(OrchestratorError::ProcessNotFound(
                "no process handle recorded".to_string(),
            ));
        };

        if !self.supervisor.is_alive(handle).await {
            return Err(OrchestratorError::ProcessNotFound(format!(
                "pid {} is not running",
                handle.pid
            )));
        }

        if !self.settings.require_listening {
            return Ok(Observation::Healthy);
        }

        let listening = match deployment.port {
            Some(port) => self.probe.is_listening(port).await,
            None => false,
        };
        if listening {
            return Ok(Observation::Healthy);
        }

        if self.within_grace(deployment) {
            debug!(
                "Deployment {} not listening yet, inside startup grace",
                deployment.id
            );
            Ok(Observation::Starting)
        } else {
            Ok(Observation::Stalled)
        }
    }

    fn within_grace(&self, deployment: &Deployment) -> bool {
        let Some(started_at) = deployment.started_at else {
            return false;
        };
        let elapsed = Utc::now().signed_duration_since(started_at);
        match elapsed.to_std() {
            Ok(elapsed) => elapsed < self.settings.startup_grace,
            // started in the future (clock step back): still starting
            Err(_) => true,
        }
    }
}
