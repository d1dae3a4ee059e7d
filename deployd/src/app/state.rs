//! Application state management

use std::sync::Arc;

use tracing::info;

use crate::app::options::AppOptions;
use crate::deploy::orchestrator::{Collaborators, Orchestrator};
use crate::deploy::ports::TcpPortProbe;
use crate::deploy::registry::DeploymentRegistry;
use crate::deploy::spawner::OsSupervisor;
use crate::errors::OrchestratorError;
use crate::stores::accounts::{AccountStore, OpenAccounts, StaticAccounts};
use crate::stores::configs::JsonConfigStore;

/// Main application state
pub struct AppState {
    /// Lifecycle API over the registry and the runner processes
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    /// Initialize application state.
    ///
    /// Loads the registry and reconciles it before returning, so callers
    /// only ever see records matching the OS.
    pub async fn init(options: &AppOptions) -> Result<Self, OrchestratorError> {
        info!("Initializing application state...");

        options.storage.setup().await?;

        let registry = Arc::new(DeploymentRegistry::open(options.storage.registry_dir()).await?);

        let supervisor = Arc::new(OsSupervisor::new(
            options.runner.clone(),
            Some(options.storage.logs_dir()),
            options.termination_grace,
        ));
        let probe = Arc::new(TcpPortProbe::new(options.probe_timeout));
        let configs = Arc::new(JsonConfigStore::new(options.storage.data_dir()));
        let accounts: Arc<dyn AccountStore> = match &options.allowed_owners {
            Some(owners) => Arc::new(StaticAccounts::new(owners.iter().cloned())),
            None => Arc::new(OpenAccounts),
        };

        let orchestrator = Orchestrator::init(
            registry,
            Collaborators {
                supervisor,
                probe,
                configs,
                accounts,
            },
            options.orchestrator.clone(),
        )
        .await;

        Ok(Self {
            orchestrator: Arc::new(orchestrator),
        })
    }

    /// Shutdown application state
    pub async fn shutdown(&self, stop_children: bool) -> Result<(), OrchestratorError> {
        info!("Shutting down application state...");

        if stop_children {
            let stopped = self.orchestrator.stop_all().await;
            info!("Stopped {} runners", stopped);
        } else {
            let active = self.orchestrator.registry().list_active().await;
            info!("Leaving {} runners running", active.len());
        }
        Ok(())
    }
}
