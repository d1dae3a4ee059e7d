//! Application configuration options

use std::time::Duration;

use crate::deploy::orchestrator::OrchestratorOptions;
use crate::deploy::reconciler::ReconcilerSettings;
use crate::deploy::spawner::RunnerTemplate;
use crate::errors::OrchestratorError;
use crate::storage::layout::StorageLayout;
use crate::storage::settings::Settings;
use crate::utils::detect_local_ip;
use crate::workers::reconciler;

/// Main application options
#[derive(Debug, Clone)]
pub struct AppOptions {
    /// Lifecycle configuration
    pub lifecycle: LifecycleOptions,

    /// Storage layout paths
    pub storage: StorageLayout,

    /// Enable local HTTP server
    pub enable_socket_server: bool,

    /// Server configuration
    pub server: ServerOptions,

    /// Reconciler worker options
    pub reconciler_worker: reconciler::Options,

    /// Lifecycle API options
    pub orchestrator: OrchestratorOptions,

    /// How runner processes are started
    pub runner: RunnerTemplate,

    /// Time between SIGTERM and SIGKILL
    pub termination_grace: Duration,

    /// Connect timeout of the listening probe
    pub probe_timeout: Duration,

    /// Owners allowed to publish; everyone when `None`
    pub allowed_owners: Option<Vec<String>>,
}

impl Default for AppOptions {
    fn default() -> Self {
        Self {
            lifecycle: LifecycleOptions::default(),
            storage: StorageLayout::default(),
            enable_socket_server: true,
            server: ServerOptions::default(),
            reconciler_worker: reconciler::Options::default(),
            orchestrator: OrchestratorOptions::default(),
            runner: RunnerTemplate::default(),
            termination_grace: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(300),
            allowed_owners: None,
        }
    }
}

impl AppOptions {
    /// Build options from a validated settings document
    pub fn from_settings(
        storage: StorageLayout,
        settings: &Settings,
    ) -> Result<Self, OrchestratorError> {
        settings.validate()?;

        let public_host = match &settings.public_host {
            Some(host) => host.clone(),
            None => detect_local_ip().to_string(),
        };
        let reconcile = &settings.reconcile;

        Ok(Self {
            lifecycle: LifecycleOptions {
                stop_children_on_shutdown: settings.stop_children_on_shutdown,
                ..Default::default()
            },
            storage,
            enable_socket_server: true,
            server: ServerOptions {
                host: settings.server.host.clone(),
                port: settings.server.port,
            },
            reconciler_worker: reconciler::Options {
                interval: Duration::from_secs(reconcile.interval_secs),
            },
            orchestrator: OrchestratorOptions {
                port_range: settings.ports.range()?,
                public_host,
                reconciler: ReconcilerSettings {
                    startup_grace: Duration::from_secs(reconcile.startup_grace_secs),
                    require_listening: reconcile.require_listening,
                },
                freshness: Duration::from_millis(reconcile.freshness_ms),
            },
            runner: settings.runner.clone(),
            termination_grace: Duration::from_secs(settings.termination_grace_secs),
            probe_timeout: Duration::from_millis(reconcile.probe_timeout_ms),
            allowed_owners: settings.allowed_owners.clone(),
        })
    }
}

/// Lifecycle options for the orchestrator
#[derive(Debug, Clone)]
pub struct LifecycleOptions {
    /// Maximum delay for graceful shutdown
    pub max_shutdown_delay: Duration,

    /// Stop every runner on shutdown instead of leaving them detached
    pub stop_children_on_shutdown: bool,
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self {
            max_shutdown_delay: Duration::from_secs(30),
            stop_children_on_shutdown: false,
        }
    }
}

/// Local HTTP server options
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8500,
        }
    }
}
