//! Settings file management

use serde::{Deserialize, Serialize};

use crate::deploy::ports::PortRange;
use crate::deploy::spawner::RunnerTemplate;
use crate::errors::OrchestratorError;
use crate::logs::LogLevel;

/// Orchestrator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON logs on stdout
    #[serde(default)]
    pub log_json: bool,

    /// Local HTTP API
    #[serde(default)]
    pub server: ServerSettings,

    /// Ports handed to deployments
    #[serde(default)]
    pub ports: PortSettings,

    /// Host used in open URLs, detected from the default route when absent
    #[serde(default)]
    pub public_host: Option<String>,

    /// How runner processes are started
    #[serde(default)]
    pub runner: RunnerTemplate,

    /// Reconciliation timing
    #[serde(default)]
    pub reconcile: ReconcileSettings,

    /// Seconds between SIGTERM and SIGKILL
    #[serde(default = "default_termination_grace")]
    pub termination_grace_secs: u64,

    /// Owners allowed to publish; everyone when absent
    #[serde(default)]
    pub allowed_owners: Option<Vec<String>>,

    /// Stop every runner when the orchestrator shuts down
    #[serde(default)]
    pub stop_children_on_shutdown: bool,
}

fn default_true() -> bool {
    true
}

fn default_termination_grace() -> u64 {
    5
}

/// Upper bound on the SIGTERM grace; stop_all must fit in the shutdown deadline
pub const MAX_TERMINATION_GRACE_SECS: u64 = 20;

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            server: ServerSettings::default(),
            ports: PortSettings::default(),
            public_host: None,
            runner: RunnerTemplate::default(),
            reconcile: ReconcileSettings::default(),
            termination_grace_secs: default_termination_grace(),
            allowed_owners: None,
            stop_children_on_shutdown: false,
        }
    }
}

impl Settings {
    /// Reject settings the orchestrator cannot run with
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        self.ports.range()?;
        if self.runner.program.trim().is_empty() {
            return Err(OrchestratorError::ConfigError(
                "runner program must not be empty".to_string(),
            ));
        }
        if self.termination_grace_secs > MAX_TERMINATION_GRACE_SECS {
            return Err(OrchestratorError::ConfigError(format!(
                "termination grace must be at most {} seconds",
                MAX_TERMINATION_GRACE_SECS
            )));
        }
        if self.reconcile.interval_secs == 0 {
            return Err(OrchestratorError::ConfigError(
                "reconcile interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Host to bind to
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

fn default_server_host() -> String {
    "127.0.0.1".to_string()
}

fn default_server_port() -> u16 {
    8500
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_server_port(),
        }
    }
}

/// Deployment port range settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortSettings {
    /// First port of the range
    #[serde(default = "default_port_base")]
    pub base: u16,

    /// Number of ports in the range
    #[serde(default = "default_port_count")]
    pub count: u16,
}

fn default_port_base() -> u16 {
    8502
}

fn default_port_count() -> u16 {
    100
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            base: default_port_base(),
            count: default_port_count(),
        }
    }
}

impl PortSettings {
    pub fn range(&self) -> Result<PortRange, OrchestratorError> {
        PortRange::new(self.base, self.count)
    }
}

/// Reconciliation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileSettings {
    /// Seconds between background sweeps
    #[serde(default = "default_reconcile_interval")]
    pub interval_secs: u64,

    /// Seconds a new runner may take to open its port
    #[serde(default = "default_startup_grace")]
    pub startup_grace_secs: u64,

    /// Listing reuses a sweep younger than this many milliseconds
    #[serde(default = "default_freshness")]
    pub freshness_ms: u64,

    /// Require the port to accept connections to count as running
    #[serde(default = "default_true")]
    pub require_listening: bool,

    /// Connect timeout of the listening probe in milliseconds
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,
}

fn default_reconcile_interval() -> u64 {
    5
}

fn default_startup_grace() -> u64 {
    15
}

fn default_freshness() -> u64 {
    2000
}

fn default_probe_timeout() -> u64 {
    300
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_reconcile_interval(),
            startup_grace_secs: default_startup_grace(),
            freshness_ms: default_freshness(),
            require_listening: true,
            probe_timeout_ms: default_probe_timeout(),
        }
    }
}
