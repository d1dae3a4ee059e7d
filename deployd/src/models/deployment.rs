//! Deployment models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deploy::fsm::DeploymentState;

/// Opaque reference to a spawned OS process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    /// OS process id
    pub pid: u32,

    /// Process start time (seconds since epoch) as reported by the OS.
    /// Used to tell the original child apart from a recycled pid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_started_at: Option<u64>,
}

impl ProcessHandle {
    pub fn new(pid: u32, os_started_at: Option<u64>) -> Self {
        Self { pid, os_started_at }
    }
}

/// One published, running-or-stopped instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    /// Unique deployment ID, never reused
    pub id: String,

    /// Account owning this deployment
    pub owner_id: String,

    /// Configuration served by the runner
    pub config_ref: String,

    /// Assigned port, held only while active
    #[serde(default)]
    pub port: Option<u16>,

    /// Handle of the runner process, present only while active
    #[serde(default)]
    pub process: Option<ProcessHandle>,

    /// Lifecycle state
    pub state: DeploymentState,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// When the current process was spawned (start of the startup grace period)
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    /// Last reconciliation time
    #[serde(default)]
    pub last_checked_at: Option<DateTime<Utc>>,

    /// Reason for the last spawn failure or crash
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Deployment {
    /// Create a fresh record in the pending state
    pub fn new(id: String, owner_id: &str, config_ref: &str, port: u16) -> Self {
        let now = Utc::now();
        Self {
            id,
            owner_id: owner_id.to_string(),
            config_ref: config_ref.to_string(),
            port: Some(port),
            process: None,
            state: DeploymentState::Pending,
            created_at: now,
            updated_at: now,
            started_at: None,
            last_checked_at: None,
            last_error: None,
        }
    }

    /// Apply a partial update in place
    pub fn apply(&mut self, patch: DeploymentPatch) {
        if let Some(state) = patch.state {
            self.state = state;
        }
        if let Some(port) = patch.port {
            self.port = port;
        }
        if let Some(process) = patch.process {
            self.process = process;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = started_at;
        }
        if let Some(checked_at) = patch.last_checked_at {
            self.last_checked_at = Some(checked_at);
        }
        if let Some(last_error) = patch.last_error {
            self.last_error = last_error;
        }
        self.updated_at = Utc::now();
    }

    /// Build the read model exposed to the surrounding application
    pub fn view(&self, public_host: &str) -> DeploymentView {
        DeploymentView {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            config_ref: self.config_ref.clone(),
            port: self.port,
            state: self.state,
            url: self
                .port
                .filter(|_| self.state.is_active())
                .map(|port| format!("http://{}:{}", public_host, port)),
            created_at: self.created_at,
            last_checked_at: self.last_checked_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// Partial update of a deployment record.
///
/// Outer `None` leaves a field untouched; `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeploymentPatch {
    pub state: Option<DeploymentState>,
    pub port: Option<Option<u16>>,
    pub process: Option<Option<ProcessHandle>>,
    pub started_at: Option<Option<DateTime<Utc>>>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<Option<String>>,
}

impl DeploymentPatch {
    /// Record a successful spawn
    pub fn running(state: DeploymentState, handle: ProcessHandle) -> Self {
        Self {
            state: Some(state),
            process: Some(Some(handle)),
            started_at: Some(Some(Utc::now())),
            last_error: Some(None),
            ..Default::default()
        }
    }

    /// Prepare an inactive record for a new spawn on `port`
    pub fn republish(state: DeploymentState, port: u16) -> Self {
        Self {
            state: Some(state),
            port: Some(Some(port)),
            process: Some(None),
            started_at: Some(None),
            last_error: Some(None),
            ..Default::default()
        }
    }

    /// Drop the port and process handle, moving to an inactive state
    pub fn deactivate(state: DeploymentState, error: Option<String>) -> Self {
        Self {
            state: Some(state),
            port: Some(None),
            process: Some(None),
            started_at: Some(None),
            last_checked_at: Some(Utc::now()),
            last_error: Some(error),
        }
    }

    /// Mark the record as checked, optionally confirming its state
    pub fn checked(state: Option<DeploymentState>) -> Self {
        Self {
            state,
            last_checked_at: Some(Utc::now()),
            ..Default::default()
        }
    }
}

/// Read model of a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentView {
    pub id: String,
    pub owner_id: String,
    pub config_ref: String,
    pub port: Option<u16>,
    pub state: DeploymentState,
    /// `http://<host>:<port>` while the deployment holds a port
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
