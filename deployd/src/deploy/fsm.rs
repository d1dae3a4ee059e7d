//! Finite state machine for deployment lifecycle

use serde::{Deserialize, Serialize};

/// Deployment state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentState {
    /// Spawn attempt in progress
    Pending,

    /// Process started and believed alive
    Running,

    /// Stopped on request
    Stopped,

    /// Process found dead or never became ready
    Crashed,
}

impl DeploymentState {
    /// Whether the deployment holds a port and a process handle
    pub fn is_active(&self) -> bool {
        matches!(self, DeploymentState::Pending | DeploymentState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentState::Pending => "pending",
            DeploymentState::Running => "running",
            DeploymentState::Stopped => "stopped",
            DeploymentState::Crashed => "crashed",
        }
    }
}

impl std::fmt::Display for DeploymentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deployment event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentEvent {
    /// An inactive record is being published again
    Republish,

    /// The OS confirmed process creation
    Spawned,

    /// Process creation failed
    SpawnFailed(String),

    /// Reconciliation saw the process alive and listening
    Confirmed,

    /// Reconciliation saw the process gone or never listening
    ProcessLost(String),

    /// Explicit stop or delete
    Stop,
}

/// Compute the state reached from `state` on `event`.
pub fn transition(
    state: DeploymentState,
    event: &DeploymentEvent,
) -> Result<DeploymentState, String> {
    use DeploymentEvent as E;
    use DeploymentState as S;

    let next = match (state, event) {
        (S::Stopped | S::Crashed, E::Republish) => S::Pending,

        (S::Pending, E::Spawned) => S::Running,
        (S::Pending, E::SpawnFailed(_)) => S::Crashed,

        (S::Pending | S::Running, E::Confirmed) => S::Running,
        (S::Pending | S::Running, E::ProcessLost(_)) => S::Crashed,

        (_, E::Stop) => S::Stopped,

        (state, event) => {
            return Err(format!("{:?} -> {:?}", state, event));
        }
    };

    Ok(next)
}
