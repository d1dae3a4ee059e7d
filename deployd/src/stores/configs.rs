//! Chatbot configuration store

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;

/// The parts of a saved configuration the orchestrator looks at.
///
/// Everything else (prompt, backend endpoints, ...) is kept opaque and read
/// by the runner itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Display title of the chatbot
    #[serde(default)]
    pub title: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Read-only access to saved configurations
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Load the configuration behind `config_ref`, `None` if it does not exist
    async fn load(&self, config_ref: &str) -> Result<Option<RunnerConfig>, OrchestratorError>;
}

/// Configurations stored as `<data_dir>/<config_ref>/config.json`
pub struct JsonConfigStore {
    data_dir: Dir,
}

impl JsonConfigStore {
    pub fn new(data_dir: Dir) -> Self {
        Self { data_dir }
    }
}

#[async_trait]
impl ConfigStore for JsonConfigStore {
    async fn load(&self, config_ref: &str) -> Result<Option<RunnerConfig>, OrchestratorError> {
        super::validate_identifier("config_ref", config_ref)?;
        self.data_dir
            .subdir(config_ref)
            .file("config.json")
            .read_json_opt()
            .await
    }
}
