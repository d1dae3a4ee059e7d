//! Durable deployment registry
//!
//! Each record lives in its own `<id>.json` file under the registry
//! directory. Every mutation is written to disk before the in-memory index is
//! changed, so a failed write leaves both views untouched.

use std::collections::{HashMap, HashSet};

use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::filesys::file::File;
use crate::models::deployment::{Deployment, DeploymentPatch};

/// Store of deployment records keyed by id
pub struct DeploymentRegistry {
    dir: Dir,
    records: RwLock<HashMap<String, Deployment>>,
}

impl DeploymentRegistry {
    /// Open the registry, loading every record found in `dir`
    pub async fn open(dir: Dir) -> Result<Self, OrchestratorError> {
        dir.create().await.map_err(registry_io)?;

        let mut records = HashMap::new();
        for file in dir.list_files_with_ext("json").await.map_err(registry_io)? {
            let record: Deployment = file.read_json().await.map_err(|e| {
                OrchestratorError::RegistryIoError(format!(
                    "unreadable record {}: {}",
                    file.path().display(),
                    e
                ))
            })?;
            debug!("Loaded deployment record {} ({})", record.id, record.state);
            records.insert(record.id.clone(), record);
        }

        info!(
            "Opened deployment registry at {} with {} records",
            dir.path().display(),
            records.len()
        );

        Ok(Self {
            dir,
            records: RwLock::new(records),
        })
    }

    fn record_file(&self, id: &str) -> File {
        self.dir.file(&format!("{}.json", id))
    }

    /// Insert a new record
    pub async fn create(&self, record: Deployment) -> Result<Deployment, OrchestratorError> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(OrchestratorError::Internal(format!(
                "deployment {} already exists",
                record.id
            )));
        }

        self.record_file(&record.id)
            .write_json_atomic(&record)
            .await
            .map_err(registry_io)?;
        records.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Apply a partial update to an existing record
    pub async fn update(
        &self,
        id: &str,
        patch: DeploymentPatch,
    ) -> Result<Deployment, OrchestratorError> {
        let mut records = self.records.write().await;
        let mut updated = records
            .get(id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        updated.apply(patch);

        self.record_file(id)
            .write_json_atomic(&updated)
            .await
            .map_err(registry_io)?;
        records.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    /// Remove a record, returning it if it existed
    pub async fn delete(&self, id: &str) -> Result<Option<Deployment>, OrchestratorError> {
        let mut records = self.records.write().await;
        if !records.contains_key(id) {
            return Ok(None);
        }

        self.record_file(id).delete().await.map_err(registry_io)?;
        Ok(records.remove(id))
    }

    pub async fn get(&self, id: &str) -> Option<Deployment> {
        self.records.read().await.get(id).cloned()
    }

    pub async fn list_by_owner(&self, owner_id: &str) -> Vec<Deployment> {
        let records = self.records.read().await;
        sorted(records.values().filter(|d| d.owner_id == owner_id).cloned())
    }

    pub async fn list_all(&self) -> Vec<Deployment> {
        let records = self.records.read().await;
        sorted(records.values().cloned())
    }

    /// Records currently in the pending or running state
    pub async fn list_active(&self) -> Vec<Deployment> {
        let records = self.records.read().await;
        sorted(records.values().filter(|d| d.state.is_active()).cloned())
    }

    /// The active record holding `port`, if any
    pub async fn find_by_port(&self, port: u16) -> Option<Deployment> {
        let records = self.records.read().await;
        records
            .values()
            .find(|d| d.state.is_active() && d.port == Some(port))
            .cloned()
    }

    /// The record publishing `config_ref` for `owner_id`, preferring an
    /// active one when several exist
    pub async fn find_for_config(&self, owner_id: &str, config_ref: &str) -> Option<Deployment> {
        let records = self.records.read().await;
        let mut matching: Vec<&Deployment> = records
            .values()
            .filter(|d| d.owner_id == owner_id && d.config_ref == config_ref)
            .collect();
        matching.sort_by_key(|d| (!d.state.is_active(), d.created_at));
        matching.first().map(|d| (*d).clone())
    }

    /// Ports held by active records
    pub async fn active_ports(&self) -> HashSet<u16> {
        let records = self.records.read().await;
        records
            .values()
            .filter(|d| d.state.is_active())
            .filter_map(|d| d.port)
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn sorted(records: impl Iterator<Item = Deployment>) -> Vec<Deployment> {
    let mut records: Vec<Deployment> = records.collect();
    records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    records
}

fn registry_io(err: OrchestratorError) -> OrchestratorError {
    match err {
        OrchestratorError::RegistryIoError(_) => err,
        other => OrchestratorError::RegistryIoError(other.to_string()),
    }
}
