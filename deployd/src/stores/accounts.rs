//! Account lookups

use std::collections::HashSet;

use async_trait::async_trait;

use crate::errors::OrchestratorError;

/// Answers whether an owner id belongs to a known account
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn owner_exists(&self, owner_id: &str) -> Result<bool, OrchestratorError>;
}

/// Accepts every owner id; account checks happen upstream
pub struct OpenAccounts;

#[async_trait]
impl AccountStore for OpenAccounts {
    async fn owner_exists(&self, _owner_id: &str) -> Result<bool, OrchestratorError> {
        Ok(true)
    }
}

/// Fixed allow-list of owner ids
pub struct StaticAccounts {
    owners: HashSet<String>,
}

impl StaticAccounts {
    pub fn new(owners: impl IntoIterator<Item = String>) -> Self {
        Self {
            owners: owners.into_iter().collect(),
        }
    }
}

#[async_trait]
impl AccountStore for StaticAccounts {
    async fn owner_exists(&self, owner_id: &str) -> Result<bool, OrchestratorError> {
        Ok(self.owners.contains(owner_id))
    }
}
