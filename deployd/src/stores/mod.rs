//! Collaborator stores consumed by the orchestrator
//!
//! Configurations and accounts are owned elsewhere; the orchestrator only
//! reads them through these traits.

pub mod accounts;
pub mod configs;

use crate::errors::OrchestratorError;

const MAX_ID_LEN: usize = 128;

/// Check an owner id or config ref. Both end up as path components and
/// process arguments, so only `[A-Za-z0-9._-]` is allowed.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), OrchestratorError> {
    if value.is_empty() {
        return Err(OrchestratorError::ValidationError(format!("{} is empty", field)));
    }
    if value.len() > MAX_ID_LEN {
        return Err(OrchestratorError::ValidationError(format!(
            "{} is longer than {} characters",
            field, MAX_ID_LEN
        )));
    }
    if value == "." || value == ".." {
        return Err(OrchestratorError::ValidationError(format!("{} is reserved", field)));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
    if !value.chars().all(allowed) {
        return Err(OrchestratorError::ValidationError(format!(
            "{} may only contain letters, digits, '.', '_' and '-'",
            field
        )));
    }
    Ok(())
}
