use std::sync::Arc;

use thiserror::Error;

use crate::registry::{ExecutionProfile, RuntimeRegistry};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Code is required")]
    EmptyCode,
    #[error("Unsupported language")]
    UnsupportedLanguage(String),
}

/// A request that passed validation and carries its resolved profile
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub code: String,
    pub profile: Arc<ExecutionProfile>,
}

impl ExecutionRequest {
    pub fn language_key(&self) -> &str {
        &self.profile.language_key
    }
}

/// Rejects blank code and unknown languages before anything is allocated
///
/// The code check happens first, so a blank submission never reaches the registry.
pub fn validate(
    code: String,
    language_key: &str,
    registry: &RuntimeRegistry,
) -> Result<ExecutionRequest, ValidationError> {
    if code.trim().is_empty() {
        return Err(ValidationError::EmptyCode);
    }

    let profile = registry
        .resolve(language_key)
        .ok_or_else(|| ValidationError::UnsupportedLanguage(language_key.to_string()))?;

    Ok(ExecutionRequest { code, profile })
}
