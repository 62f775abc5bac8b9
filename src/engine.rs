use std::sync::Arc;

use anyhow::Result;

use crate::config::{ExecutionConfig, LanguageConfig};
use crate::registry::RuntimeRegistry;
use crate::sandbox::{
    EngineError, ExecutionOutcome, IsolationLayer, Supervisor, SupervisorSettings,
    create_isolation_layer,
};
use crate::validate::validate;

/// Validation, registry lookup and supervision behind a single call
pub struct ExecutionEngine {
    registry: Arc<RuntimeRegistry>,
    supervisor: Supervisor,
    default_language: String,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<RuntimeRegistry>,
        supervisor: Supervisor,
        default_language: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            supervisor,
            default_language: default_language.into(),
        }
    }

    pub fn from_config(execution: &ExecutionConfig, languages: Vec<LanguageConfig>) -> Result<Self> {
        let registry = RuntimeRegistry::from_config(languages)?;
        if registry.resolve(&execution.default_language).is_none() {
            log::warn!(
                "Default language {} is not registered, requests without a language will be rejected",
                execution.default_language
            );
        }
        log::info!("Registered languages: {}", registry.language_keys().join(", "));

        let layer = create_isolation_layer(execution);
        Ok(Self::with_layer(registry, layer, execution))
    }

    fn with_layer(
        registry: RuntimeRegistry,
        layer: Arc<dyn IsolationLayer>,
        execution: &ExecutionConfig,
    ) -> Self {
        let supervisor = Supervisor::new(layer, SupervisorSettings::from(execution));
        Self::new(Arc::new(registry), supervisor, &execution.default_language)
    }

    /// Validates and runs one snippet
    ///
    /// Invalid requests are rejected before any instance exists.
    pub async fn execute(
        &self,
        code: String,
        language_key: Option<&str>,
    ) -> Result<ExecutionOutcome, EngineError> {
        let language_key = language_key.unwrap_or(&self.default_language);
        let request = validate(code, language_key, &self.registry)?;
        self.supervisor.run(&request).await
    }
}
