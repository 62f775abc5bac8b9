mod classify;
mod docker_runner;
mod local_runner;
mod runner;
mod streams;
mod supervisor;

// Re-export the trait and common types
pub use classify::{ExecutionOutcome, TIMEOUT_EXIT_STATUS, Termination, classify};
pub use docker_runner::DockerLayer;
pub use local_runner::LocalLayer;
pub use runner::IsolationLayer;
pub use streams::{CapturedStream, CapturedStreams, StreamAggregator};
pub use supervisor::{Supervisor, SupervisorSettings};

use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use uuid::Uuid;

use crate::config::{ExecutionConfig, IsolationKind};
use crate::validate::ValidationError;

/// Name of one isolation instance, unique per call
///
/// Generated from a fresh random UUID for every request, so concurrent calls never
/// share or reuse a name. The isolation layer uses it for out-of-band termination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceId(String);

impl InstanceId {
    pub fn generate() -> Self {
        Self(format!("executor-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Terminal failures of one execution request
///
/// Timeouts and failing user code are not errors; they come back as an
/// [`ExecutionOutcome`].
#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Failed to spawn isolation instance: {0}")]
    Spawn(String),
    #[error("Failed to deliver code to isolation instance: {0}")]
    Delivery(String),
    #[error("Lost control of isolation instance: {0}")]
    Supervision(String),
}

impl EngineError {
    /// Whether the caller is at fault, as opposed to the infrastructure
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Creates the isolation layer selected in the configuration
///
/// The docker layer is the production choice. The local layer runs code directly on
/// the host and exists for development machines without a container runtime.
pub fn create_isolation_layer(config: &ExecutionConfig) -> Arc<dyn IsolationLayer> {
    match config.isolation {
        IsolationKind::Docker => {
            let available = std::process::Command::new(&config.docker_binary)
                .arg("--version")
                .output()
                .map(|output| output.status.success())
                .unwrap_or(false);
            if !available {
                log::warn!(
                    "{} is not runnable, every execution request will fail to spawn",
                    config.docker_binary
                );
            }

            log::info!("Creating DockerLayer (full isolation mode)");
            Arc::new(DockerLayer::build(
                &config.docker_binary,
                &config.cpus,
                &config.memory,
            ))
        }
        IsolationKind::Local => {
            log::info!("Creating LocalLayer (no isolation mode)");
            Arc::new(LocalLayer::build())
        }
    }
}
