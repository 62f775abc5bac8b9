use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::registry::ExecutionProfile;

use super::InstanceId;

/// Trait for the mechanisms that create and destroy isolation instances
///
/// This trait abstracts what the supervisor needs from a container runtime: a way to
/// create one instance whose standard channels are piped back to us, a kill path that
/// does not depend on the controlling process handle, and a teardown hook.
#[async_trait]
pub trait IsolationLayer: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Creates one instance and returns its controlling process
    ///
    /// stdin, stdout and stderr of the returned child must all be piped.
    fn spawn(&self, profile: &ExecutionProfile, instance: &InstanceId) -> std::io::Result<Child>;

    /// Terminates the instance by name, independently of any process handle
    async fn kill_instance(&self, instance: &InstanceId) -> Result<()>;

    /// Removes whatever is left of the instance
    async fn release(&self, instance: &InstanceId) -> Result<()>;
}

/// Pipes all three standard channels and spawns the command
pub(super) fn spawn_piped(mut command: Command) -> std::io::Result<Child> {
    command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    command.spawn()
}
