use std::process::{Output, Stdio};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use tokio::process::{Child, Command};

use crate::registry::ExecutionProfile;

use super::runner::spawn_piped;
use super::{InstanceId, IsolationLayer};

/// Stderr fragment docker prints when the named container is already gone
const NO_SUCH_CONTAINER: &str = "No such container";

/// Runs every request in a fresh container through the docker CLI
///
/// Containers get no network, a CPU and memory ceiling, and `--rm` so the runtime
/// removes them on exit. The code is fed through `-i` stdin, never a mount or argument.
pub struct DockerLayer {
    /// Path or name of the docker CLI
    binary: String,
    /// Value of `--cpus`
    cpus: String,
    /// Value of `--memory`
    memory: String,
}

#[async_trait]
impl IsolationLayer for DockerLayer {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn spawn(&self, profile: &ExecutionProfile, instance: &InstanceId) -> std::io::Result<Child> {
        let args = self.run_args(profile, instance);
        log::info!("Spawning: {} {}", self.binary, args.join(" "));

        let mut command = Command::new(&self.binary);
        command.args(&args);
        spawn_piped(command)
    }

    async fn kill_instance(&self, instance: &InstanceId) -> Result<()> {
        let output = self.control(&kill_args(instance)).await?;
        if !output.status.success() {
            bail!(
                "{} kill {instance} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn release(&self, instance: &InstanceId) -> Result<()> {
        let output = self.control(&remove_args(instance)).await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if output.status.success() {
            log::debug!("Removed leftover container {instance}");
        } else if stderr.contains(NO_SUCH_CONTAINER) {
            log::debug!("Container {instance} already removed by the runtime");
        } else {
            bail!(
                "{} rm -f {instance} exited with {}: {}",
                self.binary,
                output.status,
                stderr.trim()
            );
        }
        Ok(())
    }
}

impl DockerLayer {
    pub fn build(binary: &str, cpus: &str, memory: &str) -> Self {
        Self {
            binary: binary.to_string(),
            cpus: cpus.to_string(),
            memory: memory.to_string(),
        }
    }

    /// Arguments of the `docker run` invocation that creates the instance
    pub fn run_args(&self, profile: &ExecutionProfile, instance: &InstanceId) -> Vec<String> {
        let mut args: Vec<String> = [
            "run",
            "--rm",
            "--name",
            instance.as_str(),
            "-i",
            "--network",
            "none",
            "--cpus",
            self.cpus.as_str(),
            "--memory",
            self.memory.as_str(),
        ]
        .into_iter()
        .map(String::from)
        .collect();

        for (name, value) in &profile.env {
            args.push("-e".to_string());
            args.push(format!("{name}={value}"));
        }

        args.push(profile.image.clone());
        args.extend(profile.entry_command.iter().cloned());
        args
    }

    /// Runs a control command against the runtime, outside of any instance
    async fn control(&self, args: &[String]) -> Result<Output> {
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| anyhow!("Failed to spawn {} {}: {}", self.binary, args[0], e))
    }
}

/// Arguments of the out-of-band kill addressed to the container name
fn kill_args(instance: &InstanceId) -> Vec<String> {
    vec!["kill".to_string(), instance.to_string()]
}

/// Arguments of the forced removal; the container may already be gone
fn remove_args(instance: &InstanceId) -> Vec<String> {
    vec!["rm".to_string(), "-f".to_string(), instance.to_string()]
}
