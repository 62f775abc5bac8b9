use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};

use crate::config::ExecutionConfig;
use crate::validate::ExecutionRequest;

use super::{
    CapturedStreams, EngineError, ExecutionOutcome, InstanceId, IsolationLayer,
    StreamAggregator, Termination, classify,
};

#[derive(Debug, Clone, Copy)]
pub struct SupervisorSettings {
    /// Wall-clock limit of one execution
    pub deadline: Duration,
    /// Shared bound on all work after the instance stopped or was killed
    pub grace_period: Duration,
    pub max_output_bytes: usize,
}

impl From<&ExecutionConfig> for SupervisorSettings {
    fn from(config: &ExecutionConfig) -> Self {
        Self {
            deadline: config.timeout.into(),
            grace_period: config.grace_period.into(),
            max_output_bytes: config.max_output_bytes,
        }
    }
}

enum Race {
    Exited(std::io::Result<ExitStatus>),
    DeadlineExpired,
}

/// Owns the lifecycle of one isolation instance per call
///
/// Every call creates its own instance and tears it down before returning. Calls share
/// nothing but the isolation layer, so any number of them can run side by side.
pub struct Supervisor {
    layer: Arc<dyn IsolationLayer>,
    settings: SupervisorSettings,
}

impl Supervisor {
    pub fn new(layer: Arc<dyn IsolationLayer>, settings: SupervisorSettings) -> Self {
        Self { layer, settings }
    }

    /// Runs one validated request to completion or deadline
    pub async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, EngineError> {
        let instance = InstanceId::generate();
        let language_key = request.language_key();
        log::info!(
            "Creating instance {instance} for {language_key} on the {} layer",
            self.layer.name()
        );

        let mut child = self.layer.spawn(&request.profile, &instance).map_err(|e| {
            log::error!("Failed to spawn instance {instance}: {e}");
            EngineError::Spawn(e.to_string())
        })?;

        let channels = child
            .stdin
            .take()
            .zip(child.stdout.take())
            .zip(child.stderr.take());
        let Some(((stdin, stdout), stderr)) = channels else {
            let settle_by = Instant::now() + self.settings.grace_period;
            self.terminate(&mut child, &instance, settle_by).await;
            return Err(EngineError::Spawn(format!(
                "instance {instance} was created without piped standard channels"
            )));
        };

        // Draining starts before delivery so neither side can fill a pipe and stall
        let aggregator = StreamAggregator::start(stdout, stderr, self.settings.max_output_bytes);
        let delivery = tokio::spawn(deliver_code(stdin, request.code.clone()));

        let race = tokio::select! {
            status = child.wait() => Race::Exited(status),
            _ = tokio::time::sleep(self.settings.deadline) => Race::DeadlineExpired,
        };

        let termination = match race {
            Race::Exited(Ok(status)) => {
                let code = exit_code(status);
                log::info!("Instance {instance} exited with status {code}");
                Termination::Exited(code)
            }
            Race::Exited(Err(e)) => {
                log::error!("Lost the process handle of instance {instance}: {e}");
                self.settle(&mut child, &instance, aggregator, delivery, true)
                    .await;
                return Err(EngineError::Supervision(e.to_string()));
            }
            Race::DeadlineExpired => {
                log::warn!(
                    "Instance {instance} exceeded the {:?} deadline, terminating",
                    self.settings.deadline
                );
                Termination::DeadlineExpired
            }
        };

        let killed = termination == Termination::DeadlineExpired;
        let (streams, delivered) = self
            .settle(&mut child, &instance, aggregator, delivery, killed)
            .await;

        if let (Err(e), Termination::Exited(_)) = (delivered, termination) {
            return Err(EngineError::Delivery(e));
        }

        Ok(classify(
            language_key,
            termination,
            &streams,
            self.settings.deadline,
        ))
    }

    /// Finalizes the instance within a single grace period
    ///
    /// Termination (when `kill` is set), teardown, the output drain and the input
    /// delivery all run side by side against the same settle deadline.
    async fn settle(
        &self,
        child: &mut Child,
        instance: &InstanceId,
        aggregator: StreamAggregator,
        delivery: JoinHandle<std::io::Result<()>>,
        kill: bool,
    ) -> (CapturedStreams, Result<(), String>) {
        let settle_by = Instant::now() + self.settings.grace_period;

        let instance_done = async {
            if kill {
                self.terminate(child, instance, settle_by).await;
            } else {
                self.teardown(instance, settle_by).await;
            }
        };

        let ((), streams, delivered) = tokio::join!(
            instance_done,
            aggregator.finish(settle_by),
            self.finish_delivery(delivery, instance, settle_by),
        );
        (streams, delivered)
    }

    /// Issues both termination requests for an instance, then tears it down
    ///
    /// The kill through the local handle and the kill addressed to the instance name are
    /// independent: the second one still reaches the instance when the handle is stuck.
    /// Nothing here outlives `settle_by`.
    async fn terminate(&self, child: &mut Child, instance: &InstanceId, settle_by: Instant) {
        match child.start_kill() {
            Ok(()) => log::info!("Sent kill to the process handle of instance {instance}"),
            Err(e) => log::warn!("Kill through the process handle of instance {instance} failed: {e}"),
        }

        let by_name = async {
            match timeout_at(settle_by, self.layer.kill_instance(instance)).await {
                Ok(Ok(())) => log::info!(
                    "Killed instance {instance} by name through the {} layer",
                    self.layer.name()
                ),
                Ok(Err(e)) => log::warn!("Kill of instance {instance} by name failed: {e:#}"),
                Err(_) => log::warn!("Kill of instance {instance} by name did not confirm in time"),
            }
            self.teardown(instance, settle_by).await;
        };
        let reaped = async {
            if timeout_at(settle_by, child.wait()).await.is_err() {
                log::warn!("Process handle of instance {instance} still alive after the grace period");
            }
        };

        tokio::join!(by_name, reaped);
    }

    /// Best-effort removal of the instance; failures are logged and swallowed
    async fn teardown(&self, instance: &InstanceId, settle_by: Instant) {
        match timeout_at(settle_by, self.layer.release(instance)).await {
            Ok(Ok(())) => log::debug!("Instance {instance} released"),
            Ok(Err(e)) => log::warn!("Cleanup of instance {instance} failed: {e:#}"),
            Err(_) => log::warn!("Cleanup of instance {instance} did not confirm in time"),
        }
    }

    async fn finish_delivery(
        &self,
        mut delivery: JoinHandle<std::io::Result<()>>,
        instance: &InstanceId,
        settle_by: Instant,
    ) -> Result<(), String> {
        match timeout_at(settle_by, &mut delivery).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => {
                log::error!("Failed to deliver code to instance {instance}: {e}");
                Err(e.to_string())
            }
            Ok(Err(e)) => {
                log::error!("Delivery task of instance {instance} failed: {e}");
                Err(e.to_string())
            }
            Err(_) => {
                delivery.abort();
                log::error!("Instance {instance} did not accept its input in time");
                Err("input was not accepted before the instance stopped".to_string())
            }
        }
    }
}

/// Writes the code to the instance and closes its stdin
///
/// A program that exits without reading all of its input closes the pipe; that is
/// its own business and not a delivery failure.
async fn deliver_code(mut stdin: ChildStdin, code: String) -> std::io::Result<()> {
    let written = async {
        stdin.write_all(code.as_bytes()).await?;
        stdin.flush().await?;
        stdin.shutdown().await
    }
    .await;
    drop(stdin);

    match written {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => {
            log::debug!("Instance closed its input early: {e}");
            Ok(())
        }
        other => other,
    }
}

/// Exit code of the process, or 128 + signal when it was killed by one
fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}
