use std::collections::HashMap;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::{Child, Command};

use crate::registry::ExecutionProfile;

use super::runner::spawn_piped;
use super::{InstanceId, IsolationLayer};

const LOCAL_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// A layer that runs the entry command directly on the host
///
/// LocalLayer provides no network, memory, CPU or filesystem isolation. Each instance
/// is started as the leader of a new process group so that the identifier-based kill
/// and the teardown can reach every process the user code forked. This is intended for
/// development and testing environments where security isolation is not critical.
///
/// A group id outlives its leader only while some member is alive. Once the group is
/// empty the kernel may hand the id to a new process, so a recorded id is dropped when
/// a newer instance receives it, and never signalled when it leads another session.
pub struct LocalLayer {
    /// Process group of every live instance, `None` once the id was handed out again
    groups: Mutex<HashMap<InstanceId, Option<i32>>>,
}

#[async_trait]
impl IsolationLayer for LocalLayer {
    fn name(&self) -> &'static str {
        "local"
    }

    fn spawn(&self, profile: &ExecutionProfile, instance: &InstanceId) -> std::io::Result<Child> {
        let Some((program, args)) = profile.entry_command.split_first() else {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("Empty entry command for language {}", profile.language_key),
            ));
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .env_clear()
            .env("PATH", LOCAL_PATH)
            .envs(&profile.env)
            .current_dir(std::env::temp_dir())
            .process_group(0);

        let child = spawn_piped(command)?;
        if let Some(pid) = child.id() {
            self.register(instance, pid as i32);
        }
        log::debug!("Started local instance {instance} (pid {:?})", child.id());

        Ok(child)
    }

    async fn kill_instance(&self, instance: &InstanceId) -> Result<()> {
        let group = self
            .groups
            .lock()
            .get(instance)
            .copied()
            .ok_or_else(|| anyhow!("Unknown local instance {instance}"))?;
        match group {
            Some(pgid) => signal_group(pgid, libc::SIGKILL),
            None => Ok(()),
        }
    }

    async fn release(&self, instance: &InstanceId) -> Result<()> {
        // Also reaps background processes the user code left behind
        match self.groups.lock().remove(instance).flatten() {
            Some(pgid) => signal_group(pgid, libc::SIGKILL),
            None => Ok(()),
        }
    }
}

impl LocalLayer {
    pub fn build() -> Self {
        log::warn!("LocalLayer provides NO security isolation - use only in trusted environments");
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Number of instances spawned and not yet released
    pub fn live_instances(&self) -> usize {
        self.groups.lock().len()
    }

    fn register(&self, instance: &InstanceId, pgid: i32) {
        let mut groups = self.groups.lock();
        for (other, group) in groups.iter_mut() {
            if *group == Some(pgid) {
                log::debug!("Group {pgid} of instance {other} is gone, its id was reused");
                *group = None;
            }
        }
        groups.insert(instance.clone(), Some(pgid));
    }
}

/// Sends `signal` to every process in the group; an empty group counts as success
fn signal_group(pgid: i32, signal: i32) -> Result<()> {
    // kill(-1) would reach every process we may signal
    if pgid <= 1 {
        bail!("Refusing to signal process group {pgid}");
    }
    if !in_our_session(pgid) {
        bail!("Process group {pgid} belongs to another session");
    }

    // SAFETY: kill(2) takes plain integers and has no memory-safety preconditions.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        return Ok(());
    }

    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(())
    } else {
        Err(anyhow!("Failed to signal process group {pgid}: {err}"))
    }
}

/// Whether the process with id `pgid`, if any, shares our session
///
/// An id nobody holds any more passes, since orphaned members of the group may
/// still need the signal.
fn in_our_session(pgid: i32) -> bool {
    // SAFETY: getsid(2) takes a plain pid and has no memory-safety preconditions.
    let (theirs, ours) = unsafe { (libc::getsid(pgid), libc::getsid(0)) };
    theirs == -1 || theirs == ours
}
