//! Runner process spawning and supervision

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, Signal, System};
use tokio::process::{Child, Command};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::errors::OrchestratorError;
use crate::filesys::dir::Dir;
use crate::models::deployment::ProcessHandle;

/// What to launch for one deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub deployment_id: String,
    pub config_ref: String,
    pub port: u16,
}

/// Launches, observes and terminates runner processes.
///
/// The registry stores the returned handles; only the supervisor acts on them.
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Start a detached runner. Returns once the OS has created the process.
    async fn spawn(&self, request: &SpawnRequest) -> Result<ProcessHandle, OrchestratorError>;

    /// Whether the handle still identifies a live process
    async fn is_alive(&self, handle: &ProcessHandle) -> bool;

    /// Graceful-then-forceful shutdown. Succeeds if the process is already gone.
    async fn terminate(&self, handle: &ProcessHandle) -> Result<(), OrchestratorError>;
}

/// Command line used to start a runner.
///
/// `{config_ref}`, `{port}` and `{deployment_id}` are substituted in `args`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerTemplate {
    /// Executable to run
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments, with placeholders
    #[serde(default = "default_args")]
    pub args: Vec<String>,

    /// Working directory of the runner
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,
}

fn default_program() -> String {
    "streamlit".to_string()
}

fn default_args() -> Vec<String> {
    [
        "run",
        "runner.py",
        "--server.port",
        "{port}",
        "--server.headless",
        "true",
        "--",
        "{config_ref}",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for RunnerTemplate {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
            working_dir: None,
            env: HashMap::new(),
        }
    }
}

impl RunnerTemplate {
    /// Render the argument list for a request
    pub fn render_args(&self, request: &SpawnRequest) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{config_ref}", &request.config_ref)
                    .replace("{port}", &request.port.to_string())
                    .replace("{deployment_id}", &request.deployment_id)
            })
            .collect()
    }
}

/// Supervisor for real OS processes
pub struct OsSupervisor {
    runner: RunnerTemplate,
    log_dir: Option<Dir>,
    term_grace: Duration,
    poll_interval: Duration,
    // children spawned by this orchestrator process, kept so they get reaped
    children: Mutex<HashMap<u32, Child>>,
    system: Mutex<System>,
}

impl OsSupervisor {
    pub fn new(runner: RunnerTemplate, log_dir: Option<Dir>, term_grace: Duration) -> Self {
        Self {
            runner,
            log_dir,
            term_grace,
            poll_interval: Duration::from_millis(100),
            children: Mutex::new(HashMap::new()),
            system: Mutex::new(System::new()),
        }
    }

    async fn output_stdio(&self, deployment_id: &str) -> Result<(Stdio, Stdio), OrchestratorError> {
        let Some(log_dir) = &self.log_dir else {
            return Ok((Stdio::null(), Stdio::null()));
        };

        log_dir.create().await?;
        let path = log_dir.path().join(format!("{}.log", deployment_id));
        let stdout = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        let stderr = stdout.try_clone()?;
        Ok((Stdio::from(stdout), Stdio::from(stderr)))
    }

    /// Inspect the process table for `handle`
    fn os_process_matches(&self, handle: &ProcessHandle) -> bool {
        let pid = Pid::from_u32(handle.pid);
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);

        let Some(process) = system.process(pid) else {
            return false;
        };
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return false;
        }
        match handle.os_started_at {
            Some(started_at) => process.start_time() == started_at,
            None => true,
        }
    }

    fn os_start_time(&self, pid: u32) -> Option<u64> {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        system.process(pid).map(|p| p.start_time())
    }

    /// Poll an owned child. `None` when the pid is not ours.
    fn poll_owned_child(&self, pid: u32) -> Option<bool> {
        let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
        let child = children.get_mut(&pid)?;
        match child.try_wait() {
            Ok(None) => Some(true),
            Ok(Some(status)) => {
                debug!("Runner process {} exited with {}", pid, status);
                children.remove(&pid);
                Some(false)
            }
            Err(e) => {
                warn!("Failed to poll runner process {}: {}", pid, e);
                children.remove(&pid);
                None
            }
        }
    }

    fn send_signal(&self, handle: &ProcessHandle, force: bool) {
        {
            let mut children = self.children.lock().unwrap_or_else(|e| e.into_inner());
            if force {
                if let Some(child) = children.get_mut(&handle.pid) {
                    if let Err(e) = child.start_kill() {
                        debug!("start_kill on {} failed: {}", handle.pid, e);
                    }
                    return;
                }
            }
        }

        let pid = Pid::from_u32(handle.pid);
        let mut system = self.system.lock().unwrap_or_else(|e| e.into_inner());
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let Some(process) = system.process(pid) else {
            return;
        };

        let delivered = if force {
            process.kill()
        } else {
            process.kill_with(Signal::Term).unwrap_or_else(|| process.kill())
        };
        if !delivered {
            debug!("Signal to process {} was not delivered", handle.pid);
        }
    }

    async fn wait_for_exit(&self, handle: &ProcessHandle, within: Duration) -> bool {
        let deadline = Instant::now() + within;
        loop {
            if !self.is_alive(handle).await {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[async_trait]
impl ProcessSupervisor for OsSupervisor {
    async fn spawn(&self, request: &SpawnRequest) -> Result<ProcessHandle, OrchestratorError> {
        let args = self.runner.render_args(request);
        let (stdout, stderr) = self
            .output_stdio(&request.deployment_id)
            .await
            .map_err(|e| OrchestratorError::SpawnError(format!("cannot open runner log: {}", e)))?;

        let mut command = Command::new(&self.runner.program);
        command
            .args(&args)
            .envs(&self.runner.env)
            .env("DEPLOY_ID", &request.deployment_id)
            .env("DEPLOY_CONFIG_REF", &request.config_ref)
            .env("DEPLOY_PORT", request.port.to_string())
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .kill_on_drop(false);
        if let Some(dir) = &self.runner.working_dir {
            command.current_dir(dir);
        }
        // own process group so terminal signals to the orchestrator skip the runner
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|e| {
            OrchestratorError::SpawnError(format!("failed to start {}: {}", self.runner.program, e))
        })?;
        let pid = child.id().ok_or_else(|| {
            OrchestratorError::SpawnError("runner exited before its pid was read".to_string())
        })?;

        let handle = ProcessHandle::new(pid, self.os_start_time(pid));
        self.children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(pid, child);

        info!(
            "Spawned runner pid {} for deployment {} on port {}",
            pid, request.deployment_id, request.port
        );
        Ok(handle)
    }

    async fn is_alive(&self, handle: &ProcessHandle) -> bool {
        match self.poll_owned_child(handle.pid) {
            Some(alive) => alive,
            None => self.os_process_matches(handle),
        }
    }

    async fn terminate(&self, handle: &ProcessHandle) -> Result<(), OrchestratorError> {
        if !self.is_alive(handle).await {
            debug!("Process {} already gone", handle.pid);
            return Ok(());
        }

        self.send_signal(handle, false);
        if self.wait_for_exit(handle, self.term_grace).await {
            info!("Process {} exited after SIGTERM", handle.pid);
            return Ok(());
        }

        warn!(
            "Process {} still alive after {:?}, killing",
            handle.pid, self.term_grace
        );
        self.send_signal(handle, true);
        if !self.wait_for_exit(handle, Duration::from_secs(1)).await {
            return Err(OrchestratorError::Internal(format!(
                "process {} survived SIGKILL",
                handle.pid
            )));
        }
        Ok(())
    }
}
