//! Shared fakes and fixtures

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use deployd::deploy::orchestrator::{Collaborators, Orchestrator, OrchestratorOptions};
use deployd::deploy::ports::{PortProbe, PortRange};
use deployd::deploy::reconciler::ReconcilerSettings;
use deployd::deploy::registry::DeploymentRegistry;
use deployd::deploy::spawner::{ProcessSupervisor, SpawnRequest};
use deployd::errors::OrchestratorError;
use deployd::filesys::dir::Dir;
use deployd::models::deployment::ProcessHandle;
use deployd::stores::accounts::{AccountStore, OpenAccounts};
use deployd::stores::configs::{ConfigStore, RunnerConfig};

pub const BASE_PORT: u16 = 8502;
pub const PUBLIC_HOST: &str = "chat.test";

// ============================== SUPERVISOR ================================== //

/// In-memory process table
pub struct FakeSupervisor {
    next_pid: AtomicU32,
    alive: Mutex<HashSet<u32>>,
    fail_spawns: AtomicBool,
    spawned: Mutex<Vec<SpawnRequest>>,
    terminated: Mutex<Vec<u32>>,
    terminate_delay: Mutex<Duration>,
    spawn_delay: Mutex<Duration>,
}

impl FakeSupervisor {
    pub fn new() -> Self {
        Self {
            next_pid: AtomicU32::new(1000),
            alive: Mutex::new(HashSet::new()),
            fail_spawns: AtomicBool::new(false),
            spawned: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
            terminate_delay: Mutex::new(Duration::ZERO),
            spawn_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Kill a process behind the orchestrator's back
    pub fn kill(&self, pid: u32) {
        self.alive.lock().unwrap().remove(&pid);
    }

    pub fn set_fail_spawns(&self, fail: bool) {
        self.fail_spawns.store(fail, Ordering::SeqCst);
    }

    /// Make every termination take this long, like a runner ignoring SIGTERM
    pub fn set_terminate_delay(&self, delay: Duration) {
        *self.terminate_delay.lock().unwrap() = delay;
    }

    /// Make every spawn take this long before the OS confirms it
    pub fn set_spawn_delay(&self, delay: Duration) {
        *self.spawn_delay.lock().unwrap() = delay;
    }

    pub fn is_running(&self, pid: u32) -> bool {
        self.alive.lock().unwrap().contains(&pid)
    }

    pub fn spawn_count(&self) -> usize {
        self.spawned.lock().unwrap().len()
    }

    pub fn spawned(&self) -> Vec<SpawnRequest> {
        self.spawned.lock().unwrap().clone()
    }

    pub fn terminated(&self) -> Vec<u32> {
        self.terminated.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessSupervisor for FakeSupervisor {
    async fn spawn(&self, request: &SpawnRequest) -> Result<ProcessHandle, OrchestratorError> {
        // let concurrent publishers interleave
        tokio::task::yield_now().await;
        let delay = *self.spawn_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if self.fail_spawns.load(Ordering::SeqCst) {
            return Err(OrchestratorError::SpawnError(
                "exec format error".to_string(),
            ));
        }

        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.alive.lock().unwrap().insert(pid);
        self.spawned.lock().unwrap().push(request.clone());
        Ok(ProcessHandle::new(pid, Some(1_700_000_000)))
    }

    async fn is_alive(&self, handle: &ProcessHandle) -> bool {
        self.is_running(handle.pid)
    }

    async fn terminate(&self, handle: &ProcessHandle) -> Result<(), OrchestratorError> {
        let delay = *self.terminate_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.alive.lock().unwrap().remove(&handle.pid);
        self.terminated.lock().unwrap().push(handle.pid);
        Ok(())
    }
}

// ================================= PROBE ===================================== //

/// Ports are bindable unless marked busy, and listening unless marked silent
#[derive(Default)]
pub struct FakeProbe {
    busy: Mutex<HashSet<u16>>,
    silent: Mutex<HashSet<u16>>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_busy(&self, port: u16) {
        self.busy.lock().unwrap().insert(port);
    }

    pub fn set_silent(&self, port: u16) {
        self.silent.lock().unwrap().insert(port);
    }
}

#[async_trait]
impl PortProbe for FakeProbe {
    fn is_bindable(&self, port: u16) -> bool {
        !self.busy.lock().unwrap().contains(&port)
    }

    async fn is_listening(&self, port: u16) -> bool {
        !self.silent.lock().unwrap().contains(&port)
    }
}

// ================================ CONFIGS ==================================== //

/// Every configuration exists except the listed ones
#[derive(Default)]
pub struct FakeConfigs {
    missing: Mutex<HashSet<String>>,
}

impl FakeConfigs {
    pub fn without(missing: &[&str]) -> Self {
        Self {
            missing: Mutex::new(missing.iter().map(|s| s.to_string()).collect()),
        }
    }

    /// Delete a saved configuration
    pub fn remove(&self, config_ref: &str) {
        self.missing.lock().unwrap().insert(config_ref.to_string());
    }
}

#[async_trait]
impl ConfigStore for FakeConfigs {
    async fn load(&self, config_ref: &str) -> Result<Option<RunnerConfig>, OrchestratorError> {
        if self.missing.lock().unwrap().contains(config_ref) {
            return Ok(None);
        }
        Ok(Some(RunnerConfig {
            title: Some(format!("{} bot", config_ref)),
            extra: serde_json::Map::new(),
        }))
    }
}

// ================================ HARNESS ==================================== //

pub fn options(port_count: u16) -> OrchestratorOptions {
    OrchestratorOptions {
        port_range: PortRange::new(BASE_PORT, port_count).unwrap(),
        public_host: PUBLIC_HOST.to_string(),
        reconciler: ReconcilerSettings {
            startup_grace: Duration::from_secs(15),
            require_listening: true,
        },
        freshness: Duration::ZERO,
    }
}

/// Orchestrator over a temporary registry and fake collaborators
pub struct Harness {
    pub dir: Dir,
    pub supervisor: Arc<FakeSupervisor>,
    pub probe: Arc<FakeProbe>,
    pub configs: Arc<FakeConfigs>,
    pub accounts: Arc<dyn AccountStore>,
    pub options: OrchestratorOptions,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub async fn new(port_count: u16) -> Self {
        Self::build(
            options(port_count),
            Arc::new(FakeProbe::new()),
            Arc::new(FakeConfigs::default()),
            Arc::new(OpenAccounts),
        )
        .await
    }

    pub async fn build(
        options: OrchestratorOptions,
        probe: Arc<FakeProbe>,
        configs: Arc<FakeConfigs>,
        accounts: Arc<dyn AccountStore>,
    ) -> Self {
        let dir = Dir::create_temp_dir("deployd-test").await.unwrap();
        let supervisor = Arc::new(FakeSupervisor::new());
        let orchestrator = start(&dir, &supervisor, &probe, &configs, &accounts, &options).await;

        Self {
            dir,
            supervisor,
            probe,
            configs,
            accounts,
            options,
            orchestrator,
        }
    }

    /// Simulate an orchestrator restart over the same registry directory.
    /// Processes in the fake supervisor survive, like detached children.
    pub async fn restart(self) -> Self {
        let Harness {
            dir,
            supervisor,
            probe,
            configs,
            accounts,
            options,
            orchestrator,
        } = self;
        drop(orchestrator);

        let orchestrator = start(&dir, &supervisor, &probe, &configs, &accounts, &options).await;
        Self {
            dir,
            supervisor,
            probe,
            configs,
            accounts,
            options,
            orchestrator,
        }
    }

    pub async fn cleanup(self) {
        self.dir.delete().await.unwrap();
    }
}

async fn start(
    dir: &Dir,
    supervisor: &Arc<FakeSupervisor>,
    probe: &Arc<FakeProbe>,
    configs: &Arc<FakeConfigs>,
    accounts: &Arc<dyn AccountStore>,
    options: &OrchestratorOptions,
) -> Arc<Orchestrator> {
    let registry = Arc::new(DeploymentRegistry::open(dir.clone()).await.unwrap());
    let collaborators = Collaborators {
        supervisor: supervisor.clone(),
        probe: probe.clone(),
        configs: configs.clone(),
        accounts: accounts.clone(),
    };
    Arc::new(Orchestrator::init(registry, collaborators, options.clone()).await)
}
