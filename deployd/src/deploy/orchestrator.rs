//! Deployment lifecycle: publish, stop, restart, delete and listing
//!
//! Lock order is always publish lock (owner + config) before record lock
//! (deployment id). Every operation touching a record holds its record lock,
//! so no record is mutated by two operations at once.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::deploy::fsm::{transition, DeploymentEvent, DeploymentState};
use crate::deploy::locks::KeyedLocks;
use crate::deploy::ports::{PortAllocator, PortProbe, PortRange};
use crate::deploy::reconciler::{Observation, Reconciler, ReconcilerSettings};
use crate::deploy::registry::DeploymentRegistry;
use crate::deploy::spawner::{ProcessSupervisor, SpawnRequest};
use crate::errors::OrchestratorError;
use crate::models::deployment::{Deployment, DeploymentPatch, DeploymentView};
use crate::stores::accounts::AccountStore;
use crate::stores::configs::ConfigStore;
use crate::stores::validate_identifier;
use crate::utils::generate_uuid;

const STALLED_REASON: &str = "The chatbot did not start listening in time.";
const LOST_REASON: &str = "The chatbot process stopped unexpectedly.";

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Ports handed to deployments
    pub port_range: PortRange,

    /// Host used in open URLs
    pub public_host: String,

    /// Liveness policy
    pub reconciler: ReconcilerSettings,

    /// Listing reuses the last sweep if it is younger than this
    pub freshness: Duration,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            port_range: PortRange {
                base: 8502,
                count: 100,
            },
            public_host: "127.0.0.1".to_string(),
            reconciler: ReconcilerSettings::default(),
            freshness: Duration::from_secs(2),
        }
    }
}

/// External parts the orchestrator drives
pub struct Collaborators {
    pub supervisor: Arc<dyn ProcessSupervisor>,
    pub probe: Arc<dyn PortProbe>,
    pub configs: Arc<dyn ConfigStore>,
    pub accounts: Arc<dyn AccountStore>,
}

/// Summary of a reconciliation sweep
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub confirmed: usize,
    pub starting: usize,
    pub crashed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Skipped,
    Healthy,
    Starting,
    Crashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    /// Record created by this publish call
    Fresh,
    /// Stopped or crashed record published again
    Reused,
}

/// Owns the registry, the port pool and the process supervisor
pub struct Orchestrator {
    registry: Arc<DeploymentRegistry>,
    ports: PortAllocator,
    supervisor: Arc<dyn ProcessSupervisor>,
    reconciler: Reconciler,
    configs: Arc<dyn ConfigStore>,
    accounts: Arc<dyn AccountStore>,
    publish_locks: KeyedLocks<(String, String)>,
    record_locks: KeyedLocks<String>,
    options: OrchestratorOptions,
    last_sweep: Mutex<Option<Instant>>,
}

impl Orchestrator {
    /// Build the orchestrator on top of a loaded registry, re-reserve the
    /// ports of active records and reconcile them against the OS.
    pub async fn init(
        registry: Arc<DeploymentRegistry>,
        collaborators: Collaborators,
        options: OrchestratorOptions,
    ) -> Self {
        let ports = PortAllocator::new(options.port_range, collaborators.probe.clone());
        let reconciler = Reconciler::new(
            collaborators.supervisor.clone(),
            collaborators.probe,
            options.reconciler.clone(),
        );

        let orchestrator = Self {
            registry,
            ports,
            supervisor: collaborators.supervisor,
            reconciler,
            configs: collaborators.configs,
            accounts: collaborators.accounts,
            publish_locks: KeyedLocks::new(),
            record_locks: KeyedLocks::new(),
            options,
            last_sweep: Mutex::new(None),
        };

        orchestrator.restore_ports().await;
        let report = orchestrator.reconcile_all().await;
        info!("Startup reconciliation finished: {:?}", report);

        orchestrator
    }

    async fn restore_ports(&self) {
        for record in self.registry.list_active().await {
            match record.port {
                Some(port) => {
                    if !self.ports.range().contains(port) {
                        warn!(
                            "Deployment {} holds port {} outside the configured range",
                            record.id, port
                        );
                    }
                    if !self.ports.reserve(port) {
                        warn!(
                            "Deployment {} shares port {} with another active record",
                            record.id, port
                        );
                    }
                }
                None => warn!("Active deployment {} has no port", record.id),
            }
        }
    }

    pub fn registry(&self) -> &DeploymentRegistry {
        &self.registry
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Read model for a record
    pub fn view(&self, deployment: &Deployment) -> DeploymentView {
        deployment.view(&self.options.public_host)
    }

    // ================================ PUBLISH ==================================== //

    /// Publish `config_ref` for `owner_id`.
    ///
    /// Idempotent per owner + config: an active deployment is returned as is,
    /// and an inactive one is reused with a freshly allocated port.
    pub async fn publish(
        &self,
        owner_id: &str,
        config_ref: &str,
    ) -> Result<Deployment, OrchestratorError> {
        validate_identifier("owner_id", owner_id)?;
        validate_identifier("config_ref", config_ref)?;

        let pair = (owner_id.to_string(), config_ref.to_string());
        let _publish_guard = self.publish_locks.lock(&pair).await;

        // an active deployment is returned even if its sources have since gone
        if let Some(existing) = self.registry.find_for_config(owner_id, config_ref).await {
            let _record_guard = self.record_locks.lock(&existing.id).await;
            if let Some(current) = self.registry.get(&existing.id).await {
                if current.state.is_active() {
                    info!(
                        "Deployment {} already published for {}/{}",
                        current.id, owner_id, config_ref
                    );
                    return Ok(current);
                }
                self.check_sources(owner_id, config_ref).await?;
                return self.republish(current).await;
            }
            debug!("Deployment {} vanished before republish", existing.id);
        }

        self.check_sources(owner_id, config_ref).await?;

        let id = generate_uuid();
        let _record_guard = self.record_locks.lock(&id).await;

        let port = self.allocate_port().await?;
        let record = Deployment::new(id, owner_id, config_ref, port);
        let record = match self.registry.create(record).await {
            Ok(record) => record,
            Err(e) => {
                self.ports.release(port);
                return Err(e);
            }
        };

        info!(
            "Publishing {}/{} as deployment {} on port {}",
            owner_id, config_ref, record.id, port
        );
        self.spawn_into(record, Origin::Fresh).await
    }

    /// The owner must exist and the configuration must be saved
    async fn check_sources(
        &self,
        owner_id: &str,
        config_ref: &str,
    ) -> Result<(), OrchestratorError> {
        if !self.accounts.owner_exists(owner_id).await? {
            return Err(OrchestratorError::UnknownOwner(owner_id.to_string()));
        }
        if self.configs.load(config_ref).await?.is_none() {
            return Err(OrchestratorError::ConfigNotFound(config_ref.to_string()));
        }
        Ok(())
    }

    async fn republish(&self, record: Deployment) -> Result<Deployment, OrchestratorError> {
        let state = advance(record.state, &DeploymentEvent::Republish)?;
        let port = self.allocate_port().await?;

        let record = match self
            .registry
            .update(&record.id, DeploymentPatch::republish(state, port))
            .await
        {
            Ok(record) => record,
            Err(e) => {
                self.ports.release(port);
                return Err(e);
            }
        };

        info!("Republishing deployment {} on port {}", record.id, port);
        self.spawn_into(record, Origin::Reused).await
    }

    async fn allocate_port(&self) -> Result<u16, OrchestratorError> {
        let held = self.registry.active_ports().await;
        self.ports.allocate(&held).map_err(|e| {
            warn!("Port allocation failed: {}", e);
            e
        })
    }

    async fn spawn_into(
        &self,
        record: Deployment,
        origin: Origin,
    ) -> Result<Deployment, OrchestratorError> {
        let port = record.port.ok_or_else(|| {
            OrchestratorError::Internal(format!("pending deployment {} has no port", record.id))
        })?;
        let request = SpawnRequest {
            deployment_id: record.id.clone(),
            config_ref: record.config_ref.clone(),
            port,
        };

        let handle = match self.supervisor.spawn(&request).await {
            Ok(handle) => handle,
            Err(e) => {
                error!("Failed to spawn runner for deployment {}: {}", record.id, e);
                self.abandon(&record, origin, &e).await;
                return Err(e);
            }
        };

        let state = advance(record.state, &DeploymentEvent::Spawned)?;
        match self
            .registry
            .update(&record.id, DeploymentPatch::running(state, handle.clone()))
            .await
        {
            Ok(updated) => {
                info!(
                    "Deployment {} running with pid {} on port {}",
                    updated.id, handle.pid, port
                );
                Ok(updated)
            }
            Err(e) => {
                error!(
                    "Failed to record process {} for deployment {}: {}",
                    handle.pid, record.id, e
                );
                if let Err(term_err) = self.supervisor.terminate(&handle).await {
                    warn!("Failed to terminate unrecorded process {}: {}", handle.pid, term_err);
                }
                self.abandon(&record, origin, &e).await;
                Err(e)
            }
        }
    }

    /// Undo a failed publish: release the port and remove or deactivate the record
    async fn abandon(&self, record: &Deployment, origin: Origin, cause: &OrchestratorError) {
        if let Some(port) = record.port {
            self.ports.release(port);
        }

        let result = match origin {
            Origin::Fresh => self.registry.delete(&record.id).await.map(|_| ()),
            Origin::Reused => {
                let event = DeploymentEvent::SpawnFailed(cause.to_string());
                let state = transition(record.state, &event).unwrap_or(DeploymentState::Crashed);
                self.registry
                    .update(
                        &record.id,
                        DeploymentPatch::deactivate(state, Some(cause.user_message())),
                    )
                    .await
                    .map(|_| ())
            }
        };

        if let Err(e) = result {
            error!("Failed to roll back deployment {}: {}", record.id, e);
        }
    }

    // ============================ STOP / DELETE ================================== //

    /// Stop a deployment. Stopping a stopped deployment is a no-op.
    pub async fn stop(&self, id: &str) -> Result<Deployment, OrchestratorError> {
        let _guard = self.record_locks.lock(&id.to_string()).await;
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        self.stop_locked(record).await
    }

    async fn stop_locked(&self, record: Deployment) -> Result<Deployment, OrchestratorError> {
        if record.state == DeploymentState::Stopped {
            debug!("Deployment {} already stopped", record.id);
            return Ok(record);
        }

        if let Some(handle) = &record.process {
            self.supervisor.terminate(handle).await?;
        }

        let state = advance(record.state, &DeploymentEvent::Stop)?;
        let updated = self
            .registry
            .update(&record.id, DeploymentPatch::deactivate(state, None))
            .await?;
        if let Some(port) = record.port {
            self.ports.release(port);
        }

        info!("Stopped deployment {}", record.id);
        Ok(updated)
    }

    /// Stop then publish again with the same owner and configuration
    pub async fn restart(&self, id: &str) -> Result<Deployment, OrchestratorError> {
        let stopped = self.stop(id).await?;
        info!("Restarting deployment {}", id);
        self.publish(&stopped.owner_id, &stopped.config_ref).await
    }

    /// Stop a deployment and remove its record. Returns the final record.
    pub async fn delete(&self, id: &str) -> Result<Deployment, OrchestratorError> {
        let _guard = self.record_locks.lock(&id.to_string()).await;
        let record = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;

        let stopped = self.stop_locked(record).await?;
        self.registry.delete(id).await?;

        info!("Deleted deployment {}", id);
        Ok(stopped)
    }

    /// Delete every deployment of an owner (account removal cascade)
    pub async fn delete_owner(&self, owner_id: &str) -> Result<usize, OrchestratorError> {
        let mut removed = 0;
        for record in self.registry.list_by_owner(owner_id).await {
            match self.delete(&record.id).await {
                Ok(_) => removed += 1,
                Err(OrchestratorError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }

        info!("Removed {} deployments of owner {}", removed, owner_id);
        Ok(removed)
    }

    /// Stop every active deployment
    ///
    /// Deployments are stopped concurrently so the total wait stays within
    /// one termination grace period.
    pub async fn stop_all(&self) -> usize {
        let active = self.registry.list_active().await;
        let results = join_all(active.iter().map(|record| self.stop(&record.id))).await;

        let mut stopped = 0;
        for (record, result) in active.iter().zip(results) {
            match result {
                Ok(_) => stopped += 1,
                Err(e) => error!("Failed to stop deployment {}: {}", record.id, e),
            }
        }
        stopped
    }

    // =============================== QUERIES ===================================== //

    /// Raw registry record, read under the record lock so an in-flight
    /// publish is never observed halfway
    pub async fn get(&self, id: &str) -> Result<Deployment, OrchestratorError> {
        let _guard = self.record_locks.lock(&id.to_string()).await;
        self.registry
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))
    }

    /// Reconcile one deployment and return its current record
    pub async fn status(&self, id: &str) -> Result<Deployment, OrchestratorError> {
        if let Err(e) = self.reconcile_one(id).await {
            error!("Reconciliation of deployment {} failed: {}", id, e);
        }
        self.get(id).await
    }

    pub async fn list_for_owner(&self, owner_id: &str) -> Vec<Deployment> {
        self.refresh().await;
        self.registry.list_by_owner(owner_id).await
    }

    pub async fn list_all(&self) -> Vec<Deployment> {
        self.refresh().await;
        self.registry.list_all().await
    }

    async fn refresh(&self) {
        let stale = {
            let last_sweep = self.last_sweep.lock().unwrap_or_else(|e| e.into_inner());
            match *last_sweep {
                Some(at) => at.elapsed() >= self.options.freshness,
                None => true,
            }
        };
        if stale {
            self.reconcile_all().await;
        }
    }

    // ============================ RECONCILIATION ================================= //

    /// Check every active deployment. Entries are checked independently; a
    /// failure on one is logged and does not affect the others.
    pub async fn reconcile_all(&self) -> ReconcileReport {
        let active = self.registry.list_active().await;
        let results = join_all(active.iter().map(|d| self.reconcile_one(&d.id))).await;

        let mut report = ReconcileReport {
            checked: active.len(),
            ..Default::default()
        };
        for (deployment, result) in active.iter().zip(results) {
            match result {
                Ok(Outcome::Healthy) => report.confirmed += 1,
                Ok(Outcome::Starting) => report.starting += 1,
                Ok(Outcome::Crashed) => report.crashed += 1,
                Ok(Outcome::Skipped) => {}
                Err(e) => {
                    error!("Reconciliation of deployment {} failed: {}", deployment.id, e);
                    report.failed += 1;
                }
            }
        }

        *self.last_sweep.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());

        if report.crashed > 0 || report.failed > 0 {
            info!("Reconciliation sweep: {:?}", report);
        } else {
            debug!("Reconciliation sweep: {:?}", report);
        }
        report
    }

    async fn reconcile_one(&self, id: &str) -> Result<Outcome, OrchestratorError> {
        let _guard = self.record_locks.lock(&id.to_string()).await;
        let Some(record) = self.registry.get(id).await else {
            return Ok(Outcome::Skipped);
        };
        if !record.state.is_active() {
            return Ok(Outcome::Skipped);
        }

        match self.reconciler.check(&record).await {
            Ok(Observation::Healthy) => {
                let state = advance(record.state, &DeploymentEvent::Confirmed)?;
                self.registry
                    .update(id, DeploymentPatch::checked(Some(state)))
                    .await?;
                if state != record.state {
                    info!("Deployment {} confirmed {}", id, state);
                }
                Ok(Outcome::Healthy)
            }
            Ok(Observation::Starting) => {
                self.registry.update(id, DeploymentPatch::checked(None)).await?;
                Ok(Outcome::Starting)
            }
            Ok(Observation::Stalled) => {
                warn!(
                    "Deployment {} did not open port {:?} within {:?}, terminating",
                    id, record.port, self.options.reconciler.startup_grace
                );
                if let Some(handle) = &record.process {
                    if let Err(e) = self.supervisor.terminate(handle).await {
                        warn!("Failed to terminate stalled process {}: {}", handle.pid, e);
                    }
                }
                self.mark_crashed(&record, STALLED_REASON).await?;
                Ok(Outcome::Crashed)
            }
            Err(e @ OrchestratorError::ProcessNotFound(_)) => {
                warn!("Deployment {} lost its process: {}", id, e);
                self.mark_crashed(&record, LOST_REASON).await?;
                Ok(Outcome::Crashed)
            }
            Err(e) => Err(e),
        }
    }

    async fn mark_crashed(&self, record: &Deployment, reason: &str) -> Result<(), OrchestratorError> {
        let state = advance(record.state, &DeploymentEvent::ProcessLost(reason.to_string()))?;
        self.registry
            .update(
                &record.id,
                DeploymentPatch::deactivate(state, Some(reason.to_string())),
            )
            .await?;
        if let Some(port) = record.port {
            self.ports.release(port);
        }
        Ok(())
    }
}

fn advance(
    state: DeploymentState,
    event: &DeploymentEvent,
) -> Result<DeploymentState, OrchestratorError> {
    transition(state, event).map_err(OrchestratorError::TransitionError)
}
