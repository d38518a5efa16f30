//! Fleet supervisor
//! Owns one controller per service name, diffs declarative catalogs against
//! the live fleet and drives the periodic reconciliation tick

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::ports::{
    ConfigClient, EventSink, PerfReporter, ProcessExecutor, ProcessQuery, ServiceDeployment,
    Tracer,
};
use crate::domain::services::{ServiceController, StopTuning, WatchTuning};
use crate::domain::value_objects::{ControllerSnapshot, IdAllocator};
use crate::domain::Result;

/// Fleet-level owner of all per-service controllers on a node.
///
/// The supervisor is the composition root: the process ports and telemetry
/// sinks injected here are shared by every controller it creates.
pub struct Supervisor {
    executor: Arc<dyn ProcessExecutor>,
    query: Arc<dyn ProcessQuery>,
    events: Arc<dyn EventSink>,
    tracer: Option<Arc<dyn Tracer>>,
    perf: Option<Arc<dyn PerfReporter>>,
    ids: IdAllocator,
    start_wait: Option<Duration>,
    stop_tuning: Option<StopTuning>,
    watch_tuning: Option<WatchTuning>,
    controllers: Mutex<HashMap<String, Arc<ServiceController>>>,
    pending_adoptions: Mutex<HashMap<String, ControllerSnapshot>>,
}

impl Supervisor {
    pub fn new(
        executor: Arc<dyn ProcessExecutor>,
        query: Arc<dyn ProcessQuery>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            executor,
            query,
            events,
            tracer: None,
            perf: None,
            ids: IdAllocator::new(),
            start_wait: None,
            stop_tuning: None,
            watch_tuning: None,
            controllers: Mutex::new(HashMap::new()),
            pending_adoptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    pub fn with_perf_reporter(mut self, perf: Arc<dyn PerfReporter>) -> Self {
        self.perf = Some(perf);
        self
    }

    /// Tuning applied to every controller created from here on
    pub fn with_start_wait(mut self, start_wait: Duration) -> Self {
        self.start_wait = Some(start_wait);
        self
    }

    pub fn with_stop_tuning(mut self, tuning: StopTuning) -> Self {
        self.stop_tuning = Some(tuning);
        self
    }

    pub fn with_watch_tuning(mut self, tuning: WatchTuning) -> Self {
        self.watch_tuning = Some(tuning);
        self
    }

    pub async fn len(&self) -> usize {
        self.controllers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.controllers.lock().await.is_empty()
    }

    pub async fn names(&self) -> Vec<String> {
        self.controllers.lock().await.keys().cloned().collect()
    }

    pub async fn controller(&self, name: &str) -> Option<Arc<ServiceController>> {
        self.controllers.lock().await.get(name).cloned()
    }

    /// Diff a target catalog against the live fleet: create controllers for
    /// new names, stop and drop removed ones, push changed revisions.
    pub async fn apply(&self, deployments: Vec<ServiceDeployment>) {
        let mut controllers = self.controllers.lock().await;

        let target: Vec<&str> = deployments.iter().map(|d| d.info.name.as_str()).collect();
        let removed: Vec<String> = controllers
            .keys()
            .filter(|name| !target.contains(&name.as_str()))
            .cloned()
            .collect();
        for name in removed {
            if let Some(controller) = controllers.remove(&name) {
                info!(service = %name, "service removed from catalog");
                controller.stop("removed").await;
            }
        }

        for deployment in deployments {
            let name = deployment.info.name.clone();
            if name.trim().is_empty() {
                warn!("skipping catalog entry without a name");
                continue;
            }
            match controllers.get(&name).cloned() {
                Some(existing) => {
                    let unchanged = match existing.info().await {
                        Some(current) => {
                            *current == *deployment.info
                                && existing.deploy_info().await == deployment.deploy
                        }
                        None => false,
                    };
                    if unchanged {
                        debug!(service = %name, "catalog entry unchanged");
                        continue;
                    }
                    info!(service = %name, "service revision updated");
                    existing
                        .set_info(deployment.info.clone(), deployment.deploy.clone())
                        .await;
                    existing.check().await;
                }
                None => {
                    info!(service = %name, "service added to catalog");
                    let controller = Arc::new(self.build_controller(&name));
                    if let Some(snapshot) = self.pending_adoptions.lock().await.remove(&name) {
                        controller.restore(&snapshot).await;
                    }
                    controller
                        .set_info(deployment.info.clone(), deployment.deploy.clone())
                        .await;
                    controller.check().await;
                    controllers.insert(name, controller);
                }
            }
        }
    }

    fn build_controller(&self, name: &str) -> ServiceController {
        let mut controller = ServiceController::new(
            self.ids.allocate(),
            name,
            self.executor.clone(),
            self.query.clone(),
            self.events.clone(),
        );
        if let Some(tracer) = &self.tracer {
            controller = controller.with_tracer(tracer.clone());
        }
        if let Some(perf) = &self.perf {
            controller = controller.with_perf_reporter(perf.clone());
        }
        if let Some(start_wait) = self.start_wait {
            controller = controller.with_start_wait(start_wait);
        }
        if let Some(tuning) = &self.stop_tuning {
            controller = controller.with_stop_tuning(tuning.clone());
        }
        if let Some(tuning) = &self.watch_tuning {
            controller = controller.with_watch_tuning(tuning.clone());
        }
        controller
    }

    /// Pull the catalog once and apply it
    pub async fn sync_once(&self, client: &dyn ConfigClient) -> Result<()> {
        let deployments = client.pull().await?;
        debug!(services = deployments.len(), "catalog pulled");
        self.apply(deployments).await;
        Ok(())
    }

    /// One reconciliation pass over the fleet. Every controller runs in its
    /// own task so one slow stop cannot starve the others.
    pub async fn check_all(&self) {
        let controllers: Vec<Arc<ServiceController>> =
            self.controllers.lock().await.values().cloned().collect();
        let tasks: Vec<_> = controllers
            .into_iter()
            .map(|controller| {
                tokio::spawn(async move {
                    controller.check().await;
                })
            })
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "controller check task failed");
            }
        }
    }

    /// Drive the reconciliation tick until cancelled
    pub async fn run(&self, period: Duration, token: CancellationToken) {
        info!(period_ms = period.as_millis() as u64, "supervisor tick started");
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("supervisor tick cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    self.check_all().await;
                }
            }
        }
    }

    /// Stop every controller; used on orderly shutdown when children should
    /// not outlive the supervisor
    pub async fn shutdown(&self) {
        let controllers: Vec<Arc<ServiceController>> =
            self.controllers.lock().await.values().cloned().collect();
        for controller in controllers {
            controller.stop("shutdown").await;
        }
    }

    /// Adoption tuples for persistence across supervisor restarts
    pub async fn snapshot(&self) -> Vec<ControllerSnapshot> {
        let controllers: Vec<Arc<ServiceController>> =
            self.controllers.lock().await.values().cloned().collect();
        let mut snapshots = Vec::with_capacity(controllers.len());
        for controller in controllers {
            snapshots.push(controller.snapshot().await);
        }
        snapshots
    }

    /// Seed adoption tuples loaded from a previous run; they are handed to
    /// controllers as their names appear in the catalog
    pub async fn restore(&self, snapshots: Vec<ControllerSnapshot>) {
        let mut pending = self.pending_adoptions.lock().await;
        for snapshot in snapshots {
            pending.insert(snapshot.name.clone(), snapshot);
        }
    }
}
