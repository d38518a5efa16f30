//! Service controller
//! Per-service state machine: starts or adopts a process, watches it for
//! exit, memory violation and artifact changes, and stops it gracefully

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::controller::{
    DEFAULT_MAX_FAILS, DEFAULT_START_WAIT_MS, STOP_POLL_ATTEMPTS, STOP_POLL_INTERVAL_MS,
};
use crate::constants::events::MEMORY_EXCEEDED_REASON;
use crate::constants::launcher::ZIP_DEPLOY_MARKER;
use crate::constants::watcher::{MONITOR_PERIOD_MS, PENDING_PERIOD_MS, RESTART_DELAY_MS};
use crate::domain::ports::{
    EventSink, ExitWatch, NoopTracer, PerfReporter, ProcessExecutor, ProcessQuery,
    ProcessSnapshot, SpawnConfig, Tracer,
};
use crate::domain::services::{ArchiveDeployer, ArtifactStamps};
use crate::domain::value_objects::{
    AppMetrics, ControllerId, ControllerSnapshot, DeployInfo, RunMode, ServiceInfo,
};
use crate::domain::{DomainError, Result};

/// Event source name reported upstream
const SOURCE: &str = "ServiceController";

/// Termination deadline tuning: each stop phase waits `attempts` polls of
/// `poll_interval` before escalating
#[derive(Debug, Clone)]
pub struct StopTuning {
    pub attempts: u32,
    pub poll_interval: Duration,
}

impl Default for StopTuning {
    fn default() -> Self {
        Self {
            attempts: STOP_POLL_ATTEMPTS,
            poll_interval: Duration::from_millis(STOP_POLL_INTERVAL_MS),
        }
    }
}

impl StopTuning {
    fn phase_deadline(&self) -> Duration {
        self.poll_interval * self.attempts
    }
}

/// Artifact watcher timing
#[derive(Debug, Clone)]
pub struct WatchTuning {
    pub monitor_period: Duration,
    pub pending_period: Duration,
    pub restart_delay: Duration,
}

impl Default for WatchTuning {
    fn default() -> Self {
        Self {
            monitor_period: Duration::from_millis(MONITOR_PERIOD_MS),
            pending_period: Duration::from_millis(PENDING_PERIOD_MS),
            restart_delay: Duration::from_millis(RESTART_DELAY_MS),
        }
    }
}

/// The child a controller currently owns. `exit` is `None` for adopted
/// processes, whose liveness is probed by pid instead.
struct LiveProcess {
    pid: u32,
    exit: Option<ExitWatch>,
}

struct ControllerInner {
    info: Option<Arc<ServiceInfo>>,
    deploy: Option<DeployInfo>,
    enabled: bool,
    running: bool,
    process: Option<LiveProcess>,
    process_id: u32,
    process_name: String,
    start_time: Option<SystemTime>,
    error_count: u32,
    ceiling_announced: bool,
    stamps: ArtifactStamps,
    ready: bool,
    ready_time: Option<Instant>,
    resolved_file_name: Option<PathBuf>,
    resolved_work_dir: Option<PathBuf>,
    watch_task: Option<JoinHandle<()>>,
}

enum StartOutcome {
    Running {
        pid: u32,
        exit: ExitWatch,
        process_name: String,
        resolved_file: Option<PathBuf>,
        resolved_dir: Option<PathBuf>,
    },
    Extracted {
        dir: PathBuf,
    },
    RanOnce,
}

/// Per-service controller.
///
/// All state mutation is serialized by one internal lock; `start`, `stop`,
/// `check`, `set_info` and the watcher tick contend for it, so events on a
/// single controller are totally ordered.
pub struct ServiceController {
    id: ControllerId,
    name: String,
    executor: Arc<dyn ProcessExecutor>,
    query: Arc<dyn ProcessQuery>,
    events: Arc<dyn EventSink>,
    tracer: Arc<dyn Tracer>,
    perf: Option<Arc<dyn PerfReporter>>,
    start_wait: Duration,
    max_fails: u32,
    stop_tuning: StopTuning,
    watch_tuning: WatchTuning,
    inner: Mutex<ControllerInner>,
}

impl ServiceController {
    pub fn new(
        id: ControllerId,
        name: impl Into<String>,
        executor: Arc<dyn ProcessExecutor>,
        query: Arc<dyn ProcessQuery>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            executor,
            query,
            events,
            tracer: Arc::new(NoopTracer),
            perf: None,
            start_wait: Duration::from_millis(DEFAULT_START_WAIT_MS),
            max_fails: DEFAULT_MAX_FAILS,
            stop_tuning: StopTuning::default(),
            watch_tuning: WatchTuning::default(),
            inner: Mutex::new(ControllerInner {
                info: None,
                deploy: None,
                enabled: false,
                running: false,
                process: None,
                process_id: 0,
                process_name: String::new(),
                start_time: None,
                error_count: 0,
                ceiling_announced: false,
                stamps: ArtifactStamps::new(),
                ready: false,
                ready_time: None,
                resolved_file_name: None,
                resolved_work_dir: None,
                watch_task: None,
            }),
        }
    }

    pub fn with_tracer(mut self, tracer: Arc<dyn Tracer>) -> Self {
        self.tracer = tracer;
        self
    }

    pub fn with_perf_reporter(mut self, perf: Arc<dyn PerfReporter>) -> Self {
        self.perf = Some(perf);
        self
    }

    pub fn with_start_wait(mut self, start_wait: Duration) -> Self {
        self.start_wait = start_wait;
        self
    }

    pub fn with_max_fails(mut self, max_fails: u32) -> Self {
        self.max_fails = max_fails;
        self
    }

    pub fn with_stop_tuning(mut self, tuning: StopTuning) -> Self {
        self.stop_tuning = tuning;
        self
    }

    pub fn with_watch_tuning(mut self, tuning: WatchTuning) -> Self {
        self.watch_tuning = tuning;
        self
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ===== Observers =====

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.running
    }

    pub async fn is_enabled(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.enabled && inner.info.as_ref().map(|i| i.enable).unwrap_or(false)
    }

    pub async fn error_count(&self) -> u32 {
        self.inner.lock().await.error_count
    }

    pub async fn pid(&self) -> Option<u32> {
        self.inner.lock().await.process.as_ref().map(|p| p.pid)
    }

    pub async fn info(&self) -> Option<Arc<ServiceInfo>> {
        self.inner.lock().await.info.clone()
    }

    pub async fn deploy_info(&self) -> Option<DeployInfo> {
        self.inner.lock().await.deploy.clone()
    }

    pub async fn resolved_file_name(&self) -> Option<PathBuf> {
        self.inner.lock().await.resolved_file_name.clone()
    }

    /// The tuple a supervisor persists to re-adopt this child after a restart
    pub async fn snapshot(&self) -> ControllerSnapshot {
        let inner = self.inner.lock().await;
        ControllerSnapshot {
            name: self.name.clone(),
            process_id: inner.process_id,
            process_name: inner.process_name.clone(),
            start_time: inner.start_time,
        }
    }

    /// Seed adoption state from a persisted snapshot; a later `check` re-binds
    /// to the orphan instead of spawning a duplicate
    pub async fn restore(&self, snapshot: &ControllerSnapshot) {
        let mut inner = self.inner.lock().await;
        if inner.process.is_some() {
            return;
        }
        inner.process_id = snapshot.process_id;
        inner.process_name = snapshot.process_name.clone();
        if inner.start_time.is_none() {
            inner.start_time = snapshot.start_time;
        }
    }

    // ===== Operations =====

    /// Install a new service revision. A NEW `ServiceInfo` instance (different
    /// allocation) clears the failure count, which is how operators unstick a
    /// controller at its ceiling.
    pub async fn set_info(&self, info: Arc<ServiceInfo>, deploy: Option<DeployInfo>) {
        let mut inner = self.inner.lock().await;
        let fresh = match &inner.info {
            Some(old) => !Arc::ptr_eq(old, &info),
            None => true,
        };
        if fresh {
            inner.error_count = 0;
            inner.ceiling_announced = false;
        }
        inner.enabled = info.enable;
        inner.deploy = deploy;
        inner.info = Some(info);
    }

    /// Returns true iff the controller transitioned into the running state
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await
    }

    /// Idempotent graceful stop; never fails, always completes
    pub async fn stop(&self, reason: &str) {
        let mut inner = self.inner.lock().await;
        self.stop_locked(&mut inner, reason, true).await;
    }

    /// Liveness/reconciliation tick. Returns true when it (re)started the
    /// service this tick.
    pub async fn check(self: &Arc<Self>) -> bool {
        let mut inner = self.inner.lock().await;
        self.check_locked(&mut inner).await
    }

    // ===== Start =====

    async fn start_locked(self: &Arc<Self>, inner: &mut ControllerInner) -> bool {
        if inner.running {
            return false;
        }
        let Some(info) = inner.info.clone() else {
            return false;
        };
        if !inner.enabled || !info.enable {
            return false;
        }
        if inner.error_count >= self.max_fails {
            return false;
        }

        let span = self.tracer.new_span("service-start", &self.name);

        if let Err(e) = info.validate() {
            span.set_error(&e);
            self.events.write_error_event(
                SOURCE,
                &format!("service {} rejected: {}", self.name, e),
            );
            // Hold the stopped state until a corrected revision arrives.
            inner.enabled = false;
            return false;
        }

        inner.error_count += 1;
        let capture = inner.error_count >= 2;
        let work_dir = info.resolve_working_directory();
        let deploy = inner.deploy.clone();

        let outcome = if info.mode == RunMode::RunOnce {
            self.start_run_once(&info, &work_dir, capture).await
        } else if info.is_zip_deploy() || info.mode.is_archive() {
            self.start_archive(&info, &work_dir, deploy, capture).await
        } else {
            self.start_direct(&info, &work_dir, capture).await
        };

        match outcome {
            Ok(StartOutcome::Running {
                pid,
                exit,
                process_name,
                resolved_file,
                resolved_dir,
            }) => {
                inner.process = Some(LiveProcess {
                    pid,
                    exit: Some(exit),
                });
                inner.process_id = pid;
                inner.process_name = process_name;
                inner.resolved_file_name = resolved_file;
                inner.resolved_work_dir = resolved_dir;
                inner.running = true;
                inner.start_time = Some(SystemTime::now());
                self.install_watcher(inner);
                info!(service = %self.name, pid = pid, attempt = inner.error_count, "service started");
                self.events.write_info_event(
                    SOURCE,
                    &format!("service {} started (pid {})", self.name, pid),
                );
                true
            }
            Ok(StartOutcome::Extracted { dir }) => {
                inner.resolved_work_dir = Some(dir.clone());
                inner.running = true;
                self.install_watcher(inner);
                info!(service = %self.name, dir = %dir.display(), "archive extracted for external host");
                self.events.write_info_event(
                    SOURCE,
                    &format!("service {} extracted to {}", self.name, dir.display()),
                );
                true
            }
            Ok(StartOutcome::RanOnce) => {
                inner.enabled = false;
                inner.running = false;
                info!(service = %self.name, "one-shot run completed, service disabled");
                self.events.write_info_event(
                    SOURCE,
                    &format!("service {} ran once and was disabled", self.name),
                );
                true
            }
            Err(e) => {
                span.set_error(&e);
                warn!(service = %self.name, attempt = inner.error_count, error = %e, "start failed");
                self.events.write_error_event(
                    SOURCE,
                    &format!(
                        "service {} start attempt {} failed: {}",
                        self.name, inner.error_count, e
                    ),
                );
                false
            }
        }
    }

    /// Direct launch for a supervised service. Any exit inside the start-wait
    /// window fails the attempt, clean or not: the child was supposed to stay
    /// up.
    async fn start_direct(
        &self,
        info: &ServiceInfo,
        work_dir: &std::path::Path,
        capture: bool,
    ) -> Result<StartOutcome> {
        let spawned = self
            .executor
            .spawn(SpawnConfig {
                file_name: info.file_name.clone(),
                args: info.argument_tokens(),
                work_dir: work_dir.to_path_buf(),
                user_name: info.user_name.clone(),
                capture_output: capture,
            })
            .await?;

        if let Some(report) = spawned.exit.wait(self.start_wait).await {
            if let Some(tail) = &report.stderr_tail {
                self.events.write_error_event(
                    SOURCE,
                    &format!("service {} stderr before exit: {}", self.name, tail),
                );
            }
            return Err(DomainError::EarlyExit {
                code: report.code.unwrap_or(-1),
            });
        }

        Ok(StartOutcome::Running {
            pid: spawned.pid,
            exit: spawned.exit,
            process_name: process_name_of(&info.file_name),
            resolved_file: None,
            resolved_dir: None,
        })
    }

    /// One-shot launch: a dirty exit inside the window fails, everything else
    /// (clean exit or still running) counts as done
    async fn start_run_once(
        &self,
        info: &ServiceInfo,
        work_dir: &std::path::Path,
        capture: bool,
    ) -> Result<StartOutcome> {
        let spawned = self
            .executor
            .spawn(SpawnConfig {
                file_name: info.file_name.clone(),
                args: info.argument_tokens(),
                work_dir: work_dir.to_path_buf(),
                user_name: info.user_name.clone(),
                capture_output: capture,
            })
            .await?;

        if let Some(report) = spawned.exit.wait(self.start_wait).await {
            if !report.clean() {
                if let Some(tail) = &report.stderr_tail {
                    self.events.write_error_event(
                        SOURCE,
                        &format!("service {} stderr before exit: {}", self.name, tail),
                    );
                }
                return Err(DomainError::EarlyExit {
                    code: report.code.unwrap_or(-1),
                });
            }
        }
        Ok(StartOutcome::RanOnce)
    }

    async fn start_archive(
        &self,
        info: &ServiceInfo,
        work_dir: &std::path::Path,
        deploy: Option<DeployInfo>,
        capture: bool,
    ) -> Result<StartOutcome> {
        let zip_path = if info.file_name == ZIP_DEPLOY_MARKER {
            PathBuf::new()
        } else {
            PathBuf::from(&info.file_name)
        };
        let mut deployer = ArchiveDeployer::new(zip_path);
        deployer.parse(&info.argument_tokens())?;
        if let Some(deploy) = &deploy {
            deployer.add_overwrite_globs(&deploy.overwrite)?;
        }
        if info.file_name == ZIP_DEPLOY_MARKER {
            deployer.locate_archive(work_dir)?;
        }
        deployer.extract(work_dir)?;

        if info.mode == RunMode::Extract {
            let dir = deployer
                .extract_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| work_dir.to_path_buf());
            return Ok(StartOutcome::Extracted { dir });
        }

        let exe = deployer.find_exe_file()?;
        let spawned = deployer
            .execute(
                self.executor.as_ref(),
                self.start_wait,
                info.user_name.clone(),
                capture,
            )
            .await
            .map_err(|e| {
                if let Some(tail) = deployer.last_error() {
                    self.events.write_error_event(
                        SOURCE,
                        &format!("service {} stderr before exit: {}", self.name, tail),
                    );
                }
                e
            })?;

        Ok(StartOutcome::Running {
            pid: spawned.pid,
            exit: spawned.exit,
            process_name: deployer.host_process_name().unwrap_or_default(),
            resolved_file: Some(exe),
            resolved_dir: deployer.extract_dir().map(|p| p.to_path_buf()),
        })
    }

    // ===== Stop =====

    /// Three termination phases, each bounded by the stop tuning: polite
    /// close, platform graceful kill, force kill. Failures are logged and
    /// swallowed; the method always completes.
    async fn stop_locked(&self, inner: &mut ControllerInner, reason: &str, dispose_watcher: bool) {
        let span = self.tracer.new_span("service-stop", &self.name);
        span.append_tag(reason);

        inner.running = false;
        if dispose_watcher {
            if let Some(task) = inner.watch_task.take() {
                task.abort();
            }
            inner.ready = false;
            inner.ready_time = None;
        }

        let Some(process) = inner.process.take() else {
            return;
        };
        let pid = process.pid;
        info!(service = %self.name, pid = pid, reason = reason, "stopping service");
        self.events.write_log(
            SOURCE,
            &format!("stopping service {} (pid {}): {}", self.name, pid, reason),
        );

        if let Err(e) = self.executor.graceful_close(pid).await {
            debug!(service = %self.name, pid = pid, error = %e, "graceful close refused");
        }
        if self.await_exit(&process).await {
            return;
        }

        if let Err(e) = self.executor.terminate(pid).await {
            warn!(service = %self.name, pid = pid, error = %e, "terminate refused");
        }
        if self.await_exit(&process).await {
            return;
        }

        warn!(service = %self.name, pid = pid, "escalating to force kill");
        if let Err(e) = self.executor.force_kill(pid).await {
            warn!(service = %self.name, pid = pid, error = %e, "force kill refused");
        }
        let _ = self.await_exit(&process).await;
    }

    async fn await_exit(&self, process: &LiveProcess) -> bool {
        let deadline = self.stop_tuning.phase_deadline();
        if let Some(exit) = &process.exit {
            return exit.wait(deadline).await.is_some();
        }
        for _ in 0..self.stop_tuning.attempts {
            match self.executor.is_running(process.pid).await {
                Ok(false) => return true,
                _ => tokio::time::sleep(self.stop_tuning.poll_interval).await,
            }
        }
        false
    }

    // ===== Check =====

    async fn check_locked(self: &Arc<Self>, inner: &mut ControllerInner) -> bool {
        let span = self.tracer.new_span("service-check", &self.name);
        let Some(info) = inner.info.clone() else {
            return false;
        };

        if !inner.enabled || !info.enable {
            if inner.running || inner.process.is_some() {
                self.stop_locked(inner, "disabled", true).await;
            }
            return false;
        }

        // A known process: reap it, enforce the memory ceiling, or settle.
        let live = inner
            .process
            .as_ref()
            .map(|p| (p.pid, p.exit.clone()));
        if let Some((pid, exit)) = live {
            let report = exit.as_ref().and_then(|w| w.exited());
            let gone = match &exit {
                Some(_) => report.is_some(),
                None => !self.executor.is_running(pid).await.unwrap_or(false),
            };

            if gone {
                let code = report.and_then(|r| r.code);
                warn!(service = %self.name, pid = pid, code = ?code, "process exited");
                self.events.write_log(
                    SOURCE,
                    &format!("service {} (pid {}) exited with {:?}", self.name, pid, code),
                );
                inner.process = None;
                inner.running = false;
                // Fall through to adoption / restart below.
            } else {
                if info.max_memory > 0 {
                    if let Some(snap) = self.query.snapshot(pid) {
                        if snap.memory_mib() > info.max_memory {
                            warn!(
                                service = %self.name,
                                pid = pid,
                                working_set_mib = snap.memory_mib(),
                                ceiling_mib = info.max_memory,
                                "memory ceiling exceeded"
                            );
                            self.stop_locked(inner, MEMORY_EXCEEDED_REASON, false).await;
                            return false;
                        }
                    }
                }
                if inner.error_count != 0 {
                    debug!(service = %self.name, "service settled, clearing failure count");
                }
                inner.error_count = 0;
                inner.ceiling_announced = false;
                self.report_metrics(inner);
                return false;
            }
        } else if inner.running && info.mode == RunMode::Extract {
            // Extracted and handed off; the external host owns liveness.
            return false;
        }

        // Recover an orphan by pid, then by name.
        if self.try_adopt_by_pid(inner).await {
            self.report_metrics(inner);
            return false;
        }
        if info.mode != RunMode::Multiple && self.try_adopt_by_name(inner, &info).await {
            self.report_metrics(inner);
            return false;
        }

        if inner.error_count >= self.max_fails {
            if !inner.ceiling_announced {
                inner.ceiling_announced = true;
                let message = format!(
                    "service {} failed {} consecutive starts, giving up until new configuration arrives",
                    self.name, inner.error_count
                );
                warn!(service = %self.name, failures = inner.error_count, "failure ceiling reached");
                span.append_tag("ceiling");
                self.events.write_error_event(SOURCE, &message);
            }
            return false;
        }

        let started = self.start_locked(inner).await;
        if started {
            self.report_metrics(inner);
        }
        started
    }

    // ===== Adoption =====

    async fn try_adopt_by_pid(self: &Arc<Self>, inner: &mut ControllerInner) -> bool {
        if inner.process_id == 0 || inner.process_id == self.query.current_pid() {
            return false;
        }
        if inner.process_name.is_empty() {
            return false;
        }
        match self.query.snapshot(inner.process_id) {
            Some(snap) if snap.name == inner.process_name => {
                self.adopt(inner, snap);
                true
            }
            _ => false,
        }
    }

    async fn try_adopt_by_name(
        self: &Arc<Self>,
        inner: &mut ControllerInner,
        info: &ServiceInfo,
    ) -> bool {
        if inner.process_name.is_empty() {
            return false;
        }
        let own_pid = self.query.current_pid();
        let candidate = if matches!(inner.process_name.as_str(), "dotnet" | "java") {
            // Hosted runtimes all share a process name; match the assembly on
            // the command line instead.
            let Some(assembly) = expected_assembly(inner, info) else {
                return false;
            };
            self.query
                .list()
                .into_iter()
                .find(|p| {
                    p.pid != own_pid
                        && p.name == inner.process_name
                        && p.cmdline_ends_with(&assembly)
                })
        } else {
            self.query
                .list()
                .into_iter()
                .find(|p| p.pid != own_pid && p.name == inner.process_name)
        };

        match candidate {
            Some(snap) => {
                self.adopt(inner, snap);
                true
            }
            None => false,
        }
    }

    fn adopt(self: &Arc<Self>, inner: &mut ControllerInner, snap: ProcessSnapshot) {
        let span = self.tracer.new_span("service-take-over", &self.name);
        span.append_tag(&snap.pid.to_string());
        info!(service = %self.name, pid = snap.pid, name = %snap.name, "adopted running process");
        self.events.write_info_event(
            SOURCE,
            &format!("service {} adopted pid {}", self.name, snap.pid),
        );

        inner.process_id = snap.pid;
        inner.process_name = snap.name.clone();
        if inner.start_time.is_none() {
            inner.start_time = snap.start_time.or_else(|| Some(SystemTime::now()));
        }
        inner.process = Some(LiveProcess {
            pid: snap.pid,
            exit: None,
        });
        inner.running = true;
        self.install_watcher(inner);
    }

    // ===== Artifact watcher =====

    fn install_watcher(self: &Arc<Self>, inner: &mut ControllerInner) {
        if inner.watch_task.is_some() {
            return;
        }
        let weak = Arc::downgrade(self);
        let tuning = self.watch_tuning.clone();
        inner.watch_task = Some(tokio::spawn(async move {
            loop {
                let period = match weak.upgrade() {
                    Some(controller) => {
                        let inner = controller.inner.lock().await;
                        if inner.ready {
                            tuning.pending_period
                        } else {
                            tuning.monitor_period
                        }
                    }
                    None => break,
                };
                tokio::time::sleep(period).await;
                match weak.upgrade() {
                    Some(controller) => controller.watch_tick().await,
                    None => break,
                }
            }
        }));
    }

    /// One poll of the artifact table. A change burst stops the service once
    /// and schedules a single restart after the quiet period.
    async fn watch_tick(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        let Some(info) = inner.info.clone() else {
            return;
        };
        let dir = info.resolve_working_directory();
        let changed = inner.stamps.scan(&dir);
        let now = Instant::now();

        if !changed.is_empty() {
            let span = self.tracer.new_span("artifact-change", &self.name);
            span.append_tag(&format!("{} files", changed.len()));
            if !inner.ready {
                info!(
                    service = %self.name,
                    files = changed.len(),
                    "artifacts changed, restart scheduled after quiet period"
                );
                self.events.write_info_event(
                    SOURCE,
                    &format!(
                        "service {} artifacts changed ({} files), restarting after quiet period",
                        self.name,
                        changed.len()
                    ),
                );
                if inner.running || inner.process.is_some() {
                    self.stop_locked(&mut inner, "artifacts changed", false).await;
                }
                inner.ready = true;
            }
            inner.ready_time = Some(now);
            return;
        }

        if inner.ready {
            let due = inner
                .ready_time
                .map(|t| now.duration_since(t) >= self.watch_tuning.restart_delay)
                .unwrap_or(true);
            if due {
                inner.ready = false;
                inner.ready_time = None;
                self.start_locked(&mut inner).await;
            }
        }
    }

    // ===== Metrics =====

    fn report_metrics(&self, inner: &ControllerInner) {
        let Some(perf) = self.perf.clone() else {
            return;
        };
        let Some(process) = &inner.process else {
            return;
        };
        let Some(snap) = self.query.snapshot(process.pid) else {
            return;
        };
        let uptime = inner
            .start_time
            .and_then(|t| t.elapsed().ok())
            .unwrap_or_default();
        let metrics = AppMetrics {
            process_name: snap.name,
            process_id: snap.pid,
            working_set: snap.memory_bytes,
            cpu_percent: snap.cpu_percent,
            thread_count: snap.thread_count,
            handle_count: snap.handle_count,
            uptime,
        };
        tokio::spawn(async move {
            perf.report_app_ping(metrics);
        });
    }
}

impl Drop for ServiceController {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_lock() {
            if let Some(task) = inner.watch_task.take() {
                task.abort();
            }
        }
    }
}

/// Short process name for a direct launch (`/usr/bin/dotnet` → `dotnet`)
fn process_name_of(file_name: &str) -> String {
    std::path::Path::new(file_name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string())
}

/// The `.dll`/`.jar` a hosted runtime is expected to carry on its command
/// line, taken from the resolved entrypoint or the argument string
fn expected_assembly(inner: &ControllerInner, info: &ServiceInfo) -> Option<String> {
    if let Some(resolved) = &inner.resolved_file_name {
        if let Some(name) = resolved.file_name() {
            let lower = name.to_string_lossy().to_ascii_lowercase();
            if lower.ends_with(".dll") || lower.ends_with(".jar") {
                return Some(name.to_string_lossy().into_owned());
            }
        }
    }
    for token in info.argument_tokens() {
        let lower = token.to_ascii_lowercase();
        if lower.ends_with(".dll") || lower.ends_with(".jar") {
            return std::path::Path::new(&token)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .or(Some(token));
        }
    }
    let lower = info.file_name.to_ascii_lowercase();
    if lower.ends_with(".dll") || lower.ends_with(".jar") {
        return std::path::Path::new(&info.file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{KillKind, MockLauncher, MockProcessQuery};
    use crate::domain::value_objects::IdAllocator;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingSink {
        info: StdMutex<Vec<String>>,
        error: StdMutex<Vec<String>>,
    }

    impl EventSink for RecordingSink {
        fn write_info_event(&self, _source: &str, message: &str) {
            self.info.lock().unwrap().push(message.to_string());
        }
        fn write_error_event(&self, _source: &str, message: &str) {
            self.error.lock().unwrap().push(message.to_string());
        }
    }

    struct Rig {
        launcher: Arc<MockLauncher>,
        query: Arc<MockProcessQuery>,
        sink: Arc<RecordingSink>,
        controller: Arc<ServiceController>,
    }

    fn rig(info: ServiceInfo) -> Rig {
        let launcher = Arc::new(MockLauncher::new());
        let query = Arc::new(MockProcessQuery::with_own_pid(1));
        let sink = Arc::new(RecordingSink::default());
        let ids = IdAllocator::new();
        let controller = Arc::new(
            ServiceController::new(
                ids.allocate(),
                info.name.clone(),
                launcher.clone(),
                query.clone(),
                sink.clone(),
            )
            .with_start_wait(Duration::ZERO)
            .with_stop_tuning(StopTuning {
                attempts: 3,
                poll_interval: Duration::from_millis(5),
            }),
        );
        Rig {
            launcher,
            query,
            sink,
            controller,
        }
    }

    fn plain_info(name: &str) -> ServiceInfo {
        let mut info = ServiceInfo::new(name, "/usr/bin/node");
        info.arguments = "server.js".to_string();
        info.working_directory = "/srv/node".to_string();
        info
    }

    #[tokio::test]
    async fn test_start_then_stop_releases_process() {
        let rig = rig(plain_info("svc"));
        rig.controller
            .set_info(Arc::new(plain_info("svc")), None)
            .await;

        assert!(rig.controller.start().await);
        assert!(rig.controller.is_running().await);
        let pid = rig.controller.pid().await.unwrap();
        assert!(rig.launcher.is_live(pid));

        rig.controller.stop("test").await;
        assert!(!rig.controller.is_running().await);
        assert!(rig.controller.pid().await.is_none());
        assert!(!rig.launcher.is_live(pid));
    }

    #[tokio::test]
    async fn test_start_is_rejected_while_running() {
        let rig = rig(plain_info("svc"));
        rig.controller
            .set_info(Arc::new(plain_info("svc")), None)
            .await;

        assert!(rig.controller.start().await);
        assert!(!rig.controller.start().await);
        assert_eq!(rig.launcher.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_start_passes_workdir_and_user() {
        let mut info = plain_info("svc");
        info.user_name = Some("appuser".to_string());
        let rig = rig(info.clone());
        rig.controller.set_info(Arc::new(info), None).await;

        rig.controller.start().await;
        let spawn = &rig.launcher.spawns()[0];
        assert_eq!(spawn.work_dir, PathBuf::from("/srv/node"));
        assert_eq!(spawn.user_name.as_deref(), Some("appuser"));
        assert_eq!(spawn.args, vec!["server.js"]);
        // First attempt runs without capture.
        assert!(!spawn.capture_output);
    }

    #[tokio::test]
    async fn test_second_attempt_enables_capture() {
        let rig = rig(plain_info("svc"));
        rig.controller
            .set_info(Arc::new(plain_info("svc")), None)
            .await;
        rig.launcher.plan_failure("exec format error");

        assert!(!rig.controller.start().await);
        assert!(rig.controller.start().await);

        let spawns = rig.launcher.spawns();
        assert!(!spawns[0].capture_output);
        assert!(spawns[1].capture_output);
    }

    #[tokio::test]
    async fn test_empty_file_name_disables_until_new_info() {
        let mut info = plain_info("svc");
        info.file_name = String::new();
        let rig = rig(info.clone());
        rig.controller.set_info(Arc::new(info.clone()), None).await;

        assert!(!rig.controller.start().await);
        assert!(!rig.controller.is_enabled().await);
        assert_eq!(rig.launcher.spawn_count(), 0);
        assert_eq!(rig.sink.error.lock().unwrap().len(), 1);

        // A corrected revision re-enables the controller.
        let fixed = plain_info("svc");
        rig.controller.set_info(Arc::new(fixed), None).await;
        assert!(rig.controller.start().await);
    }

    #[tokio::test]
    async fn test_early_exit_fails_start_even_when_clean() {
        let launcher = Arc::new(MockLauncher::new());
        let query = Arc::new(MockProcessQuery::with_own_pid(1));
        let sink = Arc::new(RecordingSink::default());
        let controller = Arc::new(
            ServiceController::new(
                IdAllocator::new().allocate(),
                "svc",
                launcher.clone(),
                query,
                sink,
            )
            .with_start_wait(Duration::from_millis(200)),
        );
        controller.set_info(Arc::new(plain_info("svc")), None).await;

        launcher.plan_pid(777);
        let exiter = {
            let launcher = launcher.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                launcher.exit(777, 0, None);
            })
        };
        assert!(!controller.start().await);
        assert!(!controller.is_running().await);
        assert_eq!(controller.error_count().await, 1);
        exiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_check_reaps_exit_and_respawns() {
        let rig = rig(plain_info("svc"));
        rig.controller
            .set_info(Arc::new(plain_info("svc")), None)
            .await;

        assert!(rig.controller.start().await);
        let first_pid = rig.controller.pid().await.unwrap();

        // Healthy tick settles the failure counter.
        assert!(!rig.controller.check().await);
        assert_eq!(rig.controller.error_count().await, 0);

        // Late clean exit: the next tick reaps it and spawns a replacement.
        rig.launcher.exit(first_pid, 0, None);
        assert!(rig.controller.check().await);
        let second_pid = rig.controller.pid().await.unwrap();
        assert_ne!(first_pid, second_pid);
        assert_eq!(rig.launcher.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_ceiling_stops_then_respawns() {
        let mut info = plain_info("svc");
        info.max_memory = 100;
        let rig = rig(info.clone());
        rig.controller.set_info(Arc::new(info), None).await;

        assert!(rig.controller.start().await);
        let pid = rig.controller.pid().await.unwrap();
        let mut row = MockProcessQuery::row(pid, "node", &["node", "server.js"]);
        row.memory_bytes = 150 * 1024 * 1024;
        rig.query.insert(row);

        // Over the ceiling: this tick stops the process.
        assert!(!rig.controller.check().await);
        assert!(!rig.controller.is_running().await);
        rig.query.remove(pid);

        // Next tick brings up a replacement.
        assert!(rig.controller.check().await);
        assert!(rig.controller.is_running().await);
        assert_eq!(rig.launcher.spawn_count(), 2);
    }

    #[tokio::test]
    async fn test_memory_ceiling_disabled_when_zero() {
        let rig = rig(plain_info("svc"));
        rig.controller
            .set_info(Arc::new(plain_info("svc")), None)
            .await;

        assert!(rig.controller.start().await);
        let pid = rig.controller.pid().await.unwrap();
        let mut row = MockProcessQuery::row(pid, "node", &["node", "server.js"]);
        row.memory_bytes = u64::MAX / 2;
        rig.query.insert(row);

        assert!(!rig.controller.check().await);
        assert!(rig.controller.is_running().await);
    }

    #[tokio::test]
    async fn test_run_once_disables_service() {
        let mut info = plain_info("migrate");
        info.mode = RunMode::RunOnce;
        let rig = rig(info.clone());
        rig.controller.set_info(Arc::new(info), None).await;

        assert!(rig.controller.start().await);
        assert!(!rig.controller.is_running().await);
        assert!(!rig.controller.is_enabled().await);

        // Disabled: further checks do nothing.
        assert!(!rig.controller.check().await);
        assert_eq!(rig.launcher.spawn_count(), 1);
    }

    #[tokio::test]
    async fn test_stop_escalates_through_phases() {
        let rig = rig(plain_info("svc"));
        rig.controller
            .set_info(Arc::new(plain_info("svc")), None)
            .await;
        rig.launcher.survive_terminate();

        assert!(rig.controller.start().await);
        let pid = rig.controller.pid().await.unwrap();
        rig.controller.stop("test").await;

        let kinds: Vec<KillKind> = rig.launcher.kills().into_iter().map(|(_, k)| k).collect();
        assert_eq!(
            kinds,
            vec![KillKind::Graceful, KillKind::Terminate, KillKind::Force]
        );
        assert!(!rig.launcher.is_live(pid));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let rig = rig(plain_info("svc"));
        rig.controller
            .set_info(Arc::new(plain_info("svc")), None)
            .await;

        rig.controller.stop("noop").await;
        assert!(rig.launcher.kills().is_empty());

        assert!(rig.controller.start().await);
        rig.controller.stop("first").await;
        let kills = rig.launcher.kills().len();
        rig.controller.stop("second").await;
        assert_eq!(rig.launcher.kills().len(), kills);
    }

    #[tokio::test]
    async fn test_new_info_instance_resets_failures() {
        let rig = rig(plain_info("svc"));
        let info = Arc::new(plain_info("svc"));
        rig.controller.set_info(info.clone(), None).await;

        rig.launcher.plan_failure("nope");
        assert!(!rig.controller.start().await);
        assert_eq!(rig.controller.error_count().await, 1);

        // The same instance does not reset.
        rig.controller.set_info(info.clone(), None).await;
        assert_eq!(rig.controller.error_count().await, 1);

        // A new instance with identical content does.
        rig.controller
            .set_info(Arc::new(plain_info("svc")), None)
            .await;
        assert_eq!(rig.controller.error_count().await, 0);
    }
}
