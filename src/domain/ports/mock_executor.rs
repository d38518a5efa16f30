//! Mock process ports for testing
//! Simple scripted implementations usable from unit and integration tests

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::SystemTime;

use super::process_executor::{
    ExitNotifier, ExitReport, ExitWatch, ProcessExecutor, SpawnConfig, SpawnResult,
};
use super::process_query::{ProcessQuery, ProcessSnapshot};
use crate::domain::{DomainError, Result};

/// Which termination phase a kill call came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillKind {
    Graceful,
    Terminate,
    Force,
}

enum Planned {
    Fail(String),
    Pid(u32),
}

struct LauncherState {
    next_pid: u32,
    planned: VecDeque<Planned>,
    live: HashSet<u32>,
    notifiers: HashMap<u32, ExitNotifier>,
    spawns: Vec<SpawnConfig>,
    kills: Vec<(u32, KillKind)>,
    die_on_graceful: bool,
    die_on_terminate: bool,
}

/// Scripted [`ProcessExecutor`]: spawns get increasing fake pids whose exits
/// are completed by hand (or automatically by kill calls)
pub struct MockLauncher {
    state: Mutex<LauncherState>,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LauncherState {
                next_pid: 1000,
                planned: VecDeque::new(),
                live: HashSet::new(),
                notifiers: HashMap::new(),
                spawns: Vec::new(),
                kills: Vec::new(),
                die_on_graceful: true,
                die_on_terminate: true,
            }),
        }
    }

    /// The next spawn call fails with the given reason
    pub fn plan_failure(&self, reason: &str) {
        self.state
            .lock()
            .unwrap()
            .planned
            .push_back(Planned::Fail(reason.to_string()));
    }

    /// The next spawn call returns this pid
    pub fn plan_pid(&self, pid: u32) {
        self.state
            .lock()
            .unwrap()
            .planned
            .push_back(Planned::Pid(pid));
    }

    /// Keep processes alive through the polite-close phase so stop escalates
    pub fn survive_graceful_close(&self) {
        self.state.lock().unwrap().die_on_graceful = false;
    }

    /// Keep processes alive through the terminate phase as well
    pub fn survive_terminate(&self) {
        let mut state = self.state.lock().unwrap();
        state.die_on_graceful = false;
        state.die_on_terminate = false;
    }

    /// Reap a fake process by hand
    pub fn exit(&self, pid: u32, code: i32, stderr_tail: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state.live.remove(&pid);
        if let Some(notifier) = state.notifiers.remove(&pid) {
            notifier.complete(ExitReport {
                code: Some(code),
                stderr_tail: stderr_tail.map(str::to_string),
            });
        }
    }

    pub fn is_live(&self, pid: u32) -> bool {
        self.state.lock().unwrap().live.contains(&pid)
    }

    pub fn spawns(&self) -> Vec<SpawnConfig> {
        self.state.lock().unwrap().spawns.clone()
    }

    pub fn spawn_count(&self) -> usize {
        self.state.lock().unwrap().spawns.len()
    }

    pub fn kills(&self) -> Vec<(u32, KillKind)> {
        self.state.lock().unwrap().kills.clone()
    }

    fn kill(&self, pid: u32, kind: KillKind, dies: bool) {
        let mut state = self.state.lock().unwrap();
        state.kills.push((pid, kind));
        let dies = dies || kind == KillKind::Force;
        if dies && state.live.remove(&pid) {
            if let Some(notifier) = state.notifiers.remove(&pid) {
                notifier.complete(ExitReport {
                    code: None,
                    stderr_tail: None,
                });
            }
        }
    }
}

#[async_trait]
impl ProcessExecutor for MockLauncher {
    async fn spawn(&self, config: SpawnConfig) -> Result<SpawnResult> {
        let mut state = self.state.lock().unwrap();
        state.spawns.push(config);

        let pid = match state.planned.pop_front() {
            Some(Planned::Fail(reason)) => return Err(DomainError::Spawn(reason)),
            Some(Planned::Pid(pid)) => pid,
            None => {
                let pid = state.next_pid;
                state.next_pid += 1;
                pid
            }
        };

        let (notifier, exit) = ExitWatch::pending();
        state.live.insert(pid);
        state.notifiers.insert(pid, notifier);
        Ok(SpawnResult { pid, exit })
    }

    async fn graceful_close(&self, pid: u32) -> Result<()> {
        let dies = self.state.lock().unwrap().die_on_graceful;
        self.kill(pid, KillKind::Graceful, dies);
        Ok(())
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        let dies = self.state.lock().unwrap().die_on_terminate;
        self.kill(pid, KillKind::Terminate, dies);
        Ok(())
    }

    async fn force_kill(&self, pid: u32) -> Result<()> {
        self.kill(pid, KillKind::Force, true);
        Ok(())
    }

    async fn is_running(&self, pid: u32) -> Result<bool> {
        Ok(self.state.lock().unwrap().live.contains(&pid))
    }
}

/// Stub process table for adoption, memory-ceiling and metrics tests
pub struct MockProcessQuery {
    rows: Mutex<HashMap<u32, ProcessSnapshot>>,
    own_pid: u32,
}

impl Default for MockProcessQuery {
    fn default() -> Self {
        Self::new()
    }
}

impl MockProcessQuery {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            own_pid: 1,
        }
    }

    pub fn with_own_pid(own_pid: u32) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            own_pid,
        }
    }

    /// A minimal table row; adjust fields on the returned value as needed
    pub fn row(pid: u32, name: &str, cmdline: &[&str]) -> ProcessSnapshot {
        ProcessSnapshot {
            pid,
            name: name.to_string(),
            cmdline: cmdline.iter().map(|s| s.to_string()).collect(),
            memory_bytes: 0,
            cpu_percent: 0.0,
            thread_count: 1,
            handle_count: 0,
            start_time: Some(SystemTime::now()),
        }
    }

    pub fn insert(&self, snapshot: ProcessSnapshot) {
        self.rows.lock().unwrap().insert(snapshot.pid, snapshot);
    }

    pub fn remove(&self, pid: u32) {
        self.rows.lock().unwrap().remove(&pid);
    }

    pub fn set_memory(&self, pid: u32, memory_bytes: u64) {
        if let Some(row) = self.rows.lock().unwrap().get_mut(&pid) {
            row.memory_bytes = memory_bytes;
        }
    }
}

impl ProcessQuery for MockProcessQuery {
    fn snapshot(&self, pid: u32) -> Option<ProcessSnapshot> {
        self.rows.lock().unwrap().get(&pid).cloned()
    }

    fn list(&self) -> Vec<ProcessSnapshot> {
        self.rows.lock().unwrap().values().cloned().collect()
    }

    fn current_pid(&self) -> u32 {
        self.own_pid
    }
}
