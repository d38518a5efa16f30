//! sysinfo-backed process query
//! Real implementation of the ProcessQuery port over the host process table

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use sysinfo::{Pid, ProcessesToUpdate, System};

use crate::domain::ports::{ProcessQuery, ProcessSnapshot};

/// Process table reader backed by the `sysinfo` crate
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemProcessQuery;

impl SystemProcessQuery {
    pub fn new() -> Self {
        Self
    }
}

fn to_snapshot(process: &sysinfo::Process) -> ProcessSnapshot {
    ProcessSnapshot {
        pid: process.pid().as_u32(),
        name: process.name().to_string_lossy().into_owned(),
        cmdline: process
            .cmd()
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect(),
        memory_bytes: process.memory(),
        cpu_percent: process.cpu_usage(),
        thread_count: process.tasks().map(|t| t.len()).unwrap_or(0),
        // Not exposed by sysinfo; reported as zero.
        handle_count: 0,
        start_time: Some(UNIX_EPOCH + Duration::from_secs(process.start_time())),
    }
}

impl ProcessQuery for SystemProcessQuery {
    fn snapshot(&self, pid: u32) -> Option<ProcessSnapshot> {
        let target = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[target]), true);
        system.process(target).map(to_snapshot)
    }

    fn list(&self) -> Vec<ProcessSnapshot> {
        let mut system = System::new_all();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system.processes().values().map(to_snapshot).collect()
    }

    fn current_pid(&self) -> u32 {
        std::process::id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_of_own_process() {
        let query = SystemProcessQuery::new();
        let own = query.current_pid();
        let snap = query.snapshot(own).expect("own process must be visible");
        assert_eq!(snap.pid, own);
        assert!(!snap.name.is_empty());
    }

    #[test]
    fn test_snapshot_of_unknown_pid_is_none() {
        let query = SystemProcessQuery::new();
        // Pid close to the platform maximum should not exist.
        assert!(query.snapshot(u32::MAX - 7).is_none());
    }

    #[test]
    fn test_list_contains_own_process() {
        let query = SystemProcessQuery::new();
        let own = query.current_pid();
        assert!(query.list().iter().any(|p| p.pid == own));
    }

    #[test]
    fn test_start_time_is_not_in_the_future() {
        let query = SystemProcessQuery::new();
        let snap = query.snapshot(query.current_pid()).unwrap();
        let start = snap.start_time.unwrap();
        assert!(start <= SystemTime::now() + Duration::from_secs(5));
    }
}
