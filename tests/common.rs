//! Shared fixtures for the integration suite
#![allow(dead_code)]

use app_warden::domain::ports::{EventSink, MockLauncher, MockProcessQuery};
use app_warden::domain::{
    IdAllocator, ServiceController, ServiceInfo, StopTuning, WatchTuning,
};
use std::fs::File;
use std::future::Future;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Event sink that records everything for assertions
#[derive(Default)]
pub struct RecordingEventSink {
    pub info: Mutex<Vec<String>>,
    pub error: Mutex<Vec<String>>,
}

impl RecordingEventSink {
    pub fn error_count(&self) -> usize {
        self.error.lock().unwrap().len()
    }

    pub fn info_count(&self) -> usize {
        self.info.lock().unwrap().len()
    }
}

impl EventSink for RecordingEventSink {
    fn write_info_event(&self, _source: &str, message: &str) {
        self.info.lock().unwrap().push(message.to_string());
    }

    fn write_error_event(&self, _source: &str, message: &str) {
        self.error.lock().unwrap().push(message.to_string());
    }
}

/// One controller wired to mock ports with test-friendly timings
pub struct Rig {
    pub launcher: Arc<MockLauncher>,
    pub query: Arc<MockProcessQuery>,
    pub sink: Arc<RecordingEventSink>,
    pub controller: Arc<ServiceController>,
}

pub fn rig(info: &ServiceInfo) -> Rig {
    rig_with(info, |c| c)
}

pub fn rig_with(
    info: &ServiceInfo,
    customize: impl FnOnce(ServiceController) -> ServiceController,
) -> Rig {
    let launcher = Arc::new(MockLauncher::new());
    let query = Arc::new(MockProcessQuery::with_own_pid(1));
    let sink = Arc::new(RecordingEventSink::default());
    let ids = IdAllocator::new();
    let controller = ServiceController::new(
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
    });
    let controller = Arc::new(customize(controller));
    Rig {
        launcher,
        query,
        sink,
        controller,
    }
}

/// Fast watcher timings so debounce scenarios finish in milliseconds
pub fn fast_watch() -> WatchTuning {
    WatchTuning {
        monitor_period: Duration::from_millis(25),
        pending_period: Duration::from_millis(10),
        restart_delay: Duration::from_millis(60),
    }
}

/// Write a zip file with the given `(entry name, content)` pairs
pub fn build_zip(path: &Path, entries: &[(&str, &str)]) {
    let file = File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, content) in entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(content.as_bytes()).unwrap();
    }
    writer.finish().unwrap();
}

/// Poll an async condition until it holds or the suite deadline passes
pub async fn eventually<F, Fut>(mut condition: F, what: &str)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if condition().await {
            return;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
