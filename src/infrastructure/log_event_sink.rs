//! tracing-backed telemetry adapters

use std::sync::Mutex;
use tracing::{debug, error, info, trace};

use crate::domain::ports::{EventSink, Span, Tracer};
use crate::domain::DomainError;

/// Event sink that lands upstream events in the local tracing stream
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn write_info_event(&self, source: &str, message: &str) {
        info!(source = source, "{}", message);
    }

    fn write_error_event(&self, source: &str, message: &str) {
        error!(source = source, "{}", message);
    }
}

/// Span tracer that mirrors span lifecycle into tracing events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTracer;

impl TracingTracer {
    pub fn new() -> Self {
        Self
    }
}

struct TracingSpan {
    name: String,
    tag: String,
    failed: Mutex<bool>,
}

impl Span for TracingSpan {
    fn append_tag(&self, tag: &str) {
        debug!(span = %self.name, tag = tag, "span tag");
    }

    fn set_error(&self, err: &DomainError) {
        *self.failed.lock().unwrap() = true;
        error!(span = %self.name, tag = %self.tag, error = %err, "span failed");
    }
}

impl Drop for TracingSpan {
    fn drop(&mut self) {
        let failed = *self.failed.lock().unwrap();
        trace!(span = %self.name, tag = %self.tag, failed = failed, "span closed");
    }
}

impl Tracer for TracingTracer {
    fn new_span(&self, name: &str, tag: &str) -> Box<dyn Span> {
        trace!(span = name, tag = tag, "span opened");
        Box::new(TracingSpan {
            name: name.to_string(),
            tag: tag.to_string(),
            failed: Mutex::new(false),
        })
    }
}
