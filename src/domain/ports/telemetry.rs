//! Telemetry ports
//! Upstream event sink, performance reporter and span tracer

use crate::constants::events::ERROR_MARKERS;
use crate::domain::{AppMetrics, DomainError};

/// Upstream event log.
///
/// `write_log` keeps the historical routing contract: messages carrying an
/// error marker go to the error stream, everything else to info.
pub trait EventSink: Send + Sync {
    fn write_info_event(&self, source: &str, message: &str);
    fn write_error_event(&self, source: &str, message: &str);

    fn write_log(&self, source: &str, message: &str) {
        if ERROR_MARKERS.iter().any(|m| message.contains(m)) {
            self.write_error_event(source, message);
        } else {
            self.write_info_event(source, message);
        }
    }
}

/// Upstream process-metrics reporter, invoked off the check path
pub trait PerfReporter: Send + Sync {
    fn report_app_ping(&self, metrics: AppMetrics);
}

/// One traced operation. Dropped at scope end on every exit path, so span
/// release needs no explicit bookkeeping in the controller.
pub trait Span: Send {
    fn append_tag(&self, tag: &str);
    fn set_error(&self, error: &DomainError);
}

/// Hierarchical span factory wrapping start, stop, check, take-over and
/// file-change handling
pub trait Tracer: Send + Sync {
    fn new_span(&self, name: &str, tag: &str) -> Box<dyn Span>;
}

/// Tracer that records nothing; the default when no tracing backend is wired
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

struct NoopSpan;

impl Span for NoopSpan {
    fn append_tag(&self, _tag: &str) {}
    fn set_error(&self, _error: &DomainError) {}
}

impl Tracer for NoopTracer {
    fn new_span(&self, _name: &str, _tag: &str) -> Box<dyn Span> {
        Box::new(NoopSpan)
    }
}
