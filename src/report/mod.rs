//! Diagnostic sinks for the engine: `warning` carries diff reports and is
//! counted against the report cap, `trace` carries verbose flow.

pub trait Emitter {
    fn warning(&mut self, message: &str);
    fn trace(&mut self, message: &str);

    /// Whether trace messages are worth formatting at all.
    fn trace_enabled(&self) -> bool {
        false
    }
}

/// Default emitter forwarding to the `log` facade.
#[derive(Debug, Default)]
pub struct LogEmitter;

impl Emitter for LogEmitter {
    fn warning(&mut self, message: &str) {
        log::warn!("{message}");
    }

    fn trace(&mut self, message: &str) {
        log::trace!("{message}");
    }

    fn trace_enabled(&self) -> bool {
        log::log_enabled!(log::Level::Trace)
    }
}

/// Emitter capturing everything, for tests and embedders that render
/// diagnostics themselves.
#[derive(Debug, Default)]
pub struct BufferedEmitter {
    pub warnings: Vec<String>,
    pub traces: Vec<String>,
}

impl BufferedEmitter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Emitter for BufferedEmitter {
    fn warning(&mut self, message: &str) {
        self.warnings.push(message.to_string());
    }

    fn trace(&mut self, message: &str) {
        self.traces.push(message.to_string());
    }

    fn trace_enabled(&self) -> bool {
        true
    }
}

/// One-shot header preceding the first reported diff of a run.
pub fn diff_header(lhs_name: &str, rhs_name: &str, test_id: Option<&str>) -> String {
    match test_id {
        Some(test_id) => format!("(*) files '{lhs_name}'|'{rhs_name}' from '{test_id}' differ"),
        None => format!("(*) files '{lhs_name}'|'{rhs_name}' differ"),
    }
}
