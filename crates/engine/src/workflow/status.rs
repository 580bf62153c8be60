//! Fire-and-forget progress notifications.

use tracing::{error, info, warn};

/// Severity of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warn,
    Error,
}

/// Receives status lines while a run progresses. Must not block.
pub trait StatusReporter: Send + Sync {
    fn notify(&self, text: &str, level: StatusLevel);
}

/// Emits status lines as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusReporter;

impl StatusReporter for TracingStatusReporter {
    fn notify(&self, text: &str, level: StatusLevel) {
        match level {
            StatusLevel::Info => info!(status = %text, "workflow status"),
            StatusLevel::Warn => warn!(status = %text, "workflow status"),
            StatusLevel::Error => error!(status = %text, "workflow status"),
        }
    }
}
