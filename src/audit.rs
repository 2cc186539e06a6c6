//! AdminAudit & Logs (C12): a bounded in-memory ring buffer of recent log
//! lines for the `/logs` SSE tail, fed by a `log::Log` shim that forwards
//! every record to the terminal logger and to `EventBus` as `LogEntry`.
//!
//! Ring buffer shape grounded on engine/http.rs's `RequestAuditLog`
//! (Vec + wraparound write index + newest-first read), generalized from
//! "outbound request entries" to "every emitted log record".

use crate::atoms::constants::LOG_RING_BUFFER_CAPACITY;
use crate::events::{EventBus, SignetEvent};
use chrono::{DateTime, Utc};
use log::{Level, Log, Metadata, Record};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

struct LogRing {
    entries: Vec<LogLine>,
    head: usize,
    total: u64,
}

impl LogRing {
    fn new(capacity: usize) -> Self {
        LogRing { entries: Vec::with_capacity(capacity), head: 0, total: 0 }
    }

    fn push(&mut self, line: LogLine) {
        let capacity = self.entries.capacity().max(1);
        if self.entries.len() < capacity {
            self.entries.push(line);
        } else {
            self.entries[self.head] = line;
            self.head = (self.head + 1) % capacity;
        }
        self.total += 1;
    }

    /// Newest-first, walking back from the most recently written slot.
    fn recent(&self, limit: usize) -> Vec<LogLine> {
        let len = self.entries.len();
        if len == 0 {
            return Vec::new();
        }
        let capacity = self.entries.capacity().max(1);
        let last_written = if self.entries.len() < capacity {
            len - 1
        } else {
            (self.head + capacity - 1) % capacity
        };
        let mut out = Vec::with_capacity(limit.min(len));
        let mut idx = last_written;
        for _ in 0..len.min(limit) {
            out.push(self.entries[idx].clone());
            idx = if idx == 0 { capacity - 1 } else { idx - 1 };
        }
        out
    }
}

/// The in-process log tail plus the EventBus hookup that pushes every
/// record onto `/events` as it is emitted.
pub struct AuditLog {
    ring: Mutex<LogRing>,
    bus: Arc<EventBus>,
}

impl AuditLog {
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        Arc::new(AuditLog { ring: Mutex::new(LogRing::new(LOG_RING_BUFFER_CAPACITY)), bus })
    }

    pub fn record(&self, level: Level, target: &str, message: String) {
        let line = LogLine { timestamp: Utc::now(), level: level.to_string(), target: target.to_string(), message };
        self.bus.publish(SignetEvent::LogEntry { level: line.level.clone(), message: line.message.clone() });
        self.ring.lock().push(line);
    }

    pub fn recent(&self, limit: usize) -> Vec<LogLine> {
        self.ring.lock().recent(limit)
    }

    pub fn total(&self) -> u64 {
        self.ring.lock().total
    }
}

/// A `log::Log` implementation that delegates formatting/filtering to an
/// inner logger (normally `env_logger`'s) and mirrors every record into
/// an `AuditLog`. Installed once at startup via `init`.
pub struct TeeLogger<L: Log> {
    inner: L,
    audit: Arc<AuditLog>,
}

impl<L: Log> TeeLogger<L> {
    pub fn new(inner: L, audit: Arc<AuditLog>) -> Self {
        TeeLogger { inner, audit }
    }
}

impl<L: Log> Log for TeeLogger<L> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        self.audit.record(record.level(), record.target(), record.args().to_string());
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Installs a `TeeLogger` wrapping a freshly built `env_logger` as the
/// global logger. Must be called at most once, before any other thread
/// starts logging.
pub fn init(audit: Arc<AuditLog>) {
    let inner = env_logger::Builder::from_default_env().build();
    let level = inner.filter();
    let tee = TeeLogger::new(inner, audit);
    if log::set_boxed_logger(Box::new(tee)).is_ok() {
        log::set_max_level(level);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_wraps_and_keeps_newest_first() {
        let mut ring = LogRing::new(3);
        for i in 0..5 {
            ring.push(LogLine { timestamp: Utc::now(), level: "INFO".into(), target: "t".into(), message: i.to_string() });
        }
        let recent = ring.recent(3);
        assert_eq!(recent.iter().map(|l| l.message.clone()).collect::<Vec<_>>(), vec!["4", "3", "2"]);
        assert_eq!(ring.total, 5);
    }

    #[test]
    fn recent_limit_smaller_than_len() {
        let mut ring = LogRing::new(10);
        for i in 0..4 {
            ring.push(LogLine { timestamp: Utc::now(), level: "INFO".into(), target: "t".into(), message: i.to_string() });
        }
        let recent = ring.recent(2);
        assert_eq!(recent.iter().map(|l| l.message.clone()).collect::<Vec<_>>(), vec!["3", "2"]);
    }

    #[tokio::test]
    async fn record_publishes_to_event_bus() {
        let bus = Arc::new(EventBus::new());
        let mut rx = bus.subscribe();
        let audit = AuditLog::new(bus);
        audit.record(Level::Warn, "signet::test", "disk almost full".to_string());
        match rx.recv().await.unwrap() {
            SignetEvent::LogEntry { level, message } => {
                assert_eq!(level, "WARN");
                assert_eq!(message, "disk almost full");
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(audit.total(), 1);
        assert_eq!(audit.recent(10).len(), 1);
    }
}
