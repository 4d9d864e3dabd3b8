use std::collections::{BTreeMap, VecDeque};
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Fixed capacity of the log ring; the newest entry overwrites the oldest.
const RING_SIZE: usize = 20;

/// Syslog-compatible severities carried by status entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Notice,
    Info,
}

impl Severity {
    /// Numeric syslog priority, as exposed on the status API.
    pub fn code(self) -> u8 {
        match self {
            Severity::Error => 3,
            Severity::Notice => 5,
            Severity::Info => 6,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusEntry {
    pub epoch: i64,
    pub code: u8,
    pub msg: String,
}

impl StatusEntry {
    fn new(severity: Severity, msg: String) -> Self {
        let epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();

        Self {
            epoch,
            code: severity.code(),
            msg,
        }
    }
}

#[derive(Default)]
struct Inner {
    ring: VecDeque<StatusEntry>,
    notifications: BTreeMap<u64, StatusEntry>,
    next_notification: u64,
}

/// Bounded log ring plus the set of live notifications.
///
/// Every mutation goes through one mutex, so the recorded order matches the
/// call order of `log`/`error`/`notify` across threads.
#[derive(Default)]
pub struct StatusLog {
    inner: Mutex<Inner>,
}

impl StatusLog {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn log(&self, severity: Severity, msg: impl Into<String>) {
        let msg = msg.into();

        match severity {
            Severity::Error => tracing::error!("{msg}"),
            Severity::Notice | Severity::Info => tracing::info!("{msg}"),
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.ring.len() == RING_SIZE {
            inner.ring.pop_front();
        }
        inner.ring.push_back(StatusEntry::new(severity, msg));
    }

    pub fn error(&self, err: &dyn Display) {
        self.log(Severity::Error, err.to_string());
    }

    /// Register a live notification; it stays visible until removed.
    pub fn notify(&self, severity: Severity, msg: impl Into<String>) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        inner.next_notification += 1;
        let n = inner.next_notification;
        inner
            .notifications
            .insert(n, StatusEntry::new(severity, msg.into()));

        n
    }

    pub fn remove(&self, n: u64) {
        self.inner.lock().unwrap().notifications.remove(&n);
    }

    /// Log ring in chronological order.
    pub fn entries(&self) -> Vec<StatusEntry> {
        self.inner.lock().unwrap().ring.iter().cloned().collect()
    }

    /// Live notifications in key (creation) order.
    pub fn notifications(&self) -> Vec<StatusEntry> {
        self.inner
            .lock()
            .unwrap()
            .notifications
            .values()
            .cloned()
            .collect()
    }
}

/// RAII notification: removed from the live set when dropped, so background
/// tasks cannot leak progress entries on early returns.
pub struct Notification {
    status: Arc<StatusLog>,
    n: u64,
}

impl Notification {
    pub fn new(status: Arc<StatusLog>, severity: Severity, msg: impl Into<String>) -> Self {
        let n = status.notify(severity, msg);
        Self { status, n }
    }
}

impl Drop for Notification {
    fn drop(&mut self) {
        self.status.remove(self.n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_keeps_last_20_in_order() {
        let status = StatusLog::new();

        for i in 0..25 {
            status.log(Severity::Info, format!("entry {i}"));
        }

        let entries = status.entries();
        assert_eq!(entries.len(), 20);
        assert_eq!(entries[0].msg, "entry 5");
        assert_eq!(entries[19].msg, "entry 24");
    }

    #[test]
    fn test_notifications_ordered_by_key() {
        let status = StatusLog::new();

        let a = status.notify(Severity::Notice, "first");
        let _b = status.notify(Severity::Notice, "second");
        let _c = status.notify(Severity::Notice, "third");

        let live: Vec<_> = status.notifications().into_iter().map(|e| e.msg).collect();
        assert_eq!(live, vec!["first", "second", "third"]);

        status.remove(a);
        let live: Vec<_> = status.notifications().into_iter().map(|e| e.msg).collect();
        assert_eq!(live, vec!["second", "third"]);
    }

    #[test]
    fn test_notification_guard_removes_on_drop() {
        let status = StatusLog::new();

        {
            let _n = Notification::new(status.clone(), Severity::Info, "working");
            assert_eq!(status.notifications().len(), 1);
        }

        assert!(status.notifications().is_empty());
    }

    #[test]
    fn test_severity_codes_match_syslog() {
        assert_eq!(Severity::Error.code(), 3);
        assert_eq!(Severity::Notice.code(), 5);
        assert_eq!(Severity::Info.code(), 6);
    }
}
