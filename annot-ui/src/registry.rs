//! Live annotation sessions
//!
//! Each browser session owns one [`AnnotationSession`] behind its own mutex,
//! so events for a session are handled one at a time and run to completion
//! (including any remote flush) before the next one starts. Sessions never
//! share mutable state with each other.
//!
//! A session ends either through an explicit discard or by going idle (the
//! page was closed). In both cases the pending buffer is flushed first and the
//! session is only dropped once that succeeded.

use annot_common::{time, AnnotationSession, FlushOutcome};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Shared handle to one session
pub type SessionHandle = Arc<Mutex<AnnotationSession>>;

struct SessionEntry {
    handle: SessionHandle,
    /// Last request for this session, epoch milliseconds
    last_seen_ms: AtomicI64,
}

impl SessionEntry {
    fn new(handle: SessionHandle, now: DateTime<Utc>) -> Self {
        Self {
            handle,
            last_seen_ms: AtomicI64::new(now.timestamp_millis()),
        }
    }

    fn touch(&self, now: DateTime<Utc>) {
        self.last_seen_ms
            .fetch_max(now.timestamp_millis(), Ordering::Relaxed);
    }

    fn is_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> bool {
        let idle_ms = now.timestamp_millis() - self.last_seen_ms.load(Ordering::Relaxed);
        idle_ms > 0 && idle_ms as u128 > idle_timeout.as_millis()
    }
}

/// Session id → session map
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<HashMap<Uuid, Arc<SessionEntry>>>>,
}

/// Totals from flushing a set of sessions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sessions: usize,
    pub records: usize,
    pub failures: usize,
}

impl SessionRegistry {
    /// Register a session under a new id
    pub async fn insert(&self, session: AnnotationSession) -> (Uuid, SessionHandle) {
        let id = Uuid::new_v4();
        let handle = Arc::new(Mutex::new(session));
        let entry = Arc::new(SessionEntry::new(handle.clone(), time::now()));
        self.sessions.write().await.insert(id, entry);
        info!(session_id = %id, "Session created");
        (id, handle)
    }

    /// Look up a session and mark it as seen
    pub async fn get(&self, id: &Uuid) -> Option<SessionHandle> {
        let sessions = self.sessions.read().await;
        let entry = sessions.get(id)?;
        entry.touch(time::now());
        Some(entry.handle.clone())
    }

    pub async fn remove(&self, id: &Uuid) -> Option<SessionHandle> {
        let removed = self.sessions.write().await.remove(id);
        if removed.is_some() {
            info!(session_id = %id, "Session discarded");
        }
        removed.map(|entry| entry.handle.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Flush and discard sessions with no request for longer than `idle_timeout`
    ///
    /// Sessions whose flush fails stay registered and are retried on the next
    /// sweep. A session that is busy, or was touched while it was being
    /// flushed, is kept.
    pub async fn evict_idle(&self, now: DateTime<Utc>, idle_timeout: Duration) -> FlushReport {
        let idle: Vec<(Uuid, Arc<SessionEntry>)> = self
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, entry)| entry.is_idle(now, idle_timeout))
            .map(|(id, entry)| (*id, entry.clone()))
            .collect();

        let mut report = FlushReport::default();

        for (id, entry) in idle {
            let Ok(mut session) = entry.handle.try_lock() else {
                continue;
            };

            match session.shutdown_flush(now).await {
                Ok(outcome) => {
                    if let FlushOutcome::Flushed(count) = outcome {
                        report.records += count;
                    }
                    let mut sessions = self.sessions.write().await;
                    if entry.is_idle(now, idle_timeout) {
                        sessions.remove(&id);
                        report.sessions += 1;
                        info!(session_id = %id, "Idle session flushed and discarded");
                    } else {
                        debug!(session_id = %id, "Session became active during eviction");
                    }
                }
                Err(e) => {
                    report.failures += 1;
                    warn!(
                        session_id = %id,
                        pending = session.pending().len(),
                        error = %e,
                        "Could not flush idle session; keeping it for the next sweep"
                    );
                }
            }
        }

        report
    }

    /// Flush the pending buffer of every session, e.g. on shutdown
    pub async fn flush_all(&self, now: DateTime<Utc>) -> FlushReport {
        let handles: Vec<(Uuid, SessionHandle)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, entry)| (*id, entry.handle.clone()))
            .collect();

        let mut report = FlushReport {
            sessions: handles.len(),
            ..Default::default()
        };

        for (id, handle) in handles {
            let mut session = handle.lock().await;
            match session.shutdown_flush(now).await {
                Ok(FlushOutcome::Flushed(count)) => report.records += count,
                Ok(_) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(
                        session_id = %id,
                        pending = session.pending().len(),
                        error = %e,
                        "Could not flush session; records remain in the local log only"
                    );
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use annot_common::{
        AnnotationRecord, Error, LocalLog, RemoteLog, RemoteSink, SentenceRecord, SentenceSet,
    };
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use tempfile::TempDir;

    #[derive(Default)]
    struct MemorySink {
        rows: std::sync::Mutex<Vec<AnnotationRecord>>,
        down: AtomicBool,
    }

    #[async_trait]
    impl RemoteSink for MemorySink {
        fn name(&self) -> &'static str {
            "memory"
        }

        async fn append_row(&self, record: &AnnotationRecord) -> annot_common::Result<()> {
            if self.down.load(Ordering::SeqCst) {
                return Err(Error::Flush("503 Service Unavailable".into()));
            }
            self.rows.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    const IDLE: Duration = Duration::from_secs(30 * 60);

    /// Test helper: registry holding one started session with one submitted score
    async fn registry_with_pending_row(
        dir: &TempDir,
        sink: Arc<MemorySink>,
    ) -> (SessionRegistry, Uuid) {
        let local = Arc::new(LocalLog::new(dir.path().join("annotations.csv")));
        local.ensure_initialized().unwrap();
        let sentences = SentenceSet::new(
            (0..3)
                .map(|i| SentenceRecord::new(format!("sentence {}", i), "1"))
                .collect(),
        );
        let remote = RemoteLog::new(sink, Duration::from_secs(120));
        let now = time::now();

        let mut session = AnnotationSession::new(sentences, local, remote, now);
        session.set_annotator("ab");
        session.begin();
        session.submit(6.5, now).await.unwrap();
        assert_eq!(session.pending().len(), 1);

        let registry = SessionRegistry::default();
        let (id, _) = registry.insert(session).await;
        (registry, id)
    }

    #[tokio::test]
    async fn test_idle_session_is_flushed_and_removed() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::default());
        let (registry, id) = registry_with_pending_row(&dir, sink.clone()).await;

        let later = time::now() + chrono::Duration::hours(1);
        let report = registry.evict_idle(later, IDLE).await;

        assert_eq!(report.sessions, 1);
        assert_eq!(report.records, 1);
        assert_eq!(report.failures, 0);
        assert!(registry.get(&id).await.is_none());
        let rows = sink.rows.lock().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text_id, "1_0");
    }

    #[tokio::test]
    async fn test_active_session_is_kept() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::default());
        let (registry, id) = registry_with_pending_row(&dir, sink.clone()).await;

        let report = registry.evict_idle(time::now(), IDLE).await;

        assert_eq!(report, FlushReport::default());
        assert!(registry.get(&id).await.is_some());
        assert!(sink.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_eviction_keeps_session_for_next_sweep() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::default());
        let (registry, id) = registry_with_pending_row(&dir, sink.clone()).await;
        let later = time::now() + chrono::Duration::hours(1);

        sink.down.store(true, Ordering::SeqCst);
        let report = registry.evict_idle(later, IDLE).await;
        assert_eq!(report.failures, 1);
        assert_eq!(registry.len().await, 1);

        sink.down.store(false, Ordering::SeqCst);
        let report = registry.evict_idle(later, IDLE).await;
        assert_eq!(report.sessions, 1);
        assert!(registry.get(&id).await.is_none());
        assert_eq!(sink.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_flush_all_reports_pending_rows() {
        let dir = TempDir::new().unwrap();
        let sink = Arc::new(MemorySink::default());
        let (registry, _) = registry_with_pending_row(&dir, sink.clone()).await;

        let report = registry.flush_all(time::now()).await;

        assert_eq!(report.sessions, 1);
        assert_eq!(report.records, 1);
        assert_eq!(registry.len().await, 1);
    }
}
