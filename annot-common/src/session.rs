//! Annotation flow controller
//!
//! One [`AnnotationSession`] per browser session. The flow is a small state
//! machine:
//!
//! ```text
//! NotStarted --begin--> InProgress --last submit--> Completed
//! ```
//!
//! Each accepted submission is written to the local log, buffered for the
//! remote log (flushing when the buffer is older than the threshold) and
//! advances the position by exactly one. Completed is terminal; the
//! end-of-session flush runs once and is guarded by the `finalized` tag so
//! that re-entering the state never re-appends data.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::local_log::LocalLog;
use crate::models::{AnnotationRecord, Score, SentenceRecord};
use crate::remote_log::{FlushOutcome, PendingBuffer, RemoteLog};
use crate::sentences::SentenceSet;
use crate::{Error, Result};

/// Flow state of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FlowState {
    /// Waiting for the annotator to press start
    NotStarted,
    /// Sentences left to score
    InProgress,
    /// All sentences scored; `finalized` once the end-of-session flush succeeded
    Completed { finalized: bool },
}

/// Mutable per-session record
#[derive(Debug, Clone)]
pub struct SessionState {
    pub annotator_name: String,
    pub current_position: usize,
    pub pending: PendingBuffer,
}

impl SessionState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            annotator_name: String::new(),
            current_position: 0,
            pending: PendingBuffer::new(now),
        }
    }
}

/// Sentence as presented to the annotator
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SentenceView {
    pub text_id: String,
    pub text: String,
    /// 1-based number for the progress label
    pub number: usize,
}

/// Snapshot of a session for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    #[serde(flatten)]
    pub flow: FlowState,
    pub annotator: String,
    pub position: usize,
    pub total: usize,
    pub sentence: Option<SentenceView>,
    pub pending: usize,
}

/// What happened on an accepted submission
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SubmitOutcome {
    /// Records appended remotely during this submission (threshold or final flush)
    pub flushed: usize,
    /// Non-fatal problems to show the annotator
    pub warnings: Vec<String>,
    /// Whether this submission completed the session
    pub completed: bool,
}

/// Per-session annotation controller
#[derive(Debug)]
pub struct AnnotationSession {
    sentences: SentenceSet,
    local_log: Arc<LocalLog>,
    remote_log: RemoteLog,
    state: SessionState,
    flow: FlowState,
}

impl AnnotationSession {
    pub fn new(
        sentences: SentenceSet,
        local_log: Arc<LocalLog>,
        remote_log: RemoteLog,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            sentences,
            local_log,
            remote_log,
            state: SessionState::new(now),
            flow: FlowState::NotStarted,
        }
    }

    pub fn flow(&self) -> FlowState {
        self.flow
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn position(&self) -> usize {
        self.state.current_position
    }

    pub fn pending(&self) -> &PendingBuffer {
        &self.state.pending
    }

    /// Set the annotator name; surrounding whitespace is dropped
    pub fn set_annotator(&mut self, name: &str) {
        let name = name.trim();
        if name != self.state.annotator_name {
            debug!(annotator = %name, "Annotator name changed");
            self.state.annotator_name = name.to_string();
        }
    }

    /// Leave the start page
    ///
    /// No data is touched. Repeated calls are no-ops.
    pub fn begin(&mut self) {
        if self.flow != FlowState::NotStarted {
            return;
        }
        self.flow = if self.state.current_position >= self.sentences.len() {
            FlowState::Completed { finalized: false }
        } else {
            FlowState::InProgress
        };
        info!(total = self.sentences.len(), "Annotation session started");
    }

    /// Sentence at the current position while in progress
    pub fn current_sentence(&self) -> Option<&SentenceRecord> {
        match self.flow {
            FlowState::InProgress => self.sentences.get(self.state.current_position),
            _ => None,
        }
    }

    pub fn view(&self) -> SessionView {
        let position = self.state.current_position;
        SessionView {
            flow: self.flow,
            annotator: self.state.annotator_name.clone(),
            position,
            total: self.sentences.len(),
            sentence: self.current_sentence().map(|s| SentenceView {
                text_id: s.text_id(position),
                text: s.text.clone(),
                number: position + 1,
            }),
            pending: self.state.pending.len(),
        }
    }

    /// Score the current sentence
    ///
    /// Rejections ([`Error::InvalidState`], [`Error::Validation`]) leave the
    /// session untouched. Local write and remote flush failures are reported
    /// as warnings in the outcome; the record stays buffered and the position
    /// still advances.
    pub async fn submit(&mut self, score: f64, now: DateTime<Utc>) -> Result<SubmitOutcome> {
        if self.flow != FlowState::InProgress {
            return Err(Error::InvalidState(format!(
                "cannot submit a score in state {:?}",
                self.flow
            )));
        }
        if self.state.annotator_name.is_empty() {
            return Err(Error::Validation(
                "Enter your name or initials before saving".to_string(),
            ));
        }
        let score = Score::new(score)?;

        let position = self.state.current_position;
        let sentence = self
            .sentences
            .get(position)
            .ok_or_else(|| Error::Internal(format!("no sentence at position {}", position)))?;
        let record = AnnotationRecord::new(&self.state.annotator_name, sentence, position, score);

        let mut outcome = SubmitOutcome::default();

        if let Err(e) = self.local_log.append(&record) {
            warn!(text_id = %record.text_id, error = %e, "Local log write failed");
            outcome
                .warnings
                .push(format!("Could not write local annotation log: {}", e));
        }

        self.remote_log.buffer(&mut self.state.pending, record);
        match self
            .remote_log
            .flush_if_due(&mut self.state.pending, now)
            .await
        {
            Ok(FlushOutcome::Flushed(count)) => outcome.flushed += count,
            Ok(_) => {}
            Err(e) => outcome
                .warnings
                .push(format!("Could not update remote sheet, will retry: {}", e)),
        }

        self.state.current_position += 1;
        debug!(
            position = self.state.current_position,
            total = self.sentences.len(),
            pending = self.state.pending.len(),
            "Annotation accepted"
        );

        if self.state.current_position >= self.sentences.len() {
            self.flow = FlowState::Completed { finalized: false };
            outcome.completed = true;
            info!(annotator = %self.state.annotator_name, "All sentences annotated");
            match self.finalize(now).await {
                Ok(FlushOutcome::Flushed(count)) => outcome.flushed += count,
                Ok(_) => {}
                Err(e) => outcome
                    .warnings
                    .push(format!("Could not update remote sheet, will retry: {}", e)),
            }
        }

        Ok(outcome)
    }

    /// Guarded end-of-session flush
    ///
    /// Runs only in `Completed { finalized: false }`. Success marks the session
    /// finalized; failure keeps the buffer and leaves it unfinalized so the
    /// next call retries. Anything else is a no-op.
    pub async fn finalize(&mut self, now: DateTime<Utc>) -> Result<FlushOutcome> {
        if self.flow != (FlowState::Completed { finalized: false }) {
            return Ok(FlushOutcome::NotDue);
        }
        let outcome = self
            .remote_log
            .flush_on_session_end(&mut self.state.pending, now)
            .await?;
        self.flow = FlowState::Completed { finalized: true };
        Ok(outcome)
    }

    /// Best-effort flush before the session is discarded, in any state
    pub async fn shutdown_flush(&mut self, now: DateTime<Utc>) -> Result<FlushOutcome> {
        if matches!(self.flow, FlowState::Completed { .. }) {
            return self.finalize(now).await;
        }
        self.remote_log
            .flush_on_session_end(&mut self.state.pending, now)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    use crate::remote_log::RemoteSink;

    #[derive(Default)]
    struct FakeSink {
        batches: Mutex<Vec<Vec<AnnotationRecord>>>,
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl RemoteSink for FakeSink {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn append_row(&self, record: &AnnotationRecord) -> Result<()> {
            self.append_rows(std::slice::from_ref(record)).await
        }

        async fn append_rows(&self, records: &[AnnotationRecord]) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(Error::Flush("503 Service Unavailable".into()));
            }
            self.batches.lock().unwrap().push(records.to_vec());
            Ok(())
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        sink: Arc<FakeSink>,
        local: Arc<LocalLog>,
        session: AnnotationSession,
    }

    fn fixture(count: usize) -> Fixture {
        let dir = TempDir::new().unwrap();
        let local = Arc::new(LocalLog::new(dir.path().join("annotations.csv")));
        local.ensure_initialized().unwrap();
        let sink = Arc::new(FakeSink::default());
        let sentences = SentenceSet::new(
            (0..count)
                .map(|i| SentenceRecord::new(format!("sentence {}", i), "7"))
                .collect(),
        );
        let remote = RemoteLog::new(sink.clone(), Duration::from_secs(120));
        let session = AnnotationSession::new(sentences, local.clone(), remote, at(0));
        Fixture {
            _dir: dir,
            sink,
            local,
            session,
        }
    }

    #[test]
    fn test_new_session_defaults() {
        let fx = fixture(3);
        assert_eq!(fx.session.flow(), FlowState::NotStarted);
        assert_eq!(fx.session.position(), 0);
        assert!(fx.session.state().annotator_name.is_empty());
        assert!(fx.session.pending().is_empty());
        assert!(fx.session.current_sentence().is_none());
    }

    #[test]
    fn test_begin_is_idempotent() {
        let mut fx = fixture(3);
        fx.session.begin();
        fx.session.begin();
        assert_eq!(fx.session.flow(), FlowState::InProgress);
        assert_eq!(fx.session.current_sentence().unwrap().text, "sentence 0");
    }

    #[tokio::test]
    async fn test_submit_before_begin_is_rejected() {
        let mut fx = fixture(3);
        fx.session.set_annotator("ab");

        let err = fx.session.submit(5.0, at(0)).await.unwrap_err();

        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(fx.session.position(), 0);
    }

    #[tokio::test]
    async fn test_empty_annotator_is_rejected() {
        let mut fx = fixture(3);
        fx.session.set_annotator("   ");
        fx.session.begin();

        let err = fx.session.submit(5.0, at(0)).await.unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(fx.session.position(), 0);
        assert!(fx.session.pending().is_empty());
        assert!(fx.local.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_out_of_range_score_is_rejected() {
        let mut fx = fixture(3);
        fx.session.set_annotator("ab");
        fx.session.begin();

        let err = fx.session.submit(10.5, at(0)).await.unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(fx.session.position(), 0);
        assert!(fx.local.read_all().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_submissions_within_threshold_flush_once_at_end() {
        let mut fx = fixture(3);
        fx.session.set_annotator("ab");
        fx.session.begin();

        for (t, score) in [(0, 1.0), (1, 5.5), (2, 9.0)] {
            fx.session.submit(score, at(t)).await.unwrap();
            if t < 2 {
                assert_eq!(fx.sink.calls.load(Ordering::SeqCst), 0);
            }
        }

        assert_eq!(fx.session.flow(), FlowState::Completed { finalized: true });
        assert_eq!(fx.sink.calls.load(Ordering::SeqCst), 1);
        let batches = fx.sink.batches.lock().unwrap();
        let ids: Vec<&str> = batches[0].iter().map(|r| r.text_id.as_str()).collect();
        assert_eq!(ids, vec!["7_0", "7_1", "7_2"]);
        assert!(fx.session.pending().is_empty());
    }

    #[tokio::test]
    async fn test_pending_grows_without_flush() {
        let mut fx = fixture(10);
        fx.session.set_annotator("ab");
        fx.session.begin();

        for k in 0..4 {
            fx.session.submit(5.0, at(k)).await.unwrap();
        }

        assert_eq!(fx.session.pending().len(), 4);
        assert_eq!(fx.session.position(), 4);
        assert_eq!(fx.local.read_all().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_threshold_flush_during_progress() {
        let mut fx = fixture(10);
        fx.session.set_annotator("ab");
        fx.session.begin();

        fx.session.submit(5.0, at(0)).await.unwrap();
        let outcome = fx.session.submit(6.0, at(121)).await.unwrap();

        assert_eq!(outcome.flushed, 2);
        assert!(fx.session.pending().is_empty());
        assert_eq!(fx.session.pending().opened_at(), at(121));
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried_with_new_records() {
        let mut fx = fixture(10);
        fx.session.set_annotator("ab");
        fx.session.begin();
        fx.sink.failing.store(true, Ordering::SeqCst);

        let outcome = fx.session.submit(4.0, at(125)).await.unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(fx.session.pending().len(), 1);
        assert_eq!(fx.session.position(), 1);
        assert_eq!(fx.local.read_all().unwrap().len(), 1);

        fx.sink.failing.store(false, Ordering::SeqCst);
        let outcome = fx.session.submit(8.0, at(250)).await.unwrap();

        assert_eq!(outcome.flushed, 2);
        assert!(outcome.warnings.is_empty());
        let batches = fx.sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].text_id, "7_0");
        assert_eq!(batches[0][1].text_id, "7_1");
    }

    #[tokio::test]
    async fn test_local_write_failure_does_not_block_flow() {
        let mut fx = fixture(2);
        std::fs::remove_file(fx.local.path()).unwrap();
        std::fs::create_dir(fx.local.path()).unwrap();
        fx.session.set_annotator("ab");
        fx.session.begin();

        let outcome = fx.session.submit(3.5, at(0)).await.unwrap();

        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(fx.session.position(), 1);
        assert_eq!(fx.session.pending().len(), 1);
    }

    #[tokio::test]
    async fn test_finalize_never_reappends() {
        let mut fx = fixture(1);
        fx.session.set_annotator("ab");
        fx.session.begin();
        fx.session.submit(5.0, at(0)).await.unwrap();

        for t in 1..4 {
            assert_eq!(fx.session.finalize(at(t)).await.unwrap(), FlushOutcome::NotDue);
        }

        assert_eq!(fx.sink.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_final_flush_is_retried_on_reentry() {
        let mut fx = fixture(1);
        fx.session.set_annotator("ab");
        fx.session.begin();
        fx.sink.failing.store(true, Ordering::SeqCst);

        let outcome = fx.session.submit(5.0, at(0)).await.unwrap();
        assert!(outcome.completed);
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(fx.session.flow(), FlowState::Completed { finalized: false });

        fx.sink.failing.store(false, Ordering::SeqCst);
        let retried = fx.session.finalize(at(5)).await.unwrap();

        assert_eq!(retried, FlushOutcome::Flushed(1));
        assert_eq!(fx.session.flow(), FlowState::Completed { finalized: true });
    }

    #[tokio::test]
    async fn test_submit_after_completion_is_rejected() {
        let mut fx = fixture(1);
        fx.session.set_annotator("ab");
        fx.session.begin();
        fx.session.submit(5.0, at(0)).await.unwrap();

        let err = fx.session.submit(5.0, at(1)).await.unwrap_err();

        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(fx.session.position(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_flush_mid_session() {
        let mut fx = fixture(5);
        fx.session.set_annotator("ab");
        fx.session.begin();
        fx.session.submit(5.0, at(0)).await.unwrap();

        let outcome = fx.session.shutdown_flush(at(1)).await.unwrap();

        assert_eq!(outcome, FlushOutcome::Flushed(1));
        assert_eq!(fx.session.flow(), FlowState::InProgress);
    }

    #[test]
    fn test_view_progress() {
        let mut fx = fixture(3);
        fx.session.set_annotator(" ab ");
        fx.session.begin();

        let view = fx.session.view();

        assert_eq!(view.annotator, "ab");
        assert_eq!(view.total, 3);
        let sentence = view.sentence.unwrap();
        assert_eq!(sentence.number, 1);
        assert_eq!(sentence.text_id, "7_0");
    }
}
