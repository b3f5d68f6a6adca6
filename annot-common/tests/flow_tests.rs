//! End-to-end tests for the annotation flow
//!
//! Tests cover:
//! - Sentence file → session → local log row count and text_id format
//! - Remote write-back batching across a whole session
//! - Retry of a failed remote flush at the next threshold check
//! - Rejected submissions leave no trace in either log

use annot_common::{
    AnnotationRecord, AnnotationSession, Error, FlowState, LocalLog, RemoteLog, RemoteSink,
    SentenceSet,
};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// Test helper: remote sink that records each batch it receives
#[derive(Default)]
struct SheetDouble {
    batches: Mutex<Vec<Vec<AnnotationRecord>>>,
    down: AtomicBool,
}

impl SheetDouble {
    fn rows(&self) -> Vec<AnnotationRecord> {
        self.batches.lock().unwrap().concat()
    }

    fn batch_count(&self) -> usize {
        self.batches.lock().unwrap().len()
    }
}

#[async_trait]
impl RemoteSink for SheetDouble {
    fn name(&self) -> &'static str {
        "sheet-double"
    }

    async fn append_row(&self, record: &AnnotationRecord) -> annot_common::Result<()> {
        self.append_rows(std::slice::from_ref(record)).await
    }

    async fn append_rows(&self, records: &[AnnotationRecord]) -> annot_common::Result<()> {
        if self.down.load(Ordering::SeqCst) {
            return Err(Error::Flush("429 Too Many Requests".into()));
        }
        self.batches.lock().unwrap().push(records.to_vec());
        Ok(())
    }
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_760_000_000 + secs, 0).unwrap()
}

/// Test helper: write a sentence file and build a session around it
fn setup(dir: &TempDir, csv: &str) -> (Arc<SheetDouble>, Arc<LocalLog>, AnnotationSession) {
    let sentence_path = dir.path().join("sentences.csv");
    std::fs::write(&sentence_path, csv).unwrap();
    let sentences = SentenceSet::load(&sentence_path).expect("Should load sentences");

    let local = Arc::new(LocalLog::new(dir.path().join("out").join("annotations.csv")));
    local.ensure_initialized().unwrap();

    let sheet = Arc::new(SheetDouble::default());
    let remote = RemoteLog::new(sheet.clone(), Duration::from_secs(120));
    let session = AnnotationSession::new(sentences, local.clone(), remote, at(0));
    (sheet, local, session)
}

#[tokio::test]
async fn test_full_session_writes_every_row() {
    let dir = TempDir::new().unwrap();
    let (sheet, local, mut session) = setup(
        &dir,
        "Han smilede.,101\nHun græd.,101\nDet var koldt.,102\nAlt gik godt.,103\n",
    );

    session.set_annotator("mk");
    session.begin();
    for (i, score) in [7.0, 2.0, 4.5, 9.5].into_iter().enumerate() {
        session.submit(score, at(i as i64 * 10)).await.unwrap();
    }

    let rows = local.read_all().unwrap();
    let ids: Vec<&str> = rows.iter().map(|r| r.text_id.as_str()).collect();
    assert_eq!(ids, vec!["101_0", "101_1", "102_2", "103_3"]);
    assert!(rows.iter().all(|r| r.annotator == "mk"));
    assert_eq!(rows[2].sentiment_score.value(), 4.5);

    assert_eq!(session.flow(), FlowState::Completed { finalized: true });
    assert_eq!(sheet.batch_count(), 1);
    assert_eq!(sheet.rows(), rows);
}

#[tokio::test]
async fn test_three_quick_submissions_flush_once() {
    let dir = TempDir::new().unwrap();
    let (sheet, _local, mut session) = setup(&dir, "a,1\nb,1\nc,1\n");
    session.set_annotator("ab");
    session.begin();

    session.submit(1.0, at(0)).await.unwrap();
    session.submit(2.0, at(1)).await.unwrap();
    assert_eq!(sheet.batch_count(), 0);
    assert_eq!(session.pending().len(), 2);

    let outcome = session.submit(3.0, at(2)).await.unwrap();

    assert!(outcome.completed);
    assert_eq!(outcome.flushed, 3);
    assert_eq!(sheet.batch_count(), 1);
    let scores: Vec<f64> = sheet.rows().iter().map(|r| r.sentiment_score.value()).collect();
    assert_eq!(scores, vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn test_outage_retried_at_next_threshold() {
    let dir = TempDir::new().unwrap();
    let (sheet, local, mut session) = setup(&dir, "a,1\nb,1\nc,1\nd,1\n");
    session.set_annotator("ab");
    session.begin();

    sheet.down.store(true, Ordering::SeqCst);
    let outcome = session.submit(5.0, at(125)).await.unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    assert_eq!(session.pending().len(), 1);
    assert_eq!(local.read_all().unwrap().len(), 1);

    sheet.down.store(false, Ordering::SeqCst);
    let outcome = session.submit(6.0, at(250)).await.unwrap();

    assert_eq!(outcome.flushed, 2);
    assert!(session.pending().is_empty());
    let ids: Vec<String> = sheet.rows().into_iter().map(|r| r.text_id).collect();
    assert_eq!(ids, vec!["1_0", "1_1"]);
}

#[tokio::test]
async fn test_rejected_submissions_change_nothing() {
    let dir = TempDir::new().unwrap();
    let (sheet, local, mut session) = setup(&dir, "a,1\nb,1\n");
    session.begin();

    assert!(matches!(
        session.submit(5.0, at(0)).await,
        Err(Error::Validation(_))
    ));

    session.set_annotator("ab");
    for bad in [10.5, -1.0, 4.25, f64::NAN] {
        assert!(matches!(
            session.submit(bad, at(0)).await,
            Err(Error::Validation(_))
        ));
    }

    assert_eq!(session.position(), 0);
    assert!(session.pending().is_empty());
    assert!(local.read_all().unwrap().is_empty());
    assert_eq!(sheet.batch_count(), 0);
}

#[tokio::test]
async fn test_two_annotators_same_sentence_produce_two_rows() {
    let dir = TempDir::new().unwrap();
    let (sheet, local, mut first) = setup(&dir, "Eneste sætning.,9\n");

    let sentences = SentenceSet::load(&dir.path().join("sentences.csv")).unwrap();
    let remote = RemoteLog::new(sheet.clone(), Duration::from_secs(120));
    let mut second = AnnotationSession::new(sentences, local.clone(), remote, at(0));

    first.set_annotator("ab");
    first.begin();
    first.submit(3.0, at(1)).await.unwrap();

    second.set_annotator("cd");
    second.begin();
    second.submit(8.0, at(2)).await.unwrap();

    let rows = local.read_all().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].text_id, rows[1].text_id);
    assert_eq!(rows[0].annotator, "ab");
    assert_eq!(rows[1].annotator, "cd");
    assert_eq!(sheet.rows().len(), 2);
}

#[test]
fn test_empty_sentence_file_cannot_start() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("sentences.csv");
    std::fs::write(&path, "").unwrap();

    let err = SentenceSet::load(&path).unwrap_err();
    assert!(matches!(err, Error::Load(_)));
    assert!(!err.is_recoverable());
}
