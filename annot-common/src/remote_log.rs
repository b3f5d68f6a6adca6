//! Buffered remote annotation log
//!
//! Annotations are collected in a per-session [`PendingBuffer`] and written to
//! the remote sink in batches. A batch is sent when the buffer has been open
//! longer than the configured threshold (checked on every submission, there is
//! no background timer) and unconditionally when the session ends.
//!
//! Flushes are all-or-nothing at buffer granularity: on failure the buffer and
//! its timestamp are left exactly as they were, so the next check retries the
//! same records plus anything added since.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::models::AnnotationRecord;
use crate::{time, Error, Result};

/// Default buffer age after which a flush is due
pub const DEFAULT_FLUSH_THRESHOLD: Duration = Duration::from_secs(120);

/// Append-only remote destination for annotation rows
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// Sink name for logging
    fn name(&self) -> &'static str;

    /// Append a single row `(annotator, text_id, text, sentiment_score)`
    async fn append_row(&self, record: &AnnotationRecord) -> Result<()>;

    /// Append rows in order
    ///
    /// The default sends one `append_row` per record and stops at the first
    /// failure. Sinks with a batch endpoint override this with one request.
    async fn append_rows(&self, records: &[AnnotationRecord]) -> Result<()> {
        for record in records {
            self.append_row(record).await?;
        }
        Ok(())
    }
}

/// Records not yet written to the remote sink
#[derive(Debug, Clone, PartialEq)]
pub struct PendingBuffer {
    records: Vec<AnnotationRecord>,
    opened_at: DateTime<Utc>,
}

impl PendingBuffer {
    pub fn new(opened_at: DateTime<Utc>) -> Self {
        Self {
            records: Vec::new(),
            opened_at,
        }
    }

    pub fn records(&self) -> &[AnnotationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }
}

/// Result of a flush attempt that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Threshold not exceeded (or nothing buffered); sink not contacted
    NotDue,
    /// Buffer was empty; sink not contacted
    Empty,
    /// This many records were appended remotely and dropped from the buffer
    Flushed(usize),
}

/// Write-back policy in front of a [`RemoteSink`]
#[derive(Clone)]
pub struct RemoteLog {
    sink: Arc<dyn RemoteSink>,
    threshold: Duration,
}

impl RemoteLog {
    pub fn new(sink: Arc<dyn RemoteSink>, threshold: Duration) -> Self {
        Self { sink, threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    pub fn sink_name(&self) -> &'static str {
        self.sink.name()
    }

    /// Queue a record for the next flush
    pub fn buffer(&self, pending: &mut PendingBuffer, record: AnnotationRecord) {
        debug!(text_id = %record.text_id, pending = pending.len() + 1, "Buffered annotation");
        pending.records.push(record);
    }

    /// Whether the buffer is non-empty and older than the threshold
    pub fn is_due(&self, pending: &PendingBuffer, now: DateTime<Utc>) -> bool {
        !pending.is_empty() && time::exceeds(pending.opened_at, now, self.threshold)
    }

    /// Flush only when [`RemoteLog::is_due`]
    pub async fn flush_if_due(
        &self,
        pending: &mut PendingBuffer,
        now: DateTime<Utc>,
    ) -> Result<FlushOutcome> {
        if !self.is_due(pending, now) {
            return Ok(FlushOutcome::NotDue);
        }
        self.flush(pending, now).await
    }

    /// Append every buffered record remotely, in insertion order
    pub async fn flush(
        &self,
        pending: &mut PendingBuffer,
        now: DateTime<Utc>,
    ) -> Result<FlushOutcome> {
        if pending.is_empty() {
            return Ok(FlushOutcome::Empty);
        }

        let count = pending.len();
        match self.sink.append_rows(&pending.records).await {
            Ok(()) => {
                pending.records.clear();
                pending.opened_at = now;
                info!(sink = self.sink.name(), count, "Flushed annotations to remote log");
                Ok(FlushOutcome::Flushed(count))
            }
            Err(e) => {
                warn!(
                    sink = self.sink.name(),
                    pending = count,
                    error = %e,
                    "Remote flush failed, keeping buffered annotations"
                );
                Err(match e {
                    Error::Flush(_) => e,
                    other => Error::Flush(other.to_string()),
                })
            }
        }
    }

    /// Final flush when the session runs out of sentences, regardless of age
    pub async fn flush_on_session_end(
        &self,
        pending: &mut PendingBuffer,
        now: DateTime<Utc>,
    ) -> Result<FlushOutcome> {
        debug!(pending = pending.len(), "End-of-session flush");
        self.flush(pending, now).await
    }
}

impl std::fmt::Debug for RemoteLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteLog")
            .field("sink", &self.sink.name())
            .field("threshold", &self.threshold)
            .finish()
    }
}
