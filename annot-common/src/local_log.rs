//! Local durable annotation log
//!
//! Append-only CSV file with header `annotator,text_id,text,sentiment_score`.
//! Every committed annotation is written synchronously and synced to storage
//! before [`LocalLog::append`] returns.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::models::AnnotationRecord;
use crate::{Error, Result};

/// Column header of the annotation log
pub const HEADER: [&str; 4] = ["annotator", "text_id", "text", "sentiment_score"];

/// Append-only annotation log on the local file system
#[derive(Debug)]
pub struct LocalLog {
    path: PathBuf,
    // Serializes appends from concurrent sessions
    write_lock: Mutex<()>,
}

impl LocalLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create the log with its header if it does not exist yet
    ///
    /// Idempotent: an existing file is left untouched.
    pub fn ensure_initialized(&self) -> Result<()> {
        if self.path.exists() {
            debug!(path = %self.path.display(), "Annotation log already exists");
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);
        writer
            .write_record(HEADER)
            .map_err(|e| Error::Write(e.to_string()))?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::Write(e.to_string()))?;
        file.sync_all()?;

        info!(path = %self.path.display(), "Created annotation log");
        Ok(())
    }

    /// Append one record; durable on return
    pub fn append(&self, record: &AnnotationRecord) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| Error::Write("annotation log lock poisoned".to_string()))?;

        let file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| Error::Write(format!("{}: {}", self.path.display(), e)))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        writer
            .serialize(record)
            .map_err(|e| Error::Write(format!("{}: {}", self.path.display(), e)))?;
        let file = writer
            .into_inner()
            .map_err(|e| Error::Write(format!("{}: {}", self.path.display(), e)))?;
        file.sync_all()
            .map_err(|e| Error::Write(format!("{}: {}", self.path.display(), e)))?;

        debug!(text_id = %record.text_id, annotator = %record.annotator, "Appended to local log");
        Ok(())
    }

    /// Read every record currently in the log
    pub fn read_all(&self) -> Result<Vec<AnnotationRecord>> {
        let mut reader = csv::Reader::from_path(&self.path)
            .map_err(|e| Error::NotFound(format!("{}: {}", self.path.display(), e)))?;

        reader
            .deserialize()
            .collect::<std::result::Result<Vec<AnnotationRecord>, _>>()
            .map_err(|e| Error::Internal(format!("{}: {}", self.path.display(), e)))
    }
}
