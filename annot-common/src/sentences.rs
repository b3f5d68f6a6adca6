//! Sentence source
//!
//! Loads the ordered sentence sequence once at startup. The input is a CSV
//! file without a header row and exactly two fields per row: sentence text
//! and group identifier. A sentence's position in the file (0-based) is its
//! stable identity and is used to build `text_id`.

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::SentenceRecord;
use crate::{Error, Result};

/// Load sentences from a headerless two-column CSV file
///
/// Fails with [`Error::Load`] if the file is missing or unreadable, a row is
/// malformed, or the file holds no rows.
pub fn load(path: &Path) -> Result<Vec<SentenceRecord>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| Error::Load(format!("Cannot open {}: {}", path.display(), e)))?;

    let mut sentences = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result.map_err(|e| {
            Error::Load(format!("{}: row {}: {}", path.display(), row + 1, e))
        })?;

        if record.len() != 2 {
            return Err(Error::Load(format!(
                "{}: row {}: expected 2 fields (text, group id), found {}",
                path.display(),
                row + 1,
                record.len()
            )));
        }

        sentences.push(SentenceRecord::new(&record[0], record[1].trim()));
    }

    if sentences.is_empty() {
        return Err(Error::Load(format!(
            "{}: no sentences to annotate",
            path.display()
        )));
    }

    debug!(path = %path.display(), "Parsed sentence file");
    info!(count = sentences.len(), "Loaded sentences");
    Ok(sentences)
}

/// Immutable, shareable sentence sequence
#[derive(Debug, Clone)]
pub struct SentenceSet {
    sentences: Arc<[SentenceRecord]>,
}

impl SentenceSet {
    pub fn new(sentences: Vec<SentenceRecord>) -> Self {
        Self {
            sentences: sentences.into(),
        }
    }

    /// Load and wrap in one step
    pub fn load(path: &Path) -> Result<Self> {
        load(path).map(Self::new)
    }

    pub fn len(&self) -> usize {
        self.sentences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sentences.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&SentenceRecord> {
        self.sentences.get(position)
    }

    pub fn text_id(&self, position: usize) -> Option<String> {
        self.get(position).map(|s| s.text_id(position))
    }
}
