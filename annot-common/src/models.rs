//! Domain records for sentiment annotation

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

/// Lowest accepted sentiment score (very negative)
pub const SCORE_MIN: f64 = 0.0;
/// Highest accepted sentiment score (very positive)
pub const SCORE_MAX: f64 = 10.0;
/// Granularity of accepted scores
pub const SCORE_STEP: f64 = 0.5;
/// Slider position offered for each new sentence (neutral)
pub const SCORE_DEFAULT: f64 = 5.0;

/// One sentence to annotate, as loaded from the sentence source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentenceRecord {
    /// Sentence text shown to the annotator
    pub text: String,
    /// Identifier of the group (source document) the sentence belongs to
    pub group_id: String,
}

impl SentenceRecord {
    pub fn new(text: impl Into<String>, group_id: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            group_id: group_id.into(),
        }
    }

    /// Identifier of this sentence at `position`: `"{group_id}_{position}"`
    pub fn text_id(&self, position: usize) -> String {
        format!("{}_{}", self.group_id, position)
    }
}

/// Sentiment score in `[0, 10]` on a 0.5 grid
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Score(f64);

impl Score {
    /// Validate a raw score
    ///
    /// Rejects NaN/infinite values, values outside `[0, 10]` and values that
    /// are not a whole multiple of 0.5.
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() {
            return Err(Error::Validation(format!(
                "Score must be a finite number, got {}",
                value
            )));
        }
        if !(SCORE_MIN..=SCORE_MAX).contains(&value) {
            return Err(Error::Validation(format!(
                "Score must be between {} and {}, got {}",
                SCORE_MIN, SCORE_MAX, value
            )));
        }
        if (value / SCORE_STEP).fract() != 0.0 {
            return Err(Error::Validation(format!(
                "Score must be a multiple of {}, got {}",
                SCORE_STEP, value
            )));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for Score {
    fn default() -> Self {
        Self(SCORE_DEFAULT)
    }
}

impl TryFrom<f64> for Score {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self> {
        Score::new(value)
    }
}

impl From<Score> for f64 {
    fn from(score: Score) -> f64 {
        score.0
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.0)
    }
}

/// A committed annotation, appended to both the local and the remote log
///
/// Field order matches the log header: annotator, text_id, text, sentiment_score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub annotator: String,
    pub text_id: String,
    pub text: String,
    pub sentiment_score: Score,
}

impl AnnotationRecord {
    pub fn new(annotator: &str, sentence: &SentenceRecord, position: usize, score: Score) -> Self {
        Self {
            annotator: annotator.to_string(),
            text_id: sentence.text_id(position),
            text: sentence.text.clone(),
            sentiment_score: score,
        }
    }
}
