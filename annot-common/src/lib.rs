//! # Annotation Common Library
//!
//! Shared code for the sentiment annotation service:
//! - Domain records (sentences, scores, annotations)
//! - Sentence source loading
//! - Local append-only annotation log
//! - Buffered remote write-back log
//! - Per-session annotation flow controller
//! - Configuration loading

pub mod config;
pub mod error;
pub mod local_log;
pub mod models;
pub mod remote_log;
pub mod sentences;
pub mod session;
pub mod time;

pub use error::{Error, Result};
pub use local_log::LocalLog;
pub use models::{AnnotationRecord, Score, SentenceRecord};
pub use remote_log::{FlushOutcome, PendingBuffer, RemoteLog, RemoteSink};
pub use sentences::SentenceSet;
pub use session::{AnnotationSession, FlowState, SessionView, SubmitOutcome};
