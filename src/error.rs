//! Error taxonomy for the ingestion pipeline.
//!
//! Only [`PipelineError::Persistence`] is fatal for an item. Every other
//! failure is folded into the item's [`Record`](crate::models::Record) as a
//! status flag so that no discovered file is silently dropped.

/// Failure to turn a file's bytes into plain text.
///
/// Non-fatal: the item is still recorded with
/// [`ExtractionStatus::Failed`](crate::models::ExtractionStatus::Failed).
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("OOXML extraction failed: {0}")]
    Ooxml(String),

    #[error("text decoding failed: {0}")]
    Decode(String),

    #[error("document analysis service error: {0}")]
    Service(String),

    #[error("mail parsing failed: {0}")]
    Mail(#[from] MailError),

    #[error("extraction timed out after {0}s")]
    Timeout(u64),
}

/// Failure of a call to a remote analysis or summarization service.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Non-retryable HTTP status (4xx other than 429).
    #[error("HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Network error or retryable status that persisted through every attempt.
    #[error("request failed after {attempts} attempts: {message}")]
    Exhausted { attempts: u32, message: String },

    /// The long-running operation reached a failed terminal state.
    #[error("operation failed: {0}")]
    Failed(serde_json::Value),

    #[error("operation timed out after {0}s")]
    Timeout(u64),

    #[error("unexpected response: {0}")]
    Protocol(String),
}

/// Failure to parse an Outlook message.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("not a valid Outlook message: {0}")]
    Format(String),

    #[error("compound file I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a single summarization call.
#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    /// The service refused the text because of its length. Kept distinct so
    /// the record can carry an out-of-range status instead of a generic error.
    #[error("text length {len} outside accepted range {min}..={max}")]
    LengthOutOfRange { len: usize, min: usize, max: usize },

    #[error("summarization service error: {0}")]
    Service(String),

    #[error("summarization timed out after {0}s")]
    Timeout(u64),

    #[error("summarization is disabled")]
    Disabled,
}

/// Item-level failures that must be surfaced to the operator.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("failed to persist record {key} for '{path}' after {attempts} attempts: {message}")]
    Persistence {
        key: String,
        path: String,
        attempts: u32,
        message: String,
    },
}
