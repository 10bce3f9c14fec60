//! Core data models used throughout the pipeline.
//!
//! These types represent the items, extraction results, chunks, summaries,
//! and persisted records that flow from the blob store to the record store.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// File type tag derived from a path's extension.
///
/// A closed set: every handler in the pipeline matches on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Pdf,
    Doc,
    Docx,
    Txt,
    Msg,
    /// Any attachment type the extractors do not handle.
    Other,
}

impl FileKind {
    /// Classify a path by its (case-insensitive) extension.
    pub fn from_path(path: &str) -> Self {
        let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
        let ext = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => ext.to_ascii_lowercase(),
            _ => return FileKind::Other,
        };
        match ext.as_str() {
            "pdf" => FileKind::Pdf,
            "doc" => FileKind::Doc,
            "docx" => FileKind::Docx,
            "txt" => FileKind::Txt,
            "msg" => FileKind::Msg,
            _ => FileKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Pdf => "pdf",
            FileKind::Doc => "doc",
            FileKind::Docx => "docx",
            FileKind::Txt => "txt",
            FileKind::Msg => "msg",
            FileKind::Other => "other",
        }
    }

    pub fn is_message(&self) -> bool {
        matches!(self, FileKind::Msg)
    }

    /// Kinds that are picked up from the watched root. `Other` only ever
    /// enters the pipeline as an attachment.
    pub fn is_discoverable(&self) -> bool {
        !matches!(self, FileKind::Other)
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work: a file at the top level or an attachment of a message.
///
/// Immutable once created; consumed exactly once by the orchestrator.
#[derive(Debug, Clone)]
pub struct SourceItem {
    /// Logical path (relative to the watched root or the handoff store).
    pub path: String,
    pub kind: FileKind,
    pub bytes: Arc<[u8]>,
    /// Path of the message this item was extracted from, if any.
    pub parent: Option<String>,
    /// Nesting depth below the top-level file (0 for top-level).
    pub depth: usize,
    pub modified_at: Option<DateTime<Utc>>,
}

impl SourceItem {
    pub fn new(path: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        let path = path.into();
        Self {
            kind: FileKind::from_path(&path),
            path,
            bytes: bytes.into(),
            parent: None,
            depth: 0,
            modified_at: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>, depth: usize) -> Self {
        self.parent = Some(parent.into());
        self.depth = depth;
        self
    }

    pub fn with_kind(mut self, kind: FileKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_modified_at(mut self, modified_at: Option<DateTime<Utc>>) -> Self {
        self.modified_at = modified_at;
        self
    }

    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Stable record key for this item.
    pub fn key(&self) -> String {
        record_key(&self.path)
    }

    /// SHA-256 of the payload, used to detect unchanged reprocessing.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(&self.bytes);
        format!("{:x}", hasher.finalize())
    }
}

/// Normalize a logical path so that equivalent spellings share one key.
pub fn normalize_path(path: &str) -> String {
    path.replace('\\', "/").trim_start_matches('/').to_string()
}

/// Derive the record key from a source path.
///
/// Deterministic, so duplicate trigger deliveries overwrite rather than
/// duplicate.
pub fn record_key(path: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_path(path).as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Outcome of text extraction for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Succeeded,
    /// Extraction worked but the file holds no text.
    NoText,
    Failed,
    Unsupported,
    /// The item was beyond the per-message expansion cap and was never extracted.
    LimitExceeded,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Succeeded => "succeeded",
            ExtractionStatus::NoText => "no_text",
            ExtractionStatus::Failed => "failed",
            ExtractionStatus::Unsupported => "unsupported",
            ExtractionStatus::LimitExceeded => "limit_exceeded",
        }
    }
}

/// Outcome of summarization for one item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryStatus {
    Complete,
    /// Some chunks failed; the summary holds the remaining fragments.
    Partial,
    Failed,
    /// Text below the minimum useful length; summarization skipped.
    TooShort,
    /// The service rejected the text's length.
    OutOfRange,
    /// Extraction did not yield text to summarize.
    NotAttempted,
    Disabled,
}

impl SummaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Complete => "complete",
            SummaryStatus::Partial => "partial",
            SummaryStatus::Failed => "failed",
            SummaryStatus::TooShort => "too_short",
            SummaryStatus::OutOfRange => "out_of_range",
            SummaryStatus::NotAttempted => "not_attempted",
            SummaryStatus::Disabled => "disabled",
        }
    }

    /// Statuses that will not change by summarizing the same text again.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            SummaryStatus::Complete | SummaryStatus::TooShort | SummaryStatus::Disabled
        )
    }
}

/// Properties of a parsed mail message kept on its record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailProperties {
    pub subject: String,
    pub sender: String,
    pub sender_email: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub cc: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub bcc: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub recipient_names: Vec<String>,
    pub recipient_emails: Vec<String>,
    pub attachment_names: Vec<String>,
    pub attachment_paths: Vec<String>,
}

/// One attachment pulled out of a message, not yet classified.
#[derive(Debug, Clone)]
pub struct MailAttachment {
    pub name: Option<String>,
    pub bytes: Vec<u8>,
    /// True for attached Outlook items (the bytes are a standalone `.msg`).
    pub embedded_message: bool,
    pub mime_type: Option<String>,
    /// Set when the attachment's content could not be read out of the
    /// message; `bytes` is then empty.
    pub error: Option<String>,
}

/// Plain text plus extraction metadata for one item.
#[derive(Debug, Clone)]
pub struct ExtractionResult {
    pub text: String,
    pub status: ExtractionStatus,
    pub page_count: Option<u32>,
    /// Secondary per-page text layer (PDF only).
    pub page_texts: Option<Vec<String>>,
    pub email: Option<EmailProperties>,
    /// Attachments for the expander; never inlined into `text`.
    pub attachments: Vec<MailAttachment>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExtractionResult {
    /// Result for successfully extracted text (empty text maps to `NoText`).
    pub fn from_text(text: String, started_at: DateTime<Utc>) -> Self {
        let status = if text.trim().is_empty() {
            ExtractionStatus::NoText
        } else {
            ExtractionStatus::Succeeded
        };
        Self {
            text,
            status,
            page_count: None,
            page_texts: None,
            email: None,
            attachments: Vec::new(),
            error: None,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn failed(
        status: ExtractionStatus,
        error: impl std::fmt::Display,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            text: String::new(),
            status,
            page_count: None,
            page_texts: None,
            email: None,
            attachments: Vec::new(),
            error: Some(error.to_string()),
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExtractionStatus::Succeeded
    }
}

/// A contiguous, 1-indexed slice of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk<'a> {
    pub index: usize,
    /// Byte range of `text` within the source text.
    pub range: Range<usize>,
    pub text: &'a str,
}

impl TextChunk<'_> {
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// The summarization service's output for exactly one chunk.
///
/// `summary` is `None` when the call for this chunk failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryFragment {
    pub index: usize,
    pub summary: Option<String>,
    pub input_chars: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A classification marking found in the document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Marking {
    pub marking: String,
    pub line: String,
}

/// Wall-clock timings of the processing stages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    pub extraction_started: Option<DateTime<Utc>>,
    pub extraction_finished: Option<DateTime<Utc>>,
    pub summary_started: Option<DateTime<Utc>>,
    pub summary_finished: Option<DateTime<Utc>>,
}

/// The persisted result of processing one item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: String,
    pub source_path: String,
    pub parent_path: Option<String>,
    pub file_name: String,
    pub file_type: FileKind,
    pub size_bytes: u64,
    pub content_hash: String,
    pub extracted_text: String,
    pub summary: String,
    pub summary_parts: Vec<SummaryFragment>,
    pub extraction_status: ExtractionStatus,
    pub summary_status: SummaryStatus,
    pub page_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_texts: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<EmailProperties>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marking: Option<Marking>,
    pub errors: BTreeMap<String, String>,
    pub modified_at: Option<DateTime<Utc>>,
    pub timings: Timings,
    pub invocation_id: String,
}

impl Record {
    /// True when two records hold the same processing result, ignoring
    /// timings and the invocation that produced them.
    pub fn same_content(&self, other: &Record) -> bool {
        let mut a = self.clone();
        let mut b = other.clone();
        for r in [&mut a, &mut b] {
            r.timings = Timings::default();
            r.invocation_id.clear();
        }
        a == b
    }

    /// A record that will not change by processing the same bytes again.
    ///
    /// Failed extraction is never settled: it may come from a service
    /// timeout or an unreadable handoff object.
    pub fn is_settled(&self) -> bool {
        match self.extraction_status {
            ExtractionStatus::Succeeded => self.summary_status.is_settled(),
            ExtractionStatus::NoText
            | ExtractionStatus::Unsupported
            | ExtractionStatus::LimitExceeded => true,
            ExtractionStatus::Failed => false,
        }
    }
}

/// A record as held by the store, with bookkeeping the store maintains.
#[derive(Debug, Clone, Serialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub record: Record,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Error maps of earlier versions, keyed `v{n}`.
    pub errors_archive: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_from_extension_is_case_insensitive() {
        assert_eq!(FileKind::from_path("inbox/Report.PDF"), FileKind::Pdf);
        assert_eq!(FileKind::from_path("a/b/c/notes.txt"), FileKind::Txt);
        assert_eq!(FileKind::from_path("mail/fwd.Msg"), FileKind::Msg);
        assert_eq!(FileKind::from_path("letter.docx"), FileKind::Docx);
        assert_eq!(FileKind::from_path("legacy.doc"), FileKind::Doc);
        assert_eq!(FileKind::from_path("photo.png"), FileKind::Other);
        assert_eq!(FileKind::from_path("noext"), FileKind::Other);
        assert_eq!(FileKind::from_path(".pdf"), FileKind::Other);
    }

    #[test]
    fn record_key_is_stable_across_spellings() {
        assert_eq!(record_key("a/b/c.pdf"), record_key("/a/b/c.pdf"));
        assert_eq!(record_key("a/b/c.pdf"), record_key("a\\b\\c.pdf"));
        assert_ne!(record_key("a/b/c.pdf"), record_key("a/b/d.pdf"));
        assert_eq!(record_key("x.txt").len(), 64);
    }

    #[test]
    fn extraction_from_blank_text_is_no_text() {
        let r = ExtractionResult::from_text("  \n ".into(), Utc::now());
        assert_eq!(r.status, ExtractionStatus::NoText);
        let r = ExtractionResult::from_text("hello".into(), Utc::now());
        assert!(r.succeeded());
    }

    #[test]
    fn file_name_is_last_segment() {
        let item = SourceItem::new("docs/2024/q1/plan.docx", b"x".to_vec());
        assert_eq!(item.file_name(), "plan.docx");
        assert_eq!(item.kind, FileKind::Docx);
        assert_eq!(item.depth, 0);
    }

    #[test]
    fn failed_extraction_is_never_settled() {
        let mut record = crate::store::tests::sample_record("docs/a.pdf");
        assert!(record.is_settled());
        record.summary_status = SummaryStatus::Partial;
        assert!(!record.is_settled());

        record.extraction_status = ExtractionStatus::Failed;
        record.summary_status = SummaryStatus::NotAttempted;
        assert!(!record.is_settled());

        record.extraction_status = ExtractionStatus::LimitExceeded;
        assert!(record.is_settled());
        record.extraction_status = ExtractionStatus::Unsupported;
        assert!(record.is_settled());
    }
}
