//! Record building and the Record Writer.
//!
//! [`build_record`] folds an item, its extraction and its summary into the
//! persisted [`Record`]. [`enforce_size`] keeps a record under the store's
//! size ceiling: the secondary per-page PDF text goes first, then the
//! extracted text is truncated. [`RecordWriter`] upserts with bounded
//! retries and surfaces the final failure as
//! [`PipelineError::Persistence`].

use std::sync::Arc;
use std::time::Duration;

use crate::error::PipelineError;
use crate::models::{
    ExtractionResult, ExtractionStatus, FileKind, Marking, Record, SourceItem, SummaryStatus,
    Timings,
};
use crate::store::RecordStore;
use crate::summarize::DocumentSummary;

/// Keys used in [`Record::errors`].
pub mod error_keys {
    pub const EXTRACTION: &str = "extraction";
    pub const SUMMARY: &str = "summary";
    pub const EXPANSION: &str = "expansion";
    pub const RECORD_SIZE: &str = "record_size";
    pub const SOURCE: &str = "source";
}

/// Assemble the record for one processed item.
pub fn build_record(
    item: &SourceItem,
    extraction: &ExtractionResult,
    summary: &DocumentSummary,
    marking: Option<Marking>,
    invocation_id: &str,
) -> Record {
    let mut record = Record {
        key: item.key(),
        source_path: item.path.clone(),
        parent_path: item.parent.clone(),
        file_name: item.file_name().to_string(),
        file_type: item.kind,
        size_bytes: item.bytes.len() as u64,
        content_hash: item.content_hash(),
        extracted_text: extraction.text.clone(),
        summary: summary.summary.clone(),
        summary_parts: summary.fragments.clone(),
        extraction_status: extraction.status,
        summary_status: summary.status,
        page_count: extraction.page_count,
        page_texts: extraction.page_texts.clone(),
        email: extraction.email.clone(),
        marking,
        errors: Default::default(),
        modified_at: item.modified_at,
        timings: Timings {
            extraction_started: Some(extraction.started_at),
            extraction_finished: Some(extraction.finished_at),
            summary_started: (!summary.fragments.is_empty()).then_some(summary.started_at),
            summary_finished: (!summary.fragments.is_empty()).then_some(summary.finished_at),
        },
        invocation_id: invocation_id.to_string(),
    };

    if let Some(ref e) = extraction.error {
        record.errors.insert(error_keys::EXTRACTION.into(), e.clone());
    }
    let chunk_errors: Vec<String> = summary
        .fragments
        .iter()
        .filter_map(|f| f.error.as_ref().map(|e| format!("chunk {}: {}", f.index, e)))
        .collect();
    if !chunk_errors.is_empty() {
        record
            .errors
            .insert(error_keys::SUMMARY.into(), chunk_errors.join("; "));
    }
    record
}

/// Record for an attachment that was never processed because its
/// top-level message hit the expansion cap.
pub fn limit_exceeded_record(
    path: &str,
    kind: FileKind,
    parent: &str,
    size_bytes: u64,
    cap: usize,
    invocation_id: &str,
) -> Record {
    let mut item = SourceItem::new(path, Vec::<u8>::new()).with_kind(kind);
    item.parent = Some(parent.to_string());
    let mut record = stub_record(&item, ExtractionStatus::LimitExceeded, invocation_id);
    record.size_bytes = size_bytes;
    record.content_hash = String::new();
    record.errors.insert(
        error_keys::EXPANSION.into(),
        format!("expansion cap of {} items per top-level message reached", cap),
    );
    record
}

/// Record for an item whose bytes could not be read.
pub fn unreadable_record(item: &SourceItem, error: &str, invocation_id: &str) -> Record {
    let mut record = stub_record(item, ExtractionStatus::Failed, invocation_id);
    record.content_hash = String::new();
    record.errors.insert(error_keys::SOURCE.into(), error.to_string());
    record
}

fn stub_record(item: &SourceItem, status: ExtractionStatus, invocation_id: &str) -> Record {
    let extraction = ExtractionResult::failed(status, "", chrono::Utc::now());
    let mut record = build_record(
        item,
        &extraction,
        &DocumentSummary::not_attempted(),
        None,
        invocation_id,
    );
    record.errors.clear();
    record.summary_status = SummaryStatus::NotAttempted;
    record
}

fn encoded_len(record: &Record) -> usize {
    serde_json::to_vec(record).map(|v| v.len()).unwrap_or(usize::MAX)
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Shrink `record` until its JSON encoding fits in `max_bytes`.
///
/// Returns true when anything was removed. Each reduction is noted in
/// `errors` under `record_size`.
pub fn enforce_size(record: &mut Record, max_bytes: usize) -> bool {
    let mut size = encoded_len(record);
    if size <= max_bytes {
        return false;
    }

    let mut notes = Vec::new();
    if record.page_texts.take().is_some() {
        notes.push("secondary page text dropped".to_string());
        size = encoded_len(record);
    }

    if size > max_bytes {
        let original = record.extracted_text.len();
        // JSON escaping can make the encoding longer than the text, so
        // shrink until it fits rather than computing the cut once.
        while size > max_bytes && !record.extracted_text.is_empty() {
            let overshoot = size - max_bytes;
            let target = record
                .extracted_text
                .len()
                .saturating_sub(overshoot.max(1024));
            let cut = floor_char_boundary(&record.extracted_text, target);
            record.extracted_text.truncate(cut);
            size = encoded_len(record);
        }
        notes.push(format!(
            "extracted text truncated from {} to {} bytes",
            original,
            record.extracted_text.len()
        ));
    }

    record
        .errors
        .insert(error_keys::RECORD_SIZE.into(), notes.join("; "));
    true
}

/// Upserts records, retrying failed writes with exponential backoff.
pub struct RecordWriter {
    store: Arc<dyn RecordStore>,
    max_retries: u32,
    backoff: Duration,
}

impl RecordWriter {
    pub fn new(store: Arc<dyn RecordStore>, max_retries: u32, backoff: Duration) -> Self {
        Self {
            store,
            max_retries,
            backoff,
        }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Upsert `record`. After `max_retries` failed retries the last error
    /// is returned as [`PipelineError::Persistence`].
    pub async fn write(&self, record: &Record) -> Result<(), PipelineError> {
        let mut last_err = String::new();
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.backoff * (1u32 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }
            match self.store.upsert(record).await {
                Ok(()) => {
                    tracing::debug!(key = %record.key, attempt, "record written");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(key = %record.key, path = %record.source_path, attempt, error = %e, "record upsert failed");
                    last_err = format!("{:#}", e);
                }
            }
        }
        Err(PipelineError::Persistence {
            key: record.key.clone(),
            path: record.source_path.clone(),
            attempts: self.max_retries + 1,
            message: last_err,
        })
    }
}
