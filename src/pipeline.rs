//! Pipeline Orchestrator.
//!
//! [`Pipeline::process_path`] is the entry point for one trigger
//! notification. Every item it produces walks the same state machine:
//!
//! ```text
//! Received → Extracted → (Expanding) → Chunked → Summarized → Recorded
//!                 └────────────── Failed ──────────────┘
//! ```
//!
//! Nesting is carried by an explicit work queue rather than recursion. A
//! message item is extracted and expanded in one unit of work; its body
//! text is queued as a separate unit, ahead of its attachments, so that
//! summarizing it never waits for them. Units run on a `JoinSet` and each
//! holds a permit from a pool of `pipeline.max_concurrency` shared by every
//! call on the same [`Pipeline`], so concurrent trigger paths (a scan) stay
//! within the same bound. One [`ExpansionBudget`] is shared by all items
//! below the same top-level file.
//!
//! A top-level file is skipped when its bytes are unchanged and its record,
//! together with the records of everything expanded from it, is settled.
//! An attachment whose record is missing or failed makes the whole file
//! eligible again.
//!
//! A failure inside one item never stops its siblings. Only a record that
//! cannot be persisted is reported as a [`PipelineError`].

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::Instrument;

use crate::blob::BlobStore;
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::expand::{AttachmentExpander, ExpansionBudget, MessageState, PendingAttachment};
use crate::extract::TextExtractor;
use crate::markings::MarkingSet;
use crate::models::{
    record_key, ExtractionResult, ExtractionStatus, FileKind, Record, SourceItem, SummaryStatus,
};
use crate::record::{
    build_record, enforce_size, error_keys, limit_exceeded_record, unreadable_record, RecordWriter,
};
use crate::summarize::{summarize_text, DocumentSummary, Summarizer, SummaryPolicy};

/// Per-item processing states, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemState {
    Received,
    Extracted,
    Expanding,
    Chunked,
    Summarized,
    Recorded,
    Failed,
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ItemState::Received => "received",
            ItemState::Extracted => "extracted",
            ItemState::Expanding => "expanding",
            ItemState::Chunked => "chunked",
            ItemState::Summarized => "summarized",
            ItemState::Recorded => "recorded",
            ItemState::Failed => "failed",
        })
    }
}

/// How one item ended.
#[derive(Debug)]
pub enum ItemOutcome {
    Recorded {
        extraction: ExtractionStatus,
        summary: SummaryStatus,
    },
    /// Unchanged bytes with settled records already stored.
    Skipped,
    /// The record could not be written.
    Failed(PipelineError),
    /// The worker handling the item panicked.
    Aborted(String),
}

#[derive(Debug)]
pub struct ItemReport {
    pub path: String,
    pub parent: Option<String>,
    pub outcome: ItemOutcome,
}

/// Everything that happened for one trigger path.
#[derive(Debug, Default)]
pub struct ProcessReport {
    pub path: String,
    /// The path did not pass the discovery filter.
    pub ignored: bool,
    pub items: Vec<ItemReport>,
}

impl ProcessReport {
    pub fn recorded(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Recorded { .. }))
            .count()
    }

    pub fn skipped(&self) -> usize {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Skipped))
            .count()
    }

    /// Items that reached no terminal record.
    pub fn failures(&self) -> impl Iterator<Item = &ItemReport> {
        self.items
            .iter()
            .filter(|i| matches!(i.outcome, ItemOutcome::Failed(_) | ItemOutcome::Aborted(_)))
    }

    pub fn is_ok(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn find(&self, path: &str) -> Option<&ItemReport> {
        self.items.iter().find(|i| i.path == path)
    }
}

/// Settings that shape one run.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub max_expanded_items: usize,
    pub max_concurrency: usize,
    pub max_record_bytes: usize,
    pub skip_complete: bool,
}

impl From<&PipelineConfig> for PipelineSettings {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            max_expanded_items: config.max_expanded_items,
            max_concurrency: config.max_concurrency.max(1),
            max_record_bytes: config.max_record_bytes,
            skip_complete: config.skip_complete,
        }
    }
}

/// One unit on the work queue.
enum Work {
    /// A top-level file, read from the watched store.
    Source { path: String, force: bool },
    /// A non-message attachment already written to the handoff store.
    Staged(PendingAttachment),
    /// An attached message, carried in memory.
    Message(PendingAttachment),
    /// A message's own body, queued ahead of its attachments.
    Body {
        item: SourceItem,
        extraction: ExtractionResult,
    },
    /// A record decided without processing (cap reached, unreadable).
    Stub(Record),
}

impl Work {
    fn path(&self) -> &str {
        match self {
            Work::Source { path, .. } => path,
            Work::Staged(p) | Work::Message(p) => &p.path,
            Work::Body { item, .. } => &item.path,
            Work::Stub(r) => &r.source_path,
        }
    }

    fn parent(&self) -> Option<String> {
        match self {
            Work::Source { .. } => None,
            Work::Staged(p) | Work::Message(p) => Some(p.parent.clone()),
            Work::Body { item, .. } => item.parent.clone(),
            Work::Stub(r) => r.parent_path.clone(),
        }
    }
}

#[derive(Default)]
struct Step {
    report: Option<ItemReport>,
    follow_up: Vec<Work>,
}

struct Shared {
    source: Arc<dyn BlobStore>,
    expander: AttachmentExpander,
    extractor: TextExtractor,
    summarizer: Arc<dyn Summarizer>,
    policy: SummaryPolicy,
    writer: RecordWriter,
    markings: MarkingSet,
    settings: PipelineSettings,
    permits: Semaphore,
    invocation_id: String,
}

/// The orchestrator. Cheap to clone; clones share every collaborator.
#[derive(Clone)]
pub struct Pipeline {
    shared: Arc<Shared>,
}

pub struct PipelineBuilder {
    source: Arc<dyn BlobStore>,
    expander: AttachmentExpander,
    extractor: TextExtractor,
    summarizer: Arc<dyn Summarizer>,
    policy: SummaryPolicy,
    writer: RecordWriter,
    markings: MarkingSet,
    settings: PipelineSettings,
    invocation_id: Option<String>,
}

impl PipelineBuilder {
    pub fn markings(mut self, markings: MarkingSet) -> Self {
        self.markings = markings;
        self
    }

    pub fn invocation_id(mut self, id: impl Into<String>) -> Self {
        self.invocation_id = Some(id.into());
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            shared: Arc::new(Shared {
                source: self.source,
                expander: self.expander,
                extractor: self.extractor,
                summarizer: self.summarizer,
                policy: self.policy,
                writer: self.writer,
                markings: self.markings,
                permits: Semaphore::new(self.settings.max_concurrency.max(1)),
                settings: self.settings,
                invocation_id: self
                    .invocation_id
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            }),
        }
    }
}

impl Pipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn builder(
        source: Arc<dyn BlobStore>,
        expander: AttachmentExpander,
        extractor: TextExtractor,
        summarizer: Arc<dyn Summarizer>,
        policy: SummaryPolicy,
        writer: RecordWriter,
        settings: PipelineSettings,
    ) -> PipelineBuilder {
        PipelineBuilder {
            source,
            expander,
            extractor,
            summarizer,
            policy,
            writer,
            markings: MarkingSet::empty(),
            settings,
            invocation_id: None,
        }
    }

    pub fn invocation_id(&self) -> &str {
        &self.shared.invocation_id
    }

    /// Process one trigger path and everything nested inside it.
    ///
    /// `force` reprocesses even when a complete record for identical bytes
    /// already exists.
    pub async fn process_path(&self, path: &str, force: bool) -> ProcessReport {
        let path = path.trim_start_matches('/').to_string();
        let mut report = ProcessReport {
            path: path.clone(),
            ..Default::default()
        };
        if !FileKind::from_path(&path).is_discoverable() {
            tracing::info!(path = %path, "ignoring path with unsupported extension");
            report.ignored = true;
            return report;
        }

        let budget = Arc::new(Mutex::new(ExpansionBudget::new(
            self.shared.settings.max_expanded_items,
        )));
        let mut queue = VecDeque::from([Work::Source {
            path: path.clone(),
            force,
        }]);
        let mut running = JoinSet::new();
        let mut in_flight = InFlight::new();

        loop {
            while running.len() < self.shared.settings.max_concurrency {
                let Some(work) = queue.pop_front() else {
                    break;
                };
                let this = self.clone();
                let budget = Arc::clone(&budget);
                let item_path = work.path().to_string();
                let item_parent = work.parent();
                let span = tracing::info_span!("item", path = %item_path);
                let handle = running.spawn(
                    async move {
                        let _permit = this.shared.permits.acquire().await.ok();
                        let path = work.path().to_string();
                        let parent = work.parent();
                        match AssertUnwindSafe(this.run(work, &budget)).catch_unwind().await {
                            Ok(step) => step,
                            Err(panic) => {
                                let message = panic_message(panic.as_ref());
                                tracing::error!(path = %path, error = %message, "item worker panicked");
                                Step {
                                    report: Some(ItemReport {
                                        path,
                                        parent,
                                        outcome: ItemOutcome::Aborted(message),
                                    }),
                                    follow_up: Vec::new(),
                                }
                            }
                        }
                    }
                    .instrument(span),
                );
                in_flight.insert(handle.id(), (item_path, item_parent));
            }

            let Some(joined) = running.join_next_with_id().await else {
                break;
            };
            match joined {
                Ok((id, step)) => {
                    in_flight.remove(&id);
                    report.items.extend(step.report);
                    queue.extend(step.follow_up);
                }
                Err(e) => report.items.push(aborted_item(&mut in_flight, e, &path)),
            }
        }

        report
    }

    async fn run(&self, work: Work, budget: &Mutex<ExpansionBudget>) -> Step {
        match work {
            Work::Source { path, force } => self.run_source(path, force, budget).await,
            Work::Staged(pending) => {
                let item = match self.shared.expander.load(&pending).await {
                    Ok(bytes) => {
                        let mut pending = pending;
                        pending.bytes = bytes;
                        pending.into_item()
                    }
                    Err(e) => {
                        let item = pending.into_item();
                        let record = unreadable_record(
                            &item,
                            &format!("handoff read failed: {:#}", e),
                            &self.shared.invocation_id,
                        );
                        return self.record_step(record).await;
                    }
                };
                self.handle(item, budget).await
            }
            Work::Message(pending) => self.handle(pending.into_item(), budget).await,
            Work::Body { item, extraction } => self.finish(&item, extraction).await,
            Work::Stub(record) => self.record_step(record).await,
        }
    }

    async fn run_source(&self, path: String, force: bool, budget: &Mutex<ExpansionBudget>) -> Step {
        let blob = match self.shared.source.read(&path).await {
            Ok(blob) => blob,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "source read failed");
                let item = SourceItem::new(path.as_str(), Vec::<u8>::new());
                let record = unreadable_record(
                    &item,
                    &format!("source read failed: {:#}", e),
                    &self.shared.invocation_id,
                );
                return self.record_step(record).await;
            }
        };
        let item = SourceItem::new(path, blob.bytes).with_modified_at(blob.modified_at);

        if !force && self.shared.settings.skip_complete && self.is_unchanged(&item).await {
            tracing::info!(path = %item.path, "unchanged and settled, skipping");
            return Step {
                report: Some(ItemReport {
                    path: item.path,
                    parent: None,
                    outcome: ItemOutcome::Skipped,
                }),
                follow_up: Vec::new(),
            };
        }

        self.handle(item, budget).await
    }

    async fn is_unchanged(&self, item: &SourceItem) -> bool {
        let stored = match self.shared.writer.store().get(&item.key()).await {
            Ok(Some(stored)) => stored,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(path = %item.path, error = %e, "record lookup failed");
                return false;
            }
        };
        stored.record.is_settled()
            && stored.record.content_hash == item.content_hash()
            && self.expansion_settled(&stored.record).await
    }

    /// Walk the records expanded from `root`. Paths only grow with depth,
    /// so the walk ends.
    async fn expansion_settled(&self, root: &Record) -> bool {
        let mut pending = attachment_paths(root);
        while let Some(path) = pending.pop() {
            match self.shared.writer.store().get(&record_key(&path)).await {
                Ok(Some(child)) if child.record.is_settled() => {
                    pending.extend(attachment_paths(&child.record));
                }
                Ok(Some(_)) | Ok(None) => {
                    tracing::debug!(path = %path, parent = %root.source_path, "attachment not settled");
                    return false;
                }
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "record lookup failed");
                    return false;
                }
            }
        }
        true
    }

    /// Extract one item. Messages are expanded and their body is queued;
    /// everything else goes straight on to summarization.
    async fn handle(&self, item: SourceItem, budget: &Mutex<ExpansionBudget>) -> Step {
        log_state(&item, ItemState::Received);
        if item.kind.is_message() {
            log_message_state(&item, MessageState::Discovered);
        }

        let mut extraction = self.shared.extractor.extract(&item.bytes, item.kind).await;
        log_state(&item, ItemState::Extracted);

        if !item.kind.is_message() || extraction.status == ExtractionStatus::Failed {
            return self.finish(&item, extraction).await;
        }

        log_message_state(&item, MessageState::Parsed);
        let attachments = std::mem::take(&mut extraction.attachments);
        let planned = if attachments.is_empty() {
            Vec::new()
        } else {
            log_state(&item, ItemState::Expanding);
            log_message_state(&item, MessageState::Expanding);
            let planned = self.shared.expander.plan(&item, attachments);
            if let Some(ref mut email) = extraction.email {
                email.attachment_paths = planned.iter().map(|p| p.path.clone()).collect();
            }
            planned
        };

        let mut expanded = Vec::with_capacity(planned.len());
        for pending in planned {
            expanded.push(self.expand_one(pending, budget).await);
        }
        log_message_state(&item, MessageState::Expanded);

        let mut follow_up = Vec::with_capacity(expanded.len() + 1);
        follow_up.push(Work::Body { item, extraction });
        follow_up.extend(expanded);
        Step {
            report: None,
            follow_up,
        }
    }

    async fn expand_one(&self, pending: PendingAttachment, budget: &Mutex<ExpansionBudget>) -> Work {
        let admitted = budget.lock().map(|mut b| b.admit()).unwrap_or(false);
        if !admitted {
            tracing::warn!(
                path = %pending.path,
                parent = %pending.parent,
                cap = self.shared.settings.max_expanded_items,
                "expansion cap reached, attachment flagged"
            );
            return Work::Stub(limit_exceeded_record(
                &pending.path,
                pending.kind,
                &pending.parent,
                pending.bytes.len() as u64,
                self.shared.settings.max_expanded_items,
                &self.shared.invocation_id,
            ));
        }

        if let Some(error) = pending.error.clone() {
            tracing::warn!(path = %pending.path, parent = %pending.parent, error = %error, "attachment unreadable");
            return Work::Stub(unreadable_record(
                &pending.into_item(),
                &format!("attachment unreadable: {}", error),
                &self.shared.invocation_id,
            ));
        }
        if pending.is_message() {
            return Work::Message(pending);
        }
        match self.shared.expander.stage(&pending).await {
            Ok(()) => {
                let mut staged = pending;
                staged.bytes = Arc::from(Vec::<u8>::new());
                Work::Staged(staged)
            }
            Err(e) => {
                tracing::warn!(path = %pending.path, error = %e, "staging attachment failed");
                let item = pending.into_item();
                Work::Stub(unreadable_record(
                    &item,
                    &format!("handoff write failed: {:#}", e),
                    &self.shared.invocation_id,
                ))
            }
        }
    }

    /// Chunk, summarize and record one extracted item.
    async fn finish(&self, item: &SourceItem, extraction: ExtractionResult) -> Step {
        let summary = if extraction.succeeded() {
            log_state(item, ItemState::Chunked);
            let summary =
                summarize_text(self.shared.summarizer.as_ref(), &extraction.text, &self.shared.policy)
                    .await;
            log_state(item, ItemState::Summarized);
            summary
        } else {
            DocumentSummary::not_attempted()
        };

        let fallbacks = extraction.page_texts.iter().flatten().map(String::as_str);
        let marking = self.shared.markings.find_in(&extraction.text, fallbacks);

        let mut record = build_record(
            item,
            &extraction,
            &summary,
            marking,
            &self.shared.invocation_id,
        );
        if enforce_size(&mut record, self.shared.settings.max_record_bytes) {
            tracing::warn!(
                path = %item.path,
                reason = record.errors.get(error_keys::RECORD_SIZE).map(String::as_str).unwrap_or(""),
                "record trimmed to size"
            );
        }
        self.record_step(record).await
    }

    async fn record_step(&self, record: Record) -> Step {
        let outcome = match self.shared.writer.write(&record).await {
            Ok(()) => {
                tracing::info!(
                    path = %record.source_path,
                    extraction = record.extraction_status.as_str(),
                    summary = record.summary_status.as_str(),
                    state = %ItemState::Recorded,
                    "item recorded"
                );
                ItemOutcome::Recorded {
                    extraction: record.extraction_status,
                    summary: record.summary_status,
                }
            }
            Err(e) => {
                tracing::error!(path = %record.source_path, state = %ItemState::Failed, error = %e, "item failed");
                ItemOutcome::Failed(e)
            }
        };
        Step {
            report: Some(ItemReport {
                path: record.source_path,
                parent: record.parent_path,
                outcome,
            }),
            follow_up: Vec::new(),
        }
    }
}

type InFlight = HashMap<tokio::task::Id, (String, Option<String>)>;

/// Report for a worker that ended without handing back its step.
fn aborted_item(in_flight: &mut InFlight, error: JoinError, fallback: &str) -> ItemReport {
    let (path, parent) = in_flight
        .remove(&error.id())
        .unwrap_or_else(|| (fallback.to_string(), None));
    tracing::error!(path = %path, error = %error, "item worker did not complete");
    ItemReport {
        path,
        parent,
        outcome: ItemOutcome::Aborted(error.to_string()),
    }
}

fn attachment_paths(record: &Record) -> Vec<String> {
    record
        .email
        .as_ref()
        .map(|e| e.attachment_paths.clone())
        .unwrap_or_default()
}

fn log_state(item: &SourceItem, state: ItemState) {
    tracing::debug!(path = %item.path, kind = %item.kind, depth = item.depth, state = %state, "item state");
}

fn log_message_state(item: &SourceItem, state: MessageState) {
    tracing::debug!(path = %item.path, depth = item.depth, state = %state, "message state");
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
