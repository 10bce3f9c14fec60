//! End-to-end tests of the orchestrator with in-process services.
//!
//! Messages are encoded as JSON for the test mail parser so that nesting
//! can be written inline; the Outlook parser has its own tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tempfile::TempDir;

use docsum::analysis::{AnalyzedDocument, DocumentAnalyzer};
use docsum::blob::FsBlobStore;
use docsum::error::{ExtractError, MailError, PipelineError, SummarizeError};
use docsum::expand::AttachmentExpander;
use docsum::extract::TextExtractor;
use docsum::mail::{MailParser, ParsedMessage};
use docsum::markings::MarkingSet;
use docsum::models::{
    record_key, ExtractionStatus, FileKind, MailAttachment, Record, StoredRecord, SummaryStatus,
};
use docsum::pipeline::{ItemOutcome, Pipeline, PipelineSettings};
use docsum::record::RecordWriter;
use docsum::store::{InMemoryRecordStore, RecordStore};
use docsum::summarize::{Summarizer, SummaryPolicy};

// ============ Test services ============

/// PDFs are `%PDF-ok\n` followed by their text; anything else is corrupt.
struct FakeAnalyzer;

#[async_trait]
impl DocumentAnalyzer for FakeAnalyzer {
    fn name(&self) -> &str {
        "fake"
    }

    async fn analyze(&self, bytes: &[u8], _kind: FileKind) -> Result<AnalyzedDocument, ExtractError> {
        match bytes.strip_prefix(b"%PDF-ok\n") {
            Some(rest) => Ok(AnalyzedDocument {
                text: String::from_utf8_lossy(rest).into_owned(),
                page_count: Some(1),
            }),
            None => Err(ExtractError::Pdf("no xref table".into())),
        }
    }
}

/// Parses messages written by [`message`].
struct JsonMailParser;

impl MailParser for JsonMailParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedMessage, MailError> {
        let v: Value =
            serde_json::from_slice(bytes).map_err(|e| MailError::Format(e.to_string()))?;
        let attachments = v["attachments"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .map(|a| match a.get("message") {
                Some(inner) => MailAttachment {
                    name: a["name"].as_str().map(str::to_string),
                    bytes: serde_json::to_vec(inner).unwrap(),
                    embedded_message: true,
                    mime_type: None,
                    error: None,
                },
                None => MailAttachment {
                    name: a["name"].as_str().map(str::to_string),
                    bytes: a["data"].as_str().unwrap_or_default().as_bytes().to_vec(),
                    embedded_message: false,
                    mime_type: None,
                    error: a["error"].as_str().map(str::to_string),
                },
            })
            .collect();
        Ok(ParsedMessage {
            subject: v["subject"].as_str().unwrap_or_default().to_string(),
            sender: "Alice".into(),
            sender_email: "alice@example.com".into(),
            to: "Bob".into(),
            body: v["body"].as_str().unwrap_or_default().to_string(),
            attachments,
            ..Default::default()
        })
    }
}

/// Summarizes a text as its first two words. Earlier sections answer
/// later so completion order differs from index order.
struct FirstWordsSummarizer {
    calls: AtomicUsize,
}

#[async_trait]
impl Summarizer for FirstWordsSummarizer {
    fn name(&self) -> &str {
        "first-words"
    }

    async fn summarize(&self, text: &str) -> Result<String, SummarizeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let words: Vec<&str> = text.split_whitespace().take(2).collect();
        if let Some(n) = words.get(1).and_then(|w| w.parse::<u64>().ok()) {
            tokio::time::sleep(Duration::from_millis(40u64.saturating_sub(n * 10))).await;
        }
        Ok(words.join(" "))
    }
}

/// Fails writes whose path ends with `doomed` until `failures` run out.
struct DoomedStore {
    doomed: &'static str,
    failures: AtomicUsize,
    inner: InMemoryRecordStore,
}

impl DoomedStore {
    fn new(doomed: &'static str, failures: usize) -> Self {
        Self {
            doomed,
            failures: AtomicUsize::new(failures),
            inner: InMemoryRecordStore::new(),
        }
    }
}

#[async_trait]
impl RecordStore for DoomedStore {
    async fn upsert(&self, record: &Record) -> anyhow::Result<()> {
        if record.source_path.ends_with(self.doomed) {
            let left = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
            if left.is_ok() {
                anyhow::bail!("disk I/O error");
            }
        }
        self.inner.upsert(record).await
    }

    async fn get(&self, key: &str) -> anyhow::Result<Option<StoredRecord>> {
        self.inner.get(key).await
    }
}

/// Counts how many summarization calls overlap.
#[derive(Default)]
struct GaugeSummarizer {
    active: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Summarizer for GaugeSummarizer {
    fn name(&self) -> &str {
        "gauge"
    }

    async fn summarize(&self, text: &str) -> Result<String, SummarizeError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(text.split_whitespace().next().unwrap_or_default().to_string())
    }
}

// ============ Harness ============

fn message(subject: &str, body: &str, attachments: Vec<Value>) -> Value {
    json!({ "subject": subject, "body": body, "attachments": attachments })
}

fn file(name: &str, data: &str) -> Value {
    json!({ "name": name, "data": data })
}

fn attached(name: &str, msg: Value) -> Value {
    json!({ "name": name, "message": msg })
}

/// Text long enough to be summarized.
fn long_body(topic: &str) -> String {
    format!("{} {}", topic, "lorem ipsum dolor sit amet ".repeat(25))
}

struct Harness {
    tmp: TempDir,
    summarizer: Arc<FirstWordsSummarizer>,
}

impl Harness {
    fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("inbox")).unwrap();
        std::fs::create_dir_all(tmp.path().join("handoff")).unwrap();
        Self {
            tmp,
            summarizer: Arc::new(FirstWordsSummarizer {
                calls: AtomicUsize::new(0),
            }),
        }
    }

    fn put(&self, path: &str, bytes: &[u8]) {
        let full = self.tmp.path().join("inbox").join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, bytes).unwrap();
    }

    fn put_message(&self, path: &str, msg: &Value) {
        self.put(path, &serde_json::to_vec(msg).unwrap());
    }

    fn pipeline(&self, store: Arc<dyn RecordStore>, max_expanded_items: usize) -> Pipeline {
        self.pipeline_with(store, max_expanded_items, 4, self.summarizer.clone())
    }

    fn pipeline_with(
        &self,
        store: Arc<dyn RecordStore>,
        max_expanded_items: usize,
        max_concurrency: usize,
        summarizer: Arc<dyn Summarizer>,
    ) -> Pipeline {
        let extractor = TextExtractor::new(
            Arc::new(FakeAnalyzer),
            Arc::new(JsonMailParser),
            false,
            Duration::from_secs(5),
        );
        let expander = AttachmentExpander::new(
            Arc::new(FsBlobStore::new(self.tmp.path().join("handoff"))),
            "email_attachments",
        );
        let policy = SummaryPolicy {
            max_chars: 2000,
            min_chars: 500,
            concurrency: 4,
            call_timeout: Duration::from_secs(5),
        };
        let settings = PipelineSettings {
            max_expanded_items,
            max_concurrency,
            max_record_bytes: 1024 * 1024,
            skip_complete: true,
        };
        Pipeline::builder(
            Arc::new(FsBlobStore::new(self.tmp.path().join("inbox"))),
            expander,
            extractor,
            summarizer,
            policy,
            RecordWriter::new(store, 2, Duration::from_millis(1)),
            settings,
        )
        .markings(MarkingSet::from_lines(["CONFIDENTIAL"]).unwrap())
        .invocation_id("test-run")
        .build()
    }
}

fn record<'a>(all: &'a [StoredRecord], path: &str) -> &'a Record {
    &all
        .iter()
        .find(|r| r.record.source_path == path)
        .unwrap_or_else(|| panic!("no record for {}", path))
        .record
}

// ============ Tests ============

#[tokio::test]
async fn nested_messages_produce_a_record_per_level_and_attachment() {
    let h = Harness::new();
    let innermost = message(
        "Inner two",
        &long_body("level3"),
        vec![file("c.pdf", "%PDF-ok\ninnermost pdf text")],
    );
    let middle = message(
        "Inner one",
        &long_body("level2"),
        vec![file("b.txt", "middle attachment"), attached("Inner two", innermost)],
    );
    let top = message(
        "Top",
        &long_body("level1"),
        vec![file("a.txt", "top attachment"), attached("Inner one", middle)],
    );
    h.put_message("mail/top.msg", &top);

    let store = Arc::new(InMemoryRecordStore::new());
    let report = h.pipeline(store.clone(), 500).process_path("mail/top.msg", false).await;
    assert!(report.is_ok());
    assert_eq!(report.recorded(), 6);

    let all = store.all();
    assert_eq!(all.len(), 6);

    let top = record(&all, "mail/top.msg");
    assert_eq!(top.parent_path, None);
    assert_eq!(top.summary_status, SummaryStatus::Complete);
    assert_eq!(top.summary, "level1 lorem");
    let email = top.email.as_ref().unwrap();
    assert_eq!(email.subject, "Top");
    assert_eq!(
        email.attachment_paths,
        vec![
            "email_attachments/mail/top/a.txt",
            "email_attachments/mail/top/Inner one.msg"
        ]
    );

    let a = record(&all, "email_attachments/mail/top/a.txt");
    assert_eq!(a.parent_path.as_deref(), Some("mail/top.msg"));
    assert_eq!(a.extracted_text, "top attachment");
    assert_eq!(a.summary_status, SummaryStatus::TooShort);

    let inner_one = record(&all, "email_attachments/mail/top/Inner one.msg");
    assert_eq!(inner_one.parent_path.as_deref(), Some("mail/top.msg"));
    assert_eq!(inner_one.summary, "level2 lorem");

    let b = record(&all, "email_attachments/mail/top/Inner one/b.txt");
    assert_eq!(
        b.parent_path.as_deref(),
        Some("email_attachments/mail/top/Inner one.msg")
    );

    let inner_two = record(&all, "email_attachments/mail/top/Inner one/Inner two.msg");
    assert_eq!(inner_two.file_type, FileKind::Msg);
    assert_eq!(inner_two.summary, "level3 lorem");

    let c = record(&all, "email_attachments/mail/top/Inner one/Inner two/c.pdf");
    assert_eq!(c.extraction_status, ExtractionStatus::Succeeded);
    assert_eq!(c.extracted_text, "innermost pdf text");
    assert_eq!(
        c.parent_path.as_deref(),
        Some("email_attachments/mail/top/Inner one/Inner two.msg")
    );

    // Non-message attachments are staged; nested messages are not.
    let handoff = h.tmp.path().join("handoff/email_attachments/mail/top");
    assert!(handoff.join("a.txt").exists());
    assert!(handoff.join("Inner one/b.txt").exists());
    assert!(handoff.join("Inner one/Inner two/c.pdf").exists());
    assert!(!handoff.join("Inner one.msg").exists());
}

#[tokio::test]
async fn reprocessing_unchanged_bytes_is_idempotent() {
    let h = Harness::new();
    h.put("docs/report.txt", long_body("report").as_bytes());
    let store = Arc::new(InMemoryRecordStore::new());
    let pipeline = h.pipeline(store.clone(), 500);

    pipeline.process_path("docs/report.txt", false).await;
    let first = store.get(&record_key("docs/report.txt")).await.unwrap().unwrap();

    let again = pipeline.process_path("docs/report.txt", false).await;
    assert_eq!(again.skipped(), 1);
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 1);

    let forced = pipeline.process_path("docs/report.txt", true).await;
    assert_eq!(forced.recorded(), 1);
    let second = store.get(&record_key("docs/report.txt")).await.unwrap().unwrap();

    assert_eq!(store.len(), 1);
    assert_eq!(second.version, 2);
    assert!(first.record.same_content(&second.record));
}

#[tokio::test]
async fn changed_bytes_are_reprocessed() {
    let h = Harness::new();
    h.put("docs/report.txt", long_body("before").as_bytes());
    let store = Arc::new(InMemoryRecordStore::new());
    let pipeline = h.pipeline(store.clone(), 500);
    pipeline.process_path("docs/report.txt", false).await;

    h.put("docs/report.txt", long_body("after").as_bytes());
    let report = pipeline.process_path("docs/report.txt", false).await;
    assert_eq!(report.recorded(), 1);
    assert_eq!(store.all()[0].record.summary, "after lorem");
}

#[tokio::test]
async fn short_message_body_is_too_short_not_an_error() {
    let h = Harness::new();
    let body = "x".repeat(400);
    h.put_message("mail/short.msg", &message("Short", &body, vec![]));
    let store = Arc::new(InMemoryRecordStore::new());

    let report = h.pipeline(store.clone(), 500).process_path("mail/short.msg", false).await;
    assert!(report.is_ok());

    let all = store.all();
    let r = record(&all, "mail/short.msg");
    assert_eq!(r.extraction_status, ExtractionStatus::Succeeded);
    assert_eq!(r.summary_status, SummaryStatus::TooShort);
    assert_eq!(r.summary, "");
    assert!(r.errors.is_empty());
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn corrupt_pdf_is_recorded_without_affecting_siblings() {
    let h = Harness::new();
    let msg = message(
        "Batch",
        "short",
        vec![
            file("broken.pdf", "garbage bytes"),
            file("fine.txt", &long_body("fine")),
            file("unknown.xyz", "???"),
        ],
    );
    h.put_message("mail/batch.msg", &msg);
    let store = Arc::new(InMemoryRecordStore::new());

    let report = h.pipeline(store.clone(), 500).process_path("mail/batch.msg", false).await;
    assert!(report.is_ok());
    assert_eq!(report.recorded(), 4);

    let all = store.all();
    let broken = record(&all, "email_attachments/mail/batch/broken.pdf");
    assert_eq!(broken.extraction_status, ExtractionStatus::Failed);
    assert_eq!(broken.extracted_text, "");
    assert_eq!(broken.summary_status, SummaryStatus::NotAttempted);
    assert!(broken.errors["extraction"].contains("no xref table"));

    let fine = record(&all, "email_attachments/mail/batch/fine.txt");
    assert_eq!(fine.extraction_status, ExtractionStatus::Succeeded);
    assert_eq!(fine.summary_status, SummaryStatus::Complete);

    let unknown = record(&all, "email_attachments/mail/batch/unknown.xyz");
    assert_eq!(unknown.extraction_status, ExtractionStatus::Unsupported);
}

#[tokio::test]
async fn unreadable_attachment_does_not_sink_the_message() {
    let h = Harness::new();
    let msg = message(
        "Damaged",
        &long_body("damaged"),
        vec![
            json!({ "name": "lost.pdf", "error": "sector chain ends early" }),
            file("kept.txt", "kept"),
        ],
    );
    h.put_message("mail/damaged.msg", &msg);
    let store = Arc::new(InMemoryRecordStore::new());

    let report = h.pipeline(store.clone(), 500).process_path("mail/damaged.msg", false).await;
    assert!(report.is_ok());
    assert_eq!(report.recorded(), 3);

    let all = store.all();
    let top = record(&all, "mail/damaged.msg");
    assert_eq!(top.extraction_status, ExtractionStatus::Succeeded);
    assert_eq!(top.summary, "damaged lorem");

    let lost = record(&all, "email_attachments/mail/damaged/lost.pdf");
    assert_eq!(lost.extraction_status, ExtractionStatus::Failed);
    assert_eq!(lost.parent_path.as_deref(), Some("mail/damaged.msg"));
    assert!(lost.errors["source"].contains("sector chain ends early"));
    assert!(!h
        .tmp
        .path()
        .join("handoff/email_attachments/mail/damaged/lost.pdf")
        .exists());

    let kept = record(&all, "email_attachments/mail/damaged/kept.txt");
    assert_eq!(kept.extracted_text, "kept");
}

#[tokio::test]
async fn long_documents_are_summarized_in_index_order() {
    let h = Harness::new();
    let text: String = (1..=3)
        .map(|i| format!("section {} {}\n", i, "words ".repeat(250)))
        .collect();
    h.put("docs/long.txt", text.as_bytes());
    let store = Arc::new(InMemoryRecordStore::new());

    h.pipeline(store.clone(), 500).process_path("docs/long.txt", false).await;

    let all = store.all();
    let r = record(&all, "docs/long.txt");
    assert_eq!(r.summary_status, SummaryStatus::Complete);
    assert_eq!(r.summary, "section 1 section 2 section 3");
    let indexes: Vec<usize> = r.summary_parts.iter().map(|p| p.index).collect();
    assert_eq!(indexes, vec![1, 2, 3]);
    assert_eq!(h.summarizer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn persistence_failure_is_surfaced_for_that_item_only() {
    let h = Harness::new();
    let msg = message(
        "Mixed",
        "short",
        vec![file("kept.txt", "kept"), file("doomed.txt", "doomed")],
    );
    h.put_message("mail/mixed.msg", &msg);
    let store = Arc::new(DoomedStore::new("doomed.txt", usize::MAX));

    let report = h.pipeline(store.clone(), 500).process_path("mail/mixed.msg", false).await;
    assert!(!report.is_ok());
    assert_eq!(report.recorded(), 2);

    let failures: Vec<_> = report.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].path, "email_attachments/mail/mixed/doomed.txt");
    match &failures[0].outcome {
        ItemOutcome::Failed(PipelineError::Persistence {
            attempts, message, ..
        }) => {
            assert_eq!(*attempts, 3);
            assert!(message.contains("disk I/O error"));
        }
        other => panic!("unexpected outcome: {:?}", other),
    }
    assert_eq!(store.inner.len(), 2);
}

#[tokio::test]
async fn unrecorded_attachment_is_retried_on_the_next_trigger() {
    let h = Harness::new();
    let msg = message(
        "Mixed",
        "short",
        vec![file("kept.txt", "kept"), file("doomed.txt", "doomed")],
    );
    h.put_message("mail/mixed.msg", &msg);
    // Every attempt of the first write fails; later writes go through.
    let store = Arc::new(DoomedStore::new("doomed.txt", 3));
    let pipeline = h.pipeline(store.clone(), 500);

    let first = pipeline.process_path("mail/mixed.msg", false).await;
    assert_eq!(first.failures().count(), 1);
    assert_eq!(store.inner.len(), 2);

    let second = pipeline.process_path("mail/mixed.msg", false).await;
    assert!(second.is_ok());
    assert_eq!(second.skipped(), 0);
    assert!(matches!(
        second.find("email_attachments/mail/mixed/doomed.txt").map(|i| &i.outcome),
        Some(ItemOutcome::Recorded { .. })
    ));
    assert_eq!(store.inner.len(), 3);

    let third = pipeline.process_path("mail/mixed.msg", false).await;
    assert_eq!(third.skipped(), 1);
    assert_eq!(third.items.len(), 1);
}

#[tokio::test]
async fn message_with_failed_attachment_extraction_is_not_skipped() {
    let h = Harness::new();
    let msg = message("Scan", "short", vec![file("scan.pdf", "not a pdf yet")]);
    h.put_message("mail/scan.msg", &msg);
    let store = Arc::new(InMemoryRecordStore::new());
    let pipeline = h.pipeline(store.clone(), 500);

    pipeline.process_path("mail/scan.msg", false).await;
    let again = pipeline.process_path("mail/scan.msg", false).await;
    assert_eq!(again.skipped(), 0);
    assert_eq!(again.recorded(), 2);
}

#[tokio::test]
async fn message_body_is_recorded_before_its_attachments() {
    let h = Harness::new();
    let files = (0..6)
        .map(|i| file(&format!("f{}.txt", i), "attachment"))
        .collect();
    h.put_message("mail/busy.msg", &message("Busy", &long_body("body"), files));
    let store = Arc::new(InMemoryRecordStore::new());

    let report = h
        .pipeline_with(store.clone(), 500, 1, h.summarizer.clone())
        .process_path("mail/busy.msg", false)
        .await;
    assert!(report.is_ok());
    assert_eq!(report.items.len(), 7);
    assert_eq!(report.items[0].path, "mail/busy.msg");
    assert_eq!(report.items[1].path, "email_attachments/mail/busy/f0.txt");
}

#[tokio::test]
async fn concurrent_paths_share_the_concurrency_bound() {
    let h = Harness::new();
    h.put("docs/a.txt", long_body("alpha").as_bytes());
    h.put("docs/b.txt", long_body("beta").as_bytes());
    let gauge = Arc::new(GaugeSummarizer::default());
    let pipeline = h.pipeline_with(Arc::new(InMemoryRecordStore::new()), 500, 1, gauge.clone());

    let (a, b) = tokio::join!(
        pipeline.process_path("docs/a.txt", false),
        pipeline.process_path("docs/b.txt", false)
    );
    assert_eq!(a.recorded() + b.recorded(), 2);
    assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn attachments_beyond_the_cap_are_flagged() {
    let h = Harness::new();
    let inner = message("Inner", "short", vec![file("deep.txt", "deep")]);
    let msg = message(
        "Many",
        "short",
        vec![
            file("one.txt", "1"),
            attached("Inner", inner),
            file("three.txt", "3"),
            file("four.txt", "4"),
        ],
    );
    h.put_message("mail/many.msg", &msg);
    let store = Arc::new(InMemoryRecordStore::new());

    let report = h.pipeline(store.clone(), 2).process_path("mail/many.msg", false).await;
    assert!(report.is_ok());

    let all = store.all();
    // Top message, four attachments and the nested message's attachment.
    assert_eq!(all.len(), 6);
    let limited: Vec<&str> = all
        .iter()
        .filter(|r| r.record.extraction_status == ExtractionStatus::LimitExceeded)
        .map(|r| r.record.source_path.as_str())
        .collect();
    assert_eq!(
        limited,
        vec![
            "email_attachments/mail/many/Inner/deep.txt",
            "email_attachments/mail/many/four.txt",
            "email_attachments/mail/many/three.txt",
        ]
    );
    let flagged = record(&all, "email_attachments/mail/many/four.txt");
    assert_eq!(flagged.summary_status, SummaryStatus::NotAttempted);
    assert!(flagged.errors["expansion"].contains('2'));
    assert_eq!(flagged.parent_path.as_deref(), Some("mail/many.msg"));
    assert!(!h
        .tmp
        .path()
        .join("handoff/email_attachments/mail/many/four.txt")
        .exists());
}

#[tokio::test]
async fn unreadable_and_ignored_paths() {
    let h = Harness::new();
    let store = Arc::new(InMemoryRecordStore::new());
    let pipeline = h.pipeline(store.clone(), 500);

    let ignored = pipeline.process_path("sheets/budget.xlsx", false).await;
    assert!(ignored.ignored);
    assert!(store.is_empty());

    let missing = pipeline.process_path("docs/missing.pdf", false).await;
    assert!(missing.is_ok());
    let all = store.all();
    let r = record(&all, "docs/missing.pdf");
    assert_eq!(r.extraction_status, ExtractionStatus::Failed);
    assert!(r.errors.contains_key("source"));
}

#[tokio::test]
async fn markings_are_found_in_extracted_text() {
    let h = Harness::new();
    h.put(
        "docs/memo.txt",
        format!("CONFIDENTIAL\n{}", long_body("memo")).as_bytes(),
    );
    let store = Arc::new(InMemoryRecordStore::new());
    h.pipeline(store.clone(), 500).process_path("docs/memo.txt", false).await;

    let all = store.all();
    let marking = record(&all, "docs/memo.txt").marking.clone().unwrap();
    assert_eq!(marking.marking, "CONFIDENTIAL");
    assert_eq!(marking.line, "CONFIDENTIAL");
}
