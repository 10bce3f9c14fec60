//! Summarizer: abstractive summaries for texts of any length.
//!
//! Defines the [`Summarizer`] trait (one call, one summary) and the
//! document-level algorithm on top of it:
//!
//! 1. Disabled provider → [`SummaryStatus::Disabled`].
//! 2. Text shorter than the policy minimum → [`SummaryStatus::TooShort`],
//!    no service call.
//! 3. Chunk the text to the service's input limit ([`crate::chunk`]).
//! 4. Summarize chunks concurrently, each call under its own timeout.
//! 5. Assemble fragments strictly by chunk index. One chunk: its fragment
//!    is the summary verbatim. Several: fragments joined with a single
//!    space. The joined text is never summarized again.
//!
//! A failed chunk leaves a missing fragment; assembly proceeds with the
//! rest and the status becomes [`SummaryStatus::Partial`].
//!
//! Providers:
//! - **[`DisabledSummarizer`]** — no service configured.
//! - **[`AzureLanguageSummarizer`]** — Azure AI Language abstractive
//!   summarization job API.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde_json::Value;

use crate::azure::{AzureClient, ClientSettings, RequestBody};
use crate::chunk::chunk_text;
use crate::config::SummarizationConfig;
use crate::error::{ServiceError, SummarizeError};
use crate::models::{SummaryFragment, SummaryStatus, TextChunk};

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Provider name, used in logs.
    fn name(&self) -> &str;

    fn is_enabled(&self) -> bool {
        true
    }

    /// Summarize one text that is within the service's length limits.
    async fn summarize(&self, text: &str) -> Result<String, SummarizeError>;
}

/// Limits and fan-out for document summarization.
#[derive(Debug, Clone)]
pub struct SummaryPolicy {
    /// Service input limit per call, in characters.
    pub max_chars: usize,
    /// Minimum useful document length, in characters.
    pub min_chars: usize,
    /// Concurrent chunk calls per document.
    pub concurrency: usize,
    pub call_timeout: Duration,
}

impl SummaryPolicy {
    pub fn from_config(config: &SummarizationConfig) -> Self {
        Self {
            max_chars: config.max_chars,
            min_chars: config.min_chars,
            concurrency: config.concurrency.max(1),
            call_timeout: Duration::from_secs(config.operation_timeout_secs),
        }
    }
}

/// The outcome of summarizing one document.
#[derive(Debug, Clone)]
pub struct DocumentSummary {
    pub summary: String,
    pub status: SummaryStatus,
    /// One entry per chunk, in index order. Empty when no call was made.
    pub fragments: Vec<SummaryFragment>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DocumentSummary {
    /// No summarization because extraction produced no text.
    pub fn not_attempted() -> Self {
        Self::without_call(SummaryStatus::NotAttempted)
    }

    fn without_call(status: SummaryStatus) -> Self {
        let now = Utc::now();
        Self {
            summary: String::new(),
            status,
            fragments: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }
}

/// Summarize a whole document's extracted text.
pub async fn summarize_text(
    summarizer: &dyn Summarizer,
    text: &str,
    policy: &SummaryPolicy,
) -> DocumentSummary {
    if !summarizer.is_enabled() {
        return DocumentSummary::without_call(SummaryStatus::Disabled);
    }
    if text.trim().chars().count() < policy.min_chars {
        return DocumentSummary::without_call(SummaryStatus::TooShort);
    }
    let chunks = chunk_text(text, policy.max_chars);
    summarize_document(summarizer, &chunks, policy).await
}

/// Summarize pre-chunked text and assemble the fragments in index order.
pub async fn summarize_document(
    summarizer: &dyn Summarizer,
    chunks: &[TextChunk<'_>],
    policy: &SummaryPolicy,
) -> DocumentSummary {
    let started_at = Utc::now();
    if chunks.is_empty() {
        return DocumentSummary::without_call(SummaryStatus::NotAttempted);
    }

    let mut outcomes: Vec<(SummaryFragment, bool)> = stream::iter(chunks)
        .map(|chunk| async move {
            let result = summarize_chunk(summarizer, chunk, policy).await;
            let length_error = matches!(result, Err(SummarizeError::LengthOutOfRange { .. }));
            let fragment = match result {
                Ok(summary) => SummaryFragment {
                    index: chunk.index,
                    summary: Some(summary),
                    input_chars: chunk.char_len(),
                    error: None,
                },
                Err(e) => {
                    tracing::warn!(chunk = chunk.index, error = %e, "chunk summarization failed");
                    SummaryFragment {
                        index: chunk.index,
                        summary: None,
                        input_chars: chunk.char_len(),
                        error: Some(e.to_string()),
                    }
                }
            };
            (fragment, length_error)
        })
        .buffer_unordered(policy.concurrency.max(1))
        .boxed()
        .collect()
        .await;

    outcomes.sort_by_key(|(f, _)| f.index);

    let succeeded = outcomes.iter().filter(|(f, _)| f.summary.is_some()).count();
    let status = if succeeded == outcomes.len() {
        SummaryStatus::Complete
    } else if succeeded > 0 {
        SummaryStatus::Partial
    } else if outcomes.iter().all(|(_, length_error)| *length_error) {
        SummaryStatus::OutOfRange
    } else {
        SummaryStatus::Failed
    };

    let fragments: Vec<SummaryFragment> = outcomes.into_iter().map(|(f, _)| f).collect();
    DocumentSummary {
        summary: assemble(&fragments),
        status,
        fragments,
        started_at,
        finished_at: Utc::now(),
    }
}

/// Summarize one chunk under the policy's per-call timeout.
pub async fn summarize_chunk(
    summarizer: &dyn Summarizer,
    chunk: &TextChunk<'_>,
    policy: &SummaryPolicy,
) -> Result<String, SummarizeError> {
    let len = chunk.char_len();
    if len > policy.max_chars {
        return Err(SummarizeError::LengthOutOfRange {
            len,
            min: 1,
            max: policy.max_chars,
        });
    }
    match tokio::time::timeout(policy.call_timeout, summarizer.summarize(chunk.text)).await {
        Ok(result) => result,
        Err(_) => Err(SummarizeError::Timeout(policy.call_timeout.as_secs())),
    }
}

/// Final summary from index-ordered fragments. A lone fragment is used
/// verbatim; otherwise present fragments are joined with a space.
pub fn assemble(fragments: &[SummaryFragment]) -> String {
    if let [only] = fragments {
        return only.summary.clone().unwrap_or_default();
    }
    fragments
        .iter()
        .filter_map(|f| f.summary.as_deref())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the summarizer selected by `summarization.provider`.
pub fn create_summarizer(config: &SummarizationConfig) -> anyhow::Result<Arc<dyn Summarizer>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledSummarizer)),
        "azure" => Ok(Arc::new(AzureLanguageSummarizer::new(config)?)),
        other => anyhow::bail!("Unknown summarization provider: {}", other),
    }
}

// ============ Disabled Provider ============

/// Used when `summarization.provider = "disabled"`.
pub struct DisabledSummarizer;

#[async_trait]
impl Summarizer for DisabledSummarizer {
    fn name(&self) -> &str {
        "disabled"
    }

    fn is_enabled(&self) -> bool {
        false
    }

    async fn summarize(&self, _text: &str) -> Result<String, SummarizeError> {
        Err(SummarizeError::Disabled)
    }
}

// ============ Azure AI Language ============

/// Abstractive summarization through the Azure AI Language
/// `analyze-text/jobs` API.
pub struct AzureLanguageSummarizer {
    client: AzureClient,
    url: String,
    language: String,
    sentence_count: u32,
    max_chars: usize,
}

impl AzureLanguageSummarizer {
    pub fn new(config: &SummarizationConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("summarization.endpoint required for azure provider"))?;
        let client = AzureClient::new(&ClientSettings {
            api_key_env: config.api_key_env.clone(),
            timeout_secs: config.timeout_secs,
            operation_timeout_secs: config.operation_timeout_secs,
            max_retries: config.max_retries,
            poll_interval_ms: config.poll_interval_ms,
        })?;
        Ok(Self {
            client,
            url: format!(
                "{}/language/analyze-text/jobs?api-version={}",
                endpoint.trim_end_matches('/'),
                config.api_version
            ),
            language: config.language.clone(),
            sentence_count: config.sentence_count,
            max_chars: config.max_chars,
        })
    }

    fn request_body(&self, text: &str) -> Value {
        serde_json::json!({
            "displayName": "docsum",
            "analysisInput": {
                "documents": [{ "id": "1", "language": self.language, "text": text }]
            },
            "tasks": [{
                "kind": "AbstractiveSummarization",
                "taskName": "summary",
                "parameters": { "sentenceCount": self.sentence_count }
            }]
        })
    }

    fn length_error(&self, len: usize) -> SummarizeError {
        SummarizeError::LengthOutOfRange {
            len,
            min: 1,
            max: self.max_chars,
        }
    }
}

#[async_trait]
impl Summarizer for AzureLanguageSummarizer {
    fn name(&self) -> &str {
        "azure"
    }

    async fn summarize(&self, text: &str) -> Result<String, SummarizeError> {
        let len = text.chars().count();
        if len == 0 || len > self.max_chars {
            return Err(self.length_error(len));
        }

        let json = match self
            .client
            .run(&self.url, RequestBody::Json(self.request_body(text)))
            .await
        {
            Ok(json) => json,
            Err(ServiceError::Timeout(secs)) => return Err(SummarizeError::Timeout(secs)),
            Err(ServiceError::Rejected { status, body }) if is_length_complaint(&body) => {
                tracing::debug!(status, "service rejected text length");
                return Err(self.length_error(len));
            }
            Err(ServiceError::Failed(detail)) if is_length_complaint(&detail.to_string()) => {
                return Err(self.length_error(len));
            }
            Err(e) => return Err(SummarizeError::Service(e.to_string())),
        };

        match parse_job_result(&json) {
            JobResult::Summary(s) => Ok(s),
            JobResult::DocumentError(message) if is_length_complaint(&message) => {
                Err(self.length_error(len))
            }
            JobResult::DocumentError(message) => Err(SummarizeError::Service(message)),
        }
    }
}

enum JobResult {
    Summary(String),
    DocumentError(String),
}

/// Read the summary (or the per-document error) out of a finished job.
fn parse_job_result(json: &Value) -> JobResult {
    let results = &json["tasks"]["items"][0]["results"];
    if let Some(doc) = results["documents"].get(0) {
        let parts: Vec<&str> = doc["summaries"]
            .as_array()
            .map(|a| a.iter().filter_map(|s| s["text"].as_str()).collect())
            .unwrap_or_default();
        return JobResult::Summary(parts.join(" "));
    }
    if let Some(err) = results["errors"].get(0) {
        return JobResult::DocumentError(err["error"].to_string());
    }
    JobResult::DocumentError(format!("job returned no results: {}", json))
}

fn is_length_complaint(message: &str) -> bool {
    let m = message.to_ascii_lowercase();
    m.contains("invaliddocument") && (m.contains("length") || m.contains("too long") || m.contains("empty"))
        || m.contains("document text is empty")
        || m.contains("exceeds the maximum")
}
