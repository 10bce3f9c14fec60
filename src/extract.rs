//! Text Extractor: turns one item's bytes into plain text.
//!
//! Dispatch is a closed match over [`FileKind`]:
//!
//! | Kind | Handler |
//! |------|---------|
//! | `pdf`, `doc`, `docx` | [`DocumentAnalyzer`] (plus the local per-page PDF layer) |
//! | `txt` | direct decode (UTF-8, or UTF-16 with a BOM) |
//! | `msg` | [`MailParser`]; body becomes the text, attachments pass through |
//! | `other` | unsupported |
//!
//! Extraction never fails the pipeline: every error is folded into an
//! [`ExtractionResult`] with a failure status and empty text.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::analysis::{local_pdf_pages, DocumentAnalyzer};
use crate::error::ExtractError;
use crate::mail::{MailParser, ParsedMessage};
use crate::models::{ExtractionResult, ExtractionStatus, FileKind};

pub struct TextExtractor {
    analyzer: Arc<dyn DocumentAnalyzer>,
    mail: Arc<dyn MailParser>,
    local_pdf_pages: bool,
    timeout: Duration,
}

impl TextExtractor {
    pub fn new(
        analyzer: Arc<dyn DocumentAnalyzer>,
        mail: Arc<dyn MailParser>,
        local_pdf_pages: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            analyzer,
            mail,
            local_pdf_pages,
            timeout,
        }
    }

    /// Extract text from `bytes`, treating them as `kind`.
    pub async fn extract(&self, bytes: &[u8], kind: FileKind) -> ExtractionResult {
        let started_at = Utc::now();
        let outcome = match tokio::time::timeout(self.timeout, self.dispatch(bytes, kind)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ExtractError::Timeout(self.timeout.as_secs())),
        };

        match outcome {
            Ok(result) => result,
            Err(e) => {
                let status = match e {
                    ExtractError::Unsupported(_) => ExtractionStatus::Unsupported,
                    _ => ExtractionStatus::Failed,
                };
                tracing::warn!(kind = %kind, error = %e, "extraction failed");
                ExtractionResult::failed(status, e, started_at)
            }
        }
    }

    async fn dispatch(&self, bytes: &[u8], kind: FileKind) -> Result<ExtractionResult, ExtractError> {
        let started_at = Utc::now();
        match kind {
            FileKind::Pdf => {
                let doc = self.analyzer.analyze(bytes, kind).await?;
                let mut result = ExtractionResult::from_text(doc.text, started_at);
                result.page_count = doc.page_count;
                if self.local_pdf_pages {
                    match local_pdf_pages(bytes).await {
                        Ok(pages) => {
                            if result.page_count.is_none() {
                                result.page_count = Some(pages.len() as u32);
                            }
                            result.page_texts = Some(pages);
                        }
                        Err(e) => {
                            tracing::debug!(error = %e, "no local PDF text layer");
                        }
                    }
                }
                result.finished_at = Utc::now();
                Ok(result)
            }
            FileKind::Doc | FileKind::Docx => {
                let doc = self.analyzer.analyze(bytes, kind).await?;
                let mut result = ExtractionResult::from_text(doc.text, started_at);
                result.page_count = doc.page_count;
                Ok(result)
            }
            FileKind::Txt => Ok(ExtractionResult::from_text(decode_text(bytes)?, started_at)),
            FileKind::Msg => {
                let parser = Arc::clone(&self.mail);
                let owned = bytes.to_vec();
                let parsed: ParsedMessage = tokio::task::spawn_blocking(move || parser.parse(&owned))
                    .await
                    .map_err(|e| ExtractError::Decode(format!("mail parser aborted: {}", e)))??;
                let mut result = ExtractionResult::from_text(parsed.body.clone(), started_at);
                result.email = Some(parsed.properties());
                result.attachments = parsed.attachments;
                Ok(result)
            }
            FileKind::Other => Err(ExtractError::Unsupported(kind.to_string())),
        }
    }
}

/// Decode a plain-text file.
///
/// A UTF-8 BOM is stripped; a UTF-16 BOM selects UTF-16 decoding.
/// Anything else must be valid UTF-8.
pub fn decode_text(bytes: &[u8]) -> Result<String, ExtractError> {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return decode_utf8(rest);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    decode_utf8(bytes)
}

fn decode_utf8(bytes: &[u8]) -> Result<String, ExtractError> {
    std::str::from_utf8(bytes)
        .map(str::to_string)
        .map_err(|e| ExtractError::Decode(e.to_string()))
}

fn decode_utf16(bytes: &[u8], unit: fn([u8; 2]) -> u16) -> Result<String, ExtractError> {
    if bytes.len() % 2 != 0 {
        return Err(ExtractError::Decode("odd byte count in UTF-16 text".into()));
    }
    let units = bytes.chunks_exact(2).map(|c| unit([c[0], c[1]]));
    char::decode_utf16(units)
        .collect::<Result<String, _>>()
        .map_err(|e| ExtractError::Decode(e.to_string()))
}
