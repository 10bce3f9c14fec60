//! Document-analysis adapters for binary document formats.
//!
//! The [`DocumentAnalyzer`] trait is the seam between the Text Extractor
//! and whatever turns PDF and Word bytes into text:
//!
//! - **[`LocalAnalyzer`]** — in-process: PDF via `pdf-extract`, DOCX via
//!   `zip` + `quick-xml`. Legacy `.doc` is not readable locally.
//! - **[`AzureDocumentAnalyzer`]** — Azure Document Intelligence
//!   (`prebuilt-read` by default), which also handles scanned documents.
//!
//! Use [`create_analyzer`] to pick one from configuration.

use std::io::Read;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::azure::{AzureClient, ClientSettings, RequestBody};
use crate::config::ExtractionConfig;
use crate::error::ExtractError;
use crate::models::FileKind;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Text recognized in one document, in reading order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AnalyzedDocument {
    pub text: String,
    pub page_count: Option<u32>,
}

#[async_trait]
pub trait DocumentAnalyzer: Send + Sync {
    /// Provider name, used in logs.
    fn name(&self) -> &str;

    /// Recognize the text of a PDF, DOC or DOCX document.
    async fn analyze(&self, bytes: &[u8], kind: FileKind) -> Result<AnalyzedDocument, ExtractError>;
}

/// Build the analyzer selected by `extraction.provider`.
pub fn create_analyzer(config: &ExtractionConfig) -> anyhow::Result<Arc<dyn DocumentAnalyzer>> {
    match config.provider.as_str() {
        "local" => Ok(Arc::new(LocalAnalyzer)),
        "azure" => Ok(Arc::new(AzureDocumentAnalyzer::new(config)?)),
        other => anyhow::bail!("Unknown extraction provider: {}", other),
    }
}

// ============ Local Analyzer ============

/// In-process analyzer for text-layer PDFs and DOCX.
pub struct LocalAnalyzer;

#[async_trait]
impl DocumentAnalyzer for LocalAnalyzer {
    fn name(&self) -> &str {
        "local"
    }

    async fn analyze(&self, bytes: &[u8], kind: FileKind) -> Result<AnalyzedDocument, ExtractError> {
        match kind {
            FileKind::Pdf => {
                let pages = local_pdf_pages(bytes).await?;
                Ok(AnalyzedDocument {
                    page_count: Some(pages.len() as u32),
                    text: pages.concat(),
                })
            }
            FileKind::Docx => {
                let bytes = bytes.to_vec();
                let text = tokio::task::spawn_blocking(move || extract_docx(&bytes))
                    .await
                    .map_err(|e| ExtractError::Ooxml(format!("extraction task failed: {}", e)))??;
                Ok(AnalyzedDocument {
                    text,
                    page_count: None,
                })
            }
            FileKind::Doc => Err(ExtractError::Unsupported(
                "legacy .doc requires the azure extraction provider".into(),
            )),
            FileKind::Txt | FileKind::Msg | FileKind::Other => {
                Err(ExtractError::Unsupported(kind.to_string()))
            }
        }
    }
}

/// Per-page text of a PDF's embedded text layer.
///
/// Runs on the blocking pool. The PDF parser may panic on malformed input;
/// that surfaces as an extraction error rather than tearing down the task.
pub async fn local_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let bytes = bytes.to_vec();
    tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text_from_mem_by_pages(&bytes)
            .map_err(|e| ExtractError::Pdf(e.to_string()))
    })
    .await
    .map_err(|e| ExtractError::Pdf(format!("PDF parser aborted: {}", e)))?
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|_| ExtractError::Ooxml("word/document.xml not found".to_string()))?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err(ExtractError::Ooxml(
            "word/document.xml exceeds size limit".to_string(),
        ));
    }
    extract_w_t_elements(&doc_xml)
}

/// Collect `<w:t>` runs, ending each `<w:p>` paragraph with a newline.
fn extract_w_t_elements(xml: &[u8]) -> Result<String, ExtractError> {
    use quick_xml::events::Event;

    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Ooxml(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Ooxml(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

// ============ Azure Document Intelligence ============

/// Analyzer backed by Azure Document Intelligence.
///
/// Posts the raw bytes to `documentModels/{model}:analyze` and polls the
/// returned operation. The text is `analyzeResult.content`, the
/// concatenation of all recognized lines in reading order.
pub struct AzureDocumentAnalyzer {
    client: AzureClient,
    url: String,
}

impl AzureDocumentAnalyzer {
    pub fn new(config: &ExtractionConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("extraction.endpoint required for azure provider"))?;
        let client = AzureClient::new(&ClientSettings {
            api_key_env: config.api_key_env.clone(),
            timeout_secs: config.timeout_secs,
            operation_timeout_secs: config.operation_timeout_secs,
            max_retries: config.max_retries,
            poll_interval_ms: config.poll_interval_ms,
        })?;
        Ok(Self {
            client,
            url: analyze_url(endpoint, &config.model, &config.api_version),
        })
    }
}

fn analyze_url(endpoint: &str, model: &str, api_version: &str) -> String {
    format!(
        "{}/formrecognizer/documentModels/{}:analyze?api-version={}",
        endpoint.trim_end_matches('/'),
        model,
        api_version
    )
}

/// Pull text and page count out of a finished analyze operation.
fn parse_analyze_result(json: &Value) -> Result<AnalyzedDocument, ExtractError> {
    let result = json
        .get("analyzeResult")
        .ok_or_else(|| ExtractError::Service("response has no analyzeResult".into()))?;
    let text = result
        .get("content")
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    let page_count = result
        .get("pages")
        .and_then(|p| p.as_array())
        .map(|p| p.len() as u32);
    Ok(AnalyzedDocument { text, page_count })
}

#[async_trait]
impl DocumentAnalyzer for AzureDocumentAnalyzer {
    fn name(&self) -> &str {
        "azure"
    }

    async fn analyze(&self, bytes: &[u8], kind: FileKind) -> Result<AnalyzedDocument, ExtractError> {
        if !matches!(kind, FileKind::Pdf | FileKind::Doc | FileKind::Docx) {
            return Err(ExtractError::Unsupported(kind.to_string()));
        }
        let json = self
            .client
            .run(&self.url, RequestBody::Bytes(bytes.to_vec()))
            .await
            .map_err(|e| match e {
                crate::error::ServiceError::Timeout(secs) => ExtractError::Timeout(secs),
                other => ExtractError::Service(other.to_string()),
            })?;
        parse_analyze_result(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn docx_with(document_xml: &str) -> Vec<u8> {
        let mut buf = std::io::Cursor::new(Vec::new());
        {
            let mut zip = zip::ZipWriter::new(&mut buf);
            let options = zip::write::SimpleFileOptions::default();
            zip.start_file("word/document.xml", options).unwrap();
            zip.write_all(document_xml.as_bytes()).unwrap();
            zip.finish().unwrap();
        }
        buf.into_inner()
    }

    #[tokio::test]
    async fn docx_paragraphs_become_lines() {
        let xml = r#"<w:document xmlns:w="http://schemas.openxmlformats.org/wordprocessingml/2006/main"><w:body>
<w:p><w:r><w:t xml:space="preserve">Hello </w:t></w:r><w:r><w:t>world</w:t></w:r></w:p>
<w:p><w:r><w:t>Second &amp; last</w:t></w:r></w:p>
</w:body></w:document>"#;
        let doc = LocalAnalyzer
            .analyze(&docx_with(xml), FileKind::Docx)
            .await
            .unwrap();
        assert_eq!(doc.text, "Hello world\nSecond & last\n");
    }

    #[tokio::test]
    async fn invalid_pdf_is_an_error() {
        let err = LocalAnalyzer
            .analyze(b"not a pdf", FileKind::Pdf)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[tokio::test]
    async fn invalid_zip_is_an_ooxml_error() {
        let err = LocalAnalyzer
            .analyze(b"not a zip", FileKind::Docx)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Ooxml(_)));
    }

    #[tokio::test]
    async fn legacy_doc_is_unsupported_locally() {
        let err = LocalAnalyzer
            .analyze(b"\xD0\xCF\x11\xE0", FileKind::Doc)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractError::Unsupported(_)));
    }

    #[test]
    fn analyze_url_shape() {
        assert_eq!(
            analyze_url("https://x.cognitiveservices.azure.com/", "prebuilt-read", "2023-07-31"),
            "https://x.cognitiveservices.azure.com/formrecognizer/documentModels/prebuilt-read:analyze?api-version=2023-07-31"
        );
    }

    #[test]
    fn parses_content_and_pages() {
        let json = serde_json::json!({
            "status": "succeeded",
            "analyzeResult": {
                "content": "Line one\nLine two",
                "pages": [{"pageNumber": 1}, {"pageNumber": 2}]
            }
        });
        let doc = parse_analyze_result(&json).unwrap();
        assert_eq!(doc.text, "Line one\nLine two");
        assert_eq!(doc.page_count, Some(2));
    }
}
