//! Trigger handling.
//!
//! Wires the configured stores and services into a [`Pipeline`] and drives
//! it for the two ways work arrives: `process` (one notification for one
//! path) and `scan` (walk the watched root, optionally incremental via a
//! modification-time checkpoint).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use sqlx::SqlitePool;

use crate::analysis::create_analyzer;
use crate::blob::{BlobEntry, BlobStore, FsBlobStore, PathFilter};
use crate::blob_s3::S3BlobStore;
use crate::config::Config;
use crate::db;
use crate::expand::AttachmentExpander;
use crate::extract::TextExtractor;
use crate::mail::OutlookMsgParser;
use crate::markings::MarkingSet;
use crate::pipeline::{ItemOutcome, Pipeline, PipelineSettings, ProcessReport};
use crate::progress::{ScanProgressEvent, ScanProgressReporter};
use crate::record::RecordWriter;
use crate::store::SqliteRecordStore;
use crate::summarize::{create_summarizer, SummaryPolicy};

/// Open the watched store named by `[storage]`.
pub fn open_source_store(config: &Config) -> Result<Arc<dyn BlobStore>> {
    match config.storage.backend.as_str() {
        "filesystem" => {
            let root = config
                .storage
                .root
                .as_ref()
                .context("storage.root is required for the filesystem backend")?;
            Ok(Arc::new(
                FsBlobStore::new(root).follow_symlinks(config.storage.follow_symlinks),
            ))
        }
        "s3" => {
            let s3 = config
                .storage
                .s3
                .clone()
                .context("[storage.s3] is required for the s3 backend")?;
            Ok(Arc::new(S3BlobStore::new(s3)?))
        }
        other => bail!("Unknown storage backend: '{}'", other),
    }
}

/// Discovery filter for the watched root. Staged attachments are excluded
/// when the handoff area shares the watched directory.
pub fn path_filter(config: &Config) -> Result<PathFilter> {
    let shares_root = config.storage.backend == "filesystem"
        && config.handoff_root().map(Path::to_path_buf) == config.storage.root;
    let prefix = shares_root.then_some(config.handoff.prefix.as_str());
    PathFilter::from_config(&config.storage, prefix)
}

/// Build the orchestrator for `config`, writing records through `pool`.
pub fn build_pipeline(config: &Config, pool: SqlitePool) -> Result<Pipeline> {
    let source = open_source_store(config)?;
    let handoff_root = config
        .handoff_root()
        .context("handoff.root is required when storage.root is not set")?;
    let expander = AttachmentExpander::new(
        Arc::new(FsBlobStore::new(handoff_root)),
        config.handoff.prefix.clone(),
    );

    let analyzer = create_analyzer(&config.extraction)?;
    let extractor = TextExtractor::new(
        analyzer,
        Arc::new(OutlookMsgParser),
        config.extraction.local_pdf_pages,
        Duration::from_secs(config.extraction.operation_timeout_secs),
    );

    let summarizer = create_summarizer(&config.summarization)?;
    let writer = RecordWriter::new(
        Arc::new(SqliteRecordStore::new(pool)),
        config.persistence.max_retries,
        Duration::from_millis(config.persistence.backoff_ms),
    );

    let markings = match config.markings.path {
        Some(ref path) => MarkingSet::load(path)?,
        None => MarkingSet::empty(),
    };

    Ok(Pipeline::builder(
        source,
        expander,
        extractor,
        summarizer,
        SummaryPolicy::from_config(&config.summarization),
        writer,
        PipelineSettings::from(&config.pipeline),
    )
    .markings(markings)
    .build())
}

/// Handle one trigger notification for `path`.
///
/// Fails when any item under the path could not be persisted.
pub async fn run_process(config: &Config, path: &str, force: bool) -> Result<()> {
    let filter = path_filter(config)?;
    if !filter.is_discoverable(path) {
        println!("process {}", path);
        println!("  ignored: not a discoverable document");
        return Ok(());
    }

    let pool = db::connect(config).await?;
    let pipeline = build_pipeline(config, pool.clone())?;
    let report = pipeline.process_path(path, force).await;
    pool.close().await;

    print_report(&report);
    fail_on_errors(std::slice::from_ref(&report))
}

/// Walk the watched root and process every discoverable file.
pub async fn run_scan(
    config: &Config,
    full: bool,
    dry_run: bool,
    force: bool,
    limit: Option<usize>,
    progress: &dyn ScanProgressReporter,
) -> Result<()> {
    let pool = db::connect(config).await?;
    let source = open_source_store(config)?;
    let filter = path_filter(config)?;
    let checkpoint_key = format!("storage:{}", source.describe());

    let checkpoint: Option<i64> = if full {
        None
    } else {
        get_checkpoint(&pool, &checkpoint_key).await?
    };

    progress.report(ScanProgressEvent::Discovering {
        store: source.describe(),
    });
    let entries = source.list().await?;
    let listed = entries.len();
    let ScanSelection { entries, ceiling } = select_for_scan(entries, &filter, checkpoint, limit);

    if dry_run {
        println!("scan {} (dry-run)", source.describe());
        println!("  listed: {}", listed);
        println!("  to process: {}", entries.len());
        for entry in &entries {
            println!("  {}", entry.path);
        }
        pool.close().await;
        return Ok(());
    }

    let pipeline = build_pipeline(config, pool.clone())?;
    let total = entries.len() as u64;
    let mut reports = Vec::with_capacity(entries.len());
    let mut done = 0u64;
    let mut max_modified: i64 = checkpoint.unwrap_or(0);

    // Paths overlap so one slow file does not stall the scan; items across
    // all of them share the pipeline's `max_concurrency` permits.
    let mut results = stream::iter(entries)
        .map(|entry| {
            let pipeline = pipeline.clone();
            async move {
                let report = pipeline.process_path(&entry.path, force).await;
                (entry, report)
            }
        })
        .buffer_unordered(config.pipeline.max_concurrency);

    while let Some((entry, report)) = results.next().await {
        done += 1;
        progress.report(ScanProgressEvent::Processing {
            store: source.describe(),
            n: done,
            total,
        });
        if let Some(ts) = entry.modified_at.map(|m| m.timestamp()) {
            max_modified = max_modified.max(ts);
        }
        reports.push(report);
    }
    if let Some(ceiling) = ceiling {
        max_modified = max_modified.min(ceiling);
    }

    let failed = reports.iter().any(|r| !r.is_ok());
    if failed {
        tracing::warn!("failures during scan; checkpoint not advanced");
    } else {
        set_checkpoint(&pool, &checkpoint_key, max_modified).await?;
    }

    let recorded: usize = reports.iter().map(ProcessReport::recorded).sum();
    let skipped: usize = reports.iter().map(ProcessReport::skipped).sum();
    let failures: usize = reports.iter().map(|r| r.failures().count()).sum();

    println!("scan {}", source.describe());
    println!("  files processed: {}", reports.len());
    println!("  records written: {}", recorded);
    println!("  skipped (unchanged): {}", skipped);
    println!("  failures: {}", failures);
    println!("  checkpoint: {}", if failed { checkpoint.unwrap_or(0) } else { max_modified });

    pool.close().await;
    fail_on_errors(&reports)?;
    println!("ok");
    Ok(())
}

/// The files one scan will process.
struct ScanSelection {
    entries: Vec<BlobEntry>,
    /// Highest checkpoint that keeps every file left out by the limit
    /// discoverable on the next incremental scan.
    ceiling: Option<i64>,
}

/// Filter `entries` to what this scan should process, oldest first.
///
/// Files without a modification time sort last; they always pass the
/// checkpoint and never bound it.
fn select_for_scan(
    mut entries: Vec<BlobEntry>,
    filter: &PathFilter,
    checkpoint: Option<i64>,
    limit: Option<usize>,
) -> ScanSelection {
    entries.retain(|e| filter.is_discoverable(&e.path));
    if let Some(cp) = checkpoint {
        entries.retain(|e| e.modified_at.map(|m| m.timestamp() > cp).unwrap_or(true));
    }
    entries.sort_by(|a, b| scan_order(a).cmp(&scan_order(b)));

    let mut ceiling = None;
    if let Some(lim) = limit {
        if let Some(next) = entries.get(lim) {
            ceiling = next.modified_at.map(|m| m.timestamp() - 1);
        }
        entries.truncate(lim);
    }
    ScanSelection { entries, ceiling }
}

fn scan_order(entry: &BlobEntry) -> (bool, Option<DateTime<Utc>>, &str) {
    (entry.modified_at.is_none(), entry.modified_at, entry.path.as_str())
}

fn print_report(report: &ProcessReport) {
    println!("process {}", report.path);
    for item in &report.items {
        match &item.outcome {
            ItemOutcome::Recorded {
                extraction,
                summary,
            } => println!(
                "  recorded  {}  extraction={} summary={}",
                item.path,
                extraction.as_str(),
                summary.as_str()
            ),
            ItemOutcome::Skipped => println!("  skipped   {}  (unchanged)", item.path),
            ItemOutcome::Failed(e) => println!("  FAILED    {}  {}", item.path, e),
            ItemOutcome::Aborted(msg) => println!("  ABORTED   {}  {}", item.path, msg),
        }
    }
}

fn fail_on_errors(reports: &[ProcessReport]) -> Result<()> {
    let failed: Vec<String> = reports
        .iter()
        .flat_map(|r| r.failures())
        .map(|i| i.path.clone())
        .collect();
    if !failed.is_empty() {
        bail!(
            "{} item(s) could not be recorded: {}",
            failed.len(),
            failed.join(", ")
        );
    }
    Ok(())
}

async fn get_checkpoint(pool: &SqlitePool, source: &str) -> Result<Option<i64>> {
    let result: Option<String> =
        sqlx::query_scalar("SELECT cursor FROM checkpoints WHERE source = ?")
            .bind(source)
            .fetch_optional(pool)
            .await?;

    Ok(result.and_then(|s| s.parse::<i64>().ok()))
}

async fn set_checkpoint(pool: &SqlitePool, source: &str, cursor_val: i64) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query(
        r#"
        INSERT INTO checkpoints (source, cursor, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(source) DO UPDATE SET cursor = excluded.cursor, updated_at = excluded.updated_at
        "#,
    )
    .bind(source)
    .bind(cursor_val.to_string())
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn config(root: &Path, handoff: Option<&Path>) -> Config {
        let handoff = handoff
            .map(|h| format!("[handoff]\nroot = {:?}\n", h))
            .unwrap_or_default();
        let toml_str = format!(
            "[db]\npath = \"x.sqlite\"\n[storage]\nroot = {:?}\n{}",
            root, handoff
        );
        toml::from_str(&toml_str).unwrap()
    }

    #[test]
    fn shared_handoff_area_is_not_discovered() {
        let root = Path::new("/data/inbox");
        let filter = path_filter(&config(root, None)).unwrap();
        assert!(filter.is_discoverable("team/a.pdf"));
        assert!(!filter.is_discoverable("email_attachments/team/m/a.pdf"));
    }

    #[test]
    fn separate_handoff_area_leaves_prefix_alone() {
        let filter =
            path_filter(&config(Path::new("/data/inbox"), Some(Path::new("/data/handoff")))).unwrap();
        assert!(filter.is_discoverable("email_attachments/a.pdf"));
    }

    fn entry(path: &str, modified: Option<i64>) -> BlobEntry {
        BlobEntry {
            path: path.to_string(),
            size: 1,
            modified_at: modified.and_then(|ts| Utc.timestamp_opt(ts, 0).single()),
        }
    }

    fn paths(selection: &ScanSelection) -> Vec<&str> {
        selection.entries.iter().map(|e| e.path.as_str()).collect()
    }

    #[test]
    fn scan_selection_is_oldest_first() {
        let filter = path_filter(&config(Path::new("/data/inbox"), None)).unwrap();
        let listed = vec![
            entry("a/new.pdf", Some(300)),
            entry("b/unknown.txt", None),
            entry("c/old.txt", Some(100)),
            entry("d/sheet.xlsx", Some(50)),
            entry("e/mid.msg", Some(200)),
        ];
        let all = select_for_scan(listed.clone(), &filter, None, None);
        assert_eq!(
            paths(&all),
            vec!["c/old.txt", "e/mid.msg", "a/new.pdf", "b/unknown.txt"]
        );
        assert_eq!(all.ceiling, None);

        let incremental = select_for_scan(listed, &filter, Some(150), None);
        assert_eq!(paths(&incremental), vec!["e/mid.msg", "a/new.pdf", "b/unknown.txt"]);
    }

    #[test]
    fn limited_scan_holds_checkpoint_below_the_files_left_out() {
        let filter = path_filter(&config(Path::new("/data/inbox"), None)).unwrap();
        let listed = vec![
            entry("z/first.txt", Some(100)),
            entry("a/second.txt", Some(200)),
            entry("b/third.txt", Some(200)),
        ];
        let limited = select_for_scan(listed.clone(), &filter, None, Some(2));
        assert_eq!(paths(&limited), vec!["z/first.txt", "a/second.txt"]);
        // b/third.txt shares the newest processed mtime.
        assert_eq!(limited.ceiling, Some(199));

        let untouched = select_for_scan(listed, &filter, None, Some(3));
        assert_eq!(untouched.ceiling, None);
    }

    #[tokio::test]
    async fn checkpoints_round_trip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("c.sqlite")).await.unwrap();
        crate::migrate::apply(&pool).await.unwrap();
        assert_eq!(get_checkpoint(&pool, "storage:x").await.unwrap(), None);
        set_checkpoint(&pool, "storage:x", 42).await.unwrap();
        set_checkpoint(&pool, "storage:x", 43).await.unwrap();
        assert_eq!(get_checkpoint(&pool, "storage:x").await.unwrap(), Some(43));
    }
}
