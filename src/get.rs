//! Record retrieval by source path.
//!
//! Fetches the stored record for one path (top-level file or attachment)
//! and prints it as JSON. Used by `docsum get`.

use anyhow::{bail, Result};

use crate::config::Config;
use crate::db;
use crate::models::{record_key, StoredRecord};
use crate::store::{RecordStore, SqliteRecordStore};

/// Look up the record for `path`.
pub async fn get_record(config: &Config, path: &str) -> Result<Option<StoredRecord>> {
    let pool = db::connect(config).await?;
    let store = SqliteRecordStore::new(pool.clone());
    let record = store.get(&record_key(path)).await;
    pool.close().await;
    record
}

/// CLI entry point: print the record as pretty JSON on stdout.
///
/// With `brief`, the extracted text and page texts are left out.
pub async fn run_get(config: &Config, path: &str, brief: bool) -> Result<()> {
    let Some(stored) = get_record(config, path).await? else {
        bail!("no record for path: {}", path);
    };

    let mut value = serde_json::to_value(&stored)?;
    if brief {
        if let Some(obj) = value.as_object_mut() {
            obj.remove("extracted_text");
            obj.remove("page_texts");
        }
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
