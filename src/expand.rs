//! Attachment Expander.
//!
//! Turns the attachments of a parsed message into independent work items.
//! Each message moves through [`MessageState`]:
//!
//! ```text
//! Discovered → Parsed → Expanding → Expanded
//! ```
//!
//! While expanding, every attachment gets a logical path below the handoff
//! prefix. Non-message attachments are staged in the handoff store;
//! attached messages are handed back to the orchestrator in memory and go
//! through the same cycle. The expander never recurses itself: the
//! orchestrator's work queue carries the nesting, and an
//! [`ExpansionBudget`] caps the total number of items one top-level
//! message may produce.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;

use crate::blob::BlobStore;
use crate::models::{FileKind, MailAttachment, SourceItem};

/// Lifecycle of one message item during expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Discovered,
    Parsed,
    Expanding,
    Expanded,
}

impl fmt::Display for MessageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageState::Discovered => "discovered",
            MessageState::Parsed => "parsed",
            MessageState::Expanding => "expanding",
            MessageState::Expanded => "expanded",
        })
    }
}

/// An attachment with its assigned path, not yet queued.
#[derive(Debug, Clone)]
pub struct PendingAttachment {
    pub path: String,
    pub name: String,
    pub kind: FileKind,
    pub bytes: Arc<[u8]>,
    /// Path of the message the attachment came from.
    pub parent: String,
    pub depth: usize,
    /// Carried over from [`MailAttachment::error`].
    pub error: Option<String>,
}

impl PendingAttachment {
    pub fn is_message(&self) -> bool {
        self.kind.is_message()
    }

    pub fn into_item(self) -> SourceItem {
        SourceItem {
            path: self.path,
            kind: self.kind,
            bytes: self.bytes,
            parent: Some(self.parent),
            depth: self.depth,
            modified_at: None,
        }
    }
}

/// Counts items produced under one top-level message.
#[derive(Debug, Clone)]
pub struct ExpansionBudget {
    cap: usize,
    used: usize,
}

impl ExpansionBudget {
    pub fn new(cap: usize) -> Self {
        Self { cap, used: 0 }
    }

    /// Take one slot. Returns false once the cap is reached.
    pub fn admit(&mut self) -> bool {
        if self.used >= self.cap {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn used(&self) -> usize {
        self.used
    }
}

pub struct AttachmentExpander {
    handoff: Arc<dyn BlobStore>,
    prefix: String,
}

impl AttachmentExpander {
    pub fn new(handoff: Arc<dyn BlobStore>, prefix: impl Into<String>) -> Self {
        Self {
            handoff,
            prefix: prefix.into().trim_matches('/').to_string(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Assign a path, kind and depth to each attachment of `parent`.
    ///
    /// Order follows the message. Duplicate names within one message get a
    /// numeric suffix so that no attachment overwrites a sibling.
    pub fn plan(&self, parent: &SourceItem, attachments: Vec<MailAttachment>) -> Vec<PendingAttachment> {
        let folder = self.folder_for(&parent.path);
        let mut used = HashSet::new();
        attachments
            .into_iter()
            .enumerate()
            .map(|(i, att)| {
                let name = unique_name(attachment_name(&att, i + 1), &mut used);
                let kind = if att.embedded_message {
                    FileKind::Msg
                } else {
                    FileKind::from_path(&name)
                };
                PendingAttachment {
                    path: format!("{}/{}", folder, name),
                    name,
                    kind,
                    bytes: Arc::from(att.bytes),
                    parent: parent.path.clone(),
                    depth: parent.depth + 1,
                    error: att.error,
                }
            })
            .collect()
    }

    /// Write a non-message attachment to the handoff store.
    pub async fn stage(&self, pending: &PendingAttachment) -> Result<()> {
        self.handoff.write(&pending.path, &pending.bytes).await?;
        tracing::debug!(path = %pending.path, bytes = pending.bytes.len(), "staged attachment");
        Ok(())
    }

    /// Read a staged attachment back for extraction.
    pub async fn load(&self, pending: &PendingAttachment) -> Result<Arc<[u8]>> {
        let blob = self.handoff.read(&pending.path).await?;
        Ok(Arc::from(blob.bytes))
    }

    /// `{prefix}/{parent path without extension}`. Parents that already
    /// live under the prefix are not prefixed twice.
    fn folder_for(&self, parent_path: &str) -> String {
        let parent = parent_path.trim_start_matches('/');
        let parent = parent
            .strip_prefix(&format!("{}/", self.prefix))
            .unwrap_or(parent);
        let base = match parent.rsplit_once('.') {
            Some((stem, ext)) if !ext.contains('/') && !stem.ends_with('/') => stem,
            _ => parent,
        };
        format!("{}/{}", self.prefix, base)
    }
}

/// A safe file name for an attachment: separators and control characters
/// replaced, nameless attachments numbered, and attached messages given a
/// `.msg` extension.
fn attachment_name(att: &MailAttachment, ordinal: usize) -> String {
    let cleaned: String = att
        .name
        .as_deref()
        .unwrap_or_default()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim().trim_matches('.').to_string();
    let mut name = if cleaned.is_empty() {
        format!("attachment-{}", ordinal)
    } else {
        cleaned
    };
    if att.embedded_message && FileKind::from_path(&name) != FileKind::Msg {
        name.push_str(".msg");
    }
    name
}

fn unique_name(name: String, used: &mut HashSet<String>) -> String {
    if used.insert(name.clone()) {
        return name;
    }
    let (stem, ext) = match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
        _ => (name.clone(), String::new()),
    };
    let mut n = 2;
    loop {
        let candidate = format!("{} ({}){}", stem, n, ext);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
