//! Mail-message parsing.
//!
//! [`MailParser`] turns raw message bytes into a [`ParsedMessage`]: header
//! fields, body text and the attachment list. [`OutlookMsgParser`] reads
//! Outlook `.msg` files, which are OLE compound documents holding MAPI
//! properties:
//!
//! | Storage / stream | Content |
//! |------------------|---------|
//! | `__substg1.0_IIIITTTT` | variable-length property `IIII` of type `TTTT` |
//! | `__properties_version1.0` | fixed-length properties (16-byte entries after a header) |
//! | `__recip_version1.0_#N` | one recipient |
//! | `__attach_version1.0_#N` | one attachment |
//!
//! Attached Outlook items (attach method 5) live in a nested
//! `__substg1.0_3701000D` storage. They are copied out into a standalone
//! compound file so that the attachment can be handled like any other
//! `.msg` file; the parser never descends into them itself.

use std::collections::HashMap;
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::MailError;
use crate::models::{EmailProperties, MailAttachment};

/// A parsed mail message. Attachments are returned unexamined.
#[derive(Debug, Clone, Default)]
pub struct ParsedMessage {
    pub subject: String,
    pub sender: String,
    pub sender_email: String,
    pub to: String,
    pub cc: String,
    pub bcc: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub recipients: Vec<Recipient>,
    pub body: String,
    pub attachments: Vec<MailAttachment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub name: String,
    pub email: String,
    pub kind: RecipientKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientKind {
    To,
    Cc,
    Bcc,
}

impl ParsedMessage {
    /// Header properties for the message's record. Attachment names are
    /// filled in; their handoff paths are assigned by the expander.
    pub fn properties(&self) -> EmailProperties {
        EmailProperties {
            subject: self.subject.clone(),
            sender: self.sender.clone(),
            sender_email: self.sender_email.clone(),
            to: self.to.clone(),
            cc: self.cc.clone(),
            bcc: self.bcc.clone(),
            sent_at: self.sent_at,
            recipient_names: self.recipients.iter().map(|r| r.name.clone()).collect(),
            recipient_emails: self.recipients.iter().map(|r| r.email.clone()).collect(),
            attachment_names: self
                .attachments
                .iter()
                .map(|a| a.name.clone().unwrap_or_default())
                .collect(),
            attachment_paths: Vec::new(),
        }
    }
}

/// Parses raw message bytes. Synchronous; callers run it on the blocking pool.
pub trait MailParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedMessage, MailError>;
}

// MAPI property ids.
const PR_SUBJECT: u16 = 0x0037;
const PR_BODY: u16 = 0x1000;
const PR_BODY_HTML: u16 = 0x1013;
const PR_SENDER_NAME: u16 = 0x0C1A;
const PR_SENDER_EMAIL_ADDRESS: u16 = 0x0C1F;
const PR_SENDER_SMTP_ADDRESS: u16 = 0x5D01;
const PR_SENT_REPRESENTING_EMAIL: u16 = 0x0065;
const PR_DISPLAY_TO: u16 = 0x0E04;
const PR_DISPLAY_CC: u16 = 0x0E03;
const PR_DISPLAY_BCC: u16 = 0x0E02;
const PR_DISPLAY_NAME: u16 = 0x3001;
const PR_EMAIL_ADDRESS: u16 = 0x3003;
const PR_SMTP_ADDRESS: u16 = 0x39FE;
const PR_ATTACH_FILENAME: u16 = 0x3704;
const PR_ATTACH_LONG_FILENAME: u16 = 0x3707;
const PR_ATTACH_MIME_TAG: u16 = 0x370E;

// Fixed-length property tags (id << 16 | type).
const TAG_CLIENT_SUBMIT_TIME: u32 = 0x0039_0040;
const TAG_DELIVERY_TIME: u32 = 0x0E06_0040;
const TAG_RECIPIENT_TYPE: u32 = 0x0C15_0003;
const TAG_ATTACH_METHOD: u32 = 0x3705_0003;

const ATTACH_EMBEDDED_MSG: u32 = 5;

const PROPS_STREAM: &str = "__properties_version1.0";
const NAMEID_STORAGE: &str = "__nameid_version1.0";
const RECIP_PREFIX: &str = "__recip_version1.0_#";
const ATTACH_PREFIX: &str = "__attach_version1.0_#";
const ATTACH_DATA: &str = "__substg1.0_37010102";
const ATTACH_EMBEDDED: &str = "__substg1.0_3701000D";

/// Header sizes of `__properties_version1.0` by storage kind.
const TOP_LEVEL_HEADER: usize = 32;
const EMBEDDED_HEADER: usize = 24;
const SUBOBJECT_HEADER: usize = 8;

/// Seconds between 1601-01-01 and 1970-01-01.
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;

/// Parser for Outlook `.msg` compound files.
#[derive(Debug, Default, Clone)]
pub struct OutlookMsgParser;

type Compound<'a> = cfb::CompoundFile<Cursor<&'a [u8]>>;

impl MailParser for OutlookMsgParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedMessage, MailError> {
        let mut cf = cfb::CompoundFile::open(Cursor::new(bytes))
            .map_err(|e| MailError::Format(e.to_string()))?;
        let root = Path::new("/");
        if !cf.exists(root.join(PROPS_STREAM)) && read_string(&mut cf, root, PR_SUBJECT).is_none() {
            return Err(MailError::Format(
                "compound file has no message properties".into(),
            ));
        }

        let props = read_fixed_props(&mut cf, &root.join(PROPS_STREAM), TOP_LEVEL_HEADER);
        let recipients = read_recipients(&mut cf, root).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "recipient table unreadable");
            Vec::new()
        });
        let attachments = read_attachments(&mut cf, root)?;

        let body = match read_string(&mut cf, root, PR_BODY) {
            Some(text) if !text.trim().is_empty() => text,
            _ => read_html_body(&mut cf, root)
                .map(|html| html_to_text(&html))
                .unwrap_or_default(),
        };

        let sender_email = [
            PR_SENDER_SMTP_ADDRESS,
            PR_SENDER_EMAIL_ADDRESS,
            PR_SENT_REPRESENTING_EMAIL,
        ]
        .iter()
        .find_map(|id| read_string(&mut cf, root, *id).filter(|s| !s.is_empty()))
        .unwrap_or_default();

        let to = read_string(&mut cf, root, PR_DISPLAY_TO)
            .unwrap_or_else(|| join_recipients(&recipients, RecipientKind::To));
        let cc = read_string(&mut cf, root, PR_DISPLAY_CC)
            .unwrap_or_else(|| join_recipients(&recipients, RecipientKind::Cc));
        let bcc = read_string(&mut cf, root, PR_DISPLAY_BCC)
            .unwrap_or_else(|| join_recipients(&recipients, RecipientKind::Bcc));

        let sent_at = props
            .get(&TAG_CLIENT_SUBMIT_TIME)
            .or_else(|| props.get(&TAG_DELIVERY_TIME))
            .and_then(|v| filetime_to_utc(u64::from_le_bytes(*v)));

        Ok(ParsedMessage {
            subject: read_string(&mut cf, root, PR_SUBJECT).unwrap_or_default(),
            sender: read_string(&mut cf, root, PR_SENDER_NAME).unwrap_or_default(),
            sender_email,
            to,
            cc,
            bcc,
            sent_at,
            recipients,
            body,
            attachments,
        })
    }
}

fn substg_path(storage: &Path, id: u16, prop_type: &str) -> PathBuf {
    storage.join(format!("__substg1.0_{:04X}{}", id, prop_type))
}

/// A stream that must be present and readable.
fn read_required<F: Read + Seek>(
    cf: &mut cfb::CompoundFile<F>,
    path: &Path,
) -> Result<Vec<u8>, MailError> {
    let mut stream = cf.open_stream(path)?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf)?;
    Ok(buf)
}

fn read_stream<F: Read + Seek>(cf: &mut cfb::CompoundFile<F>, path: &Path) -> Option<Vec<u8>> {
    if !cf.is_stream(path) {
        return None;
    }
    let mut stream = cf.open_stream(path).ok()?;
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).ok()?;
    Some(buf)
}

/// A string property, stored as UTF-16LE (`001F`) or 8-bit (`001E`).
fn read_string(cf: &mut Compound<'_>, storage: &Path, id: u16) -> Option<String> {
    if let Some(raw) = read_stream(cf, &substg_path(storage, id, "001F")) {
        return Some(decode_utf16le(&raw));
    }
    read_stream(cf, &substg_path(storage, id, "001E"))
        .map(|raw| String::from_utf8_lossy(&raw).trim_end_matches('\0').to_string())
}

fn decode_utf16le(raw: &[u8]) -> String {
    let units = raw
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]));
    char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect::<String>()
        .trim_end_matches('\0')
        .to_string()
}

fn read_html_body(cf: &mut Compound<'_>, storage: &Path) -> Option<String> {
    if let Some(raw) = read_stream(cf, &substg_path(storage, PR_BODY_HTML, "0102")) {
        return Some(String::from_utf8_lossy(&raw).into_owned());
    }
    read_string(cf, storage, PR_BODY_HTML)
}

/// Fixed-length properties keyed by tag; each value is the raw 8 bytes.
fn read_fixed_props(
    cf: &mut Compound<'_>,
    stream: &Path,
    header_len: usize,
) -> HashMap<u32, [u8; 8]> {
    let mut props = HashMap::new();
    let Some(raw) = read_stream(cf, stream) else {
        return props;
    };
    for entry in raw.get(header_len..).unwrap_or_default().chunks_exact(16) {
        let tag = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
        let mut value = [0u8; 8];
        value.copy_from_slice(&entry[8..16]);
        props.insert(tag, value);
    }
    props
}

fn fixed_u32(props: &HashMap<u32, [u8; 8]>, tag: u32) -> Option<u32> {
    props
        .get(&tag)
        .map(|v| u32::from_le_bytes([v[0], v[1], v[2], v[3]]))
}

fn filetime_to_utc(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let secs = (filetime / 10_000_000) as i64 - FILETIME_UNIX_OFFSET;
    let nanos = ((filetime % 10_000_000) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Names of the child storages of `storage` starting with `prefix`, sorted.
fn child_storages(
    cf: &Compound<'_>,
    storage: &Path,
    prefix: &str,
) -> Result<Vec<PathBuf>, MailError> {
    let mut children: Vec<PathBuf> = cf
        .read_storage(storage)?
        .filter(|e| e.is_storage() && e.name().starts_with(prefix))
        .map(|e| e.path().to_path_buf())
        .collect();
    children.sort();
    Ok(children)
}

fn read_recipients(cf: &mut Compound<'_>, storage: &Path) -> Result<Vec<Recipient>, MailError> {
    let mut recipients = Vec::new();
    for dir in child_storages(cf, storage, RECIP_PREFIX)? {
        let props = read_fixed_props(cf, &dir.join(PROPS_STREAM), SUBOBJECT_HEADER);
        let kind = match fixed_u32(&props, TAG_RECIPIENT_TYPE) {
            Some(2) => RecipientKind::Cc,
            Some(3) => RecipientKind::Bcc,
            _ => RecipientKind::To,
        };
        let email = read_string(cf, &dir, PR_SMTP_ADDRESS)
            .filter(|s| !s.is_empty())
            .or_else(|| read_string(cf, &dir, PR_EMAIL_ADDRESS))
            .unwrap_or_default();
        recipients.push(Recipient {
            name: read_string(cf, &dir, PR_DISPLAY_NAME).unwrap_or_default(),
            email,
            kind,
        });
    }
    Ok(recipients)
}

fn join_recipients(recipients: &[Recipient], kind: RecipientKind) -> String {
    recipients
        .iter()
        .filter(|r| r.kind == kind)
        .map(|r| if r.name.is_empty() { r.email.as_str() } else { r.name.as_str() })
        .collect::<Vec<_>>()
        .join("; ")
}

/// Attachments in storage order. An attachment whose content cannot be
/// read is returned with `error` set so that its siblings and the body
/// are unaffected.
fn read_attachments(
    cf: &mut Compound<'_>,
    storage: &Path,
) -> Result<Vec<MailAttachment>, MailError> {
    let mut attachments = Vec::new();
    for dir in child_storages(cf, storage, ATTACH_PREFIX)? {
        let props = read_fixed_props(cf, &dir.join(PROPS_STREAM), SUBOBJECT_HEADER);
        let name = [PR_ATTACH_LONG_FILENAME, PR_ATTACH_FILENAME, PR_DISPLAY_NAME]
            .iter()
            .find_map(|id| read_string(cf, &dir, *id).filter(|s| !s.trim().is_empty()));
        let mime_type = read_string(cf, &dir, PR_ATTACH_MIME_TAG);
        let embedded_dir = dir.join(ATTACH_EMBEDDED);

        let embedded = fixed_u32(&props, TAG_ATTACH_METHOD) == Some(ATTACH_EMBEDDED_MSG)
            || cf.is_storage(&embedded_dir);
        let content = if embedded && cf.is_storage(&embedded_dir) {
            extract_embedded_message(cf, &embedded_dir)
        } else {
            let data = dir.join(ATTACH_DATA);
            if !cf.is_stream(&data) {
                tracing::debug!(attachment = %dir.display(), "attachment has no data stream, skipping");
                continue;
            }
            read_required(cf, &data)
        };
        if let Err(ref e) = content {
            tracing::warn!(attachment = %dir.display(), error = %e, "attachment content unreadable");
        }
        attachments.push(attachment_from(name, embedded, mime_type, content));
    }
    Ok(attachments)
}

fn attachment_from(
    name: Option<String>,
    embedded_message: bool,
    mime_type: Option<String>,
    content: Result<Vec<u8>, MailError>,
) -> MailAttachment {
    let (bytes, error) = match content {
        Ok(bytes) => (bytes, None),
        Err(e) => (Vec::new(), Some(e.to_string())),
    };
    MailAttachment {
        name,
        bytes,
        embedded_message,
        mime_type,
        error,
    }
}

/// Copy an embedded message storage into a standalone `.msg` file.
///
/// The properties stream header grows from the embedded to the top-level
/// size, and the parent's named-property map is carried over so that
/// named properties still resolve.
fn extract_embedded_message(cf: &mut Compound<'_>, source: &Path) -> Result<Vec<u8>, MailError> {
    let mut entries: Vec<(PathBuf, PathBuf, bool)> = Vec::new();
    for entry in cf.walk_storage(source)? {
        let Ok(rel) = entry.path().strip_prefix(source) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            continue;
        }
        entries.push((entry.path().to_path_buf(), Path::new("/").join(rel), entry.is_stream()));
    }
    let nameid = Path::new("/").join(NAMEID_STORAGE);
    let has_own_nameid = entries.iter().any(|(_, dest, _)| dest == &nameid);
    if !has_own_nameid && cf.is_storage(&nameid) {
        for entry in cf.walk_storage(&nameid)? {
            entries.push((entry.path().to_path_buf(), entry.path().to_path_buf(), entry.is_stream()));
        }
    }

    let mut out = cfb::CompoundFile::create(Cursor::new(Vec::new()))?;
    let top_props = Path::new("/").join(PROPS_STREAM);
    for (src, dest, is_stream) in entries {
        if !is_stream {
            out.create_storage(&dest)?;
            continue;
        }
        let mut data = read_required(cf, &src)?;
        if dest == top_props && data.len() >= EMBEDDED_HEADER {
            let padding = [0u8; TOP_LEVEL_HEADER - EMBEDDED_HEADER];
            data.splice(EMBEDDED_HEADER..EMBEDDED_HEADER, padding);
        }
        let mut stream = out.create_stream(&dest)?;
        stream.write_all(&data)?;
        stream.flush()?;
    }
    out.flush()?;
    Ok(out.into_inner().into_inner())
}

static HIDDEN_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style|head)\b.*?</(script|style|head)>").expect("valid pattern")
});
static LINE_BREAKS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)<br\s*/?>").expect("valid pattern"));
static BLOCK_ENDS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(p|div|tr|li|h[1-6])>").expect("valid pattern"));
static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<[^>]*>").expect("valid pattern"));

/// Reduce an HTML body to readable plain text.
pub fn html_to_text(html: &str) -> String {
    let text = HIDDEN_BLOCKS.replace_all(html, "");
    let text = LINE_BREAKS.replace_all(&text, "\n");
    let text = BLOCK_ENDS.replace_all(&text, "\n");
    let text = TAGS.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let mut out = String::new();
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() && out.ends_with("\n\n") {
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    out.trim().to_string()
}
