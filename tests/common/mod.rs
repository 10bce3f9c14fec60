//! Shared fixtures for the binary tests.

use std::io::{Cursor, Write};
use std::path::Path;

/// A message to be written as an Outlook `.msg` compound file.
pub struct Msg {
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

pub enum Attachment {
    File(String, Vec<u8>),
    Message(Msg),
}

impl Msg {
    pub fn new(subject: &str, body: &str) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    pub fn file(mut self, name: &str, data: &[u8]) -> Self {
        self.attachments
            .push(Attachment::File(name.into(), data.to_vec()));
        self
    }

    pub fn message(mut self, inner: Msg) -> Self {
        self.attachments.push(Attachment::Message(inner));
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut cf = cfb::CompoundFile::create(Cursor::new(Vec::new())).unwrap();
        cf.create_storage("/__nameid_version1.0").unwrap();
        write_message(&mut cf, Path::new("/"), self, 32);
        cf.flush().unwrap();
        cf.into_inner().into_inner()
    }
}

type Cf = cfb::CompoundFile<Cursor<Vec<u8>>>;

fn utf16(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

fn put(cf: &mut Cf, path: &Path, data: &[u8]) {
    let mut stream = cf.create_stream(path).unwrap();
    stream.write_all(data).unwrap();
}

fn string_prop(cf: &mut Cf, dir: &Path, id: u16, value: &str) {
    put(cf, &dir.join(format!("__substg1.0_{:04X}001F", id)), &utf16(value));
}

/// Properties stream with a header of `header` bytes and one PT_LONG entry.
fn props(header: usize, tag: Option<(u32, u32)>) -> Vec<u8> {
    let mut out = vec![0u8; header];
    if let Some((tag, value)) = tag {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&6u32.to_le_bytes());
        out.extend_from_slice(&(value as u64).to_le_bytes());
    }
    out
}

fn write_message(cf: &mut Cf, dir: &Path, msg: &Msg, header: usize) {
    string_prop(cf, dir, 0x0037, &msg.subject);
    string_prop(cf, dir, 0x1000, &msg.body);
    string_prop(cf, dir, 0x0C1A, "Alice");
    string_prop(cf, dir, 0x5D01, "alice@example.com");
    string_prop(cf, dir, 0x0E04, "Bob");
    put(cf, &dir.join("__properties_version1.0"), &props(header, None));

    for (i, att) in msg.attachments.iter().enumerate() {
        let adir = dir.join(format!("__attach_version1.0_#{:08X}", i));
        cf.create_storage(&adir).unwrap();
        match att {
            Attachment::File(name, data) => {
                string_prop(cf, &adir, 0x3707, name);
                put(cf, &adir.join("__substg1.0_37010102"), data);
                put(cf, &adir.join("__properties_version1.0"), &props(8, Some((0x3705_0003, 1))));
            }
            Attachment::Message(inner) => {
                string_prop(cf, &adir, 0x3001, &inner.subject);
                put(cf, &adir.join("__properties_version1.0"), &props(8, Some((0x3705_0003, 5))));
                let inner_dir = adir.join("__substg1.0_3701000D");
                cf.create_storage(&inner_dir).unwrap();
                write_message(cf, &inner_dir, inner, 24);
            }
        }
    }
}
