//! Structured views of commit, tree, and tag payloads.
//!
//! Parsing takes a [`GitObject`] and checks its type before looking at the
//! bytes; creation goes the other way and yields an object whose id is
//! computed from the serialized payload.
//!
//! Payloads are parsed as bytes. Git does not require commit text or tree
//! entry names to be UTF-8, so names stay raw and text fields are decoded
//! lossily.

use crate::{GitObject, ObjectId, ObjectType, Result, StorageError};
use std::cmp::Ordering;

/// Mode of a sub-tree entry.
pub const MODE_TREE: u32 = 0o040000;
/// Mode of a regular file.
pub const MODE_FILE: u32 = 0o100644;
/// Mode of an executable file.
pub const MODE_EXECUTABLE: u32 = 0o100755;
/// Mode of a symbolic link.
pub const MODE_SYMLINK: u32 = 0o120000;
/// Mode of a submodule (gitlink) entry. Never dereferenced.
pub const MODE_SUBMODULE: u32 = 0o160000;

/// A parsed commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Root tree of the snapshot.
    pub tree: ObjectId,
    /// Parents in the order they appear in the payload.
    pub parents: Vec<ObjectId>,
    /// Author line value (`Name <email> <timestamp> <tz>`).
    pub author: String,
    /// Committer line value.
    pub committer: String,
    /// Message, everything after the first blank line.
    pub message: String,
}

impl Commit {
    /// Committer timestamp in seconds since the epoch, if the committer
    /// line carries one.
    pub fn date(&self) -> Option<i64> {
        signature_timestamp(&self.committer)
    }
}

/// One entry of a tree object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Unix-style mode, numeric.
    pub mode: u32,
    /// Entry name (single path component), as raw bytes.
    pub name: Vec<u8>,
    /// Referenced object.
    pub id: ObjectId,
}

impl TreeEntry {
    /// Creates a tree entry.
    pub fn new(mode: u32, name: impl Into<Vec<u8>>, id: ObjectId) -> Self {
        Self {
            mode,
            name: name.into(),
            id,
        }
    }

    /// True for sub-tree entries.
    pub fn is_tree(&self) -> bool {
        self.mode == MODE_TREE
    }

    /// True for submodule entries.
    pub fn is_submodule(&self) -> bool {
        self.mode == MODE_SUBMODULE
    }

    /// True for entries that point at a blob (files and symlinks).
    pub fn is_blob(&self) -> bool {
        !self.is_tree() && !self.is_submodule()
    }

    /// Canonical git ordering: by name, with directories compared as if
    /// their name ended in `/`.
    pub fn canonical_cmp(&self, other: &Self) -> Ordering {
        let a = self.name.iter().chain(self.dir_suffix());
        let b = other.name.iter().chain(other.dir_suffix());
        a.cmp(b)
    }

    fn dir_suffix(&self) -> Option<&'static u8> {
        if self.is_tree() {
            Some(&b'/')
        } else {
            None
        }
    }
}

/// A parsed annotated tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Tagged object.
    pub object: ObjectId,
    /// Declared type of the tagged object.
    pub target_type: ObjectType,
    /// Tag name.
    pub name: String,
    /// Tagger line value.
    pub tagger: String,
    /// Tag message.
    pub message: String,
}

fn expect_type(object: &GitObject, expected: ObjectType) -> Result<()> {
    if object.object_type != expected {
        return Err(StorageError::TypeMismatch {
            expected: expected.as_str(),
            actual: object.object_type.as_str(),
        });
    }
    Ok(())
}

/// Splits a header block from the message. Continuation lines (leading
/// space, used by `gpgsig` and `mergetag`) are folded into the previous
/// header's value.
fn parse_headers(data: &[u8]) -> (Vec<(&[u8], Vec<u8>)>, &[u8]) {
    let (head, message) = match data.windows(2).position(|w| w == b"\n\n") {
        Some(pos) => (&data[..pos], &data[pos + 2..]),
        None => (data, &data[data.len()..]),
    };

    let mut headers: Vec<(&[u8], Vec<u8>)> = Vec::new();
    for line in head.split(|&b| b == b'\n') {
        if line.is_empty() {
            continue;
        }
        if let Some(cont) = line.strip_prefix(b" ") {
            if let Some((_, value)) = headers.last_mut() {
                value.push(b'\n');
                value.extend_from_slice(cont);
            }
            continue;
        }
        let (key, value) = match line.iter().position(|&b| b == b' ') {
            Some(space) => (&line[..space], &line[space + 1..]),
            None => (line, &line[line.len()..]),
        };
        headers.push((key, value.to_vec()));
    }
    (headers, message)
}

fn header_id(value: &[u8]) -> Result<ObjectId> {
    let hex = std::str::from_utf8(value)
        .map_err(|_| StorageError::MalformedObjectId(String::from_utf8_lossy(value).into_owned()))?;
    ObjectId::from_hex(hex.trim())
}

fn text(value: &[u8]) -> String {
    String::from_utf8_lossy(value).into_owned()
}

fn signature_timestamp(signature: &str) -> Option<i64> {
    let mut parts = signature.rsplitn(3, ' ');
    let _tz = parts.next()?;
    parts.next()?.parse().ok()
}

/// Parses a commit object.
pub fn parse_commit(object: &GitObject) -> Result<Commit> {
    expect_type(object, ObjectType::Commit)?;
    let (headers, message) = parse_headers(&object.data);

    let mut tree = None;
    let mut parents = Vec::new();
    let mut author = String::new();
    let mut committer = String::new();
    for (key, value) in headers {
        match key {
            b"tree" => tree = Some(header_id(&value)?),
            b"parent" => parents.push(header_id(&value)?),
            b"author" => author = text(&value),
            b"committer" => committer = text(&value),
            _ => {}
        }
    }

    let tree = tree.ok_or_else(|| {
        StorageError::InvalidCommit(format!("commit {} has no tree reference", object.id))
    })?;

    Ok(Commit {
        tree,
        parents,
        author,
        committer,
        message: text(message),
    })
}

/// Parses a tree object into its entries.
pub fn parse_tree(object: &GitObject) -> Result<Vec<TreeEntry>> {
    expect_type(object, ObjectType::Tree)?;
    let data = &object.data;
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let space = data[offset..]
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| malformed_tree(object, "missing mode separator"))?;
        let mode_str = std::str::from_utf8(&data[offset..offset + space])
            .map_err(|_| malformed_tree(object, "non-ascii mode"))?;
        let mode = u32::from_str_radix(mode_str, 8)
            .map_err(|_| malformed_tree(object, &format!("invalid mode {:?}", mode_str)))?;
        offset += space + 1;

        let nul = data[offset..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| malformed_tree(object, "missing NUL terminator"))?;
        let name = data[offset..offset + nul].to_vec();
        offset += nul + 1;

        if offset + 20 > data.len() {
            return Err(malformed_tree(object, "truncated entry id"));
        }
        let id = ObjectId::from_slice(&data[offset..offset + 20])?;
        offset += 20;

        entries.push(TreeEntry { mode, name, id });
    }

    Ok(entries)
}

fn malformed_tree(object: &GitObject, reason: &str) -> StorageError {
    StorageError::MalformedObject(format!("tree {}: {}", object.id, reason))
}

/// Parses an annotated tag object.
pub fn parse_tag(object: &GitObject) -> Result<Tag> {
    expect_type(object, ObjectType::Tag)?;
    let (headers, message) = parse_headers(&object.data);

    let mut target = None;
    let mut target_type = None;
    let mut name = String::new();
    let mut tagger = String::new();
    for (key, value) in headers {
        match key {
            b"object" => target = Some(header_id(&value)?),
            b"type" => target_type = Some(ObjectType::parse(text(&value).trim())?),
            b"tag" => name = text(&value),
            b"tagger" => tagger = text(&value),
            _ => {}
        }
    }

    let object_id = target.ok_or_else(|| {
        StorageError::MalformedObject(format!("tag {} has no object line", object.id))
    })?;
    let target_type = target_type.ok_or_else(|| {
        StorageError::MalformedObject(format!("tag {} has no type line", object.id))
    })?;

    Ok(Tag {
        object: object_id,
        target_type,
        name,
        tagger,
        message: text(message),
    })
}

/// Serializes a commit.
pub fn create_commit(commit: &Commit) -> GitObject {
    let mut content = format!("tree {}\n", commit.tree);
    for parent in &commit.parents {
        content.push_str(&format!("parent {}\n", parent));
    }
    content.push_str(&format!("author {}\n", commit.author));
    content.push_str(&format!("committer {}\n", commit.committer));
    content.push('\n');
    content.push_str(&commit.message);
    GitObject::new(ObjectType::Commit, content.into_bytes())
}

/// Serializes a tree. Entries are sorted into canonical order first, so
/// callers may pass them in any order.
pub fn create_tree(entries: &[TreeEntry]) -> GitObject {
    let mut sorted: Vec<&TreeEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| a.canonical_cmp(b));

    let mut data = Vec::new();
    for entry in sorted {
        data.extend_from_slice(format!("{:o} ", entry.mode).as_bytes());
        data.extend_from_slice(&entry.name);
        data.push(0);
        data.extend_from_slice(entry.id.as_bytes());
    }
    GitObject::new(ObjectType::Tree, data)
}

/// Serializes an annotated tag.
pub fn create_tag(tag: &Tag) -> GitObject {
    let mut content = format!(
        "object {}\ntype {}\ntag {}\n",
        tag.object, tag.target_type, tag.name
    );
    content.push_str(&format!("tagger {}\n", tag.tagger));
    content.push('\n');
    content.push_str(&tag.message);
    GitObject::new(ObjectType::Tag, content.into_bytes())
}
