//! References and the ref-update commands carried by a push.

use crate::ObjectId;
use serde::{Deserialize, Serialize};

/// Name of the symbolic HEAD reference.
pub const HEAD: &str = "HEAD";

/// A named pointer to an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ref {
    /// Full reference name, e.g. `refs/heads/main`.
    pub name: String,
    /// Target object.
    pub id: ObjectId,
}

impl Ref {
    /// Creates a new reference.
    pub fn new(name: impl Into<String>, id: ObjectId) -> Self {
        Self {
            name: name.into(),
            id,
        }
    }
}

/// What a push command does to its reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushKind {
    /// The ref does not exist yet (`src` is zero).
    Create,
    /// Both ids are set.
    Update,
    /// The ref is removed (`dest` is zero).
    Delete,
}

/// A single `<old-id> <new-id> <ref>` line of a receive-pack request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushCommand {
    /// Create, update or delete.
    pub kind: PushKind,
    /// Old value of the ref as seen by the client.
    pub src: ObjectId,
    /// New value of the ref.
    pub dest: ObjectId,
    /// Reference name.
    pub ref_name: String,
}

impl PushCommand {
    /// Builds a command, deriving its kind from the zero ids.
    ///
    /// Returns `None` when both ids are zero, which names no change at all.
    pub fn from_ids(src: ObjectId, dest: ObjectId, ref_name: impl Into<String>) -> Option<Self> {
        let kind = match (src.is_zero(), dest.is_zero()) {
            (true, true) => return None,
            (true, false) => PushKind::Create,
            (false, true) => PushKind::Delete,
            (false, false) => PushKind::Update,
        };
        Some(Self {
            kind,
            src,
            dest,
            ref_name: ref_name.into(),
        })
    }
}
