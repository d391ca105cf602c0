//! The storage contract consumed by the protocol engine.

use crate::codec::TreeEntry;
use crate::{GitObject, ObjectFilter, ObjectId, ObjectType, PushCommand, Ref, Result, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

/// Graph edges of an object, denormalized at write time so a traversal
/// does not have to load and parse the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectEdges {
    /// A commit's tree and parents.
    Commit {
        /// Root tree.
        tree: ObjectId,
        /// Parents in payload order.
        parents: Vec<ObjectId>,
    },
    /// A tree's entries.
    Tree(Vec<TreeEntry>),
    /// A tag's target.
    Tag {
        /// Tagged object.
        target: ObjectId,
    },
}

/// Object metadata without the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectMeta {
    /// Object id.
    pub id: ObjectId,
    /// Object kind.
    pub object_type: ObjectType,
    /// Uncompressed payload length.
    pub size: usize,
    /// Edges, if the backend indexes them. `None` means the caller has to
    /// read and parse the payload.
    pub edges: Option<ObjectEdges>,
}

/// An object payload as held by a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectPayload {
    /// Raw bytes.
    Plain(Bytes),
    /// A zlib stream of the raw bytes, ready to be copied into a pack.
    Deflated(Bytes),
}

impl ObjectPayload {
    /// Compresses raw bytes into a `Deflated` payload.
    pub fn deflate(data: &[u8]) -> Result<Self> {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder
            .write_all(data)
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        let compressed = encoder
            .finish()
            .map_err(|e| StorageError::Compression(e.to_string()))?;
        Ok(Self::Deflated(Bytes::from(compressed)))
    }

    /// Returns the raw bytes, inflating if needed.
    pub fn into_plain(self) -> Result<Bytes> {
        match self {
            Self::Plain(data) => Ok(data),
            Self::Deflated(compressed) => {
                let mut decoder = ZlibDecoder::new(&compressed[..]);
                let mut data = Vec::new();
                decoder
                    .read_to_end(&mut data)
                    .map_err(|e| StorageError::Compression(e.to_string()))?;
                Ok(Bytes::from(data))
            }
        }
    }
}

/// A content-addressable object store plus a ref table, scoped to one
/// repository.
#[async_trait]
pub trait GitStorage: Send + Sync {
    /// All refs of the repository, excluding HEAD.
    async fn get_refs(&self) -> Result<Vec<Ref>>;

    /// The ref name HEAD points at, if any.
    async fn get_head_ref(&self) -> Result<Option<String>>;

    /// Loads a full object. Fails with [`StorageError::NotFound`] if absent.
    async fn get_object(&self, id: &ObjectId) -> Result<GitObject>;

    /// Loads object metadata only.
    async fn get_object_meta(&self, id: &ObjectId) -> Result<ObjectMeta>;

    /// Loads the payload of an object previously described by
    /// [`GitStorage::get_object_meta`].
    async fn get_object_data(&self, meta: &ObjectMeta) -> Result<ObjectPayload>;

    /// Stores an object. Idempotent: storing a present id is a no-op.
    async fn store_object(&self, object: GitObject) -> Result<ObjectId>;

    /// Applies ref updates for a push whose objects (by id) have already
    /// been handed to [`GitStorage::store_object`].
    async fn receive_pack(&self, commands: &[PushCommand], objects: &[ObjectId]) -> Result<()>;

    /// Optional precomputed reachability: objects reachable from `wants`,
    /// minus those reachable from `haves`, with `filter` applied.
    ///
    /// Returns `Ok(None)` when the backend has no index or cannot honor the
    /// filter exactly, in which case the caller walks the graph. An answer
    /// must equal what the walk would produce.
    async fn resolve_closure(
        &self,
        _wants: &[ObjectId],
        _haves: &[ObjectId],
        _filter: &ObjectFilter,
    ) -> Result<Option<Vec<ObjectId>>> {
        Ok(None)
    }
}
