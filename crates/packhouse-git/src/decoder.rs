//! Incremental pack entry decoder for receive-pack.

use crate::delta::undeltify;
use crate::pack::{decode_entry_header, inflate, OBJ_REF_DELTA};
use crate::{GitError, Result};
use futures::future::join_all;
use packhouse_storage::{GitObject, GitStorage, ObjectId, ObjectType, StorageError};
use std::collections::HashMap;

/// Result of one decode attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStep {
    /// The entry is not fully buffered yet.
    NeedMore,
    /// One object was decoded from the first `consumed` bytes.
    Object {
        /// Bytes of the buffer the entry occupied.
        consumed: usize,
        /// Id of the decoded object.
        id: ObjectId,
    },
    /// A type-0 entry, which git emits in place of objects for pushes that
    /// only move refs. Only its header byte is consumed.
    Empty {
        /// Bytes of the buffer the entry header occupied.
        consumed: usize,
    },
}

/// Decodes pack entries one at a time and hands the objects to storage in
/// batches.
pub struct PackDecoder {
    store_batch_size: usize,
    pending: HashMap<ObjectId, GitObject>,
    received: Vec<ObjectId>,
}

impl PackDecoder {
    /// Creates a decoder that awaits storage writes every
    /// `store_batch_size` objects.
    pub fn new(store_batch_size: usize) -> Self {
        Self {
            store_batch_size: store_batch_size.max(1),
            pending: HashMap::new(),
            received: Vec::new(),
        }
    }

    /// Ids of every object decoded so far, in pack order.
    pub fn received(&self) -> &[ObjectId] {
        &self.received
    }

    /// Decodes the entry at the front of `buf`.
    ///
    /// Returns [`DecodeStep::NeedMore`] without side effects when the
    /// entry is incomplete, so the call can be repeated with a longer
    /// buffer.
    pub async fn decode(&mut self, buf: &[u8], storage: &dyn GitStorage) -> Result<DecodeStep> {
        let Some(header) = decode_entry_header(buf)? else {
            return Ok(DecodeStep::NeedMore);
        };
        let mut pos = header.len;

        let kind = match header.type_code {
            0 => return Ok(DecodeStep::Empty { consumed: header.len }),
            1..=4 => {
                let object_type = ObjectType::from_pack_type(header.type_code)
                    .ok_or(GitError::UnsupportedObjectType(header.type_code))?;
                EntryKind::Base(object_type)
            }
            OBJ_REF_DELTA => {
                if buf.len() < pos + 20 {
                    return Ok(DecodeStep::NeedMore);
                }
                let base = ObjectId::from_slice(&buf[pos..pos + 20])?;
                pos += 20;
                EntryKind::RefDelta(base)
            }
            other => return Err(GitError::UnsupportedObjectType(other)),
        };

        let Some((data, used)) = inflate(&buf[pos..], header.size)? else {
            return Ok(DecodeStep::NeedMore);
        };
        pos += used;

        let object = match kind {
            EntryKind::Base(object_type) => GitObject::new(object_type, data),
            EntryKind::RefDelta(base_id) => {
                let base = self.resolve_base(&base_id, storage).await?;
                let result = undeltify(&base.data, &data)?;
                GitObject::new(base.object_type, result)
            }
        };

        let id = object.id;
        tracing::trace!(%id, object_type = %object.object_type, size = object.size(), "decoded object");
        self.received.push(id);
        self.pending.insert(id, object);
        if self.pending.len() >= self.store_batch_size {
            self.flush(storage).await?;
        }

        Ok(DecodeStep::Object { consumed: pos, id })
    }

    /// Awaits storage writes for every decoded object not stored yet.
    pub async fn flush(&mut self, storage: &dyn GitStorage) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch: Vec<GitObject> = self.pending.drain().map(|(_, object)| object).collect();
        let count = batch.len();
        let results = join_all(batch.into_iter().map(|object| storage.store_object(object))).await;
        for result in results {
            result?;
        }
        tracing::debug!(count, total = self.received.len(), "stored object batch");
        Ok(())
    }

    async fn resolve_base(&mut self, id: &ObjectId, storage: &dyn GitStorage) -> Result<GitObject> {
        if let Some(object) = self.pending.get(id) {
            return Ok(object.clone());
        }
        self.flush(storage).await?;
        match storage.get_object(id).await {
            Ok(object) => Ok(object),
            Err(StorageError::NotFound(_)) => Err(GitError::MissingDeltaBase(id.to_hex())),
            Err(e) => Err(e.into()),
        }
    }
}

enum EntryKind {
    Base(ObjectType),
    RefDelta(ObjectId),
}
