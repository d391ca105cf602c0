//! In-memory storage backend.

use crate::codec::{parse_commit, parse_tag, parse_tree};
use crate::{
    GitObject, GitStorage, ObjectEdges, ObjectId, ObjectMeta, ObjectPayload, ObjectType,
    PushCommand, PushKind, Ref, Result, StorageError,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

const PREFERRED_HEADS: [&str; 2] = ["refs/heads/main", "refs/heads/master"];

#[derive(Debug, Clone)]
struct StoredObject {
    object_type: ObjectType,
    size: usize,
    payload: ObjectPayload,
    edges: Option<ObjectEdges>,
}

/// Thread-safe in-memory object and ref store for one repository.
#[derive(Debug)]
pub struct MemoryStore {
    objects: RwLock<HashMap<ObjectId, StoredObject>>,
    refs: RwLock<BTreeMap<String, ObjectId>>,
    head: RwLock<Option<String>>,
    compress: bool,
    index_edges: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store that keeps payloads uncompressed and indexes
    /// graph edges on write.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            refs: RwLock::new(BTreeMap::new()),
            head: RwLock::new(None),
            compress: false,
            index_edges: true,
        }
    }

    /// Keep payloads zlib-compressed at rest.
    #[must_use]
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Whether to denormalize commit/tree/tag edges into the metadata.
    #[must_use]
    pub fn with_edge_index(mut self, index_edges: bool) -> Self {
        self.index_edges = index_edges;
        self
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if the object is stored.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.read().contains_key(id)
    }

    /// Sets a ref directly, bypassing push semantics.
    pub fn set_ref(&self, name: impl Into<String>, id: ObjectId) {
        self.refs.write().insert(name.into(), id);
    }

    /// Points HEAD at a ref name.
    pub fn set_head(&self, target: impl Into<String>) {
        *self.head.write() = Some(target.into());
    }

    fn edges_of(object: &GitObject) -> Option<ObjectEdges> {
        let edges = match object.object_type {
            ObjectType::Commit => parse_commit(object).map(|c| ObjectEdges::Commit {
                tree: c.tree,
                parents: c.parents,
            }),
            ObjectType::Tree => parse_tree(object).map(ObjectEdges::Tree),
            ObjectType::Tag => parse_tag(object).map(|t| ObjectEdges::Tag { target: t.object }),
            ObjectType::Blob => return None,
        };
        match edges {
            Ok(edges) => Some(edges),
            Err(e) => {
                tracing::debug!(id = %object.id, error = %e, "object edges not indexed");
                None
            }
        }
    }

    fn apply_command(&self, command: &PushCommand) {
        let mut refs = self.refs.write();
        match command.kind {
            PushKind::Create | PushKind::Update => {
                refs.insert(command.ref_name.clone(), command.dest);
            }
            PushKind::Delete => {
                refs.remove(&command.ref_name);
                let mut head = self.head.write();
                if head.as_deref() == Some(command.ref_name.as_str()) {
                    *head = None;
                }
            }
        }
    }

    fn select_head(&self) {
        let refs = self.refs.read();
        let mut head = self.head.write();
        if head.is_some() {
            return;
        }
        if let Some(name) = PREFERRED_HEADS.iter().find(|name| refs.contains_key(**name)) {
            tracing::debug!(head = %name, "HEAD selected");
            *head = Some((*name).to_string());
        }
    }
}

#[async_trait]
impl GitStorage for MemoryStore {
    async fn get_refs(&self) -> Result<Vec<Ref>> {
        Ok(self
            .refs
            .read()
            .iter()
            .map(|(name, id)| Ref::new(name.clone(), *id))
            .collect())
    }

    async fn get_head_ref(&self) -> Result<Option<String>> {
        Ok(self.head.read().clone())
    }

    async fn get_object(&self, id: &ObjectId) -> Result<GitObject> {
        let stored = self
            .objects
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_hex()))?;
        Ok(GitObject {
            id: *id,
            object_type: stored.object_type,
            data: stored.payload.into_plain()?,
        })
    }

    async fn get_object_meta(&self, id: &ObjectId) -> Result<ObjectMeta> {
        let objects = self.objects.read();
        let stored = objects
            .get(id)
            .ok_or_else(|| StorageError::NotFound(id.to_hex()))?;
        Ok(ObjectMeta {
            id: *id,
            object_type: stored.object_type,
            size: stored.size,
            edges: stored.edges.clone(),
        })
    }

    async fn get_object_data(&self, meta: &ObjectMeta) -> Result<ObjectPayload> {
        self.objects
            .read()
            .get(&meta.id)
            .map(|stored| stored.payload.clone())
            .ok_or_else(|| StorageError::NotFound(meta.id.to_hex()))
    }

    async fn store_object(&self, object: GitObject) -> Result<ObjectId> {
        let id = object.id;
        if self.contains(&id) {
            return Ok(id);
        }

        let edges = if self.index_edges {
            Self::edges_of(&object)
        } else {
            None
        };
        let payload = if self.compress {
            ObjectPayload::deflate(&object.data)?
        } else {
            ObjectPayload::Plain(object.data.clone())
        };

        self.objects.write().entry(id).or_insert(StoredObject {
            object_type: object.object_type,
            size: object.size(),
            payload,
            edges,
        });
        Ok(id)
    }

    async fn receive_pack(&self, commands: &[PushCommand], objects: &[ObjectId]) -> Result<()> {
        for command in commands {
            self.apply_command(command);
        }
        self.select_head();
        tracing::debug!(
            refs = commands.len(),
            objects = objects.len(),
            "push applied"
        );
        Ok(())
    }
}
