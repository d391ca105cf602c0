//! Reachability closure for upload-pack.
//!
//! Starting from the client's wants, the resolver walks commit, tree and
//! tag edges breadth-first and collects every object the client does not
//! already have. Objects are loaded in batches of
//! [`ProtocolConfig::batch_size`] concurrent storage reads.

use crate::{GitError, ProtocolConfig, Result};
use futures::future::join_all;
pub use packhouse_storage::ObjectFilter;
use packhouse_storage::{
    parse_commit, parse_tag, parse_tree, GitObject, GitStorage, ObjectEdges, ObjectId,
    ObjectType, StorageError,
};
use std::collections::{HashSet, VecDeque};

/// Parses a `filter` argument: `blob:none`, `tree:<n>`, or
/// `combine:<a>+<b>...` of those.
pub fn parse_filter(spec: &str) -> Result<ObjectFilter> {
    let mut filter = ObjectFilter::default();
    let spec = spec.trim();
    let parts: Vec<&str> = match spec.strip_prefix("combine:") {
        Some(rest) => rest.split('+').collect(),
        None => vec![spec],
    };
    for part in parts {
        add_filter(&mut filter, part)?;
    }
    Ok(filter)
}

fn add_filter(filter: &mut ObjectFilter, part: &str) -> Result<()> {
    let (kind, arg) = part
        .split_once(':')
        .ok_or_else(|| GitError::Protocol(format!("invalid filter: {}", part)))?;
    match (kind, arg) {
        ("blob", "none") => filter.omit_blobs = true,
        ("tree", depth) => {
            let depth: usize = depth
                .parse()
                .map_err(|_| GitError::Protocol(format!("invalid tree filter: {}", part)))?;
            filter.tree_depth = Some(filter.tree_depth.map_or(depth, |d| d.min(depth)));
        }
        _ => {
            return Err(GitError::Protocol(format!(
                "unsupported filter: {} (only blob:none and tree:<depth>)",
                part
            )))
        }
    }
    Ok(())
}

/// The outcome of a closure computation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Closure {
    /// Objects to send, in traversal order.
    pub objects: Vec<ObjectId>,
    /// Commits whose parents were cut off by a depth limit.
    pub shallow: Vec<ObjectId>,
    /// Client `have`s that exist in storage, in request order.
    pub common: Vec<ObjectId>,
}

#[derive(Debug, Clone, Copy)]
struct Visit {
    id: ObjectId,
    /// Depth of the object below its commit's root tree.
    tree_depth: usize,
    /// Commit generation, 1 for the starting commits.
    generation: usize,
}

impl Visit {
    fn start(id: ObjectId) -> Self {
        Self {
            id,
            tree_depth: 0,
            generation: 1,
        }
    }
}

struct Loaded {
    object_type: ObjectType,
    edges: Option<ObjectEdges>,
}

#[derive(Default)]
struct Walk {
    objects: Vec<ObjectId>,
    shallow: Vec<ObjectId>,
}

/// Computes which objects an upload-pack response has to contain.
pub struct ClosureResolver<'a> {
    storage: &'a dyn GitStorage,
    config: &'a ProtocolConfig,
}

impl<'a> ClosureResolver<'a> {
    /// Creates a resolver over `storage`.
    pub fn new(storage: &'a dyn GitStorage, config: &'a ProtocolConfig) -> Self {
        Self { storage, config }
    }

    /// Resolves the objects reachable from `wants` minus those reachable
    /// from `haves`.
    ///
    /// With `depth`, the commit walk stops after that many generations and
    /// the filter is forced to [`ObjectFilter::shallow`].
    pub async fn resolve(
        &self,
        wants: &[ObjectId],
        haves: &[ObjectId],
        filter: &ObjectFilter,
        depth: Option<usize>,
    ) -> Result<Closure> {
        let common = self.existing(haves).await?;

        // An index answer carries no shallow boundaries, so deepen requests
        // always walk.
        if depth.is_none() {
            if let Some(objects) = self.storage.resolve_closure(wants, haves, filter).await? {
                tracing::debug!(objects = objects.len(), "closure served from storage index");
                return Ok(Closure {
                    objects,
                    shallow: Vec::new(),
                    common,
                });
            }
        }

        let excluded: HashSet<ObjectId> = if haves.is_empty() {
            HashSet::new()
        } else {
            let walk = self.walk(haves, filter, None, &HashSet::new()).await?;
            tracing::debug!(haves = haves.len(), closure = walk.objects.len(), "have closure resolved");
            walk.objects.into_iter().collect()
        };

        let effective = if depth.is_some() {
            ObjectFilter::shallow()
        } else {
            filter.clone()
        };
        let walk = self.walk(wants, &effective, depth, &excluded).await?;
        tracing::debug!(
            wants = wants.len(),
            objects = walk.objects.len(),
            shallow = walk.shallow.len(),
            "closure resolved"
        );

        Ok(Closure {
            objects: walk.objects,
            shallow: walk.shallow,
            common,
        })
    }

    async fn existing(&self, ids: &[ObjectId]) -> Result<Vec<ObjectId>> {
        let mut found = Vec::new();
        for chunk in ids.chunks(self.batch_size()) {
            let results = join_all(chunk.iter().map(|id| self.storage.get_object_meta(id))).await;
            for (id, result) in chunk.iter().zip(results) {
                match result {
                    Ok(_) => found.push(*id),
                    Err(StorageError::NotFound(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(found)
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size.max(1)
    }

    async fn walk(
        &self,
        starts: &[ObjectId],
        filter: &ObjectFilter,
        depth: Option<usize>,
        excluded: &HashSet<ObjectId>,
    ) -> Result<Walk> {
        let mut walk = Walk::default();
        let mut visited: HashSet<ObjectId> = HashSet::new();
        let mut queue: VecDeque<Visit> = VecDeque::new();

        for id in starts {
            if !excluded.contains(id) && visited.insert(*id) {
                queue.push_back(Visit::start(*id));
            }
        }

        while !queue.is_empty() {
            let take = queue.len().min(self.batch_size());
            let batch: Vec<Visit> = queue.drain(..take).collect();
            let loaded = join_all(batch.iter().map(|visit| self.load(visit.id))).await;

            for (visit, result) in batch.into_iter().zip(loaded) {
                let Some(loaded) = result? else {
                    continue;
                };

                let included = match loaded.object_type {
                    ObjectType::Blob => filter.allows_blob(visit.tree_depth),
                    ObjectType::Tree => filter.allows_tree(visit.tree_depth),
                    ObjectType::Commit | ObjectType::Tag => true,
                };
                if !included {
                    continue;
                }
                walk.objects.push(visit.id);
                if self.config.progress_interval > 0
                    && walk.objects.len() % self.config.progress_interval == 0
                {
                    tracing::debug!(objects = walk.objects.len(), queued = queue.len(), "walking");
                }

                let mut enqueue = |next: Visit| {
                    if !excluded.contains(&next.id) && visited.insert(next.id) {
                        queue.push_back(next);
                    }
                };

                match loaded.edges {
                    Some(ObjectEdges::Commit { tree, parents }) => {
                        if filter.allows_tree(0) {
                            enqueue(Visit {
                                id: tree,
                                tree_depth: 0,
                                generation: visit.generation,
                            });
                        }
                        if depth.is_some_and(|limit| visit.generation >= limit) {
                            if !parents.is_empty() {
                                walk.shallow.push(visit.id);
                            }
                        } else {
                            for parent in parents {
                                enqueue(Visit {
                                    id: parent,
                                    tree_depth: 0,
                                    generation: visit.generation + 1,
                                });
                            }
                        }
                    }
                    Some(ObjectEdges::Tree(entries)) => {
                        let child_depth = visit.tree_depth + 1;
                        for entry in entries {
                            let wanted = if entry.is_submodule() {
                                false
                            } else if entry.is_tree() {
                                filter.allows_tree(child_depth)
                            } else {
                                filter.allows_blob(child_depth)
                            };
                            if wanted {
                                enqueue(Visit {
                                    id: entry.id,
                                    tree_depth: child_depth,
                                    generation: visit.generation,
                                });
                            }
                        }
                    }
                    Some(ObjectEdges::Tag { target }) => enqueue(Visit {
                        id: target,
                        tree_depth: 0,
                        generation: visit.generation,
                    }),
                    None => {}
                }
            }
        }

        Ok(walk)
    }

    /// Loads an object's type and edges. Objects storage cannot produce or
    /// parse are logged and skipped; malformed ids and commits are fatal.
    async fn load(&self, id: ObjectId) -> Result<Option<Loaded>> {
        let meta = match self.storage.get_object_meta(&id).await {
            Ok(meta) => meta,
            Err(e) => return skip_or_fail(id, e),
        };

        let edges = match (meta.object_type, meta.edges) {
            (ObjectType::Blob, _) => None,
            (_, Some(edges)) => Some(edges),
            (_, None) => {
                let object = match self.storage.get_object(&id).await {
                    Ok(object) => object,
                    Err(e) => return skip_or_fail(id, e),
                };
                match parse_edges(&object) {
                    Ok(edges) => Some(edges),
                    Err(GitError::Storage(e)) => return skip_or_fail(id, e),
                    Err(e) => return Err(e),
                }
            }
        };

        Ok(Some(Loaded {
            object_type: meta.object_type,
            edges,
        }))
    }
}

fn skip_or_fail(id: ObjectId, error: StorageError) -> Result<Option<Loaded>> {
    match error {
        StorageError::MalformedObjectId(_) | StorageError::InvalidCommit(_) => Err(error.into()),
        other => {
            tracing::warn!(%id, error = %other, "skipping unreadable object");
            Ok(None)
        }
    }
}

fn parse_edges(object: &GitObject) -> Result<ObjectEdges> {
    let edges = match object.object_type {
        ObjectType::Commit => {
            let commit = parse_commit(object)?;
            ObjectEdges::Commit {
                tree: commit.tree,
                parents: commit.parents,
            }
        }
        ObjectType::Tree => ObjectEdges::Tree(parse_tree(object)?),
        ObjectType::Tag => ObjectEdges::Tag {
            target: parse_tag(object)?.object,
        },
        ObjectType::Blob => {
            return Err(GitError::Protocol(format!("blob {} has no edges", object.id)))
        }
    };
    Ok(edges)
}
