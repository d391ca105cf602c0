//! Git object model and storage for Packhouse.
//!
//! This crate provides content-addressed git objects, the commit/tree/tag
//! codec, and the [`GitStorage`] contract the protocol engine talks to,
//! together with an in-memory implementation.

mod codec;
mod error;
mod filter;
mod memory;
mod object;
mod refs;
mod traits;

pub use codec::{
    create_commit, create_tag, create_tree, parse_commit, parse_tag, parse_tree, Commit, Tag,
    TreeEntry, MODE_EXECUTABLE, MODE_FILE, MODE_SUBMODULE, MODE_SYMLINK, MODE_TREE,
};
pub use error::{Result, StorageError};
pub use filter::ObjectFilter;
pub use memory::MemoryStore;
pub use object::{GitObject, ObjectId, ObjectType};
pub use refs::{PushCommand, PushKind, Ref, HEAD};
pub use traits::{GitStorage, ObjectEdges, ObjectMeta, ObjectPayload};
