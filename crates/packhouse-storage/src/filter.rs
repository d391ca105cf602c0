//! Partial-clone object filters.

/// Which objects a reachability closure leaves out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectFilter {
    /// `blob:none`: leave out every blob.
    pub omit_blobs: bool,
    /// `tree:<n>`: leave out trees and blobs at depth `n` or deeper, where
    /// a commit's root tree has depth 0.
    pub tree_depth: Option<usize>,
}

impl ObjectFilter {
    /// The filter forced on shallow fetches: commits and tags only.
    pub fn shallow() -> Self {
        Self {
            omit_blobs: true,
            tree_depth: Some(0),
        }
    }

    /// Returns true if the filter excludes nothing.
    pub fn is_empty(&self) -> bool {
        !self.omit_blobs && self.tree_depth.is_none()
    }

    /// Whether a tree at `depth` below its commit passes the filter.
    pub fn allows_tree(&self, depth: usize) -> bool {
        self.tree_depth.map_or(true, |limit| depth < limit)
    }

    /// Whether a blob at `depth` below its commit passes the filter.
    pub fn allows_blob(&self, depth: usize) -> bool {
        !self.omit_blobs && self.allows_tree(depth)
    }
}
