//! Protocol tuning knobs.

use serde::{Deserialize, Serialize};

/// Per-session protocol settings, passed to every [`crate::Session`] at
/// construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtocolConfig {
    /// Objects fetched concurrently while walking the graph or streaming a
    /// pack.
    pub batch_size: usize,
    /// Decoded objects kept in memory before their storage writes are
    /// awaited.
    pub store_batch_size: usize,
    /// Consumed bytes at the front of the parse buffer before it is
    /// compacted.
    pub compact_threshold: usize,
    /// Objects between progress log lines.
    pub progress_interval: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            store_batch_size: 100,
            compact_threshold: 1024 * 1024,
            progress_interval: 1000,
        }
    }
}
