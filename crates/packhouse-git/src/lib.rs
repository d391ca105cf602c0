//! Git smart HTTP protocol engine for Packhouse.
//!
//! This crate implements pkt-line framing, incremental pack decoding with
//! ref-delta resolution, reachability closures with partial-clone filters,
//! and side-band pack streaming, tied together by the per-request
//! [`Session`] state machine.

mod closure;
mod config;
mod decoder;
mod delta;
mod error;
pub mod pack;
mod pktline;
mod protocol;
mod serializer;
mod sink;

pub use closure::{parse_filter, Closure, ClosureResolver, ObjectFilter};
pub use config::ProtocolConfig;
pub use decoder::{DecodeStep, PackDecoder};
pub use delta::{undeltify, write_size};
pub use error::GitError;
pub use pktline::{banded_lines, pkt_line, Band, PktLine, FLUSH_PKT, MAX_BAND_PAYLOAD};
pub use protocol::{
    advertise_refs, receive_pack_message, upload_pack_message, FetchRequest, Service, Session,
    Stage, CAPABILITIES,
};
pub use serializer::PackWriter;
pub use sink::PacketSink;

/// Result type for git protocol operations.
pub type Result<T> = std::result::Result<T, GitError>;
