//! Git pkt-line format implementation.
//!
//! The pkt-line format is used for all git protocol communication.
//! Each line is prefixed with a 4-character hex length that counts the
//! prefix itself, or "0000" for flush.
//!
//! Decoding is incremental: [`PktLine::decode`] looks at whatever is
//! buffered and either yields one packet plus the bytes it used, or
//! `None` when the packet is not complete yet.

use crate::{GitError, Result};

/// The flush packet.
pub const FLUSH_PKT: &[u8; 4] = b"0000";

/// Largest payload of a single side-band packet.
pub const MAX_BAND_PAYLOAD: usize = 999;

/// Largest length a pkt-line header can express.
const MAX_PKT_LEN: usize = 0xffff;

/// A pkt-line packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PktLine {
    /// Data line with content.
    Data(Vec<u8>),
    /// Flush packet (0000).
    Flush,
    /// Delimiter packet (0001).
    Delimiter,
    /// Response-end packet (0002).
    ResponseEnd,
}

impl PktLine {
    /// Creates a data packet from a string slice.
    pub fn from_string(s: &str) -> Self {
        Self::Data(s.as_bytes().to_vec())
    }

    /// Creates a data packet from bytes.
    pub fn from_bytes(b: impl Into<Vec<u8>>) -> Self {
        Self::Data(b.into())
    }

    /// Encodes the packet to bytes.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Data(data) => pkt_line(&[data]),
            Self::Flush => FLUSH_PKT.to_vec(),
            Self::Delimiter => b"0001".to_vec(),
            Self::ResponseEnd => b"0002".to_vec(),
        }
    }

    /// Decodes one packet from the front of `buf`.
    ///
    /// Returns the packet and the number of bytes it occupies, or `None`
    /// when more bytes are needed. Only a malformed length header is an
    /// error.
    pub fn decode(buf: &[u8]) -> Result<Option<(Self, usize)>> {
        if buf.len() < 4 {
            return Ok(None);
        }
        let len = parse_length(&buf[..4])?;
        match len {
            0 => Ok(Some((Self::Flush, 4))),
            1 => Ok(Some((Self::Delimiter, 4))),
            2 => Ok(Some((Self::ResponseEnd, 4))),
            3 => Err(GitError::InvalidPktLine("length too small".to_string())),
            _ if buf.len() < len => Ok(None),
            _ => Ok(Some((Self::Data(buf[4..len].to_vec()), len))),
        }
    }

    /// Returns true if this is a flush packet.
    pub fn is_flush(&self) -> bool {
        matches!(self, Self::Flush)
    }

    /// Returns the data content, or None for special packets.
    pub fn data(&self) -> Option<&[u8]> {
        match self {
            Self::Data(data) => Some(data),
            _ => None,
        }
    }

    /// Returns the data as a string, trimming any trailing newline.
    pub fn as_str(&self) -> Option<&str> {
        self.data()
            .and_then(|d| std::str::from_utf8(d).ok())
            .map(|s| s.trim_end_matches('\n'))
    }
}

fn parse_length(header: &[u8]) -> Result<usize> {
    let text = std::str::from_utf8(header)
        .map_err(|_| GitError::InvalidPktLine("invalid length prefix".to_string()))?;
    if !text.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(GitError::InvalidPktLine(format!("invalid length {:?}", text)));
    }
    usize::from_str_radix(text, 16)
        .map_err(|_| GitError::InvalidPktLine(format!("invalid length {:?}", text)))
}

/// Concatenates `parts` into one data packet.
pub fn pkt_line(parts: &[&[u8]]) -> Vec<u8> {
    let len: usize = parts.iter().map(|p| p.len()).sum::<usize>() + 4;
    debug_assert!(len <= MAX_PKT_LEN);
    let mut out = Vec::with_capacity(len);
    out.extend_from_slice(format!("{:04x}", len).as_bytes());
    for part in parts {
        out.extend_from_slice(part);
    }
    out
}

/// Side-band channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Band {
    /// Pack data and report-status.
    Data = 1,
    /// Human-readable progress text.
    Progress = 2,
    /// Fatal error text.
    Error = 3,
}

/// Concatenates `parts` and frames them as side-band packets on `band`,
/// splitting the payload into chunks of at most [`MAX_BAND_PAYLOAD`]
/// bytes.
pub fn banded_lines(band: Band, parts: &[&[u8]]) -> Vec<u8> {
    let payload: Vec<u8> = parts.concat();
    let chunks = payload.len().div_ceil(MAX_BAND_PAYLOAD);
    let mut out = Vec::with_capacity(payload.len() + chunks * 5);
    for chunk in payload.chunks(MAX_BAND_PAYLOAD) {
        out.extend_from_slice(format!("{:04x}", chunk.len() + 5).as_bytes());
        out.push(band as u8);
        out.extend_from_slice(chunk);
    }
    out
}
