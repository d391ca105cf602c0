//! Git pack file format primitives.
//!
//! Pack files are the format used by git for efficient object transfer.
//! See: https://git-scm.com/docs/pack-format

use crate::{GitError, Result};
use flate2::write::ZlibEncoder;
use flate2::{Compression, Decompress, FlushDecompress, Status};
use std::io::Write;

/// Magic bytes at the start of a pack file.
pub const PACK_SIGNATURE: &[u8; 4] = b"PACK";
/// Pack file version we support.
pub const PACK_VERSION: u32 = 2;
/// Length of the fixed pack header.
pub const PACK_HEADER_LEN: usize = 12;
/// Length of the trailing SHA-1.
pub const PACK_CHECKSUM_LEN: usize = 20;
/// Type code of a ref-delta entry.
pub const OBJ_REF_DELTA: u8 = 7;

/// Parses the 12-byte pack header and returns the object count.
pub fn parse_pack_header(header: &[u8; PACK_HEADER_LEN]) -> Result<u32> {
    if &header[0..4] != PACK_SIGNATURE {
        return Err(GitError::InvalidPack("invalid signature".to_string()));
    }

    let version = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    if version != PACK_VERSION {
        return Err(GitError::InvalidPack(format!(
            "unsupported version: {}",
            version
        )));
    }

    Ok(u32::from_be_bytes([
        header[8], header[9], header[10], header[11],
    ]))
}

/// Writes the 12-byte pack header.
pub fn write_pack_header(out: &mut Vec<u8>, count: u32) {
    out.extend_from_slice(PACK_SIGNATURE);
    out.extend_from_slice(&PACK_VERSION.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
}

/// The variable-length header in front of every pack entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryHeader {
    /// Raw type code (1-4 base objects, 6/7 deltas).
    pub type_code: u8,
    /// Inflated size of the entry data.
    pub size: usize,
    /// Bytes the header occupies.
    pub len: usize,
}

/// Decodes an entry header from the front of `buf`. Returns `None` when
/// the header continues past the buffered bytes.
pub fn decode_entry_header(buf: &[u8]) -> Result<Option<EntryHeader>> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };

    let type_code = (first >> 4) & 0x07;
    let mut size = (first & 0x0F) as usize;
    let mut shift = 4u32;
    let mut len = 1;
    let mut more = first & 0x80 != 0;

    while more {
        let Some(&byte) = buf.get(len) else {
            return Ok(None);
        };
        if shift > usize::BITS - 7 {
            return Err(GitError::InvalidPack("entry size overflow".to_string()));
        }
        size |= ((byte & 0x7F) as usize) << shift;
        shift += 7;
        len += 1;
        more = byte & 0x80 != 0;
    }

    Ok(Some(EntryHeader {
        type_code,
        size,
        len,
    }))
}

/// Writes an entry header.
pub fn encode_entry_header(out: &mut Vec<u8>, type_code: u8, size: usize) {
    // First byte: (MSB=more bytes) (3 bits type) (4 bits size)
    let mut first_byte = (type_code << 4) | ((size & 0x0F) as u8);
    let mut remaining_size = size >> 4;

    if remaining_size > 0 {
        first_byte |= 0x80;
    }
    out.push(first_byte);

    while remaining_size > 0 {
        let mut byte = (remaining_size & 0x7F) as u8;
        remaining_size >>= 7;
        if remaining_size > 0 {
            byte |= 0x80;
        }
        out.push(byte);
    }
}

/// Compresses data into a zlib stream.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| GitError::InvalidPack(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| GitError::InvalidPack(e.to_string()))
}

/// Inflates one zlib stream of exactly `size` bytes from the front of
/// `input`.
///
/// Returns the inflated bytes and the number of compressed bytes the
/// stream occupied, or `None` if the stream runs past the end of `input`.
/// A corrupt stream, or one that inflates to any other length, is an
/// error. Output never grows past `size + 1` bytes.
pub fn inflate(input: &[u8], size: usize) -> Result<Option<(Vec<u8>, usize)>> {
    let limit = size.saturating_add(1);
    let mut inflater = Decompress::new(true);
    let mut out = Vec::with_capacity(limit.min(1 << 20));

    loop {
        if out.len() == out.capacity() {
            if out.len() >= limit {
                return Err(size_mismatch(out.len(), size));
            }
            let grow = out.capacity().max(64).min(limit - out.len());
            out.reserve_exact(grow);
        }
        let in_before = inflater.total_in() as usize;
        let out_before = out.len();

        let status = inflater
            .decompress_vec(&input[in_before..], &mut out, FlushDecompress::None)
            .map_err(|e| GitError::InvalidPack(format!("decompression failed: {}", e)))?;

        if out.len() > size {
            return Err(size_mismatch(out.len(), size));
        }
        if status == Status::StreamEnd {
            if out.len() != size {
                return Err(size_mismatch(out.len(), size));
            }
            return Ok(Some((out, inflater.total_in() as usize)));
        }

        let consumed_all = inflater.total_in() as usize == input.len();
        let stalled = inflater.total_in() as usize == in_before && out.len() == out_before;
        if (consumed_all || stalled) && out.len() < out.capacity() {
            return Ok(None);
        }
    }
}

fn size_mismatch(actual: usize, declared: usize) -> GitError {
    GitError::InvalidPack(format!(
        "entry inflated to {}{} bytes, header says {}",
        if actual > declared { "at least " } else { "" },
        actual,
        declared
    ))
}
