//! Ref-delta reconstruction.
//!
//! A delta payload starts with two little-endian base-128 varints (base
//! size, result size) followed by copy and insert instructions.
//! See: https://git-scm.com/docs/pack-format#_deltified_representation

use crate::{GitError, Result};

/// Copy length used when no size bytes are present.
const DEFAULT_COPY_SIZE: usize = 0x10000;

/// Reads a size varint (7 bits per byte, least-significant group first).
/// Returns the value and the number of bytes read.
fn read_size(data: &[u8]) -> Result<(usize, usize)> {
    let mut value = 0usize;
    let mut shift = 0u32;
    for (i, &byte) in data.iter().enumerate() {
        if shift >= usize::BITS {
            return Err(GitError::InvalidPack("delta size varint overflow".to_string()));
        }
        value |= ((byte & 0x7f) as usize) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }
    }
    Err(GitError::InvalidPack("truncated delta header".to_string()))
}

/// Applies `delta` to `base` and returns the reconstructed payload.
pub fn undeltify(base: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let (base_size, used) = read_size(delta)?;
    let mut pos = used;
    let (result_size, used) = read_size(&delta[pos..])?;
    pos += used;

    if base.len() != base_size {
        return Err(GitError::DeltaBaseSizeMismatch {
            expected: base_size,
            actual: base.len(),
        });
    }

    let mut out = Vec::with_capacity(result_size);
    while pos < delta.len() {
        let op = delta[pos];
        pos += 1;

        if op & 0x80 != 0 {
            let mut offset = 0usize;
            for i in 0..4 {
                if op & (1 << i) != 0 {
                    let byte = *delta.get(pos).ok_or_else(|| {
                        GitError::DeltaRangeError("truncated copy offset".to_string())
                    })?;
                    offset |= (byte as usize) << (8 * i);
                    pos += 1;
                }
            }
            let mut size = 0usize;
            for i in 0..3 {
                if op & (0x10 << i) != 0 {
                    let byte = *delta.get(pos).ok_or_else(|| {
                        GitError::DeltaRangeError("truncated copy size".to_string())
                    })?;
                    size |= (byte as usize) << (8 * i);
                    pos += 1;
                }
            }
            if size == 0 {
                size = DEFAULT_COPY_SIZE;
            }

            let end = offset
                .checked_add(size)
                .filter(|&end| end <= base.len())
                .ok_or_else(|| {
                    GitError::DeltaRangeError(format!(
                        "copy {}+{} exceeds base of {} bytes",
                        offset,
                        size,
                        base.len()
                    ))
                })?;
            out.extend_from_slice(&base[offset..end]);
        } else if op != 0 {
            let len = op as usize;
            if pos + len > delta.len() {
                return Err(GitError::DeltaRangeError(format!(
                    "insert of {} bytes exceeds delta",
                    len
                )));
            }
            out.extend_from_slice(&delta[pos..pos + len]);
            pos += len;
        } else {
            return Err(GitError::InvalidPack("reserved delta opcode 0".to_string()));
        }

        if out.len() > result_size {
            break;
        }
    }

    if out.len() != result_size {
        return Err(GitError::DeltaIncomplete {
            expected: result_size,
            actual: out.len(),
        });
    }
    Ok(out)
}

/// Encodes a delta header size varint.
pub fn write_size(out: &mut Vec<u8>, mut value: usize) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(base: usize, result: usize) -> Vec<u8> {
        let mut delta = Vec::new();
        write_size(&mut delta, base);
        write_size(&mut delta, result);
        delta
    }

    #[test]
    fn test_copy_and_insert() {
        let base = b"hello world";
        let mut delta = header(base.len(), 11);
        // copy offset 0, size 6 -> "hello "
        delta.extend_from_slice(&[0x80 | 0x10, 6]);
        // insert "there"
        delta.push(5);
        delta.extend_from_slice(b"there");
        assert_eq!(undeltify(base, &delta).unwrap(), b"hello there");
    }

    #[test]
    fn test_copy_with_offset() {
        let base = b"abcdefghij";
        let mut delta = header(base.len(), 3);
        // offset byte 0 present (=4), size byte 0 present (=3)
        delta.extend_from_slice(&[0x80 | 0x01 | 0x10, 4, 3]);
        assert_eq!(undeltify(base, &delta).unwrap(), b"efg");
    }

    #[test]
    fn test_copy_multibyte_offset() {
        let base: Vec<u8> = (0..600u32).map(|i| (i % 251) as u8).collect();
        let mut delta = header(base.len(), 4);
        // offset = 0x0102 (bytes 0 and 1), size = 4
        delta.extend_from_slice(&[0x80 | 0x03 | 0x10, 0x02, 0x01, 4]);
        assert_eq!(undeltify(&base, &delta).unwrap(), &base[0x102..0x106]);
    }

    #[test]
    fn test_copy_default_size() {
        let base = vec![42u8; 0x10000];
        let mut delta = header(base.len(), 0x10000);
        delta.push(0x80);
        assert_eq!(undeltify(&base, &delta).unwrap(), base);
    }

    #[test]
    fn test_base_size_mismatch() {
        let delta = header(10, 0);
        assert!(matches!(
            undeltify(b"short", &delta),
            Err(GitError::DeltaBaseSizeMismatch {
                expected: 10,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_copy_out_of_range() {
        let base = b"abc";
        let mut delta = header(3, 5);
        delta.extend_from_slice(&[0x80 | 0x01 | 0x10, 1, 5]);
        assert!(matches!(
            undeltify(base, &delta),
            Err(GitError::DeltaRangeError(_))
        ));
    }

    #[test]
    fn test_insert_out_of_range() {
        let mut delta = header(0, 10);
        delta.push(10);
        delta.extend_from_slice(b"abc");
        assert!(matches!(
            undeltify(b"", &delta),
            Err(GitError::DeltaRangeError(_))
        ));
    }

    #[test]
    fn test_result_too_short() {
        let mut delta = header(0, 10);
        delta.push(3);
        delta.extend_from_slice(b"abc");
        assert!(matches!(
            undeltify(b"", &delta),
            Err(GitError::DeltaIncomplete {
                expected: 10,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_result_too_long() {
        let mut delta = header(0, 2);
        delta.push(3);
        delta.extend_from_slice(b"abc");
        assert!(matches!(
            undeltify(b"", &delta),
            Err(GitError::DeltaIncomplete { .. })
        ));
    }

    #[test]
    fn test_truncated_header() {
        assert!(undeltify(b"", &[0x80]).is_err());
        assert!(undeltify(b"", &[]).is_err());
    }

    #[test]
    fn test_size_varint() {
        let mut out = Vec::new();
        write_size(&mut out, 300);
        assert_eq!(out, vec![0xac, 0x02]);
        assert_eq!(read_size(&out).unwrap(), (300, 2));
    }
}
