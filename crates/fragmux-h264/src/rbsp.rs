//! Emulation-prevention escape and unescape.
//!
//! Inside a NAL payload the byte patterns `00 00 00` through `00 00 03`
//! collide with start codes, so encoders insert an `03` after every `00 00`
//! that would otherwise precede a byte in `00..=03`. Parsing works on the
//! unescaped RBSP; serialization re-applies the escape.

use crate::{Error, Result};

/// A half-open byte span within a buffer, used to report where interesting
/// data (an SPS, a slice header) landed after escaping shifted offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: usize,
    pub end: usize,
}

impl ByteRange {
    pub fn new(start: usize, end: usize) -> Self {
        debug_assert!(start <= end);
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Remove emulation-prevention bytes, yielding the raw RBSP.
///
/// The `03` of a `00 00 03` sequence must be followed by a byte in `00..=03`
/// (or end of input); anything else means the escape served no purpose and
/// the stream is corrupt.
pub fn unescape_rbsp(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    let mut i = 0usize;
    while i < data.len() {
        let b = data[i];
        if zeros >= 2 && b == 3 {
            match data.get(i + 1) {
                None | Some(0..=3) => {}
                Some(&next) => {
                    return Err(Error::corrupt(format!(
                        "emulation prevention byte at offset {i} escapes {next:#04x}, \
                         which needs no escape"
                    )));
                }
            }
            zeros = 0;
            i += 1;
            continue;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
        i += 1;
    }
    Ok(out)
}

/// Apply emulation prevention to a raw RBSP.
pub fn escape_rbsp(data: &[u8]) -> Vec<u8> {
    escape_rbsp_with_ranges(data, &[]).0
}

/// Apply emulation prevention and translate `ranges` (byte spans into the
/// unescaped input) to their positions in the escaped output.
pub fn escape_rbsp_with_ranges(data: &[u8], ranges: &[ByteRange]) -> (Vec<u8>, Vec<ByteRange>) {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0usize;
    // input indices whose byte got an escape inserted in front of it
    let mut inserts: Vec<usize> = Vec::new();
    for (i, &b) in data.iter().enumerate() {
        if zeros >= 2 && b & 0xFC == 0 {
            out.push(3);
            inserts.push(i);
            zeros = 0;
        }
        zeros = if b == 0 { zeros + 1 } else { 0 };
        out.push(b);
    }
    let shift = |pos: usize, inclusive: bool| {
        pos + inserts
            .iter()
            .take_while(|&&at| if inclusive { at <= pos } else { at < pos })
            .count()
    };
    let adjusted = ranges
        .iter()
        .map(|r| ByteRange::new(shift(r.start, true), shift(r.end, false)))
        .collect();
    (out, adjusted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unescape_strips_escapes() {
        assert_eq!(
            unescape_rbsp(&[0x10, 0, 0, 3, 0, 0x20, 0, 0, 3, 1]).unwrap(),
            vec![0x10, 0, 0, 0, 0x20, 0, 0, 1]
        );
    }

    #[test]
    fn test_unescape_allows_trailing_escape() {
        assert_eq!(unescape_rbsp(&[0, 0, 3]).unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_unescape_rejects_pointless_escape() {
        let err = unescape_rbsp(&[0, 0, 3, 0x80]).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_escape_inserts_before_low_bytes() {
        // 00 00 00 -> escaped, 00 00 80 -> untouched (top bits set)
        assert_eq!(escape_rbsp(&[0, 0, 0]), vec![0, 0, 3, 0]);
        assert_eq!(escape_rbsp(&[0, 0, 0x80]), vec![0, 0, 0x80]);
        assert_eq!(escape_rbsp(&[0, 0, 1, 0, 0, 2]), vec![0, 0, 3, 1, 0, 0, 3, 2]);
    }

    #[test]
    fn test_escape_resets_zero_run() {
        // after inserting an escape the 00 that was escaped starts a new run
        assert_eq!(escape_rbsp(&[0, 0, 0, 0, 1]), vec![0, 0, 3, 0, 0, 3, 1]);
    }

    #[test]
    fn test_escape_unescape_round_trip() {
        let raw: Vec<u8> = vec![0x67, 0, 0, 0, 1, 0, 0, 2, 0xFF, 0, 0, 3, 3];
        let escaped = escape_rbsp(&raw);
        assert_eq!(unescape_rbsp(&escaped).unwrap(), raw);
    }

    #[test]
    fn test_range_adjustment() {
        // input:  [AA 00 00 01 BB], escape inserted before index 3
        let ranges = [ByteRange::new(0, 3), ByteRange::new(3, 5), ByteRange::new(1, 4)];
        let (escaped, adjusted) = escape_rbsp_with_ranges(&[0xAA, 0, 0, 1, 0xBB], &ranges);
        assert_eq!(escaped, vec![0xAA, 0, 0, 3, 1, 0xBB]);
        // [0,3) has no insert strictly inside or at start
        assert_eq!(adjusted[0], ByteRange::new(0, 3));
        // [3,5) starts exactly where the escape landed, so it shifts whole
        assert_eq!(adjusted[1], ByteRange::new(4, 6));
        // [1,4) straddles the insert, so only its end grows
        assert_eq!(adjusted[2], ByteRange::new(1, 5));
    }
}
