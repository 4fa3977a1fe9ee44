//! Chunked byte sequences.
//!
//! `ChunkedBytes` is an immutable view over one or more refcounted byte
//! chunks. Slicing and concatenation share the underlying chunks instead of
//! copying. A sequence built from bit-level fragments may end on a partial
//! byte; random access requires byte alignment, and an unaligned access is a
//! programmer error rather than a recoverable condition.

use crate::{Error, Result};
use bytes::Bytes;
use std::io::Write;

/// A byte fragment with an explicit bit length. `bit_len` counts valid bits
/// from the most significant bit of the first byte; `data` must hold at least
/// `ceil(bit_len / 8)` bytes.
#[derive(Debug, Clone)]
pub struct BitChunk {
    pub data: Bytes,
    pub bit_len: u64,
}

impl BitChunk {
    pub fn new(data: impl Into<Bytes>, bit_len: u64) -> Self {
        let data = data.into();
        assert!(
            data.len() as u64 * 8 >= bit_len,
            "bit chunk shorter than its declared bit length"
        );
        Self { data, bit_len }
    }
}

/// Immutable, concatenation-friendly byte sequence.
#[derive(Debug, Clone, Default)]
pub struct ChunkedBytes {
    chunks: Vec<Bytes>,
    /// Total length in bytes, counting a trailing partial byte if present.
    len: usize,
    /// Valid bits in the final byte; 0 means the sequence is byte aligned.
    trailing_bits: u8,
}

impl ChunkedBytes {
    /// Empty sequence.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-aligned chunks.
    pub fn from_chunks(chunks: impl IntoIterator<Item = Bytes>) -> Self {
        let mut out = Self::new();
        for c in chunks {
            out.push_chunk(c);
        }
        out
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self::from_chunks([data.into()])
    }

    pub fn from_slice(data: &[u8]) -> Self {
        Self::from_bytes(Bytes::copy_from_slice(data))
    }

    /// Build from bit-level fragments, normalizing by shifting and repacking
    /// into byte-aligned storage. The result is aligned iff the total bit
    /// count is a multiple of 8.
    pub fn from_bit_chunks(chunks: impl IntoIterator<Item = BitChunk>) -> Self {
        let mut packed: Vec<u8> = Vec::new();
        let mut used: u8 = 0; // bits occupied in the last byte of `packed`

        for chunk in chunks {
            let mut remaining = chunk.bit_len;
            let mut idx = 0usize;
            while remaining > 0 {
                let take = remaining.min(8) as u8;
                let byte = chunk.data[idx];
                push_bits(&mut packed, &mut used, byte, take);
                remaining -= take as u64;
                idx += 1;
            }
        }

        let trailing_bits = used % 8;
        Self {
            len: packed.len(),
            chunks: if packed.is_empty() {
                Vec::new()
            } else {
                vec![Bytes::from(packed)]
            },
            trailing_bits,
        }
    }

    /// Append an aligned chunk. Panics if this sequence carries trailing
    /// bits; concatenating onto an unaligned sequence must go through
    /// [`ChunkedBytes::concat`], which repacks.
    pub fn push_chunk(&mut self, chunk: Bytes) {
        assert_eq!(
            self.trailing_bits, 0,
            "cannot append an aligned chunk to a bit-trimmed sequence"
        );
        if chunk.is_empty() {
            return;
        }
        self.len += chunk.len();
        self.chunks.push(chunk);
    }

    /// Concatenate sequences, sharing chunks when everything is aligned and
    /// repacking bit-by-bit otherwise.
    pub fn concat<'a>(parts: impl IntoIterator<Item = &'a ChunkedBytes>) -> Self {
        let parts: Vec<&ChunkedBytes> = parts.into_iter().collect();
        // Only the last part may be unaligned without forcing a repack.
        let needs_repack = parts
            .iter()
            .take(parts.len().saturating_sub(1))
            .any(|p| p.trailing_bits != 0);

        if !needs_repack {
            let mut out = Self::new();
            for part in &parts[..parts.len().saturating_sub(1)] {
                for c in &part.chunks {
                    out.push_chunk(c.clone());
                }
            }
            if let Some(last) = parts.last() {
                for c in &last.chunks {
                    out.len += c.len();
                    out.chunks.push(c.clone());
                }
                out.trailing_bits = last.trailing_bits;
            }
            return out;
        }

        Self::from_bit_chunks(parts.iter().flat_map(|p| p.bit_chunks()))
    }

    fn bit_chunks(&self) -> impl Iterator<Item = BitChunk> + '_ {
        let n = self.chunks.len();
        let trailing = self.trailing_bits;
        self.chunks.iter().enumerate().map(move |(i, c)| {
            let bit_len = if i + 1 == n && trailing != 0 {
                (c.len() as u64 - 1) * 8 + trailing as u64
            } else {
                c.len() as u64 * 8
            };
            BitChunk::new(c.clone(), bit_len)
        })
    }

    /// Length in whole bytes (a trailing partial byte counts as one).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Exact length in bits.
    pub fn bit_len(&self) -> u64 {
        if self.trailing_bits == 0 {
            self.len as u64 * 8
        } else {
            (self.len as u64 - 1) * 8 + self.trailing_bits as u64
        }
    }

    /// Whether the sequence ends on a byte boundary.
    pub fn is_aligned(&self) -> bool {
        self.trailing_bits == 0
    }

    fn assert_aligned(&self, what: &str) {
        assert!(
            self.is_aligned(),
            "{what} on a bit-trimmed sequence ({} trailing bits): \
             normalize through concat() first",
            self.trailing_bits
        );
    }

    /// Read a single byte.
    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        Ok(self.read_uint_be(offset, 1)? as u8)
    }

    /// Bounded big-endian unsigned read of 1..=8 bytes.
    pub fn read_uint_be(&self, offset: usize, nbytes: usize) -> Result<u64> {
        self.assert_aligned("random-access read");
        assert!((1..=8).contains(&nbytes), "read width must be 1..=8 bytes");
        if offset + nbytes > self.len {
            return Err(Error::BufferUnderflow {
                offset,
                need: nbytes,
                have: self.len.saturating_sub(offset),
            });
        }
        let mut value = 0u64;
        let mut pos = offset;
        let mut left = nbytes;
        for chunk in &self.chunks {
            if pos >= chunk.len() {
                pos -= chunk.len();
                continue;
            }
            while pos < chunk.len() && left > 0 {
                value = (value << 8) | chunk[pos] as u64;
                pos += 1;
                left -= 1;
            }
            if left == 0 {
                break;
            }
            pos = 0;
        }
        Ok(value)
    }

    /// Bounded big-endian two's-complement read of 1..=8 bytes.
    pub fn read_int_be(&self, offset: usize, nbytes: usize) -> Result<i64> {
        let raw = self.read_uint_be(offset, nbytes)?;
        let shift = 64 - nbytes as u32 * 8;
        Ok(((raw << shift) as i64) >> shift)
    }

    /// Zero-copy sub-sequence over `start..end`.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        self.assert_aligned("slice");
        assert!(start <= end && end <= self.len, "slice out of range");
        let mut out = Self::new();
        let mut skip = start;
        let mut want = end - start;
        for chunk in &self.chunks {
            if want == 0 {
                break;
            }
            if skip >= chunk.len() {
                skip -= chunk.len();
                continue;
            }
            let take = (chunk.len() - skip).min(want);
            out.push_chunk(chunk.slice(skip..skip + take));
            want -= take;
            skip = 0;
        }
        out
    }

    /// Copy the whole sequence into a contiguous vec.
    pub fn copy_to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in &self.chunks {
            out.extend_from_slice(chunk);
        }
        out
    }

    /// Collapse to a single `Bytes`, reusing the chunk when there is one.
    pub fn to_bytes(&self) -> Bytes {
        self.assert_aligned("to_bytes");
        match self.chunks.len() {
            0 => Bytes::new(),
            1 => self.chunks[0].clone(),
            _ => Bytes::from(self.copy_to_vec()),
        }
    }

    /// Write the full sequence to a sink. Panics on a bit-trimmed sequence:
    /// a partial final byte must never silently reach an output.
    pub fn write_to<W: Write>(&self, sink: &mut W) -> Result<()> {
        self.assert_aligned("write_to");
        for chunk in &self.chunks {
            sink.write_all(chunk)?;
        }
        Ok(())
    }
}

/// Append the top `nbits` bits of `byte` to a packed vec, MSB first.
fn push_bits(packed: &mut Vec<u8>, used: &mut u8, byte: u8, nbits: u8) {
    debug_assert!((1..=8).contains(&nbits));
    let bits = (byte >> (8 - nbits)) as u16;
    if *used == 0 {
        packed.push((bits << (8 - nbits)) as u8);
        *used = nbits % 8;
        return;
    }
    let space = 8 - *used;
    let last = packed.last_mut().unwrap();
    if nbits <= space {
        *last |= (bits << (space - nbits)) as u8;
        *used = (*used + nbits) % 8;
    } else {
        let spill = nbits - space;
        *last |= (bits >> spill) as u8;
        packed.push(((bits << (8 - spill)) & 0xFF) as u8);
        *used = spill;
    }
}

impl From<Vec<u8>> for ChunkedBytes {
    fn from(v: Vec<u8>) -> Self {
        Self::from_bytes(Bytes::from(v))
    }
}

impl From<Bytes> for ChunkedBytes {
    fn from(b: Bytes) -> Self {
        Self::from_bytes(b)
    }
}

impl PartialEq for ChunkedBytes {
    fn eq(&self, other: &Self) -> bool {
        self.bit_len() == other.bit_len() && self.copy_to_vec() == other.copy_to_vec()
    }
}

impl Eq for ChunkedBytes {}
