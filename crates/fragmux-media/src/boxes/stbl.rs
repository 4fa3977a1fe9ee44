//! Sample table leaf boxes.

use bytes::{BufMut, BytesMut};
use fragmux_common::ByteReader;

use super::{begin_box, end_box, put_version_flags, read_version_flags, FourCc};
use crate::Result;

// Table entry counts come from untrusted size fields; pre-allocation is
// capped so a corrupt count cannot balloon memory before the reads fail.
fn capacity(count: u32) -> usize {
    count.min(4096) as usize
}

/// `stts` decoding time to sample: runs of `(sample_count, sample_delta)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stts {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<(u32, u32)>,
}

impl Stts {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32()?;
        let mut entries = Vec::with_capacity(capacity(entry_count));
        for _ in 0..entry_count {
            entries.push((r.read_u32()?, r.read_u32()?));
        }
        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::STTS);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.entries.len() as u32);
        for (count, delta) in &self.entries {
            buf.put_u32(*count);
            buf.put_u32(*delta);
        }
        end_box(buf, start);
    }

    pub fn empty() -> Self {
        Self {
            version: 0,
            flags: 0,
            entries: Vec::new(),
        }
    }

    pub fn sample_count(&self) -> u64 {
        self.entries.iter().map(|(c, _)| *c as u64).sum()
    }
}

/// One `stsc` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

/// `stsc` sample to chunk mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stsc {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<StscEntry>,
}

impl Stsc {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32()?;
        let mut entries = Vec::with_capacity(capacity(entry_count));
        for _ in 0..entry_count {
            entries.push(StscEntry {
                first_chunk: r.read_u32()?,
                samples_per_chunk: r.read_u32()?,
                sample_description_index: r.read_u32()?,
            });
        }
        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::STSC);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.entries.len() as u32);
        for e in &self.entries {
            buf.put_u32(e.first_chunk);
            buf.put_u32(e.samples_per_chunk);
            buf.put_u32(e.sample_description_index);
        }
        end_box(buf, start);
    }

    pub fn empty() -> Self {
        Self {
            version: 0,
            flags: 0,
            entries: Vec::new(),
        }
    }
}

/// `stsz` sample sizes. `sizes` is empty when a uniform `sample_size`
/// applies; `sample_count` is authoritative either way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stsz {
    pub version: u8,
    pub flags: u32,
    pub sample_size: u32,
    pub sample_count: u32,
    pub sizes: Vec<u32>,
}

impl Stsz {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let sample_size = r.read_u32()?;
        let sample_count = r.read_u32()?;
        let mut sizes = Vec::new();
        if sample_size == 0 {
            sizes.reserve(capacity(sample_count));
            for _ in 0..sample_count {
                sizes.push(r.read_u32()?);
            }
        }
        Ok(Self {
            version,
            flags,
            sample_size,
            sample_count,
            sizes,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::STSZ);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.sample_size);
        buf.put_u32(self.sample_count);
        if self.sample_size == 0 {
            for size in &self.sizes {
                buf.put_u32(*size);
            }
        }
        end_box(buf, start);
    }

    pub fn empty() -> Self {
        Self {
            version: 0,
            flags: 0,
            sample_size: 0,
            sample_count: 0,
            sizes: Vec::new(),
        }
    }

    /// Size of sample `index`, honoring the uniform-size case.
    pub fn size_of(&self, index: u32) -> Option<u32> {
        if index >= self.sample_count {
            return None;
        }
        if self.sample_size != 0 {
            Some(self.sample_size)
        } else {
            self.sizes.get(index as usize).copied()
        }
    }
}

/// `stco` 32-bit chunk offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stco {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<u32>,
}

impl Stco {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32()?;
        let mut entries = Vec::with_capacity(capacity(entry_count));
        for _ in 0..entry_count {
            entries.push(r.read_u32()?);
        }
        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::STCO);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.entries.len() as u32);
        for offset in &self.entries {
            buf.put_u32(*offset);
        }
        end_box(buf, start);
    }

    pub fn empty() -> Self {
        Self {
            version: 0,
            flags: 0,
            entries: Vec::new(),
        }
    }
}

/// `co64` 64-bit chunk offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Co64 {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<u64>,
}

impl Co64 {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32()?;
        let mut entries = Vec::with_capacity(capacity(entry_count));
        for _ in 0..entry_count {
            entries.push(r.read_u64()?);
        }
        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::CO64);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.entries.len() as u32);
        for offset in &self.entries {
            buf.put_u64(*offset);
        }
        end_box(buf, start);
    }
}

/// `stss` sync sample numbers, 1-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stss {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<u32>,
}

impl Stss {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32()?;
        let mut entries = Vec::with_capacity(capacity(entry_count));
        for _ in 0..entry_count {
            entries.push(r.read_u32()?);
        }
        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::STSS);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.entries.len() as u32);
        for sample in &self.entries {
            buf.put_u32(*sample);
        }
        end_box(buf, start);
    }
}

/// `ctts` composition time offsets: runs of `(sample_count, offset)`.
/// Offsets are unsigned in version 0 and signed in version 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ctts {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<(u32, i64)>,
}

impl Ctts {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32()?;
        let mut entries = Vec::with_capacity(capacity(entry_count));
        for _ in 0..entry_count {
            let count = r.read_u32()?;
            let offset = if version == 1 {
                r.read_i32()? as i64
            } else {
                r.read_u32()? as i64
            };
            entries.push((count, offset));
        }
        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::CTTS);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.entries.len() as u32);
        for (count, offset) in &self.entries {
            buf.put_u32(*count);
            if self.version == 1 {
                buf.put_i32(*offset as i32);
            } else {
                buf.put_u32(*offset as u32);
            }
        }
        end_box(buf, start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fragmux_common::ChunkedBytes;

    fn reparse<T>(buf: &BytesMut, parse: impl FnOnce(&mut ByteReader) -> Result<T>) -> T {
        let mut r = ByteReader::new(ChunkedBytes::from_slice(&buf[8..]));
        parse(&mut r).unwrap()
    }

    #[test]
    fn test_stts_round_trip() {
        let stts = Stts {
            version: 0,
            flags: 0,
            entries: vec![(30, 3000), (1, 1500)],
        };
        assert_eq!(stts.sample_count(), 31);
        let mut buf = BytesMut::new();
        stts.write_to(&mut buf);
        assert_eq!(reparse(&buf, Stts::parse), stts);
    }

    #[test]
    fn test_stsz_uniform_and_explicit() {
        let uniform = Stsz {
            version: 0,
            flags: 0,
            sample_size: 100,
            sample_count: 5,
            sizes: Vec::new(),
        };
        assert_eq!(uniform.size_of(4), Some(100));
        assert_eq!(uniform.size_of(5), None);
        let mut buf = BytesMut::new();
        uniform.write_to(&mut buf);
        assert_eq!(buf.len(), 20);
        assert_eq!(reparse(&buf, Stsz::parse), uniform);

        let explicit = Stsz {
            version: 0,
            flags: 0,
            sample_size: 0,
            sample_count: 3,
            sizes: vec![10, 20, 30],
        };
        assert_eq!(explicit.size_of(1), Some(20));
        let mut buf = BytesMut::new();
        explicit.write_to(&mut buf);
        assert_eq!(reparse(&buf, Stsz::parse), explicit);
    }

    #[test]
    fn test_ctts_signed_offsets() {
        let ctts = Ctts {
            version: 1,
            flags: 0,
            entries: vec![(2, -500), (1, 1500)],
        };
        let mut buf = BytesMut::new();
        ctts.write_to(&mut buf);
        assert_eq!(reparse(&buf, Ctts::parse), ctts);
    }

    #[test]
    fn test_empty_tables() {
        for buf in [
            {
                let mut b = BytesMut::new();
                Stts::empty().write_to(&mut b);
                b
            },
            {
                let mut b = BytesMut::new();
                Stsc::empty().write_to(&mut b);
                b
            },
            {
                let mut b = BytesMut::new();
                Stco::empty().write_to(&mut b);
                b
            },
        ] {
            assert_eq!(buf.len(), 16);
        }
        let mut b = BytesMut::new();
        Stsz::empty().write_to(&mut b);
        assert_eq!(b.len(), 20);
    }
}
