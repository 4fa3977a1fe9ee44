//! Byte-level reader with container end tracking.

use tracing::warn;

use crate::{ChunkedBytes, Error, Result};

/// Sequential reader over a [`ChunkedBytes`] sequence.
///
/// A reader covers one container (a whole file, or a size-prefixed child via
/// [`ByteReader::sub_reader`]). When the container's content has been parsed,
/// [`ByteReader::finish_container`] checks that the position landed exactly on
/// the declared end; a mismatch is logged and the position snaps to the
/// boundary so parsing of the enclosing structure can continue.
#[derive(Debug, Clone)]
pub struct ByteReader {
    data: ChunkedBytes,
    pos: usize,
}

impl ByteReader {
    pub fn new(data: ChunkedBytes) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn has_remaining(&self) -> bool {
        self.pos < self.data.len()
    }

    fn check(&self, need: usize) -> Result<()> {
        if self.remaining() < need {
            return Err(Error::BufferUnderflow {
                offset: self.pos,
                need,
                have: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let v = self.data.read_u8(self.pos)?;
        self.pos += 1;
        Ok(v)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(self.read_uint(2)? as u16)
    }

    pub fn read_u24(&mut self) -> Result<u32> {
        Ok(self.read_uint(3)? as u32)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(self.read_uint(4)? as u32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.read_uint(8)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let v = self.data.read_int_be(self.pos, 2)?;
        self.pos += 2;
        Ok(v as i16)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let v = self.data.read_int_be(self.pos, 4)?;
        self.pos += 4;
        Ok(v as i32)
    }

    fn read_uint(&mut self, nbytes: usize) -> Result<u64> {
        let v = self.data.read_uint_be(self.pos, nbytes)?;
        self.pos += nbytes;
        Ok(v)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.check(N)?;
        let mut out = [0u8; N];
        for (i, b) in out.iter_mut().enumerate() {
            *b = self.data.read_u8(self.pos + i)?;
        }
        self.pos += N;
        Ok(out)
    }

    /// Four-byte tag (box type, brand).
    pub fn read_fourcc(&mut self) -> Result<[u8; 4]> {
        self.read_array::<4>()
    }

    pub fn peek_u8(&self) -> Result<u8> {
        self.data.read_u8(self.pos)
    }

    /// Take the next `n` bytes as a zero-copy view.
    pub fn read_bytes(&mut self, n: usize) -> Result<ChunkedBytes> {
        self.check(n)?;
        let out = self.data.slice(self.pos, self.pos + n);
        self.pos += n;
        Ok(out)
    }

    /// Consume everything up to the declared end of this container.
    pub fn take_remaining(&mut self) -> ChunkedBytes {
        let out = self.data.slice(self.pos, self.data.len());
        self.pos = self.data.len();
        out
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.check(n)?;
        self.pos += n;
        Ok(())
    }

    /// NUL-terminated string; consumes the terminator. A string running to
    /// the end of the container without a terminator is accepted. Bytes are
    /// decoded as UTF-8 with replacement.
    pub fn read_cstring(&mut self) -> Result<String> {
        let mut raw = Vec::new();
        while self.has_remaining() {
            let b = self.read_u8()?;
            if b == 0 {
                break;
            }
            raw.push(b);
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Reader over the next `len` bytes, for a size-prefixed child. The
    /// parent position advances past the child regardless of how much of it
    /// the child reader consumes.
    pub fn sub_reader(&mut self, len: usize) -> Result<ByteReader> {
        Ok(ByteReader::new(self.read_bytes(len)?))
    }

    /// Check that parsing consumed exactly this container's declared extent.
    /// A short or long read is tolerated: it is logged and the position snaps
    /// to the end so the enclosing structure stays in sync.
    pub fn finish_container(&mut self, context: &str) {
        if self.pos < self.data.len() {
            warn!(
                context,
                unread = self.data.len() - self.pos,
                "container not fully consumed, skipping to declared end"
            );
        } else if self.pos > self.data.len() {
            warn!(
                context,
                overrun = self.pos - self.data.len(),
                "container over-read, snapping to declared end"
            );
        }
        self.pos = self.data.len();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(data: &[u8]) -> ByteReader {
        ByteReader::new(ChunkedBytes::from_slice(data))
    }

    #[test]
    fn test_integer_reads() {
        let mut r = reader(&[0x01, 0x02, 0x03, 0x04, 0xFF, 0xFE, 0x80, 0x00, 0x00, 0x00]);
        assert_eq!(r.read_u16().unwrap(), 0x0102);
        assert_eq!(r.read_u8().unwrap(), 0x03);
        assert_eq!(r.read_u8().unwrap(), 0x04);
        assert_eq!(r.read_i16().unwrap(), -2);
        assert_eq!(r.read_i32().unwrap(), i32::MIN);
        assert_eq!(r.remaining(), 0);
        assert!(matches!(
            r.read_u8(),
            Err(Error::BufferUnderflow { .. })
        ));
    }

    #[test]
    fn test_u24_and_u64() {
        let mut r = reader(&[0x00, 0x01, 0x00, 0, 0, 0, 0, 0, 0, 0x12, 0x34]);
        assert_eq!(r.read_u24().unwrap(), 256);
        assert_eq!(r.read_u64().unwrap(), 0x1234);
    }

    #[test]
    fn test_fourcc_and_bytes() {
        let mut r = reader(b"ftypiso5rest");
        assert_eq!(&r.read_fourcc().unwrap(), b"ftyp");
        let brand = r.read_bytes(4).unwrap();
        assert_eq!(brand.copy_to_vec(), b"iso5");
        assert_eq!(r.take_remaining().copy_to_vec(), b"rest");
        assert!(!r.has_remaining());
    }

    #[test]
    fn test_cstring() {
        let mut r = reader(b"vide\0Video Handler\0");
        r.skip(5).unwrap();
        assert_eq!(r.read_cstring().unwrap(), "Video Handler");
        // unterminated string at end of container
        let mut r = reader(b"abc");
        assert_eq!(r.read_cstring().unwrap(), "abc");
    }

    #[test]
    fn test_sub_reader_advances_parent() {
        let mut r = reader(&[0xAA, 0xBB, 0xCC, 0xDD, 0xEE]);
        let mut child = r.sub_reader(3).unwrap();
        assert_eq!(child.read_u8().unwrap(), 0xAA);
        // child only consumed 1 of 3 bytes; parent is already past all 3
        assert_eq!(r.read_u8().unwrap(), 0xDD);
        child.finish_container("test");
        assert!(!child.has_remaining());
    }

    #[test]
    fn test_finish_container_snaps() {
        let mut r = reader(&[1, 2, 3, 4]);
        r.read_u8().unwrap();
        r.finish_container("partial");
        assert_eq!(r.remaining(), 0);
    }
}
