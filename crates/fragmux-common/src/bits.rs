//! MSB-first bit reader/writer with Exp-Golomb codes.

use crate::{BitChunk, Error, Result};

/// Reader over a byte slice with bit granularity. Position is tracked as an
/// absolute bit offset from the start of the slice.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: u64,
    bit_len: u64,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_pos: 0,
            bit_len: data.len() as u64 * 8,
        }
    }

    /// Reader over only the first `bit_len` bits of `data`.
    pub fn with_bit_len(data: &'a [u8], bit_len: u64) -> Self {
        assert!(bit_len <= data.len() as u64 * 8);
        Self {
            data,
            bit_pos: 0,
            bit_len,
        }
    }

    pub fn bit_position(&self) -> u64 {
        self.bit_pos
    }

    pub fn byte_position(&self) -> usize {
        (self.bit_pos / 8) as usize
    }

    pub fn bit_offset(&self) -> u8 {
        (self.bit_pos % 8) as u8
    }

    pub fn is_aligned(&self) -> bool {
        self.bit_pos % 8 == 0
    }

    pub fn remaining_bits(&self) -> u64 {
        self.bit_len - self.bit_pos
    }

    fn check(&self, need: u64) -> Result<()> {
        if self.remaining_bits() < need {
            return Err(Error::BitUnderflow {
                need,
                have: self.remaining_bits(),
            });
        }
        Ok(())
    }

    pub fn read_bit(&mut self) -> Result<bool> {
        self.check(1)?;
        let byte = self.data[(self.bit_pos / 8) as usize];
        let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
        self.bit_pos += 1;
        Ok(bit != 0)
    }

    /// Alias used where the grammar calls the field a flag.
    pub fn read_flag(&mut self) -> Result<bool> {
        self.read_bit()
    }

    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        assert!(n <= 32, "read_bits width must be <= 32");
        Ok(self.read_bits64(n)? as u32)
    }

    pub fn read_bits64(&mut self, n: u32) -> Result<u64> {
        assert!(n <= 64, "read_bits64 width must be <= 64");
        self.check(n as u64)?;
        let mut value = 0u64;
        for _ in 0..n {
            let byte = self.data[(self.bit_pos / 8) as usize];
            let bit = (byte >> (7 - (self.bit_pos % 8))) & 1;
            value = (value << 1) | bit as u64;
            self.bit_pos += 1;
        }
        Ok(value)
    }

    /// Read without advancing.
    pub fn peek_bits(&self, n: u32) -> Result<u32> {
        let mut copy = self.clone();
        copy.read_bits(n)
    }

    /// Unsigned Exp-Golomb: m leading zeros, a one, then m suffix bits;
    /// the value is `suffix + 2^m - 1`.
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut m = 0u32;
        while !self.read_bit()? {
            m += 1;
            if m > 31 {
                return Err(Error::invalid_data(
                    "exp-golomb code exceeds 32 significant bits",
                ));
            }
        }
        let suffix = self.read_bits64(m)?;
        Ok(((1u64 << m) - 1 + suffix) as u32)
    }

    /// Signed Exp-Golomb: code `k` maps to `-k/2` when even, `(k+1)/2` when
    /// odd.
    pub fn read_se(&mut self) -> Result<i32> {
        let k = self.read_ue()? as i64;
        let v = if k % 2 == 0 { -(k / 2) } else { (k + 1) / 2 };
        Ok(v as i32)
    }

    pub fn align_to_byte(&mut self) {
        self.bit_pos = (self.bit_pos + 7) / 8 * 8;
        self.bit_pos = self.bit_pos.min(self.bit_len);
    }

    /// Whether payload bits remain before the RBSP stop bit. The stop bit is
    /// the least significant set bit of the final byte.
    pub fn more_rbsp_data(&self) -> Result<bool> {
        if self.bit_pos >= self.bit_len {
            return Ok(false);
        }
        debug_assert_eq!(self.bit_len % 8, 0, "rbsp payloads are whole bytes");
        let last = self.data[(self.bit_len / 8) as usize - 1];
        if last == 0 {
            return Err(Error::invalid_data("missing rbsp stop bit"));
        }
        let stop_bit = self.bit_len - 1 - last.trailing_zeros() as u64;
        Ok(self.bit_pos < stop_bit)
    }
}

/// Writer accumulating bits MSB-first.
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    bit_len: u64,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> u64 {
        self.bit_len
    }

    pub fn is_aligned(&self) -> bool {
        self.bit_len % 8 == 0
    }

    pub fn write_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.buf.push(0);
        }
        if bit {
            let idx = (self.bit_len / 8) as usize;
            self.buf[idx] |= 1 << (7 - (self.bit_len % 8));
        }
        self.bit_len += 1;
    }

    pub fn write_flag(&mut self, flag: bool) {
        self.write_bit(flag);
    }

    pub fn write_bits(&mut self, value: u32, n: u32) {
        self.write_bits64(value as u64, n);
    }

    pub fn write_bits64(&mut self, value: u64, n: u32) {
        assert!(n <= 64);
        for i in (0..n).rev() {
            self.write_bit((value >> i) & 1 != 0);
        }
    }

    /// Unsigned Exp-Golomb, the exact inverse of [`BitReader::read_ue`].
    pub fn write_ue(&mut self, x: u32) {
        let v = x as u64 + 1;
        let m = 63 - v.leading_zeros();
        self.write_bits64(0, m);
        self.write_bit(true);
        self.write_bits64(v - (1u64 << m), m);
    }

    /// Signed Exp-Golomb: `x > 0` encodes as `2x - 1`, `x <= 0` as `-2x`.
    pub fn write_se(&mut self, x: i32) {
        let k = if x > 0 {
            2 * x as i64 - 1
        } else {
            -2 * x as i64
        };
        self.write_ue(k as u32);
    }

    /// Append whole bytes; requires alignment.
    pub fn write_bytes(&mut self, data: &[u8]) {
        assert!(self.is_aligned(), "write_bytes requires byte alignment");
        self.buf.extend_from_slice(data);
        self.bit_len += data.len() as u64 * 8;
    }

    /// RBSP trailing bits: a stop bit then zero padding to the next byte
    /// boundary.
    pub fn rbsp_trailing(&mut self) {
        self.write_bit(true);
        while !self.is_aligned() {
            self.write_bit(false);
        }
    }

    /// Finish as whole bytes; panics if unaligned.
    pub fn into_vec(self) -> Vec<u8> {
        assert!(self.is_aligned(), "bit writer finished off a byte boundary");
        self.buf
    }

    /// Finish as a bit-level fragment, preserving a partial final byte.
    pub fn into_bit_chunk(self) -> BitChunk {
        BitChunk::new(self.buf, self.bit_len)
    }
}

/// 16.16 fixed-point encode for integer values (tkhd width/height style).
pub fn fixed_16_16(value: u32) -> u32 {
    value << 16
}

/// Integer part of a 16.16 fixed-point field.
pub fn from_fixed_16_16(raw: u32) -> u32 {
    raw >> 16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_reads() {
        let mut r = BitReader::new(&[0b1011_0010, 0xFF]);
        assert!(r.read_bit().unwrap());
        assert!(!r.read_bit().unwrap());
        assert_eq!(r.read_bits(4).unwrap(), 0b1100);
        assert_eq!(r.bit_offset(), 6);
        assert_eq!(r.read_bits(10).unwrap(), 0b10_1111_1111);
        assert_eq!(r.remaining_bits(), 0);
        assert!(matches!(r.read_bit(), Err(Error::BitUnderflow { .. })));
    }

    #[test]
    fn test_ue_known_codes() {
        // 1 -> 0, 010 -> 1, 011 -> 2, 00100 -> 3
        let mut r = BitReader::new(&[0b1_010_011_0, 0b0100_0000]);
        assert_eq!(r.read_ue().unwrap(), 0);
        assert_eq!(r.read_ue().unwrap(), 1);
        assert_eq!(r.read_ue().unwrap(), 2);
        assert_eq!(r.read_ue().unwrap(), 3);
    }

    #[test]
    fn test_ue_round_trip() {
        let values = [
            0u32,
            1,
            2,
            3,
            7,
            8,
            255,
            256,
            12345,
            0xFFFF,
            1 << 20,
            (1 << 31) - 1,
            1 << 31,
            u32::MAX - 1,
        ];
        let mut w = BitWriter::new();
        for &v in &values {
            w.write_ue(v);
        }
        w.rbsp_trailing();
        let bytes = w.into_vec();
        let mut r = BitReader::new(&bytes);
        for &v in &values {
            assert_eq!(r.read_ue().unwrap(), v);
        }
    }

    #[test]
    fn test_se_round_trip() {
        let values = [0i32, 1, -1, 2, -2, 17, -17, 4096, -4096, i32::MAX, i32::MIN + 1];
        let mut w = BitWriter::new();
        for &v in &values {
            w.write_se(v);
        }
        w.rbsp_trailing();
        let bytes = w.into_vec();
        let mut r = BitReader::new(&bytes);
        for &v in &values {
            assert_eq!(r.read_se().unwrap(), v);
        }
    }

    #[test]
    fn test_se_mapping() {
        // codes 0,1,2,3,4 -> values 0,1,-1,2,-2
        let mut w = BitWriter::new();
        for k in 0u32..5 {
            w.write_ue(k);
        }
        w.rbsp_trailing();
        let bytes = w.into_vec();
        let mut r = BitReader::new(&bytes);
        let got: Vec<i32> = (0..5).map(|_| r.read_se().unwrap()).collect();
        assert_eq!(got, vec![0, 1, -1, 2, -2]);
    }

    #[test]
    fn test_more_rbsp_data() {
        // ue(3) then trailing: 00100 1 00
        let mut w = BitWriter::new();
        w.write_ue(3);
        w.rbsp_trailing();
        let bytes = w.into_vec();
        let mut r = BitReader::new(&bytes);
        assert!(r.more_rbsp_data().unwrap());
        assert_eq!(r.read_ue().unwrap(), 3);
        assert!(!r.more_rbsp_data().unwrap());
    }

    #[test]
    fn test_rbsp_trailing_alignment() {
        let mut w = BitWriter::new();
        w.write_bits(0b101, 3);
        w.rbsp_trailing();
        assert_eq!(w.into_vec(), vec![0b1011_0000]);
    }

    #[test]
    fn test_fixed_point() {
        assert_eq!(fixed_16_16(640), 0x0280_0000);
        assert_eq!(from_fixed_16_16(0x0280_0000), 640);
    }
}
