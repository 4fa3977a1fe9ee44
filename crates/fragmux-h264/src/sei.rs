//! Supplemental enhancement information.

use crate::nal::{NalHeader, NalUnitType};
use crate::rbsp::unescape_rbsp;
use crate::{Error, Result};

/// One SEI message. The payload is kept raw; only the framing is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeiMessage {
    pub payload_type: u32,
    pub payload: Vec<u8>,
}

impl SeiMessage {
    /// Parse every message in an SEI NAL (header byte included, emulation
    /// prevention still applied).
    pub fn parse_nal(nal: &[u8]) -> Result<Vec<SeiMessage>> {
        let header = NalHeader::parse(nal)?;
        if header.unit_type != NalUnitType::Sei {
            return Err(Error::corrupt(format!(
                "expected an SEI NAL, got {:?}",
                header.unit_type
            )));
        }
        let rbsp = unescape_rbsp(&nal[header.header_len..])?;
        Self::parse(&rbsp)
    }

    /// Parse messages from the unescaped RBSP. Messages repeat until only
    /// the trailing stop bit remains.
    pub fn parse(rbsp: &[u8]) -> Result<Vec<SeiMessage>> {
        let mut messages = Vec::new();
        let mut pos = 0usize;
        // stop once the rest is the trailing byte (stop bit + padding)
        while pos + 1 < rbsp.len() || (pos < rbsp.len() && rbsp[pos] != 0x80) {
            let payload_type = Self::read_scaled(rbsp, &mut pos)?;
            let payload_size = Self::read_scaled(rbsp, &mut pos)? as usize;
            if rbsp.len() - pos < payload_size {
                return Err(Error::corrupt(format!(
                    "SEI payload of {} bytes overruns {} remaining",
                    payload_size,
                    rbsp.len() - pos
                )));
            }
            messages.push(SeiMessage {
                payload_type,
                payload: rbsp[pos..pos + payload_size].to_vec(),
            });
            pos += payload_size;
        }
        Ok(messages)
    }

    /// Byte-accumulated value: `FF` bytes add 255 each until a terminator
    /// byte below `FF`.
    fn read_scaled(rbsp: &[u8], pos: &mut usize) -> Result<u32> {
        let mut value = 0u32;
        loop {
            let byte = *rbsp
                .get(*pos)
                .ok_or_else(|| Error::corrupt("truncated SEI type/size field"))?;
            *pos += 1;
            value += byte as u32;
            if byte != 0xFF {
                return Ok(value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_message() {
        // type 5 (user data unregistered), size 4, payload, trailing 0x80
        let rbsp = [5u8, 4, 0xDE, 0xAD, 0xBE, 0xEF, 0x80];
        let msgs = SeiMessage::parse(&rbsp).unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].payload_type, 5);
        assert_eq!(msgs[0].payload, vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_scaled_fields() {
        // type 255+1 = 256, size 255+255+2 = 512
        let mut rbsp = vec![0xFF, 1, 0xFF, 0xFF, 2];
        rbsp.extend(std::iter::repeat(0xAB).take(512));
        rbsp.push(0x80);
        let msgs = SeiMessage::parse(&rbsp).unwrap();
        assert_eq!(msgs[0].payload_type, 256);
        assert_eq!(msgs[0].payload.len(), 512);
    }

    #[test]
    fn test_multiple_messages() {
        let rbsp = [1u8, 1, 0x11, 6, 2, 0x22, 0x33, 0x80];
        let msgs = SeiMessage::parse(&rbsp).unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].payload_type, 6);
        assert_eq!(msgs[1].payload, vec![0x22, 0x33]);
    }

    #[test]
    fn test_overrun_is_fatal() {
        let err = SeiMessage::parse(&[5, 9, 1, 2]).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }
}
