//! Annex-B start-code framing and length-prefixed (AVCC) framing.

use bytes::Bytes;
use fragmux_common::ChunkedBytes;

use crate::{Error, Result};

/// Split an Annex-B elementary stream into its NAL units.
///
/// Start codes may be 3 bytes (`00 00 01`) or 4 bytes (`00 00 00 01`);
/// returned NALs exclude them. Data before the first start code is ignored.
/// A run of four or more zero bytes means the stream was not escaped
/// properly and is treated as corruption.
pub fn split_annex_b(data: impl Into<Bytes>) -> Result<Vec<Bytes>> {
    let data = data.into();
    let mut nals = Vec::new();
    let mut start: Option<usize> = None;
    let mut zeros = 0usize;
    for (i, &b) in data.iter().enumerate() {
        if b == 0 {
            zeros += 1;
            if zeros >= 4 {
                return Err(Error::corrupt(format!(
                    "run of {} zero bytes at offset {}, start codes are at most 4 bytes",
                    zeros,
                    i + 1 - zeros
                )));
            }
        } else {
            if b == 1 && zeros >= 2 {
                if let Some(s) = start {
                    nals.push(data.slice(s..i - zeros));
                }
                start = Some(i + 1);
            }
            zeros = 0;
        }
    }
    if let Some(s) = start {
        nals.push(data.slice(s..));
    }
    Ok(nals)
}

/// Frame NAL units with 4-byte big-endian length prefixes (AVCC framing,
/// as stored inside an mdat).
pub fn to_length_prefixed<'a>(nals: impl IntoIterator<Item = &'a Bytes>) -> ChunkedBytes {
    let mut out = ChunkedBytes::new();
    for nal in nals {
        out.push_chunk(Bytes::from((nal.len() as u32).to_be_bytes().to_vec()));
        out.push_chunk(nal.clone());
    }
    out
}

/// Split a length-prefixed sample payload back into NAL units.
pub fn split_length_prefixed(data: Bytes, len_size: usize) -> Result<Vec<Bytes>> {
    assert!((1..=4).contains(&len_size));
    let mut nals = Vec::new();
    let mut pos = 0usize;
    while pos < data.len() {
        if data.len() - pos < len_size {
            return Err(Error::corrupt(format!(
                "truncated NAL length prefix at offset {pos}"
            )));
        }
        let mut len = 0usize;
        for i in 0..len_size {
            len = (len << 8) | data[pos + i] as usize;
        }
        pos += len_size;
        if data.len() - pos < len {
            return Err(Error::corrupt(format!(
                "NAL of length {} at offset {} overruns payload of {} bytes",
                len,
                pos,
                data.len()
            )));
        }
        nals.push(data.slice(pos..pos + len));
        pos += len;
    }
    Ok(nals)
}

/// Rejoin NAL units into an Annex-B stream with 4-byte start codes.
pub fn to_annex_b<'a>(nals: impl IntoIterator<Item = &'a Bytes>) -> ChunkedBytes {
    static START_CODE: [u8; 4] = [0, 0, 0, 1];
    let mut out = ChunkedBytes::new();
    for nal in nals {
        out.push_chunk(Bytes::from_static(&START_CODE));
        out.push_chunk(nal.clone());
    }
    out
}
