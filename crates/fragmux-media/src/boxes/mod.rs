//! Typed ISO-BMFF box tree.
//!
//! Every supported box parses into a typed value and serializes back to the
//! exact bytes it came from. Unknown tags are preserved raw and skipped with
//! a warning; a declared size of 0 is fatal.

mod frag;
mod moov;
mod stbl;

pub use frag::{
    tfhd_flags, trun_flags, Mehd, Mfhd, SampleFlags, Sidx, SidxReference, Tfdt, Tfhd, Trex, Trun,
    TrunSample,
};
pub use moov::{
    Avc1, Avc1Child, AvcC, Clap, Dref, DrefEntry, FileTypeBox, Hdlr, Mdhd, Mvhd, Pasp, SampleEntry,
    Stsd, Tkhd, Url, Vmhd,
};
pub use stbl::{Co64, Ctts, Stco, Stsc, StscEntry, Stss, Stsz, Stts};

pub(crate) use moov::IDENTITY_MATRIX;

use bytes::{BufMut, BytesMut};
use fragmux_common::{ByteReader, ChunkedBytes};
use tracing::warn;

use crate::{Error, Result};

/// Four-character box type code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCc(pub [u8; 4]);

impl FourCc {
    pub const FTYP: Self = Self(*b"ftyp");
    pub const STYP: Self = Self(*b"styp");
    pub const MOOV: Self = Self(*b"moov");
    pub const MVHD: Self = Self(*b"mvhd");
    pub const TRAK: Self = Self(*b"trak");
    pub const TKHD: Self = Self(*b"tkhd");
    pub const MDIA: Self = Self(*b"mdia");
    pub const MDHD: Self = Self(*b"mdhd");
    pub const HDLR: Self = Self(*b"hdlr");
    pub const MINF: Self = Self(*b"minf");
    pub const VMHD: Self = Self(*b"vmhd");
    pub const DINF: Self = Self(*b"dinf");
    pub const DREF: Self = Self(*b"dref");
    pub const URL: Self = Self(*b"url ");
    pub const STBL: Self = Self(*b"stbl");
    pub const STSD: Self = Self(*b"stsd");
    pub const AVC1: Self = Self(*b"avc1");
    pub const AVCC: Self = Self(*b"avcC");
    pub const PASP: Self = Self(*b"pasp");
    pub const CLAP: Self = Self(*b"clap");
    pub const MP4A: Self = Self(*b"mp4a");
    pub const STTS: Self = Self(*b"stts");
    pub const STSC: Self = Self(*b"stsc");
    pub const STSZ: Self = Self(*b"stsz");
    pub const STCO: Self = Self(*b"stco");
    pub const CO64: Self = Self(*b"co64");
    pub const STSS: Self = Self(*b"stss");
    pub const CTTS: Self = Self(*b"ctts");
    pub const MVEX: Self = Self(*b"mvex");
    pub const TREX: Self = Self(*b"trex");
    pub const MEHD: Self = Self(*b"mehd");
    pub const MOOF: Self = Self(*b"moof");
    pub const MFHD: Self = Self(*b"mfhd");
    pub const TRAF: Self = Self(*b"traf");
    pub const TFHD: Self = Self(*b"tfhd");
    pub const TFDT: Self = Self(*b"tfdt");
    pub const TRUN: Self = Self(*b"trun");
    pub const SIDX: Self = Self(*b"sidx");
    pub const MDAT: Self = Self(*b"mdat");
    pub const FREE: Self = Self(*b"free");
    pub const UDTA: Self = Self(*b"udta");

    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// The 4-char code as a string.
    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.0).unwrap_or("????")
    }
}

impl std::fmt::Display for FourCc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Start a box: placeholder size plus tag. Returns the patch position for
/// [`end_box`].
pub(crate) fn begin_box(buf: &mut BytesMut, fourcc: FourCc) -> usize {
    let start = buf.len();
    buf.put_u32(0); // placeholder size
    buf.put_slice(&fourcc.0);
    start
}

/// Patch the 4-byte size written by [`begin_box`].
pub(crate) fn end_box(buf: &mut BytesMut, start: usize) {
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

pub(crate) fn put_version_flags(buf: &mut BytesMut, version: u8, flags: u32) {
    buf.put_u8(version);
    buf.put_slice(&flags.to_be_bytes()[1..]);
}

pub(crate) fn read_version_flags(r: &mut ByteReader) -> fragmux_common::Result<(u8, u32)> {
    let version = r.read_u8()?;
    let flags = r.read_u24()?;
    Ok((version, flags))
}

/// A parsed box. Container variants hold their children in file order;
/// leaves hold typed fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Mp4Box {
    Ftyp(FileTypeBox),
    Styp(FileTypeBox),
    Moov(Vec<Mp4Box>),
    Mvhd(Mvhd),
    Trak(Vec<Mp4Box>),
    Tkhd(Tkhd),
    Mdia(Vec<Mp4Box>),
    Mdhd(Mdhd),
    Hdlr(Hdlr),
    Minf(Vec<Mp4Box>),
    Vmhd(Vmhd),
    Dinf(Vec<Mp4Box>),
    Dref(Dref),
    Stbl(Vec<Mp4Box>),
    Stsd(Stsd),
    Stts(Stts),
    Stsc(Stsc),
    Stsz(Stsz),
    Stco(Stco),
    Co64(Co64),
    Stss(Stss),
    Ctts(Ctts),
    Mvex(Vec<Mp4Box>),
    Trex(Trex),
    Mehd(Mehd),
    Moof(Vec<Mp4Box>),
    Mfhd(Mfhd),
    Traf(Vec<Mp4Box>),
    Tfhd(Tfhd),
    Tfdt(Tfdt),
    Trun(Trun),
    Sidx(Sidx),
    Mdat {
        data: ChunkedBytes,
        /// Written with a 16-byte extended-size header.
        large: bool,
    },
    Free(ChunkedBytes),
    Udta(ChunkedBytes),
    /// Unrecognized tag, or a known tag with an extended-size header this
    /// model does not decode. Bytes are preserved as-is.
    Unknown {
        fourcc: FourCc,
        data: ChunkedBytes,
        large: bool,
    },
}

impl Mp4Box {
    pub fn fourcc(&self) -> FourCc {
        match self {
            Self::Ftyp(_) => FourCc::FTYP,
            Self::Styp(_) => FourCc::STYP,
            Self::Moov(_) => FourCc::MOOV,
            Self::Mvhd(_) => FourCc::MVHD,
            Self::Trak(_) => FourCc::TRAK,
            Self::Tkhd(_) => FourCc::TKHD,
            Self::Mdia(_) => FourCc::MDIA,
            Self::Mdhd(_) => FourCc::MDHD,
            Self::Hdlr(_) => FourCc::HDLR,
            Self::Minf(_) => FourCc::MINF,
            Self::Vmhd(_) => FourCc::VMHD,
            Self::Dinf(_) => FourCc::DINF,
            Self::Dref(_) => FourCc::DREF,
            Self::Stbl(_) => FourCc::STBL,
            Self::Stsd(_) => FourCc::STSD,
            Self::Stts(_) => FourCc::STTS,
            Self::Stsc(_) => FourCc::STSC,
            Self::Stsz(_) => FourCc::STSZ,
            Self::Stco(_) => FourCc::STCO,
            Self::Co64(_) => FourCc::CO64,
            Self::Stss(_) => FourCc::STSS,
            Self::Ctts(_) => FourCc::CTTS,
            Self::Mvex(_) => FourCc::MVEX,
            Self::Trex(_) => FourCc::TREX,
            Self::Mehd(_) => FourCc::MEHD,
            Self::Moof(_) => FourCc::MOOF,
            Self::Mfhd(_) => FourCc::MFHD,
            Self::Traf(_) => FourCc::TRAF,
            Self::Tfhd(_) => FourCc::TFHD,
            Self::Tfdt(_) => FourCc::TFDT,
            Self::Trun(_) => FourCc::TRUN,
            Self::Sidx(_) => FourCc::SIDX,
            Self::Mdat { .. } => FourCc::MDAT,
            Self::Free(_) => FourCc::FREE,
            Self::Udta(_) => FourCc::UDTA,
            Self::Unknown { fourcc, .. } => *fourcc,
        }
    }

    /// Children of a container box, if this is one.
    pub fn children(&self) -> Option<&[Mp4Box]> {
        match self {
            Self::Moov(c)
            | Self::Trak(c)
            | Self::Mdia(c)
            | Self::Minf(c)
            | Self::Dinf(c)
            | Self::Stbl(c)
            | Self::Mvex(c)
            | Self::Moof(c)
            | Self::Traf(c) => Some(c),
            _ => None,
        }
    }

    /// First direct child with the given tag.
    pub fn child(&self, fourcc: FourCc) -> Option<&Mp4Box> {
        self.children()?.iter().find(|b| b.fourcc() == fourcc)
    }

    /// Parse one box from the reader.
    pub fn parse(r: &mut ByteReader) -> Result<Mp4Box> {
        let size = r.read_u32()? as u64;
        let fourcc = FourCc(r.read_fourcc()?);
        if size == 0 {
            return Err(Error::invalid_mp4(format!(
                "box '{fourcc}' declares size 0, its extent cannot be determined"
            )));
        }
        let (body_len, large) = if size == 1 {
            let ext = r.read_u64()?;
            if ext < 16 {
                return Err(Error::invalid_mp4(format!(
                    "box '{fourcc}' extended size {ext} smaller than its header"
                )));
            }
            (ext - 16, true)
        } else {
            if size < 8 {
                return Err(Error::invalid_mp4(format!(
                    "box '{fourcc}' size {size} smaller than its header"
                )));
            }
            (size - 8, false)
        };
        let body_len = usize::try_from(body_len)
            .map_err(|_| Error::invalid_mp4(format!("box '{fourcc}' size does not fit memory")))?;

        if large && fourcc != FourCc::MDAT {
            // only mdat is modeled with an extended header; anything else is
            // preserved raw so re-serialization stays byte-exact
            return Ok(Mp4Box::Unknown {
                fourcc,
                data: r.read_bytes(body_len)?,
                large: true,
            });
        }

        let mut body = r.sub_reader(body_len)?;
        let parsed = match fourcc {
            FourCc::FTYP => Mp4Box::Ftyp(FileTypeBox::parse(&mut body)?),
            FourCc::STYP => Mp4Box::Styp(FileTypeBox::parse(&mut body)?),
            FourCc::MOOV => Mp4Box::Moov(parse_boxes(&mut body)?),
            FourCc::MVHD => Mp4Box::Mvhd(Mvhd::parse(&mut body)?),
            FourCc::TRAK => Mp4Box::Trak(parse_boxes(&mut body)?),
            FourCc::TKHD => Mp4Box::Tkhd(Tkhd::parse(&mut body)?),
            FourCc::MDIA => Mp4Box::Mdia(parse_boxes(&mut body)?),
            FourCc::MDHD => Mp4Box::Mdhd(Mdhd::parse(&mut body)?),
            FourCc::HDLR => Mp4Box::Hdlr(Hdlr::parse(&mut body)?),
            FourCc::MINF => Mp4Box::Minf(parse_boxes(&mut body)?),
            FourCc::VMHD => Mp4Box::Vmhd(Vmhd::parse(&mut body)?),
            FourCc::DINF => Mp4Box::Dinf(parse_boxes(&mut body)?),
            FourCc::DREF => Mp4Box::Dref(Dref::parse(&mut body)?),
            FourCc::STBL => Mp4Box::Stbl(parse_boxes(&mut body)?),
            FourCc::STSD => Mp4Box::Stsd(Stsd::parse(&mut body)?),
            FourCc::STTS => Mp4Box::Stts(Stts::parse(&mut body)?),
            FourCc::STSC => Mp4Box::Stsc(Stsc::parse(&mut body)?),
            FourCc::STSZ => Mp4Box::Stsz(Stsz::parse(&mut body)?),
            FourCc::STCO => Mp4Box::Stco(Stco::parse(&mut body)?),
            FourCc::CO64 => Mp4Box::Co64(Co64::parse(&mut body)?),
            FourCc::STSS => Mp4Box::Stss(Stss::parse(&mut body)?),
            FourCc::CTTS => Mp4Box::Ctts(Ctts::parse(&mut body)?),
            FourCc::MVEX => Mp4Box::Mvex(parse_boxes(&mut body)?),
            FourCc::TREX => Mp4Box::Trex(Trex::parse(&mut body)?),
            FourCc::MEHD => Mp4Box::Mehd(Mehd::parse(&mut body)?),
            FourCc::MOOF => Mp4Box::Moof(parse_boxes(&mut body)?),
            FourCc::MFHD => Mp4Box::Mfhd(Mfhd::parse(&mut body)?),
            FourCc::TRAF => Mp4Box::Traf(parse_boxes(&mut body)?),
            FourCc::TFHD => Mp4Box::Tfhd(Tfhd::parse(&mut body)?),
            FourCc::TFDT => Mp4Box::Tfdt(Tfdt::parse(&mut body)?),
            FourCc::TRUN => Mp4Box::Trun(Trun::parse(&mut body)?),
            FourCc::SIDX => Mp4Box::Sidx(Sidx::parse(&mut body)?),
            FourCc::MDAT => Mp4Box::Mdat {
                data: body.take_remaining(),
                large,
            },
            FourCc::FREE => Mp4Box::Free(body.take_remaining()),
            FourCc::UDTA => Mp4Box::Udta(body.take_remaining()),
            other => {
                warn!(tag = %other, size = body_len, "unknown box tag, preserving raw");
                Mp4Box::Unknown {
                    fourcc: other,
                    data: body.take_remaining(),
                    large: false,
                }
            }
        };
        body.finish_container(fourcc.as_str());
        Ok(parsed)
    }

    /// Serialize this box (and any children) to the buffer.
    pub fn write_to(&self, buf: &mut BytesMut) {
        match self {
            Self::Ftyp(b) => b.write_to(buf, FourCc::FTYP),
            Self::Styp(b) => b.write_to(buf, FourCc::STYP),
            Self::Moov(c) => write_container(buf, FourCc::MOOV, c),
            Self::Mvhd(b) => b.write_to(buf),
            Self::Trak(c) => write_container(buf, FourCc::TRAK, c),
            Self::Tkhd(b) => b.write_to(buf),
            Self::Mdia(c) => write_container(buf, FourCc::MDIA, c),
            Self::Mdhd(b) => b.write_to(buf),
            Self::Hdlr(b) => b.write_to(buf),
            Self::Minf(c) => write_container(buf, FourCc::MINF, c),
            Self::Vmhd(b) => b.write_to(buf),
            Self::Dinf(c) => write_container(buf, FourCc::DINF, c),
            Self::Dref(b) => b.write_to(buf),
            Self::Stbl(c) => write_container(buf, FourCc::STBL, c),
            Self::Stsd(b) => b.write_to(buf),
            Self::Stts(b) => b.write_to(buf),
            Self::Stsc(b) => b.write_to(buf),
            Self::Stsz(b) => b.write_to(buf),
            Self::Stco(b) => b.write_to(buf),
            Self::Co64(b) => b.write_to(buf),
            Self::Stss(b) => b.write_to(buf),
            Self::Ctts(b) => b.write_to(buf),
            Self::Mvex(c) => write_container(buf, FourCc::MVEX, c),
            Self::Trex(b) => b.write_to(buf),
            Self::Mehd(b) => b.write_to(buf),
            Self::Moof(c) => write_container(buf, FourCc::MOOF, c),
            Self::Mfhd(b) => b.write_to(buf),
            Self::Traf(c) => write_container(buf, FourCc::TRAF, c),
            Self::Tfhd(b) => b.write_to(buf),
            Self::Tfdt(b) => b.write_to(buf),
            Self::Trun(b) => b.write_to(buf),
            Self::Sidx(b) => b.write_to(buf),
            Self::Mdat { data, large } => {
                if *large {
                    buf.put_u32(1);
                    buf.put_slice(&FourCc::MDAT.0);
                    buf.put_u64(data.len() as u64 + 16);
                } else {
                    buf.put_u32(data.len() as u32 + 8);
                    buf.put_slice(&FourCc::MDAT.0);
                }
                buf.put_slice(&data.copy_to_vec());
            }
            Self::Free(data) => write_raw(buf, FourCc::FREE, data, false),
            Self::Udta(data) => write_raw(buf, FourCc::UDTA, data, false),
            Self::Unknown {
                fourcc,
                data,
                large,
            } => write_raw(buf, *fourcc, data, *large),
        }
    }
}

fn write_container(buf: &mut BytesMut, fourcc: FourCc, children: &[Mp4Box]) {
    let start = begin_box(buf, fourcc);
    for child in children {
        child.write_to(buf);
    }
    end_box(buf, start);
}

fn write_raw(buf: &mut BytesMut, fourcc: FourCc, data: &ChunkedBytes, large: bool) {
    if large {
        buf.put_u32(1);
        buf.put_slice(&fourcc.0);
        buf.put_u64(data.len() as u64 + 16);
    } else {
        buf.put_u32(data.len() as u32 + 8);
        buf.put_slice(&fourcc.0);
    }
    buf.put_slice(&data.copy_to_vec());
}

/// Parse boxes until the reader's declared end.
pub fn parse_boxes(r: &mut ByteReader) -> Result<Vec<Mp4Box>> {
    let mut boxes = Vec::new();
    while r.has_remaining() {
        boxes.push(Mp4Box::parse(r)?);
    }
    Ok(boxes)
}

/// Serialize a box sequence to a byte sequence.
pub fn serialize_boxes(boxes: &[Mp4Box]) -> ChunkedBytes {
    let mut buf = BytesMut::new();
    for b in boxes {
        b.write_to(&mut buf);
    }
    ChunkedBytes::from_bytes(buf.freeze())
}
