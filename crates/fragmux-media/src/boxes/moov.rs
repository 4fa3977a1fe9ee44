//! Movie-level and sample-description boxes.

use bytes::{BufMut, BytesMut};
use fragmux_common::{ByteReader, ChunkedBytes};
use tracing::warn;

use super::{begin_box, end_box, put_version_flags, read_version_flags, FourCc};
use crate::Result;

/// `ftyp` / `styp` brand box.
#[derive(Debug, Clone, PartialEq)]
pub struct FileTypeBox {
    pub major_brand: [u8; 4],
    pub minor_version: u32,
    pub compatible_brands: Vec<[u8; 4]>,
}

impl FileTypeBox {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let major_brand = r.read_fourcc()?;
        let minor_version = r.read_u32()?;
        let mut compatible_brands = Vec::new();
        while r.remaining() >= 4 {
            compatible_brands.push(r.read_fourcc()?);
        }
        Ok(Self {
            major_brand,
            minor_version,
            compatible_brands,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut, fourcc: FourCc) {
        let start = begin_box(buf, fourcc);
        buf.put_slice(&self.major_brand);
        buf.put_u32(self.minor_version);
        for brand in &self.compatible_brands {
            buf.put_slice(brand);
        }
        end_box(buf, start);
    }
}

/// `mvhd` movie header.
#[derive(Debug, Clone, PartialEq)]
pub struct Mvhd {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    pub rate: i32,
    pub volume: i16,
    pub reserved: u16,
    pub reserved2: [u32; 2],
    pub matrix: [i32; 9],
    pub pre_defined: [u32; 6],
    pub next_track_id: u32,
}

impl Mvhd {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let (creation_time, modification_time, timescale, duration) = if version == 1 {
            (r.read_u64()?, r.read_u64()?, r.read_u32()?, r.read_u64()?)
        } else {
            (
                r.read_u32()? as u64,
                r.read_u32()? as u64,
                r.read_u32()?,
                r.read_u32()? as u64,
            )
        };
        let rate = r.read_i32()?;
        let volume = r.read_i16()?;
        let reserved = r.read_u16()?;
        let mut reserved2 = [0u32; 2];
        for v in &mut reserved2 {
            *v = r.read_u32()?;
        }
        let mut matrix = [0i32; 9];
        for v in &mut matrix {
            *v = r.read_i32()?;
        }
        let mut pre_defined = [0u32; 6];
        for v in &mut pre_defined {
            *v = r.read_u32()?;
        }
        let next_track_id = r.read_u32()?;
        Ok(Self {
            version,
            flags,
            creation_time,
            modification_time,
            timescale,
            duration,
            rate,
            volume,
            reserved,
            reserved2,
            matrix,
            pre_defined,
            next_track_id,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::MVHD);
        put_version_flags(buf, self.version, self.flags);
        if self.version == 1 {
            buf.put_u64(self.creation_time);
            buf.put_u64(self.modification_time);
            buf.put_u32(self.timescale);
            buf.put_u64(self.duration);
        } else {
            buf.put_u32(self.creation_time as u32);
            buf.put_u32(self.modification_time as u32);
            buf.put_u32(self.timescale);
            buf.put_u32(self.duration as u32);
        }
        buf.put_i32(self.rate);
        buf.put_i16(self.volume);
        buf.put_u16(self.reserved);
        for v in self.reserved2 {
            buf.put_u32(v);
        }
        for v in self.matrix {
            buf.put_i32(v);
        }
        for v in self.pre_defined {
            buf.put_u32(v);
        }
        buf.put_u32(self.next_track_id);
        end_box(buf, start);
    }
}

/// Identity transform used by both `mvhd` and `tkhd`.
pub(crate) const IDENTITY_MATRIX: [i32; 9] = [65536, 0, 0, 0, 65536, 0, 0, 0, 1073741824];

impl Default for Mvhd {
    fn default() -> Self {
        Self {
            version: 0,
            flags: 0,
            creation_time: 0,
            modification_time: 0,
            timescale: 1000,
            duration: 0,
            rate: 0x0001_0000,
            volume: 0x0100,
            reserved: 0,
            reserved2: [0; 2],
            matrix: IDENTITY_MATRIX,
            pre_defined: [0; 6],
            next_track_id: 2,
        }
    }
}

/// `tkhd` track header.
#[derive(Debug, Clone, PartialEq)]
pub struct Tkhd {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub track_id: u32,
    pub reserved: u32,
    pub duration: u64,
    pub reserved2: [u32; 2],
    pub layer: i16,
    pub alternate_group: i16,
    pub volume: i16,
    pub reserved3: u16,
    pub matrix: [i32; 9],
    /// 16.16 fixed point.
    pub width: u32,
    /// 16.16 fixed point.
    pub height: u32,
}

impl Tkhd {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let (creation_time, modification_time, track_id, reserved, duration) = if version == 1 {
            (
                r.read_u64()?,
                r.read_u64()?,
                r.read_u32()?,
                r.read_u32()?,
                r.read_u64()?,
            )
        } else {
            (
                r.read_u32()? as u64,
                r.read_u32()? as u64,
                r.read_u32()?,
                r.read_u32()?,
                r.read_u32()? as u64,
            )
        };
        let mut reserved2 = [0u32; 2];
        for v in &mut reserved2 {
            *v = r.read_u32()?;
        }
        let layer = r.read_i16()?;
        let alternate_group = r.read_i16()?;
        let volume = r.read_i16()?;
        let reserved3 = r.read_u16()?;
        let mut matrix = [0i32; 9];
        for v in &mut matrix {
            *v = r.read_i32()?;
        }
        let width = r.read_u32()?;
        let height = r.read_u32()?;
        Ok(Self {
            version,
            flags,
            creation_time,
            modification_time,
            track_id,
            reserved,
            duration,
            reserved2,
            layer,
            alternate_group,
            volume,
            reserved3,
            matrix,
            width,
            height,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::TKHD);
        put_version_flags(buf, self.version, self.flags);
        if self.version == 1 {
            buf.put_u64(self.creation_time);
            buf.put_u64(self.modification_time);
            buf.put_u32(self.track_id);
            buf.put_u32(self.reserved);
            buf.put_u64(self.duration);
        } else {
            buf.put_u32(self.creation_time as u32);
            buf.put_u32(self.modification_time as u32);
            buf.put_u32(self.track_id);
            buf.put_u32(self.reserved);
            buf.put_u32(self.duration as u32);
        }
        for v in self.reserved2 {
            buf.put_u32(v);
        }
        buf.put_i16(self.layer);
        buf.put_i16(self.alternate_group);
        buf.put_i16(self.volume);
        buf.put_u16(self.reserved3);
        for v in self.matrix {
            buf.put_i32(v);
        }
        buf.put_u32(self.width);
        buf.put_u32(self.height);
        end_box(buf, start);
    }
}

/// `mdhd` media header.
#[derive(Debug, Clone, PartialEq)]
pub struct Mdhd {
    pub version: u8,
    pub flags: u32,
    pub creation_time: u64,
    pub modification_time: u64,
    pub timescale: u32,
    pub duration: u64,
    /// Packed ISO-639-2 code: pad bit plus three 5-bit letters.
    pub language: u16,
    pub pre_defined: u16,
}

impl Mdhd {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let (creation_time, modification_time, timescale, duration) = if version == 1 {
            (r.read_u64()?, r.read_u64()?, r.read_u32()?, r.read_u64()?)
        } else {
            (
                r.read_u32()? as u64,
                r.read_u32()? as u64,
                r.read_u32()?,
                r.read_u32()? as u64,
            )
        };
        let language = r.read_u16()?;
        let pre_defined = r.read_u16()?;
        Ok(Self {
            version,
            flags,
            creation_time,
            modification_time,
            timescale,
            duration,
            language,
            pre_defined,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::MDHD);
        put_version_flags(buf, self.version, self.flags);
        if self.version == 1 {
            buf.put_u64(self.creation_time);
            buf.put_u64(self.modification_time);
            buf.put_u32(self.timescale);
            buf.put_u64(self.duration);
        } else {
            buf.put_u32(self.creation_time as u32);
            buf.put_u32(self.modification_time as u32);
            buf.put_u32(self.timescale);
            buf.put_u32(self.duration as u32);
        }
        buf.put_u16(self.language);
        buf.put_u16(self.pre_defined);
        end_box(buf, start);
    }

    /// Pack a three-letter lowercase language code.
    pub fn pack_language(code: &[u8; 3]) -> u16 {
        let mut packed = 0u16;
        for &c in code {
            packed = (packed << 5) | ((c as u16).saturating_sub(0x60) & 0x1F);
        }
        packed
    }

    /// The language as a three-letter string.
    pub fn language_str(&self) -> String {
        (0..3)
            .map(|i| (((self.language >> (10 - i * 5)) & 0x1F) as u8 + 0x60) as char)
            .collect()
    }
}

/// `hdlr` handler reference. The trailing name is kept raw so serialization
/// is exact regardless of terminator conventions.
#[derive(Debug, Clone, PartialEq)]
pub struct Hdlr {
    pub version: u8,
    pub flags: u32,
    pub pre_defined: u32,
    pub handler_type: [u8; 4],
    pub reserved: [u32; 3],
    pub name: ChunkedBytes,
}

impl Hdlr {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let pre_defined = r.read_u32()?;
        let handler_type = r.read_fourcc()?;
        let mut reserved = [0u32; 3];
        for v in &mut reserved {
            *v = r.read_u32()?;
        }
        let name = r.take_remaining();
        Ok(Self {
            version,
            flags,
            pre_defined,
            handler_type,
            reserved,
            name,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::HDLR);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.pre_defined);
        buf.put_slice(&self.handler_type);
        for v in self.reserved {
            buf.put_u32(v);
        }
        buf.put_slice(&self.name.copy_to_vec());
        end_box(buf, start);
    }

    /// The handler name without its NUL terminator.
    pub fn name_str(&self) -> String {
        let raw = self.name.copy_to_vec();
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        String::from_utf8_lossy(&raw[..end]).into_owned()
    }
}

/// `vmhd` video media header.
#[derive(Debug, Clone, PartialEq)]
pub struct Vmhd {
    pub version: u8,
    pub flags: u32,
    pub graphicsmode: u16,
    pub opcolor: [u16; 3],
}

impl Vmhd {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let graphicsmode = r.read_u16()?;
        let mut opcolor = [0u16; 3];
        for v in &mut opcolor {
            *v = r.read_u16()?;
        }
        Ok(Self {
            version,
            flags,
            graphicsmode,
            opcolor,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::VMHD);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u16(self.graphicsmode);
        for v in self.opcolor {
            buf.put_u16(v);
        }
        end_box(buf, start);
    }
}

/// `url ` data entry. The self-contained flag leaves the location empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Url {
    pub version: u8,
    pub flags: u32,
    pub location: ChunkedBytes,
}

impl Url {
    fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let location = r.take_remaining();
        Ok(Self {
            version,
            flags,
            location,
        })
    }

    fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::URL);
        put_version_flags(buf, self.version, self.flags);
        buf.put_slice(&self.location.copy_to_vec());
        end_box(buf, start);
    }
}

/// One `dref` child.
#[derive(Debug, Clone, PartialEq)]
pub enum DrefEntry {
    Url(Url),
    Other { fourcc: FourCc, data: ChunkedBytes },
}

/// `dref` data reference box.
#[derive(Debug, Clone, PartialEq)]
pub struct Dref {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<DrefEntry>,
}

impl Dref {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32()?;
        let mut entries = Vec::with_capacity(entry_count.min(64) as usize);
        for _ in 0..entry_count {
            let size = r.read_u32()? as usize;
            let fourcc = FourCc(r.read_fourcc()?);
            let mut body = r.sub_reader(size.saturating_sub(8))?;
            let entry = if fourcc == FourCc::URL {
                DrefEntry::Url(Url::parse(&mut body)?)
            } else {
                warn!(tag = %fourcc, "unknown data reference entry, preserving raw");
                DrefEntry::Other {
                    fourcc,
                    data: body.take_remaining(),
                }
            };
            body.finish_container(fourcc.as_str());
            entries.push(entry);
        }
        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::DREF);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            match entry {
                DrefEntry::Url(url) => url.write_to(buf),
                DrefEntry::Other { fourcc, data } => {
                    let s = begin_box(buf, *fourcc);
                    buf.put_slice(&data.copy_to_vec());
                    end_box(buf, s);
                }
            }
        }
        end_box(buf, start);
    }
}

/// One `stsd` sample entry.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleEntry {
    Avc1(Avc1),
    Other { fourcc: FourCc, data: ChunkedBytes },
}

impl SampleEntry {
    pub fn fourcc(&self) -> FourCc {
        match self {
            Self::Avc1(_) => FourCc::AVC1,
            Self::Other { fourcc, .. } => *fourcc,
        }
    }
}

/// `stsd` sample description box.
#[derive(Debug, Clone, PartialEq)]
pub struct Stsd {
    pub version: u8,
    pub flags: u32,
    pub entries: Vec<SampleEntry>,
}

impl Stsd {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let entry_count = r.read_u32()?;
        let mut entries = Vec::with_capacity(entry_count.min(64) as usize);
        for _ in 0..entry_count {
            let size = r.read_u32()? as usize;
            let fourcc = FourCc(r.read_fourcc()?);
            let mut body = r.sub_reader(size.saturating_sub(8))?;
            let entry = if fourcc == FourCc::AVC1 {
                SampleEntry::Avc1(Avc1::parse(&mut body)?)
            } else {
                warn!(tag = %fourcc, "unhandled sample entry, preserving raw");
                SampleEntry::Other {
                    fourcc,
                    data: body.take_remaining(),
                }
            };
            body.finish_container(fourcc.as_str());
            entries.push(entry);
        }
        Ok(Self {
            version,
            flags,
            entries,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::STSD);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.entries.len() as u32);
        for entry in &self.entries {
            match entry {
                SampleEntry::Avc1(avc1) => avc1.write_to(buf),
                SampleEntry::Other { fourcc, data } => {
                    let s = begin_box(buf, *fourcc);
                    buf.put_slice(&data.copy_to_vec());
                    end_box(buf, s);
                }
            }
        }
        end_box(buf, start);
    }

    /// The AVC sample entry, if any.
    pub fn avc1(&self) -> Option<&Avc1> {
        self.entries.iter().find_map(|e| match e {
            SampleEntry::Avc1(a) => Some(a),
            _ => None,
        })
    }
}

/// One child box of an `avc1` sample entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Avc1Child {
    AvcC(AvcC),
    Pasp(Pasp),
    Clap(Clap),
    Other { fourcc: FourCc, data: ChunkedBytes },
}

/// `avc1` visual sample entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Avc1 {
    pub reserved: [u8; 6],
    pub data_reference_index: u16,
    pub pre_defined: u16,
    pub reserved2: u16,
    pub pre_defined2: [u32; 3],
    pub width: u16,
    pub height: u16,
    /// 16.16 fixed point, dots per inch.
    pub horizresolution: u32,
    pub vertresolution: u32,
    pub reserved3: u32,
    pub frame_count: u16,
    /// Pascal-style padded name, kept raw.
    pub compressorname: [u8; 32],
    pub depth: u16,
    pub pre_defined3: i16,
    pub children: Vec<Avc1Child>,
}

impl Avc1 {
    fn parse(r: &mut ByteReader) -> Result<Self> {
        let reserved = r.read_array::<6>()?;
        let data_reference_index = r.read_u16()?;
        let pre_defined = r.read_u16()?;
        let reserved2 = r.read_u16()?;
        let mut pre_defined2 = [0u32; 3];
        for v in &mut pre_defined2 {
            *v = r.read_u32()?;
        }
        let width = r.read_u16()?;
        let height = r.read_u16()?;
        let horizresolution = r.read_u32()?;
        let vertresolution = r.read_u32()?;
        let reserved3 = r.read_u32()?;
        let frame_count = r.read_u16()?;
        let compressorname = r.read_array::<32>()?;
        let depth = r.read_u16()?;
        let pre_defined3 = r.read_i16()?;

        let mut children = Vec::new();
        while r.remaining() >= 8 {
            let size = r.read_u32()? as usize;
            let fourcc = FourCc(r.read_fourcc()?);
            let mut body = r.sub_reader(size.saturating_sub(8))?;
            let child = match fourcc {
                FourCc::AVCC => Avc1Child::AvcC(AvcC::parse(&mut body)?),
                FourCc::PASP => Avc1Child::Pasp(Pasp::parse(&mut body)?),
                FourCc::CLAP => Avc1Child::Clap(Clap::parse(&mut body)?),
                other => {
                    warn!(tag = %other, "unhandled sample entry child, preserving raw");
                    Avc1Child::Other {
                        fourcc: other,
                        data: body.take_remaining(),
                    }
                }
            };
            body.finish_container(fourcc.as_str());
            children.push(child);
        }
        Ok(Self {
            reserved,
            data_reference_index,
            pre_defined,
            reserved2,
            pre_defined2,
            width,
            height,
            horizresolution,
            vertresolution,
            reserved3,
            frame_count,
            compressorname,
            depth,
            pre_defined3,
            children,
        })
    }

    fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::AVC1);
        buf.put_slice(&self.reserved);
        buf.put_u16(self.data_reference_index);
        buf.put_u16(self.pre_defined);
        buf.put_u16(self.reserved2);
        for v in self.pre_defined2 {
            buf.put_u32(v);
        }
        buf.put_u16(self.width);
        buf.put_u16(self.height);
        buf.put_u32(self.horizresolution);
        buf.put_u32(self.vertresolution);
        buf.put_u32(self.reserved3);
        buf.put_u16(self.frame_count);
        buf.put_slice(&self.compressorname);
        buf.put_u16(self.depth);
        buf.put_i16(self.pre_defined3);
        for child in &self.children {
            match child {
                Avc1Child::AvcC(b) => b.write_to(buf),
                Avc1Child::Pasp(b) => b.write_to(buf),
                Avc1Child::Clap(b) => b.write_to(buf),
                Avc1Child::Other { fourcc, data } => {
                    let s = begin_box(buf, *fourcc);
                    buf.put_slice(&data.copy_to_vec());
                    end_box(buf, s);
                }
            }
        }
        end_box(buf, start);
    }

    /// The decoder configuration record, if present.
    pub fn avcc(&self) -> Option<&AvcC> {
        self.children.iter().find_map(|c| match c {
            Avc1Child::AvcC(b) => Some(b),
            _ => None,
        })
    }
}

/// `avcC` decoder configuration record.
///
/// The two bytes carrying reserved bits are kept raw; profile-extension
/// payloads after the PPS sets are preserved untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct AvcC {
    pub configuration_version: u8,
    pub profile_indication: u8,
    pub profile_compatibility: u8,
    pub level_indication: u8,
    /// 6 reserved bits plus `lengthSizeMinusOne`.
    pub length_size_raw: u8,
    /// 3 reserved bits plus the SPS count.
    pub sps_count_raw: u8,
    pub sps: Vec<ChunkedBytes>,
    pub pps: Vec<ChunkedBytes>,
    pub trailing: ChunkedBytes,
}

impl AvcC {
    fn parse(r: &mut ByteReader) -> Result<Self> {
        let configuration_version = r.read_u8()?;
        let profile_indication = r.read_u8()?;
        let profile_compatibility = r.read_u8()?;
        let level_indication = r.read_u8()?;
        let length_size_raw = r.read_u8()?;
        let sps_count_raw = r.read_u8()?;
        let mut sps = Vec::new();
        for _ in 0..(sps_count_raw & 0x1F) {
            let len = r.read_u16()? as usize;
            sps.push(r.read_bytes(len)?);
        }
        let pps_count = r.read_u8()?;
        let mut pps = Vec::new();
        for _ in 0..pps_count {
            let len = r.read_u16()? as usize;
            pps.push(r.read_bytes(len)?);
        }
        let trailing = r.take_remaining();
        Ok(Self {
            configuration_version,
            profile_indication,
            profile_compatibility,
            level_indication,
            length_size_raw,
            sps_count_raw,
            sps,
            pps,
            trailing,
        })
    }

    fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::AVCC);
        buf.put_u8(self.configuration_version);
        buf.put_u8(self.profile_indication);
        buf.put_u8(self.profile_compatibility);
        buf.put_u8(self.level_indication);
        buf.put_u8(self.length_size_raw);
        buf.put_u8(self.sps_count_raw);
        for s in &self.sps {
            buf.put_u16(s.len() as u16);
            buf.put_slice(&s.copy_to_vec());
        }
        buf.put_u8(self.pps.len() as u8);
        for p in &self.pps {
            buf.put_u16(p.len() as u16);
            buf.put_slice(&p.copy_to_vec());
        }
        buf.put_slice(&self.trailing.copy_to_vec());
        end_box(buf, start);
    }

    /// Construct a record from raw parameter sets, reserved bits all ones.
    pub fn from_parameter_sets(
        profile_indication: u8,
        profile_compatibility: u8,
        level_indication: u8,
        sps: Vec<ChunkedBytes>,
        pps: Vec<ChunkedBytes>,
    ) -> Self {
        Self {
            configuration_version: 1,
            profile_indication,
            profile_compatibility,
            level_indication,
            length_size_raw: 0xFC | 3,
            sps_count_raw: 0xE0 | sps.len() as u8,
            sps,
            pps,
            trailing: ChunkedBytes::new(),
        }
    }

    /// NAL length-prefix width in bytes.
    pub fn length_size(&self) -> usize {
        (self.length_size_raw & 0x03) as usize + 1
    }
}

/// `pasp` pixel aspect ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pasp {
    pub h_spacing: u32,
    pub v_spacing: u32,
}

impl Pasp {
    fn parse(r: &mut ByteReader) -> Result<Self> {
        Ok(Self {
            h_spacing: r.read_u32()?,
            v_spacing: r.read_u32()?,
        })
    }

    fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::PASP);
        buf.put_u32(self.h_spacing);
        buf.put_u32(self.v_spacing);
        end_box(buf, start);
    }
}

/// `clap` clean aperture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clap {
    pub clean_aperture_width_n: u32,
    pub clean_aperture_width_d: u32,
    pub clean_aperture_height_n: u32,
    pub clean_aperture_height_d: u32,
    pub horiz_off_n: i32,
    pub horiz_off_d: u32,
    pub vert_off_n: i32,
    pub vert_off_d: u32,
}

impl Clap {
    fn parse(r: &mut ByteReader) -> Result<Self> {
        Ok(Self {
            clean_aperture_width_n: r.read_u32()?,
            clean_aperture_width_d: r.read_u32()?,
            clean_aperture_height_n: r.read_u32()?,
            clean_aperture_height_d: r.read_u32()?,
            horiz_off_n: r.read_i32()?,
            horiz_off_d: r.read_u32()?,
            vert_off_n: r.read_i32()?,
            vert_off_d: r.read_u32()?,
        })
    }

    fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::CLAP);
        buf.put_u32(self.clean_aperture_width_n);
        buf.put_u32(self.clean_aperture_width_d);
        buf.put_u32(self.clean_aperture_height_n);
        buf.put_u32(self.clean_aperture_height_d);
        buf.put_i32(self.horiz_off_n);
        buf.put_u32(self.horiz_off_d);
        buf.put_i32(self.vert_off_n);
        buf.put_u32(self.vert_off_d);
        end_box(buf, start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mdhd_language_packing() {
        assert_eq!(Mdhd::pack_language(b"und"), 0x55C4);
        let mdhd = Mdhd {
            version: 0,
            flags: 0,
            creation_time: 0,
            modification_time: 0,
            timescale: 90000,
            duration: 0,
            language: Mdhd::pack_language(b"und"),
            pre_defined: 0,
        };
        assert_eq!(mdhd.language_str(), "und");
    }

    #[test]
    fn test_mvhd_round_trip() {
        let mvhd = Mvhd {
            timescale: 90000,
            duration: 123456,
            ..Mvhd::default()
        };
        let mut buf = BytesMut::new();
        mvhd.write_to(&mut buf);
        assert_eq!(buf.len(), 108);

        let mut r = ByteReader::new(ChunkedBytes::from_slice(&buf[8..]));
        let parsed = Mvhd::parse(&mut r).unwrap();
        assert_eq!(parsed, mvhd);
    }

    #[test]
    fn test_tkhd_v1_round_trip() {
        let tkhd = Tkhd {
            version: 1,
            flags: 3,
            creation_time: u64::from(u32::MAX) + 5,
            modification_time: 0,
            track_id: 1,
            reserved: 0,
            duration: u64::from(u32::MAX) * 2,
            reserved2: [0; 2],
            layer: 0,
            alternate_group: 0,
            volume: 0,
            reserved3: 0,
            matrix: IDENTITY_MATRIX,
            width: 640 << 16,
            height: 480 << 16,
        };
        let mut buf = BytesMut::new();
        tkhd.write_to(&mut buf);
        let mut r = ByteReader::new(ChunkedBytes::from_slice(&buf[8..]));
        assert_eq!(Tkhd::parse(&mut r).unwrap(), tkhd);
    }

    #[test]
    fn test_avcc_from_parameter_sets() {
        let sps = ChunkedBytes::from_slice(&[0x67, 0x42, 0x00, 0x1E]);
        let pps = ChunkedBytes::from_slice(&[0x68, 0xCE, 0x38, 0x80]);
        let avcc =
            AvcC::from_parameter_sets(0x42, 0x00, 0x1E, vec![sps.clone()], vec![pps.clone()]);
        assert_eq!(avcc.length_size(), 4);

        let mut buf = BytesMut::new();
        avcc.write_to(&mut buf);
        let mut r = ByteReader::new(ChunkedBytes::from_slice(&buf[8..]));
        let parsed = AvcC::parse(&mut r).unwrap();
        assert_eq!(parsed.sps, vec![sps]);
        assert_eq!(parsed.pps, vec![pps]);
        assert_eq!(parsed.length_size_raw, 0xFF);
        assert_eq!(parsed.sps_count_raw, 0xE1);
    }

    #[test]
    fn test_hdlr_name() {
        let hdlr = Hdlr {
            version: 0,
            flags: 0,
            pre_defined: 0,
            handler_type: *b"vide",
            reserved: [0; 3],
            name: ChunkedBytes::from_slice(b"VideoHandler\0"),
        };
        assert_eq!(hdlr.name_str(), "VideoHandler");
        let mut buf = BytesMut::new();
        hdlr.write_to(&mut buf);
        let mut r = ByteReader::new(ChunkedBytes::from_slice(&buf[8..]));
        assert_eq!(Hdlr::parse(&mut r).unwrap(), hdlr);
    }
}
