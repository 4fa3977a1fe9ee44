//! Movie fragment boxes and the packed sample-flags record.

use bytes::{BufMut, BytesMut};
use fragmux_common::ByteReader;

use super::{begin_box, end_box, put_version_flags, read_version_flags, FourCc};
use crate::Result;

/// Packed per-sample flag word shared by `trex`, `tfhd` and `trun`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serialize", derive(serde::Serialize))]
pub struct SampleFlags {
    pub is_leading: u8,
    pub sample_depends_on: u8,
    pub sample_is_depended_on: u8,
    pub sample_has_redundancy: u8,
    pub sample_padding_value: u8,
    pub sample_is_non_sync: bool,
    pub sample_degradation_priority: u16,
}

impl SampleFlags {
    /// Flags marking a plain non-sync sample.
    pub const NON_SYNC: Self = Self {
        is_leading: 0,
        sample_depends_on: 0,
        sample_is_depended_on: 0,
        sample_has_redundancy: 0,
        sample_padding_value: 0,
        sample_is_non_sync: true,
        sample_degradation_priority: 0,
    };

    /// Flags marking a sync sample, all other fields zero.
    pub const SYNC: Self = Self {
        is_leading: 0,
        sample_depends_on: 0,
        sample_is_depended_on: 0,
        sample_has_redundancy: 0,
        sample_padding_value: 0,
        sample_is_non_sync: false,
        sample_degradation_priority: 0,
    };

    pub fn from_raw(raw: u32) -> Self {
        Self {
            is_leading: ((raw >> 26) & 0x3) as u8,
            sample_depends_on: ((raw >> 24) & 0x3) as u8,
            sample_is_depended_on: ((raw >> 22) & 0x3) as u8,
            sample_has_redundancy: ((raw >> 20) & 0x3) as u8,
            sample_padding_value: ((raw >> 17) & 0x7) as u8,
            sample_is_non_sync: raw & 0x0001_0000 != 0,
            sample_degradation_priority: (raw & 0xFFFF) as u16,
        }
    }

    pub fn to_raw(self) -> u32 {
        (u32::from(self.is_leading & 0x3) << 26)
            | (u32::from(self.sample_depends_on & 0x3) << 24)
            | (u32::from(self.sample_is_depended_on & 0x3) << 22)
            | (u32::from(self.sample_has_redundancy & 0x3) << 20)
            | (u32::from(self.sample_padding_value & 0x7) << 17)
            | (u32::from(self.sample_is_non_sync) << 16)
            | u32::from(self.sample_degradation_priority)
    }
}

/// `trex` track extends defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trex {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: SampleFlags,
}

impl Trex {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        Ok(Self {
            version,
            flags,
            track_id: r.read_u32()?,
            default_sample_description_index: r.read_u32()?,
            default_sample_duration: r.read_u32()?,
            default_sample_size: r.read_u32()?,
            default_sample_flags: SampleFlags::from_raw(r.read_u32()?),
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::TREX);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.track_id);
        buf.put_u32(self.default_sample_description_index);
        buf.put_u32(self.default_sample_duration);
        buf.put_u32(self.default_sample_size);
        buf.put_u32(self.default_sample_flags.to_raw());
        end_box(buf, start);
    }
}

/// `mehd` movie extends header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mehd {
    pub version: u8,
    pub flags: u32,
    pub fragment_duration: u64,
}

impl Mehd {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let fragment_duration = if version == 1 {
            r.read_u64()?
        } else {
            r.read_u32()? as u64
        };
        Ok(Self {
            version,
            flags,
            fragment_duration,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::MEHD);
        put_version_flags(buf, self.version, self.flags);
        if self.version == 1 {
            buf.put_u64(self.fragment_duration);
        } else {
            buf.put_u32(self.fragment_duration as u32);
        }
        end_box(buf, start);
    }
}

/// `mfhd` movie fragment header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mfhd {
    pub version: u8,
    pub flags: u32,
    pub sequence_number: u32,
}

impl Mfhd {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        Ok(Self {
            version,
            flags,
            sequence_number: r.read_u32()?,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::MFHD);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.sequence_number);
        end_box(buf, start);
    }
}

/// `tfhd` flag bits.
pub mod tfhd_flags {
    pub const BASE_DATA_OFFSET: u32 = 0x0000_0001;
    pub const SAMPLE_DESCRIPTION_INDEX: u32 = 0x0000_0002;
    pub const DEFAULT_SAMPLE_DURATION: u32 = 0x0000_0008;
    pub const DEFAULT_SAMPLE_SIZE: u32 = 0x0000_0010;
    pub const DEFAULT_SAMPLE_FLAGS: u32 = 0x0000_0020;
    pub const DURATION_IS_EMPTY: u32 = 0x0001_0000;
    pub const DEFAULT_BASE_IS_MOOF: u32 = 0x0002_0000;
}

/// `tfhd` track fragment header. Optional fields follow the flag word;
/// presence must stay consistent with `flags` when constructing by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tfhd {
    pub version: u8,
    pub flags: u32,
    pub track_id: u32,
    pub base_data_offset: Option<u64>,
    pub sample_description_index: Option<u32>,
    pub default_sample_duration: Option<u32>,
    pub default_sample_size: Option<u32>,
    pub default_sample_flags: Option<SampleFlags>,
}

impl Tfhd {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let track_id = r.read_u32()?;
        let base_data_offset = if flags & tfhd_flags::BASE_DATA_OFFSET != 0 {
            Some(r.read_u64()?)
        } else {
            None
        };
        let sample_description_index = if flags & tfhd_flags::SAMPLE_DESCRIPTION_INDEX != 0 {
            Some(r.read_u32()?)
        } else {
            None
        };
        let default_sample_duration = if flags & tfhd_flags::DEFAULT_SAMPLE_DURATION != 0 {
            Some(r.read_u32()?)
        } else {
            None
        };
        let default_sample_size = if flags & tfhd_flags::DEFAULT_SAMPLE_SIZE != 0 {
            Some(r.read_u32()?)
        } else {
            None
        };
        let default_sample_flags = if flags & tfhd_flags::DEFAULT_SAMPLE_FLAGS != 0 {
            Some(SampleFlags::from_raw(r.read_u32()?))
        } else {
            None
        };
        Ok(Self {
            version,
            flags,
            track_id,
            base_data_offset,
            sample_description_index,
            default_sample_duration,
            default_sample_size,
            default_sample_flags,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::TFHD);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.track_id);
        if let Some(v) = self.base_data_offset {
            buf.put_u64(v);
        }
        if let Some(v) = self.sample_description_index {
            buf.put_u32(v);
        }
        if let Some(v) = self.default_sample_duration {
            buf.put_u32(v);
        }
        if let Some(v) = self.default_sample_size {
            buf.put_u32(v);
        }
        if let Some(v) = self.default_sample_flags {
            buf.put_u32(v.to_raw());
        }
        end_box(buf, start);
    }
}

/// `tfdt` track fragment decode time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tfdt {
    pub version: u8,
    pub flags: u32,
    pub base_media_decode_time: u64,
}

impl Tfdt {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let base_media_decode_time = if version == 1 {
            r.read_u64()?
        } else {
            r.read_u32()? as u64
        };
        Ok(Self {
            version,
            flags,
            base_media_decode_time,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::TFDT);
        put_version_flags(buf, self.version, self.flags);
        if self.version == 1 {
            buf.put_u64(self.base_media_decode_time);
        } else {
            buf.put_u32(self.base_media_decode_time as u32);
        }
        end_box(buf, start);
    }
}

/// `trun` flag bits.
pub mod trun_flags {
    pub const DATA_OFFSET: u32 = 0x0000_0001;
    pub const FIRST_SAMPLE_FLAGS: u32 = 0x0000_0004;
    pub const SAMPLE_DURATION: u32 = 0x0000_0100;
    pub const SAMPLE_SIZE: u32 = 0x0000_0200;
    pub const SAMPLE_FLAGS: u32 = 0x0000_0400;
    pub const SAMPLE_CTS: u32 = 0x0000_0800;
}

/// One `trun` row. Column presence is uniform across a run, driven by the
/// run's flag word, except that a first-sample-flags override suppresses
/// row 0's flags column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrunSample {
    pub duration: Option<u32>,
    pub size: Option<u32>,
    pub flags: Option<SampleFlags>,
    pub cts_offset: Option<i64>,
}

/// `trun` track fragment run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trun {
    pub version: u8,
    pub flags: u32,
    pub data_offset: Option<i32>,
    pub first_sample_flags: Option<SampleFlags>,
    pub samples: Vec<TrunSample>,
}

impl Trun {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let sample_count = r.read_u32()?;
        let data_offset = if flags & trun_flags::DATA_OFFSET != 0 {
            Some(r.read_i32()?)
        } else {
            None
        };
        let first_sample_flags = if flags & trun_flags::FIRST_SAMPLE_FLAGS != 0 {
            Some(SampleFlags::from_raw(r.read_u32()?))
        } else {
            None
        };
        let mut samples = Vec::with_capacity(sample_count.min(4096) as usize);
        for i in 0..sample_count {
            let duration = if flags & trun_flags::SAMPLE_DURATION != 0 {
                Some(r.read_u32()?)
            } else {
                None
            };
            let size = if flags & trun_flags::SAMPLE_SIZE != 0 {
                Some(r.read_u32()?)
            } else {
                None
            };
            let sample_flags = if flags & trun_flags::SAMPLE_FLAGS != 0
                && !(i == 0 && first_sample_flags.is_some())
            {
                Some(SampleFlags::from_raw(r.read_u32()?))
            } else {
                None
            };
            let cts_offset = if flags & trun_flags::SAMPLE_CTS != 0 {
                Some(if version == 0 {
                    r.read_u32()? as i64
                } else {
                    r.read_i32()? as i64
                })
            } else {
                None
            };
            samples.push(TrunSample {
                duration,
                size,
                flags: sample_flags,
                cts_offset,
            });
        }
        Ok(Self {
            version,
            flags,
            data_offset,
            first_sample_flags,
            samples,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::TRUN);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.samples.len() as u32);
        if let Some(v) = self.data_offset {
            buf.put_i32(v);
        }
        if let Some(v) = self.first_sample_flags {
            buf.put_u32(v.to_raw());
        }
        for sample in &self.samples {
            if let Some(v) = sample.duration {
                buf.put_u32(v);
            }
            if let Some(v) = sample.size {
                buf.put_u32(v);
            }
            if let Some(v) = sample.flags {
                buf.put_u32(v.to_raw());
            }
            if let Some(v) = sample.cts_offset {
                if self.version == 0 {
                    buf.put_u32(v as u32);
                } else {
                    buf.put_i32(v as i32);
                }
            }
        }
        end_box(buf, start);
    }
}

/// One `sidx` reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidxReference {
    /// True references another `sidx`, false references media.
    pub reference_type: bool,
    /// 31-bit byte distance to the next referenced unit.
    pub referenced_size: u32,
    pub subsegment_duration: u32,
    pub starts_with_sap: bool,
    pub sap_type: u8,
    pub sap_delta_time: u32,
}

/// `sidx` segment index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sidx {
    pub version: u8,
    pub flags: u32,
    pub reference_id: u32,
    pub timescale: u32,
    pub earliest_presentation_time: u64,
    pub first_offset: u64,
    pub reserved: u16,
    pub references: Vec<SidxReference>,
}

impl Sidx {
    pub(crate) fn parse(r: &mut ByteReader) -> Result<Self> {
        let (version, flags) = read_version_flags(r)?;
        let reference_id = r.read_u32()?;
        let timescale = r.read_u32()?;
        let (earliest_presentation_time, first_offset) = if version == 1 {
            (r.read_u64()?, r.read_u64()?)
        } else {
            (r.read_u32()? as u64, r.read_u32()? as u64)
        };
        let reserved = r.read_u16()?;
        let reference_count = r.read_u16()?;
        let mut references = Vec::with_capacity(reference_count as usize);
        for _ in 0..reference_count {
            let word = r.read_u32()?;
            let subsegment_duration = r.read_u32()?;
            let sap = r.read_u32()?;
            references.push(SidxReference {
                reference_type: word & 0x8000_0000 != 0,
                referenced_size: word & 0x7FFF_FFFF,
                subsegment_duration,
                starts_with_sap: sap & 0x8000_0000 != 0,
                sap_type: ((sap >> 28) & 0x7) as u8,
                sap_delta_time: sap & 0x0FFF_FFFF,
            });
        }
        Ok(Self {
            version,
            flags,
            reference_id,
            timescale,
            earliest_presentation_time,
            first_offset,
            reserved,
            references,
        })
    }

    pub(crate) fn write_to(&self, buf: &mut BytesMut) {
        let start = begin_box(buf, FourCc::SIDX);
        put_version_flags(buf, self.version, self.flags);
        buf.put_u32(self.reference_id);
        buf.put_u32(self.timescale);
        if self.version == 1 {
            buf.put_u64(self.earliest_presentation_time);
            buf.put_u64(self.first_offset);
        } else {
            buf.put_u32(self.earliest_presentation_time as u32);
            buf.put_u32(self.first_offset as u32);
        }
        buf.put_u16(self.reserved);
        buf.put_u16(self.references.len() as u16);
        for reference in &self.references {
            buf.put_u32((u32::from(reference.reference_type) << 31) | reference.referenced_size);
            buf.put_u32(reference.subsegment_duration);
            buf.put_u32(
                (u32::from(reference.starts_with_sap) << 31)
                    | (u32::from(reference.sap_type & 0x7) << 28)
                    | reference.sap_delta_time,
            );
        }
        end_box(buf, start);
    }
}
