//! NAL unit header, extension headers and quick classification.

use std::fmt;

use fragmux_common::BitReader;

use crate::rbsp::unescape_rbsp;
use crate::slice::SliceType;
use crate::{Error, Result};

/// The 5-bit NAL unit type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalUnitType {
    /// Coded slice of a non-IDR picture (type 1).
    Slice,
    /// Coded slice of an IDR picture (type 5).
    IdrSlice,
    /// Supplemental enhancement information (type 6).
    Sei,
    /// Sequence parameter set (type 7).
    Sps,
    /// Picture parameter set (type 8).
    Pps,
    /// Prefix NAL unit (type 14, carries an extension header).
    PrefixNal,
    /// Coded slice extension (type 20, carries an extension header).
    SliceExtension,
    /// Coded slice extension for depth views (type 21).
    DepthSliceExtension,
    Other(u8),
}

impl NalUnitType {
    pub fn from_raw(raw: u8) -> Self {
        match raw {
            1 => Self::Slice,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            14 => Self::PrefixNal,
            20 => Self::SliceExtension,
            21 => Self::DepthSliceExtension,
            other => Self::Other(other),
        }
    }

    pub fn as_raw(self) -> u8 {
        match self {
            Self::Slice => 1,
            Self::IdrSlice => 5,
            Self::Sei => 6,
            Self::Sps => 7,
            Self::Pps => 8,
            Self::PrefixNal => 14,
            Self::SliceExtension => 20,
            Self::DepthSliceExtension => 21,
            Self::Other(other) => other,
        }
    }

    /// Types 14, 20 and 21 carry an extension header after the first byte.
    pub fn has_extension_header(self) -> bool {
        matches!(
            self,
            Self::PrefixNal | Self::SliceExtension | Self::DepthSliceExtension
        )
    }
}

/// Extension header following the first byte for types 14/20/21. The variant
/// is chosen by the top bit of the byte after the header: set means SVC
/// (or 3D-AVC for type 21), clear means MVC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalExtension {
    Svc {
        idr_flag: bool,
        priority_id: u8,
        no_inter_layer_pred: bool,
        dependency_id: u8,
        quality_id: u8,
        temporal_id: u8,
        use_ref_base_pic: bool,
        discardable: bool,
        output: bool,
    },
    Mvc {
        non_idr_flag: bool,
        priority_id: u8,
        view_id: u16,
        temporal_id: u8,
        anchor_pic: bool,
        inter_view: bool,
    },
    Avc3d {
        view_idx: u8,
        depth_flag: bool,
        non_idr_flag: bool,
        temporal_id: u8,
        anchor_pic: bool,
        inter_view: bool,
    },
}

/// Parsed NAL unit header: the first byte plus any extension header.
/// `header_len` is the total header size in bytes (1, 3 or 4); the payload
/// starts right after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalHeader {
    pub ref_idc: u8,
    pub unit_type: NalUnitType,
    pub extension: Option<NalExtension>,
    pub header_len: usize,
}

impl NalHeader {
    pub fn parse(nal: &[u8]) -> Result<NalHeader> {
        let first = *nal
            .first()
            .ok_or_else(|| Error::corrupt("empty NAL unit"))?;
        if first & 0x80 != 0 {
            return Err(Error::corrupt(format!(
                "forbidden bit set in NAL header byte {first:#04x}"
            )));
        }
        let ref_idc = (first >> 5) & 0b11;
        let unit_type = NalUnitType::from_raw(first & 0x1F);

        if !unit_type.has_extension_header() {
            return Ok(NalHeader {
                ref_idc,
                unit_type,
                extension: None,
                header_len: 1,
            });
        }

        let svc_flag = *nal.get(1).ok_or_else(|| {
            Error::corrupt("NAL extension header truncated after first byte")
        })? & 0x80
            != 0;
        let is_3d = svc_flag && unit_type == NalUnitType::DepthSliceExtension;
        let ext_len = if is_3d { 2 } else { 3 };
        if nal.len() < 1 + ext_len {
            return Err(Error::corrupt(format!(
                "NAL extension header needs {ext_len} bytes, have {}",
                nal.len() - 1
            )));
        }
        let mut r = BitReader::new(&nal[1..1 + ext_len]);
        r.read_bit()?; // the peeked discriminator bit
        let extension = if is_3d {
            NalExtension::Avc3d {
                view_idx: r.read_bits(8)? as u8,
                depth_flag: r.read_flag()?,
                non_idr_flag: r.read_flag()?,
                temporal_id: r.read_bits(3)? as u8,
                anchor_pic: r.read_flag()?,
                inter_view: r.read_flag()?,
            }
        } else if svc_flag {
            let ext = NalExtension::Svc {
                idr_flag: r.read_flag()?,
                priority_id: r.read_bits(6)? as u8,
                no_inter_layer_pred: r.read_flag()?,
                dependency_id: r.read_bits(3)? as u8,
                quality_id: r.read_bits(4)? as u8,
                temporal_id: r.read_bits(3)? as u8,
                use_ref_base_pic: r.read_flag()?,
                discardable: r.read_flag()?,
                output: r.read_flag()?,
            };
            r.read_bits(2)?; // reserved_three_2bits
            ext
        } else {
            let ext = NalExtension::Mvc {
                non_idr_flag: r.read_flag()?,
                priority_id: r.read_bits(6)? as u8,
                view_id: r.read_bits(10)? as u16,
                temporal_id: r.read_bits(3)? as u8,
                anchor_pic: r.read_flag()?,
                inter_view: r.read_flag()?,
            };
            r.read_bit()?; // reserved_one_bit
            ext
        };

        Ok(NalHeader {
            ref_idc,
            unit_type,
            extension: Some(extension),
            header_len: 1 + ext_len,
        })
    }
}

/// Coarse classification of a NAL unit for stream assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalKind {
    Sps,
    Pps,
    Sei,
    Frame,
    Keyframe,
    Unknown,
}

impl fmt::Display for NalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Sps => "sps",
            Self::Pps => "pps",
            Self::Sei => "sei",
            Self::Frame => "frame",
            Self::Keyframe => "keyframe",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Classify a raw NAL unit. IDR slices are keyframes outright; a non-IDR
/// slice is a keyframe when its header says it is an I (or SI) slice. A
/// slice whose header cannot be read still counts as a frame.
pub fn identify_nal(nal: &[u8]) -> Result<NalKind> {
    let header = NalHeader::parse(nal)?;
    Ok(match header.unit_type {
        NalUnitType::Sps => NalKind::Sps,
        NalUnitType::Pps => NalKind::Pps,
        NalUnitType::Sei => NalKind::Sei,
        NalUnitType::IdrSlice => NalKind::Keyframe,
        NalUnitType::Slice => match slice_type_of(nal, &header) {
            Ok(SliceType::I) | Ok(SliceType::Si) => NalKind::Keyframe,
            _ => NalKind::Frame,
        },
        _ => NalKind::Unknown,
    })
}

/// Slice type of a slice NAL, read from the first two Exp-Golomb fields of
/// the header. Needs no parameter sets.
pub fn nal_slice_type(nal: &[u8]) -> Result<SliceType> {
    let header = NalHeader::parse(nal)?;
    if !matches!(
        header.unit_type,
        NalUnitType::Slice | NalUnitType::IdrSlice
    ) {
        return Err(Error::corrupt(format!(
            "not a slice NAL: {:?}",
            header.unit_type
        )));
    }
    slice_type_of(nal, &header)
}

fn slice_type_of(nal: &[u8], header: &NalHeader) -> Result<SliceType> {
    // slice_type is the second field; the first handful of payload bytes is
    // plenty, so only that much gets unescaped
    let payload = &nal[header.header_len..nal.len().min(header.header_len + 16)];
    let rbsp = unescape_rbsp(payload)?;
    let mut r = BitReader::new(&rbsp);
    r.read_ue()?; // first_mb_in_slice
    SliceType::from_raw(r.read_ue()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_byte() {
        let h = NalHeader::parse(&[0x67, 0x42]).unwrap();
        assert_eq!(h.ref_idc, 3);
        assert_eq!(h.unit_type, NalUnitType::Sps);
        assert_eq!(h.header_len, 1);
        assert!(h.extension.is_none());
    }

    #[test]
    fn test_forbidden_bit_is_fatal() {
        let err = NalHeader::parse(&[0xE7]).unwrap_err();
        assert!(matches!(err, Error::Corrupt(_)));
    }

    #[test]
    fn test_mvc_extension() {
        // type 20, next byte top bit clear -> MVC, 4 header bytes total
        let h = NalHeader::parse(&[0x54, 0b0_1_000001, 0b01_000000, 0b01_001_1_0_1, 0xAA])
            .unwrap();
        assert_eq!(h.unit_type, NalUnitType::SliceExtension);
        assert_eq!(h.header_len, 4);
        match h.extension.unwrap() {
            NalExtension::Mvc {
                non_idr_flag,
                priority_id,
                view_id,
                temporal_id,
                anchor_pic,
                inter_view,
            } => {
                assert!(non_idr_flag);
                assert_eq!(priority_id, 1);
                assert_eq!(view_id, 0b01_000000_01);
                assert_eq!(temporal_id, 1);
                assert!(anchor_pic);
                assert!(!inter_view);
            }
            other => panic!("wrong extension: {other:?}"),
        }
    }

    #[test]
    fn test_svc_extension() {
        // type 14, next byte top bit set -> SVC, 4 header bytes total
        let h = NalHeader::parse(&[0x4E, 0x80, 0x00, 0x00]).unwrap();
        assert_eq!(h.unit_type, NalUnitType::PrefixNal);
        assert_eq!(h.header_len, 4);
        assert!(matches!(h.extension, Some(NalExtension::Svc { .. })));
    }

    #[test]
    fn test_3davc_extension() {
        // type 21, next byte top bit set -> 3D-AVC, 3 header bytes total
        let h = NalHeader::parse(&[0x55, 0x80, 0x00]).unwrap();
        assert_eq!(h.unit_type, NalUnitType::DepthSliceExtension);
        assert_eq!(h.header_len, 3);
        assert!(matches!(h.extension, Some(NalExtension::Avc3d { .. })));
    }

    #[test]
    fn test_identify_by_type() {
        assert_eq!(identify_nal(&[0x67, 0x42]).unwrap(), NalKind::Sps);
        assert_eq!(identify_nal(&[0x68, 0xCE]).unwrap(), NalKind::Pps);
        assert_eq!(identify_nal(&[0x06, 0x05]).unwrap(), NalKind::Sei);
        assert_eq!(identify_nal(&[0x65, 0x88, 0x80]).unwrap(), NalKind::Keyframe);
        assert_eq!(identify_nal(&[0x0C]).unwrap(), NalKind::Unknown);
    }

    #[test]
    fn test_identify_slice_by_slice_type() {
        // non-IDR slice, first_mb=0 (1), slice_type=7 I (0001000) -> keyframe
        let mut w = fragmux_common::BitWriter::new();
        w.write_ue(0);
        w.write_ue(7);
        w.rbsp_trailing();
        let mut nal = vec![0x41];
        nal.extend(w.into_vec());
        assert_eq!(identify_nal(&nal).unwrap(), NalKind::Keyframe);

        // slice_type=0 P -> frame
        let mut w = fragmux_common::BitWriter::new();
        w.write_ue(0);
        w.write_ue(0);
        w.rbsp_trailing();
        let mut nal = vec![0x41];
        nal.extend(w.into_vec());
        assert_eq!(identify_nal(&nal).unwrap(), NalKind::Frame);
    }
}
