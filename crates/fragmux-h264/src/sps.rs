//! Sequence parameter set.

use fragmux_common::{BitReader, BitWriter};

use crate::nal::{NalHeader, NalUnitType};
use crate::rbsp::unescape_rbsp;
use crate::{Error, Result};

/// Profiles that carry the chroma-format block after the parameter set id.
const HIGH_PROFILES: [u8; 13] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134, 135];

/// Chroma-format fields present for high profiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileExtension {
    pub chroma_format_idc: u32,
    /// Only meaningful for 4:4:4 (`chroma_format_idc == 3`).
    pub separate_colour_plane: bool,
    pub bit_depth_luma_minus8: u32,
    pub bit_depth_chroma_minus8: u32,
    pub qpprime_y_zero_transform_bypass: bool,
}

/// Picture order count scheme. Type 1 (frame-number offsets) is rejected at
/// parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PicOrderCnt {
    Type0 { log2_max_pic_order_cnt_lsb_minus4: u32 },
    Type2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCropping {
    pub left: u32,
    pub right: u32,
    pub top: u32,
    pub bottom: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColourDescription {
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSignal {
    pub video_format: u8,
    pub full_range: bool,
    pub colour: Option<ColourDescription>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingInfo {
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub fixed_frame_rate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpbEntry {
    pub bit_rate_value_minus1: u32,
    pub cpb_size_value_minus1: u32,
    pub cbr: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HrdParameters {
    pub bit_rate_scale: u8,
    pub cpb_size_scale: u8,
    pub cpbs: Vec<CpbEntry>,
    pub initial_cpb_removal_delay_length_minus1: u8,
    pub cpb_removal_delay_length_minus1: u8,
    pub dpb_output_delay_length_minus1: u8,
    pub time_offset_length: u8,
    /// Read after the VCL HRD flag; present whenever HRD parameters are.
    pub low_delay: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitstreamRestriction {
    pub motion_vectors_over_pic_boundaries: bool,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_mb_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
    pub max_num_reorder_frames: u32,
    pub max_dec_frame_buffering: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Vui {
    pub aspect_ratio_idc: Option<u8>,
    pub video_signal: Option<VideoSignal>,
    pub timing: Option<TimingInfo>,
    pub nal_hrd: Option<HrdParameters>,
    pub pic_struct_present: bool,
    pub bitstream_restriction: Option<BitstreamRestriction>,
}

/// A parsed sequence parameter set.
///
/// Fields whose grammar branch is rejected at parse time (interlaced coding,
/// scaling matrices, POC type 1, slice groups) are not represented; [`Sps::write`]
/// emits the accepted branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sps {
    pub profile_idc: u8,
    /// Raw second byte: six constraint flags, low two bits reserved zero.
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u32,
    pub profile_ext: Option<ProfileExtension>,
    pub log2_max_frame_num_minus4: u32,
    pub pic_order_cnt: PicOrderCnt,
    pub max_num_ref_frames: u32,
    pub gaps_in_frame_num_value_allowed: bool,
    pub pic_width_in_mbs_minus1: u32,
    pub pic_height_in_map_units_minus1: u32,
    pub direct_8x8_inference: bool,
    pub frame_cropping: Option<FrameCropping>,
    pub vui: Option<Vui>,
}

impl Sps {
    /// Parse from a whole NAL unit (header byte included, emulation
    /// prevention still applied).
    pub fn parse_nal(nal: &[u8]) -> Result<Sps> {
        let header = NalHeader::parse(nal)?;
        if header.unit_type != NalUnitType::Sps {
            return Err(Error::corrupt(format!(
                "expected an SPS NAL, got {:?}",
                header.unit_type
            )));
        }
        let rbsp = unescape_rbsp(&nal[header.header_len..])?;
        Self::parse(&rbsp)
    }

    /// Parse from the unescaped RBSP payload (NAL header stripped).
    pub fn parse(rbsp: &[u8]) -> Result<Sps> {
        let mut r = BitReader::new(rbsp);
        let profile_idc = r.read_bits(8)? as u8;
        let constraint_flags = r.read_bits(8)? as u8;
        if constraint_flags & 0b11 != 0 {
            return Err(Error::corrupt("SPS reserved_zero_2bits are not zero"));
        }
        let level_idc = r.read_bits(8)? as u8;
        let seq_parameter_set_id = r.read_ue()?;

        let profile_ext = if HIGH_PROFILES.contains(&profile_idc) {
            let chroma_format_idc = r.read_ue()?;
            let separate_colour_plane = if chroma_format_idc == 3 {
                r.read_flag()?
            } else {
                false
            };
            let bit_depth_luma_minus8 = r.read_ue()?;
            let bit_depth_chroma_minus8 = r.read_ue()?;
            let qpprime_y_zero_transform_bypass = r.read_flag()?;
            if r.read_flag()? {
                return Err(Error::unsupported("SPS seq_scaling_matrix_present_flag"));
            }
            Some(ProfileExtension {
                chroma_format_idc,
                separate_colour_plane,
                bit_depth_luma_minus8,
                bit_depth_chroma_minus8,
                qpprime_y_zero_transform_bypass,
            })
        } else {
            None
        };

        let log2_max_frame_num_minus4 = r.read_ue()?;
        let pic_order_cnt = match r.read_ue()? {
            0 => PicOrderCnt::Type0 {
                log2_max_pic_order_cnt_lsb_minus4: r.read_ue()?,
            },
            2 => PicOrderCnt::Type2,
            1 => return Err(Error::unsupported("SPS pic_order_cnt_type 1")),
            other => {
                return Err(Error::corrupt(format!(
                    "SPS pic_order_cnt_type {other} out of range"
                )))
            }
        };
        let max_num_ref_frames = r.read_ue()?;
        let gaps_in_frame_num_value_allowed = r.read_flag()?;
        let pic_width_in_mbs_minus1 = r.read_ue()?;
        let pic_height_in_map_units_minus1 = r.read_ue()?;
        if !r.read_flag()? {
            return Err(Error::unsupported(
                "SPS frame_mbs_only_flag 0 (interlaced coding)",
            ));
        }
        let direct_8x8_inference = r.read_flag()?;
        let frame_cropping = if r.read_flag()? {
            Some(FrameCropping {
                left: r.read_ue()?,
                right: r.read_ue()?,
                top: r.read_ue()?,
                bottom: r.read_ue()?,
            })
        } else {
            None
        };
        let vui = if r.read_flag()? {
            Some(Self::parse_vui(&mut r)?)
        } else {
            None
        };

        Ok(Sps {
            profile_idc,
            constraint_flags,
            level_idc,
            seq_parameter_set_id,
            profile_ext,
            log2_max_frame_num_minus4,
            pic_order_cnt,
            max_num_ref_frames,
            gaps_in_frame_num_value_allowed,
            pic_width_in_mbs_minus1,
            pic_height_in_map_units_minus1,
            direct_8x8_inference,
            frame_cropping,
            vui,
        })
    }

    fn parse_vui(r: &mut BitReader) -> Result<Vui> {
        let aspect_ratio_idc = if r.read_flag()? {
            let idc = r.read_bits(8)? as u8;
            if idc == 255 {
                return Err(Error::unsupported("VUI extended aspect ratio (idc 255)"));
            }
            Some(idc)
        } else {
            None
        };
        if r.read_flag()? {
            return Err(Error::unsupported("VUI overscan_info_present_flag"));
        }
        let video_signal = if r.read_flag()? {
            let video_format = r.read_bits(3)? as u8;
            let full_range = r.read_flag()?;
            let colour = if r.read_flag()? {
                Some(ColourDescription {
                    colour_primaries: r.read_bits(8)? as u8,
                    transfer_characteristics: r.read_bits(8)? as u8,
                    matrix_coefficients: r.read_bits(8)? as u8,
                })
            } else {
                None
            };
            Some(VideoSignal {
                video_format,
                full_range,
                colour,
            })
        } else {
            None
        };
        if r.read_flag()? {
            return Err(Error::unsupported("VUI chroma_loc_info_present_flag"));
        }
        let timing = if r.read_flag()? {
            Some(TimingInfo {
                num_units_in_tick: r.read_bits(32)?,
                time_scale: r.read_bits(32)?,
                fixed_frame_rate: r.read_flag()?,
            })
        } else {
            None
        };
        let mut nal_hrd = if r.read_flag()? {
            Some(Self::parse_hrd(r)?)
        } else {
            None
        };
        if r.read_flag()? {
            return Err(Error::unsupported("VUI vcl_hrd_parameters_present_flag"));
        }
        if let Some(hrd) = nal_hrd.as_mut() {
            hrd.low_delay = r.read_flag()?;
        }
        let pic_struct_present = r.read_flag()?;
        let bitstream_restriction = if r.read_flag()? {
            Some(BitstreamRestriction {
                motion_vectors_over_pic_boundaries: r.read_flag()?,
                max_bytes_per_pic_denom: r.read_ue()?,
                max_bits_per_mb_denom: r.read_ue()?,
                log2_max_mv_length_horizontal: r.read_ue()?,
                log2_max_mv_length_vertical: r.read_ue()?,
                max_num_reorder_frames: r.read_ue()?,
                max_dec_frame_buffering: r.read_ue()?,
            })
        } else {
            None
        };
        Ok(Vui {
            aspect_ratio_idc,
            video_signal,
            timing,
            nal_hrd,
            pic_struct_present,
            bitstream_restriction,
        })
    }

    fn parse_hrd(r: &mut BitReader) -> Result<HrdParameters> {
        let cpb_cnt_minus1 = r.read_ue()?;
        let bit_rate_scale = r.read_bits(4)? as u8;
        let cpb_size_scale = r.read_bits(4)? as u8;
        let mut cpbs = Vec::with_capacity(cpb_cnt_minus1 as usize + 1);
        for _ in 0..=cpb_cnt_minus1 {
            cpbs.push(CpbEntry {
                bit_rate_value_minus1: r.read_ue()?,
                cpb_size_value_minus1: r.read_ue()?,
                cbr: r.read_flag()?,
            });
        }
        Ok(HrdParameters {
            bit_rate_scale,
            cpb_size_scale,
            cpbs,
            initial_cpb_removal_delay_length_minus1: r.read_bits(5)? as u8,
            cpb_removal_delay_length_minus1: r.read_bits(5)? as u8,
            dpb_output_delay_length_minus1: r.read_bits(5)? as u8,
            time_offset_length: r.read_bits(5)? as u8,
            low_delay: false,
        })
    }

    /// Serialize to an unescaped RBSP (trailing bits included, NAL header
    /// byte excluded).
    pub fn write(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_bits(self.profile_idc as u32, 8);
        w.write_bits(self.constraint_flags as u32, 8);
        w.write_bits(self.level_idc as u32, 8);
        w.write_ue(self.seq_parameter_set_id);
        if let Some(ext) = &self.profile_ext {
            w.write_ue(ext.chroma_format_idc);
            if ext.chroma_format_idc == 3 {
                w.write_flag(ext.separate_colour_plane);
            }
            w.write_ue(ext.bit_depth_luma_minus8);
            w.write_ue(ext.bit_depth_chroma_minus8);
            w.write_flag(ext.qpprime_y_zero_transform_bypass);
            w.write_flag(false); // seq_scaling_matrix_present_flag
        }
        w.write_ue(self.log2_max_frame_num_minus4);
        match &self.pic_order_cnt {
            PicOrderCnt::Type0 {
                log2_max_pic_order_cnt_lsb_minus4,
            } => {
                w.write_ue(0);
                w.write_ue(*log2_max_pic_order_cnt_lsb_minus4);
            }
            PicOrderCnt::Type2 => w.write_ue(2),
        }
        w.write_ue(self.max_num_ref_frames);
        w.write_flag(self.gaps_in_frame_num_value_allowed);
        w.write_ue(self.pic_width_in_mbs_minus1);
        w.write_ue(self.pic_height_in_map_units_minus1);
        w.write_flag(true); // frame_mbs_only_flag
        w.write_flag(self.direct_8x8_inference);
        w.write_flag(self.frame_cropping.is_some());
        if let Some(crop) = &self.frame_cropping {
            w.write_ue(crop.left);
            w.write_ue(crop.right);
            w.write_ue(crop.top);
            w.write_ue(crop.bottom);
        }
        w.write_flag(self.vui.is_some());
        if let Some(vui) = &self.vui {
            Self::write_vui(&mut w, vui);
        }
        w.rbsp_trailing();
        w.into_vec()
    }

    fn write_vui(w: &mut BitWriter, vui: &Vui) {
        w.write_flag(vui.aspect_ratio_idc.is_some());
        if let Some(idc) = vui.aspect_ratio_idc {
            w.write_bits(idc as u32, 8);
        }
        w.write_flag(false); // overscan_info_present_flag
        w.write_flag(vui.video_signal.is_some());
        if let Some(vs) = &vui.video_signal {
            w.write_bits(vs.video_format as u32, 3);
            w.write_flag(vs.full_range);
            w.write_flag(vs.colour.is_some());
            if let Some(c) = &vs.colour {
                w.write_bits(c.colour_primaries as u32, 8);
                w.write_bits(c.transfer_characteristics as u32, 8);
                w.write_bits(c.matrix_coefficients as u32, 8);
            }
        }
        w.write_flag(false); // chroma_loc_info_present_flag
        w.write_flag(vui.timing.is_some());
        if let Some(t) = &vui.timing {
            w.write_bits(t.num_units_in_tick, 32);
            w.write_bits(t.time_scale, 32);
            w.write_flag(t.fixed_frame_rate);
        }
        w.write_flag(vui.nal_hrd.is_some());
        if let Some(hrd) = &vui.nal_hrd {
            w.write_ue(hrd.cpbs.len() as u32 - 1);
            w.write_bits(hrd.bit_rate_scale as u32, 4);
            w.write_bits(hrd.cpb_size_scale as u32, 4);
            for cpb in &hrd.cpbs {
                w.write_ue(cpb.bit_rate_value_minus1);
                w.write_ue(cpb.cpb_size_value_minus1);
                w.write_flag(cpb.cbr);
            }
            w.write_bits(hrd.initial_cpb_removal_delay_length_minus1 as u32, 5);
            w.write_bits(hrd.cpb_removal_delay_length_minus1 as u32, 5);
            w.write_bits(hrd.dpb_output_delay_length_minus1 as u32, 5);
            w.write_bits(hrd.time_offset_length as u32, 5);
        }
        w.write_flag(false); // vcl_hrd_parameters_present_flag
        if let Some(hrd) = &vui.nal_hrd {
            w.write_flag(hrd.low_delay);
        }
        w.write_flag(vui.pic_struct_present);
        w.write_flag(vui.bitstream_restriction.is_some());
        if let Some(b) = &vui.bitstream_restriction {
            w.write_flag(b.motion_vectors_over_pic_boundaries);
            w.write_ue(b.max_bytes_per_pic_denom);
            w.write_ue(b.max_bits_per_mb_denom);
            w.write_ue(b.log2_max_mv_length_horizontal);
            w.write_ue(b.log2_max_mv_length_vertical);
            w.write_ue(b.max_num_reorder_frames);
            w.write_ue(b.max_dec_frame_buffering);
        }
    }

    /// 0 for separate colour planes, otherwise the chroma format idc
    /// (implied 4:2:0 for profiles without the chroma block).
    pub fn chroma_array_type(&self) -> u32 {
        match &self.profile_ext {
            Some(ext) if ext.chroma_format_idc == 3 && ext.separate_colour_plane => 0,
            Some(ext) => ext.chroma_format_idc,
            None => 1,
        }
    }

    fn crop_units(&self) -> (u32, u32) {
        match self.chroma_array_type() {
            1 => (2, 2),
            2 => (2, 1),
            _ => (1, 1),
        }
    }

    /// Display width in pixels.
    pub fn width(&self) -> u32 {
        let raw = (self.pic_width_in_mbs_minus1 + 1) * 16;
        let crop = self
            .frame_cropping
            .map_or(0, |c| (c.left + c.right) * self.crop_units().0);
        raw - crop
    }

    /// Display height in pixels.
    pub fn height(&self) -> u32 {
        let raw = (self.pic_height_in_map_units_minus1 + 1) * 16;
        let crop = self
            .frame_cropping
            .map_or(0, |c| (c.top + c.bottom) * self.crop_units().1);
        raw - crop
    }
}
