//! Slice types and slice header.

use std::fmt;

use fragmux_common::BitReader;

use crate::nal::{NalHeader, NalUnitType};
use crate::pps::Pps;
use crate::rbsp::unescape_rbsp;
use crate::sps::{PicOrderCnt, Sps};
use crate::{Error, Result};

/// Slice coding type. Raw values 5..=9 mean the same types with the extra
/// promise that every slice of the picture shares it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceType {
    P,
    B,
    I,
    Sp,
    Si,
}

impl SliceType {
    pub fn from_raw(raw: u32) -> Result<SliceType> {
        if raw > 9 {
            return Err(Error::corrupt(format!("slice_type {raw} out of range")));
        }
        Ok(match raw % 5 {
            0 => Self::P,
            1 => Self::B,
            2 => Self::I,
            3 => Self::Sp,
            _ => Self::Si,
        })
    }

    /// Intra-coded, decodable without reference frames.
    pub fn is_intra(self) -> bool {
        matches!(self, Self::I | Self::Si)
    }
}

impl fmt::Display for SliceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::P => "P",
            Self::B => "B",
            Self::I => "I",
            Self::Sp => "SP",
            Self::Si => "SI",
        };
        f.write_str(s)
    }
}

/// One reference picture list reordering instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefListMod {
    /// idc 0 (subtract) or 1 (add) applied to the predicted picture number.
    ShortTerm { subtract: bool, abs_diff_pic_num_minus1: u32 },
    /// idc 2.
    LongTerm { long_term_pic_num: u32 },
}

/// Explicit weighted-prediction factors for one reference picture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WeightEntry {
    pub luma: Option<(i32, i32)>,
    /// Cb and Cr `(weight, offset)` pairs.
    pub chroma: Option<[(i32, i32); 2]>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u32,
    pub chroma_log2_weight_denom: Option<u32>,
    pub l0: Vec<WeightEntry>,
    pub l1: Option<Vec<WeightEntry>>,
}

/// Memory management control operation (ops 1..=6; op 0 terminates the
/// list and is not represented).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmcoOp {
    UnmarkShortTerm { difference_of_pic_nums_minus1: u32 },
    UnmarkLongTerm { long_term_pic_num: u32 },
    ShortTermToLongTerm { difference_of_pic_nums_minus1: u32, long_term_frame_idx: u32 },
    SetMaxLongTermIdx { max_long_term_frame_idx_plus1: u32 },
    UnmarkAll,
    CurrentToLongTerm { long_term_frame_idx: u32 },
}

/// Reference picture marking, present when `nal_ref_idc != 0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecRefPicMarking {
    Idr {
        no_output_of_prior_pics: bool,
        long_term_reference: bool,
    },
    /// `mmco` is `None` when the adaptive marking flag is unset.
    NonIdr { mmco: Option<Vec<MmcoOp>> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deblocking {
    pub disable_idc: u32,
    /// Absent when `disable_idc == 1`.
    pub alpha_c0_offset_div2: Option<i32>,
    pub beta_offset_div2: Option<i32>,
}

/// A parsed slice header. Field presence mirrors the grammar, keyed off the
/// SPS/PPS the slice refers to; the macroblock data after the header is not
/// parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_mb_in_slice: u32,
    pub slice_type: SliceType,
    /// Raw values 5..=9 promise the whole picture shares the slice type.
    pub whole_picture: bool,
    pub pic_parameter_set_id: u32,
    pub frame_num: u32,
    pub idr_pic_id: Option<u32>,
    pub pic_order_cnt_lsb: Option<u32>,
    pub delta_pic_order_cnt_bottom: Option<i32>,
    pub redundant_pic_cnt: Option<u32>,
    pub direct_spatial_mv_pred: Option<bool>,
    /// `(l0, l1)` active counts when the override flag was set.
    pub num_ref_idx_override: Option<(u32, Option<u32>)>,
    pub ref_list_mods_l0: Option<Vec<RefListMod>>,
    pub ref_list_mods_l1: Option<Vec<RefListMod>>,
    pub pred_weight_table: Option<PredWeightTable>,
    pub dec_ref_pic_marking: Option<DecRefPicMarking>,
    pub cabac_init_idc: Option<u32>,
    pub slice_qp_delta: i32,
    pub sp_for_switch: Option<bool>,
    pub slice_qs_delta: Option<i32>,
    pub deblocking: Option<Deblocking>,
}

impl SliceHeader {
    /// Parse from a whole NAL unit (header byte included, emulation
    /// prevention still applied).
    pub fn parse_nal(nal: &[u8], sps: &Sps, pps: &Pps) -> Result<SliceHeader> {
        let header = NalHeader::parse(nal)?;
        if !matches!(header.unit_type, NalUnitType::Slice | NalUnitType::IdrSlice) {
            return Err(Error::corrupt(format!(
                "expected a slice NAL, got {:?}",
                header.unit_type
            )));
        }
        let rbsp = unescape_rbsp(&nal[header.header_len..])?;
        Self::parse(&rbsp, &header, sps, pps)
    }

    /// Parse from the unescaped RBSP payload. `header` supplies the IDR
    /// flag and `nal_ref_idc`.
    pub fn parse(rbsp: &[u8], header: &NalHeader, sps: &Sps, pps: &Pps) -> Result<SliceHeader> {
        let is_idr = header.unit_type == NalUnitType::IdrSlice;
        let mut r = BitReader::new(rbsp);

        let first_mb_in_slice = r.read_ue()?;
        let slice_type_raw = r.read_ue()?;
        let slice_type = SliceType::from_raw(slice_type_raw)?;
        let pic_parameter_set_id = r.read_ue()?;
        let frame_num = r.read_bits(sps.log2_max_frame_num_minus4 + 4)?;
        // frame_mbs_only is guaranteed by SPS parsing, so no field_pic_flag
        let idr_pic_id = if is_idr { Some(r.read_ue()?) } else { None };

        let mut pic_order_cnt_lsb = None;
        let mut delta_pic_order_cnt_bottom = None;
        if let PicOrderCnt::Type0 {
            log2_max_pic_order_cnt_lsb_minus4,
        } = sps.pic_order_cnt
        {
            pic_order_cnt_lsb = Some(r.read_bits(log2_max_pic_order_cnt_lsb_minus4 + 4)?);
            if pps.bottom_field_pic_order_in_frame_present {
                delta_pic_order_cnt_bottom = Some(r.read_se()?);
            }
        }

        let redundant_pic_cnt = if pps.redundant_pic_cnt_present {
            Some(r.read_ue()?)
        } else {
            None
        };
        let direct_spatial_mv_pred = if slice_type == SliceType::B {
            Some(r.read_flag()?)
        } else {
            None
        };

        let mut num_ref_idx_override = None;
        if matches!(slice_type, SliceType::P | SliceType::Sp | SliceType::B) {
            if r.read_flag()? {
                let l0 = r.read_ue()?;
                let l1 = if slice_type == SliceType::B {
                    Some(r.read_ue()?)
                } else {
                    None
                };
                num_ref_idx_override = Some((l0, l1));
            }
        }

        let mut ref_list_mods_l0 = None;
        let mut ref_list_mods_l1 = None;
        if !slice_type.is_intra() {
            ref_list_mods_l0 = Self::read_ref_list_mods(&mut r)?;
            if slice_type == SliceType::B {
                ref_list_mods_l1 = Self::read_ref_list_mods(&mut r)?;
            }
        }

        let weighted = match slice_type {
            SliceType::P | SliceType::Sp => pps.weighted_pred,
            SliceType::B => pps.weighted_bipred_idc == 1,
            _ => false,
        };
        let pred_weight_table = if weighted {
            let l0_count = num_ref_idx_override
                .map(|(l0, _)| l0)
                .unwrap_or(pps.num_ref_idx_l0_default_active_minus1)
                + 1;
            let l1_count = if slice_type == SliceType::B {
                Some(
                    num_ref_idx_override
                        .and_then(|(_, l1)| l1)
                        .unwrap_or(pps.num_ref_idx_l1_default_active_minus1)
                        + 1,
                )
            } else {
                None
            };
            Some(Self::read_pred_weight_table(&mut r, sps, l0_count, l1_count)?)
        } else {
            None
        };

        let dec_ref_pic_marking = if header.ref_idc != 0 {
            Some(if is_idr {
                DecRefPicMarking::Idr {
                    no_output_of_prior_pics: r.read_flag()?,
                    long_term_reference: r.read_flag()?,
                }
            } else {
                let mmco = if r.read_flag()? {
                    Some(Self::read_mmco_ops(&mut r)?)
                } else {
                    None
                };
                DecRefPicMarking::NonIdr { mmco }
            })
        } else {
            None
        };

        let cabac_init_idc = if pps.entropy_coding_mode && !slice_type.is_intra() {
            Some(r.read_ue()?)
        } else {
            None
        };
        let slice_qp_delta = r.read_se()?;

        let mut sp_for_switch = None;
        let mut slice_qs_delta = None;
        if matches!(slice_type, SliceType::Sp | SliceType::Si) {
            if slice_type == SliceType::Sp {
                sp_for_switch = Some(r.read_flag()?);
            }
            slice_qs_delta = Some(r.read_se()?);
        }

        let deblocking = if pps.deblocking_filter_control_present {
            let disable_idc = r.read_ue()?;
            let (alpha, beta) = if disable_idc != 1 {
                (Some(r.read_se()?), Some(r.read_se()?))
            } else {
                (None, None)
            };
            Some(Deblocking {
                disable_idc,
                alpha_c0_offset_div2: alpha,
                beta_offset_div2: beta,
            })
        } else {
            None
        };

        Ok(SliceHeader {
            first_mb_in_slice,
            slice_type,
            whole_picture: slice_type_raw >= 5,
            pic_parameter_set_id,
            frame_num,
            idr_pic_id,
            pic_order_cnt_lsb,
            delta_pic_order_cnt_bottom,
            redundant_pic_cnt,
            direct_spatial_mv_pred,
            num_ref_idx_override,
            ref_list_mods_l0,
            ref_list_mods_l1,
            pred_weight_table,
            dec_ref_pic_marking,
            cabac_init_idc,
            slice_qp_delta,
            sp_for_switch,
            slice_qs_delta,
            deblocking,
        })
    }

    /// One reordering list: a presence flag, then instructions until idc 3.
    fn read_ref_list_mods(r: &mut BitReader) -> Result<Option<Vec<RefListMod>>> {
        if !r.read_flag()? {
            return Ok(None);
        }
        let mut mods = Vec::new();
        loop {
            let idc = r.read_ue()?;
            match idc {
                0 | 1 => mods.push(RefListMod::ShortTerm {
                    subtract: idc == 0,
                    abs_diff_pic_num_minus1: r.read_ue()?,
                }),
                2 => mods.push(RefListMod::LongTerm {
                    long_term_pic_num: r.read_ue()?,
                }),
                3 => break,
                other => {
                    return Err(Error::corrupt(format!(
                        "modification_of_pic_nums_idc {other} out of range"
                    )))
                }
            }
        }
        Ok(Some(mods))
    }

    fn read_weight_entries(
        r: &mut BitReader,
        count: u32,
        has_chroma: bool,
    ) -> Result<Vec<WeightEntry>> {
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut entry = WeightEntry::default();
            if r.read_flag()? {
                entry.luma = Some((r.read_se()?, r.read_se()?));
            }
            if has_chroma && r.read_flag()? {
                let cb = (r.read_se()?, r.read_se()?);
                let cr = (r.read_se()?, r.read_se()?);
                entry.chroma = Some([cb, cr]);
            }
            entries.push(entry);
        }
        Ok(entries)
    }

    fn read_pred_weight_table(
        r: &mut BitReader,
        sps: &Sps,
        l0_count: u32,
        l1_count: Option<u32>,
    ) -> Result<PredWeightTable> {
        let has_chroma = sps.chroma_array_type() != 0;
        let luma_log2_weight_denom = r.read_ue()?;
        let chroma_log2_weight_denom = if has_chroma { Some(r.read_ue()?) } else { None };
        let l0 = Self::read_weight_entries(r, l0_count, has_chroma)?;
        let l1 = match l1_count {
            Some(count) => Some(Self::read_weight_entries(r, count, has_chroma)?),
            None => None,
        };
        Ok(PredWeightTable {
            luma_log2_weight_denom,
            chroma_log2_weight_denom,
            l0,
            l1,
        })
    }

    /// Marking operations until op 0.
    fn read_mmco_ops(r: &mut BitReader) -> Result<Vec<MmcoOp>> {
        let mut ops = Vec::new();
        loop {
            let op = match r.read_ue()? {
                0 => break,
                1 => MmcoOp::UnmarkShortTerm {
                    difference_of_pic_nums_minus1: r.read_ue()?,
                },
                2 => MmcoOp::UnmarkLongTerm {
                    long_term_pic_num: r.read_ue()?,
                },
                3 => MmcoOp::ShortTermToLongTerm {
                    difference_of_pic_nums_minus1: r.read_ue()?,
                    long_term_frame_idx: r.read_ue()?,
                },
                4 => MmcoOp::SetMaxLongTermIdx {
                    max_long_term_frame_idx_plus1: r.read_ue()?,
                },
                5 => MmcoOp::UnmarkAll,
                6 => MmcoOp::CurrentToLongTerm {
                    long_term_frame_idx: r.read_ue()?,
                },
                other => {
                    return Err(Error::corrupt(format!(
                        "memory_management_control_operation {other} out of range"
                    )))
                }
            };
            ops.push(op);
        }
        Ok(ops)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nal::NalHeader;
    use crate::pps::Pps;
    use crate::sps::{PicOrderCnt, Sps};
    use fragmux_common::BitWriter;

    fn test_sps() -> Sps {
        Sps {
            profile_idc: 66,
            constraint_flags: 0b1100_0000,
            level_idc: 30,
            seq_parameter_set_id: 0,
            profile_ext: None,
            log2_max_frame_num_minus4: 0,
            pic_order_cnt: PicOrderCnt::Type0 {
                log2_max_pic_order_cnt_lsb_minus4: 2,
            },
            max_num_ref_frames: 1,
            gaps_in_frame_num_value_allowed: false,
            pic_width_in_mbs_minus1: 39,
            pic_height_in_map_units_minus1: 29,
            direct_8x8_inference: true,
            frame_cropping: None,
            vui: None,
        }
    }

    fn test_pps() -> Pps {
        Pps {
            pic_parameter_set_id: 0,
            seq_parameter_set_id: 0,
            entropy_coding_mode: false,
            bottom_field_pic_order_in_frame_present: false,
            num_ref_idx_l0_default_active_minus1: 0,
            num_ref_idx_l1_default_active_minus1: 0,
            weighted_pred: false,
            weighted_bipred_idc: 0,
            pic_init_qp_minus26: 0,
            pic_init_qs_minus26: 0,
            chroma_qp_index_offset: 0,
            deblocking_filter_control_present: false,
            constrained_intra_pred: false,
            redundant_pic_cnt_present: false,
            extension: None,
        }
    }

    fn idr_header() -> NalHeader {
        NalHeader::parse(&[0x65]).unwrap()
    }

    fn non_ref_slice_header() -> NalHeader {
        NalHeader::parse(&[0x01]).unwrap()
    }

    #[test]
    fn test_slice_type_mapping() {
        assert_eq!(SliceType::from_raw(0).unwrap(), SliceType::P);
        assert_eq!(SliceType::from_raw(1).unwrap(), SliceType::B);
        assert_eq!(SliceType::from_raw(2).unwrap(), SliceType::I);
        assert_eq!(SliceType::from_raw(3).unwrap(), SliceType::Sp);
        assert_eq!(SliceType::from_raw(4).unwrap(), SliceType::Si);
        assert_eq!(SliceType::from_raw(7).unwrap(), SliceType::I);
        assert_eq!(SliceType::from_raw(9).unwrap(), SliceType::Si);
        assert!(SliceType::from_raw(10).is_err());
        assert!(SliceType::I.is_intra());
        assert!(!SliceType::P.is_intra());
    }

    #[test]
    fn test_parse_idr_slice_header() {
        let mut w = BitWriter::new();
        w.write_ue(0); // first_mb_in_slice
        w.write_ue(7); // slice_type: I, whole picture
        w.write_ue(0); // pic_parameter_set_id
        w.write_bits(0, 4); // frame_num
        w.write_ue(3); // idr_pic_id
        w.write_bits(0, 6); // pic_order_cnt_lsb
        w.write_flag(false); // no_output_of_prior_pics
        w.write_flag(false); // long_term_reference
        w.write_se(4); // slice_qp_delta
        w.rbsp_trailing();

        let h = SliceHeader::parse(&w.into_vec(), &idr_header(), &test_sps(), &test_pps()).unwrap();
        assert_eq!(h.slice_type, SliceType::I);
        assert!(h.whole_picture);
        assert_eq!(h.idr_pic_id, Some(3));
        assert_eq!(h.pic_order_cnt_lsb, Some(0));
        assert_eq!(h.frame_num, 0);
        assert_eq!(h.slice_qp_delta, 4);
        assert!(matches!(
            h.dec_ref_pic_marking,
            Some(DecRefPicMarking::Idr { .. })
        ));
        assert!(h.deblocking.is_none());
    }

    #[test]
    fn test_parse_p_slice_with_ref_list_mod() {
        let mut w = BitWriter::new();
        w.write_ue(0); // first_mb_in_slice
        w.write_ue(0); // slice_type: P
        w.write_ue(0); // pic_parameter_set_id
        w.write_bits(1, 4); // frame_num
        w.write_bits(2, 6); // pic_order_cnt_lsb
        w.write_flag(true); // num_ref_idx_active_override_flag
        w.write_ue(1); // num_ref_idx_l0_active_minus1
        w.write_flag(true); // ref_pic_list_modification_flag_l0
        w.write_ue(0); // idc 0: short term subtract
        w.write_ue(4); // abs_diff_pic_num_minus1
        w.write_ue(3); // idc 3: stop
        w.write_se(-2); // slice_qp_delta
        w.rbsp_trailing();

        // nal_ref_idc 0, so no dec_ref_pic_marking
        let h = SliceHeader::parse(
            &w.into_vec(),
            &non_ref_slice_header(),
            &test_sps(),
            &test_pps(),
        )
        .unwrap();
        assert_eq!(h.slice_type, SliceType::P);
        assert!(!h.whole_picture);
        assert_eq!(h.num_ref_idx_override, Some((1, None)));
        assert_eq!(
            h.ref_list_mods_l0.as_deref(),
            Some(
                &[RefListMod::ShortTerm {
                    subtract: true,
                    abs_diff_pic_num_minus1: 4
                }][..]
            )
        );
        assert!(h.dec_ref_pic_marking.is_none());
        assert_eq!(h.slice_qp_delta, -2);
    }

    #[test]
    fn test_parse_weighted_p_slice() {
        let pps = Pps {
            weighted_pred: true,
            deblocking_filter_control_present: true,
            ..test_pps()
        };
        let mut w = BitWriter::new();
        w.write_ue(0); // first_mb_in_slice
        w.write_ue(0); // slice_type: P
        w.write_ue(0); // pic_parameter_set_id
        w.write_bits(1, 4); // frame_num
        w.write_bits(2, 6); // pic_order_cnt_lsb
        w.write_flag(false); // num_ref_idx_active_override_flag
        w.write_flag(false); // ref_pic_list_modification_flag_l0
        w.write_ue(5); // luma_log2_weight_denom
        w.write_ue(0); // chroma_log2_weight_denom
        w.write_flag(true); // luma_weight_flag[0]
        w.write_se(20); // luma_weight
        w.write_se(-1); // luma_offset
        w.write_flag(false); // chroma_weight_flag[0]
        w.write_se(0); // slice_qp_delta
        w.write_ue(1); // disable_deblocking_filter_idc
        w.rbsp_trailing();

        let h = SliceHeader::parse(&w.into_vec(), &non_ref_slice_header(), &test_sps(), &pps)
            .unwrap();
        let table = h.pred_weight_table.unwrap();
        assert_eq!(table.luma_log2_weight_denom, 5);
        assert_eq!(table.chroma_log2_weight_denom, Some(0));
        assert_eq!(table.l0.len(), 1);
        assert_eq!(table.l0[0].luma, Some((20, -1)));
        assert_eq!(table.l0[0].chroma, None);
        assert!(table.l1.is_none());
        let deblocking = h.deblocking.unwrap();
        assert_eq!(deblocking.disable_idc, 1);
        assert!(deblocking.alpha_c0_offset_div2.is_none());
    }

    #[test]
    fn test_parse_mmco_loop() {
        let mut w = BitWriter::new();
        w.write_ue(0); // first_mb_in_slice
        w.write_ue(0); // slice_type: P
        w.write_ue(0); // pic_parameter_set_id
        w.write_bits(2, 4); // frame_num
        w.write_bits(4, 6); // pic_order_cnt_lsb
        w.write_flag(false); // num_ref_idx_active_override_flag
        w.write_flag(false); // ref_pic_list_modification_flag_l0
        w.write_flag(true); // adaptive_ref_pic_marking_mode_flag
        w.write_ue(1); // op 1
        w.write_ue(0); // difference_of_pic_nums_minus1
        w.write_ue(4); // op 4
        w.write_ue(2); // max_long_term_frame_idx_plus1
        w.write_ue(0); // op 0: stop
        w.write_se(0); // slice_qp_delta
        w.rbsp_trailing();

        // nal_ref_idc 2 (header byte 0x41), non-IDR
        let header = NalHeader::parse(&[0x41]).unwrap();
        let h = SliceHeader::parse(&w.into_vec(), &header, &test_sps(), &test_pps()).unwrap();
        match h.dec_ref_pic_marking.unwrap() {
            DecRefPicMarking::NonIdr { mmco: Some(ops) } => {
                assert_eq!(
                    ops,
                    vec![
                        MmcoOp::UnmarkShortTerm {
                            difference_of_pic_nums_minus1: 0
                        },
                        MmcoOp::SetMaxLongTermIdx {
                            max_long_term_frame_idx_plus1: 2
                        },
                    ]
                );
            }
            other => panic!("wrong marking: {other:?}"),
        }
    }
}
