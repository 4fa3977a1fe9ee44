//! Picture parameter set.

use fragmux_common::{BitReader, BitWriter};

use crate::nal::{NalHeader, NalUnitType};
use crate::rbsp::unescape_rbsp;
use crate::{Error, Result};

/// Optional fields after the mandatory part, present when RBSP bits remain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PpsExtension {
    pub transform_8x8_mode: bool,
    pub second_chroma_qp_index_offset: i32,
}

/// A parsed picture parameter set. Slice groups (FMO) are rejected at parse
/// time, so the slice-group map fields are not represented.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pps {
    pub pic_parameter_set_id: u32,
    pub seq_parameter_set_id: u32,
    pub entropy_coding_mode: bool,
    pub bottom_field_pic_order_in_frame_present: bool,
    pub num_ref_idx_l0_default_active_minus1: u32,
    pub num_ref_idx_l1_default_active_minus1: u32,
    pub weighted_pred: bool,
    pub weighted_bipred_idc: u8,
    pub pic_init_qp_minus26: i32,
    pub pic_init_qs_minus26: i32,
    pub chroma_qp_index_offset: i32,
    pub deblocking_filter_control_present: bool,
    pub constrained_intra_pred: bool,
    pub redundant_pic_cnt_present: bool,
    pub extension: Option<PpsExtension>,
}

impl Pps {
    /// Parse from a whole NAL unit (header byte included, emulation
    /// prevention still applied).
    pub fn parse_nal(nal: &[u8]) -> Result<Pps> {
        let header = NalHeader::parse(nal)?;
        if header.unit_type != NalUnitType::Pps {
            return Err(Error::corrupt(format!(
                "expected a PPS NAL, got {:?}",
                header.unit_type
            )));
        }
        let rbsp = unescape_rbsp(&nal[header.header_len..])?;
        Self::parse(&rbsp)
    }

    /// Parse from the unescaped RBSP payload (NAL header stripped).
    pub fn parse(rbsp: &[u8]) -> Result<Pps> {
        let mut r = BitReader::new(rbsp);
        let pic_parameter_set_id = r.read_ue()?;
        let seq_parameter_set_id = r.read_ue()?;
        let entropy_coding_mode = r.read_flag()?;
        let bottom_field_pic_order_in_frame_present = r.read_flag()?;
        if r.read_ue()? != 0 {
            return Err(Error::unsupported("PPS slice groups (FMO)"));
        }
        let num_ref_idx_l0_default_active_minus1 = r.read_ue()?;
        let num_ref_idx_l1_default_active_minus1 = r.read_ue()?;
        let weighted_pred = r.read_flag()?;
        let weighted_bipred_idc = r.read_bits(2)? as u8;
        let pic_init_qp_minus26 = r.read_se()?;
        let pic_init_qs_minus26 = r.read_se()?;
        let chroma_qp_index_offset = r.read_se()?;
        let deblocking_filter_control_present = r.read_flag()?;
        let constrained_intra_pred = r.read_flag()?;
        let redundant_pic_cnt_present = r.read_flag()?;

        let extension = if r.more_rbsp_data()? {
            let transform_8x8_mode = r.read_flag()?;
            if r.read_flag()? {
                return Err(Error::unsupported("PPS pic_scaling_matrix_present_flag"));
            }
            Some(PpsExtension {
                transform_8x8_mode,
                second_chroma_qp_index_offset: r.read_se()?,
            })
        } else {
            None
        };

        Ok(Pps {
            pic_parameter_set_id,
            seq_parameter_set_id,
            entropy_coding_mode,
            bottom_field_pic_order_in_frame_present,
            num_ref_idx_l0_default_active_minus1,
            num_ref_idx_l1_default_active_minus1,
            weighted_pred,
            weighted_bipred_idc,
            pic_init_qp_minus26,
            pic_init_qs_minus26,
            chroma_qp_index_offset,
            deblocking_filter_control_present,
            constrained_intra_pred,
            redundant_pic_cnt_present,
            extension,
        })
    }

    /// Serialize to an unescaped RBSP (trailing bits included, NAL header
    /// byte excluded).
    pub fn write(&self) -> Vec<u8> {
        let mut w = BitWriter::new();
        w.write_ue(self.pic_parameter_set_id);
        w.write_ue(self.seq_parameter_set_id);
        w.write_flag(self.entropy_coding_mode);
        w.write_flag(self.bottom_field_pic_order_in_frame_present);
        w.write_ue(0); // num_slice_groups_minus1
        w.write_ue(self.num_ref_idx_l0_default_active_minus1);
        w.write_ue(self.num_ref_idx_l1_default_active_minus1);
        w.write_flag(self.weighted_pred);
        w.write_bits(self.weighted_bipred_idc as u32, 2);
        w.write_se(self.pic_init_qp_minus26);
        w.write_se(self.pic_init_qs_minus26);
        w.write_se(self.chroma_qp_index_offset);
        w.write_flag(self.deblocking_filter_control_present);
        w.write_flag(self.constrained_intra_pred);
        w.write_flag(self.redundant_pic_cnt_present);
        if let Some(ext) = &self.extension {
            w.write_flag(ext.transform_8x8_mode);
            w.write_flag(false); // pic_scaling_matrix_present_flag
            w.write_se(ext.second_chroma_qp_index_offset);
        }
        w.rbsp_trailing();
        w.into_vec()
    }
}
