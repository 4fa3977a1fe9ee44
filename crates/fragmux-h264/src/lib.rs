//! Fragmux-H264: the NAL layer of an H.264 elementary stream
//!
//! Everything between raw Annex-B bytes and decoded parameter sets:
//!
//! - `annexb` - start-code splitting and length-prefixed (AVCC) framing
//! - `rbsp` - emulation-prevention escape and unescape
//! - `nal` - NAL unit header, extension headers, quick classification
//! - `sps` / `pps` - sequence and picture parameter sets
//! - `slice` - slice header and slice types
//! - `sei` - supplemental enhancement information messages

pub mod annexb;
pub mod error;
pub mod nal;
pub mod pps;
pub mod rbsp;
pub mod sei;
pub mod slice;
pub mod sps;

pub use annexb::{split_annex_b, split_length_prefixed, to_annex_b, to_length_prefixed};
pub use error::{Error, Result};
pub use nal::{identify_nal, nal_slice_type, NalHeader, NalKind, NalUnitType};
pub use pps::Pps;
pub use rbsp::{escape_rbsp, escape_rbsp_with_ranges, unescape_rbsp, ByteRange};
pub use sei::SeiMessage;
pub use slice::{SliceHeader, SliceType};
pub use sps::Sps;
