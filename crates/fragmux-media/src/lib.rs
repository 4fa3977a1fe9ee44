//! Fragmux-Media: ISO-BMFF parsing and fragmented MP4 muxing
//!
//! The box layer parses an MP4 into a typed tree and serializes it back
//! byte-exactly; on top of it sit the fragment builder (Annex-B H.264 in,
//! `ftyp`/`moov`/`styp`/`sidx`/`moof`/`mdat` out) and sample extraction
//! (frames back out of an already-muxed file).

pub mod boxes;
pub mod error;
pub mod fmp4;
pub mod mp4;

pub use boxes::{parse_boxes, serialize_boxes, FourCc, Mp4Box, SampleFlags};
pub use error::{Error, Result};
pub use fmp4::{h264_to_mp4, mux_video, CodecOverride, FrameSample, MuxOutput, MuxParams};
pub use mp4::{extract_samples, ExtractedVideo, MediaFrame, Mp4File};
