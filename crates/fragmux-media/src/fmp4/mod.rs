//! Fragmented MP4 muxing.
//!
//! Turns raw H.264 NAL buffers into a streamable fragment sequence:
//! `ftyp`+`moov` once per track, then `styp`+`sidx`+`moof`+`mdat` per
//! fragment. The `trun` data offset depends on the serialized size of the
//! enclosing `moof`, so the moof is built twice: once with a zero offset to
//! measure it, once with the real value.

use bytes::Bytes;
use fragmux_common::ChunkedBytes;
use fragmux_h264::{identify_nal, split_annex_b, to_length_prefixed, NalKind, Sps};
use tracing::debug;

use crate::boxes::{
    self, serialize_boxes, tfhd_flags, trun_flags, Avc1, Avc1Child, AvcC, Dref, DrefEntry,
    FileTypeBox, Hdlr, Mdhd, Mfhd, Mp4Box, Mvhd, Pasp, SampleEntry, SampleFlags, Sidx,
    SidxReference, Stco, Stsc, Stsd, Stsz, Stts, Tfdt, Tfhd, Tkhd, Trex, Trun, TrunSample, Url,
    Vmhd,
};
use crate::{Error, Result};

const TRACK_ID: u32 = 1;

/// One video frame handed to the muxer: a raw slice NAL (no start code, no
/// length prefix) plus its timing.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub data: Bytes,
    /// Duration in timescale units.
    pub duration: u32,
    /// Composition-time offset relative to decode time.
    pub composition_offset: i64,
    pub is_keyframe: bool,
}

/// Caller-supplied override for the codec parameters normally read from the
/// SPS.
#[derive(Debug, Clone, Copy)]
pub struct CodecOverride {
    pub profile_idc: u8,
    pub level_idc: u8,
}

/// Input to [`mux_video`].
#[derive(Debug, Clone)]
pub struct MuxParams {
    /// Raw SPS NAL, including its header byte.
    pub sps: Bytes,
    /// Raw PPS NAL, including its header byte.
    pub pps: Bytes,
    pub frames: Vec<FrameSample>,
    /// Media timescale, units per second.
    pub timescale: u32,
    /// Emit `ftyp`+`moov` ahead of the fragment (first fragment of a track).
    pub add_moov: bool,
    /// 1-based fragment sequence number.
    pub sequence_number: u32,
    /// Decode time of the fragment's first sample.
    pub base_media_decode_time: u64,
    pub codec_override: Option<CodecOverride>,
}

/// A finished fragment plus the track parameters it was built with.
#[derive(Debug, Clone)]
pub struct MuxOutput {
    pub data: ChunkedBytes,
    pub width: u32,
    pub height: u32,
    /// RFC 6381 codec string, e.g. `avc1.64001E`.
    pub codec: String,
    /// Sum of sample durations, in timescale units.
    pub total_duration: u64,
    pub sample_count: usize,
}

/// Mux framed H.264 samples into a fragmented MP4.
pub fn mux_video(params: &MuxParams) -> Result<MuxOutput> {
    let keyframes = params.frames.iter().filter(|f| f.is_keyframe).count();
    if params.sps.is_empty() || params.pps.is_empty() {
        return Err(Error::invalid_input(format!(
            "missing SPS or PPS ({} frames seen, {} keyframes)",
            params.frames.len(),
            keyframes
        )));
    }
    if params.frames.is_empty() {
        return Err(Error::invalid_input(
            "no frame samples to mux (0 frames seen, 0 keyframes)",
        ));
    }

    let sps = Sps::parse_nal(&params.sps)?;
    let (profile_idc, level_idc) = match params.codec_override {
        Some(o) => (o.profile_idc, o.level_idc),
        None => (sps.profile_idc, sps.level_idc),
    };
    let codec = format!("avc1.{profile_idc:02X}00{level_idc:02X}");
    let width = sps.width();
    let height = sps.height();
    debug!(codec = %codec, width, height, frames = params.frames.len(), "muxing fragment");

    // AVCC framing: each sample is the NAL prefixed with its 4-byte length.
    let mdat_payload = to_length_prefixed(params.frames.iter().map(|f| &f.data));
    let sample_sizes: Vec<u32> = params
        .frames
        .iter()
        .map(|f| f.data.len() as u32 + 4)
        .collect();

    let default_duration = params.frames[0].duration;
    let uniform_duration = params.frames.iter().all(|f| f.duration == default_duration);
    let total_duration: u64 = params.frames.iter().map(|f| f.duration as u64).sum();

    // A version-0 trun stores composition offsets unsigned, so shift all
    // offsets up until the smallest is zero.
    let min_cts = params
        .frames
        .iter()
        .map(|f| f.composition_offset)
        .min()
        .unwrap_or(0)
        .min(0);

    let mut head = Vec::new();
    if params.add_moov {
        head.push(Mp4Box::Ftyp(FileTypeBox {
            major_brand: *b"iso5",
            minor_version: 1,
            compatible_brands: vec![*b"avc1", *b"iso5", *b"dash"],
        }));
        head.push(build_moov(params, &sps, default_duration, width, height));
    }

    let samples: Vec<TrunSample> = params
        .frames
        .iter()
        .enumerate()
        .map(|(i, f)| TrunSample {
            duration: (!uniform_duration).then_some(f.duration),
            size: Some(sample_sizes[i]),
            flags: None,
            cts_offset: Some(f.composition_offset - min_cts),
        })
        .collect();

    // First pass with a zero data offset, just to learn the moof size.
    let moof_probe = build_moof(params, build_trun(0, &samples)?);
    let moof_size = serialize_boxes(&[moof_probe]).len();
    let moof = build_moof(params, build_trun(moof_size as i32 + 8, &samples)?);

    let mdat = Mp4Box::Mdat {
        data: mdat_payload,
        large: false,
    };
    let fragment_size = moof_size as u32 + mdat_size(&mdat);

    let styp = Mp4Box::Styp(FileTypeBox {
        major_brand: *b"msdh",
        minor_version: 0,
        compatible_brands: vec![*b"msdh", *b"msix"],
    });
    let sidx = Mp4Box::Sidx(Sidx {
        version: 0,
        flags: 0,
        reference_id: TRACK_ID,
        timescale: params.timescale,
        earliest_presentation_time: params.base_media_decode_time,
        first_offset: 0,
        reserved: 0,
        references: vec![SidxReference {
            reference_type: false,
            referenced_size: fragment_size,
            subsegment_duration: total_duration as u32,
            starts_with_sap: true,
            sap_type: 1,
            sap_delta_time: 0,
        }],
    });

    let mut all = head;
    all.extend([styp, sidx, moof, mdat]);
    Ok(MuxOutput {
        data: serialize_boxes(&all),
        width,
        height,
        codec,
        total_duration,
        sample_count: params.frames.len(),
    })
}

fn mdat_size(mdat: &Mp4Box) -> u32 {
    match mdat {
        Mp4Box::Mdat { data, .. } => data.len() as u32 + 8,
        _ => unreachable!(),
    }
}

/// Derive a `trun` from its rows. Column presence must be uniform: a column
/// is emitted iff every row carries it, and a row set with mixed presence is
/// a caller error.
fn build_trun(data_offset: i32, samples: &[TrunSample]) -> Result<Trun> {
    let mut flags = trun_flags::DATA_OFFSET | trun_flags::FIRST_SAMPLE_FLAGS;
    for (name, bit, present) in [
        (
            "duration",
            trun_flags::SAMPLE_DURATION,
            samples.iter().map(|s| s.duration.is_some()).collect::<Vec<_>>(),
        ),
        (
            "size",
            trun_flags::SAMPLE_SIZE,
            samples.iter().map(|s| s.size.is_some()).collect(),
        ),
        (
            "cts",
            trun_flags::SAMPLE_CTS,
            samples.iter().map(|s| s.cts_offset.is_some()).collect(),
        ),
    ] {
        let any = present.iter().any(|&p| p);
        let all = present.iter().all(|&p| p);
        if any && !all {
            return Err(Error::invalid_input(format!(
                "per-sample {name} must be present for all samples or none"
            )));
        }
        if any {
            flags |= bit;
        }
    }
    if samples.iter().any(|s| s.flags.is_some()) {
        return Err(Error::invalid_input(
            "per-sample flags are owned by the fragment builder",
        ));
    }
    Ok(Trun {
        version: 0,
        flags,
        data_offset: Some(data_offset),
        // the fragment must open on a random-access point
        first_sample_flags: Some(SampleFlags::SYNC),
        samples: samples.to_vec(),
    })
}

fn build_moof(params: &MuxParams, trun: Trun) -> Mp4Box {
    Mp4Box::Moof(vec![
        Mp4Box::Mfhd(Mfhd {
            version: 0,
            flags: 0,
            sequence_number: params.sequence_number,
        }),
        Mp4Box::Traf(vec![
            Mp4Box::Tfhd(Tfhd {
                version: 0,
                flags: tfhd_flags::DEFAULT_BASE_IS_MOOF,
                track_id: TRACK_ID,
                base_data_offset: None,
                sample_description_index: None,
                default_sample_duration: None,
                default_sample_size: None,
                default_sample_flags: None,
            }),
            Mp4Box::Tfdt(Tfdt {
                version: 1,
                flags: 0,
                base_media_decode_time: params.base_media_decode_time,
            }),
            Mp4Box::Trun(trun),
        ]),
    ])
}

fn build_moov(
    params: &MuxParams,
    sps: &Sps,
    default_duration: u32,
    width: u32,
    height: u32,
) -> Mp4Box {
    let avcc = AvcC::from_parameter_sets(
        sps.profile_idc,
        sps.constraint_flags,
        sps.level_idc,
        vec![ChunkedBytes::from_bytes(params.sps.clone())],
        vec![ChunkedBytes::from_bytes(params.pps.clone())],
    );
    let avc1 = Avc1 {
        reserved: [0; 6],
        data_reference_index: 1,
        pre_defined: 0,
        reserved2: 0,
        pre_defined2: [0; 3],
        width: width as u16,
        height: height as u16,
        horizresolution: 0x0048_0000,
        vertresolution: 0x0048_0000,
        reserved3: 0,
        frame_count: 1,
        compressorname: [0; 32],
        depth: 24,
        pre_defined3: -1,
        children: vec![
            Avc1Child::AvcC(avcc),
            Avc1Child::Pasp(Pasp {
                h_spacing: 1,
                v_spacing: 1,
            }),
        ],
    };

    let stbl = Mp4Box::Stbl(vec![
        Mp4Box::Stsd(Stsd {
            version: 0,
            flags: 0,
            entries: vec![SampleEntry::Avc1(avc1)],
        }),
        Mp4Box::Stts(Stts::empty()),
        Mp4Box::Stsc(Stsc::empty()),
        Mp4Box::Stsz(Stsz::empty()),
        Mp4Box::Stco(Stco::empty()),
    ]);

    let minf = Mp4Box::Minf(vec![
        Mp4Box::Vmhd(Vmhd {
            version: 0,
            flags: 1,
            graphicsmode: 0,
            opcolor: [0; 3],
        }),
        Mp4Box::Dinf(vec![Mp4Box::Dref(Dref {
            version: 0,
            flags: 0,
            entries: vec![DrefEntry::Url(Url {
                version: 0,
                flags: 1,
                location: ChunkedBytes::new(),
            })],
        })]),
        stbl,
    ]);

    let mdia = Mp4Box::Mdia(vec![
        Mp4Box::Mdhd(Mdhd {
            version: 0,
            flags: 0,
            creation_time: 0,
            modification_time: 0,
            timescale: params.timescale,
            duration: 0,
            language: Mdhd::pack_language(b"und"),
            pre_defined: 0,
        }),
        Mp4Box::Hdlr(Hdlr {
            version: 0,
            flags: 0,
            pre_defined: 0,
            handler_type: *b"vide",
            reserved: [0; 3],
            name: ChunkedBytes::from_slice(b"VideoHandler\0"),
        }),
        minf,
    ]);

    let trak = Mp4Box::Trak(vec![
        Mp4Box::Tkhd(Tkhd {
            version: 0,
            flags: 3,
            creation_time: 0,
            modification_time: 0,
            track_id: TRACK_ID,
            reserved: 0,
            duration: 0,
            reserved2: [0; 2],
            layer: 0,
            alternate_group: 0,
            volume: 0,
            reserved3: 0,
            matrix: boxes::IDENTITY_MATRIX,
            width: width << 16,
            height: height << 16,
        }),
        mdia,
    ]);

    Mp4Box::Moov(vec![
        Mp4Box::Mvhd(Mvhd {
            timescale: params.timescale,
            duration: 0,
            ..Mvhd::default()
        }),
        Mp4Box::Mvex(vec![Mp4Box::Trex(Trex {
            version: 0,
            flags: 0,
            track_id: TRACK_ID,
            default_sample_description_index: 1,
            default_sample_duration: default_duration,
            default_sample_size: 0,
            default_sample_flags: SampleFlags::NON_SYNC,
        })]),
        trak,
    ])
}

/// Mux a whole Annex-B elementary stream in one call.
///
/// Splits on start codes, takes the first SPS and PPS seen, treats every
/// slice NAL as one frame with a constant `frame_duration`, and emits a
/// single fragment preceded by `ftyp`+`moov`.
pub fn h264_to_mp4(annex_b: Bytes, frame_duration: u32, timescale: u32) -> Result<MuxOutput> {
    let nals = split_annex_b(annex_b)?;
    let mut sps = None;
    let mut pps = None;
    let mut frames = Vec::new();
    for nal in &nals {
        let kind = identify_nal(nal)?;
        match kind {
            NalKind::Sps => {
                sps.get_or_insert_with(|| nal.clone());
            }
            NalKind::Pps => {
                pps.get_or_insert_with(|| nal.clone());
            }
            NalKind::Frame | NalKind::Keyframe => frames.push(FrameSample {
                data: nal.clone(),
                duration: frame_duration,
                composition_offset: 0,
                is_keyframe: kind == NalKind::Keyframe,
            }),
            NalKind::Sei | NalKind::Unknown => {}
        }
    }
    let keyframes = frames.iter().filter(|f| f.is_keyframe).count();
    let (Some(sps), Some(pps)) = (sps, pps) else {
        return Err(Error::invalid_input(format!(
            "stream carries no SPS/PPS ({} frames seen, {} keyframes)",
            frames.len(),
            keyframes
        )));
    };
    mux_video(&MuxParams {
        sps,
        pps,
        frames,
        timescale,
        add_moov: true,
        sequence_number: 1,
        base_media_decode_time: 0,
        codec_override: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boxes::{parse_boxes, FourCc};
    use fragmux_common::{BitWriter, ByteReader};
    use fragmux_h264::escape_rbsp;
    use fragmux_h264::sps::PicOrderCnt;

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

    fn sps_nal() -> Bytes {
        let mut nal = vec![0x67];
        nal.extend(escape_rbsp(&test_sps().write()));
        Bytes::from(nal)
    }

    fn pps_nal() -> Bytes {
        let mut w = BitWriter::new();
        w.write_ue(0); // pic_parameter_set_id
        w.write_ue(0); // seq_parameter_set_id
        w.write_flag(false); // entropy_coding_mode_flag
        w.write_flag(false); // bottom_field_pic_order_in_frame_present_flag
        w.write_ue(0); // num_slice_groups_minus1
        w.write_ue(0);
        w.write_ue(0);
        w.write_flag(false); // weighted_pred_flag
        w.write_bits(0, 2);
        w.write_se(0);
        w.write_se(0);
        w.write_se(0);
        w.write_flag(false);
        w.write_flag(false);
        w.write_flag(false);
        w.rbsp_trailing();
        let mut nal = vec![0x68];
        nal.extend(escape_rbsp(&w.into_vec()));
        Bytes::from(nal)
    }

    fn idr_nal() -> Bytes {
        Bytes::from_static(&[0x65, 0x88, 0x84, 0x21, 0xA0])
    }

    /// Type-1 slice whose first two fields decode to a P slice.
    fn p_slice_nal() -> Bytes {
        let mut w = BitWriter::new();
        w.write_ue(0); // first_mb_in_slice
        w.write_ue(0); // slice_type P
        w.write_bits(0x3FF, 10); // opaque slice payload
        w.rbsp_trailing();
        let mut nal = vec![0x41];
        nal.extend(escape_rbsp(&w.into_vec()));
        Bytes::from(nal)
    }

    fn frame(data: Bytes, duration: u32, is_keyframe: bool) -> FrameSample {
        FrameSample {
            data,
            duration,
            composition_offset: 0,
            is_keyframe,
        }
    }

    fn base_params() -> MuxParams {
        MuxParams {
            sps: sps_nal(),
            pps: pps_nal(),
            frames: vec![
                frame(idr_nal(), 3000, true),
                frame(p_slice_nal(), 3000, false),
                frame(p_slice_nal(), 3000, false),
            ],
            timescale: 90000,
            add_moov: true,
            sequence_number: 1,
            base_media_decode_time: 0,
            codec_override: None,
        }
    }

    fn top_level(output: &MuxOutput) -> Vec<Mp4Box> {
        let mut r = ByteReader::new(output.data.clone());
        parse_boxes(&mut r).unwrap()
    }

    fn find_trun(boxes: &[Mp4Box]) -> Trun {
        for b in boxes {
            if let Mp4Box::Moof(children) = b {
                for c in children {
                    if let Mp4Box::Traf(traf) = c {
                        for t in traf {
                            if let Mp4Box::Trun(trun) = t {
                                return trun.clone();
                            }
                        }
                    }
                }
            }
        }
        panic!("no trun in output");
    }

    #[test]
    fn test_full_fragment_box_order() {
        let output = mux_video(&base_params()).unwrap();
        assert_eq!(output.width, 640);
        assert_eq!(output.height, 480);
        assert_eq!(output.codec, "avc1.42001E");
        assert_eq!(output.sample_count, 3);
        assert_eq!(output.total_duration, 9000);

        let boxes = top_level(&output);
        let tags: Vec<String> = boxes.iter().map(|b| b.fourcc().to_string()).collect();
        assert_eq!(tags, ["ftyp", "moov", "styp", "sidx", "moof", "mdat"]);

        let trun = find_trun(&boxes);
        assert_eq!(trun.samples.len(), 3);
        assert_eq!(trun.first_sample_flags, Some(SampleFlags::SYNC));
        // uniform duration lives in trex, not per sample
        assert!(trun.samples.iter().all(|s| s.duration.is_none()));
        assert_eq!(trun.samples[0].size, Some(idr_nal().len() as u32 + 4));
    }

    #[test]
    fn test_trex_defaults_mark_non_sync() {
        let boxes = top_level(&mux_video(&base_params()).unwrap());
        let moov = boxes.iter().find(|b| b.fourcc() == FourCc::MOOV).unwrap();
        let mvex = moov.child(FourCc::MVEX).unwrap();
        let Some(Mp4Box::Trex(trex)) = mvex.child(FourCc::TREX) else {
            panic!("no trex");
        };
        assert_eq!(trex.default_sample_flags, SampleFlags::NON_SYNC);
        assert_eq!(trex.default_sample_duration, 3000);
        assert_eq!(trex.track_id, 1);
    }

    #[test]
    fn test_data_offset_points_past_moof_header() {
        let output = mux_video(&base_params()).unwrap();
        let boxes = top_level(&output);
        let moof_size = serialize_boxes(std::slice::from_ref(
            boxes.iter().find(|b| b.fourcc() == FourCc::MOOF).unwrap(),
        ))
        .len();
        let trun = find_trun(&boxes);
        assert_eq!(trun.data_offset, Some(moof_size as i32 + 8));
    }

    #[test]
    fn test_missing_parameter_sets() {
        let mut params = base_params();
        params.sps = Bytes::new();
        let err = mux_video(&params).unwrap_err();
        match err {
            Error::InvalidInput(msg) => {
                assert!(msg.contains("3 frames"));
                assert!(msg.contains("1 keyframes"));
            }
            other => panic!("wrong error: {other}"),
        }
    }

    #[test]
    fn test_variable_durations_written_per_sample() {
        let mut params = base_params();
        params.frames[2].duration = 1500;
        let output = mux_video(&params).unwrap();
        let trun = find_trun(&top_level(&output));
        assert_eq!(
            trun.samples.iter().map(|s| s.duration).collect::<Vec<_>>(),
            [Some(3000), Some(3000), Some(1500)]
        );
        assert_eq!(output.total_duration, 7500);
    }

    #[test]
    fn test_negative_composition_offsets_shifted() {
        let mut params = base_params();
        params.frames[0].composition_offset = 0;
        params.frames[1].composition_offset = -3000;
        params.frames[2].composition_offset = 3000;
        let output = mux_video(&params).unwrap();
        let trun = find_trun(&top_level(&output));
        assert_eq!(
            trun.samples.iter().map(|s| s.cts_offset).collect::<Vec<_>>(),
            [Some(3000), Some(0), Some(6000)]
        );
    }

    #[test]
    fn test_mixed_column_presence_rejected() {
        let samples = [
            TrunSample {
                size: Some(10),
                ..TrunSample::default()
            },
            TrunSample::default(),
        ];
        let err = build_trun(0, &samples).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_second_fragment_omits_moov() {
        let mut params = base_params();
        params.add_moov = false;
        params.sequence_number = 2;
        params.base_media_decode_time = 9000;
        let output = mux_video(&params).unwrap();
        let boxes = top_level(&output);
        let tags: Vec<String> = boxes.iter().map(|b| b.fourcc().to_string()).collect();
        assert_eq!(tags, ["styp", "sidx", "moof", "mdat"]);
        let Mp4Box::Sidx(sidx) = boxes.iter().find(|b| b.fourcc() == FourCc::SIDX).unwrap()
        else {
            panic!("no sidx");
        };
        assert_eq!(sidx.earliest_presentation_time, 9000);
        assert_eq!(sidx.references[0].subsegment_duration, 9000);
        assert!(sidx.references[0].starts_with_sap);
    }

    #[test]
    fn test_sidx_reference_spans_moof_and_mdat() {
        let output = mux_video(&base_params()).unwrap();
        let boxes = top_level(&output);
        let measure = |tag: FourCc| {
            serialize_boxes(std::slice::from_ref(
                boxes.iter().find(|b| b.fourcc() == tag).unwrap(),
            ))
            .len() as u32
        };
        let Mp4Box::Sidx(sidx) = boxes.iter().find(|b| b.fourcc() == FourCc::SIDX).unwrap()
        else {
            panic!("no sidx");
        };
        assert_eq!(
            sidx.references[0].referenced_size,
            measure(FourCc::MOOF) + measure(FourCc::MDAT)
        );
    }

    #[test]
    fn test_annex_b_convenience_path() {
        let mut stream = Vec::new();
        for nal in [sps_nal(), pps_nal(), idr_nal(), p_slice_nal(), p_slice_nal()] {
            stream.extend([0, 0, 0, 1]);
            stream.extend_from_slice(&nal);
        }
        let output = h264_to_mp4(Bytes::from(stream), 3000, 90000).unwrap();
        assert_eq!(output.sample_count, 3);
        let boxes = top_level(&output);
        assert_eq!(boxes[0].fourcc(), FourCc::FTYP);
        let trun = find_trun(&boxes);
        assert_eq!(trun.samples.len(), 3);
    }
}
