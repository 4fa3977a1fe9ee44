//! CLI end-to-end tests
//!
//! Drives the fragmux binary over generated H.264 and MP4 fixtures.

use assert_cmd::prelude::*;
use bytes::Bytes;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

use fragmux_common::{BitWriter, ChunkedBytes};
use fragmux_h264::sps::PicOrderCnt;
use fragmux_h264::{escape_rbsp, Sps};
use fragmux_media::boxes::{
    serialize_boxes, Avc1, Avc1Child, AvcC, Dref, DrefEntry, FileTypeBox, Hdlr, Mdhd, Mp4Box, Mvhd,
    SampleEntry, Stco, Stsc, StscEntry, Stsd, Stss, Stsz, Stts, Tkhd, Url, Vmhd,
};

fn fragmux_cmd() -> Command {
    Command::cargo_bin("fragmux").unwrap()
}

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

fn sps_nal() -> Vec<u8> {
    let mut nal = vec![0x67];
    nal.extend(escape_rbsp(&test_sps().write()));
    nal
}

fn pps_nal() -> Vec<u8> {
    let mut w = BitWriter::new();
    for _ in 0..2 {
        w.write_ue(0); // parameter set ids
    }
    w.write_flag(false);
    w.write_flag(false);
    w.write_ue(0); // num_slice_groups_minus1
    w.write_ue(0);
    w.write_ue(0);
    w.write_flag(false);
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
    nal
}

fn idr_nal() -> Vec<u8> {
    vec![0x65, 0x88, 0x84, 0x21, 0xA0]
}

fn p_slice_nal() -> Vec<u8> {
    let mut w = BitWriter::new();
    w.write_ue(0); // first_mb_in_slice
    w.write_ue(0); // slice_type P
    w.write_bits(0x155, 10);
    w.rbsp_trailing();
    let mut nal = vec![0x41];
    nal.extend(escape_rbsp(&w.into_vec()));
    nal
}

/// SPS + PPS + one IDR + two P slices, 4-byte start codes.
fn write_annex_b_fixture(path: &Path) {
    let mut stream = Vec::new();
    for nal in [sps_nal(), pps_nal(), idr_nal(), p_slice_nal(), p_slice_nal()] {
        stream.extend([0, 0, 0, 1]);
        stream.extend(nal);
    }
    fs::write(path, stream).unwrap();
}

#[test]
fn test_cli_no_args_shows_help() {
    let mut cmd = fragmux_cmd();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_version() {
    let mut cmd = fragmux_cmd();
    cmd.arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("fragmux"));
}

#[test]
fn test_nals_lists_units() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("clip.h264");
    write_annex_b_fixture(&input);

    let mut cmd = fragmux_cmd();
    cmd.arg("nals")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("sps"))
        .stdout(predicate::str::contains("pps"))
        .stdout(predicate::str::contains("keyframe"))
        .stdout(predicate::str::contains("slice_type=P"))
        .stdout(predicate::str::contains("5 NAL units"));
}

#[test]
fn test_mux_then_dump() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("clip.h264");
    let output = dir.path().join("clip.mp4");
    write_annex_b_fixture(&input);

    let mut cmd = fragmux_cmd();
    cmd.arg("mux")
        .arg(&input)
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("3 samples"))
        .stdout(predicate::str::contains("640x480"));

    let muxed = fs::read(&output).unwrap();
    assert_eq!(&muxed[4..8], b"ftyp");

    let mut cmd = fragmux_cmd();
    cmd.arg("dump")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"moov\""))
        .stdout(predicate::str::contains("\"trun\""))
        .stdout(predicate::str::contains("\"sidx\""))
        .stdout(predicate::str::contains("\"sample_count\": 3"));
}

#[test]
fn test_mux_rejects_missing_parameter_sets() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("no-sps.h264");
    let mut stream = Vec::new();
    for nal in [idr_nal(), p_slice_nal()] {
        stream.extend([0, 0, 0, 1]);
        stream.extend(nal);
    }
    fs::write(&input, stream).unwrap();

    let mut cmd = fragmux_cmd();
    cmd.arg("mux")
        .arg(&input)
        .arg(dir.path().join("out.mp4"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("SPS"));
}

#[test]
fn test_diff_identical_and_differing() {
    let dir = tempdir().unwrap();
    let a = dir.path().join("a.bin");
    let b = dir.path().join("b.bin");
    let c = dir.path().join("c.bin");
    fs::write(&a, [1, 2, 3, 4]).unwrap();
    fs::write(&b, [1, 2, 3, 4]).unwrap();
    fs::write(&c, [1, 2, 9, 4]).unwrap();

    let mut cmd = fragmux_cmd();
    cmd.arg("diff")
        .arg(&a)
        .arg(&b)
        .assert()
        .success()
        .stdout(predicate::str::contains("identical"));

    let mut cmd = fragmux_cmd();
    cmd.arg("diff")
        .arg(&a)
        .arg(&c)
        .assert()
        .failure()
        .stdout(predicate::str::contains("offset 2"))
        .stdout(predicate::str::contains("[03]"))
        .stdout(predicate::str::contains("[09]"));
}

/// A minimal progressive (non-fragmented) MP4 with one IDR and one P slice,
/// chunk offsets pointing into its own mdat.
fn write_progressive_fixture(path: &Path) {
    let samples: Vec<Vec<u8>> = [idr_nal(), p_slice_nal()]
        .into_iter()
        .map(|nal| {
            let mut framed = (nal.len() as u32).to_be_bytes().to_vec();
            framed.extend(nal);
            framed
        })
        .collect();
    let sizes: Vec<u32> = samples.iter().map(|s| s.len() as u32).collect();
    let mdat_payload: Vec<u8> = samples.concat();

    let build = |chunk_offset: u32| -> Vec<Mp4Box> {
        let avcc = AvcC::from_parameter_sets(
            66,
            0b1100_0000,
            30,
            vec![ChunkedBytes::from_slice(&sps_nal())],
            vec![ChunkedBytes::from_slice(&pps_nal())],
        );
        let avc1 = Avc1 {
            reserved: [0; 6],
            data_reference_index: 1,
            pre_defined: 0,
            reserved2: 0,
            pre_defined2: [0; 3],
            width: 640,
            height: 480,
            horizresolution: 0x0048_0000,
            vertresolution: 0x0048_0000,
            reserved3: 0,
            frame_count: 1,
            compressorname: [0; 32],
            depth: 24,
            pre_defined3: -1,
            children: vec![Avc1Child::AvcC(avcc)],
        };
        let stbl = Mp4Box::Stbl(vec![
            Mp4Box::Stsd(Stsd {
                version: 0,
                flags: 0,
                entries: vec![SampleEntry::Avc1(avc1)],
            }),
            Mp4Box::Stts(Stts {
                version: 0,
                flags: 0,
                entries: vec![(2, 3000)],
            }),
            Mp4Box::Stsc(Stsc {
                version: 0,
                flags: 0,
                entries: vec![StscEntry {
                    first_chunk: 1,
                    samples_per_chunk: 2,
                    sample_description_index: 1,
                }],
            }),
            Mp4Box::Stsz(Stsz {
                version: 0,
                flags: 0,
                sample_size: 0,
                sample_count: 2,
                sizes: sizes.clone(),
            }),
            Mp4Box::Stco(Stco {
                version: 0,
                flags: 0,
                entries: vec![chunk_offset],
            }),
            Mp4Box::Stss(Stss {
                version: 0,
                flags: 0,
                entries: vec![1],
            }),
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
                timescale: 90000,
                duration: 6000,
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
                track_id: 1,
                reserved: 0,
                duration: 6000,
                reserved2: [0; 2],
                layer: 0,
                alternate_group: 0,
                volume: 0,
                reserved3: 0,
                matrix: [65536, 0, 0, 0, 65536, 0, 0, 0, 1073741824],
                width: 640 << 16,
                height: 480 << 16,
            }),
            mdia,
        ]);
        vec![
            Mp4Box::Ftyp(FileTypeBox {
                major_brand: *b"isom",
                minor_version: 512,
                compatible_brands: vec![*b"isom", *b"avc1"],
            }),
            Mp4Box::Moov(vec![
                Mp4Box::Mvhd(Mvhd {
                    timescale: 90000,
                    duration: 6000,
                    ..Mvhd::default()
                }),
                trak,
            ]),
            Mp4Box::Mdat {
                data: ChunkedBytes::from_slice(&mdat_payload),
                large: false,
            },
        ]
    };

    // stco holds an absolute file offset, so build once to measure where the
    // mdat payload lands, then rebuild with the real offset
    let probe = serialize_boxes(&build(0));
    let payload_offset = (probe.len() - mdat_payload.len()) as u32;
    let bytes = serialize_boxes(&build(payload_offset));
    let mut out = fs::File::create(path).unwrap();
    bytes.write_to(&mut out).unwrap();
}

#[test]
fn test_extract_from_progressive_file() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("clip.mp4");
    let output = dir.path().join("clip.h264");
    write_progressive_fixture(&input);

    let mut cmd = fragmux_cmd();
    cmd.arg("extract")
        .arg(&input)
        .arg(&output)
        .assert()
        .success()
        .stdout(predicate::str::contains("2 frames (1 key)"))
        .stdout(predicate::str::contains("640x480"));

    let stream = Bytes::from(fs::read(&output).unwrap());
    let nals = fragmux_h264::split_annex_b(stream).unwrap();
    assert_eq!(nals.len(), 4); // sps, pps, idr, p slice
    assert_eq!(nals[0][0], 0x67);
    assert_eq!(nals[2][0], 0x65);
    assert_eq!(&nals[2][..], &idr_nal()[..]);
}

#[test]
fn test_extract_rejects_fragmented_input() {
    let dir = tempdir().unwrap();
    let input = dir.path().join("clip.h264");
    let muxed = dir.path().join("clip.mp4");
    write_annex_b_fixture(&input);

    fragmux_cmd()
        .arg("mux")
        .arg(&input)
        .arg(&muxed)
        .assert()
        .success();

    // fragmented output has empty sample tables, extraction targets
    // progressive files only
    fragmux_cmd()
        .arg("extract")
        .arg(&muxed)
        .arg(dir.path().join("out.h264"))
        .assert()
        .failure();
}
