//! JSON rendering of a parsed MP4 box tree.

use fragmux_media::boxes::{Avc1Child, DrefEntry, Mp4Box, SampleEntry, SampleFlags};
use serde_json::{json, Value};

pub fn file_to_json(boxes: &[Mp4Box]) -> Value {
    Value::Array(boxes.iter().map(box_to_json).collect())
}

fn flags_json(flags: SampleFlags) -> Value {
    // round through serde so the field names match the struct
    serde_json::to_value(flags).unwrap_or_else(|_| json!(flags.to_raw()))
}

fn container(tag: &str, children: &[Mp4Box]) -> Value {
    json!({
        "type": tag,
        "children": children.iter().map(box_to_json).collect::<Vec<_>>(),
    })
}

pub fn box_to_json(b: &Mp4Box) -> Value {
    match b {
        Mp4Box::Ftyp(f) | Mp4Box::Styp(f) => json!({
            "type": b.fourcc().to_string(),
            "major_brand": String::from_utf8_lossy(&f.major_brand),
            "minor_version": f.minor_version,
            "compatible_brands": f.compatible_brands.iter()
                .map(|br| String::from_utf8_lossy(br).into_owned())
                .collect::<Vec<_>>(),
        }),
        Mp4Box::Moov(c) => container("moov", c),
        Mp4Box::Trak(c) => container("trak", c),
        Mp4Box::Mdia(c) => container("mdia", c),
        Mp4Box::Minf(c) => container("minf", c),
        Mp4Box::Dinf(c) => container("dinf", c),
        Mp4Box::Stbl(c) => container("stbl", c),
        Mp4Box::Mvex(c) => container("mvex", c),
        Mp4Box::Moof(c) => container("moof", c),
        Mp4Box::Traf(c) => container("traf", c),
        Mp4Box::Mvhd(m) => json!({
            "type": "mvhd",
            "timescale": m.timescale,
            "duration": m.duration,
            "rate": m.rate,
            "volume": m.volume,
            "next_track_id": m.next_track_id,
        }),
        Mp4Box::Tkhd(t) => json!({
            "type": "tkhd",
            "flags": t.flags,
            "track_id": t.track_id,
            "duration": t.duration,
            "width": t.width >> 16,
            "height": t.height >> 16,
        }),
        Mp4Box::Mdhd(m) => json!({
            "type": "mdhd",
            "timescale": m.timescale,
            "duration": m.duration,
            "language": m.language_str(),
        }),
        Mp4Box::Hdlr(h) => json!({
            "type": "hdlr",
            "handler_type": String::from_utf8_lossy(&h.handler_type),
            "name": h.name_str(),
        }),
        Mp4Box::Vmhd(v) => json!({
            "type": "vmhd",
            "flags": v.flags,
            "graphicsmode": v.graphicsmode,
        }),
        Mp4Box::Dref(d) => json!({
            "type": "dref",
            "entries": d.entries.iter().map(|e| match e {
                DrefEntry::Url(url) => json!({
                    "type": "url ",
                    "flags": url.flags,
                    "self_contained": url.flags & 1 != 0,
                }),
                DrefEntry::Other { fourcc, data } => json!({
                    "type": fourcc.to_string(),
                    "size": data.len(),
                }),
            }).collect::<Vec<_>>(),
        }),
        Mp4Box::Stsd(s) => json!({
            "type": "stsd",
            "entries": s.entries.iter().map(|e| match e {
                SampleEntry::Avc1(a) => json!({
                    "type": "avc1",
                    "width": a.width,
                    "height": a.height,
                    "frame_count": a.frame_count,
                    "depth": a.depth,
                    "children": a.children.iter().map(|c| match c {
                        Avc1Child::AvcC(v) => json!({
                            "type": "avcC",
                            "profile_indication": v.profile_indication,
                            "level_indication": v.level_indication,
                            "length_size": v.length_size(),
                            "sps_count": v.sps.len(),
                            "pps_count": v.pps.len(),
                        }),
                        Avc1Child::Pasp(p) => json!({
                            "type": "pasp",
                            "h_spacing": p.h_spacing,
                            "v_spacing": p.v_spacing,
                        }),
                        Avc1Child::Clap(_) => json!({ "type": "clap" }),
                        Avc1Child::Other { fourcc, data } => json!({
                            "type": fourcc.to_string(),
                            "size": data.len(),
                        }),
                    }).collect::<Vec<_>>(),
                }),
                SampleEntry::Other { fourcc, data } => json!({
                    "type": fourcc.to_string(),
                    "size": data.len(),
                }),
            }).collect::<Vec<_>>(),
        }),
        Mp4Box::Stts(s) => json!({
            "type": "stts",
            "entries": s.entries.iter()
                .map(|(count, delta)| json!({ "count": count, "delta": delta }))
                .collect::<Vec<_>>(),
        }),
        Mp4Box::Stsc(s) => json!({
            "type": "stsc",
            "entries": s.entries.iter().map(|e| json!({
                "first_chunk": e.first_chunk,
                "samples_per_chunk": e.samples_per_chunk,
            })).collect::<Vec<_>>(),
        }),
        Mp4Box::Stsz(s) => json!({
            "type": "stsz",
            "sample_size": s.sample_size,
            "sample_count": s.sample_count,
            "sizes": s.sizes,
        }),
        Mp4Box::Stco(s) => json!({ "type": "stco", "entries": s.entries }),
        Mp4Box::Co64(s) => json!({ "type": "co64", "entries": s.entries }),
        Mp4Box::Stss(s) => json!({ "type": "stss", "entries": s.entries }),
        Mp4Box::Ctts(s) => json!({
            "type": "ctts",
            "entries": s.entries.iter()
                .map(|(count, offset)| json!({ "count": count, "offset": offset }))
                .collect::<Vec<_>>(),
        }),
        Mp4Box::Trex(t) => json!({
            "type": "trex",
            "track_id": t.track_id,
            "default_sample_duration": t.default_sample_duration,
            "default_sample_size": t.default_sample_size,
            "default_sample_flags": flags_json(t.default_sample_flags),
        }),
        Mp4Box::Mehd(m) => json!({
            "type": "mehd",
            "fragment_duration": m.fragment_duration,
        }),
        Mp4Box::Mfhd(m) => json!({
            "type": "mfhd",
            "sequence_number": m.sequence_number,
        }),
        Mp4Box::Tfhd(t) => json!({
            "type": "tfhd",
            "flags": t.flags,
            "track_id": t.track_id,
            "base_data_offset": t.base_data_offset,
            "default_sample_duration": t.default_sample_duration,
            "default_sample_size": t.default_sample_size,
            "default_sample_flags": t.default_sample_flags.map(flags_json),
        }),
        Mp4Box::Tfdt(t) => json!({
            "type": "tfdt",
            "version": t.version,
            "base_media_decode_time": t.base_media_decode_time,
        }),
        Mp4Box::Trun(t) => json!({
            "type": "trun",
            "flags": t.flags,
            "sample_count": t.samples.len(),
            "data_offset": t.data_offset,
            "first_sample_flags": t.first_sample_flags.map(flags_json),
            "samples": t.samples.iter().map(|s| json!({
                "duration": s.duration,
                "size": s.size,
                "flags": s.flags.map(flags_json),
                "cts_offset": s.cts_offset,
            })).collect::<Vec<_>>(),
        }),
        Mp4Box::Sidx(s) => json!({
            "type": "sidx",
            "reference_id": s.reference_id,
            "timescale": s.timescale,
            "earliest_presentation_time": s.earliest_presentation_time,
            "first_offset": s.first_offset,
            "references": s.references.iter().map(|r| json!({
                "reference_type": r.reference_type,
                "referenced_size": r.referenced_size,
                "subsegment_duration": r.subsegment_duration,
                "starts_with_sap": r.starts_with_sap,
                "sap_type": r.sap_type,
            })).collect::<Vec<_>>(),
        }),
        Mp4Box::Mdat { data, large } => json!({
            "type": "mdat",
            "size": data.len(),
            "large": large,
        }),
        Mp4Box::Free(data) => json!({ "type": "free", "size": data.len() }),
        Mp4Box::Udta(data) => json!({ "type": "udta", "size": data.len() }),
        Mp4Box::Unknown { fourcc, data, .. } => json!({
            "type": fourcc.to_string(),
            "unknown": true,
            "size": data.len(),
        }),
    }
}
