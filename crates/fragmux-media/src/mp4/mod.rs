//! Reading existing MP4 files: the parsed tree and sample extraction.

use std::path::Path;

use bytes::Bytes;
use fragmux_common::{ByteReader, ChunkedBytes};
use fragmux_h264::{identify_nal, split_length_prefixed, NalKind, Sps};
use tracing::debug;

use crate::boxes::{parse_boxes, serialize_boxes, FourCc, Mp4Box, Stsc, Stsz};
use crate::{Error, Result};

/// A parsed MP4: the top-level box sequence plus the original bytes, kept so
/// sample extraction can follow absolute chunk offsets into `mdat`.
#[derive(Debug, Clone)]
pub struct Mp4File {
    pub boxes: Vec<Mp4Box>,
    data: ChunkedBytes,
}

impl Mp4File {
    pub fn parse(data: ChunkedBytes) -> Result<Mp4File> {
        let mut r = ByteReader::new(data.clone());
        let boxes = parse_boxes(&mut r)?;
        Ok(Mp4File { boxes, data })
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Mp4File> {
        let bytes = std::fs::read(path)?;
        Self::parse(ChunkedBytes::from_bytes(Bytes::from(bytes)))
    }

    /// Serialize the tree back to bytes.
    pub fn write(&self) -> ChunkedBytes {
        serialize_boxes(&self.boxes)
    }

    /// First top-level box with the given tag.
    pub fn top_level(&self, fourcc: FourCc) -> Option<&Mp4Box> {
        self.boxes.iter().find(|b| b.fourcc() == fourcc)
    }

    /// Walk a container path from the top level, e.g. `[MOOV, TRAK, MDIA]`.
    pub fn find_path(&self, path: &[FourCc]) -> Option<&Mp4Box> {
        let (first, rest) = path.split_first()?;
        let mut current = self.top_level(*first)?;
        for tag in rest {
            current = current.child(*tag)?;
        }
        Some(current)
    }
}

/// One video frame recovered from a sample table.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    /// Presentation time in timescale units, earliest frame at zero.
    pub timestamp: u64,
    pub duration: u32,
    /// The sample's NAL units, length prefixes stripped.
    pub nals: Vec<Bytes>,
    pub is_keyframe: bool,
}

/// Everything needed to re-encode or re-mux a video track.
#[derive(Debug, Clone)]
pub struct ExtractedVideo {
    pub sps: Bytes,
    pub pps: Bytes,
    pub width: u32,
    pub height: u32,
    pub timescale: u32,
    pub frames: Vec<MediaFrame>,
}

/// Pull the video track's samples out of a non-fragmented MP4.
///
/// Only constant-frame-rate files (single-entry `stts`) are handled. Key
/// frames come from `stss` when present, otherwise from each sample's slice
/// type.
pub fn extract_samples(file: &Mp4File) -> Result<ExtractedVideo> {
    let moov = file
        .top_level(FourCc::MOOV)
        .ok_or(Error::MissingBox("moov"))?;
    let (stbl, timescale) = find_video_stbl(moov)?;

    let Some(Mp4Box::Stsd(stsd)) = stbl.child(FourCc::STSD) else {
        return Err(Error::MissingBox("stsd"));
    };
    let avcc = stsd
        .avc1()
        .and_then(|a| a.avcc())
        .ok_or(Error::MissingBox("avcC"))?;
    let sps = avcc
        .sps
        .first()
        .ok_or_else(|| Error::invalid_mp4("avcC carries no SPS"))?
        .to_bytes();
    let pps = avcc
        .pps
        .first()
        .ok_or_else(|| Error::invalid_mp4("avcC carries no PPS"))?
        .to_bytes();
    let parsed_sps = Sps::parse_nal(&sps)?;
    let length_size = avcc.length_size();

    let Some(Mp4Box::Stts(stts)) = stbl.child(FourCc::STTS) else {
        return Err(Error::MissingBox("stts"));
    };
    if stts.entries.len() != 1 {
        return Err(Error::unsupported(format!(
            "variable frame rate ({} stts entries)",
            stts.entries.len()
        )));
    }
    let duration = stts.entries[0].1;

    let Some(Mp4Box::Stsz(stsz)) = stbl.child(FourCc::STSZ) else {
        return Err(Error::MissingBox("stsz"));
    };
    let Some(Mp4Box::Stsc(stsc)) = stbl.child(FourCc::STSC) else {
        return Err(Error::MissingBox("stsc"));
    };
    let chunk_offsets: Vec<u64> = match (stbl.child(FourCc::STCO), stbl.child(FourCc::CO64)) {
        (Some(Mp4Box::Stco(stco)), _) => stco.entries.iter().map(|&o| o as u64).collect(),
        (_, Some(Mp4Box::Co64(co64))) => co64.entries.clone(),
        _ => return Err(Error::MissingBox("stco")),
    };

    let offsets = sample_offsets(stsc, stsz, &chunk_offsets)?;
    let cts_offsets = expand_ctts(stbl, stsz.sample_count);
    let sync_samples = match stbl.child(FourCc::STSS) {
        Some(Mp4Box::Stss(stss)) => Some(stss.entries.clone()),
        _ => None,
    };
    debug!(
        samples = offsets.len(),
        timescale, duration, "extracting video samples"
    );

    let mut frames = Vec::with_capacity(offsets.len());
    for (index, &offset) in offsets.iter().enumerate() {
        let size = stsz
            .size_of(index as u32)
            .ok_or_else(|| Error::invalid_mp4("stsz shorter than its sample count"))? as usize;
        let start = usize::try_from(offset)
            .map_err(|_| Error::invalid_mp4("sample offset beyond addressable range"))?;
        if start + size > file.data.len() {
            return Err(Error::invalid_mp4(format!(
                "sample {index} at {offset}+{size} runs past end of file"
            )));
        }
        let payload = file.data.slice(start, start + size).to_bytes();
        let nals = split_length_prefixed(payload, length_size)?;

        let is_keyframe = match &sync_samples {
            Some(stss) => stss.contains(&(index as u32 + 1)),
            None => nals
                .iter()
                .any(|nal| matches!(identify_nal(nal), Ok(NalKind::Keyframe))),
        };
        let dts = index as i64 * duration as i64;
        let cts = cts_offsets.as_ref().map_or(0, |c| c[index]);
        frames.push((dts + cts, duration, nals, is_keyframe));
    }

    frames.sort_by_key(|&(ts, ..)| ts);
    let earliest = frames.first().map_or(0, |&(ts, ..)| ts);
    let frames = frames
        .into_iter()
        .map(|(ts, duration, nals, is_keyframe)| MediaFrame {
            timestamp: (ts - earliest) as u64,
            duration,
            nals,
            is_keyframe,
        })
        .collect();

    Ok(ExtractedVideo {
        sps,
        pps,
        width: parsed_sps.width(),
        height: parsed_sps.height(),
        timescale,
        frames,
    })
}

/// The sample table of the first track carrying an AVC sample entry, with
/// its media timescale.
fn find_video_stbl(moov: &Mp4Box) -> Result<(&Mp4Box, u32)> {
    for trak in moov.children().into_iter().flatten() {
        if trak.fourcc() != FourCc::TRAK {
            continue;
        }
        let Some(mdia) = trak.child(FourCc::MDIA) else {
            continue;
        };
        let Some(stbl) = mdia
            .child(FourCc::MINF)
            .and_then(|minf| minf.child(FourCc::STBL))
        else {
            continue;
        };
        let has_avc1 = matches!(
            stbl.child(FourCc::STSD),
            Some(Mp4Box::Stsd(stsd)) if stsd.avc1().is_some()
        );
        if !has_avc1 {
            continue;
        }
        let Some(Mp4Box::Mdhd(mdhd)) = mdia.child(FourCc::MDHD) else {
            return Err(Error::MissingBox("mdhd"));
        };
        return Ok((stbl, mdhd.timescale));
    }
    Err(Error::MissingBox("trak with avc1"))
}

/// Per-sample absolute file offsets from the chunk-run tables. Each `stsc`
/// entry applies from its `first_chunk` up to the next entry's.
fn sample_offsets(stsc: &Stsc, stsz: &Stsz, chunk_offsets: &[u64]) -> Result<Vec<u64>> {
    let sample_count = stsz.sample_count as usize;
    let mut offsets = Vec::with_capacity(sample_count);
    let mut sample = 0u32;

    for (i, entry) in stsc.entries.iter().enumerate() {
        let last_chunk = stsc
            .entries
            .get(i + 1)
            .map_or(chunk_offsets.len() as u32, |next| next.first_chunk - 1);
        if entry.first_chunk == 0 || entry.first_chunk > last_chunk + 1 {
            return Err(Error::invalid_mp4("stsc chunk runs out of order"));
        }
        for chunk in entry.first_chunk..=last_chunk {
            let base = *chunk_offsets
                .get(chunk as usize - 1)
                .ok_or_else(|| Error::invalid_mp4("stsc references a missing chunk offset"))?;
            let mut within = 0u64;
            for _ in 0..entry.samples_per_chunk {
                if offsets.len() == sample_count {
                    return Ok(offsets);
                }
                offsets.push(base + within);
                within += stsz
                    .size_of(sample)
                    .ok_or_else(|| Error::invalid_mp4("stsz shorter than its sample count"))?
                    as u64;
                sample += 1;
            }
        }
    }

    if offsets.len() != sample_count {
        return Err(Error::invalid_mp4(format!(
            "chunk tables cover {} of {} samples",
            offsets.len(),
            sample_count
        )));
    }
    Ok(offsets)
}

/// Expand `ctts` runs to one composition offset per sample, if present.
fn expand_ctts(stbl: &Mp4Box, sample_count: u32) -> Option<Vec<i64>> {
    let Some(Mp4Box::Ctts(ctts)) = stbl.child(FourCc::CTTS) else {
        return None;
    };
    let mut out = Vec::with_capacity(sample_count as usize);
    for &(count, offset) in &ctts.entries {
        for _ in 0..count {
            out.push(offset);
        }
    }
    out.resize(sample_count as usize, 0);
    Some(out)
}
