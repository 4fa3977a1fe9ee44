mod cli;
mod dump;

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use clap::Parser;
use cli::{Cli, Commands};
use fragmux_h264::{
    identify_nal, nal_slice_type, split_annex_b, to_annex_b, NalHeader, NalUnitType,
};
use fragmux_media::{extract_samples, h264_to_mp4, Mp4File};

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "fragmux=trace,fragmux_media=trace,fragmux_h264=trace,fragmux_common=debug".to_string()
        } else {
            "fragmux=info,fragmux_media=warn,fragmux_h264=warn".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Nals { file } => list_nals(&file),
        Commands::Mux {
            input,
            output,
            fps,
            timescale,
        } => mux(&input, &output, fps, timescale),
        Commands::Dump { file } => dump_file(&file),
        Commands::Extract { input, output } => extract(&input, &output),
        Commands::Diff {
            left,
            right,
            context,
        } => diff(&left, &right, context),
        Commands::Version => {
            println!("fragmux {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn read_bytes(path: &Path) -> Result<Bytes> {
    let data = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(Bytes::from(data))
}

fn list_nals(file: &Path) -> Result<()> {
    let nals = split_annex_b(read_bytes(file)?)?;
    for (i, nal) in nals.iter().enumerate() {
        let header = NalHeader::parse(nal)?;
        let kind = identify_nal(nal)?;
        let slice_type = match header.unit_type {
            NalUnitType::Slice | NalUnitType::IdrSlice => nal_slice_type(nal)
                .map(|t| format!(" slice_type={t}"))
                .unwrap_or_default(),
            _ => String::new(),
        };
        println!(
            "#{i:<4} {kind:<9} size={:<8} ref_idc={}{slice_type}",
            nal.len(),
            header.ref_idc
        );
    }
    println!("{} NAL units", nals.len());
    Ok(())
}

fn mux(input: &Path, output: &Path, fps: u32, timescale: u32) -> Result<()> {
    if fps == 0 || timescale % fps != 0 {
        bail!("timescale {timescale} is not divisible by fps {fps}");
    }
    let muxed = h264_to_mp4(read_bytes(input)?, timescale / fps, timescale)?;
    let mut out =
        fs::File::create(output).with_context(|| format!("creating {}", output.display()))?;
    muxed.data.write_to(&mut out)?;
    println!(
        "{}: {} samples, {}x{}, {}, {} bytes",
        output.display(),
        muxed.sample_count,
        muxed.width,
        muxed.height,
        muxed.codec,
        muxed.data.len()
    );
    Ok(())
}

fn dump_file(file: &Path) -> Result<()> {
    let mp4 = Mp4File::open(file)?;
    let tree = dump::file_to_json(&mp4.boxes);
    println!("{}", serde_json::to_string_pretty(&tree)?);
    Ok(())
}

fn extract(input: &Path, output: &Path) -> Result<()> {
    let mp4 = Mp4File::open(input)?;
    let video = extract_samples(&mp4)?;

    let mut nals = vec![video.sps.clone(), video.pps.clone()];
    for frame in &video.frames {
        nals.extend(frame.nals.iter().cloned());
    }
    let stream = to_annex_b(&nals);
    let mut out =
        fs::File::create(output).with_context(|| format!("creating {}", output.display()))?;
    stream.write_to(&mut out)?;

    let keyframes = video.frames.iter().filter(|f| f.is_keyframe).count();
    println!(
        "{}: {} frames ({} key), {}x{}, timescale {}",
        output.display(),
        video.frames.len(),
        keyframes,
        video.width,
        video.height,
        video.timescale
    );
    Ok(())
}

fn diff(left: &Path, right: &Path, context: usize) -> Result<()> {
    let a = read_bytes(left)?;
    let b = read_bytes(right)?;
    if a == b {
        println!("files are identical ({} bytes)", a.len());
        return Ok(());
    }

    let mismatch = a
        .iter()
        .zip(b.iter())
        .position(|(x, y)| x != y)
        .unwrap_or_else(|| a.len().min(b.len()));
    println!(
        "files differ: {} is {} bytes, {} is {} bytes",
        left.display(),
        a.len(),
        right.display(),
        b.len()
    );
    println!("first mismatch at offset {mismatch} (0x{mismatch:X})");
    println!("  left:  {}", hex_window(&a, mismatch, context));
    println!("  right: {}", hex_window(&b, mismatch, context));
    bail!("files differ at offset {mismatch}");
}

/// Hex bytes around `offset`, the mismatching byte bracketed.
fn hex_window(data: &[u8], offset: usize, context: usize) -> String {
    let start = offset.saturating_sub(context);
    let end = (offset + context + 1).min(data.len());
    let mut out = String::new();
    for (i, byte) in data[start..end].iter().enumerate() {
        let pos = start + i;
        if pos == offset {
            out.push_str(&format!("[{byte:02X}] "));
        } else {
            out.push_str(&format!("{byte:02X} "));
        }
    }
    if out.is_empty() {
        out.push_str("(past end of file)");
    }
    out.trim_end().to_string()
}
