use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fragmux")]
#[command(author, version, about = "Fragmented MP4 muxer and inspector for H.264 streams")]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the NAL units of an Annex-B elementary stream
    Nals {
        /// Annex-B .h264 file to inspect
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Mux an Annex-B elementary stream into a fragmented MP4
    Mux {
        /// Annex-B .h264 input file
        #[arg(required = true)]
        input: PathBuf,

        /// Output .mp4 path
        #[arg(required = true)]
        output: PathBuf,

        /// Frames per second
        #[arg(long, default_value = "30")]
        fps: u32,

        /// Media timescale in units per second
        #[arg(long, default_value = "90000")]
        timescale: u32,
    },

    /// Dump a parsed MP4 box tree as JSON
    Dump {
        /// MP4 file to parse
        #[arg(required = true)]
        file: PathBuf,
    },

    /// Extract raw NAL units out of an MP4 into an Annex-B stream
    Extract {
        /// MP4 input file
        #[arg(required = true)]
        input: PathBuf,

        /// Output .h264 path
        #[arg(required = true)]
        output: PathBuf,
    },

    /// Byte-compare two files with contextual diagnostics
    Diff {
        /// First file
        #[arg(required = true)]
        left: PathBuf,

        /// Second file
        #[arg(required = true)]
        right: PathBuf,

        /// Bytes of hex context to print around a mismatch
        #[arg(long, default_value = "16")]
        context: usize,
    },

    /// Display version information
    Version,
}
