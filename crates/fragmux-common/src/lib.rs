//! Fragmux-Common: chunked byte sequences and bit-level primitives
//!
//! This crate holds the low-level pieces shared by the H.264 layer and the
//! ISO-BMFF layer:
//!
//! - `buffer` - `ChunkedBytes`, an immutable concatenation-friendly view over
//!   refcounted byte chunks, with bit-level construction
//! - `bits` - MSB-first bit reader/writer with Exp-Golomb codes
//! - `reader` - byte-level reader with container end tracking

pub mod bits;
pub mod buffer;
pub mod error;
pub mod reader;

pub use bits::{BitReader, BitWriter};
pub use buffer::{BitChunk, ChunkedBytes};
pub use error::{Error, Result};
pub use reader::ByteReader;
