//! Transport seams and visual framing.
//!
//! The engine sees two interchangeable adapters: a visual byte-frame
//! channel and an optional backpressured binary channel. Visual framing
//! slices blocks to the per-frame capacity and reassembles them on the
//! far side.

pub mod adapter;
pub mod visual;

pub use adapter::{BinaryAdapter, ChannelBinaryAdapter, ChannelVisualAdapter, VisualAdapter};
pub use visual::{split_block, ChunkReassembler, VisualChunk, VisualError};
