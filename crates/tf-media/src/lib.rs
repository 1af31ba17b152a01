//! # tf-media
//!
//! Capability traits for the collaborators a transformation drives, and
//! in-memory implementations of each.
//!
//! - **[`MediaSource`]** / **[`MediaTarget`]** -- container demuxing and
//!   muxing, shared between the tracks of one request through
//!   [`SourceHandle`] and [`TargetHandle`].
//! - **[`Decoder`]** / **[`Encoder`]** -- codec instances, created per track
//!   by a [`CodecProvider`].
//! - **[`Renderer`]** -- the optional stage between decoder and encoder;
//!   [`FilterChainRenderer`] applies an ordered list of frame filters.
//! - **[`BitrateEstimator`]** -- video bitrate and output size estimation.
//! - **[`memory`]** -- in-memory source, target, and identity codecs.

pub mod codec;
pub mod estimate;
pub mod memory;
pub mod render;
pub mod source;
pub mod target;

// Re-export key types at the crate root.
pub use codec::{CodecProvider, Decoder, Encoder};
pub use estimate::{BitrateEstimator, DefaultEstimator, TrackEstimate};
pub use render::{FilterChainRenderer, Renderer};
pub use source::{MediaSource, SourceHandle};
pub use target::{MediaTarget, TargetHandle, TargetOpener};
