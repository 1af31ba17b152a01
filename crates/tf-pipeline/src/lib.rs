//! # tf-pipeline
//!
//! Per-track transformation planning and execution.
//!
//! This crate provides:
//!
//! - **[`selection`]** -- which source tracks make it into the target.
//! - **[`FormatNegotiator`]** -- derives each track's target format from the
//!   source format, the caller's request, active filters, and audio/video
//!   codec compatibility.
//! - **[`TrackTransform`]** -- the immutable source-track to target-track
//!   binding with its decoder / renderer / encoder, built with
//!   [`TrackTransformBuilder`].
//! - **[`TransformationJob`]** -- drains every track through its pipeline on
//!   the calling thread, aggregates progress, honours cancellation, and
//!   reports exactly one terminal outcome to a [`TransformationListener`].

pub mod info;
pub mod job;
pub mod listener;
pub mod negotiate;
pub mod progress;
pub mod selection;
pub mod transform;

// Re-export key types at the crate root.
pub use info::TrackTransformationInfo;
pub use job::{JobOutcome, TransformationJob};
pub use listener::{NoopListener, TransformationListener};
pub use negotiate::{apply_formats, peer_video_mime, FormatNegotiator};
pub use progress::{GranularityGate, ProgressTracker};
pub use selection::{count_included_tracks, should_include_track};
pub use transform::{TrackTransform, TrackTransformBuilder};
