//! tf-core: shared types, IDs, errors, media formats, options, and configuration.
//!
//! This crate is the foundational dependency for all other tf-* crates,
//! providing the unified error type, typed identifiers, the immutable
//! [`MediaFormat`] value type, caller-facing [`TransformationOptions`], and
//! the orchestrator's [`config::TransformerConfig`].

pub mod config;
pub mod error;
pub mod frame;
pub mod ids;
pub mod media;
pub mod options;

// Re-export the most commonly used items at the crate root.
pub use frame::{Frame, FrameFilter, SharedFilter};
pub use error::{Error, ErrorCategory, Result, SourceFormatError, Stage, TargetConstructionError};
pub use ids::*;
pub use media::*;
pub use options::{
    MediaRange, TransformationOptions, TransformationOptionsBuilder, GRANULARITY_DEFAULT,
    GRANULARITY_NONE,
};
