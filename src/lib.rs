//! Trackforge - multi-track media transformation orchestrator
//!
//! A [`MediaTransformer`] takes requests to transform the tracks of a media
//! source into a target container. For every request it negotiates each
//! track's target format, queues a job on a single worker thread, and
//! reports start, progress and exactly one terminal outcome to a
//! [`TransformationListener`], optionally redelivered on a caller-chosen
//! thread through a [`CallbackLoop`].
//!
//! The building blocks live in the member crates and are re-exported here:
//! [`tf_core`] for formats, options, errors and configuration,
//! [`tf_media`] for the source / target / codec capabilities and their
//! in-memory variants, and [`tf_pipeline`] for negotiation and the job loop.

pub mod logging;
pub mod marshal;
pub mod registry;
pub mod transformer;
pub mod worker;

pub use marshal::{callback_channel, CallbackContext, CallbackLoop};
pub use registry::RequestRegistry;
pub use transformer::{MediaTransformer, TransformRequest};

pub use tf_core::config::TransformerConfig;
pub use tf_core::{
    mime, Error, ErrorCategory, MediaFormat, MediaRange, RequestId, Result, TransformationOptions,
    GRANULARITY_DEFAULT, GRANULARITY_NONE,
};
pub use tf_pipeline::{TrackTransform, TrackTransformationInfo, TransformationListener};

pub use tf_core;
pub use tf_media;
pub use tf_pipeline;
