//! Unified error type for trackforge.
//!
//! All crates funnel their failures into [`Error`]. [`Error::category`] maps
//! each failure onto the taxonomy callers use to decide recovery policy:
//! source problems and target problems are reported before a job exists,
//! contract violations are returned directly to the caller, and runtime
//! failures end a running job.

use std::fmt;

use crate::ids::RequestId;

/// Why a source could not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceFormatError {
    /// A track carries no MIME type.
    #[error("track {track} has no MIME type")]
    UnknownMimeType {
        /// Source track index.
        track: usize,
    },

    /// A video dimension is larger than the caller's restriction.
    #[error("video {dimension} {actual} exceeds restriction of {limit}")]
    DimensionExceeded {
        /// "width" or "height".
        dimension: &'static str,
        /// Dimension found in the source.
        actual: u32,
        /// Caller-supplied maximum.
        limit: u32,
    },

    /// A track lacks an attribute needed to synthesize a target format.
    #[error("track {track} is missing {attribute}")]
    MissingAttribute {
        /// Source track index.
        track: usize,
        /// Name of the missing attribute.
        attribute: &'static str,
    },

    /// The source could not be opened or read.
    #[error("data source: {0}")]
    DataSource(String),
}

/// Why a target could not be constructed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TargetConstructionError {
    /// Track selection removed every track.
    #[error("no output tracks left")]
    NoOutputTracks,

    /// The target container could not be opened.
    #[error("cannot open target: {0}")]
    Open(String),
}

/// Pipeline stage in which a runtime failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Setup,
    Read,
    Decode,
    Render,
    Encode,
    Write,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Read => write!(f, "read"),
            Self::Decode => write!(f, "decode"),
            Self::Render => write!(f, "render"),
            Self::Encode => write!(f, "encode"),
            Self::Write => write!(f, "write"),
        }
    }
}

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Unreadable or unusable source; reported before scheduling.
    SourceFormat,
    /// Target could not be built; reported before scheduling.
    TargetConstruction,
    /// Caller broke an API precondition.
    Contract,
    /// A running job failed.
    Runtime,
}

/// Unified error type covering all failure modes in trackforge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The source format is unknown or violates a restriction.
    #[error("Source format error: {0}")]
    SourceFormat(#[from] SourceFormatError),

    /// The target container could not be built.
    #[error("Target construction error: {0}")]
    TargetConstruction(#[from] TargetConstructionError),

    /// A request with this id is already registered and not yet finished.
    #[error("Request with id {0} already exists")]
    DuplicateRequest(RequestId),

    /// The transformer was released and accepts no more work.
    #[error("Transformer has been released")]
    Released,

    /// A pipeline stage failed while a job was running.
    #[error("Pipeline error [{stage} track {track}]: {message}")]
    Pipeline {
        /// The stage that failed.
        stage: Stage,
        /// Source track index being processed.
        track: usize,
        /// Human-readable error description.
        message: String,
    },

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Configuration or argument data failed validation.
    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    /// Classify this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::SourceFormat(_) => ErrorCategory::SourceFormat,
            Error::TargetConstruction(_) => ErrorCategory::TargetConstruction,
            Error::DuplicateRequest(_) | Error::Released | Error::Validation(_) => {
                ErrorCategory::Contract
            }
            Error::Pipeline { .. } | Error::Io { .. } => ErrorCategory::Runtime,
        }
    }

    /// Convenience constructor for [`Error::Pipeline`].
    pub fn pipeline(stage: Stage, track: usize, message: impl fmt::Display) -> Self {
        Error::Pipeline {
            stage,
            track,
            message: message.to_string(),
        }
    }

    /// Convenience constructor for a [`SourceFormatError::DataSource`] failure.
    pub fn data_source(message: impl Into<String>) -> Self {
        Error::SourceFormat(SourceFormatError::DataSource(message.into()))
    }

    /// Convenience constructor for a [`TargetConstructionError::Open`] failure.
    pub fn target_open(message: impl Into<String>) -> Self {
        Error::TargetConstruction(TargetConstructionError::Open(message.into()))
    }

    /// Re-tag an error raised by a collaborator with the stage and track it
    /// occurred in. Errors that already carry a stage are left alone.
    pub fn at_stage(self, stage: Stage, track: usize) -> Self {
        match self {
            Error::Pipeline { .. } => self,
            other => Error::pipeline(stage, track, other),
        }
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
