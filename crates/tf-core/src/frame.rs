//! Sample/frame buffers and the filter seam applied by renderers.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::Result;
use crate::media::MediaFormat;

/// One unit of media data moving through a track pipeline: an encoded
/// sample read from a source, a decoded frame, or an encoded output sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Bytes,
    /// Presentation timestamp in microseconds.
    pub presentation_time_us: i64,
    pub key_frame: bool,
}

impl Frame {
    pub fn new(data: impl Into<Bytes>, presentation_time_us: i64) -> Self {
        Self {
            data: data.into(),
            presentation_time_us,
            key_frame: false,
        }
    }

    #[must_use]
    pub fn with_key_frame(mut self, key_frame: bool) -> Self {
        self.key_frame = key_frame;
        self
    }

    #[must_use]
    pub fn with_presentation_time(mut self, presentation_time_us: i64) -> Self {
        self.presentation_time_us = presentation_time_us;
        self
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A single step of a video or audio filter chain.
///
/// Filters are shared between the options a caller builds and the renderer
/// that applies them, so `apply` takes `&self`; stateful filters use
/// interior mutability.
pub trait FrameFilter: Send + Sync {
    /// A short, human-readable name (e.g. "watermark").
    fn name(&self) -> &str;

    /// Prepare for frames of the given format. Default is a no-op.
    fn init(&self, _format: &MediaFormat) -> Result<()> {
        Ok(())
    }

    /// Transform one decoded frame.
    fn apply(&self, frame: Frame) -> Result<Frame>;

    /// Release any resources held by the filter. Default is a no-op.
    fn release(&self) {}
}

impl fmt::Debug for dyn FrameFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameFilter")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}

/// Reference-counted filter handle as stored in option lists.
pub type SharedFilter = Arc<dyn FrameFilter>;
