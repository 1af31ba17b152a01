//! Caller-facing transformation options.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::frame::SharedFilter;

/// Report progress after every processed unit.
pub const GRANULARITY_NONE: u32 = 0;
/// Default number of progress reports per job.
pub const GRANULARITY_DEFAULT: u32 = 100;

/// Half-open window `[start_us, end_us)` of the source to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaRange {
    pub start_us: i64,
    pub end_us: i64,
}

impl MediaRange {
    /// Build a range, rejecting negative or inverted bounds.
    pub fn new(start_us: i64, end_us: i64) -> Result<Self> {
        if start_us < 0 || end_us < 0 {
            return Err(Error::Validation(format!(
                "media range bounds must be non-negative, got [{start_us}, {end_us})"
            )));
        }
        if start_us > end_us {
            return Err(Error::Validation(format!(
                "media range start {start_us} is after end {end_us}"
            )));
        }
        Ok(Self { start_us, end_us })
    }

    /// The whole source.
    pub fn full() -> Self {
        Self {
            start_us: 0,
            end_us: i64::MAX,
        }
    }

    pub fn is_full(&self) -> bool {
        self.start_us == 0 && self.end_us == i64::MAX
    }

    pub fn contains(&self, time_us: i64) -> bool {
        time_us >= self.start_us && time_us < self.end_us
    }

    /// Length of the selection for a track of the given duration.
    pub fn clamp_duration(&self, duration_us: i64) -> i64 {
        (self.end_us.min(duration_us) - self.start_us).max(0)
    }
}

impl Default for MediaRange {
    fn default() -> Self {
        Self::full()
    }
}

/// Immutable transformation options. Build with
/// [`TransformationOptions::builder`].
#[derive(Debug, Clone)]
pub struct TransformationOptions {
    /// Progress granularity: [`GRANULARITY_NONE`] for per-unit reporting,
    /// `N` for at most `N` evenly spaced reports.
    pub granularity: u32,
    /// Video filters, in the order they are applied.
    pub video_filters: Vec<SharedFilter>,
    /// Audio filters, in the order they are applied.
    pub audio_filters: Vec<SharedFilter>,
    pub source_range: MediaRange,
    pub remove_audio: bool,
    /// Drop tracks that are neither audio nor video.
    pub remove_metadata: bool,
    /// Source size in bytes when the source cannot report it (network).
    pub source_size: Option<u64>,
    /// The source is streamed; its self-reported size is not used for
    /// progress, only `source_size`.
    pub network_source: bool,
    pub max_height: Option<u32>,
    pub max_width: Option<u32>,
}

impl TransformationOptions {
    pub fn builder() -> TransformationOptionsBuilder {
        TransformationOptionsBuilder::default()
    }
}

impl Default for TransformationOptions {
    fn default() -> Self {
        TransformationOptionsBuilder::default().build()
    }
}

/// Builder for [`TransformationOptions`].
#[derive(Debug, Clone)]
pub struct TransformationOptionsBuilder {
    granularity: u32,
    video_filters: Vec<SharedFilter>,
    audio_filters: Vec<SharedFilter>,
    source_range: MediaRange,
    remove_audio: bool,
    remove_metadata: bool,
    source_size: Option<u64>,
    network_source: bool,
    max_height: Option<u32>,
    max_width: Option<u32>,
}

impl Default for TransformationOptionsBuilder {
    fn default() -> Self {
        Self {
            granularity: GRANULARITY_DEFAULT,
            video_filters: Vec::new(),
            audio_filters: Vec::new(),
            source_range: MediaRange::full(),
            remove_audio: false,
            remove_metadata: false,
            source_size: None,
            network_source: false,
            max_height: None,
            max_width: None,
        }
    }
}

impl TransformationOptionsBuilder {
    pub fn granularity(mut self, granularity: u32) -> Self {
        self.granularity = granularity;
        self
    }

    pub fn video_filters(mut self, filters: Vec<SharedFilter>) -> Self {
        self.video_filters = filters;
        self
    }

    pub fn audio_filters(mut self, filters: Vec<SharedFilter>) -> Self {
        self.audio_filters = filters;
        self
    }

    pub fn source_range(mut self, range: MediaRange) -> Self {
        self.source_range = range;
        self
    }

    pub fn remove_audio(mut self, remove: bool) -> Self {
        self.remove_audio = remove;
        self
    }

    pub fn remove_metadata(mut self, remove: bool) -> Self {
        self.remove_metadata = remove;
        self
    }

    /// Mark the source as network-backed with a known size in bytes.
    pub fn network_source(mut self, source_size: u64) -> Self {
        self.network_source = true;
        self.source_size = Some(source_size);
        self
    }

    /// Reject sources whose video is taller or wider than these limits.
    pub fn dimension_restriction(mut self, max_height: u32, max_width: u32) -> Self {
        self.max_height = (max_height > 0).then_some(max_height);
        self.max_width = (max_width > 0).then_some(max_width);
        self
    }

    pub fn max_height(mut self, max_height: u32) -> Self {
        self.max_height = (max_height > 0).then_some(max_height);
        self
    }

    pub fn max_width(mut self, max_width: u32) -> Self {
        self.max_width = (max_width > 0).then_some(max_width);
        self
    }

    pub fn build(self) -> TransformationOptions {
        TransformationOptions {
            granularity: self.granularity,
            video_filters: self.video_filters,
            audio_filters: self.audio_filters,
            source_range: self.source_range,
            remove_audio: self.remove_audio,
            remove_metadata: self.remove_metadata,
            source_size: self.source_size,
            network_source: self.network_source,
            max_height: self.max_height,
            max_width: self.max_width,
        }
    }
}
