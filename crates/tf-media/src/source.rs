//! The [`MediaSource`] trait: demuxed access to the tracks of an input
//! container.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tf_core::{Frame, MediaFormat, MediaRange, Result};

/// A readable, seekable multi-track container.
///
/// The cursor model follows a demuxer: the source points at one sample at a
/// time (the earliest remaining sample of any selected track), which can be
/// inspected with [`sample_track_index`](MediaSource::sample_track_index) and
/// [`read_sample`](MediaSource::read_sample), then skipped with
/// [`advance`](MediaSource::advance).
pub trait MediaSource: Send {
    fn track_count(&self) -> usize;

    /// Format of a track as reported by the container.
    fn track_format(&self, track: usize) -> Result<MediaFormat>;

    /// Include a track in the sample cursor.
    fn select_track(&mut self, track: usize) -> Result<()>;

    /// Move the cursor to the sync sample at or before `position_us`.
    fn seek_to(&mut self, position_us: i64) -> Result<()>;

    /// Track of the sample under the cursor, `None` at end of stream.
    fn sample_track_index(&self) -> Option<usize>;

    /// Copy out the sample under the cursor, `None` at end of stream.
    fn read_sample(&mut self) -> Result<Option<Frame>>;

    /// Timestamp of the sample under the cursor.
    fn sample_time_us(&self) -> Option<i64>;

    /// Step to the next sample. Returns `false` once the end is reached.
    fn advance(&mut self) -> bool;

    /// Total size in bytes, if known.
    fn size(&self) -> Option<u64>;

    /// Portion of the source the caller asked to use.
    fn selection(&self) -> MediaRange {
        MediaRange::full()
    }

    /// Rotation of the video in degrees.
    fn orientation_hint(&self) -> i32 {
        0
    }

    fn release(&mut self);
}

/// Shared, lockable handle to a source used by every track of one request.
#[derive(Clone)]
pub struct SourceHandle(Arc<Mutex<Box<dyn MediaSource>>>);

impl SourceHandle {
    pub fn new(source: impl MediaSource + 'static) -> Self {
        Self::from_boxed(Box::new(source))
    }

    pub fn from_boxed(source: Box<dyn MediaSource>) -> Self {
        Self(Arc::new(Mutex::new(source)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<dyn MediaSource>> {
        self.0.lock()
    }

    /// Whether both handles refer to the same source.
    pub fn same_as(&self, other: &SourceHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn track_format(&self, track: usize) -> Result<MediaFormat> {
        self.lock().track_format(track)
    }
}

impl fmt::Debug for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceHandle").finish_non_exhaustive()
    }
}
