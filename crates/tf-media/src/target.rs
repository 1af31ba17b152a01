//! The [`MediaTarget`] trait: muxing samples into an output container.

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tf_core::{Container, Frame, MediaFormat, Result};

/// An output container accepting one sample stream per target track.
pub trait MediaTarget: Send {
    /// Declare or change the format of a target track. Called before the
    /// first sample of that track is written.
    fn set_track_format(&mut self, target_track: usize, format: &MediaFormat) -> Result<()>;

    fn write_sample(&mut self, target_track: usize, sample: &Frame) -> Result<()>;

    /// Rotation in degrees recorded in the container.
    fn set_orientation_hint(&mut self, degrees: i32);

    /// Finalize the container. Must tolerate being called on a target that
    /// received no samples.
    fn release(&mut self) -> Result<()>;
}

/// Opens the output container for the high-level transform.
pub trait TargetOpener: Send + Sync {
    /// Open a target expecting `track_count` tracks.
    ///
    /// # Errors
    ///
    /// Failures are reported to the caller as target construction errors.
    fn open(&self, track_count: usize, container: Container) -> Result<Box<dyn MediaTarget>>;
}

/// Shared, lockable handle to a target used by every track of one request.
#[derive(Clone)]
pub struct TargetHandle(Arc<Mutex<Box<dyn MediaTarget>>>);

impl TargetHandle {
    pub fn new(target: impl MediaTarget + 'static) -> Self {
        Self::from_boxed(Box::new(target))
    }

    pub fn from_boxed(target: Box<dyn MediaTarget>) -> Self {
        Self(Arc::new(Mutex::new(target)))
    }

    pub fn lock(&self) -> MutexGuard<'_, Box<dyn MediaTarget>> {
        self.0.lock()
    }

    /// Whether both handles refer to the same target.
    pub fn same_as(&self, other: &TargetHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for TargetHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetHandle").finish_non_exhaustive()
    }
}
