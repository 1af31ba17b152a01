//! Client-facing job event callbacks.

use std::sync::Arc;

use tf_core::{Error, RequestId};

use crate::info::TrackTransformationInfo;

/// Receives the lifecycle events of transformation requests.
///
/// For one request the events arrive in order: at most one `on_started`,
/// any number of `on_progress` with non-decreasing values, then exactly one
/// of `on_completed`, `on_cancelled`, or `on_error`.
///
/// Every method has an empty default so implementors only handle what they
/// care about.
pub trait TransformationListener: Send + Sync {
    fn on_started(&self, _request_id: &RequestId) {}

    /// `progress` is in `[0, 1]`.
    fn on_progress(&self, _request_id: &RequestId, _progress: f32) {}

    fn on_completed(&self, _request_id: &RequestId, _info: &[TrackTransformationInfo]) {}

    fn on_cancelled(&self, _request_id: &RequestId, _info: &[TrackTransformationInfo]) {}

    /// The error is shared so it can be handed across threads.
    fn on_error(
        &self,
        _request_id: &RequestId,
        _error: &Arc<Error>,
        _info: &[TrackTransformationInfo],
    ) {
    }
}

/// Listener that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl TransformationListener for NoopListener {}
