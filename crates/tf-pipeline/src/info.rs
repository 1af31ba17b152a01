//! Per-track statistics reported with every terminal callback.

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tf_core::MediaFormat;

/// What happened to one track during a job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackTransformationInfo {
    pub source_track: usize,
    pub target_track: usize,
    pub source_format: Option<MediaFormat>,
    /// `None` for a pass-through track.
    pub target_format: Option<MediaFormat>,
    pub decoder: Option<String>,
    pub encoder: Option<String>,
    /// When the worker started on this track; `None` if it never did.
    pub started_at: Option<DateTime<Utc>>,
    /// Wall-clock time spent on this track.
    pub elapsed_ms: u64,
    /// Span of media written, in microseconds.
    pub media_duration_us: i64,
    pub samples: u64,
    pub bytes_written: u64,
}

impl TrackTransformationInfo {
    /// Info for a track that has not been processed yet.
    pub fn new(source_track: usize, target_track: usize) -> Self {
        Self {
            source_track,
            target_track,
            source_format: None,
            target_format: None,
            decoder: None,
            encoder: None,
            started_at: None,
            elapsed_ms: 0,
            media_duration_us: 0,
            samples: 0,
            bytes_written: 0,
        }
    }

    pub fn is_pass_through(&self) -> bool {
        self.target_format.is_none()
    }
}

/// Accumulates one track's statistics while the job runs.
#[derive(Debug)]
pub(crate) struct TrackStats {
    pub(crate) info: TrackTransformationInfo,
    started: Option<Instant>,
    first_pts: Option<i64>,
    last_pts: Option<i64>,
}

impl TrackStats {
    pub(crate) fn new(info: TrackTransformationInfo) -> Self {
        Self {
            info,
            started: None,
            first_pts: None,
            last_pts: None,
        }
    }

    pub(crate) fn start(&mut self) {
        self.started = Some(Instant::now());
        self.info.started_at = Some(Utc::now());
    }

    pub(crate) fn record_write(&mut self, presentation_time_us: i64, bytes: usize) {
        self.info.samples += 1;
        self.info.bytes_written += bytes as u64;
        self.first_pts = Some(self.first_pts.map_or(presentation_time_us, |p| p.min(presentation_time_us)));
        self.last_pts = Some(self.last_pts.map_or(presentation_time_us, |p| p.max(presentation_time_us)));
        self.info.media_duration_us = match (self.first_pts, self.last_pts) {
            (Some(first), Some(last)) => last - first,
            _ => 0,
        };
    }

    /// Freeze the elapsed time.
    pub(crate) fn stop(&mut self) {
        if let Some(started) = self.started.take() {
            self.info.elapsed_ms = started.elapsed().as_millis() as u64;
        }
    }

    pub(crate) fn into_info(mut self) -> TrackTransformationInfo {
        self.stop();
        self.info
    }
}
