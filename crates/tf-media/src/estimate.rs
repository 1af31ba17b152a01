//! Bitrate and output size estimation.

use tf_core::config::EstimationConfig;
use tf_core::{MediaFormat, MediaRange, TrackKind};

use crate::source::MediaSource;

/// Resolution assumed when a video track reports no dimensions.
const FALLBACK_WIDTH: u32 = 1280;
const FALLBACK_HEIGHT: u32 = 720;
const FALLBACK_FRAME_RATE: f32 = 30.0;

/// One track's contribution to a size estimate.
#[derive(Debug, Clone, Copy)]
pub struct TrackEstimate<'a> {
    pub source: &'a MediaFormat,
    /// `None` when the track is copied as is.
    pub target: Option<&'a MediaFormat>,
}

/// Estimates bitrates and output sizes for negotiation and for callers.
pub trait BitrateEstimator: Send + Sync {
    /// Bits per second a transcoded copy of a video track should use.
    fn estimate_video_track_bitrate(&self, source: &dyn MediaSource, track: usize) -> u32;

    /// Estimated output size in bytes, or `-1` when no track carries enough
    /// information.
    fn estimate_target_file_size(&self, tracks: &[TrackEstimate<'_>], selection: MediaRange)
        -> i64;
}

/// Estimator using source bitrates when present and falling back to size
/// over duration, then to a bits-per-pixel model.
#[derive(Debug, Clone, Default)]
pub struct DefaultEstimator {
    config: EstimationConfig,
}

impl DefaultEstimator {
    pub fn new(config: EstimationConfig) -> Self {
        Self { config }
    }

    fn resolution_bitrate(&self, format: &MediaFormat) -> u32 {
        let width = format.width.unwrap_or(FALLBACK_WIDTH) as f64;
        let height = format.height.unwrap_or(FALLBACK_HEIGHT) as f64;
        let frame_rate = format.frame_rate.unwrap_or(FALLBACK_FRAME_RATE) as f64;
        let bits = width * height * frame_rate * self.config.bits_per_pixel as f64;
        bits.round().clamp(1.0, u32::MAX as f64) as u32
    }

    /// Bitrate left for the video track once every other track's bitrate is
    /// subtracted from the container's average bitrate.
    fn bitrate_from_size(&self, source: &dyn MediaSource, track: usize) -> Option<u32> {
        let size = source.size().filter(|s| *s > 0)?;
        let mut duration_us: i64 = 0;
        let mut other_bitrates: u64 = 0;
        for index in 0..source.track_count() {
            let Ok(format) = source.track_format(index) else {
                continue;
            };
            if let Some(d) = format.duration_us {
                duration_us = duration_us.max(d);
            }
            if index == track {
                continue;
            }
            match format.kind() {
                Some(TrackKind::Audio) => {
                    other_bitrates += u64::from(
                        format.bitrate.unwrap_or(self.config.fallback_audio_bitrate),
                    );
                }
                Some(_) => other_bitrates += u64::from(format.bitrate.unwrap_or(0)),
                None => {}
            }
        }
        if duration_us <= 0 {
            return None;
        }
        let total = (size as f64 * 8.0 * 1_000_000.0 / duration_us as f64) as u64;
        let remaining = total.checked_sub(other_bitrates).filter(|b| *b > 0)?;
        Some(remaining.min(u64::from(u32::MAX)) as u32)
    }

    fn track_bitrate(&self, track: &TrackEstimate<'_>) -> Option<u32> {
        let target_bitrate = track.target.and_then(|t| t.bitrate);
        if target_bitrate.is_some() {
            return target_bitrate;
        }
        match track.source.kind() {
            Some(TrackKind::Audio) => Some(
                track
                    .source
                    .bitrate
                    .unwrap_or(self.config.fallback_audio_bitrate),
            ),
            _ => track.source.bitrate,
        }
    }
}

impl BitrateEstimator for DefaultEstimator {
    fn estimate_video_track_bitrate(&self, source: &dyn MediaSource, track: usize) -> u32 {
        let format = source.track_format(track).unwrap_or_default();
        if let Some(bitrate) = format.bitrate {
            return bitrate;
        }
        if let Some(bitrate) = self.bitrate_from_size(source, track) {
            tracing::debug!(track, bitrate, "Video bitrate derived from source size");
            return bitrate;
        }
        let bitrate = self.resolution_bitrate(&format);
        tracing::debug!(track, bitrate, "Video bitrate derived from resolution");
        bitrate
    }

    fn estimate_target_file_size(
        &self,
        tracks: &[TrackEstimate<'_>],
        selection: MediaRange,
    ) -> i64 {
        let longest = tracks
            .iter()
            .filter_map(|t| t.source.duration_us)
            .map(|d| selection.clamp_duration(d))
            .max();
        let Some(longest) = longest else {
            return -1;
        };

        let mut total_bits: f64 = 0.0;
        let mut contributing = 0;
        for track in tracks {
            let Some(bitrate) = self.track_bitrate(track) else {
                continue;
            };
            let duration_us = track
                .source
                .duration_us
                .map(|d| selection.clamp_duration(d))
                .unwrap_or(longest);
            total_bits += f64::from(bitrate) * duration_us as f64 / 1_000_000.0;
            contributing += 1;
        }

        if contributing == 0 {
            -1
        } else {
            (total_bits / 8.0).round() as i64
        }
    }
}
