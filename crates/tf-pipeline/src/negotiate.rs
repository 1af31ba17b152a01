//! Target format negotiation.
//!
//! For every track the negotiator decides between pass-through (no target
//! format) and transcoding, and in the latter case produces a fully
//! specified target format:
//!
//! 1. No requested format and nothing forcing a transcode: pass-through.
//! 2. A transcode is forced by an active filter chain, or by an audio codec
//!    the chosen video codec cannot be muxed with (AVC/HEVC need AAC instead
//!    of raw PCM, VP8/VP9 need Opus or Vorbis).
//! 3. Forced without a requested format: the target is synthesized from the
//!    source.
//! 4. A requested format is completed from the source and the defaults.
//! 5. Video dimensions are rounded up to the decoder block size.

use std::sync::Arc;

use tf_core::config::NegotiationConfig;
use tf_core::{
    mime, MediaFormat, Result, SourceFormatError, TrackKind, TransformationOptions,
};
use tf_media::{BitrateEstimator, MediaSource};

use crate::transform::TrackTransform;

/// Derives target formats for tracks.
#[derive(Clone)]
pub struct FormatNegotiator {
    config: NegotiationConfig,
    estimator: Arc<dyn BitrateEstimator>,
}

impl FormatNegotiator {
    pub fn new(config: NegotiationConfig, estimator: Arc<dyn BitrateEstimator>) -> Self {
        Self { config, estimator }
    }

    pub fn config(&self) -> &NegotiationConfig {
        &self.config
    }

    /// Reject a video source larger than the caller's restriction. Only the
    /// source dimensions are checked; dimensions the source does not report
    /// cannot be checked and are let through with a warning.
    pub fn check_dimensions(
        &self,
        track: usize,
        source_format: &MediaFormat,
        options: &TransformationOptions,
    ) -> Result<()> {
        let checks = [
            ("height", source_format.height, options.max_height),
            ("width", source_format.width, options.max_width),
        ];
        for (dimension, actual, limit) in checks {
            let Some(limit) = limit else {
                continue;
            };
            match actual {
                Some(actual) if actual > limit => {
                    return Err(SourceFormatError::DimensionExceeded {
                        dimension,
                        actual,
                        limit,
                    }
                    .into());
                }
                Some(actual) => {
                    tracing::info!(track, dimension, actual, limit, "Video dimension within restriction");
                }
                None => {
                    tracing::warn!(track, dimension, "Could not check the video source dimension");
                }
            }
        }
        Ok(())
    }

    /// Whether a track must be decoded and re-encoded even when the caller
    /// requested no format change.
    pub fn requires_transcode(
        &self,
        source_format: &MediaFormat,
        has_filters: bool,
        peer_video_mime: Option<&str>,
    ) -> bool {
        has_filters || is_audio_incompatible(source_format, peer_video_mime)
    }

    /// Resolve the target format of one track. `Ok(None)` means
    /// pass-through.
    ///
    /// # Errors
    ///
    /// Fails with a [`SourceFormatError`] when the source track has no MIME
    /// type, or when a transcode needs an attribute the source lacks.
    pub fn resolve(
        &self,
        source: &dyn MediaSource,
        track: usize,
        requested: Option<&MediaFormat>,
        has_filters: bool,
        peer_video_mime: Option<&str>,
    ) -> Result<Option<MediaFormat>> {
        let source_format = source.track_format(track)?;
        let Some(source_mime) = source_format.mime() else {
            return Err(SourceFormatError::UnknownMimeType { track }.into());
        };
        let kind = TrackKind::from_mime(source_mime);
        let forced = self.requires_transcode(&source_format, has_filters, peer_video_mime);

        let resolved = match (requested, kind) {
            (None, _) if !forced => None,
            (None, TrackKind::Video) => Some(self.synthesize_video(source, track, &source_format)?),
            (None, TrackKind::Audio) => {
                Some(self.synthesize_audio(track, &source_format, peer_video_mime)?)
            }
            (None, TrackKind::Other) => None,
            (Some(requested), TrackKind::Video) => {
                Some(self.complete_video(source, track, &source_format, requested)?)
            }
            (Some(requested), TrackKind::Audio) => {
                Some(self.complete_audio(track, &source_format, requested, peer_video_mime)?)
            }
            (Some(requested), TrackKind::Other) => Some(requested.clone()),
        };

        let resolved = resolved
            .map(|format| {
                if format.is_video() {
                    self.align_dimensions(track, format)
                } else {
                    Ok(format)
                }
            })
            .transpose()?;

        match &resolved {
            Some(format) => tracing::debug!(track, forced, %format, "Resolved target format"),
            None => tracing::debug!(track, "Track is passed through"),
        }
        Ok(resolved)
    }

    /// Resolve the target format of every transform. The result is indexed
    /// like `transforms`.
    pub fn resolve_all(&self, transforms: &[TrackTransform]) -> Result<Vec<Option<MediaFormat>>> {
        let peer = peer_video_mime(transforms);
        tracing::debug!(peer_video_mime = ?peer, "Negotiating {} tracks", transforms.len());

        transforms
            .iter()
            .map(|transform| {
                let source = transform.source().lock();
                self.resolve(
                    &**source,
                    transform.source_track(),
                    transform.target_format(),
                    transform.has_filters(),
                    peer.as_deref(),
                )
            })
            .collect()
    }

    fn synthesize_video(
        &self,
        source: &dyn MediaSource,
        track: usize,
        source_format: &MediaFormat,
    ) -> Result<MediaFormat> {
        let width = require(track, source_format.width, "width")?;
        let height = require(track, source_format.height, "height")?;
        let mime = source_format.mime().unwrap_or(mime::VIDEO_AVC);

        Ok(MediaFormat::video(mime, width, height)
            .with_bitrate(self.estimator.estimate_video_track_bitrate(source, track))
            .with_key_frame_interval(
                source_format
                    .key_frame_interval
                    .unwrap_or(self.config.default_key_frame_interval),
            )
            .with_frame_rate(self.frame_rate(source_format)))
    }

    fn synthesize_audio(
        &self,
        track: usize,
        source_format: &MediaFormat,
        peer_video_mime: Option<&str>,
    ) -> Result<MediaFormat> {
        let sample_rate = require(track, source_format.sample_rate, "sample rate")?;
        let channel_count = require(track, source_format.channel_count, "channel count")?;
        let mime = self.audio_mime(source_format, peer_video_mime);

        let mut format = MediaFormat::audio(mime, sample_rate, channel_count).with_bitrate(
            source_format
                .bitrate
                .unwrap_or(self.config.default_audio_bitrate),
        );
        if let Some(duration_us) = source_format.duration_us {
            format = format.with_duration_us(duration_us);
        }
        Ok(format)
    }

    fn complete_video(
        &self,
        source: &dyn MediaSource,
        track: usize,
        source_format: &MediaFormat,
        requested: &MediaFormat,
    ) -> Result<MediaFormat> {
        let mut format = requested.clone();

        if format.width.is_none() || format.height.is_none() {
            format = format
                .with_width(require(track, source_format.width, "width")?)
                .with_height(require(track, source_format.height, "height")?);
        }
        if format.mime.is_none() {
            format = format.with_mime(source_format.mime().unwrap_or(mime::VIDEO_AVC));
        }
        if format.bitrate.is_none() {
            format = format.with_bitrate(self.estimator.estimate_video_track_bitrate(source, track));
        }
        if format.key_frame_interval.is_none() {
            format = format.with_key_frame_interval(
                source_format
                    .key_frame_interval
                    .unwrap_or(self.config.default_key_frame_interval),
            );
        }
        if format.frame_rate.is_none() {
            format = format.with_frame_rate(self.frame_rate(source_format));
        }
        Ok(format)
    }

    fn complete_audio(
        &self,
        track: usize,
        source_format: &MediaFormat,
        requested: &MediaFormat,
        peer_video_mime: Option<&str>,
    ) -> Result<MediaFormat> {
        let mut format = requested.clone();

        if format.mime.is_none() {
            format = format.with_mime(self.audio_mime(source_format, peer_video_mime));
        }
        if format.sample_rate.is_none() {
            format = format.with_sample_rate(require(track, source_format.sample_rate, "sample rate")?);
        }
        if format.channel_count.is_none() {
            format = format
                .with_channel_count(require(track, source_format.channel_count, "channel count")?);
        }
        if format.bitrate.is_none() {
            format = format.with_bitrate(
                source_format
                    .bitrate
                    .unwrap_or(self.config.default_audio_bitrate),
            );
        }
        Ok(format)
    }

    fn frame_rate(&self, source_format: &MediaFormat) -> f32 {
        source_format
            .frame_rate
            .filter(|r| *r > 0.0)
            .unwrap_or(self.config.default_frame_rate as f32)
    }

    /// Source audio MIME, switched to the codec the peer video requires when
    /// the source codec cannot be muxed with it.
    fn audio_mime(&self, source_format: &MediaFormat, peer_video_mime: Option<&str>) -> String {
        let compatible = is_audio_incompatible(source_format, peer_video_mime)
            .then(|| peer_video_mime.and_then(compatible_audio_mime))
            .flatten();
        match compatible {
            Some(mime) => mime.to_owned(),
            None => source_format.mime().unwrap_or(mime::AUDIO_AAC).to_owned(),
        }
    }

    fn align_dimensions(&self, track: usize, format: MediaFormat) -> Result<MediaFormat> {
        let alignment = self.config.dimension_alignment;
        let (Some(width), Some(height)) = (format.width, format.height) else {
            return Ok(format);
        };
        let align = |dimension: &'static str, value: u32| {
            align_up(value, alignment).ok_or_else(|| {
                tracing::warn!(track, dimension, value, alignment, "Dimension cannot be aligned");
                SourceFormatError::DimensionExceeded {
                    dimension,
                    actual: value,
                    limit: u32::MAX - u32::MAX % alignment,
                }
            })
        };
        let (width, height) = (align("width", width)?, align("height", height)?);
        tracing::info!("Video output format resolution width x height: {width} x {height}");
        Ok(format.with_width(width).with_height(height))
    }
}

/// Replace the target format of each transform with its resolved one,
/// leaving every other field untouched.
pub fn apply_formats(
    transforms: Vec<TrackTransform>,
    formats: Vec<Option<MediaFormat>>,
) -> Vec<TrackTransform> {
    transforms
        .into_iter()
        .zip(formats)
        .map(|(transform, format)| {
            if format.as_ref() == transform.target_format() {
                transform
            } else {
                transform.with_target_format(format)
            }
        })
        .collect()
}

/// Round `value` up to the next multiple of `alignment`, or `None` when
/// that multiple does not fit in a `u32`. An alignment of 0 leaves the value
/// unchanged.
pub fn align_up(value: u32, alignment: u32) -> Option<u32> {
    if alignment == 0 {
        Some(value)
    } else {
        value.checked_next_multiple_of(alignment)
    }
}

/// Whether an audio track cannot be muxed alongside the given video codec.
/// Non-audio tracks, and tracks with no known peer video, are compatible.
pub fn is_audio_incompatible(source_format: &MediaFormat, peer_video_mime: Option<&str>) -> bool {
    let (Some(peer), Some(audio)) = (peer_video_mime, source_format.mime()) else {
        return false;
    };
    if TrackKind::from_mime(audio) != TrackKind::Audio {
        return false;
    }
    match peer {
        mime::VIDEO_AVC | mime::VIDEO_HEVC => audio == mime::AUDIO_RAW,
        mime::VIDEO_VP8 | mime::VIDEO_VP9 => {
            audio != mime::AUDIO_OPUS && audio != mime::AUDIO_VORBIS
        }
        _ => false,
    }
}

/// Audio codec to transcode to so that it can be muxed with this video codec.
pub fn compatible_audio_mime(video_mime: &str) -> Option<&'static str> {
    match video_mime {
        mime::VIDEO_AVC | mime::VIDEO_HEVC => Some(mime::AUDIO_AAC),
        mime::VIDEO_VP8 | mime::VIDEO_VP9 => Some(mime::AUDIO_OPUS),
        _ => None,
    }
}

/// Video codec the target will carry: the first track whose target format
/// is video, otherwise the first track whose source format is video.
pub fn peer_video_mime(transforms: &[TrackTransform]) -> Option<String> {
    for transform in transforms {
        if let Some(mime) = transform.target_format().and_then(|f| f.mime()) {
            if TrackKind::from_mime(mime) == TrackKind::Video {
                return Some(mime.to_owned());
            }
        }
        if let Ok(source_format) = transform.source_format() {
            if source_format.is_video() {
                return source_format.mime;
            }
        }
    }
    None
}

fn require(track: usize, value: Option<u32>, attribute: &'static str) -> Result<u32> {
    value.ok_or_else(|| SourceFormatError::MissingAttribute { track, attribute }.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tf_core::Error;
    use tf_media::memory::{MemorySource, MemoryTarget};
    use tf_media::{DefaultEstimator, FilterChainRenderer, SourceHandle, TargetHandle};

    fn negotiator() -> FormatNegotiator {
        FormatNegotiator::new(
            NegotiationConfig::default(),
            Arc::new(DefaultEstimator::default()),
        )
    }

    fn avc_pcm_source() -> MemorySource {
        MemorySource::new()
            .with_track(
                MediaFormat::video(mime::VIDEO_AVC, 1000, 750)
                    .with_bitrate(3_000_000)
                    .with_frame_rate(24.0),
                vec![],
            )
            .with_track(
                MediaFormat::audio(mime::AUDIO_RAW, 44_100, 2).with_duration_us(5_000_000),
                vec![],
            )
    }

    #[test]
    fn pass_through_without_request_filters_or_incompatibility() {
        let source = avc_pcm_source();
        let n = negotiator();
        for _ in 0..3 {
            let resolved = n
                .resolve(&source, 0, None, false, Some(mime::VIDEO_AVC))
                .unwrap();
            assert_eq!(resolved, None);
        }
    }

    #[test]
    fn raw_audio_next_to_avc_is_forced_to_aac() {
        let source = avc_pcm_source();
        let resolved = negotiator()
            .resolve(&source, 1, None, false, Some(mime::VIDEO_AVC))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.mime(), Some(mime::AUDIO_AAC));
        assert_eq!(resolved.sample_rate, Some(44_100));
        assert_eq!(resolved.channel_count, Some(2));
        assert_eq!(resolved.bitrate, Some(256_000));
        assert_eq!(resolved.duration_us, Some(5_000_000));
    }

    #[test]
    fn raw_audio_next_to_hevc_is_forced_to_aac() {
        let source = avc_pcm_source();
        let resolved = negotiator()
            .resolve(&source, 1, None, false, Some(mime::VIDEO_HEVC))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.mime(), Some(mime::AUDIO_AAC));
    }

    #[test]
    fn non_opus_audio_next_to_vp9_is_forced_to_opus() {
        let source = MemorySource::new().with_track(
            MediaFormat::audio(mime::AUDIO_AAC, 48_000, 2).with_bitrate(128_000),
            vec![],
        );
        for peer in [mime::VIDEO_VP8, mime::VIDEO_VP9] {
            let resolved = negotiator()
                .resolve(&source, 0, None, false, Some(peer))
                .unwrap()
                .unwrap();
            assert_eq!(resolved.mime(), Some(mime::AUDIO_OPUS));
            assert_eq!(resolved.bitrate, Some(128_000));
        }
    }

    #[test]
    fn opus_and_vorbis_are_compatible_with_vp9() {
        for audio in [mime::AUDIO_OPUS, mime::AUDIO_VORBIS] {
            let format = MediaFormat::audio(audio, 48_000, 2);
            assert!(!is_audio_incompatible(&format, Some(mime::VIDEO_VP9)));
        }
    }

    #[test]
    fn unknown_peer_is_compatible() {
        let format = MediaFormat::audio(mime::AUDIO_RAW, 48_000, 2);
        assert!(!is_audio_incompatible(&format, None));
        assert!(!is_audio_incompatible(&format, Some(mime::VIDEO_AV1)));
    }

    #[test]
    fn video_tracks_are_never_audio_incompatible() {
        let format = MediaFormat::video(mime::VIDEO_AVC, 64, 64);
        assert!(!is_audio_incompatible(&format, Some(mime::VIDEO_VP9)));
    }

    #[test]
    fn filters_force_video_transcode_with_source_parameters() {
        let source = avc_pcm_source();
        let resolved = negotiator()
            .resolve(&source, 0, None, true, Some(mime::VIDEO_AVC))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.mime(), Some(mime::VIDEO_AVC));
        assert_eq!((resolved.width, resolved.height), (Some(1024), Some(768)));
        assert_eq!(resolved.bitrate, Some(3_000_000));
        assert_eq!(resolved.key_frame_interval, Some(5));
        assert_eq!(resolved.frame_rate, Some(24.0));
    }

    #[test]
    fn partial_request_is_completed_and_aligned() {
        let source = avc_pcm_source();
        let requested = MediaFormat::default().with_bitrate(1_000_000);
        let resolved = negotiator()
            .resolve(&source, 0, Some(&requested), false, Some(mime::VIDEO_AVC))
            .unwrap()
            .unwrap();
        assert_eq!(resolved.mime(), Some(mime::VIDEO_AVC));
        assert_eq!((resolved.width, resolved.height), (Some(1024), Some(768)));
        assert_eq!(resolved.bitrate, Some(1_000_000));
        assert_eq!(resolved.key_frame_interval, Some(5));
        assert_eq!(resolved.frame_rate, Some(24.0));
    }

    #[test]
    fn requested_key_frame_interval_is_kept() {
        let source = avc_pcm_source();
        let requested = MediaFormat::video(mime::VIDEO_AVC, 1280, 720).with_key_frame_interval(1);
        let resolved = negotiator()
            .resolve(&source, 0, Some(&requested), false, None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.key_frame_interval, Some(1));
        assert_eq!((resolved.width, resolved.height), (Some(1280), Some(736)));
    }

    #[test]
    fn frame_rate_defaults_when_unknown() {
        let source = MemorySource::new()
            .with_track(MediaFormat::video(mime::VIDEO_AVC, 64, 64), vec![]);
        let resolved = negotiator()
            .resolve(&source, 0, None, true, None)
            .unwrap()
            .unwrap();
        assert_eq!(resolved.frame_rate, Some(30.0));
        assert_eq!((resolved.width, resolved.height), (Some(64), Some(64)));
    }

    #[test]
    fn alignment_never_shrinks() {
        for value in [1, 31, 32, 33, 720, 1080, 1920] {
            let aligned = align_up(value, 32).unwrap();
            assert_eq!(aligned % 32, 0);
            assert!(aligned >= value);
            assert!(aligned - value < 32);
        }
        assert_eq!(align_up(1080, 32), Some(1088));
        assert_eq!(align_up(720, 32), Some(736));
        assert_eq!(align_up(77, 0), Some(77));
    }

    #[test]
    fn alignment_past_u32_is_refused() {
        assert_eq!(align_up(u32::MAX - 5, 32), None);
        assert_eq!(align_up(u32::MAX - 31, 32), Some(u32::MAX - 31));

        let source = MemorySource::new().with_track(
            MediaFormat::video(mime::VIDEO_AVC, u32::MAX - 5, 64).with_bitrate(1_000_000),
            vec![],
        );
        let requested = MediaFormat::new(mime::VIDEO_AVC);
        let err = negotiator()
            .resolve(&source, 0, Some(&requested), false, None)
            .unwrap_err();
        assert_matches!(
            err,
            Error::SourceFormat(SourceFormatError::DimensionExceeded { dimension: "width", .. })
        );
    }

    #[test]
    fn missing_mime_fails() {
        let source = MemorySource::new().with_track(MediaFormat::default(), vec![]);
        let err = negotiator().resolve(&source, 0, None, false, None).unwrap_err();
        assert_matches!(
            err,
            Error::SourceFormat(SourceFormatError::UnknownMimeType { track: 0 })
        );
    }

    #[test]
    fn forced_video_without_dimensions_fails() {
        let source = MemorySource::new().with_track(MediaFormat::new(mime::VIDEO_AVC), vec![]);
        let err = negotiator().resolve(&source, 0, None, true, None).unwrap_err();
        assert_matches!(
            err,
            Error::SourceFormat(SourceFormatError::MissingAttribute {
                attribute: "width",
                ..
            })
        );
    }

    #[test]
    fn dimension_restriction_checks_source() {
        let n = negotiator();
        let format = MediaFormat::video(mime::VIDEO_AVC, 1280, 720);

        let options = TransformationOptions::builder().max_height(480).build();
        assert_matches!(
            n.check_dimensions(0, &format, &options),
            Err(Error::SourceFormat(SourceFormatError::DimensionExceeded {
                dimension: "height",
                actual: 720,
                limit: 480,
            }))
        );

        let options = TransformationOptions::builder().max_width(1000).build();
        assert_matches!(
            n.check_dimensions(0, &format, &options),
            Err(Error::SourceFormat(SourceFormatError::DimensionExceeded {
                dimension: "width",
                ..
            }))
        );

        let options = TransformationOptions::builder()
            .dimension_restriction(720, 1280)
            .build();
        assert!(n.check_dimensions(0, &format, &options).is_ok());

        let unknown = MediaFormat::new(mime::VIDEO_AVC);
        let options = TransformationOptions::builder().max_height(10).build();
        assert!(n.check_dimensions(0, &unknown, &options).is_ok());
    }

    #[test]
    fn peer_video_prefers_target_format() {
        let source = SourceHandle::new(avc_pcm_source());
        let target = TargetHandle::new(MemoryTarget::new());

        let transforms = vec![
            TrackTransform::builder(source.clone(), 1, target.clone()).build(),
            TrackTransform::builder(source.clone(), 0, target.clone())
                .target_format(Some(MediaFormat::new(mime::VIDEO_VP9)))
                .build(),
        ];
        // The audio track comes first but is not video; the video track's
        // requested VP9 wins over its AVC source.
        assert_eq!(peer_video_mime(&transforms).as_deref(), Some(mime::VIDEO_VP9));

        let transforms = vec![TrackTransform::builder(source, 0, target).build()];
        assert_eq!(peer_video_mime(&transforms).as_deref(), Some(mime::VIDEO_AVC));
    }

    #[test]
    fn resolved_formats_replace_only_target_formats() {
        let source = SourceHandle::new(avc_pcm_source());
        let target = TargetHandle::new(MemoryTarget::new());

        let transforms = vec![
            TrackTransform::builder(source.clone(), 0, target.clone())
                .target_track(0)
                .renderer(Box::new(FilterChainRenderer::video(vec![])))
                .build(),
            TrackTransform::builder(source, 1, target)
                .target_track(1)
                .build(),
        ];

        let formats = negotiator().resolve_all(&transforms).unwrap();
        let negotiated = apply_formats(transforms, formats);
        assert!(negotiated[0].is_pass_through());
        assert!(negotiated[0].has_renderer());
        let audio = negotiated[1].target_format().unwrap();
        assert_eq!(audio.mime(), Some(mime::AUDIO_AAC));
        assert_eq!(negotiated[1].target_track(), 1);
    }
}
