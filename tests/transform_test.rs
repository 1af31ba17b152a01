//! End-to-end tests of the high-level transform entry point.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use common::{avc_pcm_source, codecs, hd_source_with_subtitles, transformer, Event, Recorder};
use trackforge::tf_core::{
    Container, ErrorCategory, Frame, FrameFilter, SourceFormatError, TargetConstructionError,
};
use trackforge::tf_media::memory::{
    synthetic_samples, MemoryCodecProvider, MemorySource, MemoryTarget, MemoryTargetOpener,
};
use trackforge::tf_media::{CodecProvider, SourceHandle};
use trackforge::{mime, Error, MediaFormat, MediaRange, TransformRequest, TransformationOptions};

fn request(
    source: MemorySource,
    opener: &MemoryTargetOpener,
    video_format: Option<MediaFormat>,
    audio_format: Option<MediaFormat>,
    options: TransformationOptions,
) -> TransformRequest {
    TransformRequest {
        source: SourceHandle::new(source),
        target: Arc::new(opener.clone()),
        video_format,
        audio_format,
        options,
    }
}

// ---------------------------------------------------------------------------
// Negotiation outcomes
// ---------------------------------------------------------------------------

#[test]
fn raw_audio_is_forced_to_aac_and_video_passes_through() {
    let transformer = transformer(codecs());
    let probe = MemoryTarget::new();
    let opener = MemoryTargetOpener::new(probe.clone());
    let recorder = Recorder::new();

    transformer
        .transform(
            "pcm",
            request(avc_pcm_source(), &opener, None, None, TransformationOptions::default()),
            recorder.listener(),
        )
        .unwrap();

    let infos = assert_matches!(recorder.wait_terminal("pcm"), Event::Completed(infos) => infos);
    assert_eq!(infos.len(), 2);
    assert!(recorder.started("pcm"));
    let progress = recorder.progress("pcm");
    assert!(!progress.is_empty());
    assert_eq!(progress.last(), Some(&1.0));

    assert_eq!(opener.opened(), vec![(2, Container::Mp4)]);
    assert!(infos[0].is_pass_through());
    assert_eq!(
        probe.track_format(0).and_then(|f| f.width),
        Some(1000),
        "pass-through keeps the source format"
    );

    let audio = infos[1].target_format.clone().unwrap();
    assert_eq!(audio.mime(), Some(mime::AUDIO_AAC));
    assert_eq!(audio.sample_rate, Some(44_100));
    assert_eq!(audio.bitrate, Some(256_000));
    assert_eq!(probe.track_format(1).unwrap().mime(), Some(mime::AUDIO_AAC));
    assert_eq!(probe.samples(1).len(), 50);
    assert!(probe.is_finalized());
}

#[test]
fn requested_video_mime_is_completed_and_aligned() {
    let transformer = transformer(codecs());
    let probe = MemoryTarget::new();
    let opener = MemoryTargetOpener::new(probe.clone());
    let recorder = Recorder::new();

    transformer
        .transform(
            "avc",
            request(
                avc_pcm_source(),
                &opener,
                Some(MediaFormat::new(mime::VIDEO_AVC)),
                None,
                TransformationOptions::default(),
            ),
            recorder.listener(),
        )
        .unwrap();

    let infos = assert_matches!(recorder.wait_terminal("avc"), Event::Completed(infos) => infos);
    let video = infos[0].target_format.clone().unwrap();
    assert_eq!((video.width, video.height), (Some(1024), Some(768)));
    assert_eq!(video.bitrate, Some(2_000_000));
    assert_eq!(video.key_frame_interval, Some(5));
    assert_eq!(video.frame_rate, Some(25.0));
    assert_eq!(infos[0].decoder.as_deref(), Some("identity-video-decoder"));
    assert_eq!(probe.track_format(0), Some(video));
}

#[test]
fn vp9_output_uses_webm_and_opus() {
    let transformer = transformer(codecs());
    let probe = MemoryTarget::new();
    let opener = MemoryTargetOpener::new(probe.clone());
    let recorder = Recorder::new();

    transformer
        .transform(
            "vp9",
            request(
                hd_source_with_subtitles(),
                &opener,
                Some(MediaFormat::video(mime::VIDEO_VP9, 640, 360)),
                None,
                TransformationOptions::default(),
            ),
            recorder.listener(),
        )
        .unwrap();

    let infos = assert_matches!(recorder.wait_terminal("vp9"), Event::Completed(infos) => infos);
    assert_eq!(opener.opened(), vec![(3, Container::Webm)]);
    assert_eq!(infos.len(), 3);
    assert_eq!(
        infos[1].target_format.as_ref().and_then(|f| f.mime()),
        Some(mime::AUDIO_OPUS)
    );
    assert!(infos[2].is_pass_through());
    assert_eq!(probe.samples(2).len(), 2);
}

#[test]
fn video_filters_force_a_transcode() {
    struct Count(Arc<AtomicUsize>);

    impl FrameFilter for Count {
        fn name(&self) -> &str {
            "count"
        }

        fn apply(&self, frame: Frame) -> trackforge::Result<Frame> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(frame)
        }
    }

    let calls = Arc::new(AtomicUsize::new(0));
    let transformer = transformer(codecs());
    let opener = MemoryTargetOpener::new(MemoryTarget::new());
    let recorder = Recorder::new();
    let options = TransformationOptions::builder()
        .video_filters(vec![Arc::new(Count(Arc::clone(&calls)))])
        .build();

    transformer
        .transform(
            "filtered",
            request(avc_pcm_source(), &opener, None, None, options),
            recorder.listener(),
        )
        .unwrap();

    let infos = assert_matches!(recorder.wait_terminal("filtered"), Event::Completed(infos) => infos);
    let video = infos[0].target_format.clone().unwrap();
    assert_eq!((video.width, video.height), (Some(1024), Some(768)));
    assert_eq!(calls.load(Ordering::SeqCst), 25);
}

// ---------------------------------------------------------------------------
// Track selection
// ---------------------------------------------------------------------------

#[test]
fn remove_audio_leaves_one_video_track() {
    let transformer = transformer(codecs());
    let probe = MemoryTarget::new();
    let opener = MemoryTargetOpener::new(probe.clone());
    let recorder = Recorder::new();
    let options = TransformationOptions::builder().remove_audio(true).build();

    transformer
        .transform(
            "silent",
            request(avc_pcm_source(), &opener, None, None, options),
            recorder.listener(),
        )
        .unwrap();

    let infos = assert_matches!(recorder.wait_terminal("silent"), Event::Completed(infos) => infos);
    assert_eq!(opener.opened(), vec![(1, Container::Mp4)]);
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].source_track, 0);
    assert_eq!(infos[0].target_track, 0);
    assert_eq!(probe.track_count(), 1);
}

#[test]
fn remove_metadata_drops_subtitles_and_renumbers() {
    let transformer = transformer(codecs());
    let opener = MemoryTargetOpener::new(MemoryTarget::new());
    let recorder = Recorder::new();
    let options = TransformationOptions::builder()
        .remove_audio(true)
        .remove_metadata(true)
        .build();

    transformer
        .transform(
            "video-only",
            request(hd_source_with_subtitles(), &opener, None, None, options),
            recorder.listener(),
        )
        .unwrap();

    let infos = assert_matches!(recorder.wait_terminal("video-only"), Event::Completed(infos) => infos);
    assert_eq!(infos.len(), 1);
    assert_eq!(opener.opened(), vec![(1, Container::Mp4)]);
}

#[test]
fn no_remaining_tracks_is_a_target_construction_error() {
    let transformer = transformer(codecs());
    let opener = MemoryTargetOpener::new(MemoryTarget::new());
    let recorder = Recorder::new();
    let source = MemorySource::new().with_track(
        MediaFormat::audio(mime::AUDIO_AAC, 48_000, 2),
        synthetic_samples(3, 20_000, 8, 1),
    );
    let released = source.released_flag();
    let options = TransformationOptions::builder().remove_audio(true).build();

    transformer
        .transform("empty", request(source, &opener, None, None, options), recorder.listener())
        .unwrap();

    let error = assert_matches!(recorder.wait_terminal("empty"), Event::Error(error, _) => error);
    assert_matches!(
        error.as_ref(),
        Error::TargetConstruction(TargetConstructionError::NoOutputTracks)
    );
    assert!(opener.opened().is_empty());
    assert!(released.load(Ordering::SeqCst));
    assert!(!recorder.started("empty"));
}

#[test]
fn target_open_failure_is_reported() {
    let transformer = transformer(codecs());
    let opener = MemoryTargetOpener::failing("read-only volume");
    let recorder = Recorder::new();

    transformer
        .transform(
            "ro",
            request(avc_pcm_source(), &opener, None, None, TransformationOptions::default()),
            recorder.listener(),
        )
        .unwrap();

    let error = assert_matches!(recorder.wait_terminal("ro"), Event::Error(error, _) => error);
    assert_eq!(error.category(), ErrorCategory::TargetConstruction);
    assert!(!transformer.is_active(&"ro".into()));
}

// ---------------------------------------------------------------------------
// Restrictions and failures
// ---------------------------------------------------------------------------

#[test]
fn oversized_source_is_rejected_before_starting() {
    let transformer = transformer(codecs());
    let probe = MemoryTarget::new();
    let opener = MemoryTargetOpener::new(probe.clone());
    let recorder = Recorder::new();
    let options = TransformationOptions::builder().max_height(480).build();

    transformer
        .transform(
            "big",
            request(hd_source_with_subtitles(), &opener, None, None, options),
            recorder.listener(),
        )
        .unwrap();

    let error = assert_matches!(recorder.wait_terminal("big"), Event::Error(error, _) => error);
    assert_matches!(
        error.as_ref(),
        Error::SourceFormat(SourceFormatError::DimensionExceeded {
            dimension: "height",
            actual: 720,
            limit: 480,
        })
    );
    assert!(!recorder.started("big"));
    assert!(probe.is_finalized());

    // The id is free again once the error has been delivered.
    assert!(!transformer.is_active(&"big".into()));
}

#[test]
fn rejected_source_leaves_no_codecs_behind() {
    let provider = Arc::new(MemoryCodecProvider::new());
    let transformer = transformer(Arc::clone(&provider) as Arc<dyn CodecProvider>);
    let probe = MemoryTarget::new();
    let opener = MemoryTargetOpener::new(probe.clone());
    let recorder = Recorder::new();
    let options = TransformationOptions::builder().max_height(480).build();

    // The audio track comes first so it would be built before the video
    // track is checked.
    let source = MemorySource::new()
        .with_track(
            MediaFormat::audio(mime::AUDIO_AAC, 48_000, 2).with_duration_us(1_000_000),
            synthetic_samples(50, 20_000, 64, 1),
        )
        .with_track(
            MediaFormat::video(mime::VIDEO_AVC, 1280, 720).with_duration_us(1_000_000),
            synthetic_samples(25, 40_000, 200, 5),
        );
    let released = source.released_flag();

    transformer
        .transform("audio-first", request(source, &opener, None, None, options), recorder.listener())
        .unwrap();

    let error = assert_matches!(recorder.wait_terminal("audio-first"), Event::Error(error, _) => error);
    assert_matches!(
        error.as_ref(),
        Error::SourceFormat(SourceFormatError::DimensionExceeded { dimension: "height", .. })
    );
    assert_eq!(provider.created(), provider.releases());
    assert!(released.load(Ordering::SeqCst));
    assert!(probe.is_finalized());
}

#[test]
fn completed_job_releases_every_codec() {
    let provider = Arc::new(MemoryCodecProvider::new());
    let transformer = transformer(Arc::clone(&provider) as Arc<dyn CodecProvider>);
    let opener = MemoryTargetOpener::new(MemoryTarget::new());
    let recorder = Recorder::new();

    transformer
        .transform(
            "tidy",
            request(avc_pcm_source(), &opener, None, None, TransformationOptions::default()),
            recorder.listener(),
        )
        .unwrap();

    assert_matches!(recorder.wait_terminal("tidy"), Event::Completed(_));
    assert_eq!(provider.created(), 4);
    assert_eq!(provider.releases(), 4);
}

#[test]
fn write_failure_mid_job_reports_runtime_error() {
    let transformer = transformer(codecs());
    let probe = MemoryTarget::new().failing_write_at(5);
    let opener = MemoryTargetOpener::new(probe.clone());
    let recorder = Recorder::new();

    transformer
        .transform(
            "broken",
            request(avc_pcm_source(), &opener, None, None, TransformationOptions::default()),
            recorder.listener(),
        )
        .unwrap();

    let (error, infos) =
        assert_matches!(recorder.wait_terminal("broken"), Event::Error(error, infos) => (error, infos));
    assert_eq!(error.category(), ErrorCategory::Runtime);
    assert!(recorder.started("broken"));
    assert_eq!(infos.len(), 2);
    assert_eq!(infos[0].samples, 5);
    assert!(probe.is_finalized());
}

// ---------------------------------------------------------------------------
// Source range
// ---------------------------------------------------------------------------

#[test]
fn source_range_limits_written_samples() {
    let transformer = transformer(codecs());
    let probe = MemoryTarget::new();
    let opener = MemoryTargetOpener::new(probe.clone());
    let recorder = Recorder::new();
    let options = TransformationOptions::builder()
        .source_range(MediaRange::new(0, 500_000).unwrap())
        .build();

    transformer
        .transform(
            "clip",
            request(avc_pcm_source(), &opener, None, None, options),
            recorder.listener(),
        )
        .unwrap();

    assert_matches!(recorder.wait_terminal("clip"), Event::Completed(_));
    assert_eq!(probe.samples(0).len(), 13);
    assert_eq!(probe.samples(1).len(), 25);
}

// ---------------------------------------------------------------------------
// Size estimation
// ---------------------------------------------------------------------------

#[test]
fn estimates_target_size_from_formats() {
    let transformer = transformer(codecs());
    let source = SourceHandle::new(hd_source_with_subtitles());
    let options = TransformationOptions::default();

    // (4_000_000 + 128_000) bits over one second; subtitles carry no bitrate.
    assert_eq!(
        transformer.estimated_target_size(&source, None, None, &options),
        516_000
    );

    let video = MediaFormat::video(mime::VIDEO_AVC, 640, 360).with_bitrate(1_000_000);
    assert_eq!(
        transformer.estimated_target_size(&source, Some(&video), None, &options),
        141_000
    );

    let half = TransformationOptions::builder()
        .source_range(MediaRange::new(0, 500_000).unwrap())
        .build();
    assert_eq!(
        transformer.estimated_target_size(&source, None, None, &half),
        258_000
    );

    let unknown = SourceHandle::new(
        MemorySource::new().with_track(MediaFormat::video(mime::VIDEO_AVC, 64, 64), vec![]),
    );
    assert_eq!(
        transformer.estimated_target_size(&unknown, None, None, &options),
        -1
    );
}
