//! Shared fixtures for integration tests.
//!
//! Provides [`Recorder`], a listener that records every callback with the
//! thread it arrived on and lets a test block until the terminal one, plus
//! helpers building in-memory sources and a transformer around them.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use trackforge::tf_media::memory::{synthetic_samples, MemoryCodecProvider, MemorySource};
use trackforge::tf_media::CodecProvider;
use trackforge::{
    mime, Error, MediaFormat, MediaTransformer, RequestId, TrackTransformationInfo,
    TransformationListener, TransformerConfig,
};

/// One recorded callback.
#[derive(Debug, Clone)]
pub enum Event {
    Started,
    Progress(f32),
    Completed(Vec<TrackTransformationInfo>),
    Cancelled(Vec<TrackTransformationInfo>),
    Error(Arc<Error>, Vec<TrackTransformationInfo>),
}

impl Event {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Completed(_) | Event::Cancelled(_) | Event::Error(..))
    }
}

/// Listener recording callbacks per request.
#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<(RequestId, Event, ThreadId)>>,
    changed: Condvar,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn listener(self: &Arc<Self>) -> Arc<dyn TransformationListener> {
        Arc::clone(self) as Arc<dyn TransformationListener>
    }

    fn push(&self, request_id: &RequestId, event: Event) {
        self.events
            .lock()
            .push((request_id.clone(), event, thread::current().id()));
        self.changed.notify_all();
    }

    /// Events of one request, in arrival order.
    pub fn events(&self, request_id: &str) -> Vec<Event> {
        self.events
            .lock()
            .iter()
            .filter(|(id, _, _)| id.as_str() == request_id)
            .map(|(_, e, _)| e.clone())
            .collect()
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.events.lock().iter().map(|(_, _, t)| *t).collect()
    }

    pub fn progress(&self, request_id: &str) -> Vec<f32> {
        self.events(request_id)
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn started(&self, request_id: &str) -> bool {
        self.events(request_id)
            .iter()
            .any(|e| matches!(e, Event::Started))
    }

    /// Block until `request_id` has delivered its terminal callback.
    pub fn wait_terminal(&self, request_id: &str) -> Event {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let mut events = self.events.lock();
        loop {
            let terminal = events
                .iter()
                .find(|(id, e, _)| id.as_str() == request_id && e.is_terminal())
                .map(|(_, e, _)| e.clone());
            if let Some(event) = terminal {
                return event;
            }
            if self.changed.wait_until(&mut events, deadline).timed_out() {
                panic!("no terminal callback for {request_id}");
            }
        }
    }

    /// Block until `request_id` has started.
    pub fn wait_started(&self, request_id: &str) {
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let mut events = self.events.lock();
        while !events
            .iter()
            .any(|(id, e, _)| id.as_str() == request_id && matches!(e, Event::Started))
        {
            if self.changed.wait_until(&mut events, deadline).timed_out() {
                panic!("{request_id} never started");
            }
        }
    }
}

impl TransformationListener for Recorder {
    fn on_started(&self, request_id: &RequestId) {
        self.push(request_id, Event::Started);
    }

    fn on_progress(&self, request_id: &RequestId, progress: f32) {
        self.push(request_id, Event::Progress(progress));
    }

    fn on_completed(&self, request_id: &RequestId, info: &[TrackTransformationInfo]) {
        self.push(request_id, Event::Completed(info.to_vec()));
    }

    fn on_cancelled(&self, request_id: &RequestId, info: &[TrackTransformationInfo]) {
        self.push(request_id, Event::Cancelled(info.to_vec()));
    }

    fn on_error(&self, request_id: &RequestId, error: &Arc<Error>, info: &[TrackTransformationInfo]) {
        self.push(request_id, Event::Error(Arc::clone(error), info.to_vec()));
    }
}

/// A one-second clip: AVC video at 1000x750 and raw PCM audio.
pub fn avc_pcm_source() -> MemorySource {
    MemorySource::new()
        .with_track(
            MediaFormat::video(mime::VIDEO_AVC, 1000, 750)
                .with_bitrate(2_000_000)
                .with_frame_rate(25.0)
                .with_duration_us(1_000_000),
            synthetic_samples(25, 40_000, 200, 5),
        )
        .with_track(
            MediaFormat::audio(mime::AUDIO_RAW, 44_100, 2).with_duration_us(1_000_000),
            synthetic_samples(50, 20_000, 64, 1),
        )
}

/// Same clip at 1280x720 with a subtitle track.
pub fn hd_source_with_subtitles() -> MemorySource {
    MemorySource::new()
        .with_track(
            MediaFormat::video(mime::VIDEO_AVC, 1280, 720)
                .with_bitrate(4_000_000)
                .with_duration_us(1_000_000),
            synthetic_samples(25, 40_000, 200, 5),
        )
        .with_track(
            MediaFormat::audio(mime::AUDIO_AAC, 48_000, 2)
                .with_bitrate(128_000)
                .with_duration_us(1_000_000),
            synthetic_samples(50, 20_000, 64, 1),
        )
        .with_track(
            MediaFormat::new(mime::TEXT_VTT),
            synthetic_samples(2, 500_000, 16, 1),
        )
}

pub fn codecs() -> Arc<dyn CodecProvider> {
    Arc::new(MemoryCodecProvider::new())
}

/// Codecs slow enough that a transcoded job stays busy for a while.
pub fn slow_codecs() -> Arc<dyn CodecProvider> {
    Arc::new(MemoryCodecProvider::new().with_decode_delay(Duration::from_millis(20)))
}

pub fn transformer(codecs: Arc<dyn CodecProvider>) -> MediaTransformer {
    trackforge::logging::init("trackforge=debug,tf_pipeline=debug");
    MediaTransformer::new(TransformerConfig::default(), codecs).expect("transformer")
}
