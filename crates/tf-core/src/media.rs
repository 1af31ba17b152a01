//! Media-domain types: MIME constants, track kinds, containers, and the
//! immutable [`MediaFormat`] value.
//!
//! Enums serialize in lowercase and implement `Display` manually for
//! consistent string representation.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// MIME types
// ---------------------------------------------------------------------------

/// Well-known MIME types understood by the negotiator.
pub mod mime {
    pub const VIDEO_AVC: &str = "video/avc";
    pub const VIDEO_HEVC: &str = "video/hevc";
    pub const VIDEO_VP8: &str = "video/x-vnd.on2.vp8";
    pub const VIDEO_VP9: &str = "video/x-vnd.on2.vp9";
    pub const VIDEO_AV1: &str = "video/av01";

    pub const AUDIO_AAC: &str = "audio/mp4a-latm";
    pub const AUDIO_RAW: &str = "audio/raw";
    pub const AUDIO_OPUS: &str = "audio/opus";
    pub const AUDIO_VORBIS: &str = "audio/vorbis";
    pub const AUDIO_MPEG: &str = "audio/mpeg";

    pub const TEXT_VTT: &str = "text/vtt";
    pub const APPLICATION_ID3: &str = "application/id3";
}

// ---------------------------------------------------------------------------
// TrackKind
// ---------------------------------------------------------------------------

/// Media kind of a track, derived from its MIME prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    /// Anything that is neither audio nor video (subtitles, metadata, ...).
    Other,
}

impl TrackKind {
    /// Classify a MIME type by its prefix.
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("video") {
            Self::Video
        } else if mime.starts_with("audio") {
            Self::Audio
        } else {
            Self::Other
        }
    }
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Video => write!(f, "video"),
            Self::Audio => write!(f, "audio"),
            Self::Other => write!(f, "other"),
        }
    }
}

// ---------------------------------------------------------------------------
// Container
// ---------------------------------------------------------------------------

/// Output container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    Mp4,
    Webm,
}

impl Container {
    /// Pick the container able to carry the given video codec: WebM for
    /// VP8/VP9, MP4 for everything else.
    pub fn for_video_mime(video_mime: Option<&str>) -> Self {
        match video_mime {
            Some(mime::VIDEO_VP8) | Some(mime::VIDEO_VP9) => Self::Webm,
            _ => Self::Mp4,
        }
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mp4 => write!(f, "mp4"),
            Self::Webm => write!(f, "webm"),
        }
    }
}

// ---------------------------------------------------------------------------
// MediaFormat
// ---------------------------------------------------------------------------

/// Format description of a track. Every attribute is independently optional.
///
/// The type is a plain value: negotiation never patches a shared instance,
/// it derives a new one through the `with_*` copy-with-override methods.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    pub mime: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sample_rate: Option<u32>,
    pub channel_count: Option<u32>,
    /// Bits per second.
    pub bitrate: Option<u32>,
    /// Clockwise rotation in degrees.
    pub rotation: Option<i32>,
    pub duration_us: Option<i64>,
    /// Seconds between key frames.
    pub key_frame_interval: Option<u32>,
    pub frame_rate: Option<f32>,
}

impl MediaFormat {
    /// A format carrying only a MIME type.
    pub fn new(mime: impl Into<String>) -> Self {
        Self {
            mime: Some(mime.into()),
            ..Self::default()
        }
    }

    /// Video format with the given dimensions.
    pub fn video(mime: impl Into<String>, width: u32, height: u32) -> Self {
        Self::new(mime).with_width(width).with_height(height)
    }

    /// Audio format with the given sample rate and channel count.
    pub fn audio(mime: impl Into<String>, sample_rate: u32, channel_count: u32) -> Self {
        Self::new(mime)
            .with_sample_rate(sample_rate)
            .with_channel_count(channel_count)
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Media kind, or `None` when the MIME type is unknown.
    pub fn kind(&self) -> Option<TrackKind> {
        self.mime().map(TrackKind::from_mime)
    }

    pub fn is_video(&self) -> bool {
        self.kind() == Some(TrackKind::Video)
    }

    pub fn is_audio(&self) -> bool {
        self.kind() == Some(TrackKind::Audio)
    }

    #[must_use]
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    #[must_use]
    pub fn with_width(mut self, width: u32) -> Self {
        self.width = Some(width);
        self
    }

    #[must_use]
    pub fn with_height(mut self, height: u32) -> Self {
        self.height = Some(height);
        self
    }

    #[must_use]
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = Some(sample_rate);
        self
    }

    #[must_use]
    pub fn with_channel_count(mut self, channel_count: u32) -> Self {
        self.channel_count = Some(channel_count);
        self
    }

    #[must_use]
    pub fn with_bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = Some(bitrate);
        self
    }

    #[must_use]
    pub fn with_rotation(mut self, rotation: i32) -> Self {
        self.rotation = Some(rotation);
        self
    }

    #[must_use]
    pub fn with_duration_us(mut self, duration_us: i64) -> Self {
        self.duration_us = Some(duration_us);
        self
    }

    #[must_use]
    pub fn with_key_frame_interval(mut self, seconds: u32) -> Self {
        self.key_frame_interval = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_frame_rate(mut self, frame_rate: f32) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }
}

impl fmt::Display for MediaFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mime().unwrap_or("unknown"))?;
        if let (Some(w), Some(h)) = (self.width, self.height) {
            write!(f, " {w}x{h}")?;
        }
        if let (Some(rate), Some(ch)) = (self.sample_rate, self.channel_count) {
            write!(f, " {rate}Hz/{ch}ch")?;
        }
        if let Some(bitrate) = self.bitrate {
            write!(f, " @{bitrate}bps")?;
        }
        Ok(())
    }
}
