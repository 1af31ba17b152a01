//! Decoder and encoder capabilities.
//!
//! Both follow the same synchronous shape: configure with a format, push one
//! buffer in, take zero or more buffers out, and drain at end of stream with
//! `flush`.

use tf_core::{Frame, MediaFormat, Result, TrackKind};

/// Turns encoded samples into raw frames.
pub trait Decoder: Send {
    /// Codec name reported in transformation info.
    fn name(&self) -> &str;

    /// Configure for samples of the given format.
    fn init(&mut self, format: &MediaFormat) -> Result<()>;

    fn decode(&mut self, sample: Frame) -> Result<Vec<Frame>>;

    /// Signal end of stream and return any buffered frames.
    fn flush(&mut self) -> Result<Vec<Frame>>;

    fn release(&mut self);
}

/// Turns raw frames into encoded samples.
pub trait Encoder: Send {
    /// Codec name reported in transformation info.
    fn name(&self) -> &str;

    /// Configure for the given output format.
    fn init(&mut self, format: &MediaFormat) -> Result<()>;

    /// Format of the produced samples once configured. The target track is
    /// declared with this format when present.
    fn output_format(&self) -> Option<MediaFormat>;

    fn encode(&mut self, frame: Frame) -> Result<Vec<Frame>>;

    /// Signal end of stream and return any buffered samples.
    fn flush(&mut self) -> Result<Vec<Frame>>;

    fn release(&mut self);
}

/// Supplies codec instances per media kind.
pub trait CodecProvider: Send + Sync {
    fn decoder(&self, kind: TrackKind) -> Box<dyn Decoder>;
    fn encoder(&self, kind: TrackKind) -> Box<dyn Encoder>;
}
