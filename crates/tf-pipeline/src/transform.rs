//! Track transform descriptors: one source track bound to one target track
//! through a decoder, an optional renderer, and an encoder.

use std::fmt;
use std::sync::Arc;

use tf_core::{MediaFormat, Result, TrackKind};
use tf_media::{CodecProvider, Decoder, Encoder, Renderer, SourceHandle, TargetHandle};

/// Instructions for transforming one track.
///
/// A `target_format` of `None` means pass-through: samples are copied from
/// the source track to the target track without decoding or encoding.
pub struct TrackTransform {
    source: SourceHandle,
    source_track: usize,
    target: TargetHandle,
    target_track: usize,
    decoder: Option<Box<dyn Decoder>>,
    renderer: Option<Box<dyn Renderer>>,
    encoder: Option<Box<dyn Encoder>>,
    target_format: Option<MediaFormat>,
}

/// Owned pieces of a [`TrackTransform`], handed to the job that runs it.
pub struct TrackTransformParts {
    pub source: SourceHandle,
    pub source_track: usize,
    pub target: TargetHandle,
    pub target_track: usize,
    pub decoder: Option<Box<dyn Decoder>>,
    pub renderer: Option<Box<dyn Renderer>>,
    pub encoder: Option<Box<dyn Encoder>>,
    pub target_format: Option<MediaFormat>,
}

impl TrackTransform {
    pub fn builder(source: SourceHandle, source_track: usize, target: TargetHandle) -> TrackTransformBuilder {
        TrackTransformBuilder::new(source, source_track, target)
    }

    pub fn source(&self) -> &SourceHandle {
        &self.source
    }

    pub fn source_track(&self) -> usize {
        self.source_track
    }

    pub fn target(&self) -> &TargetHandle {
        &self.target
    }

    pub fn target_track(&self) -> usize {
        self.target_track
    }

    pub fn target_format(&self) -> Option<&MediaFormat> {
        self.target_format.as_ref()
    }

    /// Format of the source track as reported by the source.
    pub fn source_format(&self) -> Result<MediaFormat> {
        self.source.track_format(self.source_track)
    }

    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn has_encoder(&self) -> bool {
        self.encoder.is_some()
    }

    pub fn has_renderer(&self) -> bool {
        self.renderer.is_some()
    }

    /// Whether the renderer carries an active filter chain.
    pub fn has_filters(&self) -> bool {
        self.renderer.as_ref().is_some_and(|r| r.has_filters())
    }

    /// Whether this track is copied without decoding.
    pub fn is_pass_through(&self) -> bool {
        self.target_format.is_none()
    }

    /// Turn this descriptor back into a builder carrying all of its fields,
    /// so individual fields can be overridden.
    pub fn into_builder(self) -> TrackTransformBuilder {
        TrackTransformBuilder {
            source: self.source,
            source_track: self.source_track,
            target: self.target,
            target_track: Some(self.target_track),
            decoder: self.decoder,
            renderer: self.renderer,
            encoder: self.encoder,
            target_format: self.target_format,
            codecs: None,
        }
    }

    /// Copy of this descriptor with a different target format.
    pub fn with_target_format(self, target_format: Option<MediaFormat>) -> Self {
        self.into_builder().target_format(target_format).build()
    }

    pub fn into_parts(self) -> TrackTransformParts {
        TrackTransformParts {
            source: self.source,
            source_track: self.source_track,
            target: self.target,
            target_track: self.target_track,
            decoder: self.decoder,
            renderer: self.renderer,
            encoder: self.encoder,
            target_format: self.target_format,
        }
    }
}

impl fmt::Debug for TrackTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackTransform")
            .field("source_track", &self.source_track)
            .field("target_track", &self.target_track)
            .field("decoder", &self.decoder.as_ref().map(|d| d.name().to_owned()))
            .field("encoder", &self.encoder.as_ref().map(|e| e.name().to_owned()))
            .field("has_filters", &self.has_filters())
            .field("target_format", &self.target_format)
            .finish()
    }
}

/// Builder for [`TrackTransform`].
///
/// The target track defaults to the source track index. When a
/// [`CodecProvider`] is attached, missing decoder and encoder stages of an
/// audio or video track are filled in from it at build time.
pub struct TrackTransformBuilder {
    source: SourceHandle,
    source_track: usize,
    target: TargetHandle,
    target_track: Option<usize>,
    decoder: Option<Box<dyn Decoder>>,
    renderer: Option<Box<dyn Renderer>>,
    encoder: Option<Box<dyn Encoder>>,
    target_format: Option<MediaFormat>,
    codecs: Option<Arc<dyn CodecProvider>>,
}

impl TrackTransformBuilder {
    pub fn new(source: SourceHandle, source_track: usize, target: TargetHandle) -> Self {
        Self {
            source,
            source_track,
            target,
            target_track: None,
            decoder: None,
            renderer: None,
            encoder: None,
            target_format: None,
            codecs: None,
        }
    }

    pub fn target_track(mut self, target_track: usize) -> Self {
        self.target_track = Some(target_track);
        self
    }

    pub fn decoder(mut self, decoder: Box<dyn Decoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn renderer(mut self, renderer: Box<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn encoder(mut self, encoder: Box<dyn Encoder>) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn target_format(mut self, target_format: Option<MediaFormat>) -> Self {
        self.target_format = target_format;
        self
    }

    /// Default missing codec stages from this provider.
    pub fn codecs(mut self, codecs: Arc<dyn CodecProvider>) -> Self {
        self.codecs = Some(codecs);
        self
    }

    pub fn build(self) -> TrackTransform {
        let mut decoder = self.decoder;
        let mut encoder = self.encoder;

        if let Some(codecs) = &self.codecs {
            let kind = self
                .source
                .track_format(self.source_track)
                .ok()
                .and_then(|f| f.kind());
            if let Some(kind @ (TrackKind::Video | TrackKind::Audio)) = kind {
                decoder.get_or_insert_with(|| codecs.decoder(kind));
                encoder.get_or_insert_with(|| codecs.encoder(kind));
            }
        }

        TrackTransform {
            source: self.source,
            source_track: self.source_track,
            target: self.target,
            target_track: self.target_track.unwrap_or(self.source_track),
            decoder,
            renderer: self.renderer,
            encoder,
            target_format: self.target_format,
        }
    }
}
