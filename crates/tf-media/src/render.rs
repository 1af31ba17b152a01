//! The renderer stage between decoder and encoder.

use tf_core::{Frame, MediaFormat, Result, SharedFilter, TrackKind};

/// Consumes decoded frames and produces frames for the encoder.
pub trait Renderer: Send {
    /// Prepare for a track going from `source` to `target` format.
    fn init(&mut self, source: &MediaFormat, target: &MediaFormat) -> Result<()>;

    /// Whether any filter is active. A track whose renderer has filters is
    /// always transcoded.
    fn has_filters(&self) -> bool;

    /// Render one decoded frame. `None` drops the frame.
    fn render(&mut self, frame: Frame) -> Result<Option<Frame>>;

    fn release(&mut self);
}

/// Renderer applying an ordered filter chain to every frame.
#[derive(Debug)]
pub struct FilterChainRenderer {
    kind: TrackKind,
    filters: Vec<SharedFilter>,
}

impl FilterChainRenderer {
    pub fn new(kind: TrackKind, filters: Vec<SharedFilter>) -> Self {
        Self { kind, filters }
    }

    pub fn video(filters: Vec<SharedFilter>) -> Self {
        Self::new(TrackKind::Video, filters)
    }

    pub fn audio(filters: Vec<SharedFilter>) -> Self {
        Self::new(TrackKind::Audio, filters)
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn filter_names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name()).collect()
    }
}

impl Renderer for FilterChainRenderer {
    fn init(&mut self, _source: &MediaFormat, target: &MediaFormat) -> Result<()> {
        for filter in &self.filters {
            filter.init(target)?;
        }
        Ok(())
    }

    fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    fn render(&mut self, frame: Frame) -> Result<Option<Frame>> {
        let mut frame = frame;
        for filter in &self.filters {
            frame = filter.apply(frame)?;
        }
        Ok(Some(frame))
    }

    fn release(&mut self) {
        for filter in &self.filters {
            filter.release();
        }
    }
}
