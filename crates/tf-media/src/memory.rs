//! In-memory implementations of the media capabilities.
//!
//! [`MemorySource`] serves pre-built samples, [`MemoryTarget`] records what
//! was written, and the identity codecs pass buffers through unchanged while
//! recording their configuration. Each can be told to fail at a given point
//! so error paths can be driven deterministically.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tf_core::{Container, Error, Frame, MediaFormat, MediaRange, Result, Stage, TrackKind};

use crate::codec::{CodecProvider, Decoder, Encoder};
use crate::source::MediaSource;
use crate::target::{MediaTarget, TargetOpener};

// ---------------------------------------------------------------------------
// MemorySource
// ---------------------------------------------------------------------------

struct MemoryTrack {
    format: MediaFormat,
    samples: Vec<Frame>,
}

/// A source holding every sample in memory, interleaved by timestamp.
pub struct MemorySource {
    tracks: Vec<MemoryTrack>,
    /// `(track, sample index)` in presentation order across tracks.
    order: Vec<(usize, usize)>,
    cursor: usize,
    selected: HashSet<usize>,
    size: Option<u64>,
    selection: MediaRange,
    orientation: i32,
    read_failure: Option<(usize, usize)>,
    released: Arc<AtomicBool>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySource {
    pub fn new() -> Self {
        Self {
            tracks: Vec::new(),
            order: Vec::new(),
            cursor: 0,
            selected: HashSet::new(),
            size: None,
            selection: MediaRange::full(),
            orientation: 0,
            read_failure: None,
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Append a track with its samples.
    pub fn with_track(mut self, format: MediaFormat, samples: Vec<Frame>) -> Self {
        self.tracks.push(MemoryTrack { format, samples });
        self.rebuild_order();
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_selection(mut self, selection: MediaRange) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_orientation(mut self, degrees: i32) -> Self {
        self.orientation = degrees;
        self
    }

    /// Make reading the `sample`-th sample of `track` fail.
    pub fn with_read_failure(mut self, track: usize, sample: usize) -> Self {
        self.read_failure = Some((track, sample));
        self
    }

    /// Flag set once [`MediaSource::release`] has been called.
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }

    fn rebuild_order(&mut self) {
        let mut order: Vec<(usize, usize)> = self
            .tracks
            .iter()
            .enumerate()
            .flat_map(|(t, track)| (0..track.samples.len()).map(move |s| (t, s)))
            .collect();
        order.sort_by_key(|&(t, s)| (self.tracks[t].samples[s].presentation_time_us, t));
        self.order = order;
        self.cursor = 0;
    }

    fn frame_at(&self, position: usize) -> Option<&Frame> {
        self.order
            .get(position)
            .map(|&(t, s)| &self.tracks[t].samples[s])
    }

    fn is_selected(&self, track: usize) -> bool {
        self.selected.is_empty() || self.selected.contains(&track)
    }

    fn skip_unselected(&mut self) {
        while let Some(&(track, _)) = self.order.get(self.cursor) {
            if self.is_selected(track) {
                break;
            }
            self.cursor += 1;
        }
    }
}

impl MediaSource for MemorySource {
    fn track_count(&self) -> usize {
        self.tracks.len()
    }

    fn track_format(&self, track: usize) -> Result<MediaFormat> {
        self.tracks
            .get(track)
            .map(|t| t.format.clone())
            .ok_or_else(|| Error::data_source(format!("no track {track}")))
    }

    fn select_track(&mut self, track: usize) -> Result<()> {
        if track >= self.tracks.len() {
            return Err(Error::data_source(format!("no track {track}")));
        }
        self.selected.insert(track);
        self.skip_unselected();
        Ok(())
    }

    fn seek_to(&mut self, position_us: i64) -> Result<()> {
        let sync_time = self
            .order
            .iter()
            .filter(|&&(t, _)| self.is_selected(t))
            .map(|&(t, s)| &self.tracks[t].samples[s])
            .filter(|f| f.key_frame && f.presentation_time_us <= position_us)
            .map(|f| f.presentation_time_us)
            .max()
            .unwrap_or(position_us);
        self.cursor = self
            .order
            .iter()
            .position(|&(t, s)| self.tracks[t].samples[s].presentation_time_us >= sync_time)
            .unwrap_or(self.order.len());
        self.skip_unselected();
        Ok(())
    }

    fn sample_track_index(&self) -> Option<usize> {
        self.order.get(self.cursor).map(|&(t, _)| t)
    }

    fn read_sample(&mut self) -> Result<Option<Frame>> {
        let Some(&(track, sample)) = self.order.get(self.cursor) else {
            return Ok(None);
        };
        if self.read_failure == Some((track, sample)) {
            return Err(Error::data_source(format!(
                "corrupt sample {sample} on track {track}"
            )));
        }
        Ok(self.frame_at(self.cursor).cloned())
    }

    fn sample_time_us(&self) -> Option<i64> {
        self.frame_at(self.cursor).map(|f| f.presentation_time_us)
    }

    fn advance(&mut self) -> bool {
        if self.cursor < self.order.len() {
            self.cursor += 1;
        }
        self.skip_unselected();
        self.cursor < self.order.len()
    }

    fn size(&self) -> Option<u64> {
        self.size
    }

    fn selection(&self) -> MediaRange {
        self.selection
    }

    fn orientation_hint(&self) -> i32 {
        self.orientation
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// Build `count` samples of `bytes` bytes each, spaced `interval_us` apart,
/// with a key frame every `key_every` samples.
pub fn synthetic_samples(count: usize, interval_us: i64, bytes: usize, key_every: usize) -> Vec<Frame> {
    (0..count)
        .map(|i| {
            Frame::new(vec![(i % 251) as u8; bytes], i as i64 * interval_us)
                .with_key_frame(key_every == 0 || i % key_every == 0)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// MemoryTarget
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct TargetState {
    formats: BTreeMap<usize, MediaFormat>,
    samples: BTreeMap<usize, Vec<Frame>>,
    orientation: Option<i32>,
    finalized: bool,
    writes: usize,
    fail_write_at: Option<usize>,
}

/// A target recording formats and samples. Clones share the same recording,
/// so a test can keep one clone while the transformer owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryTarget {
    state: Arc<Mutex<TargetState>>,
}

impl MemoryTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `nth` write (zero-based, across all tracks) fail.
    pub fn failing_write_at(self, nth: usize) -> Self {
        self.state.lock().fail_write_at = Some(nth);
        self
    }

    pub fn track_format(&self, target_track: usize) -> Option<MediaFormat> {
        self.state.lock().formats.get(&target_track).cloned()
    }

    pub fn track_count(&self) -> usize {
        self.state.lock().formats.len()
    }

    pub fn samples(&self, target_track: usize) -> Vec<Frame> {
        self.state
            .lock()
            .samples
            .get(&target_track)
            .cloned()
            .unwrap_or_default()
    }

    pub fn orientation_hint(&self) -> Option<i32> {
        self.state.lock().orientation
    }

    pub fn is_finalized(&self) -> bool {
        self.state.lock().finalized
    }
}

impl MediaTarget for MemoryTarget {
    fn set_track_format(&mut self, target_track: usize, format: &MediaFormat) -> Result<()> {
        self.state.lock().formats.insert(target_track, format.clone());
        Ok(())
    }

    fn write_sample(&mut self, target_track: usize, sample: &Frame) -> Result<()> {
        let mut state = self.state.lock();
        if state.finalized {
            return Err(Error::pipeline(Stage::Write, target_track, "target already finalized"));
        }
        if !state.formats.contains_key(&target_track) {
            return Err(Error::pipeline(
                Stage::Write,
                target_track,
                "sample written before the track format was set",
            ));
        }
        let nth = state.writes;
        state.writes += 1;
        if state.fail_write_at == Some(nth) {
            return Err(Error::Io {
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        state
            .samples
            .entry(target_track)
            .or_default()
            .push(sample.clone());
        Ok(())
    }

    fn set_orientation_hint(&mut self, degrees: i32) {
        self.state.lock().orientation = Some(degrees);
    }

    fn release(&mut self) -> Result<()> {
        self.state.lock().finalized = true;
        Ok(())
    }
}

/// Opener handing out clones of one [`MemoryTarget`].
#[derive(Debug, Clone)]
pub struct MemoryTargetOpener {
    target: MemoryTarget,
    failure: Option<String>,
    opened: Arc<Mutex<Vec<(usize, Container)>>>,
}

impl MemoryTargetOpener {
    pub fn new(target: MemoryTarget) -> Self {
        Self {
            target,
            failure: None,
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// An opener whose every `open` fails with the given reason.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            target: MemoryTarget::new(),
            failure: Some(reason.into()),
            opened: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// `(track_count, container)` of each successful `open`.
    pub fn opened(&self) -> Vec<(usize, Container)> {
        self.opened.lock().clone()
    }
}

impl TargetOpener for MemoryTargetOpener {
    fn open(&self, track_count: usize, container: Container) -> Result<Box<dyn MediaTarget>> {
        if let Some(reason) = &self.failure {
            return Err(Error::target_open(reason.clone()));
        }
        self.opened.lock().push((track_count, container));
        Ok(Box::new(self.target.clone()))
    }
}

// ---------------------------------------------------------------------------
// Identity codecs
// ---------------------------------------------------------------------------

/// Knobs shared by the identity codecs of one provider.
#[derive(Debug, Clone, Default)]
struct CodecBehavior {
    delay: Option<Duration>,
    fail_decode_at: Option<usize>,
    fail_encode_at: Option<usize>,
    created: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

/// Decoder returning each sample unchanged.
#[derive(Debug)]
pub struct IdentityDecoder {
    name: String,
    behavior: CodecBehavior,
    decoded: usize,
    format: Option<MediaFormat>,
}

impl IdentityDecoder {
    pub fn new(kind: TrackKind) -> Self {
        Self::with_behavior(kind, CodecBehavior::default())
    }

    fn with_behavior(kind: TrackKind, behavior: CodecBehavior) -> Self {
        Self {
            name: format!("identity-{kind}-decoder"),
            behavior,
            decoded: 0,
            format: None,
        }
    }
}

impl Decoder for IdentityDecoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, format: &MediaFormat) -> Result<()> {
        self.format = Some(format.clone());
        Ok(())
    }

    fn decode(&mut self, sample: Frame) -> Result<Vec<Frame>> {
        if let Some(delay) = self.behavior.delay {
            std::thread::sleep(delay);
        }
        let nth = self.decoded;
        self.decoded += 1;
        if self.behavior.fail_decode_at == Some(nth) {
            return Err(Error::data_source(format!("undecodable sample {nth}")));
        }
        Ok(vec![sample])
    }

    fn flush(&mut self) -> Result<Vec<Frame>> {
        Ok(Vec::new())
    }

    fn release(&mut self) {
        self.behavior.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Encoder returning each frame unchanged and reporting its configured
/// format as the output format.
#[derive(Debug)]
pub struct IdentityEncoder {
    name: String,
    behavior: CodecBehavior,
    encoded: usize,
    format: Option<MediaFormat>,
}

impl IdentityEncoder {
    pub fn new(kind: TrackKind) -> Self {
        Self::with_behavior(kind, CodecBehavior::default())
    }

    fn with_behavior(kind: TrackKind, behavior: CodecBehavior) -> Self {
        Self {
            name: format!("identity-{kind}-encoder"),
            behavior,
            encoded: 0,
            format: None,
        }
    }
}

impl Encoder for IdentityEncoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, format: &MediaFormat) -> Result<()> {
        self.format = Some(format.clone());
        Ok(())
    }

    fn output_format(&self) -> Option<MediaFormat> {
        self.format.clone()
    }

    fn encode(&mut self, frame: Frame) -> Result<Vec<Frame>> {
        let nth = self.encoded;
        self.encoded += 1;
        if self.behavior.fail_encode_at == Some(nth) {
            return Err(Error::data_source(format!("encoder rejected frame {nth}")));
        }
        Ok(vec![frame])
    }

    fn flush(&mut self) -> Result<Vec<Frame>> {
        Ok(Vec::new())
    }

    fn release(&mut self) {
        self.behavior.releases.fetch_add(1, Ordering::SeqCst);
    }
}

/// Provider of identity codecs.
#[derive(Debug, Clone, Default)]
pub struct MemoryCodecProvider {
    behavior: CodecBehavior,
}

impl MemoryCodecProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every decode call.
    pub fn with_decode_delay(mut self, delay: Duration) -> Self {
        self.behavior.delay = Some(delay);
        self
    }

    /// Fail the `nth` decode call of each decoder.
    pub fn failing_decode_at(mut self, nth: usize) -> Self {
        self.behavior.fail_decode_at = Some(nth);
        self
    }

    /// Fail the `nth` encode call of each encoder.
    pub fn failing_encode_at(mut self, nth: usize) -> Self {
        self.behavior.fail_encode_at = Some(nth);
        self
    }

    /// Number of codec instances handed out so far.
    pub fn created(&self) -> usize {
        self.behavior.created.load(Ordering::SeqCst)
    }

    /// Number of codec instances released so far.
    pub fn releases(&self) -> usize {
        self.behavior.releases.load(Ordering::SeqCst)
    }
}

impl CodecProvider for MemoryCodecProvider {
    fn decoder(&self, kind: TrackKind) -> Box<dyn Decoder> {
        self.behavior.created.fetch_add(1, Ordering::SeqCst);
        Box::new(IdentityDecoder::with_behavior(kind, self.behavior.clone()))
    }

    fn encoder(&self, kind: TrackKind) -> Box<dyn Encoder> {
        self.behavior.created.fetch_add(1, Ordering::SeqCst);
        Box::new(IdentityEncoder::with_behavior(kind, self.behavior.clone()))
    }
}
