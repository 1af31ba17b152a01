//! The per-request execution loop.
//!
//! A [`TransformationJob`] owns the track transforms of one request. Running
//! it configures every target track, drains each source track through its
//! decoder, renderer and encoder (or copies it when passed through), reports
//! progress, and finally releases every resource before delivering exactly
//! one terminal callback.

use std::sync::Arc;

use tf_core::{Error, Frame, JobId, MediaFormat, MediaRange, RequestId, Result, Stage};
use tf_media::{SourceHandle, TargetHandle};
use tokio_util::sync::CancellationToken;

use crate::info::{TrackStats, TrackTransformationInfo};
use crate::listener::TransformationListener;
use crate::progress::{GranularityGate, ProgressTracker};
use crate::transform::{TrackTransform, TrackTransformParts};

/// How a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Cancelled,
    Failed,
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobOutcome::Completed => write!(f, "completed"),
            JobOutcome::Cancelled => write!(f, "cancelled"),
            JobOutcome::Failed => write!(f, "failed"),
        }
    }
}

/// Why the sample loop stopped early.
enum Interrupted {
    Cancelled,
    Failed(Error),
}

impl From<Error> for Interrupted {
    fn from(err: Error) -> Self {
        Interrupted::Failed(err)
    }
}

/// One transformation request, ready to run on the worker.
pub struct TransformationJob {
    request_id: RequestId,
    job_id: JobId,
    transforms: Vec<TrackTransform>,
    granularity: u32,
    source_range: MediaRange,
    source_size: Option<u64>,
    network_source: bool,
    listener: Arc<dyn TransformationListener>,
    cancellation: CancellationToken,
}

impl TransformationJob {
    pub fn new(
        request_id: RequestId,
        transforms: Vec<TrackTransform>,
        granularity: u32,
        listener: Arc<dyn TransformationListener>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            request_id,
            job_id: JobId::new(),
            transforms,
            granularity,
            source_range: MediaRange::full(),
            source_size: None,
            network_source: false,
            listener,
            cancellation,
        }
    }

    /// Restrict the job to part of the source. A full range defers to the
    /// selection each source reports.
    pub fn with_source_range(mut self, range: MediaRange) -> Self {
        self.source_range = range;
        self
    }

    /// Source size in bytes for sources that cannot report it themselves,
    /// such as network streams. Used for progress when durations are
    /// unknown.
    pub fn with_source_size(mut self, size: Option<u64>) -> Self {
        self.source_size = size;
        self
    }

    /// Mark the source as streamed over the network. The size such a source
    /// reports is not trusted for progress; only the size given through
    /// [`with_source_size`](Self::with_source_size) is.
    pub fn with_network_source(mut self, network_source: bool) -> Self {
        self.network_source = network_source;
        self
    }

    fn size_hint(&self) -> SizeHint {
        SizeHint {
            bytes: self.source_size,
            trust_source: !self.network_source,
        }
    }

    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn track_count(&self) -> usize {
        self.transforms.len()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// End the job without running it: release its resources and report
    /// `error` as its terminal outcome.
    pub fn abort(self, error: Error) -> JobOutcome {
        let span = tracing::info_span!(
            "transformation_job",
            request_id = %self.request_id,
            job_id = %self.job_id,
        );
        let _guard = span.enter();

        let size_hint = self.size_hint();
        let mut tracks: Vec<TrackRun> = self
            .transforms
            .into_iter()
            .map(|t| TrackRun::new(t.into_parts(), self.source_range, size_hint))
            .collect();
        if let Err(err) = release_all(&mut tracks) {
            tracing::warn!(error = %err, "Release failed while aborting");
        }
        let infos: Vec<TrackTransformationInfo> =
            tracks.into_iter().map(|t| t.stats.into_info()).collect();

        tracing::error!(error = %error, "Job aborted before it started");
        self.listener
            .on_error(&self.request_id, &Arc::new(error), &infos);
        JobOutcome::Failed
    }

    /// Run the job to its terminal state on the calling thread.
    pub fn run(self) -> JobOutcome {
        let span = tracing::info_span!(
            "transformation_job",
            request_id = %self.request_id,
            job_id = %self.job_id,
        );
        let _guard = span.enter();

        let size_hint = self.size_hint();
        let TransformationJob {
            request_id,
            transforms,
            granularity,
            source_range,
            listener,
            cancellation,
            ..
        } = self;

        let mut tracks: Vec<TrackRun> = transforms
            .into_iter()
            .map(|t| TrackRun::new(t.into_parts(), source_range, size_hint))
            .collect();

        let result = if cancellation.is_cancelled() {
            tracing::info!("Job cancelled before it started");
            Err(Interrupted::Cancelled)
        } else {
            execute(&request_id, &mut tracks, granularity, listener.as_ref(), &cancellation)
        };

        let release_result = release_all(&mut tracks);
        let infos: Vec<TrackTransformationInfo> =
            tracks.into_iter().map(|t| t.stats.into_info()).collect();

        match (result, release_result) {
            (Ok(()), Ok(())) => {
                tracing::info!(tracks = infos.len(), "Job completed");
                listener.on_completed(&request_id, &infos);
                JobOutcome::Completed
            }
            (Ok(()), Err(err)) | (Err(Interrupted::Failed(err)), _) => {
                tracing::error!(error = %err, "Job failed");
                listener.on_error(&request_id, &Arc::new(err), &infos);
                JobOutcome::Failed
            }
            (Err(Interrupted::Cancelled), release_result) => {
                if let Err(err) = release_result {
                    tracing::warn!(error = %err, "Release failed after cancellation");
                }
                tracing::info!("Job cancelled");
                listener.on_cancelled(&request_id, &infos);
                JobOutcome::Cancelled
            }
        }
    }
}

impl std::fmt::Debug for TransformationJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformationJob")
            .field("request_id", &self.request_id)
            .field("job_id", &self.job_id)
            .field("transforms", &self.transforms)
            .field("granularity", &self.granularity)
            .finish_non_exhaustive()
    }
}

fn execute(
    request_id: &RequestId,
    tracks: &mut [TrackRun],
    granularity: u32,
    listener: &dyn TransformationListener,
    cancellation: &CancellationToken,
) -> std::result::Result<(), Interrupted> {
    for track in tracks.iter_mut() {
        track.setup()?;
    }

    tracing::info!(tracks = tracks.len(), granularity, "Job started");
    listener.on_started(request_id);

    let mut tracker = ProgressTracker::new(tracks.iter().map(|t| t.weight).collect());
    let mut gate = GranularityGate::new(granularity);

    for (index, track) in tracks.iter_mut().enumerate() {
        track.run(cancellation, |fraction| {
            tracker.update(index, fraction);
            if let Some(progress) = gate.update(tracker.overall()) {
                listener.on_progress(request_id, progress);
            }
        })?;
        tracker.complete(index);
        if let Some(progress) = gate.update(tracker.overall()) {
            listener.on_progress(request_id, progress);
        }
    }

    if let Some(progress) = gate.finish() {
        listener.on_progress(request_id, progress);
    }
    Ok(())
}

/// Release codecs and renderers of every track, then each distinct source
/// and target exactly once. Returns the first target finalization error.
fn release_all(tracks: &mut [TrackRun]) -> Result<()> {
    let mut sources: Vec<SourceHandle> = Vec::new();
    let mut targets: Vec<TargetHandle> = Vec::new();

    for track in tracks.iter_mut() {
        track.stats.stop();
        let parts = &mut track.parts;
        if let Some(decoder) = parts.decoder.as_mut() {
            decoder.release();
        }
        if let Some(renderer) = parts.renderer.as_mut() {
            renderer.release();
        }
        if let Some(encoder) = parts.encoder.as_mut() {
            encoder.release();
        }
        if !sources.iter().any(|s| s.same_as(&parts.source)) {
            sources.push(parts.source.clone());
        }
        if !targets.iter().any(|t| t.same_as(&parts.target)) {
            targets.push(parts.target.clone());
        }
    }

    for source in &sources {
        source.lock().release();
    }

    let mut first_error = None;
    for target in &targets {
        if let Err(err) = target.lock().release() {
            tracing::error!(error = %err, "Failed to finalize target");
            first_error.get_or_insert(err);
        }
    }
    match first_error {
        Some(err) => Err(err.at_stage(Stage::Write, 0)),
        None => Ok(()),
    }
}

/// Where the byte total used for progress may come from.
#[derive(Debug, Clone, Copy)]
struct SizeHint {
    bytes: Option<u64>,
    trust_source: bool,
}

/// Execution state of one track.
struct TrackRun {
    parts: TrackTransformParts,
    stats: TrackStats,
    range: MediaRange,
    source_format: Option<MediaFormat>,
    /// Track duration within the range, in microseconds; 0 when unknown.
    weight: i64,
    source_size: Option<u64>,
    bytes_read: u64,
    /// Timestamp written as 0 on pass-through; the earlier of the range
    /// start and the first sample read, which may be a preceding sync sample.
    pass_through_origin: Option<i64>,
}

impl TrackRun {
    fn new(parts: TrackTransformParts, job_range: MediaRange, size_hint: SizeHint) -> Self {
        let (source_format, range, source_size) = {
            let source = parts.source.lock();
            let range = if job_range.is_full() {
                source.selection()
            } else {
                job_range
            };
            let size = match size_hint.bytes {
                Some(bytes) => Some(bytes),
                None if size_hint.trust_source => source.size(),
                None => None,
            };
            (source.track_format(parts.source_track).ok(), range, size)
        };

        let weight = source_format
            .as_ref()
            .and_then(|f| f.duration_us)
            .map_or(0, |d| range.clamp_duration(d));

        let mut info = TrackTransformationInfo::new(parts.source_track, parts.target_track);
        info.source_format = source_format.clone();
        info.target_format = parts.target_format.clone();
        if parts.target_format.is_some() {
            info.decoder = parts.decoder.as_ref().map(|d| d.name().to_owned());
            info.encoder = parts.encoder.as_ref().map(|e| e.name().to_owned());
        }

        Self {
            parts,
            stats: TrackStats::new(info),
            range,
            source_format,
            weight,
            source_size,
            bytes_read: 0,
            pass_through_origin: None,
        }
    }

    fn track(&self) -> usize {
        self.parts.source_track
    }

    /// Configure codecs and declare the target track format.
    fn setup(&mut self) -> Result<()> {
        let track = self.track();
        let source_format = match &self.source_format {
            Some(format) => format.clone(),
            None => self
                .parts
                .source
                .track_format(track)
                .map_err(|e| e.at_stage(Stage::Setup, track))?,
        };

        let output_format = match &self.parts.target_format {
            Some(target_format) => {
                let decoder = self.parts.decoder.as_mut().ok_or_else(|| {
                    Error::pipeline(Stage::Setup, track, "transcoded track has no decoder")
                })?;
                decoder
                    .init(&source_format)
                    .map_err(|e| e.at_stage(Stage::Decode, track))?;

                if let Some(renderer) = self.parts.renderer.as_mut() {
                    renderer
                        .init(&source_format, target_format)
                        .map_err(|e| e.at_stage(Stage::Render, track))?;
                }

                let encoder = self.parts.encoder.as_mut().ok_or_else(|| {
                    Error::pipeline(Stage::Setup, track, "transcoded track has no encoder")
                })?;
                encoder
                    .init(target_format)
                    .map_err(|e| e.at_stage(Stage::Encode, track))?;
                encoder.output_format().unwrap_or_else(|| target_format.clone())
            }
            None => source_format.clone(),
        };

        let mut target = self.parts.target.lock();
        target
            .set_track_format(self.parts.target_track, &output_format)
            .map_err(|e| e.at_stage(Stage::Setup, track))?;

        if source_format.is_video() {
            let rotation = match source_format.rotation {
                Some(rotation) => rotation,
                None => self.parts.source.lock().orientation_hint(),
            };
            if rotation != 0 {
                target.set_orientation_hint(rotation);
            }
        }

        tracing::debug!(
            track,
            target_track = self.parts.target_track,
            pass_through = self.parts.target_format.is_none(),
            format = %output_format,
            "Track configured"
        );
        Ok(())
    }

    /// Drain this track, calling `on_progress` with the track's own
    /// completion fraction after every sample.
    fn run(
        &mut self,
        cancellation: &CancellationToken,
        mut on_progress: impl FnMut(f64),
    ) -> std::result::Result<(), Interrupted> {
        let track = self.track();
        self.stats.start();
        {
            let mut source = self.parts.source.lock();
            source
                .select_track(track)
                .and_then(|()| source.seek_to(self.range.start_us))
                .map_err(|e| e.at_stage(Stage::Read, track))?;
        }

        loop {
            if cancellation.is_cancelled() {
                tracing::info!(track, "Cancellation observed");
                return Err(Interrupted::Cancelled);
            }

            let Some(sample) = self.next_sample()? else {
                break;
            };
            let presentation_time_us = sample.presentation_time_us;
            self.bytes_read += sample.len() as u64;

            if self.parts.target_format.is_some() {
                self.transcode(sample)?;
            } else {
                let origin = *self
                    .pass_through_origin
                    .get_or_insert(presentation_time_us.min(self.range.start_us));
                let rebased = (presentation_time_us - origin).max(0);
                self.write(sample.with_presentation_time(rebased))?;
            }

            on_progress(self.fraction(presentation_time_us));
        }

        if self.parts.target_format.is_some() {
            self.flush()?;
        }
        self.stats.stop();
        tracing::debug!(
            track,
            samples = self.stats.info.samples,
            bytes = self.stats.info.bytes_written,
            "Track finished"
        );
        Ok(())
    }

    /// Next sample of this track inside the range, or `None` at end of
    /// stream.
    fn next_sample(&mut self) -> Result<Option<Frame>> {
        let track = self.track();
        let mut source = self.parts.source.lock();
        loop {
            match source.sample_track_index() {
                None => return Ok(None),
                Some(index) if index != track => {
                    source.advance();
                    continue;
                }
                Some(_) => {}
            }
            if source
                .sample_time_us()
                .is_some_and(|t| t >= self.range.end_us)
            {
                return Ok(None);
            }
            let sample = source
                .read_sample()
                .map_err(|e| e.at_stage(Stage::Read, track))?;
            source.advance();
            return Ok(sample);
        }
    }

    fn fraction(&self, presentation_time_us: i64) -> f64 {
        if self.weight > 0 {
            (presentation_time_us - self.range.start_us) as f64 / self.weight as f64
        } else {
            match self.source_size {
                Some(size) if size > 0 => self.bytes_read as f64 / size as f64,
                _ => 0.0,
            }
        }
    }

    fn transcode(&mut self, sample: Frame) -> Result<()> {
        let track = self.track();
        let decoded = match self.parts.decoder.as_mut() {
            Some(decoder) => decoder
                .decode(sample)
                .map_err(|e| e.at_stage(Stage::Decode, track))?,
            None => return Err(Error::pipeline(Stage::Decode, track, "no decoder")),
        };
        self.render_and_encode(decoded)
    }

    fn render_and_encode(&mut self, frames: Vec<Frame>) -> Result<()> {
        let track = self.track();
        for frame in frames {
            if frame.presentation_time_us < self.range.start_us {
                continue;
            }
            let rebased = frame.presentation_time_us - self.range.start_us;
            let frame = frame.with_presentation_time(rebased);

            let rendered = match self.parts.renderer.as_mut() {
                Some(renderer) => renderer
                    .render(frame)
                    .map_err(|e| e.at_stage(Stage::Render, track))?,
                None => Some(frame),
            };
            let Some(frame) = rendered else {
                continue;
            };

            let encoded = match self.parts.encoder.as_mut() {
                Some(encoder) => encoder
                    .encode(frame)
                    .map_err(|e| e.at_stage(Stage::Encode, track))?,
                None => return Err(Error::pipeline(Stage::Encode, track, "no encoder")),
            };
            for out in encoded {
                self.write(out)?;
            }
        }
        Ok(())
    }

    /// Drain frames still buffered in the decoder and encoder.
    fn flush(&mut self) -> Result<()> {
        let track = self.track();
        if let Some(decoder) = self.parts.decoder.as_mut() {
            let remaining = decoder
                .flush()
                .map_err(|e| e.at_stage(Stage::Decode, track))?;
            self.render_and_encode(remaining)?;
        }
        if let Some(encoder) = self.parts.encoder.as_mut() {
            let remaining = encoder
                .flush()
                .map_err(|e| e.at_stage(Stage::Encode, track))?;
            for out in remaining {
                self.write(out)?;
            }
        }
        Ok(())
    }

    fn write(&mut self, frame: Frame) -> Result<()> {
        let track = self.track();
        self.parts
            .target
            .lock()
            .write_sample(self.parts.target_track, &frame)
            .map_err(|e| e.at_stage(Stage::Write, track))?;
        self.stats
            .record_write(frame.presentation_time_us, frame.len());
        Ok(())
    }
}
