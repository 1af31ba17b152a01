//! The orchestrator: accepts requests, negotiates formats, and hands jobs to
//! the worker.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tf_core::config::TransformerConfig;
use tf_core::{
    Container, Error, MediaFormat, MediaRange, RequestId, Result, TargetConstructionError,
    TrackKind, TransformationOptions,
};
use tf_media::{
    BitrateEstimator, CodecProvider, DefaultEstimator, FilterChainRenderer, SourceHandle,
    TargetHandle, TargetOpener, TrackEstimate,
};
use tf_pipeline::{
    apply_formats, count_included_tracks, should_include_track, FormatNegotiator, TrackTransform,
    TransformationJob, TransformationListener,
};
use tokio_util::sync::CancellationToken;

use crate::marshal::{CallbackContext, MarshallingListener};
use crate::registry::RequestRegistry;
use crate::worker::Worker;

/// Everything needed to transform one source into a freshly opened target.
pub struct TransformRequest {
    pub source: SourceHandle,
    /// Opens the target once the track count and container are known.
    pub target: Arc<dyn TargetOpener>,
    /// Requested video format; `None` keeps the source video where possible.
    pub video_format: Option<MediaFormat>,
    /// Requested audio format; `None` keeps the source audio where possible.
    pub audio_format: Option<MediaFormat>,
    pub options: TransformationOptions,
}

impl std::fmt::Debug for TransformRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransformRequest")
            .field("video_format", &self.video_format)
            .field("audio_format", &self.audio_format)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Runs transformation requests one at a time on a dedicated worker thread.
///
/// Request ids are unique among live requests: a second request with the
/// id of one that has not delivered its terminal callback yet is rejected.
/// After [`MediaTransformer::release`] every call fails with
/// [`Error::Released`].
pub struct MediaTransformer {
    config: TransformerConfig,
    codecs: Arc<dyn CodecProvider>,
    estimator: Arc<dyn BitrateEstimator>,
    negotiator: FormatNegotiator,
    registry: Arc<RequestRegistry>,
    worker: Worker,
    context: Mutex<Option<CallbackContext>>,
    released: AtomicBool,
}

impl MediaTransformer {
    /// Create a transformer whose callbacks fire on the worker thread.
    pub fn new(config: TransformerConfig, codecs: Arc<dyn CodecProvider>) -> Result<Self> {
        Self::build(config, codecs, None)
    }

    /// Create a transformer whose callbacks are redelivered through
    /// `context`, in order, wherever its [`CallbackLoop`] is driven.
    ///
    /// [`CallbackLoop`]: crate::marshal::CallbackLoop
    pub fn with_callback_context(
        config: TransformerConfig,
        codecs: Arc<dyn CodecProvider>,
        context: CallbackContext,
    ) -> Result<Self> {
        Self::build(config, codecs, Some(context))
    }

    fn build(
        config: TransformerConfig,
        codecs: Arc<dyn CodecProvider>,
        context: Option<CallbackContext>,
    ) -> Result<Self> {
        for warning in config.validate() {
            tracing::warn!("Config: {warning}");
        }

        let estimator: Arc<dyn BitrateEstimator> =
            Arc::new(DefaultEstimator::new(config.estimation.clone()));
        let negotiator = FormatNegotiator::new(config.negotiation.clone(), Arc::clone(&estimator));
        let worker = Worker::spawn(&config.worker.thread_name)?;

        tracing::info!(thread = %config.worker.thread_name, "Media transformer ready");
        Ok(Self {
            config,
            codecs,
            estimator,
            negotiator,
            registry: Arc::new(RequestRegistry::new()),
            worker,
            context: Mutex::new(context),
            released: AtomicBool::new(false),
        })
    }

    /// Replace the estimator used for bitrate negotiation and size estimates.
    pub fn with_estimator(mut self, estimator: Arc<dyn BitrateEstimator>) -> Self {
        self.negotiator = FormatNegotiator::new(self.config.negotiation.clone(), Arc::clone(&estimator));
        self.estimator = estimator;
        self
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    /// Options pre-filled from the configuration.
    pub fn default_options(&self) -> TransformationOptions {
        TransformationOptions::builder()
            .granularity(self.config.default_granularity)
            .build()
    }

    /// Number of requests that have not reached a terminal callback yet.
    pub fn active_requests(&self) -> usize {
        self.registry.len()
    }

    pub fn is_active(&self, request_id: &RequestId) -> bool {
        self.registry.contains(request_id)
    }

    /// Queue a transformation described track by track.
    ///
    /// Target formats are negotiated now; a negotiation failure is reported
    /// through `listener.on_error` and the request never starts.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateRequest`] when `request_id` is still live, and
    /// [`Error::Released`] after [`release`](Self::release). Nothing is
    /// reported to the listener in either case.
    pub fn submit(
        &self,
        request_id: impl Into<RequestId>,
        transforms: Vec<TrackTransform>,
        listener: Arc<dyn TransformationListener>,
        granularity: u32,
    ) -> Result<()> {
        let request_id = request_id.into();
        self.ensure_open()?;
        let cancellation = self.registry.register(&request_id)?;
        let listener = self.marshal(listener);

        tracing::info!(%request_id, tracks = transforms.len(), "Request submitted");
        self.schedule(Submission {
            request_id,
            transforms,
            listener,
            cancellation,
            granularity,
            source_range: MediaRange::full(),
            source_size: None,
            network_source: false,
        })
    }

    /// Transform a whole source into a target opened for the occasion.
    ///
    /// Tracks are selected according to the options, one descriptor per
    /// included track is built with codecs from the codec provider, and the
    /// result is submitted like [`submit`](Self::submit). Failures after the
    /// request is accepted, such as no remaining tracks or a target that
    /// cannot be opened, are reported through `listener.on_error`.
    ///
    /// # Errors
    ///
    /// [`Error::DuplicateRequest`] and [`Error::Released`], as for `submit`.
    /// Nothing is opened in that case.
    pub fn transform(
        &self,
        request_id: impl Into<RequestId>,
        request: TransformRequest,
        listener: Arc<dyn TransformationListener>,
    ) -> Result<()> {
        let request_id = request_id.into();
        self.ensure_open()?;
        let cancellation = self.registry.register(&request_id)?;
        let listener = self.marshal(listener);

        let TransformRequest {
            source,
            target,
            video_format,
            audio_format,
            options,
        } = request;

        let track_count = {
            let source = source.lock();
            count_included_tracks(&**source, options.remove_audio, options.remove_metadata)
        };
        if track_count == 0 {
            source.lock().release();
            fail_early(&request_id, &listener, TargetConstructionError::NoOutputTracks.into());
            return Ok(());
        }

        let container = Container::for_video_mime(video_format.as_ref().and_then(|f| f.mime()));
        let target = match target.open(track_count, container) {
            Ok(target) => TargetHandle::from_boxed(target),
            Err(err) => {
                source.lock().release();
                fail_early(&request_id, &listener, err);
                return Ok(());
            }
        };
        tracing::info!(%request_id, track_count, %container, "Target opened");

        let transforms =
            match self.build_transforms(&source, &target, video_format, audio_format, &options) {
                Ok(transforms) => transforms,
                Err(err) => {
                    source.lock().release();
                    if let Err(release_err) = target.lock().release() {
                        tracing::warn!(%request_id, error = %release_err, "Failed to finalize target");
                    }
                    fail_early(&request_id, &listener, err);
                    return Ok(());
                }
            };
        let submission = Submission {
            request_id,
            transforms,
            listener,
            cancellation,
            granularity: options.granularity,
            source_range: options.source_range,
            source_size: options.source_size,
            network_source: options.network_source,
        };
        self.schedule(submission)
    }

    /// Request cooperative cancellation. Unknown or finished ids are
    /// ignored.
    pub fn cancel(&self, request_id: &RequestId) {
        if self.registry.cancel(request_id) {
            tracing::info!(%request_id, "Cancellation requested");
        } else {
            tracing::debug!(%request_id, "Cancel ignored; request is not live");
        }
    }

    /// Cancel everything and stop the worker. Queued requests each report
    /// `on_cancelled`. Safe to call more than once.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let cancelled = self.registry.close();
        tracing::info!(cancelled, "Releasing media transformer");
        self.worker.shutdown();
        self.context.lock().take();
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Estimated output size in bytes for transforming `source` with the
    /// given requested formats, or `-1` when it cannot be estimated.
    pub fn estimated_target_size(
        &self,
        source: &SourceHandle,
        video_format: Option<&MediaFormat>,
        audio_format: Option<&MediaFormat>,
        options: &TransformationOptions,
    ) -> i64 {
        let formats: Vec<MediaFormat> = {
            let source = source.lock();
            (0..source.track_count())
                .filter_map(|track| source.track_format(track).ok())
                .filter(|f| should_include_track(f.mime(), options.remove_audio, options.remove_metadata))
                .collect()
        };
        let tracks: Vec<TrackEstimate<'_>> = formats
            .iter()
            .map(|format| TrackEstimate {
                source: format,
                target: match format.kind() {
                    Some(TrackKind::Video) => video_format,
                    Some(TrackKind::Audio) => audio_format,
                    _ => None,
                },
            })
            .collect();
        self.estimator
            .estimate_target_file_size(&tracks, options.source_range)
    }

    /// Estimated output size in bytes for a set of track descriptors, or
    /// `-1` when it cannot be estimated.
    pub fn estimated_target_size_for(&self, transforms: &[TrackTransform]) -> i64 {
        let formats: Vec<(MediaFormat, Option<&MediaFormat>)> = transforms
            .iter()
            .filter_map(|t| t.source_format().ok().map(|f| (f, t.target_format())))
            .collect();
        let selection = transforms
            .first()
            .map(|t| t.source().lock().selection())
            .unwrap_or_default();
        let tracks: Vec<TrackEstimate<'_>> = formats
            .iter()
            .map(|(source, target)| TrackEstimate {
                source,
                target: *target,
            })
            .collect();
        self.estimator.estimate_target_file_size(&tracks, selection)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_released() {
            Err(Error::Released)
        } else {
            Ok(())
        }
    }

    fn marshal(&self, listener: Arc<dyn TransformationListener>) -> Arc<dyn TransformationListener> {
        Arc::new(MarshallingListener::new(
            listener,
            self.context.lock().clone(),
            Arc::clone(&self.registry),
        ))
    }

    /// One descriptor per included source track, numbered densely in the
    /// target.
    ///
    /// Every fallible check runs before the first codec is requested, so a
    /// rejected source never leaves unreleased codecs behind.
    fn build_transforms(
        &self,
        source: &SourceHandle,
        target: &TargetHandle,
        video_format: Option<MediaFormat>,
        audio_format: Option<MediaFormat>,
        options: &TransformationOptions,
    ) -> Result<Vec<TrackTransform>> {
        let included: Vec<(usize, MediaFormat)> = {
            let source = source.lock();
            let mut included = Vec::new();
            for track in 0..source.track_count() {
                let format = source.track_format(track)?;
                if should_include_track(format.mime(), options.remove_audio, options.remove_metadata) {
                    included.push((track, format));
                }
            }
            included
        };

        for (track, format) in &included {
            if format.is_video() {
                self.negotiator.check_dimensions(*track, format, options)?;
            }
        }

        let transforms = included
            .into_iter()
            .enumerate()
            .map(|(target_track, (track, format))| {
                let builder = TrackTransform::builder(source.clone(), track, target.clone())
                    .target_track(target_track);
                match format.kind() {
                    Some(TrackKind::Video) => builder
                        .codecs(Arc::clone(&self.codecs))
                        .renderer(Box::new(FilterChainRenderer::video(options.video_filters.clone())))
                        .target_format(video_format.clone())
                        .build(),
                    Some(TrackKind::Audio) => builder
                        .codecs(Arc::clone(&self.codecs))
                        .renderer(Box::new(FilterChainRenderer::audio(options.audio_filters.clone())))
                        .target_format(audio_format.clone())
                        .build(),
                    _ => builder.build(),
                }
            })
            .collect();
        Ok(transforms)
    }

    /// Negotiate target formats and hand the job to the worker. A
    /// negotiation failure ends the request through its listener.
    fn schedule(&self, mut submission: Submission) -> Result<()> {
        match self.negotiator.resolve_all(&submission.transforms) {
            Ok(formats) => {
                let transforms = std::mem::take(&mut submission.transforms);
                submission.transforms = apply_formats(transforms, formats);
            }
            Err(err) => {
                tracing::warn!(request_id = %submission.request_id, error = %err, "Negotiation failed");
                submission.into_job().abort(err);
                return Ok(());
            }
        }

        let request_id = submission.request_id.clone();
        match self.worker.submit(submission.into_job()) {
            Ok(()) => tracing::debug!(%request_id, "Request queued"),
            Err(job) => {
                // Registered before the registry closed, queued after the
                // worker stopped.
                tracing::debug!(%request_id, "Worker already stopped; ending request");
                job.cancellation_token().cancel();
                job.run();
            }
        }
        Ok(())
    }
}

/// An accepted request on its way to becoming a job.
struct Submission {
    request_id: RequestId,
    transforms: Vec<TrackTransform>,
    listener: Arc<dyn TransformationListener>,
    cancellation: CancellationToken,
    granularity: u32,
    source_range: MediaRange,
    source_size: Option<u64>,
    network_source: bool,
}

impl Submission {
    fn into_job(self) -> TransformationJob {
        TransformationJob::new(
            self.request_id,
            self.transforms,
            self.granularity,
            self.listener,
            self.cancellation,
        )
        .with_source_range(self.source_range)
        .with_source_size(self.source_size)
        .with_network_source(self.network_source)
    }
}

impl Drop for MediaTransformer {
    fn drop(&mut self) {
        self.release();
    }
}

fn fail_early(request_id: &RequestId, listener: &Arc<dyn TransformationListener>, error: Error) {
    tracing::error!(%request_id, error = %error, "Request failed before it was scheduled");
    listener.on_error(request_id, &Arc::new(error), &[]);
}
