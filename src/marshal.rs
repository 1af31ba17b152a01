//! Redelivery of listener callbacks on a caller-chosen thread.
//!
//! The worker never calls client listeners itself when a callback context
//! is configured. Instead every event is posted as an envelope to a
//! [`CallbackLoop`], which the caller drives on the thread (or task) where
//! it wants its callbacks: by polling [`CallbackLoop::dispatch_pending`],
//! by parking a thread in [`CallbackLoop::run_blocking`], or by awaiting
//! [`CallbackLoop::run`].

use std::sync::Arc;

use tf_core::{Error, RequestId};
use tf_pipeline::{TrackTransformationInfo, TransformationListener};
use tokio::sync::mpsc;

use crate::registry::RequestRegistry;

/// A listener event with an owned payload.
#[derive(Debug, Clone)]
pub(crate) enum Callback {
    Started,
    Progress(f32),
    Completed(Vec<TrackTransformationInfo>),
    Cancelled(Vec<TrackTransformationInfo>),
    Error(Arc<Error>, Vec<TrackTransformationInfo>),
}

impl Callback {
    fn is_terminal(&self) -> bool {
        matches!(
            self,
            Callback::Completed(_) | Callback::Cancelled(_) | Callback::Error(..)
        )
    }

    fn deliver(self, listener: &dyn TransformationListener, request_id: &RequestId) {
        match self {
            Callback::Started => listener.on_started(request_id),
            Callback::Progress(progress) => listener.on_progress(request_id, progress),
            Callback::Completed(info) => listener.on_completed(request_id, &info),
            Callback::Cancelled(info) => listener.on_cancelled(request_id, &info),
            Callback::Error(error, info) => listener.on_error(request_id, &error, &info),
        }
    }
}

struct Envelope {
    request_id: RequestId,
    listener: Arc<dyn TransformationListener>,
    callback: Callback,
}

/// Sending half of a callback channel. Cheap to clone.
#[derive(Clone)]
pub struct CallbackContext {
    tx: mpsc::UnboundedSender<Envelope>,
}

impl std::fmt::Debug for CallbackContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackContext")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

/// Receiving half of a callback channel: delivers callbacks wherever it is
/// driven, in the order they were posted.
pub struct CallbackLoop {
    rx: mpsc::UnboundedReceiver<Envelope>,
}

/// Create a connected context and loop.
pub fn callback_channel() -> (CallbackContext, CallbackLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CallbackContext { tx }, CallbackLoop { rx })
}

impl CallbackContext {
    /// Post an envelope, handing it back if the loop is gone.
    fn post(&self, envelope: Envelope) -> std::result::Result<(), Envelope> {
        self.tx.send(envelope).map_err(|e| e.0)
    }
}

impl CallbackLoop {
    /// Deliver everything already posted without waiting. Returns the number
    /// of callbacks delivered.
    pub fn dispatch_pending(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok(envelope) = self.rx.try_recv() {
            dispatch(envelope);
            delivered += 1;
        }
        delivered
    }

    /// Deliver callbacks on the current thread until every context is
    /// dropped. Must not be called from inside an async runtime.
    pub fn run_blocking(mut self) {
        while let Some(envelope) = self.rx.blocking_recv() {
            dispatch(envelope);
        }
    }

    /// Deliver callbacks on the current task until every context is
    /// dropped.
    pub async fn run(mut self) {
        while let Some(envelope) = self.rx.recv().await {
            dispatch(envelope);
        }
    }
}

fn dispatch(envelope: Envelope) {
    envelope
        .callback
        .deliver(envelope.listener.as_ref(), &envelope.request_id);
}

/// Listener placed between a job and the client listener.
///
/// It forgets the request in the registry before a terminal callback goes
/// out, so the id can be reused as soon as the client sees the outcome, and
/// redelivers every callback through the configured context, or directly
/// when there is none.
pub(crate) struct MarshallingListener {
    inner: Arc<dyn TransformationListener>,
    context: Option<CallbackContext>,
    registry: Arc<RequestRegistry>,
}

impl MarshallingListener {
    pub(crate) fn new(
        inner: Arc<dyn TransformationListener>,
        context: Option<CallbackContext>,
        registry: Arc<RequestRegistry>,
    ) -> Self {
        Self {
            inner,
            context,
            registry,
        }
    }

    fn forward(&self, request_id: &RequestId, callback: Callback) {
        if callback.is_terminal() {
            self.registry.remove(request_id);
        }

        let Some(context) = &self.context else {
            callback.deliver(self.inner.as_ref(), request_id);
            return;
        };

        let envelope = Envelope {
            request_id: request_id.clone(),
            listener: Arc::clone(&self.inner),
            callback,
        };
        if let Err(envelope) = context.post(envelope) {
            tracing::warn!(%request_id, "Callback loop is gone; delivering on the calling thread");
            dispatch(envelope);
        }
    }
}

impl TransformationListener for MarshallingListener {
    fn on_started(&self, request_id: &RequestId) {
        self.forward(request_id, Callback::Started);
    }

    fn on_progress(&self, request_id: &RequestId, progress: f32) {
        self.forward(request_id, Callback::Progress(progress));
    }

    fn on_completed(&self, request_id: &RequestId, info: &[TrackTransformationInfo]) {
        self.forward(request_id, Callback::Completed(info.to_vec()));
    }

    fn on_cancelled(&self, request_id: &RequestId, info: &[TrackTransformationInfo]) {
        self.forward(request_id, Callback::Cancelled(info.to_vec()));
    }

    fn on_error(
        &self,
        request_id: &RequestId,
        error: &Arc<Error>,
        info: &[TrackTransformationInfo],
    ) {
        self.forward(request_id, Callback::Error(Arc::clone(error), info.to_vec()));
    }
}
