//! Live requests keyed by id.

use std::collections::HashMap;

use parking_lot::Mutex;
use tf_core::{Error, RequestId, Result};
use tokio_util::sync::CancellationToken;

/// Tracks the cancellation token of every request that has been accepted
/// and has not reached a terminal callback yet.
///
/// Once closed the registry accepts nothing new. Closing and registering
/// share one lock, so every request is either cancelled by
/// [`RequestRegistry::close`] or rejected by [`RequestRegistry::register`].
#[derive(Debug, Default)]
pub struct RequestRegistry {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<RequestId, CancellationToken>,
    closed: bool,
}

impl RequestRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new request and hand back its cancellation token.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Released`] once the registry is closed and
    /// [`Error::DuplicateRequest`] if the id is still live.
    pub fn register(&self, request_id: &RequestId) -> Result<CancellationToken> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(Error::Released);
        }
        if inner.entries.contains_key(request_id) {
            return Err(Error::DuplicateRequest(request_id.clone()));
        }
        let token = CancellationToken::new();
        inner.entries.insert(request_id.clone(), token.clone());
        Ok(token)
    }

    /// Forget a request. Returns whether it was registered.
    pub fn remove(&self, request_id: &RequestId) -> bool {
        self.inner.lock().entries.remove(request_id).is_some()
    }

    /// Request cooperative cancellation. Unknown ids are ignored.
    pub fn cancel(&self, request_id: &RequestId) -> bool {
        match self.inner.lock().entries.get(request_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Stop accepting requests and cancel every live one. Returns how many
    /// were cancelled. Closing twice is harmless.
    pub fn close(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.closed = true;
        for token in inner.entries.values() {
            token.cancel();
        }
        inner.entries.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    pub fn contains(&self, request_id: &RequestId) -> bool {
        self.inner.lock().entries.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}
