//! The boundary between the bridge and a scripting runtime.
//!
//! [`FrameSink`] is the single capability the bridge needs from a controller.
//! Runtimes with dynamic objects implement [`ScriptObject`] instead and wrap
//! it in [`ControllerSink`], which performs the per-call method lookup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::Config;
use crate::error::{DeliveryError, ScriptError};
use crate::ids::StreamId;

/// Receives frames on the script executor.
///
/// `frame` is only borrowed for the duration of the call; implementations
/// that keep pixels around must copy them.
pub trait FrameSink: Send + Sync {
    fn deliver_frame(&self, stream_id: StreamId, frame: &[u8]) -> Result<(), DeliveryError>;
}

/// Counted reference to a bound controller.
pub type Controller = Arc<dyn FrameSink>;

/// Result of resolving a named property on a script object.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MethodLookup {
    Callable,
    NotCallable,
    Missing,
}

/// Runtime-specific view of a script-side controller object.
///
/// All methods are invoked on the script executor, one at a time.
pub trait ScriptObject: Send + Sync {
    /// Clear any error left pending in the runtime context, returning it.
    fn clear_pending_error(&self) -> Option<ScriptError> {
        None
    }

    fn lookup_method(&self, name: &str) -> MethodLookup;

    /// Convert the id and buffer to runtime values and invoke `name` with them.
    fn call_method(&self, name: &str, stream_id: StreamId, frame: &[u8])
        -> Result<(), ScriptError>;
}

/// Adapts a [`ScriptObject`] to [`FrameSink`].
///
/// The method is resolved on every call, so a controller may define it after
/// binding. A missing or non-callable method is reported as a
/// [`DeliveryError`] and logged once per controller.
pub struct ControllerSink<O> {
    object: O,
    method: String,
    warned: AtomicBool,
}

impl<O: ScriptObject> ControllerSink<O> {
    pub fn new(object: O, config: &Config) -> Self {
        Self::with_method(object, config.controller_method.clone())
    }

    pub fn with_method(object: O, method: impl Into<String>) -> Self {
        Self {
            object,
            method: method.into(),
            warned: AtomicBool::new(false),
        }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn object(&self) -> &O {
        &self.object
    }

    fn warn_once(&self, stream_id: StreamId, err: &DeliveryError) {
        if !self.warned.swap(true, Ordering::Relaxed) {
            log::warn!("stream {stream_id}: {err}; frames will not be rendered");
        }
    }
}

impl<O: ScriptObject> FrameSink for ControllerSink<O> {
    fn deliver_frame(&self, stream_id: StreamId, frame: &[u8]) -> Result<(), DeliveryError> {
        if let Some(stale) = self.object.clear_pending_error() {
            log::warn!("stream {stream_id}: cleared pending script error: {stale}");
        }

        let unavailable = match self.object.lookup_method(&self.method) {
            MethodLookup::Callable => None,
            MethodLookup::NotCallable => Some(DeliveryError::MethodNotCallable {
                method: self.method.clone(),
            }),
            MethodLookup::Missing => Some(DeliveryError::MethodMissing {
                method: self.method.clone(),
            }),
        };
        if let Some(err) = unavailable {
            self.warn_once(stream_id, &err);
            return Err(err);
        }

        self.object
            .call_method(&self.method, stream_id, frame)
            .map_err(DeliveryError::from)
    }
}
