//! Controller doubles for exercising bridges without a scripting runtime.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::{DeliveryError, ScriptError};
use crate::ids::StreamId;
use crate::sink::{FrameSink, MethodLookup, ScriptObject};

/// A [`FrameSink`] that records every delivered frame.
#[derive(Debug, Default)]
pub struct RecordingSink {
    frames: Mutex<Vec<(StreamId, Vec<u8>)>>,
    delay: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every delivery, simulating a slow renderer.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn frames(&self) -> Vec<(StreamId, Vec<u8>)> {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FrameSink for RecordingSink {
    fn deliver_frame(&self, stream_id: StreamId, frame: &[u8]) -> Result<(), DeliveryError> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.frames
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((stream_id, frame.to_vec()));
        Ok(())
    }
}

/// One recorded method invocation on a [`ScriptedObject`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: String,
    pub stream_id: StreamId,
    pub frame: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Behavior {
    Callable,
    NotCallable,
    Missing,
    Failing(String),
}

/// A [`ScriptObject`] with scripted lookup results, for testing [`ControllerSink`].
///
/// [`ControllerSink`]: crate::sink::ControllerSink
#[derive(Debug)]
pub struct ScriptedObject {
    behavior: Behavior,
    calls: Mutex<Vec<RecordedCall>>,
    pending_error: Mutex<Option<ScriptError>>,
}

impl ScriptedObject {
    fn with_behavior(behavior: Behavior) -> Self {
        Self {
            behavior,
            calls: Mutex::new(Vec::new()),
            pending_error: Mutex::new(None),
        }
    }

    pub fn callable() -> Self {
        Self::with_behavior(Behavior::Callable)
    }

    /// The method property exists but holds a non-function value.
    pub fn not_callable() -> Self {
        Self::with_behavior(Behavior::NotCallable)
    }

    pub fn missing() -> Self {
        Self::with_behavior(Behavior::Missing)
    }

    /// The method exists and raises `message` when called.
    pub fn failing(message: &str) -> Self {
        Self::with_behavior(Behavior::Failing(message.to_string()))
    }

    pub fn set_pending_error(&self, message: &str) {
        *self
            .pending_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(ScriptError::new(message));
    }

    pub fn pending_error(&self) -> Option<ScriptError> {
        self.pending_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ScriptObject for ScriptedObject {
    fn clear_pending_error(&self) -> Option<ScriptError> {
        self.pending_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn lookup_method(&self, _name: &str) -> MethodLookup {
        match self.behavior {
            Behavior::Callable | Behavior::Failing(_) => MethodLookup::Callable,
            Behavior::NotCallable => MethodLookup::NotCallable,
            Behavior::Missing => MethodLookup::Missing,
        }
    }

    fn call_method(
        &self,
        name: &str,
        stream_id: StreamId,
        frame: &[u8],
    ) -> Result<(), ScriptError> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RecordedCall {
                method: name.to_string(),
                stream_id,
                frame: frame.to_vec(),
            });
        match &self.behavior {
            Behavior::Failing(message) => Err(ScriptError::new(message.clone())),
            _ => Ok(()),
        }
    }
}
