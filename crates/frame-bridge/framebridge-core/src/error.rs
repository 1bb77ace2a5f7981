//! Error types for configuration, executors, deliveries and bridge setup.

use thiserror::Error;

use crate::ids::StreamId;

/// Configuration failed to parse or validate.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("executor.queue_capacity must be at least 1")]
    ZeroQueueCapacity,
    #[error("controller_method must not be empty")]
    EmptyControllerMethod,
    #[error("executor.thread_name must not be empty")]
    EmptyThreadName,
}

/// A task could not be handed to the script executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("script executor has shut down")]
    Closed,
    #[error("script queue is full ({capacity} tasks pending)")]
    Saturated { capacity: usize },
    #[error("failed to spawn script thread: {0}")]
    Spawn(String),
}

/// An error raised inside the scripting runtime.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a frame did not reach the controller's method.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("controller has no `{method}` property")]
    MethodMissing { method: String },
    #[error("controller property `{method}` is not callable")]
    MethodNotCallable { method: String },
    #[error("script call failed: {0}")]
    Script(#[from] ScriptError),
}

impl DeliveryError {
    /// Missing or non-callable method: a host integration problem, not a per-frame failure.
    pub fn is_method_unavailable(&self) -> bool {
        matches!(
            self,
            DeliveryError::MethodMissing { .. } | DeliveryError::MethodNotCallable { .. }
        )
    }
}

/// Setup errors. These indicate integration mistakes and are returned eagerly.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Executor(#[from] ExecutorError),
    #[error("invalid controller: {0}")]
    InvalidController(String),
    #[error("unknown stream {0}")]
    UnknownStream(StreamId),
}
