//! Bridge and executor configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Method invoked on the bound controller for every frame.
pub const DEFAULT_CONTROLLER_METHOD: &str = "updateRendererFrameBuffer";
pub const DEFAULT_THREAD_NAME: &str = "framebridge-script";
pub const DEFAULT_QUEUE_CAPACITY: usize = 8;

/// What a producer experiences when the script queue is full.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backpressure {
    /// The producer thread waits until the script side frees a slot.
    #[default]
    Block,
    /// The incoming frame is rejected and counted in `frames_rejected`.
    DropNewest,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub thread_name: String,
    /// Maximum number of posted calls waiting to run.
    pub queue_capacity: usize,
    pub backpressure: Backpressure,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backpressure: Backpressure::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Name of the controller method that receives `(streamId, buffer)`.
    pub controller_method: String,
    pub executor: ExecutorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            controller_method: DEFAULT_CONTROLLER_METHOD.to_string(),
            executor: ExecutorConfig::default(),
        }
    }
}

impl Config {
    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let cfg: Config = serde_json::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.controller_method.trim().is_empty() {
            return Err(ConfigError::EmptyControllerMethod);
        }
        self.executor.validate()
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::ZeroQueueCapacity);
        }
        if self.thread_name.trim().is_empty() {
            return Err(ConfigError::EmptyThreadName);
        }
        Ok(())
    }
}
