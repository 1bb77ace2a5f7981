//! framebridge-core: forwards decoded video frames into a scripting runtime.
//!
//! A [`FrameBridge`] represents one video stream. Producers (native video
//! engines) call [`FrameBridge::update_frame_buffer`] from any thread; the
//! bridge records the frame geometry, copies the pixels and posts a call to the
//! bound controller onto a serialized [`ScriptExecutor`]. Runtime adapters
//! (see the `framebridge-wasm` crate) implement [`ScriptObject`] or
//! [`FrameSink`] to perform the actual method lookup and value marshalling.

pub mod bridge;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod executor;
pub mod geometry;
pub mod ids;
pub mod registry;
pub mod sink;
pub mod testing;

pub use bridge::{FrameBridge, FrameDisposition};
pub use config::{Backpressure, Config, ExecutorConfig};
pub use diagnostics::{BridgeStats, StatsSnapshot};
pub use error::{BridgeError, ConfigError, DeliveryError, ExecutorError, ScriptError};
pub use executor::{InlineExecutor, ScriptExecutor, ScriptTask, ScriptThread};
pub use geometry::{FlipMode, FrameGeometry, FrameParams};
pub use ids::{StreamId, StreamIdAllocator, DEFAULT_ID_BASE};
pub use registry::BridgeRegistry;
pub use sink::{Controller, ControllerSink, FrameSink, MethodLookup, ScriptObject};
