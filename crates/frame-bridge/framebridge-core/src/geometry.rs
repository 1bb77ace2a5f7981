//! Frame geometry: dimensions, rotation and flip mode of the latest frame.

use serde::{Deserialize, Serialize};

/// Orientation transform the renderer applies to a frame.
///
/// Raw values match the native engine's flip enum (`0..=3`).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlipMode {
    #[default]
    None,
    Horizontal,
    Vertical,
    Both,
}

impl FlipMode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(FlipMode::None),
            1 => Some(FlipMode::Horizontal),
            2 => Some(FlipMode::Vertical),
            3 => Some(FlipMode::Both),
            _ => None,
        }
    }

    pub fn as_raw(self) -> u32 {
        match self {
            FlipMode::None => 0,
            FlipMode::Horizontal => 1,
            FlipMode::Vertical => 2,
            FlipMode::Both => 3,
        }
    }
}

/// Per-frame parameters supplied by the producer alongside the pixel buffer.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FrameParams {
    pub width: u32,
    pub height: u32,
    /// Clockwise rotation the renderer should apply, in degrees.
    pub rotation_degrees: u32,
}

impl FrameParams {
    pub fn new(width: u32, height: u32, rotation_degrees: u32) -> Self {
        Self {
            width,
            height,
            rotation_degrees,
        }
    }
}

/// Geometry of the most recently accepted frame of a stream.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
    pub flip_mode: FlipMode,
}

impl FrameGeometry {
    pub fn from_frame(params: FrameParams, flip_mode: FlipMode) -> Self {
        Self {
            width: params.width,
            height: params.height,
            rotation_degrees: params.rotation_degrees,
            flip_mode,
        }
    }

    /// Width and height as displayed once rotation is applied.
    /// Quarter turns (90/270) swap the axes.
    pub fn oriented_size(&self) -> (u32, u32) {
        if (self.rotation_degrees / 90) % 2 == 1 {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}
