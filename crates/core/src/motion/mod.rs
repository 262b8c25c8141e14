//! Smoothed, path-snapped vehicle motion.
//!
//! Poll results arrive every few seconds; the engine turns them into a
//! position and heading for every display frame. Time is injected through
//! [`MotionEngine::tick`], so a frame callback, a timer or a test clock can
//! drive it.

pub mod easing;
pub mod engine;
pub mod frames;

pub use easing::Easing;
pub use engine::{AnimatedPose, IngestSummary, MotionEngine, MotionSettings, RouteContext};
pub use frames::{FrameSource, IntervalFrames};
