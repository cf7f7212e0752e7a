//! Capture engine for the picam pipeline.
//!
//! This crate builds camera, encoder and preview components into a
//! session, drains encoder output on dispatch workers, and runs the video
//! and still timing state machines that decide when capture happens.

mod controls;
mod dispatch;
mod error;
mod events;
mod metrics;
mod pacing;
mod state;
mod still;
mod video;

pub use controls::{SessionControls, ABORT_INTERVAL};
pub use dispatch::{EncodedFrame, StillImage};
pub use error::{ErrorKind, PipelineError};
pub use events::EventSink;
pub use metrics::MetricsCollector;
pub use pacing::{
    still_pacer, timelapse_step, video_pacer, CapturePacer, FramePacer, Pace, SegmentCounter,
    TimelapseStep, Transition, CAMERA_SETTLE_TIME,
};
pub use state::PipelineState;
pub use still::{init_still_pipeline, StillSession};
pub use video::{init_video_pipeline, VideoSession};

/// Result type for engine operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
