//! Timing policies for the capture loops, one type per policy.

pub mod still;
pub mod video;

pub use still::{still_pacer, timelapse_step, FramePacer, Pace, TimelapseStep, CAMERA_SETTLE_TIME};
pub use video::{video_pacer, CapturePacer, SegmentCounter, Transition};
