//! Shared configuration, control and event types for the picam pipeline.
//!
//! This crate defines the serde-friendly value types passed between the
//! command-line front end and the capture engine.

mod commands;
mod events;
mod params;
mod state;
mod types;

pub use commands::{ControlCommand, ExternalSignal};
pub use events::PipelineEvent;
pub use params::{
    AnnotateConfig, AnnotateFlags, AwbGains, AwbMode, CameraParameters, ColourEffects, DrcStrength,
    ExposureMode, FlickerAvoid, ImageEffect, MeteringMode, Roi, StereoLayout, StereoMode,
};
pub use state::{PipelineKind, SessionState, ShutdownPhase, StartupPhase, StopReason};
pub use types::{
    CommonSettings, FrameNextMethod, H264Level, H264Profile, IntraRefreshType, PreviewConfig,
    SessionMetrics, StillConfig, ThumbnailConfig, VideoConfig, VideoEncoding, WaitMethod, Window,
    DEFAULT_TIMEOUT_MS,
};

use crossbeam_channel::{Receiver, Sender};

/// Channel capacity for interactive control commands.
pub const COMMAND_CHANNEL_CAPACITY: usize = 16;

/// Channel capacity for external notifications.
pub const SIGNAL_CHANNEL_CAPACITY: usize = 4;

/// Channel capacity for pipeline events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Creates a bounded control command channel.
pub fn command_channel() -> (Sender<ControlCommand>, Receiver<ControlCommand>) {
    crossbeam_channel::bounded(COMMAND_CHANNEL_CAPACITY)
}

/// Creates a bounded external notification channel.
pub fn signal_channel() -> (Sender<ExternalSignal>, Receiver<ExternalSignal>) {
    crossbeam_channel::bounded(SIGNAL_CHANNEL_CAPACITY)
}

/// Creates a bounded event channel.
pub fn event_channel() -> (Sender<PipelineEvent>, Receiver<PipelineEvent>) {
    crossbeam_channel::bounded(EVENT_CHANNEL_CAPACITY)
}
