//! Events emitted by a capture session.

use serde::{Deserialize, Serialize};

use crate::params::Roi;
use crate::state::SessionState;
use crate::types::SessionMetrics;

/// Events that a session reports to its owner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    /// Session state has changed.
    StateChanged {
        /// Previous state.
        previous: Box<SessionState>,

        /// Current state.
        current: Box<SessionState>,
    },

    /// Video capture switched between running and paused.
    CaptureToggled { capturing: bool },

    /// A new output segment started.
    SegmentRotated { segment: u32 },

    /// A still image was delivered.
    StillCaptured { frame: u64, bytes: usize },

    /// The input crop changed.
    ZoomChanged { roi: Roi },

    /// Final counters for the session.
    Metrics(SessionMetrics),

    /// Error occurred.
    Error {
        /// Whether the session continues.
        recoverable: bool,

        /// Error message.
        message: String,
    },
}
