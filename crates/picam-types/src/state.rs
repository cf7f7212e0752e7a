//! Session lifecycle types.

use serde::{Deserialize, Serialize};

/// Which pipeline a session runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineKind {
    Video,
    Still,
}

impl PipelineKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Still => "still",
        }
    }
}

/// The current state of a capture session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum SessionState {
    /// No pipeline has been built.
    #[default]
    Idle,

    /// The pipeline is being built.
    Starting {
        /// Current startup phase.
        phase: StartupPhase,
    },

    /// The pipeline is built and the control loop may run.
    Ready { kind: PipelineKind },

    /// The control loop is running.
    Capturing { kind: PipelineKind },

    /// The pipeline is being torn down.
    Stopping {
        /// Reason for stopping.
        reason: StopReason,

        /// Current shutdown phase.
        phase: ShutdownPhase,
    },

    /// Setup failed; everything built so far has been released.
    Error { message: String },
}

impl SessionState {
    /// Returns true if the session is idle.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Returns true if the session is starting.
    pub fn is_starting(&self) -> bool {
        matches!(self, Self::Starting { .. })
    }

    /// Returns true if the control loop is running.
    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing { .. })
    }

    /// Returns true if the session is stopping.
    pub fn is_stopping(&self) -> bool {
        matches!(self, Self::Stopping { .. })
    }

    /// Returns true if setup failed.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    /// Returns a simple string representation of the state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Starting { .. } => "Starting",
            Self::Ready { .. } => "Ready",
            Self::Capturing { .. } => "Capturing",
            Self::Stopping { .. } => "Stopping",
            Self::Error { .. } => "Error",
        }
    }
}

/// Pipeline construction phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartupPhase {
    /// Detecting the sensor and its limits.
    DetectSensor,

    /// Creating the camera component.
    CreateCamera,

    /// Creating the preview or null sink.
    CreatePreview,

    /// Creating the encoder and its output pool.
    CreateEncoder,

    /// Connecting the camera to the preview.
    ConnectPreview,

    /// Connecting the camera to the encoder.
    ConnectEncoder,
}

impl StartupPhase {
    /// The first phase.
    pub const FIRST: Self = Self::DetectSensor;

    /// The last phase.
    pub const LAST: Self = Self::ConnectEncoder;

    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::DetectSensor => Some(Self::CreateCamera),
            Self::CreateCamera => Some(Self::CreatePreview),
            Self::CreatePreview => Some(Self::CreateEncoder),
            Self::CreateEncoder => Some(Self::ConnectPreview),
            Self::ConnectPreview => Some(Self::ConnectEncoder),
            Self::ConnectEncoder => None,
        }
    }

    /// Returns the previous phase, if any (for rollback).
    pub fn previous(self) -> Option<Self> {
        match self {
            Self::DetectSensor => None,
            Self::CreateCamera => Some(Self::DetectSensor),
            Self::CreatePreview => Some(Self::CreateCamera),
            Self::CreateEncoder => Some(Self::CreatePreview),
            Self::ConnectPreview => Some(Self::CreateEncoder),
            Self::ConnectEncoder => Some(Self::ConnectPreview),
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::DetectSensor => "Detecting sensor",
            Self::CreateCamera => "Creating camera",
            Self::CreatePreview => "Creating preview",
            Self::CreateEncoder => "Creating encoder",
            Self::ConnectPreview => "Connecting preview",
            Self::ConnectEncoder => "Connecting encoder",
        }
    }
}

/// Teardown phases, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownPhase {
    /// Disabling ports not covered by a connection.
    DisablePorts,

    /// Disabling and destroying connections.
    DestroyConnections,

    /// Disabling components.
    DisableComponents,

    /// Releasing buffer pools.
    DestroyPools,

    /// Destroying components.
    DestroyComponents,
}

impl ShutdownPhase {
    /// The first phase.
    pub const FIRST: Self = Self::DisablePorts;

    /// Returns the next phase, if any.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::DisablePorts => Some(Self::DestroyConnections),
            Self::DestroyConnections => Some(Self::DisableComponents),
            Self::DisableComponents => Some(Self::DestroyPools),
            Self::DestroyPools => Some(Self::DestroyComponents),
            Self::DestroyComponents => None,
        }
    }

    /// Returns the display name for this phase.
    pub fn name(self) -> &'static str {
        match self {
            Self::DisablePorts => "Disabling ports",
            Self::DestroyConnections => "Destroying connections",
            Self::DisableComponents => "Disabling components",
            Self::DestroyPools => "Releasing buffer pools",
            Self::DestroyComponents => "Destroying components",
        }
    }
}

/// Reason a session stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The configured run completed.
    Completed,

    /// The user asked to exit.
    UserRequested,

    /// The abort flag was raised.
    Aborted,

    /// A fatal error occurred.
    Failed { message: String },
}

impl StopReason {
    /// Returns a display message for this reason.
    pub fn message(&self) -> String {
        match self {
            Self::Completed => "Capture completed".to_string(),
            Self::UserRequested => "Stopped by user".to_string(),
            Self::Aborted => "Capture aborted".to_string(),
            Self::Failed { message } => format!("Capture failed: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_phase_walk() {
        let mut phase = StartupPhase::FIRST;
        let mut count = 1;
        while let Some(next) = phase.next() {
            assert_eq!(next.previous(), Some(phase));
            phase = next;
            count += 1;
        }
        assert_eq!(phase, StartupPhase::LAST);
        assert_eq!(count, 6);
    }

    #[test]
    fn test_shutdown_phase_order() {
        let mut phases = vec![ShutdownPhase::FIRST];
        while let Some(next) = phases.last().and_then(|p| p.next()) {
            phases.push(next);
        }
        assert_eq!(phases.first(), Some(&ShutdownPhase::DisablePorts));
        assert_eq!(phases.last(), Some(&ShutdownPhase::DestroyComponents));
        let pools = phases.iter().position(|p| *p == ShutdownPhase::DestroyPools);
        let comps = phases.iter().position(|p| *p == ShutdownPhase::DestroyComponents);
        assert!(pools < comps);
    }

    #[test]
    fn test_session_state_names() {
        assert_eq!(SessionState::default().name(), "Idle");
        assert!(SessionState::Capturing { kind: PipelineKind::Video }.is_capturing());
        assert_eq!(
            StopReason::Failed { message: "boom".into() }.message(),
            "Capture failed: boom"
        );
    }
}
