//! Error types for the engine.

use picam_camera::CameraError;
use picam_encoder::EncoderError;
use picam_mmal::{HalError, Status};
use picam_types::StartupPhase;
use thiserror::Error;

/// Broad classes of pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A component, port or connection could not be created or driven.
    HardwareUnavailable,

    /// A format or parameter was refused.
    ConfigurationRejected,

    /// A requested value exceeds what the hardware supports.
    OutOfRange,

    /// No buffer or memory was available.
    ResourceExhausted,

    /// The hardware marked a buffer as failed.
    TransmissionFailed,

    /// Waiting for an external notification failed.
    SignalWaitError,

    /// The session was aborted.
    Aborted,
}

/// Errors that can occur while building or running a session.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A startup phase failed; everything built so far was released.
    #[error("{}: {source}", phase.name())]
    Startup {
        phase: StartupPhase,
        #[source]
        source: Box<PipelineError>,
    },

    #[error(transparent)]
    Camera(#[from] CameraError),

    #[error(transparent)]
    Encoder(#[from] EncoderError),

    /// A hardware call made by the engine itself failed.
    #[error("{stage}: {source}")]
    Hal {
        stage: &'static str,
        #[source]
        source: HalError,
    },

    /// A still capture ended with a failed buffer.
    #[error("Transmission failed during capture of frame {frame}")]
    TransmissionFailed { frame: u64 },

    /// Waiting for an external notification returned an OS error.
    #[error("Bad signal received - error {errno}")]
    SignalWait { errno: i32 },

    #[error("Session aborted")]
    Aborted,
}

impl PipelineError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Startup { source, .. } => source.kind(),
            Self::Camera(CameraError::UnsupportedSensor(_)) => ErrorKind::HardwareUnavailable,
            Self::Camera(CameraError::OutOfRange { .. }) => ErrorKind::ConfigurationRejected,
            Self::Camera(e) => e.hal().map_or(ErrorKind::HardwareUnavailable, hal_kind),
            Self::Encoder(EncoderError::TooManyMacroblocks { .. }) => ErrorKind::OutOfRange,
            Self::Encoder(e) => e.hal().map_or(ErrorKind::HardwareUnavailable, hal_kind),
            Self::Hal { source, .. } => hal_kind(source),
            Self::TransmissionFailed { .. } => ErrorKind::TransmissionFailed,
            Self::SignalWait { .. } => ErrorKind::SignalWaitError,
            Self::Aborted => ErrorKind::Aborted,
        }
    }
}

fn hal_kind(error: &HalError) -> ErrorKind {
    match error {
        HalError::PoolExhausted(_) | HalError::NoPool(_) => ErrorKind::ResourceExhausted,
        HalError::Status { status, .. } => match status {
            Status::NoMemory | Status::NoSpace => ErrorKind::ResourceExhausted,
            Status::Invalid | Status::NotSupported | Status::NotFound | Status::BadConfig => {
                ErrorKind::ConfigurationRejected
            }
            _ => ErrorKind::HardwareUnavailable,
        },
        _ => ErrorKind::HardwareUnavailable,
    }
}

pub(crate) trait HalContext<T> {
    fn stage(self, stage: &'static str) -> Result<T, PipelineError>;
}

impl<T> HalContext<T> for Result<T, HalError> {
    fn stage(self, stage: &'static str) -> Result<T, PipelineError> {
        self.map_err(|source| PipelineError::Hal { stage, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_follows_status() {
        let err: Result<(), _> = Err(HalError::status("commit format", Status::BadConfig));
        assert_eq!(err.stage("x").unwrap_err().kind(), ErrorKind::ConfigurationRejected);

        let err = PipelineError::Hal {
            stage: "create",
            source: HalError::status("create component", Status::NoMemory),
        };
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
    }

    #[test]
    fn test_startup_error_keeps_inner_kind() {
        let err = PipelineError::Startup {
            phase: StartupPhase::CreateEncoder,
            source: Box::new(PipelineError::Encoder(EncoderError::TooManyMacroblocks {
                macroblocks: 600_000,
                limit: 522_240,
            })),
        };
        assert_eq!(err.kind(), ErrorKind::OutOfRange);
        assert!(err.to_string().starts_with("Creating encoder: "));
    }

    #[test]
    fn test_unsupported_sensor_is_hardware() {
        let err = PipelineError::from(CameraError::UnsupportedSensor("toshh2c".into()));
        assert_eq!(err.kind(), ErrorKind::HardwareUnavailable);
    }
}
