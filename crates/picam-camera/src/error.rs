//! Error types for the camera module.

use picam_mmal::HalError;
use thiserror::Error;

/// Errors that can occur while building or driving the camera.
#[derive(Debug, Error)]
pub enum CameraError {
    /// A hardware call failed.
    #[error("{stage}: {source}")]
    Hal {
        stage: &'static str,
        #[source]
        source: HalError,
    },

    /// The attached sensor cannot be driven.
    #[error("Sensor {0} is not supported")]
    UnsupportedSensor(String),

    /// A control value is outside its accepted range.
    #[error("Invalid {name} value: {value}")]
    OutOfRange { name: &'static str, value: i64 },
}

impl CameraError {
    /// The hardware error underneath, if any.
    pub fn hal(&self) -> Option<&HalError> {
        match self {
            Self::Hal { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Attaches a stage description to hardware errors.
pub(crate) trait HalContext<T> {
    fn stage(self, stage: &'static str) -> Result<T, CameraError>;
}

impl<T> HalContext<T> for Result<T, HalError> {
    fn stage(self, stage: &'static str) -> Result<T, CameraError> {
        self.map_err(|source| CameraError::Hal { stage, source })
    }
}
