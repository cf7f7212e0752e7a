//! Error types for the encoder module.

use picam_mmal::HalError;
use thiserror::Error;

/// Errors that can occur while building an encoder.
#[derive(Debug, Error)]
pub enum EncoderError {
    /// A hardware call failed.
    #[error("{stage}: {source}")]
    Hal {
        stage: &'static str,
        #[source]
        source: HalError,
    },

    /// The requested stream exceeds what any supported H264 level can encode.
    #[error("Too many macroblocks/s requested: {macroblocks} (limit {limit})")]
    TooManyMacroblocks { macroblocks: u64, limit: u64 },
}

impl EncoderError {
    /// The hardware error underneath, if any.
    pub fn hal(&self) -> Option<&HalError> {
        match self {
            Self::Hal { source, .. } => Some(source),
            Self::TooManyMacroblocks { .. } => None,
        }
    }
}

pub(crate) trait HalContext<T> {
    fn stage(self, stage: &'static str) -> Result<T, EncoderError>;
}

impl<T> HalContext<T> for Result<T, HalError> {
    fn stage(self, stage: &'static str) -> Result<T, EncoderError> {
        self.map_err(|source| EncoderError::Hal { stage, source })
    }
}
