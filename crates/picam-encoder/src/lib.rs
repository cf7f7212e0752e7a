//! Video (H264/MJPEG) and still (JPEG) encoder components.
//!
//! Encoders take their input from a camera output over a tunnelled
//! connection and deliver compressed buffers on their output port, which
//! owns the buffer pool the application recycles.

mod error;
mod policy;
mod still;
mod video;

pub use error::EncoderError;
pub use policy::{
    clamp_bitrate, macroblock_rate, resolve_level, slice_rows, MAX_BITRATE_LEVEL4,
    MAX_BITRATE_LEVEL42, MAX_BITRATE_MJPEG, MAX_MACROBLOCKS_LEVEL4, MAX_MACROBLOCKS_LEVEL42,
};
pub use still::create_still_encoder;
pub use video::create_video_encoder;

use std::sync::Arc;

use picam_mmal::{BufferPool, ComponentId, Encoding, PortRef};

/// Result type for encoder operations.
pub type EncoderResult<T> = Result<T, EncoderError>;

/// An enabled encoder and the pool feeding its output port.
#[derive(Clone)]
pub struct EncoderHandle {
    id: ComponentId,
    encoding: Encoding,
    bitrate: u32,
    pool: Arc<BufferPool>,
}

impl EncoderHandle {
    pub fn id(&self) -> ComponentId {
        self.id
    }

    pub fn input_port(&self) -> PortRef {
        PortRef::input(self.id, 0)
    }

    pub fn output_port(&self) -> PortRef {
        PortRef::output(self.id, 0)
    }

    pub fn encoding(&self) -> Encoding {
        self.encoding
    }

    /// Bitrate applied after clamping; 0 for stills.
    pub fn bitrate(&self) -> u32 {
        self.bitrate
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

impl std::fmt::Debug for EncoderHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderHandle")
            .field("id", &self.id)
            .field("encoding", &self.encoding)
            .field("bitrate", &self.bitrate)
            .field("buffers", &self.pool.capacity())
            .finish()
    }
}
