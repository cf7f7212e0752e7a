//! Bitrate, level and slicing limits of the H264 and MJPEG encoders.

use picam_mmal::align_up;
use picam_types::{H264Level, VideoEncoding};
use tracing::warn;

use crate::error::EncoderError;
use crate::EncoderResult;

pub const MAX_BITRATE_MJPEG: u32 = 25_000_000;
pub const MAX_BITRATE_LEVEL4: u32 = 25_000_000;
pub const MAX_BITRATE_LEVEL42: u32 = 62_500_000;

/// Macroblocks per second encodable at level 4.
pub const MAX_MACROBLOCKS_LEVEL4: u64 = 245_760;

/// Macroblocks per second encodable at level 4.2.
pub const MAX_MACROBLOCKS_LEVEL42: u64 = 522_240;

/// Reduce `requested` to the ceiling for the encoding and level.
pub fn clamp_bitrate(encoding: VideoEncoding, level: H264Level, requested: u32) -> u32 {
    let ceiling = match (encoding, level) {
        (VideoEncoding::Mjpeg, _) => MAX_BITRATE_MJPEG,
        (VideoEncoding::H264, H264Level::L4) => MAX_BITRATE_LEVEL4,
        (VideoEncoding::H264, _) => MAX_BITRATE_LEVEL42,
    };
    if requested > ceiling {
        warn!(
            requested,
            ceiling,
            "Bitrate too high: reducing to {:.1} Mbit/s",
            f64::from(ceiling) / 1_000_000.0
        );
        return ceiling;
    }
    requested
}

/// Macroblocks per second for a frame size and rate.
pub fn macroblock_rate(width: u32, height: u32, framerate: u32) -> u64 {
    let columns = u64::from(align_up(width, 16) >> 4);
    let rows = u64::from(align_up(height, 16) >> 4);
    columns * rows * u64::from(framerate)
}

/// Pick the level able to encode the stream, raising 4 to 4.2 if needed.
pub fn resolve_level(level: H264Level, width: u32, height: u32, framerate: u32) -> EncoderResult<H264Level> {
    let macroblocks = macroblock_rate(width, height, framerate);
    if macroblocks <= MAX_MACROBLOCKS_LEVEL4 {
        return Ok(level);
    }
    if macroblocks <= MAX_MACROBLOCKS_LEVEL42 {
        if level != H264Level::L42 {
            warn!(macroblocks, "Too many macroblocks/s: increasing H264 level to 4.2");
        }
        return Ok(H264Level::L42);
    }
    Err(EncoderError::TooManyMacroblocks {
        macroblocks,
        limit: MAX_MACROBLOCKS_LEVEL42,
    })
}

/// Macroblock rows per slice when a frame of `height` is cut into `slices`.
///
/// Rounds up so an uneven split never produces an extra slice.
pub fn slice_rows(height: u32, slices: u32) -> u32 {
    let rows = align_up(height, 16) >> 4;
    let slices = slices.max(1);
    if slices > rows {
        warn!(slices, rows, "H264 slice count exceeds macroblock rows, using {}", rows);
    }
    rows.div_ceil(slices)
}
