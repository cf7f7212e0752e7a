//! Port format descriptors.

use crate::param::Rational;

/// Elementary stream encodings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Vendor-internal image handle.
    #[default]
    Opaque,
    I420,
    H264,
    Mjpeg,
    Jpeg,
}

/// Rectangle in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Video elementary stream layout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VideoFormat {
    /// Allocated width, aligned as the hardware requires.
    pub width: u32,
    /// Allocated height, aligned as the hardware requires.
    pub height: u32,
    /// Visible area.
    pub crop: Rect,
    /// 0/1 means variable.
    pub frame_rate: Rational,
}

/// Format and buffering of a port.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortFormat {
    pub encoding: Encoding,
    pub encoding_variant: Option<Encoding>,
    /// Bits per second, for compressed outputs.
    pub bitrate: u32,
    pub video: VideoFormat,

    /// Buffer size the pool will allocate.
    pub buffer_size: u32,
    /// Buffer count the pool will allocate.
    pub buffer_num: u32,

    /// Hardware minimums and recommendations, filled on commit.
    pub buffer_size_min: u32,
    pub buffer_size_recommended: u32,
    pub buffer_num_min: u32,
    pub buffer_num_recommended: u32,
}

/// Round `value` up to a multiple of `align` (a power of two).
pub fn align_up(value: u32, align: u32) -> u32 {
    debug_assert!(align.is_power_of_two());
    (value + align - 1) & !(align - 1)
}
