//! Session configuration types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::params::CameraParameters;

/// Run time used when no timeout has been configured.
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Settings shared by the video and still pipelines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommonSettings {
    /// Physical camera index.
    pub camera_num: u32,

    /// Sensor mode (0 = automatic).
    pub sensor_mode: u32,

    /// Requested width in pixels (0 = sensor maximum).
    pub width: u32,

    /// Requested height in pixels (0 = sensor maximum).
    pub height: u32,

    /// Sensor name, filled in by discovery.
    pub camera_name: String,

    /// Raise logging to debug level.
    pub verbose: bool,
}

impl Default for CommonSettings {
    fn default() -> Self {
        Self {
            camera_num: 0,
            sensor_mode: 0,
            width: 0,
            height: 0,
            camera_name: "(Unknown)".to_string(),
            verbose: false,
        }
    }
}

/// Preview window geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for Window {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 1024,
            height: 768,
        }
    }
}

/// Preview (display) configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Build a renderer; a null sink is used otherwise.
    pub want_preview: bool,

    /// Render full screen, ignoring `window`.
    pub fullscreen: bool,

    /// Opacity 0-255.
    pub opacity: u8,

    /// Destination rectangle when not full screen.
    pub window: Window,

    /// Display layer.
    pub layer: i32,

    /// Display number.
    pub display: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            want_preview: true,
            fullscreen: true,
            opacity: 255,
            window: Window::default(),
            layer: 2,
            display: 0,
        }
    }
}

/// Video encoding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoEncoding {
    #[default]
    H264,
    Mjpeg,
}

/// H.264 profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum H264Profile {
    #[default]
    Baseline,
    Main,
    High,
}

/// H.264 level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum H264Level {
    #[serde(rename = "4")]
    #[default]
    L4,
    #[serde(rename = "4.1")]
    L41,
    #[serde(rename = "4.2")]
    L42,
}

impl H264Level {
    /// Returns the display name for this level.
    pub fn name(self) -> &'static str {
        match self {
            Self::L4 => "4",
            Self::L41 => "4.1",
            Self::L42 => "4.2",
        }
    }
}

/// Intra refresh mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntraRefreshType {
    Cyclic,
    Adaptive,
    Both,
    CyclicRows,
}

/// How the video pipeline switches between running and paused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitMethod {
    /// Run once for the timeout.
    #[default]
    None,
    /// Alternate on/off times until the timeout.
    Timed,
    /// Toggle on each line of input.
    Keypress,
    /// Toggle on each external notification.
    Signal,
    /// Run until aborted.
    Forever,
}

/// How the still pipeline paces captures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameNextMethod {
    #[default]
    Single,
    Timelapse,
    Keypress,
    Forever,
    Gpio,
    Signal,
    Immediate,
}

/// JPEG thumbnail configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub enable: bool,
    pub width: u32,
    pub height: u32,
    pub quality: u32,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            enable: true,
            width: 64,
            height: 48,
            quality: 35,
        }
    }
}

/// Configuration for a video capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub common: CommonSettings,
    pub camera: CameraParameters,

    /// Overall run time in milliseconds (0 = unbounded, None = default).
    pub timeout_ms: Option<u64>,

    pub encoding: VideoEncoding,

    /// Requested bitrate in bits per second.
    pub bitrate: u32,

    /// Frames per second.
    pub framerate: u32,

    /// GOP period (None = encoder default).
    pub intraperiod: Option<u32>,

    /// Fixed quantisation parameter (0 = rate controlled).
    pub quantisation: u32,

    pub profile: H264Profile,
    pub level: H264Level,
    pub inline_headers: bool,
    pub inline_motion_vectors: bool,
    pub add_sps_timing: bool,
    pub immutable_input: bool,
    pub intra_refresh: Option<IntraRefreshType>,

    /// Horizontal slices per frame.
    pub slices: u32,

    pub wait_method: WaitMethod,
    pub on_time_ms: u64,
    pub off_time_ms: u64,

    /// Rotate the segment after this many milliseconds (0 = never).
    pub segment_size_ms: u64,

    /// Wrap segment numbers after this value (0 = never).
    pub segment_wrap: u32,

    /// First segment number.
    pub segment_number: u32,

    /// Start a new segment on every pause.
    pub split_wait: bool,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            common: CommonSettings {
                width: 1920,
                height: 1080,
                ..CommonSettings::default()
            },
            camera: CameraParameters::default(),
            timeout_ms: None,
            encoding: VideoEncoding::H264,
            bitrate: 17_000_000,
            framerate: 30,
            intraperiod: None,
            quantisation: 0,
            profile: H264Profile::Baseline,
            level: H264Level::L4,
            inline_headers: false,
            inline_motion_vectors: false,
            add_sps_timing: false,
            immutable_input: true,
            intra_refresh: None,
            slices: 1,
            wait_method: WaitMethod::None,
            on_time_ms: 5000,
            off_time_ms: 5000,
            segment_size_ms: 0,
            segment_wrap: 0,
            segment_number: 1,
            split_wait: false,
        }
    }
}

impl VideoConfig {
    /// Returns the overall run time; zero means unbounded.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }
}

/// Configuration for a still capture session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StillConfig {
    pub common: CommonSettings,
    pub camera: CameraParameters,
    pub preview: PreviewConfig,

    /// Overall run time in milliseconds (None = default).
    pub timeout_ms: Option<u64>,

    /// JPEG quality 0-100.
    pub quality: u32,

    /// JPEG restart interval (0 = none).
    pub restart_interval: u32,

    pub thumbnail: ThumbnailConfig,

    pub frame_next: FrameNextMethod,

    /// Interval between timelapse frames in milliseconds.
    pub timelapse_ms: u64,

    /// Index of the first frame.
    pub frame_start: u32,

    /// Keep the pipeline in burst mode between captures.
    pub burst: bool,

    /// Attach raw sensor data to each capture.
    pub raw: bool,

    /// Number frames by Unix time instead of index.
    pub timestamp: bool,

    /// Preview at full capture resolution.
    pub full_res_preview: bool,
}

impl Default for StillConfig {
    fn default() -> Self {
        Self {
            common: CommonSettings::default(),
            camera: CameraParameters::default(),
            preview: PreviewConfig::default(),
            timeout_ms: None,
            quality: 85,
            restart_interval: 0,
            thumbnail: ThumbnailConfig::default(),
            frame_next: FrameNextMethod::Single,
            timelapse_ms: 0,
            frame_start: 0,
            burst: false,
            raw: false,
            timestamp: false,
            full_res_preview: false,
        }
    }
}

impl StillConfig {
    /// Returns the overall run time; zero means unbounded.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }
}

/// Session counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    /// Logical frames delivered to the consumer.
    pub frames_delivered: u64,

    /// Payload bytes delivered to the consumer.
    pub bytes_delivered: u64,

    /// Buffers skipped for a missing or repeated timestamp.
    pub skipped_buffers: u64,

    /// Buffers that could not be handed back to the port.
    pub resubmit_failures: u64,

    /// Completed still images.
    pub stills_captured: u64,

    /// Segment rotations.
    pub segments_rotated: u64,

    /// Number of capture toggles.
    pub capture_toggles: u64,

    /// Session uptime in seconds.
    pub uptime_seconds: u64,
}
